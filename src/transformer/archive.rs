//! API project archive decoding
//!
//! The control plane answers a runtime-artifact request with a root zip that
//! holds `deployments.json` plus one inner zip per API. Members of an inner
//! zip are recognized by name fragment, so the project folder prefix the
//! control plane adds does not matter.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use tracing::{debug, warn};
use zip::ZipArchive;

use super::model::{
    ApiDeployment, ApiDescriptor, ApiDescriptorFile, ClientCertificates, DeploymentDescriptor,
    EndpointCertificates,
};
use crate::{Error, Result};

/// Name of the deployment descriptor in the root archive
pub const DEPLOYMENTS_FILE: &str = "deployments.json";

const CLIENT_CERT_DIR: &str = "Client-certificates";
const ENDPOINT_CERT_DIR: &str = "Endpoint-certificates";

/// API definition files, matched on the member's file name
const DEFINITION_FILES: [&str; 2] = ["swagger.json", "schema.graphql"];

/// Everything decoded from one API's inner archive
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ApiArtifact {
    /// Member name of the inner archive
    pub file_name: String,
    /// Parsed API descriptor
    pub descriptor: ApiDescriptor,
    /// OpenAPI or GraphQL schema text
    pub definition: String,
    /// Where the API is deployed
    pub deployment: ApiDeployment,
    /// Client certificate bundle, when mutual TLS is configured
    pub client_certificates: Option<ClientCertificates>,
    /// Endpoint certificate bundle, when backend TLS is configured
    pub endpoint_certificates: Option<EndpointCertificates>,
    /// `.crt` files under `Client-certificates/`, by file name
    pub client_cert_files: BTreeMap<String, String>,
    /// `.crt` files under `Endpoint-certificates/`, by file name
    pub endpoint_cert_files: BTreeMap<String, String>,
}

impl ApiArtifact {
    /// Organization the API is deployed for
    pub fn organization(&self) -> &str {
        if self.deployment.organization_id.is_empty() {
            &self.descriptor.organization_id
        } else {
            &self.deployment.organization_id
        }
    }
}

/// Read every file member of a zip as `(name, bytes)`
pub(crate) fn read_members(bytes: &[u8]) -> Result<Vec<(String, Vec<u8>)>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut members = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        let mut content = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut content)
            .map_err(|e| Error::archive_member(&name, e.to_string()))?;
        members.push((name, content));
    }
    Ok(members)
}

/// Decode a root archive into one artifact per deployed API
///
/// A missing or malformed `deployments.json` fails the whole archive. An
/// inner archive that cannot be decoded is logged and skipped so the other
/// APIs of the batch still deploy.
pub fn decode(bytes: &[u8]) -> Result<Vec<ApiArtifact>> {
    let members: BTreeMap<String, Vec<u8>> = read_members(bytes)?.into_iter().collect();

    let descriptor = members
        .get(DEPLOYMENTS_FILE)
        .ok_or_else(|| Error::archive_member(DEPLOYMENTS_FILE, "missing from root archive"))?;
    let descriptor: DeploymentDescriptor = serde_json::from_slice(descriptor)
        .map_err(|e| Error::archive_member(DEPLOYMENTS_FILE, e.to_string()))?;

    let mut artifacts = Vec::new();
    for deployment in descriptor.data.deployments {
        let Some(inner) = members.get(&deployment.api_file) else {
            warn!(api_file = %deployment.api_file, "Deployment references a missing API archive");
            continue;
        };
        let api_file = deployment.api_file.clone();
        match decode_api(&api_file, inner, deployment) {
            Ok(artifact) => artifacts.push(artifact),
            Err(e) => warn!(api_file = %api_file, error = %e, "Skipping undecodable API archive"),
        }
    }
    Ok(artifacts)
}

/// Decode one API's inner archive
pub fn decode_api(file_name: &str, bytes: &[u8], deployment: ApiDeployment) -> Result<ApiArtifact> {
    let mut artifact = ApiArtifact {
        file_name: file_name.to_string(),
        deployment,
        ..Default::default()
    };
    let mut descriptor_found = false;

    for (name, content) in read_members(bytes)? {
        debug!(member = %name, "Reading API archive member");
        let text = || String::from_utf8_lossy(&content).into_owned();
        let base = name.rsplit('/').next().unwrap_or(&name);

        if DEFINITION_FILES.contains(&base) {
            artifact.definition = text();
        } else if base == "api.json" {
            let file: ApiDescriptorFile = serde_json::from_slice(&content)
                .map_err(|e| Error::archive_member(&name, e.to_string()))?;
            artifact.descriptor = file.data;
            descriptor_found = true;
        } else if base == "api.yaml" {
            let file: ApiDescriptorFile = serde_yaml::from_slice(&content)
                .map_err(|e| Error::archive_member(&name, e.to_string()))?;
            artifact.descriptor = file.data;
            descriptor_found = true;
        } else if name.contains("client_certificates.json") {
            artifact.client_certificates = Some(parse_bundle(&name, &content)?);
        } else if name.contains("endpoint_certificates.json") {
            artifact.endpoint_certificates = Some(parse_bundle(&name, &content)?);
        } else if name.ends_with(".crt") {
            if name.contains(CLIENT_CERT_DIR) {
                artifact.client_cert_files.insert(base.to_string(), text());
            } else if name.contains(ENDPOINT_CERT_DIR) {
                artifact.endpoint_cert_files.insert(base.to_string(), text());
            }
        }
    }

    if !descriptor_found {
        return Err(Error::archive_member(file_name, "no api.json in API archive"));
    }
    Ok(artifact)
}

fn parse_bundle<T: serde::de::DeserializeOwned>(name: &str, content: &[u8]) -> Result<T> {
    if content.iter().all(u8::is_ascii_whitespace) {
        return Err(Error::archive_member(name, "empty certificate bundle"));
    }
    serde_json::from_slice(content).map_err(|e| Error::archive_member(name, e.to_string()))
}

//! Client for the CR generation service
//!
//! The service takes an APK configuration plus the API definition and answers
//! with a zip of Kubernetes manifests. Traffic to it stays inside the mesh, so
//! certificate validation is off.

use std::time::Duration;

use reqwest::multipart::Form;
use tracing::{debug, instrument};

use crate::{Error, Result};

const CONF_FIELD: &str = "apkConfiguration";
const DEFINITION_FIELD: &str = "definitionFile";

/// Client for the CR generation endpoint
#[derive(Clone, Debug)]
pub struct CrGenerator {
    http: reqwest::Client,
    endpoint: String,
}

impl CrGenerator {
    /// Client posting to `endpoint`
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }

    /// Endpoint the client posts to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Generate the CR bundle for one API
    #[instrument(skip(self, conf, definition), fields(endpoint = %self.endpoint))]
    pub async fn generate(&self, conf: &str, definition: &str, organization: &str) -> Result<Vec<u8>> {
        if conf.trim().is_empty() {
            return Err(Error::cr_generation("APK configuration is empty"));
        }
        if definition.trim().is_empty() {
            return Err(Error::cr_generation("API definition is empty"));
        }

        let form = Form::new()
            .text(CONF_FIELD, conf.to_string())
            .text(DEFINITION_FIELD, definition.to_string());

        let response = self
            .http
            .post(&self.endpoint)
            .query(&[("organization", organization)])
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(Error::cr_generation_status(
                status.as_u16(),
                String::from_utf8_lossy(&body).into_owned(),
            ));
        }
        debug!(bytes = body.len(), "Received generated CRs");
        Ok(body.to_vec())
    }
}

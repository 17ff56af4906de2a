//! Key managers as TokenIssuer resources
//!
//! Each enabled key manager becomes one issuer named after its UUID. Every
//! organization with a key manager also gets an internal-key issuer that
//! validates the keys the control plane mints for API testing; that issuer
//! is never removed when a key manager goes away.

use std::collections::BTreeSet;

use base64::Engine;
use kube::api::{ApiResource, ObjectMeta};
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::controlplane::types::{CpKeyManager, ResolvedKeyManager};
use crate::controlplane::{ControlPlaneClient, Resource};
use crate::crd::{
    sha1_hex, CertificateConfig, ClaimMappingSpec, JwksConfig, SecretRef, SignatureValidation,
    TargetRef, TokenIssuer, TokenIssuerSpec,
};
use crate::events::envelope::KeyManagerEvent;
use crate::reconcile::artifact::to_dynamic;
use crate::reconcile::client::{list_all, selector, ClusterClient};
use crate::reconcile::singleton::mark_owned;
use crate::reconcile::{three_way, upsert, ThreeWayReport};
use crate::{Error, Result, INITIATE_FROM_CP, INITIATE_FROM_LABEL, NAME_LABEL, ORGANIZATION_LABEL};

/// Name suffix of per-organization internal-key issuers
pub const INTERNAL_KEY_SUFFIX: &str = "-internal-key-issuer";

/// Display name of internal-key issuers
pub const INTERNAL_KEY_ISSUER_NAME: &str = "Internal Key TokenIssuer";

/// Key of the signing certificate inside the internal-key secret
pub const INTERNAL_KEY_SECRET_KEY: &str = "wso2carbon.pem";

/// Claim holding scopes when the key manager does not name one
pub const DEFAULT_SCOPES_CLAIM: &str = "scope";

const JWKS_CERTIFICATE_TYPE: &str = "JWKS";
const PEM_MARKER: &str = "-----BEGIN CERTIFICATE-----";

/// Data-plane settings token issuers are built with
#[derive(Clone, Debug, PartialEq)]
pub struct IssuerSettings {
    /// Gateway the issuers attach to
    pub gateway_name: String,
    /// Consumer key claim used when the key manager does not name one
    pub consumer_key_claim: String,
    /// Issuer of internal keys
    pub internal_key_issuer: String,
    /// Secret holding the internal-key signing certificate
    pub internal_key_secret: String,
}

impl From<&Config> for IssuerSettings {
    fn from(config: &Config) -> Self {
        Self {
            gateway_name: config.data_plane.gateway_name.clone(),
            consumer_key_claim: config.data_plane.consumer_key_claim.clone(),
            internal_key_issuer: config.control_plane.internal_key_issuer.clone(),
            internal_key_secret: config.data_plane.internal_key_secret.clone(),
        }
    }
}

impl Default for IssuerSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

fn or_default(value: &str, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}

/// How tokens of this key manager are verified
///
/// A JWKS endpoint is used as is. A certificate may arrive base64 wrapped and
/// must be PEM once unwrapped.
pub fn signature_validation(km: &ResolvedKeyManager) -> Result<Option<SignatureValidation>> {
    if km.certificate_type.is_empty() || km.certificate_value.is_empty() {
        return Ok(None);
    }
    if km.certificate_type == JWKS_CERTIFICATE_TYPE {
        return Ok(Some(SignatureValidation {
            jwks: Some(JwksConfig {
                url: km.certificate_value.clone(),
            }),
            certificate: None,
        }));
    }

    let certificate = base64::engine::general_purpose::STANDARD
        .decode(km.certificate_value.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| km.certificate_value.clone());
    if !certificate.contains(PEM_MARKER) {
        return Err(Error::serialization_for(
            "TokenIssuer",
            format!("certificate of key manager {} is not PEM", km.name),
        ));
    }
    Ok(Some(SignatureValidation {
        jwks: None,
        certificate: Some(CertificateConfig {
            certificate_inline: Some(certificate),
            secret_ref: None,
        }),
    }))
}

fn meta(name: &str, labels: &[(&str, String)]) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        labels: Some(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        ),
        ..Default::default()
    }
}

/// TokenIssuer of one key manager, named after its UUID
pub fn token_issuer(km: &ResolvedKeyManager, settings: &IssuerSettings) -> Result<TokenIssuer> {
    let spec = TokenIssuerSpec {
        name: km.name.clone(),
        organization: km.tenant_domain.clone(),
        issuer: km.issuer.clone(),
        consumer_key_claim: or_default(&km.consumer_key_claim, &settings.consumer_key_claim),
        scopes_claim: or_default(&km.scopes_claim, DEFAULT_SCOPES_CLAIM),
        signature_validation: signature_validation(km)?,
        claim_mappings: km
            .claim_mappings
            .iter()
            .map(|c| ClaimMappingSpec {
                remote_claim: c.remote_claim.clone(),
                local_claim: c.local_claim.clone(),
            })
            .collect(),
        target_ref: TargetRef::gateway(&settings.gateway_name),
    };
    Ok(TokenIssuer {
        metadata: meta(
            &km.uuid,
            &[
                (NAME_LABEL, sha1_hex(&km.name)),
                (ORGANIZATION_LABEL, sha1_hex(&km.tenant_domain)),
                (INITIATE_FROM_LABEL, INITIATE_FROM_CP.to_string()),
            ],
        ),
        spec,
    })
}

/// Internal-key issuer of one organization
pub fn internal_key_issuer(organization: &str, settings: &IssuerSettings) -> TokenIssuer {
    TokenIssuer {
        metadata: meta(
            &format!("{organization}{INTERNAL_KEY_SUFFIX}"),
            &[
                (ORGANIZATION_LABEL, sha1_hex(organization)),
                (INITIATE_FROM_LABEL, INITIATE_FROM_CP.to_string()),
            ],
        ),
        spec: TokenIssuerSpec {
            name: INTERNAL_KEY_ISSUER_NAME.to_string(),
            organization: organization.to_string(),
            issuer: settings.internal_key_issuer.clone(),
            consumer_key_claim: settings.consumer_key_claim.clone(),
            scopes_claim: DEFAULT_SCOPES_CLAIM.to_string(),
            signature_validation: Some(SignatureValidation {
                jwks: None,
                certificate: Some(CertificateConfig {
                    certificate_inline: None,
                    secret_ref: Some(SecretRef {
                        name: settings.internal_key_secret.clone(),
                        key: INTERNAL_KEY_SECRET_KEY.to_string(),
                    }),
                }),
            }),
            claim_mappings: Vec::new(),
            target_ref: TargetRef::gateway(&settings.gateway_name),
        },
    }
}

/// Issuers for the full control-plane key-manager list
///
/// Disabled key managers are left out, as are key managers whose
/// certificate cannot be used.
pub fn desired_issuers(key_managers: &[CpKeyManager], settings: &IssuerSettings) -> Vec<TokenIssuer> {
    let mut issuers = Vec::new();
    let mut organizations = BTreeSet::new();
    for km in key_managers.iter().filter(|km| km.enabled) {
        let resolved = ResolvedKeyManager::from(km);
        match token_issuer(&resolved, settings) {
            Ok(issuer) => {
                organizations.insert(resolved.tenant_domain.clone());
                issuers.push(issuer);
            }
            Err(e) => warn!(key_manager = %km.name, error = %e, "Skipping key manager"),
        }
    }
    issuers.extend(
        organizations
            .iter()
            .map(|org| internal_key_issuer(org, settings)),
    );
    issuers
}

/// Reconcile every TokenIssuer against the control plane's key managers
#[instrument(skip_all)]
pub async fn sync_all(
    control_plane: &ControlPlaneClient,
    cluster: &dyn ClusterClient,
    settings: &IssuerSettings,
) -> Result<ThreeWayReport> {
    let key_managers: Vec<CpKeyManager> = control_plane
        .fetch_json(Resource::KeyManagers)
        .await?
        .unwrap_or_default();
    info!(count = key_managers.len(), "Fetched key managers");

    let mut desired = Vec::new();
    for issuer in desired_issuers(&key_managers, settings) {
        desired.push(to_dynamic(&issuer)?.1);
    }
    three_way(cluster, &ApiResource::erase::<TokenIssuer>(&()), desired).await
}

/// Remove the issuers of one key manager, keeping internal-key issuers
pub async fn delete_issuers(cluster: &dyn ClusterClient, name: &str, tenant_domain: &str) -> Result<usize> {
    let resource = ApiResource::erase::<TokenIssuer>(&());
    let hashed_name = sha1_hex(name);
    let hashed_org = sha1_hex(tenant_domain);
    let label_selector = selector(&[(NAME_LABEL, &hashed_name), (ORGANIZATION_LABEL, &hashed_org)]);

    let mut deleted = 0;
    for issuer in list_all(cluster, &resource, &label_selector).await? {
        let issuer_name = issuer.name_any();
        if issuer_name.ends_with(INTERNAL_KEY_SUFFIX) {
            continue;
        }
        cluster.delete(&resource, &issuer_name).await?;
        deleted += 1;
    }
    if deleted == 0 {
        debug!(key_manager = name, "No token issuer to delete");
    }
    Ok(deleted)
}

/// Apply one key-manager notification
#[instrument(skip_all, fields(action = %event.action, key_manager = %event.name))]
pub async fn apply_event(
    cluster: &dyn ClusterClient,
    event: &KeyManagerEvent,
    settings: &IssuerSettings,
) -> Result<()> {
    let action = event.action.to_ascii_lowercase();
    match (action.as_str(), &event.key_manager) {
        ("delete", _) => {
            let deleted = delete_issuers(cluster, &event.name, &event.tenant_domain).await?;
            info!(deleted, "Removed token issuers");
        }
        ("add" | "update", Some(km)) => {
            let mut resolved = ResolvedKeyManager::from(km);
            if resolved.tenant_domain.is_empty() {
                resolved.tenant_domain = event.tenant_domain.clone();
            }
            if resolved.name.is_empty() {
                resolved.name = event.name.clone();
            }
            if !resolved.enabled {
                let deleted = delete_issuers(cluster, &resolved.name, &resolved.tenant_domain).await?;
                info!(deleted, "Key manager disabled, removed token issuers");
                return Ok(());
            }

            let resource = ApiResource::erase::<TokenIssuer>(&());
            for issuer in [
                token_issuer(&resolved, settings)?,
                internal_key_issuer(&resolved.tenant_domain, settings),
            ] {
                let (_, mut object) = to_dynamic(&issuer)?;
                mark_owned(&mut object);
                upsert(cluster, &resource, &object).await?;
            }
            info!(issuer = %resolved.uuid, "Applied token issuer");
        }
        ("add" | "update", None) => {
            warn!("Key-manager event without configuration");
        }
        _ => debug!("Ignoring key-manager action"),
    }
    Ok(())
}

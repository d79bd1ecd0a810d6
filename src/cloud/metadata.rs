//! Instance identity resolution through the instance metadata service (IMDSv2,
//! falling back to IMDSv1 when no session token can be obtained).

#![allow(missing_docs)]

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::config::CloudConfig;
use crate::core::errors::{Result, VagError};

const TOKEN_PATH: &str = "/latest/api/token";
const IDENTITY_PATH: &str = "/latest/dynamic/instance-identity/document";
const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";
const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";

/// Where API calls go and which instance they filter on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceIdentity {
    pub region: String,
    pub instance_id: String,
}

/// Source of the current instance identity.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self) -> Result<InstanceIdentity>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityDocument {
    region: String,
    instance_id: String,
}

/// Parse the JSON identity document served by the metadata service.
pub fn parse_identity_document(raw: &str) -> Result<InstanceIdentity> {
    let doc: IdentityDocument = serde_json::from_str(raw)?;
    if doc.region.is_empty() || doc.instance_id.is_empty() {
        return Err(VagError::Metadata {
            details: "identity document has an empty region or instanceId".to_string(),
        });
    }
    Ok(InstanceIdentity {
        region: doc.region,
        instance_id: doc.instance_id,
    })
}

/// Blocking metadata-service client.
#[derive(Debug)]
pub struct ImdsClient {
    endpoint: String,
    client: reqwest::blocking::Client,
}

impl ImdsClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn session_token(&self) -> Option<String> {
        let response = self
            .client
            .put(format!("{}{TOKEN_PATH}", self.endpoint))
            .header(TOKEN_TTL_HEADER, "300")
            .send()
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.text().ok().filter(|token| !token.is_empty())
    }

    fn identity_document(&self) -> Result<String> {
        let mut request = self.client.get(format!("{}{IDENTITY_PATH}", self.endpoint));
        match self.session_token() {
            Some(token) => request = request.header(TOKEN_HEADER, token),
            None => eprintln!("[VAG-IMDS] no session token, falling back to IMDSv1"),
        }
        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(VagError::Metadata {
                details: format!("identity document request returned {status}"),
            });
        }
        Ok(response.text()?)
    }
}

impl IdentityResolver for ImdsClient {
    fn resolve(&self) -> Result<InstanceIdentity> {
        parse_identity_document(&self.identity_document()?)
    }
}

/// Identity with configured overrides; the metadata service is only
/// contacted when at least one field is missing.
#[derive(Debug)]
pub struct ConfiguredIdentity<R> {
    region: Option<String>,
    instance_id: Option<String>,
    fallback: R,
}

impl<R: IdentityResolver> ConfiguredIdentity<R> {
    pub fn new(region: Option<String>, instance_id: Option<String>, fallback: R) -> Self {
        Self {
            region,
            instance_id,
            fallback,
        }
    }
}

impl ConfiguredIdentity<ImdsClient> {
    pub fn from_config(cfg: &CloudConfig) -> Result<Self> {
        let imds = ImdsClient::new(
            &cfg.metadata_endpoint,
            Duration::from_millis(cfg.metadata_timeout_ms),
        )?;
        Ok(Self::new(cfg.region.clone(), cfg.instance_id.clone(), imds))
    }
}

impl<R: IdentityResolver> IdentityResolver for ConfiguredIdentity<R> {
    fn resolve(&self) -> Result<InstanceIdentity> {
        if let (Some(region), Some(instance_id)) = (&self.region, &self.instance_id) {
            return Ok(InstanceIdentity {
                region: region.clone(),
                instance_id: instance_id.clone(),
            });
        }
        let discovered = self.fallback.resolve()?;
        Ok(InstanceIdentity {
            region: self.region.clone().unwrap_or(discovered.region),
            instance_id: self.instance_id.clone().unwrap_or(discovered.instance_id),
        })
    }
}

//! Client configuration loaded from JSON
//!
//! Every field is optional in the file; missing ones take the defaults of
//! [`ClientConfig::default`].

use std::fs;
use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::registration::{BindingMode, Endpoint, DEFAULT_LIFETIME};
use crate::security::{Security, SecurityMode};

/// Endpoint, server and credential settings for one client
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub endpoint_name: String,
    pub endpoint_type: Option<String>,
    pub domain: Option<String>,
    pub lifetime: u64,
    pub binding: BindingMode,
    /// Management or bootstrap server, depending on `bootstrap`
    pub server_uri: String,
    pub bootstrap: bool,
    pub security_mode: SecurityMode,
    /// Base64 key material
    pub public_key: Option<String>,
    pub server_public_key: Option<String>,
    pub secret_key: Option<String>,
    pub short_server_id: Option<u16>,
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint_name: String::new(),
            endpoint_type: None,
            domain: None,
            lifetime: DEFAULT_LIFETIME,
            binding: BindingMode::Udp,
            server_uri: String::new(),
            bootstrap: false,
            security_mode: SecurityMode::NoSec,
            public_key: None,
            server_public_key: None,
            secret_key: None,
            short_server_id: None,
            request_timeout_secs: 93,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: ClientConfig = serde_json::from_str(json)?;
        if config.endpoint_name.is_empty() {
            return Err(Error::Config("endpoint_name is required".into()));
        }
        Ok(config)
    }

    pub fn endpoint(&self) -> Result<Endpoint> {
        let mut endpoint = Endpoint::new(&self.endpoint_name)?
            .with_lifetime(self.lifetime)
            .with_binding(self.binding);
        if let Some(endpoint_type) = &self.endpoint_type {
            endpoint = endpoint.with_type(endpoint_type);
        }
        if let Some(domain) = &self.domain {
            endpoint = endpoint.with_domain(domain);
        }
        Ok(endpoint)
    }

    /// Server account described by the file, keys decoded
    pub fn security(&self) -> Result<Security> {
        let decode = |key: &Option<String>| -> Result<Vec<u8>> {
            match key {
                Some(encoded) => Ok(STANDARD.decode(encoded)?),
                None => Ok(Vec::new()),
            }
        };
        let security = Security {
            server_uri: self.server_uri.clone(),
            bootstrap_server: self.bootstrap,
            mode: self.security_mode,
            public_key: decode(&self.public_key)?,
            server_public_key: decode(&self.server_public_key)?,
            secret_key: decode(&self.secret_key)?,
            short_server_id: self.short_server_id,
        };
        security.validate()?;
        Ok(security)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

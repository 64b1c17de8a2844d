//! Endpoint description and registration bookkeeping

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::object::Object;

/// Shortest lifetime the client registers with, in seconds
pub const MINIMUM_LIFETIME: u64 = 60;

/// Longest lifetime the client registers with, in seconds
pub const MAXIMUM_LIFETIME: u64 = u32::MAX as u64;

/// Lifetime used when none is configured, in seconds
pub const DEFAULT_LIFETIME: u64 = 3600;

/// Lifetimes at or above this refresh a fixed margin early
const LONG_LIFETIME: u64 = 3600;
const LONG_LIFETIME_MARGIN: u64 = 900;

/// Interval after which a registration is refreshed
///
/// Long lifetimes are refreshed 15 minutes before expiry, short ones at
/// three quarters of the lifetime.
pub fn reduce_lifetime(lifetime: u64) -> Duration {
    if lifetime >= LONG_LIFETIME {
        Duration::from_secs(lifetime - LONG_LIFETIME_MARGIN)
    } else {
        Duration::from_millis(lifetime * 750)
    }
}

/// Transport binding announced to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum BindingMode {
    #[default]
    #[serde(rename = "U")]
    Udp,
    #[serde(rename = "UQ")]
    UdpQueue,
}

impl BindingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            BindingMode::Udp => "U",
            BindingMode::UdpQueue => "UQ",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "U" => Some(BindingMode::Udp),
            "UQ" => Some(BindingMode::UdpQueue),
            _ => None,
        }
    }
}

impl fmt::Display for BindingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registration state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistrationState {
    #[default]
    Idle,
    Bootstrapping,
    Registering,
    Registered,
    Updating,
    Unregistering,
}

impl RegistrationState {
    /// A registration exists on the server
    pub fn is_registered(self) -> bool {
        matches!(
            self,
            RegistrationState::Registered
                | RegistrationState::Updating
                | RegistrationState::Unregistering
        )
    }
}

/// Identity of this client as announced at registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    name: String,
    endpoint_type: Option<String>,
    domain: Option<String>,
    lifetime: u64,
    binding: BindingMode,
}

impl Endpoint {
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::Config("endpoint name must not be empty".into()));
        }
        Ok(Self {
            name: name.to_string(),
            endpoint_type: None,
            domain: None,
            lifetime: DEFAULT_LIFETIME,
            binding: BindingMode::default(),
        })
    }

    pub fn with_type(mut self, endpoint_type: &str) -> Self {
        self.endpoint_type = Some(endpoint_type.to_string()).filter(|t| !t.is_empty());
        self
    }

    pub fn with_domain(mut self, domain: &str) -> Self {
        self.domain = Some(domain.to_string()).filter(|d| !d.is_empty());
        self
    }

    pub fn with_lifetime(mut self, lifetime: u64) -> Self {
        self.set_lifetime(lifetime);
        self
    }

    pub fn with_binding(mut self, binding: BindingMode) -> Self {
        self.binding = binding;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint_type(&self) -> Option<&str> {
        self.endpoint_type.as_deref()
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn lifetime(&self) -> u64 {
        self.lifetime
    }

    pub fn binding(&self) -> BindingMode {
        self.binding
    }

    /// Set the lifetime, clamped to `MINIMUM_LIFETIME..=MAXIMUM_LIFETIME`
    pub fn set_lifetime(&mut self, lifetime: u64) {
        let clamped = lifetime.clamp(MINIMUM_LIFETIME, MAXIMUM_LIFETIME);
        if clamped != lifetime {
            log::warn!("Lifetime {}s out of range, using {}s", lifetime, clamped);
        }
        self.lifetime = clamped;
    }

    pub fn set_binding(&mut self, binding: BindingMode) {
        self.binding = binding;
    }

    /// Uri-Query options of a register request
    pub fn register_query(&self) -> Vec<String> {
        let mut query = vec![format!("ep={}", self.name)];
        if let Some(endpoint_type) = &self.endpoint_type {
            query.push(format!("et={}", endpoint_type));
        }
        query.push(format!("lt={}", self.lifetime));
        if let Some(domain) = &self.domain {
            query.push(format!("d={}", domain));
        }
        query.push(format!("b={}", self.binding));
        query
    }
}

/// CoRE link-format list of the registered objects
pub fn link_format_payload(objects: &[Object]) -> String {
    objects
        .iter()
        .flat_map(Object::link_entries)
        .collect::<Vec<_>>()
        .join(",")
}

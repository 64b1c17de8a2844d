//! Server credentials (Security object 0) and server parameters (object 1)

use serde::Deserialize;

use crate::base::Operation;
use crate::error::{Error, Result};
use crate::object::Object;
use crate::object_instance::ObjectInstance;
use crate::registration::BindingMode;
use crate::resource::ResourceType;

pub const SECURITY_OBJECT: &str = "0";
pub const SERVER_OBJECT: &str = "1";

/// Resource ids of the Security object
pub mod security_resource {
    pub const SERVER_URI: u16 = 0;
    pub const BOOTSTRAP_SERVER: u16 = 1;
    pub const SECURITY_MODE: u16 = 2;
    pub const PUBLIC_KEY: u16 = 3;
    pub const SERVER_PUBLIC_KEY: u16 = 4;
    pub const SECRET_KEY: u16 = 5;
    pub const SHORT_SERVER_ID: u16 = 10;
}

/// Resource ids of the Server object
pub mod server_resource {
    pub const SHORT_SERVER_ID: u16 = 0;
    pub const LIFETIME: u16 = 1;
    pub const BINDING: u16 = 7;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    Psk,
    Rpk,
    Certificate,
    #[default]
    NoSec,
}

impl SecurityMode {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(SecurityMode::Psk),
            1 => Some(SecurityMode::Rpk),
            2 => Some(SecurityMode::Certificate),
            3 => Some(SecurityMode::NoSec),
            _ => None,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            SecurityMode::Psk => 0,
            SecurityMode::Rpk => 1,
            SecurityMode::Certificate => 2,
            SecurityMode::NoSec => 3,
        }
    }
}

/// Credentials of one server account
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Security {
    pub server_uri: String,
    pub bootstrap_server: bool,
    pub mode: SecurityMode,
    pub public_key: Vec<u8>,
    pub server_public_key: Vec<u8>,
    pub secret_key: Vec<u8>,
    pub short_server_id: Option<u16>,
}

impl Security {
    pub fn new(server_uri: &str, mode: SecurityMode) -> Self {
        Self {
            server_uri: server_uri.to_string(),
            mode,
            ..Default::default()
        }
    }

    /// Check that the account can be used to reach a server
    pub fn validate(&self) -> Result<()> {
        if self.server_uri.is_empty() {
            return Err(Error::Security("server URI missing".into()));
        }
        if self.mode == SecurityMode::Certificate
            && (self.public_key.is_empty()
                || self.server_public_key.is_empty()
                || self.secret_key.is_empty())
        {
            return Err(Error::Security("certificate mode needs all keys".into()));
        }
        Ok(())
    }

    /// Read an account from a Security object instance
    pub fn from_object_instance(instance: &ObjectInstance) -> Self {
        let bytes = |id: u16| {
            instance
                .resource_by_id(id)
                .map(|resource| resource.value().to_vec())
                .unwrap_or_default()
        };
        let integer = |id: u16| instance.resource_by_id(id).and_then(|r| decode_integer(r.value()));

        Self {
            server_uri: String::from_utf8_lossy(&bytes(security_resource::SERVER_URI)).into_owned(),
            bootstrap_server: integer(security_resource::BOOTSTRAP_SERVER).is_some_and(|v| v != 0),
            mode: integer(security_resource::SECURITY_MODE)
                .and_then(SecurityMode::from_i64)
                .unwrap_or_default(),
            public_key: bytes(security_resource::PUBLIC_KEY),
            server_public_key: bytes(security_resource::SERVER_PUBLIC_KEY),
            secret_key: bytes(security_resource::SECRET_KEY),
            short_server_id: integer(security_resource::SHORT_SERVER_ID)
                .and_then(|v| u16::try_from(v).ok()),
        }
    }

    /// The first non-bootstrap account of a Security object
    pub fn from_object(object: &Object) -> Option<Self> {
        object
            .object_instances()
            .map(Security::from_object_instance)
            .find(|security| !security.bootstrap_server)
    }

    /// Build a Security object holding this account as instance 0
    pub fn to_object(&self) -> Result<Object> {
        let mut object = security_object()?;
        let instance = object
            .create_object_instance(0)
            .ok_or_else(|| Error::Security("cannot create security instance".into()))?;

        let bootstrap: &[u8] = if self.bootstrap_server { b"1" } else { b"0" };
        let mode = self.mode.as_i64().to_string();
        let short_id = self.short_server_id.map(|id| id.to_string());
        let mut entries: Vec<(u16, ResourceType, &[u8])> = vec![
            (security_resource::SERVER_URI, ResourceType::String, self.server_uri.as_bytes()),
            (security_resource::BOOTSTRAP_SERVER, ResourceType::Boolean, bootstrap),
            (security_resource::SECURITY_MODE, ResourceType::Integer, mode.as_bytes()),
            (security_resource::PUBLIC_KEY, ResourceType::Opaque, self.public_key.as_slice()),
            (security_resource::SERVER_PUBLIC_KEY, ResourceType::Opaque, self.server_public_key.as_slice()),
            (security_resource::SECRET_KEY, ResourceType::Opaque, self.secret_key.as_slice()),
        ];
        if let Some(short_id) = &short_id {
            entries.push((security_resource::SHORT_SERVER_ID, ResourceType::Integer, short_id.as_bytes()));
        }

        for (id, kind, value) in entries {
            let resource = instance
                .create_dynamic_resource(&id.to_string(), kind, false, false)
                .ok_or_else(|| Error::Security(format!("cannot create resource {}", id)))?;
            resource.base_mut().set_operation(Operation::GET_PUT);
            resource.set_value(value);
        }
        Ok(object)
    }
}

/// Values the server object carries for the registration
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerParams {
    pub short_server_id: Option<u16>,
    pub lifetime: Option<u64>,
    pub binding: Option<BindingMode>,
}

impl ServerParams {
    pub fn from_object_instance(instance: &ObjectInstance) -> Self {
        let integer = |id: u16| instance.resource_by_id(id).and_then(|r| decode_integer(r.value()));
        Self {
            short_server_id: integer(server_resource::SHORT_SERVER_ID)
                .and_then(|v| u16::try_from(v).ok()),
            lifetime: integer(server_resource::LIFETIME).and_then(|v| u64::try_from(v).ok()),
            binding: instance
                .resource_by_id(server_resource::BINDING)
                .and_then(|r| std::str::from_utf8(r.value()).ok())
                .and_then(BindingMode::parse),
        }
    }
}

/// Empty Security object accepting server writes
pub fn security_object() -> Result<Object> {
    let mut object = Object::new(SECURITY_OBJECT)?;
    object.base_mut().set_operation(Operation::ALL);
    object.base_mut().set_register_uri(false);
    Ok(object)
}

/// Empty Server object accepting server writes
pub fn server_object() -> Result<Object> {
    let mut object = Object::new(SERVER_OBJECT)?;
    object.base_mut().set_operation(Operation::ALL);
    Ok(object)
}

/// Integer value of a resource written either as decimal text or as a
/// big-endian binary integer of 1, 2, 4 or 8 bytes
pub fn decode_integer(bytes: &[u8]) -> Option<i64> {
    if !bytes.is_empty() && bytes.iter().all(|b| b.is_ascii_digit() || *b == b'-') {
        if let Some(value) = std::str::from_utf8(bytes).ok().and_then(|s| s.parse().ok()) {
            return Some(value);
        }
    }
    match bytes.len() {
        1 => Some(i64::from(bytes[0] as i8)),
        2 => Some(i64::from(i16::from_be_bytes([bytes[0], bytes[1]]))),
        4 => Some(i64::from(i32::from_be_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3],
        ]))),
        8 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            Some(i64::from_be_bytes(raw))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_integer() {
        assert_eq!(decode_integer(b"3600"), Some(3600));
        assert_eq!(decode_integer(b"1"), Some(1));
        assert_eq!(decode_integer(&[0x01]), Some(1));
        assert_eq!(decode_integer(&[0x0E, 0x10]), Some(3600));
        assert_eq!(decode_integer(&[0xFF]), Some(-1));
        assert_eq!(decode_integer(&[]), None);
        assert_eq!(decode_integer(&[1, 2, 3]), None);
    }

    #[test]
    fn test_validate() {
        assert!(Security::new("coap://lwm2m.example:5683", SecurityMode::NoSec)
            .validate()
            .is_ok());
        assert!(Security::new("", SecurityMode::NoSec).validate().is_err());

        let mut certificate = Security::new("coaps://lwm2m.example", SecurityMode::Certificate);
        certificate.public_key = vec![1];
        certificate.server_public_key = vec![2];
        assert!(certificate.validate().is_err());
        certificate.secret_key = vec![3];
        assert!(certificate.validate().is_ok());
    }

    #[test]
    fn test_object_round_trip() {
        let mut security = Security::new("coaps://lwm2m.example:5684", SecurityMode::Psk);
        security.public_key = b"identity".to_vec();
        security.secret_key = vec![0x00, 0x11, 0x22];
        security.short_server_id = Some(101);

        let object = security.to_object().unwrap();
        assert_eq!(object.name(), SECURITY_OBJECT);
        assert!(!object.base().register_uri());
        assert_eq!(Security::from_object(&object), Some(security));
    }

    #[test]
    fn test_bootstrap_account_skipped() {
        let mut bootstrap = Security::new("coap://bs.example", SecurityMode::NoSec);
        bootstrap.bootstrap_server = true;
        let object = bootstrap.to_object().unwrap();
        assert_eq!(Security::from_object(&object), None);
    }

    #[test]
    fn test_server_params() {
        let mut object = server_object().unwrap();
        let instance = object.create_object_instance(0).unwrap();
        for (id, value) in [(0u16, &b"101"[..]), (1, &[0x0E, 0x10][..]), (7, &b"UQ"[..])] {
            instance
                .create_dynamic_resource(&id.to_string(), ResourceType::Integer, false, false)
                .unwrap()
                .set_value(value);
        }
        let params = ServerParams::from_object_instance(object.object_instance(0).unwrap());
        assert_eq!(params.short_server_id, Some(101));
        assert_eq!(params.lifetime, Some(3600));
        assert_eq!(params.binding, Some(BindingMode::UdpQueue));
    }
}

//! Client-side state of a bootstrap session
//!
//! Between the bootstrap request and the server's "bootstrap finished"
//! POST, writes to the Security (0) and Server (1) objects land in objects
//! built for the session. Nothing reaches the client's active account until
//! [`BootstrapSession::finish`] validates the result.

use std::time::Instant;

use coap_lite::ResponseType;

use crate::base::Operation;
use crate::coap::{Lwm2mRequest, Lwm2mResponse, Method};
use crate::error::{Error, Result, TlvError};
use crate::object::Object;
use crate::security::{security_object, server_object, Security, ServerParams, SECURITY_OBJECT, SERVER_OBJECT};
use crate::tlv::{self, TlvType, WriteMode};

/// Path of the bootstrap request and of the finish notification
pub const BOOTSTRAP_PATH: &str = "bs";

#[derive(Debug, Default)]
pub struct BootstrapSession {
    security: Option<Object>,
    server: Option<Object>,
}

impl BootstrapSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// True for the server's "bootstrap finished" request
    pub fn is_finish_request(request: &Lwm2mRequest) -> bool {
        request.method == Method::Post && request.path == [BOOTSTRAP_PATH]
    }

    /// Apply a bootstrap write or delete
    ///
    /// Returns None for requests outside the Security and Server objects,
    /// which the caller routes to the regular tree.
    pub fn handle_request(&mut self, request: &Lwm2mRequest, now: Instant) -> Option<Lwm2mResponse> {
        match request.method {
            Method::Put => self.handle_write(request, now),
            Method::Delete => self.handle_delete(request),
            _ => None,
        }
    }

    fn handle_write(&mut self, request: &Lwm2mRequest, now: Instant) -> Option<Lwm2mResponse> {
        let (object_name, rest) = request.path.split_first()?;
        let slot = match object_name.as_str() {
            SECURITY_OBJECT => &mut self.security,
            SERVER_OBJECT => &mut self.server,
            _ => return None,
        };

        let instance_id = match rest {
            [] => None,
            [id] => match id.parse::<u16>() {
                Ok(id) => Some(id),
                Err(_) => return Some(Lwm2mResponse::new(ResponseType::NotFound)),
            },
            _ => return Some(Lwm2mResponse::new(ResponseType::MethodNotAllowed)),
        };

        if slot.is_none() {
            let built = if object_name == SECURITY_OBJECT {
                security_object()
            } else {
                server_object()
            };
            match built {
                Ok(object) => *slot = Some(object),
                Err(e) => {
                    log::error!("Cannot build bootstrap object /{}: {}", object_name, e);
                    return Some(Lwm2mResponse::new(ResponseType::InternalServerError));
                }
            }
        }
        let object = slot.as_mut()?;

        match write_object(object, instance_id, &request.payload, now) {
            Ok(()) => {
                log::debug!("Bootstrap write to /{}", request.path_string());
                Some(Lwm2mResponse::changed())
            }
            Err(e) => {
                log::warn!("Bootstrap write to /{} failed: {}", request.path_string(), e);
                Some(Lwm2mResponse::new(e.response_code()))
            }
        }
    }

    fn handle_delete(&mut self, request: &Lwm2mRequest) -> Option<Lwm2mResponse> {
        match request.path.as_slice() {
            [] => {
                self.security = None;
                self.server = None;
            }
            [object] if object == SECURITY_OBJECT => self.security = None,
            [object] if object == SERVER_OBJECT => self.server = None,
            [object, id] if object == SECURITY_OBJECT || object == SERVER_OBJECT => {
                let slot = if object == SECURITY_OBJECT {
                    &mut self.security
                } else {
                    &mut self.server
                };
                if let (Some(target), Ok(id)) = (slot.as_mut(), id.parse::<u16>()) {
                    target.remove_object_instance(id);
                }
            }
            _ => return None,
        }
        log::debug!("Bootstrap delete of /{}", request.path_string());
        Some(Lwm2mResponse::new(ResponseType::Deleted))
    }

    pub fn security_object(&self) -> Option<&Object> {
        self.security.as_ref()
    }

    /// Validate what the server wrote and hand out the resulting account
    ///
    /// On failure the half-built Security object is dropped.
    pub fn finish(&mut self) -> Result<(Security, Option<ServerParams>)> {
        let security = self
            .security
            .as_ref()
            .and_then(Security::from_object)
            .ok_or_else(|| Error::Security("no server account written".into()));
        let security = match security.and_then(|security| security.validate().map(|()| security)) {
            Ok(security) => security,
            Err(e) => {
                self.security = None;
                return Err(e);
            }
        };

        let params = self.server.as_ref().and_then(|server| {
            server
                .object_instances()
                .map(ServerParams::from_object_instance)
                .find(|params| {
                    security.short_server_id.is_none()
                        || params.short_server_id == security.short_server_id
                })
        });
        Ok((security, params))
    }
}

/// Write a bootstrap payload into an object, creating instances as needed
///
/// On error every instance created by this call is removed again.
fn write_object(
    object: &mut Object,
    instance_id: Option<u16>,
    payload: &[u8],
    now: Instant,
) -> std::result::Result<(), TlvError> {
    let mut targets: Vec<(u16, &[u8])> = Vec::new();
    if tlv::is_object_instance(payload) {
        for record in tlv::read_records(payload)? {
            if record.kind != TlvType::ObjectInstance {
                return Err(TlvError::NotValid);
            }
            if instance_id.is_some_and(|id| id != record.id) {
                return Err(TlvError::NotFound);
            }
            targets.push((record.id, record.value));
        }
    } else {
        targets.push((instance_id.unwrap_or(0), payload));
    }

    let mut created = Vec::new();
    let mut result = Ok(());
    for (id, resources) in targets {
        if object.object_instance(id).is_none() {
            if let Some(instance) = object.create_object_instance(id) {
                instance.base_mut().set_operation(Operation::ALL);
                created.push(id);
            }
        }
        let Some(instance) = object.object_instance_mut(id) else {
            result = Err(TlvError::NotValid);
            break;
        };
        if let Err(e) = tlv::deserialize_resources(resources, instance, WriteMode::Post, now) {
            result = Err(e);
            break;
        }
    }

    if result.is_err() {
        for id in created {
            object.remove_object_instance(id);
        }
    }
    result
}

//! Path resolution and per-kind request dispatch

use std::time::Instant;

use coap_lite::ResponseType;

use crate::base::{Base, BaseType, Mode, Operation};
use crate::coap::{content_format, Lwm2mRequest, Lwm2mResponse, Method};
use crate::object::Object;
use crate::object_instance::ObjectInstance;
use crate::resource::Resource;
use crate::tlv::{self, TlvType, WriteMode};

/// Mutable handle on one node of the tree
#[derive(Debug)]
pub enum NodeMut<'a> {
    Object(&'a mut Object),
    ObjectInstance(&'a mut ObjectInstance),
    Resource(&'a mut Resource),
    /// Resource instances are reached through their parent so value
    /// writes feed the parent's scheduler
    ResourceInstance(&'a mut Resource, u16),
}

/// Find the node addressed by an exact path
pub fn resolve<'a>(objects: &'a mut [Object], path: &[String]) -> Option<NodeMut<'a>> {
    let (object_name, rest) = path.split_first()?;
    let object = objects.iter_mut().find(|o| o.name() == object_name.as_str())?;
    let Some((instance_id, rest)) = rest.split_first() else {
        return Some(NodeMut::Object(object));
    };

    let instance = object.object_instance_mut(instance_id.parse().ok()?)?;
    let Some((resource_name, rest)) = rest.split_first() else {
        return Some(NodeMut::ObjectInstance(instance));
    };

    let resource = instance.resource_mut(resource_name)?;
    match rest {
        [] => Some(NodeMut::Resource(resource)),
        [id] => {
            let id: u16 = id.parse().ok()?;
            resource.resource_instance(id)?;
            Some(NodeMut::ResourceInstance(resource, id))
        }
        _ => None,
    }
}

impl NodeMut<'_> {
    pub fn base(&self) -> Option<&Base> {
        match self {
            NodeMut::Object(object) => Some(object.base()),
            NodeMut::ObjectInstance(instance) => Some(instance.base()),
            NodeMut::Resource(resource) => Some(resource.base()),
            NodeMut::ResourceInstance(resource, id) => {
                resource.resource_instance(*id).map(|instance| instance.base())
            }
        }
    }

    pub fn base_type(&self) -> BaseType {
        match self {
            NodeMut::Object(_) => BaseType::Object,
            NodeMut::ObjectInstance(_) => BaseType::ObjectInstance,
            NodeMut::Resource(_) => BaseType::Resource,
            NodeMut::ResourceInstance(..) => BaseType::ResourceInstance,
        }
    }

    /// Drop the node's observation, if any
    pub fn cancel_observation(self, now: Instant) {
        match self {
            NodeMut::Object(object) => object.stop_observation(now),
            NodeMut::ObjectInstance(instance) => instance.stop_observation(now),
            NodeMut::Resource(resource) => resource.stop_observation(now),
            NodeMut::ResourceInstance(..) => {}
        }
    }

    /// Run GET, PUT or POST against the node
    ///
    /// The flag is true when the request changed stored values. DELETE is
    /// answered by the caller, which owns the parent container.
    pub fn handle_request(self, request: &Lwm2mRequest, now: Instant) -> (Lwm2mResponse, bool) {
        match (self, request.method) {
            (NodeMut::Object(object), Method::Get) => object.handle_get_request(request, now),
            (NodeMut::Object(object), Method::Put) => object.handle_put_request(request, now),
            (NodeMut::Object(object), Method::Post) => object.handle_post_request(request, now),

            (NodeMut::ObjectInstance(instance), Method::Get) => {
                instance.handle_get_request(request, now)
            }
            (NodeMut::ObjectInstance(instance), Method::Put) => {
                instance.handle_put_request(request, now)
            }
            (NodeMut::ObjectInstance(instance), Method::Post) => {
                instance.handle_post_request(request, now)
            }

            (NodeMut::Resource(resource), Method::Get) => resource.handle_get_request(request, now),
            (NodeMut::Resource(resource), Method::Put) => resource.handle_put_request(request, now),
            (NodeMut::Resource(resource), Method::Post) => resource.handle_post_request(request),

            (NodeMut::ResourceInstance(resource, id), Method::Get) => {
                match resource.resource_instance_mut(id) {
                    Some(instance) => instance.handle_get_request(request),
                    None => (Lwm2mResponse::new(ResponseType::NotFound), false),
                }
            }
            (NodeMut::ResourceInstance(resource, id), Method::Put) => {
                put_resource_instance(resource, id, request, now)
            }

            _ => (Lwm2mResponse::new(ResponseType::MethodNotAllowed), false),
        }
    }
}

fn put_resource_instance(
    resource: &mut Resource,
    id: u16,
    request: &Lwm2mRequest,
    now: Instant,
) -> (Lwm2mResponse, bool) {
    // Write attributes on an instance path belong to the parent's scheduler
    if request.attribute_query().is_some() {
        return resource.handle_put_request(request, now);
    }
    if !resource.base().operation().contains(Operation::PUT) || resource.base().mode() == Mode::Static
    {
        return (Lwm2mResponse::new(ResponseType::MethodNotAllowed), false);
    }
    if request.content_format == Some(content_format::OMA_TLV) {
        return put_resource_instance_tlv(resource, id, request, now);
    }
    let native = resource.resource_type().content_format();
    let plain = request.content_format.map_or(true, |format| {
        format == native
            || format == content_format::TEXT_PLAIN
            || format == content_format::OCTET_STREAM
    });
    if !plain {
        return (
            Lwm2mResponse::new(ResponseType::UnsupportedContentFormat),
            false,
        );
    }
    resource.write_instance_value(id, &request.payload, now);
    (Lwm2mResponse::changed(), true)
}

/// TLV write to one instance: a single Resource Instance record with its id
fn put_resource_instance_tlv(
    resource: &mut Resource,
    id: u16,
    request: &Lwm2mRequest,
    now: Instant,
) -> (Lwm2mResponse, bool) {
    let addressed = match tlv::read_records(&request.payload) {
        Ok(records) => matches!(
            records.as_slice(),
            [record] if record.kind == TlvType::ResourceInstance && record.id == id
        ),
        Err(e) => return (Lwm2mResponse::new(e.response_code()), false),
    };
    if !addressed {
        return (Lwm2mResponse::new(ResponseType::BadRequest), false);
    }
    match tlv::deserialize_resource_instances(&request.payload, resource, WriteMode::Put, now) {
        Ok(()) => (Lwm2mResponse::changed(), true),
        Err(e) => {
            log::debug!("TLV write to /{}/{} failed: {}", resource.base().uri_path(), id, e);
            (Lwm2mResponse::new(e.response_code()), false)
        }
    }
}

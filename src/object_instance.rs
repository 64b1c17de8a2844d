//! Object instances: ordered collections of resources

use std::time::Instant;

use coap_lite::ResponseType;

use crate::base::{Base, BaseType, Mode, ObservationLevel, Operation};
use crate::coap::{
    content_format, Lwm2mRequest, Lwm2mResponse, Notification, OBSERVE_DEREGISTER,
    OBSERVE_REGISTER,
};
use crate::report_handler::AttributeOutcome;
use crate::resource::{Resource, ResourceInstance, ResourceType};
use crate::tlv::{self, WriteMode};

#[derive(Debug)]
pub struct ObjectInstance {
    base: Base,
    object_name: String,
    instance_id: u16,
    resources: Vec<Resource>,
}

impl ObjectInstance {
    pub(crate) fn new(object_name: &str, instance_id: u16, observable: bool) -> Self {
        let name = instance_id.to_string();
        let base = Base::new(
            &name,
            format!("{}/{}", object_name, name),
            BaseType::ObjectInstance,
            Mode::Dynamic,
            observable,
        );
        Self {
            base,
            object_name: object_name.to_string(),
            instance_id,
            resources: Vec::new(),
        }
    }

    pub fn base(&self) -> &Base {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }

    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    pub fn instance_id(&self) -> u16 {
        self.instance_id
    }

    fn insert_resource(&mut self, mut resource: Resource) -> Option<&mut Resource> {
        if self.resource(resource.name()).is_some() {
            log::warn!(
                "Resource {} already exists in /{}",
                resource.name(),
                self.base.uri_path()
            );
            return None;
        }
        let inherited = self.base.observation_level();
        for level in [ObservationLevel::OI, ObservationLevel::O] {
            if inherited.contains(level) {
                resource.add_observation_level(level);
            }
        }
        self.resources.push(resource);
        self.resources.last_mut()
    }

    /// Create a resource whose value may change at runtime
    pub fn create_dynamic_resource(
        &mut self,
        name: &str,
        kind: ResourceType,
        observable: bool,
        multiple: bool,
    ) -> Option<&mut Resource> {
        let resource = Resource::new(
            &self.object_name,
            self.instance_id,
            self.base.uri_path(),
            name,
            kind,
            Mode::Dynamic,
            observable,
            multiple,
        )?;
        self.insert_resource(resource)
    }

    /// Create a read-only resource with its final value
    pub fn create_static_resource(
        &mut self,
        name: &str,
        kind: ResourceType,
        value: &[u8],
        multiple: bool,
    ) -> Option<&mut Resource> {
        let mut resource = Resource::new(
            &self.object_name,
            self.instance_id,
            self.base.uri_path(),
            name,
            kind,
            Mode::Static,
            false,
            multiple,
        )?;
        if !multiple {
            resource.write_value(value, Instant::now());
            resource.take_changed();
        }
        self.insert_resource(resource)
    }

    /// Resource created on behalf of the server by a TLV write
    pub(crate) fn create_server_resource(&mut self, id: u16, multiple: bool) -> Option<&mut Resource> {
        let resource = self.create_dynamic_resource(&id.to_string(), ResourceType::Integer, true, multiple)?;
        resource.base_mut().set_operation(Operation::ALL);
        Some(resource)
    }

    /// Create an instance of a multiple resource
    pub fn create_resource_instance(
        &mut self,
        resource_name: &str,
        kind: ResourceType,
        instance_id: u16,
    ) -> Option<&mut ResourceInstance> {
        self.resource_mut(resource_name)?
            .create_resource_instance(kind, instance_id)
    }

    pub fn remove_resource(&mut self, name: &str) -> bool {
        let before = self.resources.len();
        self.resources.retain(|resource| resource.name() != name);
        before != self.resources.len()
    }

    pub fn remove_resource_instance(&mut self, resource_name: &str, instance_id: u16) -> bool {
        self.resource_mut(resource_name)
            .is_some_and(|resource| resource.remove_resource_instance(instance_id))
    }

    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.iter().find(|resource| resource.name() == name)
    }

    pub fn resource_mut(&mut self, name: &str) -> Option<&mut Resource> {
        self.resources.iter_mut().find(|resource| resource.name() == name)
    }

    pub fn resource_by_id(&self, id: u16) -> Option<&Resource> {
        self.resources
            .iter()
            .find(|resource| resource.base().name_id() == i32::from(id))
    }

    pub fn resource_by_id_mut(&mut self, id: u16) -> Option<&mut Resource> {
        self.resources
            .iter_mut()
            .find(|resource| resource.base().name_id() == i32::from(id))
    }

    /// Resources in creation order
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    pub fn resources_mut(&mut self) -> impl Iterator<Item = &mut Resource> {
        self.resources.iter_mut()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub(crate) fn add_observation_level(&mut self, level: ObservationLevel) {
        self.base.add_observation_level(level);
        for resource in &mut self.resources {
            resource.add_observation_level(level);
        }
    }

    pub(crate) fn remove_observation_level(&mut self, level: ObservationLevel) {
        self.base.remove_observation_level(level);
        for resource in &mut self.resources {
            resource.remove_observation_level(level);
        }
    }

    pub(crate) fn stop_observation(&mut self, now: Instant) {
        self.base.stop_observation(now);
        self.remove_observation_level(ObservationLevel::OI);
    }

    pub(crate) fn poll_notification(&mut self, now: Instant) -> Option<Notification> {
        self.base.poll_report(now)?;
        match tlv::serialize_resources(self) {
            Ok(payload) => Notification::new(&mut self.base, payload, content_format::OMA_TLV),
            Err(e) => {
                log::warn!("Cannot serialize /{}: {}", self.base.uri_path(), e);
                None
            }
        }
    }

    pub(crate) fn handle_get_request(
        &mut self,
        request: &Lwm2mRequest,
        now: Instant,
    ) -> (Lwm2mResponse, bool) {
        if !self.base.operation().contains(Operation::GET) {
            return (Lwm2mResponse::new(ResponseType::MethodNotAllowed), false);
        }
        if request
            .requested_format()
            .is_some_and(|format| format != content_format::OMA_TLV)
        {
            return (
                Lwm2mResponse::new(ResponseType::UnsupportedContentFormat),
                false,
            );
        }

        let payload = match tlv::serialize_resources(self) {
            Ok(payload) => payload,
            Err(e) => {
                log::warn!("Cannot serialize /{}: {}", self.base.uri_path(), e);
                return (Lwm2mResponse::new(ResponseType::InternalServerError), false);
            }
        };
        let mut response = Lwm2mResponse::content(payload, content_format::OMA_TLV);

        match request.observe {
            Some(OBSERVE_REGISTER) => {
                if self.base.start_observation(&request.token, None, now) {
                    self.add_observation_level(ObservationLevel::OI);
                    response.observe = Some(self.base.next_observation_number());
                }
            }
            Some(OBSERVE_DEREGISTER) => self.stop_observation(now),
            _ => {}
        }

        (response.with_max_age(self.base.max_age()), false)
    }

    pub(crate) fn handle_put_request(
        &mut self,
        request: &Lwm2mRequest,
        now: Instant,
    ) -> (Lwm2mResponse, bool) {
        if let Some(query) = request.attribute_query() {
            return match self.base.set_notification_attribute(query, false, now) {
                AttributeOutcome::Updated => (Lwm2mResponse::changed(), false),
                AttributeOutcome::Cancel => {
                    self.remove_observation_level(ObservationLevel::OI);
                    (Lwm2mResponse::changed(), false)
                }
                AttributeOutcome::Rejected => (Lwm2mResponse::new(ResponseType::BadRequest), false),
            };
        }

        if !self.base.operation().contains(Operation::PUT) {
            return (Lwm2mResponse::new(ResponseType::MethodNotAllowed), false);
        }
        if request
            .content_format
            .is_some_and(|format| format != content_format::OMA_TLV)
        {
            return (
                Lwm2mResponse::new(ResponseType::UnsupportedContentFormat),
                false,
            );
        }

        match tlv::deserialize_resources(&request.payload, self, WriteMode::Put, now) {
            Ok(()) => (Lwm2mResponse::changed(), true),
            Err(e) => {
                log::debug!("TLV write to /{} failed: {}", self.base.uri_path(), e);
                (Lwm2mResponse::new(e.response_code()), false)
            }
        }
    }

    pub(crate) fn handle_post_request(
        &mut self,
        request: &Lwm2mRequest,
        now: Instant,
    ) -> (Lwm2mResponse, bool) {
        if !self.base.operation().contains(Operation::POST) {
            return (Lwm2mResponse::new(ResponseType::MethodNotAllowed), false);
        }
        if request
            .content_format
            .is_some_and(|format| format != content_format::OMA_TLV)
        {
            return (
                Lwm2mResponse::new(ResponseType::UnsupportedContentFormat),
                false,
            );
        }

        match tlv::deserialize_resources(&request.payload, self, WriteMode::Post, now) {
            Ok(()) => (Lwm2mResponse::created(self.base.uri_path()), true),
            Err(e) => {
                log::debug!("TLV create in /{} failed: {}", self.base.uri_path(), e);
                (Lwm2mResponse::new(e.response_code()), false)
            }
        }
    }
}

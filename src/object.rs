//! Objects: the roots of the resource tree

use std::collections::BTreeMap;
use std::time::Instant;

use coap_lite::ResponseType;

use crate::base::{is_valid_name, Base, BaseType, Mode, ObservationLevel, Operation};
use crate::coap::{
    content_format, Lwm2mRequest, Lwm2mResponse, Notification, OBSERVE_DEREGISTER,
    OBSERVE_REGISTER,
};
use crate::error::{Error, Result};
use crate::object_instance::ObjectInstance;
use crate::report_handler::AttributeOutcome;
use crate::tlv::{self, WriteMode};

#[derive(Debug)]
pub struct Object {
    base: Base,
    instances: BTreeMap<u16, ObjectInstance>,
}

impl Object {
    /// Create an empty object; the name is also its URI path
    pub fn new(name: &str) -> Result<Self> {
        if !is_valid_name(name) {
            return Err(Error::InvalidName(name.to_string()));
        }
        Ok(Self {
            base: Base::new(name, name.to_string(), BaseType::Object, Mode::Dynamic, false),
            instances: BTreeMap::new(),
        })
    }

    pub fn base(&self) -> &Base {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }

    pub fn name(&self) -> &str {
        self.base.name()
    }

    /// Create an instance with an explicit id; fails when the id is taken
    pub fn create_object_instance(&mut self, instance_id: u16) -> Option<&mut ObjectInstance> {
        if self.instances.contains_key(&instance_id) {
            log::warn!("Instance {} already exists in /{}", instance_id, self.name());
            return None;
        }
        let mut instance =
            ObjectInstance::new(self.base.name(), instance_id, self.base.is_observable());
        if self.base.observation_level().contains(ObservationLevel::O) {
            instance.add_observation_level(ObservationLevel::O);
        }
        Some(self.instances.entry(instance_id).or_insert(instance))
    }

    /// Create an instance with the lowest unused id
    pub fn create_next_object_instance(&mut self) -> Option<&mut ObjectInstance> {
        let id = self.next_free_instance_id()?;
        self.create_object_instance(id)
    }

    fn next_free_instance_id(&self) -> Option<u16> {
        (0..=u16::MAX).find(|id| !self.instances.contains_key(id))
    }

    pub fn remove_object_instance(&mut self, instance_id: u16) -> bool {
        self.instances.remove(&instance_id).is_some()
    }

    pub fn object_instance(&self, instance_id: u16) -> Option<&ObjectInstance> {
        self.instances.get(&instance_id)
    }

    pub fn object_instance_mut(&mut self, instance_id: u16) -> Option<&mut ObjectInstance> {
        self.instances.get_mut(&instance_id)
    }

    /// Instances ordered by id
    pub fn object_instances(&self) -> impl Iterator<Item = &ObjectInstance> {
        self.instances.values()
    }

    pub fn object_instances_mut(&mut self) -> impl Iterator<Item = &mut ObjectInstance> {
        self.instances.values_mut()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Link-format entries for the registration payload
    pub(crate) fn link_entries(&self) -> Vec<String> {
        if !self.base.register_uri() {
            return Vec::new();
        }
        let registered: Vec<String> = self
            .instances
            .values()
            .filter(|instance| instance.base().register_uri())
            .map(|instance| format!("</{}>", instance.base().uri_path()))
            .collect();
        if registered.is_empty() {
            vec![format!("</{}>", self.base.uri_path())]
        } else {
            registered
        }
    }

    fn add_observation_level(&mut self, level: ObservationLevel) {
        self.base.add_observation_level(level);
        for instance in self.instances.values_mut() {
            instance.add_observation_level(level);
        }
    }

    fn remove_observation_level(&mut self, level: ObservationLevel) {
        self.base.remove_observation_level(level);
        for instance in self.instances.values_mut() {
            instance.remove_observation_level(level);
        }
    }

    pub(crate) fn stop_observation(&mut self, now: Instant) {
        self.base.stop_observation(now);
        self.remove_observation_level(ObservationLevel::O);
    }

    pub(crate) fn poll_notification(&mut self, now: Instant) -> Option<Notification> {
        self.base.poll_report(now)?;
        match tlv::serialize_object_instances(self) {
            Ok(payload) => Notification::new(&mut self.base, payload, content_format::OMA_TLV),
            Err(e) => {
                log::warn!("Cannot serialize /{}: {}", self.name(), e);
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

        let payload = match tlv::serialize_object_instances(self) {
            Ok(payload) => payload,
            Err(e) => {
                log::warn!("Cannot serialize /{}: {}", self.name(), e);
                return (Lwm2mResponse::new(ResponseType::InternalServerError), false);
            }
        };
        let mut response = Lwm2mResponse::content(payload, content_format::OMA_TLV);

        match request.observe {
            Some(OBSERVE_REGISTER) => {
                if self.base.start_observation(&request.token, None, now) {
                    self.add_observation_level(ObservationLevel::O);
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
                    self.remove_observation_level(ObservationLevel::O);
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

        match tlv::deserialize_object_instances(&request.payload, self, WriteMode::Put, now) {
            Ok(()) => (Lwm2mResponse::changed(), true),
            Err(e) => (Lwm2mResponse::new(e.response_code()), false),
        }
    }

    /// Create an instance from a TLV payload
    ///
    /// The payload is either one Object Instance record (its id names the new
    /// instance) or a bare list of resources written into the next free id.
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

        let (instance_id, resources) = if tlv::is_object_instance(&request.payload) {
            let record = match tlv::read_records(&request.payload) {
                Ok(records) if records.len() == 1 => records[0],
                _ => return (Lwm2mResponse::new(ResponseType::BadRequest), false),
            };
            if self.instances.contains_key(&record.id) {
                log::debug!("POST to /{}: instance {} exists", self.name(), record.id);
                return (Lwm2mResponse::new(ResponseType::BadRequest), false);
            }
            (record.id, record.value)
        } else {
            match self.next_free_instance_id() {
                Some(id) => (id, request.payload.as_slice()),
                None => return (Lwm2mResponse::new(ResponseType::InternalServerError), false),
            }
        };

        let Some(instance) = self.create_object_instance(instance_id) else {
            return (Lwm2mResponse::new(ResponseType::BadRequest), false);
        };
        instance.base_mut().set_operation(Operation::ALL);
        if let Err(e) = tlv::deserialize_resources(resources, instance, WriteMode::Post, now) {
            log::debug!("POST to /{} rejected: {}", self.name(), e);
            self.remove_object_instance(instance_id);
            return (Lwm2mResponse::new(e.response_code()), false);
        }

        let location = format!("{}/{}", self.name(), instance_id);
        log::info!("Created object instance /{}", location);
        (Lwm2mResponse::created(&location), true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coap::Method;
    use crate::resource::ResourceType;
    use crate::tlv::{encode_record, TlvType};

    fn object() -> Object {
        let mut object = Object::new("1000").unwrap();
        object.base_mut().set_operation(Operation::ALL);
        object.base_mut().set_observable(true);
        let instance = object.create_object_instance(0).unwrap();
        let value = instance
            .create_dynamic_resource("1", ResourceType::Integer, true, false)
            .unwrap();
        value.set_value(b"7");
        object
    }

    #[test]
    fn test_object_name_rules() {
        assert!(Object::new("").is_err());
        assert!(Object::new("a/b").is_err());
        assert_eq!(Object::new("3").unwrap().base().name_id(), 3);
        assert_eq!(Object::new("Custom").unwrap().base().name_id(), -1);
    }

    #[test]
    fn test_instance_ids() {
        let mut object = object();
        assert!(object.create_object_instance(0).is_none());
        assert_eq!(object.create_next_object_instance().unwrap().instance_id(), 1);
        object.create_object_instance(3);
        assert_eq!(object.create_next_object_instance().unwrap().instance_id(), 2);
        assert!(object.remove_object_instance(1));
        assert!(!object.remove_object_instance(1));
        assert_eq!(object.instance_count(), 3);
    }

    #[test]
    fn test_get_object() {
        let mut object = object();
        let request = Lwm2mRequest::new(Method::Get, "1000").with_observe(0, &[9]);
        let (response, _) = object.handle_get_request(&request, Instant::now());
        assert_eq!(response.code, ResponseType::Content);
        assert_eq!(response.payload, vec![0x03, 0x00, 0xC1, 0x01, b'7']);
        assert_eq!(response.observe, Some(1));

        let resource = object.object_instance(0).unwrap().resource("1").unwrap();
        assert!(resource.base().observation_level().contains(ObservationLevel::O));
        let late = object.create_object_instance(5).unwrap();
        assert!(late.base().observation_level().contains(ObservationLevel::O));
    }

    #[test]
    fn test_post_with_instance_record() {
        let mut object = object();
        let mut resources = Vec::new();
        encode_record(TlvType::Resource, 1, b"12", &mut resources).unwrap();
        let mut payload = Vec::new();
        encode_record(TlvType::ObjectInstance, 4, &resources, &mut payload).unwrap();

        let request = Lwm2mRequest::new(Method::Post, "1000")
            .with_payload(&payload, Some(content_format::OMA_TLV));
        let (response, updated) = object.handle_post_request(&request, Instant::now());
        assert_eq!(response.code, ResponseType::Created);
        assert_eq!(response.location_path, vec!["1000".to_string(), "4".to_string()]);
        assert!(updated);
        let created = object.object_instance(4).unwrap();
        assert_eq!(created.resource("1").unwrap().value(), b"12");

        let (response, _) = object.handle_post_request(&request, Instant::now());
        assert_eq!(response.code, ResponseType::BadRequest);
    }

    #[test]
    fn test_post_bare_resources_uses_next_id() {
        let mut object = object();
        let mut payload = Vec::new();
        encode_record(TlvType::Resource, 2, b"x", &mut payload).unwrap();
        let request = Lwm2mRequest::new(Method::Post, "1000").with_payload(&payload, None);
        let (response, _) = object.handle_post_request(&request, Instant::now());
        assert_eq!(response.location_path, vec!["1000".to_string(), "1".to_string()]);
        assert!(object.object_instance(1).is_some());
    }

    #[test]
    fn test_post_malformed_leaves_no_instance() {
        let mut object = object();
        let request = Lwm2mRequest::new(Method::Post, "1000").with_payload(&[0xC4, 0x02], None);
        let (response, _) = object.handle_post_request(&request, Instant::now());
        assert_eq!(response.code, ResponseType::BadRequest);
        assert_eq!(object.instance_count(), 1);
    }

    #[test]
    fn test_link_entries() {
        let mut object = object();
        assert_eq!(object.link_entries(), vec!["</1000/0>".to_string()]);
        object.remove_object_instance(0);
        assert_eq!(object.link_entries(), vec!["</1000>".to_string()]);
        object.base_mut().set_register_uri(false);
        assert!(object.link_entries().is_empty());
    }
}

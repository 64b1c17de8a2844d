//! Resources and resource instances: the leaf value holders of the tree

use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

use coap_lite::ResponseType;

use crate::base::{is_valid_name, Base, BaseType, Mode, ObservationLevel, Operation};
use crate::coap::{
    content_format, Lwm2mRequest, Lwm2mResponse, Notification, OBSERVE_DEREGISTER,
    OBSERVE_REGISTER,
};
use crate::report_handler::AttributeOutcome;
use crate::tlv::{self, WriteMode};

/// Declared type of a resource value
///
/// Values are always stored as bytes; numbers use their decimal ASCII form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResourceType {
    #[default]
    String,
    Integer,
    Float,
    Boolean,
    Opaque,
    Time,
    ObjLink,
}

impl ResourceType {
    /// Types that accept gt/lt/st attributes
    pub fn is_numeric(self) -> bool {
        matches!(self, ResourceType::Integer | ResourceType::Float)
    }

    /// Content-Format of a plain (non-TLV) representation
    pub fn content_format(self) -> u16 {
        match self {
            ResourceType::Opaque => content_format::OCTET_STREAM,
            _ => content_format::TEXT_PLAIN,
        }
    }
}

/// Typed value buffer
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourceValue {
    kind: ResourceType,
    data: Vec<u8>,
}

impl ResourceValue {
    pub fn new(kind: ResourceType, data: &[u8]) -> Self {
        Self {
            kind,
            data: data.to_vec(),
        }
    }

    pub fn kind(&self) -> ResourceType {
        self.kind
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Numeric interpretation of the ASCII value, for numeric types only
    pub fn as_f64(&self) -> Option<f64> {
        if !self.kind.is_numeric() {
            return None;
        }
        std::str::from_utf8(&self.data).ok()?.trim().parse().ok()
    }

    pub fn as_i64(&self) -> Option<i64> {
        std::str::from_utf8(&self.data).ok()?.trim().parse().ok()
    }

    /// Replace the buffer, returning true when the bytes changed
    fn replace(&mut self, data: &[u8]) -> bool {
        if self.data == data {
            return false;
        }
        self.data = data.to_vec();
        true
    }
}

/// Arguments handed to an execute callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteParams {
    pub object_name: String,
    pub object_instance_id: u16,
    pub resource_name: String,
    pub payload: Vec<u8>,
}

/// Callback invoked by POST (Execute) on a resource
pub type ExecuteCallback = Box<dyn FnMut(&ExecuteParams) + Send>;

/// One instance of a multiple-instance resource
#[derive(Debug, Clone)]
pub struct ResourceInstance {
    base: Base,
    value: ResourceValue,
    instance_id: u16,
    object_name: String,
    object_instance_id: u16,
    resource_name: String,
}

impl ResourceInstance {
    fn new(resource: &Resource, kind: ResourceType, instance_id: u16) -> Self {
        let name = instance_id.to_string();
        let uri_path = format!("{}/{}", resource.base.uri_path(), name);
        let mut base = Base::new(
            &name,
            uri_path,
            BaseType::ResourceInstance,
            resource.base.mode(),
            false,
        );
        base.set_operation(resource.base.operation());
        Self {
            base,
            value: ResourceValue::new(kind, &[]),
            instance_id,
            object_name: resource.object_name.clone(),
            object_instance_id: resource.object_instance_id,
            resource_name: resource.base.name().to_string(),
        }
    }

    pub fn base(&self) -> &Base {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }

    pub fn instance_id(&self) -> u16 {
        self.instance_id
    }

    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    pub fn object_instance_id(&self) -> u16 {
        self.object_instance_id
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn resource_type(&self) -> ResourceType {
        self.value.kind()
    }

    pub fn value(&self) -> &[u8] {
        self.value.as_bytes()
    }

    pub fn value_int(&self) -> Option<i64> {
        self.value.as_i64()
    }

    fn write(&mut self, data: &[u8]) -> bool {
        self.value.replace(data)
    }

    pub(crate) fn handle_get_request(&mut self, request: &Lwm2mRequest) -> (Lwm2mResponse, bool) {
        if !self.base.operation().contains(Operation::GET) {
            return (Lwm2mResponse::new(ResponseType::MethodNotAllowed), false);
        }
        let native = self
            .base
            .content_type()
            .unwrap_or_else(|| self.value.kind().content_format());
        match request.requested_format() {
            None => {}
            Some(format) if format == native => {}
            Some(_) => {
                return (
                    Lwm2mResponse::new(ResponseType::UnsupportedContentFormat),
                    false,
                )
            }
        }
        let response = Lwm2mResponse::content(self.value().to_vec(), native)
            .with_max_age(self.base.max_age());
        (response, false)
    }
}

/// A resource: single-valued leaf, or container of resource instances
pub struct Resource {
    base: Base,
    value: ResourceValue,
    multiple: bool,
    instances: BTreeMap<u16, ResourceInstance>,
    object_name: String,
    object_instance_id: u16,
    execute: Option<ExecuteCallback>,
    delayed_response: bool,
    delayed_token: Option<Vec<u8>>,
    changed: bool,
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("base", &self.base)
            .field("value", &self.value)
            .field("multiple", &self.multiple)
            .field("instances", &self.instances)
            .field("delayed_response", &self.delayed_response)
            .finish_non_exhaustive()
    }
}

impl Resource {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        object_name: &str,
        object_instance_id: u16,
        instance_path: &str,
        name: &str,
        kind: ResourceType,
        mode: Mode,
        observable: bool,
        multiple: bool,
    ) -> Option<Self> {
        if !is_valid_name(name) {
            log::warn!("Invalid resource name {:?}", name);
            return None;
        }
        let base = Base::new(
            name,
            format!("{}/{}", instance_path, name),
            BaseType::Resource,
            mode,
            observable,
        );
        Some(Self {
            base,
            value: ResourceValue::new(kind, &[]),
            multiple,
            instances: BTreeMap::new(),
            object_name: object_name.to_string(),
            object_instance_id,
            execute: None,
            delayed_response: false,
            delayed_token: None,
            changed: false,
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

    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    pub fn object_instance_id(&self) -> u16 {
        self.object_instance_id
    }

    pub fn resource_type(&self) -> ResourceType {
        self.value.kind()
    }

    pub fn supports_multiple_instances(&self) -> bool {
        self.multiple
    }

    pub fn value(&self) -> &[u8] {
        self.value.as_bytes()
    }

    pub fn value_string(&self) -> String {
        String::from_utf8_lossy(self.value.as_bytes()).into_owned()
    }

    pub fn value_int(&self) -> Option<i64> {
        self.value.as_i64()
    }

    pub fn value_float(&self) -> Option<f64> {
        self.value.as_f64()
    }

    /// Set the value of a dynamic single-instance resource
    ///
    /// Returns false for static or multiple-instance resources. Writing the
    /// current value again succeeds without triggering a report.
    pub fn set_value(&mut self, value: &[u8]) -> bool {
        self.set_value_at(value, Instant::now())
    }

    pub fn set_value_at(&mut self, value: &[u8], now: Instant) -> bool {
        if self.base.mode() == Mode::Static {
            log::warn!("Refusing to change static resource /{}", self.base.uri_path());
            return false;
        }
        if self.multiple {
            return false;
        }
        self.write_value(value, now);
        true
    }

    pub fn set_value_int(&mut self, value: i64) -> bool {
        self.set_value(value.to_string().as_bytes())
    }

    pub fn set_value_float(&mut self, value: f64) -> bool {
        self.set_value(value.to_string().as_bytes())
    }

    pub(crate) fn write_value(&mut self, value: &[u8], now: Instant) {
        if self.value.replace(value) {
            self.changed = true;
            match self.value.as_f64() {
                Some(number) => self.base.report_value(number, now),
                None => self.base.report_trigger(None, now),
            }
        }
    }

    /// Set the value of one instance of a multiple-instance resource
    pub fn set_instance_value(&mut self, instance_id: u16, value: &[u8]) -> bool {
        self.set_instance_value_at(instance_id, value, Instant::now())
    }

    pub fn set_instance_value_at(&mut self, instance_id: u16, value: &[u8], now: Instant) -> bool {
        if self.base.mode() == Mode::Static || !self.instances.contains_key(&instance_id) {
            return false;
        }
        self.write_instance_value(instance_id, value, now);
        true
    }

    pub(crate) fn write_instance_value(&mut self, instance_id: u16, value: &[u8], now: Instant) {
        let changed = self
            .instances
            .get_mut(&instance_id)
            .is_some_and(|instance| instance.write(value));
        if changed {
            self.changed = true;
            self.base.report_trigger(Some(instance_id), now);
        }
    }

    /// Create an instance; only resources created as multiple accept them
    pub fn create_resource_instance(
        &mut self,
        kind: ResourceType,
        instance_id: u16,
    ) -> Option<&mut ResourceInstance> {
        if !self.multiple || self.instances.contains_key(&instance_id) {
            return None;
        }
        let instance = ResourceInstance::new(self, kind, instance_id);
        self.changed = true;
        Some(self.instances.entry(instance_id).or_insert(instance))
    }

    pub fn remove_resource_instance(&mut self, instance_id: u16) -> bool {
        let removed = self.instances.remove(&instance_id).is_some();
        if removed {
            self.changed = true;
        }
        removed
    }

    pub fn resource_instance(&self, instance_id: u16) -> Option<&ResourceInstance> {
        self.instances.get(&instance_id)
    }

    pub fn resource_instance_mut(&mut self, instance_id: u16) -> Option<&mut ResourceInstance> {
        self.instances.get_mut(&instance_id)
    }

    pub fn resource_instances(&self) -> impl Iterator<Item = &ResourceInstance> {
        self.instances.values()
    }

    pub fn resource_instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Attach the callback run on Execute
    pub fn set_execute_function<F>(&mut self, callback: F)
    where
        F: FnMut(&ExecuteParams) + Send + 'static,
    {
        self.execute = Some(Box::new(callback));
    }

    /// Answer Execute with an empty ACK and a separate response later
    pub fn set_delayed_response(&mut self, delayed: bool) {
        self.delayed_response = delayed;
    }

    pub fn delayed_response(&self) -> bool {
        self.delayed_response
    }

    pub fn delayed_token(&self) -> Option<&[u8]> {
        self.delayed_token.as_deref()
    }

    pub(crate) fn take_delayed_token(&mut self) -> Option<Vec<u8>> {
        self.delayed_token.take()
    }

    /// Consume the "changed since last poll" flag
    pub(crate) fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    pub(crate) fn add_observation_level(&mut self, level: ObservationLevel) {
        self.base.add_observation_level(level);
    }

    pub(crate) fn remove_observation_level(&mut self, level: ObservationLevel) {
        self.base.remove_observation_level(level);
    }

    pub(crate) fn stop_observation(&mut self, now: Instant) {
        self.base.stop_observation(now);
        self.remove_observation_level(ObservationLevel::R);
    }

    /// Drain a due report into a notification carrying the current value
    pub(crate) fn poll_notification(&mut self, now: Instant) -> Option<Notification> {
        self.base.poll_report(now)?;
        let (payload, format) = if self.multiple {
            match tlv::serialize_resource(self) {
                Ok(payload) => (payload, content_format::OMA_TLV),
                Err(e) => {
                    log::warn!("Cannot serialize /{}: {}", self.base.uri_path(), e);
                    return None;
                }
            }
        } else {
            (self.value().to_vec(), self.native_content_format())
        };
        Notification::new(&mut self.base, payload, format)
    }

    fn native_content_format(&self) -> u16 {
        if self.multiple {
            return content_format::OMA_TLV;
        }
        self.base
            .content_type()
            .unwrap_or_else(|| self.value.kind().content_format())
    }

    pub(crate) fn handle_get_request(
        &mut self,
        request: &Lwm2mRequest,
        now: Instant,
    ) -> (Lwm2mResponse, bool) {
        if !self.base.operation().contains(Operation::GET) {
            return (Lwm2mResponse::new(ResponseType::MethodNotAllowed), false);
        }

        let native = self.native_content_format();
        let format = request.requested_format().unwrap_or(native);
        let mut response = if format == content_format::OMA_TLV {
            match tlv::serialize_resource(self) {
                Ok(payload) => Lwm2mResponse::content(payload, content_format::OMA_TLV),
                Err(e) => {
                    log::warn!("Cannot serialize /{}: {}", self.base.uri_path(), e);
                    return (Lwm2mResponse::new(ResponseType::InternalServerError), false);
                }
            }
        } else if format == native {
            Lwm2mResponse::content(self.value().to_vec(), native)
        } else {
            return (
                Lwm2mResponse::new(ResponseType::UnsupportedContentFormat),
                false,
            );
        };

        match request.observe {
            Some(OBSERVE_REGISTER) => {
                let current = self.value.as_f64();
                if self.base.start_observation(&request.token, current, now) {
                    self.add_observation_level(ObservationLevel::R);
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
            let numeric = self.value.kind().is_numeric();
            return match self.base.set_notification_attribute(query, numeric, now) {
                AttributeOutcome::Updated => (Lwm2mResponse::changed(), false),
                AttributeOutcome::Cancel => {
                    self.remove_observation_level(ObservationLevel::R);
                    (Lwm2mResponse::changed(), false)
                }
                AttributeOutcome::Rejected => (Lwm2mResponse::new(ResponseType::BadRequest), false),
            };
        }

        if !self.base.operation().contains(Operation::PUT) || self.base.mode() == Mode::Static {
            return (Lwm2mResponse::new(ResponseType::MethodNotAllowed), false);
        }

        let native = self.native_content_format();
        let format = request.content_format.unwrap_or(native);
        if format == content_format::OMA_TLV {
            return match tlv::deserialize_resource(&request.payload, self, WriteMode::Put, now) {
                Ok(()) => (Lwm2mResponse::changed(), true),
                Err(e) => {
                    log::debug!("TLV write to /{} failed: {}", self.base.uri_path(), e);
                    (Lwm2mResponse::new(e.response_code()), false)
                }
            };
        }

        let plain = format == native
            || format == content_format::TEXT_PLAIN
            || format == content_format::OCTET_STREAM;
        if !plain || self.multiple {
            return (
                Lwm2mResponse::new(ResponseType::UnsupportedContentFormat),
                false,
            );
        }

        self.write_value(&request.payload, now);
        (Lwm2mResponse::changed(), true)
    }

    pub(crate) fn handle_post_request(&mut self, request: &Lwm2mRequest) -> (Lwm2mResponse, bool) {
        if !self.base.operation().contains(Operation::POST) {
            return (Lwm2mResponse::new(ResponseType::MethodNotAllowed), false);
        }

        let params = ExecuteParams {
            object_name: self.object_name.clone(),
            object_instance_id: self.object_instance_id,
            resource_name: self.base.name().to_string(),
            payload: request.payload.clone(),
        };
        match self.execute.as_mut() {
            Some(callback) => callback(&params),
            None => log::debug!("No execute callback on /{}", self.base.uri_path()),
        }

        if self.delayed_response {
            self.delayed_token = Some(request.token.clone());
            return (Lwm2mResponse::delayed(), false);
        }
        (Lwm2mResponse::changed(), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coap::Method;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn resource(kind: ResourceType, multiple: bool) -> Resource {
        let mut resource =
            Resource::new("3", 0, "3/0", "1", kind, Mode::Dynamic, true, multiple).unwrap();
        resource
            .base_mut()
            .set_operation(Operation::GET | Operation::PUT | Operation::POST);
        resource
    }

    #[test]
    fn test_value_helpers() {
        let mut r = resource(ResourceType::Integer, false);
        assert!(r.set_value_int(42));
        assert_eq!(r.value(), b"42");
        assert_eq!(r.value_int(), Some(42));
        assert_eq!(r.value_float(), Some(42.0));
        assert_eq!(r.value_string(), "42");
    }

    #[test]
    fn test_static_resource_is_immutable() {
        let mut r =
            Resource::new("3", 0, "3/0", "0", ResourceType::String, Mode::Static, false, false)
                .unwrap();
        r.write_value(b"vendor", Instant::now());
        assert!(!r.set_value(b"other"));
        assert_eq!(r.value(), b"vendor");
    }

    #[test]
    fn test_multiple_resource_instances() {
        let mut r = resource(ResourceType::Integer, true);
        assert!(r.create_resource_instance(ResourceType::Integer, 0).is_some());
        assert!(r.create_resource_instance(ResourceType::Integer, 0).is_none());
        assert!(r.set_instance_value(0, b"5"));
        assert!(!r.set_instance_value(9, b"5"));
        assert!(!r.set_value(b"1"));
        assert_eq!(r.resource_instance(0).unwrap().value(), b"5");
        assert_eq!(r.resource_instance(0).unwrap().base().uri_path(), "3/0/1/0");

        let mut single = resource(ResourceType::Integer, false);
        assert!(single.create_resource_instance(ResourceType::Integer, 0).is_none());
    }

    #[test]
    fn test_get_plain_value() {
        let mut r = resource(ResourceType::String, false);
        r.set_value(b"hello");
        let request = Lwm2mRequest::new(Method::Get, "3/0/1");
        let (response, updated) = r.handle_get_request(&request, Instant::now());
        assert_eq!(response.code, ResponseType::Content);
        assert_eq!(response.payload, b"hello".to_vec());
        assert_eq!(response.content_format, Some(content_format::TEXT_PLAIN));
        assert_eq!(response.max_age, Some(60));
        assert!(!updated);
    }

    #[test]
    fn test_get_opaque_and_unsupported_format() {
        let mut r = resource(ResourceType::Opaque, false);
        r.set_value(&[0xDE, 0xAD]);
        let request = Lwm2mRequest::new(Method::Get, "3/0/1");
        let (response, _) = r.handle_get_request(&request, Instant::now());
        assert_eq!(response.content_format, Some(content_format::OCTET_STREAM));

        let request =
            Lwm2mRequest::new(Method::Get, "3/0/1").with_accept(content_format::OMA_JSON);
        let (response, _) = r.handle_get_request(&request, Instant::now());
        assert_eq!(response.code, ResponseType::UnsupportedContentFormat);
    }

    #[test]
    fn test_get_with_observe_registers_token() {
        let mut r = resource(ResourceType::Integer, false);
        r.set_value(b"3");
        let request = Lwm2mRequest::new(Method::Get, "3/0/1").with_observe(0, &[7, 7]);
        let (response, _) = r.handle_get_request(&request, Instant::now());
        assert_eq!(response.observe, Some(1));
        assert!(r.base().is_under_observation());
        assert!(r.base().observation_level().contains(ObservationLevel::R));

        let request = Lwm2mRequest::new(Method::Get, "3/0/1").with_observe(1, &[7, 7]);
        let (response, _) = r.handle_get_request(&request, Instant::now());
        assert_eq!(response.observe, None);
        assert!(!r.base().is_under_observation());
    }

    #[test]
    fn test_put_value_and_permissions() {
        let mut r = resource(ResourceType::String, false);
        let request = Lwm2mRequest::new(Method::Put, "3/0/1")
            .with_payload(b"abc", Some(content_format::TEXT_PLAIN));
        let (response, updated) = r.handle_put_request(&request, Instant::now());
        assert_eq!(response.code, ResponseType::Changed);
        assert!(updated);
        assert_eq!(r.value(), b"abc");

        r.base_mut().set_operation(Operation::GET);
        let (response, updated) = r.handle_put_request(&request, Instant::now());
        assert_eq!(response.code, ResponseType::MethodNotAllowed);
        assert!(!updated);

        let request = Lwm2mRequest::new(Method::Put, "3/0/1")
            .with_payload(b"{}", Some(content_format::OMA_JSON));
        r.base_mut().set_operation(Operation::ALL);
        let (response, _) = r.handle_put_request(&request, Instant::now());
        assert_eq!(response.code, ResponseType::UnsupportedContentFormat);
    }

    #[test]
    fn test_put_attributes_numeric_only() {
        let mut text = resource(ResourceType::String, false);
        let request = Lwm2mRequest::new(Method::Put, "3/0/1").with_query("gt=5");
        let (response, _) = text.handle_put_request(&request, Instant::now());
        assert_eq!(response.code, ResponseType::BadRequest);

        let mut number = resource(ResourceType::Float, false);
        let (response, _) = number.handle_put_request(&request, Instant::now());
        assert_eq!(response.code, ResponseType::Changed);
        assert_eq!(number.base().report_handler().unwrap().gt(), Some(5.0));
        // attributes never touch the value
        assert!(number.value().is_empty());
    }

    #[test]
    fn test_execute_callback() {
        let mut r = resource(ResourceType::String, false);
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(None));
        {
            let calls = calls.clone();
            let seen = seen.clone();
            r.set_execute_function(move |params| {
                calls.fetch_add(1, Ordering::SeqCst);
                *seen.lock().unwrap() = Some(params.clone());
            });
        }

        let request =
            Lwm2mRequest::new(Method::Post, "3/0/1").with_payload(b"reboot", None);
        let (response, _) = r.handle_post_request(&request);
        assert_eq!(response.code, ResponseType::Changed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let params = seen.lock().unwrap().clone().unwrap();
        assert_eq!(params.object_name, "3");
        assert_eq!(params.object_instance_id, 0);
        assert_eq!(params.resource_name, "1");
        assert_eq!(params.payload, b"reboot".to_vec());
    }

    #[test]
    fn test_execute_delayed_response() {
        let mut r = resource(ResourceType::String, false);
        r.set_delayed_response(true);
        let mut request = Lwm2mRequest::new(Method::Post, "3/0/1");
        request.token = vec![0x55];
        let (response, _) = r.handle_post_request(&request);
        assert!(response.delayed);
        assert_eq!(r.delayed_token(), Some(&[0x55][..]));
        assert_eq!(r.take_delayed_token(), Some(vec![0x55]));
        assert_eq!(r.delayed_token(), None);
    }
}

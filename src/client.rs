//! LWM2M client engine
//!
//! Drives the registration interface against one management server and
//! serves the device management interface from the object tree. The engine
//! never blocks and owns no clock: inbound datagrams go through
//! [`Lwm2mClient::handle_packet`] and timers advance through
//! [`Lwm2mClient::process`], both with the caller's notion of "now".

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use coap_lite::{CoapOption, MessageClass, MessageType, Packet, RequestType, ResponseType};

use crate::base::{BaseType, ObservationLevel, Operation};
#[cfg(feature = "bootstrap")]
use crate::bootstrap::{BootstrapSession, BOOTSTRAP_PATH};
use crate::coap::{self, content_format, Lwm2mRequest, Lwm2mResponse, Method, Notification};
use crate::error::{Error, RegistrationError, Result};
use crate::node::{self, NodeMut};
use crate::object::Object;
use crate::observer::{Observer, Transport};
use crate::registration::{
    link_format_payload, reduce_lifetime, Endpoint, RegistrationState, MAXIMUM_LIFETIME,
};
use crate::security::Security;
use crate::timer::Timer;

/// How long a registration request may stay unanswered
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(93);

/// Request timeouts are capped like lifetimes
const MAXIMUM_REQUEST_TIMEOUT: Duration = Duration::from_secs(MAXIMUM_LIFETIME);

/// Period of the timer that checks pending requests
const PUMP_INTERVAL: Duration = Duration::from_secs(1);

const REGISTRATION_PATH: &str = "rd";

/// Recent notifications kept so a Reset can be matched to its observation
const MAX_TRACKED_NOTIFICATIONS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Register,
    Update,
    Unregister,
    #[cfg(feature = "bootstrap")]
    Bootstrap,
}

impl RequestKind {
    fn label(self) -> &'static str {
        match self {
            RequestKind::Register => "register",
            RequestKind::Update => "update",
            RequestKind::Unregister => "unregister",
            #[cfg(feature = "bootstrap")]
            RequestKind::Bootstrap => "bootstrap",
        }
    }
}

#[derive(Debug)]
struct PendingRequest {
    kind: RequestKind,
    token: Vec<u8>,
    deadline: Instant,
    /// The request carried the object list
    sent_objects: bool,
}

/// LWM2M client bound to one server through `T`, reporting to `O`
pub struct Lwm2mClient<T: Transport, O: Observer> {
    endpoint: Endpoint,
    security: Option<Security>,
    objects: Vec<Object>,
    transport: T,
    observer: O,
    state: RegistrationState,
    location: Option<String>,
    /// Lifetime the server last accepted
    registered_lifetime: u64,
    objects_changed: bool,
    message_id: u16,
    token_counter: u32,
    pending: HashMap<u16, PendingRequest>,
    notifications: VecDeque<(u16, String)>,
    pump_timer: Timer,
    refresh_timer: Timer,
    request_timeout: Duration,
    #[cfg(feature = "bootstrap")]
    bootstrap: Option<BootstrapSession>,
}

impl<T: Transport, O: Observer> Lwm2mClient<T, O> {
    pub fn new(endpoint: Endpoint, security: Option<Security>, transport: T, observer: O) -> Self {
        Self {
            registered_lifetime: endpoint.lifetime(),
            endpoint,
            security,
            objects: Vec::new(),
            transport,
            observer,
            state: RegistrationState::Idle,
            location: None,
            objects_changed: false,
            message_id: 0,
            token_counter: 0,
            pending: HashMap::new(),
            notifications: VecDeque::new(),
            pump_timer: Timer::new(),
            refresh_timer: Timer::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            #[cfg(feature = "bootstrap")]
            bootstrap: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout.min(MAXIMUM_REQUEST_TIMEOUT);
        self
    }

    // =========================================================================
    // Object tree
    // =========================================================================

    /// Add an object to the tree; names must be unique
    pub fn add_object(&mut self, object: Object) -> Result<()> {
        if self.object(object.name()).is_some() {
            return Err(Error::InvalidName(format!("{} (already added)", object.name())));
        }
        log::debug!("Adding object /{}", object.name());
        self.objects.push(object);
        self.objects_changed = true;
        Ok(())
    }

    pub fn object(&self, name: &str) -> Option<&Object> {
        self.objects.iter().find(|object| object.name() == name)
    }

    pub fn object_mut(&mut self, name: &str) -> Option<&mut Object> {
        self.objects.iter_mut().find(|object| object.name() == name)
    }

    pub fn objects(&self) -> &[Object] {
        &self.objects
    }

    /// Remove an object and everything the engine tracks for it
    pub fn remove_object(&mut self, name: &str) -> Option<Object> {
        let index = self.objects.iter().position(|object| object.name() == name)?;
        let object = self.objects.remove(index);
        self.forget_notifications(name);
        self.objects_changed = true;
        Some(object)
    }

    pub fn remove_object_instance(&mut self, name: &str, instance_id: u16) -> bool {
        let removed = self
            .object_mut(name)
            .is_some_and(|object| object.remove_object_instance(instance_id));
        if removed {
            self.forget_notifications(&format!("{}/{}", name, instance_id));
            self.objects_changed = true;
        }
        removed
    }

    fn forget_notifications(&mut self, prefix: &str) {
        let nested = format!("{}/", prefix);
        self.notifications
            .retain(|(_, path)| path != prefix && !path.starts_with(&nested));
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn registration_state(&self) -> RegistrationState {
        self.state
    }

    /// Location the server assigned at registration
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn security(&self) -> Option<&Security> {
        self.security.as_ref()
    }

    pub fn set_security(&mut self, security: Security) {
        self.security = Some(security);
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    /// Time until the next registration refresh, if one is scheduled
    pub fn refresh_timer_remaining(&self, now: Instant) -> Option<Duration> {
        self.refresh_timer.remaining(now)
    }

    // =========================================================================
    // Registration interface
    // =========================================================================

    fn next_message_id(&mut self) -> u16 {
        self.message_id = self.message_id.wrapping_add(1);
        self.message_id
    }

    fn next_token(&mut self) -> Vec<u8> {
        self.token_counter = self.token_counter.wrapping_add(1);
        self.token_counter.to_be_bytes().to_vec()
    }

    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        let bytes = packet.to_bytes().map_err(|e| Error::Coap(e.to_string()))?;
        self.transport.send(&bytes)?;
        Ok(())
    }

    fn is_in_flight(&self, kind: RequestKind) -> bool {
        self.pending.values().any(|pending| pending.kind == kind)
    }

    fn send_request(
        &mut self,
        kind: RequestKind,
        request_type: RequestType,
        path: &str,
        query: &[String],
        payload: Option<Vec<u8>>,
        now: Instant,
    ) -> Result<()> {
        let message_id = self.next_message_id();
        let token = self.next_token();
        let mut packet = coap::request_packet(
            request_type,
            MessageType::Confirmable,
            message_id,
            &token,
            path,
            query,
        );
        let sent_objects = payload.is_some();
        if let Some(payload) = payload {
            packet.add_option(
                CoapOption::ContentFormat,
                coap::encode_uint(u32::from(content_format::LINK_FORMAT)),
            );
            packet.payload = payload;
        }

        self.send_packet(&packet)?;
        self.pending.insert(
            message_id,
            PendingRequest {
                kind,
                token,
                deadline: now
                    .checked_add(self.request_timeout)
                    .unwrap_or(now + DEFAULT_REQUEST_TIMEOUT),
                sent_objects,
            },
        );
        self.pump_timer.start(now, PUMP_INTERVAL);
        Ok(())
    }

    /// Register with the server
    pub fn send_register_message(&mut self, now: Instant) -> Result<()> {
        if self.is_in_flight(RequestKind::Register) {
            return Err(Error::RequestInFlight(RequestKind::Register.label()));
        }
        if self.security.is_none() {
            return Err(Error::MissingSecurity);
        }

        let query = self.endpoint.register_query();
        let payload = link_format_payload(&self.objects).into_bytes();
        log::info!(
            "Registering endpoint {} (lifetime {}s)",
            self.endpoint.name(),
            self.endpoint.lifetime()
        );
        self.send_request(
            RequestKind::Register,
            RequestType::Post,
            REGISTRATION_PATH,
            &query,
            Some(payload),
            now,
        )?;
        self.objects_changed = false;
        self.state = RegistrationState::Registering;
        Ok(())
    }

    /// Refresh the registration; `lifetime` 0 keeps the current lifetime
    ///
    /// Does nothing while an update is already in flight.
    pub fn send_update_registration(&mut self, lifetime: u64, now: Instant) -> Result<()> {
        if self.is_in_flight(RequestKind::Update) {
            log::debug!("Update already in flight");
            return Ok(());
        }
        let Some(location) = self.location.clone() else {
            return Err(Error::NotRegistered);
        };

        if lifetime != 0 {
            self.endpoint.set_lifetime(lifetime);
        }
        let mut query = Vec::new();
        if self.endpoint.lifetime() != self.registered_lifetime {
            query.push(format!("lt={}", self.endpoint.lifetime()));
        }
        let payload = self
            .objects_changed
            .then(|| link_format_payload(&self.objects).into_bytes());
        let sent_objects = payload.is_some();

        log::debug!("Updating registration at /{}", location);
        self.send_request(
            RequestKind::Update,
            RequestType::Post,
            &location,
            &query,
            payload,
            now,
        )?;
        if sent_objects {
            self.objects_changed = false;
        }
        self.state = RegistrationState::Updating;
        Ok(())
    }

    /// Remove the registration from the server
    pub fn send_unregister_message(&mut self, now: Instant) -> Result<()> {
        if self.is_in_flight(RequestKind::Unregister) {
            return Err(Error::RequestInFlight(RequestKind::Unregister.label()));
        }
        let Some(location) = self.location.clone() else {
            return Err(Error::NotRegistered);
        };

        log::info!("Unregistering from /{}", location);
        self.refresh_timer.stop();
        self.send_request(
            RequestKind::Unregister,
            RequestType::Delete,
            &location,
            &[],
            None,
            now,
        )?;
        self.state = RegistrationState::Unregistering;
        Ok(())
    }

    /// Ask the bootstrap server for credentials
    #[cfg(feature = "bootstrap")]
    pub fn bootstrap(&mut self, now: Instant) -> Result<()> {
        if self.is_in_flight(RequestKind::Bootstrap) {
            return Err(Error::RequestInFlight(RequestKind::Bootstrap.label()));
        }
        let query = vec![format!("ep={}", self.endpoint.name())];
        log::info!("Requesting bootstrap for {}", self.endpoint.name());
        self.send_request(
            RequestKind::Bootstrap,
            RequestType::Post,
            BOOTSTRAP_PATH,
            &query,
            None,
            now,
        )?;
        self.bootstrap = Some(BootstrapSession::new());
        self.state = RegistrationState::Bootstrapping;
        Ok(())
    }

    // =========================================================================
    // Inbound messages
    // =========================================================================

    /// Feed one datagram received from the server
    pub fn handle_packet(&mut self, data: &[u8], now: Instant) -> Result<()> {
        let packet = Packet::from_bytes(data).map_err(|e| Error::Coap(e.to_string()))?;
        if packet.header.get_type() == MessageType::Reset {
            self.handle_reset(packet.header.message_id, now);
            return Ok(());
        }
        match packet.header.code {
            MessageClass::Response(code) => self.handle_response(&packet, code, now),
            MessageClass::Request(_) => self.handle_request(&packet, now),
            _ => Ok(()),
        }
    }

    fn handle_response(&mut self, packet: &Packet, code: ResponseType, now: Instant) -> Result<()> {
        let message_id = packet.header.message_id;
        if packet.header.get_type() == MessageType::Confirmable {
            self.send_packet(&coap::empty_ack(message_id))?;
        }

        let key = if self.pending.contains_key(&message_id) {
            Some(message_id)
        } else {
            let token = packet.get_token();
            self.pending
                .iter()
                .find(|(_, pending)| pending.token.as_slice() == token)
                .map(|(id, _)| *id)
        };
        let Some(pending) = key.and_then(|id| self.pending.remove(&id)) else {
            log::debug!("Response {} matches no pending request", message_id);
            return Ok(());
        };

        log::debug!("{} response: {:?}", pending.kind.label(), code);
        match pending.kind {
            RequestKind::Register => self.on_register_response(packet, code, now),
            RequestKind::Update => self.on_update_response(code, pending.sent_objects, now),
            RequestKind::Unregister => self.on_unregister_response(code, now),
            #[cfg(feature = "bootstrap")]
            RequestKind::Bootstrap => self.on_bootstrap_response(code),
        }
        Ok(())
    }

    fn on_register_response(&mut self, packet: &Packet, code: ResponseType, now: Instant) {
        if code != ResponseType::Created {
            log::warn!("Registration rejected with {:?}", code);
            self.state = RegistrationState::Idle;
            self.objects_changed = true;
            self.observer.error(RegistrationError::from_response(code));
            return;
        }
        let Some(location) = coap::location_path(packet) else {
            log::error!("Registration response carries no location");
            self.state = RegistrationState::Idle;
            self.observer.error(RegistrationError::ResponseParseFailed);
            return;
        };

        if let Some(max_age) = coap::first_uint(packet, CoapOption::MaxAge) {
            self.endpoint.set_lifetime(u64::from(max_age));
        }
        let lifetime = self.endpoint.lifetime();
        log::info!("Registered at /{} (lifetime {}s)", location, lifetime);
        self.registered_lifetime = lifetime;
        self.location = Some(location);
        self.state = RegistrationState::Registered;
        self.refresh_timer.start(now, reduce_lifetime(lifetime));
        self.observer.object_registered();
    }

    fn on_update_response(&mut self, code: ResponseType, sent_objects: bool, now: Instant) {
        match code {
            ResponseType::Changed => {
                log::info!("Registration updated");
                self.registered_lifetime = self.endpoint.lifetime();
                self.state = RegistrationState::Registered;
                self.refresh_timer
                    .start(now, reduce_lifetime(self.registered_lifetime));
                self.observer.registration_updated();
            }
            ResponseType::BadRequest => {
                log::warn!("Registration update rejected as invalid");
                self.objects_changed |= sent_objects;
                self.state = RegistrationState::Registered;
                self.refresh_timer
                    .start(now, reduce_lifetime(self.registered_lifetime));
                self.observer.error(RegistrationError::InvalidParameters);
            }
            other => {
                log::warn!("Registration update failed with {:?}, registering again", other);
                self.state = RegistrationState::Idle;
                self.location = None;
                self.refresh_timer.stop();
                if let Err(e) = self.send_register_message(now) {
                    log::error!("Re-registration failed: {}", e);
                    let error = match other {
                        ResponseType::NotFound => RegistrationError::NotRegistered,
                        code => RegistrationError::from_response(code),
                    };
                    self.observer.error(error);
                }
            }
        }
    }

    fn on_unregister_response(&mut self, code: ResponseType, now: Instant) {
        if code == ResponseType::Deleted {
            log::info!("Unregistered");
            self.state = RegistrationState::Idle;
            self.location = None;
            self.refresh_timer.stop();
            self.stop_observations(now);
            self.observer.object_unregistered();
        } else {
            log::warn!("Unregistration failed with {:?}", code);
            self.state = RegistrationState::Registered;
            self.refresh_timer
                .start(now, reduce_lifetime(self.registered_lifetime));
            self.observer.error(RegistrationError::UnregistrationFailed);
        }
    }

    #[cfg(feature = "bootstrap")]
    fn on_bootstrap_response(&mut self, code: ResponseType) {
        if code == ResponseType::Changed {
            log::info!("Bootstrap request accepted, waiting for server writes");
            return;
        }
        log::warn!("Bootstrap request rejected with {:?}", code);
        self.bootstrap = None;
        self.state = RegistrationState::Idle;
        self.observer.error(RegistrationError::BootstrapFailed);
    }

    fn handle_request(&mut self, packet: &Packet, now: Instant) -> Result<()> {
        let Some(request) = Lwm2mRequest::from_packet(packet) else {
            return self.send_reply(packet, &Lwm2mResponse::new(ResponseType::MethodNotAllowed));
        };
        log::debug!("{:?} /{}", request.method, request.path_string());

        let response = match self.serve_bootstrap(&request, now) {
            Some(response) => response,
            None => self.serve_request(&request, now),
        };
        self.send_reply(packet, &response)
    }

    #[cfg(feature = "bootstrap")]
    fn serve_bootstrap(&mut self, request: &Lwm2mRequest, now: Instant) -> Option<Lwm2mResponse> {
        let session = self.bootstrap.as_mut()?;
        if BootstrapSession::is_finish_request(request) {
            return Some(self.finish_bootstrap());
        }
        session.handle_request(request, now)
    }

    #[cfg(not(feature = "bootstrap"))]
    fn serve_bootstrap(&mut self, _request: &Lwm2mRequest, _now: Instant) -> Option<Lwm2mResponse> {
        None
    }

    #[cfg(feature = "bootstrap")]
    fn finish_bootstrap(&mut self) -> Lwm2mResponse {
        let Some(mut session) = self.bootstrap.take() else {
            return Lwm2mResponse::new(ResponseType::NotFound);
        };
        self.pending
            .retain(|_, pending| pending.kind != RequestKind::Bootstrap);
        self.state = RegistrationState::Idle;

        match session.finish() {
            Ok((security, params)) => {
                if let Some(params) = params {
                    if let Some(lifetime) = params.lifetime {
                        self.endpoint.set_lifetime(lifetime);
                    }
                    if let Some(binding) = params.binding {
                        self.endpoint.set_binding(binding);
                    }
                }
                log::info!("Bootstrap finished, server {}", security.server_uri);
                self.observer.bootstrap_done(&security);
                self.security = Some(security);
                Lwm2mResponse::changed()
            }
            Err(e) => {
                log::error!("Bootstrap finish rejected: {}", e);
                self.observer.error(RegistrationError::BootstrapFailed);
                Lwm2mResponse::new(ResponseType::NotAcceptable)
            }
        }
    }

    fn serve_request(&mut self, request: &Lwm2mRequest, now: Instant) -> Lwm2mResponse {
        if request.method == Method::Delete {
            return self.delete_object_instance(request);
        }
        let Some(node) = node::resolve(&mut self.objects, &request.path) else {
            return Lwm2mResponse::new(ResponseType::NotFound);
        };

        let base_type = node.base_type();
        let (response, value_updated) = node.handle_request(request, now);
        if base_type == BaseType::Object && response.code == ResponseType::Created {
            self.objects_changed = true;
        }
        if value_updated {
            self.observer.value_updated(&request.path_string(), base_type);
        }
        response
    }

    fn delete_object_instance(&mut self, request: &Lwm2mRequest) -> Lwm2mResponse {
        let [object_name, instance_id] = request.path.as_slice() else {
            return Lwm2mResponse::new(ResponseType::MethodNotAllowed);
        };
        let Ok(instance_id) = instance_id.parse::<u16>() else {
            return Lwm2mResponse::new(ResponseType::NotFound);
        };
        let Some(object) = self.object_mut(object_name) else {
            return Lwm2mResponse::new(ResponseType::NotFound);
        };
        let Some(instance) = object.object_instance(instance_id) else {
            return Lwm2mResponse::new(ResponseType::NotFound);
        };
        if !instance.base().operation().contains(Operation::DELETE) {
            return Lwm2mResponse::new(ResponseType::MethodNotAllowed);
        }

        object.remove_object_instance(instance_id);
        let path = request.path_string();
        self.forget_notifications(&path);
        self.objects_changed = true;
        log::info!("Deleted object instance /{}", path);
        Lwm2mResponse::new(ResponseType::Deleted)
    }

    /// Piggyback the response on an ACK, or send it non-confirmable
    fn send_reply(&mut self, request: &Packet, response: &Lwm2mResponse) -> Result<()> {
        let reply = match request.header.get_type() {
            MessageType::Confirmable if response.delayed => {
                coap::empty_ack(request.header.message_id)
            }
            MessageType::Confirmable => response.to_packet(
                MessageType::Acknowledgement,
                request.header.message_id,
                request.get_token(),
            ),
            _ if response.delayed => return Ok(()),
            _ => {
                let message_id = self.next_message_id();
                response.to_packet(MessageType::NonConfirmable, message_id, request.get_token())
            }
        };
        self.send_packet(&reply)
    }

    fn handle_reset(&mut self, message_id: u16, now: Instant) {
        let Some(index) = self
            .notifications
            .iter()
            .position(|(id, _)| *id == message_id)
        else {
            log::debug!("Reset {} matches no notification", message_id);
            return;
        };
        let Some((_, path)) = self.notifications.remove(index) else {
            return;
        };
        log::info!("Server reset notification for /{}, cancelling observation", path);
        if let Some(node) = node::resolve(&mut self.objects, &coap::split_path(&path)) {
            node.cancel_observation(now);
        }
    }

    // =========================================================================
    // Timers and notifications
    // =========================================================================

    /// Advance timers and send due notifications
    pub fn process(&mut self, now: Instant) -> Result<()> {
        if self.pump_timer.take_expired(now) {
            self.expire_requests(now);
            if !self.pending.is_empty() {
                self.pump_timer.start(now, PUMP_INTERVAL);
            }
        }

        if self.refresh_timer.take_expired(now) {
            log::debug!("Registration refresh due");
            if let Err(e) = self.send_update_registration(0, now) {
                log::warn!("Registration refresh failed: {}", e);
            }
        }

        self.propagate_changes(now);
        for notification in self.collect_notifications(now) {
            self.send_notification(notification)?;
        }
        Ok(())
    }

    fn expire_requests(&mut self, now: Instant) {
        let expired: Vec<u16> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            let Some(pending) = self.pending.remove(&id) else {
                continue;
            };
            log::warn!("{} request timed out", pending.kind.label());
            match pending.kind {
                RequestKind::Register => {
                    self.state = RegistrationState::Idle;
                    self.objects_changed = true;
                }
                RequestKind::Update | RequestKind::Unregister => {
                    self.objects_changed |= pending.sent_objects;
                    self.state = RegistrationState::Registered;
                    self.refresh_timer
                        .start(now, reduce_lifetime(self.registered_lifetime));
                }
                #[cfg(feature = "bootstrap")]
                RequestKind::Bootstrap => {
                    self.state = RegistrationState::Idle;
                    self.bootstrap = None;
                }
            }
            self.observer.error(RegistrationError::Timeout);
        }
    }

    /// Turn leaf changes into triggers for observed ancestors
    fn propagate_changes(&mut self, now: Instant) {
        for object in &mut self.objects {
            let mut changed_instances = Vec::new();
            for instance in object.object_instances_mut() {
                let mut changed_resources = Vec::new();
                for resource in instance.resources_mut() {
                    if resource.take_changed() {
                        let level = resource.base().observation_level();
                        changed_resources.push((resource.base().name_id(), level));
                    }
                }

                let mut report_to_object = false;
                for (id, level) in changed_resources {
                    if level.contains(ObservationLevel::OI) {
                        instance
                            .base_mut()
                            .report_trigger(u16::try_from(id).ok(), now);
                    }
                    report_to_object |= level.contains(ObservationLevel::O);
                }
                if report_to_object {
                    changed_instances.push(instance.instance_id());
                }
            }
            for id in changed_instances {
                object.base_mut().report_trigger(Some(id), now);
            }
        }
    }

    fn collect_notifications(&mut self, now: Instant) -> Vec<Notification> {
        let mut due = Vec::new();
        for object in &mut self.objects {
            for instance in object.object_instances_mut() {
                for resource in instance.resources_mut() {
                    due.extend(resource.poll_notification(now));
                }
                due.extend(instance.poll_notification(now));
            }
            due.extend(object.poll_notification(now));
        }
        due
    }

    fn send_notification(&mut self, notification: Notification) -> Result<()> {
        let message_id = self.next_message_id();
        let packet = notification.response.to_packet(
            MessageType::NonConfirmable,
            message_id,
            &notification.token,
        );
        self.send_packet(&packet)?;
        log::debug!(
            "Notification {:?} for /{}",
            notification.response.observe,
            notification.path
        );

        self.notifications.push_back((message_id, notification.path));
        if self.notifications.len() > MAX_TRACKED_NOTIFICATIONS {
            self.notifications.pop_front();
        }
        Ok(())
    }

    fn stop_observations(&mut self, now: Instant) {
        for object in &mut self.objects {
            for instance in object.object_instances_mut() {
                for resource in instance.resources_mut() {
                    resource.stop_observation(now);
                }
                instance.stop_observation(now);
            }
            object.stop_observation(now);
        }
        self.notifications.clear();
    }

    // =========================================================================
    // Application side
    // =========================================================================

    /// Set the value of a resource or resource instance by path
    ///
    /// Returns false when the node refuses the write (static, or a value
    /// written to a multiple resource as a whole).
    pub fn set_resource_value(&mut self, path: &str, value: &[u8], now: Instant) -> Result<bool> {
        match node::resolve(&mut self.objects, &coap::split_path(path)) {
            Some(NodeMut::Resource(resource)) => Ok(resource.set_value_at(value, now)),
            Some(NodeMut::ResourceInstance(resource, id)) => {
                Ok(resource.set_instance_value_at(id, value, now))
            }
            _ => Err(Error::PathNotFound(path.to_string())),
        }
    }

    /// Complete a delayed Execute with a separate 2.04 response
    pub fn send_delayed_response(&mut self, path: &str, payload: &[u8]) -> Result<()> {
        let token = match node::resolve(&mut self.objects, &coap::split_path(path)) {
            Some(NodeMut::Resource(resource)) => resource.take_delayed_token(),
            _ => return Err(Error::PathNotFound(path.to_string())),
        };
        let Some(token) = token else {
            return Err(Error::Coap(format!("no delayed response pending on /{}", path)));
        };

        let mut response = Lwm2mResponse::changed();
        response.payload = payload.to_vec();
        let message_id = self.next_message_id();
        let packet = response.to_packet(MessageType::Confirmable, message_id, &token);
        log::debug!("Delayed response for /{}", path);
        self.send_packet(&packet)
    }

    /// Stop all timers and forget in-flight requests
    pub fn stop(&mut self) {
        self.pump_timer.stop();
        self.refresh_timer.stop();
        self.pending.clear();
        #[cfg(feature = "bootstrap")]
        {
            self.bootstrap = None;
        }
        self.state = match self.state {
            RegistrationState::Updating | RegistrationState::Unregistering => {
                RegistrationState::Registered
            }
            RegistrationState::Registered => RegistrationState::Registered,
            _ => RegistrationState::Idle,
        };
        log::info!("Client stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coap::{first_uint, option_values};
    use crate::resource::ResourceType;
    use std::io;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Vec<Vec<u8>>,
    }

    impl Transport for RecordingTransport {
        fn send(&mut self, data: &[u8]) -> io::Result<()> {
            self.sent.push(data.to_vec());
            Ok(())
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        BootstrapDone(String),
        Registered,
        Unregistered,
        Updated,
        Error(RegistrationError),
        ValueUpdated(String, BaseType),
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: Vec<Event>,
    }

    impl Observer for RecordingObserver {
        fn bootstrap_done(&mut self, security: &Security) {
            self.events.push(Event::BootstrapDone(security.server_uri.clone()));
        }

        fn object_registered(&mut self) {
            self.events.push(Event::Registered);
        }

        fn object_unregistered(&mut self) {
            self.events.push(Event::Unregistered);
        }

        fn registration_updated(&mut self) {
            self.events.push(Event::Updated);
        }

        fn error(&mut self, error: RegistrationError) {
            self.events.push(Event::Error(error));
        }

        fn value_updated(&mut self, path: &str, base_type: BaseType) {
            self.events.push(Event::ValueUpdated(path.to_string(), base_type));
        }
    }

    type TestClient = Lwm2mClient<RecordingTransport, RecordingObserver>;

    fn device_object() -> Object {
        let mut object = Object::new("3").unwrap();
        object.base_mut().set_observable(true);
        let instance = object.create_object_instance(0).unwrap();
        instance
            .create_static_resource("0", ResourceType::String, b"ACME", false)
            .unwrap();
        let battery = instance
            .create_dynamic_resource("9", ResourceType::Integer, true, false)
            .unwrap();
        battery.base_mut().set_operation(Operation::GET_PUT);
        battery.set_value(b"100");
        let reboot = instance
            .create_dynamic_resource("4", ResourceType::String, false, false)
            .unwrap();
        reboot.base_mut().set_operation(Operation::POST);
        object
    }

    fn client() -> TestClient {
        let endpoint = Endpoint::new("node-1").unwrap();
        let security = Security::new("coap://lwm2m.example:5683", Default::default());
        let mut client = Lwm2mClient::new(
            endpoint,
            Some(security),
            RecordingTransport::default(),
            RecordingObserver::default(),
        );
        client.add_object(device_object()).unwrap();
        client
    }

    fn last_sent(client: &TestClient) -> Packet {
        Packet::from_bytes(client.transport().sent.last().unwrap()).unwrap()
    }

    fn reply(client: &mut TestClient, request: &Packet, code: ResponseType, now: Instant) {
        let mut packet = Packet::new();
        packet.header.set_type(MessageType::Acknowledgement);
        packet.header.message_id = request.header.message_id;
        packet.header.code = MessageClass::Response(code);
        packet.set_token(request.get_token().to_vec());
        if code == ResponseType::Created {
            packet.add_option(CoapOption::LocationPath, b"rd".to_vec());
            packet.add_option(CoapOption::LocationPath, b"5a3f".to_vec());
        }
        client.handle_packet(&packet.to_bytes().unwrap(), now).unwrap();
    }

    fn server_request(
        client: &mut TestClient,
        request_type: RequestType,
        path: &str,
        message_id: u16,
        build: impl FnOnce(&mut Packet),
        now: Instant,
    ) -> Packet {
        let mut packet = coap::request_packet(
            request_type,
            MessageType::Confirmable,
            message_id,
            &[0xAA],
            path,
            &[],
        );
        build(&mut packet);
        client.handle_packet(&packet.to_bytes().unwrap(), now).unwrap();
        last_sent(client)
    }

    fn registered_client(now: Instant) -> TestClient {
        let mut client = client();
        client.send_register_message(now).unwrap();
        let request = last_sent(&client);
        reply(&mut client, &request, ResponseType::Created, now);
        client
    }

    fn strings(values: Vec<Vec<u8>>) -> Vec<String> {
        values
            .into_iter()
            .map(|value| String::from_utf8(value).unwrap())
            .collect()
    }

    #[test]
    fn test_register_lifecycle() {
        let now = Instant::now();
        let mut client = client();
        client.send_register_message(now).unwrap();
        assert!(matches!(
            client.send_register_message(now),
            Err(Error::RequestInFlight("register"))
        ));
        assert_eq!(client.registration_state(), RegistrationState::Registering);

        let register = last_sent(&client);
        assert_eq!(register.header.code, MessageClass::Request(RequestType::Post));
        assert_eq!(strings(option_values(&register, CoapOption::UriPath)), vec!["rd"]);
        assert_eq!(
            strings(option_values(&register, CoapOption::UriQuery)),
            vec!["ep=node-1", "lt=3600", "b=U"]
        );
        assert_eq!(
            first_uint(&register, CoapOption::ContentFormat),
            Some(u32::from(content_format::LINK_FORMAT))
        );
        assert_eq!(register.payload, b"</3/0>".to_vec());

        reply(&mut client, &register, ResponseType::Created, now);
        assert_eq!(client.registration_state(), RegistrationState::Registered);
        assert_eq!(client.location(), Some("rd/5a3f"));
        assert_eq!(client.observer().events, vec![Event::Registered]);
        assert_eq!(
            client.refresh_timer_remaining(now),
            Some(Duration::from_secs(2700))
        );

        // refresh fires at 2700 s with neither lifetime nor objects changed
        let refresh_at = now + Duration::from_secs(2700);
        client.process(refresh_at).unwrap();
        let update = last_sent(&client);
        assert_eq!(strings(option_values(&update, CoapOption::UriPath)), vec!["rd", "5a3f"]);
        assert!(option_values(&update, CoapOption::UriQuery).is_empty());
        assert!(update.payload.is_empty());
        assert_eq!(client.registration_state(), RegistrationState::Updating);

        reply(&mut client, &update, ResponseType::Changed, refresh_at);
        assert_eq!(client.registration_state(), RegistrationState::Registered);

        client.send_unregister_message(refresh_at).unwrap();
        let unregister = last_sent(&client);
        assert_eq!(unregister.header.code, MessageClass::Request(RequestType::Delete));
        reply(&mut client, &unregister, ResponseType::Deleted, refresh_at);

        assert_eq!(client.registration_state(), RegistrationState::Idle);
        assert_eq!(client.refresh_timer_remaining(refresh_at), None);
        assert_eq!(
            client.observer().events,
            vec![Event::Registered, Event::Updated, Event::Unregistered]
        );
    }

    #[test]
    fn test_register_max_age_sets_lifetime() {
        let now = Instant::now();
        let endpoint = Endpoint::new("node-1").unwrap().with_lifetime(300);
        let security = Security::new("coap://lwm2m.example:5683", Default::default());
        let mut client = Lwm2mClient::new(
            endpoint,
            Some(security),
            RecordingTransport::default(),
            RecordingObserver::default(),
        );
        client.send_register_message(now).unwrap();
        let register = last_sent(&client);

        let mut created = Packet::new();
        created.header.set_type(MessageType::Acknowledgement);
        created.header.message_id = register.header.message_id;
        created.header.code = MessageClass::Response(ResponseType::Created);
        created.set_token(register.get_token().to_vec());
        created.add_option(CoapOption::LocationPath, b"rd".to_vec());
        created.add_option(CoapOption::LocationPath, b"77".to_vec());
        created.add_option(CoapOption::MaxAge, coap::encode_uint(3600));
        client.handle_packet(&created.to_bytes().unwrap(), now).unwrap();

        assert_eq!(client.endpoint().lifetime(), 3600);
        assert_eq!(
            client.refresh_timer_remaining(now),
            Some(Duration::from_secs(2700))
        );
        client.process(now + Duration::from_secs(2699)).unwrap();
        assert_eq!(client.registration_state(), RegistrationState::Registered);
        client.process(now + Duration::from_secs(2700)).unwrap();
        assert_eq!(client.registration_state(), RegistrationState::Updating);
        let update = last_sent(&client);
        assert!(option_values(&update, CoapOption::UriQuery).is_empty());
    }

    #[test]
    fn test_oversized_lifetime_and_timeout_are_capped() {
        let now = Instant::now();
        let endpoint = Endpoint::new("node-1")
            .unwrap()
            .with_lifetime(i64::MAX as u64);
        let security = Security::new("coap://lwm2m.example:5683", Default::default());
        let mut client = Lwm2mClient::new(
            endpoint,
            Some(security),
            RecordingTransport::default(),
            RecordingObserver::default(),
        )
        .with_request_timeout(Duration::MAX);
        client.send_register_message(now).unwrap();
        let register = last_sent(&client);
        reply(&mut client, &register, ResponseType::Created, now);

        assert_eq!(client.registration_state(), RegistrationState::Registered);
        assert_eq!(
            client.refresh_timer_remaining(now),
            Some(Duration::from_secs(MAXIMUM_LIFETIME - 900))
        );
    }

    #[test]
    fn test_register_requires_security() {
        let endpoint = Endpoint::new("node-1").unwrap();
        let mut client = Lwm2mClient::new(
            endpoint,
            None,
            RecordingTransport::default(),
            RecordingObserver::default(),
        );
        assert!(matches!(
            client.send_register_message(Instant::now()),
            Err(Error::MissingSecurity)
        ));
        assert!(client.transport().sent.is_empty());
    }

    #[test]
    fn test_register_failure_is_classified() {
        let now = Instant::now();
        let mut client = client();
        client.send_register_message(now).unwrap();
        let register = last_sent(&client);
        reply(&mut client, &register, ResponseType::Forbidden, now);

        assert_eq!(client.registration_state(), RegistrationState::Idle);
        assert_eq!(
            client.observer().events,
            vec![Event::Error(RegistrationError::NotAllowed)]
        );
        // no retry
        assert_eq!(client.transport().sent.len(), 1);
    }

    #[test]
    fn test_update_carries_changes() {
        let now = Instant::now();
        let mut client = registered_client(now);
        let mut extra = Object::new("1000").unwrap();
        extra.create_object_instance(0);
        client.add_object(extra).unwrap();

        client.send_update_registration(120, now).unwrap();
        let update = last_sent(&client);
        assert_eq!(strings(option_values(&update, CoapOption::UriQuery)), vec!["lt=120"]);
        assert_eq!(update.payload, b"</3/0>,</1000/0>".to_vec());

        // a second update while in flight is a no-op
        client.send_update_registration(0, now).unwrap();
        assert_eq!(last_sent(&client).header.message_id, update.header.message_id);

        reply(&mut client, &update, ResponseType::Changed, now);
        assert_eq!(client.refresh_timer_remaining(now), Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_update_failures() {
        let now = Instant::now();
        let mut client = registered_client(now);
        client.send_update_registration(0, now).unwrap();
        let update = last_sent(&client);
        reply(&mut client, &update, ResponseType::BadRequest, now);
        assert_eq!(
            client.observer().events.last(),
            Some(&Event::Error(RegistrationError::InvalidParameters))
        );
        assert_eq!(client.registration_state(), RegistrationState::Registered);

        client.send_update_registration(0, now).unwrap();
        let update = last_sent(&client);
        reply(&mut client, &update, ResponseType::NotFound, now);
        let register = last_sent(&client);
        assert_eq!(strings(option_values(&register, CoapOption::UriPath)), vec!["rd"]);
        assert_eq!(client.registration_state(), RegistrationState::Registering);
    }

    #[test]
    fn test_request_timeout() {
        let now = Instant::now();
        let mut client = client();
        client.send_register_message(now).unwrap();
        client.process(now + Duration::from_secs(30)).unwrap();
        assert!(client.observer().events.is_empty());

        client.process(now + Duration::from_secs(94)).unwrap();
        assert_eq!(
            client.observer().events,
            vec![Event::Error(RegistrationError::Timeout)]
        );
        assert_eq!(client.registration_state(), RegistrationState::Idle);
    }

    #[test]
    fn test_observe_cycle() {
        let now = Instant::now();
        let mut client = registered_client(now);

        let ack = server_request(
            &mut client,
            RequestType::Get,
            "3/0/9",
            0x100,
            |packet| packet.add_option(CoapOption::Observe, vec![0]),
            now,
        );
        assert_eq!(ack.header.get_type(), MessageType::Acknowledgement);
        assert_eq!(ack.header.message_id, 0x100);
        assert_eq!(ack.header.code, MessageClass::Response(ResponseType::Content));
        assert_eq!(first_uint(&ack, CoapOption::Observe), Some(1));
        assert_eq!(ack.payload, b"100".to_vec());

        let later = now + Duration::from_secs(5);
        assert!(client.set_resource_value("3/0/9", b"55", later).unwrap());
        let sent_before = client.transport().sent.len();
        client.process(later).unwrap();
        assert_eq!(client.transport().sent.len(), sent_before + 1);

        let notification = last_sent(&client);
        assert_eq!(notification.header.get_type(), MessageType::NonConfirmable);
        assert_eq!(notification.get_token(), &[0xAA]);
        assert_eq!(first_uint(&notification, CoapOption::Observe), Some(2));
        assert_eq!(notification.payload, b"55".to_vec());

        // nothing more without a change
        client.process(later + Duration::from_secs(1)).unwrap();
        assert_eq!(client.transport().sent.len(), sent_before + 1);

        let mut reset = Packet::new();
        reset.header.set_type(MessageType::Reset);
        reset.header.message_id = notification.header.message_id;
        client.handle_packet(&reset.to_bytes().unwrap(), later).unwrap();
        let battery = client
            .object("3")
            .and_then(|object| object.object_instance(0))
            .and_then(|instance| instance.resource("9"))
            .unwrap();
        assert!(!battery.base().is_under_observation());
    }

    #[test]
    fn test_greater_than_threshold_gates_notifications() {
        let now = Instant::now();
        let mut client = registered_client(now);
        assert!(client.set_resource_value("3/0/9", b"5", now).unwrap());

        let ack = server_request(
            &mut client,
            RequestType::Get,
            "3/0/9",
            0x300,
            |packet| packet.add_option(CoapOption::Observe, vec![0]),
            now,
        );
        assert_eq!(first_uint(&ack, CoapOption::Observe), Some(1));
        assert_eq!(ack.payload, b"5".to_vec());

        let ack = server_request(
            &mut client,
            RequestType::Put,
            "3/0/9",
            0x301,
            |packet| packet.add_option(CoapOption::UriQuery, b"gt=10".to_vec()),
            now,
        );
        assert_eq!(ack.header.code, MessageClass::Response(ResponseType::Changed));
        let sent_before = client.transport().sent.len();

        // below the threshold: silent
        let later = now + Duration::from_secs(1);
        assert!(client.set_resource_value("3/0/9", b"8", later).unwrap());
        client.process(later).unwrap();
        assert_eq!(client.transport().sent.len(), sent_before);

        let crossed = now + Duration::from_secs(2);
        assert!(client.set_resource_value("3/0/9", b"12", crossed).unwrap());
        client.process(crossed).unwrap();
        assert_eq!(client.transport().sent.len(), sent_before + 1);
        let notification = last_sent(&client);
        assert_eq!(first_uint(&notification, CoapOption::Observe), Some(2));
        assert_eq!(notification.payload, b"12".to_vec());

        client.process(crossed + Duration::from_secs(1)).unwrap();
        assert_eq!(client.transport().sent.len(), sent_before + 1);
    }

    #[test]
    fn test_instance_observation_follows_resource_changes() {
        let now = Instant::now();
        let mut client = registered_client(now);
        let ack = server_request(
            &mut client,
            RequestType::Get,
            "3/0",
            0x200,
            |packet| packet.add_option(CoapOption::Observe, vec![0]),
            now,
        );
        assert_eq!(first_uint(&ack, CoapOption::Observe), Some(1));
        assert_eq!(
            first_uint(&ack, CoapOption::ContentFormat),
            Some(u32::from(content_format::OMA_TLV))
        );

        client.set_resource_value("3/0/9", b"42", now).unwrap();
        client.process(now).unwrap();
        let notification = last_sent(&client);
        assert_eq!(first_uint(&notification, CoapOption::Observe), Some(2));
        assert_eq!(
            first_uint(&notification, CoapOption::ContentFormat),
            Some(u32::from(content_format::OMA_TLV))
        );
    }

    #[test]
    fn test_server_write_and_execute() {
        let now = Instant::now();
        let mut client = registered_client(now);
        let executed = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        {
            let executed = executed.clone();
            let reboot = client
                .object_mut("3")
                .and_then(|object| object.object_instance_mut(0))
                .and_then(|instance| instance.resource_mut("4"))
                .unwrap();
            reboot.set_execute_function(move |_| {
                executed.store(true, std::sync::atomic::Ordering::SeqCst);
            });
        }

        let ack = server_request(
            &mut client,
            RequestType::Put,
            "3/0/9",
            0x300,
            |packet| packet.payload = b"12".to_vec(),
            now,
        );
        assert_eq!(ack.header.code, MessageClass::Response(ResponseType::Changed));
        assert_eq!(
            client.observer().events.last(),
            Some(&Event::ValueUpdated("3/0/9".to_string(), BaseType::Resource))
        );

        let ack = server_request(&mut client, RequestType::Post, "3/0/4", 0x301, |_| {}, now);
        assert_eq!(ack.header.code, MessageClass::Response(ResponseType::Changed));
        assert!(executed.load(std::sync::atomic::Ordering::SeqCst));

        let ack = server_request(&mut client, RequestType::Put, "3/0/0", 0x302, |_| {}, now);
        assert_eq!(
            ack.header.code,
            MessageClass::Response(ResponseType::MethodNotAllowed)
        );
        let ack = server_request(&mut client, RequestType::Get, "7/0", 0x303, |_| {}, now);
        assert_eq!(ack.header.code, MessageClass::Response(ResponseType::NotFound));
    }

    #[test]
    fn test_delayed_execute_response() {
        let now = Instant::now();
        let mut client = registered_client(now);
        client
            .object_mut("3")
            .and_then(|object| object.object_instance_mut(0))
            .and_then(|instance| instance.resource_mut("4"))
            .unwrap()
            .set_delayed_response(true);

        let ack = server_request(&mut client, RequestType::Post, "3/0/4", 0x400, |_| {}, now);
        assert_eq!(ack.header.code, MessageClass::Empty);
        assert_eq!(ack.header.message_id, 0x400);

        client.send_delayed_response("3/0/4", b"done").unwrap();
        let response = last_sent(&client);
        assert_eq!(response.header.get_type(), MessageType::Confirmable);
        assert_eq!(response.header.code, MessageClass::Response(ResponseType::Changed));
        assert_eq!(response.get_token(), &[0xAA]);
        assert!(client.send_delayed_response("3/0/4", b"again").is_err());
    }

    #[test]
    fn test_delete_object_instance() {
        let now = Instant::now();
        let mut client = registered_client(now);
        let ack = server_request(&mut client, RequestType::Delete, "3/0", 0x500, |_| {}, now);
        assert_eq!(
            ack.header.code,
            MessageClass::Response(ResponseType::MethodNotAllowed)
        );

        client
            .object_mut("3")
            .and_then(|object| object.object_instance_mut(0))
            .unwrap()
            .base_mut()
            .set_operation(Operation::ALL);
        let ack = server_request(&mut client, RequestType::Delete, "3/0", 0x501, |_| {}, now);
        assert_eq!(ack.header.code, MessageClass::Response(ResponseType::Deleted));
        assert_eq!(client.object("3").unwrap().instance_count(), 0);

        client.send_update_registration(0, now).unwrap();
        assert_eq!(last_sent(&client).payload, b"</3>".to_vec());
    }

    #[test]
    fn test_stop_clears_in_flight() {
        let now = Instant::now();
        let mut client = client();
        client.send_register_message(now).unwrap();
        client.stop();
        assert_eq!(client.registration_state(), RegistrationState::Idle);
        client.send_register_message(now).unwrap();
        client.process(now + Duration::from_secs(200)).unwrap();
        client.stop();
        client.process(now + Duration::from_secs(400)).unwrap();
        assert_eq!(client.observer().events, vec![Event::Error(RegistrationError::Timeout)]);
    }

    #[cfg(feature = "bootstrap")]
    #[test]
    fn test_bootstrap_sequence() {
        use crate::security::security_resource;
        use crate::tlv::{encode_record, TlvType};

        let now = Instant::now();
        let endpoint = Endpoint::new("node-1").unwrap();
        let mut client = Lwm2mClient::new(
            endpoint,
            None,
            RecordingTransport::default(),
            RecordingObserver::default(),
        );
        client.bootstrap(now).unwrap();
        let request = last_sent(&client);
        assert_eq!(strings(option_values(&request, CoapOption::UriPath)), vec!["bs"]);
        assert_eq!(strings(option_values(&request, CoapOption::UriQuery)), vec!["ep=node-1"]);
        reply(&mut client, &request, ResponseType::Changed, now);
        assert_eq!(client.registration_state(), RegistrationState::Bootstrapping);

        let mut payload = Vec::new();
        encode_record(TlvType::Resource, security_resource::SERVER_URI, b"coap://lwm2m.example", &mut payload)
            .unwrap();
        encode_record(TlvType::Resource, security_resource::BOOTSTRAP_SERVER, &[0], &mut payload).unwrap();
        encode_record(TlvType::Resource, security_resource::SECURITY_MODE, &[3], &mut payload).unwrap();
        let ack = server_request(
            &mut client,
            RequestType::Put,
            "0/1",
            0x600,
            |packet| packet.payload = payload,
            now,
        );
        assert_eq!(ack.header.code, MessageClass::Response(ResponseType::Changed));

        let ack = server_request(&mut client, RequestType::Post, "bs", 0x601, |_| {}, now);
        assert_eq!(ack.header.code, MessageClass::Response(ResponseType::Changed));
        assert_eq!(client.registration_state(), RegistrationState::Idle);
        assert_eq!(
            client.security().map(|security| security.server_uri.as_str()),
            Some("coap://lwm2m.example")
        );
        assert_eq!(
            client.observer().events,
            vec![Event::BootstrapDone("coap://lwm2m.example".to_string())]
        );
        client.send_register_message(now).unwrap();
    }

    #[cfg(feature = "bootstrap")]
    #[test]
    fn test_bootstrap_finish_without_account() {
        let now = Instant::now();
        let mut client = client();
        client.bootstrap(now).unwrap();
        let request = last_sent(&client);
        reply(&mut client, &request, ResponseType::Changed, now);

        let ack = server_request(&mut client, RequestType::Post, "bs", 0x700, |_| {}, now);
        assert_eq!(ack.header.code, MessageClass::Response(ResponseType::NotAcceptable));
        assert_eq!(
            client.observer().events,
            vec![Event::Error(RegistrationError::BootstrapFailed)]
        );
        assert_eq!(client.registration_state(), RegistrationState::Idle);
    }
}

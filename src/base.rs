//! Identity, permissions and observation state shared by every tree node

use std::fmt;
use std::time::Instant;

use crate::report_handler::{AttributeOutcome, ReportHandler};

/// Maximum length of a node name in bytes
pub const MAX_NAME_LENGTH: usize = 64;

/// Maximum length of an observation token in bytes
pub const MAX_TOKEN_LENGTH: usize = 255;

/// Default Max-Age sent with responses and notifications
pub const DEFAULT_MAX_AGE: u32 = 60;

/// Kind of a tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseType {
    Object,
    ObjectInstance,
    Resource,
    ResourceInstance,
}

/// Whether a node value may change after creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Value set once at creation
    Static,
    /// Value may change at runtime
    #[default]
    Dynamic,
}

/// Set of CoAP methods a node accepts
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Operation(u8);

impl Operation {
    pub const NONE: Operation = Operation(0);
    pub const GET: Operation = Operation(0x01);
    pub const PUT: Operation = Operation(0x02);
    pub const POST: Operation = Operation(0x04);
    pub const DELETE: Operation = Operation(0x08);
    pub const GET_PUT: Operation = Operation(0x03);
    pub const GET_POST: Operation = Operation(0x05);
    pub const ALL: Operation = Operation(0x0F);

    pub fn contains(self, other: Operation) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl std::ops::BitOr for Operation {
    type Output = Operation;

    fn bitor(self, rhs: Operation) -> Operation {
        Operation(self.0 | rhs.0)
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (Operation::GET, "GET"),
            (Operation::PUT, "PUT"),
            (Operation::POST, "POST"),
            (Operation::DELETE, "DELETE"),
        ]
        .iter()
        .filter(|(op, _)| self.contains(*op))
        .map(|(_, name)| *name)
        .collect();
        write!(f, "Operation({})", names.join("|"))
    }
}

/// Observation level bits: which ancestor levels observe a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ObservationLevel(u8);

impl ObservationLevel {
    pub const NONE: ObservationLevel = ObservationLevel(0);
    pub const R: ObservationLevel = ObservationLevel(0x01);
    pub const OI: ObservationLevel = ObservationLevel(0x02);
    pub const O: ObservationLevel = ObservationLevel(0x04);

    pub fn contains(self, other: ObservationLevel) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    fn insert(&mut self, other: ObservationLevel) {
        self.0 |= other.0 & 0x07;
    }

    fn remove(&mut self, other: ObservationLevel) {
        self.0 &= !other.0;
    }
}

/// Parse a node name as a numeric id
///
/// Returns the value when the name is a plain decimal integer that fits in
/// 16 bits, -1 otherwise.
pub fn name_id(name: &str) -> i32 {
    if name.is_empty() || name.len() > 5 || !name.bytes().all(|b| b.is_ascii_digit()) {
        return -1;
    }
    match name.parse::<u32>() {
        Ok(id) if id <= u32::from(u16::MAX) => id as i32,
        _ => -1,
    }
}

/// Check a node name against the naming rules
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_NAME_LENGTH && !name.contains('/')
}

/// Attributes common to all node kinds
#[derive(Debug, Clone)]
pub struct Base {
    name: String,
    name_id: i32,
    uri_path: String,
    base_type: BaseType,
    mode: Mode,
    operation: Operation,
    observable: bool,
    observation_level: ObservationLevel,
    observation_token: Option<Vec<u8>>,
    observation_number: u16,
    max_age: u32,
    register_uri: bool,
    content_type: Option<u16>,
    report_handler: Option<ReportHandler>,
}

impl Base {
    pub(crate) fn new(
        name: &str,
        uri_path: String,
        base_type: BaseType,
        mode: Mode,
        observable: bool,
    ) -> Self {
        Self {
            name: name.to_string(),
            name_id: name_id(name),
            uri_path,
            base_type,
            mode,
            operation: Operation::GET,
            observable,
            observation_level: ObservationLevel::NONE,
            observation_token: None,
            observation_number: 0,
            max_age: DEFAULT_MAX_AGE,
            register_uri: true,
            content_type: None,
            report_handler: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn name_id(&self) -> i32 {
        self.name_id
    }

    pub fn uri_path(&self) -> &str {
        &self.uri_path
    }

    pub fn base_type(&self) -> BaseType {
        self.base_type
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn set_operation(&mut self, operation: Operation) {
        self.operation = operation;
    }

    pub fn is_observable(&self) -> bool {
        self.observable
    }

    pub fn set_observable(&mut self, observable: bool) {
        self.observable = observable;
    }

    pub fn observation_level(&self) -> ObservationLevel {
        self.observation_level
    }

    pub(crate) fn add_observation_level(&mut self, level: ObservationLevel) {
        self.observation_level.insert(level);
    }

    pub(crate) fn remove_observation_level(&mut self, level: ObservationLevel) {
        self.observation_level.remove(level);
    }

    pub fn max_age(&self) -> u32 {
        self.max_age
    }

    pub fn set_max_age(&mut self, max_age: u32) {
        self.max_age = max_age;
    }

    /// Whether the node is listed in the registration payload
    pub fn register_uri(&self) -> bool {
        self.register_uri
    }

    pub fn set_register_uri(&mut self, register: bool) {
        self.register_uri = register;
    }

    pub fn content_type(&self) -> Option<u16> {
        self.content_type
    }

    pub fn set_content_type(&mut self, content_type: u16) {
        self.content_type = Some(content_type);
    }

    pub fn is_under_observation(&self) -> bool {
        self.observation_token.is_some()
    }

    pub fn observation_token(&self) -> Option<&[u8]> {
        self.observation_token.as_deref()
    }

    pub fn observation_number(&self) -> u16 {
        self.observation_number
    }

    /// Advance the observation sequence number for the next outgoing message
    pub(crate) fn next_observation_number(&mut self) -> u16 {
        self.observation_number = self.observation_number.wrapping_add(1);
        self.observation_number
    }

    pub fn report_handler(&self) -> Option<&ReportHandler> {
        self.report_handler.as_ref()
    }

    /// Start observation with the requester's token
    ///
    /// Returns false when the node is not observable or the token is too
    /// long. `current` seeds numeric threshold evaluation.
    pub(crate) fn start_observation(
        &mut self,
        token: &[u8],
        current: Option<f64>,
        now: Instant,
    ) -> bool {
        if !self.observable || token.len() > MAX_TOKEN_LENGTH {
            return false;
        }
        log::debug!("Observation started on /{}", self.uri_path);
        self.observation_token = Some(token.to_vec());
        self.observation_number = 0;
        self.report_handler
            .get_or_insert_with(ReportHandler::new)
            .set_under_observation(true, current, now);
        true
    }

    /// Stop observation, dropping the token and the scheduler
    pub(crate) fn stop_observation(&mut self, now: Instant) {
        if self.observation_token.take().is_some() {
            log::debug!("Observation stopped on /{}", self.uri_path);
        }
        if let Some(handler) = self.report_handler.as_mut() {
            handler.set_under_observation(false, None, now);
        }
        self.report_handler = None;
        self.observation_number = 0;
    }

    /// Route a write-attributes query to the scheduler
    pub(crate) fn set_notification_attribute(
        &mut self,
        query: &str,
        numeric: bool,
        now: Instant,
    ) -> AttributeOutcome {
        let base_type = self.base_type;
        let outcome = self
            .report_handler
            .get_or_insert_with(ReportHandler::new)
            .set_notification_attribute(query, base_type, numeric, now);
        if outcome == AttributeOutcome::Cancel {
            self.stop_observation(now);
        }
        outcome
    }

    /// Feed a numeric value change to the scheduler, if observed
    pub(crate) fn report_value(&mut self, value: f64, now: Instant) {
        if self.is_under_observation() {
            if let Some(handler) = self.report_handler.as_mut() {
                handler.set_value(value, now);
            }
        }
    }

    /// Feed a non-numeric change to the scheduler, if observed
    pub(crate) fn report_trigger(&mut self, instance_id: Option<u16>, now: Instant) {
        if self.is_under_observation() {
            if let Some(handler) = self.report_handler.as_mut() {
                handler.set_notification_trigger(instance_id, now);
            }
        }
    }

    /// Advance the scheduler and drain a due report
    pub(crate) fn poll_report(&mut self, now: Instant) -> Option<Vec<u16>> {
        if !self.is_under_observation() {
            return None;
        }
        let handler = self.report_handler.as_mut()?;
        handler.tick(now);
        handler.take_report()
    }
}

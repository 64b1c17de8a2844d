//! Conditional notification scheduling
//!
//! One [`ReportHandler`] exists per observed node. It owns the write
//! attributes (`pmin`, `pmax`, `gt`, `lt`, `st`), two restartable timers and
//! the latches that decide when a change is worth reporting. It never sends
//! anything itself: when a report is due it raises a latch that the client
//! drains with [`ReportHandler::take_report`].
//!
//! States and transitions:
//! - idle: nothing pending
//! - pmin-pending: a qualifying change arrived before `pmin` elapsed, the
//!   report is held until the pmin timer fires
//! - pmax-forced: the pmax timer fired, a report goes out regardless of the
//!   thresholds as soon as pmin allows it

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use crate::base::BaseType;
use crate::timer::Timer;

/// Bits of [`ReportHandler::attribute_state`]
pub mod attribute {
    pub const PMIN: u8 = 0x01;
    pub const PMAX: u8 = 0x02;
    pub const LT: u8 = 0x04;
    pub const GT: u8 = 0x08;
    pub const ST: u8 = 0x10;
}

/// Result of applying a write-attributes query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeOutcome {
    /// Attributes were accepted
    Updated,
    /// Query asked to cancel the observation
    Cancel,
    /// Query was malformed or the combination is not valid
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct Attributes {
    state: u8,
    pmin: u32,
    pmax: u32,
    gt: f64,
    lt: f64,
    st: f64,
}

/// Notification scheduler for one observed node
#[derive(Debug, Clone)]
pub struct ReportHandler {
    attributes: Attributes,
    current_value: f64,
    last_value: f64,
    /// Set for changes that are not numeric comparisons (triggers)
    forced_change: bool,
    notify: bool,
    pmin_exceeded: bool,
    pmax_exceeded: bool,
    under_observation: bool,
    report_ready: bool,
    changed_instance_ids: BTreeSet<u16>,
    pmin_timer: Timer,
    pmax_timer: Timer,
}

impl Default for ReportHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportHandler {
    pub fn new() -> Self {
        Self {
            attributes: Attributes::default(),
            current_value: 0.0,
            last_value: 0.0,
            forced_change: false,
            notify: false,
            pmin_exceeded: false,
            pmax_exceeded: false,
            under_observation: false,
            report_ready: false,
            changed_instance_ids: BTreeSet::new(),
            pmin_timer: Timer::new(),
            pmax_timer: Timer::new(),
        }
    }

    /// Bitmask of explicitly set attributes, see [`attribute`]
    pub fn attribute_state(&self) -> u8 {
        self.attributes.state
    }

    pub fn pmin(&self) -> Option<u32> {
        self.has(attribute::PMIN).then_some(self.attributes.pmin)
    }

    pub fn pmax(&self) -> Option<u32> {
        self.has(attribute::PMAX).then_some(self.attributes.pmax)
    }

    pub fn gt(&self) -> Option<f64> {
        self.has(attribute::GT).then_some(self.attributes.gt)
    }

    pub fn lt(&self) -> Option<f64> {
        self.has(attribute::LT).then_some(self.attributes.lt)
    }

    pub fn st(&self) -> Option<f64> {
        self.has(attribute::ST).then_some(self.attributes.st)
    }

    pub fn is_under_observation(&self) -> bool {
        self.under_observation
    }

    /// True while a qualifying change waits for the pmin timer
    pub fn is_notify_pending(&self) -> bool {
        self.notify
    }

    /// Apply a write-attributes query such as `pmin=5&pmax=60&gt=10`
    ///
    /// Parse failures roll back to the previously accepted attributes.
    /// A well-formed but invalid combination resets everything to defaults.
    pub fn set_notification_attribute(
        &mut self,
        query: &str,
        base_type: BaseType,
        numeric: bool,
        now: Instant,
    ) -> AttributeOutcome {
        let previous = self.attributes;
        let thresholds_allowed = numeric
            && matches!(base_type, BaseType::Resource | BaseType::ResourceInstance);

        for param in query.split('&').filter(|p| !p.is_empty()) {
            if param == "cancel" {
                self.attributes = previous;
                return AttributeOutcome::Cancel;
            }

            let applied = match param.split_once('=') {
                Some(("pmin", value)) => value.parse::<u32>().ok().map(|v| {
                    self.attributes.pmin = v;
                    self.attributes.state |= attribute::PMIN;
                }),
                Some(("pmax", value)) => value.parse::<u32>().ok().map(|v| {
                    self.attributes.pmax = v;
                    self.attributes.state |= attribute::PMAX;
                }),
                Some(("gt", value)) if thresholds_allowed => parse_float(value).map(|v| {
                    self.attributes.gt = v;
                    self.attributes.state |= attribute::GT;
                }),
                Some(("lt", value)) if thresholds_allowed => parse_float(value).map(|v| {
                    self.attributes.lt = v;
                    self.attributes.state |= attribute::LT;
                }),
                Some(("st", value)) | Some(("stp", value)) if thresholds_allowed => {
                    parse_float(value).filter(|v| *v >= 0.0).map(|v| {
                        self.attributes.st = v;
                        self.attributes.state |= attribute::ST;
                    })
                }
                _ => None,
            };

            if applied.is_none() {
                log::debug!("Rejecting notification attribute {:?}", param);
                self.attributes = previous;
                return AttributeOutcome::Rejected;
            }
        }

        if !self.check_attribute_validity() {
            log::debug!("Invalid attribute combination in {:?}, resetting", query);
            self.set_default_values();
            return AttributeOutcome::Rejected;
        }

        if self.under_observation {
            self.restart_timers(now);
        }
        AttributeOutcome::Updated
    }

    /// Start or stop observation
    ///
    /// Starting seeds the last reported value with `current` (numeric
    /// resources) and arms the timers. Stopping cancels both timers and
    /// restores default attributes.
    pub fn set_under_observation(&mut self, observed: bool, current: Option<f64>, now: Instant) {
        self.under_observation = observed;
        if observed {
            if let Some(value) = current {
                self.current_value = value;
                self.last_value = value;
            }
            self.notify = false;
            self.pmax_exceeded = false;
            self.restart_timers(now);
        } else {
            self.set_default_values();
        }
    }

    /// Record a new numeric value and report it if it qualifies
    pub fn set_value(&mut self, value: f64, now: Instant) {
        self.current_value = value;
        if self.current_value != self.last_value {
            if self.check_threshold_values() {
                self.schedule_report(now);
            } else {
                log::trace!("Value {} does not cross notification thresholds", value);
            }
        }
    }

    /// Record a change that is reported without threshold evaluation
    ///
    /// Used for non-numeric values and for changes below a container node,
    /// where `instance_id` names the child that changed.
    pub fn set_notification_trigger(&mut self, instance_id: Option<u16>, now: Instant) {
        if let Some(id) = instance_id {
            self.changed_instance_ids.insert(id);
        }
        self.forced_change = true;
        self.schedule_report(now);
    }

    /// Evaluate timer expiry
    pub fn tick(&mut self, now: Instant) {
        if self.pmin_timer.take_expired(now) {
            self.pmin_exceeded = true;
            if self.notify || self.pmax_exceeded {
                self.report(now);
            }
        }
        if self.pmax_timer.take_expired(now) {
            self.pmax_exceeded = true;
            if !self.has(attribute::PMIN) || self.pmin_exceeded {
                self.report(now);
            }
        }
    }

    /// Drain a due report, returning the ids of the children that changed
    pub fn take_report(&mut self) -> Option<Vec<u16>> {
        if !self.report_ready {
            return None;
        }
        self.report_ready = false;
        Some(std::mem::take(&mut self.changed_instance_ids).into_iter().collect())
    }

    /// Earliest pending timer deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.pmin_timer.deadline(), self.pmax_timer.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn has(&self, bit: u8) -> bool {
        self.attributes.state & bit == bit
    }

    fn schedule_report(&mut self, now: Instant) {
        self.notify = true;
        if !self.has(attribute::PMIN) || self.pmin_exceeded {
            self.report(now);
        }
    }

    fn report(&mut self, now: Instant) {
        let changed = self.forced_change || self.current_value != self.last_value;
        if (self.notify && changed) || self.pmax_exceeded {
            self.notify = false;
            self.forced_change = false;
            self.pmin_exceeded = false;
            self.pmax_exceeded = false;
            self.last_value = self.current_value;
            self.report_ready = true;
            self.restart_timers(now);
        } else {
            self.notify = false;
        }
    }

    fn restart_timers(&mut self, now: Instant) {
        self.pmin_timer.stop();
        self.pmax_timer.stop();

        if self.has(attribute::PMIN) && self.attributes.pmin > 0 {
            self.pmin_exceeded = false;
            self.pmin_timer
                .start(now, Duration::from_secs(u64::from(self.attributes.pmin)));
        } else {
            self.pmin_exceeded = true;
        }

        if self.has(attribute::PMAX) && self.attributes.pmax > 0 {
            self.pmax_timer
                .start(now, Duration::from_secs(u64::from(self.attributes.pmax)));
        }
    }

    fn check_attribute_validity(&self) -> bool {
        let a = &self.attributes;
        if self.has(attribute::PMIN | attribute::PMAX) && a.pmax > 0 && a.pmin > a.pmax {
            return false;
        }
        if self.has(attribute::GT | attribute::LT) && a.lt + 2.0 * a.st >= a.gt {
            return false;
        }
        true
    }

    fn check_threshold_values(&self) -> bool {
        if self.has(attribute::ST) {
            let st = self.attributes.st;
            if self.current_value >= self.last_value + st
                || self.current_value <= self.last_value - st
            {
                return true;
            }
            if self.has(attribute::LT) || self.has(attribute::GT) {
                return self.check_gt_lt_params();
            }
            return false;
        }
        self.check_gt_lt_params()
    }

    fn check_gt_lt_params(&self) -> bool {
        let value = self.current_value;
        match (self.has(attribute::GT), self.has(attribute::LT)) {
            (true, true) => value > self.attributes.gt || value < self.attributes.lt,
            (true, false) => value > self.attributes.gt,
            (false, true) => value < self.attributes.lt,
            (false, false) => true,
        }
    }

    fn set_default_values(&mut self) {
        self.attributes = Attributes::default();
        self.notify = false;
        self.forced_change = false;
        self.pmin_exceeded = false;
        self.pmax_exceeded = false;
        self.report_ready = false;
        self.changed_instance_ids.clear();
        self.pmin_timer.stop();
        self.pmax_timer.stop();
    }
}

fn parse_float(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

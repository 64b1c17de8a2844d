//! OMA-TLV codec for the resource tree
//!
//! Every record is a type byte, a 1 or 2 byte identifier, an optional 1 to 3
//! byte length and the value. Values are the stored byte buffers of the
//! tree, so a serialize/deserialize cycle is byte-exact.
//!
//! Deserialization runs in two passes over the same input: the first pass
//! only validates, the second applies. A payload that fails validation
//! leaves the tree untouched.

use std::collections::BTreeSet;
use std::time::Instant;

use crate::base::{Mode, Operation};
use crate::error::TlvError;
use crate::object::Object;
use crate::object_instance::ObjectInstance;
use crate::resource::Resource;

// =============================================================================
// Header bits
// =============================================================================

const TYPE_MASK: u8 = 0xC0;
const ID16: u8 = 0x20;
const LENGTH_TYPE_MASK: u8 = 0x18;
const LENGTH_8: u8 = 0x08;
const LENGTH_16: u8 = 0x10;
const LENGTH_24: u8 = 0x18;
const INLINE_LENGTH_MASK: u8 = 0x07;

/// Largest value a 3-byte length can describe
pub const MAX_VALUE_LENGTH: usize = 0xFF_FFFF;

/// Record type, the top two bits of the type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlvType {
    ObjectInstance,
    ResourceInstance,
    MultipleResource,
    Resource,
}

impl TlvType {
    pub fn bits(self) -> u8 {
        match self {
            TlvType::ObjectInstance => 0x00,
            TlvType::ResourceInstance => 0x40,
            TlvType::MultipleResource => 0x80,
            TlvType::Resource => 0xC0,
        }
    }

    fn from_bits(byte: u8) -> Self {
        match byte & TYPE_MASK {
            0x00 => TlvType::ObjectInstance,
            0x40 => TlvType::ResourceInstance,
            0x80 => TlvType::MultipleResource,
            _ => TlvType::Resource,
        }
    }
}

/// How a decoded payload is applied to the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Write existing nodes only; unknown ids fail with `NotFound`
    Put,
    /// Create missing resources and resource instances
    Post,
}

// =============================================================================
// Record reader / writer
// =============================================================================

/// One decoded record borrowing its value from the input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlvRecord<'a> {
    pub kind: TlvType,
    pub id: u16,
    pub value: &'a [u8],
}

/// Cursor over a buffer of consecutive records
#[derive(Debug, Clone)]
pub struct TlvReader<'a> {
    data: &'a [u8],
    failed: bool,
}

impl<'a> TlvReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            failed: false,
        }
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], TlvError> {
        if self.data.len() < count {
            return Err(TlvError::NotValid);
        }
        let (head, rest) = self.data.split_at(count);
        self.data = rest;
        Ok(head)
    }

    fn read_record(&mut self) -> Result<TlvRecord<'a>, TlvError> {
        let type_byte = self.take(1)?[0];

        let id = if type_byte & ID16 != 0 {
            let bytes = self.take(2)?;
            u16::from_be_bytes([bytes[0], bytes[1]])
        } else {
            u16::from(self.take(1)?[0])
        };

        let length = match type_byte & LENGTH_TYPE_MASK {
            LENGTH_8 => usize::from(self.take(1)?[0]),
            LENGTH_16 => {
                let bytes = self.take(2)?;
                usize::from(u16::from_be_bytes([bytes[0], bytes[1]]))
            }
            LENGTH_24 => {
                let bytes = self.take(3)?;
                (usize::from(bytes[0]) << 16) | (usize::from(bytes[1]) << 8) | usize::from(bytes[2])
            }
            _ => usize::from(type_byte & INLINE_LENGTH_MASK),
        };

        Ok(TlvRecord {
            kind: TlvType::from_bits(type_byte),
            id,
            value: self.take(length)?,
        })
    }
}

impl<'a> Iterator for TlvReader<'a> {
    type Item = Result<TlvRecord<'a>, TlvError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() || self.failed {
            return None;
        }
        let record = self.read_record();
        self.failed = record.is_err();
        Some(record)
    }
}

/// Decode every record of a buffer, failing on the first malformed one
pub fn read_records(data: &[u8]) -> Result<Vec<TlvRecord<'_>>, TlvError> {
    TlvReader::new(data).collect()
}

/// Append one record to `out`
pub fn encode_record(
    kind: TlvType,
    id: u16,
    value: &[u8],
    out: &mut Vec<u8>,
) -> Result<(), TlvError> {
    let length = value.len();
    if length > MAX_VALUE_LENGTH {
        return Err(TlvError::NotValid);
    }

    let mut type_byte = kind.bits();
    if id > 0xFF {
        type_byte |= ID16;
    }
    type_byte |= match length {
        0..=7 => length as u8,
        8..=0xFF => LENGTH_8,
        0x100..=0xFFFF => LENGTH_16,
        _ => LENGTH_24,
    };

    out.push(type_byte);
    if id > 0xFF {
        out.extend_from_slice(&id.to_be_bytes());
    } else {
        out.push(id as u8);
    }
    match type_byte & LENGTH_TYPE_MASK {
        LENGTH_8 => out.push(length as u8),
        LENGTH_16 => out.extend_from_slice(&(length as u16).to_be_bytes()),
        LENGTH_24 => out.extend_from_slice(&(length as u32).to_be_bytes()[1..]),
        _ => {}
    }
    out.extend_from_slice(value);
    Ok(())
}

/// True when the payload starts with an Object Instance record
pub fn is_object_instance(data: &[u8]) -> bool {
    data.first()
        .is_some_and(|b| TlvType::from_bits(*b) == TlvType::ObjectInstance)
}

/// Id of the first record in the payload
pub fn instance_id(data: &[u8]) -> Option<u16> {
    TlvReader::new(data).next()?.ok().map(|record| record.id)
}

// =============================================================================
// Serialization
// =============================================================================

fn numeric_id(name_id: i32) -> Result<u16, TlvError> {
    u16::try_from(name_id).map_err(|_| TlvError::NotValid)
}

/// Serialize every instance of an object as Object Instance records
pub fn serialize_object_instances(object: &Object) -> Result<Vec<u8>, TlvError> {
    let mut out = Vec::new();
    for instance in object.object_instances() {
        let resources = serialize_resources(instance)?;
        encode_record(TlvType::ObjectInstance, instance.instance_id(), &resources, &mut out)?;
    }
    Ok(out)
}

/// Serialize the readable resources of an instance
pub fn serialize_resources(instance: &ObjectInstance) -> Result<Vec<u8>, TlvError> {
    let mut out = Vec::new();
    for resource in instance.resources() {
        if !resource.base().operation().contains(Operation::GET) {
            continue;
        }
        append_resource(resource, &mut out)?;
    }
    Ok(out)
}

/// Serialize a single resource (one record, nested for multiple resources)
pub fn serialize_resource(resource: &Resource) -> Result<Vec<u8>, TlvError> {
    let mut out = Vec::new();
    append_resource(resource, &mut out)?;
    Ok(out)
}

fn append_resource(resource: &Resource, out: &mut Vec<u8>) -> Result<(), TlvError> {
    let id = numeric_id(resource.base().name_id())?;
    if !resource.supports_multiple_instances() {
        return encode_record(TlvType::Resource, id, resource.value(), out);
    }

    let mut nested = Vec::new();
    for instance in resource.resource_instances() {
        encode_record(
            TlvType::ResourceInstance,
            instance.instance_id(),
            instance.value(),
            &mut nested,
        )?;
    }
    encode_record(TlvType::MultipleResource, id, &nested, out)
}

// =============================================================================
// Deserialization
// =============================================================================

fn check_writable(resource: &Resource) -> Result<(), TlvError> {
    if !resource.base().operation().contains(Operation::PUT) || resource.base().mode() == Mode::Static
    {
        return Err(TlvError::NotAllowed);
    }
    Ok(())
}

/// Validate nested Resource Instance records against a resource
fn validate_resource_instances(
    data: &[u8],
    resource: Option<&Resource>,
    mode: WriteMode,
) -> Result<(), TlvError> {
    for record in read_records(data)? {
        if record.kind != TlvType::ResourceInstance {
            return Err(TlvError::NotValid);
        }
        let known = resource.is_some_and(|r| r.resource_instance(record.id).is_some());
        if mode == WriteMode::Put && !known {
            return Err(TlvError::NotFound);
        }
    }
    Ok(())
}

/// Validate one Resource / Multiple Resource record against an instance
fn validate_resource_record(
    record: &TlvRecord<'_>,
    instance: &ObjectInstance,
    mode: WriteMode,
) -> Result<(), TlvError> {
    if !matches!(record.kind, TlvType::Resource | TlvType::MultipleResource) {
        return Err(TlvError::NotValid);
    }
    let resource = instance.resource_by_id(record.id);
    match resource {
        Some(resource) => {
            check_writable(resource)?;
            let multiple = record.kind == TlvType::MultipleResource;
            if multiple != resource.supports_multiple_instances() {
                return Err(TlvError::NotValid);
            }
        }
        None if mode == WriteMode::Put => return Err(TlvError::NotFound),
        None => {}
    }
    if record.kind == TlvType::MultipleResource {
        validate_resource_instances(record.value, resource, mode)?;
    }
    Ok(())
}

/// Validate the Resource / Multiple Resource records of one instance
///
/// An id may appear only once per payload.
fn validate_resource_records(
    records: &[TlvRecord<'_>],
    instance: &ObjectInstance,
    mode: WriteMode,
) -> Result<(), TlvError> {
    let mut seen = BTreeSet::new();
    for record in records {
        if !seen.insert(record.id) {
            log::debug!("Resource {} repeated in TLV payload", record.id);
            return Err(TlvError::NotValid);
        }
        validate_resource_record(record, instance, mode)?;
    }
    Ok(())
}

fn apply_resource_instances(data: &[u8], resource: &mut Resource, now: Instant) -> Result<(), TlvError> {
    for record in read_records(data)? {
        if resource.resource_instance(record.id).is_none() {
            let kind = resource.resource_type();
            resource.create_resource_instance(kind, record.id);
        }
        resource.write_instance_value(record.id, record.value, now);
    }
    Ok(())
}

fn apply_resource_record(
    record: &TlvRecord<'_>,
    instance: &mut ObjectInstance,
    now: Instant,
) -> Result<(), TlvError> {
    let multiple = record.kind == TlvType::MultipleResource;
    if instance.resource_by_id(record.id).is_none() {
        instance.create_server_resource(record.id, multiple);
    }
    let resource = instance
        .resource_by_id_mut(record.id)
        .ok_or(TlvError::NotValid)?;
    if multiple {
        apply_resource_instances(record.value, resource, now)
    } else {
        resource.write_value(record.value, now);
        Ok(())
    }
}

/// Write a list of Resource / Multiple Resource records into an instance
pub fn deserialize_resources(
    data: &[u8],
    instance: &mut ObjectInstance,
    mode: WriteMode,
    now: Instant,
) -> Result<(), TlvError> {
    let records = read_records(data)?;
    validate_resource_records(&records, instance, mode)?;
    for record in &records {
        apply_resource_record(record, instance, now)?;
    }
    Ok(())
}

/// Write Object Instance records into existing instances of an object
pub fn deserialize_object_instances(
    data: &[u8],
    object: &mut Object,
    mode: WriteMode,
    now: Instant,
) -> Result<(), TlvError> {
    let records = read_records(data)?;
    for record in &records {
        if record.kind != TlvType::ObjectInstance {
            return Err(TlvError::NotValid);
        }
        let instance = object
            .object_instance(record.id)
            .ok_or(TlvError::NotFound)?;
        validate_resource_records(&read_records(record.value)?, instance, mode)?;
    }
    for record in &records {
        let instance = object
            .object_instance_mut(record.id)
            .ok_or(TlvError::NotFound)?;
        for nested in read_records(record.value)? {
            apply_resource_record(&nested, instance, now)?;
        }
    }
    Ok(())
}

/// Write a payload addressed to one resource
///
/// Accepts a single Resource / Multiple Resource record carrying the
/// resource's own id, or (for multiple resources) a bare list of Resource
/// Instance records.
pub fn deserialize_resource(
    data: &[u8],
    resource: &mut Resource,
    mode: WriteMode,
    now: Instant,
) -> Result<(), TlvError> {
    check_writable(resource)?;
    let records = read_records(data)?;
    let Some(first) = records.first() else {
        return Err(TlvError::NotValid);
    };

    if first.kind == TlvType::ResourceInstance {
        return deserialize_resource_instances(data, resource, mode, now);
    }

    let id = numeric_id(resource.base().name_id())?;
    if records.len() != 1 {
        return Err(TlvError::NotValid);
    }
    if first.id != id {
        return Err(TlvError::NotFound);
    }
    match (first.kind, resource.supports_multiple_instances()) {
        (TlvType::Resource, false) => {
            resource.write_value(first.value, now);
            Ok(())
        }
        (TlvType::MultipleResource, true) => {
            deserialize_resource_instances(first.value, resource, mode, now)
        }
        _ => Err(TlvError::NotValid),
    }
}

/// Write a list of Resource Instance records into a multiple resource
pub fn deserialize_resource_instances(
    data: &[u8],
    resource: &mut Resource,
    mode: WriteMode,
    now: Instant,
) -> Result<(), TlvError> {
    check_writable(resource)?;
    if !resource.supports_multiple_instances() {
        return Err(TlvError::NotValid);
    }
    validate_resource_instances(data, Some(resource), mode)?;
    apply_resource_instances(data, resource, now)
}

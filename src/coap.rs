//! CoAP request/response model used by the tree handlers
//!
//! Tree nodes never see `coap_lite` packets directly. The client converts
//! inbound packets into an [`Lwm2mRequest`] and turns the returned
//! [`Lwm2mResponse`] back into a packet for the wire.

use coap_lite::{CoapOption, MessageClass, MessageType, Packet, RequestType, ResponseType};

/// CoAP Content-Format numbers used by LWM2M
pub mod content_format {
    pub const TEXT_PLAIN: u16 = 0;
    pub const LINK_FORMAT: u16 = 40;
    pub const OCTET_STREAM: u16 = 42;
    pub const OMA_TLV: u16 = 11542;
    pub const OMA_JSON: u16 = 11543;
}

/// Observe option value that registers an observation
pub const OBSERVE_REGISTER: u32 = 0;

/// Observe option value that cancels an observation
pub const OBSERVE_DEREGISTER: u32 = 1;

/// Request methods the tree understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
}

impl Method {
    fn from_request_type(request_type: RequestType) -> Option<Self> {
        match request_type {
            RequestType::Get => Some(Method::Get),
            RequestType::Put => Some(Method::Put),
            RequestType::Post => Some(Method::Post),
            RequestType::Delete => Some(Method::Delete),
            _ => None,
        }
    }
}

/// Inbound request addressed to the resource tree
#[derive(Debug, Clone, PartialEq)]
pub struct Lwm2mRequest {
    pub method: Method,
    pub path: Vec<String>,
    pub query: Option<String>,
    pub payload: Vec<u8>,
    pub content_format: Option<u16>,
    pub accept: Option<u16>,
    pub observe: Option<u32>,
    pub token: Vec<u8>,
}

impl Lwm2mRequest {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: split_path(path),
            query: None,
            payload: Vec::new(),
            content_format: None,
            accept: None,
            observe: None,
            token: Vec::new(),
        }
    }

    pub fn with_payload(mut self, payload: &[u8], content_format: Option<u16>) -> Self {
        self.payload = payload.to_vec();
        self.content_format = content_format;
        self
    }

    pub fn with_query(mut self, query: &str) -> Self {
        self.query = Some(query.to_string());
        self
    }

    pub fn with_observe(mut self, observe: u32, token: &[u8]) -> Self {
        self.observe = Some(observe);
        self.token = token.to_vec();
        self
    }

    pub fn with_accept(mut self, accept: u16) -> Self {
        self.accept = Some(accept);
        self
    }

    /// Build from a request packet; returns None for non-request messages
    /// or methods outside GET/PUT/POST/DELETE
    pub fn from_packet(packet: &Packet) -> Option<Self> {
        let method = match packet.header.code {
            MessageClass::Request(request_type) => Method::from_request_type(request_type)?,
            _ => return None,
        };

        let path = option_values(packet, CoapOption::UriPath)
            .into_iter()
            .filter_map(|segment| String::from_utf8(segment).ok())
            .filter(|segment| !segment.is_empty())
            .collect();

        let query_parts: Vec<String> = option_values(packet, CoapOption::UriQuery)
            .into_iter()
            .filter_map(|part| String::from_utf8(part).ok())
            .collect();
        let query = (!query_parts.is_empty()).then(|| query_parts.join("&"));

        Some(Self {
            method,
            path,
            query,
            payload: packet.payload.clone(),
            content_format: first_uint(packet, CoapOption::ContentFormat).map(|v| v as u16),
            accept: first_uint(packet, CoapOption::Accept).map(|v| v as u16),
            observe: first_uint(packet, CoapOption::Observe),
            token: packet.get_token().to_vec(),
        })
    }

    /// Path joined with `/`, without a leading slash
    pub fn path_string(&self) -> String {
        self.path.join("/")
    }

    /// Format asked for by the requester: Accept first, then Content-Format
    pub fn requested_format(&self) -> Option<u16> {
        self.accept.or(self.content_format)
    }

    /// Non-empty write-attributes query, if any
    pub fn attribute_query(&self) -> Option<&str> {
        self.query.as_deref().filter(|q| !q.is_empty())
    }
}

/// Outgoing response produced by a tree handler
#[derive(Debug, Clone, PartialEq)]
pub struct Lwm2mResponse {
    pub code: ResponseType,
    pub payload: Vec<u8>,
    pub content_format: Option<u16>,
    pub observe: Option<u16>,
    pub location_path: Vec<String>,
    pub max_age: Option<u32>,
    /// Answer with an empty ACK now, the real response follows separately
    pub delayed: bool,
}

impl Lwm2mResponse {
    pub fn new(code: ResponseType) -> Self {
        Self {
            code,
            payload: Vec::new(),
            content_format: None,
            observe: None,
            location_path: Vec::new(),
            max_age: None,
            delayed: false,
        }
    }

    pub fn content(payload: Vec<u8>, content_format: u16) -> Self {
        let mut response = Self::new(ResponseType::Content);
        response.payload = payload;
        response.content_format = Some(content_format);
        response
    }

    pub fn changed() -> Self {
        Self::new(ResponseType::Changed)
    }

    pub fn created(location: &str) -> Self {
        let mut response = Self::new(ResponseType::Created);
        response.location_path = split_path(location);
        response
    }

    pub fn delayed() -> Self {
        let mut response = Self::new(ResponseType::Changed);
        response.delayed = true;
        response
    }

    pub fn with_max_age(mut self, max_age: u32) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.code,
            ResponseType::Created
                | ResponseType::Deleted
                | ResponseType::Valid
                | ResponseType::Changed
                | ResponseType::Content
        )
    }

    /// Serialize into a packet with the given header fields
    pub fn to_packet(&self, message_type: MessageType, message_id: u16, token: &[u8]) -> Packet {
        let mut packet = Packet::new();
        packet.header.set_type(message_type);
        packet.header.message_id = message_id;
        packet.header.code = MessageClass::Response(self.code);
        packet.set_token(token.to_vec());

        if let Some(observe) = self.observe {
            packet.add_option(CoapOption::Observe, encode_observe(observe));
        }
        for segment in &self.location_path {
            packet.add_option(CoapOption::LocationPath, segment.as_bytes().to_vec());
        }
        if let Some(format) = self.content_format {
            packet.add_option(CoapOption::ContentFormat, encode_uint(u32::from(format)));
        }
        if let Some(max_age) = self.max_age {
            packet.add_option(CoapOption::MaxAge, encode_uint(max_age));
        }
        packet.payload = self.payload.clone();
        packet
    }
}

/// A due observation report, ready to be sent non-confirmable
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub path: String,
    pub token: Vec<u8>,
    pub response: Lwm2mResponse,
}

impl Notification {
    /// Build the notification for a node whose scheduler produced a report
    pub(crate) fn new(
        base: &mut crate::base::Base,
        payload: Vec<u8>,
        content_format: u16,
    ) -> Option<Self> {
        let token = base.observation_token()?.to_vec();
        let mut response = Lwm2mResponse::content(payload, content_format).with_max_age(base.max_age());
        response.observe = Some(base.next_observation_number());
        Some(Self {
            path: base.uri_path().to_string(),
            token,
            response,
        })
    }
}

/// Split a `/`-separated path into its non-empty segments
pub fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// Encode a CoAP uint option in the minimal number of bytes
pub fn encode_uint(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    bytes[skip..].to_vec()
}

/// Decode a CoAP uint option (big-endian, up to 4 bytes)
pub fn decode_uint(bytes: &[u8]) -> Option<u32> {
    if bytes.len() > 4 {
        return None;
    }
    Some(bytes.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
}

/// Encode an observation number as 1 or 2 big-endian bytes
pub fn encode_observe(number: u16) -> Vec<u8> {
    if number <= 0xFF {
        vec![number as u8]
    } else {
        number.to_be_bytes().to_vec()
    }
}

/// All values of an option in packet order
pub fn option_values(packet: &Packet, option: CoapOption) -> Vec<Vec<u8>> {
    packet
        .get_option(option)
        .map(|values| values.iter().cloned().collect())
        .unwrap_or_default()
}

/// First value of a uint option
pub fn first_uint(packet: &Packet, option: CoapOption) -> Option<u32> {
    packet
        .get_option(option)
        .and_then(|values| values.iter().next().and_then(|v| decode_uint(v)))
}

/// Location-Path options joined with `/`
pub fn location_path(packet: &Packet) -> Option<String> {
    let segments: Vec<String> = option_values(packet, CoapOption::LocationPath)
        .into_iter()
        .filter_map(|segment| String::from_utf8(segment).ok())
        .collect();
    (!segments.is_empty()).then(|| segments.join("/"))
}

/// Build a confirmable or non-confirmable request packet
pub fn request_packet(
    request_type: RequestType,
    message_type: MessageType,
    message_id: u16,
    token: &[u8],
    path: &str,
    query: &[String],
) -> Packet {
    let mut packet = Packet::new();
    packet.header.set_type(message_type);
    packet.header.message_id = message_id;
    packet.header.code = MessageClass::Request(request_type);
    packet.set_token(token.to_vec());
    for segment in split_path(path) {
        packet.add_option(CoapOption::UriPath, segment.into_bytes());
    }
    for part in query {
        packet.add_option(CoapOption::UriQuery, part.as_bytes().to_vec());
    }
    packet
}

/// Empty ACK matching a confirmable request
pub fn empty_ack(message_id: u16) -> Packet {
    let mut packet = Packet::new();
    packet.header.set_type(MessageType::Acknowledgement);
    packet.header.message_id = message_id;
    packet.header.code = MessageClass::Empty;
    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uint_encoding() {
        assert_eq!(encode_uint(0), Vec::<u8>::new());
        assert_eq!(encode_uint(60), vec![60]);
        assert_eq!(encode_uint(11542), vec![0x2D, 0x16]);
        assert_eq!(decode_uint(&[0x2D, 0x16]), Some(11542));
        assert_eq!(decode_uint(&[]), Some(0));
        assert_eq!(decode_uint(&[1, 2, 3, 4, 5]), None);
    }

    #[test]
    fn test_observe_encoding_minimal_width() {
        assert_eq!(encode_observe(0), vec![0]);
        assert_eq!(encode_observe(1), vec![1]);
        assert_eq!(encode_observe(255), vec![0xFF]);
        assert_eq!(encode_observe(256), vec![0x01, 0x00]);
        assert_eq!(encode_observe(0xFFFF), vec![0xFF, 0xFF]);
    }

    #[test]
    fn test_request_from_packet() {
        let mut packet = request_packet(
            RequestType::Put,
            MessageType::Confirmable,
            7,
            &[0xAA],
            "/3/0/1",
            &["pmin=5".to_string(), "pmax=10".to_string()],
        );
        packet.add_option(CoapOption::ContentFormat, encode_uint(42));
        packet.payload = b"12".to_vec();

        let request = Lwm2mRequest::from_packet(&packet).unwrap();
        assert_eq!(request.method, Method::Put);
        assert_eq!(request.path_string(), "3/0/1");
        assert_eq!(request.attribute_query(), Some("pmin=5&pmax=10"));
        assert_eq!(request.content_format, Some(42));
        assert_eq!(request.token, vec![0xAA]);
        assert_eq!(request.payload, b"12".to_vec());
    }

    #[test]
    fn test_response_packet_options() {
        let mut response = Lwm2mResponse::content(b"42".to_vec(), content_format::TEXT_PLAIN)
            .with_max_age(60);
        response.observe = Some(1);

        let packet = response.to_packet(MessageType::Acknowledgement, 9, &[1, 2]);
        assert_eq!(packet.header.message_id, 9);
        assert_eq!(packet.get_token(), &[1, 2]);
        assert_eq!(first_uint(&packet, CoapOption::Observe), Some(1));
        assert_eq!(first_uint(&packet, CoapOption::MaxAge), Some(60));
        assert_eq!(first_uint(&packet, CoapOption::ContentFormat), Some(0));
    }

    #[test]
    fn test_created_location() {
        let response = Lwm2mResponse::created("/1000/3");
        let packet = response.to_packet(MessageType::Acknowledgement, 1, &[]);
        assert_eq!(location_path(&packet), Some("1000/3".to_string()));
    }
}

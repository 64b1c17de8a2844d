//! lwm2m-client: core of an LWM2M client over CoAP
//!
//! The crate keeps a tree of Objects, Object Instances, Resources and
//! Resource Instances, serves the device management interface against it
//! and runs the registration interface towards one management server.
//!
//! # Key Features
//!
//! - **Resource tree**: typed nodes with per-node operation masks, static and
//!   dynamic resources, multiple-instance resources and Execute callbacks
//!
//! - **OMA-TLV**: serialization of any subtree and validated two-pass writes,
//!   so a rejected payload never leaves a half-applied tree
//!
//! - **Observation**: `pmin`, `pmax`, `gt`, `lt` and `st` write attributes
//!   with notifications scheduled per observed node
//!
//! - **Registration**: register, periodic update, deregister, timeouts and
//!   optional bootstrap (`bootstrap` feature)
//!
//! The engine is sans-IO: datagrams leave through a [`Transport`] and come
//! back through [`Lwm2mClient::handle_packet`], and every timer is driven by
//! the `now` passed to [`Lwm2mClient::process`].
//!
//! # Example
//!
//! ```no_run
//! use lwm2m_client::{Endpoint, Lwm2mClient, Object, Observer, ResourceType, Security, SecurityMode, Transport};
//! use std::time::Instant;
//!
//! struct Udp(std::net::UdpSocket);
//!
//! impl Transport for Udp {
//!     fn send(&mut self, data: &[u8]) -> std::io::Result<()> {
//!         self.0.send(data).map(|_| ())
//!     }
//! }
//!
//! struct Quiet;
//! impl Observer for Quiet {}
//!
//! let socket = std::net::UdpSocket::bind("0.0.0.0:0").unwrap();
//! socket.connect("127.0.0.1:5683").unwrap();
//!
//! let mut device = Object::new("3").unwrap();
//! let instance = device.create_object_instance(0).unwrap();
//! instance.create_static_resource("0", ResourceType::String, b"ACME", false);
//!
//! let endpoint = Endpoint::new("node-1").unwrap();
//! let security = Security::new("coap://127.0.0.1:5683", SecurityMode::NoSec);
//! let mut client = Lwm2mClient::new(endpoint, Some(security), Udp(socket), Quiet);
//! client.add_object(device).unwrap();
//! client.send_register_message(Instant::now()).unwrap();
//! ```

pub mod base;
#[cfg(feature = "bootstrap")]
pub mod bootstrap;
mod client;
pub mod coap;
mod config;
mod error;
pub mod node;
mod object;
mod object_instance;
mod observer;
pub mod registration;
pub mod report_handler;
mod resource;
pub mod security;
mod timer;
pub mod tlv;

pub use base::{Base, BaseType, Mode, ObservationLevel, Operation};
#[cfg(feature = "bootstrap")]
pub use bootstrap::BootstrapSession;
pub use client::{Lwm2mClient, DEFAULT_REQUEST_TIMEOUT};
pub use coap::{Lwm2mRequest, Lwm2mResponse, Method, Notification};
pub use config::ClientConfig;
pub use error::{Error, RegistrationError, Result, TlvError};
pub use node::NodeMut;
pub use object::Object;
pub use object_instance::ObjectInstance;
pub use observer::{Observer, Transport};
pub use registration::{BindingMode, Endpoint, RegistrationState};
pub use report_handler::{AttributeOutcome, ReportHandler};
pub use resource::{
    ExecuteCallback, ExecuteParams, Resource, ResourceInstance, ResourceType, ResourceValue,
};
pub use security::{Security, SecurityMode, ServerParams};
pub use timer::Timer;

//! A lightweight CoAP (RFC 7252) message codec with a small UDP
//! request/response engine, for talking to constrained devices such as
//! RIOT or OpenWSN motes.
//!
//! ## Overview
//! The codec half ([`Message`], [`CoapOption`], the registry in
//! [`OptionKind`]) builds, modifies and encodes/decodes CoAP messages
//! to/from their byte representation, and works in `#![no_std]`
//! environments with an allocator. The engine half ([`MessageSocket`],
//! [`CoapServer`], [`CoapClient`], behind the default `std` feature) puts a
//! non-blocking UDP socket under the codec and dispatches requests and
//! responses to application hooks from a single-threaded poll loop.
//!
//! ## Usage
//! ```rust
//! use coap_mote::{
//!     CoapOption, Message, MessageClass, MessageType, OptionKind,
//!     RequestType,
//! };
//!
//! let mut request = Message::new();
//! request.header.message_id = 0x6C29;
//! request.header.code = MessageClass::Request(RequestType::Get);
//! request.set_path("/ver");
//! assert_eq!(
//!     [0x40, 0x01, 0x6C, 0x29, 0xB3, 0x76, 0x65, 0x72],
//!     request.to_bytes().unwrap()[..]
//! );
//!
//! let response = Message::from_bytes(&[
//!     0x60, 0x45, 0x6C, 0x29, 0xC0, 0xFF, 0x30, 0x2E, 0x31,
//! ])
//! .unwrap();
//! assert_eq!(MessageType::Acknowledgement, response.header.message_type);
//! assert_eq!(Some("0.1"), response.payload_str());
//! ```
//!
//! A server exposes resources by registering method hooks:
//! ```no_run
//! use coap_mote::{CoapServer, PayloadValue};
//!
//! let mut server = CoapServer::new().unwrap();
//! server.register_for_get(|transfer| {
//!     if transfer.path.as_deref() == Some("/ver") {
//!         transfer.value = Some(PayloadValue::Text("0.1".into()));
//!     }
//!     Ok(())
//! });
//! server.start().unwrap();
//! ```

#![cfg_attr(not(feature = "std"), no_std)]

#[macro_use]
extern crate alloc;

#[macro_use]
mod log;

pub mod error;

mod event;
mod header;
mod message;
mod option;

#[cfg(feature = "std")]
mod client;
#[cfg(feature = "std")]
mod engine;
#[cfg(feature = "std")]
mod observe;
#[cfg(feature = "std")]
mod resource;
#[cfg(feature = "std")]
mod server;

pub use event::{EventHook, HandlerId};
pub use header::{
    Header, MessageClass, MessageType, RequestType, ResponseType,
};
pub use message::{
    MediaType, Message, MessageIdGenerator, PayloadValue,
};
pub use option::{CoapOption, OptionKind, OptionValue, ValueFormat};

#[cfg(feature = "std")]
pub use client::CoapClient;
#[cfg(feature = "std")]
pub use engine::{Inbound, MessageSocket, Rejected, SOCKET_BUFSIZE};
#[cfg(feature = "std")]
pub use observe::{Observer, ObserverTable};
#[cfg(feature = "std")]
pub use resource::ResourceTransfer;
#[cfg(feature = "std")]
pub use server::CoapServer;

/// The standard CoAP UDP port.
pub const COAP_PORT: u16 = 5683;

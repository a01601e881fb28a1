//! The value object passed between a dispatcher and the application.

use std::net::SocketAddr;

use crate::{
    header::ResponseType,
    message::{MediaType, Message, PayloadValue},
};

/// Carries one resource request between the server and the application.
///
/// The dispatcher fills in the request side (path, query, payload value,
/// source); the application fills in the value to return and, optionally,
/// the reply code and content format.
#[derive(Debug, Clone)]
pub struct ResourceTransfer {
    /// URI path of the resource, the `/`-joined Uri-Path options; `None`
    /// when the request carried no path.
    pub path: Option<String>,
    /// The `&`-joined Uri-Query options, when present.
    pub query: Option<String>,
    /// Typed payload of the request, or the value the application wants
    /// returned.
    pub value: Option<PayloadValue>,
    /// Content-Format for the reply payload; derived from `value` when
    /// left unset.
    pub content_format: Option<MediaType>,
    /// The peer this transfer talks to.
    pub source: SocketAddr,
    /// Reply code chosen by the application; the dispatcher applies the
    /// method default when left unset.
    pub result: Option<ResponseType>,
}

impl ResourceTransfer {
    /// Builds the request side of a transfer from an incoming message.
    pub fn from_message(message: &Message, source: SocketAddr) -> Self {
        ResourceTransfer {
            path: message.absolute_path(),
            query: message.uri_query(),
            value: None,
            content_format: None,
            source,
            result: None,
        }
    }
}

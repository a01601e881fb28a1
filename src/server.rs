//! The server dispatcher: maps incoming requests onto application hooks
//! and synthesizes the replies.

use std::{io, net::SocketAddr, time::Duration};

use mio::{Events, Interest, Poll, Token};

use crate::{
    engine::{Inbound, MessageSocket, Rejected},
    error::{HandlingError, MessageError, PayloadError},
    event::{EventHook, HandlerId},
    header::{MessageClass, MessageType, RequestType, ResponseType},
    message::{Message, MessageIdGenerator},
    observe::ObserverTable,
    resource::ResourceTransfer,
    COAP_PORT,
};

const SOCKET: Token = Token(0);

/// Server for CoAP requests. The resource interface is defined as needed
/// via events: register a handler for a method hook, and fill in the
/// [`ResourceTransfer`] it receives.
///
/// ```no_run
/// let mut server = coap_mote::CoapServer::new().unwrap();
/// server.register_for_get(|transfer| {
///     transfer.value = Some(coap_mote::PayloadValue::Text("0.1".into()));
///     Ok(())
/// });
/// server.start().unwrap();
/// ```
pub struct CoapServer {
    socket: MessageSocket,
    poll: Poll,
    events: Events,
    write_armed: bool,
    get_hook: EventHook<ResourceTransfer>,
    post_hook: EventHook<ResourceTransfer>,
    put_hook: EventHook<ResourceTransfer>,
    delete_hook: EventHook<ResourceTransfer>,
    observers: ObserverTable,
    message_ids: MessageIdGenerator,
}

impl CoapServer {
    /// Binds the standard CoAP port on the wildcard address.
    pub fn new() -> io::Result<CoapServer> {
        Self::with_port(COAP_PORT)
    }

    /// Binds `port` on the wildcard address.
    pub fn with_port(port: u16) -> io::Result<CoapServer> {
        Self::from_socket(MessageSocket::open(port, None)?)
    }

    /// Binds an explicit local address.
    pub fn bind(local: SocketAddr) -> io::Result<CoapServer> {
        Self::from_socket(MessageSocket::bind(local, None)?)
    }

    fn from_socket(mut socket: MessageSocket) -> io::Result<CoapServer> {
        let poll = Poll::new()?;
        poll.registry().register(
            socket.socket_mut(),
            SOCKET,
            Interest::READABLE,
        )?;

        Ok(CoapServer {
            socket,
            poll,
            events: Events::with_capacity(16),
            write_armed: false,
            get_hook: EventHook::new(),
            post_hook: EventHook::new(),
            put_hook: EventHook::new(),
            delete_hook: EventHook::new(),
            observers: ObserverTable::new(),
            message_ids: MessageIdGenerator::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Registers a handler for GET requests; also consulted for the value
    /// of observe notifications.
    pub fn register_for_get<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&mut ResourceTransfer) -> Result<(), HandlingError> + 'static,
    {
        self.get_hook.register(handler)
    }

    /// Registers a handler for POST requests.
    pub fn register_for_post<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&mut ResourceTransfer) -> Result<(), HandlingError> + 'static,
    {
        self.post_hook.register(handler)
    }

    /// Registers a handler for PUT requests.
    pub fn register_for_put<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&mut ResourceTransfer) -> Result<(), HandlingError> + 'static,
    {
        self.put_hook.register(handler)
    }

    /// Registers a handler for DELETE requests.
    pub fn register_for_delete<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&mut ResourceTransfer) -> Result<(), HandlingError> + 'static,
    {
        self.delete_hook.register(handler)
    }

    /// Runs the poll loop until polling itself fails.
    pub fn start(&mut self) -> io::Result<()> {
        coap_info!("starting server loop on {:?}", self.socket.local_addr());
        loop {
            self.process(None)?;
        }
    }

    /// One scheduling turn: wait for socket readiness (bounded by
    /// `timeout`), drain incoming datagrams, dispatch them, flush replies.
    pub fn process(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.arm_interest()?;
        if let Err(error) = self.poll.poll(&mut self.events, timeout) {
            if error.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(error);
        }

        let mut readable = false;
        let mut writable = false;
        for event in self.events.iter() {
            if event.token() == SOCKET {
                readable |= event.is_readable();
                writable |= event.is_writable();
            }
        }

        if readable {
            while let Some(received) = self.socket.try_receive() {
                match received {
                    Ok(inbound) => self.dispatch(inbound),
                    Err(rejected) => self.reject(rejected),
                }
            }
        }
        if writable || self.socket.writable() {
            self.flush();
        }
        Ok(())
    }

    /// Emits a fresh notification to every observer of `path`, drawing the
    /// current value from the GET hook.
    pub fn notify_changed(&mut self, path: &str) {
        let sequence = match self.observers.next_sequence(path) {
            Some(sequence) => sequence,
            None => return,
        };

        let observers = self.observers.observers_of(path).to_vec();
        for observer in observers {
            let mut transfer = ResourceTransfer {
                path: Some(path.to_string()),
                query: None,
                value: None,
                content_format: None,
                source: observer.endpoint,
                result: None,
            };
            if let Err(error) = self.get_hook.trigger(&mut transfer) {
                coap_warn!("observe value handler failed: {}", error);
                continue;
            }

            let message_id = self.message_ids.next_id();
            let mut notification = Message::new();
            notification.header.message_type = MessageType::NonConfirmable;
            notification.header.code = MessageClass::Response(
                transfer.result.unwrap_or(ResponseType::Content),
            );
            notification.header.message_id = message_id;
            notification.set_token(observer.token.clone());
            notification.set_observe(u64::from(sequence));
            attach_payload(&mut notification, &transfer);

            self.socket.send(&notification, Some(observer.endpoint));
            self.observers.note_notification(
                path,
                observer.endpoint,
                message_id,
            );
        }
    }

    /// Releases the socket.
    pub fn close(self) {
        self.socket.close();
    }

    fn arm_interest(&mut self) -> io::Result<()> {
        let want_write = self.socket.writable();
        if want_write != self.write_armed {
            let interest = if want_write {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };
            self.poll.registry().reregister(
                self.socket.socket_mut(),
                SOCKET,
                interest,
            )?;
            self.write_armed = want_write;
        }
        Ok(())
    }

    fn flush(&mut self) {
        for endpoint in self.socket.drive_transmit() {
            // A peer we cannot reach keeps no observe registrations.
            self.observers.remove_endpoint(endpoint);
        }
    }

    fn dispatch(&mut self, inbound: Inbound) {
        let Inbound { message, source } = inbound;

        if message.header.message_type == MessageType::Reset {
            self.observers
                .handle_reset(source, message.header.message_id);
            return;
        }

        match message.header.code {
            MessageClass::Request(method) => {
                if message.header.message_type
                    == MessageType::Acknowledgement
                {
                    // A request code on an acknowledgement is anomalous.
                    self.send_reset(message.header.message_id, source);
                    return;
                }
                self.serve(method, &message, source);
            }
            MessageClass::Reserved(code) if code >> 5 == 0 => {
                coap_info!(
                    "unknown request method {} from {}",
                    code & 0x1F,
                    source
                );
                let mut reply = self.reply_template(&message);
                reply.header.code =
                    MessageClass::Response(ResponseType::MethodNotAllowed);
                self.socket.send(&reply, Some(source));
            }
            _ => {
                coap_debug!("ignoring non-request from {}", source);
            }
        }
    }

    fn serve(
        &mut self,
        method: RequestType,
        request: &Message,
        source: SocketAddr,
    ) {
        coap_debug!(
            "handling {} {:?} from {}",
            request.header.code,
            request.absolute_path(),
            source
        );
        let mut transfer = ResourceTransfer::from_message(request, source);

        let mut registered = false;
        if method == RequestType::Get {
            match (request.observe(), transfer.path.as_deref()) {
                (Some(0), Some(path)) => {
                    self.observers.register(path, source, request.token());
                    registered = true;
                }
                (Some(1), Some(path)) => {
                    self.observers.deregister(path, source, request.token());
                }
                _ => {}
            }
        }

        let hook_result = match method {
            RequestType::Get => self.get_hook.trigger(&mut transfer),
            RequestType::Post | RequestType::Put | RequestType::Delete => {
                if !request.payload.is_empty() {
                    match request.typed_payload() {
                        Ok(value) => transfer.value = Some(value),
                        Err(error) => {
                            coap_info!(
                                "rejecting request payload from {}: {}",
                                source,
                                error
                            );
                            let status = match error {
                                PayloadError::UnsupportedFormat(_) => {
                                    ResponseType::UnsupportedContentFormat
                                }
                                PayloadError::Malformed(_) => {
                                    ResponseType::BadRequest
                                }
                            };
                            self.send_status(request, source, status);
                            return;
                        }
                    }
                }
                match method {
                    RequestType::Post => self.post_hook.trigger(&mut transfer),
                    RequestType::Put => self.put_hook.trigger(&mut transfer),
                    _ => self.delete_hook.trigger(&mut transfer),
                }
            }
        };

        let status = match hook_result {
            Ok(()) => transfer.result.unwrap_or(default_status(method)),
            Err(error) => {
                coap_warn!("application handler failed: {}", error);
                error.code
            }
        };

        let mut reply = self.reply_template(request);
        reply.header.code = MessageClass::Response(status);
        if registered {
            if let Some(sequence) = transfer
                .path
                .as_deref()
                .and_then(|path| self.observers.next_sequence(path))
            {
                reply.set_observe(u64::from(sequence));
            }
        }
        if method == RequestType::Get {
            attach_payload(&mut reply, &transfer);
        }
        self.socket.send(&reply, Some(source));
    }

    /// The reply skeleton: piggybacked ACK with the request's message ID
    /// for confirmable requests, NON with a fresh message ID otherwise;
    /// the token is always echoed.
    fn reply_template(&mut self, request: &Message) -> Message {
        let mut reply = Message::new();
        reply.set_token(request.token().to_vec());
        match request.header.message_type {
            MessageType::Confirmable => {
                reply.header.message_type = MessageType::Acknowledgement;
                reply.header.message_id = request.header.message_id;
            }
            _ => {
                reply.header.message_type = MessageType::NonConfirmable;
                reply.header.message_id = self.message_ids.next_id();
            }
        }
        reply
    }

    fn send_status(
        &mut self,
        request: &Message,
        source: SocketAddr,
        status: ResponseType,
    ) {
        let mut reply = self.reply_template(request);
        reply.header.code = MessageClass::Response(status);
        self.socket.send(&reply, Some(source));
    }

    fn send_reset(&mut self, message_id: u16, dest: SocketAddr) {
        coap_info!("resetting anomalous message {} from {}", message_id, dest);
        let mut reset = Message::new();
        reset.header.message_type = MessageType::Reset;
        reset.header.code = MessageClass::Empty;
        reset.header.message_id = message_id;
        self.socket.send(&reset, Some(dest));
    }

    fn reject(&mut self, rejected: Rejected) {
        let Rejected {
            error,
            source,
            header,
            token,
        } = rejected;

        // An unknown critical option on a confirmable request earns a 4.02
        // reply; everything else was already logged and dropped.
        if let (MessageError::BadOption(number), Some(header)) =
            (error, header)
        {
            if header.message_type == MessageType::Confirmable
                && matches!(header.code, MessageClass::Request(_))
            {
                coap_info!(
                    "replying 4.02 to {} for unknown critical option {}",
                    source,
                    number
                );
                let mut reply = Message::new();
                reply.header.message_type = MessageType::Acknowledgement;
                reply.header.code =
                    MessageClass::Response(ResponseType::BadOption);
                reply.header.message_id = header.message_id;
                reply.set_token(token);
                self.socket.send(&reply, Some(source));
            }
        }
    }
}

fn default_status(method: RequestType) -> ResponseType {
    match method {
        RequestType::Get => ResponseType::Content,
        RequestType::Post | RequestType::Put => ResponseType::Changed,
        RequestType::Delete => ResponseType::Deleted,
    }
}

fn attach_payload(reply: &mut Message, transfer: &ResourceTransfer) {
    let value = match &transfer.value {
        Some(value) => value,
        None => return,
    };
    reply.payload = value.to_bytes();
    if let Some(format) =
        transfer.content_format.or_else(|| value.media_type())
    {
        reply.set_content_format(format);
    }
}

//! The client dispatcher: sends requests and surfaces responses.

use std::{io, net::SocketAddr, time::Duration};

use mio::{Events, Interest, Poll, Token};

use crate::{
    engine::{Inbound, MessageSocket},
    error::HandlingError,
    event::{EventHook, HandlerId},
    message::{Message, MessageIdGenerator},
};

const SOCKET: Token = Token(0);

/// Client for CoAP requests. Like a CoAP server it binds a socket, usually
/// on the standard port; incoming responses are delivered to the response
/// hook without filtering, so matching a response to its request by token
/// is the caller's business.
pub struct CoapClient {
    socket: MessageSocket,
    poll: Poll,
    events: Events,
    write_armed: bool,
    response_hook: EventHook<Inbound>,
    message_ids: MessageIdGenerator,
}

impl CoapClient {
    /// Binds the wildcard address on `source_port` (0 for an ephemeral
    /// port); `remote` becomes the connected default destination.
    pub fn new(
        source_port: u16,
        remote: Option<SocketAddr>,
    ) -> io::Result<CoapClient> {
        Self::from_socket(MessageSocket::open(source_port, remote)?)
    }

    /// Binds an explicit local address.
    pub fn bind(
        local: SocketAddr,
        remote: Option<SocketAddr>,
    ) -> io::Result<CoapClient> {
        Self::from_socket(MessageSocket::bind(local, remote)?)
    }

    fn from_socket(mut socket: MessageSocket) -> io::Result<CoapClient> {
        let poll = Poll::new()?;
        poll.registry().register(
            socket.socket_mut(),
            SOCKET,
            Interest::READABLE,
        )?;

        Ok(CoapClient {
            socket,
            poll,
            events: Events::with_capacity(16),
            write_armed: false,
            response_hook: EventHook::new(),
            message_ids: MessageIdGenerator::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Subscribes to incoming responses.
    pub fn register_for_response<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&mut Inbound) -> Result<(), HandlingError> + 'static,
    {
        self.response_hook.register(handler)
    }

    /// The next sequential message ID for a new request.
    pub fn next_message_id(&mut self) -> u16 {
        self.message_ids.next_id()
    }

    /// Queues a message; `dest` falls back to the connected remote.
    pub fn send(&mut self, message: &Message, dest: Option<SocketAddr>) {
        self.socket.send(message, dest);
    }

    /// Runs the poll loop. Polls with a one second timeout so queued
    /// requests go out promptly even on a quiet socket.
    pub fn start(&mut self) -> io::Result<()> {
        coap_info!("starting client loop on {:?}", self.socket.local_addr());
        loop {
            self.process(Some(Duration::from_secs(1)))?;
        }
    }

    /// One scheduling turn: wait for socket readiness (bounded by
    /// `timeout`), deliver responses, flush queued requests.
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
                    Ok(mut inbound) => {
                        coap_debug!(
                            "handling response from {}",
                            inbound.source
                        );
                        if let Err(error) =
                            self.response_hook.trigger(&mut inbound)
                        {
                            coap_warn!("response handler failed: {}", error);
                        }
                    }
                    // Undecodable responses were logged by the engine and
                    // are dropped here.
                    Err(_) => {}
                }
            }
        }
        if writable || self.socket.writable() {
            let _ = self.socket.drive_transmit();
        }
        Ok(())
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
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        header::{MessageClass, MessageType, RequestType, ResponseType},
        message::PayloadValue,
        server::CoapServer,
    };
    use std::{cell::RefCell, rc::Rc, time::Instant};

    #[test]
    fn message_ids_are_sequential() {
        let mut client =
            CoapClient::bind("127.0.0.1:0".parse().unwrap(), None).unwrap();
        let first = client.next_message_id();
        let second = client.next_message_id();
        assert_ne!(0, first);
        assert_ne!(0, second);
        let expected = if first == u16::MAX { 1 } else { first + 1 };
        assert_eq!(expected, second);
    }

    #[test]
    fn request_and_response_over_loopback() {
        let server = CoapServer::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        server.register_for_get(|transfer| {
            transfer.value = Some(PayloadValue::Text("0.1".into()));
            Ok(())
        });
        let mut server = server;
        let server_addr = server.local_addr().unwrap();

        let mut client = CoapClient::bind(
            "127.0.0.1:0".parse().unwrap(),
            Some(server_addr),
        )
        .unwrap();
        let responses = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&responses);
        client.register_for_response(move |inbound| {
            seen.borrow_mut().push(inbound.message.clone());
            Ok(())
        });

        let message_id = client.next_message_id();
        let mut request = Message::new();
        request.header.message_type = MessageType::Confirmable;
        request.header.code = MessageClass::Request(RequestType::Get);
        request.header.message_id = message_id;
        request.set_token(vec![0x66]);
        request.set_path("/ver");
        client.send(&request, None);

        let deadline = Instant::now() + Duration::from_secs(5);
        while responses.borrow().is_empty() && Instant::now() < deadline {
            client.process(Some(Duration::from_millis(20))).unwrap();
            server.process(Some(Duration::from_millis(20))).unwrap();
        }

        let responses = responses.borrow();
        let response = responses.first().expect("no response arrived");
        assert_eq!(
            MessageType::Acknowledgement,
            response.header.message_type
        );
        assert_eq!(
            MessageClass::Response(ResponseType::Content),
            response.header.code
        );
        assert_eq!(message_id, response.header.message_id);
        assert_eq!(&[0x66], response.token());
        assert_eq!(Some("0.1"), response.payload_str());
    }
}

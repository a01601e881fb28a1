//! Non-blocking UDP transport for CoAP messages.
//!
//! [`MessageSocket`] pairs a datagram socket with an outbound FIFO and an
//! upcall hook for decoded messages. It does no waiting of its own: a host
//! poll loop (the dispatchers own one) watches the socket and calls
//! [`MessageSocket::try_receive`] and [`MessageSocket::drive_transmit`] on
//! readiness edges, asking for write readiness only while
//! [`MessageSocket::writable`] reports pending output.

use std::{
    collections::VecDeque,
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
};

use mio::net::UdpSocket;

use crate::{
    error::MessageError, event::EventHook, event::HandlerId, header::Header,
    message::Message,
};

/// Buffer size for a single received datagram. Larger datagrams are
/// truncated at the OS boundary and fail codec validation.
pub const SOCKET_BUFSIZE: usize = 1024;

/// Depth of the outbound FIFO; sends beyond this are dropped.
const OUTGOING_LIMIT: usize = 64;

/// A decoded datagram and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub message: Message,
    pub source: SocketAddr,
}

/// A datagram that failed decoding, with as much of the header as could be
/// recovered for an error reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejected {
    pub error: MessageError,
    pub source: SocketAddr,
    /// The fixed header, when it parsed far enough.
    pub header: Option<Header>,
    /// The token, when the header parsed and the token was intact.
    pub token: Vec<u8>,
}

/// Source and sink for network CoAP messages over one UDP socket.
pub struct MessageSocket {
    socket: UdpSocket,
    remote: Option<SocketAddr>,
    outgoing: VecDeque<(Vec<u8>, SocketAddr)>,
    receive_hook: EventHook<Inbound>,
}

impl MessageSocket {
    /// Binds the wildcard address on `local_port`; the address family
    /// follows `remote`, which also connects the socket and becomes the
    /// default destination.
    pub fn open(
        local_port: u16,
        remote: Option<SocketAddr>,
    ) -> io::Result<MessageSocket> {
        let local = match remote {
            Some(SocketAddr::V4(_)) => {
                SocketAddr::from((Ipv4Addr::UNSPECIFIED, local_port))
            }
            _ => SocketAddr::from((Ipv6Addr::UNSPECIFIED, local_port)),
        };
        Self::bind(local, remote)
    }

    /// Binds an explicit local address.
    pub fn bind(
        local: SocketAddr,
        remote: Option<SocketAddr>,
    ) -> io::Result<MessageSocket> {
        let socket = UdpSocket::bind(local)?;
        if let Some(addr) = remote {
            socket.connect(addr)?;
        }
        coap_info!("socket open on {:?}", socket.local_addr());

        Ok(MessageSocket {
            socket,
            remote,
            outgoing: VecDeque::new(),
            receive_hook: EventHook::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// The underlying socket, for registration with a poll loop.
    pub fn socket_mut(&mut self) -> &mut UdpSocket {
        &mut self.socket
    }

    /// Subscribes to decoded incoming messages.
    pub fn register_for_receive<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&mut Inbound) -> Result<(), crate::error::HandlingError>
            + 'static,
    {
        self.receive_hook.register(handler)
    }

    /// True while the outbound FIFO is non-empty; the poll loop asks for
    /// write readiness only in that case.
    pub fn writable(&self) -> bool {
        !self.outgoing.is_empty()
    }

    /// Serializes `message` and queues it for the next write opportunity.
    /// `dest` falls back to the connected remote. An encode failure, a
    /// missing destination or a full FIFO drops the message.
    pub fn send(&mut self, message: &Message, dest: Option<SocketAddr>) {
        let dest = match dest.or(self.remote) {
            Some(dest) => dest,
            None => {
                coap_warn!("no destination for outgoing message, dropping");
                return;
            }
        };
        if self.outgoing.len() >= OUTGOING_LIMIT {
            coap_warn!("outbound queue full, dropping message for {}", dest);
            return;
        }

        match message.to_bytes() {
            Ok(bytes) => {
                coap_debug!(
                    "queueing {} bytes for {}: {:02x?}",
                    bytes.len(),
                    dest,
                    bytes
                );
                self.outgoing.push_back((bytes, dest));
            }
            Err(error) => {
                coap_warn!("cannot encode outgoing message: {}", error);
            }
        }
    }

    /// Reads one datagram off the socket. Decoded messages fire the
    /// receive hook and come back as `Ok`; undecodable datagrams are
    /// logged and come back as `Err` with the recovered header, for the
    /// owning dispatcher to answer or ignore. `None` once the socket has
    /// no more data.
    pub fn try_receive(&mut self) -> Option<Result<Inbound, Rejected>> {
        let mut buf = [0u8; SOCKET_BUFSIZE];
        match self.socket.recv_from(&mut buf) {
            Ok((len, source)) => {
                coap_debug!(
                    "receive {} bytes from {}: {:02x?}",
                    len,
                    source,
                    &buf[..len]
                );
                match Message::from_bytes(&buf[..len]) {
                    Ok(message) => {
                        let mut inbound = Inbound { message, source };
                        if let Err(error) =
                            self.receive_hook.trigger(&mut inbound)
                        {
                            coap_warn!("receive handler failed: {}", error);
                        }
                        Some(Ok(inbound))
                    }
                    Err(error) => {
                        coap_warn!(
                            "dropping undecodable datagram from {}: {}",
                            source,
                            error
                        );
                        let (header, token) = Message::peek_header(&buf[..len]);
                        Some(Err(Rejected {
                            error,
                            source,
                            header,
                            token,
                        }))
                    }
                }
            }
            Err(ref error) if error.kind() == io::ErrorKind::WouldBlock => {
                None
            }
            Err(error) => {
                coap_error!("socket receive error: {}", error);
                None
            }
        }
    }

    /// Sends queued datagrams until the FIFO empties or the socket pushes
    /// back. Returns the destinations whose send failed outright, so the
    /// owner can drop state tied to them.
    pub fn drive_transmit(&mut self) -> Vec<SocketAddr> {
        let mut failed = Vec::new();
        while let Some((bytes, dest)) = self.outgoing.pop_front() {
            let result = match self.remote {
                Some(_) => self.socket.send(&bytes),
                None => self.socket.send_to(&bytes, dest),
            };
            match result {
                Ok(_) => {
                    coap_debug!("sent {} bytes to {}", bytes.len(), dest);
                }
                Err(error)
                    if error.kind() == io::ErrorKind::WouldBlock =>
                {
                    self.outgoing.push_front((bytes, dest));
                    break;
                }
                Err(error) => {
                    coap_warn!("send to {} failed: {}", dest, error);
                    failed.push(dest);
                }
            }
        }
        failed
    }

    /// Releases the socket and any queued output.
    pub fn close(self) {}

    #[cfg(test)]
    pub(crate) fn outgoing(&self) -> &VecDeque<(Vec<u8>, SocketAddr)> {
        &self.outgoing
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::header::{MessageClass, MessageType, RequestType};
    use std::{cell::RefCell, rc::Rc, thread, time::Duration};

    fn loopback_socket() -> MessageSocket {
        MessageSocket::bind("127.0.0.1:0".parse().unwrap(), None).unwrap()
    }

    fn ver_get() -> Message {
        let mut message = Message::new();
        message.header.message_id = 0x6C29;
        message.set_path("/ver");
        message
    }

    #[test]
    fn send_queues_encoded_bytes() {
        let mut socket = loopback_socket();
        assert!(!socket.writable());

        let dest = "127.0.0.1:5683".parse().unwrap();
        socket.send(&ver_get(), Some(dest));

        assert!(socket.writable());
        let (bytes, queued_dest) = socket.outgoing().front().unwrap();
        assert_eq!(
            &[0x40, 0x01, 0x6C, 0x29, 0xB3, 0x76, 0x65, 0x72],
            &bytes[..]
        );
        assert_eq!(dest, *queued_dest);
    }

    #[test]
    fn send_without_destination_drops() {
        let mut socket = loopback_socket();
        socket.send(&ver_get(), None);
        assert!(!socket.writable());
    }

    #[test]
    fn send_uses_connected_remote_as_default() {
        let receiver = loopback_socket();
        let remote = receiver.local_addr().unwrap();
        let mut socket =
            MessageSocket::bind("127.0.0.1:0".parse().unwrap(), Some(remote))
                .unwrap();

        socket.send(&ver_get(), None);
        assert!(socket.writable());
        assert_eq!(remote, socket.outgoing().front().unwrap().1);
    }

    #[test]
    fn queue_is_bounded() {
        let mut socket = loopback_socket();
        let dest = "127.0.0.1:5683".parse().unwrap();
        for _ in 0..OUTGOING_LIMIT + 5 {
            socket.send(&ver_get(), Some(dest));
        }
        assert_eq!(OUTGOING_LIMIT, socket.outgoing().len());
    }

    #[test]
    fn try_receive_on_idle_socket_returns_none() {
        let mut socket = loopback_socket();
        assert_eq!(None, socket.try_receive());
    }

    fn receive_with_retry(
        socket: &mut MessageSocket,
    ) -> Result<Inbound, Rejected> {
        for _ in 0..100 {
            if let Some(received) = socket.try_receive() {
                return received;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("no datagram arrived");
    }

    #[test]
    fn datagrams_decode_and_fire_the_hook() {
        let mut receiver = loopback_socket();
        let dest = receiver.local_addr().unwrap();
        let hook_paths = Rc::new(RefCell::new(Vec::new()));
        let paths = Rc::clone(&hook_paths);
        receiver.register_for_receive(move |inbound| {
            paths
                .borrow_mut()
                .push(inbound.message.absolute_path());
            Ok(())
        });

        let mut sender = loopback_socket();
        sender.send(&ver_get(), Some(dest));
        assert!(sender.drive_transmit().is_empty());

        let inbound = receive_with_retry(&mut receiver).unwrap();
        assert_eq!(
            MessageClass::Request(RequestType::Get),
            inbound.message.header.code
        );
        assert_eq!(0x6C29, inbound.message.header.message_id);
        assert_eq!(
            vec![Some("/ver".to_string())],
            *hook_paths.borrow()
        );
    }

    #[test]
    fn undecodable_datagram_is_rejected_with_header() {
        let mut receiver = loopback_socket();
        let dest = receiver.local_addr().unwrap();

        // Well-formed header, then an unknown critical option (9).
        let probe =
            mio::net::UdpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let raw = [0x41, 0x01, 0x12, 0x34, 0x66, 0x91, 0xAB];
        // A fresh mio socket may need a beat before the first send.
        for _ in 0..100 {
            match probe.send_to(&raw, dest) {
                Ok(_) => break,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => panic!("probe send failed: {}", e),
            }
        }

        let rejected = receive_with_retry(&mut receiver).unwrap_err();
        assert_eq!(MessageError::BadOption(9), rejected.error);
        let header = rejected.header.unwrap();
        assert_eq!(MessageType::Confirmable, header.message_type);
        assert_eq!(0x1234, header.message_id);
        assert_eq!(vec![0x66], rejected.token);
    }
}

//! Observer bookkeeping for the server's Observe exchanges.

use std::{collections::BTreeMap, net::SocketAddr};

/// The Observe counter wraps at 24 bits.
const SEQUENCE_MODULUS: u32 = 1 << 24;

/// An observer of one resource path.
#[derive(Debug, Clone, PartialEq)]
pub struct Observer {
    pub endpoint: SocketAddr,
    pub token: Vec<u8>,
    // Message ID of the last notification, to match an RST against.
    last_message_id: Option<u16>,
}

#[derive(Debug, Default)]
struct ObservedPath {
    observers: Vec<Observer>,
    sequence: u32,
}

/// Tracks which endpoints observe which paths, and the notification
/// sequence per path.
#[derive(Debug, Default)]
pub struct ObserverTable {
    resources: BTreeMap<String, ObservedPath>,
}

impl ObserverTable {
    pub fn new() -> ObserverTable {
        Default::default()
    }

    /// Registers `endpoint` as an observer of `path`, replacing a previous
    /// registration from the same endpoint.
    pub fn register(
        &mut self,
        path: &str,
        endpoint: SocketAddr,
        token: &[u8],
    ) {
        coap_info!("registering observer {} for {}", endpoint, path);
        let observer = Observer {
            endpoint,
            token: token.to_vec(),
            last_message_id: None,
        };

        let resource = self.resources.entry(path.to_string()).or_default();
        if let Some(position) = resource
            .observers
            .iter()
            .position(|o| o.endpoint == endpoint)
        {
            resource.observers[position] = observer;
        } else {
            resource.observers.push(observer);
        }
    }

    /// Removes the observer of `path` matching `endpoint` and `token`.
    pub fn deregister(
        &mut self,
        path: &str,
        endpoint: SocketAddr,
        token: &[u8],
    ) {
        if let Some(resource) = self.resources.get_mut(path) {
            let position = resource
                .observers
                .iter()
                .position(|o| o.endpoint == endpoint && o.token == token);
            if let Some(position) = position {
                coap_info!("deregistering observer {} for {}", endpoint, path);
                resource.observers.remove(position);
            }
        }
    }

    /// Drops every registration held by `endpoint`, for when the transport
    /// to it failed.
    pub fn remove_endpoint(&mut self, endpoint: SocketAddr) {
        for resource in self.resources.values_mut() {
            resource.observers.retain(|o| o.endpoint != endpoint);
        }
    }

    /// Drops the observer whose last notification `message_id` the peer
    /// answered with a reset.
    pub fn handle_reset(&mut self, endpoint: SocketAddr, message_id: u16) {
        for (path, resource) in self.resources.iter_mut() {
            let position = resource.observers.iter().position(|o| {
                o.endpoint == endpoint
                    && o.last_message_id == Some(message_id)
            });
            if let Some(position) = position {
                coap_info!(
                    "observer {} reset notification for {}",
                    endpoint,
                    path
                );
                resource.observers.remove(position);
            }
        }
    }

    /// Advances and returns the notification sequence for `path`, modulo
    /// 2^24. `None` when nothing observes the path.
    pub fn next_sequence(&mut self, path: &str) -> Option<u32> {
        let resource = self.resources.get_mut(path)?;
        if resource.observers.is_empty() {
            return None;
        }
        resource.sequence = (resource.sequence + 1) % SEQUENCE_MODULUS;
        Some(resource.sequence)
    }

    /// The observers of `path`.
    pub fn observers_of(&self, path: &str) -> &[Observer] {
        self.resources
            .get(path)
            .map(|resource| resource.observers.as_slice())
            .unwrap_or(&[])
    }

    /// Records the message ID of a notification just sent to `endpoint`.
    pub(crate) fn note_notification(
        &mut self,
        path: &str,
        endpoint: SocketAddr,
        message_id: u16,
    ) {
        if let Some(resource) = self.resources.get_mut(path) {
            for observer in &mut resource.observers {
                if observer.endpoint == endpoint {
                    observer.last_message_id = Some(message_id);
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn endpoint(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn register_and_list() {
        let mut table = ObserverTable::new();
        table.register("/temp", endpoint(1000), &[0x7D, 0x34]);

        let observers = table.observers_of("/temp");
        assert_eq!(1, observers.len());
        assert_eq!(endpoint(1000), observers[0].endpoint);
        assert!(table.observers_of("/other").is_empty());
    }

    #[test]
    fn reregister_replaces_token() {
        let mut table = ObserverTable::new();
        table.register("/temp", endpoint(1000), &[0x00]);
        table.register("/temp", endpoint(1000), &[0xFF]);

        let observers = table.observers_of("/temp");
        assert_eq!(1, observers.len());
        assert_eq!(vec![0xFF], observers[0].token);
    }

    #[test]
    fn deregister_matches_token() {
        let mut table = ObserverTable::new();
        table.register("/temp", endpoint(1000), &[0x01]);

        table.deregister("/temp", endpoint(1000), &[0x02]);
        assert_eq!(1, table.observers_of("/temp").len());

        table.deregister("/temp", endpoint(1000), &[0x01]);
        assert!(table.observers_of("/temp").is_empty());
    }

    #[test]
    fn sequence_advances_only_while_observed() {
        let mut table = ObserverTable::new();
        assert_eq!(None, table.next_sequence("/temp"));

        table.register("/temp", endpoint(1000), &[]);
        assert_eq!(Some(1), table.next_sequence("/temp"));
        assert_eq!(Some(2), table.next_sequence("/temp"));

        table.remove_endpoint(endpoint(1000));
        assert_eq!(None, table.next_sequence("/temp"));
    }

    #[test]
    fn reset_removes_matching_observer() {
        let mut table = ObserverTable::new();
        table.register("/temp", endpoint(1000), &[]);
        table.register("/temp", endpoint(2000), &[]);
        table.note_notification("/temp", endpoint(1000), 41);
        table.note_notification("/temp", endpoint(2000), 42);

        // A reset for an unknown message ID changes nothing.
        table.handle_reset(endpoint(1000), 99);
        assert_eq!(2, table.observers_of("/temp").len());

        table.handle_reset(endpoint(2000), 42);
        let observers = table.observers_of("/temp");
        assert_eq!(1, observers.len());
        assert_eq!(endpoint(1000), observers[0].endpoint);
    }

    #[test]
    fn remove_endpoint_spans_paths() {
        let mut table = ObserverTable::new();
        table.register("/a", endpoint(1000), &[]);
        table.register("/b", endpoint(1000), &[]);
        table.register("/b", endpoint(2000), &[]);

        table.remove_endpoint(endpoint(1000));
        assert!(table.observers_of("/a").is_empty());
        assert_eq!(1, table.observers_of("/b").len());
    }
}

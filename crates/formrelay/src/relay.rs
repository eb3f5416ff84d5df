//! The datagram relay between intake and persistence.
//!
//! [`RelayClient`] sends each submission as one UDP datagram and never waits
//! for an answer. [`RelayListener`] receives datagrams one at a time, decodes
//! them and hands them to [`Persistence`]. Delivery is at most once: datagrams
//! may be dropped, reordered or truncated to the listener's chunk size.

use std::future::Future;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::persistence::Persistence;

/// What happened to one received datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Stored as the record with this id.
    Stored(i64),
    /// Dropped; the reason has already been logged.
    Dropped(String),
}

/// Sending half of the relay, used by the intake endpoint.
#[derive(Debug)]
pub struct RelayClient {
    socket: UdpSocket,
    target: SocketAddr,
}

impl RelayClient {
    /// Bind an ephemeral socket for sending to `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if no local socket can be bound.
    pub async fn bind(target: SocketAddr) -> Result<Self> {
        let local: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await.map_err(|source| Error::Bind {
            addr: local.to_string(),
            source,
        })?;
        Ok(Self { socket, target })
    }

    /// The relay address submissions are sent to.
    #[must_use]
    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Send `payload` as a single datagram.
    ///
    /// # Errors
    ///
    /// Returns an error if the datagram could not be handed to the OS, for
    /// example because it exceeds the maximum datagram size.
    pub async fn send(&self, payload: &[u8]) -> Result<usize> {
        self.socket
            .send_to(payload, self.target)
            .await
            .map_err(|source| Error::RelaySend {
                addr: self.target,
                source,
            })
    }

    /// Send `payload`, logging instead of returning a failure.
    pub async fn forward(&self, payload: &[u8]) {
        match self.send(payload).await {
            Ok(sent) => debug!(bytes = sent, target = %self.target, "submission relayed"),
            Err(e) => error!(error = %e, "failed to send data"),
        }
    }
}

/// Receiving half of the relay.
#[derive(Debug)]
pub struct RelayListener {
    socket: UdpSocket,
    chunk_size: usize,
    persistence: Persistence,
}

impl RelayListener {
    /// Bind the listener socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(
        addr: SocketAddr,
        chunk_size: usize,
        persistence: Persistence,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await.map_err(|source| Error::Bind {
            addr: addr.to_string(),
            source,
        })?;
        Ok(Self {
            socket,
            chunk_size,
            persistence,
        })
    }

    /// The address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive and persist datagrams until `shutdown` resolves.
    ///
    /// Bad messages are logged and skipped. Only a receive error that is not
    /// transient ends the loop early; that error is returned and the process
    /// is expected to exit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RelayReceive`] on an unrecoverable socket error.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = self.local_addr()?;
        info!(address = %addr, "relay listener started: udp://{addr}");

        let mut buf = vec![0u8; self.chunk_size];
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                () = &mut shutdown => break Ok(()),
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, peer)) => {
                        self.handle_datagram(&buf[..len], peer).await;
                    }
                    Err(e) if is_oversized(&e) => {
                        error!(
                            error = %e,
                            chunk_size = self.chunk_size,
                            "dropping datagram larger than chunk size"
                        );
                    }
                    Err(e) if is_transient(&e) => {
                        warn!(error = %e, "transient relay receive error");
                    }
                    Err(e) => {
                        error!(error = %e, "relay receive failed");
                        break Err(Error::RelayReceive(e));
                    }
                },
            }
        };

        info!("relay listener stopped");
        result
    }

    /// Decode one datagram and persist it.
    pub async fn handle_datagram(&self, payload: &[u8], peer: SocketAddr) -> Delivery {
        let text = match String::from_utf8(payload.to_vec()) {
            Ok(text) => text,
            Err(e) => {
                let err = Error::from(e);
                error!(peer = %peer, bytes = payload.len(), error = %err, "dropping datagram");
                return Delivery::Dropped(err.to_string());
            }
        };

        info!(peer = %peer, "Received from {peer}: {text}");

        let persistence = self.persistence.clone();
        let outcome = tokio::task::spawn_blocking(move || persistence.persist(&text))
            .await
            .map_err(Error::from)
            .and_then(|r| r);

        match outcome {
            Ok(id) => {
                debug!(id, "submission stored");
                Delivery::Stored(id)
            }
            Err(e) => {
                error!(peer = %peer, error = %e, "failed to persist submission");
                Delivery::Dropped(e.to_string())
            }
        }
    }
}

/// Winsock reports a datagram longer than the receive buffer as an error
/// (`WSAEMSGSIZE`) where Unix truncates it silently.
const WSAEMSGSIZE: i32 = 10040;

fn is_oversized(err: &std::io::Error) -> bool {
    cfg!(windows) && err.raw_os_error() == Some(WSAEMSGSIZE)
}

/// Receive errors that do not indicate a broken socket.
fn is_transient(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::ConnectionReset | ErrorKind::ConnectionRefused | ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::oneshot;

    async fn listener(chunk_size: usize) -> (RelayListener, Arc<Storage>) {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let listener = RelayListener::bind(
            "127.0.0.1:0".parse().unwrap(),
            chunk_size,
            Persistence::new(storage.clone()),
        )
        .await
        .unwrap();
        (listener, storage)
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    async fn wait_for_count(storage: &Storage, expected: i64) {
        for _ in 0..100 {
            if storage.count().unwrap() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!(
            "expected {expected} records, found {}",
            storage.count().unwrap()
        );
    }

    #[tokio::test]
    async fn test_handle_datagram_stores_record() {
        let (listener, storage) = listener(1024).await;

        let delivery = listener
            .handle_datagram(b"name=Alice&text=Hi", peer())
            .await;

        let Delivery::Stored(id) = delivery else {
            panic!("expected a stored record, got {delivery:?}");
        };
        let record = storage.get(id).unwrap().unwrap();
        assert_eq!(record.get("name"), Some("Alice"));
    }

    #[tokio::test]
    async fn test_handle_datagram_drops_malformed() {
        let (listener, storage) = listener(1024).await;

        let delivery = listener.handle_datagram(b"foo", peer()).await;

        assert!(matches!(delivery, Delivery::Dropped(ref reason) if reason.contains("foo")));
        assert_eq!(storage.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_handle_datagram_drops_invalid_utf8() {
        let (listener, storage) = listener(1024).await;

        let delivery = listener.handle_datagram(&[b'a', b'=', 0xff], peer()).await;

        assert!(matches!(delivery, Delivery::Dropped(_)));
        assert_eq!(storage.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_listener_survives_bad_message() {
        let (listener, storage) = listener(1024).await;
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(listener.run(async move {
            let _ = stop_rx.await;
        }));

        let client = RelayClient::bind(addr).await.unwrap();
        client.send(b"foo").await.unwrap();
        client.send(b"name=Bob&text=still+here").await.unwrap();

        wait_for_count(&storage, 1).await;
        let record = storage.get_recent(1).unwrap().remove(0);
        assert_eq!(record.get("name"), Some("Bob"));
        assert_eq!(record.get("text"), Some("still here"));

        stop_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_oversized_datagram_is_truncated() {
        let (listener, storage) = listener(16).await;
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(listener.run(async move {
            let _ = stop_rx.await;
        }));

        let client = RelayClient::bind(addr).await.unwrap();
        // 16 bytes survive: "text=" plus 11 of the 40 'a's.
        let payload = format!("text={}", "a".repeat(40));
        client.send(payload.as_bytes()).await.unwrap();

        wait_for_count(&storage, 1).await;
        let record = storage.get_recent(1).unwrap().remove(0);
        assert_eq!(record.get("text"), Some("a".repeat(11).as_str()));

        stop_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_listener_stops_on_shutdown() {
        let (listener, _storage) = listener(1024).await;
        let result = listener.run(async {}).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let (first, _storage) = listener(1024).await;
        let addr = first.local_addr().unwrap();

        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let err = RelayListener::bind(addr, 1024, Persistence::new(storage))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Bind { .. }));
    }

    #[tokio::test]
    async fn test_client_send_without_listener_does_not_panic() {
        // Nothing is bound on this port; UDP send still succeeds or errors quietly.
        let client = RelayClient::bind("127.0.0.1:9".parse().unwrap()).await.unwrap();
        client.forward(b"a=1").await;
        assert_eq!(client.target().port(), 9);
    }

    #[tokio::test]
    async fn test_client_rejects_oversized_payload() {
        let client = RelayClient::bind("127.0.0.1:9".parse().unwrap()).await.unwrap();
        let payload = vec![b'a'; 70_000];

        let err = client.send(&payload).await.unwrap_err();
        assert!(matches!(err, Error::RelaySend { .. }));
    }

    #[cfg(windows)]
    #[test]
    fn test_message_too_large_is_not_fatal() {
        let err = std::io::Error::from_raw_os_error(WSAEMSGSIZE);
        assert!(is_oversized(&err));
    }

    #[cfg(not(windows))]
    #[test]
    fn test_raw_10040_is_not_oversized_off_windows() {
        let err = std::io::Error::from_raw_os_error(WSAEMSGSIZE);
        assert!(!is_oversized(&err));
    }

    #[tokio::test]
    async fn test_listener_keeps_running_after_oversized_datagram() {
        let (listener, storage) = listener(8).await;
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(listener.run(async move {
            let _ = stop_rx.await;
        }));

        let client = RelayClient::bind(addr).await.unwrap();
        client.send("x".repeat(500).as_bytes()).await.unwrap();
        client.send(b"a=1").await.unwrap();

        wait_for_count(&storage, 1).await;
        assert_eq!(storage.get_recent(1).unwrap()[0].get("a"), Some("1"));
        assert!(!task.is_finished());

        stop_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[test]
    fn test_is_transient() {
        assert!(is_transient(&std::io::Error::from(ErrorKind::ConnectionReset)));
        assert!(!is_transient(&std::io::Error::from(ErrorKind::PermissionDenied)));
    }
}

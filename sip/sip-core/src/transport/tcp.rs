//! TCP transport with an explicit connection registry
//!
//! Every connection, accepted or connected, gets an entry in a [`SlotMap`] indexed by the
//! remote address. Each connection runs a read task framing messages with the
//! [`StreamingDecoder`] and a write task draining a channel of outgoing buffers.
//! Entries are removed when the read side closes.

use super::codec::{Item, StreamingDecoder};
use super::{ReceivedMessage, TpHandle, Transport, TransportEvent};
use bytes::Bytes;
use parking_lot::Mutex;
use slotmap::{SlotMap, new_key_type};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::{fmt, io};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;

const TCP: &str = "TCP";

new_key_type! {
    /// Identifies a single connection inside the registry
    pub struct ConnectionId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Established by this endpoint
    Outgoing,
    /// Accepted by the listener
    Incoming,
}

#[derive(Debug)]
struct Connection {
    remote: SocketAddr,
    direction: Direction,
    outgoing: mpsc::Sender<Bytes>,
}

#[derive(Debug, Default)]
struct Registry {
    connections: SlotMap<ConnectionId, Connection>,
    by_remote: HashMap<SocketAddr, ConnectionId>,
}

impl Registry {
    fn insert(&mut self, connection: Connection) -> ConnectionId {
        let remote = connection.remote;
        let id = self.connections.insert(connection);

        if let Some(replaced) = self.by_remote.insert(remote, id) {
            // keep the old connection alive until its read side closes, new requests use the new one
            log::debug!("Connection to {remote} replaced {replaced:?} with {id:?}");
        }

        id
    }

    fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(id)?;

        if self.by_remote.get(&connection.remote) == Some(&id) {
            self.by_remote.remove(&connection.remote);
        }

        Some(connection)
    }

    fn sender(&self, remote: &SocketAddr) -> Option<mpsc::Sender<Bytes>> {
        let id = self.by_remote.get(remote)?;

        self.connections
            .get(*id)
            .map(|connection| connection.outgoing.clone())
    }
}

#[derive(Debug)]
struct Inner {
    bound: SocketAddr,
    registry: Mutex<Registry>,
    events: mpsc::Sender<TransportEvent>,
}

/// TCP transport. Sending to an address without connection will connect first.
#[derive(Debug, Clone)]
pub struct Tcp {
    inner: Arc<Inner>,
}

impl fmt::Display for Tcp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp:bound={}", self.inner.bound)
    }
}

impl Tcp {
    /// Bind a TCP listener and spawn its accept task
    pub async fn spawn<A>(addr: A, events: mpsc::Sender<TransportEvent>) -> io::Result<TpHandle>
    where
        A: ToSocketAddrs,
    {
        let listener = TcpListener::bind(addr).await?;
        let bound = listener.local_addr()?;

        log::info!("Bound TCP to {bound}");

        let tcp = Tcp {
            inner: Arc::new(Inner {
                bound,
                registry: Mutex::new(Registry::default()),
                events,
            }),
        };

        tokio::spawn(accept_task(listener, tcp.clone()));

        Ok(TpHandle::new(tcp))
    }

    /// Number of currently open connections
    pub fn connection_count(&self) -> usize {
        self.inner.registry.lock().connections.len()
    }

    async fn connect(&self, remote: SocketAddr) -> io::Result<mpsc::Sender<Bytes>> {
        log::debug!("Connecting TCP to {remote}");

        let stream = TcpStream::connect(remote).await?;

        Ok(self.add_connection(stream, remote, Direction::Outgoing))
    }

    fn add_connection(
        &self,
        stream: TcpStream,
        remote: SocketAddr,
        direction: Direction,
    ) -> mpsc::Sender<Bytes> {
        let (read, write) = stream.into_split();
        let (outgoing, outgoing_rx) = mpsc::channel(16);

        let id = self.inner.registry.lock().insert(Connection {
            remote,
            direction,
            outgoing: outgoing.clone(),
        });

        log::info!("TCP connection {id:?} {direction:?} {remote}");

        let _ = self
            .inner
            .events
            .try_send(TransportEvent::ConnectionEstablished {
                transport: TCP,
                remote,
            });

        tokio::spawn(write_task(write, outgoing_rx));
        tokio::spawn(read_task(
            read,
            self.clone(),
            id,
            remote,
            outgoing.clone(),
        ));

        outgoing
    }

    fn remove_connection(&self, id: ConnectionId, reason: String) {
        let Some(connection) = self.inner.registry.lock().remove(id) else {
            return;
        };

        log::info!(
            "TCP connection {id:?} {:?} {} closed, {reason}",
            connection.direction,
            connection.remote
        );

        let _ = self.inner.events.try_send(TransportEvent::ConnectionClosed {
            transport: TCP,
            remote: connection.remote,
            reason,
        });
    }
}

#[async_trait::async_trait]
impl Transport for Tcp {
    fn name(&self) -> &'static str {
        TCP
    }

    fn reliable(&self) -> bool {
        true
    }

    fn bound(&self) -> SocketAddr {
        self.inner.bound
    }

    fn sent_by(&self) -> SocketAddr {
        self.inner.bound
    }

    async fn send(&self, message: &[u8], target: SocketAddr) -> io::Result<()> {
        let existing = self.inner.registry.lock().sender(&target);

        let sender = match existing {
            Some(sender) => sender,
            None => self.connect(target).await?,
        };

        sender
            .send(Bytes::copy_from_slice(message))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "connection closed"))
    }
}

async fn accept_task(listener: TcpListener, tcp: Tcp) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                tcp.add_connection(stream, remote, Direction::Incoming);
            }
            Err(e) => {
                log::warn!("Failed to accept TCP connection, {e}");
            }
        }
    }
}

async fn write_task(mut write: OwnedWriteHalf, mut outgoing: mpsc::Receiver<Bytes>) {
    while let Some(buffer) = outgoing.recv().await {
        if let Err(e) = write.write_all(&buffer).await {
            log::debug!("TCP write failed, {e}");
            return;
        }
    }
}

async fn read_task(
    read: OwnedReadHalf,
    tcp: Tcp,
    id: ConnectionId,
    remote: SocketAddr,
    outgoing: mpsc::Sender<Bytes>,
) {
    let handle = TpHandle::new(tcp.clone());
    let mut framed = FramedRead::new(read, StreamingDecoder);

    let reason = loop {
        let item = match framed.next().await {
            Some(Ok(item)) => item,
            Some(Err(e)) => break e.to_string(),
            None => break String::from("closed by peer"),
        };

        match item {
            Item::Message(buffer) => {
                let message = match ReceivedMessage::parse(buffer, remote, &handle) {
                    Ok(message) => message,
                    Err(e) => break format!("malformed message, {e}"),
                };

                if tcp
                    .inner
                    .events
                    .send(TransportEvent::Message(message))
                    .await
                    .is_err()
                {
                    break String::from("receiver dropped");
                }
            }
            Item::KeepAliveRequest => {
                let _ = outgoing.send(Bytes::from_static(b"\r\n")).await;
            }
            Item::KeepAliveResponse => {}
        }
    };

    tcp.remove_connection(id, reason);
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn registry_tracks_connections() {
        let (events, mut events_rx) = mpsc::channel(8);

        let server = Tcp::spawn("127.0.0.1:0", events).await.unwrap();
        let server_addr = server.bound();

        let client = TcpStream::connect(server_addr).await.unwrap();
        let client_addr = client.local_addr().unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(
            matches!(event, TransportEvent::ConnectionEstablished { remote, .. } if remote == client_addr)
        );

        let mut client = client;
        client
            .write_all(b"OPTIONS sip:a@127.0.0.1 SIP/2.0\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, TransportEvent::Message(msg) if msg.source == client_addr));

        drop(client);

        let event = tokio::time::timeout(Duration::from_secs(5), events_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(
            matches!(event, TransportEvent::ConnectionClosed { remote, .. } if remote == client_addr)
        );
    }
}

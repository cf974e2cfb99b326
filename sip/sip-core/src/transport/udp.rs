use super::{ReceivedMessage, TpHandle, Transport, TransportEvent, is_keep_alive};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::{fmt, io};
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::sync::mpsc;

const UDP: &str = "UDP";
const MAX_MSG_SIZE: usize = u16::MAX as usize;

#[derive(Debug)]
struct Inner {
    bound: SocketAddr,
    socket: UdpSocket,
}

#[derive(Debug)]
pub struct Udp {
    inner: Arc<Inner>,
}

impl fmt::Display for Udp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "udp:bound={}", self.inner.bound)
    }
}

impl Udp {
    /// Bind a UDP socket and spawn its receive task.
    ///
    /// Every parsed datagram is forwarded into `events`, the task exits once the receiver is dropped.
    pub async fn spawn<A>(addr: A, events: mpsc::Sender<TransportEvent>) -> io::Result<TpHandle>
    where
        A: ToSocketAddrs,
    {
        let socket = UdpSocket::bind(addr).await?;
        let bound = socket.local_addr()?;

        log::info!("Bound UDP to {bound}");

        let inner = Arc::new(Inner { bound, socket });

        let handle = TpHandle::new(Udp {
            inner: inner.clone(),
        });

        tokio::spawn(receive_task(events, inner, handle.clone()));

        Ok(handle)
    }
}

#[async_trait::async_trait]
impl Transport for Udp {
    fn name(&self) -> &'static str {
        UDP
    }

    fn reliable(&self) -> bool {
        false
    }

    fn bound(&self) -> SocketAddr {
        self.inner.bound
    }

    fn sent_by(&self) -> SocketAddr {
        self.inner.bound
    }

    async fn send(&self, bytes: &[u8], target: SocketAddr) -> io::Result<()> {
        self.inner.socket.send_to(bytes, target).await.map(|_| ())
    }
}

async fn receive_task(events: mpsc::Sender<TransportEvent>, inner: Arc<Inner>, handle: TpHandle) {
    let mut buffer = vec![0u8; MAX_MSG_SIZE];

    loop {
        let (len, remote) = match inner.socket.recv_from(&mut buffer).await {
            Ok(result) => result,
            Err(e) => {
                // ICMP errors of previous sends show up here on some platforms
                log::debug!("UDP recv error {e}");
                continue;
            }
        };

        let bytes = &buffer[..len];

        if is_keep_alive(bytes) {
            if bytes.starts_with(b"\r\n\r\n") {
                if let Err(e) = inner.socket.send_to(b"\r\n", remote).await {
                    log::debug!("Failed to answer keep-alive from {remote}, {e}");
                }
            }

            continue;
        }

        let message = match ReceivedMessage::parse(Bytes::copy_from_slice(bytes), remote, &handle) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Dropping malformed datagram from {remote}, {e}");
                continue;
            }
        };

        if events.send(TransportEvent::Message(message)).await.is_err() {
            log::debug!("UDP receiver dropped, stopping receive task");
            return;
        }
    }
}

use bytes::Bytes;
use rand::Rng;
use rtp::{RtpPacket, RtpTimestamp, SequenceNumber, Ssrc, parse_rtcp, receiver_report};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::ops::RangeInclusive;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Which socket of the channel a datagram arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Rtp,
    Rtcp,
}

/// Datagram received by one of the channel's sockets
#[derive(Debug)]
pub struct ReceivedDatagram {
    pub component: Component,
    pub data: Bytes,
    pub source: SocketAddr,
}

/// Packet and byte counters, only used for logging
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub rtp_sent: u64,
    pub bytes_sent: u64,
    pub rtp_received: u64,
    pub bytes_received: u64,
    pub rtcp_sent: u64,
    pub rtcp_received: u64,
    pub dropped: u64,
}

/// A pair of bound UDP sockets carrying RTP (even port) and RTCP (port + 1).
///
/// Received datagrams are forwarded to the owner through a channel and must be handed
/// back to [`MediaChannel::receive`], which keeps all state changes on the owner's task.
#[derive(Debug)]
pub struct MediaChannel {
    rtp: Arc<UdpSocket>,
    rtcp: Arc<UdpSocket>,
    local: SocketAddr,

    remote: Option<SocketAddr>,

    ssrc: Ssrc,
    sequence_number: SequenceNumber,
    timestamp: RtpTimestamp,

    counters: Counters,

    tasks: [JoinHandle<()>; 2],
}

impl MediaChannel {
    /// Bind an even port for RTP and the following port for RTCP inside the given range.
    ///
    /// The search starts at a random even port and wraps around inside the range.
    pub async fn bind(
        ip: IpAddr,
        ports: RangeInclusive<u16>,
        events: mpsc::Sender<ReceivedDatagram>,
    ) -> io::Result<Self> {
        let first = ports.start().saturating_add(ports.start() % 2);
        let last = ports.end().saturating_sub(1);

        if first > last {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("port range {ports:?} does not contain a RTP/RTCP port pair"),
            ));
        }

        let pairs = (last - first) / 2 + 1;
        let start = rand::rng().random_range(0..pairs);

        for i in 0..pairs {
            let port = first + ((start + i) % pairs) * 2;

            let rtp = match UdpSocket::bind((ip, port)).await {
                Ok(socket) => socket,
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => continue,
                Err(e) => return Err(e),
            };

            let rtcp = match UdpSocket::bind((ip, port + 1)).await {
                Ok(socket) => socket,
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => continue,
                Err(e) => return Err(e),
            };

            return Self::from_sockets(rtp, rtcp, events);
        }

        Err(io::Error::new(
            io::ErrorKind::AddrInUse,
            format!("no free RTP/RTCP port pair in {ports:?}"),
        ))
    }

    fn from_sockets(
        rtp: UdpSocket,
        rtcp: UdpSocket,
        events: mpsc::Sender<ReceivedDatagram>,
    ) -> io::Result<Self> {
        let local = rtp.local_addr()?;

        let rtp = Arc::new(rtp);
        let rtcp = Arc::new(rtcp);

        let tasks = [
            tokio::spawn(receive_task(rtp.clone(), Component::Rtp, events.clone())),
            tokio::spawn(receive_task(rtcp.clone(), Component::Rtcp, events)),
        ];

        Ok(Self {
            rtp,
            rtcp,
            local,
            remote: None,
            ssrc: Ssrc(rand::random()),
            sequence_number: SequenceNumber(rand::random()),
            timestamp: RtpTimestamp(rand::random()),
            counters: Counters::default(),
            tasks,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// Set the address negotiated in the session description, `None` stops sending
    pub fn set_remote(&mut self, remote: Option<SocketAddr>) {
        if self.remote != remote {
            log::debug!("media remote address changed from {:?} to {remote:?}", self.remote);
        }

        self.remote = remote;
    }

    /// Frame the payload as RTP and send it to the remote.
    ///
    /// Without a known remote the payload is dropped. The timestamp advances by the payload
    /// length, which is the sample count of 8 bit single channel formats like G.711.
    pub async fn send(&mut self, payload: Bytes, pt: u8) {
        let Some(remote) = self.remote else {
            self.counters.dropped += 1;
            log::trace!("dropping outgoing RTP packet, no remote address");
            return;
        };

        let packet = RtpPacket {
            pt,
            sequence_number: self.sequence_number.increase_one(),
            ssrc: self.ssrc,
            timestamp: self.timestamp,
            marker: false,
            payload,
        };

        self.timestamp.advance(packet.payload.len() as u32);

        let buf = match packet.to_vec() {
            Ok(buf) => buf,
            Err(e) => {
                log::warn!("failed to write RTP packet, {e:?}");
                return;
            }
        };

        match self.rtp.send_to(&buf, remote).await {
            Ok(_) => {
                self.counters.rtp_sent += 1;
                self.counters.bytes_sent += buf.len() as u64;
            }
            Err(e) => log::warn!("failed to send RTP packet to {remote}, {e}"),
        }
    }

    /// Handle a datagram forwarded by the receive tasks
    pub fn receive(&mut self, datagram: ReceivedDatagram) {
        match datagram.component {
            Component::Rtp => self.receive_rtp(datagram.data, datagram.source),
            Component::Rtcp => self.receive_rtcp(&datagram.data, datagram.source),
        }
    }

    fn receive_rtp(&mut self, data: Bytes, source: SocketAddr) {
        let len = data.len();

        let packet = match RtpPacket::parse(data) {
            Ok(packet) => packet,
            Err(e) => {
                log::debug!("rtp: discarding {len} bytes from {source}, {e:?}");
                return;
            }
        };

        log::debug!(
            "rtp: recv {} bytes from {source} (pt={}, seq={})",
            packet.payload.len(),
            packet.pt,
            packet.sequence_number.0
        );

        self.counters.rtp_received += 1;
        self.counters.bytes_received += len as u64;

        // symmetric RTP, answer where the media comes from
        if self.remote.is_some_and(|remote| remote != source) {
            log::info!("rtp: remote address changed to {source}");
            self.remote = Some(source);
        }
    }

    fn receive_rtcp(&mut self, data: &[u8], source: SocketAddr) {
        match parse_rtcp(data) {
            Ok(kinds) => {
                self.counters.rtcp_received += 1;

                for kind in kinds {
                    log::debug!("rtcp: recv {kind} from {source}");
                }
            }
            Err(e) => log::debug!("rtcp: discarding packet from {source}, {e}"),
        }
    }

    /// Send an empty receiver report to the remote's RTCP port (RTP port + 1).
    ///
    /// Does nothing while no remote is known.
    pub async fn send_receiver_report(&mut self) {
        let Some(remote) = self.remote else {
            return;
        };

        let report = match receiver_report(self.ssrc.0) {
            Ok(report) => report,
            Err(e) => {
                log::warn!("failed to write RTCP receiver report, {e}");
                return;
            }
        };

        let target = SocketAddr::new(remote.ip(), remote.port().wrapping_add(1));

        match self.rtcp.send_to(&report, target).await {
            Ok(_) => {
                self.counters.rtcp_sent += 1;
                log::trace!("rtcp: sent RR to {target}");
            }
            Err(e) => log::warn!("failed to send RTCP to {target}, {e}"),
        }
    }
}

impl Drop for MediaChannel {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn receive_task(
    socket: Arc<UdpSocket>,
    component: Component,
    events: mpsc::Sender<ReceivedDatagram>,
) {
    let mut buf = vec![0u8; 65535];

    loop {
        let (len, source) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                // ICMP port unreachable shows up as an error on some platforms
                log::trace!("{component:?} socket receive error, {e}");
                continue;
            }
        };

        let datagram = ReceivedDatagram {
            component,
            data: Bytes::copy_from_slice(&buf[..len]),
            source,
        };

        if events.send(datagram).await.is_err() {
            return;
        }
    }
}

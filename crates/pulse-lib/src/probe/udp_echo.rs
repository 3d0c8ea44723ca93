//! UDP echo transport statistics
//!
//! Sends sequenced probe datagrams to an echo endpoint and derives the same
//! statistics records a real-time transport would report: a succeeded
//! candidate pair with the smoothed round-trip time, a remote-inbound report
//! with per-poll loss, and an inbound report with cumulative counters.
//!
//! In loopback mode the echo responder runs in-process on 127.0.0.1, which
//! gives a live path with near-zero impairment.

use super::{CandidatePairState, ProbeError, StatsConnection, StatsReport, StatsSource};
use crate::classifier::RTT_CRITICAL_MS;
use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Marker at the start of every probe datagram
const PROBE_MAGIC: u32 = 0x4e50_4c53;

/// magic (4) + sequence (8) + send offset in nanos (8)
const HEADER_LEN: usize = 20;

/// RFC 3550 jitter smoothing divisor
const JITTER_GAIN: f64 = 16.0;

/// RTT smoothing factor (same weight TCP uses for SRTT)
const RTT_ALPHA: f64 = 0.125;

/// Per-echo wait; twice the critical RTT so slow paths still measure
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_millis(2 * RTT_CRITICAL_MS as u64);

/// Wait for the first echo when the path is opened
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Where probes are sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EchoTarget {
    /// In-process responder on 127.0.0.1
    Loopback,
    /// External UDP echo service
    Remote(SocketAddr),
}

/// Configuration for the UDP echo source
#[derive(Debug, Clone)]
pub struct UdpEchoConfig {
    pub target: EchoTarget,
    /// Datagrams sent per statistics poll
    pub probes_per_poll: u32,
    /// How long to wait for each echo
    pub reply_timeout: Duration,
    /// How long to wait for the echo that proves the path on connect
    pub handshake_timeout: Duration,
    /// Datagram size in bytes (at least the header size)
    pub payload_size: usize,
}

impl Default for UdpEchoConfig {
    fn default() -> Self {
        Self {
            target: EchoTarget::Loopback,
            probes_per_poll: 5,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            payload_size: 64,
        }
    }
}

impl UdpEchoConfig {
    /// Cap the burst so a poll with every echo lost still fits in `poll_interval`
    pub fn fit_to_interval(mut self, poll_interval: Duration) -> Self {
        let per_echo = self.reply_timeout.as_millis().max(1);
        let budget = (poll_interval.as_millis() / per_echo).min(u32::MAX as u128) as u32;
        self.probes_per_poll = self.probes_per_poll.min(budget).max(1);
        self
    }
}

/// Statistics source that measures a UDP echo path
pub struct UdpEchoSource {
    config: UdpEchoConfig,
    name: String,
}

impl UdpEchoSource {
    pub fn new(config: UdpEchoConfig) -> Self {
        let name = match &config.target {
            EchoTarget::Loopback => "udp-echo:loopback".to_string(),
            EchoTarget::Remote(addr) => format!("udp-echo:{addr}"),
        };
        Self { config, name }
    }

    pub fn loopback() -> Self {
        Self::new(UdpEchoConfig::default())
    }
}

#[async_trait]
impl StatsSource for UdpEchoSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<Box<dyn StatsConnection>, ProbeError> {
        let (target, responder) = match &self.config.target {
            EchoTarget::Loopback => {
                let (addr, handle) = spawn_loopback_responder().await?;
                (addr, Some(handle))
            }
            EchoTarget::Remote(addr) => (*addr, None),
        };

        let bind_addr: SocketAddr = if target.ip().is_loopback() {
            (Ipv4Addr::LOCALHOST, 0).into()
        } else if target.is_ipv6() {
            "[::]:0".parse().map_err(|_| ProbeError::Unavailable("bad bind address".into()))?
        } else {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(target).await?;

        let mut connection = EchoConnection {
            socket: Some(socket),
            responder,
            config: self.config.clone(),
            epoch: Instant::now(),
            next_seq: 0,
            packets_received: 0,
            packets_lost: 0,
            smoothed_rtt: None,
            jitter_secs: 0.0,
            last_transit: None,
            stream_id: String::new(),
        };
        connection.stream_id = match connection.socket.as_ref().map(|s| s.local_addr()) {
            Some(Ok(local)) => format!("echo-{}", local.port()),
            _ => "echo".to_string(),
        };

        // One round trip proves the path before the probe is handed out
        let handshake = self.config.handshake_timeout.max(self.config.reply_timeout);
        if connection.round_trip(handshake).await.is_none() {
            connection.close().await;
            return Err(ProbeError::Unavailable(format!(
                "no echo from {target} within {handshake:?}"
            )));
        }
        debug!(target = %target, "UDP echo path established");

        Ok(Box::new(connection))
    }
}

/// Bind an echo responder on an ephemeral loopback port
async fn spawn_loopback_responder() -> Result<(SocketAddr, JoinHandle<()>), ProbeError> {
    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await?;
    let addr = socket.local_addr()?;

    let handle = tokio::spawn(async move {
        let mut buf = vec![0u8; 2048];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, peer)) => {
                    if let Err(e) = socket.send_to(&buf[..len], peer).await {
                        trace!(error = %e, "Echo send failed");
                    }
                }
                Err(e) => {
                    trace!(error = %e, "Echo receive failed");
                }
            }
        }
    });

    Ok((addr, handle))
}

/// An established echo path with cumulative counters
struct EchoConnection {
    socket: Option<UdpSocket>,
    responder: Option<JoinHandle<()>>,
    config: UdpEchoConfig,
    epoch: Instant,
    next_seq: u64,
    packets_received: u64,
    packets_lost: u64,
    smoothed_rtt: Option<f64>,
    jitter_secs: f64,
    last_transit: Option<f64>,
    stream_id: String,
}

impl EchoConnection {
    /// Send one probe and wait for its echo. Returns the RTT in seconds.
    async fn round_trip(&mut self, reply_timeout: Duration) -> Option<f64> {
        let socket = self.socket.as_ref()?;
        let seq = self.next_seq;
        self.next_seq += 1;

        let sent_offset = self.epoch.elapsed().as_nanos() as u64;
        let packet = encode_probe(seq, sent_offset, self.config.payload_size);
        if let Err(e) = socket.send(&packet).await {
            debug!(error = %e, seq, "Probe send failed");
            self.packets_lost += 1;
            return None;
        }

        let deadline = Instant::now() + reply_timeout;
        let mut buf = vec![0u8; self.config.payload_size.max(HEADER_LEN) + 16];

        loop {
            match tokio::time::timeout_at(deadline, socket.recv(&mut buf)).await {
                Ok(Ok(len)) => match decode_probe(&buf[..len]) {
                    Some((echo_seq, echo_offset)) if echo_seq == seq => {
                        let now = self.epoch.elapsed().as_nanos() as u64;
                        let rtt = now.saturating_sub(echo_offset) as f64 / 1e9;
                        self.record_echo(rtt);
                        return Some(rtt);
                    }
                    // Late echo of an earlier probe or foreign datagram
                    _ => continue,
                },
                Ok(Err(e)) => {
                    trace!(error = %e, seq, "Probe receive failed");
                    self.packets_lost += 1;
                    return None;
                }
                Err(_) => {
                    self.packets_lost += 1;
                    return None;
                }
            }
        }
    }

    fn record_echo(&mut self, rtt: f64) {
        self.packets_received += 1;

        self.smoothed_rtt = Some(match self.smoothed_rtt {
            Some(srtt) => srtt + RTT_ALPHA * (rtt - srtt),
            None => rtt,
        });

        // Transit time difference between consecutive echoes
        if let Some(prev) = self.last_transit {
            let d = (rtt - prev).abs();
            self.jitter_secs += (d - self.jitter_secs) / JITTER_GAIN;
        }
        self.last_transit = Some(rtt);
    }
}

#[async_trait]
impl StatsConnection for EchoConnection {
    async fn get_stats(&mut self) -> Result<Vec<StatsReport>, ProbeError> {
        if self.socket.is_none() {
            return Err(ProbeError::Stats("connection closed".to_string()));
        }

        let sent = self.config.probes_per_poll.max(1);
        let mut lost = 0u32;
        for _ in 0..sent {
            if self.round_trip(self.config.reply_timeout).await.is_none() {
                lost += 1;
            }
        }

        let mut reports = Vec::with_capacity(3);
        if let Some(srtt) = self.smoothed_rtt {
            reports.push(StatsReport::CandidatePair {
                state: CandidatePairState::Succeeded,
                current_round_trip_time: Some(srtt),
            });
        }
        reports.push(StatsReport::RemoteInboundRtp {
            id: format!("{}-remote", self.stream_id),
            jitter: Some(self.jitter_secs),
            fraction_lost: Some(lost as f64 / sent as f64),
        });
        reports.push(StatsReport::InboundRtp {
            id: self.stream_id.clone(),
            jitter: Some(self.jitter_secs),
            packets_received: self.packets_received,
            packets_lost: self.packets_lost,
        });

        Ok(reports)
    }

    async fn close(&mut self) {
        if let Some(responder) = self.responder.take() {
            responder.abort();
        }
        self.socket = None;
    }
}

impl Drop for EchoConnection {
    fn drop(&mut self) {
        if let Some(responder) = self.responder.take() {
            responder.abort();
        }
    }
}

fn encode_probe(seq: u64, sent_offset_nanos: u64, payload_size: usize) -> Vec<u8> {
    let mut packet = Vec::with_capacity(payload_size.max(HEADER_LEN));
    packet.extend_from_slice(&PROBE_MAGIC.to_be_bytes());
    packet.extend_from_slice(&seq.to_be_bytes());
    packet.extend_from_slice(&sent_offset_nanos.to_be_bytes());
    packet.resize(payload_size.max(HEADER_LEN), 0);
    packet
}

fn decode_probe(packet: &[u8]) -> Option<(u64, u64)> {
    if packet.len() < HEADER_LEN {
        return None;
    }
    let magic = u32::from_be_bytes(packet[0..4].try_into().ok()?);
    if magic != PROBE_MAGIC {
        return None;
    }
    let seq = u64::from_be_bytes(packet[4..12].try_into().ok()?);
    let sent = u64::from_be_bytes(packet[12..20].try_into().ok()?);
    Some((seq, sent))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_codec() {
        let packet = encode_probe(42, 1_000_000, 64);
        assert_eq!(packet.len(), 64);
        assert_eq!(decode_probe(&packet), Some((42, 1_000_000)));

        // Header never truncated
        assert_eq!(encode_probe(1, 2, 4).len(), HEADER_LEN);
    }

    #[test]
    fn test_decode_rejects_foreign_datagrams() {
        assert_eq!(decode_probe(b"hello"), None);
        let mut packet = encode_probe(1, 1, 32);
        packet[0] ^= 0xff;
        assert_eq!(decode_probe(&packet), None);
    }

    #[tokio::test]
    async fn test_loopback_reports_live_stats() {
        let source = UdpEchoSource::loopback();
        let mut connection = source.connect().await.unwrap();

        let reports = connection.get_stats().await.unwrap();
        assert_eq!(reports.len(), 3);

        match &reports[0] {
            StatsReport::CandidatePair {
                state,
                current_round_trip_time,
            } => {
                assert_eq!(*state, CandidatePairState::Succeeded);
                let rtt = current_round_trip_time.unwrap();
                assert!(rtt > 0.0 && rtt < 0.15);
            }
            other => panic!("unexpected first report: {other:?}"),
        }

        match &reports[2] {
            StatsReport::InboundRtp {
                packets_received, ..
            } => {
                // handshake + one poll
                assert!(*packets_received >= 1);
                assert!(*packets_received <= 6);
            }
            other => panic!("unexpected last report: {other:?}"),
        }

        connection.close().await;
        assert!(connection.get_stats().await.is_err());
    }

    #[tokio::test]
    async fn test_silent_remote_is_unavailable() {
        // Reserve a port, then free it so nothing answers there
        let placeholder = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = placeholder.local_addr().unwrap();
        drop(placeholder);

        let source = UdpEchoSource::new(UdpEchoConfig {
            target: EchoTarget::Remote(addr),
            reply_timeout: Duration::from_millis(50),
            handshake_timeout: Duration::from_millis(50),
            ..Default::default()
        });

        let err = source.connect().await.err().unwrap();
        assert!(matches!(err, ProbeError::Unavailable(_)));
    }

    /// Echo responder that holds every datagram for `delay` before replying
    async fn spawn_delayed_responder(delay: Duration) -> SocketAddr {
        let socket = std::sync::Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = socket.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = vec![0u8; 2048];
            while let Ok((len, peer)) = socket.recv_from(&mut buf).await {
                let packet = buf[..len].to_vec();
                let socket = socket.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = socket.send_to(&packet, peer).await;
                });
            }
        });

        addr
    }

    #[tokio::test]
    async fn test_high_rtt_remote_is_measured() {
        let addr = spawn_delayed_responder(Duration::from_millis(250)).await;
        let source = UdpEchoSource::new(
            UdpEchoConfig {
                target: EchoTarget::Remote(addr),
                ..Default::default()
            }
            .fit_to_interval(Duration::from_secs(1)),
        );

        let mut connection = source.connect().await.unwrap();
        let reports = connection.get_stats().await.unwrap();

        match &reports[0] {
            StatsReport::CandidatePair {
                current_round_trip_time,
                ..
            } => {
                // Above the critical bound, so the tier reflects the real path
                let rtt_ms = current_round_trip_time.unwrap() * 1000.0;
                assert!(rtt_ms > RTT_CRITICAL_MS, "rtt {rtt_ms} ms");
            }
            other => panic!("unexpected first report: {other:?}"),
        }
        match &reports[1] {
            StatsReport::RemoteInboundRtp { fraction_lost, .. } => {
                assert_eq!(*fraction_lost, Some(0.0));
            }
            other => panic!("unexpected second report: {other:?}"),
        }
        connection.close().await;
    }

    #[test]
    fn test_burst_fits_poll_interval() {
        let config = UdpEchoConfig::default().fit_to_interval(Duration::from_secs(1));
        assert_eq!(config.probes_per_poll, 2);
        assert!(config.reply_timeout * config.probes_per_poll <= Duration::from_secs(1));

        // Never below one echo per poll
        let tight = UdpEchoConfig::default().fit_to_interval(Duration::from_millis(100));
        assert_eq!(tight.probes_per_poll, 1);

        let roomy = UdpEchoConfig::default().fit_to_interval(Duration::from_secs(10));
        assert_eq!(roomy.probes_per_poll, 5);
    }
}

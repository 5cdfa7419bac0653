//! Packet acquisition
//!
//! Two capture sources feed the engine: a live interface and pcap file
//! replay. Both decode down to IPv4/UDP before handing anything over, so
//! the dispatch path never sees link-layer details.

use anyhow::{bail, Context, Result};
use pcap::{Active, Capture, Offline};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::{decode_frame, UdpPacket};

/// Capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Interface name for live capture
    pub interface: Option<String>,
    /// PCAP file path for replay
    pub pcap_file: Option<String>,
    /// Snapshot length
    pub snaplen: i32,
    /// Read timeout in milliseconds (live capture)
    pub timeout_ms: i32,
    /// Promiscuous mode (live capture)
    pub promiscuous: bool,
    /// BPF filter applied to the capture
    pub filter: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: None,
            pcap_file: None,
            snaplen: 65535,
            timeout_ms: 100,
            promiscuous: true,
            filter: Some("udp".to_string()),
        }
    }
}

/// Capture statistics
#[derive(Debug, Clone, Default)]
pub struct CaptureStats {
    /// Frames received from the source
    pub received: u64,
    /// Frames that did not decode to IPv4/UDP
    pub skipped: u64,
}

/// A source of decoded UDP packets.
pub trait PacketCapture {
    /// Get the next decoded packet. `Ok(None)` means nothing is ready
    /// yet (read timeout, or an undecodable frame was dropped).
    fn next_packet(&mut self) -> Result<Option<UdpPacket>>;

    /// True once the source is exhausted (file replay only).
    fn done(&self) -> bool {
        false
    }

    /// Capture statistics.
    fn stats(&self) -> CaptureStats;
}

/// Create a capture from configuration; a configured file takes
/// precedence over an interface.
pub fn create_capture(config: &CaptureConfig) -> Result<Box<dyn PacketCapture>> {
    if let Some(path) = &config.pcap_file {
        Ok(Box::new(FileCapture::open(path, config)?))
    } else if config.interface.is_some() {
        Ok(Box::new(LiveCapture::open(config)?))
    } else {
        bail!("no capture source configured: set an interface or a pcap file")
    }
}

/// Live capture from a network interface.
pub struct LiveCapture {
    cap: Capture<Active>,
    stats: CaptureStats,
}

impl LiveCapture {
    pub fn open(config: &CaptureConfig) -> Result<Self> {
        let interface = config
            .interface
            .clone()
            .context("live capture requires an interface name")?;

        let mut cap = Capture::from_device(interface.as_str())
            .with_context(|| format!("Failed to open device: {interface}"))?
            .promisc(config.promiscuous)
            .snaplen(config.snaplen)
            .timeout(config.timeout_ms)
            .open()
            .with_context(|| format!("Failed to activate capture on {interface}"))?;

        if let Some(filter) = &config.filter {
            cap.filter(filter, true)
                .with_context(|| format!("Failed to set filter: {filter}"))?;
        }

        info!(interface, "live capture started");
        Ok(Self {
            cap,
            stats: CaptureStats::default(),
        })
    }
}

impl PacketCapture for LiveCapture {
    fn next_packet(&mut self) -> Result<Option<UdpPacket>> {
        match self.cap.next_packet() {
            Ok(packet) => {
                self.stats.received += 1;
                let ts_sec = packet.header.ts.tv_sec as u64;
                let ts_usec = packet.header.ts.tv_usec as u32;
                match decode_frame(packet.data, ts_sec, ts_usec) {
                    Some(pkt) => Ok(Some(pkt)),
                    None => {
                        self.stats.skipped += 1;
                        Ok(None)
                    }
                }
            }
            Err(pcap::Error::TimeoutExpired) => Ok(None),
            Err(e) => Err(e).context("live capture read failed"),
        }
    }

    fn stats(&self) -> CaptureStats {
        self.stats.clone()
    }
}

/// PCAP file replay.
pub struct FileCapture {
    cap: Capture<Offline>,
    stats: CaptureStats,
    finished: bool,
}

impl FileCapture {
    pub fn open(path: &str, config: &CaptureConfig) -> Result<Self> {
        let mut cap = Capture::from_file(path)
            .with_context(|| format!("Failed to open pcap file: {path}"))?;

        if let Some(filter) = &config.filter {
            cap.filter(filter, true)
                .with_context(|| format!("Failed to set filter: {filter}"))?;
        }

        info!(path, "replaying pcap file");
        Ok(Self {
            cap,
            stats: CaptureStats::default(),
            finished: false,
        })
    }
}

impl PacketCapture for FileCapture {
    fn next_packet(&mut self) -> Result<Option<UdpPacket>> {
        match self.cap.next_packet() {
            Ok(packet) => {
                self.stats.received += 1;
                let ts_sec = packet.header.ts.tv_sec as u64;
                let ts_usec = packet.header.ts.tv_usec as u32;
                match decode_frame(packet.data, ts_sec, ts_usec) {
                    Some(pkt) => Ok(Some(pkt)),
                    None => {
                        self.stats.skipped += 1;
                        Ok(None)
                    }
                }
            }
            Err(pcap::Error::NoMorePackets) => {
                self.finished = true;
                Ok(None)
            }
            Err(e) => Err(e).context("pcap file read failed"),
        }
    }

    fn done(&self) -> bool {
        self.finished
    }

    fn stats(&self) -> CaptureStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::CallArchive;
    use etherparse::PacketBuilder;
    use std::net::Ipv4Addr;

    fn udp_frame(payload: &[u8]) -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12])
            .ipv4([192, 168, 1, 10], [192, 168, 1, 20], 64)
            .udp(5060, 5060);
        let mut frame = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut frame, payload).unwrap();
        frame
    }

    #[test]
    fn test_create_capture_requires_source() {
        let config = CaptureConfig::default();
        assert!(create_capture(&config).is_err());
    }

    #[test]
    fn test_file_capture_roundtrip() {
        // write a pcap file through the archive, then replay it
        let dir = tempfile::tempdir().unwrap();
        let mut archive = CallArchive::open(dir.path(), "replay", false).unwrap();
        let frame = udp_frame(b"OPTIONS sip:x SIP/2.0\r\n");
        archive.write(&UdpPacket {
            src_ip: Ipv4Addr::new(192, 168, 1, 10),
            src_port: 5060,
            dst_ip: Ipv4Addr::new(192, 168, 1, 20),
            dst_port: 5060,
            payload: Vec::new(),
            frame,
            ts_sec: 1234,
            ts_usec: 0,
        });
        let path = archive.path().to_str().unwrap().to_string();
        drop(archive);

        let config = CaptureConfig {
            pcap_file: Some(path.clone()),
            filter: None,
            ..CaptureConfig::default()
        };
        let mut capture = FileCapture::open(&path, &config).unwrap();

        let pkt = capture.next_packet().unwrap().expect("one packet");
        assert_eq!(pkt.src_port, 5060);
        assert_eq!(pkt.ts_sec, 1234);
        assert!(pkt.payload.starts_with(b"OPTIONS"));
        assert!(!capture.done());

        assert!(capture.next_packet().unwrap().is_none());
        assert!(capture.done());
        assert_eq!(capture.stats().received, 1);
    }
}

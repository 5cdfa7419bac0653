//! Per-call packet archive
//!
//! Every packet matched to a call is appended to that call's own pcap
//! file under the spool directory. The archive is opened when the dialog
//! opens and closed when the call is evicted; a dead capture handle
//! provides the savefile writer so no live device is needed.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pcap::{Capture, Linktype, Packet, PacketHeader, Savefile};

use crate::core::UdpPacket;

/// Open pcap writer for one call's packets.
pub struct CallArchive {
    savefile: Savefile,
    path: PathBuf,
    /// Flush after every packet, trading throughput for crash-safe files
    packet_buffered: bool,
    pub packets_written: u64,
}

impl CallArchive {
    /// Open `<spool_dir>/<basename>/<basename>.pcap`, creating the
    /// per-call directory as needed.
    pub fn open(spool_dir: &Path, basename: &str, packet_buffered: bool) -> Result<Self> {
        let dir = spool_dir.join(basename);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create call directory: {}", dir.display()))?;
        let path = dir.join(format!("{basename}.pcap"));

        let dead = Capture::dead(Linktype::ETHERNET)
            .context("Failed to create dead capture handle")?;
        let savefile = dead
            .savefile(&path)
            .with_context(|| format!("Failed to open call archive: {}", path.display()))?;

        Ok(Self {
            savefile,
            path,
            packet_buffered,
            packets_written: 0,
        })
    }

    /// Append one captured frame with its original timestamp.
    pub fn write(&mut self, pkt: &UdpPacket) {
        let header = PacketHeader {
            ts: libc::timeval {
                tv_sec: pkt.ts_sec as libc::time_t,
                tv_usec: pkt.ts_usec as libc::suseconds_t,
            },
            caplen: pkt.frame.len() as u32,
            len: pkt.frame.len() as u32,
        };
        self.savefile.write(&Packet::new(&header, &pkt.frame));
        if self.packet_buffered {
            let _ = self.savefile.flush();
        }
        self.packets_written += 1;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for CallArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallArchive")
            .field("path", &self.path)
            .field("packets_written", &self.packets_written)
            .finish()
    }
}

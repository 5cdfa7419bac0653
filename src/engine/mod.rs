//! Correlation dispatcher
//!
//! One single-threaded, run-to-completion path classifies every decoded
//! UDP datagram: media for a known call, signaling on the SIP port, or
//! noise. It owns the call table outright, so no lock guards the lookup
//! indices; the only shared state is the handoff queue the table pushes
//! evicted calls onto.
//!
//! The idle-call sweep rides this same path, triggered whenever the
//! capture timestamp crosses the sweep interval since the last run.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, trace, warn};

use crate::call::CallTable;
use crate::capture::PacketCapture;
use crate::config::EngineConfig;
use crate::core::UdpPacket;
use crate::error::CallError;
use crate::sink::CallArchive;
use crate::sip::{
    self, find_tag, has_sdp_content, message_body, sdp_media_endpoint, sip_peer_name, SipMethod,
    TagScan, EMPTY_PEER,
};

/// Dispatch counters
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Packets handed to the dispatcher
    pub packets: u64,
    /// Packets routed as media to an existing call
    pub media_packets: u64,
    /// Packets routed as signaling
    pub signaling_packets: u64,
    /// Signaling packets without a scannable Call-ID
    pub no_call_id: u64,
    /// Signaling for a dialog the table does not know, non-INVITE
    pub unknown_dialog: u64,
    /// Calls created
    pub calls_created: u64,
    /// Dialog identifiers refused (too long)
    pub calls_rejected: u64,
    /// Media endpoints registered from SDP
    pub endpoints_registered: u64,
    /// Packets written to per-call archives
    pub packets_archived: u64,
    /// UDP packets of no interest
    pub ignored: u64,
    /// Capture-level errors skipped
    pub capture_errors: u64,
}

/// The correlation engine: owns the call table and drives it from a
/// packet stream.
pub struct Engine {
    config: EngineConfig,
    table: CallTable,
    /// Packet-timeline second of the last sweep
    last_cleanup: u64,
    pub stats: EngineStats,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let table = CallTable::new(config.max_call_id_len, config.idle_timeout_secs);
        Self {
            config,
            table,
            last_cleanup: 0,
            stats: EngineStats::default(),
        }
    }

    /// The call table, for inspection.
    pub fn table(&self) -> &CallTable {
        &self.table
    }

    /// Handle to the finalized-call queue, for the persistence worker.
    pub fn handoff_queue(&self) -> crate::call::HandoffQueue {
        self.table.queue()
    }

    /// Process packets until the termination flag is set or the capture
    /// is exhausted, then evict every remaining call to the handoff
    /// queue.
    pub fn run(&mut self, capture: &mut dyn PacketCapture, shutdown: &AtomicBool) {
        while !shutdown.load(Ordering::Relaxed) {
            match capture.next_packet() {
                Ok(Some(pkt)) => self.dispatch(&pkt),
                Ok(None) => {
                    if capture.done() {
                        break;
                    }
                }
                Err(e) => {
                    self.stats.capture_errors += 1;
                    warn!("capture error: {e:#}");
                }
            }
        }

        info!(live_calls = self.table.len(), "capture finished, draining call table");
        self.table.drain_all();
    }

    /// Route one decoded datagram. This is the only mutation path into
    /// the call table.
    pub fn dispatch(&mut self, pkt: &UdpPacket) {
        self.stats.packets += 1;

        // sweep when the packet timeline crosses the interval
        if pkt.ts_sec.saturating_sub(self.last_cleanup) > self.config.sweep_interval_secs {
            if self.last_cleanup > 0 {
                let evicted = self.table.cleanup(pkt.ts_sec);
                if evicted > 0 {
                    debug!(evicted, "idle sweep");
                }
            }
            self.last_cleanup = pkt.ts_sec;
        }

        // media first: a packet to or from a registered endpoint belongs
        // to that call no matter what port it rides on
        for (addr, port) in [pkt.dst_endpoint(), pkt.src_endpoint()] {
            if let Some(call) = self.table.find_by_ip_port(addr, port) {
                if let Err(e) = call.read_rtp(&pkt.payload, pkt.src_ip, pkt.src_port) {
                    debug!(call_id = %call.call_id, "media packet not slotted: {e}");
                }
                call.touch(pkt.ts_sec);
                if let Some(archive) = call.archive.as_mut() {
                    archive.write(pkt);
                    self.stats.packets_archived += 1;
                }
                self.stats.media_packets += 1;
                return;
            }
        }

        if pkt.src_port == self.config.sip_port || pkt.dst_port == self.config.sip_port {
            self.dispatch_signaling(pkt);
        } else {
            trace!(
                "skipping udp packet {}:{} -> {}:{}",
                pkt.src_ip,
                pkt.src_port,
                pkt.dst_ip,
                pkt.dst_port
            );
            self.stats.ignored += 1;
        }
    }

    fn dispatch_signaling(&mut self, pkt: &UdpPacket) {
        let payload = &pkt.payload[..];

        let call_id = match find_tag(payload, sip::CALL_ID) {
            TagScan::Found(span) => String::from_utf8_lossy(span).into_owned(),
            TagScan::Empty | TagScan::NotFound => {
                self.stats.no_call_id += 1;
                return;
            }
        };

        let method = SipMethod::classify(payload);
        trace!(call_id = %call_id, %method, "sip message");

        if self.table.find_by_call_id(&call_id).is_none() {
            // only a dialog-opening request creates state
            if method != SipMethod::Invite {
                self.stats.unknown_dialog += 1;
                return;
            }
            match self.table.add(&call_id, pkt.ts_sec) {
                Ok(call) => {
                    if self.config.archive {
                        match CallArchive::open(
                            &self.config.spool_dir,
                            &call.basename,
                            self.config.packet_buffered,
                        ) {
                            Ok(archive) => call.archive = Some(archive),
                            Err(e) => {
                                warn!(call_id = %call.call_id, "archive not opened: {e:#}")
                            }
                        }
                    }
                    self.stats.calls_created += 1;
                }
                Err(e @ CallError::IdentifierTooLong { .. }) => {
                    warn!("call refused: {e}");
                    self.stats.calls_rejected += 1;
                    return;
                }
                Err(e) => {
                    warn!("call refused: {e}");
                    return;
                }
            }
        }

        let Some(call) = self.table.find_by_call_id(&call_id) else {
            return;
        };
        call.touch(pkt.ts_sec);

        let cseq = find_tag(payload, sip::CSEQ);
        match method {
            SipMethod::Invite => {
                call.record_invite(cseq.value());
                let caller = sip_peer_name(payload, sip::FROM)
                    .unwrap_or_else(|_| EMPTY_PEER.to_string());
                let called =
                    sip_peer_name(payload, sip::TO).unwrap_or_else(|_| EMPTY_PEER.to_string());
                call.set_peers(caller, called);
            }
            SipMethod::Bye | SipMethod::Cancel => {
                if let TagScan::Found(token) = cseq {
                    call.record_teardown(token);
                }
            }
            SipMethod::Ok2xx => {
                if let TagScan::Found(token) = cseq {
                    call.record_success(token);
                }
            }
            SipMethod::Other => {}
        }

        // a message announcing SDP publishes a media endpoint
        if has_sdp_content(payload) {
            if let Some(body) = message_body(payload) {
                match sdp_media_endpoint(body) {
                    Ok((addr, port)) => {
                        let user_agent = find_tag(payload, sip::USER_AGENT)
                            .value()
                            .map(|v| String::from_utf8_lossy(v).into_owned())
                            .unwrap_or_default();
                        match self.table.register_endpoint(&call_id, addr, port, user_agent) {
                            Ok(()) => self.stats.endpoints_registered += 1,
                            // re-announcement of a known endpoint
                            Err(CallError::DuplicateRegistration) => {}
                            Err(e) => debug!(call_id = %call_id, "endpoint not registered: {e}"),
                        }
                    }
                    Err(e) => debug!(call_id = %call_id, "can't get ip/port from sdp: {e}"),
                }
            }
        }

        if let Some(call) = self.table.find_by_call_id(&call_id) {
            if let Some(archive) = call.archive.as_mut() {
                archive.write(pkt);
                self.stats.packets_archived += 1;
            }
        }
        self.stats.signaling_packets += 1;
    }
}

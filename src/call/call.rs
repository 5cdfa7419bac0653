//! Per-dialog call state
//!
//! One [`Call`] exists per SIP dialog, created when the opening INVITE is
//! seen and mutated by every later packet matched to it. Dialog progress
//! is tracked with four monotonic flags; a 2xx response is matched back to
//! the INVITE or BYE/CANCEL it answers through the stored CSeq tokens.

use std::net::Ipv4Addr;

use tracing::debug;

use crate::error::CallError;
use crate::sink::CallArchive;

use super::rtp::{RtpHeader, RtpStream};
use super::{MAX_ENDPOINTS_PER_CALL, MAX_STREAMS_PER_CALL};

/// A media endpoint announced in an SDP body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaEndpoint {
    pub addr: Ipv4Addr,
    pub port: u16,
    /// User-Agent header seen alongside the announcement
    pub user_agent: String,
}

/// One SIP dialog and its correlated media state.
#[derive(Debug)]
pub struct Call {
    /// Dialog identifier (Call-ID). Immutable after creation.
    pub call_id: String,
    /// Base name for the per-call archive file
    pub basename: String,
    /// Caller identity from From:, best effort
    pub caller: String,
    /// Callee identity from To:, best effort
    pub called: String,

    /// CSeq of the last INVITE, to match its 2xx
    pub invite_cseq: Option<String>,
    /// CSeq of the last BYE or CANCEL, to match its 2xx
    pub bye_cseq: Option<String>,

    // Dialog flags. Monotonic: set once, never cleared.
    pub seen_invite: bool,
    pub seen_invite_ok: bool,
    pub seen_bye: bool,
    pub seen_bye_ok: bool,

    /// Media endpoints registered from SDP, unique on (addr, port)
    endpoints: Vec<MediaEndpoint>,
    /// Correlated RTP streams, keyed by SSRC
    streams: Vec<RtpStream>,

    /// Capture time of the first packet (call start)
    pub first_packet: u64,
    /// Capture time of the most recent matched packet
    pub last_packet: u64,

    /// Per-call packet archive, owned until eviction
    pub archive: Option<CallArchive>,
}

impl Call {
    pub fn new(call_id: String, ts: u64) -> Self {
        let basename = sanitize_name(&call_id);
        Self {
            call_id,
            basename,
            caller: String::new(),
            called: String::new(),
            invite_cseq: None,
            bye_cseq: None,
            seen_invite: false,
            seen_invite_ok: false,
            seen_bye: false,
            seen_bye_ok: false,
            endpoints: Vec::new(),
            streams: Vec::new(),
            first_packet: ts,
            last_packet: ts,
            archive: None,
        }
    }

    /// Extend the liveness clock. Never moves backwards.
    pub fn touch(&mut self, ts: u64) {
        self.last_packet = self.last_packet.max(ts);
    }

    /// Record an INVITE (initial or re-INVITE): stores its CSeq token so a
    /// later 2xx can be matched back to it. An INVITE without a scannable
    /// CSeq still marks the dialog as opened.
    pub fn record_invite(&mut self, cseq: Option<&[u8]>) {
        if let Some(cseq) = cseq {
            let token = String::from_utf8_lossy(cseq).into_owned();
            debug!(call_id = %self.call_id, cseq = %token, "seen invite");
            self.invite_cseq = Some(token);
        }
        self.seen_invite = true;
    }

    /// Record a BYE or CANCEL: stores its CSeq token and marks teardown
    /// as requested.
    pub fn record_teardown(&mut self, cseq: &[u8]) {
        let token = String::from_utf8_lossy(cseq).into_owned();
        debug!(call_id = %self.call_id, cseq = %token, "seen bye");
        self.bye_cseq = Some(token);
        self.seen_bye = true;
    }

    /// Record a 2xx response: compared against the stored BYE token first,
    /// then the INVITE token. A token matching neither is ignored.
    pub fn record_success(&mut self, cseq: &[u8]) {
        let token = String::from_utf8_lossy(cseq);
        if self.bye_cseq.as_deref() == Some(token.as_ref()) {
            if !self.seen_bye_ok {
                debug!(call_id = %self.call_id, "call closed");
            }
            self.seen_bye_ok = true;
        } else if self.invite_cseq.as_deref() == Some(token.as_ref()) {
            if !self.seen_invite_ok {
                debug!(call_id = %self.call_id, "call answered");
            }
            self.seen_invite_ok = true;
        }
    }

    /// Best-effort caller/callee update from From:/To:. Runs on every
    /// INVITE, so a re-INVITE's placeholders overwrite previous values.
    pub fn set_peers(&mut self, caller: String, called: String) {
        self.caller = caller;
        self.called = called;
    }

    /// Register a media endpoint announced in an SDP body.
    ///
    /// Duplicates on (addr, port) are rejected with
    /// [`CallError::DuplicateRegistration`] so the caller can treat the
    /// registration as idempotent; a sixth distinct endpoint is rejected
    /// with [`CallError::CapacityExceeded`] and existing state is untouched.
    pub fn add_endpoint(
        &mut self,
        addr: Ipv4Addr,
        port: u16,
        user_agent: String,
    ) -> Result<(), CallError> {
        if self.endpoints.iter().any(|e| e.addr == addr && e.port == port) {
            return Err(CallError::DuplicateRegistration);
        }
        if self.endpoints.len() >= MAX_ENDPOINTS_PER_CALL {
            return Err(CallError::CapacityExceeded {
                what: "media endpoints",
                limit: MAX_ENDPOINTS_PER_CALL,
            });
        }
        self.endpoints.push(MediaEndpoint { addr, port, user_agent });
        Ok(())
    }

    pub fn endpoints(&self) -> &[MediaEndpoint] {
        &self.endpoints
    }

    /// Correlate a media packet into a stream slot by SSRC.
    ///
    /// Payloads that do not carry a version-2 RTP header only refresh
    /// liveness; an eleventh distinct SSRC is rejected with
    /// [`CallError::CapacityExceeded`].
    pub fn read_rtp(
        &mut self,
        payload: &[u8],
        src_ip: Ipv4Addr,
        src_port: u16,
    ) -> Result<(), CallError> {
        let header = match RtpHeader::parse(payload) {
            Some(h) => h,
            None => return Ok(()),
        };
        let payload_len = payload.len() - 12;

        if let Some(stream) = self.streams.iter_mut().find(|s| s.ssrc == header.ssrc) {
            stream.update(&header, payload_len);
            return Ok(());
        }
        if self.streams.len() >= MAX_STREAMS_PER_CALL {
            return Err(CallError::CapacityExceeded {
                what: "rtp streams",
                limit: MAX_STREAMS_PER_CALL,
            });
        }
        self.streams
            .push(RtpStream::new(&header, src_ip, src_port, payload_len));
        Ok(())
    }

    pub fn streams(&self) -> &[RtpStream] {
        &self.streams
    }

    /// Call length in seconds, first packet to last.
    pub fn duration(&self) -> u64 {
        self.last_packet - self.first_packet
    }

    /// True once the INVITE was answered with a matching 2xx.
    pub fn answered(&self) -> bool {
        self.seen_invite_ok
    }

    /// True once the BYE/CANCEL was confirmed with a matching 2xx.
    pub fn finished(&self) -> bool {
        self.seen_bye_ok
    }
}

/// File-system-safe rendition of a dialog identifier, used for the archive
/// directory and base name.
pub fn sanitize_name(call_id: &str) -> String {
    call_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call() -> Call {
        Call::new("abc123@host".to_string(), 1000)
    }

    #[test]
    fn test_invite_ok_matches_cseq() {
        let mut c = call();
        c.record_invite(Some(b"1 INVITE"));
        assert!(c.seen_invite);
        assert!(!c.seen_invite_ok);

        c.record_success(b"1 INVITE");
        assert!(c.seen_invite_ok);
    }

    #[test]
    fn test_invite_ok_requires_same_cseq() {
        let mut c = call();
        c.record_invite(Some(b"1 INVITE"));
        c.record_success(b"2 INVITE");
        assert!(!c.seen_invite_ok);
    }

    #[test]
    fn test_bye_ok_idempotent_across_retransmissions() {
        let mut c = call();
        c.record_invite(Some(b"1 INVITE"));
        c.record_teardown(b"2 BYE");
        assert!(c.seen_bye);

        c.record_success(b"2 BYE");
        assert!(c.seen_bye_ok);
        // retransmitted 2xx changes nothing
        c.record_success(b"2 BYE");
        assert!(c.seen_bye_ok);
        assert!(!c.seen_invite_ok);
    }

    #[test]
    fn test_success_matching_neither_token_is_ignored() {
        let mut c = call();
        c.record_invite(Some(b"1 INVITE"));
        c.record_success(b"7 OPTIONS");
        assert!(!c.seen_invite_ok);
        assert!(!c.seen_bye_ok);
    }

    #[test]
    fn test_reinvite_updates_token() {
        let mut c = call();
        c.record_invite(Some(b"1 INVITE"));
        c.record_invite(Some(b"3 INVITE"));
        c.record_success(b"1 INVITE");
        assert!(!c.seen_invite_ok);
        c.record_success(b"3 INVITE");
        assert!(c.seen_invite_ok);
    }

    #[test]
    fn test_endpoint_duplicate_and_capacity() {
        let mut c = call();
        let addr = Ipv4Addr::new(10, 0, 0, 5);
        c.add_endpoint(addr, 30000, String::new()).unwrap();
        assert_eq!(
            c.add_endpoint(addr, 30000, String::new()),
            Err(CallError::DuplicateRegistration)
        );

        for i in 1..MAX_ENDPOINTS_PER_CALL {
            c.add_endpoint(addr, 30000 + i as u16, String::new()).unwrap();
        }
        assert_eq!(
            c.add_endpoint(addr, 40000, String::new()),
            Err(CallError::CapacityExceeded {
                what: "media endpoints",
                limit: MAX_ENDPOINTS_PER_CALL
            })
        );
        assert_eq!(c.endpoints().len(), MAX_ENDPOINTS_PER_CALL);
    }

    #[test]
    fn test_touch_is_monotonic() {
        let mut c = call();
        c.touch(1100);
        assert_eq!(c.last_packet, 1100);
        c.touch(1050);
        assert_eq!(c.last_packet, 1100);
        assert_eq!(c.duration(), 100);
    }

    #[test]
    fn test_rtp_stream_slots() {
        let mut c = call();
        let addr = Ipv4Addr::new(10, 0, 0, 5);
        let mut pkt = vec![0u8; 172];
        pkt[0] = 0x80;

        for ssrc in 0u32..MAX_STREAMS_PER_CALL as u32 {
            pkt[8..12].copy_from_slice(&ssrc.to_be_bytes());
            c.read_rtp(&pkt, addr, 30000).unwrap();
        }
        assert_eq!(c.streams().len(), MAX_STREAMS_PER_CALL);

        // same SSRC goes into the existing slot
        c.read_rtp(&pkt, addr, 30000).unwrap();
        assert_eq!(c.streams().len(), MAX_STREAMS_PER_CALL);
        assert_eq!(c.streams().last().unwrap().packets, 2);

        // an eleventh SSRC is refused
        pkt[8..12].copy_from_slice(&100u32.to_be_bytes());
        assert!(matches!(
            c.read_rtp(&pkt, addr, 30000),
            Err(CallError::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn test_non_rtp_payload_ignored() {
        let mut c = call();
        assert!(c.read_rtp(b"short", Ipv4Addr::new(1, 1, 1, 1), 1).is_ok());
        assert!(c.streams().is_empty());
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("abc123@host.example"), "abc123_host.example");
        assert_eq!(sanitize_name("x/../y"), "x_.._y");
    }
}

//! SIP message scanning and classification
//!
//! No full message parse happens anywhere in this crate: signaling is
//! classified by its first-line prefix and individual fields are pulled
//! out of the raw buffer by the tag scanner.

pub mod fields;
pub mod tag;

pub use fields::{sdp_media_endpoint, sip_branch, sip_peer_name, EMPTY_PEER};
pub use tag::{find_tag, TagScan};

use memchr::memmem;

/// Well-known SIP signaling port.
pub const SIP_PORT: u16 = 5060;

/// Header labels the engine scans for.
pub const CALL_ID: &[u8] = b"Call-ID:";
pub const CSEQ: &[u8] = b"CSeq:";
pub const FROM: &str = "From:";
pub const TO: &str = "To:";
pub const CONTENT_TYPE: &[u8] = b"Content-Type:";
pub const USER_AGENT: &[u8] = b"User-Agent:";

/// Signaling message class, decided from the first line only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SipMethod {
    Invite,
    Bye,
    Cancel,
    /// Any 2xx final response (`SIP/2.0 2..`)
    Ok2xx,
    /// Everything else: provisional and non-2xx final responses,
    /// unrecognized requests. Liveness-only, no state change.
    Other,
}

impl SipMethod {
    /// Classify a signaling payload by its first-line prefix.
    pub fn classify(payload: &[u8]) -> SipMethod {
        if payload.starts_with(b"INVITE") {
            SipMethod::Invite
        } else if payload.starts_with(b"BYE") {
            SipMethod::Bye
        } else if payload.starts_with(b"CANCEL") {
            SipMethod::Cancel
        } else if payload.starts_with(b"SIP/2.0 2") {
            SipMethod::Ok2xx
        } else {
            SipMethod::Other
        }
    }
}

impl std::fmt::Display for SipMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SipMethod::Invite => write!(f, "INVITE"),
            SipMethod::Bye => write!(f, "BYE"),
            SipMethod::Cancel => write!(f, "CANCEL"),
            SipMethod::Ok2xx => write!(f, "2XX"),
            SipMethod::Other => write!(f, "OTHER"),
        }
    }
}

/// Locate the SDP body of a signaling message: everything after the blank
/// line separating headers from body. Returns `None` when the message
/// carries no body.
pub fn message_body(payload: &[u8]) -> Option<&[u8]> {
    memmem::find(payload, b"\r\n\r\n").map(|pos| &payload[pos + 4..])
}

/// True when the Content-Type header announces an SDP body.
pub fn has_sdp_content(payload: &[u8]) -> bool {
    match find_tag(payload, CONTENT_TYPE) {
        TagScan::Found(v) => v.eq_ignore_ascii_case(b"application/sdp"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_requests() {
        assert_eq!(SipMethod::classify(b"INVITE sip:b@x SIP/2.0\r\n"), SipMethod::Invite);
        assert_eq!(SipMethod::classify(b"BYE sip:b@x SIP/2.0\r\n"), SipMethod::Bye);
        assert_eq!(SipMethod::classify(b"CANCEL sip:b@x SIP/2.0\r\n"), SipMethod::Cancel);
    }

    #[test]
    fn test_classify_responses() {
        assert_eq!(SipMethod::classify(b"SIP/2.0 200 OK\r\n"), SipMethod::Ok2xx);
        assert_eq!(SipMethod::classify(b"SIP/2.0 202 Accepted\r\n"), SipMethod::Ok2xx);
        // non-2xx finals and provisionals stay liveness-only
        assert_eq!(SipMethod::classify(b"SIP/2.0 180 Ringing\r\n"), SipMethod::Other);
        assert_eq!(SipMethod::classify(b"SIP/2.0 486 Busy Here\r\n"), SipMethod::Other);
        assert_eq!(SipMethod::classify(b"SIP/2.0 603 Decline\r\n"), SipMethod::Other);
    }

    #[test]
    fn test_classify_unknown() {
        assert_eq!(SipMethod::classify(b"REGISTER sip:x SIP/2.0\r\n"), SipMethod::Other);
        assert_eq!(SipMethod::classify(b""), SipMethod::Other);
    }

    #[test]
    fn test_message_body() {
        let msg = b"INVITE sip:b@x SIP/2.0\r\nContent-Type: application/sdp\r\n\r\nv=0\r\n";
        assert_eq!(message_body(msg), Some(b"v=0\r\n".as_slice()));
        assert_eq!(message_body(b"BYE sip:b@x SIP/2.0\r\nCSeq: 2 BYE"), None);
    }

    #[test]
    fn test_has_sdp_content() {
        assert!(has_sdp_content(b"Content-Type: application/sdp\r\n"));
        assert!(has_sdp_content(b"Content-Type: Application/SDP\r\n"));
        assert!(!has_sdp_content(b"Content-Type: text/plain\r\n"));
        assert!(!has_sdp_content(b"CSeq: 1 INVITE\r\n"));
    }
}

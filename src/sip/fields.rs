//! Typed field extractors
//!
//! Semantic values pulled out of scanned header spans: peer identity from
//! From/To, the Via branch parameter, and the media endpoint announced in
//! an SDP body. Extraction failures surface as [`CallError`] values so the
//! caller can fall back to a placeholder or skip the update; nothing here
//! aborts packet processing.

use std::net::Ipv4Addr;
use std::str::FromStr;

use memchr::memmem;

use crate::error::{CallError, Result};

use super::tag::{find_tag, TagScan};

/// Placeholder identity when a From/To field cannot be parsed.
pub const EMPTY_PEER: &str = "empty";

/// SDP connection-line label.
pub const SDP_CONNECTION: &[u8] = b"c=IN IP4 ";
/// SDP audio media-line label.
pub const SDP_AUDIO: &[u8] = b"m=audio ";

/// Extract the peer identity from a From/To-style header: the substring
/// between `sip:` and the following `@`.
pub fn sip_peer_name(data: &[u8], label: &'static str) -> Result<String> {
    let span = match find_tag(data, label.as_bytes()) {
        TagScan::Found(v) => v,
        TagScan::Empty | TagScan::NotFound => return Err(CallError::FieldNotFound(label)),
    };

    let start = memmem::find(span, b"sip:").ok_or(CallError::MalformedValue { field: label })? + 4;
    let at = memmem::find(span, b"@").ok_or(CallError::MalformedValue { field: label })?;
    if at <= start {
        return Err(CallError::MalformedValue { field: label });
    }

    Ok(String::from_utf8_lossy(&span[start..at]).into_owned())
}

/// Extract the branch parameter from a Via-style header: the substring
/// between `branch=` and the following `;`.
pub fn sip_branch(data: &[u8], label: &'static str) -> Result<String> {
    let span = match find_tag(data, label.as_bytes()) {
        TagScan::Found(v) => v,
        TagScan::Empty | TagScan::NotFound => return Err(CallError::FieldNotFound(label)),
    };

    let start =
        memmem::find(span, b"branch=").ok_or(CallError::MalformedValue { field: label })? + 7;
    let value = &span[start..];
    let end = memmem::find(value, b";").ok_or(CallError::MalformedValue { field: label })?;
    if end == 0 {
        return Err(CallError::MalformedValue { field: label });
    }

    Ok(String::from_utf8_lossy(&value[..end]).into_owned())
}

/// Extract the announced media endpoint from an SDP body: the connection
/// address from `c=IN IP4 ` and the port from the first `m=audio ` line.
///
/// The address must be a valid dotted IPv4 literal and the port a positive
/// integer; either failure means no endpoint is registered.
pub fn sdp_media_endpoint(body: &[u8]) -> Result<(Ipv4Addr, u16)> {
    let addr_span = match find_tag(body, SDP_CONNECTION) {
        TagScan::Found(v) => v,
        _ => return Err(CallError::FieldNotFound("c=IN IP4")),
    };
    let addr_str = std::str::from_utf8(addr_span)
        .map_err(|_| CallError::MalformedValue { field: "c=IN IP4" })?;
    let addr = Ipv4Addr::from_str(addr_str.trim_end())
        .map_err(|_| CallError::MalformedValue { field: "c=IN IP4" })?;

    let port_span = match find_tag(body, SDP_AUDIO) {
        TagScan::Found(v) => v,
        _ => return Err(CallError::FieldNotFound("m=audio")),
    };
    // the media line continues with the transport profile: "49170 RTP/AVP 0"
    let digits_len = port_span
        .iter()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(port_span.len());
    let port: u16 = std::str::from_utf8(&port_span[..digits_len])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CallError::MalformedValue { field: "m=audio" })?;
    if port == 0 {
        return Err(CallError::MalformedValue { field: "m=audio" });
    }

    Ok((addr, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_name() {
        let buf = b"From: \"Alice\" <sip:alice@example.com>;tag=1\r\n";
        assert_eq!(sip_peer_name(buf, "From:").unwrap(), "alice");
    }

    #[test]
    fn test_peer_name_missing_scheme() {
        let buf = b"From: <tel:+15551234567>\r\n";
        assert_eq!(
            sip_peer_name(buf, "From:"),
            Err(CallError::MalformedValue { field: "From:" })
        );
    }

    #[test]
    fn test_peer_name_at_before_scheme() {
        let buf = b"From: \"x@y\" <sip:nohost>\r\n";
        assert!(sip_peer_name(buf, "From:").is_err());
    }

    #[test]
    fn test_peer_name_header_absent() {
        assert_eq!(
            sip_peer_name(b"To: <sip:bob@b.com>\r\n", "From:"),
            Err(CallError::FieldNotFound("From:"))
        );
    }

    #[test]
    fn test_branch() {
        let buf = b"Via: SIP/2.0/UDP h.example.com;branch=z9hG4bK776asdhds;rport\r\n";
        assert_eq!(sip_branch(buf, "Via:").unwrap(), "z9hG4bK776asdhds");
    }

    #[test]
    fn test_branch_unterminated() {
        let buf = b"Via: SIP/2.0/UDP h.example.com;branch=z9hG4bK776\r\n";
        assert!(sip_branch(buf, "Via:").is_err());
    }

    #[test]
    fn test_branch_empty_value() {
        let buf = b"Via: SIP/2.0/UDP h.example.com;branch=;rport\r\n";
        assert!(sip_branch(buf, "Via:").is_err());
    }

    #[test]
    fn test_sdp_endpoint() {
        let body = b"v=0\r\n\
            o=- 0 0 IN IP4 10.0.0.5\r\n\
            c=IN IP4 10.0.0.5\r\n\
            m=audio 30000 RTP/AVP 0 8\r\n";
        assert_eq!(
            sdp_media_endpoint(body).unwrap(),
            (Ipv4Addr::new(10, 0, 0, 5), 30000)
        );
    }

    #[test]
    fn test_sdp_bad_address() {
        let body = b"c=IN IP4 not.an.ip.addr\r\nm=audio 30000 RTP/AVP 0\r\n";
        assert_eq!(
            sdp_media_endpoint(body),
            Err(CallError::MalformedValue { field: "c=IN IP4" })
        );
    }

    #[test]
    fn test_sdp_zero_port() {
        let body = b"c=IN IP4 10.0.0.5\r\nm=audio 0 RTP/AVP 0\r\n";
        assert!(sdp_media_endpoint(body).is_err());
    }

    #[test]
    fn test_sdp_missing_media_line() {
        let body = b"c=IN IP4 10.0.0.5\r\n";
        assert_eq!(
            sdp_media_endpoint(body),
            Err(CallError::FieldNotFound("m=audio"))
        );
    }
}

//! Frame decapsulation
//!
//! Decodes a captured link-layer frame down to the UDP payload using
//! `etherparse`. Only IPv4/UDP is of interest; everything else is
//! discarded before it reaches the correlation engine.

use std::net::Ipv4Addr;

use etherparse::SlicedPacket;

use super::packet::UdpPacket;

/// Decode one captured frame into a [`UdpPacket`].
///
/// Returns `None` for anything that is not Ethernet/IPv4/UDP (ARP, IPv6,
/// TCP, fragments etherparse cannot slice, truncated frames).
pub fn decode_frame(frame: &[u8], ts_sec: u64, ts_usec: u32) -> Option<UdpPacket> {
    let sliced = SlicedPacket::from_ethernet(frame).ok()?;

    let (src_ip, dst_ip) = match &sliced.net {
        Some(etherparse::NetSlice::Ipv4(ipv4)) => {
            let header = ipv4.header();
            (
                Ipv4Addr::from(header.source()),
                Ipv4Addr::from(header.destination()),
            )
        }
        // IPv6 and non-IP payloads are out of scope
        _ => return None,
    };

    match &sliced.transport {
        Some(etherparse::TransportSlice::Udp(udp)) => Some(UdpPacket {
            src_ip,
            src_port: udp.source_port(),
            dst_ip,
            dst_port: udp.destination_port(),
            payload: udp.payload().to_vec(),
            frame: frame.to_vec(),
            ts_sec,
            ts_usec,
        }),
        _ => None,
    }
}

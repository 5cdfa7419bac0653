//! Call entities and the live-call registry

pub mod call;
pub mod rtp;
pub mod table;

pub use call::{Call, MediaEndpoint};
pub use rtp::{RtpHeader, RtpStream};
pub use table::{CallTable, HandoffQueue};

/// Most media endpoints one call may register from SDP.
pub const MAX_ENDPOINTS_PER_CALL: usize = 5;
/// Most RTP streams (distinct SSRCs) tracked per call.
pub const MAX_STREAMS_PER_CALL: usize = 10;

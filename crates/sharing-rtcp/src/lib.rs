//! RTCP sender/receiver statistics engines.
//!
//! Provides:
//! - `RtcpPacket` - SR, RR and XR (RRTR / DLRR) packets with wire encoding
//! - `RtcpSenderContext` - SR generation and round-trip time from echoed RRs
//! - `RtcpReceiverContext` - Jitter, sequence wraparound, loss and RR generation
//! - NTP helpers and injectable clocks

pub mod clock;
pub mod ntp;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod stats;

pub use clock::{Clock, ManualClock, SystemClock};
pub use packet::{DlrrItem, ReportItem, RtcpError, RtcpPacket, RtcpRr, RtcpSr, RtcpType, RtcpXr, XrBlock};
pub use receiver::RtcpReceiverContext;
pub use sender::RtcpSenderContext;
pub use stats::RtpCounters;

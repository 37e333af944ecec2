//! Per-stream RTP accumulators shared by both directions.

/// Packet/byte counters and the latest RTP ↔ NTP mapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtpCounters {
    pub packets: u64,
    pub bytes: u64,
    pub last_rtp_stamp: u32,
    pub last_ntp_stamp_ms: u64,
}

impl RtpCounters {
    pub fn on_rtp(&mut self, stamp: u32, ntp_stamp_ms: u64, bytes: usize) {
        self.packets += 1;
        self.bytes += bytes as u64;
        self.last_rtp_stamp = stamp;
        self.last_ntp_stamp_ms = ntp_stamp_ms;
    }
}

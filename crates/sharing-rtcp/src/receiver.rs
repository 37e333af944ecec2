//! Receiver-side RTCP statistics: jitter, loss and RR generation.

use crate::{
    clock::{Clock, SystemClock},
    ntp,
    packet::{ReportItem, RtcpPacket, RtcpRr, RtcpXr, XrBlock},
    stats::RtpCounters,
};

/// A sequence number above this, followed by one below [`SEQ_WRAP_LOW`], is a wrap.
const SEQ_WRAP_HIGH: u16 = 0xFF00;
const SEQ_WRAP_LOW: u16 = 0xFF;
/// Packets that must pass between two wraps; closer wraps are reordering.
const SEQ_WRAP_MIN_PACKETS: u64 = 0x1FFF;

/// Statistics for one incoming RTP stream.
#[derive(Debug)]
pub struct RtcpReceiverContext<C: Clock = SystemClock> {
    clock: C,
    counters: RtpCounters,
    seq_base: Option<u16>,
    seq_max: u16,
    seq_cycles: u16,
    last_cycle_packets: u64,
    jitter: f64,
    last_rtp_sys_ms: Option<u64>,
    last_sr_lsr: u32,
    last_sr_recv_ms: u64,
    last_expected: u64,
    last_lost: u64,
    verbose: bool,
}

impl Default for RtcpReceiverContext<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl RtcpReceiverContext<SystemClock> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl<C: Clock> RtcpReceiverContext<C> {
    #[must_use]
    pub const fn with_clock(clock: C) -> Self {
        Self {
            clock,
            counters: RtpCounters {
                packets: 0,
                bytes: 0,
                last_rtp_stamp: 0,
                last_ntp_stamp_ms: 0,
            },
            seq_base: None,
            seq_max: 0,
            seq_cycles: 0,
            last_cycle_packets: 0,
            jitter: 0.0,
            last_rtp_sys_ms: None,
            last_sr_lsr: 0,
            last_sr_recv_ms: 0,
            last_expected: 0,
            last_lost: 0,
            verbose: false,
        }
    }

    /// Enable per-packet tracing.
    pub const fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Account for one received RTP packet.
    pub fn on_rtp(&mut self, seq: u16, stamp: u32, ntp_stamp_ms: u64, sample_rate: u32, bytes: usize) {
        let sys_ms = self.clock.now_ms();
        self.update_jitter(sys_ms, stamp, sample_rate);
        self.update_seq(seq);
        self.counters.on_rtp(stamp, ntp_stamp_ms, bytes);

        if self.verbose {
            tracing::trace!(
                seq,
                stamp,
                jitter = self.jitter,
                cycles = self.seq_cycles,
                "rtp received"
            );
        }
    }

    // RFC 3550 A.8, with arrival time scaled to RTP clock units.
    fn update_jitter(&mut self, sys_ms: u64, stamp: u32, sample_rate: u32) {
        if let Some(last_sys_ms) = self.last_rtp_sys_ms {
            let arrival = (sys_ms as f64 - last_sys_ms as f64) * (f64::from(sample_rate) / 1000.0);
            let transit = f64::from(stamp) - f64::from(self.counters.last_rtp_stamp);
            let d = (arrival - transit).abs();
            self.jitter += (d - self.jitter) / 16.0;
        } else {
            self.jitter = 0.0;
        }
        self.last_rtp_sys_ms = Some(sys_ms);
    }

    fn update_seq(&mut self, seq: u16) {
        let packets = self.counters.packets;
        if self.seq_max > SEQ_WRAP_HIGH
            && seq < SEQ_WRAP_LOW
            && (self.last_cycle_packets == 0
                || packets - self.last_cycle_packets > SEQ_WRAP_MIN_PACKETS)
        {
            self.seq_cycles = self.seq_cycles.wrapping_add(1);
            self.last_cycle_packets = packets;
            self.seq_max = seq;
        } else if seq > self.seq_max {
            self.seq_max = seq;
        }

        match self.seq_base {
            None => self.seq_base = Some(seq),
            // Before the first wrap an older sequence number lowers the base.
            Some(base) if self.seq_cycles == 0 && seq < base => self.seq_base = Some(seq),
            Some(_) => {}
        }
    }

    /// Remember the last SR so the next RR can echo LSR / DLSR.
    pub fn on_rtcp(&mut self, packet: &RtcpPacket) {
        if let RtcpPacket::Sr(sr) = packet {
            self.last_sr_lsr = ntp::compact(sr.ntp_msw, sr.ntp_lsw);
            self.last_sr_recv_ms = self.clock.now_ms();
        }
    }

    #[must_use]
    pub const fn counters(&self) -> &RtpCounters {
        &self.counters
    }

    /// Smoothed interarrival jitter in RTP clock units.
    #[must_use]
    pub const fn jitter(&self) -> f64 {
        self.jitter
    }

    #[must_use]
    pub const fn seq_cycles(&self) -> u16 {
        self.seq_cycles
    }

    #[must_use]
    pub const fn seq_max(&self) -> u16 {
        self.seq_max
    }

    #[must_use]
    pub const fn seq_base(&self) -> Option<u16> {
        self.seq_base
    }

    /// Packets expected from the extended sequence range seen so far.
    #[must_use]
    pub fn expected_packets(&self) -> u64 {
        let Some(base) = self.seq_base else {
            return 0;
        };
        ((u64::from(self.seq_cycles) << 16) + u64::from(self.seq_max) + 1)
            .saturating_sub(u64::from(base))
    }

    /// Expected packets since the previous call.
    pub fn expected_packets_interval(&mut self) -> u64 {
        let expected = self.expected_packets();
        let interval = expected.saturating_sub(self.last_expected);
        self.last_expected = expected;
        interval
    }

    /// Cumulative loss; duplicates can push received above expected.
    #[must_use]
    pub fn lost(&self) -> u64 {
        self.expected_packets().saturating_sub(self.counters.packets)
    }

    /// Loss since the previous call.
    pub fn lost_interval(&mut self) -> u64 {
        let lost = self.lost();
        let interval = lost.saturating_sub(self.last_lost);
        self.last_lost = lost;
        interval
    }

    /// Build a Receiver Report for the stream `rtp_ssrc`.
    pub fn create_rtcp_rr(&mut self, rtcp_ssrc: u32, rtp_ssrc: u32) -> RtcpRr {
        let expected_interval = self.expected_packets_interval();
        let lost_interval = self.lost_interval();
        let fraction_lost = if expected_interval == 0 {
            0
        } else {
            ((lost_interval << 8) / expected_interval).min(255) as u8
        };

        let delay_since_last_sr = if self.last_sr_lsr == 0 {
            0
        } else {
            ntp::ms_to_dlsr(self.clock.now_ms().saturating_sub(self.last_sr_recv_ms))
        };

        RtcpRr {
            ssrc: rtcp_ssrc,
            items: vec![ReportItem {
                ssrc: rtp_ssrc,
                fraction_lost,
                cumulative_lost: self.lost().min(0x00FF_FFFF) as u32,
                seq_cycles: self.seq_cycles,
                seq_max: self.seq_max,
                jitter: self.jitter as u32,
                last_sr_stamp: self.last_sr_lsr,
                delay_since_last_sr,
            }],
        }
    }

    /// Receiver reference time report so the peer can measure RTT.
    #[must_use]
    pub fn create_rtcp_xr_rrtr(&self, rtcp_ssrc: u32) -> RtcpXr {
        let (ntp_msw, ntp_lsw) = ntp::from_unix_ms(self.clock.now_ms());
        RtcpXr {
            ssrc: rtcp_ssrc,
            blocks: vec![XrBlock::Rrtr { ntp_msw, ntp_lsw }],
        }
    }
}

//! Sender-side RTCP statistics: SR generation and round-trip time.

use std::collections::{HashMap, VecDeque};

use crate::{
    clock::{Clock, SystemClock},
    ntp,
    packet::{RtcpPacket, RtcpSr, RtcpXr, XrBlock},
    stats::RtpCounters,
};

/// How many sent SRs are remembered for RTT correlation.
pub const SR_HISTORY_LEN: usize = 5;

/// Statistics for one outgoing RTP stream.
#[derive(Debug)]
pub struct RtcpSenderContext<C: Clock = SystemClock> {
    clock: C,
    counters: RtpCounters,
    /// `(compact NTP, send time ms)` of recent SRs, oldest first.
    sender_reports: VecDeque<(u32, u64)>,
    rtt: HashMap<u32, u32>,
    xr_rrtr_last_rr: HashMap<u32, u32>,
    xr_rrtr_recv_ms: HashMap<u32, u64>,
    verbose: bool,
}

impl Default for RtcpSenderContext<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl RtcpSenderContext<SystemClock> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl<C: Clock> RtcpSenderContext<C> {
    #[must_use]
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            counters: RtpCounters::default(),
            sender_reports: VecDeque::with_capacity(SR_HISTORY_LEN + 1),
            rtt: HashMap::new(),
            xr_rrtr_last_rr: HashMap::new(),
            xr_rrtr_recv_ms: HashMap::new(),
            verbose: false,
        }
    }

    /// Enable per-packet tracing.
    pub const fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Account for one sent RTP packet.
    pub fn on_rtp(&mut self, seq: u16, stamp: u32, ntp_stamp_ms: u64, sample_rate: u32, bytes: usize) {
        if self.verbose {
            tracing::trace!(seq, stamp, ntp_stamp_ms, sample_rate, bytes, "rtp sent");
        }
        self.counters.on_rtp(stamp, ntp_stamp_ms, bytes);
    }

    #[must_use]
    pub const fn counters(&self) -> &RtpCounters {
        &self.counters
    }

    /// Build a Sender Report and remember its NTP stamp for RTT correlation.
    pub fn create_rtcp_sr(&mut self, ssrc: u32) -> RtcpSr {
        let (ntp_msw, ntp_lsw) = ntp::from_unix_ms(self.counters.last_ntp_stamp_ms);
        let sr = RtcpSr {
            ssrc,
            ntp_msw,
            ntp_lsw,
            rtp_timestamp: self.counters.last_rtp_stamp,
            packet_count: self.counters.packets as u32,
            octet_count: self.counters.bytes as u32,
            items: Vec::new(),
        };

        let lsr = ntp::compact(ntp_msw, ntp_lsw);
        let now = self.clock.now_ms();
        self.sender_reports.retain(|(stamp, _)| *stamp != lsr);
        self.sender_reports.push_back((lsr, now));
        while self.sender_reports.len() > SR_HISTORY_LEN {
            self.sender_reports.pop_front();
        }
        sr
    }

    /// Consume RTCP feedback about this stream.
    pub fn on_rtcp(&mut self, packet: &RtcpPacket) {
        match packet {
            RtcpPacket::Rr(rr) => {
                let now = self.clock.now_ms();
                for item in &rr.items {
                    if item.last_sr_stamp == 0 {
                        continue;
                    }
                    let Some(&(_, sent_ms)) = self
                        .sender_reports
                        .iter()
                        .find(|(stamp, _)| *stamp == item.last_sr_stamp)
                    else {
                        continue;
                    };
                    let elapsed = i64::try_from(now.saturating_sub(sent_ms)).unwrap_or(i64::MAX);
                    let delay = i64::try_from(ntp::dlsr_to_ms(item.delay_since_last_sr)).unwrap_or(i64::MAX);
                    let rtt = elapsed - delay;
                    if rtt >= 0 {
                        let rtt = u32::try_from(rtt).unwrap_or(u32::MAX);
                        tracing::debug!(ssrc = item.ssrc, rtt, "rtt updated");
                        self.rtt.insert(item.ssrc, rtt);
                    }
                }
            }
            RtcpPacket::Xr(xr) => {
                for block in &xr.blocks {
                    match block {
                        XrBlock::Rrtr { ntp_msw, ntp_lsw } => {
                            self.xr_rrtr_last_rr
                                .insert(xr.ssrc, ntp::compact(*ntp_msw, *ntp_lsw));
                            self.xr_rrtr_recv_ms.insert(xr.ssrc, self.clock.now_ms());
                        }
                        XrBlock::Dlrr(_) => tracing::debug!("Sender ignores XR DLRR"),
                    }
                }
            }
            RtcpPacket::Sr(_) => {}
        }
    }

    /// Last computed round-trip time to `ssrc` in ms, zero if unknown.
    #[must_use]
    pub fn rtt(&self, ssrc: u32) -> u32 {
        self.rtt.get(&ssrc).copied().unwrap_or(0)
    }

    /// Compact NTP and local arrival time of the last RRTR from `ssrc`.
    #[must_use]
    pub fn last_rrtr(&self, ssrc: u32) -> Option<(u32, u64)> {
        Some((
            *self.xr_rrtr_last_rr.get(&ssrc)?,
            *self.xr_rrtr_recv_ms.get(&ssrc)?,
        ))
    }

    /// XR DLRR answering an RRTR; not supported on the sender side.
    #[must_use]
    pub fn create_rtcp_xr_dlrr(&self, rtcp_ssrc: u32, rtp_ssrc: u32) -> Option<RtcpXr> {
        tracing::debug!(rtcp_ssrc, rtp_ssrc, "XR DLRR generation is not supported");
        None
    }
}

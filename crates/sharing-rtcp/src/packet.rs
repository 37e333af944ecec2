//! RTCP packet model with RFC 3550 / RFC 3611 wire encoding.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

const RTCP_VERSION: u8 = 2;
const HEADER_LEN: usize = 4;
const REPORT_ITEM_LEN: usize = 24;
const MAX_REPORT_COUNT: usize = 31;

const XR_BLOCK_RRTR: u8 = 4;
const XR_BLOCK_DLRR: u8 = 5;

/// RTCP parse error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RtcpError {
    #[error("Packet truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("Unsupported RTCP version: {0}")]
    BadVersion(u8),
    #[error("Unsupported RTCP packet type: {0}")]
    UnsupportedType(u8),
    #[error("Too many report items: {0}")]
    TooManyItems(usize),
}

/// RTCP packet types handled by the statistics engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RtcpType {
    Sr = 200,
    Rr = 201,
    Xr = 207,
}

impl TryFrom<u8> for RtcpType {
    type Error = RtcpError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            200 => Ok(Self::Sr),
            201 => Ok(Self::Rr),
            207 => Ok(Self::Xr),
            other => Err(RtcpError::UnsupportedType(other)),
        }
    }
}

/// Reception report block carried by SR and RR packets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportItem {
    pub ssrc: u32,
    pub fraction_lost: u8,
    /// Cumulative number of packets lost, 24 bits on the wire.
    pub cumulative_lost: u32,
    pub seq_cycles: u16,
    pub seq_max: u16,
    pub jitter: u32,
    /// Compact NTP of the last SR received from `ssrc`, zero if none.
    pub last_sr_stamp: u32,
    /// Delay since that SR in 1/65536 seconds.
    pub delay_since_last_sr: u32,
}

impl ReportItem {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.ssrc);
        buf.put_u32((u32::from(self.fraction_lost) << 24) | (self.cumulative_lost & 0x00FF_FFFF));
        buf.put_u16(self.seq_cycles);
        buf.put_u16(self.seq_max);
        buf.put_u32(self.jitter);
        buf.put_u32(self.last_sr_stamp);
        buf.put_u32(self.delay_since_last_sr);
    }

    fn decode(buf: &mut &[u8]) -> Self {
        let ssrc = buf.get_u32();
        let lost = buf.get_u32();
        Self {
            ssrc,
            fraction_lost: (lost >> 24) as u8,
            cumulative_lost: lost & 0x00FF_FFFF,
            seq_cycles: buf.get_u16(),
            seq_max: buf.get_u16(),
            jitter: buf.get_u32(),
            last_sr_stamp: buf.get_u32(),
            delay_since_last_sr: buf.get_u32(),
        }
    }
}

/// Sender Report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtcpSr {
    pub ssrc: u32,
    pub ntp_msw: u32,
    pub ntp_lsw: u32,
    pub rtp_timestamp: u32,
    pub packet_count: u32,
    pub octet_count: u32,
    pub items: Vec<ReportItem>,
}

/// Receiver Report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtcpRr {
    pub ssrc: u32,
    pub items: Vec<ReportItem>,
}

/// One DLRR sub-block (RFC 3611 §4.5).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DlrrItem {
    pub ssrc: u32,
    pub last_rr: u32,
    pub delay_since_last_rr: u32,
}

/// Extended report block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XrBlock {
    /// Receiver reference time (block type 4).
    Rrtr { ntp_msw: u32, ntp_lsw: u32 },
    /// Delay since last receiver report (block type 5).
    Dlrr(Vec<DlrrItem>),
}

/// Extended Report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtcpXr {
    pub ssrc: u32,
    pub blocks: Vec<XrBlock>,
}

/// Any RTCP packet understood by the statistics engines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    Sr(RtcpSr),
    Rr(RtcpRr),
    Xr(RtcpXr),
}

impl From<RtcpSr> for RtcpPacket {
    fn from(sr: RtcpSr) -> Self {
        Self::Sr(sr)
    }
}

impl From<RtcpRr> for RtcpPacket {
    fn from(rr: RtcpRr) -> Self {
        Self::Rr(rr)
    }
}

impl From<RtcpXr> for RtcpPacket {
    fn from(xr: RtcpXr) -> Self {
        Self::Xr(xr)
    }
}

fn put_header(buf: &mut BytesMut, count: usize, pt: RtcpType, body_len: usize) {
    buf.put_u8((RTCP_VERSION << 6) | (count as u8 & 0x1F));
    buf.put_u8(pt as u8);
    // Length in 32-bit words minus one, header included.
    buf.put_u16(((HEADER_LEN + body_len) / 4 - 1) as u16);
}

fn ensure(buf: &[u8], needed: usize) -> Result<(), RtcpError> {
    if buf.len() < needed {
        return Err(RtcpError::Truncated {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

impl RtcpPacket {
    /// Packet type.
    #[must_use]
    pub const fn packet_type(&self) -> RtcpType {
        match self {
            Self::Sr(_) => RtcpType::Sr,
            Self::Rr(_) => RtcpType::Rr,
            Self::Xr(_) => RtcpType::Xr,
        }
    }

    /// Serialize into network byte order.
    ///
    /// # Errors
    /// Returns error if a report carries more than 31 items.
    pub fn encode(&self) -> Result<Bytes, RtcpError> {
        let mut buf = BytesMut::new();
        match self {
            Self::Sr(sr) => {
                if sr.items.len() > MAX_REPORT_COUNT {
                    return Err(RtcpError::TooManyItems(sr.items.len()));
                }
                put_header(&mut buf, sr.items.len(), RtcpType::Sr, 24 + sr.items.len() * REPORT_ITEM_LEN);
                buf.put_u32(sr.ssrc);
                buf.put_u32(sr.ntp_msw);
                buf.put_u32(sr.ntp_lsw);
                buf.put_u32(sr.rtp_timestamp);
                buf.put_u32(sr.packet_count);
                buf.put_u32(sr.octet_count);
                for item in &sr.items {
                    item.encode(&mut buf);
                }
            }
            Self::Rr(rr) => {
                if rr.items.len() > MAX_REPORT_COUNT {
                    return Err(RtcpError::TooManyItems(rr.items.len()));
                }
                put_header(&mut buf, rr.items.len(), RtcpType::Rr, 4 + rr.items.len() * REPORT_ITEM_LEN);
                buf.put_u32(rr.ssrc);
                for item in &rr.items {
                    item.encode(&mut buf);
                }
            }
            Self::Xr(xr) => {
                let body_len = 4 + xr
                    .blocks
                    .iter()
                    .map(|b| match b {
                        XrBlock::Rrtr { .. } => 12,
                        XrBlock::Dlrr(items) => 4 + items.len() * 12,
                    })
                    .sum::<usize>();
                put_header(&mut buf, 0, RtcpType::Xr, body_len);
                buf.put_u32(xr.ssrc);
                for block in &xr.blocks {
                    match block {
                        XrBlock::Rrtr { ntp_msw, ntp_lsw } => {
                            buf.put_u8(XR_BLOCK_RRTR);
                            buf.put_u8(0);
                            buf.put_u16(2);
                            buf.put_u32(*ntp_msw);
                            buf.put_u32(*ntp_lsw);
                        }
                        XrBlock::Dlrr(items) => {
                            buf.put_u8(XR_BLOCK_DLRR);
                            buf.put_u8(0);
                            buf.put_u16((items.len() * 3) as u16);
                            for item in items {
                                buf.put_u32(item.ssrc);
                                buf.put_u32(item.last_rr);
                                buf.put_u32(item.delay_since_last_rr);
                            }
                        }
                    }
                }
            }
        }
        Ok(buf.freeze())
    }

    /// Parse one packet from the front of `data`, returning it and the bytes consumed.
    ///
    /// # Errors
    /// Returns error on truncation, wrong version or unsupported type.
    pub fn parse(data: &[u8]) -> Result<(Self, usize), RtcpError> {
        ensure(data, HEADER_LEN)?;
        let version = data[0] >> 6;
        if version != RTCP_VERSION {
            return Err(RtcpError::BadVersion(version));
        }
        let count = usize::from(data[0] & 0x1F);
        let pt = RtcpType::try_from(data[1])?;
        let total = (usize::from(u16::from_be_bytes([data[2], data[3]])) + 1) * 4;
        ensure(data, total)?;

        let mut body = &data[HEADER_LEN..total];
        let packet = match pt {
            RtcpType::Sr => {
                ensure(body, 24 + count * REPORT_ITEM_LEN)?;
                let mut sr = RtcpSr {
                    ssrc: body.get_u32(),
                    ntp_msw: body.get_u32(),
                    ntp_lsw: body.get_u32(),
                    rtp_timestamp: body.get_u32(),
                    packet_count: body.get_u32(),
                    octet_count: body.get_u32(),
                    items: Vec::with_capacity(count),
                };
                for _ in 0..count {
                    sr.items.push(ReportItem::decode(&mut body));
                }
                Self::Sr(sr)
            }
            RtcpType::Rr => {
                ensure(body, 4 + count * REPORT_ITEM_LEN)?;
                let mut rr = RtcpRr {
                    ssrc: body.get_u32(),
                    items: Vec::with_capacity(count),
                };
                for _ in 0..count {
                    rr.items.push(ReportItem::decode(&mut body));
                }
                Self::Rr(rr)
            }
            RtcpType::Xr => {
                ensure(body, 4)?;
                let mut xr = RtcpXr {
                    ssrc: body.get_u32(),
                    blocks: Vec::new(),
                };
                while body.len() >= 4 {
                    let block_type = body.get_u8();
                    body.advance(1);
                    let words = usize::from(body.get_u16());
                    ensure(body, words * 4)?;
                    let mut block = &body[..words * 4];
                    body.advance(words * 4);
                    match block_type {
                        XR_BLOCK_RRTR if words >= 2 => xr.blocks.push(XrBlock::Rrtr {
                            ntp_msw: block.get_u32(),
                            ntp_lsw: block.get_u32(),
                        }),
                        XR_BLOCK_DLRR => {
                            let mut items = Vec::with_capacity(words / 3);
                            while block.len() >= 12 {
                                items.push(DlrrItem {
                                    ssrc: block.get_u32(),
                                    last_rr: block.get_u32(),
                                    delay_since_last_rr: block.get_u32(),
                                });
                            }
                            xr.blocks.push(XrBlock::Dlrr(items));
                        }
                        other => tracing::debug!("Skipping XR block type {other}"),
                    }
                }
                Self::Xr(xr)
            }
        };
        Ok((packet, total))
    }

    /// Parse every packet of a compound RTCP datagram.
    ///
    /// # Errors
    /// Returns error if any packet in the datagram is malformed.
    pub fn parse_compound(mut data: &[u8]) -> Result<Vec<Self>, RtcpError> {
        let mut packets = Vec::new();
        while !data.is_empty() {
            let (packet, used) = Self::parse(data)?;
            packets.push(packet);
            data = &data[used..];
        }
        Ok(packets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rr_wire_layout() {
        let rr = RtcpPacket::Rr(RtcpRr {
            ssrc: 0x0102_0304,
            items: vec![ReportItem {
                ssrc: 9,
                fraction_lost: 0x40,
                cumulative_lost: 0x0123_4567,
                seq_cycles: 1,
                seq_max: 2,
                jitter: 3,
                last_sr_stamp: 4,
                delay_since_last_sr: 5,
            }],
        });
        let bytes = rr.encode().unwrap();

        assert_eq!(bytes.len(), 32);
        assert_eq!(bytes[0], 0x81);
        assert_eq!(bytes[1], 201);
        assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]), 7);
        // Cumulative loss is truncated to 24 bits under the fraction byte.
        assert_eq!(&bytes[12..16], &[0x40, 0x23, 0x45, 0x67]);

        let (parsed, used) = RtcpPacket::parse(&bytes).unwrap();
        assert_eq!(used, 32);
        let RtcpPacket::Rr(parsed) = parsed else {
            panic!("expected RR");
        };
        assert_eq!(parsed.items[0].cumulative_lost, 0x23_4567);
        assert_eq!(parsed.items[0].delay_since_last_sr, 5);
    }

    #[test]
    fn test_compound_sr_and_xr() {
        let sr = RtcpPacket::Sr(RtcpSr {
            ssrc: 1,
            ntp_msw: 2,
            ntp_lsw: 3,
            rtp_timestamp: 4,
            packet_count: 5,
            octet_count: 6,
            items: Vec::new(),
        });
        let xr = RtcpPacket::Xr(RtcpXr {
            ssrc: 7,
            blocks: vec![
                XrBlock::Rrtr { ntp_msw: 8, ntp_lsw: 9 },
                XrBlock::Dlrr(vec![DlrrItem {
                    ssrc: 10,
                    last_rr: 11,
                    delay_since_last_rr: 12,
                }]),
            ],
        });

        let mut datagram = sr.encode().unwrap().to_vec();
        datagram.extend_from_slice(&xr.encode().unwrap());

        let packets = RtcpPacket::parse_compound(&datagram).unwrap();
        assert_eq!(packets, vec![sr, xr]);
    }

    #[test]
    fn test_rejects_malformed() {
        assert_eq!(
            RtcpPacket::parse(&[0x80, 200]),
            Err(RtcpError::Truncated { needed: 4, available: 2 })
        );
        assert_eq!(RtcpPacket::parse(&[0x40, 200, 0, 0]), Err(RtcpError::BadVersion(1)));
        assert_eq!(RtcpPacket::parse(&[0x80, 204, 0, 0]), Err(RtcpError::UnsupportedType(204)));
        // Header claims seven words but only the header is present.
        assert!(matches!(
            RtcpPacket::parse(&[0x81, 201, 0, 7]),
            Err(RtcpError::Truncated { .. })
        ));
    }
}

//! TCP segments as values passed between the core and the (external) IP layer.
//!
//! The core never needs the wire format itself, but the IP layer does, and the field semantics
//!  must survive the trip unchanged. The encoding is the standard TCP header, all numbers in
//!  network byte order (BE):
//!
//! ```ascii
//!  0: source port (u16)
//!  2: destination port (u16)
//!  4: sequence number (u32)
//!  8: acknowledgement number (u32) - meaningful only if ACK is set
//! 12: data offset (4 bits, in 32-bit words, always 5 when serializing), 4 bits reserved
//! 13: flags (8 bits): CWR ECE URG ACK PSH RST SYN FIN, FIN being the lowest bit
//! 14: window (u16)
//! 16: checksum (u16) - ones' complement of the ones' complement sum over the segment
//! 18: urgent pointer (u16) - always 0, ignored when deserializing
//! 20: options (if data offset > 5) - ignored when deserializing
//!  *: payload
//! ```
//!
//! NB: The checksum does not cover an IP pseudo-header - that requires addresses the core does
//!      not know about, so it is the IP layer's job to combine the two

use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::safe_converter::SafeCast;
use crate::wrapping_seqno::WrappingSeqNo;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TcpHeader {
    pub sport: u16,
    pub dport: u16,
    pub seqno: WrappingSeqNo,
    pub ackno: WrappingSeqNo,
    pub syn: bool,
    pub fin: bool,
    pub rst: bool,
    pub ack: bool,
    pub window: u16,
}

impl TcpHeader {
    pub const SERIALIZED_LEN: usize = 20;

    const FLAG_FIN: u8 = 0x01;
    const FLAG_SYN: u8 = 0x02;
    const FLAG_RST: u8 = 0x04;
    const FLAG_ACK: u8 = 0x10;

    const DATA_OFFSET_NO_OPTIONS: u8 = (Self::SERIALIZED_LEN / 4) as u8;

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.fin { flags |= Self::FLAG_FIN; }
        if self.syn { flags |= Self::FLAG_SYN; }
        if self.rst { flags |= Self::FLAG_RST; }
        if self.ack { flags |= Self::FLAG_ACK; }
        flags
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TcpSegment {
    pub header: TcpHeader,
    pub payload: Bytes,
}

impl TcpSegment {
    /// SYN and FIN each occupy one sequence number in addition to the payload bytes
    pub fn length_in_sequence_space(&self) -> u64 {
        let payload_len: u64 = self.payload.len().safe_cast();
        payload_len + u64::from(self.header.syn) + u64::from(self.header.fin)
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        let start = buf.len();

        buf.put_u16(self.header.sport);
        buf.put_u16(self.header.dport);
        buf.put_u32(self.header.seqno.to_raw());
        buf.put_u32(self.header.ackno.to_raw());
        buf.put_u8(TcpHeader::DATA_OFFSET_NO_OPTIONS << 4);
        buf.put_u8(self.header.flags());
        buf.put_u16(self.header.window);
        buf.put_u16(0); // checksum placeholder
        buf.put_u16(0); // urgent pointer
        buf.put_slice(&self.payload);

        let checksum = internet_checksum(&buf[start..]);
        buf[start + 16..start + 18].copy_from_slice(&checksum.to_be_bytes());
    }

    /// Deserialize a segment that spans all of `buf`'s remaining bytes
    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<TcpSegment> {
        let raw = buf.copy_to_bytes(buf.remaining());

        if raw.len() < TcpHeader::SERIALIZED_LEN {
            bail!("segment of {} bytes is shorter than a TCP header", raw.len());
        }
        if internet_checksum(&raw) != 0 {
            bail!("segment checksum mismatch");
        }

        let mut header_buf = &raw[..TcpHeader::SERIALIZED_LEN];
        let sport = header_buf.get_u16();
        let dport = header_buf.get_u16();
        let seqno = WrappingSeqNo::from_raw(header_buf.get_u32());
        let ackno = WrappingSeqNo::from_raw(header_buf.get_u32());
        let data_offset = header_buf.get_u8() >> 4;
        let flags = header_buf.get_u8();
        let window = header_buf.get_u16();

        let header_len = usize::from(data_offset) * 4;
        if header_len < TcpHeader::SERIALIZED_LEN || header_len > raw.len() {
            bail!("invalid data offset {} for a segment of {} bytes", data_offset, raw.len());
        }

        Ok(TcpSegment {
            header: TcpHeader {
                sport,
                dport,
                seqno,
                ackno,
                syn: flags & TcpHeader::FLAG_SYN != 0,
                fin: flags & TcpHeader::FLAG_FIN != 0,
                rst: flags & TcpHeader::FLAG_RST != 0,
                ack: flags & TcpHeader::FLAG_ACK != 0,
                window,
            },
            payload: raw.slice(header_len..),
        })
    }
}

/// RFC 1071 Internet checksum. Summing over data that includes a correct checksum yields 0.
fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u64 = 0;

    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u64::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = words.remainder() {
        sum += u64::from(*last) << 8;
    }

    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

use std::cmp::max;
use tracing::{debug, trace};
use crate::byte_stream::ByteStream;
use crate::safe_converter::SafeCast;
use crate::stream_reassembler::StreamReassembler;
use crate::tcp_segment::TcpSegment;
use crate::wrapping_seqno::WrappingSeqNo;

/// The inbound half of a connection: turns segments into an in-order byte stream and tracks
///  the acknowledgement number and window to advertise to the peer.
///
/// Positions are tracked as absolute sequence numbers, i.e. the SYN is at 0 and the first
///  payload byte at 1 (which is stream index 0).
pub struct TcpReceiver {
    reassembler: StreamReassembler,
    capacity: usize,

    /// the peer's initial sequence number, `Some` once a SYN was received
    isn: Option<WrappingSeqNo>,
    fin_seen: bool,

    /// most recent known absolute position, used to unwrap incoming sequence numbers
    checkpoint: u64,
}

impl TcpReceiver {
    pub fn new(capacity: usize) -> TcpReceiver {
        TcpReceiver {
            reassembler: StreamReassembler::new(capacity),
            capacity,
            isn: None,
            fin_seen: false,
            checkpoint: 0,
        }
    }

    /// Handle an inbound segment, returning whether it was acceptable: a segment is acceptable
    ///  if it overlaps the receive window, or if it is the first SYN or FIN.
    pub fn segment_received(&mut self, seg: &TcpSegment) -> bool {
        let header = &seg.header;

        let old_syn_seen = self.isn.is_some();
        let old_fin_seen = self.fin_seen;

        let isn = match self.isn {
            Some(isn) => isn,
            None if header.syn => {
                debug!("received SYN with ISN {}", header.seqno);
                self.isn = Some(header.seqno);
                header.seqno
            }
            None => {
                trace!("segment before SYN - dropping");
                return false;
            }
        };

        let seq_start = header.seqno.unwrap(isn, self.checkpoint);
        let seq_len = seg.length_in_sequence_space();

        // a segment without sequence space still 'occupies' its seqno for the window check
        let seq_last = seq_start + max(seq_len, 1) - 1;

        // same for a zero window: a segment at the ackno is still acceptable. The window of a
        //  new connection starts at the SYN itself.
        let ackno = if old_syn_seen { self.absolute_ackno() } else { 0 };
        let window_len: u64 = max(self.window_size(), 1).safe_cast();
        let window_last = ackno + window_len - 1;

        let in_window = seq_start <= window_last && seq_last >= ackno;

        if in_window {
            // SYN is at absolute 0, the first payload byte at 1 but stream index 0
            let payload_seqno = seq_start + u64::from(header.syn);
            if payload_seqno == 0 {
                // data claiming the SYN's slot without a SYN flag: the first byte can not be valid
                if !seg.payload.is_empty() {
                    self.reassembler.push_substring(&seg.payload[1..], 0, header.fin);
                }
            }
            else {
                self.reassembler.push_substring(&seg.payload, payload_seqno - 1, header.fin);
            }
        }
        else {
            trace!("segment [{}, {}] outside of receive window [{}, {}]", seq_start, seq_last, ackno, window_last);
        }

        self.checkpoint = self.stream_out().bytes_written();

        if header.fin && !self.fin_seen {
            debug!("received FIN");
            self.fin_seen = true;
        }

        in_window || (header.fin && !old_fin_seen) || (header.syn && !old_syn_seen)
    }

    /// The next sequence number the peer is expected to send, or `None` before the SYN arrived
    pub fn ackno(&self) -> Option<WrappingSeqNo> {
        self.isn.map(|isn| WrappingSeqNo::wrap(self.absolute_ackno(), isn))
    }

    /// SYN, then all assembled bytes, then FIN once the stream is complete. This can only grow,
    ///  so the ackno never moves backwards.
    fn absolute_ackno(&self) -> u64 {
        if self.isn.is_none() {
            return 0;
        }
        let stream = self.stream_out();
        1 + stream.bytes_written() + u64::from(stream.input_ended())
    }

    /// Free space in the output stream, i.e. how many bytes beyond the ackno the receiver is
    ///  willing to accept
    pub fn window_size(&self) -> usize {
        self.capacity - self.stream_out().buffer_size()
    }

    pub fn unassembled_bytes(&self) -> usize {
        self.reassembler.unassembled_bytes()
    }

    pub fn stream_out(&self) -> &ByteStream {
        self.reassembler.stream_out()
    }

    pub fn stream_out_mut(&mut self) -> &mut ByteStream {
        self.reassembler.stream_out_mut()
    }
}

use std::cmp::{max, min};
use std::collections::BTreeMap;
use bytes::Bytes;
use tracing::trace;
use crate::byte_stream::ByteStream;
use crate::safe_converter::{PrecheckedCast, SafeCast};

/// Assembles possibly overlapping, out-of-order substrings of a byte stream (identified by
///  their absolute index in the stream) into the in-order [ByteStream] it owns.
///
/// NB: There is an invariant that the intervals in `pending` are pairwise disjoint *and* not
///      adjacent - touching intervals are always merged into one - so that at most one of them
///      can become contiguous with the assembled data at a time
pub struct StreamReassembler {
    output: ByteStream,
    capacity: usize,

    /// buffered intervals that are not contiguous with the assembled data yet, by start index
    pending: BTreeMap<u64, Vec<u8>>,

    /// number of distinct bytes ever accepted, assembled or not
    total_bytes_received: u64,

    /// index *after* the last byte of the stream, once a substring marked as its end arrived
    eof_index: Option<u64>,
}

impl StreamReassembler {
    pub fn new(capacity: usize) -> StreamReassembler {
        StreamReassembler {
            output: ByteStream::new(capacity),
            capacity,
            pending: BTreeMap::default(),
            total_bytes_received: 0,
            eof_index: None,
        }
    }

    /// The index of the first byte that was not written to the output stream yet
    pub fn first_unassembled(&self) -> u64 {
        self.output.bytes_written()
    }

    /// The index *after* the last byte that can be accepted without exceeding the output
    ///  stream's capacity. The output can grow to this point once all gaps are filled.
    fn first_unacceptable(&self) -> u64 {
        self.output.bytes_read() + self.capacity.safe_cast()
    }

    /// Accept a substring of the stream starting at `index`. Bytes that were assembled before,
    ///  or that lie beyond the output stream's capacity, are discarded. `eof` marks `data` as
    ///  the end of the stream.
    pub fn push_substring(&mut self, data: &[u8], index: u64, eof: bool) {
        let data_end = index + data.len().safe_cast();

        let start = max(index, self.first_unassembled());
        let end = min(data_end, self.first_unacceptable());

        if eof {
            if data_end > end {
                // the last byte did not fit: the end of stream has to come again with a retransmission
                trace!("ignoring EOF of substring at {} that exceeds the receive capacity", index);
            }
            else {
                self.eof_index = Some(data_end);
            }
        }

        if start < end {
            let slice = &data[(start - index).prechecked_cast()..(end - index).prechecked_cast()];
            self.insert_interval(start, slice);
            self.assemble_first_interval();
        }

        if self.eof_index == Some(self.first_unassembled()) && !self.output.input_ended() {
            trace!("all bytes up to the end of the stream are assembled");
            self.output.end_input();
        }
    }

    /// Merge the bytes `[start, start + data.len())` into the pending intervals. Existing bytes
    ///  take precedence, so only the gaps are filled from `data`.
    fn insert_interval(&mut self, start: u64, data: &[u8]) {
        let end = start + data.len().safe_cast();

        let mut merged_start = start;
        let mut merged_end = end;

        // the predecessor interval is touched if it reaches to (at least) the new interval's start
        if let Some((&pred_start, pred)) = self.pending.range(..start).next_back() {
            let pred_end = pred_start + pred.len().safe_cast();
            if pred_end >= end {
                trace!("substring [{}, {}) is already buffered", start, end);
                return;
            }
            if pred_end >= start {
                merged_start = pred_start;
            }
        }

        // all intervals starting inside or directly after the new interval are touched as well
        let touched = self.pending.range(merged_start..=end)
            .map(|(&k, _)| k)
            .collect::<Vec<_>>();

        if let Some(&last) = touched.last() {
            let last_end = last + self.pending[&last].len().safe_cast();
            merged_end = max(merged_end, last_end);
        }

        let mut merged = vec![0u8; (merged_end - merged_start).prechecked_cast()];
        let new_offs: usize = (start - merged_start).prechecked_cast();
        merged[new_offs..new_offs + data.len()].copy_from_slice(data);

        let mut previously_buffered: u64 = 0;
        for key in touched {
            if let Some(existing) = self.pending.remove(&key) {
                let offs: usize = (key - merged_start).prechecked_cast();
                merged[offs..offs + existing.len()].copy_from_slice(&existing);
                previously_buffered += existing.len().safe_cast();
            }
        }

        let merged_len: u64 = merged.len().safe_cast();
        self.total_bytes_received += merged_len - previously_buffered;
        self.pending.insert(merged_start, merged);
    }

    /// If the first pending interval continues the assembled data, move it to the output
    fn assemble_first_interval(&mut self) {
        let first_unassembled = self.first_unassembled();
        if let Some(entry) = self.pending.first_entry() {
            if *entry.key() == first_unassembled {
                let data = entry.remove();
                let len = data.len();
                let written = self.output.write_bytes(Bytes::from(data));
                debug_assert_eq!(written, len, "pending intervals must fit into the output stream");
                trace!("assembled {} bytes starting at {}", written, first_unassembled);
            }
        }
    }

    /// Number of bytes that were received but are not yet contiguous with the assembled data
    pub fn unassembled_bytes(&self) -> usize {
        (self.total_bytes_received - self.first_unassembled()).prechecked_cast()
    }

    pub fn empty(&self) -> bool {
        self.unassembled_bytes() == 0
    }

    pub fn stream_out(&self) -> &ByteStream {
        &self.output
    }

    pub fn stream_out_mut(&mut self) -> &mut ByteStream {
        &mut self.output
    }
}

use std::collections::VecDeque;
#[cfg(test)] use mockall::automock;
use tracing::trace;
use crate::tcp_segment::TcpSegment;

/// This is the abstraction for handing outbound segments to the IP layer, which is outside of
///  this crate. There is no feedback path: once a segment is passed on, the connection forgets
///  about it except for its own retransmission bookkeeping.
#[cfg_attr(test, automock)]
pub trait SegmentSink {
    fn send_segment(&mut self, segment: TcpSegment);
}

/// The simplest sink: a queue for the caller to drain
impl SegmentSink for VecDeque<TcpSegment> {
    fn send_segment(&mut self, segment: TcpSegment) {
        trace!("queueing outbound segment with seqno {}", segment.header.seqno);
        self.push_back(segment);
    }
}

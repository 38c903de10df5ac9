use std::cmp::{max, min};
use std::collections::VecDeque;
use std::time::Duration;
use rand::RngCore;
use tracing::{debug, trace};
use crate::byte_stream::ByteStream;
use crate::retransmission_timer::RetransmissionTimer;
use crate::safe_converter::{PrecheckedCast, SafeCast};
use crate::tcp_segment::{TcpHeader, TcpSegment};
use crate::wrapping_seqno::WrappingSeqNo;

/// A segment that was sent and is waiting to be acknowledged
struct PendingSegment {
    abs_seqno: u64,
    segment: TcpSegment,
}

impl PendingSegment {
    fn end(&self) -> u64 {
        self.abs_seqno + self.segment.length_in_sequence_space()
    }
}

/// The outbound half of a connection: slices the outbound [ByteStream] into segments as the
///  peer's window permits, and retransmits the oldest unacknowledged segment when the
///  retransmission timer expires.
///
/// Time is virtual: it advances only through [TcpSender::tick].
pub struct TcpSender {
    isn: WrappingSeqNo,
    max_payload_size: usize,

    stream: ByteStream,
    segments_out: VecDeque<TcpSegment>,

    /// absolute sequence number of the next byte (or flag) to send
    next_seqno: u64,
    /// highest absolute ackno received, i.e. everything below it is confirmed
    max_seqno_acked: u64,
    /// the peer's advertised window, starting at 1 so the SYN can go out
    window_size: u16,

    syn_sent: bool,
    fin_sent: bool,

    retransmission_queue: VecDeque<PendingSegment>,
    consecutive_retransmissions: u32,
    now: Duration,
    timer: RetransmissionTimer,
}

impl TcpSender {
    pub fn new(capacity: usize, initial_rto: Duration, max_payload_size: usize, fixed_isn: Option<WrappingSeqNo>) -> TcpSender {
        let isn = fixed_isn.unwrap_or_else(|| WrappingSeqNo::from_raw(rand::thread_rng().next_u32()));

        TcpSender {
            isn,
            max_payload_size,
            stream: ByteStream::new(capacity),
            segments_out: VecDeque::new(),
            next_seqno: 0,
            max_seqno_acked: 0,
            window_size: 1,
            syn_sent: false,
            fin_sent: false,
            retransmission_queue: VecDeque::new(),
            consecutive_retransmissions: 0,
            now: Duration::ZERO,
            timer: RetransmissionTimer::new(initial_rto),
        }
    }

    /// Create and send as many segments as the peer's window permits, starting with the SYN.
    ///
    /// An advertised window of 0 is treated as 1 so that a single byte keeps probing the peer
    ///  until its window reopens.
    pub fn fill_window(&mut self) {
        if !self.syn_sent {
            debug!("sending SYN with ISN {}", self.isn);
            self.syn_sent = true;
            self.send_segment(true, Default::default(), false);
            return;
        }

        if self.max_seqno_acked == 0 {
            trace!("SYN not acknowledged yet - not sending data");
            return;
        }

        while !self.fin_sent {
            let window: u64 = max(self.window_size, 1).safe_cast();
            let bytes_in_flight = self.bytes_in_flight();
            if bytes_in_flight >= window {
                break;
            }
            let room = window - bytes_in_flight;

            let payload_len = min(min(self.max_payload_size, self.stream.buffer_size()), room.prechecked_cast());
            let payload = self.stream.read(payload_len);

            let payload_len: u64 = payload.len().safe_cast();
            let fin = self.stream.eof() && payload_len < room;

            if payload.is_empty() && !fin {
                break;
            }
            if fin {
                debug!("sending FIN");
                self.fin_sent = true;
            }
            self.send_segment(false, payload, fin);
        }
    }

    fn send_segment(&mut self, syn: bool, payload: bytes::Bytes, fin: bool) {
        let segment = TcpSegment {
            header: TcpHeader {
                seqno: self.next_seqno(),
                syn,
                fin,
                ..TcpHeader::default()
            },
            payload,
        };
        let len = segment.length_in_sequence_space();
        trace!("sending segment [{}, {})", self.next_seqno, self.next_seqno + len);

        self.segments_out.push_back(segment.clone());
        self.retransmission_queue.push_back(PendingSegment {
            abs_seqno: self.next_seqno,
            segment,
        });
        self.next_seqno += len;
        self.timer.start(self.now);
    }

    /// Process an acknowledgement from the peer, returning `false` if it acknowledges sequence
    ///  numbers that were never sent. Such an ack is ignored altogether, including its window.
    pub fn ack_received(&mut self, ackno: WrappingSeqNo, window_size: u16) -> bool {
        let abs_ackno = ackno.unwrap(self.isn, self.next_seqno);
        if abs_ackno > self.next_seqno {
            debug!("ignoring ack for {} which was not sent yet - next seqno is {}", abs_ackno, self.next_seqno);
            return false;
        }

        self.window_size = window_size;

        if abs_ackno <= self.max_seqno_acked {
            trace!("duplicate ack {}", abs_ackno);
            return true;
        }

        trace!("ack advances from {} to {}", self.max_seqno_acked, abs_ackno);
        self.max_seqno_acked = abs_ackno;

        while let Some(pending) = self.retransmission_queue.front() {
            if pending.end() > abs_ackno {
                break;
            }
            self.retransmission_queue.pop_front();
        }

        self.timer.reset_rto();
        self.consecutive_retransmissions = 0;
        if self.retransmission_queue.is_empty() {
            self.timer.stop();
        }
        else {
            self.timer.restart(self.now);
        }
        true
    }

    /// Advance the virtual clock, retransmitting the oldest outstanding segment if the timer
    ///  expired
    pub fn tick(&mut self, elapsed: Duration) {
        self.now += elapsed;

        if !self.timer.has_expired(self.now) {
            return;
        }

        let Some(oldest) = self.retransmission_queue.front() else {
            self.timer.stop();
            return;
        };

        debug!("retransmission timeout: resending segment at {}", oldest.abs_seqno);
        self.segments_out.push_back(oldest.segment.clone());

        // a zero window means we are probing, and the peer not opening it is no sign of congestion
        if self.window_size != 0 {
            self.timer.back_off();
            self.consecutive_retransmissions += 1;
        }
        self.timer.restart(self.now);
    }

    /// Send a segment that occupies no sequence space, e.g. for a bare ack. It is not tracked
    ///  for retransmission.
    pub fn send_empty_segment(&mut self) {
        self.segments_out.push_back(TcpSegment {
            header: TcpHeader {
                seqno: self.next_seqno(),
                ..TcpHeader::default()
            },
            payload: Default::default(),
        });
    }

    /// Number of sequence numbers sent but not acknowledged yet
    pub fn bytes_in_flight(&self) -> u64 {
        self.next_seqno - self.max_seqno_acked
    }

    pub fn consecutive_retransmissions(&self) -> u32 {
        self.consecutive_retransmissions
    }

    pub fn next_seqno_absolute(&self) -> u64 {
        self.next_seqno
    }

    pub fn next_seqno(&self) -> WrappingSeqNo {
        WrappingSeqNo::wrap(self.next_seqno, self.isn)
    }

    pub fn syn_sent(&self) -> bool {
        self.syn_sent
    }

    pub fn fin_sent(&self) -> bool {
        self.fin_sent
    }

    pub fn stream_in(&self) -> &ByteStream {
        &self.stream
    }

    pub fn stream_in_mut(&mut self) -> &mut ByteStream {
        &mut self.stream
    }

    /// Segments that were produced but not picked up yet, in the order they were sent
    pub fn segments_out_mut(&mut self) -> &mut VecDeque<TcpSegment> {
        &mut self.segments_out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const ISN: WrappingSeqNo = WrappingSeqNo::from_raw(1000);
    const RTO: Duration = Duration::from_millis(1000);

    fn new_sender(capacity: usize, max_payload_size: usize) -> TcpSender {
        TcpSender::new(capacity, RTO, max_payload_size, Some(ISN))
    }

    fn seqno(abs: u64) -> WrappingSeqNo {
        WrappingSeqNo::wrap(abs, ISN)
    }

    /// returns (seqno, syn, payload, fin) for all segments sent since the last call
    fn drain(sender: &mut TcpSender) -> Vec<(u32, bool, String, bool)> {
        sender.segments_out_mut()
            .drain(..)
            .map(|s| (s.header.seqno.to_raw(), s.header.syn, String::from_utf8(s.payload.to_vec()).unwrap(), s.header.fin))
            .collect()
    }

    /// sends the SYN and has it acknowledged with the given window
    fn established(capacity: usize, max_payload_size: usize, window: u16) -> TcpSender {
        let mut sender = new_sender(capacity, max_payload_size);
        sender.fill_window();
        drain(&mut sender);
        assert!(sender.ack_received(seqno(1), window));
        sender
    }

    #[test]
    fn test_syn_first() {
        let mut sender = new_sender(100, 1000);
        sender.stream_in_mut().write(b"abc");
        assert!(!sender.syn_sent());
        sender.fill_window();
        assert!(sender.syn_sent());

        assert_eq!(drain(&mut sender), vec![(1000, true, "".to_string(), false)]);
        assert_eq!(sender.bytes_in_flight(), 1);
        assert_eq!(sender.next_seqno_absolute(), 1);

        // no data before the SYN is acknowledged
        sender.fill_window();
        assert!(drain(&mut sender).is_empty());
    }

    #[test]
    fn test_random_isn() {
        let mut sender = TcpSender::new(100, RTO, 1000, None);
        sender.fill_window();
        let syn = sender.segments_out_mut().pop_front().unwrap();
        assert!(syn.header.syn);
        assert_eq!(sender.next_seqno(), syn.header.seqno + 1);
    }

    #[rstest]
    #[case::one_segment(100, 1000, "abc", vec!["abc"])]
    #[case::payload_size(100, 2, "abcde", vec!["ab", "cd", "e"])]
    #[case::window(3, 1000, "abcde", vec!["abc"])]
    #[case::window_and_payload_size(5, 2, "abcdefg", vec!["ab", "cd", "e"])]
    #[case::zero_window_probe(0, 1000, "abcde", vec!["a"])]
    fn test_fill_window(#[case] window: u16, #[case] max_payload_size: usize, #[case] data: &str, #[case] expected: Vec<&str>) {
        let mut sender = established(100, max_payload_size, window);
        sender.stream_in_mut().write(data.as_bytes());
        sender.fill_window();

        let sent = drain(&mut sender);
        assert_eq!(sent.iter().map(|s| s.2.as_str()).collect::<Vec<_>>(), expected);
        assert!(sender.bytes_in_flight() <= max(window, 1) as u64);
    }

    #[rstest]
    #[case::piggybacked(10, "abc", vec![("abc", true)])]
    #[case::no_room_for_fin(3, "abc", vec![("abc", false)])]
    #[case::bare_fin(10, "", vec![("", true)])]
    #[case::zero_window_bare_fin(0, "", vec![("", true)])]
    fn test_fin(#[case] window: u16, #[case] data: &str, #[case] expected: Vec<(&str, bool)>) {
        let mut sender = established(100, 1000, window);
        sender.stream_in_mut().write(data.as_bytes());
        sender.stream_in_mut().end_input();
        sender.fill_window();

        let sent = drain(&mut sender);
        assert_eq!(sent.iter().map(|s| (s.2.as_str(), s.3)).collect::<Vec<_>>(), expected);
        assert_eq!(sender.fin_sent(), expected.last().unwrap().1);
    }

    #[test]
    fn test_fin_after_window_opens() {
        let mut sender = established(100, 1000, 3);
        sender.stream_in_mut().write(b"abc");
        sender.stream_in_mut().end_input();
        sender.fill_window();
        assert_eq!(drain(&mut sender), vec![(1001, false, "abc".to_string(), false)]);

        assert!(sender.ack_received(seqno(4), 3));
        sender.fill_window();
        assert_eq!(drain(&mut sender), vec![(1004, false, "".to_string(), true)]);

        // nothing more after the FIN
        sender.stream_in_mut().write(b"x");
        sender.fill_window();
        assert!(drain(&mut sender).is_empty());
        assert_eq!(sender.next_seqno_absolute(), 5);
    }

    #[rstest]
    #[case::duplicate_of_syn_ack(1, 4, Some("abc"))]
    #[case::before_syn(0, 4, Some("abc"))]
    #[case::partial_segment(3, 2, Some("abc"))]
    #[case::first_segment(4, 1, Some("d"))]
    #[case::everything(5, 0, None)]
    fn test_ack_drops_acknowledged_segments(#[case] ackno: u64, #[case] expected_in_flight: u64, #[case] expected_retransmission: Option<&str>) {
        let mut sender = established(100, 3, 5);
        sender.stream_in_mut().write(b"abcd");
        sender.fill_window();
        assert_eq!(drain(&mut sender).len(), 2);

        assert!(sender.ack_received(seqno(ackno), 5));
        assert_eq!(sender.bytes_in_flight(), expected_in_flight);

        // only segments that are not fully acknowledged are retransmitted
        sender.tick(RTO * 10);
        let resent = drain(&mut sender).into_iter().map(|s| s.2).collect::<Vec<_>>();
        assert_eq!(resent, expected_retransmission.into_iter().map(|s| s.to_string()).collect::<Vec<_>>());
    }

    #[test]
    fn test_invalid_ack_changes_nothing() {
        let mut sender = established(100, 1000, 10);
        sender.stream_in_mut().write(b"abc");
        sender.fill_window();
        drain(&mut sender);

        sender.tick(Duration::from_millis(999));
        assert!(!sender.ack_received(seqno(5), 0));

        // window unchanged: there is still room for more data
        sender.stream_in_mut().write(b"def");
        sender.fill_window();
        assert_eq!(drain(&mut sender), vec![(1004, false, "def".to_string(), false)]);

        // timer unchanged: it still expires at the original deadline
        sender.tick(Duration::from_millis(1));
        assert_eq!(drain(&mut sender), vec![(1001, false, "abc".to_string(), false)]);
        assert_eq!(sender.bytes_in_flight(), 6);
    }

    #[test]
    fn test_duplicate_ack_updates_window_only() {
        let mut sender = established(100, 1000, 1);
        sender.stream_in_mut().write(b"abc");
        sender.fill_window();
        assert_eq!(drain(&mut sender), vec![(1001, false, "a".to_string(), false)]);

        assert!(sender.ack_received(seqno(1), 3));
        sender.fill_window();
        assert_eq!(drain(&mut sender), vec![(1002, false, "bc".to_string(), false)]);
        assert_eq!(sender.bytes_in_flight(), 3);
    }

    #[test]
    fn test_retransmission_backoff() {
        let mut sender = established(100, 1000, 10);
        sender.stream_in_mut().write(b"abc");
        sender.fill_window();
        drain(&mut sender);

        sender.tick(Duration::from_millis(999));
        assert!(drain(&mut sender).is_empty());
        sender.tick(Duration::from_millis(1));
        assert_eq!(drain(&mut sender).len(), 1);
        assert_eq!(sender.consecutive_retransmissions(), 1);

        // RTO doubled
        sender.tick(Duration::from_millis(1999));
        assert!(drain(&mut sender).is_empty());
        sender.tick(Duration::from_millis(1));
        assert_eq!(drain(&mut sender).len(), 1);
        assert_eq!(sender.consecutive_retransmissions(), 2);

        // an ack for new data resets both the RTO and the counter
        sender.stream_in_mut().write(b"d");
        assert!(sender.ack_received(seqno(4), 10));
        assert_eq!(sender.consecutive_retransmissions(), 0);
        sender.fill_window();
        drain(&mut sender);
        sender.tick(Duration::from_millis(999));
        assert!(drain(&mut sender).is_empty());
        sender.tick(Duration::from_millis(1));
        assert_eq!(drain(&mut sender), vec![(1004, false, "d".to_string(), false)]);
    }

    #[test]
    fn test_syn_is_retransmitted() {
        let mut sender = new_sender(100, 1000);
        sender.fill_window();
        drain(&mut sender);

        sender.tick(RTO);
        assert_eq!(drain(&mut sender), vec![(1000, true, "".to_string(), false)]);
        assert_eq!(sender.consecutive_retransmissions(), 1);
    }

    #[test]
    fn test_zero_window_probe_without_backoff() {
        let mut sender = established(100, 1000, 0);
        sender.stream_in_mut().write(b"abc");
        sender.fill_window();
        assert_eq!(drain(&mut sender), vec![(1001, false, "a".to_string(), false)]);

        for _ in 0..5 {
            sender.tick(RTO);
            assert_eq!(drain(&mut sender), vec![(1001, false, "a".to_string(), false)]);
            assert_eq!(sender.consecutive_retransmissions(), 0);
        }
    }

    #[test]
    fn test_timer_stops_when_everything_is_acked() {
        let mut sender = established(100, 1000, 10);
        sender.stream_in_mut().write(b"abc");
        sender.fill_window();
        drain(&mut sender);
        assert!(sender.ack_received(seqno(4), 10));

        sender.tick(RTO * 100);
        assert!(drain(&mut sender).is_empty());
        assert_eq!(sender.bytes_in_flight(), 0);
    }

    #[test]
    fn test_send_empty_segment() {
        let mut sender = established(100, 1000, 10);
        sender.send_empty_segment();
        assert_eq!(drain(&mut sender), vec![(1001, false, "".to_string(), false)]);
        assert_eq!(sender.bytes_in_flight(), 0);
        assert_eq!(sender.next_seqno_absolute(), 1);

        sender.tick(RTO * 10);
        assert!(drain(&mut sender).is_empty());
    }
}

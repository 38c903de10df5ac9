use std::time::Duration;
use tracing::{debug, trace, warn};
use crate::byte_stream::ByteStream;
use crate::config::TcpConfig;
use crate::safe_converter::SaturatingCast;
use crate::segment_sink::SegmentSink;
use crate::tcp_receiver::TcpReceiver;
use crate::tcp_segment::TcpSegment;
use crate::tcp_sender::TcpSender;

/// One full-duplex TCP connection: a [TcpSender] for the outbound direction and a [TcpReceiver]
///  for the inbound direction, plus handshake, shutdown and reset handling.
///
/// The connection is driven from the outside through four kinds of calls: segments arriving
///  ([TcpConnection::segment_received]), the application writing or closing its side, and time
///  passing ([TcpConnection::tick]). Every outbound segment is stamped with the current ackno
///  and window and passed to the [SegmentSink].
///
/// A connection is finished (i.e. not [TcpConnection::active]) after a reset in either
///  direction, or after a clean shutdown: both streams ended, everything acknowledged, and -
///  if this side may still have to re-acknowledge the peer's FIN - a linger period without
///  incoming segments. The linger period is skipped if the peer closed first.
pub struct TcpConnection<S: SegmentSink> {
    config: TcpConfig,
    sender: TcpSender,
    receiver: TcpReceiver,
    sink: S,

    now: Duration,
    last_segment_received_at: Duration,

    connect_initiated: bool,
    linger_after_streams_finish: bool,
    /// terminal, set for RST in either direction
    reset: bool,
}

impl<S: SegmentSink> TcpConnection<S> {
    pub fn new(config: TcpConfig, sink: S) -> anyhow::Result<TcpConnection<S>> {
        config.validate()?;

        Ok(TcpConnection {
            sender: TcpSender::new(config.send_capacity, config.rt_timeout, config.max_payload_size, config.fixed_isn),
            receiver: TcpReceiver::new(config.recv_capacity),
            config,
            sink,
            now: Duration::ZERO,
            last_segment_received_at: Duration::ZERO,
            connect_initiated: false,
            linger_after_streams_finish: true,
            reset: false,
        })
    }

    /// Active open: send a SYN
    pub fn connect(&mut self) {
        if self.reset || self.connect_initiated {
            debug!("connect() on a connection that was opened or reset before - ignoring");
            return;
        }
        self.connect_initiated = true;
        self.sender.fill_window();
        self.fill_queue();
    }

    /// Write as much of `data` to the outbound stream as fits, returning the number of bytes
    ///  written. Bytes are sent as soon as the peer's window permits.
    pub fn write(&mut self, data: &[u8]) -> usize {
        if self.reset || self.sender.stream_in().input_ended() {
            debug!("write to a connection that was closed or reset - ignoring");
            return 0;
        }
        if data.is_empty() {
            return 0;
        }

        let written = self.sender.stream_in_mut().write(data);
        if self.connect_initiated {
            self.sender.fill_window();
            self.fill_queue();
        }
        written
    }

    pub fn remaining_outbound_capacity(&self) -> usize {
        self.sender.stream_in().remaining_capacity()
    }

    /// Close the outbound direction. The FIN goes out after all buffered data.
    pub fn end_input_stream(&mut self) {
        if self.reset {
            return;
        }
        debug!("closing outbound stream");
        self.sender.stream_in_mut().end_input();
        if self.connect_initiated {
            self.sender.fill_window();
            self.fill_queue();
        }
    }

    pub fn inbound_stream(&self) -> &ByteStream {
        self.receiver.stream_out()
    }

    /// This is where the application reads received data. Reading frees receive window, which
    ///  the peer learns about with the next outbound segment.
    pub fn inbound_stream_mut(&mut self) -> &mut ByteStream {
        self.receiver.stream_out_mut()
    }

    pub fn segment_received(&mut self, seg: &TcpSegment) {
        if self.reset {
            trace!("connection was reset - ignoring segment");
            return;
        }
        self.last_segment_received_at = self.now;

        let header = &seg.header;
        let mut send_empty = false;

        // acks are only meaningful once we know the peer's ISN
        if header.ack && (self.receiver.ackno().is_some() || header.syn) {
            if self.sender.ack_received(header.ackno, header.window) {
                self.sender.fill_window();
            }
            else {
                send_empty = true;
            }
        }

        let accepted = self.receiver.segment_received(seg);

        if header.syn && !self.connect_initiated {
            debug!("received SYN - opening connection");
            self.connect_initiated = true;
            self.sender.fill_window();
        }

        // a RST is only honored if it is plausible, i.e. not a stale or forged segment
        if header.rst && (accepted || (header.ack && header.ackno == self.sender.next_seqno())) {
            warn!("connection reset by peer");
            self.latch_reset();
            return;
        }

        // the peer needs an ack for everything that occupies sequence space, and a segment we
        //  rejected is answered with our current ackno
        if accepted && seg.length_in_sequence_space() > 0 && self.sender.segments_out_mut().is_empty() {
            send_empty = true;
        }
        if !accepted && self.receiver.ackno().is_some() && !header.rst {
            send_empty = true;
        }

        if send_empty {
            self.sender.send_empty_segment();
        }
        self.fill_queue();

        if header.fin && self.connect_initiated && !self.sender.stream_in().eof() {
            debug!("peer closed first - no lingering after shutdown");
            self.linger_after_streams_finish = false;
        }
    }

    /// Advance the virtual clock, driving retransmissions and the linger timeout
    pub fn tick(&mut self, elapsed: Duration) {
        self.now += elapsed;
        if self.reset {
            return;
        }
        self.sender.tick(elapsed);
        self.fill_queue();
    }

    pub fn active(&self) -> bool {
        if self.reset {
            return false;
        }

        let streams_finished = self.receiver.unassembled_bytes() == 0
            && self.receiver.stream_out().eof()
            && self.sender.stream_in().eof()
            && self.sender.fin_sent()
            && self.sender.bytes_in_flight() == 0;

        let done_lingering = !self.linger_after_streams_finish
            || self.time_since_last_segment_received() >= self.config.linger_timeout();

        !(streams_finished && done_lingering)
    }

    /// Unclean shutdown: send a RST and latch both streams into an error state
    pub fn abort(&mut self) {
        if !self.active() {
            debug!("abort() on an inactive connection - ignoring");
            return;
        }
        warn!("aborting connection");
        self.latch_reset();
        self.sender.send_empty_segment();
        self.fill_queue();
    }

    pub fn bytes_in_flight(&self) -> u64 {
        self.sender.bytes_in_flight()
    }

    pub fn unassembled_bytes(&self) -> usize {
        self.receiver.unassembled_bytes()
    }

    pub fn time_since_last_segment_received(&self) -> Duration {
        self.now - self.last_segment_received_at
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    fn latch_reset(&mut self) {
        self.reset = true;
        self.sender.stream_in_mut().set_error();
        self.receiver.stream_out_mut().set_error();
    }

    /// Pass the sender's segments on to the sink, stamped with ackno and window
    fn fill_queue(&mut self) {
        while let Some(mut segment) = self.sender.segments_out_mut().pop_front() {
            if !self.reset && self.sender.consecutive_retransmissions() > self.config.max_retx_attempts {
                warn!("giving up after {} consecutive retransmissions - resetting connection", self.sender.consecutive_retransmissions());
                self.latch_reset();
            }

            if self.reset {
                segment.header.rst = true;
            }
            else if let Some(ackno) = self.receiver.ackno() {
                segment.header.ack = true;
                segment.header.ackno = ackno;
            }
            segment.header.window = self.receiver.window_size().saturating_cast();

            self.sink.send_segment(segment);
        }
    }
}

impl<S: SegmentSink> Drop for TcpConnection<S> {
    fn drop(&mut self) {
        if self.active() {
            warn!("unclean shutdown of an active connection - sending RST");
            self.abort();
        }
    }
}

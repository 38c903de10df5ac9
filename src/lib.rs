//! The data-flow core of a TCP implementation in user space: reliable, in-order, flow-controlled
//!  delivery of a byte stream in each direction of a connection, over a network that may drop,
//!  reorder or duplicate segments.
//!
//! Everything is synchronous and single-threaded, and time is an explicit input: the caller
//!  passes elapsed time to [tcp_connection::TcpConnection::tick], there is no wall clock or
//!  background timer inside. Outbound segments are passed to a [segment_sink::SegmentSink],
//!  which is where the (excluded) IP layer takes over.
//!
//! The building blocks, leaf first:
//! * [wrapping_seqno] converts between 32-bit wire sequence numbers and 64-bit absolute offsets
//! * [byte_stream] is a bounded in-memory byte pipe, used as the sender's input and the
//!    receiver's output
//! * [stream_reassembler] turns out-of-order substrings into an in-order byte stream
//! * [tcp_receiver] and [tcp_sender] are the inbound and outbound halves of a connection
//! * [tcp_connection] combines both halves and handles handshake, shutdown and reset
//!
//! ## Sequence space
//!
//! Each direction numbers its sequence space starting at a random initial sequence number (ISN).
//!  The SYN occupies the first number, followed by one number per payload byte, followed by the
//!  FIN. Internally all bookkeeping uses *absolute* offsets (SYN at 0) which never wrap around.
//!
//! ```ascii
//! element:            SYN   'c'   'a'   't'   FIN
//! wire seqno:        ISN  ISN+1 ISN+2 ISN+3 ISN+4   (mod 2^32)
//! absolute offset:     0     1     2     3     4
//! stream index:              0     1     2
//! ```

pub mod byte_stream;
pub mod config;
pub mod retransmission_timer;
pub mod safe_converter;
pub mod segment_sink;
pub mod stream_reassembler;
pub mod tcp_connection;
pub mod tcp_receiver;
pub mod tcp_segment;
pub mod tcp_sender;
pub mod wrapping_seqno;

#[cfg(test)] mod test_util;

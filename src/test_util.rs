//! Test helpers for connecting two [TcpConnection]s: a perfect link and a lossy one. Both move
//!  segments in their wire encoding, so the codec is part of every round trip.

use std::collections::VecDeque;
use std::time::Duration;
use bytes::{Bytes, BytesMut};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;
use crate::config::TcpConfig;
use crate::tcp_connection::TcpConnection;
use crate::tcp_segment::TcpSegment;
use crate::wrapping_seqno::WrappingSeqNo;

pub type TestConnection = TcpConnection<VecDeque<TcpSegment>>;

/// small capacities and payloads, so that tests exercise windows and segmentation without
///  having to move a lot of data
pub fn test_config(isn: u32) -> TcpConfig {
    TcpConfig {
        send_capacity: 1000,
        recv_capacity: 1000,
        rt_timeout: Duration::from_millis(1000),
        max_payload_size: 100,
        max_retx_attempts: 8,
        fixed_isn: Some(WrappingSeqNo::from_raw(isn)),
    }
}

fn encode(segment: &TcpSegment) -> Bytes {
    let mut buf = BytesMut::new();
    segment.ser(&mut buf);
    buf.freeze()
}

/// Deliver all segments `from` sent so far to `to`, in order and without loss
pub fn deliver_all(from: &mut TestConnection, to: &mut TestConnection) {
    let segments = from.sink_mut().drain(..).collect::<Vec<_>>();
    for segment in segments {
        let mut buf = encode(&segment);
        let decoded = TcpSegment::deser(&mut buf).expect("a segment encoded by us should be valid");
        to.segment_received(&decoded);
    }
}

/// One direction of an unreliable network: segments are dropped, corrupted, duplicated and
///  reordered at random, driven by a seeded RNG for reproducibility
pub struct LossyLink {
    rng: StdRng,
    loss_probability: f64,
    corruption_probability: f64,
    duplication_probability: f64,
    in_transit: Vec<Bytes>,
}

impl LossyLink {
    pub fn new(seed: u64, loss_probability: f64, corruption_probability: f64, duplication_probability: f64) -> LossyLink {
        LossyLink {
            rng: StdRng::seed_from_u64(seed),
            loss_probability,
            corruption_probability,
            duplication_probability,
            in_transit: Vec::new(),
        }
    }

    /// Take all segments `from` sent so far into transit
    pub fn send_from(&mut self, from: &mut TestConnection) {
        let segments = from.sink_mut().drain(..).collect::<Vec<_>>();
        for segment in segments {
            if self.rng.gen_bool(self.loss_probability) {
                trace!("link: dropping segment {}", segment.header.seqno);
                continue;
            }

            let mut buf = BytesMut::from(encode(&segment).as_ref());
            if self.rng.gen_bool(self.corruption_probability) {
                let idx = self.rng.gen_range(0..buf.len());
                buf[idx] ^= self.rng.gen_range(1..=u8::MAX);
            }
            let buf = buf.freeze();

            if self.rng.gen_bool(self.duplication_probability) {
                self.in_transit.push(buf.clone());
            }
            self.in_transit.push(buf);
        }
    }

    /// Deliver a random subset of the segments in transit, in random order. Segments that fail
    ///  to decode are discarded the way the IP layer would discard them.
    pub fn deliver_some(&mut self, to: &mut TestConnection) {
        while !self.in_transit.is_empty() && self.rng.gen_bool(0.8) {
            let idx = self.rng.gen_range(0..self.in_transit.len());
            let mut buf = self.in_transit.swap_remove(idx);
            match TcpSegment::deser(&mut buf) {
                Ok(segment) => to.segment_received(&segment),
                Err(e) => trace!("link: discarding segment: {}", e),
            }
        }
    }
}

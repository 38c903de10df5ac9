use std::time::Duration;
use anyhow::bail;
use crate::wrapping_seqno::WrappingSeqNo;

/// After both sides finished cleanly, a connection that may still have to re-acknowledge the
///  peer's FIN lingers for this multiple of [TcpConfig::rt_timeout] after the last segment it
///  received.
pub const LINGER_TIMEOUT_FACTOR: u32 = 10;

#[derive(Clone, Debug)]
pub struct TcpConfig {
    /// capacity of the outbound byte stream, i.e. how many bytes the application can write
    ///  ahead of what was sent
    pub send_capacity: usize,

    /// capacity of the inbound byte stream. This is also the upper bound for the window
    ///  advertised to the peer, which is saturated to `u16::MAX` on the wire.
    pub recv_capacity: usize,

    /// The initial retransmission timeout. It doubles with every retransmission of the same
    ///  segment and is reset by an ack for new data.
    pub rt_timeout: Duration,

    /// maximum payload bytes per segment
    pub max_payload_size: usize,

    /// The connection is reset when a segment was retransmitted more than this number of times
    ///  in a row
    pub max_retx_attempts: u32,

    /// The initial sequence number for outbound data, chosen at random if `None`. Fixing it is
    ///  useful for tests and debugging.
    pub fixed_isn: Option<WrappingSeqNo>,
}

impl Default for TcpConfig {
    fn default() -> Self {
        TcpConfig {
            send_capacity: 64000,
            recv_capacity: 64000,
            rt_timeout: Duration::from_millis(1000),
            max_payload_size: 1000,
            max_retx_attempts: 8,
            fixed_isn: None,
        }
    }
}

impl TcpConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.send_capacity == 0 {
            bail!("send capacity must not be 0");
        }
        if self.recv_capacity == 0 {
            bail!("receive capacity must not be 0");
        }
        if self.rt_timeout.is_zero() {
            bail!("retransmission timeout must not be 0");
        }
        if self.max_payload_size == 0 {
            bail!("max payload size must not be 0");
        }
        Ok(())
    }

    pub fn linger_timeout(&self) -> Duration {
        self.rt_timeout * LINGER_TIMEOUT_FACTOR
    }
}

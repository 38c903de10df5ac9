use std::fmt::{Display, Formatter};
use std::ops::Add;

/// A TCP sequence number as it appears on the wire: 32 bits, wrapping around, and offset by the
///  initial sequence number (ISN) of its direction.
///
/// Everything inside the core works with *absolute* offsets (`u64`, SYN at 0, never wrapping),
///  and converts at the boundary: [WrappingSeqNo::wrap] on the way out, [WrappingSeqNo::unwrap]
///  on the way in.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct WrappingSeqNo(u32);

impl Display for WrappingSeqNo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<u32> for WrappingSeqNo {
    type Output = WrappingSeqNo;

    fn add(self, rhs: u32) -> WrappingSeqNo {
        WrappingSeqNo(self.0.wrapping_add(rhs))
    }
}

impl WrappingSeqNo {
    const MODULUS: u64 = 1 << 32;

    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> u32 {
        self.0
    }

    /// Transform an absolute offset into its on-the-wire representation
    pub fn wrap(n: u64, isn: WrappingSeqNo) -> WrappingSeqNo {
        // truncation is the 'mod 2^32' part
        WrappingSeqNo(isn.0.wrapping_add(n as u32))
    }

    /// Returns the absolute offset that wraps to `self` and is closest to `checkpoint`.
    ///
    /// There are (up to) two candidates, one above and one below the checkpoint. The lower one
    ///  wins if it does not underflow and is at most as far away as the upper one, so an exact
    ///  tie at a distance of 2^31 resolves downwards.
    pub fn unwrap(self, isn: WrappingSeqNo, checkpoint: u64) -> u64 {
        let wrapped_checkpoint = Self::wrap(checkpoint, isn);

        let forward = self.0.wrapping_sub(wrapped_checkpoint.0) as u64;
        if forward == 0 {
            return checkpoint;
        }
        let backward = Self::MODULUS - forward;

        let lower = checkpoint.checked_sub(backward);
        let upper = checkpoint.checked_add(forward);

        match (lower, upper) {
            (Some(lower), Some(_)) if backward <= forward => lower,
            (_, Some(upper)) => upper,
            (Some(lower), None) => lower,
            (None, None) => unreachable!("a distance below 2^32 fits either above or below any u64"),
        }
    }
}

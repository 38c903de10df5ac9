/// Widening casts that can never lose information on the supported targets.
pub trait SafeCast<T> {
    fn safe_cast(self) -> T;
}

#[cfg(any(target_pointer_width = "32", target_pointer_width = "64"))]
impl SafeCast<u64> for usize {
    fn safe_cast(self) -> u64 {
        self as u64
    }
}

impl SafeCast<usize> for u16 {
    fn safe_cast(self) -> usize {
        self as usize
    }
}

impl SafeCast<u64> for u16 {
    fn safe_cast(self) -> u64 {
        self as u64
    }
}


/// For narrowing casts where business logic ensures that the value is in the narrower type's range,
///  e.g. the distance between two absolute offsets that both lie inside one buffer.
/// NB: The implementations will panic otherwise
pub trait PrecheckedCast<T> {
    fn prechecked_cast(self) -> T;
}
impl PrecheckedCast<usize> for u64 {
    fn prechecked_cast(self) -> usize {
        self.try_into().expect("this is a bug: application logic should have ensured the value range")
    }
}


/// Narrowing casts that clamp to the target type's maximum, e.g. a receive window larger than
///  what fits into the 16-bit header field
pub trait SaturatingCast<T> {
    fn saturating_cast(self) -> T;
}
impl SaturatingCast<u16> for usize {
    fn saturating_cast(self) -> u16 {
        self.try_into().unwrap_or(u16::MAX)
    }
}

#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Bits<T>(pub T);

#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Bytes<T>(pub T);

impl<T> From<Bytes<T>> for Bits<T>
where
    T: std::ops::Mul<usize, Output = T>,
{
    fn from(value: Bytes<T>) -> Self {
        Self(value.0 * 8)
    }
}

impl Bits<usize> {
    /// Bytes needed to hold this many bits, LSB first.
    pub const fn bytes(self) -> Bytes<usize> {
        Bytes(self.0.div_ceil(8))
    }

    /// Mask of the valid bits in the final byte.
    pub const fn tail_mask(self) -> u8 {
        match self.0 % 8 {
            0 => 0xff,
            n => (1 << n) - 1,
        }
    }
}

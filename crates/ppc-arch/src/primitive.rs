use zerocopy::{FromBytes, Immutable, IntoBytes};

/// A memory primitive: a byte, half-word, word or double word, either
/// signed or unsigned.
pub trait Primitive:
    std::fmt::Debug
    + std::fmt::UpperHex
    + Copy
    + Immutable
    + FromBytes
    + IntoBytes
    + Default
    + Send
    + Sync
    + 'static
{
    /// Reads a value of this primitive from `buf` in native endian. If
    /// `buf` doesn't hold enough bytes, the missing ones are treated as zero.
    fn read_ne_bytes(buf: &[u8]) -> Self;

    /// Writes this primitive into `buf` in native endian, truncating
    /// silently if `buf` is too small.
    fn write_ne_bytes(self, buf: &mut [u8]);

    /// As [`Primitive::read_ne_bytes`], but little endian.
    fn read_le_bytes(buf: &[u8]) -> Self;

    /// As [`Primitive::write_ne_bytes`], but little endian.
    fn write_le_bytes(self, buf: &mut [u8]);

    /// As [`Primitive::read_ne_bytes`], but big endian.
    fn read_be_bytes(buf: &[u8]) -> Self;

    /// As [`Primitive::write_ne_bytes`], but big endian.
    fn write_be_bytes(self, buf: &mut [u8]);
}

macro_rules! impl_primitive {
    ($($type:ty),* $(,)?) => {
        $(
            impl Primitive for $type {
                #[inline(always)]
                fn read_ne_bytes(buf: &[u8]) -> Self {
                    const SELF_SIZE: usize = size_of::<$type>();
                    let mut bytes = [0u8; SELF_SIZE];
                    let n = buf.len().min(SELF_SIZE);
                    bytes[..n].copy_from_slice(&buf[..n]);
                    <$type>::from_ne_bytes(bytes)
                }

                #[inline]
                fn write_ne_bytes(self, buf: &mut [u8]) {
                    let bytes = self.to_ne_bytes();
                    let n = buf.len().min(bytes.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                }

                #[inline(always)]
                fn read_le_bytes(buf: &[u8]) -> Self {
                    const SELF_SIZE: usize = size_of::<$type>();
                    let mut bytes = [0u8; SELF_SIZE];
                    let n = buf.len().min(SELF_SIZE);
                    bytes[..n].copy_from_slice(&buf[..n]);
                    <$type>::from_le_bytes(bytes)
                }

                #[inline]
                fn write_le_bytes(self, buf: &mut [u8]) {
                    let bytes = self.to_le_bytes();
                    let n = buf.len().min(bytes.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                }

                #[inline(always)]
                fn read_be_bytes(buf: &[u8]) -> Self {
                    const SELF_SIZE: usize = size_of::<$type>();
                    let mut bytes = [0u8; SELF_SIZE];
                    let n = buf.len().min(SELF_SIZE);
                    bytes[..n].copy_from_slice(&buf[..n]);
                    <$type>::from_be_bytes(bytes)
                }

                #[inline]
                fn write_be_bytes(self, buf: &mut [u8]) {
                    let bytes = self.to_be_bytes();
                    let n = buf.len().min(bytes.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                }
            }
        )*
    };
}

impl_primitive! {
    u8, u16, u32, u64,
    i8, i16, i32, i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_big_endian() {
        let mut buf = [0u8; 4];
        0xAABB_CCDDu32.write_be_bytes(&mut buf);
        assert_eq!(u32::read_be_bytes(&buf), 0xAABB_CCDD);
    }

    #[test]
    fn short_buffer_reads_are_zero_padded() {
        let buf = [0x12u8];
        assert_eq!(u32::read_be_bytes(&buf), 0x1200_0000);
    }

    #[test]
    fn short_buffer_writes_truncate() {
        let mut buf = [0u8; 2];
        0xAABB_CCDDu32.write_be_bytes(&mut buf);
        assert_eq!(buf, [0xAA, 0xBB]);
    }
}

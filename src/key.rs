//! Sort keys.

use std::fmt::Debug;

/// Unsigned integer that can be used as a radix sort key.
///
/// Keys are widened to `u64` for digit extraction, so every implementation must be losslessly convertible.
pub trait RadixKey: Copy + Ord + Debug + Send + Sync + 'static {
    /// Smallest key value.
    const MIN: Self;
    /// Largest key value.
    const MAX: Self;
    /// Key width in bits.
    const BITS: u32;

    /// Widens the key to `u64`.
    fn to_u64(self) -> u64;

    /// Narrows a `u64` back to the key type. Values out of range are truncated.
    fn from_u64(value: u64) -> Self;
}

macro_rules! impl_radix_key {
    ($($t:ty),*) => {
        $(
            impl RadixKey for $t {
                const MIN: Self = <$t>::MIN;
                const MAX: Self = <$t>::MAX;
                const BITS: u32 = <$t>::BITS;

                #[inline]
                fn to_u64(self) -> u64 {
                    self as u64
                }

                #[inline]
                fn from_u64(value: u64) -> Self {
                    value as $t
                }
            }
        )*
    };
}

impl_radix_key!(u8, u16, u32, u64, usize);

/// Key extraction function.
///
/// Must be pure: a row is moved between the buffer, its scratch space and temporary files several times
/// and has to produce the same key every time.
pub trait KeyFn<T> {
    type Key: RadixKey;

    /// Extracts the sort key of a row.
    fn key(&self, row: &T) -> Self::Key;
}

impl<T, K, F> KeyFn<T> for F
where
    K: RadixKey,
    F: Fn(&T) -> K,
{
    type Key = K;

    #[inline]
    fn key(&self, row: &T) -> K {
        self(row)
    }
}

#[cfg(test)]
mod test {
    use super::{KeyFn, RadixKey};

    #[test]
    fn test_key_widening() {
        assert_eq!(u8::MAX.to_u64(), 255);
        assert_eq!(u32::from_u64(7), 7u32);
        assert_eq!(<u16 as RadixKey>::BITS, 16);
        assert_eq!(<u64 as RadixKey>::MAX, u64::MAX);
    }

    #[test]
    fn test_closure_key_fn() {
        let key = |row: &(u32, &str)| row.0;
        assert_eq!(key.key(&(42, "row")), 42);
    }
}

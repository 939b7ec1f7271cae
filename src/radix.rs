//! Radix sort kernel.
//!
//! Sorts a slice of elements by an unsigned key known to lie within `[min, max]`, using a second slice of the
//! same length as scratch space. Elements are only ever moved by swapping between the two slices, so nothing is
//! cloned and no element type bounds are required.
//!
//! Two flavours are provided:
//!
//! * **LSD** - fixed number of stable counting-sort passes from the least significant digit up.
//! * **MSD** - partitions by the most significant digit first and descends into each bucket, using an explicit
//!   stack of frames instead of call recursion. Small partitions fall back to a comparison sort.

/// Digit order of a radix sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadixOrder {
    /// Least significant digit first.
    Lsd,
    /// Most significant digit first.
    Msd,
}

/// Radix sort configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadixSort {
    digit_bits: u32,
    order: RadixOrder,
}

impl Default for RadixSort {
    fn default() -> Self {
        RadixSort {
            digit_bits: Self::DEFAULT_DIGIT_BITS,
            order: RadixOrder::Msd,
        }
    }
}

/// MSD recursion level.
struct Frame {
    /// Last bucket visited at this level.
    last: usize,
    depth: u32,
    /// Whether the partitioned data of this level lives in the scratch slice.
    swapped: bool,
}

impl RadixSort {
    /// Digit width used by [`radix_sort`].
    pub const DEFAULT_DIGIT_BITS: u32 = 8;

    /// Creates a radix sort configuration.
    ///
    /// # Panics
    /// Panics if `digit_bits` is not within `1..=16`.
    pub fn new(digit_bits: u32, order: RadixOrder) -> Self {
        assert!(
            (1..=16).contains(&digit_bits),
            "radix digit width must be within 1..=16 bits, got {}",
            digit_bits
        );
        RadixSort { digit_bits, order }
    }

    /// Least significant digit radix sort with the given digit width.
    pub fn lsd(digit_bits: u32) -> Self {
        Self::new(digit_bits, RadixOrder::Lsd)
    }

    /// Most significant digit radix sort with the given digit width.
    pub fn msd(digit_bits: u32) -> Self {
        Self::new(digit_bits, RadixOrder::Msd)
    }

    pub fn digit_bits(&self) -> u32 {
        self.digit_bits
    }

    pub fn order(&self) -> RadixOrder {
        self.order
    }

    fn buckets(&self) -> usize {
        1 << self.digit_bits
    }

    /// Sorts `data` in ascending key order.
    ///
    /// # Arguments
    /// * `data` - Elements to be sorted. The result is always left here.
    /// * `scratch` - Scratch space, at least as long as `data`. Its content is left unspecified.
    /// * `min` - Lower bound of all keys in `data`
    /// * `max` - Upper bound of all keys in `data`
    /// * `key` - Key extraction function
    ///
    /// # Panics
    /// Panics if `scratch` is shorter than `data` or `min > max`.
    pub fn sort<T, K, F>(&self, data: &mut [T], scratch: &mut [T], min: K, max: K, key: F)
    where
        K: crate::RadixKey,
        F: Fn(&T) -> K,
    {
        assert!(
            scratch.len() >= data.len(),
            "radix sort scratch space is too small ({} < {})",
            scratch.len(),
            data.len()
        );
        assert!(min <= max, "invalid key range: {:?} > {:?}", min, max);

        let scratch = &mut scratch[..data.len()];
        match self.order {
            RadixOrder::Lsd => self.sort_lsd(data, scratch, min, max, key),
            RadixOrder::Msd => self.sort_msd(data, scratch, min, max, key),
        }
    }

    fn sort_lsd<T, K, F>(&self, data: &mut [T], scratch: &mut [T], min: K, max: K, key: F)
    where
        K: crate::RadixKey,
        F: Fn(&T) -> K,
    {
        let size = data.len();
        if size == 0 {
            return;
        }

        let mask = (self.buckets() - 1) as u64;
        let max_bit = bit_length(max.to_u64() - min.to_u64());
        let min = min.to_u64();
        let digit = |row: &T, bit: u32| ((key(row).to_u64().wrapping_sub(min) >> bit) & mask) as usize;

        let mut counts = vec![0usize; self.buckets()];
        let mut src: &mut [T] = data;
        let mut dst: &mut [T] = scratch;
        let mut swapped = false;

        let mut bit = 0;
        while bit < max_bit {
            counts.fill(0);
            for row in src.iter() {
                counts[digit(row, bit)] += 1;
            }

            if !prefix_sums(&mut counts, 0, size) {
                for ind in 0..size {
                    let offset = &mut counts[digit(&src[ind], bit)];
                    std::mem::swap(&mut src[ind], &mut dst[*offset]);
                    *offset += 1;
                }
                std::mem::swap(&mut src, &mut dst);
                swapped = !swapped;
            }

            bit += self.digit_bits;
        }

        // sorted data ended up in the scratch slice
        if swapped {
            dst.swap_with_slice(src);
        }
    }

    fn sort_msd<T, K, F>(&self, data: &mut [T], scratch: &mut [T], min: K, max: K, key: F)
    where
        K: crate::RadixKey,
        F: Fn(&T) -> K,
    {
        let buckets = self.buckets();
        let mask = (buckets - 1) as u64;
        let max_bit = bit_length(max.to_u64() - min.to_u64());
        let min = min.to_u64();
        let digit = |row: &T, bit: u32| ((key(row).to_u64().wrapping_sub(min) >> bit) & mask) as usize;

        let levels = ((K::BITS + self.digit_bits - 1) / self.digit_bits) as usize;
        let mut stack: Vec<Frame> = Vec::with_capacity(levels);
        // bucket end offsets of every level on the stack
        let mut ends = vec![0usize; levels * buckets];
        let mut counts = vec![0usize; buckets];

        let mut depth = 0;
        let mut swapped = false;
        let mut from = 0;
        let mut to = data.len();

        loop {
            let size = to - from;

            if size > buckets {
                let bit = max_bit.saturating_sub((depth + 1) * self.digit_bits);
                let (src, dst) = if swapped {
                    (&mut *scratch, &mut *data)
                } else {
                    (&mut *data, &mut *scratch)
                };

                counts.fill(0);
                for row in &src[from..to] {
                    counts[digit(row, bit)] += 1;
                }

                let homogeneous = prefix_sums(&mut counts, from, size);
                if !homogeneous {
                    for ind in from..to {
                        let offset = &mut counts[digit(&src[ind], bit)];
                        std::mem::swap(&mut src[ind], &mut dst[*offset]);
                        *offset += 1;
                    }
                    swapped = !swapped;
                }

                if bit > 0 {
                    // a homogeneous digit carries no information, go one digit deeper on the same range
                    if !homogeneous {
                        let level = stack.len();
                        ends[level * buckets..(level + 1) * buckets].copy_from_slice(&counts);
                        stack.push(Frame { last: 0, depth, swapped });
                        to = counts[0];
                    }
                    depth += 1;
                    continue;
                }
            } else if size > 1 {
                let range = if swapped {
                    &mut scratch[from..to]
                } else {
                    &mut data[from..to]
                };
                range.sort_unstable_by_key(|row| key(row));
            }

            if swapped {
                data[from..to].swap_with_slice(&mut scratch[from..to]);
            }

            // resume from the next sibling bucket
            loop {
                let level = match stack.len() {
                    0 => return,
                    len => len - 1,
                };
                let frame = &mut stack[level];
                frame.last += 1;
                if frame.last == buckets {
                    stack.pop();
                    continue;
                }

                let level_ends = &ends[level * buckets..(level + 1) * buckets];
                from = level_ends[frame.last - 1];
                to = level_ends[frame.last];
                swapped = frame.swapped;
                depth = frame.depth + 1;
                break;
            }
        }
    }
}

/// Sorts `data` with the default configuration: MSD radix sort with 8-bit digits.
///
/// See [`RadixSort::sort`].
pub fn radix_sort<T, K, F>(data: &mut [T], scratch: &mut [T], min: K, max: K, key: F)
where
    K: crate::RadixKey,
    F: Fn(&T) -> K,
{
    RadixSort::default().sort(data, scratch, min, max, key)
}

fn bit_length(value: u64) -> u32 {
    u64::BITS - value.leading_zeros()
}

/// Turns bucket counts into bucket start offsets.
/// Returns `true` without finishing if a single bucket holds all `size` elements.
fn prefix_sums(counts: &mut [usize], start: usize, size: usize) -> bool {
    let mut sum = start;
    for count in counts.iter_mut() {
        let bucket_count = *count;
        if bucket_count == size {
            return true;
        }
        *count = sum;
        sum += bucket_count;
    }
    false
}

//! Bucket splitters.
//!
//! A splitter divides a key range `[min, max]` into a number of buckets. Bucket `i` covers the half-open interval
//! `[splitter.min(i), splitter.max(i))`, except for the last bucket which also includes `max`.

use crate::RadixKey;

/// Key to bucket mapping.
pub trait Splitter<K: RadixKey> {
    /// Builds a splitter over `[min, max]` targeting `buckets_num` buckets.
    ///
    /// # Arguments
    /// * `samples` - Keys sampled from the data being split. Ignored by splitters that don't need them.
    /// * `min` - Smallest key of the range
    /// * `max` - Largest key of the range
    /// * `buckets_num` - Target number of buckets
    fn from_samples(samples: Vec<K>, min: K, max: K, buckets_num: usize) -> Self
    where
        Self: Sized;

    /// Returns the actual number of buckets.
    fn buckets(&self) -> usize;

    /// Returns the bucket index of a key.
    fn bucket(&self, key: K) -> usize;

    /// Returns the lower (inclusive) boundary of a bucket.
    fn min(&self, bucket: usize) -> K;

    /// Returns the upper boundary of a bucket. Exclusive for every bucket but the last one.
    fn max(&self, bucket: usize) -> K {
        self.min(bucket + 1)
    }
}

/// Splits a key range into equal power-of-two sized slices.
///
/// Lookup is a subtraction and a shift, but skewed data ends up in a few overfull buckets.
#[derive(Debug, Clone)]
pub struct UniformSplitter<K> {
    min: K,
    max: K,
    shift: u32,
    buckets: usize,
}

impl<K: RadixKey> UniformSplitter<K> {
    /// Creates a uniform splitter with at most `buckets_num` buckets.
    ///
    /// # Panics
    /// Panics if `buckets_num` is zero or `min > max`.
    pub fn new(min: K, max: K, buckets_num: usize) -> Self {
        assert!(buckets_num > 0, "buckets number must be positive");
        assert!(min <= max, "invalid key range: {:?} > {:?}", min, max);

        let span = (max.to_u64() - min.to_u64()) as u128;
        let width = (span + buckets_num as u128) / buckets_num as u128; // ceil((span + 1) / buckets_num)
        let shift = u128::BITS - (width - 1).leading_zeros();
        let buckets = ((span >> shift) + 1) as usize;

        UniformSplitter {
            min,
            max,
            shift,
            buckets,
        }
    }
}

impl<K: RadixKey> Splitter<K> for UniformSplitter<K> {
    fn from_samples(_samples: Vec<K>, min: K, max: K, buckets_num: usize) -> Self {
        UniformSplitter::new(min, max, buckets_num)
    }

    fn buckets(&self) -> usize {
        self.buckets
    }

    fn bucket(&self, key: K) -> usize {
        let offset = key.to_u64().saturating_sub(self.min.to_u64()) as u128;
        ((offset >> self.shift) as usize).min(self.buckets - 1)
    }

    fn min(&self, bucket: usize) -> K {
        if bucket < self.buckets {
            K::from_u64((self.min.to_u64() as u128 + ((bucket as u128) << self.shift)) as u64)
        } else {
            self.max
        }
    }
}

/// Splits a key range at empirical quantiles of a key sample.
///
/// Bucket sizes stay balanced under arbitrary key distributions; the cost is sorting the sample.
/// Boundaries are kept within `[min + 1, max]`, so every bucket is a strict sub-range of `[min, max]`.
#[derive(Debug, Clone)]
pub struct SampleSplitter<K> {
    min: K,
    /// Upper boundary of every bucket; the last one is `max`.
    bounds: Vec<K>,
}

impl<K: RadixKey> SampleSplitter<K> {
    /// Creates a sample splitter with `buckets_num` buckets.
    ///
    /// # Panics
    /// Panics if `buckets_num` is zero, `min > max` or `samples` is empty while more than one bucket is requested.
    pub fn new(mut samples: Vec<K>, min: K, max: K, buckets_num: usize) -> Self {
        assert!(buckets_num > 0, "buckets number must be positive");
        assert!(min <= max, "invalid key range: {:?} > {:?}", min, max);
        assert!(
            buckets_num == 1 || !samples.is_empty(),
            "at least one sample is required to split a range"
        );

        samples.sort_unstable();

        let floor = if min < max { K::from_u64(min.to_u64() + 1) } else { min };
        let mut bounds = Vec::with_capacity(buckets_num);
        for ind in 1..buckets_num {
            let sample = samples[ind * samples.len() / buckets_num];
            bounds.push(sample.clamp(floor, max));
        }
        bounds.push(max);

        SampleSplitter { min, bounds }
    }
}

impl<K: RadixKey> Splitter<K> for SampleSplitter<K> {
    fn from_samples(samples: Vec<K>, min: K, max: K, buckets_num: usize) -> Self {
        SampleSplitter::new(samples, min, max, buckets_num)
    }

    fn buckets(&self) -> usize {
        self.bounds.len()
    }

    fn bucket(&self, key: K) -> usize {
        let inner = &self.bounds[..self.bounds.len() - 1];
        inner.partition_point(|bound| *bound <= key)
    }

    fn min(&self, bucket: usize) -> K {
        match bucket {
            0 => self.min,
            _ => self.bounds[bucket.min(self.bounds.len()) - 1],
        }
    }

    fn max(&self, bucket: usize) -> K {
        self.bounds[bucket.min(self.bounds.len() - 1)]
    }
}

#[cfg(test)]
mod test {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rstest::*;

    use super::{SampleSplitter, Splitter, UniformSplitter};

    fn assert_coverage<S: Splitter<u64>>(splitter: &S, key: u64, max: u64) {
        let bucket = splitter.bucket(key);
        assert!(bucket < splitter.buckets(), "key {} mapped to bucket {}", key, bucket);
        assert!(splitter.min(bucket) <= key, "key {} below bucket {}", key, bucket);
        if bucket + 1 == splitter.buckets() {
            assert!(key <= splitter.max(bucket));
            assert_eq!(splitter.max(bucket), max);
        } else {
            assert!(key < splitter.max(bucket), "key {} above bucket {}", key, bucket);
        }
    }

    #[rstest]
    #[case(0, 99, 10, 4, 7)]
    #[case(0, 99, 4, 5, 4)]
    #[case(10, 10, 4, 0, 1)]
    #[case(0, u64::MAX, 1, 64, 1)]
    #[case(0, u64::MAX, 256, 56, 256)]
    #[case(5, 7, 8, 0, 3)]
    fn test_uniform_splitter_layout(
        #[case] min: u64,
        #[case] max: u64,
        #[case] buckets_num: usize,
        #[case] shift: u32,
        #[case] buckets: usize,
    ) {
        let splitter = UniformSplitter::new(min, max, buckets_num);
        assert_eq!(splitter.shift, shift);
        assert_eq!(splitter.buckets(), buckets);
        assert_eq!(splitter.min(0), min);
        assert_eq!(splitter.max(buckets - 1), max);
        assert_eq!(splitter.bucket(min), 0);
        assert_eq!(splitter.bucket(max), buckets - 1);
    }

    #[test]
    fn test_uniform_splitter_coverage() {
        let (min, max) = (1_000u64, 1_000_000u64);
        let splitter = UniformSplitter::new(min, max, 37);
        for key in (min..=max).step_by(997).chain([min, max]) {
            assert_coverage(&splitter, key, max);
        }
    }

    #[rstest]
    #[case(0, u64::MAX, 16)]
    #[case(100, 200, 8)]
    #[case(0, 1_000_000, 64)]
    fn test_sample_splitter_coverage(#[case] min: u64, #[case] max: u64, #[case] buckets_num: usize) {
        let mut rng = StdRng::seed_from_u64(1);
        let samples: Vec<u64> = (0..buckets_num * 4).map(|_| rng.gen_range(min..=max)).collect();
        let splitter = SampleSplitter::new(samples, min, max, buckets_num);

        assert_eq!(splitter.buckets(), buckets_num);
        assert_eq!(splitter.min(0), min);
        assert_eq!(splitter.max(buckets_num - 1), max);

        for _ in 0..10_000 {
            assert_coverage(&splitter, rng.gen_range(min..=max), max);
        }
        assert_coverage(&splitter, min, max);
        assert_coverage(&splitter, max, max);
    }

    #[test]
    fn test_sample_splitter_balances_skewed_keys() {
        let mut rng = StdRng::seed_from_u64(2);
        // most keys are crowded at the bottom of a wide range
        let keys: Vec<u64> = (0..20_000)
            .map(|_| {
                if rng.gen_bool(0.9) {
                    rng.gen_range(0..1_000)
                } else {
                    rng.gen_range(0..u64::MAX)
                }
            })
            .collect();
        let samples = keys.iter().step_by(100).copied().collect();

        let splitter = SampleSplitter::new(samples, 0, u64::MAX, 8);
        let mut sizes = vec![0usize; splitter.buckets()];
        for key in &keys {
            sizes[splitter.bucket(*key)] += 1;
        }
        assert!(sizes.iter().all(|size| *size < keys.len() / 3), "unbalanced buckets: {:?}", sizes);

        let uniform = UniformSplitter::new(0, u64::MAX, 8);
        let bottom = keys.iter().filter(|key| uniform.bucket(**key) == 0).count();
        assert!(bottom > keys.len() * 8 / 10);
    }

    #[test]
    fn test_sample_splitter_duplicated_samples() {
        let splitter = SampleSplitter::new(vec![50u64; 16], 0, 100, 4);

        assert_eq!(splitter.bucket(49), 0);
        assert_eq!(splitter.bucket(50), 3);
        assert_eq!(splitter.bucket(100), 3);
        assert_eq!((splitter.min(3), splitter.max(3)), (50, 100));
    }

    #[test]
    fn test_sample_splitter_strict_sub_ranges() {
        // samples equal to the range bounds must not produce a bucket covering the whole range
        for samples in [vec![0u64; 8], vec![100u64; 8]] {
            let splitter = SampleSplitter::new(samples, 0, 100, 4);
            for bucket in 0..splitter.buckets() {
                let lo = splitter.min(bucket);
                let hi = if bucket + 1 == splitter.buckets() {
                    splitter.max(bucket)
                } else {
                    splitter.max(bucket) - 1
                };
                assert!(lo > 0 || hi < 100, "bucket {} covers the whole range", bucket);
            }
        }
    }

    #[test]
    #[should_panic]
    fn test_sample_splitter_without_samples() {
        SampleSplitter::<u64>::new(vec![], 0, 10, 2);
    }
}

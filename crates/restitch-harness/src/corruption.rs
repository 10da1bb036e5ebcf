//! Deterministic corruption of database images.
//!
//! Every pattern is reproducible: the same pattern applied to the same
//! image always yields the same bytes, with any randomness drawn from a
//! seed carried inside the pattern itself. Regions that fall outside the
//! image are clamped (a fully out-of-range pattern is a no-op), so
//! randomly generated patterns can always be applied without bookkeeping.

use std::collections::BTreeSet;
use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use restitch_types::PageSize;

/// A description of damage to inflict on a database image.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum CorruptionPattern {
    /// Flip a single bit at a byte offset.
    BitFlip { byte_offset: u64, bit_position: u8 },
    /// Flip `count` unique bits within `[offset..offset+length)`.
    BitFlipMany {
        offset: u64,
        length: u64,
        count: u32,
        seed: u64,
    },
    /// Zero out an entire page (page numbers are 1-based).
    PageZero { page_number: u32 },
    /// Overwrite a byte range with seeded random data.
    RandomOverwrite {
        offset: u64,
        length: usize,
        seed: u64,
    },
    /// Overwrite a range within one page with seeded random data.
    PagePartialCorrupt {
        page_number: u32,
        offset_within_page: u16,
        length: u16,
        seed: u64,
    },
    /// Truncate the image to `new_len` bytes.
    TruncateTo { new_len: u64 },
    /// Zero out the 100-byte file header.
    HeaderZero,
}

impl fmt::Display for CorruptionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BitFlip {
                byte_offset,
                bit_position,
            } => write!(f, "BitFlip(byte={byte_offset}, bit={bit_position})"),
            Self::BitFlipMany {
                offset,
                length,
                count,
                seed,
            } => write!(
                f,
                "BitFlipMany(offset={offset}, length={length}, count={count}, seed={seed})"
            ),
            Self::PageZero { page_number } => write!(f, "PageZero(page={page_number})"),
            Self::RandomOverwrite {
                offset,
                length,
                seed,
            } => write!(
                f,
                "RandomOverwrite(offset={offset}, length={length}, seed={seed})"
            ),
            Self::PagePartialCorrupt {
                page_number,
                offset_within_page,
                length,
                seed,
            } => write!(
                f,
                "PagePartialCorrupt(page={page_number}, offset={offset_within_page}, length={length}, seed={seed})"
            ),
            Self::TruncateTo { new_len } => write!(f, "TruncateTo(len={new_len})"),
            Self::HeaderZero => write!(f, "HeaderZero"),
        }
    }
}

/// Applies [`CorruptionPattern`]s to in-memory images.
#[derive(Debug, Clone, Copy)]
pub struct CorruptionInjector {
    page_size: PageSize,
}

impl Default for CorruptionInjector {
    fn default() -> Self {
        Self::new()
    }
}

impl CorruptionInjector {
    /// An injector assuming the default 4096-byte page size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_page_size(PageSize::DEFAULT)
    }

    #[must_use]
    pub const fn with_page_size(page_size: PageSize) -> Self {
        Self { page_size }
    }

    /// Apply one pattern to `image` in place.
    pub fn inject(&self, image: &mut Vec<u8>, pattern: &CorruptionPattern) {
        let ps = self.page_size.as_usize();
        match pattern {
            CorruptionPattern::BitFlip {
                byte_offset,
                bit_position,
            } => {
                let Ok(offset) = usize::try_from(*byte_offset) else {
                    return;
                };
                if let Some(byte) = image.get_mut(offset) {
                    *byte ^= 1 << (bit_position % 8);
                }
            }

            CorruptionPattern::BitFlipMany {
                offset,
                length,
                count,
                seed,
            } => {
                let start = usize::try_from(*offset).unwrap_or(usize::MAX);
                let len = usize::try_from(*length).unwrap_or(usize::MAX);
                let end = start.saturating_add(len).min(image.len());
                if start >= end {
                    return;
                }
                let span = end - start;
                let available = span.saturating_mul(8);
                let target = (*count as usize).min(available);

                let mut rng = StdRng::seed_from_u64(*seed);
                let mut flips = BTreeSet::<(usize, u8)>::new();
                while flips.len() < target {
                    let byte_index = start + rng.gen_range(0..span);
                    let bit_index = rng.gen_range(0..8u8);
                    flips.insert((byte_index, bit_index));
                }
                for (byte_index, bit_index) in flips {
                    image[byte_index] ^= 1 << bit_index;
                }
            }

            CorruptionPattern::PageZero { page_number } => {
                if *page_number == 0 {
                    return;
                }
                let start = (*page_number as usize - 1).saturating_mul(ps);
                let end = start.saturating_add(ps).min(image.len());
                if start < end {
                    image[start..end].fill(0);
                }
            }

            CorruptionPattern::RandomOverwrite {
                offset,
                length,
                seed,
            } => {
                let start = usize::try_from(*offset).unwrap_or(usize::MAX);
                let end = start.saturating_add(*length).min(image.len());
                if start >= end {
                    return;
                }
                let mut rng = StdRng::seed_from_u64(*seed);
                rng.fill_bytes(&mut image[start..end]);
            }

            CorruptionPattern::PagePartialCorrupt {
                page_number,
                offset_within_page,
                length,
                seed,
            } => {
                if *page_number == 0 {
                    return;
                }
                let page_start = (*page_number as usize - 1).saturating_mul(ps);
                let start = page_start.saturating_add(usize::from(*offset_within_page));
                let end = start
                    .saturating_add(usize::from(*length))
                    .min(page_start.saturating_add(ps))
                    .min(image.len());
                if start >= end {
                    return;
                }
                let mut rng = StdRng::seed_from_u64(*seed);
                rng.fill_bytes(&mut image[start..end]);
            }

            CorruptionPattern::TruncateTo { new_len } => {
                let new_len = usize::try_from(*new_len).unwrap_or(usize::MAX);
                if new_len < image.len() {
                    image.truncate(new_len);
                }
            }

            CorruptionPattern::HeaderZero => {
                let end = image.len().min(100);
                image[..end].fill(0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_image() -> Vec<u8> {
        (0..=255u8).cycle().take(3 * 4096).collect()
    }

    #[test]
    fn injection_is_deterministic() {
        let injector = CorruptionInjector::new();
        let patterns = [
            CorruptionPattern::BitFlipMany {
                offset: 100,
                length: 500,
                count: 17,
                seed: 42,
            },
            CorruptionPattern::RandomOverwrite {
                offset: 4096,
                length: 64,
                seed: 7,
            },
            CorruptionPattern::PagePartialCorrupt {
                page_number: 3,
                offset_within_page: 10,
                length: 30,
                seed: 9,
            },
        ];
        for pattern in &patterns {
            let mut a = sample_image();
            let mut b = sample_image();
            injector.inject(&mut a, pattern);
            injector.inject(&mut b, pattern);
            assert_eq!(a, b, "{pattern}");
            assert_ne!(a, sample_image(), "{pattern}");
        }
    }

    #[test]
    fn bit_flip_many_flips_exactly_count_bits() {
        let injector = CorruptionInjector::new();
        let original = sample_image();
        let mut image = sample_image();
        injector.inject(
            &mut image,
            &CorruptionPattern::BitFlipMany {
                offset: 0,
                length: 4096,
                count: 33,
                seed: 1,
            },
        );
        let changed: u32 = original
            .iter()
            .zip(&image)
            .map(|(a, b)| (a ^ b).count_ones())
            .sum();
        assert_eq!(changed, 33);
    }

    #[test]
    fn page_zero_touches_only_that_page() {
        let injector = CorruptionInjector::new();
        let mut image = sample_image();
        injector.inject(&mut image, &CorruptionPattern::PageZero { page_number: 2 });
        assert!(image[4096..8192].iter().all(|&b| b == 0));
        assert_eq!(image[..4096], sample_image()[..4096]);
        assert_eq!(image[8192..], sample_image()[8192..]);
    }

    #[test]
    fn truncate_only_ever_shrinks() {
        let injector = CorruptionInjector::new();
        let mut image = sample_image();
        injector.inject(&mut image, &CorruptionPattern::TruncateTo { new_len: 5000 });
        assert_eq!(image.len(), 5000);
        injector.inject(
            &mut image,
            &CorruptionPattern::TruncateTo { new_len: 1 << 40 },
        );
        assert_eq!(image.len(), 5000);
    }

    #[test]
    fn header_zero_wipes_the_magic() {
        let injector = CorruptionInjector::new();
        let mut image = sample_image();
        injector.inject(&mut image, &CorruptionPattern::HeaderZero);
        assert!(image[..100].iter().all(|&b| b == 0));
        assert_ne!(image[100], 0);
    }

    #[test]
    fn out_of_range_patterns_are_no_ops() {
        let injector = CorruptionInjector::new();
        let original = sample_image();
        let mut image = sample_image();
        injector.inject(
            &mut image,
            &CorruptionPattern::BitFlip {
                byte_offset: u64::MAX,
                bit_position: 3,
            },
        );
        injector.inject(
            &mut image,
            &CorruptionPattern::PageZero { page_number: 900 },
        );
        injector.inject(
            &mut image,
            &CorruptionPattern::RandomOverwrite {
                offset: 1 << 33,
                length: 10,
                seed: 0,
            },
        );
        assert_eq!(image, original);
    }
}

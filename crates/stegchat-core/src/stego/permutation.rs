//! Keyed pixel ordering.
//!
//! Sender and receiver derive the same pseudorandom sequence of pixel indices from a
//! shared key, the payload length and the image dimensions, so embedding locations are
//! never transmitted.
//!
//! # Note
//!
//! The distinct draw resolves collisions by linear probing, which skews the
//! distribution once collisions cluster. What matters here is bit-for-bit
//! reproducibility across implementations sharing a key, not statistical quality.

use rand_core::RngCore;

use crate::error::StegchatError;
use crate::result::Result;
use crate::stego::isaac::Isaac;

pub const SEED_WORDS: usize = 256;

/// Builds the ISAAC seed vector: `seed[i] = (key[i mod keylen] + i) ^ msg_len mod 2^32`
pub fn derive_seed(key: &[u8], msg_len: u32) -> Result<[u32; SEED_WORDS]> {
    if key.is_empty() {
        return Err(StegchatError::InvalidKey);
    }

    Ok(std::array::from_fn(|i| {
        (key[i % key.len()] as u32 + i as u32).wrapping_pow(msg_len)
    }))
}

/// Draws `n` distinct integers from `[start, end)`.
///
/// Each candidate is `floor(r / 2^32 * (end - start)) + start` for the next 32-bit
/// output `r`, computed in integer arithmetic. On a collision the candidate moves
/// forward, wrapping to `start`, until a free value is found. `n` is clamped to the
/// size of the range.
pub fn generate_n_distinct<R: RngCore>(rng: &mut R, start: usize, end: usize, n: usize) -> Vec<usize> {
    let span = end.saturating_sub(start);
    let n = n.min(span);
    let mut taken = vec![false; span];
    let mut drawn = Vec::with_capacity(n);

    for _ in 0..n {
        let mut offset = ((rng.next_u32() as u64 * span as u64) >> 32) as usize;
        while taken[offset] {
            offset = (offset + 1) % span;
        }
        taken[offset] = true;
        drawn.push(start + offset);
    }

    drawn
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelCoordinate {
    pub row: u32,
    pub col: u32,
}

/// Ordered pixel indices in raster numbering (`index = row * width + col`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermutationOrder {
    indices: Vec<usize>,
    width: u32,
}

impl PermutationOrder {
    /// Derives `n` distinct pixel indices from `[start, width * height)`.
    ///
    /// # Arguments
    /// * `key` - shared permutation key, must not be empty
    /// * `msg_len` - payload length in bits
    /// * `start` - first pixel that may be used, pixels before it hold the header
    /// * `n` - number of pixels needed, clamped to the pixels available
    pub fn new(
        key: &[u8],
        msg_len: u32,
        (width, height): (u32, u32),
        start: usize,
        n: usize,
    ) -> Result<Self> {
        let mut rng = Isaac::from_seed_words(derive_seed(key, msg_len)?);
        let end = width as usize * height as usize;

        Ok(Self {
            indices: generate_n_distinct(&mut rng, start, end, n),
            width,
        })
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn coordinates(&self) -> impl Iterator<Item = PixelCoordinate> + '_ {
        let width = self.width as usize;
        self.indices.iter().map(move |&index| PixelCoordinate {
            row: (index / width) as u32,
            col: (index % width) as u32,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_formula() {
        let seed = derive_seed(b"ab", 3).unwrap();
        assert_eq!(seed[0], 97u32.pow(3));
        assert_eq!(seed[1], 99u32.pow(3));
        assert_eq!(seed[2], 99u32.pow(3));
        // wraps modulo 2^32
        assert_eq!(seed[255], (98u32 + 255).wrapping_pow(3));
    }

    #[test]
    fn test_seed_rejects_empty_key() {
        assert!(matches!(derive_seed(b"", 8), Err(StegchatError::InvalidKey)));
    }

    #[test]
    fn test_known_answer() {
        let mut rng = Isaac::from_seed_words(derive_seed(b"secret", 64).unwrap());
        assert_eq!(rng.next_u32(), 0x4f83_6245);

        let order = PermutationOrder::new(b"secret", 64, (10, 10), 2, 12).unwrap();
        assert_eq!(
            order.indices(),
            &[32, 62, 34, 7, 60, 61, 54, 16, 8, 18, 63, 88]
        );
    }

    #[test]
    fn test_permutation_deterministic() {
        let p1 = PermutationOrder::new(b"test_seed", 800, (40, 30), 3, 200).unwrap();
        let p2 = PermutationOrder::new(b"test_seed", 800, (40, 30), 3, 200).unwrap();

        assert_eq!(p1, p2);
    }

    #[test]
    fn test_permutation_changes_with_every_input() {
        let base = PermutationOrder::new(b"seed_a", 800, (40, 30), 3, 100).unwrap();

        // same seed, only the range differs
        let wider = PermutationOrder::new(b"seed_a", 800, (41, 30), 3, 100).unwrap();
        let taller = PermutationOrder::new(b"seed_a", 800, (40, 31), 3, 100).unwrap();
        assert_ne!(base.indices(), wider.indices());
        assert_ne!(base.indices(), taller.indices());

        for other in [
            PermutationOrder::new(b"seed_b", 800, (40, 30), 3, 100).unwrap(),
            PermutationOrder::new(b"seed_a", 808, (40, 30), 3, 100).unwrap(),
        ] {
            let differences = base
                .indices()
                .iter()
                .zip(other.indices())
                .filter(|(a, b)| a != b)
                .count();
            assert!(differences > 50, "Only {differences} differences, expected > 50");
        }
    }

    #[test]
    fn test_distinct_and_in_range() {
        let order = PermutationOrder::new(b"key", 4000, (20, 20), 5, 395).unwrap();

        let mut seen = [false; 400];
        for &i in order.indices() {
            assert!((5..400).contains(&i), "index {i} out of range");
            assert!(!seen[i], "Duplicate index {i}");
            seen[i] = true;
        }
        assert_eq!(order.len(), 395);
    }

    #[test]
    fn test_clamped_to_available_pixels() {
        let order = PermutationOrder::new(b"key", 64, (4, 4), 10, 100).unwrap();
        assert_eq!(order.len(), 6);

        let mut indices = order.indices().to_vec();
        indices.sort_unstable();
        assert_eq!(indices, vec![10, 11, 12, 13, 14, 15]);
    }

    #[test]
    fn test_coordinates_are_row_major() {
        let order = PermutationOrder::new(b"secret", 64, (10, 10), 2, 12).unwrap();
        let first = order.coordinates().next().unwrap();

        // index 32 in a 10 pixel wide image
        assert_eq!(first, PixelCoordinate { row: 3, col: 2 });
    }

    #[test]
    fn test_empty_permutation() {
        let order = PermutationOrder::new(b"key", 0, (4, 4), 1, 0).unwrap();
        assert!(order.is_empty());
        assert_eq!(order.len(), 0);
    }
}

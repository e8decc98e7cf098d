use std::fmt::{self, Debug, Formatter};

use crate::error::StegchatError;
use crate::result::Result;

/// Number of low order bits per color channel used for the payload
pub const DEFAULT_BIT_DENSITY: u8 = 2;

/// The length header is always 16 bits, independent of the bit density
pub const HEADER_BITS: usize = 16;

/// Options for LSB embedding into a carrier image
#[derive(Clone, PartialEq, Eq)]
pub struct TranscoderOptions {
    /// Count of low order bits per color channel that carry data.
    ///
    /// Note this number influences the capacity directly.
    pub density: u8,

    /// Permutation key. Without a key the payload follows the header in raster order,
    /// with a key the payload is spread over a keyed pseudorandom pixel order.
    pub key: Option<Vec<u8>>,
}

impl Default for TranscoderOptions {
    fn default() -> Self {
        Self {
            density: DEFAULT_BIT_DENSITY,
            key: None,
        }
    }
}

impl Debug for TranscoderOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let key = match &self.key {
            Some(key) => format!("Some({})", "*".repeat(key.len())),
            None => "None".to_string(),
        };
        f.debug_struct("TranscoderOptions")
            .field("density", &self.density)
            .field("key", &key)
            .finish()
    }
}

impl TranscoderOptions {
    pub fn with_density(mut self, density: u8) -> Self {
        self.density = density;
        self
    }

    pub fn with_key<K: AsRef<[u8]>>(mut self, key: K) -> Self {
        self.key = Some(key.as_ref().to_vec());
        self
    }

    /// If `None` is passed, the payload is embedded in raster order
    pub fn use_key<K: AsRef<[u8]>>(mut self, key: Option<K>) -> Self {
        self.key = key.map(|k| k.as_ref().to_vec());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=8).contains(&self.density) {
            return Err(StegchatError::InvalidDensity(self.density));
        }
        if matches!(&self.key, Some(key) if key.is_empty()) {
            return Err(StegchatError::InvalidKey);
        }

        Ok(())
    }
}

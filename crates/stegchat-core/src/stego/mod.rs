pub mod isaac;
pub mod permutation;
pub mod transcoder;

pub use isaac::Isaac;
pub use permutation::{derive_seed, generate_n_distinct, PermutationOrder, PixelCoordinate};
pub use transcoder::{StegoTranscoder, MAX_PAYLOAD_LEN};

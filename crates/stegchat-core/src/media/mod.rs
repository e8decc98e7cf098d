mod carrier;
mod codec_options;

use std::path::Path;

pub use carrier::CarrierImage;
pub use codec_options::{TranscoderOptions, DEFAULT_BIT_DENSITY, HEADER_BITS};

pub trait Persist {
    fn save_as(&self, _: &Path) -> crate::Result<()>;
}

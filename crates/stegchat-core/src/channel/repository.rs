use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error};

use crate::error::StegchatError;
use crate::media::CarrierImage;
use crate::result::Result;

/// A directory of PNG carrier images, handed out round-robin.
///
/// The listing is taken once and sorted by file name. Clones share the listing but
/// keep their own position, so every session rotates through the images on its own.
#[derive(Debug, Clone)]
pub struct ImageRepository {
    images: Arc<[PathBuf]>,
    next: usize,
}

impl ImageRepository {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let entries = fs::read_dir(dir).map_err(|source| {
            error!("Error reading image repository {dir:?}: {source}");
            StegchatError::ReadError { source }
        })?;

        let mut images = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|source| StegchatError::ReadError { source })?
                .path();
            let is_png = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("png"));
            if path.is_file() && is_png {
                images.push(path);
            }
        }

        if images.is_empty() {
            return Err(StegchatError::EmptyImageRepository(
                dir.display().to_string(),
            ));
        }
        images.sort();
        debug!("{} carrier images in {dir:?}", images.len());

        Ok(Self {
            images: images.into(),
            next: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.images
    }

    /// advances the rotation and loads the image it lands on
    pub fn next_carrier(&mut self) -> Result<CarrierImage> {
        let path = &self.images[self.next];
        self.next = (self.next + 1) % self.images.len();
        CarrierImage::from_file(path)
    }
}

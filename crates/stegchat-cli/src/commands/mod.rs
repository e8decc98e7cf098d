pub mod hide;
pub mod relay;
pub mod unveil;

use crate::error::StegchatError;

pub type Result<T> = std::result::Result<T, StegchatError>;

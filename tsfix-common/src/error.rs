//! Errors of the shared configuration layer
//!
//! Component errors (header, repair, fetch, extract) live with their
//! components; this type only covers loading configuration from disk.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Config file exists but could not be read or parsed as `TomlConfig`
    #[error("Configuration error: {0}")]
    Config(String),
}

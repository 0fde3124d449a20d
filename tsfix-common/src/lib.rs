//! # tsfix Common Library
//!
//! Shared code for the Transfer Syntax fixer and its validation harness:
//! - Error type shared by the configuration layer
//! - Configuration loading (TOML file, environment, command line)
//! - Logging bootstrap
//! - Syntax Catalog (known Transfer Syntax UIDs and their structure)

pub mod catalog;
pub mod config;
pub mod error;
pub mod logging;

pub use catalog::{ByteOrder, CompressionFamily, SyntaxCatalog, SyntaxDescriptor};
pub use error::{Error, Result};

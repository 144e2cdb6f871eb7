pub mod config;
pub mod diagnostics;
pub mod error;
pub mod logging;
pub mod module;

pub use error::{ChirpError, Result};

pub mod config;
pub mod error;
pub mod types;

pub use config::OmnisiaConfig;
pub use error::{OmnisiaError, Result};
pub use types::*;

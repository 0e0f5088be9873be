//! Utility functions and types shared across the pipeline.

pub mod error;
mod logging;
pub mod types;

pub use error::Error;
pub use logging::{init_logging, init_test_logging};
pub use types::*;

/// Re-export of commonly used types
pub mod prelude {
    pub use super::{
        error::{Error, Result},
        logging::init_logging,
        types::*,
    };
}

/// Common result type for utility functions
pub type Result<T> = std::result::Result<T, Error>;

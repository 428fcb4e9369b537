//! Shared types

mod error;

pub use error::{AccoladeError, Result};

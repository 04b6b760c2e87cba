pub mod config;
pub mod error;
pub mod kettle;

pub use error::{AppError, Result};

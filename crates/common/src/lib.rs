//! Types shared by the booking admin session crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;

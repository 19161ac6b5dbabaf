//! Types shared by the OIDC session crates and the CLI

mod secret;
mod error;

pub use secret::Secret;
pub use error::{Error, Result};

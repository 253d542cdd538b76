//! Common types shared by the OPS client crates

mod env;
mod error;
mod secret;

pub use env::{non_empty_env, secret_from_env_or_file};
pub use error::{Error, Result};
pub use secret::Secret;

//! Common types shared by the OmniStore crates.
//!
//! Object addressing, access permissions and the error taxonomy live here so
//! that every backend speaks the same vocabulary at the contract boundary.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{ObjectKey, Permissions, SecretString};

//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Use these types for
//! every credential that flows through the client: bearer tokens, directory
//! passwords, account passwords, HMAC signing secrets and private keys.
//!
//! `SecretBox<T>` and `SecretString` implement `Debug` with redaction, so any
//! struct deriving `Debug` that holds one logs safely via `{:?}` or tracing.
//! Secrets are zeroized when dropped.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct DirectoryLogin {
//!     username: String,
//!     password: SecretString,
//! }
//!
//! let login = DirectoryLogin {
//!     username: "lsk".to_string(),
//!     password: SecretString::from("hunter2"),
//! };
//!
//! assert!(!format!("{login:?}").contains("hunter2"));
//! assert_eq!(login.password.expose_secret(), "hunter2");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

/// Wrap raw key bytes (e.g. an HMAC shared secret) in a zeroizing box.
#[must_use]
pub fn secret_bytes(bytes: &[u8]) -> SecretBox<[u8]> {
    SecretBox::new(bytes.to_vec().into_boxed_slice())
}

//! # Authn Test Utilities
//!
//! Shared test utilities for the authentication client.
//!
//! This crate provides:
//! - Certificate and key fixtures (rcgen certificates, deterministic HMAC secrets)
//! - Test data builders (TestClaimsBuilder, TestTokenSigner)
//! - Mock authority harness (MockAuthority for end-to-end tests)
//! - Instrumented verifiers (CountingVerifier)
//! - Log capture (CapturedLogs)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use authn_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let authority = MockAuthority::start().await;
//!     authority
//!         .expect_verify("tok", TestClaimsBuilder::new().build_auth_body(), 1)
//!         .await;
//!
//!     let claims = authority.client().verify(&CallContext::new(), "tok").await.unwrap();
//!     assert_eq!(claims.subject(), "test-subject");
//! }
//! ```

pub mod crypto_fixtures;
pub mod log_capture;
pub mod server_harness;
pub mod token_builders;
pub mod verifiers;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use log_capture::*;
pub use server_harness::*;
pub use token_builders::*;
pub use verifiers::*;

//! The verification capability.

use crate::claims::{ClaimSet, ClaimsCodec, VerificationKey};
use crate::context::CallContext;
use crate::errors::AuthnError;
use async_trait::async_trait;

/// Turns a presented token into its verified claim set.
///
/// Implemented by [`crate::transport::AuthorityClient`] (remote) and by
/// [`CodecVerifier`] (local key).
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// # Errors
    ///
    /// Any refusal or failure to reach a verdict.
    async fn verify(&self, ctx: &CallContext, token: &str) -> Result<ClaimSet, AuthnError>;
}

/// Verifies tokens locally with a [`ClaimsCodec`] and a known key.
#[derive(Debug, Clone)]
pub struct CodecVerifier {
    codec: ClaimsCodec,
    key: VerificationKey,
}

impl CodecVerifier {
    #[must_use]
    pub fn new(codec: ClaimsCodec, key: VerificationKey) -> Self {
        Self { codec, key }
    }
}

#[async_trait]
impl TokenVerifier for CodecVerifier {
    async fn verify(&self, ctx: &CallContext, token: &str) -> Result<ClaimSet, AuthnError> {
        if let Some(err) = ctx.check() {
            return Err(err);
        }
        Ok(self.codec.decode(token, &self.key)?)
    }
}

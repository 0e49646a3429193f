//! Claim sets, their signed token form and their normalized tag form.

mod codec;
mod model;
mod normalize;

pub use codec::{
    unsecure_claims_from_token, verify_token_locally, AlgorithmFamily, ClaimsCodec, ClaimsError,
    SigningKey, VerificationKey,
};
pub use model::{ClaimSet, Envelope, Realm, UnknownRealm};
pub use normalize::{NormalizedClaims, AUTH_PREFIX, SUBJECT_KEY};

//! Scrubbing of token values from text that may leave the process.
//!
//! Transport libraries happily echo full request URLs in their error
//! messages, and verification URLs carry the token in the query string. Any
//! error text produced while a token was in flight goes through [`snip`]
//! before it is stored in an error value or logged.

/// Marker substituted for every occurrence of a redacted value.
pub const REDACTION_MARKER: &str = "[snip]";

/// Replace every occurrence of `secret` in `text` with [`REDACTION_MARKER`].
///
/// Empty secrets leave the text untouched.
#[must_use]
pub fn snip(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        return text.to_string();
    }
    text.replace(secret, REDACTION_MARKER)
}

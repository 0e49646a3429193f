//! Claim set data model.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Identity source category, as named on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Realm {
    Certificate,
    Ldap,
    Google,
    Vince,
    AwsSecurityToken,
    GcpIdentityToken,
    AzureIdentityToken,
    Oidc,
    Saml,
}

impl Realm {
    pub const ALL: [Realm; 9] = [
        Realm::Certificate,
        Realm::Ldap,
        Realm::Google,
        Realm::Vince,
        Realm::AwsSecurityToken,
        Realm::GcpIdentityToken,
        Realm::AzureIdentityToken,
        Realm::Oidc,
        Realm::Saml,
    ];

    /// Wire name used in issuance requests.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Realm::Certificate => "Certificate",
            Realm::Ldap => "LDAP",
            Realm::Google => "Google",
            Realm::Vince => "Vince",
            Realm::AwsSecurityToken => "AWSSecurityToken",
            Realm::GcpIdentityToken => "GCPIdentityToken",
            Realm::AzureIdentityToken => "AzureIdentityToken",
            Realm::Oidc => "OIDC",
            Realm::Saml => "SAML",
        }
    }
}

impl fmt::Display for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown realm name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRealm(pub String);

impl fmt::Display for UnknownRealm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown realm '{}'", self.0)
    }
}

impl std::error::Error for UnknownRealm {}

impl FromStr for Realm {
    type Err = UnknownRealm;

    /// Case-insensitive; claim sets in the wild carry both "certificate" and
    /// "Certificate".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Realm::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownRealm(s.to_string()))
    }
}

impl Serialize for Realm {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Realm {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Standard validity envelope.
///
/// Timestamps are seconds since the Unix epoch; zero means unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sub: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub aud: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub iss: String,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub iat: i64,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub exp: i64,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // serde skip_serializing_if signature
fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// The claim set carried by a signed token.
///
/// `realm` stays a free-form string: the authority may issue realms this
/// client does not know about, and verification must not fail on them. Use
/// [`ClaimSet::known_realm`] to branch on the well-known ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSet {
    #[serde(default)]
    pub realm: String,

    #[serde(default)]
    pub data: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opaque: Option<HashMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<u32>,

    #[serde(flatten)]
    pub envelope: Envelope,
}

impl ClaimSet {
    /// A draft claim set for `realm` about `subject`, without validity.
    #[must_use]
    pub fn new(realm: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            envelope: Envelope {
                sub: subject.into(),
                ..Envelope::default()
            },
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.envelope.sub
    }

    #[must_use]
    pub fn known_realm(&self) -> Option<Realm> {
        self.realm.parse().ok()
    }

    #[must_use]
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        timestamp(self.envelope.iat)
    }

    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        timestamp(self.envelope.exp)
    }

    /// `exp - iat`, when both are set and ordered.
    #[must_use]
    pub fn validity(&self) -> Option<Duration> {
        let secs = self.envelope.exp.checked_sub(self.envelope.iat)?;
        if self.envelope.iat == 0 || secs <= 0 {
            return None;
        }
        u64::try_from(secs).ok().map(Duration::from_secs)
    }
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    if secs == 0 {
        return None;
    }
    Utc.timestamp_opt(secs, 0).single()
}

//! Directory (LDAP) credential identity.
//!
//! The directory protocol itself is behind [`DirectoryClient`]; this module
//! owns the lookup policy (exactly one entry, then re-bind as that entry)
//! and the mapping of the entry into claims.

use super::{IdentityError, IdentitySource, MULTI_VALUE_MARKER};
use crate::claims::ClaimSet;
use crate::context::CallContext;
use crate::errors::AuthnError;
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

pub const LDAP_ADDRESS_KEY: &str = "LDAPAddress";
pub const LDAP_BIND_DN_KEY: &str = "LDAPBindDN";
pub const LDAP_BIND_PASSWORD_KEY: &str = "LDAPBindPassword";
pub const LDAP_BIND_SEARCH_FILTER_KEY: &str = "LDAPBindSearchFilter";
pub const LDAP_CONN_SECURITY_PROTOCOL_KEY: &str = "LDAPConnSecurityProtocol";
pub const LDAP_USERNAME_KEY: &str = "LDAPUsername";
pub const LDAP_PASSWORD_KEY: &str = "LDAPPassword";
pub const LDAP_BASE_DN_KEY: &str = "LDAPBaseDN";

/// Search filter used when none is configured. `{USERNAME}` is replaced by
/// the escaped username.
pub const DEFAULT_SEARCH_FILTER: &str = "(uid={USERNAME})";

const USERNAME_PLACEHOLDER: &str = "{USERNAME}";
const DIRECTORY_REALM: &str = "LDAP";

/// Attributes never copied into claims.
const EXCLUDED_ATTRIBUTES: [&str; 2] = ["userPassword", "objectClass"];

// =============================================================================
// DirectoryInfo
// =============================================================================

/// How the directory connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityProtocol {
    /// TLS from the first byte (ldaps).
    #[default]
    Tls,
    /// Plain connection upgraded with StartTLS.
    InbandTls,
}

impl SecurityProtocol {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SecurityProtocol::Tls => "TLS",
            SecurityProtocol::InbandTls => "InbandTLS",
        }
    }

    fn parse(value: &str) -> Result<Self, IdentityError> {
        match value {
            "TLS" => Ok(SecurityProtocol::Tls),
            "InbandTLS" => Ok(SecurityProtocol::InbandTls),
            other => Err(IdentityError::Directory(format!(
                "unsupported connection security protocol '{other}'"
            ))),
        }
    }
}

/// Connection parameters and user credentials for a directory login.
#[derive(Clone)]
pub struct DirectoryInfo {
    pub address: String,
    pub bind_dn: String,
    pub bind_password: SecretString,
    pub bind_search_filter: String,
    pub base_dn: String,
    pub security_protocol: SecurityProtocol,
    pub username: String,
    pub password: SecretString,
}

impl fmt::Debug for DirectoryInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryInfo")
            .field("address", &self.address)
            .field("bind_dn", &self.bind_dn)
            .field("bind_password", &"[REDACTED]")
            .field("bind_search_filter", &self.bind_search_filter)
            .field("base_dn", &self.base_dn)
            .field("security_protocol", &self.security_protocol)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

fn required<'a>(metadata: &'a HashMap<String, String>, key: &str) -> Result<&'a str, IdentityError> {
    metadata
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| IdentityError::MissingMetadataKey(key.to_string()))
}

impl DirectoryInfo {
    /// Read the login from issuance metadata.
    ///
    /// Search filter and security protocol are optional.
    ///
    /// # Errors
    ///
    /// `MissingMetadataKey` naming the first missing key, or `Directory` for
    /// an unknown security protocol.
    pub fn from_metadata(metadata: &HashMap<String, String>) -> Result<Self, IdentityError> {
        let security_protocol = match metadata
            .get(LDAP_CONN_SECURITY_PROTOCOL_KEY)
            .filter(|v| !v.is_empty())
        {
            Some(value) => SecurityProtocol::parse(value)?,
            None => SecurityProtocol::default(),
        };

        Ok(Self {
            address: required(metadata, LDAP_ADDRESS_KEY)?.to_string(),
            bind_dn: required(metadata, LDAP_BIND_DN_KEY)?.to_string(),
            bind_password: SecretString::from(required(metadata, LDAP_BIND_PASSWORD_KEY)?),
            bind_search_filter: metadata
                .get(LDAP_BIND_SEARCH_FILTER_KEY)
                .filter(|v| !v.is_empty())
                .cloned()
                .unwrap_or_else(|| DEFAULT_SEARCH_FILTER.to_string()),
            base_dn: required(metadata, LDAP_BASE_DN_KEY)?.to_string(),
            security_protocol,
            username: required(metadata, LDAP_USERNAME_KEY)?.to_string(),
            password: SecretString::from(required(metadata, LDAP_PASSWORD_KEY)?),
        })
    }

    /// Metadata form for an issuance request. Contains the passwords.
    #[must_use]
    pub fn to_metadata(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LDAP_ADDRESS_KEY.to_string(), self.address.clone()),
            (LDAP_BIND_DN_KEY.to_string(), self.bind_dn.clone()),
            (
                LDAP_BIND_PASSWORD_KEY.to_string(),
                self.bind_password.expose_secret().to_string(),
            ),
            (
                LDAP_BIND_SEARCH_FILTER_KEY.to_string(),
                self.bind_search_filter.clone(),
            ),
            (LDAP_BASE_DN_KEY.to_string(), self.base_dn.clone()),
            (
                LDAP_CONN_SECURITY_PROTOCOL_KEY.to_string(),
                self.security_protocol.as_str().to_string(),
            ),
            (LDAP_USERNAME_KEY.to_string(), self.username.clone()),
            (
                LDAP_PASSWORD_KEY.to_string(),
                self.password.expose_secret().to_string(),
            ),
        ])
    }

    /// The search filter with the escaped username substituted.
    #[must_use]
    pub fn search_filter(&self) -> String {
        self.bind_search_filter
            .replace(USERNAME_PLACEHOLDER, &escape_filter_value(&self.username))
    }
}

/// Escape a value for inclusion in a search filter (RFC 4515).
#[must_use]
pub fn escape_filter_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '*' => escaped.push_str("\\2a"),
            '(' => escaped.push_str("\\28"),
            ')' => escaped.push_str("\\29"),
            '\\' => escaped.push_str("\\5c"),
            '\0' => escaped.push_str("\\00"),
            other => escaped.push(other),
        }
    }
    escaped
}

// =============================================================================
// Directory collaborator
// =============================================================================

/// One directory entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub dn: String,
    /// Attribute name and values, in directory order.
    pub attributes: Vec<(String, Vec<String>)>,
}

impl DirectoryEntry {
    /// First value of `name`, if any.
    #[must_use]
    pub fn attribute_value(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, values)| values.first())
            .map(String::as_str)
    }
}

/// Directory protocol capability.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Bind with the service account of `info` and return every entry under
    /// `info.base_dn` matching `filter`.
    async fn search(
        &self,
        info: &DirectoryInfo,
        filter: &str,
    ) -> Result<Vec<DirectoryEntry>, IdentityError>;

    /// Try to bind as `dn` with `password`. `Ok(false)` means the directory
    /// refused the credentials.
    async fn bind(
        &self,
        info: &DirectoryInfo,
        dn: &str,
        password: &SecretString,
    ) -> Result<bool, IdentityError>;

    /// Find the single entry of `info.username` and check its password.
    ///
    /// # Errors
    ///
    /// `EntryNotFound`, `AmbiguousEntry` or `InvalidCredentials`, plus any
    /// error of the underlying calls.
    async fn find_entry(&self, info: &DirectoryInfo) -> Result<DirectoryEntry, IdentityError> {
        let mut entries = self.search(info, &info.search_filter()).await?;

        let entry = match entries.len() {
            0 => return Err(IdentityError::EntryNotFound),
            1 => entries.pop().ok_or(IdentityError::EntryNotFound)?,
            n => return Err(IdentityError::AmbiguousEntry(n)),
        };

        if !self.bind(info, &entry.dn, &info.password).await? {
            return Err(IdentityError::InvalidCredentials);
        }

        Ok(entry)
    }
}

/// Parse a distinguished name into `(type, value)` pairs, one per RDN.
///
/// For multi-valued RDNs (`cn=a+uid=b`) only the first attribute is kept.
/// Escaped characters (`\,`, `\+`, `\=`, `\\`) and hex escapes (`\2C`) are
/// unescaped.
///
/// # Errors
///
/// `Directory` if a component has no `=`.
pub fn parse_dn(dn: &str) -> Result<Vec<(String, String)>, IdentityError> {
    let mut rdns = Vec::new();
    if dn.trim().is_empty() {
        return Ok(rdns);
    }

    for component in split_unescaped(dn, ',') {
        let first = split_unescaped(&component, '+')
            .into_iter()
            .next()
            .unwrap_or_default();

        let (attr_type, value) = first
            .split_once('=')
            .ok_or_else(|| IdentityError::Directory(format!("invalid DN component '{first}'")))?;

        rdns.push((attr_type.trim().to_string(), unescape(value.trim())));
    }

    Ok(rdns)
}

/// Split on `sep` not preceded by a backslash; escapes are kept.
fn split_unescaped(value: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;

    for c in value.chars() {
        if escaped {
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            current.push(c);
            escaped = true;
        } else if c == sep {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    parts.push(current);
    parts
}

/// `\X` yields `X`; `\HH` yields the byte `0xHH`, so multi-byte UTF-8
/// characters may be spelled as consecutive hex escapes.
fn unescape(value: &str) -> String {
    let mut out = Vec::with_capacity(value.len());
    let mut buf = [0_u8; 4];
    let mut chars = value.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        let Some(first) = chars.next() else {
            break;
        };
        let hex = first
            .to_digit(16)
            .zip(chars.peek().and_then(|next| next.to_digit(16)))
            .and_then(|(hi, lo)| u8::try_from(hi * 16 + lo).ok());
        match hex {
            Some(byte) => {
                chars.next();
                out.push(byte);
            }
            None => out.extend_from_slice(first.encode_utf8(&mut buf).as_bytes()),
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Map a verified directory entry to claims.
///
/// # Errors
///
/// `MissingSubject` without a `uid`, `Directory` for an unparseable DN.
pub fn claims_from_entry(entry: &DirectoryEntry) -> Result<ClaimSet, IdentityError> {
    let subject = entry
        .attribute_value("uid")
        .filter(|uid| !uid.is_empty())
        .ok_or(IdentityError::MissingSubject)?;

    let mut claims = ClaimSet::new(DIRECTORY_REALM, subject);

    for (attr_type, value) in parse_dn(&entry.dn)? {
        if attr_type.eq_ignore_ascii_case("ou") || attr_type.eq_ignore_ascii_case("dc") {
            claims = claims.with_data(
                format!("{}:{value}", attr_type.to_lowercase()),
                MULTI_VALUE_MARKER,
            );
        }
    }

    claims = claims.with_data("dn", entry.dn.clone());

    for (name, values) in &entry.attributes {
        if EXCLUDED_ATTRIBUTES.contains(&name.as_str()) {
            continue;
        }
        match values.as_slice() {
            [] => {}
            [first, ..] if first.is_empty() => {}
            [single] => claims = claims.with_data(name.clone(), single.clone()),
            many => {
                for value in many {
                    claims = claims.with_data(format!("{name}:{value}"), MULTI_VALUE_MARKER);
                }
            }
        }
    }

    Ok(claims)
}

// =============================================================================
// Identity source
// =============================================================================

/// Directory-backed identity source.
pub struct DirectoryIdentity<C> {
    directory: C,
}

impl<C: DirectoryClient> DirectoryIdentity<C> {
    pub fn new(directory: C) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl<C: DirectoryClient> IdentitySource for DirectoryIdentity<C> {
    type Credential = DirectoryInfo;

    #[tracing::instrument(skip_all, fields(username = %credential.username))]
    async fn produce_claim(
        &self,
        ctx: &CallContext,
        credential: &DirectoryInfo,
    ) -> Result<ClaimSet, AuthnError> {
        let entry = ctx.run(self.directory.find_entry(credential)).await?;

        let entry = entry.map_err(|e| {
            let e = e
                .redact(credential.password.expose_secret())
                .redact(credential.bind_password.expose_secret());
            tracing::debug!(target: "authn.identity.directory", error = %e, "Directory login failed");
            e
        })?;

        Ok(claims_from_entry(&entry)?)
    }
}

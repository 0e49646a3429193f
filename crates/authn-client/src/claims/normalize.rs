//! Flattening of a claim set into `@auth:` tag strings.

use super::model::ClaimSet;
use std::collections::BTreeSet;
use std::fmt;

/// Prefix of every normalized claim.
pub const AUTH_PREFIX: &str = "@auth:";

/// Key used for the subject entry.
pub const SUBJECT_KEY: &str = "subject";

/// Sorted, deduplicated `@auth:<key>=<value>` strings.
///
/// Keys are lowercased; entries with an empty value (or an empty subject)
/// are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NormalizedClaims {
    tags: BTreeSet<String>,
}

impl NormalizedClaims {
    /// Normalize the subject and data of `claims`.
    #[must_use]
    pub fn from_claims(claims: &ClaimSet) -> Self {
        Self::from_parts(
            claims.subject(),
            claims.data.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        )
    }

    /// Normalize an explicit subject and attribute list.
    pub fn from_parts<'a, I>(subject: &str, data: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut tags = BTreeSet::new();

        if !subject.is_empty() {
            tags.insert(format!("{AUTH_PREFIX}{SUBJECT_KEY}={subject}"));
        }

        for (key, value) in data {
            if !value.is_empty() {
                tags.insert(format!("{AUTH_PREFIX}{}={value}", key.to_lowercase()));
            }
        }

        Self { tags }
    }

    /// Wrap already-normalized tags (e.g. from a policy hook).
    pub fn from_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Every value carried for `key` (case-insensitive).
    pub fn values<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a str> + 'a {
        let prefix = format!("{AUTH_PREFIX}{}=", key.to_lowercase());
        self.tags
            .iter()
            .filter_map(move |tag| tag.strip_prefix(prefix.as_str()))
    }

    /// The subject value, if present.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.values(SUBJECT_KEY).next()
    }

    /// Tags in lexicographic order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        self.tags.into_iter().collect()
    }
}

impl From<&ClaimSet> for NormalizedClaims {
    fn from(claims: &ClaimSet) -> Self {
        Self::from_claims(claims)
    }
}

impl fmt::Display for NormalizedClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, tag) in self.tags.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(tag)?;
        }
        f.write_str("]")
    }
}

//! The `sha256:<hex>` digest type used to address blobs and manifests.

use std::fmt;

use sha2::{Digest as _, Sha256};

use crate::error::{OciErrorCode, RegistryError};

const PREFIX: &str = "sha256:";
const HEX_LEN: usize = 64;

/// A validated `sha256:<64 lowercase hex>` content digest.
///
/// Digests are compared byte-for-byte (spec.md §3); this type's `PartialEq`
/// is plain string equality over the canonical lowercase form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(String);

impl Digest {
    /// Parses and validates a digest string, rejecting anything that isn't
    /// `sha256:` followed by exactly 64 lowercase hex characters.
    ///
    /// SHA-256 is the only digest algorithm this registry accepts at the
    /// wire level (spec.md §3).
    pub fn parse(s: &str) -> Result<Self, RegistryError> {
        let hex_part = s.strip_prefix(PREFIX).ok_or_else(|| {
            RegistryError::new(
                OciErrorCode::DigestInvalid,
                "unsupported digest algorithm",
            )
        })?;

        if hex_part.len() != HEX_LEN
            || !hex_part.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
        {
            return Err(RegistryError::new(
                OciErrorCode::DigestInvalid,
                "malformed digest",
            ));
        }

        Ok(Self(s.to_string()))
    }

    /// True if `s` looks like `sha256:...` at all (used to distinguish a
    /// digest reference from a tag name without requiring it be valid yet).
    pub fn looks_like_digest(s: &str) -> bool {
        s.starts_with(PREFIX)
    }

    /// Computes the digest of `bytes`.
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let hash = hasher.finalize();
        Self(format!("{PREFIX}{}", hex::encode(hash)))
    }

    /// Builds a digest from a string already known to be well-formed
    /// (e.g. freshly computed by a hasher), skipping re-validation.
    pub(crate) fn from_raw(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_digest() {
        let d = Digest::of(b"hello");
        let parsed = Digest::parse(d.as_str()).unwrap();
        assert_eq!(parsed, d);
    }

    #[test]
    fn rejects_wrong_algorithm() {
        assert!(Digest::parse("sha512:aaaa").is_err());
    }

    #[test]
    fn rejects_short_hex() {
        assert!(Digest::parse("sha256:abcd").is_err());
    }

    #[test]
    fn rejects_uppercase_hex() {
        let bad = format!("sha256:{}", "A".repeat(64));
        assert!(Digest::parse(&bad).is_err());
    }

    #[test]
    fn known_vector() {
        // sha256("") = e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855
        let d = Digest::of(b"");
        assert_eq!(
            d.as_str(),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b85"
        );
    }
}

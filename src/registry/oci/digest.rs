use crate::registry::Error;
use regex::Regex;
use serde::de::Visitor;
use serde::{de, Deserialize, Deserializer, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::LazyLock;

static DIGEST_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<algorithm>[a-z0-9]+(?:[.+_-][a-z0-9]+)*):(?P<hash>[a-zA-Z0-9=_-]+)$")
        .expect("digest pattern is valid")
});

static SHA256_HASH_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-f0-9]{64}$").expect("sha256 pattern is valid"));

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Digest {
    Sha256(String),
}

impl Digest {
    /// Computes the sha256 digest of `data`.
    pub fn from_content(data: &[u8]) -> Self {
        Digest::Sha256(hex::encode(Sha256::digest(data)))
    }

    pub fn algorithm(&self) -> &str {
        match self {
            Digest::Sha256(_) => "sha256",
        }
    }

    pub fn hash(&self) -> &str {
        match self {
            Digest::Sha256(s) => s,
        }
    }

    pub fn hash_prefix(&self) -> &str {
        match self {
            Digest::Sha256(s) => &s[0..2],
        }
    }
}

/// Computes a sha256 digest over content fed in chunks.
#[derive(Default)]
pub struct DigestHasher(Sha256);

impl DigestHasher {
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> Digest {
        Digest::Sha256(hex::encode(self.0.finalize()))
    }
}

impl FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let captures = DIGEST_REGEX.captures(s).ok_or(Error::DigestInvalid)?;
        let (Some(algorithm), Some(hash)) = (captures.name("algorithm"), captures.name("hash"))
        else {
            return Err(Error::DigestInvalid);
        };

        match algorithm.as_str() {
            "sha256" if SHA256_HASH_REGEX.is_match(hash.as_str()) => {
                Ok(Digest::Sha256(hash.as_str().to_string()))
            }
            "sha256" => Err(Error::DigestInvalid),
            _ => Err(Error::Unsupported),
        }
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm(), self.hash())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> Result<Digest, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DigestVisitor;

        impl Visitor<'_> for DigestVisitor {
            type Value = Digest;

            fn expecting(&self, formatter: &mut Formatter) -> fmt::Result {
                formatter.write_str("a valid digest string")
            }

            fn visit_str<E>(self, value: &str) -> Result<Digest, E>
            where
                E: de::Error,
            {
                Digest::from_str(value).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_str(DigestVisitor)
    }
}

impl Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_from_str() {
        let digest = Digest::from_str(
            "sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef",
        )
        .unwrap();
        assert_eq!(digest.algorithm(), "sha256");
        assert_eq!(
            digest.hash(),
            "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef"
        );
        assert_eq!(digest.hash_prefix(), "01");
    }

    #[test]
    fn test_hasher_matches_from_content() {
        let mut hasher = DigestHasher::default();
        hasher.update(b"layer ");
        hasher.update(b"content");

        assert_eq!(hasher.finalize(), Digest::from_content(b"layer content"));
    }

    #[test]
    fn test_digest_from_str_invalid() {
        assert_eq!(Digest::from_str("sha256:abc"), Err(Error::DigestInvalid));
        assert_eq!(Digest::from_str("not-a-digest"), Err(Error::DigestInvalid));
        assert_eq!(
            Digest::from_str(
                "sha256:0123456789ABCDEF0123456789abcdef0123456789abcdef0123456789abcdef"
            ),
            Err(Error::DigestInvalid)
        );
        assert_eq!(
            Digest::from_str("sha512:0123456789abcdef"),
            Err(Error::Unsupported)
        );
    }

    #[test]
    fn test_digest_from_content() {
        let digest = Digest::from_content(b"hello world");
        assert_eq!(
            digest.to_string(),
            "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_ne!(digest, Digest::from_content(b"hello world!"));
    }

    #[test]
    fn test_digest_serde() {
        let json = r#""sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9""#;
        let digest: Digest = serde_json::from_str(json).unwrap();
        assert_eq!(digest, Digest::from_content(b"hello world"));
        assert_eq!(serde_json::to_string(&digest).unwrap(), json);

        assert!(serde_json::from_str::<Digest>(r#""sha256:nope""#).is_err());
    }
}

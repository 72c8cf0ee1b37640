use crate::registry::oci::Digest;
use crate::registry::Error;
use regex::Regex;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::LazyLock;

static TAG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\w[\w.-]{0,127}$").expect("tag pattern is valid"));

#[derive(Clone, Debug, PartialEq)]
pub enum Reference {
    Tag(String),
    Digest(Digest),
}

impl FromStr for Reference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains(':') {
            Ok(Reference::Digest(Digest::from_str(s)?))
        } else if TAG_REGEX.is_match(s) {
            Ok(Reference::Tag(s.to_string()))
        } else {
            Err(Error::TagInvalid)
        }
    }
}

impl Display for Reference {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Tag(s) => write!(f, "{s}"),
            Reference::Digest(d) => write!(f, "{d}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_from_str() {
        let reference = Reference::from_str("latest").unwrap();
        assert_eq!(reference, Reference::Tag("latest".to_string()));

        let digest_str = "sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";
        let reference = Reference::from_str(digest_str).unwrap();
        assert_eq!(
            reference,
            Reference::Digest(Digest::from_str(digest_str).unwrap())
        );
        assert_eq!(reference.to_string(), digest_str);
    }

    #[test]
    fn test_reference_from_str_invalid() {
        assert_eq!(Reference::from_str(""), Err(Error::TagInvalid));
        assert_eq!(Reference::from_str(".hidden"), Err(Error::TagInvalid));
        assert_eq!(Reference::from_str(&"a".repeat(129)), Err(Error::TagInvalid));
        assert_eq!(Reference::from_str("sha256:xyz"), Err(Error::DigestInvalid));
    }
}

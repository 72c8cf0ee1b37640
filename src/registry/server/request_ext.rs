use crate::registry::Error;
use hyper::header::{AsHeaderName, ACCEPT, AUTHORIZATION, RANGE};
use hyper::http::request::Parts;
use regex::Regex;
use std::net::SocketAddr;
use std::sync::LazyLock;
use tracing::debug;

// Single range only; suffix ranges (`bytes=-500`) are not supported.
static BYTE_RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^bytes=(?P<first>\d+)-(?P<last>\d*)$").expect("byte range pattern is valid")
});

/// First and optional last byte offset, both inclusive.
pub type ByteRange = (u64, Option<u64>);

/// Peer address of the connection a request arrived on, set as a request extension.
#[derive(Clone, Copy, Debug)]
pub struct RemoteAddress(pub SocketAddr);

/// Request header accessors used by the pull routes.
pub trait HeaderExt {
    fn header_str<K: AsHeaderName>(&self, header: K) -> Option<&str>;
    fn byte_range(&self) -> Result<Option<ByteRange>, Error>;
    fn accept_values(&self) -> Vec<String>;
    fn bearer_token(&self) -> Option<String>;
    fn client_ip(&self, trust_forwarded_headers: bool) -> Option<String>;
}

impl HeaderExt for Parts {
    fn header_str<K: AsHeaderName>(&self, header: K) -> Option<&str> {
        self.headers.get(header).and_then(|value| value.to_str().ok())
    }

    fn byte_range(&self) -> Result<Option<ByteRange>, Error> {
        let Some(value) = self.header_str(RANGE) else {
            return Ok(None);
        };

        let invalid = || {
            debug!("Unsupported Range header: {value}");
            Error::RangeNotSatisfiable
        };

        let captures = BYTE_RANGE_RE.captures(value.trim()).ok_or_else(invalid)?;
        let first = captures["first"].parse::<u64>().map_err(|_| invalid())?;
        let last = match &captures["last"] {
            "" => None,
            last => Some(last.parse::<u64>().map_err(|_| invalid())?),
        };

        match last {
            Some(last) if last < first => Err(invalid()),
            last => Ok(Some((first, last))),
        }
    }

    /// Every `Accept` value, whether sent as repeated headers or comma-separated.
    fn accept_values(&self) -> Vec<String> {
        self.headers
            .get_all(ACCEPT)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(String::from)
            .collect()
    }

    fn bearer_token(&self) -> Option<String> {
        let (scheme, token) = self.header_str(AUTHORIZATION)?.split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let token = token.trim();
        (!token.is_empty()).then(|| token.to_string())
    }

    /// Client address: the connection peer, or what a trusted fronting proxy reports.
    fn client_ip(&self, trust_forwarded_headers: bool) -> Option<String> {
        if trust_forwarded_headers {
            if let Some(forwarded_for) = self.header_str("X-Forwarded-For") {
                return forwarded_for
                    .split(',')
                    .next()
                    .map(|ip| ip.trim().to_string());
            }

            if let Some(real_ip) = self.header_str("X-Real-IP") {
                return Some(real_ip.to_string());
            }
        }

        self.extensions
            .get::<RemoteAddress>()
            .map(|RemoteAddress(address)| address.ip().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Request;

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder();
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_accept_values() {
        let parts = parts(&[
            ("Accept", "application/vnd.docker.distribution.manifest.v2+json"),
            (
                "Accept",
                "application/vnd.docker.distribution.manifest.list.v2+json, application/vnd.docker.distribution.manifest.v1+prettyjws",
            ),
        ]);

        assert_eq!(
            parts.accept_values(),
            vec![
                "application/vnd.docker.distribution.manifest.v2+json",
                "application/vnd.docker.distribution.manifest.list.v2+json",
                "application/vnd.docker.distribution.manifest.v1+prettyjws",
            ]
        );
        assert!(self::parts(&[]).accept_values().is_empty());
    }

    #[test]
    fn test_byte_range() {
        assert_eq!(parts(&[]).byte_range(), Ok(None));
        assert_eq!(
            parts(&[("Range", "bytes=0-499")]).byte_range(),
            Ok(Some((0, Some(499))))
        );
        assert_eq!(
            parts(&[("Range", "bytes=500-")]).byte_range(),
            Ok(Some((500, None)))
        );

        for invalid in ["bytes=500-499", "bytes=-499", "bytes=0-1,5-9", "0-499", "items=0-1"] {
            assert_eq!(
                parts(&[("Range", invalid)]).byte_range(),
                Err(Error::RangeNotSatisfiable),
                "{invalid}"
            );
        }
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(
            parts(&[("Authorization", "Bearer abc.def.ghi")]).bearer_token(),
            Some("abc.def.ghi".to_string())
        );
        assert_eq!(
            parts(&[("Authorization", "bearer abc.def.ghi")]).bearer_token(),
            Some("abc.def.ghi".to_string())
        );
        assert_eq!(parts(&[("Authorization", "Basic dXNlcjpwYXNz")]).bearer_token(), None);
        assert_eq!(parts(&[("Authorization", "Bearer ")]).bearer_token(), None);
        assert_eq!(parts(&[]).bearer_token(), None);
    }

    #[test]
    fn test_client_ip_from_trusted_proxy() {
        assert_eq!(
            parts(&[
                ("X-Forwarded-For", "10.0.0.1, 192.168.1.1"),
                ("X-Real-IP", "172.16.0.1")
            ])
            .client_ip(true),
            Some("10.0.0.1".to_string())
        );
        assert_eq!(
            parts(&[("X-Real-IP", "172.16.0.1")]).client_ip(true),
            Some("172.16.0.1".to_string())
        );
        assert_eq!(parts(&[]).client_ip(true), None);
    }

    #[test]
    fn test_client_ip_ignores_forwarded_headers_by_default() {
        let mut parts = parts(&[("X-Forwarded-For", "10.0.0.1"), ("X-Real-IP", "172.16.0.1")]);
        assert_eq!(parts.client_ip(false), None);

        parts
            .extensions
            .insert(RemoteAddress("192.168.1.7:52100".parse().unwrap()));
        assert_eq!(parts.client_ip(false), Some("192.168.1.7".to_string()));
        assert_eq!(parts.client_ip(true), Some("10.0.0.1".to_string()));
    }
}

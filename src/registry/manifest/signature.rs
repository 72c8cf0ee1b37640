//! JWS signing of schema 1 manifests.
//!
//! Each call signs with a freshly generated P-256 key, so two signatures of the same payload
//! differ. The payload itself is recoverable from the signed document through the
//! `formatLength` and `formatTail` members of the protected header.

use crate::registry::manifest::convert::to_pretty_json;
use crate::registry::Error;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{SecondsFormat, Utc};
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::EncodePublicKey;
use rand::rngs::OsRng;
use serde::Serialize;
use tracing::debug;

const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProtectedHeader<'a> {
    format_length: usize,
    format_tail: String,
    time: &'a str,
}

#[derive(Serialize)]
struct Jwk {
    crv: &'static str,
    kid: String,
    kty: &'static str,
    x: String,
    y: String,
}

#[derive(Serialize)]
struct JwsHeader {
    jwk: Jwk,
    alg: &'static str,
}

#[derive(Serialize)]
struct JwsSignature {
    header: JwsHeader,
    signature: String,
    protected: String,
}

/// Wraps a pretty-printed schema 1 `payload` into a signed `prettyjws` document.
pub fn sign(payload: &[u8]) -> Result<Vec<u8>, Error> {
    let format_length = payload
        .iter()
        .rposition(|b| *b == b'}')
        .and_then(|closing| {
            payload[..closing]
                .iter()
                .rposition(|b| !b.is_ascii_whitespace())
                .map(|last| last + 1)
        })
        .ok_or_else(|| Error::ManifestInvalid("payload is not a JSON object".to_string()))?;
    let format_tail = &payload[format_length..];

    let time = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
    let protected = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&ProtectedHeader {
        format_length,
        format_tail: URL_SAFE_NO_PAD.encode(format_tail),
        time: &time,
    })?);

    let signing_key = SigningKey::random(&mut OsRng);
    let signing_input = format!("{protected}.{}", URL_SAFE_NO_PAD.encode(payload));
    let signature: Signature = signing_key.sign(signing_input.as_bytes());

    let signatures = vec![JwsSignature {
        header: JwsHeader {
            jwk: public_jwk(signing_key.verifying_key())?,
            alg: "ES256",
        },
        signature: URL_SAFE_NO_PAD.encode(signature.to_bytes()),
        protected,
    }];

    let signatures = to_pretty_json(&signatures)?;
    let signatures = String::from_utf8(signatures)?.replace('\n', "\n   ");

    let mut document = Vec::with_capacity(payload.len() + signatures.len() + 32);
    document.extend_from_slice(&payload[..format_length]);
    document.extend_from_slice(b",\n   \"signatures\": ");
    document.extend_from_slice(signatures.as_bytes());
    document.extend_from_slice(format_tail);

    debug!("Signed schema 1 manifest ({} bytes)", document.len());
    Ok(document)
}

fn public_jwk(key: &VerifyingKey) -> Result<Jwk, Error> {
    let point = key.to_encoded_point(false);
    let (Some(x), Some(y)) = (point.x(), point.y()) else {
        return Err(Error::Internal(
            "Signing key has no affine coordinates".to_string(),
        ));
    };

    Ok(Jwk {
        crv: "P-256",
        kid: key_id(key)?,
        kty: "EC",
        x: URL_SAFE_NO_PAD.encode(x),
        y: URL_SAFE_NO_PAD.encode(y),
    })
}

/// Docker key id: the first 240 bits of the SPKI digest, base32 encoded in colon separated
/// groups of four.
fn key_id(key: &VerifyingKey) -> Result<String, Error> {
    let der = key
        .to_public_key_der()
        .map_err(|e| Error::Internal(format!("Unable to encode public key: {e}")))?;
    let digest = crate::registry::oci::Digest::from_content(der.as_bytes());
    let hash = hex::decode(digest.hash())
        .map_err(|e| Error::Internal(format!("Unable to decode key digest: {e}")))?;

    let encoded = base32(&hash[..30]);
    let groups = encoded
        .as_bytes()
        .chunks(4)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>();
    Ok(groups.join(":"))
}

/// Unpadded RFC 4648 base32.
fn base32(data: &[u8]) -> String {
    let mut output = String::with_capacity(data.len().div_ceil(5) * 8);
    let mut buffer: u16 = 0;
    let mut bits = 0;

    for byte in data {
        buffer = (buffer << 8) | u16::from(*byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            output.push(BASE32_ALPHABET[usize::from((buffer >> bits) & 0x1f)] as char);
        }
    }
    if bits > 0 {
        output.push(BASE32_ALPHABET[usize::from((buffer << (5 - bits)) & 0x1f)] as char);
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::signature::Verifier;
    use p256::EncodedPoint;
    use serde_json::Value;

    const PAYLOAD: &[u8] = b"{\n   \"schemaVersion\": 1,\n   \"name\": \"library/app\",\n   \"tag\": \"latest\",\n   \"fsLayers\": [],\n   \"history\": []\n}";

    fn decode(value: &Value) -> Vec<u8> {
        URL_SAFE_NO_PAD.decode(value.as_str().unwrap()).unwrap()
    }

    /// Rebuilds the payload from a signed document and checks its signature.
    fn verify(document: &[u8]) -> Vec<u8> {
        let parsed: Value = serde_json::from_slice(document).unwrap();
        let signature = &parsed["signatures"][0];

        let protected: Value = serde_json::from_slice(&decode(&signature["protected"])).unwrap();
        let format_length = usize::try_from(protected["formatLength"].as_u64().unwrap()).unwrap();
        let format_tail = decode(&protected["formatTail"]);

        let mut payload = document[..format_length].to_vec();
        payload.extend_from_slice(&format_tail);

        let jwk = &signature["header"]["jwk"];
        assert_eq!(jwk["crv"], "P-256");
        assert_eq!(signature["header"]["alg"], "ES256");
        let point = EncodedPoint::from_affine_coordinates(
            decode(&jwk["x"]).as_slice().into(),
            decode(&jwk["y"]).as_slice().into(),
            false,
        );
        let key = VerifyingKey::from_encoded_point(&point).unwrap();

        let signing_input = format!(
            "{}.{}",
            signature["protected"].as_str().unwrap(),
            URL_SAFE_NO_PAD.encode(&payload)
        );
        let raw_signature = Signature::from_slice(&decode(&signature["signature"])).unwrap();
        key.verify(signing_input.as_bytes(), &raw_signature).unwrap();

        payload
    }

    #[test]
    fn test_signed_document_verifies_and_preserves_payload() {
        let document = sign(PAYLOAD).unwrap();

        assert_eq!(verify(&document), PAYLOAD);
        assert!(document.starts_with(&PAYLOAD[..PAYLOAD.len() - 2]));
        assert!(document.ends_with(b"\n}"));
    }

    #[test]
    fn test_signatures_are_fresh_per_call() {
        let first = sign(PAYLOAD).unwrap();
        let second = sign(PAYLOAD).unwrap();

        assert_ne!(first, second);
        assert_eq!(verify(&first), verify(&second));
    }

    #[test]
    fn test_key_id_format() {
        let key = SigningKey::random(&mut OsRng);
        let kid = key_id(key.verifying_key()).unwrap();

        let groups: Vec<&str> = kid.split(':').collect();
        assert_eq!(groups.len(), 12);
        assert!(groups.iter().all(|g| g.len() == 4));
    }

    #[test]
    fn test_base32() {
        assert_eq!(base32(b""), "");
        assert_eq!(base32(b"f"), "MY");
        assert_eq!(base32(b"foobar"), "MZXW6YTBOI");
    }

    #[test]
    fn test_rejects_non_object_payload() {
        assert!(sign(b"no braces").is_err());
    }
}

//! Signed request envelopes per [RFC 8555 §6.2].
//!
//! ACME frames every authenticated request as a JWS in the flattened JSON
//! serialization: three base64url segments under `protected`, `payload` and
//! `signature`. This module builds those envelopes and, for diagnostics,
//! verifies self-contained (`jwk`-signed) ones.
//!
//! [RFC 8555 §6.2]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.2

use ecdsa::signature::{Signer as _, Verifier as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{Error, Result},
    key::AccountKey,
    util::{base64url, base64url_decode},
};

/// JWS protected header.
///
/// > For newAccount requests, and for revokeCert requests authenticated by a
/// > certificate key, there MUST be a "jwk" field. For all other requests,
/// > the request is signed using an existing account, and there MUST be a
/// > "kid" field.
///
/// `jwk` and `kid` are mutually exclusive; the two constructors are the only
/// way to build a header, so exactly one is ever present.
#[derive(Debug, Serialize, Deserialize, Default)]
pub(crate) struct ProtectedHeader {
    alg: String,
    nonce: String,
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<Jwk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
}

impl ProtectedHeader {
    pub(crate) fn new_jwk(jwk: Jwk, url: &str, nonce: String) -> Self {
        ProtectedHeader {
            alg: "ES384".to_owned(),
            url: url.to_owned(),
            nonce,
            jwk: Some(jwk),
            ..Default::default()
        }
    }

    pub(crate) fn new_kid(kid: &str, url: &str, nonce: String) -> Self {
        ProtectedHeader {
            alg: "ES384".to_owned(),
            url: url.to_owned(),
            nonce,
            kid: Some(kid.to_owned()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub(crate) struct Jwk {
    alg: String,
    crv: String,
    kty: String,
    #[serde(rename = "use")]
    _use: String,
    x: String,
    y: String,
}

impl TryFrom<&AccountKey> for Jwk {
    type Error = Error;

    fn try_from(key: &AccountKey) -> Result<Self> {
        let point = key.signing_key().verifying_key().to_encoded_point(false);

        let x = point
            .x()
            .ok_or_else(|| Error::Jws("public key has no affine coordinates".to_owned()))?;
        let y = point
            .y()
            .ok_or_else(|| Error::Jws("public key has no affine coordinates".to_owned()))?;

        Ok(Jwk {
            alg: "ES384".to_owned(),
            kty: "EC".to_owned(),
            crv: "P-384".to_owned(),
            _use: "sig".to_owned(),
            x: base64url(x),
            y: base64url(y),
        })
    }
}

impl Jwk {
    fn verifying_key(&self) -> Result<p384::ecdsa::VerifyingKey> {
        let x = base64url_decode(&self.x)?;
        let y = base64url_decode(&self.y)?;

        // Uncompressed SEC1 point: 0x04 || x || y.
        let mut sec1 = Vec::with_capacity(1 + x.len() + y.len());
        sec1.push(0x04);
        sec1.extend_from_slice(&x);
        sec1.extend_from_slice(&y);

        Ok(p384::ecdsa::VerifyingKey::from_sec1_bytes(&sec1)?)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
// LEXICAL ORDER OF FIELDS MATTER!
pub(crate) struct JwkThumb {
    crv: String,
    kty: String,
    x: String,
    y: String,
}

impl From<&Jwk> for JwkThumb {
    fn from(jwk: &Jwk) -> Self {
        JwkThumb {
            crv: jwk.crv.clone(),
            kty: jwk.kty.clone(),
            x: jwk.x.clone(),
            y: jwk.y.clone(),
        }
    }
}

/// Flattened JSON JWS, see [RFC 7515 §7.2.2].
///
/// [RFC 7515 §7.2.2]: https://datatracker.ietf.org/doc/html/rfc7515#section-7.2.2
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SignedRequest {
    protected: String,
    payload: String,
    signature: String,
}

/// Request payload, tagged rather than inferred.
///
/// `None` serializes the payload segment to the empty string (POST-as-GET).
/// `Json` is canonically encoded; an empty JSON object yields the literal
/// `{}`, which ACME requires to be distinct from "no payload".
#[derive(Debug, Clone, Copy)]
pub(crate) enum Payload<'a> {
    None,
    Json(&'a Value),
}

/// Build a signed envelope for one request.
///
/// A nonce is single-use, so every envelope is built fresh; retrying a
/// request means re-signing with a new nonce.
pub(crate) fn sign(
    key: &AccountKey,
    url: &str,
    nonce: String,
    payload: Payload<'_>,
    kid: Option<&str>,
) -> Result<String> {
    let protected = match kid {
        Some(kid) => ProtectedHeader::new_kid(kid, url, nonce),
        None => ProtectedHeader::new_jwk(Jwk::try_from(key)?, url, nonce),
    };

    let protected = base64url(&serde_json::to_vec(&protected)?);

    let payload = match payload {
        Payload::None => String::new(),
        Payload::Json(value) => base64url(&serde_json::to_vec(value)?),
    };

    let to_sign = format!("{protected}.{payload}");
    let signature: p384::ecdsa::Signature = key.signing_key().try_sign(to_sign.as_bytes())?;

    let envelope = SignedRequest {
        protected,
        payload,
        signature: base64url(&signature.to_bytes()),
    };

    Ok(serde_json::to_string(&envelope)?)
}

/// Verify a signed envelope against the `jwk` embedded in its protected
/// header. Kid-signed envelopes carry no public key and fail closed.
///
/// Only used by tests and diagnostics; servers do the real verification.
pub fn verify(envelope: &str) -> Result<bool> {
    let envelope: SignedRequest = serde_json::from_str(envelope)?;

    let protected: Value = serde_json::from_slice(&base64url_decode(&envelope.protected)?)?;
    let Some(jwk) = protected.get("jwk") else {
        return Err(Error::Jws("no jwk in protected header".to_owned()));
    };
    let jwk: Jwk = serde_json::from_value(jwk.clone())?;

    let verifying_key = jwk.verifying_key()?;
    let signature = p384::ecdsa::Signature::from_slice(&base64url_decode(&envelope.signature)?)?;

    let to_verify = format!("{}.{}", envelope.protected, envelope.payload);
    Ok(verifying_key.verify(to_verify.as_bytes(), &signature).is_ok())
}

use pkcs8::{DecodePrivateKey as _, EncodePrivateKey as _};
use sha2::{Digest as _, Sha256};
use zeroize::Zeroizing;

use crate::{
    error::Result,
    jws::{Jwk, JwkThumb},
    util::base64url,
};

/// Account signing key.
///
/// The session algorithm is fixed to ES384, so this is always an elliptic
/// curve P-384 key. Once the ACME API has assigned the account an URL, that
/// URL is stored here as the key ID (`kid`) and used in the protected header
/// of all subsequent requests.
#[derive(Clone, Debug)]
pub struct AccountKey {
    signing_key: p384::ecdsa::SigningKey,

    /// Set once we contacted the ACME API to figure out the key ID.
    key_id: Option<String>,
}

impl AccountKey {
    /// Generate a fresh P-384 key.
    pub fn new() -> AccountKey {
        Self::from_key(crate::cert::create_p384_key())
    }

    /// Load a key from PKCS#8 PEM.
    pub fn from_pem(pem: &str) -> Result<AccountKey> {
        Ok(Self::from_key(p384::ecdsa::SigningKey::from_pkcs8_pem(
            pem,
        )?))
    }

    fn from_key(signing_key: p384::ecdsa::SigningKey) -> AccountKey {
        AccountKey {
            signing_key,
            key_id: None,
        }
    }

    /// Export the private key as PKCS#8 PEM.
    pub fn to_pem(&self) -> Result<Zeroizing<String>> {
        Ok(self.signing_key.to_pkcs8_pem(pem::LineEnding::LF)?)
    }

    pub(crate) fn signing_key(&self) -> &p384::ecdsa::SigningKey {
        &self.signing_key
    }

    /// Account URL assigned by the server, once known.
    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    pub(crate) fn set_key_id(&mut self, kid: String) {
        self.key_id = Some(kid);
    }

    /// SHA-256 thumbprint of the public JWK per RFC 7638, base64url encoded.
    pub fn thumbprint(&self) -> Result<String> {
        let jwk = Jwk::try_from(self)?;
        let thumb = JwkThumb::from(&jwk);
        let json = serde_json::to_vec(&thumb)?;
        Ok(base64url(&Sha256::digest(json)))
    }
}

impl Default for AccountKey {
    fn default() -> Self {
        Self::new()
    }
}

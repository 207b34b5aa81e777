use base64::prelude::*;

use crate::error::Result;

/// Encode with the padding-free base64url alphabet used throughout ACME.
pub(crate) fn base64url<T: ?Sized + AsRef<[u8]>>(input: &T) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(input)
}

pub(crate) fn base64url_decode(input: &str) -> Result<Vec<u8>> {
    Ok(BASE64_URL_SAFE_NO_PAD.decode(input)?)
}

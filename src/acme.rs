//! Directory discovery and the signed HTTP transport.

use log::{debug, trace};
use parking_lot::Mutex;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use tokio::sync::OnceCell;

use crate::{
    api::Directory,
    error::Result,
    jws::{self, Payload},
    key::AccountKey,
    req,
};

pub const LETSENCRYPT_URL: &str = "https://acme-v02.api.letsencrypt.org/directory";
pub const LETSENCRYPT_STAGING_URL: &str =
    "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Well-known directory endpoints, or any other ACME v2 directory URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryUrl<'a> {
    LetsEncrypt,
    LetsEncryptStaging,
    Other(&'a str),
}

impl DirectoryUrl<'_> {
    fn as_url(&self) -> &str {
        match self {
            DirectoryUrl::LetsEncrypt => LETSENCRYPT_URL,
            DirectoryUrl::LetsEncryptStaging => LETSENCRYPT_STAGING_URL,
            DirectoryUrl::Other(url) => url,
        }
    }
}

/// Handle to one ACME server.
///
/// The directory document is fetched lazily on first use and memoized for
/// the lifetime of the handle; repeated endpoint lookups cost nothing. A
/// single replay nonce is cached between requests so that each successful
/// round trip seeds the next one.
pub struct Acme {
    http: reqwest::Client,
    directory_url: String,
    directory: OnceCell<Directory>,

    // Single-slot nonce cache. Nonces are single-use so a read always
    // empties the slot; the guard is never held across an await.
    nonce: Mutex<Option<String>>,
}

impl Acme {
    pub fn new(url: DirectoryUrl<'_>) -> Acme {
        Acme {
            http: reqwest::Client::new(),
            directory_url: url.as_url().to_owned(),
            directory: OnceCell::new(),
            nonce: Mutex::new(None),
        }
    }

    /// Handle pointed at the Let's Encrypt production directory.
    pub fn production() -> Acme {
        Acme::new(DirectoryUrl::LetsEncrypt)
    }

    /// Handle pointed at the Let's Encrypt staging directory.
    pub fn staging() -> Acme {
        Acme::new(DirectoryUrl::LetsEncryptStaging)
    }

    pub fn directory_url(&self) -> &str {
        &self.directory_url
    }

    /// The directory document, fetching it on first call.
    pub async fn directory(&self) -> Result<&Directory> {
        self.directory
            .get_or_try_init(|| async {
                debug!("fetch directory: {}", self.directory_url);
                let res = self.get(&self.directory_url).await?;
                let body = req::read_json(res).await?;
                Ok(serde_json::from_value(body)?)
            })
            .await
    }

    /// Resolve a directory endpoint such as `newOrder` to its URL.
    pub async fn endpoint(&self, name: &str) -> Result<String> {
        Ok(self.directory().await?.endpoint(name)?.to_owned())
    }

    /// Fetch a fresh nonce from the `newNonce` endpoint.
    async fn new_nonce(&self) -> Result<String> {
        let url = self.endpoint("newNonce").await?;
        trace!("fetch new nonce: {url}");

        let res = self
            .http
            .head(&url)
            .header(USER_AGENT, req::USER_AGENT)
            .send()
            .await?;
        let res = req::handle_response(res).await?;

        req::expect_header(&res, "replay-nonce")
    }

    /// The cached nonce if one is in the slot, otherwise a fresh one. The
    /// slot is left empty either way.
    async fn take_nonce(&self) -> Result<String> {
        let cached = self.nonce.lock().take();
        match cached {
            Some(nonce) => Ok(nonce),
            None => self.new_nonce().await,
        }
    }

    /// Stash the `Replay-Nonce` header of a response, if present.
    fn extract_nonce(&self, res: &reqwest::Response) {
        if let Some(nonce) = req::header(res, "replay-nonce") {
            trace!("replay nonce: {nonce}");
            *self.nonce.lock() = Some(nonce);
        }
    }

    /// Harvest the replay nonce, then map error statuses to [`Error`].
    ///
    /// [`Error`]: crate::Error
    ///
    /// Nonce extraction must happen before the status check so that error
    /// responses still replenish the cache.
    async fn finish(&self, res: reqwest::Response) -> Result<reqwest::Response> {
        self.extract_nonce(&res);
        req::handle_response(res).await
    }

    pub(crate) async fn get(&self, url: &str) -> Result<reqwest::Response> {
        debug!("GET {url}");
        let res = self
            .http
            .get(url)
            .header(USER_AGENT, req::USER_AGENT)
            .send()
            .await?;
        self.finish(res).await
    }

    /// Signed POST. With `Payload::None` this is a POST-as-GET.
    ///
    /// `kid` selects the key identification mode: `Some` puts the account
    /// URL in the protected header, `None` embeds the public JWK.
    pub(crate) async fn post_signed(
        &self,
        key: &AccountKey,
        url: &str,
        payload: Payload<'_>,
        kid: Option<&str>,
    ) -> Result<reqwest::Response> {
        let nonce = self.take_nonce().await?;
        let body = jws::sign(key, url, nonce, payload, kid)?;

        debug!("POST {url}");
        trace!("POST body: {body}");

        let res = self
            .http
            .post(url)
            .header(USER_AGENT, req::USER_AGENT)
            .header(CONTENT_TYPE, "application/jose+json")
            .body(body)
            .send()
            .await?;
        self.finish(res).await
    }

    #[cfg(test)]
    pub(crate) fn cached_nonce(&self) -> Option<String> {
        self.nonce.lock().clone()
    }

    #[cfg(test)]
    pub(crate) fn set_cached_nonce(&self, nonce: Option<String>) {
        *self.nonce.lock() = nonce;
    }
}

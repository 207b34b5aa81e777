//! Account-bound ACME workflow.
//!
//! [`Client`] pairs an [`Acme`] transport handle with an [`AccountKey`] and
//! drives the order life cycle: create, authorize, validate, finalize,
//! download and revoke.

use std::{fmt, str::FromStr, time::Duration};

use log::{debug, info};
use serde_json::json;
use sha2::{Digest as _, Sha256};

use crate::{
    acme::Acme,
    api::{Account, Authorization, Challenge, ChallengeType, Finalize, Identifier, NewOrder, Revocation},
    cert,
    error::{Error, Result},
    jws::Payload,
    key::AccountKey,
    order::{Order, OrderStatus},
    req, util,
};

/// Reason code for a revocation request, per [RFC 5280 §5.3.1].
///
/// [RFC 5280 §5.3.1]: https://datatracker.ietf.org/doc/html/rfc5280#section-5.3.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationReason {
    Unspecified,
    KeyCompromise,
    CaCompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
    CertificateHold,
    RemoveFromCrl,
    PrivilegeWithdrawn,
    AaCompromise,
}

impl RevocationReason {
    /// The numeric code sent on the wire. Value 7 is unassigned by the RFC,
    /// hence the gap.
    pub fn code(&self) -> usize {
        match self {
            RevocationReason::Unspecified => 0,
            RevocationReason::KeyCompromise => 1,
            RevocationReason::CaCompromise => 2,
            RevocationReason::AffiliationChanged => 3,
            RevocationReason::Superseded => 4,
            RevocationReason::CessationOfOperation => 5,
            RevocationReason::CertificateHold => 6,
            RevocationReason::RemoveFromCrl => 8,
            RevocationReason::PrivilegeWithdrawn => 9,
            RevocationReason::AaCompromise => 10,
        }
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RevocationReason::Unspecified => "unspecified",
            RevocationReason::KeyCompromise => "keyCompromise",
            RevocationReason::CaCompromise => "caCompromise",
            RevocationReason::AffiliationChanged => "affiliationChanged",
            RevocationReason::Superseded => "superseded",
            RevocationReason::CessationOfOperation => "cessationOfOperation",
            RevocationReason::CertificateHold => "certificateHold",
            RevocationReason::RemoveFromCrl => "removeFromCRL",
            RevocationReason::PrivilegeWithdrawn => "privilegeWithdrawn",
            RevocationReason::AaCompromise => "aACompromise",
        })
    }
}

impl FromStr for RevocationReason {
    type Err = Error;

    /// Accepts reason names in any casing, with optional hyphens or spaces
    /// between words, as well as bare numeric codes.
    fn from_str(s: &str) -> Result<Self> {
        let folded: String = s
            .chars()
            .filter(|ch| *ch != '-' && *ch != ' ')
            .map(|ch| ch.to_ascii_lowercase())
            .collect();

        let reason = match folded.as_str() {
            "unspecified" | "0" => RevocationReason::Unspecified,
            "keycompromise" | "1" => RevocationReason::KeyCompromise,
            "cacompromise" | "2" => RevocationReason::CaCompromise,
            "affiliationchanged" | "3" => RevocationReason::AffiliationChanged,
            "superseded" | "4" => RevocationReason::Superseded,
            "cessationofoperation" | "5" => RevocationReason::CessationOfOperation,
            "certificatehold" | "6" => RevocationReason::CertificateHold,
            "removefromcrl" | "8" => RevocationReason::RemoveFromCrl,
            "privilegewithdrawn" | "9" => RevocationReason::PrivilegeWithdrawn,
            "aacompromise" | "10" => RevocationReason::AaCompromise,
            _ => return Err(Error::UnknownRevocationReason(s.to_owned())),
        };

        Ok(reason)
    }
}

/// ACME client bound to one account key.
///
/// Before any account-scoped call (everything except [`new_account`] and
/// [`account`]) the key must carry a key ID; those two calls set it from the
/// server's `Location` header.
///
/// [`new_account`]: Client::new_account
/// [`account`]: Client::account
pub struct Client {
    acme: Acme,
    key: AccountKey,
}

impl Client {
    pub fn new(acme: Acme, key: AccountKey) -> Client {
        Client { acme, key }
    }

    pub fn acme(&self) -> &Acme {
        &self.acme
    }

    pub fn key(&self) -> &AccountKey {
        &self.key
    }

    fn kid(&self) -> Result<&str> {
        self.key.key_id().ok_or(Error::NoAccount)
    }

    /// Signed POST with the account URL as key ID.
    async fn post(&self, url: &str, payload: Payload<'_>) -> Result<reqwest::Response> {
        let kid = self.kid()?.to_owned();
        self.acme.post_signed(&self.key, url, payload, Some(&kid)).await
    }

    /// POST-as-GET for account-scoped resources.
    async fn post_as_get(&self, url: &str) -> Result<reqwest::Response> {
        self.post(url, Payload::None).await
    }

    /// Create an account, or fetch the existing one bound to this key.
    ///
    /// Creation and key-ID recovery share the `newAccount` endpoint; either
    /// way the request is signed with the embedded JWK since no key ID
    /// exists yet, and the account URL from the `Location` header becomes
    /// the key ID for all subsequent calls.
    pub async fn new_account(&mut self, email: &str) -> Result<Account> {
        let url = self.acme.endpoint("newAccount").await?;

        let payload = json!({
            "contact": [format!("mailto:{email}")],
            "termsOfServiceAgreed": true,
        });
        let res = self
            .acme
            .post_signed(&self.key, &url, Payload::Json(&payload), None)
            .await?;

        let kid = req::expect_header(&res, "location")?;
        info!("account URL: {kid}");
        self.key.set_key_id(kid);

        let body = req::read_json(res).await?;
        Ok(serde_json::from_value(body)?)
    }

    /// Bind this client to a known account URL and fetch the account.
    pub async fn account(&mut self, url: &str) -> Result<Account> {
        self.key.set_key_id(url.to_owned());
        let res = self.post_as_get(url).await?;
        let body = req::read_json(res).await?;
        Ok(serde_json::from_value(body)?)
    }

    /// Replace the account's contact list.
    pub async fn update_account(&self, contact: &[String]) -> Result<Account> {
        let url = self.kid()?.to_owned();
        let payload = json!({ "contact": contact });
        let res = self.post(&url, Payload::Json(&payload)).await?;
        let body = req::read_json(res).await?;
        Ok(serde_json::from_value(body)?)
    }

    /// Create an order for `names`. The first name doubles as the order's
    /// client-side display name.
    ///
    /// The server's `Location` header is folded into the returned order;
    /// as long as it is present the order has not settled and should be
    /// polled via [`refresh`].
    ///
    /// [`refresh`]: Client::refresh
    pub async fn new_order(&self, names: &[&str]) -> Result<Order> {
        let primary = names.first().ok_or(Error::NoIdentifiers)?;
        let url = self.acme.endpoint("newOrder").await?;

        let new_order = NewOrder {
            identifiers: names.iter().map(|name| Identifier::dns(name)).collect(),
        };
        let payload = serde_json::to_value(&new_order)?;
        let res = self.post(&url, Payload::Json(&payload)).await?;

        let location = req::expect_header(&res, "location")?;
        let mut body = req::read_json(res).await?;
        Self::fold_location(&mut body, location)?;

        Order::from_json(body, Some((*primary).to_owned()))
    }

    /// Fetch an order by URL.
    pub async fn order(&self, url: &str, name: Option<&str>) -> Result<Order> {
        let res = self.post_as_get(url).await?;
        let body = req::read_json(res).await?;
        Order::from_json(body, name.map(ToOwned::to_owned))
    }

    /// Re-fetch an order from its pending-poll location. An order without a
    /// location has settled and is returned as-is, without a round trip.
    pub async fn refresh(&self, order: &Order) -> Result<Order> {
        let Some(location) = order.location.as_deref() else {
            return Ok(order.clone());
        };
        self.order(location, order.name()).await
    }

    /// Fetch all authorizations attached to an order.
    pub async fn authorizations(&self, order: &Order) -> Result<Vec<Authorization>> {
        let mut authorizations = Vec::new();
        for url in order.authorization_urls()? {
            let res = self.post_as_get(url).await?;
            let body = req::read_json(res).await?;
            authorizations.push(serde_json::from_value(body)?);
        }
        Ok(authorizations)
    }

    /// Authorizations for one identifier of an order.
    ///
    /// A leading `*.` selects wildcard authorizations for the base name;
    /// without it only non-wildcard authorizations match. The two are
    /// distinct authorizations even though the server reports both under
    /// the bare base name.
    pub async fn authorizations_by_name(
        &self,
        order: &Order,
        name: &str,
    ) -> Result<Vec<Authorization>> {
        let (base, wildcard) = match name.strip_prefix("*.") {
            Some(base) => (base, true),
            None => (name, false),
        };

        Ok(self
            .authorizations(order)
            .await?
            .into_iter()
            .filter(|auth| auth.identifier.value == base && auth.is_wildcard() == wildcard)
            .collect())
    }

    /// The challenge of the given type for one identifier of an order.
    pub async fn challenge(
        &self,
        order: &Order,
        name: &str,
        challenge_type: ChallengeType,
    ) -> Result<Challenge> {
        self.authorizations_by_name(order, name)
            .await?
            .iter()
            .find_map(|auth| auth.challenge(challenge_type))
            .cloned()
            .ok_or_else(|| Error::ChallengeNotFound {
                name: name.to_owned(),
                challenge_type,
            })
    }

    /// Tell the server the challenge is ready to be validated.
    ///
    /// The ack payload is the empty JSON object; a bare POST-as-GET would
    /// merely fetch the challenge.
    pub async fn validate(&self, challenge: &Challenge) -> Result<Challenge> {
        let payload = json!({});
        let res = self.post(&challenge.url, Payload::Json(&payload)).await?;
        let body = req::read_json(res).await?;
        Ok(serde_json::from_value(body)?)
    }

    /// Fetch the current state of a challenge.
    pub async fn check_challenge(&self, url: &str) -> Result<Challenge> {
        let res = self.post_as_get(url).await?;
        let body = req::read_json(res).await?;
        Ok(serde_json::from_value(body)?)
    }

    /// Submit a DER-encoded CSR to the order's finalize endpoint.
    ///
    /// The order must be `ready`; finalizing in any other state is rejected
    /// locally before the request is built.
    pub async fn finalize(&self, order: &Order, csr_der: &[u8]) -> Result<Order> {
        if !order.is_ready() {
            return Err(Error::OrderNotReady(order.status_str().to_owned()));
        }
        let url = order.finalize_url()?;

        let finalize = Finalize {
            csr: util::base64url(csr_der),
        };
        let payload = serde_json::to_value(&finalize)?;
        let res = self.post(url, Payload::Json(&payload)).await?;

        let location = req::header(&res, "location");
        let mut body = req::read_json(res).await?;
        if let Some(location) = location {
            Self::fold_location(&mut body, location)?;
        }

        Order::from_json(body, order.name().map(ToOwned::to_owned))
    }

    /// Download the certificate chain of a `valid` order, PEM encoded.
    pub async fn certificate(&self, order: &Order) -> Result<String> {
        let url = order.certificate_url()?;
        let res = self.post_as_get(url).await?;
        let pem = req::read_pem_chain(res).await?;

        if !cert::chain_is_valid(&pem) {
            return Err(Error::InvalidCertificate(format!(
                "chain from {url} did not parse"
            )));
        }

        Ok(pem)
    }

    /// Revoke the certificate issued for an order.
    ///
    /// The chain is downloaded and the certificate covering the order's
    /// first identifier is picked out; exactly one must match, otherwise
    /// the request is ambiguous and refused.
    pub async fn revoke(&self, order: &Order, reason: RevocationReason) -> Result<()> {
        let name = order
            .identifiers
            .first()
            .map(|identifier| identifier.value.as_str())
            .ok_or(Error::NoIdentifiers)?
            .to_owned();

        let pem = self.certificate(order).await?;
        let mut matched = cert::filter_chain_by_name(&pem, &name)?;

        if matched.len() != 1 {
            return Err(Error::CertificateMismatch {
                name,
                found: matched.len(),
            });
        }
        let der = matched.remove(0);

        let url = self.acme.endpoint("revokeCert").await?;
        let revocation = Revocation {
            certificate: util::base64url(&der),
            reason: reason.code(),
        };
        let payload = serde_json::to_value(&revocation)?;
        self.post(&url, Payload::Json(&payload)).await?;

        debug!("revoked certificate for {name} ({reason})");
        Ok(())
    }

    /// Key authorization string for a challenge token, `token.thumbprint`.
    /// This is what an http-01 responder serves verbatim.
    pub fn key_authorization(&self, challenge: &Challenge) -> Result<String> {
        let token = challenge.token.as_deref().ok_or(Error::NoChallengeToken)?;
        Ok(format!("{token}.{}", self.key.thumbprint()?))
    }

    /// SHA-256 of the key authorization, base64url encoded. This is the
    /// value a dns-01 TXT record carries.
    pub fn key_authorization_hashed(&self, challenge: &Challenge) -> Result<String> {
        let key_auth = self.key_authorization(challenge)?;
        Ok(util::base64url(&Sha256::digest(key_auth.as_bytes())))
    }

    /// Poll an order until it settles or attempts run out.
    ///
    /// An order has settled when it no longer carries a pending-poll
    /// location or its status is terminal. On timeout the latest snapshot
    /// travels inside the error so callers can resume polling later.
    pub async fn wait_on_order(
        &self,
        mut order: Order,
        interval: Duration,
        max_attempts: usize,
    ) -> Result<Order> {
        for attempt in 0..max_attempts {
            if Self::order_settled(&order) {
                return Ok(order);
            }

            debug!(
                "order {} is {}, poll {}/{max_attempts}",
                order.name().unwrap_or("<unnamed>"),
                order.status_str(),
                attempt + 1,
            );

            tokio::time::sleep(interval).await;
            order = self.refresh(&order).await?;
        }

        if Self::order_settled(&order) {
            return Ok(order);
        }
        Err(Error::PollTimeout(Box::new(order)))
    }

    /// Record the `Location` header under a `location` key so the order can
    /// be polled later. A body that is not a JSON object cannot hold the
    /// key and is reported as a server error rather than trusted further.
    fn fold_location(body: &mut serde_json::Value, location: String) -> Result<()> {
        match body.as_object_mut() {
            Some(map) => {
                map.insert("location".to_owned(), serde_json::Value::String(location));
                Ok(())
            }
            None => Err(Error::Server(format!(
                "expected a JSON object, got: {body}"
            ))),
        }
    }

    fn order_settled(order: &Order) -> bool {
        !order.has_location()
            || matches!(
                order.status(),
                Some(OrderStatus::Valid | OrderStatus::Invalid)
            )
    }
}

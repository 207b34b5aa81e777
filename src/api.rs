//! JSON API payloads.
//!
//! Not intended to be used directly. Provided to aid debugging.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Directory object for ACME client self-configuration.
///
/// A mapping from logical operation names (`newNonce`, `newAccount`,
/// `newOrder`, `revokeCert`, ...) to endpoint URLs, plus arbitrary `meta`
/// data. Kept as a raw map so lookups can fail per name rather than at
/// deserialization time.
///
/// See [RFC 8555 §7.1.1].
///
/// [RFC 8555 §7.1.1]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.1
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Directory(Map<String, Value>);

impl Directory {
    /// Look up a required endpoint URL by logical name.
    pub fn endpoint(&self, name: &str) -> Result<&str> {
        self.0
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::MissingEndpoint(name.to_owned()))
    }

    /// Directory metadata, if the server published any.
    pub fn meta(&self) -> Option<&Value> {
        self.0.get("meta")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub _type: String,
    pub value: String,
}

impl Identifier {
    pub(crate) fn dns(value: &str) -> Self {
        Self {
            _type: "dns".to_owned(),
            value: value.to_owned(),
        }
    }

    pub fn is_type_dns(&self) -> bool {
        self._type == "dns"
    }
}

/// ACME problem document, see [RFC 8555 §6.7].
///
/// [RFC 8555 §6.7]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.7
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub _type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subproblems: Option<Vec<Subproblem>>,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {detail}", self._type),
            None => write!(f, "{}", self._type),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subproblem {
    #[serde(rename = "type")]
    pub _type: String,
    pub detail: Option<String>,
    pub identifier: Option<Identifier>,
}

/// The status of an [`Authorization`], see [RFC 8555 §7.1.6].
///
/// [RFC 8555 §7.1.6]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.6
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

/// An ACME authorization object: the server's proof-of-control requirement
/// for one identifier within an order.
///
/// See [RFC 8555 §7.1.4].
///
/// [RFC 8555 §7.1.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.4
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    pub identifier: Identifier,

    pub status: AuthorizationStatus,

    /// The timestamp after which the server will consider this authorization
    /// invalid. Uses RFC 3339 format.
    pub expires: Option<String>,

    /// Challenges the client can fulfill to prove possession of the
    /// identifier. Any one of them is sufficient.
    pub challenges: Vec<Challenge>,

    /// Present and true exactly for authorizations created from a wildcard
    /// DNS identifier. A wildcard authorization and a bare one for the same
    /// base name are distinct.
    pub wildcard: Option<bool>,
}

impl Authorization {
    pub fn is_wildcard(&self) -> bool {
        self.wildcard.unwrap_or(false)
    }

    /// Returns the challenge of the requested type, if one is present.
    pub fn challenge(&self, challenge_type: ChallengeType) -> Option<&Challenge> {
        self.challenges
            .iter()
            .find(|challenge| challenge._type == challenge_type.as_str())
    }
}

/// The status of a [`Challenge`], see [RFC 8555 §7.1.6].
///
/// [RFC 8555 §7.1.6]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.6
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

/// An ACME challenge object: one concrete validation method offered by the
/// server for an authorization.
///
/// See [RFC 8555 §7.1.5].
///
/// [RFC 8555 §7.1.5]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.5
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    #[serde(rename = "type")]
    pub _type: String,

    /// URL to which a response can be posted.
    pub url: String,

    pub status: ChallengeStatus,

    /// Time at which the server validated this challenge. RFC 3339 format.
    pub validated: Option<String>,

    /// Error that occurred while the server was validating the challenge.
    pub error: Option<Problem>,

    /// Random token for key authorizations. Present on the challenge types
    /// defined for `dns` identifiers, absent on anything exotic.
    pub token: Option<String>,
}

/// Validation methods defined for `dns` identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeType {
    Http01,
    Dns01,
    TlsAlpn01,
}

impl ChallengeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeType::Http01 => "http-01",
            ChallengeType::Dns01 => "dns-01",
            ChallengeType::TlsAlpn01 => "tls-alpn-01",
        }
    }
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChallengeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "http-01" => Ok(ChallengeType::Http01),
            "dns-01" => Ok(ChallengeType::Dns01),
            "tls-alpn-01" => Ok(ChallengeType::TlsAlpn01),
            _ => Err(Error::UnknownChallengeType(s.to_owned())),
        }
    }
}

/// An ACME account resource, doubling as the newAccount request body.
///
/// See [RFC 8555 §7.1.2].
///
/// [RFC 8555 §7.1.2]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.2
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub terms_of_service_agreed: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub only_return_existing: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub orders: Option<String>,
}

/// newOrder request body: a list of DNS identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub identifiers: Vec<Identifier>,
}

/// Finalize request body containing the CSR.
///
/// See [RFC 8555 §7.4].
///
/// [RFC 8555 §7.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.4
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finalize {
    /// Certificate Signing Request in base64url-encoded DER.
    ///
    /// Note: not PEM, since headers are omitted.
    pub csr: String,
}

/// Certificate revocation request.
///
/// See [RFC 8555 §7.6].
///
/// [RFC 8555 §7.6]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.6
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revocation {
    /// The certificate to be revoked, in base64url-encoded DER.
    pub certificate: String,

    /// One of the revocation reasonCodes defined in [RFC 5280 §5.3.1].
    ///
    /// [RFC 5280 §5.3.1]: https://datatracker.ietf.org/doc/html/rfc5280#section-5.3.1
    pub reason: usize,
}

//! Error taxonomy for the ACME engine.
//!
//! ACME problem documents (RFC 8555 §6.7) are classified once, at the
//! response boundary, into a closed set of typed errors. Callers decide
//! retry-vs-abort from [`Error::is_retryable`]: only `badNonce`,
//! `serverInternal` and `rateLimited` may be retried, the latter no sooner
//! than [`Error::retry_after`].

use reqwest::StatusCode;
use time::{format_description::well_known::Rfc2822, Duration, OffsetDateTime};

use crate::{order::Order, req};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Recognized problem-type URN prefixes, current and legacy.
const ERROR_PREFIXES: [&str; 2] = ["urn:ietf:params:acme:error:", "urn:acme:error:"];

/// Integer `Retry-After` values below this are a relative delta in seconds
/// rather than an absolute Unix timestamp.
const UNIX_TIME_FLOOR: i64 = 1_000_000_000;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Directory is missing an endpoint the workflow needs.
    #[error("no directory endpoint for {0}")]
    MissingEndpoint(String),

    /// An account-bound operation was attempted before selecting one.
    #[error("no account selected")]
    NoAccount,

    #[error("missing header: {0}")]
    MissingHeader(&'static str),

    /// Finalize was attempted before the order reached `ready`.
    #[error("order status is {0}, not ready")]
    OrderNotReady(String),

    #[error("order has no location")]
    NoLocation,

    #[error("no authorization URLs in order")]
    NoAuthorizations,

    #[error("no finalize URL in order")]
    NoFinalizeUrl,

    #[error("no certificate URL in order")]
    NoCertificateUrl,

    #[error("order has no identifiers")]
    NoIdentifiers,

    /// Key authorization requested for a challenge that carries no token.
    #[error("challenge has no token")]
    NoChallengeToken,

    #[error("no {challenge_type} challenge for {name}")]
    ChallengeNotFound {
        name: String,
        challenge_type: crate::api::ChallengeType,
    },

    /// Revocation needs exactly one chain entry matching the order's first
    /// identifier.
    #[error("expected exactly one chain certificate for {name}, found {found}")]
    CertificateMismatch { name: String, found: usize },

    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("unknown revocation reason: {0}")]
    UnknownRevocationReason(String),

    #[error("unknown challenge type: {0}")]
    UnknownChallengeType(String),

    /// Retryable; retry with a freshly fetched nonce.
    #[error("badNonce: {0}")]
    BadNonce(String),

    /// Retryable.
    #[error("serverInternal: {0}")]
    ServerInternal(String),

    /// Retryable after `retry_after`, when the server provided one.
    #[error("rateLimited: {detail}")]
    RateLimited {
        detail: String,
        retry_after: Option<OffsetDateTime>,
    },

    #[error("accountDoesNotExist: {0}")]
    AccountDoesNotExist(String),

    #[error("alreadyRevoked: {0}")]
    AlreadyRevoked(String),

    #[error("badRevocationReason: {0}")]
    BadRevocationReason(String),

    #[error("caa: {0}")]
    Caa(String),

    #[error("malformed: {0}")]
    Malformed(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Any other problem type under a recognized ACME error URN prefix.
    #[error("ACME error {code}: {detail}")]
    Acme { code: String, detail: String },

    /// Non-success response that is not an ACME problem document. Carries
    /// the raw body for diagnostics.
    #[error("server error: {0}")]
    Server(String),

    /// Polling budget exhausted. Carries the last-observed order so the
    /// caller can inspect partial progress or resume polling.
    #[error("waiting for order timed out")]
    PollTimeout(Box<Order>),

    /// Signed-envelope assembly or verification failure.
    #[error("jws: {0}")]
    Jws(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Base64(#[from] base64::DecodeError),

    #[error(transparent)]
    Der(#[from] der::Error),

    #[error(transparent)]
    Pkcs8(#[from] pkcs8::Error),

    #[error(transparent)]
    Pem(#[from] pem::Error),

    #[error(transparent)]
    CsrBuilder(#[from] x509_cert::builder::Error),

    #[error(transparent)]
    Signature(#[from] ecdsa::signature::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for the error kinds a caller may safely retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::BadNonce(_) | Error::ServerInternal(_) | Error::RateLimited { .. }
        )
    }

    /// Earliest instant at which a rate-limited request should be retried.
    pub fn retry_after(&self) -> Option<OffsetDateTime> {
        match self {
            Error::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Short ACME error code (URN prefix stripped), for classified errors.
    pub fn acme_code(&self) -> Option<&str> {
        match self {
            Error::BadNonce(_) => Some("badNonce"),
            Error::ServerInternal(_) => Some("serverInternal"),
            Error::RateLimited { .. } => Some("rateLimited"),
            Error::AccountDoesNotExist(_) => Some("accountDoesNotExist"),
            Error::AlreadyRevoked(_) => Some("alreadyRevoked"),
            Error::BadRevocationReason(_) => Some("badRevocationReason"),
            Error::Caa(_) => Some("caa"),
            Error::Malformed(_) => Some("malformed"),
            Error::Unauthorized(_) => Some("unauthorized"),
            Error::Acme { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Classify a non-success response into exactly one typed error.
///
/// A body that is not JSON, or that carries no `type` under a recognized
/// ACME error URN prefix, is deliberately reported as a bare server error
/// even when the HTTP status suggests something more specific.
pub(crate) fn classify(
    status: StatusCode,
    content_type: Option<&str>,
    retry_after: Option<&str>,
    body: &str,
) -> Error {
    if !req::is_json(content_type) {
        return Error::Server(format!("non-JSON HTTP error: {status} body: {body}"));
    }

    let json: serde_json::Value = match serde_json::from_str(body) {
        Ok(json) => json,
        Err(_) => return Error::Server(format!("unparseable HTTP error: {status} body: {body}")),
    };

    let code = json
        .get("type")
        .and_then(serde_json::Value::as_str)
        .and_then(strip_error_prefix);

    let Some(code) = code else {
        return Error::Server(format!("non-ACME server error: {status} body: {body}"));
    };

    let detail = json
        .get("detail")
        .and_then(serde_json::Value::as_str)
        .unwrap_or(body)
        .to_owned();

    match code {
        "rateLimited" => Error::RateLimited {
            detail,
            retry_after: retry_after.and_then(parse_retry_after),
        },
        "badNonce" => Error::BadNonce(detail),
        "serverInternal" => Error::ServerInternal(detail),
        "accountDoesNotExist" => Error::AccountDoesNotExist(detail),
        "alreadyRevoked" => Error::AlreadyRevoked(detail),
        "badRevocationReason" => Error::BadRevocationReason(detail),
        "caa" => Error::Caa(detail),
        "malformed" => Error::Malformed(detail),
        "unauthorized" => Error::Unauthorized(detail),
        _ => Error::Acme {
            code: code.to_owned(),
            detail,
        },
    }
}

fn strip_error_prefix(problem_type: &str) -> Option<&str> {
    ERROR_PREFIXES
        .iter()
        .find_map(|prefix| problem_type.strip_prefix(prefix))
}

/// Parse a `Retry-After` value: integer seconds (relative below
/// [`UNIX_TIME_FLOOR`], absolute otherwise) or an HTTP date.
fn parse_retry_after(value: &str) -> Option<OffsetDateTime> {
    let value = value.trim();

    if let Ok(secs) = value.parse::<i64>() {
        if secs < UNIX_TIME_FLOOR {
            // checked_add: an extreme delta from a hostile server must not
            // overflow the instant arithmetic.
            return OffsetDateTime::now_utc().checked_add(Duration::seconds(secs));
        }
        return OffsetDateTime::from_unix_timestamp(secs).ok();
    }

    // HTTP dates name the zone "GMT", which RFC 2822 parsing rejects.
    let value = value.replace("GMT", "+0000");
    OffsetDateTime::parse(&value, &Rfc2822).ok()
}

//! Order life cycle.
//!
//! An order progresses `pending → ready → processing → valid`, with
//! `invalid` reachable from any non-terminal state. The server owns the
//! transitions; the client only ever observes snapshots. Accordingly
//! [`Order`] is an immutable value: finalize, poll and re-fetch all build a
//! fresh one from the response body rather than mutating in place.

use std::fmt;

use serde::{de, Deserialize, Deserializer};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::{
    api::{Identifier, Problem},
    error::{Error, Result},
};

/// Order states per [RFC 8555 §7.1.6]. Wire values are matched
/// case-insensitively and normalized.
///
/// [RFC 8555 §7.1.6]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.6
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Ready => "ready",
            OrderStatus::Processing => "processing",
            OrderStatus::Valid => "valid",
            OrderStatus::Invalid => "invalid",
        }
    }

    /// `valid` and `invalid` are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Valid | OrderStatus::Invalid)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OrderStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        const VARIANTS: &[&str] = &["pending", "ready", "processing", "valid", "invalid"];

        let status = String::deserialize(deserializer)?;
        match status.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "ready" => Ok(OrderStatus::Ready),
            "processing" => Ok(OrderStatus::Processing),
            "valid" => Ok(OrderStatus::Valid),
            "invalid" => Ok(OrderStatus::Invalid),
            other => Err(de::Error::unknown_variant(other, VARIANTS)),
        }
    }
}

/// Immutable snapshot of server-reported order state.
///
/// See [RFC 8555 §7.1.3].
///
/// [RFC 8555 §7.1.3]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.3
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub status: Option<OrderStatus>,

    #[serde(default)]
    pub identifiers: Vec<Identifier>,

    pub authorizations: Option<Vec<String>>,

    /// Present once the authorizations are satisfied enough that the order
    /// reached `ready`.
    pub finalize: Option<String>,

    /// Present only once the order is `valid`.
    pub certificate: Option<String>,

    /// Expiry of the order itself, RFC 3339 format.
    pub expires: Option<String>,

    pub error: Option<Problem>,

    /// Pending-poll URL. Folded in from the `Location` response header on
    /// order creation; its presence means the workflow has not settled.
    pub location: Option<String>,

    /// Client-side display name. Never sent on the wire; carried forward
    /// across finalize and re-fetch so callers can persist orders under a
    /// short name.
    #[serde(skip)]
    pub name: Option<String>,
}

impl Order {
    pub(crate) fn from_json(body: serde_json::Value, name: Option<String>) -> Result<Order> {
        let mut order: Order = serde_json::from_value(body)?;
        order.name = name;
        Ok(order)
    }

    pub fn status(&self) -> Option<OrderStatus> {
        self.status
    }

    /// Status for diagnostics, `"unknown"` when the server sent none.
    pub fn status_str(&self) -> &str {
        self.status.map(|status| status.as_str()).unwrap_or("unknown")
    }

    pub fn is_ready(&self) -> bool {
        self.status == Some(OrderStatus::Ready)
    }

    pub fn is_valid(&self) -> bool {
        self.status == Some(OrderStatus::Valid)
    }

    /// Domain names of all identifiers, in server order.
    pub fn names(&self) -> Vec<&str> {
        self.identifiers
            .iter()
            .map(|identifier| identifier.value.as_str())
            .collect()
    }

    pub fn has_location(&self) -> bool {
        self.location.is_some()
    }

    pub fn location(&self) -> Result<&str> {
        self.location.as_deref().ok_or(Error::NoLocation)
    }

    pub fn authorization_urls(&self) -> Result<&[String]> {
        self.authorizations
            .as_deref()
            .ok_or(Error::NoAuthorizations)
    }

    pub fn finalize_url(&self) -> Result<&str> {
        self.finalize.as_deref().ok_or(Error::NoFinalizeUrl)
    }

    pub fn certificate_url(&self) -> Result<&str> {
        self.certificate.as_deref().ok_or(Error::NoCertificateUrl)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether the order's `expires` timestamp is in the past. Missing or
    /// unparseable timestamps count as not expired.
    pub fn is_expired(&self) -> bool {
        self.expires
            .as_deref()
            .and_then(|expires| OffsetDateTime::parse(expires, &Rfc3339).ok())
            .map(|expires| expires < OffsetDateTime::now_utc())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_from(json: &str) -> Order {
        Order::from_json(serde_json::from_str(json).unwrap(), None).unwrap()
    }

    #[test]
    fn test_status_is_case_insensitive() {
        let order = order_from(r#"{ "status": "  VALID " }"#);
        assert_eq!(order.status(), Some(OrderStatus::Valid));
        assert!(order.status().unwrap().is_terminal());
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let body: serde_json::Value = serde_json::from_str(r#"{ "status": "revooked" }"#).unwrap();
        assert!(Order::from_json(body, None).is_err());
    }

    #[test]
    fn test_accessors_report_missing_fields() {
        let order = order_from(r#"{ "status": "pending" }"#);
        assert!(matches!(order.location(), Err(Error::NoLocation)));
        assert!(matches!(
            order.authorization_urls(),
            Err(Error::NoAuthorizations)
        ));
        assert!(matches!(order.finalize_url(), Err(Error::NoFinalizeUrl)));
        assert!(matches!(
            order.certificate_url(),
            Err(Error::NoCertificateUrl)
        ));
        assert_eq!(order.status_str(), "pending");
    }

    #[test]
    fn test_names_follow_identifier_order() {
        let order = order_from(
            r#"{
                "status": "pending",
                "identifiers": [
                    { "type": "dns", "value": "example.com" },
                    { "type": "dns", "value": "www.example.com" }
                ]
            }"#,
        );
        assert_eq!(order.names(), vec!["example.com", "www.example.com"]);
    }

    #[test]
    fn test_is_expired() {
        let past = order_from(r#"{ "status": "pending", "expires": "2019-01-09T08:26:43Z" }"#);
        assert!(past.is_expired());

        let future = order_from(r#"{ "status": "pending", "expires": "2999-01-09T08:26:43Z" }"#);
        assert!(!future.is_expired());

        let none = order_from(r#"{ "status": "pending" }"#);
        assert!(!none.is_expired());
    }

    #[test]
    fn test_location_survives_round_trip_through_body() {
        // A server body may itself carry a location key; it keeps the order
        // in the pending-poll state.
        let order = order_from(
            r#"{ "status": "processing", "location": "https://example.com/acme/order/1" }"#,
        );
        assert!(order.has_location());
    }
}

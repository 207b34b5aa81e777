//! HTTP helpers shared by the transport layer.

use crate::error::{classify, Error, Result};

/// Fixed client identifier sent with every outgoing request.
pub(crate) const USER_AGENT: &str = concat!("acme2-client/", env!("CARGO_PKG_VERSION"));

pub(crate) fn header(res: &reqwest::Response, name: &str) -> Option<String> {
    res.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
}

pub(crate) fn expect_header(res: &reqwest::Response, name: &'static str) -> Result<String> {
    header(res, name).ok_or(Error::MissingHeader(name))
}

pub(crate) async fn safe_read_body(res: reqwest::Response) -> String {
    // Let's Encrypt sometimes closes the TLS session abruptly even though
    // the body was delivered.
    res.text().await.unwrap_or_default()
}

/// Pass successful responses through; classify everything else into exactly
/// one typed error.
pub(crate) async fn handle_response(res: reqwest::Response) -> Result<reqwest::Response> {
    if res.status().is_success() {
        return Ok(res);
    }

    let status = res.status();
    let content_type = header(&res, "content-type");
    let retry_after = header(&res, "retry-after");
    let body = safe_read_body(res).await;

    Err(classify(
        status,
        content_type.as_deref(),
        retry_after.as_deref(),
        &body,
    ))
}

/// Primary and sub type of a `Content-Type` value, parameters stripped.
pub(crate) fn content_type_parts(value: &str) -> Option<(&str, &str)> {
    let essence = value.split(';').next()?.trim();
    let (primary, sub) = essence.split_once('/')?;
    Some((primary.trim(), sub.trim()))
}

pub(crate) fn is_json(content_type: Option<&str>) -> bool {
    matches!(
        content_type.and_then(content_type_parts),
        Some((_, sub)) if sub == "json" || sub.ends_with("+json")
    )
}

pub(crate) fn is_pem_chain(content_type: Option<&str>) -> bool {
    matches!(
        content_type.and_then(content_type_parts),
        Some(("application", "pem-certificate-chain"))
    )
}

pub(crate) async fn read_json(res: reqwest::Response) -> Result<serde_json::Value> {
    let content_type = header(&res, "content-type");
    if !is_json(content_type.as_deref()) {
        return Err(Error::Server(format!(
            "response is not JSON: content-type {content_type:?}"
        )));
    }
    let body = safe_read_body(res).await;
    log::debug!("{body}");
    Ok(serde_json::from_str(&body)?)
}

pub(crate) async fn read_pem_chain(res: reqwest::Response) -> Result<String> {
    let content_type = header(&res, "content-type");
    if !is_pem_chain(content_type.as_deref()) {
        return Err(Error::Server(format!(
            "response is not a certificate chain: content-type {content_type:?}"
        )));
    }
    Ok(safe_read_body(res).await)
}

//! Client engine for ACME (Automatic Certificate Management Environment) providers such as
//! [Let's Encrypt](https://letsencrypt.org/).
//!
//! It follows the [RFC 8555](https://datatracker.ietf.org/doc/html/rfc8555) spec, using ACME v2
//! to issue, renew and revoke certificates.
//!
//! # Usage
//!
//! Construct an [`Acme`] handle for a directory, wrap it in a [`Client`] with an [`AccountKey`],
//! then walk the order flow: [`new_account`], [`new_order`], satisfy a challenge per
//! authorization, [`finalize`] with a CSR, and download the chain with [`certificate`].
//!
//! # Domain Ownership
//!
//! Most website TLS certificates try to prove ownership/control over the domain they are issued
//! for. For ACME, this means proving you control either:
//!
//! - a server answering TLS or HTTP requests for that domain;
//! - the DNS server answering name lookups against the domain.
//!
//! There are points in the flow where you need to modify either the web server or DNS server
//! before progressing to get the certificate: serve [`key_authorization`] for `http-01`, or
//! publish [`key_authorization_hashed`] in a TXT record for `dns-01`.
//!
//! # Rate Limits
//!
//! The ACME API provider Let's Encrypt uses [rate limits] to ensure the API is not being abused.
//! It might be tempting to put the interval really low in [`wait_on_order`], but balance this
//! against the real risk of having access cut off. Rate-limit responses surface as a retryable
//! [`Error`] carrying the server's earliest retry instant.
//!
//! ## Use Staging For Development!
//!
//! Especially take care to use the Let's Encrypt staging environment for development where the
//! rate limits are more relaxed. See [`DirectoryUrl::LetsEncryptStaging`].
//!
//! [`new_account`]: Client::new_account()
//! [`new_order`]: Client::new_order()
//! [`finalize`]: Client::finalize()
//! [`certificate`]: Client::certificate()
//! [`key_authorization`]: Client::key_authorization()
//! [`key_authorization_hashed`]: Client::key_authorization_hashed()
//! [`wait_on_order`]: Client::wait_on_order()
//! [rate limits]: https://letsencrypt.org/docs/rate-limits

#![deny(rust_2018_idioms, nonstandard_style, future_incompatible)]

mod acme;
mod client;
mod error;
mod key;
mod order;
mod req;
mod util;

pub mod api;
pub mod cert;
pub mod jws;

#[cfg(test)]
mod test;

pub use crate::{
    acme::{Acme, DirectoryUrl, LETSENCRYPT_STAGING_URL, LETSENCRYPT_URL},
    cert::create_p384_key,
    client::{Client, RevocationReason},
    error::{Error, Result},
    key::AccountKey,
    order::{Order, OrderStatus},
};

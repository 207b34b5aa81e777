//! Key pairs, certificate signing requests and certificate chains.

use std::io::{BufReader, Cursor};

use der::{
    asn1::{Ia5String, ObjectIdentifier, PrintableStringRef, Utf8StringRef},
    referenced::OwnedToRef as _,
    time::{OffsetDateTime, PrimitiveDateTime},
    Decode as _,
};
use x509_cert::{
    builder::{Builder, RequestBuilder as CsrBuilder},
    der::EncodePem as _,
    ext::pkix::{name::GeneralName, SubjectAltName},
    name::Name,
    Certificate,
};

use crate::error::{Error, Result};

const COMMON_NAME_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");
const SUBJECT_ALT_NAME_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.17");

/// Make a P-384 private key (from which we can derive a public key).
pub fn create_p384_key() -> p384::ecdsa::SigningKey {
    let csprng = &mut rand::thread_rng();
    ecdsa::SigningKey::from(p384::SecretKey::random(csprng))
}

/// Creates a CSR with `domains` and signs it with `signer`.
///
/// The first item of `domains` is picked for the CSR's Common Name (CN). All
/// domains, the first included, go into a Subject Alternative Name (SAN)
/// extension; issuers read SAN and treat CN as legacy.
pub fn create_csr(
    signer: &p384::ecdsa::SigningKey,
    domains: &[&str],
) -> Result<x509_cert::request::CertReq> {
    let primary_domain = domains.first().ok_or(Error::NoIdentifiers)?;
    let subject = format!("CN={primary_domain}")
        .parse::<Name>()
        .map_err(|err| Error::InvalidCertificate(err.to_string()))?;

    let mut csr = CsrBuilder::new(subject, signer)
        .map_err(|err| Error::InvalidCertificate(err.to_string()))?;

    csr.add_extension(&SubjectAltName(
        domains
            .iter()
            .map(|domain| Ok(GeneralName::DnsName(Ia5String::new(domain)?)))
            .collect::<Result<_, der::Error>>()?,
    ))?;

    Ok(csr.build::<p384::ecdsa::DerSignature>()?)
}

/// CSR in DER encoding, as the `finalize` endpoint expects it.
pub fn csr_der(csr: &x509_cert::request::CertReq) -> Result<Vec<u8>> {
    use der::Encode as _;
    Ok(csr.to_der()?)
}

/// Decode a PEM `CERTIFICATE REQUEST` into its DER bytes.
pub fn csr_pem_to_der(pem: &str) -> Result<Vec<u8>> {
    let (label, der) = pem::decode_vec(pem.as_bytes())?;
    if label != "CERTIFICATE REQUEST" {
        return Err(Error::InvalidCertificate(format!(
            "expected CERTIFICATE REQUEST, got {label}"
        )));
    }
    Ok(der)
}

/// Split a PEM chain into the DER bytes of each certificate, in order. The
/// end-entity certificate comes first.
pub fn parse_chain_der(pem_chain: &str) -> Result<Vec<Vec<u8>>> {
    let mut rdr = BufReader::new(Cursor::new(pem_chain));

    rustls_pemfile::certs(&mut rdr)
        .map(|res| res.map(|cert| cert.to_vec()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(Into::into)
}

/// Whether every certificate in a PEM chain parses as X.509, and the chain
/// is non-empty.
pub fn chain_is_valid(pem_chain: &str) -> bool {
    match parse_chain_der(pem_chain) {
        Ok(ders) if !ders.is_empty() => ders
            .iter()
            .all(|der| Certificate::from_der(der).is_ok()),
        _ => false,
    }
}

/// Domain names a certificate covers: the subject CN (if any) plus all SAN
/// DNS entries, deduplicated, CN first.
pub fn certificate_names(der: &[u8]) -> Result<Vec<String>> {
    let cert = Certificate::from_der(der)?;
    let mut names = Vec::new();

    for rdn in cert.tbs_certificate.subject.0.iter() {
        for attr in rdn.0.iter() {
            if attr.oid != COMMON_NAME_OID {
                continue;
            }
            let value = attr.value.owned_to_ref();
            let cn = if let Ok(s) = Utf8StringRef::try_from(value) {
                s.as_str().to_owned()
            } else if let Ok(s) = PrintableStringRef::try_from(value) {
                s.as_str().to_owned()
            } else {
                continue;
            };
            if !names.contains(&cn) {
                names.push(cn);
            }
        }
    }

    if let Some(extensions) = &cert.tbs_certificate.extensions {
        for ext in extensions {
            if ext.extn_id != SUBJECT_ALT_NAME_OID {
                continue;
            }
            let san = SubjectAltName::from_der(ext.extn_value.as_bytes())?;
            for name in san.0 {
                if let GeneralName::DnsName(dns) = name {
                    let dns = dns.to_string();
                    if !names.contains(&dns) {
                        names.push(dns);
                    }
                }
            }
        }
    }

    Ok(names)
}

/// Whether a certificate name covers `target`. A `*.` name is treated as a
/// suffix wildcard: it covers any deeper name under the base, however many
/// labels, as well as the bare base itself. Deliberately looser than
/// RFC 6125 hostname matching; this selects chain entries, it does not
/// validate peers.
pub fn matches_name(cert_name: &str, target: &str) -> bool {
    if cert_name == target {
        return true;
    }
    match cert_name.strip_prefix('*') {
        Some(suffix) => target.ends_with(suffix) || target == &suffix[1..],
        None => false,
    }
}

/// Certificates in a PEM chain whose names cover `target`.
pub fn filter_chain_by_name(pem_chain: &str, target: &str) -> Result<Vec<Vec<u8>>> {
    let mut matched = Vec::new();
    for der in parse_chain_der(pem_chain)? {
        let names = certificate_names(&der)?;
        if names.iter().any(|name| matches_name(name, target)) {
            matched.push(der);
        }
    }
    Ok(matched)
}

/// Count the number of (whole) valid days left on the end-entity
/// certificate of a PEM chain.
///
/// It's up to the ACME API provider to decide how long an issued certificate
/// is valid. Let's Encrypt sets the validity to 90 days, which this reports
/// as 89 since it counts _whole_ days. Negative for an expired certificate.
pub fn valid_days_left(pem_chain: &str) -> Result<i64> {
    let chain = parse_chain_der(pem_chain)?;
    let cert_ee = chain
        .first() // EE cert is first
        .ok_or_else(|| Error::InvalidCertificate("no certificates in chain".to_owned()))?;

    let cert = Certificate::from_der(cert_ee)?;

    let not_after = cert.tbs_certificate.validity.not_after.to_date_time();
    let not_after = PrimitiveDateTime::try_from(not_after)
        .map_err(|err| Error::InvalidCertificate(err.to_string()))?
        .assume_utc();

    let diff = not_after - OffsetDateTime::now_utc();

    Ok(diff.whole_days())
}

/// Render a CSR as PEM, mostly useful for debugging against external tools.
pub fn csr_pem(csr: &x509_cert::request::CertReq) -> Result<String> {
    Ok(csr.to_pem(der::pem::LineEnding::LF)?)
}

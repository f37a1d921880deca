// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! X.509 certificate parsing.
//!
//! This is the only place certificate PEM is parsed. The wallet store, the
//! expiry monitor and the renewal flow all go through [`parse_certificate`].

use chrono::{DateTime, Utc};
use x509_parser::prelude::{FromDer, X509Certificate};

/// Malformed PEM or X.509 input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CertificateParseError {
    #[error("invalid PEM: {0}")]
    Pem(String),

    #[error("expected a CERTIFICATE PEM block, found {0}")]
    UnexpectedTag(String),

    #[error("invalid X.509 certificate: {0}")]
    X509(String),

    #[error("certificate validity timestamp out of range")]
    TimestampOutOfRange,
}

/// The fields of a certificate this service cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    /// `notBefore` of the validity period.
    pub not_before: DateTime<Utc>,
    /// `notAfter` of the validity period.
    pub not_after: DateTime<Utc>,
    /// Serial number as colon-separated lowercase hex.
    pub serial: String,
    /// Subject common name, if present.
    pub common_name: Option<String>,
}

/// Parse a PEM-encoded X.509 certificate.
///
/// Only the first PEM block is considered and it must be tagged
/// `CERTIFICATE`.
pub fn parse_certificate(certificate_pem: &str) -> Result<CertificateInfo, CertificateParseError> {
    let block =
        pem::parse(certificate_pem).map_err(|e| CertificateParseError::Pem(e.to_string()))?;

    if block.tag() != "CERTIFICATE" {
        return Err(CertificateParseError::UnexpectedTag(block.tag().to_string()));
    }

    let (_, cert) = X509Certificate::from_der(block.contents())
        .map_err(|e| CertificateParseError::X509(e.to_string()))?;

    let validity = cert.validity();
    let not_before = DateTime::from_timestamp(validity.not_before.timestamp(), 0)
        .ok_or(CertificateParseError::TimestampOutOfRange)?;
    let not_after = DateTime::from_timestamp(validity.not_after.timestamp(), 0)
        .ok_or(CertificateParseError::TimestampOutOfRange)?;

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string);

    Ok(CertificateInfo {
        not_before,
        not_after,
        serial: cert.tbs_certificate.raw_serial_as_string(),
        common_name,
    })
}

/// Extract the `notAfter` timestamp of a certificate.
pub fn extract_expiry(certificate_pem: &str) -> Result<DateTime<Utc>, CertificateParseError> {
    parse_certificate(certificate_pem).map(|info| info.not_after)
}

/// Extract the serial number of a certificate.
pub fn extract_serial(certificate_pem: &str) -> Result<String, CertificateParseError> {
    parse_certificate(certificate_pem).map(|info| info.serial)
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Certificate fixtures minted with rcgen.

    use chrono::{DateTime, Utc};
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SerialNumber};

    /// A freshly minted self-signed identity.
    pub struct TestIdentity {
        pub certificate_pem: String,
        pub private_key_pem: String,
    }

    /// Mint a certificate for `common_name` valid until `not_after`.
    pub fn mint_certificate(
        common_name: &str,
        not_after: DateTime<Utc>,
        serial: u64,
    ) -> TestIdentity {
        let mut params = CertificateParams::new(Vec::<String>::new()).expect("params");
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);
        params.distinguished_name = dn;
        params.serial_number = Some(SerialNumber::from(serial));
        params.not_before = time::OffsetDateTime::from_unix_timestamp(
            (not_after - chrono::Duration::days(365)).timestamp(),
        )
        .expect("not_before");
        params.not_after =
            time::OffsetDateTime::from_unix_timestamp(not_after.timestamp()).expect("not_after");

        let key_pair = KeyPair::generate().expect("key pair");
        let cert = params.self_signed(&key_pair).expect("self-signed");

        TestIdentity {
            certificate_pem: cert.pem(),
            private_key_pem: key_pair.serialize_pem(),
        }
    }

    /// Truncate a timestamp to whole seconds (X.509 precision).
    pub fn whole_seconds(at: DateTime<Utc>) -> DateTime<Utc> {
        DateTime::from_timestamp(at.timestamp(), 0).expect("in range")
    }
}

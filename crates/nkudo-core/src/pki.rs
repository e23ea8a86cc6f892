//! CA / PKI engine (§4.1).
//!
//! Holds the control plane's self-signed root in memory and issues
//! short-lived client certificates against agent-submitted CSRs. Unlike a
//! secrets-engine PKI mount that generates every key itself, this engine
//! never holds or generates a client private key — the agent keeps that —
//! it only validates the CSR's embedded public key and signs it.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rcgen::{
    BasicConstraints, CertificateParams, CertificateSigningRequestParams, DistinguishedName,
    DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls_pemfile::Item;
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::prelude::FromDer;
use x509_parser::public_key::PublicKey;

use crate::error::PkiError;

/// Client certificates are issued only for these key shapes (§4.1: "the
/// public-key algorithm and size are on an allow-list").
fn key_shape_allowed(public_key: &PublicKey<'_>) -> bool {
    match public_key {
        PublicKey::RSA(_) => matches!(public_key.key_size(), 2048 | 3072 | 4096),
        PublicKey::EC(_) => matches!(public_key.key_size(), 256 | 384),
        _ => false,
    }
}

/// The control plane's in-memory root CA material.
pub struct CaMaterial {
    pub certificate_pem: String,
    key_pair: KeyPair,
    cert: rcgen::Certificate,
}

impl CaMaterial {
    /// Generate a fresh self-signed root. Used on first boot if no CA
    /// material is configured on disk.
    ///
    /// # Errors
    ///
    /// Returns [`PkiError::CertGeneration`] if key or certificate generation
    /// fails.
    pub fn generate_root(common_name: &str, ttl_days: i64) -> Result<(Self, String), PkiError> {
        if common_name.is_empty() {
            return Err(PkiError::InvalidCsr {
                reason: "common_name is required".to_owned(),
            });
        }

        let mut params =
            CertificateParams::new(Vec::<String>::new()).map_err(|e| PkiError::CertGeneration {
                reason: format!("failed to build CA params: {e}"),
            })?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        params.not_before = to_offset_date_time(Utc::now());
        params.not_after = to_offset_date_time(Utc::now() + ChronoDuration::days(ttl_days));

        let key_pair = KeyPair::generate().map_err(|e| PkiError::CertGeneration {
            reason: format!("CA key generation failed: {e}"),
        })?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| PkiError::CertGeneration {
                reason: format!("CA self-signing failed: {e}"),
            })?;

        let certificate_pem = cert.pem();
        let private_key_pem = key_pair.serialize_pem();

        Ok((
            Self {
                certificate_pem: certificate_pem.clone(),
                key_pair,
                cert,
            },
            private_key_pem,
        ))
    }

    /// Reconstruct CA material from previously persisted PEM (the on-disk
    /// bootstrap path).
    ///
    /// # Errors
    ///
    /// Returns [`PkiError::CertGeneration`] if the stored PEM cannot be
    /// parsed or re-signed.
    pub fn load(certificate_pem: &str, private_key_pem: &str) -> Result<Self, PkiError> {
        let key_pair =
            KeyPair::from_pem(private_key_pem).map_err(|e| PkiError::CertGeneration {
                reason: format!("failed to parse CA private key: {e}"),
            })?;

        let params = CertificateParams::from_ca_cert_pem(certificate_pem).map_err(|e| {
            PkiError::CertGeneration {
                reason: format!("failed to parse CA certificate: {e}"),
            }
        })?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| PkiError::CertGeneration {
                reason: format!("failed to reconstruct CA certificate: {e}"),
            })?;

        Ok(Self {
            certificate_pem: certificate_pem.to_owned(),
            key_pair,
            cert,
        })
    }

    /// Build a `rustls` server TLS configuration that presents this CA's own
    /// certificate as the listener's identity and verifies presented client
    /// certificates against the same CA. Unauthenticated connections are
    /// accepted at the TLS layer (routes that require an identity, such as
    /// `/heartbeat` and `/renew`, reject them afterwards) so that `/enroll`
    /// and `/healthz` remain reachable without a client certificate.
    ///
    /// # Errors
    ///
    /// Returns [`PkiError::CertGeneration`] if the verifier or TLS config
    /// cannot be constructed from this CA's material.
    pub fn server_tls_config(&self) -> Result<rustls::ServerConfig, PkiError> {
        let mut root_store = rustls::RootCertStore::empty();
        root_store
            .add(self.cert.der().clone())
            .map_err(|e| PkiError::CertGeneration {
                reason: format!("failed to add CA certificate to trust root: {e}"),
            })?;

        let verifier = rustls::server::WebPkiClientVerifier::builder(std::sync::Arc::new(root_store))
            .allow_unauthenticated()
            .build()
            .map_err(|e| PkiError::CertGeneration {
                reason: format!("failed to build client certificate verifier: {e}"),
            })?;

        let cert_chain = vec![self.cert.der().clone()];
        let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key_pair.serialize_der()));

        rustls::ServerConfig::builder()
            .with_client_cert_verifier(verifier)
            .with_single_cert(cert_chain, key_der)
            .map_err(|e| PkiError::CertGeneration {
                reason: format!("failed to build server TLS config: {e}"),
            })
    }
}

/// A freshly issued client certificate, ready to hand back to the agent.
pub struct IssuedCertificate {
    pub certificate_pem: String,
    pub ca_chain_pem: String,
    /// Decimal-rendered serial, per §6 wire format.
    pub serial: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Validate an agent-submitted CSR PEM and, on success, return its parsed
/// common name. Performs the three checks required by §4.1: (a) the CSR's
/// self-signature verifies against its embedded public key, (b) the
/// requested CN is returned for the caller to compare against the expected
/// identity, (c) the public-key algorithm and size are on the allow-list.
///
/// # Errors
///
/// Returns [`PkiError::InvalidCsr`] if any check fails.
pub fn validate_csr(csr_pem: &str) -> Result<String, PkiError> {
    let der = extract_csr_der(csr_pem)?;

    let (_, csr) = X509CertificationRequest::from_der(&der).map_err(|e| PkiError::InvalidCsr {
        reason: format!("malformed CSR: {e}"),
    })?;

    csr.verify_signature().map_err(|e| PkiError::InvalidCsr {
        reason: format!("CSR signature does not verify: {e}"),
    })?;

    let public_key = csr
        .certification_request_info
        .subject_pki
        .parsed()
        .map_err(|e| PkiError::InvalidCsr {
            reason: format!("unreadable subject public key: {e}"),
        })?;
    if !key_shape_allowed(&public_key) {
        return Err(PkiError::InvalidCsr {
            reason: "public-key algorithm or size not on the allow-list".to_owned(),
        });
    }

    let common_name = csr
        .certification_request_info
        .subject
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .ok_or_else(|| PkiError::InvalidCsr {
            reason: "CSR subject has no common name".to_owned(),
        })?;

    Ok(common_name.to_owned())
}

fn extract_csr_der(csr_pem: &str) -> Result<Vec<u8>, PkiError> {
    let mut reader = std::io::Cursor::new(csr_pem.as_bytes());
    match rustls_pemfile::read_one(&mut reader) {
        Ok(Some(Item::Csr(der))) => Ok(der.as_ref().to_vec()),
        Ok(Some(_)) => Err(PkiError::InvalidCsr {
            reason: "PEM block is not a certificate request".to_owned(),
        }),
        Ok(None) => Err(PkiError::InvalidCsr {
            reason: "no PEM block found".to_owned(),
        }),
        Err(e) => Err(PkiError::InvalidCsr {
            reason: format!("malformed PEM: {e}"),
        }),
    }
}

/// Sign a validated CSR, producing a client certificate with `client_auth`
/// key usage and the given validity window. `ttl_days` is clamped to the
/// policy maximum of 90 days (§4.1).
///
/// # Errors
///
/// Returns [`PkiError::InvalidCsr`] if the CSR fails validation, or
/// [`PkiError::CertGeneration`] if signing fails.
pub fn issue_certificate(
    ca: &CaMaterial,
    csr_pem: &str,
    expected_cn: &str,
    ttl_days: i64,
    now: DateTime<Utc>,
) -> Result<IssuedCertificate, PkiError> {
    let cn = validate_csr(csr_pem)?;
    if cn != expected_cn {
        return Err(PkiError::InvalidCsr {
            reason: format!("CSR common name '{cn}' does not match expected identity '{expected_cn}'"),
        });
    }

    let clamped_ttl = ttl_days.clamp(1, 90);
    let expires_at = now + ChronoDuration::days(clamped_ttl);

    let mut csr_params = CertificateSigningRequestParams::from_pem(csr_pem).map_err(|e| {
        PkiError::CertGeneration {
            reason: format!("failed to re-parse validated CSR: {e}"),
        }
    })?;

    let serial_u128 = uuid::Uuid::new_v4().as_u128();
    csr_params.params.serial_number = Some(rcgen::SerialNumber::from_slice(&serial_u128.to_be_bytes()));
    csr_params.params.not_before = to_offset_date_time(now);
    csr_params.params.not_after = to_offset_date_time(expires_at);
    csr_params.params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    csr_params.params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
    csr_params.params.is_ca = IsCa::NoCa;

    let cert = csr_params
        .signed_by(&ca.cert, &ca.key_pair)
        .map_err(|e| PkiError::CertGeneration {
            reason: format!("certificate signing failed: {e}"),
        })?;

    Ok(IssuedCertificate {
        certificate_pem: cert.pem(),
        ca_chain_pem: ca.certificate_pem.clone(),
        serial: serial_u128.to_string(),
        issued_at: now,
        expires_at,
    })
}

/// Clamp a requested TTL down to the 90-day policy maximum.
#[must_use]
pub fn clamp_ttl_days(requested_days: Option<i64>) -> i64 {
    requested_days.unwrap_or(90).clamp(1, 90)
}

fn to_offset_date_time(dt: DateTime<Utc>) -> time::OffsetDateTime {
    time::OffsetDateTime::from_unix_timestamp(dt.timestamp()).unwrap_or(time::OffsetDateTime::UNIX_EPOCH)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn generate_csr(common_name: &str) -> String {
        let key_pair = KeyPair::generate().expect("key generation");
        let mut params = CertificateParams::new(Vec::<String>::new()).expect("csr params");
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);
        params.distinguished_name = dn;
        params
            .serialize_request(&key_pair)
            .expect("serialize csr")
            .pem()
            .expect("pem encode")
    }

    #[test]
    fn validate_csr_returns_common_name() {
        let csr_pem = generate_csr("host-a");
        assert_eq!(validate_csr(&csr_pem).expect("valid csr"), "host-a");
    }

    #[test]
    fn validate_csr_rejects_garbage_pem() {
        let err = validate_csr("not a pem block").unwrap_err();
        assert!(matches!(err, PkiError::InvalidCsr { .. }));
    }

    #[test]
    fn issue_certificate_round_trips_through_validate_csr() {
        let (ca, _key_pem) = CaMaterial::generate_root("test-root", 3650).expect("ca");
        let csr_pem = generate_csr("host-b");
        let now = Utc::now();

        let issued = issue_certificate(&ca, &csr_pem, "host-b", 30, now).expect("issue");
        assert_eq!(issued.expires_at, now + ChronoDuration::days(30));
        assert!(!issued.serial.is_empty());
        assert_eq!(issued.ca_chain_pem, ca.certificate_pem);
    }

    #[test]
    fn issue_certificate_rejects_cn_mismatch() {
        let (ca, _key_pem) = CaMaterial::generate_root("test-root", 3650).expect("ca");
        let csr_pem = generate_csr("host-c");
        let err = issue_certificate(&ca, &csr_pem, "host-other", 30, Utc::now()).unwrap_err();
        assert!(matches!(err, PkiError::InvalidCsr { .. }));
    }

    #[test]
    fn clamp_ttl_days_defaults_and_clamps() {
        assert_eq!(clamp_ttl_days(None), 90);
        assert_eq!(clamp_ttl_days(Some(5)), 5);
        assert_eq!(clamp_ttl_days(Some(0)), 1);
        assert_eq!(clamp_ttl_days(Some(365)), 90);
    }
}

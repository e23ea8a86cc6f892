//! Agent-side key and CSR handling (§4.1, §4.2, §6 on-disk PKI material).
//!
//! The agent never sends a private key anywhere — it generates one
//! locally, builds a CSR naming the enrolling hostname as the subject
//! common name (the control plane's enrollment and renewal pipelines both
//! expect the CSR's CN to equal the host's hostname, not an agent id — see
//! `nkudo-core`'s enrollment/renewal modules), and persists the key
//! alongside whatever certificate the server hands back.

use std::path::Path;

use chrono::{DateTime, Utc};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};

use crate::error::{AgentError, Result};

/// Generate a fresh keypair and a PEM-encoded CSR naming `common_name` as
/// the subject. Returns `(csr_pem, private_key_pem)`.
pub fn generate_csr(common_name: &str) -> Result<(String, String)> {
    let key_pair = KeyPair::generate()
        .map_err(|e| AgentError::Runtime(format!("key generation failed: {e}")))?;

    let mut params = CertificateParams::new(Vec::<String>::new())
        .map_err(|e| AgentError::Runtime(format!("failed to build CSR params: {e}")))?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;

    let csr = params
        .serialize_request(&key_pair)
        .map_err(|e| AgentError::Runtime(format!("CSR serialization failed: {e}")))?;
    let csr_pem = csr
        .pem()
        .map_err(|e| AgentError::Runtime(format!("CSR PEM encoding failed: {e}")))?;

    Ok((csr_pem, key_pair.serialize_pem()))
}

/// Persist `client.key` (0600), `client.crt` (0644) and `ca.crt` (0644)
/// under `pki_dir`.
pub fn save_material(
    pki_dir: &Path,
    private_key_pem: &str,
    certificate_pem: &str,
    ca_chain_pem: &str,
) -> Result<()> {
    std::fs::create_dir_all(pki_dir)?;
    write_restricted(&pki_dir.join("client.key"), private_key_pem)?;
    std::fs::write(pki_dir.join("client.crt"), certificate_pem)?;
    std::fs::write(pki_dir.join("ca.crt"), ca_chain_pem)?;
    Ok(())
}

#[cfg(unix)]
fn write_restricted(path: &Path, contents: &str) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::write(path, contents)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn write_restricted(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents)?;
    Ok(())
}

/// Parse a client certificate's `notAfter` field.
///
/// # Errors
///
/// Returns [`AgentError::CertInvalid`] if the file is missing or the PEM
/// cannot be parsed.
pub fn certificate_expiry(cert_path: &Path) -> Result<DateTime<Utc>> {
    let pem_bytes = std::fs::read(cert_path).map_err(|e| {
        AgentError::CertInvalid(format!("failed to read {}: {e}", cert_path.display()))
    })?;
    let (_, pem) = x509_parser::pem::parse_x509_pem(&pem_bytes)
        .map_err(|e| AgentError::CertInvalid(format!("malformed certificate PEM: {e}")))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| AgentError::CertInvalid(format!("malformed certificate: {e}")))?;

    let not_after = cert.validity().not_after.timestamp();
    DateTime::from_timestamp(not_after, 0)
        .ok_or_else(|| AgentError::CertInvalid("certificate notAfter out of range".to_owned()))
}

/// Whether the on-disk certificate at `cert_path` is still valid as of
/// `now` (used by `check` and by the renewal threshold in the dispatcher).
pub fn is_expired(cert_path: &Path, now: DateTime<Utc>) -> Result<bool> {
    Ok(certificate_expiry(cert_path)? <= now)
}

use std::fs;
use std::time::SystemTime;

use tracing::info;

use crate::config::CertPaths;
use crate::error::TlsError;
use crate::tls::expiry::{check_cert_expiry, log_cert_expiry, CertExpiry, EXPIRY_WARN_DAYS};
use crate::tls::loader::{crypto_provider, load_key_pair, parse_ca_bundle};

/// Check that the certificate, key and CA files exist and parse, without
/// touching the network.
///
/// Failure order: certificate, key and CA accessibility, then the key pair,
/// then the CA content. Returns the client certificate's expiry status.
pub fn validate_cert_files(certs: &CertPaths) -> Result<CertExpiry, TlsError> {
    let cert_file = certs.cert_file();
    let key_file = certs.key_file();
    let ca_file = certs.ca_file();

    fs::metadata(&cert_file).map_err(|source| TlsError::CertFileAccess {
        path: cert_file.clone(),
        source,
    })?;
    fs::metadata(&key_file).map_err(|source| TlsError::KeyFileAccess {
        path: key_file.clone(),
        source,
    })?;
    fs::metadata(&ca_file).map_err(|source| TlsError::CaFileAccess {
        path: ca_file.clone(),
        source,
    })?;

    let provider = crypto_provider();
    let identity = load_key_pair(&cert_file, &key_file, &provider)?;

    let ca_pem = fs::read(&ca_file).map_err(|source| TlsError::ReadCa {
        path: ca_file.clone(),
        source,
    })?;
    if parse_ca_bundle(&ca_pem).added == 0 {
        return Err(TlsError::ParseCa { path: ca_file });
    }

    let expiry = check_cert_expiry(&identity.chain[0], EXPIRY_WARN_DAYS, SystemTime::now());
    log_cert_expiry(&cert_file, expiry);

    info!("TLS configuration validation successful");
    Ok(expiry)
}

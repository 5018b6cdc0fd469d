use std::fs;
use std::path::Path;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{
    CertificateDer, PrivateKeyDer, PrivatePkcs1KeyDer, PrivatePkcs8KeyDer, PrivateSec1KeyDer,
};
use rustls::sign::CertifiedKey;
use rustls::RootCertStore;

use crate::error::TlsError;

const CERTIFICATE_TAG: &str = "CERTIFICATE";

/// Client certificate chain and its private key.
pub struct ClientIdentity {
    pub chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

/// CA certificates accepted as trust anchors, with the parse tally.
pub struct TrustAnchors {
    pub roots: RootCertStore,
    pub added: usize,
    pub ignored: usize,
}

/// Crypto provider used for every TLS configuration built here.
pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Load a PEM certificate chain and private key, checking that the key can
/// be used with the provider and matches the leaf certificate.
pub fn load_key_pair(
    cert_file: &Path,
    key_file: &Path,
    provider: &CryptoProvider,
) -> Result<ClientIdentity, TlsError> {
    let fail = |detail: String| TlsError::KeyPair {
        cert: cert_file.to_path_buf(),
        key: key_file.to_path_buf(),
        detail,
    };

    let cert_pem = fs::read(cert_file).map_err(|e| fail(format!("reading certificate: {e}")))?;
    let chain: Vec<CertificateDer<'static>> = pem::parse_many(&cert_pem)
        .map_err(|e| fail(format!("parsing certificate: {e}")))?
        .into_iter()
        .filter(|block| block.tag() == CERTIFICATE_TAG)
        .map(|block| CertificateDer::from(block.into_contents()))
        .collect();
    if chain.is_empty() {
        return Err(fail("no certificate PEM block found".to_string()));
    }

    let key_pem = fs::read(key_file).map_err(|e| fail(format!("reading private key: {e}")))?;
    let key = pem::parse_many(&key_pem)
        .map_err(|e| fail(format!("parsing private key: {e}")))?
        .into_iter()
        .find_map(private_key)
        .ok_or_else(|| fail("no private key PEM block found".to_string()))?;

    CertifiedKey::from_der(chain.clone(), key.clone_key(), provider)
        .map_err(|e| fail(e.to_string()))?;

    Ok(ClientIdentity { chain, key })
}

/// PKCS#8, PKCS#1 (RSA) or SEC1 (EC) key blocks; anything else is skipped.
fn private_key(block: pem::Pem) -> Option<PrivateKeyDer<'static>> {
    match block.tag() {
        "PRIVATE KEY" => Some(PrivatePkcs8KeyDer::from(block.into_contents()).into()),
        "RSA PRIVATE KEY" => Some(PrivatePkcs1KeyDer::from(block.into_contents()).into()),
        "EC PRIVATE KEY" => Some(PrivateSec1KeyDer::from(block.into_contents()).into()),
        _ => None,
    }
}

/// Read a CA bundle. Unparseable entries are counted, not rejected.
pub fn load_ca_bundle(ca_file: &Path) -> Result<TrustAnchors, TlsError> {
    let pem = fs::read(ca_file).map_err(|source| TlsError::ReadCa {
        path: ca_file.to_path_buf(),
        source,
    })?;
    Ok(parse_ca_bundle(&pem))
}

/// A bundle that is not PEM at all yields zero anchors.
pub fn parse_ca_bundle(bundle: &[u8]) -> TrustAnchors {
    let blocks = pem::parse_many(bundle).unwrap_or_default();
    let (certs, other): (Vec<_>, Vec<_>) = blocks
        .into_iter()
        .partition(|block| block.tag() == CERTIFICATE_TAG);

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(
        certs
            .into_iter()
            .map(|block| CertificateDer::from(block.into_contents())),
    );

    TrustAnchors {
        roots,
        added,
        ignored: ignored + other.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_pem_bundle_adds_nothing() {
        let anchors = parse_ca_bundle(b"definitely not a certificate");
        assert_eq!(anchors.added, 0);
        assert!(anchors.roots.is_empty());
    }

    #[test]
    fn missing_ca_file_is_a_read_error() {
        let err = load_ca_bundle(Path::new("/nonexistent/ca.crt"))
            .err()
            .expect("read should fail");
        assert!(matches!(err, TlsError::ReadCa { .. }));
    }

    #[test]
    fn missing_cert_is_a_key_pair_error() {
        let provider = crypto_provider();
        let err = load_key_pair(
            Path::new("/nonexistent/fullchain.crt"),
            Path::new("/nonexistent/private.key"),
            &provider,
        )
        .err()
        .expect("load should fail");
        assert!(matches!(err, TlsError::KeyPair { .. }));
        assert!(err.to_string().contains("fullchain.crt"));
    }
}

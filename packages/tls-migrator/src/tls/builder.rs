use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::ClientConfig;
use tracing::{info, warn};

use crate::config::CertPaths;
use crate::error::TlsError;
use crate::tls::loader::{
    crypto_provider, load_ca_bundle, load_key_pair, ClientIdentity, TrustAnchors,
};

/// Combine a client identity and trust anchors into a client configuration.
pub fn build_client_config(
    identity: ClientIdentity,
    anchors: TrustAnchors,
    provider: Arc<CryptoProvider>,
) -> Result<ClientConfig, TlsError> {
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_root_certificates(anchors.roots)
        .with_client_auth_cert(identity.chain, identity.key)?;
    Ok(config)
}

/// Load the certificate triple from disk and build the mTLS configuration.
///
/// Materials are read on every call. An unparseable CA bundle is not an
/// error here (see [`crate::tls::validate_cert_files`] for the strict check).
pub fn create_tls_config(certs: &CertPaths) -> Result<Arc<ClientConfig>, TlsError> {
    let cert_file = certs.cert_file();
    let key_file = certs.key_file();
    let ca_file = certs.ca_file();
    let provider = crypto_provider();

    info!(cert = %cert_file.display(), key = %key_file.display(), "Loading cert/key");
    let identity = load_key_pair(&cert_file, &key_file, &provider)?;

    info!(ca = %ca_file.display(), "Loading CA cert");
    let anchors = load_ca_bundle(&ca_file)?;

    info!(added = anchors.added, ignored = anchors.ignored, "Creating cert pool");
    if anchors.added == 0 {
        warn!(ca = %ca_file.display(), "CA bundle contained no usable certificates");
    }

    info!("Making TLS config");
    let config = build_client_config(identity, anchors, provider)?;

    info!("TLS config created successfully");
    Ok(Arc::new(config))
}

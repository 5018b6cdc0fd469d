//! Client certificate loading and mTLS configuration

pub mod builder;
pub mod expiry;
pub mod loader;
pub mod validate;

pub use builder::{build_client_config, create_tls_config};
pub use expiry::{check_cert_expiry, CertExpiry, EXPIRY_WARN_DAYS};
pub use loader::{crypto_provider, load_ca_bundle, load_key_pair, ClientIdentity, TrustAnchors};
pub use validate::validate_cert_files;

//! Certificate fixtures minted with rcgen

use std::fs;
use std::path::Path;

use rcgen::{
    BasicConstraints, CertificateParams, DnType, DnValue, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use tempfile::TempDir;
use tls_migrator::CertPaths;

/// PEM encoded CA, client certificate signed by it, and the client key.
#[derive(Debug, Clone)]
pub struct CertTriple {
    pub ca_pem: String,
    pub cert_pem: String,
    pub key_pem: String,
}

impl CertTriple {
    pub fn generate() -> Self {
        let ca_key = KeyPair::generate().expect("CA key generation should succeed");
        let mut ca_params =
            CertificateParams::new(Vec::<String>::new()).expect("CA params should be valid");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(DnType::CommonName, DnValue::Utf8String("Migrator Test CA".to_string()));
        ca_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        let ca_cert = ca_params
            .self_signed(&ca_key)
            .expect("CA self-signing should succeed");

        let client_key = KeyPair::generate().expect("client key generation should succeed");
        let mut client_params = CertificateParams::new(vec!["schema-migrator".to_string()])
            .expect("client params should be valid");
        client_params
            .distinguished_name
            .push(DnType::CommonName, DnValue::Utf8String("schema-migrator".to_string()));
        client_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        let client_cert = client_params
            .signed_by(&client_key, &ca_cert, &ca_key)
            .expect("client cert signing should succeed");

        Self {
            ca_pem: ca_cert.pem(),
            cert_pem: client_cert.pem(),
            key_pem: client_key.serialize_pem(),
        }
    }
}

/// Temporary certificate directory populated with a fresh triple under the
/// default file names.
pub struct CertDir {
    dir: TempDir,
    pub triple: CertTriple,
}

impl CertDir {
    pub fn with_defaults() -> Self {
        let dir = TempDir::new().expect("temp dir should be created");
        let triple = CertTriple::generate();
        let certs = CertDir {
            dir,
            triple: triple.clone(),
        };
        let paths = certs.paths();
        fs::write(paths.cert_file(), &triple.cert_pem).expect("write cert");
        fs::write(paths.key_file(), &triple.key_pem).expect("write key");
        fs::write(paths.ca_file(), &triple.ca_pem).expect("write ca");
        certs
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn paths(&self) -> CertPaths {
        CertPaths::in_dir(self.dir.path())
    }

    /// Delete one of the files, by name.
    pub fn remove(&self, name: &str) {
        fs::remove_file(self.dir.path().join(name)).expect("remove fixture file");
    }

    /// Replace one of the files, by name.
    pub fn overwrite(&self, name: &str, contents: &[u8]) {
        fs::write(self.dir.path().join(name), contents).expect("overwrite fixture file");
    }
}

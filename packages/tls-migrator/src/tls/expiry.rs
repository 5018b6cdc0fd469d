//! Client certificate expiry checks

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

/// Days before `notAfter` at which validation starts warning.
pub const EXPIRY_WARN_DAYS: u64 = 30;

const SECS_PER_DAY: u64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertExpiry {
    Valid { days_left: u64 },
    ExpiringSoon { days_left: u64 },
    Expired { days_ago: u64 },
    /// The DER could not be decoded as X.509.
    Unknown,
}

/// Classify a DER certificate by how close it is to expiring at `now`.
pub fn check_cert_expiry(cert_der: &[u8], warn_days: u64, now: SystemTime) -> CertExpiry {
    let Ok((_, cert)) = x509_parser::parse_x509_certificate(cert_der) else {
        return CertExpiry::Unknown;
    };

    let not_after = cert.validity().not_after.timestamp();
    let now = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default();
    let remaining = not_after - now;

    if remaining < 0 {
        return CertExpiry::Expired {
            days_ago: remaining.unsigned_abs() / SECS_PER_DAY,
        };
    }

    let days_left = remaining as u64 / SECS_PER_DAY;
    if days_left <= warn_days {
        CertExpiry::ExpiringSoon { days_left }
    } else {
        CertExpiry::Valid { days_left }
    }
}

/// Log a warning for expired or soon-to-expire certificates. Never fails.
pub fn log_cert_expiry(cert_path: &Path, expiry: CertExpiry) {
    match expiry {
        CertExpiry::ExpiringSoon { days_left } => warn!(
            tls_cert_expiring_soon = true,
            cert_path = %cert_path.display(),
            days_until_expiry = days_left,
            "TLS client certificate is expiring soon. Consider rotating certificates."
        ),
        CertExpiry::Expired { days_ago } => warn!(
            tls_cert_expired = true,
            cert_path = %cert_path.display(),
            days_since_expiry = days_ago,
            "TLS client certificate has expired"
        ),
        CertExpiry::Unknown => warn!(
            tls_cert_expiry_check = "partial",
            cert_path = %cert_path.display(),
            "Could not decode certificate validity. Please verify expiry manually."
        ),
        CertExpiry::Valid { .. } => {}
    }
}

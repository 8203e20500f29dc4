//! Trust anchor collection.
//!
//! Corporate networks often intercept TLS, so the container has to trust the
//! same roots as the host. [`CertificateInstaller`] gathers certificates from
//! the host trust store (through the [`HostAdapter`]) and from a user
//! directory, normalises them to DER, de-duplicates them by SHA-256 and
//! renders the result into the host `certs/` directory that is mounted
//! read-only into the container.

use crate::host::HostAdapter;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rustls_pemfile::Item;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File extensions read from the user certificate directory.
pub const CERT_EXTENSIONS: &[&str] = &["pem", "crt", "cer", "der"];

/// Hex digits of the SHA-256 used in per-certificate file names.
const FINGERPRINT_PREFIX_LEN: usize = 16;

/// Where a certificate came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateSource {
    HostStore(String),
    UserDirectory(PathBuf),
}

impl std::fmt::Display for CertificateSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CertificateSource::HostStore(store) => write!(f, "host store {}", store),
            CertificateSource::UserDirectory(path) => write!(f, "{}", path.display()),
        }
    }
}

/// One DER-encoded trust anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub der: Vec<u8>,
    pub fingerprint: String,
    pub source: CertificateSource,
}

impl Certificate {
    pub fn new(der: Vec<u8>, source: CertificateSource) -> Self {
        let fingerprint = hex(&Sha256::digest(&der));
        Self {
            der,
            fingerprint,
            source,
        }
    }

    /// PEM encoding with 64-column lines.
    pub fn to_pem(&self) -> String {
        let encoded = STANDARD.encode(&self.der);
        let mut pem = String::with_capacity(encoded.len() + 64);
        pem.push_str("-----BEGIN CERTIFICATE-----\n");
        for chunk in encoded.as_bytes().chunks(64) {
            pem.push_str(&String::from_utf8_lossy(chunk));
            pem.push('\n');
        }
        pem.push_str("-----END CERTIFICATE-----\n");
        pem
    }

    pub fn file_name(&self) -> String {
        format!("{}.pem", &self.fingerprint[..FINGERPRINT_PREFIX_LEN])
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// A certificate input that could not be used. Logged and skipped.
#[derive(Debug, thiserror::Error)]
pub enum CertificateReadError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{source_name}: invalid PEM data: {reason}")]
    InvalidPem { source_name: String, reason: String },

    #[error("{source_name}: no certificate found")]
    Empty { source_name: String },

    #[error("{0}: not a DER-encoded certificate")]
    InvalidDer(PathBuf),
}

#[derive(Debug, thiserror::Error)]
pub enum CertificateInstallError {
    #[error("failed to write certificate bundle to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// De-duplicated set of trust anchors, in insertion order.
#[derive(Debug, Default)]
pub struct CertificateBundle {
    certificates: Vec<Certificate>,
    /// Inputs that were skipped
    pub skipped: Vec<CertificateReadError>,
    /// Set when the host store could not be enumerated
    pub host_store_error: Option<String>,
}

impl CertificateBundle {
    /// Add a certificate; returns false if one with the same fingerprint is present.
    pub fn insert(&mut self, certificate: Certificate) -> bool {
        if self
            .certificates
            .iter()
            .any(|c| c.fingerprint == certificate.fingerprint)
        {
            debug!("Duplicate certificate {} from {}", &certificate.fingerprint[..FINGERPRINT_PREFIX_LEN], certificate.source);
            return false;
        }
        self.certificates.push(certificate);
        true
    }

    fn absorb(&mut self, parsed: ParsedCertificates, source: impl Fn() -> CertificateSource) {
        for der in parsed.ders {
            self.insert(Certificate::new(der, source()));
        }
        for error in parsed.skipped {
            warn!("Skipping certificate input: {}", error);
            self.skipped.push(error);
        }
    }

    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// Hash over the sorted certificate fingerprints. Stable across runs
    /// as long as the set of trust anchors is unchanged.
    pub fn fingerprint(&self) -> String {
        let mut fingerprints: Vec<&str> = self
            .certificates
            .iter()
            .map(|c| c.fingerprint.as_str())
            .collect();
        fingerprints.sort_unstable();

        let mut hasher = Sha256::new();
        for fingerprint in fingerprints {
            hasher.update(fingerprint.as_bytes());
            hasher.update(b"\n");
        }
        hex(&hasher.finalize())[..FINGERPRINT_PREFIX_LEN].to_string()
    }

    /// Concatenated PEM of every certificate.
    pub fn to_pem(&self) -> String {
        self.certificates.iter().map(Certificate::to_pem).collect()
    }

    /// Write `ca-bundle.pem` and one `<fingerprint-prefix>.pem` per
    /// certificate into `dir`, removing `.pem` files left from earlier runs.
    ///
    /// # Errors
    ///
    /// Returns [`CertificateInstallError::Write`] if a file cannot be written.
    pub fn install(&self, dir: &Path) -> Result<PathBuf, CertificateInstallError> {
        let write_err = |path: &Path, source| CertificateInstallError::Write {
            path: path.to_path_buf(),
            source,
        };

        std::fs::create_dir_all(dir).map_err(|e| write_err(dir, e))?;

        let bundle_name = crate::env::host::CA_BUNDLE_FILE_NAME;
        let mut wanted: BTreeMap<String, String> = self
            .certificates
            .iter()
            .map(|c| (c.file_name(), c.to_pem()))
            .collect();
        wanted.insert(bundle_name.to_string(), self.to_pem());

        let entries = std::fs::read_dir(dir).map_err(|e| write_err(dir, e))?;
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if path.extension().is_some_and(|e| e == "pem") && !wanted.contains_key(&name) {
                match std::fs::remove_file(&path) {
                    Ok(()) => debug!("Removed stale certificate {:?}", path),
                    Err(e) => warn!("Could not remove stale certificate {:?}: {}", path, e),
                }
            }
        }

        for (name, pem) in &wanted {
            let path = dir.join(name);
            std::fs::write(&path, pem).map_err(|e| write_err(&path, e))?;
        }

        let bundle_path = dir.join(bundle_name);
        info!(
            "Installed {} certificate(s) into {:?}",
            self.certificates.len(),
            dir
        );
        Ok(bundle_path)
    }
}

/// Certificates read from one input, with the parts that were skipped.
#[derive(Debug, Default)]
pub struct ParsedCertificates {
    pub ders: Vec<Vec<u8>>,
    pub skipped: Vec<CertificateReadError>,
}

impl ParsedCertificates {
    fn failed(error: CertificateReadError) -> Self {
        Self {
            ders: Vec::new(),
            skipped: vec![error],
        }
    }
}

/// Parse every certificate in PEM text. A corrupt block is skipped on its
/// own; the other certificates of the same input are kept.
pub fn parse_pem(data: &[u8], source_name: &str) -> ParsedCertificates {
    let mut reader = Cursor::new(data);
    let mut parsed = ParsedCertificates::default();

    loop {
        let before = reader.position();
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(Item::X509Certificate(der))) => parsed.ders.push(der.to_vec()),
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(e) => {
                parsed.skipped.push(CertificateReadError::InvalidPem {
                    source_name: source_name.to_string(),
                    reason: e.to_string(),
                });
                if reader.position() == before {
                    break;
                }
            }
        }
    }

    if parsed.ders.is_empty() && parsed.skipped.is_empty() {
        parsed.skipped.push(CertificateReadError::Empty {
            source_name: source_name.to_string(),
        });
    }
    parsed
}

fn looks_like_pem(data: &[u8]) -> bool {
    data.windows(11).any(|w| w == b"-----BEGIN ")
}

/// Read one user certificate file. PEM files may hold several certificates;
/// anything else is treated as a single DER certificate.
pub fn read_certificate_file(path: &Path) -> ParsedCertificates {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(source) => {
            return ParsedCertificates::failed(CertificateReadError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    if looks_like_pem(&data) {
        return parse_pem(&data, &path.display().to_string());
    }

    // A DER certificate is an ASN.1 SEQUENCE.
    if data.len() < 2 || data[0] != 0x30 {
        return ParsedCertificates::failed(CertificateReadError::InvalidDer(path.to_path_buf()));
    }
    ParsedCertificates {
        ders: vec![data],
        skipped: Vec::new(),
    }
}

/// Builds a [`CertificateBundle`] from the host store and a user directory.
pub struct CertificateInstaller<'a> {
    host: &'a dyn HostAdapter,
}

impl<'a> CertificateInstaller<'a> {
    pub fn new(host: &'a dyn HostAdapter) -> Self {
        Self { host }
    }

    /// Collect trust anchors. Individual failures are recorded in the bundle
    /// and never abort collection.
    pub async fn collect(&self, include_host_store: bool, user_cert_dir: Option<&Path>) -> CertificateBundle {
        let mut bundle = CertificateBundle::default();

        if include_host_store {
            match self.host.trust_store().await {
                Ok(exports) => {
                    for export in exports {
                        let parsed = parse_pem(&export.pem, &export.origin);
                        debug!("{} certificate(s) from {}", parsed.ders.len(), export.origin);
                        bundle.absorb(parsed, || CertificateSource::HostStore(export.origin.clone()));
                    }
                }
                Err(e) => {
                    warn!("Host trust store unavailable, continuing without it: {}", e);
                    bundle.host_store_error = Some(e.to_string());
                }
            }
        } else {
            debug!("Host trust store collection disabled");
        }

        if let Some(dir) = user_cert_dir {
            self.collect_directory(dir, &mut bundle);
        }

        info!("Collected {} unique certificate(s)", bundle.len());
        bundle
    }

    fn collect_directory(&self, dir: &Path, bundle: &mut CertificateBundle) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(source) => {
                let err = CertificateReadError::Io {
                    path: dir.to_path_buf(),
                    source,
                };
                warn!("Skipping certificate directory: {}", err);
                bundle.skipped.push(err);
                return;
            }
        };

        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| CERT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            })
            .collect();
        files.sort();

        for path in files {
            let parsed = read_certificate_file(&path);
            bundle.absorb(parsed, || CertificateSource::UserDirectory(path.clone()));
        }
    }
}

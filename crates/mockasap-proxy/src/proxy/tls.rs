//! TLS for intercepted CONNECT tunnels and for upstream connections.
//!
//! `CertificateAuthority` issues a leaf certificate per intercepted host,
//! signed by either a CA loaded from PEM files or one generated at startup.
//! Clients must trust [`CertificateAuthority::certificate_pem`] for
//! interception to be transparent.

use parking_lot::Mutex;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, ServerConfig};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Failures while preparing certificates for interception.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificate found in {}", .0.display())]
    MissingCertificate(PathBuf),

    #[error("certificate generation failed: {0}")]
    Generation(#[from] rcgen::Error),

    #[error("TLS configuration failed: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Certificate authority for on-the-fly leaf certificates.
pub struct CertificateAuthority {
    issuer: Issuer<'static, KeyPair>,
    cert_der: CertificateDer<'static>,
    cert_pem: String,
    leaf_cache: Mutex<HashMap<String, Arc<ServerConfig>>>,
}

impl CertificateAuthority {
    /// Generate a throwaway CA for this process.
    pub fn generate() -> Result<Self, TlsError> {
        let key = KeyPair::generate()?;
        let params = ca_params();
        let cert = params.self_signed(&key)?;
        info!("Generated ephemeral interception CA");

        Ok(Self {
            cert_pem: cert.pem(),
            cert_der: cert.der().clone(),
            issuer: Issuer::new(params, key),
            leaf_cache: Mutex::new(HashMap::new()),
        })
    }

    /// Load a CA certificate and private key from PEM files.
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self, TlsError> {
        let cert_pem = read_file(cert_path)?;
        let key_pem = read_file(key_path)?;

        let cert_der = rustls_pemfile::certs(&mut cert_pem.as_bytes())
            .next()
            .ok_or_else(|| TlsError::MissingCertificate(cert_path.to_path_buf()))?
            .map_err(|source| TlsError::Read {
                path: cert_path.to_path_buf(),
                source,
            })?;
        let key = KeyPair::from_pem(&key_pem)?;
        let issuer = Issuer::from_ca_cert_der(&cert_der, key)?;
        info!("Loaded interception CA from {}", cert_path.display());

        Ok(Self {
            issuer,
            cert_der,
            cert_pem,
            leaf_cache: Mutex::new(HashMap::new()),
        })
    }

    /// The CA certificate clients should trust.
    pub fn certificate_pem(&self) -> &str {
        &self.cert_pem
    }

    /// Server config presenting a certificate for `host`, cached per host.
    pub fn server_config_for(&self, host: &str) -> Result<Arc<ServerConfig>, TlsError> {
        let host = normalize_host(host);
        let mut cache = self.leaf_cache.lock();
        if let Some(config) = cache.get(&host) {
            return Ok(Arc::clone(config));
        }

        let config = self.issue_leaf(&host)?;
        cache.insert(host, Arc::clone(&config));
        Ok(config)
    }

    fn issue_leaf(&self, host: &str) -> Result<Arc<ServerConfig>, TlsError> {
        let params = leaf_params(host)?;
        let key = KeyPair::generate()?;
        let key_der = PrivatePkcs8KeyDer::from(key.serialize_der());
        let cert = params.signed_by(&key, &self.issuer)?;
        debug!("Issued leaf certificate for {}", host);

        let chain = vec![cert.der().clone(), self.cert_der.clone()];
        let mut config =
            ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
                .with_safe_default_protocol_versions()?
                .with_no_client_auth()
                .with_single_cert(chain, PrivateKeyDer::from(key_der))?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        Ok(Arc::new(config))
    }
}

fn read_file(path: &Path) -> Result<String, TlsError> {
    std::fs::read_to_string(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn ca_params() -> CertificateParams {
    let mut params = CertificateParams::default();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
    ];
    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, "mockasap interception CA");
    name.push(DnType::OrganizationName, "mockasap");
    params.distinguished_name = name;
    params
}

fn leaf_params(host: &str) -> Result<CertificateParams, TlsError> {
    let mut params = CertificateParams::new(Vec::<String>::new())?;
    params.use_authority_key_identifier_extension = true;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, host);
    params.distinguished_name = name;

    match host.parse::<IpAddr>() {
        Ok(ip) => params.subject_alt_names.push(SanType::IpAddress(ip)),
        Err(_) => params
            .subject_alt_names
            .push(SanType::DnsName(host.try_into()?)),
    }
    Ok(params)
}

fn normalize_host(host: &str) -> String {
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .to_ascii_lowercase()
}

/// No-op certificate verifier for development/testing with self-signed certificates.
///
/// # Warning
/// This disables all TLS security checks - use only in development!
#[derive(Debug)]
pub struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::RSA_PSS_SHA256,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_verifier_supported_schemes() {
        let verifier = NoVerifier;
        let schemes = verifier.supported_verify_schemes();
        assert!(schemes.contains(&rustls::SignatureScheme::RSA_PKCS1_SHA256));
        assert!(schemes.contains(&rustls::SignatureScheme::ECDSA_NISTP256_SHA256));
    }

    #[test]
    fn test_generated_ca_pem() {
        let ca = CertificateAuthority::generate().unwrap();
        assert!(ca.certificate_pem().starts_with("-----BEGIN CERTIFICATE-----"));
    }

    #[test]
    fn test_leaf_configs_are_cached_per_host() {
        let ca = CertificateAuthority::generate().unwrap();
        let first = ca.server_config_for("api.example.com").unwrap();
        let again = ca.server_config_for("API.example.com").unwrap();
        let other = ca.server_config_for("127.0.0.1").unwrap();

        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(first.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn test_load_ca_from_pem_files() {
        let key = KeyPair::generate().unwrap();
        let cert = ca_params().self_signed(&key).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("ca.pem");
        let key_path = dir.path().join("ca.key");
        std::fs::write(&cert_path, cert.pem()).unwrap();
        std::fs::write(&key_path, key.serialize_pem()).unwrap();

        let ca = CertificateAuthority::from_pem_files(&cert_path, &key_path).unwrap();
        assert_eq!(ca.certificate_pem(), cert.pem());
        ca.server_config_for("localhost").unwrap();
    }

    #[test]
    fn test_load_ca_missing_files() {
        let result = CertificateAuthority::from_pem_files(
            Path::new("/nonexistent/ca.pem"),
            Path::new("/nonexistent/ca.key"),
        );
        assert!(matches!(result, Err(TlsError::Read { .. })));
    }

    #[test]
    fn test_load_ca_without_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("ca.pem");
        let key_path = dir.path().join("ca.key");
        std::fs::write(&cert_path, "not a certificate").unwrap();
        std::fs::write(&key_path, KeyPair::generate().unwrap().serialize_pem()).unwrap();

        let result = CertificateAuthority::from_pem_files(&cert_path, &key_path);
        assert!(matches!(result, Err(TlsError::MissingCertificate(_))));
    }
}

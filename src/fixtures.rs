//! Fixture material for a test run: the proxy's subject token and the TLS
//! material of the discovery server.
//!
//! Fixtures are read from files when configured, otherwise generated per run.
//! Generated TLS material is a throw-away CA plus a `localhost` server
//! certificate signed by it; the CA certificate is what the proxy trusts.

use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rcgen::{
    BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, KeyUsagePurpose, SanType,
};
use serde_json::json;

use crate::config::FixtureConfig;
use crate::credentials::CredentialArtifacts;
use crate::errors::FixtureError;

/// PEM-encoded TLS material for the discovery server
#[derive(Clone)]
pub struct TlsMaterial {
    /// CA certificate that signed the server certificate
    pub ca_cert_pem: String,
    /// Server certificate chain
    pub server_cert_pem: String,
    /// Server private key
    pub server_key_pem: String,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca_cert_pem", &format_args!("{} bytes", self.ca_cert_pem.len()))
            .field("server_cert_pem", &format_args!("{} bytes", self.server_cert_pem.len()))
            .field("server_key_pem", &"<redacted>")
            .finish()
    }
}

impl TlsMaterial {
    /// Generate a CA and a server certificate for `localhost` / `127.0.0.1`
    pub fn generate() -> Result<Self, FixtureError> {
        let ca_key = KeyPair::generate()?;
        let mut ca_params = CertificateParams::new(Vec::<String>::new())?;
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.distinguished_name.push(DnType::CommonName, "STS Flow Test CA");
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let ca_cert = ca_params.self_signed(&ca_key)?;

        let server_key = KeyPair::generate()?;
        let mut server_params = CertificateParams::new(vec!["localhost".to_string()])?;
        server_params.distinguished_name.push(DnType::CommonName, "localhost");
        server_params.subject_alt_names.push(SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        let server_cert = server_params.signed_by(&server_key, &ca_cert, &ca_key)?;

        Ok(Self {
            ca_cert_pem: ca_cert.pem(),
            server_cert_pem: server_cert.pem(),
            server_key_pem: server_key.serialize_pem(),
        })
    }

    /// Load TLS material from PEM files
    pub fn load(
        server_cert: impl AsRef<Path>,
        server_key: impl AsRef<Path>,
        ca_cert: impl AsRef<Path>,
    ) -> Result<Self, FixtureError> {
        Ok(Self {
            ca_cert_pem: read_fixture(ca_cert)?,
            server_cert_pem: read_fixture(server_cert)?,
            server_key_pem: read_fixture(server_key)?,
        })
    }
}

/// All fixture inputs of a test run
#[derive(Debug, Clone)]
pub struct Fixtures {
    /// Token the proxy presents to the STS server
    pub subject_token: String,
    pub tls: TlsMaterial,
}

impl Fixtures {
    /// Resolve fixtures from configuration, generating whatever is not configured
    pub fn resolve(config: &FixtureConfig, trust_domain: &str) -> Result<Self, FixtureError> {
        let subject_token = match &config.subject_token_path {
            Some(path) => read_fixture(path)?,
            None => subject_token(trust_domain),
        };

        let tls = match (&config.server_cert_path, &config.server_key_path, &config.ca_cert_path) {
            (Some(cert), Some(key), Some(ca)) => TlsMaterial::load(cert, key, ca)?,
            (None, None, None) => TlsMaterial::generate()?,
            _ => return Err(FixtureError::IncompleteTls),
        };

        Ok(Self { subject_token, tls })
    }

    /// The artifacts written to disk for the proxy
    pub fn credential_artifacts(&self) -> CredentialArtifacts {
        CredentialArtifacts::new(self.subject_token.clone(), self.tls.ca_cert_pem.clone())
    }
}

/// Build a JWT-shaped subject token for a trust domain.
///
/// The signature segment is random; nothing in the flow verifies it, the token
/// only has to match between the proxy, the prober and the mock backend.
pub fn subject_token(trust_domain: &str) -> String {
    let header = json!({ "alg": "RS256", "typ": "JWT" });
    let claims = json!({
        "iss": format!("https://{trust_domain}"),
        "sub": format!("system:serviceaccount:default:sts-flow-{}", uuid::Uuid::new_v4()),
        "aud": [trust_domain],
        "iat": chrono::Utc::now().timestamp(),
    });
    let signature = uuid::Uuid::new_v4();

    format!(
        "{}.{}.{}",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(claims.to_string()),
        URL_SAFE_NO_PAD.encode(signature.as_bytes()),
    )
}

fn read_fixture(path: impl AsRef<Path>) -> Result<String, FixtureError> {
    let path = path.as_ref();
    fs::read_to_string(path).map_err(|source| FixtureError::Read { path: path.to_path_buf(), source })
}

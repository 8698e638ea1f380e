//! TLS support for TCPS connections.
//!
//! Covers server certificate verification, client certificates for mutual
//! TLS, Oracle wallet (PEM) loading, and SNI. The server can also demand a
//! renegotiation after the first hello by setting the TLS_RENEG flag on its
//! ACCEPT packet; the transport then runs a second handshake on top of the
//! established session.

use std::fs;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use rustls_pemfile::{certs, private_key};

use crate::error::{Error, Result};

/// TLS parameters for a TCPS address.
#[derive(Debug, Clone, Default)]
pub struct TlsParams {
    /// Server name for SNI when it differs from the connection host
    pub server_name: Option<String>,
    /// CA certificate file (PEM)
    pub ca_cert_path: Option<String>,
    /// Client certificate file (PEM) for mutual TLS
    pub client_cert_path: Option<String>,
    /// Client private key file (PEM)
    pub client_key_path: Option<String>,
    /// Oracle wallet directory containing `ewallet.pem`
    pub wallet_path: Option<String>,
    /// Wallet password for encrypted keys
    pub wallet_password: Option<String>,
}

impl TlsParams {
    /// Parameters trusting the system root store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a CA certificate file.
    pub fn with_ca_cert(mut self, path: impl Into<String>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    /// Use a client certificate and key for mutual TLS.
    pub fn with_client_cert(
        mut self,
        cert_path: impl Into<String>,
        key_path: impl Into<String>,
    ) -> Self {
        self.client_cert_path = Some(cert_path.into());
        self.client_key_path = Some(key_path.into());
        self
    }

    /// Use an Oracle wallet directory.
    pub fn with_wallet(mut self, path: impl Into<String>, password: Option<String>) -> Self {
        self.wallet_path = Some(path.into());
        self.wallet_password = password;
        self
    }

    /// Override the SNI server name.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Build a rustls client configuration from these parameters.
    pub fn build_client_config(&self) -> Result<ClientConfig> {
        let mut roots = RootCertStore::empty();

        if let Some(path) = &self.ca_cert_path {
            for cert in load_certs(path)? {
                roots
                    .add(cert)
                    .map_err(|e| Error::Tls(format!("bad CA certificate: {e}")))?;
            }
        } else if let Some(wallet) = &self.wallet_path {
            for cert in load_certs(&wallet_pem_path(wallet))? {
                roots
                    .add(cert)
                    .map_err(|e| Error::Tls(format!("bad wallet certificate: {e}")))?;
            }
        } else {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }

        let builder = ClientConfig::builder().with_root_certificates(roots);

        let config = if let (Some(cert_path), Some(key_path)) =
            (&self.client_cert_path, &self.client_key_path)
        {
            let chain = load_certs(cert_path)?;
            let key = load_key(key_path)?;
            builder
                .with_client_auth_cert(chain, key)
                .map_err(|e| Error::Tls(format!("client auth setup failed: {e}")))?
        } else if let Some(wallet) = &self.wallet_path {
            let pem = wallet_pem_path(wallet);
            match (
                load_certs(&pem),
                load_key_with_password(&pem, self.wallet_password.as_deref()),
            ) {
                (Ok(chain), Ok(key)) if !chain.is_empty() => builder
                    .with_client_auth_cert(chain, key)
                    .map_err(|e| Error::Tls(format!("wallet client auth failed: {e}")))?,
                _ => builder.with_no_client_auth(),
            }
        } else {
            builder.with_no_client_auth()
        };

        Ok(config)
    }

    /// The SNI name to present for the given connection host.
    pub fn sni_name(&self, host: &str) -> Result<ServerName<'static>> {
        let name = self.server_name.as_deref().unwrap_or(host);
        ServerName::try_from(name.to_string())
            .map_err(|_| Error::Tls(format!("invalid server name {name:?}")))
    }

    /// An Arc'd connector config, built once per handshake.
    pub fn connector_config(&self) -> Result<Arc<ClientConfig>> {
        Ok(Arc::new(self.build_client_config()?))
    }
}

fn wallet_pem_path(wallet_dir: &str) -> String {
    Path::new(wallet_dir)
        .join("ewallet.pem")
        .to_string_lossy()
        .into_owned()
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let file = fs::File::open(path)
        .map_err(|e| Error::Tls(format!("cannot open certificate file {path}: {e}")))?;
    let mut reader = BufReader::new(file);
    certs(&mut reader)
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| Error::Tls(format!("cannot parse certificates in {path}: {e}")))
}

fn load_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    load_key_with_password(path, None)
}

fn load_key_with_password(path: &str, password: Option<&str>) -> Result<PrivateKeyDer<'static>> {
    let file = fs::File::open(path)
        .map_err(|e| Error::Tls(format!("cannot open key file {path}: {e}")))?;
    let mut reader = BufReader::new(file);
    if let Ok(Some(key)) = private_key(&mut reader) {
        return Ok(key);
    }
    // Wallet keys are commonly PKCS#8-encrypted with the wallet password.
    let password = password
        .ok_or_else(|| Error::Tls(format!("no readable private key in {path}")))?;
    let pem = fs::read_to_string(path)
        .map_err(|e| Error::Tls(format!("cannot read key file {path}: {e}")))?;
    let (_, document) = pkcs8::SecretDocument::from_pem(&pem)
        .map_err(|e| Error::Tls(format!("cannot parse encrypted key in {path}: {e}")))?;
    let encrypted = pkcs8::EncryptedPrivateKeyInfo::try_from(document.as_bytes())
        .map_err(|e| Error::Tls(format!("cannot parse encrypted key in {path}: {e}")))?;
    let decrypted = encrypted
        .decrypt(password)
        .map_err(|e| Error::Tls(format!("wallet key decryption failed: {e}")))?;
    let key = rustls::pki_types::PrivatePkcs8KeyDer::from(decrypted.as_bytes().to_vec());
    Ok(PrivateKeyDer::Pkcs8(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_builds() {
        let params = TlsParams::new();
        assert!(params.build_client_config().is_ok());
    }

    #[test]
    fn sni_prefers_override() {
        let params = TlsParams::new().with_server_name("db.internal");
        let name = params.sni_name("10.0.0.5").unwrap();
        assert!(matches!(name, ServerName::DnsName(ref n) if n.as_ref() == "db.internal"));
    }

    #[test]
    fn sni_falls_back_to_host() {
        let params = TlsParams::new();
        assert!(params.sni_name("db.example.com").is_ok());
    }

    #[test]
    fn missing_ca_file_is_an_error() {
        let params = TlsParams::new().with_ca_cert("/nonexistent/ca.pem");
        assert!(matches!(params.build_client_config(), Err(Error::Tls(_))));
    }
}

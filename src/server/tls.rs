//! TLS acceptor construction from PEM files.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::server::WebPkiClientVerifier;
use tokio_rustls::rustls::{self, RootCertStore};
use tokio_rustls::TlsAcceptor;

use crate::config::{ClientAuth, TlsConfig, TlsVersion};

/// Build a TLS acceptor for the listener. Fatal on any load error: a
/// misconfigured listener must not start.
pub fn build_tls_acceptor(config: &TlsConfig) -> Result<TlsAcceptor> {
    let certs = load_certs(&config.cert)?;
    let key = load_key(&config.key)?;

    let versions: &[&rustls::SupportedProtocolVersion] = match config.min_version {
        TlsVersion::Tls12 => &[&rustls::version::TLS13, &rustls::version::TLS12],
        TlsVersion::Tls13 => &[&rustls::version::TLS13],
    };
    let builder = rustls::ServerConfig::builder_with_protocol_versions(versions);

    let server_config = match config.client_auth {
        ClientAuth::NoClientCert => builder
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .context("invalid certificate/key pair")?,
        mode => {
            let ca_path = config
                .ca
                .as_ref()
                .ok_or_else(|| anyhow!("client auth {mode:?} requires a CA bundle"))?;
            let roots = load_roots(ca_path)?;
            let verifier_builder = WebPkiClientVerifier::builder(Arc::new(roots));

            let verifier = match mode {
                ClientAuth::RequestClientCert | ClientAuth::VerifyClientCertIfGiven => {
                    verifier_builder
                        .allow_unauthenticated()
                        .build()
                        .context("failed to build client verifier")?
                }
                _ => verifier_builder
                    .build()
                    .context("failed to build client verifier")?,
            };

            builder
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)
                .context("invalid certificate/key pair")?
        }
    };

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open certificate file: {}", path.display()))?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::result::Result<_, _>>()
        .with_context(|| format!("failed to parse certificates: {}", path.display()))?;
    if certs.is_empty() {
        anyhow::bail!("no certificates found in {}", path.display());
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open key file: {}", path.display()))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .with_context(|| format!("failed to parse private key: {}", path.display()))?
        .ok_or_else(|| anyhow!("no private key found in {}", path.display()))
}

fn load_roots(path: &Path) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots
            .add(cert)
            .with_context(|| format!("invalid CA certificate in {}", path.display()))?;
    }
    Ok(roots)
}

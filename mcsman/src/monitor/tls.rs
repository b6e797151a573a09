//! Optional TLS listener exposing a narrowed command set beyond the host.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::CommandMonitor;
use crate::config::TlsConfig;

/// Serves remote command connections over TLS until cancelled.
pub async fn run_remote(
    monitor: Arc<CommandMonitor>,
    tls: &TlsConfig,
    token: CancellationToken,
) -> Result<()> {
    let acceptor = build_acceptor(&tls.cert, &tls.key)?;
    let listener = TcpListener::bind(("0.0.0.0", tls.port))
        .await
        .with_context(|| format!("listening for TLS on port {}", tls.port))?;
    info!(port = tls.port, "TLS command monitor listening");

    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(error = %err, "failed to accept TLS connection");
                        continue;
                    }
                };
                let monitor = Arc::clone(&monitor);
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    match acceptor.accept(stream).await {
                        Ok(tls_stream) => monitor.handle_connection(tls_stream, true).await,
                        Err(err) => warn!(%peer, error = %err, "TLS handshake failed"),
                    }
                });
            }
        }
    }
}

fn build_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("building TLS server config")?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("opening certificate {}", path.display()))?,
    );
    let certs: Vec<CertificateDer> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<_, _>>()
        .with_context(|| format!("parsing certificate {}", path.display()))?;
    if certs.is_empty() {
        bail!("no certificates found in {}", path.display());
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("opening key {}", path.display()))?,
    );
    rustls_pemfile::private_key(&mut reader)
        .with_context(|| format!("parsing key {}", path.display()))?
        .ok_or_else(|| anyhow::anyhow!("no private key found in {}", path.display()))
}

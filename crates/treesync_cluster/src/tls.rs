//! Optional TLS for the IPC channel.

use crate::config::TlsConfig;
use crate::error::{IpcError, IpcResult};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio_rustls::rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// A bidirectional byte stream the IPC channel can run over.
pub trait IpcStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> IpcStream for T {}

/// Plain TCP or TLS stream.
pub type BoxedStream = Box<dyn IpcStream>;

/// Builds the master's TLS acceptor.
pub(crate) fn acceptor(config: &TlsConfig) -> IpcResult<TlsAcceptor> {
    let cert_path = config
        .cert_path
        .as_deref()
        .ok_or_else(|| IpcError::Config("TLS certificate path is required".into()))?;
    let key_path = config
        .key_path
        .as_deref()
        .ok_or_else(|| IpcError::Config("TLS key path is required".into()))?;

    let server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(load_certs(cert_path)?, load_key(key_path)?)
        .map_err(|e| IpcError::Tls(e.to_string()))?;
    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

/// Builds a worker's TLS connector.
pub(crate) fn connector(config: &TlsConfig) -> IpcResult<TlsConnector> {
    let ca_path = config
        .ca_path
        .as_deref()
        .ok_or_else(|| IpcError::Config("TLS CA path is required".into()))?;

    let mut roots = RootCertStore::empty();
    for cert in load_certs(ca_path)? {
        roots.add(cert).map_err(|e| IpcError::Tls(e.to_string()))?;
    }

    let client_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(client_config)))
}

/// Resolves the name the master's certificate is verified against.
pub(crate) fn server_name(config: &TlsConfig, host: &str) -> IpcResult<ServerName<'static>> {
    let name = config.server_name.clone().unwrap_or_else(|| host.to_string());
    ServerName::try_from(name).map_err(|e| IpcError::Tls(e.to_string()))
}

fn load_certs(path: &Path) -> IpcResult<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| IpcError::Tls(format!("cannot open {}: {}", path.display(), e)))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| IpcError::Tls(e.to_string()))?;
    if certs.is_empty() {
        return Err(IpcError::Tls(format!(
            "no certificates in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> IpcResult<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| IpcError::Tls(format!("cannot open {}: {}", path.display(), e)))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| IpcError::Tls(e.to_string()))?
        .ok_or_else(|| IpcError::Tls(format!("no private key in {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acceptor_requires_cert_and_key() {
        assert!(matches!(
            acceptor(&TlsConfig::default()),
            Err(IpcError::Config(_))
        ));
    }

    #[test]
    fn connector_requires_ca() {
        assert!(matches!(
            connector(&TlsConfig::default()),
            Err(IpcError::Config(_))
        ));
    }

    #[test]
    fn missing_files_are_tls_errors() {
        let config = TlsConfig::client("/definitely/not/here.pem");
        assert!(matches!(connector(&config), Err(IpcError::Tls(_))));
    }

    #[test]
    fn server_name_defaults_to_host() {
        let name = server_name(&TlsConfig::default(), "master.internal").unwrap();
        assert!(matches!(name, ServerName::DnsName(dns) if dns.as_ref() == "master.internal"));

        let name = server_name(
            &TlsConfig::default().with_server_name("ipc.example.com"),
            "10.0.0.1",
        )
        .unwrap();
        assert!(matches!(name, ServerName::DnsName(dns) if dns.as_ref() == "ipc.example.com"));
    }
}

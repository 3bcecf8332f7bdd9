//! TLS material loading.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use tokio_rustls::rustls::ServerConfig;

use crate::modules::tcp_router::TlsFilesConfig;

use super::error::{ConfigError, ConfigResult};

/// Assemble a rustls server configuration from PEM files.
///
/// # Errors
///
/// I/O errors naming the file, or a [`ConfigError::Tls`] when the
/// material is empty or inconsistent.
pub fn load_server_config(files: &TlsFilesConfig) -> ConfigResult<Arc<ServerConfig>> {
    let mut cert_reader = BufReader::new(open(&files.cert_file)?);
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConfigError::Io {
            path: files.cert_file.clone(),
            source: e,
        })?;
    if certs.is_empty() {
        return Err(ConfigError::Tls {
            message: format!("no certificates found in {}", files.cert_file),
        });
    }

    let mut key_reader = BufReader::new(open(&files.key_file)?);
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| ConfigError::Io {
            path: files.key_file.clone(),
            source: e,
        })?
        .ok_or_else(|| ConfigError::Tls {
            message: format!("no private key found in {}", files.key_file),
        })?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ConfigError::Tls {
            message: e.to_string(),
        })?;

    Ok(Arc::new(config))
}

fn open(path: &str) -> ConfigResult<File> {
    File::open(path).map_err(|e| ConfigError::Io {
        path: path.to_string(),
        source: e,
    })
}

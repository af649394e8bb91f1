//! Certificate bootstrap for the HTTPS listener.

use std::path::{Path, PathBuf};

use {
    anyhow::Context,
    axum_server::tls_rustls::RustlsConfig,
    tracing::{debug, info},
};

use swarm_config::TlsConfig;

/// Files smaller than this are treated as missing.
const MIN_PEM_BYTES: u64 = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Configured paths, defaulting to `<data_dir>/certification/{cert,key}.pem`.
pub fn resolve_paths(config: &TlsConfig, data_dir: &Path) -> CertPaths {
    let dir = data_dir.join("certification");
    CertPaths {
        cert: config
            .cert_path
            .as_ref()
            .map_or_else(|| dir.join("cert.pem"), PathBuf::from),
        key: config
            .key_path
            .as_ref()
            .map_or_else(|| dir.join("key.pem"), PathBuf::from),
    }
}

fn usable(path: &Path) -> bool {
    std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.len() >= MIN_PEM_BYTES)
}

/// Generate a self-signed certificate unless a usable pair already exists.
/// Returns `true` when new files were written.
pub fn ensure_certificate(paths: &CertPaths) -> anyhow::Result<bool> {
    if usable(&paths.cert) && usable(&paths.key) {
        debug!(cert = %paths.cert.display(), "using existing certificate");
        return Ok(false);
    }

    let certified = rcgen::generate_simple_self_signed(vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
    ])
    .context("failed to generate self-signed certificate")?;

    for path in [&paths.cert, &paths.key] {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    std::fs::write(&paths.cert, certified.cert.pem())
        .with_context(|| format!("failed to write {}", paths.cert.display()))?;
    std::fs::write(&paths.key, certified.key_pair.serialize_pem())
        .with_context(|| format!("failed to write {}", paths.key.display()))?;

    info!(cert = %paths.cert.display(), "generated self-signed certificate");
    Ok(true)
}

pub async fn rustls_config(paths: &CertPaths) -> anyhow::Result<RustlsConfig> {
    // Already installed is fine.
    let _ = rustls::crypto::ring::default_provider().install_default();
    RustlsConfig::from_pem_file(&paths.cert, &paths.key)
        .await
        .with_context(|| format!("failed to load certificate {}", paths.cert.display()))
}

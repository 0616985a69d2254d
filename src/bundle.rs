use anyhow::Context;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::{write::GzEncoder, Compression};
use std::path::Path;

/// Packages the benchmark driver directory into a gzipped tarball and returns
/// it base64-encoded, ready to embed in a bootstrap script. The instance
/// decodes and installs it without needing access to the launching machine.
pub fn package_driver(dir: &Path) -> anyhow::Result<String> {
    let encoder = GzEncoder::new(vec![], Compression::default());
    let mut archive = tar::Builder::new(encoder);
    archive
        .append_dir_all("driver", dir)
        .with_context(|| format!("Failed to package driver directory {}", dir.display()))?;
    let bytes = archive
        .into_inner()
        .context("Failed to finish driver archive")?
        .finish()
        .context("Failed to compress driver archive")?;

    Ok(STANDARD.encode(bytes))
}

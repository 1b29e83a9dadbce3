//! Release artifact download and extraction
//!
//! Archives are fetched into memory through the [`Host`], unpacked there,
//! and the wanted entries are written to their final paths. Writes are
//! staged by the host and renamed into place.
//!
//! No checksum or signature is verified. The SHA-256 of every downloaded
//! archive is logged so it can be compared against the vendor's published
//! sums by hand.

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use tracing::info;
use zip::ZipArchive;

use crate::error::FetchError;
use crate::host::Host;

/// Executable mode for installed binaries
pub const BINARY_MODE: u32 = 0o755;

/// Debian-style architecture name used in release URLs
pub fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "arm" => "arm",
        "x86" => "386",
        other => other,
    }
}

/// Substitute `{version}` and `{arch}` into a URL template
pub fn resolve_url(template: &str, version: &str, arch: &str) -> String {
    template
        .replace("{version}", version)
        .replace("{arch}", arch)
}

/// Extract a single regular file from a zip archive.
///
/// The entry matches if its path equals `name` or ends with `/name`.
pub fn extract_zip_entry(archive: &[u8], name: &str) -> Result<Vec<u8>, FetchError> {
    let extract_error = |reason: String| FetchError::ExtractError {
        entry: name.to_string(),
        reason,
    };

    let mut zip = ZipArchive::new(Cursor::new(archive)).map_err(|e| extract_error(e.to_string()))?;
    let suffix = format!("/{name}");

    for i in 0..zip.len() {
        let mut file = zip.by_index(i).map_err(|e| extract_error(e.to_string()))?;
        if !file.is_file() {
            continue;
        }
        if file.name() == name || file.name().ends_with(&suffix) {
            // The declared size is untrusted, let the buffer grow with the data
            let mut contents = Vec::new();
            file.read_to_end(&mut contents)
                .map_err(|e| extract_error(e.to_string()))?;
            return Ok(contents);
        }
    }

    Err(extract_error("entry not found in archive".into()))
}

/// A regular file unpacked from a tarball
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarFile {
    /// File name without leading directories
    pub name: String,
    pub mode: u32,
    pub contents: Vec<u8>,
}

/// Unpack every regular file of a `.tar.gz` archive, flattening directories
pub fn extract_tar_gz(archive: &[u8]) -> Result<Vec<TarFile>, FetchError> {
    let extract_error = |reason: String| FetchError::ExtractError {
        entry: "*".into(),
        reason,
    };

    let mut tar = tar::Archive::new(GzDecoder::new(Cursor::new(archive)));
    let mut files = vec![];

    for entry in tar.entries().map_err(|e| extract_error(e.to_string()))? {
        let mut entry = entry.map_err(|e| extract_error(e.to_string()))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path().map_err(|e| extract_error(e.to_string()))?;
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
            continue;
        };
        let mode = entry.header().mode().unwrap_or(0o644) & 0o7777;
        let mut contents = vec![];
        entry
            .read_to_end(&mut contents)
            .map_err(|e| extract_error(e.to_string()))?;
        files.push(TarFile {
            name,
            mode,
            contents,
        });
    }

    if files.is_empty() {
        return Err(extract_error("archive contains no files".into()));
    }
    Ok(files)
}

/// Hex SHA-256 of a byte slice
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Downloads release archives and installs what they contain
pub struct ArtifactFetcher<'h> {
    host: &'h dyn Host,
    arch: String,
}

impl<'h> ArtifactFetcher<'h> {
    /// Fetcher for the architecture of the running machine
    pub fn new(host: &'h dyn Host) -> Self {
        Self {
            host,
            arch: host_arch().to_string(),
        }
    }

    /// Override the architecture substituted into URLs
    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let bytes = self
            .host
            .download(url)
            .map_err(|e| FetchError::NetworkError {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        info!(
            url,
            bytes = bytes.len(),
            sha256 = %sha256_hex(&bytes),
            "downloaded archive (checksum not verified)"
        );
        Ok(bytes)
    }

    /// Download the zip release for `version` and install the entry named
    /// like `dest`'s file name at `dest`, executable.
    pub fn fetch(
        &self,
        version: &str,
        url_template: &str,
        dest: &Path,
    ) -> Result<PathBuf, FetchError> {
        let entry = dest
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| FetchError::ExtractError {
                entry: dest.display().to_string(),
                reason: "destination has no file name".into(),
            })?;

        let url = resolve_url(url_template, version, &self.arch);
        let archive = self.download(&url)?;
        let binary = extract_zip_entry(&archive, entry)?;

        self.host.write_file(dest, &binary, BINARY_MODE)?;
        info!(path = %dest.display(), version, "installed binary");
        Ok(dest.to_path_buf())
    }

    /// Download a `.tar.gz` bundle for `version` and install every file it
    /// contains into `dest_dir`, keeping the archive's modes.
    pub fn fetch_tree(
        &self,
        version: &str,
        url_template: &str,
        dest_dir: &Path,
    ) -> Result<Vec<PathBuf>, FetchError> {
        let url = resolve_url(url_template, version, &self.arch);
        let archive = self.download(&url)?;

        let mut installed = vec![];
        for file in extract_tar_gz(&archive)? {
            let path = dest_dir.join(&file.name);
            self.host.write_file(&path, &file.contents, file.mode)?;
            installed.push(path);
        }
        info!(dir = %dest_dir.display(), count = installed.len(), version, "installed bundle");
        Ok(installed)
    }
}

//! On-disk cache for remote file content.
//!
//! Layout: `<root>/<url-hash>/<basename>`. A cached file is reused without
//! any freshness check. Downloads stream into a uniquely named `.tmp` sibling
//! that is renamed into place on success and deleted on every other exit,
//! including a dropped future.

use std::cell::RefCell;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use futures::StreamExt;
use sha2::Digest;
use sha2::Sha256;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::runtime::RuntimeFlavor;
use url::Url;

use crate::error::InfshErr;
use crate::error::Result;

/// Browser-like user agent; some hosts refuse requests from unknown clients.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// File name used when the URL path has no basename.
pub const FALLBACK_FILENAME: &str = "download";

const CACHE_KEY_LEN: usize = 12;
const CHUNK_SIZE: usize = 8 * 1024;

thread_local! {
    static SCOPED_DEFAULT: RefCell<Option<FileCache>> = const { RefCell::new(None) };
}

/// Puts the previous thread default back, also when the scoped closure
/// panics.
struct RestoreDefault(Option<FileCache>);

impl Drop for RestoreDefault {
    fn drop(&mut self) {
        let previous = self.0.take();
        SCOPED_DEFAULT.with(|slot| *slot.borrow_mut() = previous);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCache {
    root: PathBuf,
}

impl FileCache {
    /// Environment variable overriding the cache root.
    pub const ENV_VAR: &'static str = "FILE_CACHE_DIR";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache rooted at `FILE_CACHE_DIR`, or [`FileCache::default_root`].
    pub fn from_env() -> Self {
        match std::env::var(Self::ENV_VAR) {
            Ok(dir) if !dir.trim().is_empty() => Self::new(dir),
            _ => Self::new(Self::default_root()),
        }
    }

    /// `~/.cache/inferencesh/files`, or the same below the system temp dir
    /// when no home directory is known.
    pub fn default_root() -> PathBuf {
        let base = dirs::home_dir()
            .map(|home| home.join(".cache"))
            .unwrap_or_else(std::env::temp_dir);
        base.join("inferencesh").join("files")
    }

    /// The cache set by an enclosing [`FileCache::with_default`] on this
    /// thread, else [`FileCache::from_env`].
    pub fn current() -> Self {
        SCOPED_DEFAULT
            .with(|slot| slot.borrow().clone())
            .unwrap_or_else(Self::from_env)
    }

    /// Runs `f` with `self` as this thread's default cache. That default is
    /// what `FileResource::new` and `FileResource` deserialization use.
    pub fn with_default<T>(&self, f: impl FnOnce() -> T) -> T {
        let previous = SCOPED_DEFAULT.with(|slot| slot.replace(Some(self.clone())));
        let _restore = RestoreDefault(previous);
        f()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the content of `uri` lives in this cache. Does not create
    /// anything on disk.
    pub fn cache_path(&self, uri: &str) -> PathBuf {
        self.root.join(cache_key(uri)).join(cache_filename(uri))
    }

    /// Blocking cache-or-download.
    ///
    /// Safe to call from a multi-threaded tokio runtime, where the download
    /// runs under `block_in_place`. On a current-thread runtime a cache miss
    /// fails with [`InfshErr::BlockingDownloadInAsync`] instead of blocking
    /// the executor.
    pub fn fetch_blocking(&self, uri: &str) -> Result<PathBuf> {
        let url = parse_remote(uri)?;
        let cache_path = self.cache_path(uri);
        if let Some(dir) = cache_path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| InfshErr::download(uri, e))?;
        }
        if cache_path.exists() {
            tracing::debug!("using cached file {}", cache_path.display());
            return Ok(cache_path);
        }

        match tokio::runtime::Handle::try_current().map(|handle| handle.runtime_flavor()) {
            Err(_) => download_into_cache(&url, uri, &cache_path),
            Ok(RuntimeFlavor::MultiThread) => {
                tokio::task::block_in_place(|| download_into_cache(&url, uri, &cache_path))
            }
            Ok(_) => Err(InfshErr::BlockingDownloadInAsync {
                url: uri.to_string(),
            }),
        }
    }

    /// Suspending cache-or-download. Dropping the returned future removes any
    /// partially written temporary file.
    pub async fn fetch(&self, uri: &str) -> Result<PathBuf> {
        let url = parse_remote(uri)?;
        let cache_path = self.cache_path(uri);
        if let Some(dir) = cache_path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| InfshErr::download(uri, e))?;
        }
        if tokio::fs::try_exists(&cache_path).await.unwrap_or(false) {
            tracing::debug!("using cached file {}", cache_path.display());
            return Ok(cache_path);
        }

        tracing::info!("downloading {uri} to {}", cache_path.display());
        let target = cache_path.clone();
        let tmp = tokio::task::spawn_blocking(move || temp_sibling(&target))
            .await
            .map_err(|e| InfshErr::download(uri, std::io::Error::other(e)))?
            .map_err(|e| InfshErr::download(uri, e))?;
        match download_async(&url, uri, &tmp).await {
            Ok(()) => persist(tmp, &cache_path, uri),
            Err(e) => {
                discard(tmp);
                Err(e)
            }
        }
    }
}

impl Default for FileCache {
    fn default() -> Self {
        Self::from_env()
    }
}

/// `(netloc, path, query)` of a URL string, verbatim: no case folding, port
/// or percent-encoding normalization.
fn split_raw(uri: &str) -> (&str, &str, Option<&str>) {
    let rest = uri.split_once("://").map_or(uri, |(_, rest)| rest);
    let rest = rest.split_once('#').map_or(rest, |(before, _)| before);
    let (rest, query) = match rest.split_once('?') {
        Some((before, query)) => (before, Some(query)),
        None => (rest, None),
    };
    match rest.find('/') {
        Some(slash) => (&rest[..slash], &rest[slash..], query),
        None => (rest, "", query),
    }
}

/// First 12 hex characters of the SHA-256 of `netloc + path [+ "?" + query]`,
/// taken from the URL exactly as written so keys match other clients
/// sharing the cache directory.
pub fn cache_key(uri: &str) -> String {
    let (netloc, path, query) = split_raw(uri);
    let mut components = format!("{netloc}{path}");
    if let Some(query) = query
        && !query.is_empty()
    {
        components.push('?');
        components.push_str(query);
    }
    let digest = Sha256::digest(components.as_bytes());
    let mut key = format!("{digest:x}");
    key.truncate(CACHE_KEY_LEN);
    key
}

fn cache_filename(uri: &str) -> String {
    let (_, path, _) = split_raw(uri);
    path.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or(FALLBACK_FILENAME)
        .to_string()
}

fn parse_remote(uri: &str) -> Result<Url> {
    Url::parse(uri).map_err(|e| {
        InfshErr::download(
            uri,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
        )
    })
}

fn temp_sibling(cache_path: &Path) -> std::io::Result<NamedTempFile> {
    let dir = cache_path.parent().unwrap_or_else(|| Path::new("."));
    let prefix = match cache_path.file_name() {
        Some(name) => format!("{}.", name.to_string_lossy()),
        None => format!("{FALLBACK_FILENAME}."),
    };
    tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(dir)
}

fn persist(tmp: NamedTempFile, cache_path: &Path, uri: &str) -> Result<PathBuf> {
    match tmp.persist(cache_path) {
        Ok(_) => Ok(cache_path.to_path_buf()),
        Err(e) => {
            let source = e.error;
            discard(e.file);
            Err(InfshErr::download(uri, source))
        }
    }
}

fn discard(tmp: NamedTempFile) {
    let path = tmp.path().to_path_buf();
    if let Err(e) = tmp.close() {
        tracing::debug!("failed to remove temporary file {}: {e}", path.display());
    }
}

/// Blocking download of `url` into `cache_path` through a temporary sibling.
fn download_into_cache(url: &Url, uri: &str, cache_path: &Path) -> Result<PathBuf> {
    tracing::info!("downloading {uri} to {}", cache_path.display());
    let mut tmp = temp_sibling(cache_path).map_err(|e| InfshErr::download(uri, e))?;
    match download_blocking(url, uri, tmp.as_file_mut()) {
        Ok(()) => persist(tmp, cache_path, uri),
        Err(e) => {
            discard(tmp);
            Err(e)
        }
    }
}

fn download_blocking(url: &Url, uri: &str, out: &mut std::fs::File) -> Result<()> {
    let download_err = |e: reqwest::Error| InfshErr::download(uri, std::io::Error::other(e));
    let client = reqwest::blocking::Client::builder()
        .user_agent(BROWSER_USER_AGENT)
        .build()
        .map_err(download_err)?;
    let mut response = client
        .get(url.as_str())
        .send()
        .and_then(reqwest::blocking::Response::error_for_status)
        .map_err(download_err)?;
    copy_chunks(&mut response, out).map_err(|e| InfshErr::download(uri, e))?;
    Ok(())
}

async fn download_async(url: &Url, uri: &str, tmp: &NamedTempFile) -> Result<()> {
    let download_err = |e: reqwest::Error| InfshErr::download(uri, std::io::Error::other(e));
    let client = reqwest::Client::builder()
        .user_agent(BROWSER_USER_AGENT)
        .build()
        .map_err(download_err)?;
    let response = client
        .get(url.as_str())
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(download_err)?;

    let handle = tmp
        .as_file()
        .try_clone()
        .map_err(|e| InfshErr::download(uri, e))?;
    let mut out = tokio::fs::File::from_std(handle);
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(download_err)?;
        out.write_all(&chunk)
            .await
            .map_err(|e| InfshErr::download(uri, e))?;
    }
    out.flush().await.map_err(|e| InfshErr::download(uri, e))?;
    Ok(())
}

/// Copies `reader` into `writer` in fixed-size chunks. A reader that hands
/// back its whole content from a single `read` call works the same way.
pub(crate) fn copy_chunks<R: Read + ?Sized, W: Write + ?Sized>(
    reader: &mut R,
    writer: &mut W,
) -> std::io::Result<u64> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..n])?;
        total += n as u64;
    }
    writer.flush()?;
    Ok(total)
}

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use dirs::home_dir;
use serde::Deserialize;

use crate::error::InfshErr;
use crate::error::Result;
use crate::file::FileCache;

pub const DEFAULT_BASE_URL: &str = "https://api.inference.sh";

pub const INFERENCE_API_KEY_ENV_VAR: &str = "INFERENCE_API_KEY";
pub const INFERENCE_BASE_URL_ENV_VAR: &str = "INFERENCE_BASE_URL";
pub const INFERENCESH_HOME_ENV_VAR: &str = "INFERENCESH_HOME";

const CONFIG_TOML_FILE: &str = "config.toml";

/// Client configuration after merging `config.toml`, the environment and
/// explicit overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub api_key: Option<String>,

    /// Root of the API, without a trailing slash.
    pub base_url: String,

    /// Per-request timeout enforced by the transport. `None` waits forever.
    pub request_timeout: Option<Duration>,

    /// Where downloaded files are cached.
    pub file_cache_dir: PathBuf,

    /// Directory `config.toml` was looked up in.
    pub inferencesh_home: PathBuf,
}

/// Contents of `~/.inferencesh/config.toml`.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ConfigToml {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub file_cache_dir: Option<PathBuf>,
}

/// Values that take precedence over `config.toml`, e.g. from the environment
/// or from code constructing a client.
#[derive(Default, Debug, Clone)]
pub struct ConfigOverrides {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub request_timeout: Option<Duration>,
    pub file_cache_dir: Option<PathBuf>,
}

impl ConfigOverrides {
    /// Overrides read from `INFERENCE_API_KEY`, `INFERENCE_BASE_URL` and
    /// `FILE_CACHE_DIR`. Empty values are ignored.
    pub fn from_env() -> Self {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.trim().is_empty())
        }
        Self {
            api_key: var(INFERENCE_API_KEY_ENV_VAR),
            base_url: var(INFERENCE_BASE_URL_ENV_VAR),
            request_timeout: None,
            file_cache_dir: var(FileCache::ENV_VAR).map(PathBuf::from),
        }
    }

    /// Fills every field left unset in `self` from `fallback`.
    fn or(self, fallback: ConfigOverrides) -> Self {
        Self {
            api_key: self.api_key.or(fallback.api_key),
            base_url: self.base_url.or(fallback.base_url),
            request_timeout: self.request_timeout.or(fallback.request_timeout),
            file_cache_dir: self.file_cache_dir.or(fallback.file_cache_dir),
        }
    }
}

impl Config {
    /// Load configuration from `$INFERENCESH_HOME/config.toml` (if present)
    /// and the environment, then apply `overrides` (highest precedence).
    pub fn load_with_overrides(overrides: ConfigOverrides) -> Result<Self> {
        let inferencesh_home = find_inferencesh_home()?;
        let cfg = load_config_toml(&inferencesh_home)?;
        let overrides = overrides.or(ConfigOverrides::from_env());
        Self::load_from_base_config_with_overrides(cfg, overrides, inferencesh_home)
    }

    /// Meant to be used exclusively for tests: merges without touching disk
    /// or the environment.
    pub fn load_from_base_config_with_overrides(
        cfg: ConfigToml,
        overrides: ConfigOverrides,
        inferencesh_home: PathBuf,
    ) -> Result<Self> {
        let mut base_url = overrides
            .base_url
            .or(cfg.base_url)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        while base_url.ends_with('/') {
            base_url.pop();
        }
        if url::Url::parse(&base_url).is_err() {
            return Err(InfshErr::Config(format!("invalid base_url: {base_url}")));
        }

        let request_timeout = overrides
            .request_timeout
            .or(cfg.request_timeout_ms.map(Duration::from_millis));

        let file_cache_dir = overrides
            .file_cache_dir
            .or(cfg.file_cache_dir)
            .unwrap_or_else(FileCache::default_root);

        Ok(Self {
            api_key: overrides.api_key.or(cfg.api_key),
            base_url,
            request_timeout,
            file_cache_dir,
            inferencesh_home,
        })
    }

    pub fn file_cache(&self) -> FileCache {
        FileCache::new(self.file_cache_dir.clone())
    }
}

fn load_config_toml(inferencesh_home: &Path) -> Result<ConfigToml> {
    let path = inferencesh_home.join(CONFIG_TOML_FILE);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ConfigToml::default()),
        Err(e) => return Err(e.into()),
    };
    toml::from_str(&contents)
        .map_err(|e| InfshErr::Config(format!("failed to parse {}: {e}", path.display())))
}

/// Returns the path to the configuration directory, which can be specified by
/// the `INFERENCESH_HOME` environment variable. If not set, defaults to
/// `~/.inferencesh`.
///
/// - If `INFERENCESH_HOME` is set, the value will be canonicalized and this
///   function will Err if the path does not exist.
/// - If `INFERENCESH_HOME` is not set, this function does not verify that the
///   directory exists.
pub fn find_inferencesh_home() -> std::io::Result<PathBuf> {
    if let Ok(val) = std::env::var(INFERENCESH_HOME_ENV_VAR)
        && !val.is_empty()
    {
        return PathBuf::from(val).canonicalize();
    }

    let mut p = home_dir().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Could not find home directory",
        )
    })?;
    p.push(".inferencesh");
    Ok(p)
}

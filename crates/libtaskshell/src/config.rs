use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

const DEFAULT_COMPLETED_GRACE_MINUTES: u64 = 15;
const DEFAULT_RESOLVE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SIGNED_URL_TTL_SECS: u64 = 60;
const DEFAULT_SHELL_ARTIFACT: &str = "private/docker-worker/shell.html";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("no root url configured (set TASKCLUSTER_ROOT_URL or root_url in the config file)")]
    MissingRootUrl,

    #[error("invalid root url {value:?}: {source}")]
    InvalidRootUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },

    #[error("client_id and access_token must be configured together")]
    PartialCredentials,

    #[error("failed to build http client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// Credentials used to pre-sign the shell artifact url.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub access_token: String,
    pub certificate: Option<String>,
}

/// Resolved client settings.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub root_url: Url,
    pub credentials: Option<Credentials>,
    /// How long after resolution a completed run can still be attached to.
    pub completed_grace: Duration,
    /// Deadline for every request made while resolving the endpoint.
    pub resolve_timeout: Duration,
    pub signed_url_ttl: Duration,
    pub shell_artifact: String,
}

/// On-disk config; every field is optional and overridden by the environment.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub root_url: Option<String>,
    pub client_id: Option<String>,
    pub access_token: Option<String>,
    pub certificate: Option<String>,
    pub completed_grace_minutes: Option<u64>,
    pub resolve_timeout_secs: Option<u64>,
    pub signed_url_ttl_secs: Option<u64>,
    pub shell_artifact: Option<String>,
}

impl FileConfig {
    /// Read `path`, or return the empty config when it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl ShellConfig {
    /// Defaults, then the config file, then `TASKCLUSTER_*` variables, then
    /// the `root_url` given on the command line.
    pub fn load(path: Option<&Path>, root_url: Option<&str>) -> Result<Self, ConfigError> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);
        let file = FileConfig::load(&path)?;
        Self::from_sources(file, |key| match (key, root_url) {
            ("TASKCLUSTER_ROOT_URL", Some(root_url)) => Some(root_url.to_string()),
            _ => std::env::var(key).ok(),
        })
    }

    pub fn from_sources(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let env = |key: &str| env(key).filter(|v| !v.is_empty());

        let root = env("TASKCLUSTER_ROOT_URL")
            .or(file.root_url)
            .ok_or(ConfigError::MissingRootUrl)?;
        let root_url = parse_root_url(&root)?;

        let client_id = env("TASKCLUSTER_CLIENT_ID").or(file.client_id);
        let access_token = env("TASKCLUSTER_ACCESS_TOKEN").or(file.access_token);
        let certificate = env("TASKCLUSTER_CERTIFICATE").or(file.certificate);
        let credentials = match (client_id, access_token) {
            (Some(client_id), Some(access_token)) => Some(Credentials {
                client_id,
                access_token,
                certificate,
            }),
            (None, None) => None,
            _ => return Err(ConfigError::PartialCredentials),
        };

        Ok(Self {
            root_url,
            credentials,
            completed_grace: Duration::from_secs(
                file.completed_grace_minutes
                    .unwrap_or(DEFAULT_COMPLETED_GRACE_MINUTES)
                    .saturating_mul(60),
            ),
            resolve_timeout: Duration::from_secs(
                file.resolve_timeout_secs
                    .unwrap_or(DEFAULT_RESOLVE_TIMEOUT_SECS),
            ),
            signed_url_ttl: Duration::from_secs(
                file.signed_url_ttl_secs
                    .unwrap_or(DEFAULT_SIGNED_URL_TTL_SECS),
            ),
            shell_artifact: file
                .shell_artifact
                .unwrap_or_else(|| DEFAULT_SHELL_ARTIFACT.to_string()),
        })
    }
}

fn parse_root_url(value: &str) -> Result<Url, ConfigError> {
    // A trailing slash keeps `Url::join` from dropping the last path segment.
    let normalized = format!("{}/", value.trim_end_matches('/'));
    Url::parse(&normalized).map_err(|source| ConfigError::InvalidRootUrl {
        value: value.to_string(),
        source,
    })
}

/// Default config file: `$XDG_CONFIG_HOME/taskshell/config.toml`, else
/// `$HOME/.config/taskshell/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_from(std::env::var_os("XDG_CONFIG_HOME"), std::env::var_os("HOME"))
}

fn config_path_from(xdg_config_home: Option<OsString>, home: Option<OsString>) -> PathBuf {
    let base = xdg_config_home
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or_else(|| home.map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(std::env::temp_dir);
    base.join("taskshell").join("config.toml")
}

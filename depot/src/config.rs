//! Run configuration: repository location, work area, engine, transport.
//!
//! Resolved once per invocation and passed by reference; nothing here is
//! global or mutable after construction.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::normalize::{IMAGES_DIR, REPOSITORIES};
use crate::{Error, LayerStore, LocalCopy, RepoIndex, Result, Rsync, Transport};

const DEPOT_DIR: &str = "depot";
const REPO_DIR: &str = "repo";
const DEFAULT_ENGINE: &str = "docker";

/// Environment variable naming the repository root.
pub const ENV_REPO: &str = "DEPOT_REPO";
/// Environment variable naming the parent of scratch work areas.
pub const ENV_WORK_DIR: &str = "DEPOT_WORK_DIR";
/// Environment variable holding the engine command prefix.
pub const ENV_DOCKER: &str = "DEPOT_DOCKER";
/// Environment variable selecting the transport.
pub const ENV_TRANSPORT: &str = "DEPOT_TRANSPORT";

/// How bytes move between the work area and the repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportKind {
    /// Native recursive copy.
    #[default]
    Local,
    /// `rsync -a` subprocess.
    Rsync,
}

impl TransportKind {
    /// Instantiates the transport.
    pub fn build(self) -> Box<dyn Transport> {
        match self {
            Self::Local => Box::new(LocalCopy),
            Self::Rsync => Box::new(Rsync::new()),
        }
    }
}

impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "rsync" => Ok(Self::Rsync),
            other => Err(Error::Config(format!("unknown transport: {other}"))),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Rsync => "rsync",
        })
    }
}

/// Settings for one push or pull.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Config {
    /// Repository root holding `images/` and `repositories/`.
    pub repository: PathBuf,
    /// Parent directory of per-run work areas.
    pub work_root: PathBuf,
    /// Engine command prefix, e.g. `["sudo", "docker"]`.
    pub engine_command: Vec<String>,
    /// Transport used for every copy.
    pub transport: TransportKind,
}

impl Config {
    /// Creates a configuration for `repository` with default settings.
    pub fn new(repository: impl Into<PathBuf>) -> Self {
        Self {
            repository: repository.into(),
            work_root: std::env::temp_dir().join(DEPOT_DIR),
            engine_command: vec![DEFAULT_ENGINE.to_owned()],
            transport: TransportKind::default(),
        }
    }

    /// Resolves the configuration from `DEPOT_*` environment variables.
    ///
    /// Default repository: `$DEPOT_REPO` or `<platform_data_dir>/depot/repo`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let repository = match var(ENV_REPO) {
            Some(location) => repository_path(&location)?,
            None => dirs::data_local_dir()
                .ok_or_else(|| Error::Config("cannot determine platform data directory".into()))?
                .join(DEPOT_DIR)
                .join(REPO_DIR),
        };
        let mut config = Self::new(repository);

        if let Some(path) = var(ENV_WORK_DIR) {
            config.work_root = PathBuf::from(path);
        }
        if let Some(command) = var(ENV_DOCKER) {
            config.engine_command = split_command(&command);
        }
        if let Some(kind) = var(ENV_TRANSPORT) {
            config.transport = kind.parse()?;
        }
        Ok(config)
    }

    /// Returns the repository's ref index.
    pub fn index(&self) -> RepoIndex {
        RepoIndex::new(self.repository.join(REPOSITORIES))
    }

    /// Returns the repository's layer store.
    pub fn store(&self) -> LayerStore {
        LayerStore::new(self.repository.join(IMAGES_DIR))
    }
}

/// Resolves a repository location to a filesystem path.
///
/// Accepts a bare path or a `local://` / `file://` URL. Any other scheme
/// names a backend this build cannot reach.
pub fn repository_path(location: &str) -> Result<PathBuf> {
    let location = location.trim();
    match location.split_once("://") {
        None => Ok(PathBuf::from(location)),
        Some((scheme, path)) if matches!(scheme, "local" | "file") && !path.is_empty() => {
            Ok(PathBuf::from(path))
        }
        Some((scheme, _)) => Err(Error::Config(format!(
            "unsupported repository location: {location} (scheme {scheme:?})"
        ))),
    }
}

/// Splits a command prefix such as `sudo docker` on whitespace.
pub fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_owned).collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn env_overrides_defaults() {
        let config = Config::from_lookup(lookup(&[
            (ENV_REPO, "/srv/depot"),
            (ENV_WORK_DIR, "/scratch"),
            (ENV_DOCKER, "sudo  docker"),
            (ENV_TRANSPORT, "RSYNC"),
        ]))
        .unwrap();

        assert_eq!(config.repository, PathBuf::from("/srv/depot"));
        assert_eq!(config.work_root, PathBuf::from("/scratch"));
        assert_eq!(config.engine_command, vec!["sudo", "docker"]);
        assert_eq!(config.transport, TransportKind::Rsync);
        assert_eq!(config.index().root(), PathBuf::from("/srv/depot/repositories"));
        assert_eq!(config.store().root(), PathBuf::from("/srv/depot/images"));
    }

    #[test]
    fn blank_values_fall_back() {
        let config =
            Config::from_lookup(lookup(&[(ENV_REPO, "/r"), (ENV_DOCKER, "  ")])).unwrap();
        assert_eq!(config.engine_command, vec!["docker"]);
        assert_eq!(config.transport, TransportKind::Local);
        assert!(config.work_root.ends_with(DEPOT_DIR));
    }

    #[test]
    fn unknown_transport_is_rejected() {
        let err = Config::from_lookup(lookup(&[(ENV_REPO, "/r"), (ENV_TRANSPORT, "s3")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn repository_accepts_local_urls() {
        assert_eq!(repository_path("/srv/depot").unwrap(), PathBuf::from("/srv/depot"));
        assert_eq!(
            repository_path("local:///srv/depot").unwrap(),
            PathBuf::from("/srv/depot")
        );
        assert_eq!(
            repository_path("file:///srv/depot").unwrap(),
            PathBuf::from("/srv/depot")
        );
        let config = Config::from_lookup(lookup(&[(ENV_REPO, "local:///srv/depot")])).unwrap();
        assert_eq!(config.repository, PathBuf::from("/srv/depot"));
    }

    #[test]
    fn repository_rejects_unreachable_schemes() {
        for location in ["s3://bucket/images", "rsync://host/depot", "local://"] {
            assert!(matches!(repository_path(location), Err(Error::Config(_))));
        }
    }

    #[test]
    fn transport_kind_display_parses_back() {
        for kind in [TransportKind::Local, TransportKind::Rsync] {
            assert_eq!(kind.to_string().parse::<TransportKind>().unwrap(), kind);
        }
    }
}

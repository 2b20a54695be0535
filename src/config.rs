//! Configuration file and command-line overrides.
//!
//! The configuration lives in `<config_dir>/varidx/varidx.json` unless
//! `VARIDX_CONFIG` points elsewhere. A missing file means defaults.

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::index::{DEFAULT_PROGRESS_INTERVAL, IndexOptions, default_workers};
use crate::package::VariantRole;
use crate::runtime::Runtime;
use crate::scan::ScanRoot;

pub const CONFIG_ENV: &str = "VARIDX_CONFIG";
pub const CONFIG_FILE_NAME: &str = "varidx.json";
pub const CACHE_FILE_NAME: &str = "metadata.cache";

/// Folder names of a standard installation and the role of each.
pub const VAM_FOLDERS: [(&str, VariantRole); 3] = [
    ("AddonPackages", VariantRole::Loaded),
    ("AllPackages", VariantRole::Available),
    ("ArchivedPackages", VariantRole::Archived),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub roots: Vec<ScanRoot>,
    pub cache_path: Option<PathBuf>,
    pub workers: Option<usize>,
    pub progress_interval: usize,
    /// Glob patterns of paths to skip during discovery.
    pub exclude: Vec<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            cache_path: None,
            workers: None,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            exclude: Vec::new(),
        }
    }
}

/// Values given on the command line; each replaces its configured value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub vam_dir: Option<PathBuf>,
    pub cache_path: Option<PathBuf>,
    pub workers: Option<usize>,
}

/// Directory holding the configuration and the default cache file.
pub fn config_root<R: Runtime>(runtime: &R) -> Result<PathBuf> {
    let dir = runtime
        .config_dir()
        .or_else(|| runtime.home_dir().map(|h| h.join(".config")))
        .context("Could not find config directory")?;
    Ok(dir.join("varidx"))
}

/// Path of the configuration file.
pub fn config_file_path<R: Runtime>(runtime: &R) -> Result<PathBuf> {
    match runtime.env_var(CONFIG_ENV) {
        Ok(path) if !path.is_empty() => Ok(PathBuf::from(path)),
        _ => Ok(config_root(runtime)?.join(CONFIG_FILE_NAME)),
    }
}

/// The three standard roots under an installation directory.
pub fn vam_roots(vam_dir: &Path) -> Vec<ScanRoot> {
    VAM_FOLDERS
        .iter()
        .map(|(folder, role)| ScanRoot::new(vam_dir.join(folder), *role))
        .collect()
}

impl IndexConfig {
    /// Load the configuration file, or defaults when there is none.
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime>(runtime: &R) -> Result<Self> {
        let path = config_file_path(runtime)?;
        if !runtime.exists(&path) {
            debug!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = runtime
            .read_to_string(&path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {:?}", path))?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        if let Some(vam_dir) = overrides.vam_dir {
            self.roots = vam_roots(&vam_dir);
        }
        if overrides.cache_path.is_some() {
            self.cache_path = overrides.cache_path;
        }
        if overrides.workers.is_some() {
            self.workers = overrides.workers;
        }
        self
    }

    /// The configured cache path, or the default one.
    pub fn resolved_cache_path<R: Runtime>(&self, runtime: &R) -> Result<PathBuf> {
        match &self.cache_path {
            Some(path) => Ok(path.clone()),
            None => Ok(config_root(runtime)?.join(CACHE_FILE_NAME)),
        }
    }

    pub fn index_options<R: Runtime>(&self, runtime: &R) -> Result<IndexOptions> {
        Ok(IndexOptions {
            workers: self.workers.unwrap_or_else(default_workers),
            progress_interval: self.progress_interval,
            cache_path: Some(self.resolved_cache_path(runtime)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use mockall::predicate::eq;

    fn runtime_with_config(content: Option<&'static str>) -> MockRuntime {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_env_var()
            .with(eq(CONFIG_ENV))
            .returning(|_| Err(std::env::VarError::NotPresent));
        runtime
            .expect_config_dir()
            .returning(|| Some(PathBuf::from("/home/user/.config")));

        let path = PathBuf::from("/home/user/.config/varidx/varidx.json");
        runtime
            .expect_exists()
            .with(eq(path.clone()))
            .returning(move |_| content.is_some());
        if let Some(content) = content {
            runtime
                .expect_read_to_string()
                .with(eq(path))
                .returning(move |_| Ok(content.to_string()));
        }
        runtime
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let runtime = runtime_with_config(None);
        let config = IndexConfig::load(&runtime).unwrap();
        assert_eq!(config, IndexConfig::default());
        assert_eq!(
            config.resolved_cache_path(&runtime).unwrap(),
            PathBuf::from("/home/user/.config/varidx/metadata.cache")
        );
    }

    #[test]
    fn test_load_file() {
        let runtime = runtime_with_config(Some(
            r#"{
                "roots": [
                    { "path": "/games/vam/AddonPackages", "role": "Loaded" },
                    { "path": "/cold", "role": "Archived", "status": "Cold storage" }
                ],
                "workers": 3,
                "exclude": ["*/Temp/*"]
            }"#,
        ));
        let config = IndexConfig::load(&runtime).unwrap();

        assert_eq!(config.roots.len(), 2);
        assert_eq!(config.roots[1].role, VariantRole::Archived);
        assert_eq!(config.roots[1].status_label(), "Cold storage");
        assert_eq!(config.roots[0].status_label(), "Loaded");
        assert_eq!(config.workers, Some(3));
        assert_eq!(config.progress_interval, DEFAULT_PROGRESS_INTERVAL);
        assert_eq!(config.exclude, vec!["*/Temp/*".to_string()]);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let runtime = runtime_with_config(Some("{ roots: nope"));
        let err = IndexConfig::load(&runtime).unwrap_err();
        assert!(err.to_string().contains("Invalid config file"));
    }

    #[test]
    fn test_config_env_overrides_location() {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_env_var()
            .with(eq(CONFIG_ENV))
            .returning(|_| Ok("/etc/varidx.json".to_string()));
        assert_eq!(
            config_file_path(&runtime).unwrap(),
            PathBuf::from("/etc/varidx.json")
        );
    }

    #[test]
    fn test_overrides() {
        let config = IndexConfig::default().with_overrides(Overrides {
            vam_dir: Some(PathBuf::from("/vam")),
            cache_path: Some(PathBuf::from("/tmp/c.cache")),
            workers: Some(1),
        });

        assert_eq!(
            config.roots,
            vec![
                ScanRoot::new("/vam/AddonPackages", VariantRole::Loaded),
                ScanRoot::new("/vam/AllPackages", VariantRole::Available),
                ScanRoot::new("/vam/ArchivedPackages", VariantRole::Archived),
            ]
        );
        let runtime = MockRuntime::new();
        let options = config.index_options(&runtime).unwrap();
        assert_eq!(options.workers, 1);
        assert_eq!(options.cache_path, Some(PathBuf::from("/tmp/c.cache")));
    }

    #[test]
    fn test_no_config_dir_falls_back_to_home() {
        let mut runtime = MockRuntime::new();
        runtime.expect_config_dir().returning(|| None);
        runtime
            .expect_home_dir()
            .returning(|| Some(PathBuf::from("/home/user")));
        assert_eq!(
            config_root(&runtime).unwrap(),
            PathBuf::from("/home/user/.config/varidx")
        );
    }
}

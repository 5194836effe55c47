//! Keyed dependency cache
//!
//! Each entry is a snapshot of a project's installed dependency directory
//! stored at `<cache dir>/<key>`. Entries are either present or absent;
//! there is no hashing of inputs and no expiry.
//!
//! # Entry States
//!
//! | State | On disk | Meaning |
//! |-------|---------|---------|
//! | Miss | nothing | Install, then populate |
//! | Partial | `<key>.partial` | Interrupted population, ignored and replaced |
//! | Hit | `<key>` | Copied into the project, no install |

use crate::config::CacheConfig;
use crate::error::{ShipcheckError, ShipcheckResult};
use crate::fsutil::{copy_dir_clean, dir_size, partial_path, remove_path};
use crate::process::CommandSpec;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// What `fetch_or_install` did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheOutcome {
    /// Restored from an existing entry
    Hit,
    /// Installed fresh and stored
    Populated,
    /// Installed fresh, caching disabled
    Disabled,
}

impl fmt::Display for CacheOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hit => write!(f, "hit"),
            Self::Populated => write!(f, "populated"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

/// A stored cache entry
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    pub key: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Directory cache for installed dependencies
#[derive(Debug, Clone)]
pub struct CacheManager {
    root: PathBuf,
    dependency_dir: String,
    install: CommandSpec,
    enabled: bool,
}

impl CacheManager {
    pub fn new(config: &CacheConfig, install: CommandSpec) -> Self {
        Self {
            root: config.dir.clone(),
            dependency_dir: config.dependency_dir.clone(),
            install,
            enabled: config.enabled,
        }
    }

    /// Disable reads and writes for this run
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dependency_dir(&self) -> &str {
        &self.dependency_dir
    }

    fn entry_path(&self, key: &str) -> ShipcheckResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    /// Restore dependencies from the cache, or install and populate it
    pub async fn fetch_or_install(
        &self,
        project_path: &Path,
        cache_key: &str,
    ) -> ShipcheckResult<CacheOutcome> {
        let entry = self.entry_path(cache_key)?;
        let modules = project_path.join(&self.dependency_dir);

        if self.enabled && entry.is_dir() {
            info!(
                "Using {} cache {} for {}",
                self.dependency_dir,
                entry.display(),
                cache_key
            );
            copy_dir_clean(&entry, &modules, &[]).await?;
            return Ok(CacheOutcome::Hit);
        }

        if self.enabled {
            info!("No cache at {} for {}", entry.display(), cache_key);
        }
        self.install(project_path, cache_key).await?;

        if !self.enabled {
            return Ok(CacheOutcome::Disabled);
        }

        if !modules.is_dir() {
            debug!(
                "Install produced no {} in {}, nothing to cache",
                self.dependency_dir,
                project_path.display()
            );
            return Ok(CacheOutcome::Populated);
        }

        let partial = partial_path(&entry);
        copy_dir_clean(&modules, &partial, &[]).await?;
        remove_path(&entry).await?;
        fs::rename(&partial, &entry).await.map_err(|e| {
            ShipcheckError::io(format!("finalizing cache entry {}", entry.display()), e)
        })?;

        info!("Cached {} for {}", self.dependency_dir, cache_key);
        Ok(CacheOutcome::Populated)
    }

    async fn install(&self, project_path: &Path, cache_key: &str) -> ShipcheckResult<()> {
        let spec = self.install.clone().current_dir(project_path);
        info!("Installing dependencies in {}", project_path.display());

        let output = spec.output().await?;
        if output.success() {
            Ok(())
        } else {
            Err(ShipcheckError::InstallFailure {
                project: cache_key.to_string(),
                output: output.tail(),
            })
        }
    }

    /// All complete entries, sorted by key
    pub async fn entries(&self) -> ShipcheckResult<Vec<CacheEntry>> {
        let mut entries = Vec::new();

        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => {
                return Err(ShipcheckError::io(
                    format!("reading cache dir {}", self.root.display()),
                    e,
                ))
            }
        };

        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| ShipcheckError::io("reading cache entry", e))?
        {
            let key = item.file_name().to_string_lossy().into_owned();
            if key.ends_with(".partial") {
                continue;
            }
            let Ok(metadata) = item.metadata().await else {
                continue;
            };
            if !metadata.is_dir() {
                continue;
            }

            let path = item.path();
            let size_path = path.clone();
            let size_bytes = tokio::task::spawn_blocking(move || dir_size(&size_path))
                .await
                .unwrap_or(0);

            entries.push(CacheEntry {
                key,
                path,
                size_bytes,
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    /// Remove one entry; returns false if it did not exist
    pub async fn remove(&self, key: &str) -> ShipcheckResult<bool> {
        let entry = self.entry_path(key)?;
        let existed = entry.exists();
        remove_path(&entry).await?;
        remove_path(&partial_path(&entry)).await?;
        Ok(existed)
    }

    /// Remove the whole cache directory
    pub async fn clear(&self) -> ShipcheckResult<()> {
        remove_path(&self.root).await
    }
}

/// Keys must be a single normal path component
fn validate_key(key: &str) -> ShipcheckResult<()> {
    let mut components = Path::new(key).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !key.ends_with(".partial") => Ok(()),
        _ => Err(ShipcheckError::InvalidCacheKey(key.to_string())),
    }
}

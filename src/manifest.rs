//! package.json version bumping with backup and restore
//!
//! A bump copies the manifest to `package.backup.json` before writing the
//! new version, so the live file never differs from the original without a
//! backup on disk. `revert` moves the backup back into place.

use crate::config::BumpStrategy;
use crate::error::{ShipcheckError, ShipcheckResult};
use chrono::Utc;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

pub const MANIFEST_FILE: &str = "package.json";
pub const BACKUP_FILE: &str = "package.backup.json";

/// Bumps and restores the version of one package manifest
#[derive(Debug, Clone)]
pub struct PackageVersionBumper {
    manifest: PathBuf,
    backup: PathBuf,
}

impl PackageVersionBumper {
    /// Bumper for `<package_dir>/package.json`
    pub fn new(package_dir: &Path) -> Self {
        Self {
            manifest: package_dir.join(MANIFEST_FILE),
            backup: package_dir.join(BACKUP_FILE),
        }
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup
    }

    /// Whether a backup is waiting to be restored
    pub fn has_backup(&self) -> bool {
        self.backup.exists()
    }

    /// Snapshot the manifest, apply `mutate` to its version and write it back.
    ///
    /// Returns the new version.
    pub async fn bump<F>(&self, mutate: F) -> ShipcheckResult<String>
    where
        F: FnOnce(&str) -> ShipcheckResult<String>,
    {
        let original = fs::read(&self.manifest).await.map_err(|e| {
            ShipcheckError::io(format!("reading {}", self.manifest.display()), e)
        })?;

        let mut json: Value =
            serde_json::from_slice(&original).map_err(|e| ShipcheckError::ManifestInvalid {
                path: self.manifest.clone(),
                reason: e.to_string(),
            })?;

        let current = json
            .get("version")
            .and_then(Value::as_str)
            .ok_or_else(|| ShipcheckError::ManifestInvalid {
                path: self.manifest.clone(),
                reason: "missing string \"version\" field".to_string(),
            })?
            .to_string();

        let next = mutate(&current)?;

        fs::write(&self.backup, &original).await.map_err(|e| {
            ShipcheckError::io(format!("writing backup {}", self.backup.display()), e)
        })?;

        json["version"] = Value::String(next.clone());
        write_json(&self.manifest, &json).await?;

        info!(
            "Bumped {} from {} to {}",
            self.manifest.display(),
            current,
            next
        );
        Ok(next)
    }

    /// Move the backup over the live manifest
    pub async fn revert(&self) -> ShipcheckResult<()> {
        if !self.backup.exists() {
            return Err(ShipcheckError::MissingBackup(self.backup.clone()));
        }

        fs::rename(&self.backup, &self.manifest).await.map_err(|e| {
            ShipcheckError::io(
                format!(
                    "restoring {} from {}",
                    self.manifest.display(),
                    self.backup.display()
                ),
                e,
            )
        })?;

        debug!("Restored {}", self.manifest.display());
        Ok(())
    }
}

/// Compute the next version for `strategy`
pub fn next_version(strategy: BumpStrategy, current: &str, tag: &str) -> ShipcheckResult<String> {
    next_version_at(strategy, current, tag, Utc::now().timestamp_millis())
}

fn next_version_at(
    strategy: BumpStrategy,
    current: &str,
    tag: &str,
    stamp: i64,
) -> ShipcheckResult<String> {
    match strategy {
        BumpStrategy::AppendTimestamp => Ok(format!("{}.{}", current, stamp)),
        BumpStrategy::ReplacePatch => {
            let mut chunks: Vec<String> = current.split('.').map(str::to_string).collect();
            if let Some(last) = chunks.last_mut() {
                *last = stamp.to_string();
            }
            Ok(chunks.join("."))
        }
        BumpStrategy::Prerelease => {
            let mut version = semver::Version::parse(current)
                .map_err(|e| ShipcheckError::User(format!("invalid semver {current:?}: {e}")))?;
            version.pre = semver::Prerelease::new(&format!("{}.{}", tag, stamp))
                .map_err(|e| ShipcheckError::User(format!("invalid pre-release tag {tag:?}: {e}")))?;
            Ok(version.to_string())
        }
    }
}

/// Set `dependencies.<name>` to `version` in a manifest.
///
/// Returns false when the manifest does not depend on `name`.
pub async fn set_dependency(manifest: &Path, name: &str, version: &str) -> ShipcheckResult<bool> {
    let mut json = read_json(manifest).await?;

    let Some(deps) = json.get_mut("dependencies").and_then(Value::as_object_mut) else {
        return Ok(false);
    };
    if !deps.contains_key(name) {
        return Ok(false);
    }
    deps.insert(name.to_string(), Value::String(version.to_string()));

    write_json(manifest, &json).await?;
    debug!("Pinned {}@{} in {}", name, version, manifest.display());
    Ok(true)
}

/// The `name` field of a manifest
pub async fn package_name(manifest: &Path) -> ShipcheckResult<String> {
    let json = read_json(manifest).await?;
    json.get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ShipcheckError::ManifestInvalid {
            path: manifest.to_path_buf(),
            reason: "missing string \"name\" field".to_string(),
        })
}

async fn read_json(path: &Path) -> ShipcheckResult<Value> {
    let content = fs::read(path)
        .await
        .map_err(|e| ShipcheckError::io(format!("reading {}", path.display()), e))?;
    serde_json::from_slice(&content).map_err(|e| ShipcheckError::ManifestInvalid {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Two-space indent, original key order, trailing newline
async fn write_json(path: &Path, json: &Value) -> ShipcheckResult<()> {
    let mut content = serde_json::to_string_pretty(json)?;
    content.push('\n');
    fs::write(path, content)
        .await
        .map_err(|e| ShipcheckError::io(format!("writing {}", path.display()), e))
}

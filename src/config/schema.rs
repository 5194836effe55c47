//! Configuration schema for shipcheck
//!
//! Configuration is stored in `shipcheck.toml` at the repository root.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Local registry settings
    pub registry: RegistryConfig,

    /// Package to publish
    pub package: PackageConfig,

    /// Example run settings
    pub run: RunConfig,

    /// Dependency cache settings
    pub cache: CacheConfig,

    /// Example projects, processed in order
    pub examples: Vec<ExampleConfig>,
}

impl Config {
    /// Resolve every relative path against `base` (the config file's directory)
    pub fn resolve_paths(&mut self, base: &Path) {
        resolve(&mut self.package.path, base);
        resolve(&mut self.run.test_dir, base);
        resolve(&mut self.cache.dir, base);
        for example in &mut self.examples {
            resolve(&mut example.path, base);
        }
    }
}

fn resolve(path: &mut PathBuf, base: &Path) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Local registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Command that starts the registry in the foreground
    pub command: Vec<String>,

    /// Host the registry listens on
    pub host: String,

    /// Port the registry listens on
    pub port: u16,

    /// Registry restored when the original setting cannot be read
    pub remote_url: String,

    /// Package-manager clients whose registry setting is redirected
    pub clients: Vec<String>,

    /// Seconds to wait for the registry to accept connections
    pub startup_timeout_secs: u64,
}

impl RegistryConfig {
    /// URL of the local registry
    pub fn local_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "npx".to_string(),
                "verdaccio".to_string(),
                "--listen".to_string(),
                "{port}".to_string(),
            ],
            host: "localhost".to_string(),
            port: 4873,
            remote_url: "https://registry.npmjs.org/".to_string(),
            clients: vec!["npm".to_string(), "yarn".to_string()],
            startup_timeout_secs: 60,
        }
    }
}

/// Version bump applied before publishing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BumpStrategy {
    /// `1.2.3` -> `1.2.3.<millis>`
    AppendTimestamp,
    /// `1.2.3` -> `1.2.<millis>`
    #[default]
    ReplacePatch,
    /// `1.2.3` -> `1.2.3-<tag>.<millis>`
    Prerelease,
}

/// Package publish configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageConfig {
    /// Package directory (contains package.json)
    pub path: PathBuf,

    /// Distribution tag; never "latest"
    pub dist_tag: String,

    /// How the version is made unique
    pub bump: BumpStrategy,

    /// Authentication command; empty to skip
    pub auth_command: Vec<String>,

    /// Publish command
    pub publish_command: Vec<String>,

    pub username: String,
    pub password: String,
    pub email: String,
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("."),
            dist_tag: "ci".to_string(),
            bump: BumpStrategy::default(),
            auth_command: [
                "npx",
                "npm-auth-to-token@1.0.0",
                "-u",
                "{username}",
                "-p",
                "{password}",
                "-e",
                "{email}",
                "-r",
                "{registry}",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            publish_command: [
                "npm",
                "publish",
                "--tag",
                "{tag}",
                "--registry",
                "{registry}",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            username: "user".to_string(),
            password: "password".to_string(),
            email: "user@example.com".to_string(),
        }
    }
}

/// Example run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Host the dev server is probed on
    pub host: String,

    /// Port shared by every example
    pub port: u16,

    /// Dependency install command, run inside the staged example
    pub install_command: Vec<String>,

    /// Dev server command, run inside the staged example
    pub dev_command: Vec<String>,

    /// Browser test command
    pub test_command: Vec<String>,

    /// Directory the test command runs in
    pub test_dir: PathBuf,

    /// Seconds to wait for the dev server
    pub ready_timeout_secs: u64,

    /// Milliseconds between SIGTERM and SIGKILL on teardown
    pub grace_period_ms: u64,

    /// Stop after the first failed example
    pub fail_fast: bool,

    /// Pin the published version in each staged example's dependencies
    pub pin_published: bool,
}

impl RunConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3000,
            install_command: vec!["yarn".to_string(), "install".to_string()],
            dev_command: vec![
                "yarn".to_string(),
                "dev".to_string(),
                "--port".to_string(),
                "{port}".to_string(),
            ],
            test_command: vec![
                "yarn".to_string(),
                "run".to_string(),
                "testcafe:ci".to_string(),
            ],
            test_dir: PathBuf::from("."),
            ready_timeout_secs: 180,
            grace_period_ms: 2000,
            fail_fast: false,
            pin_published: true,
        }
    }
}

/// Dependency cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable dependency caching
    pub enabled: bool,

    /// Cache root directory
    pub dir: PathBuf,

    /// Name of the installed dependency directory inside a project
    pub dependency_dir: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(".e2e-tests-cache"),
            dependency_dir: "node_modules".to_string(),
        }
    }
}

/// A single example project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExampleConfig {
    /// Example name, also its cache key
    pub name: String,

    /// Source directory of the example
    pub path: PathBuf,
}

//! Local package registry lifecycle
//!
//! `RegistryController::start` boots the registry process, waits until it
//! answers, and redirects every configured package-manager client to it.
//! The returned [`RegistryLease`] is the only way back: releasing it (or
//! dropping it) points the clients at their previous registry again.

mod setting;

pub use setting::{PackageManagerSetting, RegistrySetting};

#[cfg(test)]
pub(crate) use setting::testing;

use crate::config::RegistryConfig;
use crate::error::{ShipcheckError, ShipcheckResult};
use crate::process::{CommandSpec, ManagedProcess};
use crate::readiness::{wait_until, Probe};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Grace period for the registry process on shutdown
const REGISTRY_GRACE: Duration = Duration::from_secs(2);

/// Starts the local registry and hands out leases on the registry setting
pub struct RegistryController {
    config: RegistryConfig,
    settings: Vec<Box<dyn RegistrySetting>>,
    quiet: bool,
}

impl RegistryController {
    pub fn new(config: RegistryConfig, settings: Vec<Box<dyn RegistrySetting>>) -> Self {
        Self {
            config,
            settings,
            quiet: true,
        }
    }

    /// Stream the registry's own output to the terminal
    pub fn with_output(mut self, show: bool) -> Self {
        self.quiet = !show;
        self
    }

    pub fn local_url(&self) -> String {
        self.config.local_url()
    }

    /// Start the registry and redirect every client to it
    pub async fn start(&self) -> ShipcheckResult<RegistryLease<'_>> {
        let mut vars = HashMap::new();
        vars.insert("port", self.config.port.to_string());
        vars.insert("host", self.config.host.clone());
        let spec = CommandSpec::from_argv(&self.config.command)?.render(&vars);

        info!("Starting local registry: {}", spec.display());
        let mut process = spec.spawn("registry", self.quiet)?;

        let probe = Probe::http(&self.config.host, self.config.port);
        let ready = wait_until(
            &probe,
            "local registry",
            self.config.startup_timeout(),
            || match process.try_exit_code() {
                None => true,
                Some(code) => {
                    warn!("Registry process exited early with {:?}", code);
                    false
                }
            },
        )
        .await;

        if let Err(e) = ready {
            if let Err(stop_err) = process.terminate(REGISTRY_GRACE).await {
                warn!("Failed to stop registry process: {}", stop_err);
            }
            return Err(e);
        }

        // Built before any client is switched; its Drop covers partial redirects
        let local = self.local_url();
        let mut lease = RegistryLease {
            settings: &self.settings,
            originals: Vec::with_capacity(self.settings.len()),
            process: Some(process),
            url: local.clone(),
            released: false,
        };

        for setting in &self.settings {
            let original = match setting.get().await {
                Ok(Some(url)) => url,
                Ok(None) => self.config.remote_url.clone(),
                Err(e) => {
                    warn!(
                        "Could not read {} registry, will restore {}: {}",
                        setting.name(),
                        self.config.remote_url,
                        e
                    );
                    self.config.remote_url.clone()
                }
            };
            lease.originals.push(original);

            if let Err(e) = setting.set(&local).await {
                error!("Failed to point {} at {}: {}", setting.name(), local, e);
                if let Err(restore_err) = lease.release().await {
                    warn!("Rollback after failed redirect also failed: {}", restore_err);
                }
                return Err(e);
            }
            debug!("{} registry now {}", setting.name(), local);
        }

        info!("Package managers now use {}", local);
        Ok(lease)
    }

    /// Restore the clients and stop the registry
    pub async fn stop(&self, lease: RegistryLease<'_>) -> ShipcheckResult<()> {
        lease.release().await
    }
}

/// Proof that the clients point at the local registry.
///
/// Holds the values to restore. Dropping an unreleased lease restores them
/// synchronously.
pub struct RegistryLease<'a> {
    settings: &'a [Box<dyn RegistrySetting>],
    originals: Vec<String>,
    process: Option<ManagedProcess>,
    url: String,
    released: bool,
}

impl RegistryLease<'_> {
    /// URL of the local registry
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Restore every client, then stop the registry process.
    ///
    /// Every client is attempted; the first failure is returned.
    pub async fn release(mut self) -> ShipcheckResult<()> {
        self.released = true;
        let mut first_err: Option<ShipcheckError> = None;

        for (setting, original) in self.settings.iter().zip(&self.originals) {
            match setting.set(original).await {
                Ok(()) => info!("Restored {} registry to {}", setting.name(), original),
                Err(e) => {
                    error!("Failed to restore {} registry to {}: {}", setting.name(), original, e);
                    first_err.get_or_insert(e);
                }
            }
        }

        if let Some(process) = self.process.take() {
            if let Err(e) = process.terminate(REGISTRY_GRACE).await {
                warn!("Failed to stop registry process: {}", e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for RegistryLease<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        warn!("Registry lease dropped without release, restoring settings");
        for (setting, original) in self.settings.iter().zip(&self.originals) {
            if let Err(e) = setting.set_blocking(original) {
                error!("Failed to restore {} registry to {}: {}", setting.name(), original, e);
            }
        }
        // ManagedProcess kills the registry on drop
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::testing::{fake_registry, unused_port, MemorySetting};
    use super::*;

    const ORIGINAL: &str = "https://registry.npmjs.org/";

    fn config(port: u16, command: &[&str]) -> RegistryConfig {
        RegistryConfig {
            command: command.iter().map(|s| s.to_string()).collect(),
            host: "127.0.0.1".to_string(),
            port,
            remote_url: ORIGINAL.to_string(),
            clients: vec![],
            startup_timeout_secs: 1,
        }
    }

    fn controller(config: RegistryConfig, settings: &[MemorySetting]) -> RegistryController {
        let boxed = settings
            .iter()
            .cloned()
            .map(|s| Box::new(s) as Box<dyn RegistrySetting>)
            .collect();
        RegistryController::new(config, boxed)
    }

    #[tokio::test]
    async fn start_redirects_and_release_restores() {
        let port = fake_registry();
        let npm = MemorySetting::new(ORIGINAL);
        let yarn = MemorySetting::new("https://registry.yarnpkg.com");
        let controller = controller(config(port, &["sleep", "30"]), &[npm.clone(), yarn.clone()]);

        let lease = controller.start().await.unwrap();
        let local = format!("http://127.0.0.1:{port}");
        assert_eq!(lease.url(), local);
        assert_eq!(npm.current(), local);
        assert_eq!(yarn.current(), local);

        controller.stop(lease).await.unwrap();
        assert_eq!(npm.current(), ORIGINAL);
        assert_eq!(yarn.current(), "https://registry.yarnpkg.com");
    }

    #[tokio::test]
    async fn startup_timeout_leaves_setting_untouched() {
        let npm = MemorySetting::new(ORIGINAL);
        let controller = controller(config(unused_port(), &["sleep", "30"]), &[npm.clone()]);

        let err = controller.start().await.err().unwrap();
        assert!(matches!(err, ShipcheckError::StartupTimeout { .. }));
        assert_eq!(npm.current(), ORIGINAL);
    }

    #[tokio::test]
    async fn early_exit_stops_waiting() {
        let npm = MemorySetting::new(ORIGINAL);
        let mut cfg = config(unused_port(), &["true"]);
        cfg.startup_timeout_secs = 30;
        let controller = controller(cfg, &[npm.clone()]);

        let started = std::time::Instant::now();
        let err = controller.start().await.err().unwrap();
        assert!(matches!(err, ShipcheckError::StartupTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn dropped_lease_restores() {
        let port = fake_registry();
        let npm = MemorySetting::new(ORIGINAL);
        let controller = controller(config(port, &["sleep", "30"]), &[npm.clone()]);

        {
            let _lease = controller.start().await.unwrap();
            assert_ne!(npm.current(), ORIGINAL);
        }
        assert_eq!(npm.current(), ORIGINAL);
    }

    #[tokio::test]
    async fn cancelled_start_restores_switched_clients() {
        let port = fake_registry();
        let npm = MemorySetting::new(ORIGINAL);
        let yarn = MemorySetting::new("https://registry.yarnpkg.com").with_set_delay(Duration::from_secs(3));
        let controller = controller(config(port, &["sleep", "30"]), &[npm.clone(), yarn.clone()]);

        let result = tokio::time::timeout(Duration::from_millis(1500), controller.start()).await;

        assert!(result.is_err(), "start should still be waiting on the slow client");
        assert_eq!(npm.current(), ORIGINAL);
        assert_eq!(yarn.current(), "https://registry.yarnpkg.com");
    }

    #[tokio::test]
    async fn failed_set_rolls_back_earlier_clients() {
        let port = fake_registry();
        let npm = MemorySetting::new(ORIGINAL);
        let mut broken = MemorySetting::new("https://mirror.example");
        broken.fail_set = true;
        let controller = controller(config(port, &["sleep", "30"]), &[npm.clone(), broken.clone()]);

        assert!(controller.start().await.is_err());
        assert_eq!(npm.current(), ORIGINAL);
        assert_eq!(broken.current(), "https://mirror.example");
    }
}

//! Run driver: registry, bump, publish, examples, cleanup
//!
//! The body of a run is raced against Ctrl-C. Whatever happens inside it,
//! the cleanup path afterwards restores the manifest, releases the registry
//! lease and removes the temporary workspace.

use crate::cache::CacheManager;
use crate::config::{Config, ExampleConfig};
use crate::error::{ShipcheckError, ShipcheckResult};
use crate::example::{ExampleProject, ExampleReport, ExampleRunner, PinnedPackage};
use crate::manifest::{self, next_version, PackageVersionBumper};
use crate::process::CommandSpec;
use crate::publish::Publisher;
use crate::registry::{PackageManagerSetting, RegistryController, RegistryLease, RegistrySetting};
use crate::ui::{self, ExampleProgress, TaskSpinner, UiContext};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Per-invocation overrides of the configuration
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Run only these examples, in config order
    pub only: Vec<String>,
    /// Skip bump and publish, test against whatever the registry serves
    pub skip_publish: bool,
    pub no_cache: bool,
    pub port: Option<u16>,
    pub fail_fast: bool,
    /// Leave the temporary workspace on disk
    pub keep_workspace: bool,
    /// Stream child process output
    pub show_output: bool,
}

/// Outcome of a whole run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Version published for this run, if any
    pub version: Option<String>,
    pub reports: Vec<ExampleReport>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn passed(&self) -> usize {
        self.reports.iter().filter(|r| r.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.reports.iter().filter(|r| r.failed()).count()
    }

    pub fn success(&self) -> bool {
        self.failed() == 0
    }
}

/// State the cleanup path needs after the body has finished or been dropped
struct RunState<'r> {
    lease: Option<RegistryLease<'r>>,
    version: Option<String>,
    reports: Vec<ExampleReport>,
}

pub struct Pipeline {
    config: Config,
    settings: Vec<Box<dyn RegistrySetting>>,
    options: RunOptions,
    ui: UiContext,
}

impl Pipeline {
    pub fn new(mut config: Config, options: RunOptions, ui: UiContext) -> Self {
        if let Some(port) = options.port {
            config.run.port = port;
        }
        if options.fail_fast {
            config.run.fail_fast = true;
        }
        let settings = PackageManagerSetting::for_clients(&config.registry.clients);
        Self {
            config,
            settings,
            options,
            ui,
        }
    }

    /// Replace the package-manager settings the registry lease manages
    pub fn with_settings(mut self, settings: Vec<Box<dyn RegistrySetting>>) -> Self {
        self.settings = settings;
        self
    }

    /// Examples selected for this run
    fn selected(&self) -> ShipcheckResult<Vec<ExampleConfig>> {
        if let Some(unknown) = self
            .options
            .only
            .iter()
            .find(|name| !self.config.examples.iter().any(|e| &e.name == *name))
        {
            return Err(ShipcheckError::User(format!("unknown example {unknown:?}")));
        }

        Ok(self
            .config
            .examples
            .iter()
            .filter(|e| self.options.only.is_empty() || self.options.only.contains(&e.name))
            .cloned()
            .collect())
    }

    pub async fn run(self) -> ShipcheckResult<RunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = Instant::now();
        info!("Starting run {}", run_id);

        let examples = self.selected()?;
        let publisher = if self.options.skip_publish {
            None
        } else {
            Some(Publisher::new(&self.config.package)?)
        };

        let bumper = PackageVersionBumper::new(&self.config.package.path);
        if bumper.has_backup() {
            warn!(
                "Found leftover {}, restoring it before the run",
                bumper.backup_path().display()
            );
            bumper.revert().await?;
        }

        let workspace = tempfile::Builder::new()
            .prefix("shipcheck-")
            .tempdir()
            .map_err(|e| ShipcheckError::io("creating temporary workspace", e))?;
        debug!("Workspace at {}", workspace.path().display());

        let Pipeline {
            config,
            settings,
            options,
            ui,
        } = self;
        let registry = RegistryController::new(config.registry.clone(), settings)
            .with_output(options.show_output);

        let mut state = RunState {
            lease: None,
            version: None,
            reports: Vec::new(),
        };

        let body = Body {
            config: &config,
            options: &options,
            ui: &ui,
            registry: &registry,
            bumper: &bumper,
            publisher: publisher.as_ref(),
            workspace: workspace.path().to_path_buf(),
        };

        let outcome = tokio::select! {
            result = body.run(&examples, &mut state) => result,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cleaning up");
                Err(ShipcheckError::Cancelled)
            }
        };

        let cleanup = cleanup(
            &bumper,
            &registry,
            state.lease.take(),
            workspace,
            options.keep_workspace,
        )
        .await;

        let summary = RunSummary {
            run_id,
            started_at,
            version: state.version,
            reports: state.reports,
            elapsed: started.elapsed(),
        };

        match (outcome, cleanup) {
            (Ok(()), Ok(())) => Ok(summary),
            (Ok(()), Err(e)) => Err(e),
            (Err(e), cleanup) => {
                if let Err(cleanup_err) = cleanup {
                    error!("Cleanup after failed run also failed: {}", cleanup_err);
                }
                Err(e)
            }
        }
    }
}

/// Borrowed pieces of one run, alive only as long as the body future
struct Body<'a> {
    config: &'a Config,
    options: &'a RunOptions,
    ui: &'a UiContext,
    registry: &'a RegistryController,
    bumper: &'a PackageVersionBumper,
    publisher: Option<&'a Publisher>,
    workspace: PathBuf,
}

impl<'a> Body<'a> {
    async fn run(
        &self,
        examples: &[ExampleConfig],
        state: &mut RunState<'a>,
    ) -> ShipcheckResult<()> {
        let mut spinner = TaskSpinner::new(self.ui);
        spinner.start("Starting local registry...");
        let lease = match self.registry.start().await {
            Ok(lease) => lease,
            Err(e) => {
                spinner.stop_error("Local registry did not start");
                return Err(e);
            }
        };
        let registry_url = lease.url().to_string();
        state.lease = Some(lease);
        spinner.stop(&format!("Registry ready at {}", registry_url));

        let pin = match self.publisher {
            Some(publisher) => {
                let version = self.publish(publisher, &registry_url).await?;
                state.version = Some(version.clone());
                if self.config.run.pin_published {
                    let name = manifest::package_name(self.bumper.manifest_path()).await?;
                    Some(PinnedPackage { name, version })
                } else {
                    None
                }
            }
            None => {
                ui::step_info(self.ui, "Skipping publish");
                None
            }
        };

        self.run_examples(examples, pin, state).await;
        Ok(())
    }

    /// Bump, publish and restore the manifest; returns the published version
    async fn publish(&self, publisher: &Publisher, registry: &str) -> ShipcheckResult<String> {
        let strategy = self.config.package.bump;
        let tag = publisher.dist_tag().to_string();
        let version = self
            .bumper
            .bump(|current| next_version(strategy, current, &tag))
            .await?;

        let mut spinner = TaskSpinner::new(self.ui);
        spinner.start(&format!("Publishing {} with tag {}...", version, tag));
        let published = publisher.publish(registry).await;
        let reverted = self.bumper.revert().await;

        match published {
            Ok(()) => spinner.stop(&format!("Published {} with tag {}", version, tag)),
            Err(e) => {
                spinner.stop_error("Publish failed");
                if let Err(revert_err) = reverted {
                    error!("Failed to restore manifest: {}", revert_err);
                }
                return Err(e);
            }
        }
        reverted?;
        Ok(version)
    }

    async fn run_examples(
        &self,
        examples: &[ExampleConfig],
        pin: Option<PinnedPackage>,
        state: &mut RunState<'a>,
    ) {
        if examples.is_empty() {
            ui::step_warn(self.ui, "No examples configured");
            return;
        }

        let install = match CommandSpec::from_argv(&self.config.run.install_command) {
            Ok(spec) => spec,
            Err(e) => {
                // Validated on load; only reachable with a hand-built config
                error!("Invalid install command: {}", e);
                return;
            }
        };
        let cache = CacheManager::new(&self.config.cache, install);
        let cache = if self.options.no_cache {
            cache.disabled()
        } else {
            cache
        };

        let runner = ExampleRunner::new(self.config.run.clone(), cache)
            .with_pin(pin)
            .with_output(self.options.show_output);

        let mut progress = ExampleProgress::new(self.ui, examples.len());
        let mut stopped = false;

        for example in examples {
            if stopped {
                state.reports.push(ExampleReport::skipped(&example.name));
                continue;
            }

            let project = ExampleProject::new(example, &self.workspace, self.config.run.port);
            progress.begin(&project.name);
            let report = runner.run(&project).await;
            progress.advance();

            if report.failed() && self.config.run.fail_fast {
                warn!("Stopping after failure of {}", report.name);
                stopped = true;
            }
            state.reports.push(report);
        }
        progress.finish();
    }
}

/// Restore the manifest, release the registry and remove the workspace.
///
/// Every step runs; the first failure is returned.
async fn cleanup(
    bumper: &PackageVersionBumper,
    registry: &RegistryController,
    lease: Option<RegistryLease<'_>>,
    workspace: TempDir,
    keep_workspace: bool,
) -> ShipcheckResult<()> {
    let mut first_err: Option<ShipcheckError> = None;

    if bumper.has_backup() {
        if let Err(e) = bumper.revert().await {
            error!("Failed to restore {}: {}", bumper.manifest_path().display(), e);
            first_err.get_or_insert(e);
        }
    }

    if let Some(lease) = lease {
        if let Err(e) = registry.stop(lease).await {
            first_err.get_or_insert(e);
        }
    }

    if keep_workspace {
        let path = workspace.keep();
        info!("Kept workspace at {}", path.display());
    } else {
        let path = workspace.path().to_path_buf();
        if let Err(e) = workspace.close() {
            warn!("Failed to remove workspace {}: {}", path.display(), e);
            first_err.get_or_insert(ShipcheckError::io(
                format!("removing workspace {}", path.display()),
                e,
            ));
        }
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

//! Per-example run: stage, install, serve, test, tear down
//!
//! Each example walks a fixed phase sequence. Teardown runs after every
//! other phase regardless of outcome, so the dev server never outlives its
//! example and the shared port is free for the next one.

use crate::cache::{CacheManager, CacheOutcome};
use crate::config::{ExampleConfig, RunConfig};
use crate::error::{ShipcheckError, ShipcheckResult};
use crate::fsutil::copy_dir_clean;
use crate::manifest::{self, MANIFEST_FILE};
use crate::process::{CommandSpec, ManagedProcess};
use crate::readiness::{ensure_port_free, free_port, wait_until, Probe};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How long teardown waits for the port to be released
const PORT_RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

/// An example staged into the run's workspace
#[derive(Debug, Clone)]
pub struct ExampleProject {
    pub name: String,
    pub source_path: PathBuf,
    pub workspace_path: PathBuf,
    pub port: u16,
}

impl ExampleProject {
    pub fn new(config: &ExampleConfig, workspace_root: &Path, port: u16) -> Self {
        Self {
            name: config.name.clone(),
            source_path: config.path.clone(),
            workspace_path: workspace_root.join("examples").join(&config.name),
            port,
        }
    }
}

/// Phases of one example run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Staging,
    Installing,
    Serving,
    Testing,
    TornDown,
}

impl Phase {
    /// The phase that normally follows this one
    fn successor(self) -> Option<Phase> {
        match self {
            Self::Staging => Some(Self::Installing),
            Self::Installing => Some(Self::Serving),
            Self::Serving => Some(Self::Testing),
            Self::Testing => Some(Self::TornDown),
            Self::TornDown => None,
        }
    }

    /// Forward by one step, or straight to teardown from anywhere live
    pub fn can_advance_to(self, next: Phase) -> bool {
        self != Self::TornDown && (next == Self::TornDown || self.successor() == Some(next))
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Staging => "staging",
            Self::Installing => "installing",
            Self::Serving => "serving",
            Self::Testing => "testing",
            Self::TornDown => "torn down",
        };
        write!(f, "{}", name)
    }
}

/// Enforces the phase order of one example
#[derive(Debug)]
pub struct PhaseTracker {
    current: Phase,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            current: Phase::Staging,
        }
    }

    pub fn current(&self) -> Phase {
        self.current
    }

    pub fn advance(&mut self, next: Phase) -> ShipcheckResult<()> {
        if !self.current.can_advance_to(next) {
            return Err(ShipcheckError::InvalidTransition {
                from: self.current.to_string(),
                to: next.to_string(),
            });
        }
        debug!("Phase {} -> {}", self.current, next);
        self.current = next;
        Ok(())
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one example
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExampleOutcome {
    Passed,
    Failed { phase: Phase, error: String },
    Skipped,
}

/// Everything recorded about one example run
#[derive(Debug, Clone, Serialize)]
pub struct ExampleReport {
    pub name: String,
    /// Last phase entered before teardown
    pub phase: Phase,
    pub outcome: ExampleOutcome,
    pub teardown_error: Option<String>,
    pub cache: Option<CacheOutcome>,
    pub elapsed: Duration,
}

impl ExampleReport {
    pub fn skipped(name: &str) -> Self {
        Self {
            name: name.to_string(),
            phase: Phase::Staging,
            outcome: ExampleOutcome::Skipped,
            teardown_error: None,
            cache: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Passed every phase, teardown included
    pub fn passed(&self) -> bool {
        matches!(self.outcome, ExampleOutcome::Passed) && self.teardown_error.is_none()
    }

    pub fn failed(&self) -> bool {
        !self.passed() && !matches!(self.outcome, ExampleOutcome::Skipped)
    }
}

/// Published package to pin in staged manifests
#[derive(Debug, Clone)]
pub struct PinnedPackage {
    pub name: String,
    pub version: String,
}

/// Runs examples one at a time against a shared port
pub struct ExampleRunner {
    run: RunConfig,
    cache: CacheManager,
    pin: Option<PinnedPackage>,
    show_output: bool,
}

impl ExampleRunner {
    pub fn new(run: RunConfig, cache: CacheManager) -> Self {
        Self {
            run,
            cache,
            pin: None,
            show_output: false,
        }
    }

    /// Pin this package version in every staged manifest
    pub fn with_pin(mut self, pin: Option<PinnedPackage>) -> Self {
        self.pin = pin;
        self
    }

    /// Stream dev server and test output to the terminal
    pub fn with_output(mut self, show: bool) -> Self {
        self.show_output = show;
        self
    }

    pub fn url(&self, project: &ExampleProject) -> String {
        format!("http://{}:{}", self.run.host, project.port)
    }

    /// Run every phase of `project`; teardown always runs
    pub async fn run(&self, project: &ExampleProject) -> ExampleReport {
        let started = Instant::now();
        let mut tracker = PhaseTracker::new();
        let mut server: Option<ManagedProcess> = None;
        let mut cache = None;

        info!("Running example {}", project.name);
        let result = self
            .drive(project, &mut tracker, &mut server, &mut cache)
            .await;

        let reached = tracker.current();
        let outcome = match result {
            Ok(()) => ExampleOutcome::Passed,
            Err(e) => {
                error!("Example {} failed while {}: {}", project.name, reached, e);
                ExampleOutcome::Failed {
                    phase: reached,
                    error: e.to_string(),
                }
            }
        };

        let teardown_error = match self.teardown(project, &mut tracker, server.take()).await {
            Ok(()) => None,
            Err(e) => {
                error!("Teardown of {} failed: {}", project.name, e);
                Some(e.to_string())
            }
        };

        ExampleReport {
            name: project.name.clone(),
            phase: reached,
            outcome,
            teardown_error,
            cache,
            elapsed: started.elapsed(),
        }
    }

    async fn drive(
        &self,
        project: &ExampleProject,
        tracker: &mut PhaseTracker,
        server: &mut Option<ManagedProcess>,
        cache: &mut Option<CacheOutcome>,
    ) -> ShipcheckResult<()> {
        self.stage(project).await?;

        tracker.advance(Phase::Installing)?;
        *cache = Some(
            self.cache
                .fetch_or_install(&project.workspace_path, &project.name)
                .await?,
        );

        tracker.advance(Phase::Serving)?;
        self.serve(project, server).await?;

        tracker.advance(Phase::Testing)?;
        self.test(project).await
    }

    /// Clean copy of the source into the workspace
    async fn stage(&self, project: &ExampleProject) -> ShipcheckResult<()> {
        info!(
            "Copying {} from {} to {}",
            project.name,
            project.source_path.display(),
            project.workspace_path.display()
        );

        let skip = [self.cache.dependency_dir().to_string()];
        copy_dir_clean(&project.source_path, &project.workspace_path, &skip).await?;

        if let Some(ref pin) = self.pin {
            let manifest_path = project.workspace_path.join(MANIFEST_FILE);
            if manifest_path.is_file() {
                if manifest::set_dependency(&manifest_path, &pin.name, &pin.version).await? {
                    info!("Pinned {}@{} in {}", pin.name, pin.version, project.name);
                } else {
                    debug!("{} does not depend on {}", project.name, pin.name);
                }
            }
        }
        Ok(())
    }

    fn vars(&self, project: &ExampleProject) -> HashMap<&'static str, String> {
        let mut vars = HashMap::new();
        vars.insert("port", project.port.to_string());
        vars.insert("host", self.run.host.clone());
        vars.insert("url", self.url(project));
        vars.insert("name", project.name.clone());
        vars
    }

    /// Spawn the dev server and wait until it answers
    async fn serve(
        &self,
        project: &ExampleProject,
        slot: &mut Option<ManagedProcess>,
    ) -> ShipcheckResult<()> {
        ensure_port_free(project.port)?;

        let spec = CommandSpec::from_argv(&self.run.dev_command)?
            .render(&self.vars(project))
            .current_dir(&project.workspace_path)
            .env("PORT", project.port.to_string());

        let process = slot.insert(spec.spawn(&format!("{} dev server", project.name), !self.show_output)?);

        let probe = Probe::http(&self.run.host, project.port);
        wait_until(
            &probe,
            &format!("{} dev server", project.name),
            self.run.ready_timeout(),
            || match process.try_exit_code() {
                None => true,
                Some(code) => {
                    warn!("Dev server for {} exited early with {:?}", project.name, code);
                    false
                }
            },
        )
        .await
    }

    /// Run the browser test suite against the serving URL
    async fn test(&self, project: &ExampleProject) -> ShipcheckResult<()> {
        let url = self.url(project);
        let spec = CommandSpec::from_argv(&self.run.test_command)?
            .render(&self.vars(project))
            .current_dir(&self.run.test_dir)
            .env("BASE_URL", url.clone())
            .env("PORT", project.port.to_string());

        info!("Ready. Running tests for {} against {}", project.name, url);

        let code = if self.show_output {
            spec.status().await?
        } else {
            let output = spec.output().await?;
            if !output.success() {
                warn!("Test output for {}:\n{}", project.name, output.tail());
            }
            output.code
        };

        match code {
            Some(0) => {
                info!("Tests passed for {}", project.name);
                Ok(())
            }
            other => Err(ShipcheckError::TestSuiteFailure {
                project: project.name.clone(),
                code: other.unwrap_or(-1),
            }),
        }
    }

    /// Stop the dev server and make sure the port is free
    async fn teardown(
        &self,
        project: &ExampleProject,
        tracker: &mut PhaseTracker,
        server: Option<ManagedProcess>,
    ) -> ShipcheckResult<()> {
        tracker.advance(Phase::TornDown)?;

        // The port only needs releasing if this example started a server on it
        let Some(process) = server else {
            debug!("Nothing to tear down for {}", project.name);
            return Ok(());
        };

        let stopped = process.terminate(self.run.grace_period()).await;
        let released = free_port(project.port, PORT_RELEASE_TIMEOUT).await;
        debug!("Tore down {}", project.name);

        stopped.and(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn phase_order_is_enforced() {
        let mut tracker = PhaseTracker::new();
        assert!(tracker.advance(Phase::Serving).is_err());
        tracker.advance(Phase::Installing).unwrap();
        assert!(tracker.advance(Phase::Staging).is_err());
        tracker.advance(Phase::Serving).unwrap();
        tracker.advance(Phase::Testing).unwrap();
        tracker.advance(Phase::TornDown).unwrap();
        assert!(tracker.advance(Phase::TornDown).is_err());
    }

    #[test]
    fn teardown_reachable_from_every_live_phase() {
        for phase in [Phase::Staging, Phase::Installing, Phase::Serving, Phase::Testing] {
            assert!(phase.can_advance_to(Phase::TornDown));
        }
        assert!(!Phase::TornDown.can_advance_to(Phase::Staging));
    }

    #[test]
    fn report_pass_requires_clean_teardown() {
        let mut report = ExampleReport::skipped("basic");
        assert!(!report.passed());
        assert!(!report.failed());

        report.outcome = ExampleOutcome::Passed;
        assert!(report.passed());

        report.teardown_error = Some("port 3000 still in use".into());
        assert!(!report.passed());
        assert!(report.failed());
    }

    #[cfg(unix)]
    mod process_tests {
        use super::*;
        use crate::process::pid_alive;
        use crate::readiness::port_is_free;

        fn sh(script: &str) -> Vec<String> {
            vec!["sh".to_string(), "-c".to_string(), script.to_string()]
        }

        fn python3_available() -> bool {
            std::process::Command::new("python3")
                .arg("--version")
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false)
        }

        fn unused_port() -> u16 {
            std::net::TcpListener::bind("127.0.0.1:0")
                .unwrap()
                .local_addr()
                .unwrap()
                .port()
        }

        struct Fixture {
            temp: TempDir,
            run: RunConfig,
            cache: CacheConfig,
        }

        impl Fixture {
            fn new(dev: Vec<String>, test: Vec<String>) -> Self {
                let temp = TempDir::new().unwrap();
                let source = temp.path().join("source");
                std::fs::create_dir_all(&source).unwrap();
                std::fs::write(
                    source.join(MANIFEST_FILE),
                    r#"{"name":"basic","dependencies":{"theme":"^1.0.0"}}"#,
                )
                .unwrap();

                let run = RunConfig {
                    host: "127.0.0.1".to_string(),
                    port: unused_port(),
                    install_command: sh("mkdir -p node_modules"),
                    dev_command: dev,
                    test_command: test,
                    test_dir: temp.path().to_path_buf(),
                    ready_timeout_secs: 1,
                    grace_period_ms: 500,
                    fail_fast: false,
                    pin_published: true,
                };
                let cache = CacheConfig {
                    enabled: true,
                    dir: temp.path().join("cache"),
                    dependency_dir: "node_modules".to_string(),
                };
                Self { temp, run, cache }
            }

            fn runner(&self) -> ExampleRunner {
                let install = CommandSpec::from_argv(&self.run.install_command).unwrap();
                ExampleRunner::new(self.run.clone(), CacheManager::new(&self.cache, install))
            }

            fn project(&self, name: &str) -> ExampleProject {
                let config = ExampleConfig {
                    name: name.to_string(),
                    path: self.temp.path().join("source"),
                };
                ExampleProject::new(&config, &self.temp.path().join("workspace"), self.run.port)
            }
        }

        #[tokio::test]
        #[serial]
        async fn serving_timeout_still_tears_down() {
            let fixture = Fixture::new(sh("echo $$ > server.pid; exec sleep 30"), sh("exit 0"));
            let project = fixture.project("basic");

            let report = fixture.runner().run(&project).await;

            match report.outcome {
                ExampleOutcome::Failed { phase, ref error } => {
                    assert_eq!(phase, Phase::Serving);
                    assert!(error.contains("did not become reachable"));
                }
                ref other => panic!("unexpected outcome: {other:?}"),
            }
            assert!(report.teardown_error.is_none());

            let pid: u32 = std::fs::read_to_string(project.workspace_path.join("server.pid"))
                .unwrap()
                .trim()
                .parse()
                .unwrap();
            assert!(!pid_alive(pid));
        }

        #[tokio::test]
        #[serial]
        async fn install_failure_skips_serving() {
            let mut fixture = Fixture::new(sh("touch served; sleep 30"), sh("exit 0"));
            fixture.run.install_command = sh("exit 7");
            let project = fixture.project("basic");

            let report = fixture.runner().run(&project).await;

            assert!(matches!(
                report.outcome,
                ExampleOutcome::Failed { phase: Phase::Installing, .. }
            ));
            assert!(!project.workspace_path.join("served").exists());
        }

        #[tokio::test]
        #[serial]
        async fn occupied_port_fails_without_killing_holder() {
            let fixture = Fixture::new(sh("touch served; sleep 30"), sh("exit 0"));
            let project = fixture.project("basic");
            let holder = std::net::TcpListener::bind(("127.0.0.1", project.port)).unwrap();

            let report = fixture.runner().run(&project).await;

            match report.outcome {
                ExampleOutcome::Failed { phase, ref error } => {
                    assert_eq!(phase, Phase::Serving);
                    assert!(error.contains("still in use"));
                }
                ref other => panic!("unexpected outcome: {other:?}"),
            }
            assert!(report.teardown_error.is_none());
            assert!(!project.workspace_path.join("served").exists());
            assert!(!port_is_free(project.port));
            drop(holder);
        }

        #[tokio::test]
        #[serial]
        async fn staging_pins_published_version() {
            let fixture = Fixture::new(sh("sleep 30"), sh("exit 0"));
            let project = fixture.project("basic");
            let runner = fixture.runner().with_pin(Some(PinnedPackage {
                name: "theme".into(),
                version: "1.0.1700000000000".into(),
            }));

            runner.stage(&project).await.unwrap();

            let manifest = std::fs::read_to_string(project.workspace_path.join(MANIFEST_FILE)).unwrap();
            assert!(manifest.contains("\"theme\": \"1.0.1700000000000\""));
        }

        #[tokio::test]
        #[serial]
        async fn test_failure_reports_and_frees_port() {
            if !python3_available() {
                eprintln!("python3 not found, skipping");
                return;
            }
            let mut fixture = Fixture::new(
                sh("exec python3 -m http.server {port} --bind 127.0.0.1"),
                sh("exit 3"),
            );
            fixture.run.ready_timeout_secs = 20;
            let project = fixture.project("basic");

            let report = fixture.runner().run(&project).await;

            match report.outcome {
                ExampleOutcome::Failed { phase, ref error } => {
                    assert_eq!(phase, Phase::Testing);
                    assert!(error.contains("exit code 3"));
                }
                ref other => panic!("unexpected outcome: {other:?}"),
            }
            assert!(report.teardown_error.is_none());
            assert!(port_is_free(project.port));
        }

        #[tokio::test]
        #[serial]
        async fn examples_share_port_sequentially() {
            if !python3_available() {
                eprintln!("python3 not found, skipping");
                return;
            }
            let mut fixture = Fixture::new(
                sh("exec python3 -m http.server {port} --bind 127.0.0.1"),
                sh("test \"$BASE_URL\" = \"{url}\""),
            );
            fixture.run.ready_timeout_secs = 20;
            let runner = fixture.runner();

            for name in ["basic", "gatsby"] {
                let project = fixture.project(name);
                let report = runner.run(&project).await;
                assert!(report.passed(), "{name} failed: {report:?}");
                assert!(port_is_free(project.port));
            }
        }
    }
}

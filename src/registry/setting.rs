//! Package-manager registry setting abstraction
//!
//! The active registry URL is global state owned by each package manager
//! (npm, yarn). It is read and written through their CLIs; this trait lets
//! the controller treat every client the same way.

use crate::error::{ShipcheckError, ShipcheckResult};
use crate::process::{CommandOutput, CommandSpec};
use async_trait::async_trait;
use tracing::debug;

/// One client's global registry setting
#[async_trait]
pub trait RegistrySetting: Send + Sync {
    /// Current registry URL, if the client reports one
    async fn get(&self) -> ShipcheckResult<Option<String>>;

    /// Point the client at `url`
    async fn set(&self, url: &str) -> ShipcheckResult<()>;

    /// Synchronous `set`, used when a lease is dropped without release
    fn set_blocking(&self, url: &str) -> ShipcheckResult<()>;

    /// Client name for display
    fn name(&self) -> &str;
}

/// Registry setting of an npm-compatible CLI (`<client> config get|set registry`)
#[derive(Debug, Clone)]
pub struct PackageManagerSetting {
    client: String,
}

impl PackageManagerSetting {
    pub fn new(client: impl Into<String>) -> Self {
        Self {
            client: client.into(),
        }
    }

    /// Build one setting per configured client
    pub fn for_clients(clients: &[String]) -> Vec<Box<dyn RegistrySetting>> {
        clients
            .iter()
            .map(|c| Box::new(Self::new(c.clone())) as Box<dyn RegistrySetting>)
            .collect()
    }

    fn spec(&self, args: &[&str]) -> CommandSpec {
        CommandSpec::new(
            self.client.clone(),
            args.iter().map(|a| a.to_string()).collect(),
        )
    }

    fn check(&self, spec: &CommandSpec, output: CommandOutput) -> ShipcheckResult<CommandOutput> {
        if output.success() {
            Ok(output)
        } else {
            Err(ShipcheckError::User(format!(
                "{} exited with {:?}: {}",
                spec.display(),
                output.code,
                output.tail()
            )))
        }
    }
}

/// Interpret `config get registry` output; npm prints "undefined" when unset
fn parse_registry(stdout: &str) -> Option<String> {
    let value = stdout.lines().rev().map(str::trim).find(|l| !l.is_empty())?;
    if value == "undefined" || value == "null" {
        None
    } else {
        Some(value.to_string())
    }
}

#[async_trait]
impl RegistrySetting for PackageManagerSetting {
    async fn get(&self) -> ShipcheckResult<Option<String>> {
        let spec = self.spec(&["config", "get", "registry"]);
        let output = spec.output().await?;
        let output = self.check(&spec, output)?;
        Ok(parse_registry(&output.stdout))
    }

    async fn set(&self, url: &str) -> ShipcheckResult<()> {
        debug!("Setting {} registry to {}", self.client, url);
        let spec = self.spec(&["config", "set", "registry", url]);
        let output = spec.output().await?;
        self.check(&spec, output).map(|_| ())
    }

    fn set_blocking(&self, url: &str) -> ShipcheckResult<()> {
        let spec = self.spec(&["config", "set", "registry", url]);
        let output = spec.output_blocking()?;
        self.check(&spec, output).map(|_| ())
    }

    fn name(&self) -> &str {
        &self.client
    }
}

//! Publishing the package to the local registry

use crate::config::PackageConfig;
use crate::error::{ShipcheckError, ShipcheckResult};
use crate::process::CommandSpec;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;

/// Authenticates against a registry and publishes one package directory
#[derive(Debug, Clone)]
pub struct Publisher {
    package_dir: PathBuf,
    dist_tag: String,
    auth_command: Vec<String>,
    publish_command: Vec<String>,
    username: String,
    password: String,
    email: String,
}

impl Publisher {
    pub fn new(config: &PackageConfig) -> ShipcheckResult<Self> {
        let tag = config.dist_tag.trim();
        if tag.is_empty() || tag == "latest" {
            return Err(ShipcheckError::User(format!(
                "refusing to publish under dist-tag {:?}",
                config.dist_tag
            )));
        }

        Ok(Self {
            package_dir: config.path.clone(),
            dist_tag: tag.to_string(),
            auth_command: config.auth_command.clone(),
            publish_command: config.publish_command.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            email: config.email.clone(),
        })
    }

    pub fn dist_tag(&self) -> &str {
        &self.dist_tag
    }

    fn vars(&self, registry: &str) -> HashMap<&'static str, String> {
        let mut vars = HashMap::new();
        vars.insert("registry", registry.to_string());
        vars.insert("tag", self.dist_tag.clone());
        vars.insert("username", self.username.clone());
        vars.insert("password", self.password.clone());
        vars.insert("email", self.email.clone());
        vars
    }

    /// Authenticate (if configured) and publish under the dist-tag
    pub async fn publish(&self, registry: &str) -> ShipcheckResult<()> {
        let vars = self.vars(registry);

        if !self.auth_command.is_empty() {
            info!("Authenticating against {}", registry);
            self.run_step("authenticate", &self.auth_command, &vars).await?;
        }

        info!(
            "Publishing {} to {} with tag {}",
            self.package_dir.display(),
            registry,
            self.dist_tag
        );
        self.run_step("publish", &self.publish_command, &vars).await?;

        info!("Published {}", self.package_dir.display());
        Ok(())
    }

    async fn run_step(
        &self,
        step: &str,
        argv: &[String],
        vars: &HashMap<&'static str, String>,
    ) -> ShipcheckResult<()> {
        let spec = CommandSpec::from_argv(argv)?
            .render(vars)
            .redact(&self.password)
            .current_dir(&self.package_dir);

        let output = match spec.output().await {
            Ok(output) => output,
            Err(e) => {
                return Err(ShipcheckError::PublishFailure {
                    step: step.to_string(),
                    output: e.to_string(),
                })
            }
        };

        if output.success() {
            Ok(())
        } else {
            Err(ShipcheckError::PublishFailure {
                step: step.to_string(),
                output: output.tail(),
            })
        }
    }
}

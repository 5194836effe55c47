//! Config command - show or initialize configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager, ExampleConfig};
use crate::error::ShipcheckResult;
use crate::ui::{self, UiContext};
use std::path::PathBuf;

/// Execute the config command
pub async fn execute(args: ConfigArgs, manager: &ConfigManager, ctx: &UiContext) -> ShipcheckResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(manager).await?,
        Some(ConfigAction::Path) => show_path(manager),
        Some(ConfigAction::Init { force }) => init_config(manager, ctx, force).await?,
    }

    Ok(())
}

async fn show_config(manager: &ConfigManager) -> ShipcheckResult<()> {
    let config = manager.load_or_default().await?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn show_path(manager: &ConfigManager) {
    println!("{}", manager.path().display());
}

/// Starter configuration with one example entry to edit
fn starter_config() -> Config {
    Config {
        examples: vec![ExampleConfig {
            name: "basic".to_string(),
            path: PathBuf::from("examples/basic"),
        }],
        ..Config::default()
    }
}

async fn init_config(manager: &ConfigManager, ctx: &UiContext, force: bool) -> ShipcheckResult<()> {
    let path = manager.path();

    if path.exists() && !force {
        ui::step_warn_hint(
            ctx,
            &format!("Config already exists at {}", path.display()),
            "Use --force to overwrite",
        );
        return Ok(());
    }

    manager.save(&starter_config()).await?;

    ui::step_ok_detail(ctx, "Configuration initialized", &path.display().to_string());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CONFIG_FILE_NAME;
    use tempfile::TempDir;

    #[tokio::test]
    async fn init_writes_loadable_config() {
        let temp = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(temp.path().join(CONFIG_FILE_NAME));

        init_config(&manager, &UiContext::non_interactive(), false)
            .await
            .unwrap();

        let config = manager.load().await.unwrap();
        assert_eq!(config.examples.len(), 1);
        assert_eq!(config.examples[0].path, temp.path().join("examples/basic"));
        assert_eq!(config.package.dist_tag, "ci");
    }

    #[tokio::test]
    async fn init_keeps_existing_without_force() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[run]\nport = 4000\n").unwrap();
        let manager = ConfigManager::with_path(path.clone());
        let ctx = UiContext::non_interactive();

        init_config(&manager, &ctx, false).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[run]\nport = 4000\n");

        init_config(&manager, &ctx, true).await.unwrap();
        assert_eq!(manager.load().await.unwrap().run.port, 3000);
    }
}

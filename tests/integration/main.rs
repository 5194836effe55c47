//! Integration tests for shipcheck

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn shipcheck(dir: &Path) -> Command {
        let mut cmd = cargo_bin_cmd!("shipcheck");
        cmd.current_dir(dir)
            .env_remove("SHIPCHECK_CONFIG")
            .env_remove("RUST_LOG")
            .env("CI", "1");
        cmd
    }

    /// Config that never touches real package-manager settings
    fn write_config(dir: &Path, extra: &str) {
        std::fs::create_dir_all(dir.join("package")).unwrap();
        std::fs::write(
            dir.join("package/package.json"),
            "{\n  \"name\": \"theme\",\n  \"version\": \"1.2.3\"\n}\n",
        )
        .unwrap();
        let config = format!(
            r#"[registry]
command = ["sleep", "30"]
host = "127.0.0.1"
port = 1
clients = []
startup_timeout_secs = 1

[package]
path = "package"
auth_command = []

[cache]
dir = "cache"
{extra}"#
        );
        std::fs::write(dir.join("shipcheck.toml"), config).unwrap();
    }

    #[test]
    fn help_displays() {
        let temp = TempDir::new().unwrap();
        shipcheck(temp.path())
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("release checks"));
    }

    #[test]
    fn version_displays() {
        let temp = TempDir::new().unwrap();
        shipcheck(temp.path())
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("shipcheck"));
    }

    #[test]
    fn config_path_defaults_to_cwd() {
        let temp = TempDir::new().unwrap();
        shipcheck(temp.path())
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("shipcheck.toml"));
    }

    #[test]
    fn config_path_found_in_parent() {
        let temp = TempDir::new().unwrap();
        write_config(temp.path(), "");
        let nested = temp.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        shipcheck(&nested)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("a/b").not());
    }

    #[test]
    fn config_show_defaults() {
        let temp = TempDir::new().unwrap();
        shipcheck(temp.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[registry]"))
            .stdout(predicate::str::contains("dist_tag = \"ci\""));
    }

    #[test]
    fn config_init_then_show() {
        let temp = TempDir::new().unwrap();
        shipcheck(temp.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration initialized"));

        assert!(temp.path().join("shipcheck.toml").is_file());

        shipcheck(temp.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[[examples]]"))
            .stdout(predicate::str::contains("name = \"basic\""));

        shipcheck(temp.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--force"));
    }

    #[test]
    fn run_without_config_fails_with_hint() {
        let temp = TempDir::new().unwrap();
        shipcheck(temp.path())
            .arg("run")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Configuration file not found"))
            .stderr(predicate::str::contains("shipcheck config init"));
    }

    #[test]
    fn run_rejects_latest_tag() {
        let temp = TempDir::new().unwrap();
        write_config(temp.path(), "");
        let config = std::fs::read_to_string(temp.path().join("shipcheck.toml")).unwrap();
        let config = config.replace("path = \"package\"", "path = \"package\"\ndist_tag = \"latest\"");
        std::fs::write(temp.path().join("shipcheck.toml"), config).unwrap();

        shipcheck(temp.path())
            .arg("run")
            .assert()
            .failure()
            .stderr(predicate::str::contains("dist_tag"));
    }

    #[test]
    fn run_registry_timeout_leaves_manifest_alone() {
        let temp = TempDir::new().unwrap();
        write_config(temp.path(), "");
        let manifest = temp.path().join("package/package.json");
        let before = std::fs::read(&manifest).unwrap();

        shipcheck(temp.path())
            .arg("run")
            .assert()
            .failure()
            .stderr(predicate::str::contains("did not become reachable"));

        assert_eq!(std::fs::read(&manifest).unwrap(), before);
        assert!(!temp.path().join("package/package.backup.json").exists());
    }

    #[test]
    fn run_rejects_unknown_example() {
        let temp = TempDir::new().unwrap();
        write_config(temp.path(), "");

        shipcheck(temp.path())
            .args(["run", "--only", "missing"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("unknown example"));
    }

    #[test]
    fn cache_list_empty() {
        let temp = TempDir::new().unwrap();
        write_config(temp.path(), "");

        shipcheck(temp.path())
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No cache entries"));
    }

    #[test]
    fn cache_list_and_clear() {
        let temp = TempDir::new().unwrap();
        write_config(temp.path(), "");
        std::fs::create_dir_all(temp.path().join("cache/basic/dep")).unwrap();
        std::fs::write(temp.path().join("cache/basic/dep/index.js"), "x").unwrap();

        shipcheck(temp.path())
            .args(["cache", "list", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::diff("basic\n"));

        shipcheck(temp.path())
            .args(["cache", "clear", "--yes"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Cleared 1 cache entry"));

        shipcheck(temp.path())
            .args(["cache", "list", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[]"));
    }

    #[test]
    fn invalid_config_is_reported() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("shipcheck.toml"), "[run]\nport = \"nope\"\n").unwrap();

        shipcheck(temp.path())
            .args(["cache", "list"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn completions_bash() {
        let temp = TempDir::new().unwrap();
        shipcheck(temp.path())
            .args(["completions", "bash"])
            .assert()
            .success()
            .stdout(predicate::str::contains("shipcheck"));
    }
}

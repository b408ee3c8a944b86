//! Integration tests for the haven CLI

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn haven() -> Command {
        cargo_bin_cmd!("haven")
    }

    /// Config isolated to a temp dir: own cache store, no event journal
    fn isolated_config(dir: &TempDir, extra: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        let cache_dir = dir.path().join("cache");
        let content = format!(
            "[general]\nevent_log = false\n\n[cache]\ndir = '{}'\n\n{}",
            cache_dir.display(),
            extra
        );
        std::fs::write(&path, content).unwrap();
        path
    }

    fn haven_with(config: &PathBuf) -> Command {
        let mut cmd = haven();
        cmd.arg("--config").arg(config);
        cmd
    }

    #[test]
    fn help_displays() {
        haven()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Offline request-interception"));
    }

    #[test]
    fn version_displays() {
        haven()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("haven"));
    }

    #[test]
    fn config_path() {
        haven()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let dir = TempDir::new().unwrap();
        let config = isolated_config(&dir, "");
        haven_with(&config)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[engine]"))
            .stdout(predicate::str::contains("[[rules]]"));
    }

    #[test]
    fn invalid_config_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[engine\nversion =").unwrap();
        haven_with(&path)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn route_read_api() {
        let dir = TempDir::new().unwrap();
        let config = isolated_config(&dir, "");
        haven_with(&config)
            .args(["route", "/api/products?category=veg"])
            .assert()
            .success()
            .stdout(predicate::str::contains("api-read"))
            .stdout(predicate::str::contains("NetworkFirst"))
            .stdout(predicate::str::contains("runtime-v1"))
            .stdout(predicate::str::contains("5s"));
    }

    #[test]
    fn route_auth_passes_through() {
        let dir = TempDir::new().unwrap();
        let config = isolated_config(&dir, "");
        haven_with(&config)
            .args(["route", "/api/auth/session"])
            .assert()
            .success()
            .stdout(predicate::str::contains("pass-through"))
            .stdout(predicate::str::contains("auth"));
    }

    #[test]
    fn route_mutation_is_network_only() {
        let dir = TempDir::new().unwrap();
        let config = isolated_config(&dir, "");
        haven_with(&config)
            .args(["route", "-X", "POST", "/api/products"])
            .assert()
            .success()
            .stdout(predicate::str::contains("api-write"))
            .stdout(predicate::str::contains("NetworkOnly"));
    }

    #[test]
    fn route_rejects_bad_method() {
        haven()
            .args(["route", "-X", "BREW", "/"])
            .assert()
            .failure();
    }

    #[test]
    fn fetch_offline_api_returns_json_fallback() {
        let dir = TempDir::new().unwrap();
        let config = isolated_config(&dir, "");
        haven_with(&config)
            .args(["fetch", "--offline", "-i", "/api/products"])
            .assert()
            .success()
            .stdout(predicate::str::contains("HTTP 503 (fallback)"))
            .stdout(predicate::str::contains("\"offline\":true"));
    }

    #[test]
    fn fetch_offline_navigation_returns_offline_document() {
        let dir = TempDir::new().unwrap();
        let config = isolated_config(&dir, "");
        haven_with(&config)
            .args(["fetch", "--offline", "--navigate", "/market"])
            .assert()
            .success()
            .stdout(predicate::str::contains("You are offline"));
    }

    #[test]
    fn install_offline_then_list_and_purge() {
        let dir = TempDir::new().unwrap();
        let config = isolated_config(&dir, "");

        haven_with(&config)
            .args(["install", "--offline"])
            .assert()
            .success()
            .stdout(predicate::str::contains("v1 is active"));

        haven_with(&config)
            .args(["cache", "list", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("ecomama-static-v1"));

        // A new version makes the v1 bucket stale
        let next = isolated_config(&dir, "[engine]\nversion = \"v2\"\n");
        haven_with(&next)
            .args(["cache", "purge"])
            .assert()
            .success()
            .stdout(predicate::str::contains("ecomama-static-v1"));

        haven_with(&next)
            .args(["cache", "list", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("ecomama-static-v1").not());
    }

    #[test]
    fn cache_clear_with_yes() {
        let dir = TempDir::new().unwrap();
        let config = isolated_config(&dir, "");

        haven_with(&config)
            .args(["install", "--offline"])
            .assert()
            .success();

        haven_with(&config)
            .args(["cache", "clear", "--yes"])
            .assert()
            .success()
            .stdout(predicate::str::contains("cleared 1 bucket(s)"));
    }

    #[test]
    fn check_runs() {
        let dir = TempDir::new().unwrap();
        let config = isolated_config(&dir, "");
        haven_with(&config)
            .arg("check")
            .assert()
            .success()
            .stdout(predicate::str::contains("Readiness score"));
    }
}

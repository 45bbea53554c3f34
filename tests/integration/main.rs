//! Integration tests for buildwright

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use serial_test::serial;
    use std::path::Path;
    use tempfile::TempDir;

    /// Command isolated from the user's config, cache and event journal
    fn buildwright(dir: &Path) -> Command {
        let config = dir.join("config.toml");
        if !config.exists() {
            std::fs::write(
                &config,
                format!(
                    "[general]\nevent_log = false\n\n[cache]\ndir = {:?}\n\n[toolchain]\nprobe_capabilities = false\n",
                    dir.join("cache")
                ),
            )
            .unwrap();
        }

        let mut cmd = cargo_bin_cmd!("buildwright");
        cmd.current_dir(dir).env("BUILDWRIGHT_CONFIG", config);
        cmd
    }

    #[test]
    fn help_displays() {
        let dir = TempDir::new().unwrap();
        buildwright(dir.path())
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("build orchestration"));
    }

    #[test]
    fn version_displays() {
        let dir = TempDir::new().unwrap();
        buildwright(dir.path())
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("buildwright"));
    }

    #[test]
    #[serial]
    fn validate_runs() {
        // Selection may fail on hosts without a toolchain, but the report prints
        let dir = TempDir::new().unwrap();
        buildwright(dir.path())
            .arg("validate")
            .assert()
            .stdout(predicate::str::contains("Platform"));
    }

    #[test]
    #[serial]
    fn unknown_compiler_fails_selection() {
        let dir = TempDir::new().unwrap();
        buildwright(dir.path())
            .args(["build", "--compiler", "nonexistent-cc"])
            .assert()
            .code(3)
            .stderr(predicate::str::contains("No compiler available"))
            .stderr(predicate::str::contains("nonexistent-cc"));
    }

    #[test]
    #[serial]
    fn json_report_names_error_kind() {
        let dir = TempDir::new().unwrap();
        buildwright(dir.path())
            .args(["build", "--compiler", "nonexistent-cc", "--json", "--dry-run"])
            .assert()
            .code(3)
            .stdout(predicate::str::contains("\"no_compiler_available\""))
            .stdout(predicate::str::contains("\"state\": \"failed\""));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.toml"), "[general]\nlog_format = \"xml\"\n").unwrap();
        buildwright(dir.path())
            .args(["cache", "list"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("general.log_format"));
    }

    #[test]
    fn unknown_package_manager_is_a_usage_error() {
        let dir = TempDir::new().unwrap();
        buildwright(dir.path())
            .args(["build", "--package-manager", "pip"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("unknown package manager"));
    }

    #[test]
    fn cache_list_empty() {
        let dir = TempDir::new().unwrap();
        buildwright(dir.path())
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No cache entries found"));
    }

    #[test]
    fn cache_invalidate_rejects_bad_fingerprint() {
        let dir = TempDir::new().unwrap();
        buildwright(dir.path())
            .args(["cache", "invalidate", "not-a-fingerprint"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("Invalid invocation"));
    }

    #[test]
    fn cache_clear_with_nothing_cached() {
        let dir = TempDir::new().unwrap();
        buildwright(dir.path())
            .args(["cache", "clear", "--yes"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No cache entries to clear"));
    }
}

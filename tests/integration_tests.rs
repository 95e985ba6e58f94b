//! Integration tests for the autopilot CLI
//!
//! These tests drive the binary end to end against temporary workspaces.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create an autopilot Command rooted in `dir`
fn autopilot(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("autopilot");
    cmd.current_dir(dir.path())
        .env_remove("AUTOPILOT_DELIVERY_CMD")
        .env_remove("AUTOPILOT_PROVIDER")
        .env_remove("RUST_LOG");
    cmd
}

/// Helper to create a workspace with one initialized project
fn init_workspace(project: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    autopilot(&dir).args(["init", project]).assert().success();
    dir
}

/// Replace the settings file with a delivery command run through `sh -c`
#[cfg(unix)]
fn set_delivery_script(dir: &TempDir, script: &str) {
    let toml = format!(
        "[delivery]\ncommand = \"sh\"\nargs = [\"-c\", {}]\n",
        toml_string(script)
    );
    fs::write(dir.path().join(".autopilot/autopilot.toml"), toml).unwrap();
}

#[cfg(unix)]
fn toml_string(s: &str) -> String {
    format!("'''{}'''", s)
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_autopilot_help() {
        cargo_bin_cmd!("autopilot").arg("--help").assert().success();
    }

    #[test]
    fn test_autopilot_version() {
        cargo_bin_cmd!("autopilot")
            .arg("--version")
            .assert()
            .success();
    }

    #[test]
    fn test_init_creates_structure() {
        let dir = TempDir::new().unwrap();

        autopilot(&dir)
            .args(["init", "shop"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized project 'shop'"));

        assert!(dir.path().join(".autopilot/autopilot.toml").exists());
        assert!(dir.path().join(".autopilot/projects.json").exists());
        assert!(dir.path().join(".autopilot/projects/shop/reports").is_dir());
        assert!(dir.path().join("shop/requirements/in-progress").is_dir());
        assert!(!dir.path().join(".autopilot/projects.json.lock").exists());
    }

    #[test]
    fn test_init_idempotent() {
        let dir = init_workspace("shop");
        autopilot(&dir)
            .args(["init", "shop"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already initialized"));
    }

    #[test]
    fn test_init_rejects_bad_project_name() {
        let dir = TempDir::new().unwrap();
        autopilot(&dir)
            .args(["init", "../escape"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid project name"));
    }

    #[test]
    fn test_workspace_flag() {
        let dir = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        autopilot(&dir)
            .arg("--workspace")
            .arg(other.path())
            .args(["init", "shop"])
            .assert()
            .success();
        assert!(other.path().join(".autopilot/projects/shop").is_dir());
        assert!(!dir.path().join(".autopilot").exists());
    }
}

// =============================================================================
// Projects and Status
// =============================================================================

mod projects {
    use super::*;

    #[test]
    fn test_projects_lists_registered() {
        let dir = init_workspace("shop");
        autopilot(&dir).args(["init", "blog"]).assert().success();

        autopilot(&dir)
            .arg("projects")
            .assert()
            .success()
            .stdout(predicate::str::contains("shop"))
            .stdout(predicate::str::contains("blog"))
            .stdout(predicate::str::contains("never"));
    }

    #[test]
    fn test_projects_empty_workspace() {
        let dir = TempDir::new().unwrap();
        autopilot(&dir)
            .arg("projects")
            .assert()
            .success()
            .stdout(predicate::str::contains("No projects registered"));
    }

    #[test]
    fn test_status_before_any_campaign() {
        let dir = init_workspace("shop");
        autopilot(&dir)
            .args(["status", "shop"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No campaign has run"))
            .stdout(predicate::str::contains("runtime_start"));
    }

    #[test]
    fn test_status_requires_init() {
        let dir = TempDir::new().unwrap();
        autopilot(&dir)
            .args(["status", "shop"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("autopilot init shop"));
    }
}

// =============================================================================
// Stage Gating
// =============================================================================

mod stages {
    use super::*;

    #[test]
    fn test_check_rejects_out_of_order_stage() {
        let dir = init_workspace("shop");
        autopilot(&dir)
            .args(["stages", "shop", "check", "implementation"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Cannot enter implementation"))
            .stderr(predicate::str::contains("discovery"));
    }

    #[test]
    fn test_first_stage_always_enterable() {
        let dir = init_workspace("shop");
        autopilot(&dir)
            .args(["stages", "shop", "check", "discovery"])
            .assert()
            .success()
            .stdout(predicate::str::contains("may be entered"));
    }

    #[test]
    fn test_mark_then_check_next_stage() {
        let dir = init_workspace("shop");
        autopilot(&dir)
            .args(["stages", "shop", "mark", "discovery", "passed"])
            .assert()
            .success()
            .stdout(predicate::str::contains("rank 1"));

        autopilot(&dir)
            .args(["stages", "shop", "check", "functional-requirements"])
            .assert()
            .success();

        let journal =
            fs::read_to_string(dir.path().join(".autopilot/projects/shop/campaign-journal.jsonl"))
                .unwrap();
        assert!(journal.contains("\"stage_marked\""));
    }

    #[test]
    fn test_unknown_stage_is_an_error() {
        let dir = init_workspace("shop");
        autopilot(&dir)
            .args(["stages", "shop", "check", "marketing"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown stage"));
    }
}

// =============================================================================
// Availability Cache
// =============================================================================

mod availability {
    use super::*;

    #[test]
    fn test_mark_and_list() {
        let dir = init_workspace("shop");
        autopilot(&dir)
            .args([
                "availability",
                "mark",
                "claude",
                "sonnet",
                "Your quota will reset after 2 hours.",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("claude/sonnet unavailable"));

        autopilot(&dir)
            .args(["availability", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("sonnet"))
            .stdout(predicate::str::contains("quota"));

        autopilot(&dir)
            .args(["availability", "list", "--provider", "other"])
            .assert()
            .success()
            .stdout(predicate::str::contains("All models available"));
    }

    #[test]
    fn test_sweep_keeps_active_entries() {
        let dir = init_workspace("shop");
        autopilot(&dir)
            .args(["availability", "mark", "claude", "opus", "retry in 1 hour"])
            .assert()
            .success();
        autopilot(&dir)
            .args(["availability", "sweep"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Removed 0 expired entries"));
    }
}

// =============================================================================
// Stale-State Sweep
// =============================================================================

mod sweep {
    use super::*;

    fn seed_running_state(dir: &TempDir, pid: u32) {
        fs::write(
            dir.path().join(".autopilot/projects/shop/campaign-state.json"),
            format!(
                r#"{{"project":"shop","cycle":2,"elapsed_minutes":1.0,"target_stage":null,
                    "stalled_cycles":0,"failure_streak":0,"recovery_tier":"none",
                    "running":true,"pid":{},"phase":"delivering"}}"#,
                pid
            ),
        )
        .unwrap();
    }

    #[test]
    fn test_sweep_sanitizes_dead_owner() {
        let dir = init_workspace("shop");
        seed_running_state(&dir, 4_000_000);

        autopilot(&dir)
            .arg("sweep")
            .assert()
            .success()
            .stdout(predicate::str::contains("sanitized"))
            .stdout(predicate::str::contains("shop"));

        autopilot(&dir)
            .arg("sweep")
            .assert()
            .success()
            .stdout(predicate::str::contains("No stale campaign states"));
    }

    #[test]
    fn test_startup_sweep_runs_before_status() {
        let dir = init_workspace("shop");
        seed_running_state(&dir, 4_000_000);

        autopilot(&dir)
            .args(["status", "shop"])
            .assert()
            .success()
            .stdout(predicate::str::contains("stale_state_sanitized"));
    }
}

// =============================================================================
// Diagnosis
// =============================================================================

mod diagnose {
    use super::*;

    #[test]
    fn test_diagnose_reports_blockers_and_causes() {
        let dir = init_workspace("shop");
        let reports = dir.path().join(".autopilot/projects/shop/reports");
        fs::write(
            reports.join("run-status.json"),
            r#"{"blockers": ["npm ERR! no matching version found for left-pad@99", "Upstream returned 429 rate limit"]}"#,
        )
        .unwrap();
        fs::write(
            reports.join("lifecycle-report.json"),
            r#"{"steps": [{"name": "build", "status": "failed"}, {"name": "lint", "status": "passed"}]}"#,
        )
        .unwrap();

        autopilot(&dir)
            .args(["diagnose", "shop"])
            .assert()
            .success()
            .stdout(predicate::str::contains("no matching version"))
            .stdout(predicate::str::contains("429").not())
            .stdout(predicate::str::contains("invalid_dependency_version"))
            .stdout(predicate::str::contains("Lifecycle failures: 1"));

        assert!(!dir
            .path()
            .join(".autopilot/projects/shop/debug-report.json")
            .exists());
    }

    #[test]
    fn test_diagnose_clean_project() {
        let dir = init_workspace("shop");
        autopilot(&dir)
            .args(["diagnose", "shop"])
            .assert()
            .success()
            .stdout(predicate::str::contains("none identified"));
    }
}

// =============================================================================
// Campaigns
// =============================================================================

mod campaigns {
    use super::*;

    #[test]
    fn test_missing_delivery_command_is_not_fatal() {
        let dir = init_workspace("shop");
        fs::write(
            dir.path().join(".autopilot/autopilot.toml"),
            "[delivery]\ncommand = \"autopilot-no-such-increment\"\n",
        )
        .unwrap();

        autopilot(&dir)
            .args(["run", "shop", "--max-cycles", "1", "--sleep-seconds", "0"])
            .assert()
            .success()
            .stdout(predicate::str::contains("stopped:max_cycles"));

        autopilot(&dir)
            .args(["status", "shop"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Failed to spawn delivery command"));
    }

    #[test]
    fn test_run_requires_init() {
        let dir = TempDir::new().unwrap();
        autopilot(&dir)
            .args(["run", "shop"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("not initialized"));
    }

    #[cfg(unix)]
    #[test]
    fn test_campaign_reaches_target_stage() {
        let dir = init_workspace("shop");
        set_delivery_script(
            &dir,
            r#"echo '{"success": true, "stages": [{"stage": "discovery", "state": "passed"}]}' > "$AUTOPILOT_RESULT_FILE""#,
        );

        autopilot(&dir)
            .args([
                "run",
                "shop",
                "--target-stage",
                "discovery",
                "--max-cycles",
                "3",
                "--sleep-seconds",
                "0",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("succeeded"))
            .stdout(predicate::str::contains("Cycles:         1"));

        let state_dir = dir.path().join(".autopilot/projects/shop");
        let state = fs::read_to_string(state_dir.join("campaign-state.json")).unwrap();
        assert!(state.contains("\"running\": false"));
        assert!(state.contains("\"phase\": \"succeeded\""));
        assert!(state_dir.join("debug-report.json").exists());
        assert!(state_dir.join("recovery-audit.jsonl").exists());
        assert!(state_dir.join("logs/cycle-1-output.log").exists());

        autopilot(&dir)
            .arg("projects")
            .assert()
            .success()
            .stdout(predicate::str::contains("never").not());
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_increments_escalate_recovery() {
        let dir = init_workspace("shop");
        set_delivery_script(&dir, "echo 'build exploded' >&2; exit 1");

        autopilot(&dir)
            .args([
                "run",
                "shop",
                "--target-stage",
                "discovery",
                "--max-cycles",
                "2",
                "--sleep-seconds",
                "0",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("stopped:max_cycles"))
            .stdout(predicate::str::contains("Failure streak: 2"));

        let logs = dir.path().join(".autopilot/projects/shop/logs");
        let instructions = fs::read_to_string(logs.join("cycle-2-instructions.md")).unwrap();
        assert!(instructions.contains("Recovery: soft nudge"));
        assert!(!logs.join("cycle-1-instructions.md").exists());
    }
}

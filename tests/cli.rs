//! Command line tests that need neither Docker nor SSH.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// dockbench with config and key directories isolated under `home`
fn dockbench(home: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("dockbench");
    cmd.env("HOME", home)
        .env("DOCKBENCH_CONFIG_HOME", home.join("config"))
        .env("DOCKBENCH_SSH_DIR", home.join("ssh"))
        .env("USER", "alice")
        .env_remove("RUST_LOG");
    cmd
}

fn repo_with_descriptor(home: &Path, descriptor: &str) -> String {
    let repo = home.join("modelA");
    fs::create_dir_all(&repo).unwrap();
    fs::write(repo.join("sim_design.yaml"), descriptor).unwrap();
    repo.canonicalize().unwrap().to_string_lossy().replace('\\', "/")
}

#[test]
fn test_help_lists_subcommands() {
    let home = TempDir::new().unwrap();
    dockbench(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("bootstrap"))
        .stdout(predicate::str::contains("start"))
        .stdout(predicate::str::contains("stop"))
        .stdout(predicate::str::contains("resolve-path"));
}

#[test]
fn test_bootstrap_requires_remote() {
    let home = TempDir::new().unwrap();
    dockbench(home.path()).arg("bootstrap").assert().failure();
}

#[test]
fn test_resolve_path_relative_value() {
    let home = TempDir::new().unwrap();
    let repo = repo_with_descriptor(home.path(), "output_dir: results/run1 # latest\n");

    dockbench(home.path())
        .args(["resolve-path", "output_dir", "--repo", &repo])
        .assert()
        .success()
        .stdout(format!("{repo}/results/run1\n"));
}

#[test]
fn test_resolve_path_absolute_value() {
    let home = TempDir::new().unwrap();
    let repo = repo_with_descriptor(home.path(), "synthpop_dir: \"/data/synthpop\"\n");

    dockbench(home.path())
        .args(["resolve-path", "synthpop_dir", "--repo", &repo])
        .assert()
        .success()
        .stdout("/data/synthpop\n");
}

#[test]
fn test_resolve_path_falls_back_to_mount_default() {
    let home = TempDir::new().unwrap();
    let repo = repo_with_descriptor(home.path(), "# nothing configured\n");

    dockbench(home.path())
        .args(["resolve-path", "synthpop_dir", "--repo", &repo])
        .assert()
        .success()
        .stdout(format!("{repo}/inputs/synthpop\n"));
}

#[test]
fn test_resolve_path_unknown_key_fails() {
    let home = TempDir::new().unwrap();
    let repo = repo_with_descriptor(home.path(), "output_dir: results\n");

    dockbench(home.path())
        .args(["resolve-path", "plots_dir", "--repo", &repo])
        .assert()
        .failure()
        .stderr(predicate::str::contains("plots_dir"));
}

#[test]
fn test_resolve_path_uses_configured_descriptor_file() {
    let home = TempDir::new().unwrap();
    let config_dir = home.path().join("config").join("dockbench");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(
        config_dir.join("dockbench.toml"),
        "[session]\ndescriptor_file = \"design.yaml\"\n",
    )
    .unwrap();
    let repo = repo_with_descriptor(home.path(), "output_dir: ignored\n");
    fs::write(Path::new(&repo).join("design.yaml"), "output_dir: ../shared\n").unwrap();

    dockbench(home.path())
        .args(["resolve-path", "output_dir", "--repo", &repo])
        .assert()
        .success()
        .stdout(format!("{}/shared\n", repo.rsplit_once('/').unwrap().0));
}

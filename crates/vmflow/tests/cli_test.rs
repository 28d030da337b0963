mod common;

use common::{TestProject, VM_PATH, machine_yaml};
use predicates::prelude::*;

#[test]
fn test_cli_help() {
    TestProject::new()
        .vmflow()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("id"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("policy"))
        .stdout(predicate::str::contains("settings"));
}

#[test]
fn test_cli_version() {
    TestProject::new()
        .vmflow()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("vmflow"));
}

#[test]
fn test_invalid_command() {
    TestProject::new()
        .vmflow()
        .arg("invalid-command")
        .assert()
        .failure();
}

#[test]
fn test_id_generic() {
    TestProject::new()
        .vmflow()
        .args(["id", VM_PATH])
        .assert()
        .success()
        .stdout(predicate::str::contains("rg-web"))
        .stdout(predicate::str::contains("Microsoft.Compute"))
        .stdout(predicate::str::contains("virtualMachines:"))
        .stdout(predicate::str::contains("web-1"));
}

#[test]
fn test_id_typed_extension() {
    let path = format!("{VM_PATH}/extensions/bootstrap");
    TestProject::new()
        .vmflow()
        .args(["id", &path, "--kind", "extension"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Virtual Machine Extension"))
        .stdout(predicate::str::contains("parent:"))
        .stdout(predicate::str::contains("bootstrap"));
}

#[test]
fn test_id_wrong_kind_fails() {
    TestProject::new()
        .vmflow()
        .args(["id", VM_PATH, "--kind", "nic"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("networkInterfaces"));
}

#[test]
fn test_id_vm_kind_rejects_extension_path() {
    let path = format!("{VM_PATH}/extensions/bootstrap");
    TestProject::new()
        .vmflow()
        .args(["id", &path, "--kind", "vm"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("must end with the `virtualMachines` element"));
}

#[test]
fn test_id_malformed_fails() {
    TestProject::new()
        .vmflow()
        .args(["id", "/subscriptions/s/resourceGroups"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Malformed resource path"));
}

#[test]
fn test_plan_resize() {
    let project = TestProject::new();
    let desired = project.write("desired.yaml", &machine_yaml("Standard_F4", ""));
    let last_known = project.write("last.yaml", &machine_yaml("Standard_F2", ""));

    project
        .vmflow()
        .arg("plan")
        .arg("--desired")
        .arg(&desired)
        .arg("--last-known")
        .arg(&last_known)
        .assert()
        .success()
        .stdout(predicate::str::contains("size"))
        .stdout(predicate::str::contains("hardware_profile"))
        .stdout(predicate::str::contains("when_size_unavailable"))
        .stdout(predicate::str::contains("depends on the remote machine"))
        .stdout(predicate::str::contains("Checked live:"));
}

#[test]
fn test_plan_no_changes() {
    let project = TestProject::new();
    let config = project.write("vm.yaml", &machine_yaml("Standard_F2", ""));

    project
        .vmflow()
        .arg("plan")
        .arg("--desired")
        .arg(&config)
        .arg("--last-known")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("No changes"));
}

#[test]
fn test_plan_json_reports_required_power_cycle() {
    let project = TestProject::new();
    let desired = project.write(
        "desired.yaml",
        &machine_yaml("Standard_F2", "os_disk:\n  disk_size_gb: 128\n"),
    );
    let last_known = project.write("last.yaml", &machine_yaml("Standard_F2", ""));

    let output = project
        .vmflow()
        .arg("plan")
        .arg("--desired")
        .arg(&desired)
        .arg("--last-known")
        .arg(&last_known)
        .args(["--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["power_cycle"], "required");
    assert_eq!(report["plan"]["requires_shutdown"], true);
    assert_eq!(report["sections"][0], "storage_profile");
    assert!(report["generated_at"].is_string());
}

#[test]
fn test_plan_reports_replacements() {
    let project = TestProject::new();
    let desired = project.write("desired.yaml", &machine_yaml("Standard_F2", "zone: \"2\"\n"));
    let last_known = project.write("last.yaml", &machine_yaml("Standard_F2", ""));

    project
        .vmflow()
        .arg("plan")
        .arg("--desired")
        .arg(&desired)
        .arg("--last-known")
        .arg(&last_known)
        .assert()
        .success()
        .stdout(predicate::str::contains("Replace:"))
        .stdout(predicate::str::contains("zone"));
}

#[test]
fn test_plan_rejects_invalid_configuration() {
    let project = TestProject::new();
    let desired = project.write("desired.yaml", &machine_yaml("Standard_F2", "priority: Spot\n"));
    let last_known = project.write("last.yaml", &machine_yaml("Standard_F2", ""));

    project
        .vmflow()
        .arg("plan")
        .arg("--desired")
        .arg(&desired)
        .arg("--last-known")
        .arg(&last_known)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid configuration"));
}

#[test]
fn test_plan_missing_file() {
    let project = TestProject::new();
    project
        .vmflow()
        .args(["plan", "--desired", "nope.yaml", "--last-known", "nope.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nope.yaml"));
}

#[test]
fn test_policy_default_table() {
    TestProject::new()
        .vmflow()
        .arg("policy")
        .assert()
        .success()
        .stdout(predicate::str::contains("os_disk_size"))
        .stdout(predicate::str::contains("when_running_spot"))
        .stdout(predicate::str::contains("(override)").not());
}

#[test]
fn test_policy_honours_settings_file() {
    let project = TestProject::new();
    project.write("vmflow.yaml", "shutdown_policy:\n  tags: always\n");

    project
        .vmflow()
        .arg("policy")
        .assert()
        .success()
        .stdout(predicate::str::contains("(override)"));
}

#[test]
fn test_verbose_logs_settings_source() {
    let project = TestProject::new();
    project.write("vmflow.yaml", "require_import: false\n");

    project
        .vmflow()
        .args(["-v", "policy"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Loaded settings"));

    project
        .vmflow()
        .arg("policy")
        .assert()
        .success()
        .stderr(predicate::str::contains("Loaded settings").not());
}

#[test]
fn test_policy_override_changes_plan() {
    let project = TestProject::new();
    let settings = project.write("custom.yaml", "shutdown_policy:\n  size: always\n");
    let desired = project.write("desired.yaml", &machine_yaml("Standard_F4", ""));
    let last_known = project.write("last.yaml", &machine_yaml("Standard_F2", ""));

    project
        .vmflow()
        .arg("--config")
        .arg(&settings)
        .arg("plan")
        .arg("--desired")
        .arg(&desired)
        .arg("--last-known")
        .arg(&last_known)
        .assert()
        .success()
        .stdout(predicate::str::contains("required"));
}

#[test]
fn test_settings_defaults() {
    TestProject::new()
        .vmflow()
        .env("XDG_CONFIG_HOME", "/nonexistent-vmflow-config")
        .env("HOME", "/nonexistent-vmflow-home")
        .arg("settings")
        .assert()
        .success()
        .stdout(predicate::str::contains("using defaults"))
        .stdout(predicate::str::contains("require_import: true"))
        .stdout(predicate::str::contains("initial_interval_ms: 2000"));
}

#[test]
fn test_settings_from_discovered_file() {
    let project = TestProject::new();
    project.write("vmflow.local.yaml", "require_import: false\n");

    project
        .vmflow()
        .arg("settings")
        .assert()
        .success()
        .stdout(predicate::str::contains("vmflow.local.yaml"))
        .stdout(predicate::str::contains("require_import: false"));
}

#[test]
fn test_settings_env_var() {
    let project = TestProject::new();
    let custom = project.write("elsewhere.yaml", "timeouts:\n  create: 90\n");

    project
        .vmflow()
        .env("VMFLOW_CONFIG_PATH", &custom)
        .arg("settings")
        .assert()
        .success()
        .stdout(predicate::str::contains("elsewhere.yaml"))
        .stdout(predicate::str::contains("create: 90"));
}

#[test]
fn test_invalid_settings_fail() {
    let project = TestProject::new();
    project.write("vmflow.yaml", "poll:\n  multiplier: 0.1\n");

    project
        .vmflow()
        .arg("settings")
        .assert()
        .failure()
        .stderr(predicate::str::contains("poll.multiplier"));
}

//! Integration tests for the `kubeward` CLI binary.
//!
//! The binary runs as a subprocess. Nothing here needs a running server,
//! kubectl, or ansible: server commands point at a closed port and tool
//! paths point at files that do not exist.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::fs;
use std::path::Path;
use std::process::Command;

const KUBECONFIG: &str = "\
apiVersion: v1
kind: Config
clusters:
- name: prod
  cluster:
    server: https://10.0.0.1:6443
contexts:
- name: prod-admin
  context:
    cluster: prod
    user: admin
users:
- name: admin
  user:
    token: kubeconfig-embedded-token
current-context: prod-admin
";

fn kubeward_bin() -> String {
    let path = env!("CARGO_BIN_EXE_kubeward");
    assert!(Path::new(path).exists(), "kubeward binary not found at {path}");
    path.to_owned()
}

fn command(args: &[&str]) -> Command {
    let mut cmd = Command::new(kubeward_bin());
    cmd.args(args)
        .env("KUBEWARD_ADDR", "http://127.0.0.1:19999")
        .env_remove("KUBEWARD_USER")
        .env_remove("KUBEWARD_ENCRYPTION_KEY")
        .env_remove("KUBEWARD_ADMIN_TOKEN");
    cmd
}

/// Run kubeward and return (`exit_code`, stdout, stderr).
fn run_cmd(mut cmd: Command) -> (i32, String, String) {
    let output = cmd.output().expect("failed to execute kubeward");
    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (code, stdout, stderr)
}

fn run(args: &[&str]) -> (i32, String, String) {
    run_cmd(command(args))
}

// ── Version & help ───────────────────────────────────────────────────

#[test]
fn version_flag() {
    let (code, stdout, _) = run(&["--version"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("kubeward"), "{stdout}");
}

#[test]
fn help_lists_commands() {
    let (code, stdout, _) = run(&["--help"]);
    assert_eq!(code, 0);
    for sub in ["keygen", "fingerprint", "validate", "nodes", "playbook", "cluster", "key", "ssh-key", "credential"] {
        assert!(stdout.contains(sub), "help should list '{sub}': {stdout}");
    }
}

#[test]
fn subcommand_help() {
    for sub in ["cluster", "key", "ssh-key", "credential"] {
        let (code, stdout, _) = run(&[sub, "--help"]);
        assert_eq!(code, 0, "{sub} --help should exit 0");
        assert!(!stdout.is_empty());
    }
}

// ── Key tooling ──────────────────────────────────────────────────────

#[test]
fn keygen_prints_encoded_key() {
    let (code, stdout, _) = run(&["keygen"]);
    assert_eq!(code, 0);
    let key = stdout.trim();
    assert_eq!(key.len(), 44, "unexpected key: {key}");
    assert!(
        key.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '='))
    );
}

#[test]
fn keygen_out_refuses_to_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("encryption.key");
    let path_str = path.to_str().unwrap();

    let (code, stdout, _) = run(&["keygen", "--out", path_str]);
    assert_eq!(code, 0, "{stdout}");
    assert_eq!(fs::read_to_string(&path).unwrap().trim().len(), 44);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    let before = fs::read_to_string(&path).unwrap();
    let (code, _, _) = run(&["keygen", "--out", path_str]);
    assert_ne!(code, 0, "second keygen into the same file should fail");
    assert_eq!(fs::read_to_string(&path).unwrap(), before);
}

#[test]
fn fingerprint_is_the_same_from_env_and_file() {
    let (_, stdout, _) = run(&["keygen"]);
    let key = stdout.trim().to_owned();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("k.key");
    fs::write(&path, format!("{key}\n")).unwrap();

    let mut from_env = command(&["fingerprint"]);
    from_env.env("KUBEWARD_ENCRYPTION_KEY", &key);
    let (code, env_fp, _) = run_cmd(from_env);
    assert_eq!(code, 0);

    let (code, file_fp, _) = run(&["fingerprint", "--file", path.to_str().unwrap()]);
    assert_eq!(code, 0);

    assert_eq!(env_fp.trim(), file_fp.trim());
    assert_eq!(env_fp.trim().len(), 16);
    assert!(!env_fp.contains(&key));
}

#[test]
fn fingerprint_rejects_malformed_key() {
    let (code, _, stderr) = run(&["fingerprint", "--key", "definitely-not-a-key"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("Error"), "{stderr}");
}

#[test]
fn fingerprint_without_key_fails() {
    let (code, _, stderr) = run(&["fingerprint"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("KUBEWARD_ENCRYPTION_KEY"), "{stderr}");
}

// ── Credential validation ────────────────────────────────────────────

#[test]
fn validate_accepts_kubeconfig() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config");
    fs::write(&path, KUBECONFIG).unwrap();

    let (code, stdout, _) = run(&["validate", "--type", "kubeconfig", path.to_str().unwrap()]);
    assert_eq!(code, 0, "{stdout}");
    assert!(stdout.contains("https://10.0.0.1:6443"), "{stdout}");
}

#[test]
fn validate_rejects_short_token() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("token");
    fs::write(&path, "abc").unwrap();

    let (code, stdout, _) = run(&["validate", "--type", "token", path.to_str().unwrap()]);
    assert_ne!(code, 0);
    assert!(stdout.contains("too short"), "{stdout}");
}

#[test]
fn validate_rejects_unknown_type() {
    let (code, _, stderr) = run(&["validate", "--type", "password", "/dev/null"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("password"), "{stderr}");
}

// ── Tools that are not installed ─────────────────────────────────────

#[test]
fn nodes_without_kubectl_reports_connect_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config");
    fs::write(&path, KUBECONFIG).unwrap();
    let missing = dir.path().join("no-kubectl");

    let (code, _, stderr) = run(&[
        "nodes",
        "--type",
        "kubeconfig",
        path.to_str().unwrap(),
        "--kubectl",
        missing.to_str().unwrap(),
    ]);
    assert_ne!(code, 0);
    assert!(stderr.contains("node query failed"), "{stderr}");
}

#[test]
fn playbook_without_ansible_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let playbook = dir.path().join("site.yml");
    let inventory = dir.path().join("hosts.ini");
    fs::write(&playbook, "- hosts: all\n  tasks: []\n").unwrap();
    fs::write(&inventory, "[all]\n10.0.0.5\n").unwrap();
    let missing = dir.path().join("no-ansible");

    let (code, _, stderr) = run(&[
        "playbook",
        playbook.to_str().unwrap(),
        "--inventory",
        inventory.to_str().unwrap(),
        "--ansible-playbook",
        missing.to_str().unwrap(),
    ]);
    assert_ne!(code, 0);
    assert!(stderr.contains("Execution error"), "{stderr}");
}

#[test]
fn playbook_rejects_non_object_extra_vars() {
    let dir = tempfile::tempdir().unwrap();
    let playbook = dir.path().join("site.yml");
    let inventory = dir.path().join("hosts.ini");
    fs::write(&playbook, "- hosts: all\n").unwrap();
    fs::write(&inventory, "[all]\n").unwrap();

    let (code, _, stderr) = run(&[
        "playbook",
        playbook.to_str().unwrap(),
        "-i",
        inventory.to_str().unwrap(),
        "--extra-vars",
        "[1, 2]",
    ]);
    assert_ne!(code, 0);
    assert!(stderr.contains("JSON object"), "{stderr}");
}

// ── Server commands without a server ─────────────────────────────────

#[test]
fn cluster_list_requires_user() {
    let (code, _, stderr) = run(&["cluster", "list"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("KUBEWARD_USER"), "{stderr}");
}

#[test]
fn credential_add_rejects_unknown_type() {
    let (code, _, stderr) = run(&["credential", "add", "--name", "db", "--type", "password"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("credential type must be one of"), "{stderr}");
}

#[test]
fn ssh_key_list_requires_user() {
    let (code, _, stderr) = run(&["ssh-key", "list"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("KUBEWARD_USER"), "{stderr}");
}

#[test]
fn status_reports_unreachable_server() {
    let (code, _, stderr) = run(&["status"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("request failed"), "{stderr}");
}

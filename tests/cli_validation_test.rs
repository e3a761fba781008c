// Integration tests for startup validation
// Configuration errors must stop the binary before it serves anything

use std::process::{Command, Output, Stdio};

fn run(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_gadget-mcp"))
        .args(args)
        .env_remove("KUBECONFIG")
        .env_remove("GADGET_MCP_TRANSPORT")
        .env_remove("GADGET_MCP_ENVIRONMENT")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .expect("Failed to run gadget-mcp")
}

#[test]
fn test_missing_image_source_exits_non_zero() {
    let output = run(&[]);

    assert!(!output.status.success(), "expected failure, got {:?}", output.status);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("no gadget image source configured"),
        "stderr should explain the missing image source. Got: {stderr}"
    );
}

#[test]
fn test_remote_address_outside_linux_exits_non_zero() {
    let output = run(&[
        "--gadget-images",
        "trace_open",
        "--linux-remote-address",
        "tcp://127.0.0.1:1234",
    ]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("--linux-remote-address"),
        "stderr should name the offending flag. Got: {stderr}"
    );
}

#[test]
fn test_unknown_discoverer_exits_non_zero() {
    let output = run(&["--gadget-discoverer", "dockerhub"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("dockerhub"), "Got: {stderr}");
}

#[test]
fn test_unknown_bundled_list_exits_non_zero() {
    let output = run(&["--gadget-images-file", "no_such_list"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no_such_list"), "Got: {stderr}");
}

#[test]
fn test_version_flag() {
    let output = run(&["--version"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

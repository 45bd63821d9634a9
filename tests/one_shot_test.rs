use std::process::{Command, Output};

fn python_available() -> bool {
    Command::new("python3")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

fn nbplay(code: &str) -> Output {
    Command::new(env!("CARGO_BIN_EXE_nbplay"))
        .args(["--backend", "local", "--python", "python3", "--no-color", "--code", code])
        .output()
        .expect("nbplay should start")
}

#[test]
fn test_prints_outputs_and_duration() {
    if !python_available() {
        println!("python3 not found, skipping");
        return;
    }

    let out = nbplay("print('hello')\n6 * 7");
    let stdout = String::from_utf8_lossy(&out.stdout);
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(out.status.success(), "stderr: {stderr}");
    assert_eq!(stdout, "hello\n42\n");
    assert!(stderr.contains("completed in"));
}

#[test]
fn test_exception_fails_the_run() {
    if !python_available() {
        println!("python3 not found, skipping");
        return;
    }

    let out = nbplay("1 / 0");
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(!out.status.success());
    assert!(stderr.contains("ZeroDivisionError: division by zero"));
    assert!(stderr.contains("failed in"));
}

#[test]
fn test_unreachable_server_is_reported() {
    let out = Command::new(env!("CARGO_BIN_EXE_nbplay"))
        .args(["--backend", "remote", "--url", "http://127.0.0.1:9", "--code", "1"])
        .output()
        .expect("nbplay should start");
    assert!(!out.status.success());
}

#![forbid(unsafe_code)]

use std::fs;
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::process::{Command, Output};

const LISTENER_BIN: &str = env!("CARGO_BIN_EXE_web_listener");

// ***************************************************************************
//                                 Helpers
// ***************************************************************************
// Run the listener binary from dir so no configuration files are picked up
// unless the test writes them.
fn run_listener(dir: &Path, args: &[&str]) -> Output {
    Command::new(LISTENER_BIN)
        .args(args)
        .current_dir(dir)
        .output()
        .expect("run web_listener")
}

fn free_port() -> u16 {
    let l = TcpListener::bind("127.0.0.1:0").unwrap();
    l.local_addr().unwrap().port()
}

// ***************************************************************************
//                                  Tests
// ***************************************************************************
#[test]
fn wrong_argument_count_exits_with_usage() {
    let tmp = tempfile::tempdir().unwrap();
    let port = free_port().to_string();
    let log_file = tmp.path().join("server.log");
    let log_file = log_file.to_str().unwrap();

    for args in [vec![],
                 vec!["127.0.0.1"],
                 vec!["127.0.0.1", port.as_str(), log_file, "extra"]] {
        let output = run_listener(tmp.path(), &args);
        assert_eq!(output.status.code(), Some(1), "args {:?}", args);

        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("Usage: web_listener <host> <port>"), "args {:?}: {}", args, stdout);
    }

    // Nothing was bound and no access log was started.
    assert!(TcpStream::connect(("127.0.0.1", port.parse::<u16>().unwrap())).is_err());
    assert!(!Path::new(log_file).exists());
}

#[test]
fn invalid_port_exits_with_usage() {
    let tmp = tempfile::tempdir().unwrap();
    for port in ["0", "65536", "http"] {
        let output = run_listener(tmp.path(), &["127.0.0.1", port]);
        assert_eq!(output.status.code(), Some(1), "port {}", port);
        assert!(String::from_utf8_lossy(&output.stdout).contains("Usage:"));
    }
}

#[test]
fn port_in_use_exits_with_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let held = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = held.local_addr().unwrap().port().to_string();
    let log_file = tmp.path().join("logs").join("server.log");

    let output = run_listener(tmp.path(), &["127.0.0.1", &port, log_file.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stdout).contains("Listener failed"));
}

#[test]
fn configuration_is_read_after_logging_starts() {
    let tmp = tempfile::tempdir().unwrap();
    fs::create_dir(tmp.path().join("config")).unwrap();
    fs::write(tmp.path().join("config").join("listener.toml"), "read_policy = [").unwrap();
    let port = free_port().to_string();

    let output = run_listener(tmp.path(), &["127.0.0.1", &port]);
    assert_eq!(output.status.code(), Some(1));

    // Only the logger writes this line, so it shows the logger was up first.
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Reading application configuration file:"), "{}", stdout);
    assert!(stdout.contains("FAILED to read configuration file"), "{}", stdout);
}

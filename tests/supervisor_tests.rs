#![cfg(unix)]

mod support;

use std::time::Duration;

use chrono::Utc;
use devicelink::auth::DeviceAuthorization;
use devicelink::error::{ErrorCategory, ErrorCode};
use devicelink::worker::{WorkerCommand, WorkerSupervisor};
use pretty_assertions::assert_eq;

use support::{client_id, temp_paths, DEVICE_CODE};

fn authorization() -> DeviceAuthorization {
    DeviceAuthorization {
        device_code: DEVICE_CODE.to_string(),
        user_code: "ABCD-EFGH".to_string(),
        verification_uri: "https://github.com/login/device".to_string(),
        expires_in_secs: 900,
        poll_interval_secs: 5,
        issued_at: Utc::now(),
    }
}

#[test]
fn missing_program_is_spawn_failed() {
    let (_dir, paths) = temp_paths();
    let supervisor = WorkerSupervisor::new(
        WorkerCommand::new("/nonexistent/devicelink-worker"),
        paths,
    );

    let err = supervisor.spawn(&authorization(), &client_id()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::SpawnFailed);
    assert_eq!(err.category(), ErrorCategory::Process);
}

#[test]
fn non_executable_program_is_spawn_failed() {
    let (dir, paths) = temp_paths();
    let program = dir.path().join("not-executable");
    std::fs::write(&program, "#!/bin/sh\nexit 0\n").unwrap();

    let err = WorkerSupervisor::new(WorkerCommand::new(&program), paths)
        .spawn(&authorization(), &client_id())
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::SpawnFailed);
    assert!(err.to_string().contains("not-executable"));
}

#[test]
fn spawn_failure_code_differs_from_every_initiation_code() {
    let initiation = [
        ErrorCode::NetworkUnreachable,
        ErrorCode::NetworkTimeout,
        ErrorCode::ClientIdUnauthorized,
        ErrorCode::RateLimited,
        ErrorCode::MalformedResponse,
        ErrorCode::Http(500),
    ];
    assert!(!initiation.contains(&ErrorCode::SpawnFailed));
}

#[test]
fn worker_gets_device_code_via_environment_only() {
    let (_dir, paths) = temp_paths();
    std::fs::create_dir_all(paths.base_dir()).unwrap();
    let seen = paths.base_dir().join("seen");

    // The child records its env-provided device code and its argv.
    let command = WorkerCommand::new("/bin/sh").with_leading_args([
        "-c",
        r#"printf '%s\n%s\n' "$DEVICELINK_DEVICE_CODE" "$*" > "$DEVICELINK_HOME/seen.tmp" && mv "$DEVICELINK_HOME/seen.tmp" "$DEVICELINK_HOME/seen""#,
        "worker",
    ]);
    let spawned = WorkerSupervisor::new(command, paths.clone())
        .spawn(&authorization(), &client_id())
        .expect("spawn");
    assert!(spawned.pid > 0);

    let contents = wait_for(&seen);
    let mut lines = contents.lines();
    assert_eq!(lines.next(), Some(DEVICE_CODE));
    let argv = lines.next().unwrap_or_default();
    assert!(argv.contains("--flow-id"));
    assert!(argv.contains(&spawned.flow_id.to_string()));
    assert!(argv.contains("--client-id Iv1.0123456789abcdef"));
    assert!(argv.contains("--interval 5"));
    assert!(!argv.contains(DEVICE_CODE));
}

fn wait_for(path: &std::path::Path) -> String {
    for _ in 0..100 {
        if let Ok(text) = std::fs::read_to_string(path) {
            return text;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    panic!("worker never wrote {}", path.display());
}

#[cfg(target_os = "linux")]
#[test]
fn worker_runs_in_its_own_session_with_null_stdio() {
    let (_dir, paths) = temp_paths();
    std::fs::create_dir_all(paths.base_dir()).unwrap();
    let report = paths.base_dir().join("detached");

    // Field 6 of /proc/<pid>/stat is the session id.
    let command = WorkerCommand::new("/bin/sh").with_leading_args([
        "-c",
        r#"sid=$(cut -d' ' -f6 /proc/$$/stat)
in=$(readlink /proc/$$/fd/0)
out=$(readlink /proc/$$/fd/1)
err=$(readlink /proc/$$/fd/2)
printf '%s\n%s\n%s\n%s\n' "$sid" "$in" "$out" "$err" > "$DEVICELINK_HOME/detached.tmp"
mv "$DEVICELINK_HOME/detached.tmp" "$DEVICELINK_HOME/detached""#,
        "worker",
    ]);
    let spawned = WorkerSupervisor::new(command, paths.clone())
        .spawn(&authorization(), &client_id())
        .expect("spawn");

    let contents = wait_for(&report);
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 4, "{contents}");

    let child_sid: i32 = lines[0].trim().parse().unwrap();
    let own_sid = nix::unistd::getsid(None).unwrap().as_raw();
    assert_ne!(child_sid, own_sid);
    // setsid makes the worker its own session leader.
    assert_eq!(child_sid, spawned.pid as i32);

    for fd in &lines[1..] {
        assert_eq!(*fd, "/dev/null");
    }
}

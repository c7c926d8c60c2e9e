//! `kiln run`: one foreground process, its exit code passed through.

use crate::common::{Workspace, stderr};

fn built(main_py: &str) -> Workspace {
    let ws = Workspace::new();
    ws.write("context/bot/main.py", main_py);
    let output = ws.build();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    ws
}

#[test]
fn entrypoint_exit_zero_exits_zero() {
    let ws = built("exit 0\n");
    let output = ws.run_kiln(&["run", "bot"]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
}

#[test]
fn exit_code_is_passed_through() {
    let ws = built("exit 3\n");
    assert_eq!(ws.run_kiln(&["run", "bot"]).status.code(), Some(3));
}

#[test]
fn entrypoint_runs_in_workdir_with_image_env() {
    let ws = built(
        "[ -f requirements.txt ] || exit 10\n\
         [ \"$KILN_IMAGE\" = bot ] || exit 11\n\
         [ \"$GREETING\" = hello ] || exit 12\n\
         case \"$DATA_DIR\" in \"$KILN_ROOT\"/*) ;; *) exit 13 ;; esac\n\
         exit 0\n",
    );
    ws.write(
        "context/Kilnfile.toml",
        "name = \"bot\"\n\n[entrypoint.env]\nGREETING = \"hello\"\nDATA_DIR = \"{root}/var/data\"\n",
    );
    assert!(ws.build().status.success());
    let output = ws.run_kiln(&["run", "bot"]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
}

#[test]
fn caller_environment_is_inherited() {
    let ws = built("[ \"$CALLER_VALUE\" = 42 ] || exit 20\nexit 0\n");
    let output = ws
        .kiln()
        .args(["run", "bot"])
        .env("CALLER_VALUE", "42")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
}

#[test]
fn named_alternate_command() {
    let ws = Workspace::new();
    ws.write("context/bot/worker.py", "exit 5\n");
    ws.write(
        "context/Kilnfile.toml",
        "name = \"bot\"\n\n[commands]\nworker = [\"python\", \"-m\", \"bot.worker\"]\n",
    );
    assert!(ws.build().status.success());

    assert_eq!(
        ws.run_kiln(&["run", "bot", "--command", "worker"])
            .status
            .code(),
        Some(5)
    );
    let unknown = ws.run_kiln(&["run", "bot", "--command", "nope"]);
    assert_eq!(unknown.status.code(), Some(1));
    assert!(stderr(&unknown).contains("no command named 'nope'"));
}

#[test]
fn missing_image_is_an_error() {
    let ws = Workspace::new();
    let output = ws.run_kiln(&["run", "ghost"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("no image named 'ghost'"));
}

/// Entrypoint that records its start, then waits until a signal arrives.
#[cfg(unix)]
const GRACEFUL: &str = "\
trap 'kill \"$sleeper\" 2>/dev/null; touch \"$STOPPED_MARKER\"; exit 0' INT TERM HUP
sleep 30 &
sleeper=$!
touch \"$STARTED_MARKER\"
wait \"$sleeper\"
exit 7
";

/// Start `kiln run bot`, wait for the entrypoint, send `signal` to kiln and
/// return kiln's exit code and whether the entrypoint saw the signal.
#[cfg(unix)]
fn signal_kiln(ws: &Workspace, signal: &str) -> (Option<i32>, bool) {
    use std::process::Stdio;
    use std::time::{Duration, Instant};

    let started = ws.path("started");
    let stopped = ws.path("stopped");
    let mut child = ws
        .kiln()
        .args(["run", "bot"])
        .env("STARTED_MARKER", &started)
        .env("STOPPED_MARKER", &stopped)
        .stdin(Stdio::null())
        .spawn()
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while !started.exists() {
        assert!(Instant::now() < deadline, "entrypoint never started");
        std::thread::sleep(Duration::from_millis(20));
    }

    let sent = Instant::now();
    let status = std::process::Command::new("kill")
        .args([signal, &child.id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    let status = child.wait().unwrap();
    assert!(sent.elapsed() < Duration::from_secs(20));
    (status.code(), stopped.exists())
}

#[cfg(unix)]
#[test]
fn terminate_reaches_the_entrypoint_handler() {
    let ws = built(GRACEFUL);
    assert_eq!(signal_kiln(&ws, "-TERM"), (Some(0), true));
}

#[cfg(unix)]
#[test]
fn interrupt_reaches_the_entrypoint_handler() {
    let ws = built(GRACEFUL);
    assert_eq!(signal_kiln(&ws, "-INT"), (Some(0), true));
}

#[cfg(unix)]
#[test]
fn hangup_reaches_the_entrypoint_handler() {
    let ws = built(GRACEFUL);
    assert_eq!(signal_kiln(&ws, "-HUP"), (Some(0), true));
}

#[cfg(unix)]
#[test]
fn entrypoint_killed_by_forwarded_signal_exits_128_plus_signal() {
    let ws = built("touch \"$STARTED_MARKER\"\nexec sleep 30\n");
    assert_eq!(signal_kiln(&ws, "-TERM"), (Some(128 + 15), false));
}

//! `kiln build`, `plan`, `inspect`, `list` and `remove` through the binary.

use kiln_engine::StoreError;
use kiln_types::Step;

use crate::common::{Workspace, file_set, stderr, stdout};

#[test]
fn valid_context_commits_one_image() {
    let ws = Workspace::new();
    let output = ws.build();
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let out = stdout(&output);
    assert!(out.contains("building bot from"), "{out}");
    assert!(out.contains("committed bot at"), "{out}");

    let images = ws.store().list().unwrap();
    assert_eq!(images.len(), 1);
    let image = &images[0];
    let record = &image.record;

    let journal: Vec<Step> = record.journal.iter().map(|r| r.step).collect();
    assert_eq!(journal, Step::ALL);
    assert_eq!(record.entrypoint.command(), ["python", "-m", "bot.main"]);
    assert!(
        record
            .dependencies
            .iter()
            .any(|p| p.name == "x" && p.version == "1.0")
    );
    assert_eq!(record.installer.as_ref().unwrap().version, "24.0");
    assert!(record.files.contains(&"app/bot/main.py".to_string()));
    assert!(record.files.contains(&"app/.env.example".to_string()));
    assert!(image.rootfs().join("app/requirements.txt").is_file());
    assert!(image.rootfs().join("app/README.md").is_file());
    assert!(ws.store().staging_dirs().is_empty());
}

#[test]
fn unsatisfiable_manifest_aborts_at_dependency_install() {
    let ws = Workspace::new();
    ws.write("context/requirements.txt", "Y==999.0\n");

    let output = ws.build();
    assert_eq!(output.status.code(), Some(1));
    let err = stderr(&output);
    assert!(
        err.contains("build failed at step 5 (install-dependencies)"),
        "{err}"
    );
    assert!(err.contains("no image was produced"), "{err}");

    let out = stdout(&output);
    assert!(!out.contains("copy-source"), "{out}");
    assert!(!out.contains("copy-config-template"), "{out}");
    assert!(ws.store().list().unwrap().is_empty());
    assert!(ws.store().staging_dirs().is_empty());
}

#[test]
fn conflicting_pins_are_a_resolution_failure() {
    let ws = Workspace::new();
    ws.write("context/requirements.txt", "X==1.0\nx>=2.0\n");

    let output = ws.build();
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("install-dependencies"));
    assert!(ws.store().list().unwrap().is_empty());
}

#[test]
fn unknown_runtime_tag_fails_first_step() {
    let ws = Workspace::new();
    ws.write(
        "context/Kilnfile.toml",
        "name = \"bot\"\n\n[runtime]\nid = \"python\"\ntag = \"3.12-slim\"\n",
    );

    let output = ws.build();
    assert_eq!(output.status.code(), Some(1));
    let err = stderr(&output);
    assert!(err.contains("step 1 (select-base)"), "{err}");
    assert!(err.contains("3.11-slim"), "{err}");
}

#[test]
fn missing_template_leaves_previous_image_untouched() {
    let ws = Workspace::new();
    assert!(ws.build().status.success());
    let before = ws.store().open("bot").unwrap();

    ws.remove("context/.env.example");
    let output = ws.build();
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("missing build input '.env.example'"));

    let after = ws.store().open("bot").unwrap();
    assert_eq!(before.record, after.record);
    assert!(after.rootfs().join("app/.env.example").is_file());
}

#[test]
fn rebuilding_unchanged_context_is_idempotent() {
    let ws = Workspace::new();
    assert!(ws.build().status.success());
    let first = ws.store().open("bot").unwrap();
    let first_files = file_set(&first.rootfs());

    assert!(ws.build().status.success());
    let second = ws.store().open("bot").unwrap();

    assert!(first.record.equivalent(&second.record));
    assert_eq!(first_files, file_set(&second.rootfs()));
}

#[test]
fn source_excludes_are_honoured() {
    let ws = Workspace::new();
    ws.write("context/bot/__pycache__/main.cpython-311.pyc", "bytecode");
    ws.write(
        "context/Kilnfile.toml",
        "name = \"bot\"\n\n[source]\nexclude = [\"__pycache__\"]\n",
    );
    assert!(ws.build().status.success());

    let image = ws.store().open("bot").unwrap();
    assert!(!image.rootfs().join("app/bot/__pycache__").exists());
    assert!(
        !image
            .record
            .files
            .iter()
            .any(|f| f.contains("__pycache__"))
    );
}

#[test]
fn system_packages_come_from_the_package_source() {
    let ws = Workspace::new();
    ws.write(
        "context/Kilnfile.toml",
        "name = \"bot\"\n\n[system]\npackages = [\"build-essential\", \"libpq-dev\"]\n",
    );
    assert!(ws.build().status.success());

    let image = ws.store().open("bot").unwrap();
    assert!(image.rootfs().join("usr/lib/libpq.so").is_file());
    let names: Vec<&str> = image
        .record
        .system_packages
        .iter()
        .map(|p| p.name.as_str())
        .collect();
    assert_eq!(names, ["build-essential", "libpq-dev"]);
    assert!(!image.rootfs().join("var/lib/kiln/lists").exists());
}

#[test]
fn plan_has_no_side_effects() {
    let ws = Workspace::new();
    let context = ws.context();
    let output = ws.run_kiln(&["plan", context.to_str().unwrap()]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let out = stdout(&output);
    assert!(out.starts_with("image bot\n"), "{out}");
    assert_eq!(out.lines().count(), 9);
    assert!(!ws.path("store").exists());
}

#[test]
fn inspect_list_and_remove() {
    let ws = Workspace::new();
    assert!(ws.build().status.success());

    let inspect = ws.run_kiln(&["inspect", "bot"]);
    assert!(inspect.status.success());
    let json: serde_json::Value = serde_json::from_slice(&inspect.stdout).unwrap();
    assert_eq!(json["name"], "bot");
    assert_eq!(json["runtime"]["tag"], "3.11-slim");

    let list = stdout(&ws.run_kiln(&["list"]));
    assert!(list.lines().any(|l| l.starts_with("bot ")), "{list}");

    assert!(ws.run_kiln(&["remove", "bot"]).status.success());
    assert!(matches!(
        ws.store().open("bot"),
        Err(StoreError::NotFound(_))
    ));
    let missing = ws.run_kiln(&["inspect", "bot"]);
    assert_eq!(missing.status.code(), Some(1));
    assert!(stderr(&missing).contains("no image named 'bot'"));
}

#[test]
fn included_manifest_is_not_silently_skipped() {
    let ws = Workspace::new();
    ws.write("context/requirements.txt", "-r base.txt\n");
    ws.write("context/base.txt", "Y==999.0\n");

    let output = ws.build();
    assert_eq!(output.status.code(), Some(1));
    assert!(
        stderr(&output).contains("step 5 (install-dependencies)"),
        "{}",
        stderr(&output)
    );
    assert!(ws.store().list().unwrap().is_empty());
}

#[cfg(unix)]
#[test]
fn interrupted_build_exits_130_without_residue() {
    use std::process::Stdio;
    use std::time::{Duration, Instant};

    let ws = Workspace::new();
    let started = ws.path("refresh-started");
    let config = format!(
        "[store]\nroot = \"{store}\"\n\n[backend]\nkind = \"command\"\nruntimes = \"{runtimes}\"\n\n\
         [backend.commands]\nrefresh_index = \"touch '{started}'; sleep 30\"\n",
        store = ws.path("store").display(),
        runtimes = ws.path("runtimes").display(),
        started = started.display(),
    );
    ws.write("home/config.toml", &config);

    let mut child = ws
        .kiln()
        .arg("build")
        .arg(ws.context())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while !started.exists() {
        assert!(Instant::now() < deadline, "build never reached the index refresh");
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(!ws.store().staging_dirs().is_empty());

    let sent = Instant::now();
    let status = std::process::Command::new("kill")
        .args(["-INT", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    let status = child.wait().unwrap();
    assert_eq!(status.code(), Some(130));
    assert!(sent.elapsed() < Duration::from_secs(20));
    assert!(ws.store().list().unwrap().is_empty());
    assert!(ws.store().staging_dirs().is_empty());
}

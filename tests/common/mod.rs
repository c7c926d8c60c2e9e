//! Shared test utilities and fixtures
//!
//! A [`Workspace`] is a throwaway kiln home with a runtime store, an offline
//! package source and one build context, wired together through
//! `<home>/config.toml` so the `kiln` binary finds them without flags.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use kiln_engine::ImageStore;

/// Stand-in interpreter: `python -m a.b` runs `a/b.py` with `sh` from the cwd.
const FAKE_PYTHON: &str = r#"#!/bin/sh
if [ "$1" != "-m" ]; then
    echo "usage: python -m MODULE" >&2
    exit 2
fi
module=$(echo "$2" | tr . /)
shift 2
exec sh "$module.py" "$@"
"#;

pub struct Workspace {
    root: tempfile::TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        let ws = Self { root };

        ws.write_exec("runtimes/python/3.11-slim/usr/local/bin/python", FAKE_PYTHON);
        ws.write(
            "source/system/index.toml",
            "[[package]]\nname = \"build-essential\"\nversion = \"12.9\"\n\n\
             [[package]]\nname = \"libpq-dev\"\nversion = \"15.6\"\n",
        );
        ws.write("source/system/libpq-dev/usr/lib/libpq.so", "");
        ws.mkdir("source/packages/pip/23.3");
        ws.mkdir("source/packages/pip/24.0");
        ws.write("source/packages/x/1.0/x/__init__.py", "VERSION = '1.0'\n");
        ws.write("source/packages/x/2.0/x/__init__.py", "VERSION = '2.0'\n");

        ws.write("context/requirements.txt", "X==1.0\n");
        ws.write("context/README.md", "# bot\n");
        ws.write("context/bot/__init__.py", "");
        ws.write("context/bot/main.py", "exit 0\n");
        ws.write("context/.env.example", "TOKEN=example\n");
        ws.write("context/Kilnfile.toml", "name = \"bot\"\n");

        let config = format!(
            "[store]\nroot = \"{store}\"\n\n[backend]\nkind = \"local\"\nsource = \"{source}\"\nruntimes = \"{runtimes}\"\n",
            store = ws.path("store").display(),
            source = ws.path("source").display(),
            runtimes = ws.path("runtimes").display(),
        );
        ws.write("home/config.toml", &config);
        ws
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.path().join(rel)
    }

    pub fn context(&self) -> PathBuf {
        self.path("context")
    }

    pub fn store(&self) -> ImageStore {
        ImageStore::new(self.path("store/images"))
    }

    pub fn mkdir(&self, rel: &str) {
        fs::create_dir_all(self.path(rel)).expect("mkdir");
    }

    pub fn write(&self, rel: &str, body: &str) {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, body).expect("write");
    }

    pub fn write_exec(&self, rel: &str, body: &str) {
        self.write(rel, body);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(self.path(rel), fs::Permissions::from_mode(0o755))
                .expect("chmod");
        }
    }

    pub fn remove(&self, rel: &str) {
        let path = self.path(rel);
        if path.is_dir() {
            fs::remove_dir_all(path).expect("remove dir");
        } else {
            fs::remove_file(path).expect("remove file");
        }
    }

    /// The `kiln` binary, pointed at this workspace's home.
    pub fn kiln(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_kiln"));
        cmd.env("KILN_HOME", self.path("home"))
            .env("KILN_LOG", "debug")
            .current_dir(self.root.path());
        cmd
    }

    pub fn run_kiln(&self, args: &[&str]) -> Output {
        self.kiln().args(args).output().expect("spawn kiln")
    }

    pub fn build(&self) -> Output {
        let context = self.context();
        self.run_kiln(&["build", context.to_str().expect("utf-8 path")])
    }
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// Relative paths of every file under `dir`, sorted.
pub fn file_set(dir: &Path) -> Vec<String> {
    let mut out: Vec<String> = kiln_utils::walk_tree(dir, &kiln_utils::Excludes::none())
        .expect("walk")
        .into_iter()
        .filter(|e| !e.is_dir())
        .map(|e| e.relative.to_string_lossy().into_owned())
        .collect();
    out.sort();
    out
}

//! Stand-in collaborator tools shared between integration tests.
//!
//! Each tool is a small POSIX shell script. The "compiler" copies the text
//! module to the binary path, so the "runtime" can decide how to behave by
//! looking for marker identifiers in the module it is given.

use once_cell::sync::Lazy;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use wastrun::config::Config;
use wastrun::session::Transport;

const WAST2WASM: &str = r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    -*) shift ;;
    *) src="$1"; shift ;;
  esac
done
if grep -q 'BROKEN' "$src"; then
  echo "error: unexpected token BROKEN" >&2
  exit 1
fi
cp "$src" "$out"
"#;

const WAMRC: &str = r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    -*) shift ;;
    *) src="$1"; shift ;;
  esac
done
echo "Create AoT compiler with:"
if ! grep -q '(module' "$src"; then
  echo "Error: invalid magic number"
  exit 1
fi
cp "$src" "$out"
echo "Compile success"
"#;

const IWASM: &str = r#"#!/bin/sh
for module; do :; done
touch "$module.ran"
if ! grep -q '(module' "$module"; then
  echo "WASM module load failed: magic header not detected"
  exit 1
fi
if grep -q 'ID_BAD' "$module"; then
  echo "WASM module load failed: type mismatch"
  exit 1
fi
if grep -q 'ID_TRAP' "$module"; then
  echo "Exception: unreachable"
  exit 1
fi
f_result=0x1:i32
if grep -q 'ID_NAMED' "$module"; then
  f_result=0x0:i32
fi
printf 'webassembly> '
while read -r line; do
  case "$line" in
    __exit__) exit 0 ;;
    "add 1 2") echo "0x3:i32" ;;
    "add -1 1") echo "0x0:i32" ;;
    "div 1 0") echo "Exception: integer divide by zero" ;;
    f) echo "$f_result" ;;
    pair) echo "0x1:i32,0x2:i64" ;;
    half) echo "0.5:f32" ;;
    runaway) echo "Exception: stack overflow" ;;
    nop) ;;
    "nop1 1") echo ;;
    crash) echo "0x1:i32"; printf 'webassembly> '; exit 0 ;;
    tick) echo "ticked" ;;
    *) echo "Exception: unknown function $line" ;;
  esac
  printf 'webassembly> '
done
"#;

/// Directory holding the three tools, written once per test process.
static TOOLS: Lazy<PathBuf> = Lazy::new(|| {
    let dir = Path::new(env!("CARGO_TARGET_TMPDIR")).join(format!("wastrun-tools-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    for (name, script) in [("wast2wasm", WAST2WASM), ("wamrc", WAMRC), ("iwasm", IWASM)] {
        let path = dir.join(name);
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }
    dir
});

/// A config running the stand-in tools over pipes, with artifacts in `work_dir`.
pub fn config(work_dir: &Path) -> Config {
    config_over(work_dir, Transport::Pipe)
}

/// Like [`config`], with sessions launched over `transport`.
pub fn config_over(work_dir: &Path, transport: Transport) -> Config {
    let tool = |name: &str| TOOLS.join(name).display().to_string();
    Config {
        wast2wasm: tool("wast2wasm"),
        interpreter: tool("iwasm"),
        aot_compiler: tool("wamrc"),
        transport,
        work_dir: work_dir.to_path_buf(),
        ..Config::default()
    }
}

/// Write `source` as a script named `name` in `dir`.
pub fn script(dir: &Path, name: &str, source: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, source).unwrap();
    path
}

/// Files in `dir` whose name ends with `suffix`.
pub fn files_ending(dir: &Path, suffix: &str) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.to_string_lossy().ends_with(suffix))
        .collect();
    found.sort();
    found
}

//! Compiled module artifacts and the temporary files behind them.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// The files produced for one module form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleArtifact {
    /// Text source handed to the compiler; `None` for binary modules.
    pub source: Option<PathBuf>,
    pub binary: PathBuf,
    pub aot: Option<PathBuf>,
}

impl ModuleArtifact {
    /// The file the runtime loads: the AOT image when there is one.
    pub fn runnable(&self) -> &Path {
        self.aot.as_deref().unwrap_or(&self.binary)
    }
}

/// Named modules plus every module artifact in creation order.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    named: HashMap<String, ModuleArtifact>,
    recorded: Vec<ModuleArtifact>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the artifact of a module form, under `name` if it has one.
    ///
    /// A later `(module $name ...)` shadows an earlier one.
    pub fn record(&mut self, name: Option<&str>, artifact: &ModuleArtifact) {
        self.recorded.push(artifact.clone());
        if let Some(name) = name {
            if self.named.insert(name.to_string(), artifact.clone()).is_some() {
                debug!(module = name, "module redefined");
            }
        }
    }

    pub fn named(&self, name: &str) -> Option<&ModuleArtifact> {
        self.named.get(name)
    }

    /// The most recently recorded artifact whose binary still exists and is
    /// not empty.
    pub fn most_recent_nonempty(&self) -> Option<&ModuleArtifact> {
        self.recorded.iter().rev().find(|a| is_nonempty(&a.binary))
    }

    /// The artifact to copy for `(register "name" $module?)`: the explicit
    /// module, else a module defined under the registered name, else the
    /// most recent nonempty one.
    pub fn registration_source(&self, name: &str, module: Option<&str>) -> Option<&ModuleArtifact> {
        match module {
            Some(module) => self.named(module),
            None => self.named(name).or_else(|| self.most_recent_nonempty()),
        }
    }
}

/// Whether `path` exists and has content.
pub fn is_nonempty(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

/// Temporary files created during a run, removed once at the end unless
/// retained.
#[derive(Debug)]
pub struct TempFiles {
    dir: PathBuf,
    pending: Vec<PathBuf>,
    retain: bool,
}

impl TempFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pending: Vec::new(),
            retain: false,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create an empty file named `<stem>_XXXXXX<suffix>` and track it.
    pub fn create(&mut self, stem: &str, suffix: &str) -> io::Result<PathBuf> {
        let path = tempfile::Builder::new()
            .prefix(&format!("{stem}_"))
            .suffix(suffix)
            .tempfile_in(&self.dir)?
            .into_temp_path()
            .keep()
            .map_err(|e| e.error)?;
        self.track(path.clone());
        Ok(path)
    }

    /// Track a file created elsewhere.
    pub fn track(&mut self, path: PathBuf) {
        if !self.pending.contains(&path) {
            self.pending.push(path);
        }
    }

    pub fn pending(&self) -> &[PathBuf] {
        &self.pending
    }

    /// Leave every file in place; dropping no longer removes them.
    pub fn retain(&mut self) {
        self.retain = true;
    }

    /// Remove every pending file that still exists. Failures are logged and
    /// the file is forgotten; calling again does nothing.
    pub fn cleanup(&mut self) -> usize {
        let mut removed = 0;
        for path in self.pending.drain(..) {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove tempfile {}: {e}", path.display()),
            }
        }
        removed
    }
}

impl Drop for TempFiles {
    fn drop(&mut self) {
        if !self.retain {
            self.cleanup();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(binary: &Path) -> ModuleArtifact {
        ModuleArtifact {
            source: None,
            binary: binary.to_path_buf(),
            aot: None,
        }
    }

    #[test]
    fn temp_files_are_prefixed_and_removed_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = TempFiles::new(dir.path());
        let wast = files.create("i32", ".wast").unwrap();
        let wasm = files.create("i32", ".wasm").unwrap();
        let name = wast.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("i32_") && name.ends_with(".wast"), "{name}");
        assert!(wast.exists() && wasm.exists());

        fs::remove_file(&wasm).unwrap();
        assert_eq!(files.cleanup(), 1);
        assert!(!wast.exists());
        assert_eq!(files.cleanup(), 0);
    }

    #[test]
    fn retained_files_survive_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let mut files = TempFiles::new(dir.path());
            let path = files.create("keep", ".wasm").unwrap();
            files.retain();
            path
        };
        assert!(path.exists());

        let dropped = {
            let mut files = TempFiles::new(dir.path());
            files.create("gone", ".wasm").unwrap()
        };
        assert!(!dropped.exists());
    }

    #[test]
    fn tracking_is_deduplicated() {
        let mut files = TempFiles::new("/tmp");
        files.track(PathBuf::from("/tmp/M.wasm"));
        files.track(PathBuf::from("/tmp/M.wasm"));
        assert_eq!(files.pending().len(), 1);
        files.retain();
    }

    #[test]
    fn registration_prefers_named_then_most_recent_nonempty() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.wasm");
        let named = dir.path().join("M.wasm");
        let empty = dir.path().join("b.wasm");
        fs::write(&first, b"\0asm").unwrap();
        fs::write(&named, b"\0asm").unwrap();
        fs::write(&empty, b"").unwrap();

        let mut registry = ModuleRegistry::new();
        assert_eq!(registry.registration_source("spectest", None), None);
        registry.record(None, &artifact(&first));
        registry.record(Some("M"), &artifact(&named));
        registry.record(None, &artifact(&empty));

        let binary = |a: Option<&ModuleArtifact>| a.map(|a| a.binary.clone());
        assert_eq!(binary(registry.most_recent_nonempty()), Some(named.clone()));
        assert_eq!(binary(registry.registration_source("M", None)), Some(named.clone()));
        assert_eq!(binary(registry.registration_source("other", Some("M"))), Some(named.clone()));
        assert_eq!(registry.registration_source("other", Some("N")), None);
        assert_eq!(binary(registry.registration_source("other", None)), Some(named.clone()));
    }

    #[test]
    fn runnable_prefers_aot_image() {
        let mut a = artifact(Path::new("m.wasm"));
        assert_eq!(a.runnable(), Path::new("m.wasm"));
        a.aot = Some(PathBuf::from("m.aot"));
        assert_eq!(a.runnable(), Path::new("m.aot"));
    }
}

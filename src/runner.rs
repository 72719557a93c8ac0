//! The directive state machine.
//!
//! [`TestRunner`] walks the forms of one script in source order. Module forms
//! are compiled and loaded into a runtime session; invocation directives are
//! sent to a session and their output compared; expected-failure directives
//! build a module that must be rejected. The first failure aborts the run.

use crate::config::{Config, SkipList, AOT_SUCCESS_PROMPT, REFERENCE_INTERPRETER_SKIPS};
use crate::error::{CompileError, CompileStage, ResultMismatchError, RunError, UnrecognizedDirectiveError};
use crate::registry::{is_nonempty, ModuleArtifact, ModuleRegistry, TempFiles};
use crate::session::{result_line, Session, SessionError, Transcript};
use crate::tools::{self, AotOutput, GUEST_SHELL_PROMPT};
use crate::wast::{
    check_trap, is_get_action, is_module_trap, match_results, parse_assertion, parse_module_assertion,
    parse_module_form, parse_register, read_forms, DirectiveKind, DirectiveParseError, Expectation, Form,
    ModuleSource,
};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Exit status of a script run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Passed = 0,
    Failed = 101,
    /// The run failed and its artifacts could not be preserved.
    DiagnosticsFailed = 102,
}

impl Disposition {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Where the runner is in bringing up a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    NoSession,
    Compiling,
    AwaitingLoadPrompt,
    Ready,
    TerminalFailure,
}

/// Counts of what a run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub passed: usize,
    pub skipped: usize,
    pub comments: usize,
    pub modules: usize,
    pub invoked: usize,
    pub registered: usize,
}

#[derive(Debug)]
pub struct RunReport {
    pub summary: RunSummary,
    pub disposition: Disposition,
    /// The failure that aborted the run.
    pub error: Option<RunError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Passed,
    Skipped,
    Comment,
    Module,
    Invoked,
    Registered,
}

/// Shell wait under emulation.
const GUEST_SHELL_TIMEOUT: Duration = Duration::from_secs(10);

/// Exported functions whose memory.grow the xtensa emulator cannot satisfy.
const XTENSA_MEMORY_GROW: [&str; 4] = [
    "as-memory.grow-value",
    "as-memory.grow-size",
    "as-memory.grow-last",
    "as-memory.grow-everywhere",
];

const UNRECOGNIZED_PREVIEW: usize = 40;

/// A loaded module: its runtime session and the files it was built from.
struct Loaded {
    session: Session,
    artifact: ModuleArtifact,
}

/// Run one script and report its disposition.
pub fn run_script(path: &Path, config: &Config) -> RunReport {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "wast".to_string());
    match TestRunner::new(config, &stem) {
        Ok(mut runner) => runner.run(path),
        Err(e) => {
            error!("{e}");
            RunReport {
                summary: RunSummary::default(),
                disposition: Disposition::Failed,
                error: Some(e),
            }
        }
    }
}

pub struct TestRunner<'a> {
    config: &'a Config,
    /// Prefix for the temporary files of anonymous modules.
    stem: String,
    skip: SkipList,
    transcript: Option<Transcript>,
    state: State,
    current: Option<Loaded>,
    named: HashMap<String, Loaded>,
    /// Most recently loaded named module, serving unqualified directives
    /// when no anonymous module is loaded.
    last_named: Option<String>,
    registry: ModuleRegistry,
    temp: TempFiles,
    /// Artifacts the form being processed built or ran.
    implicated: Option<ModuleArtifact>,
    summary: RunSummary,
}

impl<'a> TestRunner<'a> {
    pub fn new(config: &'a Config, stem: &str) -> Result<Self, RunError> {
        let mut skip = config.skip.clone();
        if config.is_reference_interpreter() {
            for pattern in REFERENCE_INTERPRETER_SKIPS {
                skip.add(pattern)?;
            }
        }
        let transcript = match &config.debug_file {
            Some(path) => Some(Transcript::open(path).map_err(RunError::io("failed to open debug file", path))?),
            None => None,
        };
        Ok(Self {
            config,
            stem: stem.to_string(),
            skip,
            transcript,
            state: State::NoSession,
            current: None,
            named: HashMap::new(),
            last_named: None,
            registry: ModuleRegistry::new(),
            temp: TempFiles::new(&config.work_dir),
            implicated: None,
            summary: RunSummary::default(),
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Run the script at `path`, preserve diagnostics on failure, and clean
    /// up.
    pub fn run(&mut self, path: &Path) -> RunReport {
        let name = path.display().to_string();
        info!("################################################");
        info!("### Testing {name}");
        info!("################################################");

        let result = fs::read_to_string(path)
            .map_err(RunError::io("failed to read", path))
            .and_then(|source| Ok(read_forms(&source)?))
            .and_then(|forms| self.run_forms(&forms));

        let (disposition, error) = match result {
            Ok(()) => (Disposition::Passed, None),
            Err(e) => {
                self.transition(State::TerminalFailure);
                error!("THE FINAL EXCEPTION IS {e}");
                let disposition = match self.preserve_diagnostics(&e) {
                    Ok(()) => Disposition::Failed,
                    Err(copy) => {
                        error!("Failed to copy files to log directory: {copy}");
                        Disposition::DiagnosticsFailed
                    }
                };
                (disposition, Some(e))
            }
        };
        self.shutdown();

        let s = &self.summary;
        info!(
            "{} passed, {} skipped, {} modules, {} invoked, {} registered, {} comments",
            s.passed, s.skipped, s.modules, s.invoked, s.registered, s.comments
        );
        info!("### End testing {name} with {}", disposition.code());
        RunReport {
            summary: self.summary.clone(),
            disposition,
            error,
        }
    }

    /// Process `forms` in order, stopping at the first failure.
    pub fn run_forms(&mut self, forms: &[Form]) -> Result<(), RunError> {
        for form in forms {
            self.implicated = None;
            let outcome = if form.kind != DirectiveKind::Comment && self.skip.matches(&form.text) {
                info!("Skipping test: {}", form.preview(60));
                Outcome::Skipped
            } else {
                self.dispatch(form)?
            };
            self.tally(outcome);
            self.settle();
        }
        Ok(())
    }

    fn dispatch(&mut self, form: &Form) -> Result<Outcome, RunError> {
        debug!(line = form.line, kind = %form.kind, "directive");
        match form.kind {
            DirectiveKind::Comment => {
                info!("{}", form.text);
                Ok(Outcome::Comment)
            }
            DirectiveKind::Module => self.load_module(form),
            DirectiveKind::AssertReturn if is_get_action(form) => {
                info!("ignoring assert_return get");
                Ok(Outcome::Skipped)
            }
            DirectiveKind::AssertTrap if is_module_trap(form) => self.expect_failure(form),
            DirectiveKind::AssertReturn
            | DirectiveKind::AssertTrap
            | DirectiveKind::AssertExhaustion
            | DirectiveKind::AssertException => self.check_invocation(form),
            DirectiveKind::AssertInvalid | DirectiveKind::AssertMalformed | DirectiveKind::AssertUnlinkable => {
                self.expect_failure(form)
            }
            DirectiveKind::AssertReturnNan => {
                info!("ignoring assert_return_.*_nan");
                Ok(Outcome::Skipped)
            }
            DirectiveKind::Invoke => self.invoke(form),
            DirectiveKind::Register => self.register(form),
            DirectiveKind::Unknown => Err(UnrecognizedDirectiveError {
                prefix: form.preview(UNRECOGNIZED_PREVIEW),
            }
            .into()),
        }
    }

    fn tally(&mut self, outcome: Outcome) {
        let s = &mut self.summary;
        match outcome {
            Outcome::Passed => s.passed += 1,
            Outcome::Skipped => s.skipped += 1,
            Outcome::Comment => s.comments += 1,
            Outcome::Module => s.modules += 1,
            Outcome::Invoked => s.invoked += 1,
            Outcome::Registered => s.registered += 1,
        }
    }

    fn transition(&mut self, to: State) {
        if self.state != to {
            debug!(from = ?self.state, to = ?to, "state");
            self.state = to;
        }
    }

    /// Return to `Ready` or `NoSession` once a form is done.
    fn settle(&mut self) {
        let live = self.current.is_some() || !self.named.is_empty();
        self.transition(if live { State::Ready } else { State::NoSession });
    }

    fn load_module(&mut self, form: &Form) -> Result<Outcome, RunError> {
        let module = parse_module_form(&form.text).ok_or_else(|| DirectiveParseError::new(form, "malformed module form"))?;
        let stem = module.name.clone().unwrap_or_else(|| self.stem.clone());
        let Some(artifact) = self.build_artifact(&stem, &module.source)? else {
            info!("ignoring module quote");
            return Ok(Outcome::Skipped);
        };
        self.registry.record(module.name.as_deref(), &artifact);

        // the previous holder of the slot goes before its replacement starts
        match &module.name {
            Some(name) => {
                if let Some(mut old) = self.named.remove(name) {
                    old.session.terminate();
                }
            }
            None => {
                if let Some(mut old) = self.current.take() {
                    old.session.terminate();
                }
            }
        }

        if let Some(aot) = &artifact.aot {
            self.compile_aot_session(&artifact.binary, aot, self.config.start_timeout)
                .map_err(|e| compile_failure(CompileStage::Aot, e))?;
        }
        let session = self.load(&artifact)?;
        let loaded = Loaded { session, artifact };
        match module.name {
            Some(name) => {
                self.named.insert(name.clone(), loaded);
                self.last_named = Some(name);
            }
            None => self.current = Some(loaded),
        }
        Ok(Outcome::Module)
    }

    /// Write the module's files: text source plus compiled binary, or the
    /// decoded binary directly. `None` for quoted modules.
    fn build_artifact(&mut self, stem: &str, source: &ModuleSource) -> Result<Option<ModuleArtifact>, RunError> {
        let work_dir = self.temp.dir().to_path_buf();
        let create = |temp: &mut TempFiles, suffix: &str| {
            temp.create(stem, suffix)
                .map_err(RunError::io("failed to create temporary file in", &work_dir))
        };
        self.transition(State::Compiling);
        let (source_path, binary) = match source {
            ModuleSource::Quote => return Ok(None),
            ModuleSource::Text(text) => {
                let wast = create(&mut self.temp, ".wast")?;
                let wasm = create(&mut self.temp, ".wasm")?;
                info!("Writing WAST module to '{}'", wast.display());
                fs::write(&wast, text).map_err(RunError::io("failed to write", &wast))?;
                (Some(wast), wasm)
            }
            ModuleSource::Binary(bytes) => {
                let wasm = create(&mut self.temp, ".wasm")?;
                fs::write(&wasm, bytes).map_err(RunError::io("failed to write", &wasm))?;
                (None, wasm)
            }
        };
        let aot = if self.config.aot {
            Some(create(&mut self.temp, ".aot")?)
        } else {
            None
        };
        let artifact = ModuleArtifact {
            source: source_path,
            binary,
            aot,
        };
        self.implicated = Some(artifact.clone());
        if let Some(wast) = &artifact.source {
            tools::compile_text(self.config, wast, &artifact.binary)?;
        }
        Ok(Some(artifact))
    }

    /// Compile to AOT over an interactive session, succeeding on the
    /// compiler's success prompt.
    fn compile_aot_session(&mut self, wasm: &Path, aot: &Path, timeout: Duration) -> Result<(), SessionError> {
        self.transition(State::Compiling);
        info!("Compiling '{}' to '{}'", wasm.display(), aot.display());
        let cmd = tools::aot_command(self.config, wasm, aot, AotOutput::Image);
        let mut session = Session::launch(&cmd, self.config.transport, self.transcript.clone())?;
        session.assert_prompt(&[AOT_SUCCESS_PROMPT], timeout, false).map(|_| ())
    }

    /// Launch the runtime on `artifact`; under emulation, mount the work
    /// directory and start the runtime from the guest shell.
    fn start_runtime(&mut self, artifact: &ModuleArtifact) -> Result<Session, RunError> {
        self.transition(State::AwaitingLoadPrompt);
        let module = artifact.runnable();
        info!("Starting interpreter for module '{}'", module.display());
        let launch = tools::runtime_launch(self.config, module)?;
        let mut session = Session::launch(&launch.command, self.config.transport, self.transcript.clone())?;
        if let Some(guest) = &launch.guest_command {
            session.read_to_prompt(&[GUEST_SHELL_PROMPT], GUEST_SHELL_TIMEOUT)?;
            session.writeline(&tools::guest_mount_command(self.config))?;
            session.read_to_prompt(&[GUEST_SHELL_PROMPT], GUEST_SHELL_TIMEOUT)?;
            session.writeline(guest)?;
        }
        Ok(session)
    }

    /// Start the runtime and wait for its prompt.
    fn load(&mut self, artifact: &ModuleArtifact) -> Result<Session, RunError> {
        let config = self.config;
        let mut session = self.start_runtime(artifact)?;
        session
            .assert_prompt(&[config.prompt.as_str()], config.start_timeout, false)
            .map_err(|e| compile_failure(CompileStage::Load, e))?;
        self.transition(State::Ready);
        Ok(session)
    }

    /// `assert_invalid`, `assert_malformed`, `assert_unlinkable` and
    /// module-level `assert_trap`: the module must fail to compile or load
    /// with the expected message.
    fn expect_failure(&mut self, form: &Form) -> Result<Outcome, RunError> {
        let assertion = parse_module_assertion(form)?;
        let kind = assertion.kind.keyword().trim_start_matches("assert_");
        let expected = assertion.message;
        info!("Testing({kind})");

        let stem = self.stem.clone();
        let artifact = match self.build_artifact(&stem, &assertion.module.source) {
            Ok(Some(artifact)) => artifact,
            Ok(None) => {
                info!("ignoring assert_{kind} module quote");
                return Ok(Outcome::Skipped);
            }
            Err(RunError::Compile(e)) => return self.judge_failure(expected, &e.output),
            Err(e) => return Err(e),
        };

        if let Some(aot) = &artifact.aot {
            match self.compile_aot_session(&artifact.binary, aot, self.config.start_fail_timeout) {
                Ok(()) => {}
                Err(e @ (SessionError::Spawn { .. } | SessionError::Io(_))) => return Err(e.into()),
                Err(e) => return self.judge_failure(expected, e.buffered().unwrap_or_default()),
            }
        }

        let config = self.config;
        let mut session = self.start_runtime(&artifact)?;
        match session.read_to_prompt(&[config.prompt.as_str()], config.start_fail_timeout) {
            Ok(header) => Err(ResultMismatchError::UnexpectedLoad {
                expected,
                produced: header,
            }
            .into()),
            Err(e @ (SessionError::Timeout { .. } | SessionError::Closed { .. })) => {
                self.judge_failure(expected, e.buffered().unwrap_or_default())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn judge_failure(&self, expected: String, output: &str) -> Result<Outcome, RunError> {
        if self.config.messages.accepts(&expected, output) {
            info!("Out exception includes expected one, pass:");
            info!("  Expected: {expected}");
            info!("  Got: {}", output.trim_end());
            Ok(Outcome::Passed)
        } else {
            Err(ResultMismatchError::FailureText {
                expected,
                produced: output.to_string(),
            }
            .into())
        }
    }

    fn check_invocation(&mut self, form: &Form) -> Result<Outcome, RunError> {
        let assertion = parse_assertion(form)?;
        let invocation = &assertion.invocation;
        if form.kind == DirectiveKind::AssertReturn && self.skips_memory_grow(&invocation.function) {
            info!("ignoring memory.grow test");
            return Ok(Outcome::Skipped);
        }
        let mode = match form.kind {
            DirectiveKind::AssertReturn => "return",
            DirectiveKind::AssertTrap => "trap",
            DirectiveKind::AssertExhaustion => "exhaustion",
            _ => "wasmexception",
        };
        let command = invocation.command();
        let expected = assertion.expectation.as_ref().map(Expectation::expected_text).unwrap_or_default();
        info!("Testing({mode}) {command} = {expected}");

        let produced = self.send(invocation.module.as_deref(), form, &command)?;
        match &assertion.expectation {
            Some(Expectation::Trap(message)) => check_trap(&produced, message)?,
            Some(Expectation::Results(_)) => match_results(&produced, &expected)?,
            None => {}
        }
        Ok(Outcome::Passed)
    }

    /// Bare `invoke`: run the call and log, no comparison. A timeout is
    /// logged and the run goes on.
    fn invoke(&mut self, form: &Form) -> Result<Outcome, RunError> {
        let assertion = parse_assertion(form)?;
        let invocation = &assertion.invocation;
        info!("Invoking {}({})", invocation.escaped_function(), invocation.display_args());
        match self.send(invocation.module.as_deref(), form, &invocation.command()) {
            Ok(_) => Ok(Outcome::Invoked),
            Err(RunError::Session(e @ SessionError::Timeout { .. })) => {
                warn!("invoke did not complete: {e}");
                Ok(Outcome::Invoked)
            }
            Err(e) => Err(e),
        }
    }

    fn skips_memory_grow(&self, function: &str) -> bool {
        self.config.qemu.is_some() && self.config.target == "xtensa" && XTENSA_MEMORY_GROW.contains(&function)
    }

    /// Send `command` to the session serving `module` and return the result
    /// line.
    fn send(&mut self, module: Option<&str>, form: &Form, command: &str) -> Result<String, RunError> {
        let config = self.config;
        let loaded = self.resolve(module, form)?;
        let artifact = loaded.artifact.clone();
        let output = loaded.session.invoke(command, &config.prompt, config.test_timeout);
        self.implicated = Some(artifact);
        Ok(result_line(&output?, command))
    }

    /// The session for `module`, or for an unqualified directive the current
    /// one, falling back to the most recent named module.
    fn resolve(&mut self, module: Option<&str>, form: &Form) -> Result<&mut Loaded, RunError> {
        let name = match module {
            Some(name) => name.to_string(),
            None if self.current.is_some() => {
                return self
                    .current
                    .as_mut()
                    .ok_or_else(|| RunError::NoSession(form.preview(UNRECOGNIZED_PREVIEW)))
            }
            None => self
                .last_named
                .clone()
                .ok_or_else(|| RunError::NoSession(form.preview(UNRECOGNIZED_PREVIEW)))?,
        };
        self.ensure_named(&name)?;
        self.named.get_mut(&name).ok_or(RunError::UnknownModule(name))
    }

    /// Make sure the named module has a live session, relaunching it from
    /// its recorded artifact when needed.
    fn ensure_named(&mut self, name: &str) -> Result<(), RunError> {
        if self.named.get_mut(name).is_some_and(|loaded| loaded.session.is_running()) {
            return Ok(());
        }
        let artifact = self
            .registry
            .named(name)
            .cloned()
            .ok_or_else(|| RunError::UnknownModule(name.to_string()))?;
        if let Some(mut old) = self.named.remove(name) {
            old.session.terminate();
        }
        let session = self.load(&artifact)?;
        self.named.insert(name.to_string(), Loaded { session, artifact });
        Ok(())
    }

    fn register(&mut self, form: &Form) -> Result<Outcome, RunError> {
        let registration = parse_register(form)?;
        let name = registration.name.as_str();
        let source = self
            .registry
            .registration_source(name, registration.module.as_deref())
            .cloned()
            .ok_or_else(|| RunError::NothingToRegister(name.to_string()))?;
        if registration.module.is_none() && self.registry.named(name).is_none() {
            info!("Module {name} is not a named module, using the nearest module {}", source.binary.display());
        }

        let binary = self.temp.dir().join(format!("{name}.wasm"));
        fs::copy(&source.binary, &binary).map_err(RunError::io("failed to copy module to", &binary))?;
        self.temp.track(binary.clone());
        let aot = if self.config.aot {
            let aot = self.temp.dir().join(format!("{name}.aot"));
            self.temp.track(aot.clone());
            match source.aot.as_deref().filter(|path| is_nonempty(path)) {
                Some(compiled) => {
                    fs::copy(compiled, &aot).map_err(RunError::io("failed to copy module to", &aot))?;
                }
                None => tools::compile_aot(self.config, &binary, &aot, AotOutput::Image)?,
            }
            Some(aot)
        } else {
            None
        };
        self.implicated = Some(ModuleArtifact {
            source: None,
            binary,
            aot,
        });
        Ok(Outcome::Registered)
    }

    /// Copy the artifacts of the failing form to the log directory, with
    /// extra AOT output for inspection.
    fn preserve_diagnostics(&self, failure: &RunError) -> Result<(), RunError> {
        let Some(log_dir) = &self.config.log_dir else {
            warn!("no log directory configured, artifacts not preserved");
            return Ok(());
        };
        let Some(artifact) = &self.implicated else {
            debug!("failing form has no artifacts");
            return Ok(());
        };
        copy_into(&artifact.binary, log_dir)?;
        if !(self.config.aot || self.config.features.xip) {
            return Ok(());
        }
        let Some(aot) = &artifact.aot else {
            return Ok(());
        };
        let aot_name = copy_into(aot, log_dir)?;
        if failure.to_string().contains("indirect-mode") {
            let object = log_dir.join(format!("{aot_name}.o"));
            tools::compile_aot(self.config, &artifact.binary, &object, AotOutput::Object)?;
            let dump = ["llvm-objdump".to_string(), "-r".to_string(), object.display().to_string()];
            info!("{}", tools::run_to_completion(CompileStage::Inspect, &dump)?);
        }
        let ir = log_dir.join(format!("{aot_name}.ir"));
        tools::compile_aot(self.config, &artifact.binary, &ir, AotOutput::Ir)?;
        Ok(())
    }

    /// Terminate every session, then remove or keep the temporary files.
    fn shutdown(&mut self) {
        if let Some(mut loaded) = self.current.take() {
            loaded.session.terminate();
        }
        for (_, mut loaded) in self.named.drain() {
            loaded.session.terminate();
        }
        if self.config.no_cleanup {
            info!("Leaving tmp*");
            self.temp.retain();
        } else {
            info!("Removing tmp*");
            let removed = self.temp.cleanup();
            debug!(removed, "temporary files removed");
        }
    }
}

fn compile_failure(stage: CompileStage, e: SessionError) -> CompileError {
    let output = e.buffered().unwrap_or_default().to_string();
    CompileError::new(stage, e.to_string(), output)
}

/// Copy `path` into `dir`, returning the file name used.
fn copy_into(path: &Path, dir: &Path) -> Result<String, RunError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let target: PathBuf = dir.join(&name);
    fs::copy(path, &target).map_err(RunError::io("failed to copy artifact to", &target))?;
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Transport;

    fn config(dir: &Path) -> Config {
        Config {
            transport: Transport::Pipe,
            work_dir: dir.to_path_buf(),
            ..Config::default()
        }
    }

    #[test]
    fn disposition_codes() {
        assert_eq!(Disposition::Passed.code(), 0);
        assert_eq!(Disposition::Failed.code(), 101);
        assert_eq!(Disposition::DiagnosticsFailed.code(), 102);
    }

    #[test]
    fn comments_skips_and_ignored_forms_need_no_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.skip.add("skip-me").unwrap();
        let mut runner = TestRunner::new(&config, "t").unwrap();
        let forms = read_forms(
            r#"
            ;; leading comment
            (assert_return (invoke "skip-me") (i32.const 1))
            (assert_return_canonical_nan (invoke "f"))
            (assert_return (get "g") (i32.const 1))
            (assert_malformed (module quote "(func") "unexpected token")
            "#,
        )
        .unwrap();
        runner.run_forms(&forms).unwrap();
        assert_eq!(runner.summary().comments, 1);
        assert_eq!(runner.summary().skipped, 4);
        assert_eq!(runner.state(), State::NoSession);
    }

    #[test]
    fn invocation_without_a_module_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let mut runner = TestRunner::new(&config, "t").unwrap();
        let forms = read_forms(r#"(assert_return (invoke "f") (i32.const 1))"#).unwrap();
        let err = runner.run_forms(&forms).unwrap_err();
        assert!(matches!(err, RunError::NoSession(_)), "{err}");
    }

    #[test]
    fn unknown_directive_names_its_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let mut runner = TestRunner::new(&config, "t").unwrap();
        let forms = read_forms(r#"(assert_uninstantiable (module (func $f unreachable) (start $f)) "unreachable")"#)
            .unwrap();
        match runner.run_forms(&forms).unwrap_err() {
            RunError::Unrecognized(e) => assert_eq!(e.prefix, "(assert_uninstantiable (module (func $f "),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn register_without_any_module_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let mut runner = TestRunner::new(&config, "t").unwrap();
        let forms = read_forms(r#"(register "M")"#).unwrap();
        assert!(matches!(runner.run_forms(&forms).unwrap_err(), RunError::NothingToRegister(name) if name == "M"));
    }

    #[test]
    fn missing_script_is_a_failed_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let report = run_script(&dir.path().join("absent.wast"), &config);
        assert_eq!(report.disposition, Disposition::Failed);
        assert!(matches!(report.error, Some(RunError::Io { .. })));
    }

    #[test]
    fn reference_interpreter_adds_skips() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            interpreter: "spec/interpreter/wasm.py".to_string(),
            ..config(dir.path())
        };
        let mut runner = TestRunner::new(&config, "t").unwrap();
        let forms = read_forms(r#"(assert_return (invoke "~!@#") (i32.const 1))"#).unwrap();
        runner.run_forms(&forms).unwrap();
        assert_eq!(runner.summary().skipped, 1);
    }
}

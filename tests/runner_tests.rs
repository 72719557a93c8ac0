#![cfg(unix)]

mod common;

#[cfg(test)]
mod tests {
    use crate::common::{config, config_over, files_ending, script};
    use rstest::rstest;
    use std::fs;
    use wastrun::error::{ResultMismatchError, RunError};
    use wastrun::runner::{run_script, Disposition};
    use wastrun::session::Transport;

    const ADD_MODULE: &str = r#"(module
  (func (export "add") (param i32 i32) (result i32)
    local.get 0
    local.get 1
    i32.add))
"#;

    #[rstest]
    #[case(Transport::Pipe)]
    #[case(Transport::Pty)]
    fn add_returns_its_sum(#[case] transport: Transport) {
        let (scripts, work) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
        let source = format!(
            "{ADD_MODULE}\n(assert_return (invoke \"add\" (i32.const 1)(i32.const 2)) (i32.const 3))\n\
             (assert_return (invoke \"add\" (i32.const -1) (i32.const 1)) (i32.const 0))\n"
        );
        let path = script(scripts.path(), "add.wast", &source);
        let report = run_script(&path, &config_over(work.path(), transport));
        assert_eq!(report.disposition, Disposition::Passed, "{:?}", report.error);
        assert_eq!(report.summary.modules, 1);
        assert_eq!(report.summary.passed, 2);
    }

    #[rstest]
    #[case(Transport::Pipe, "(assert_return (invoke \"nop1\" (i32.const 1)))\n", 1)]
    #[case(
        Transport::Pty,
        "(assert_return (invoke \"nop\"))\n(assert_return (invoke \"nop1\" (i32.const 1)))\n",
        2
    )]
    fn void_returns_expect_no_result(#[case] transport: Transport, #[case] forms: &str, #[case] passed: usize) {
        let (scripts, work) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
        let source = format!("(module (func (export \"nop\")) (func (export \"nop1\") (param i32)))\n{forms}");
        let path = script(scripts.path(), "void.wast", &source);
        let report = run_script(&path, &config_over(work.path(), transport));
        assert_eq!(report.disposition, Disposition::Passed, "{:?}", report.error);
        assert_eq!(report.summary.passed, passed);
    }

    #[test]
    fn exited_named_runtime_is_relaunched() {
        let (scripts, work) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
        let source = r#"
(module $M (func $ID_NAMED (export "f") (result i32) i32.const 0) (func (export "crash") (result i32) i32.const 1))
(assert_return (invoke $M "crash") (i32.const 1))
(module (func (export "g")))
(assert_return (invoke $M "f") (i32.const 0))
"#;
        let path = script(scripts.path(), "crash.wast", source);
        let report = run_script(&path, &config(work.path()));
        assert_eq!(report.disposition, Disposition::Passed, "{:?}", report.error);
        assert_eq!(report.summary.passed, 2);
    }

    #[test]
    fn trap_message_is_matched_by_containment() {
        let (scripts, work) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
        let source = r#"
(module (func (export "div") (param i32 i32) (result i32) local.get 0 local.get 1 i32.div_s))
(assert_trap (invoke "div" (i32.const 1)(i32.const 0)) "integer divide by zero")
(assert_exhaustion (invoke "runaway") "call stack exhausted")
"#;
        let path = script(scripts.path(), "trap.wast", source);
        let report = run_script(&path, &config(work.path()));
        assert_eq!(report.disposition, Disposition::Passed, "{:?}", report.error);
        assert_eq!(report.summary.passed, 2);
    }

    #[test]
    fn malformed_binary_fails_in_the_aot_compiler_without_running_the_runtime() {
        let (scripts, work) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
        let source = r#"(assert_malformed (module binary "\00\61\73\6e" "\01\00\00\00") "invalid magic")"#;
        let path = script(scripts.path(), "malformed.wast", source);
        let mut config = config(work.path());
        config.aot = true;
        let report = run_script(&path, &config);
        assert_eq!(report.disposition, Disposition::Passed, "{:?}", report.error);
        assert_eq!(report.summary.passed, 1);
        assert!(files_ending(work.path(), ".ran").is_empty());
    }

    #[test]
    fn malformed_binary_is_rejected_by_the_runtime() {
        let (scripts, work) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
        let source = r#"(assert_malformed (module binary "") "magic header not detected")"#;
        let path = script(scripts.path(), "malformed.wast", source);
        let report = run_script(&path, &config(work.path()));
        assert_eq!(report.disposition, Disposition::Passed, "{:?}", report.error);
        assert!(files_ending(work.path(), ".wasm").is_empty(), "temporary files are cleaned up");
    }

    #[test]
    fn named_module_serves_qualified_invocations() {
        let (scripts, work) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
        let source = r#"
(module $M (func $ID_NAMED (export "f") (result i32) i32.const 0))
(module (func (export "f") (result i32) i32.const 1))
(assert_return (invoke $M "f") (i32.const 0))
(assert_return (invoke "f") (i32.const 1))
"#;
        let path = script(scripts.path(), "named.wast", source);
        let report = run_script(&path, &config(work.path()));
        assert_eq!(report.disposition, Disposition::Passed, "{:?}", report.error);
        assert_eq!(report.summary.modules, 2);
        assert_eq!(report.summary.passed, 2);
    }

    #[test]
    fn unqualified_invocations_fall_back_to_the_named_module() {
        let (scripts, work) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
        let source = r#"
(module $M (func $ID_NAMED (export "f") (result i32) i32.const 0))
(assert_return (invoke "f") (i32.const 0))
(invoke "tick")
"#;
        let path = script(scripts.path(), "fallback.wast", source);
        let report = run_script(&path, &config(work.path()));
        assert_eq!(report.disposition, Disposition::Passed, "{:?}", report.error);
        assert_eq!(report.summary.invoked, 1);
    }

    #[test]
    fn register_copies_the_module_under_its_new_name() {
        let (scripts, work) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
        let source = format!("{ADD_MODULE}\n(register \"math\")\n");
        let path = script(scripts.path(), "register.wast", &source);
        let mut config = config(work.path());
        config.aot = true;
        config.no_cleanup = true;
        let report = run_script(&path, &config);
        assert_eq!(report.disposition, Disposition::Passed, "{:?}", report.error);
        assert_eq!(report.summary.registered, 1);
        let copied = fs::read_to_string(work.path().join("math.wasm")).unwrap();
        assert!(copied.contains("\"add\""));
        assert!(work.path().join("math.aot").exists());
    }

    #[rstest]
    #[case(r#"(assert_invalid (module (func $ID_BAD (result i32))) "type mismatch")"#)]
    #[case(r#"(assert_trap (module (func $ID_TRAP unreachable) (start $ID_TRAP)) "unreachable")"#)]
    #[case(r#"(assert_malformed (module (func BROKEN)) "unexpected token")"#)]
    fn expected_failures_pass(#[case] form: &str) {
        let (scripts, work) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
        let path = script(scripts.path(), "fail.wast", form);
        let report = run_script(&path, &config(work.path()));
        assert_eq!(report.disposition, Disposition::Passed, "{:?}", report.error);
        assert_eq!(report.summary.passed, 1);
    }

    #[test]
    fn wrong_failure_message_aborts() {
        let (scripts, work) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
        let path = script(
            scripts.path(),
            "invalid.wast",
            r#"(assert_invalid (module (func $ID_BAD (result i32))) "unknown global")"#,
        );
        let report = run_script(&path, &config(work.path()));
        assert_eq!(report.disposition, Disposition::Failed);
        assert!(matches!(
            report.error,
            Some(RunError::Mismatch(ResultMismatchError::FailureText { .. }))
        ));
    }

    #[test]
    fn module_that_loads_fails_an_expected_failure() {
        let (scripts, work) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
        let path = script(
            scripts.path(),
            "loads.wast",
            r#"(assert_invalid (module (func (result i32) i32.const 0)) "type mismatch")"#,
        );
        let report = run_script(&path, &config(work.path()));
        assert!(matches!(
            report.error,
            Some(RunError::Mismatch(ResultMismatchError::UnexpectedLoad { .. }))
        ));
    }

    #[test]
    fn count_mismatch_preserves_the_module() {
        let (scripts, work, logs) = (
            tempfile::tempdir().unwrap(),
            tempfile::tempdir().unwrap(),
            tempfile::tempdir().unwrap(),
        );
        let source = r#"
(module (func (export "pair") (result i32 i64) i32.const 1 i64.const 2))
(assert_return (invoke "pair") (i32.const 1))
(assert_return (invoke "pair") (i32.const 1) (i64.const 2))
"#;
        let path = script(scripts.path(), "pair.wast", source);
        let mut config = config(work.path());
        config.log_dir = Some(logs.path().to_path_buf());
        let report = run_script(&path, &config);
        assert_eq!(report.disposition, Disposition::Failed);
        assert!(matches!(
            report.error,
            Some(RunError::Mismatch(ResultMismatchError::Count { .. }))
        ));
        assert_eq!(report.summary.passed, 0);
        assert_eq!(files_ending(logs.path(), ".wasm").len(), 1);
        assert!(files_ending(work.path(), ".wasm").is_empty());
    }

    #[test]
    fn unwritable_log_dir_is_a_diagnostics_failure() {
        let (scripts, work) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
        let source = format!("{ADD_MODULE}\n(assert_return (invoke \"add\" (i32.const 1)(i32.const 2)) (i32.const 4))\n");
        let path = script(scripts.path(), "add.wast", &source);
        let mut config = config(work.path());
        config.log_dir = Some(work.path().join("missing").join("logs"));
        let report = run_script(&path, &config);
        assert_eq!(report.disposition, Disposition::DiagnosticsFailed);
    }

    #[test]
    fn broken_module_is_a_compile_error() {
        let (scripts, work) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
        let path = script(scripts.path(), "broken.wast", "(module (func BROKEN))");
        let report = run_script(&path, &config(work.path()));
        assert!(matches!(report.error, Some(RunError::Compile(_))));
    }

    #[test]
    fn float_results_compare_by_value() {
        let (scripts, work) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
        let source = r#"
(module (func (export "half") (result f32) f32.const 0.5))
(assert_return (invoke "half") (f32.const 0x1p-1))
"#;
        let path = script(scripts.path(), "float.wast", source);
        let report = run_script(&path, &config(work.path()));
        assert_eq!(report.disposition, Disposition::Passed, "{:?}", report.error);
    }

    #[test]
    fn script_syntax_error_aborts_before_any_module() {
        let (scripts, work) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
        let path = script(scripts.path(), "garbage.wast", "(module) stray");
        let report = run_script(&path, &config(work.path()));
        assert!(matches!(report.error, Some(RunError::ScriptParse(_))));
        assert_eq!(report.summary.modules, 0);
    }
}

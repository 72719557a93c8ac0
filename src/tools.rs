//! Command lines for the collaborator tools: the text-to-binary compiler,
//! the AOT compiler, the runtime under test and its emulator wrapper.

use crate::config::{Config, Emulator};
use crate::error::{CompileError, CompileStage, ConfigError};
use std::path::Path;
use std::process::Command;
use tracing::info;

/// AOT compiler flags per target architecture.
pub fn aot_target_flags(target: &str) -> &'static [&'static str] {
    match target {
        "i386" | "x86_32" => &["--target=i386"],
        "x86_64" => &["--target=x86_64", "--cpu=skylake", "--size-level=0"],
        "aarch64" => &["--target=aarch64", "--target-abi=eabi", "--cpu=cortex-a53"],
        "aarch64_vfp" => &["--target=aarch64", "--target-abi=gnueabihf", "--cpu=cortex-a53"],
        "armv7" => &["--target=armv7", "--target-abi=eabi", "--cpu=cortex-a9", "--cpu-features=-neon"],
        "armv7_vfp" => &["--target=armv7", "--target-abi=gnueabihf", "--cpu=cortex-a9"],
        "thumbv7" => &["--target=thumbv7", "--target-abi=eabi", "--cpu=cortex-a9", "--cpu-features=-neon,-vfpv3"],
        "thumbv7_vfp" => &["--target=thumbv7", "--target-abi=gnueabihf", "--cpu=cortex-a9", "--cpu-features=-neon"],
        "riscv32" => &["--target=riscv32", "--target-abi=ilp32", "--cpu=generic-rv32", "--cpu-features=+m,+a,+c"],
        "riscv32_ilp32f" => &[
            "--target=riscv32",
            "--target-abi=ilp32f",
            "--cpu=generic-rv32",
            "--cpu-features=+m,+a,+c,+f",
        ],
        "riscv32_ilp32d" => &[
            "--target=riscv32",
            "--target-abi=ilp32d",
            "--cpu=generic-rv32",
            "--cpu-features=+m,+a,+c,+f,+d",
        ],
        // medany code model, selected by size level 1
        "riscv64" => &[
            "--target=riscv64",
            "--target-abi=lp64",
            "--cpu=generic-rv64",
            "--cpu-features=+m,+a,+c",
            "--size-level=1",
        ],
        "riscv64_lp64f" => &[
            "--target=riscv64",
            "--target-abi=lp64f",
            "--cpu=generic-rv64",
            "--cpu-features=+m,+a,+c,+f",
            "--size-level=1",
        ],
        "riscv64_lp64d" => &[
            "--target=riscv64",
            "--target-abi=lp64d",
            "--cpu=generic-rv64",
            "--cpu-features=+m,+a,+c,+f,+d",
            "--size-level=1",
        ],
        "xtensa" => &["--target=xtensa"],
        _ => &[],
    }
}

/// Extra AOT compiler flags per target in XIP mode.
pub fn xip_flags(target: &str) -> &'static [&'static str] {
    match target {
        // no l32r relocations
        "xtensa" => &["--mllvm=-mtext-section-literals"],
        "riscv32_ilp32f" => &[
            "--enable-builtin-intrinsics=i64.common,f64.common,f32.const,f64.const,f64xi32,f64xi64,f64_promote_f32,f32_demote_f64",
        ],
        _ => &[],
    }
}

/// What the AOT compiler should emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AotOutput {
    Image,
    Object,
    Ir,
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

/// `wast2wasm` invocation for the configured feature set.
pub fn wast2wasm_command(config: &Config, source: &Path, output: &Path) -> Vec<String> {
    let f = &config.features;
    let flags: &[&str] = if f.gc {
        &["-u", "-d"]
    } else if f.eh {
        &["--enable-threads", "--no-check", "--enable-exceptions", "--enable-tail-call"]
    } else if f.memory64 {
        &["--enable-memory64", "--no-check"]
    } else if f.multi_memory {
        &["--enable-multi-memory", "--no-check"]
    } else if f.extended_const {
        &["--enable-extended-const", "--no-check"]
    } else {
        // multi-memory for one memory.wast case that needs no runtime support
        &["--enable-multi-memory", "--enable-threads", "--no-check"]
    };
    let mut cmd = vec![config.wast2wasm.clone()];
    cmd.extend(flags.iter().map(|s| s.to_string()));
    cmd.extend([path_arg(source), "-o".to_string(), path_arg(output)]);
    cmd
}

/// AOT compiler invocation.
pub fn aot_command(config: &Config, wasm: &Path, aot: &Path, output: AotOutput) -> Vec<String> {
    let f = &config.features;
    let mut cmd = vec![config.aot_compiler.clone()];
    let mut push = |flag: &str| cmd.push(flag.to_string());
    aot_target_flags(&config.target).iter().for_each(|s| push(*s));
    if f.sgx {
        push("-sgx");
    }
    if !f.simd {
        push("--disable-simd");
    }
    if f.xip {
        push("--xip");
        xip_flags(&config.target).iter().for_each(|s| push(*s));
    }
    if f.multi_thread {
        push("--enable-multi-thread");
    }
    if f.gc {
        push("--enable-gc");
        push("--enable-tail-call");
    }
    if f.extended_const {
        push("--enable-extended-const");
    }
    match output {
        AotOutput::Image => {}
        AotOutput::Object => push("--format=object"),
        AotOutput::Ir => push("--format=llvmir-opt"),
    }
    // LTO can turn tail calls into loops that never overflow the stack
    push("--disable-llvm-lto");
    // hardware bounds checks are unavailable under emulation and memory64
    if config.qemu.is_some() || f.memory64 {
        push("--bounds-checks=1");
    }
    cmd.extend(["-o".to_string(), path_arg(aot), path_arg(wasm)]);
    cmd
}

/// Runtime REPL invocation for `module`.
pub fn runtime_command(config: &Config, module: &Path) -> Vec<String> {
    let emulated = config.qemu.is_some();
    let mut cmd = vec![config.interpreter.clone(), "--heap-size=0".to_string(), "--repl".to_string()];
    if config.features.multi_module {
        let dir = if emulated {
            "/tmp".to_string()
        } else {
            path_arg(&config.work_dir)
        };
        cmd.push(format!("--module-path={dir}"));
    }
    let stack = if config.features.gc {
        // tail calls need a large interpreter stack
        10_485_760
    } else if config.aot {
        // AOT code does not use the interpreter stack; 0 would mean default
        1
    } else {
        131_072
    };
    cmd.push(format!("--stack-size={stack}"));
    if config.verbose {
        cmd.push("-v=5".to_string());
    }
    let module = match (emulated, module.file_name()) {
        (true, Some(name)) => format!("/tmp/{}", name.to_string_lossy()),
        _ => path_arg(module),
    };
    cmd.push(module);
    cmd
}

/// Emulator command line for the configured target family.
pub fn emulator_command(target: &str, emulator: &Emulator) -> Result<Vec<String>, ConfigError> {
    let firmware = path_arg(&emulator.firmware);
    if firmware.is_empty() {
        return Err(ConfigError::MissingFirmware);
    }
    let words = |s: &str| s.split_whitespace().map(str::to_string).collect::<Vec<_>>();
    let mut cmd = if target.starts_with("aarch64") {
        words(
            "qemu-system-aarch64 -cpu cortex-a53 -nographic -machine virt,virtualization=on,gic-version=3 \
             -net none -chardev stdio,id=con,mux=on -serial chardev:con -mon chardev=con,mode=readline -kernel",
        )
    } else if target.starts_with("thumbv7") {
        words("qemu-system-arm -semihosting -M sabrelite -m 1024 -smp 1 -nographic -kernel")
    } else if target.starts_with("riscv32") {
        words("qemu-system-riscv32 -semihosting -M virt,aclint=on -cpu rv32 -smp 1 -nographic -bios none -kernel")
    } else if target.starts_with("riscv64") {
        words("qemu-system-riscv64 -semihosting -M virt,aclint=on -cpu rv64 -smp 1 -nographic -bios none -kernel")
    } else if target.starts_with("xtensa") {
        let mut cmd = words("qemu-system-xtensa -semihosting -nographic -serial mon:stdio -machine esp32s3");
        cmd.push("-drive".to_string());
        cmd.push(format!("file={firmware},if=mtd,format=raw"));
        return Ok(cmd);
    } else {
        return Err(ConfigError::UnknownEmulatorTarget(target.to_string()));
    };
    cmd.push(firmware);
    Ok(cmd)
}

/// How to start the runtime under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launch {
    /// The process to spawn.
    pub command: Vec<String>,
    /// Under emulation: the runtime line typed into the emulator's shell
    /// once the host directory is mounted.
    pub guest_command: Option<String>,
}

/// Emulator shell prompt.
pub const GUEST_SHELL_PROMPT: &str = "nsh> ";

/// Shell line that mounts the work directory at `/tmp` in the guest.
pub fn guest_mount_command(config: &Config) -> String {
    format!("mount -t hostfs -o fs={} /tmp", path_arg(&config.work_dir))
}

pub fn runtime_launch(config: &Config, module: &Path) -> Result<Launch, ConfigError> {
    let runtime = runtime_command(config, module);
    match &config.qemu {
        None => Ok(Launch {
            command: runtime,
            guest_command: None,
        }),
        Some(emulator) => Ok(Launch {
            command: emulator_command(&config.target, emulator)?,
            guest_command: Some(runtime.join(" ")),
        }),
    }
}

/// Run a collaborator to completion, failing on a nonzero exit.
pub fn run_to_completion(stage: CompileStage, cmd: &[String]) -> Result<String, CompileError> {
    info!("Running: {}", cmd.join(" "));
    let Some((program, args)) = cmd.split_first() else {
        return Err(CompileError::new(stage, "empty command line", ""));
    };
    let out = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| CompileError::new(stage, format!("failed to run {program}: {e}"), ""))?;
    let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&out.stderr));
    if out.status.success() {
        Ok(text)
    } else {
        if !text.is_empty() {
            info!("{}", text.trim_end());
        }
        Err(CompileError::new(stage, out.status.to_string(), text))
    }
}

/// Compile a text module to binary.
pub fn compile_text(config: &Config, source: &Path, output: &Path) -> Result<(), CompileError> {
    info!("Compiling WASM to '{}'", output.display());
    run_to_completion(CompileStage::Text, &wast2wasm_command(config, source, output)).map(|_| ())
}

/// Compile a binary module to an AOT artifact without a session.
pub fn compile_aot(config: &Config, wasm: &Path, aot: &Path, output: AotOutput) -> Result<(), CompileError> {
    info!("Compiling '{}' to '{}'", wasm.display(), aot.display());
    run_to_completion(CompileStage::Aot, &aot_command(config, wasm, aot, output)).map(|_| ())
}

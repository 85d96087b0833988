//! CLI binary: argument parsing, logging init, file I/O, and (optionally)
//! invoking an external assembler/linker toolchain. Contains no lexing,
//! codegen or formatting logic of its own — `casm::compile` does all of
//! that; this binary only reads a file in, calls it, and writes a file out.

use casm::{Arch, CasmError, CompileConfig, ProjectConfig, Target};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the `.casm` source file.
    infile: String,

    /// Name of the output assembly file.
    #[arg(short = 'o', long = "out")]
    outfile: Option<String>,

    /// Target platform.
    #[arg(long, default_value = "windows")]
    target: String,

    /// Target architecture.
    #[arg(long, default_value = "x86_64")]
    arch: String,

    /// Bit width (only meaningful for x86_64).
    #[arg(long, default_value_t = 64)]
    bits: u8,

    /// Emit only the assembly file, skip assembling/linking.
    #[arg(short = 'a', long = "asm")]
    output_assembly: bool,

    /// Assemble and link the generated assembly into an executable.
    #[arg(long)]
    build: bool,

    /// Build and then run the produced executable.
    #[arg(long)]
    run: bool,

    /// Extra flags forwarded to the linker.
    #[arg(long, default_value = "")]
    ldflags: String,

    /// Emit richer debug info where the toolchain supports it.
    #[arg(long)]
    debug: bool,

    /// Verbose logging.
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn gen_file_names(args: &Args) -> (PathBuf, PathBuf) {
    let infile = PathBuf::from(&args.infile);
    let stem = infile
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "out".to_string());
    let dir = infile.parent().map(Path::to_path_buf).unwrap_or_default();

    let asmfile = if let Some(outfile) = &args.outfile {
        PathBuf::from(outfile)
    } else {
        dir.join(format!("{stem}.asm"))
    };

    (infile, asmfile)
}

fn load_config(args: &Args, project_dir: &Path) -> CompileConfig {
    let target: Target = args.target.parse().unwrap_or_default();
    let arch: Arch = args.arch.parse().unwrap_or_default();
    let mut config = CompileConfig {
        target,
        arch,
        bits: args.bits,
        verbose: args.verbose,
        stdlib_overrides: Default::default(),
    };

    let project_file = project_dir.join("casm.toml");
    if let Ok(project) = ProjectConfig::load(&project_file) {
        config = project.merge_into(config);
    }

    config
}

fn assemble_and_link(asm_file: &Path, config: &CompileConfig, ldflags: &str, debug: bool) -> Result<PathBuf, String> {
    let obj_ext = if config.target == Target::Windows { "obj" } else { "o" };
    let exe_ext = if config.target == Target::Windows { ".exe" } else { "" };
    let stem = asm_file.with_extension("");
    let obj_file = stem.with_extension(obj_ext);
    let exe_file = PathBuf::from(format!("{}{}", stem.display(), exe_ext));

    if config.arch == Arch::Arm64 {
        let mut cmd = Command::new("clang");
        cmd.args(["-c", &asm_file.to_string_lossy(), "-o", &obj_file.to_string_lossy(), "-arch", "arm64"]);
        if debug {
            cmd.arg("-g");
        }
        run_checked(&mut cmd, "clang assembly")?;
    } else {
        let fmt = match config.target {
            Target::Windows => "win64",
            Target::Linux => "elf64",
            Target::Macos => "macho64",
        };
        let mut cmd = Command::new("nasm");
        cmd.args(["-f", fmt]);
        if config.target == Target::Macos {
            cmd.args(["--prefix", "_"]);
        }
        cmd.arg("-Ox");
        cmd.args([&asm_file.to_string_lossy(), "-o", &obj_file.to_string_lossy()]);
        run_checked(&mut cmd, "nasm assembly")?;
    }

    let mut link_cmd = match config.target {
        Target::Windows => {
            let mut c = Command::new("gcc");
            c.args([&obj_file.to_string_lossy(), "-o", &exe_file.to_string_lossy(), "-m64"]);
            c
        }
        Target::Linux => {
            let mut c = Command::new("gcc");
            c.args([&obj_file.to_string_lossy(), "-o", &exe_file.to_string_lossy()]);
            c
        }
        Target::Macos => {
            let mut c = Command::new("clang");
            c.args([&obj_file.to_string_lossy(), "-o", &exe_file.to_string_lossy(), "-arch", &config.arch.to_string()]);
            c
        }
    };
    if !ldflags.is_empty() {
        link_cmd.args(ldflags.split_whitespace());
    }
    run_checked(&mut link_cmd, "linking")?;

    Ok(exe_file)
}

fn run_checked(cmd: &mut Command, step: &str) -> Result<(), String> {
    let output = cmd.output().map_err(|e| format!("{step} failed to start: {e}"))?;
    if !output.status.success() {
        return Err(format!(
            "{step} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    Ok(())
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Warn };
    pretty_env_logger::formatted_builder().filter_level(level).init();
    log::info!("casm starting up");
    log::debug!("args: {args:#?}");

    let (infile, asmfile) = gen_file_names(&args);
    let project_dir = infile.parent().unwrap_or_else(|| Path::new("."));
    let config = load_config(&args, project_dir);
    log::debug!("resolved config: {config:?}");

    let source = match std::fs::read_to_string(&infile) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error reading {}: {e}", infile.display());
            std::process::exit(1);
        }
    };
    log::debug!("read {} bytes from {}", source.len(), infile.display());

    let compiled = match casm::compile(&source, config.clone(), project_dir) {
        Ok(asm) => asm,
        Err(err) => {
            print_error(&err);
            std::process::exit(1);
        }
    };
    log::debug!("generated {} bytes of assembly", compiled.len());

    if let Err(e) = std::fs::write(&asmfile, &compiled) {
        eprintln!("error writing {}: {e}", asmfile.display());
        std::process::exit(1);
    }

    if args.output_assembly && !args.build && !args.run {
        return;
    }

    if args.build || args.run {
        match assemble_and_link(&asmfile, &config, &args.ldflags, args.debug) {
            Ok(exe) => {
                log::info!("built {}", exe.display());
                if args.run {
                    let status = Command::new(&exe).status();
                    match status {
                        Ok(s) if !s.success() => std::process::exit(s.code().unwrap_or(1)),
                        Err(e) => {
                            eprintln!("failed to run {}: {e}", exe.display());
                            std::process::exit(1);
                        }
                        _ => {}
                    }
                }
            }
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        }
    }
}

fn print_error(err: &CasmError) {
    eprintln!("{err}");
}

use anyhow::{Context, Result};
use clap::Parser;
use emu86_core::listing::{render_listing, render_registers, render_trace};
use emu86_core::logging::{LogConfig, LogLevel};
use emu86_core::{decode, Emulator};
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "emu86", about = "Decode and emulate raw 8086 machine code")]
struct Args {
    /// Raw binary containing the encoded instruction stream
    input: PathBuf,

    /// Print the decoded listing
    #[arg(long, default_value_t = false)]
    print: bool,

    /// Execute the decoded instructions and dump the registers
    #[arg(long, default_value_t = false)]
    exec: bool,

    /// Dump the final emulation state to this file as JSON (implies --exec)
    #[arg(long)]
    save: Option<PathBuf>,

    /// Core log level: off, error, warn, info, debug, trace (or 0-5)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Write core logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn configure_logging(args: &Args) -> Result<()> {
    let level = LogLevel::from_str(&args.log_level)
        .with_context(|| format!("invalid log level '{}'", args.log_level))?;
    let config = LogConfig::global();
    config.set_global_level(level);
    if let Some(path) = args.log_file.as_ref() {
        config
            .set_log_file(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    configure_logging(&args)?;

    let bytes = fs::read(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    log::info!("read {} bytes from {}", bytes.len(), args.input.display());

    let program = decode(&bytes).with_context(|| format!("failed to decode {}", args.input.display()))?;
    log::info!(
        "decoded {} instructions, {} labels",
        program.len(),
        program.labels().len()
    );

    if args.print {
        print!("{}", render_listing(&program));
    }

    if args.exec || args.save.is_some() {
        let mut emu = Emulator::new();
        let trace = emu.run(&program);
        log::info!("executed {}, skipped {}", trace.executed(), trace.skipped());

        if args.exec {
            print!("{}", render_trace(&program, &trace));
            println!("\n==========================================");
            println!("{}", render_registers(emu.registers()));
        }

        if let Some(path) = args.save.as_ref() {
            let state = emu.save_state();
            let mut f = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            write!(f, "{}", serde_json::to_string_pretty(&state)?)?;
        }
    }

    Ok(())
}

use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::info;

use rv32im_sim::error::SimError;
use rv32im_sim::hex;
use rv32im_sim::machine::{Machine, StepEvent};
use rv32im_sim::uart::Uart;

/// A trace-producing RV32IM + Zicsr machine-mode simulator.
///
/// Reads a hex-format memory image, executes it to completion (`ebreak`
/// or a double fault), and writes one line per retired instruction or
/// delivered trap to the trace output.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
struct Args {
    /// Path to the hex-format memory image.
    hex_image: PathBuf,

    /// Path the execution trace is written to.
    trace_output: PathBuf,

    /// Path read one byte at a time for UART input.
    terminal_input: PathBuf,

    /// Path written one byte at a time for UART output.
    terminal_output: PathBuf,
}

fn run(args: Args) -> Result<(), SimError> {
    let mut hex_file = File::open(&args.hex_image).map_err(|source| SimError::OpenHexImage {
        path: args.hex_image.clone(),
        source,
    })?;
    let mut hex_text = String::new();
    hex_file
        .read_to_string(&mut hex_text)
        .map_err(|source| SimError::ReadHexImage {
            path: args.hex_image.clone(),
            source,
        })?;
    let image = hex::parse(&hex_text);

    let mut trace = File::create(&args.trace_output).map_err(|source| SimError::OpenTrace {
        path: args.trace_output.clone(),
        source,
    })?;

    let terminal_in = File::open(&args.terminal_input).map_err(|source| SimError::OpenTerminalIn {
        path: args.terminal_input.clone(),
        source,
    })?;
    let terminal_out = File::create(&args.terminal_output).map_err(|source| SimError::OpenTerminalOut {
        path: args.terminal_output.clone(),
        source,
    })?;

    let uart = Uart::new(terminal_in, terminal_out);
    let mut machine = Machine::new(uart, image.entry_pc);
    machine.load_image(&image);

    info!("loaded hex image, entry pc=0x{:08x}", image.entry_pc);

    while !machine.halted {
        match machine.step() {
            StepEvent::Instruction(line) => writeln!(trace, "{line}").ok(),
            StepEvent::Trapped(line) => writeln!(trace, "{line}").ok(),
            StepEvent::FatalDoubleFault => {
                writeln!(trace, ">FATAL: Double fault detected. Halting simulation.").ok()
            }
        };
    }

    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

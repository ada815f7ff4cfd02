// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use argentum::serial::{default_line_reset, RealPortOpener};
use argentum::status::file_name;
use argentum::{Config, Connection, Error, PrintOutcome, PrinterController, PrinterOptions, Progress, TransferOutcome};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "argentum")]
#[command(about = "Drive an Argentum printer over its serial link", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long)]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "115200")]
    baud: u32,

    /// Wait for each block acknowledgment this long
    #[arg(long, value_name = "MS")]
    ack_timeout: Option<u64>,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    /// Trace every byte on the serial line
    #[arg(long)]
    log_serial: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show printer identity, firmware and supply voltage
    Info,
    /// Upload a file to the printer's card
    Send {
        file: PathBuf,
        /// Start printing while the file is still arriving
        #[arg(long)]
        online: bool,
    },
    /// Print a file and follow its progress
    Print {
        file: PathBuf,
        /// Upload the file first
        #[arg(long)]
        upload: bool,
    },
    /// Send one command line
    Raw {
        line: String,
        /// Collect the response for up to this many seconds
        #[arg(long, value_name = "SECS")]
        wait: Option<f64>,
        /// Stop collecting once this text shows up
        #[arg(long)]
        expect: Option<String>,
    },
    /// Home both axes
    Home,
    /// Relative move in steps
    Move {
        #[arg(long, allow_hyphen_values = true)]
        x: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        y: Option<f64>,
    },
    /// Show or change the EEPROM calibration
    Options {
        /// Horizontal offset, vertical offset and print overlap
        #[arg(long, num_args = 3, value_names = ["H", "V", "O"], allow_hyphen_values = true)]
        set: Option<Vec<i32>>,
    },
    /// Show the head position
    Position,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = argentum::init_logging(cli.debug, cli.log_serial) {
        eprintln!("Failed to set up logging: {}", e);
    }

    let mut config = Config { baud_rate: cli.baud, ..Config::default() };
    if let Some(ms) = cli.ack_timeout {
        config.transfer.ack_timeout = Duration::from_millis(ms);
    }

    println!("Opening serial port: {}", cli.port);
    let mut conn = Connection::new(Box::new(RealPortOpener::new(config.baud_rate)), default_line_reset(), config);
    if let Err(e) = conn.connect(Some(&cli.port)) {
        eprintln!("Failed to connect: {}", e);
        std::process::exit(1);
    }

    let mut printer = PrinterController::new(conn);
    if let Err(e) = run(&mut printer, cli.command) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(printer: &mut PrinterController, command: Commands) -> argentum::Result<()> {
    match command {
        Commands::Info => show_info(printer),
        Commands::Send { file, online } => {
            if upload(printer, &file, online)? == TransferOutcome::Completed {
                println!("\nFile sent successfully!");
            }
            Ok(())
        }
        Commands::Print { file, upload: first } => {
            if first && upload(printer, &file, false)? == TransferOutcome::Cancelled {
                return Ok(());
            }
            let name = file_name(&file)?;
            let outcome = printer.print_with_progress(&name, Some(&file), &mut show_progress)?;
            match outcome {
                PrintOutcome::Completed => println!("\nPrint complete."),
                PrintOutcome::Stopped => println!("\nPrinter stopped."),
                PrintOutcome::Cancelled => println!("\nPrint cancelled."),
            }
            Ok(())
        }
        Commands::Raw { line, wait, expect } => {
            let conn = printer.connection_mut();
            match wait {
                Some(secs) => {
                    let response = conn.command_wait(&line, Duration::from_secs_f64(secs), expect.as_deref())?;
                    for line in response.iter() {
                        println!("{}", line);
                    }
                }
                None => conn.command(&line)?,
            }
            Ok(())
        }
        Commands::Home => {
            printer.home(true)?;
            println!("Homed.");
            Ok(())
        }
        Commands::Move { x, y } => printer.move_axis(x, y, true),
        Commands::Options { set: Some(values) } => {
            let mut options = printer.options()?.unwrap_or_default();
            apply_offsets(&mut options, &values)?;
            printer.update_options(&options)?;
            printer.save_options()?;
            show_options(&options);
            Ok(())
        }
        Commands::Options { set: None } => {
            match printer.options()? {
                Some(options) => show_options(&options),
                None => println!("Printer didn't report its options."),
            }
            Ok(())
        }
        Commands::Position => {
            match printer.position()? {
                Some(pos) => println!(
                    "X: {:.2} mm ({} steps), Y: {:.2} mm ({} steps)",
                    pos.x_mm, pos.x_steps, pos.y_mm, pos.y_steps
                ),
                None => println!("Position unavailable."),
            }
            Ok(())
        }
    }
}

/// Fill in the `--set H V O` calibration values
fn apply_offsets(options: &mut PrinterOptions, values: &[i32]) -> argentum::Result<()> {
    let [h, v, o] = values[..] else {
        return Err(Error::InvalidArgument(format!("expected 3 values, got {}", values.len())));
    };
    let overlap = u32::try_from(o)
        .map_err(|_| Error::InvalidArgument(format!("print overlap can't be negative: {}", o)))?;
    options.horizontal_offset = h;
    options.vertical_offset = v;
    options.print_overlap = overlap;
    Ok(())
}

fn upload(printer: &mut PrinterController, file: &Path, online: bool) -> argentum::Result<TransferOutcome> {
    println!("\nSending file: {}", file.display());
    printer.send_file(file, online, &mut show_progress)
}

fn show_progress(pos: usize, total: usize) -> Progress {
    eprint!("\r{}/{}", pos, total);
    Progress::Continue
}

fn show_info(printer: &mut PrinterController) -> argentum::Result<()> {
    let conn = printer.connection_mut();
    for line in conn.boot_diagnostics() {
        println!("boot: {}", line);
    }
    println!("Printer number: {}", conn.printer_number().unwrap_or("unknown"));
    match conn.version() {
        Some(version) => println!("Firmware: {}", version),
        None => println!("Firmware: unknown"),
    }
    if let Some(volts) = conn.voltage()? {
        println!("Supply: {:.2} V", volts);
    }
    println!("Homed: {}", if conn.is_homed()? { "yes" } else { "no" });
    Ok(())
}

fn show_options(options: &PrinterOptions) {
    println!("horizontal_offset: {}", options.horizontal_offset);
    println!("vertical_offset: {}", options.vertical_offset);
    println!("print_overlap: {}", options.print_overlap);
    println!("dilate_count: {}", options.dilate_count);
    println!("x_speed: {}", options.x_speed);
    println!("y_speed: {}", options.y_speed);
    println!("x_acc: {}", options.x_acceleration);
    println!("y_acc: {}", options.y_acceleration);
}

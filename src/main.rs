//! `stmdfu`: program STM32 parts through their built-in USB DFU bootloader.
//!
//! Exit codes: 0 on success, -1 when a file cannot be opened or parsed, -2
//! when no device is attached, 1 for any other failure.

mod commands;

use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Parser};
use log::error;
use stmdfu::dfu::{DfuError, DfuResult};

/// Program STM32 microcontrollers through the USB DfuSe bootloader.
///
/// The chip must be running its system-memory bootloader, usually by
/// holding BOOT0 high during reset.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    /// JSON settings file (USB IDs, timeouts, retries).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// USB Vendor ID of the bootloader.
    #[arg(long, global = true, value_parser = parse_int::parse::<u16>)]
    vid: Option<u16>,
    /// USB Product ID of the bootloader.
    #[arg(long, global = true, value_parser = parse_int::parse::<u16>)]
    pid: Option<u16>,
    /// More output; repeat for request-level tracing.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    cmd: SubCmd,
}

#[derive(Debug, Parser)]
enum SubCmd {
    /// Erase and program every element of a DfuSe file.
    Flash {
        /// DfuSe file to program.
        file: PathBuf,
        /// Start the new firmware when done.
        #[arg(long)]
        leave: bool,
    },
    /// Read a block of memory into a file, or print it as a hex dump.
    Dump {
        /// Start address.
        #[arg(value_parser = parse_int::parse::<u32>)]
        address: u32,
        /// Number of bytes to read.
        #[arg(value_parser = parse_int::parse::<u32>)]
        size: u32,
        /// Output file for the raw bytes.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the option bytes.
    Optbytes,
    /// Erase the flash page containing an address.
    Erase {
        #[arg(value_parser = parse_int::parse::<u32>)]
        address: u32,
    },
    /// Erase the whole flash.
    Masserase,
    /// List the DfuSe commands the bootloader supports.
    Commands,
    /// Wrap a raw binary into a DfuSe file.
    Convert {
        /// Raw binary image.
        bin: PathBuf,
        /// DfuSe file to create.
        output: PathBuf,
        /// Load address of the image (defaults to the start of flash).
        #[arg(long, value_parser = parse_int::parse::<u32>)]
        address: Option<u32>,
        /// Target name stored in the file.
        #[arg(long)]
        name: Option<String>,
    },
    /// Show the layout of a DfuSe file.
    Info {
        file: PathBuf,
    },
    /// List attached bootloaders.
    List {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

/// Process exit status for a failed run.
fn exit_code(error: &DfuError) -> i32 {
    match error {
        DfuError::NoDeviceFound => -2,
        DfuError::Io(_) | DfuError::Json(_) => -1,
        e if e.is_malformed_container() => -1,
        _ => 1,
    }
}

fn run(cli: Cli) -> DfuResult<()> {
    let settings =
        commands::settings::load_settings(cli.config.as_deref(), cli.vid, cli.pid)?;

    match cli.cmd {
        SubCmd::Flash { file, leave } => commands::dfu::flash(&settings, &file, leave),
        SubCmd::Dump {
            address,
            size,
            output,
        } => commands::dfu::dump_memory(&settings, address, size, output.as_deref()),
        SubCmd::Optbytes => commands::dfu::option_bytes(&settings),
        SubCmd::Erase { address } => commands::dfu::erase(&settings, address),
        SubCmd::Masserase => commands::dfu::mass_erase(&settings),
        SubCmd::Commands => commands::dfu::list_commands(&settings),
        SubCmd::Convert {
            bin,
            output,
            address,
            name,
        } => commands::firmware::convert(&settings, &bin, &output, address, name.as_deref()),
        SubCmd::Info { file } => commands::firmware::info(&file),
        SubCmd::List { json } => commands::device::list_devices(&settings, json),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        error!("{} [{}]", e, e.error_code());
        process::exit(exit_code(&e));
    }
}

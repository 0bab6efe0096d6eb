use std::collections::HashMap;

use clap::Parser;
use color_eyre::Result;
use eyre::{WrapErr, bail, eyre};
use xpcu_io::{
    Backend, Cancel, Chain, ChainDevice, Hex,
    cables::{self, OpenOptions},
    devices::{DeviceInfo, IdCode},
    units::Bits,
};

use crate::cli_helpers::{HexData, UsbAddr};

mod cli_helpers;

/// Drive a JTAG chain through a Xilinx Platform Cable USB.
#[derive(clap::Parser)]
#[command(version)]
struct Args {
    #[command(flatten)]
    global: GlobalOpts,
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(clap::Args)]
struct GlobalOpts {
    /// Cable to open, see `xpcu cables`
    #[arg(long, default_value = "xpc", global = true)]
    cable: String,

    /// USB serial string, or hardware ID in hex, of the cable to open
    #[arg(long, global = true)]
    serial: Option<String>,

    /// Override the cable's USB address
    #[arg(long, global = true)]
    usb: Option<UsbAddr>,

    /// TCK frequency in Hz
    #[arg(long, global = true)]
    freq: Option<u32>,

    /// Debug logging, unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable the progress bar
    #[arg(long, global = true)]
    no_progress_bar: bool,
}

#[derive(clap::Subcommand)]
enum CliCommand {
    /// List known cables, and the ones attached
    Cables,
    /// Print the cable's identity
    Info,
    /// List the devices on the chain
    Detect,
    /// Print the IDCODE of one device
    Idcode(Select),
    /// Load an instruction, printing the captured IR
    ShiftIr(ShiftIr),
    /// Shift a data register, printing the captured DR
    ShiftDr(ShiftDr),
    /// Scan the chain repeatedly, counting scans that differ from the first
    Test(Test),
}

#[derive(Clone, Copy, clap::Args)]
struct Select {
    /// Device index, 0 is nearest TDO
    #[arg(short, long, default_value_t = 0)]
    device: usize,
}

#[derive(clap::Args)]
struct ShiftIr {
    #[command(flatten)]
    select: Select,
    /// Hex bytes, first byte shifted first
    instruction: HexData,
}

#[derive(clap::Args)]
struct ShiftDr {
    #[command(flatten)]
    select: Select,
    /// Instruction to load first
    #[arg(long)]
    ir: Option<HexData>,
    /// Bits to shift [default: all of DATA]
    #[arg(long)]
    bits: Option<usize>,
    /// Hex bytes, first byte shifted first
    data: HexData,
}

#[derive(clap::Args)]
struct Test {
    /// Scans to run [default: until Ctrl-C]
    #[arg(short = 'n', long)]
    iterations: Option<usize>,
}

fn main() -> Result<()> {
    let Args { global, command } = Args::parse();
    init_logging(global.verbose)?;

    // no cable
    if let CliCommand::Cables = command {
        return list_cables();
    }

    // first Ctrl-C asks chain operations to stop, a second one exits
    let cancel = Cancel::new();
    signal_hook::flag::register_conditional_shutdown(signal_hook::consts::SIGINT, 130, cancel.flag())?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, cancel.flag())?;

    let cable = cables::find(&global.cable)
        .ok_or_else(|| eyre!("unknown cable {:?}, see `xpcu cables`", global.cable))?;
    let opts = OpenOptions {
        serial: global.serial.clone(),
        usb: global.usb.map(Into::into),
        frequency: global.freq,
        ..Default::default()
    };
    tracing::debug!(cable = cable.name, ?opts, "opening cable");
    let backend = cable
        .open(&opts)
        .wrap_err_with(|| format!("failed to open cable {}", cable.name))?;

    let mut chain = Chain::new(backend);
    let r = run(command, &mut chain, &global, &cancel);
    let closed = chain.backend().close();
    r?;
    closed?;
    Ok(())
}

fn run(
    command: CliCommand,
    chain: &mut Chain<Box<dyn Backend>>,
    global: &GlobalOpts,
    cancel: &Cancel,
) -> Result<()> {
    let devices = get_devices();
    match command {
        // no cable, handled earlier
        CliCommand::Cables => unreachable!(),

        CliCommand::Info => match chain.backend().identity() {
            Some(identity) => println!("{identity}"),
            None => println!("cable cannot identify itself"),
        },
        CliCommand::Detect => {
            let found = chain.detect(&devices, cancel)?;
            if found.is_empty() {
                println!("no devices found");
            }
            for (i, device) in found.iter().enumerate() {
                print_device(i, device);
            }
        }
        CliCommand::Idcode(select) => {
            detect_and_select(chain, &devices, cancel, select)?;
            let idcode = chain
                .idcode()
                .ok_or_else(|| eyre!("device {} came up in BYPASS, no IDCODE", select.device))?;
            println!("{}  {}", Hex(idcode), chain.description());
        }
        CliCommand::ShiftIr(args) => {
            detect_and_select(chain, &devices, cancel, args.select)?;
            let out = chain.shift_ir(&args.instruction.0)?;
            println!("{}", hex::encode_upper(out));
        }
        CliCommand::ShiftDr(args) => {
            detect_and_select(chain, &devices, cancel, args.select)?;
            if let Some(ir) = &args.ir {
                chain.shift_ir(&ir.0)?;
            }
            let bits = Bits(args.bits.unwrap_or(8 * args.data.0.len()));
            let out = chain.shift_dr(&args.data.0, bits)?;
            println!("{}", hex::encode_upper(out));
        }
        CliCommand::Test(args) => {
            test(chain, &devices, cancel, args.iterations, global.no_progress_bar)?;
        }
    }
    Ok(())
}

fn get_devices() -> HashMap<IdCode, DeviceInfo> {
    xpcu_io::devices::builtin().collect()
}

fn detect_and_select<B: Backend>(
    chain: &mut Chain<B>,
    devices: &HashMap<IdCode, DeviceInfo>,
    cancel: &Cancel,
    select: Select,
) -> Result<()> {
    chain.detect(devices, cancel)?;
    chain.select(select.device)?;
    Ok(())
}

fn print_device(i: usize, device: &ChainDevice) {
    let idcode = match device.idcode {
        Some(idcode) => Hex(idcode).to_string(),
        None => "--------".to_owned(),
    };
    let irlen = match &device.info {
        Some(info) => info.irlen.0.to_string(),
        None => "?".to_owned(),
    };
    println!("{i:>3}: {idcode}  ir {irlen:>2}  {}", device.name());
}

fn list_cables() -> Result<()> {
    println!("known cables:");
    for cable in cables::KNOWN {
        let addr = UsbAddr {
            vid: cable.vid,
            pid: cable.pid,
        };
        println!("  {:<14} {addr}", cable.name);
    }

    let attached = cables::attached()?;
    if attached.is_empty() {
        println!("no cables attached");
        return Ok(());
    }
    println!("attached:");
    for found in attached {
        println!(
            "  {:<14} serial {} ({})",
            found.cable.name,
            found.serial.as_deref().unwrap_or("-"),
            found.product.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

fn test<B: Backend>(
    chain: &mut Chain<B>,
    devices: &HashMap<IdCode, DeviceInfo>,
    cancel: &Cancel,
    iterations: Option<usize>,
    no_progress_bar: bool,
) -> Result<()> {
    let pb = match no_progress_bar {
        true => None,
        false => Some(setup_progress_bar(iterations)?),
    };
    let report = chain.test(devices, iterations, cancel, |n| {
        if let Some(pb) = &pb {
            pb.set_position(n as u64);
        }
    })?;
    if let Some(pb) = pb {
        pb.finish();
    }

    println!("{} scans, {} mismatches", report.runs, report.mismatches);
    if report.mismatches > 0 {
        bail!("chain changed in {} of {} scans", report.mismatches, report.runs);
    }
    Ok(())
}

fn setup_progress_bar(len: Option<usize>) -> Result<indicatif::ProgressBar> {
    let (template, pb) = match len {
        Some(len) => (
            "{spinner:.green} {elapsed:>3}/{duration:>3} {bar} {pos}/{len} ({per_sec})",
            indicatif::ProgressBar::new(len as u64),
        ),
        None => (
            "{spinner:.green} {elapsed:>3} {pos} scans ({per_sec})",
            indicatif::ProgressBar::no_length(),
        ),
    };
    let style = indicatif::ProgressStyle::with_template(template)?;
    let pb = pb
        .with_finish(indicatif::ProgressFinish::Abandon)
        .with_style(style);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    Ok(pb)
}

fn init_logging(verbose: bool) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        true => EnvFilter::new("debug"),
        false => EnvFilter::new("warn"),
    });
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .with(tracing_error::ErrorLayer::default())
        .init();
    color_eyre::install()?;
    Ok(())
}

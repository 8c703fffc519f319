use std::io::{Read, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::thread;

use clap::{Args, Parser, Subcommand, ValueEnum};
use rvbox_core::bus::{AccessPolicy, Bus, HostLink, Peripherals};
use rvbox_core::config::{GDB_PORT, POLL_INTERVAL, RAM_SIZE, RUNNING_POLL_WAIT};
use rvbox_core::controller::Origin;
use rvbox_core::emulator::Emulator;
use rvbox_core::gdb::GdbServer;
use rvbox_core::machine::{Machine, MachineConfig};
use rvbox_core::{Error, InsnSet, Result};
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "rvbox", version = "0.1.0",
    about = "RV32IM home-computer core with a gdb remote server", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Log level
    #[arg(long, value_enum, default_value = "warn", global = true)]
    log: LogLevel,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run an ELF32 or raw boot image
    Run(RunArgs),
    /// Disassemble an image
    Disasm(DisasmArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the image
    path: PathBuf,
    /// Main store size in KiB
    #[arg(long, default_value_t = RAM_SIZE / 1024)]
    ram_kib: u32,
    /// Serve gdb on localhost, on PORT or the default port
    #[arg(long, value_name = "PORT", num_args = 0..=1)]
    gdb: Option<Option<u16>>,
    /// Start halted (waits for a debugger)
    #[arg(long)]
    halted: bool,
    /// Breakpoint address; may be repeated
    #[arg(long = "break", value_name = "ADDR", value_parser = parse_addr)]
    breakpoints: Vec<u32>,
    /// Stop after this many instructions
    #[arg(long)]
    max_insns: Option<u64>,
    /// How accesses straddling a word boundary are handled
    #[arg(long, value_enum)]
    unaligned: Option<Unaligned>,
    /// Instruction sets, comma separated (i,m,zicsr,zifencei)
    #[arg(long, value_delimiter = ',', value_parser = parse_isa)]
    isa: Vec<InsnSet>,
}

#[derive(Args, Debug)]
pub struct DisasmArgs {
    /// Path to the image
    path: PathBuf,
    /// First address; defaults to the entry point
    #[arg(long, value_parser = parse_addr)]
    base: Option<u32>,
    /// Number of instructions
    #[arg(long, default_value_t = 32)]
    count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Unaligned {
    Split,
    Force,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

fn parse_addr(s: &str) -> std::result::Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid address '{}': {}", s, e))
}

fn parse_isa(s: &str) -> std::result::Result<InsnSet, String> {
    InsnSet::from_str(s).ok_or_else(|| format!("unknown instruction set '{}'", s))
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| Error::IoError(e, path.display().to_string()))
}

/// Feeds our stdin to the guest's host-link receive queue.
fn forward_stdin(hostlink: HostLink) {
    thread::spawn(move || {
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; 256];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => hostlink.send(&buf[..n]),
                Err(e) => {
                    warn!("stdin: {}", e);
                    break;
                }
            }
        }
    });
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::from(cli.log))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => cmd_run(args),
        Commands::Disasm(args) => cmd_disasm(args),
    }
}

fn cmd_run(args: RunArgs) -> Result<()> {
    let image = read_image(&args.path)?;

    let mut config = MachineConfig::default();
    config.bus.ram_size = args.ram_kib.checked_mul(1024).ok_or_else(|| Error::Other("RAM size too large".into()))?;
    if !args.isa.is_empty() {
        config.isa.clear();
        for set in args.isa {
            if !config.isa.contains(&set) {
                config.isa.push(set);
            }
        }
        if !config.isa.contains(&InsnSet::I) {
            warn!("base integer set not enabled; most programs will trap");
        }
    }
    if let Some(unaligned) = args.unaligned {
        config.bus.policy = match unaligned {
            Unaligned::Split => AccessPolicy::Split,
            Unaligned::Force => AccessPolicy::ForceAligned,
        };
    }

    let peripherals = Peripherals::default();
    let hostlink = peripherals.hostlink.clone();
    forward_stdin(hostlink.clone());
    let emu = Emulator::new(&config, peripherals)?;
    emu.load_image(&image)?;
    {
        let mut machine = emu.lock();
        for &addr in &args.breakpoints {
            machine.ctrl.add_breakpoint(addr, Some(format!("--break {:#x}", addr)), Origin::Local)?;
        }
    }

    let debugging = args.gdb.is_some();
    if let Some(port) = args.gdb {
        let addr = SocketAddr::from(([127, 0, 0, 1], port.unwrap_or(GDB_PORT)));
        let mut server = GdbServer::bind(addr, emu.clone())?;
        thread::spawn(move || server.serve());
    }
    if !args.halted {
        emu.go();
    }

    let mut stdout = std::io::stdout();
    let mut total: u64 = 0;
    loop {
        let budget = match args.max_insns {
            Some(max) if total >= max => break,
            Some(max) => (max - total).min(POLL_INTERVAL as u64) as usize,
            None => POLL_INTERVAL,
        };
        let outcome = emu.run(budget);
        total += outcome.retired as u64;

        let output = hostlink.take_output();
        if !output.is_empty() {
            stdout.write_all(&output)?;
            stdout.flush()?;
        }

        if let Some(pc) = outcome.breakpoint {
            let machine = emu.lock();
            let text = machine.disassemble_at(pc).unwrap_or_default();
            info!("breakpoint at {:#010x}: {}", pc, text);
            if !debugging {
                eprintln!("[rvbox] breakpoint at {:#010x}: {}", pc, text);
                break;
            }
        }
        if !emu.is_running() && outcome.retired == 0 {
            if !debugging {
                break;
            }
            // Halted under the debugger: wait for it to resume us.
            thread::sleep(RUNNING_POLL_WAIT);
        }
    }

    let machine = emu.lock();
    if args.max_insns.is_some_and(|max| total >= max) {
        warn!("instruction limit reached");
    }
    eprintln!(
        "[rvbox] {} instructions retired, pc = {:#010x}, a0 = {:#010x}",
        total,
        machine.pc(),
        machine.hart.state.reg(10)
    );
    Ok(())
}

fn cmd_disasm(args: DisasmArgs) -> Result<()> {
    let image = read_image(&args.path)?;
    let mut machine = Machine::new(&MachineConfig::default(), Peripherals::default())?;
    let entry = machine.load_image(&image)?;
    let base = args.base.unwrap_or(entry) & !3;

    for i in 0..args.count {
        let addr = base.wrapping_add(i * 4);
        match (machine.bus.peek(addr), machine.disassemble_at(addr)) {
            (Some(raw), Some(text)) => println!("{:08x}:  {:08x}  {}", addr, raw, text),
            _ => {
                println!("{:08x}:  <unmapped>", addr);
                break;
            }
        }
    }
    Ok(())
}

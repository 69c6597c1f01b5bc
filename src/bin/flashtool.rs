//! Flashrom Tool
//!
//! Inspect and maintain a flashrom dump file

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use flashrom_rs::{
    ActionOutcome, Buttons, Config, Flashrom, IdMatching, MappedFlash, Menu,
    MenuAction, MenuState, PartitionId, PartitionTable, RemovalRequest, SerialNumbers,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "flashtool")]
#[command(about = "Inspect and maintain a Dreamcast flashrom dump")]
struct Args {
    /// Path to the flashrom dump (128KB)
    #[arg(short = 'f', long, default_value = "dc_flash.bin")]
    flash: PathBuf,

    /// TOML configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Print JSON instead of text (info, keys)
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show partition layout and bitmap state
    Info,

    /// Show the serial numbers stored in the key block
    Keys,

    /// Remove blocks by block-type identifier and compact the partition
    Purge {
        #[arg(short, long, value_parser = parse_partition)]
        partition: PartitionId,

        /// Block-type identifier (decimal or 0x-prefixed hex), repeatable
        #[arg(short = 'i', long = "id", value_parser = parse_block_id, required = true)]
        ids: Vec<u16>,

        /// Match on the low byte of the stored identifier only
        #[arg(long)]
        low_byte: bool,

        /// Report what would be removed without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Remove every copy of the key block
    EraseKeys,

    /// Format one partition
    Erase {
        #[arg(short, long, value_parser = parse_partition)]
        partition: PartitionId,
    },

    /// Format the settings and block 1 partitions
    EraseAll,

    /// Hex dump a partition
    Dump {
        #[arg(short, long, value_parser = parse_partition)]
        partition: PartitionId,
    },

    /// Drive the interactive menu with button names read from stdin
    /// (one sample per line, e.g. "y", "a+b", "start")
    Menu,
}

/// Parse partition name from CLI string
fn parse_partition(s: &str) -> Result<PartitionId, String> {
    match s.to_lowercase().as_str() {
        "system" | "0" => Ok(PartitionId::System),
        "reserved" | "1" => Ok(PartitionId::Reserved),
        "block1" | "b1" | "2" => Ok(PartitionId::Block1),
        "settings" | "3" => Ok(PartitionId::Settings),
        "block2" | "b2" | "4" => Ok(PartitionId::Block2),
        _ => Err(format!(
            "Invalid partition '{}'. Valid options: system, reserved, block1, settings, block2",
            s
        )),
    }
}

/// Parse a block-type identifier (decimal or 0x hex)
fn parse_block_id(s: &str) -> Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse::<u16>(),
    };
    parsed.map_err(|e| format!("Invalid block id '{}': {}", s, e))
}

/// Parse one line of menu input ("a+b", "start", ...)
fn parse_buttons(line: &str) -> Result<Buttons, String> {
    let mut buttons = Buttons::empty();
    for name in line.split(['+', ' ', ',']).filter(|n| !n.is_empty()) {
        let button = Buttons::from_name(&name.to_uppercase())
            .ok_or_else(|| format!("Unknown button '{}'", name))?;
        buttons |= button;
    }
    Ok(buttons)
}

/// Print bytes 16 per line: offset, hex, ASCII
fn hexdump<W: Write>(out: &mut W, bytes: &[u8]) -> io::Result<()> {
    for (line, chunk) in bytes.chunks(16).enumerate() {
        write!(out, "{:08x}: ", line * 16)?;
        for i in 0..16 {
            match chunk.get(i) {
                Some(b) => write!(out, "{:02x} ", b)?,
                None => write!(out, "   ")?,
            }
        }
        let ascii: String = chunk
            .iter()
            .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
            .collect();
        writeln!(out, " {}", ascii)?;
    }
    Ok(())
}

fn print_serials(serials: &SerialNumbers) {
    match serials.v1() {
        Some(v1) => println!("v1 serial number: {:X}", v1),
        None => println!("No v1 serial number found"),
    }
    match serials.v2() {
        Some(v2) => println!("v2 serial number: {:X}", v2),
        None => println!("No v2 serial number found"),
    }
}

fn dump_partition(flash: &Flashrom<MappedFlash>, partition: PartitionId) -> anyhow::Result<()> {
    let image = flash.read_partition(partition)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "-----------------------------")?;
    writeln!(out, "Partition: {}", partition)?;
    writeln!(out, "Size: {} bytes", image.len())?;
    writeln!(out, "-----------------------------")?;
    hexdump(&mut out, image.as_bytes())?;
    Ok(())
}

fn run_menu_action(flash: &mut Flashrom<MappedFlash>, action: MenuAction) -> ActionOutcome {
    let result = match action {
        MenuAction::ShowSerialNumbers => flash.serial_numbers().map(|serials| {
            print_serials(&serials);
            ActionOutcome::Done
        }),
        MenuAction::EraseSerialNumbers => flash.erase_serial_numbers().map(|removed| {
            if removed == 0 {
                println!("No serial numbers found.");
                ActionOutcome::NothingFound
            } else {
                println!("Serial numbers erased successfully");
                ActionOutcome::Done
            }
        }),
        MenuAction::EraseFlashrom => flash.erase_flashrom().map(|()| {
            println!("Flashrom erased successfully");
            ActionOutcome::Done
        }),
        MenuAction::DumpFlashrom => {
            let stdout = io::stdout();
            let written = hexdump(&mut stdout.lock(), flash.device().as_bytes());
            return match written {
                Ok(()) => ActionOutcome::Done,
                Err(_) => ActionOutcome::Failed,
            };
        }
        MenuAction::DumpPartition(partition) => {
            return match dump_partition(flash, partition) {
                Ok(()) => ActionOutcome::Done,
                Err(e) => {
                    println!("Error reading partition: {}", e);
                    ActionOutcome::Failed
                }
            };
        }
        MenuAction::Exit => return ActionOutcome::Done,
    };

    match result {
        Ok(outcome) => outcome,
        Err(e) => {
            println!("Error: {}", e);
            ActionOutcome::Failed
        }
    }
}

fn run_menu(flash: &mut Flashrom<MappedFlash>) -> anyhow::Result<()> {
    let mut menu = Menu::new();
    println!("This program writes to the flashrom, which can only be rewritten a limited number of times.");
    println!("Press Y to continue or B to exit.");

    for line in io::stdin().lock().lines() {
        let buttons = match parse_buttons(&line?) {
            Ok(b) => b,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };

        if let Some(action) = menu.press(buttons) {
            let outcome = run_menu_action(flash, action);
            menu.complete(outcome);
        }

        match menu.state() {
            MenuState::Main => println!("A: serial numbers  B: erase serial numbers  X: erase flashrom  START: exit"),
            MenuState::ConfirmEraseSerials | MenuState::ConfirmEraseFlash => {
                println!("Press A+B to confirm, START to cancel. This cannot be undone!")
            }
            MenuState::Debug => println!("A: dump flashrom  B: dump block1  X: dump settings  START: return"),
            MenuState::Rebooting => println!("The console must now be rebooted."),
            _ => {}
        }

        if menu.is_finished() {
            break;
        }
    }

    flash.device().flush()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading configuration from {:?}", path))?,
        None => Config::default(),
    };

    if let Command::Purge {
        low_byte, dry_run, ..
    } = &args.command
    {
        if *low_byte {
            config.id_matching = IdMatching::LowByte;
        }
        config.dry_run |= *dry_run;
    }

    info!("Flash dump: {:?}", args.flash);
    let device = MappedFlash::open(&args.flash, PartitionTable::dreamcast())
        .with_context(|| format!("opening flash dump {:?}", args.flash))?;
    let mut flash = Flashrom::with_config(device, config);

    match args.command {
        Command::Info => {
            let mut summaries = Vec::new();
            for partition in PartitionId::ALL {
                summaries.push(flash.summary(partition)?);
            }

            if args.json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else {
                for s in &summaries {
                    println!(
                        "{:<9} offset {:#07x} length {:#07x} {} live blocks {}{}",
                        s.partition.to_string(),
                        s.offset,
                        s.len,
                        if s.formatted { "formatted" } else { "NO HEADER" },
                        s.live_blocks,
                        if s.contiguous { "" } else { " (bitmap has gaps)" }
                    );
                }
            }
        }
        Command::Keys => {
            let serials = flash.serial_numbers().context("no serial numbers found")?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&serials)?);
            } else {
                print_serials(&serials);
            }
        }
        Command::Purge { partition, ids, .. } => {
            let request = RemovalRequest::new(ids);
            let removed = flash.purge_blocks(partition, &request)?;
            println!("Removed {} blocks from {}", removed, partition);
        }
        Command::EraseKeys => {
            let removed = flash.erase_serial_numbers()?;
            if removed == 0 {
                println!("No serial numbers found.");
            } else {
                println!("Serial numbers erased successfully ({} blocks)", removed);
            }
        }
        Command::Erase { partition } => {
            if !partition.is_rewritable() {
                bail!("partition {} cannot be erased", partition);
            }
            flash.erase_partition(partition)?;
            println!("Partition {} erased", partition);
        }
        Command::EraseAll => {
            flash.erase_flashrom()?;
            println!("Flashrom erased successfully");
        }
        Command::Dump { partition } => dump_partition(&flash, partition)?,
        Command::Menu => run_menu(&mut flash)?,
    }

    flash.device().flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_block_id() {
        assert_eq!(parse_block_id("7"), Ok(7));
        assert_eq!(parse_block_id("0x0107"), Ok(0x0107));
        assert!(parse_block_id("0x10000").is_err());
        assert!(parse_block_id("seven").is_err());
    }

    #[test]
    fn test_parse_partition() {
        assert_eq!(parse_partition("Block1"), Ok(PartitionId::Block1));
        assert_eq!(parse_partition("3"), Ok(PartitionId::Settings));
        assert!(parse_partition("block3").is_err());
    }

    #[test]
    fn test_parse_buttons() {
        assert_eq!(parse_buttons("a+b"), Ok(Buttons::A | Buttons::B));
        assert_eq!(parse_buttons("start"), Ok(Buttons::START));
        assert_eq!(parse_buttons(""), Ok(Buttons::empty()));
        assert!(parse_buttons("turbo").is_err());
    }

    #[test]
    fn test_hexdump_format() {
        let mut out = Vec::new();
        hexdump(&mut out, b"KATANA_FLASH____\x02\x00").unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("00000000: 4b 41 54 41"));
        assert!(lines[0].ends_with("KATANA_FLASH____"));
        assert!(lines[1].starts_with("00000010: 02 00"));
    }
}

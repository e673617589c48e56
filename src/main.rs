use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use k150::{
    ChipDB, ChipProfile, FirmwareImage, Flashing, ProtocolVariant, transport::SerialTransport,
};

#[derive(Parser)]
#[command(
    name = "k150",
    version,
    about = "Command-line driver for K150 serial PIC programmers (P018 firmware)"
)]
struct Cli {
    /// Serial port the programmer is attached to
    #[arg(short, long, global = true, default_value = default_port())]
    port: String,

    #[arg(short, long, global = true, default_value_t = k150::transport::DEFAULT_BAUDRATE)]
    baud: u32,

    /// Target chip, e.g. 16F628A
    #[arg(short, long, global = true, default_value = "16F628A")]
    chip: String,

    /// Chip database replacing the built-in one
    #[arg(long, global = true)]
    chipdb: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = ProtocolVariant::P018)]
    protocol: ProtocolVariant,

    /// Program in-circuit (ICSP) instead of in the ZIF socket
    #[arg(long, global = true)]
    icsp: bool,

    /// Verbose output, repeat for wire traces
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show programmer and chip information
    Info,
    /// Check whether a chip sits in the socket
    Detect,
    /// Erase the chip
    Erase,
    /// Check that ROM and EEPROM are erased
    BlankCheck,
    /// Program raw binary images into the chip
    Flash {
        /// ROM image, raw binary
        rom: PathBuf,
        /// EEPROM image, raw binary
        #[arg(long)]
        eeprom: Option<PathBuf>,
        /// ID bytes as hex, e.g. 01020304
        #[arg(long)]
        id: Option<String>,
        /// Fuse word as hex, repeat for every word
        #[arg(long = "fuse")]
        fuses: Vec<String>,
        /// Do not erase before programming
        #[arg(long)]
        no_erase: bool,
        /// Do not read back after programming
        #[arg(long)]
        no_verify: bool,
    },
    /// Compare chip contents with raw binary images
    Verify {
        rom: PathBuf,
        #[arg(long)]
        eeprom: Option<PathBuf>,
    },
    /// Read chip memories
    Read {
        /// Write ROM contents to this file instead of dumping them
        #[arg(long)]
        rom: Option<PathBuf>,
        /// Write EEPROM contents to this file instead of dumping them
        #[arg(long)]
        eeprom: Option<PathBuf>,
    },
    /// Read the chip configuration block
    Config,
    /// List chips in the database
    Chips,
}

const fn default_port() -> &'static str {
    if cfg!(windows) { "COM1" } else { "/dev/ttyUSB0" }
}

fn load_db(path: Option<&Path>) -> Result<ChipDB> {
    match path {
        Some(p) => ChipDB::load_from_path(p),
        None => ChipDB::load(),
    }
}

fn parse_hex_word(s: &str) -> Result<u16> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(digits, 16).with_context(|| format!("invalid fuse word {:?}", s))
}

fn read_image(chip: &ChipProfile, rom: &Path, eeprom: Option<&Path>) -> Result<FirmwareImage> {
    let mut image = FirmwareImage::blank_for(chip);
    image.rom = std::fs::read(rom).with_context(|| format!("reading {}", rom.display()))?;
    image.pad_rom();
    if let Some(p) = eeprom {
        image.eeprom = std::fs::read(p).with_context(|| format!("reading {}", p.display()))?;
    }
    log::info!(
        "Firmware size: ROM {} bytes, EEPROM {} bytes",
        image.rom.len(),
        image.eeprom.len()
    );
    Ok(image)
}

fn hexdump(title: &str, data: &[u8]) -> Result<()> {
    let mut out = Vec::new();
    hxdmp::hexdump(data, &mut out)?;
    println!("{} ({} bytes):", title, data.len());
    println!("{}", String::from_utf8_lossy(&out));
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let _ = simplelog::TermLogger::init(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let db = load_db(cli.chipdb.as_deref())?;
    if let Commands::Chips = cli.command {
        for family in db.families() {
            println!("{}: {}", family.name, family.description);
            for chip in &family.variants {
                println!(
                    "  PIC{:<10} {:?}  ROM {:#06x}  EEPROM {:#05x}",
                    chip.name, chip.core_type, chip.rom_size, chip.eeprom_size
                );
            }
        }
        return Ok(());
    }

    let chip = db.find_chip(&cli.chip)?;
    if let Some(pin1) = chip.pin1_location() {
        log::info!("Place PIC{} with pin 1 at {}", chip.name, pin1);
    }
    let profile = chip.profile(cli.icsp);

    let transport = SerialTransport::open_with_baudrate(&cli.port, cli.baud)
        .with_context(|| format!("opening {}", cli.port))?;
    let mut flashing = Flashing::new(transport, cli.protocol, profile)?;

    match cli.command {
        Commands::Info => {
            flashing.dump_info()?;
        }
        Commands::Detect => {
            let status = flashing.detect()?;
            log::info!("Chip in socket: {}", status.in_socket);
            log::info!("Socket empty: {}", status.out_of_socket);
        }
        Commands::Erase => {
            flashing.erase()?;
        }
        Commands::BlankCheck => {
            if flashing.blank_check()? {
                log::info!("Chip is blank");
            } else {
                log::warn!("Chip is not blank");
            }
        }
        Commands::Flash {
            rom,
            eeprom,
            id,
            fuses,
            no_erase,
            no_verify,
        } => {
            let mut image = read_image(flashing.chip(), &rom, eeprom.as_deref())?;
            if let Some(id) = id {
                image.id = hex::decode(&id).with_context(|| format!("invalid ID {:?}", id))?;
            }
            if !fuses.is_empty() {
                image.fuses = fuses
                    .iter()
                    .map(|f| parse_hex_word(f))
                    .collect::<Result<_>>()?;
            }
            flashing.program(&image, !no_erase)?;
            if !no_verify {
                flashing.verify(&image)?;
            }
        }
        Commands::Verify { rom, eeprom } => {
            let image = read_image(flashing.chip(), &rom, eeprom.as_deref())?;
            flashing.verify(&image)?;
            log::info!("Verified!");
        }
        Commands::Read { rom, eeprom } => {
            let contents = flashing.read_all()?;
            if contents.rom.is_short() {
                log::warn!(
                    "ROM read ended early: {} of {} bytes",
                    contents.rom.len(),
                    contents.rom.expected()
                );
            }
            match rom {
                Some(p) => std::fs::write(&p, contents.rom.bytes())?,
                None => hexdump("ROM", contents.rom.bytes())?,
            }
            if let Some(dump) = &contents.eeprom {
                match eeprom {
                    Some(p) => std::fs::write(&p, dump.bytes())?,
                    None => hexdump("EEPROM", dump.bytes())?,
                }
            }
            hexdump("Config", contents.config.bytes())?;
        }
        Commands::Config => {
            let config = flashing.read_config()?;
            println!("{}", config);
        }
        // listed before the programmer was opened
        Commands::Chips => {}
    }

    Ok(())
}

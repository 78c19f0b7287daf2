// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
use anyhow::{bail, Context, Result};
use cheshire_flash::config::{
    regs, Addressing, BootTargetMode, FlashArgs, FlashConfig, TransferRequest,
};
use cheshire_flash::error::Direction;
use cheshire_flash::gpt::PartitionSelector;
use clap::Parser;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use zerocopy::AsBytes;

const TARGET: &str = "riscv64imac-unknown-none-elf";
const BOARDS: &[&str] = &["genesys2", "vcu128", "sim"];

#[derive(Debug, Parser)]
enum Xtask {
    /// Builds the flasher for a board and converts it to a raw binary that can
    /// be loaded with the debugger
    Build {
        #[clap(long)]
        board: String,
        /// Where to put the binary; defaults to target/flasher-<board>.bin
        #[clap(long)]
        out: Option<PathBuf>,
        #[clap(long, default_value = "rust-objcopy")]
        objcopy: String,
        /// Build with Debug level diagnostics
        #[clap(long)]
        verbose: bool,
    },
    /// Prints the OpenOCD commands that hand a request to the flasher through
    /// the scratch registers
    Args {
        /// Boot target: 1 SD card, 2 NOR flash, 3 EEPROM
        #[clap(long)]
        mode: u32,
        /// Sectors to transfer
        #[clap(long)]
        length: u64,
        /// First sector, on the device or within the partition
        #[clap(long, default_value_t = 0)]
        offset: u64,
        /// Address of the image in memory
        #[clap(long, value_parser = parse_address)]
        image_base: u64,
        /// Copy the device into memory instead of the other way round
        #[clap(long)]
        read: bool,
        /// Offsets are relative to the GPT partition at this index
        #[clap(long, conflicts_with = "boot_partition")]
        partition: Option<u8>,
        /// Offsets are relative to the first Cheshire boot partition
        #[clap(long)]
        boot_partition: bool,
    },
}

fn parse_address(s: &str) -> Result<u64> {
    let parsed = match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => s.parse(),
    };
    parsed.with_context(|| format!("bad address {s:?}"))
}

// borrowed from hubris
fn remap_paths() -> Result<BTreeMap<PathBuf, &'static str>> {
    // Panic messages in crates have a long prefix; we'll shorten it using
    // the --remap-path-prefix argument to reduce message size. We'll remap
    // local crates to /cheshire-flash and crates.io to /crates.io.
    let mut remap_paths = BTreeMap::new();

    if let Ok(home) = std::env::var("CARGO_HOME") {
        let registry = PathBuf::from(home).join("registry").join("src");
        // Both the git and the sparse index checkouts, whichever is in use.
        remap_paths.insert(registry.join("github.com-1ecc6299db9ec823"), "/crates.io");
        remap_paths.insert(registry.join("index.crates.io-6f17d22bba15001f"), "/crates.io");
    }

    if let Ok(dir) = std::env::var("CARGO_MANIFEST_DIR") {
        let mut root = PathBuf::from(dir);
        root.pop();
        remap_paths.insert(root, "/cheshire-flash");
    }
    Ok(remap_paths)
}

fn build(board: String, out: Option<PathBuf>, objcopy: String, verbose: bool) -> Result<()> {
    if !BOARDS.contains(&board.as_str()) {
        bail!("unknown board {board:?}; expected one of {}", BOARDS.join(", "));
    }

    let remap_path_prefix = remap_paths()?.iter().fold(String::new(), |mut output, r| {
        let _ = write!(output, " --remap-path-prefix={}={}", r.0.display(), r.1);
        output
    });

    let mut features = format!("target-board-{board}");
    if verbose {
        features.push_str(",verbose");
    }

    let cargo = std::env::var_os("CARGO").unwrap_or_else(|| "cargo".into());
    let mut command = Command::new(cargo);
    command.args(["build", "--release", "--bin", "flasher", "--target", TARGET]);
    command.arg("--no-default-features");
    command.arg("--features");
    command.arg(features);

    // We need to make sure we explicitly set the path to our linker script
    // when setting our remap path args
    command.env(
        "RUSTFLAGS",
        format!("{} -C link-arg=-Tlink.x", remap_path_prefix),
    );

    let status = command
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()?;
    if !status.success() {
        bail!("build failed: {}", status);
    }

    let elf = PathBuf::from("target").join(TARGET).join("release").join("flasher");
    let out = out.unwrap_or_else(|| PathBuf::from("target").join(format!("flasher-{board}.bin")));
    let status = Command::new(&objcopy)
        .args(["-O", "binary"])
        .arg(&elf)
        .arg(&out)
        .status()
        .with_context(|| format!("running {objcopy}"))?;
    if !status.success() {
        bail!("objcopy failed: {}", status);
    }

    println!("{}", out.display());
    Ok(())
}

fn args(config: &FlashConfig) -> String {
    let args = FlashArgs::from(config);
    let mut script = format!("# {:?}\n", config);
    for (i, word) in args.as_bytes().chunks_exact(4).enumerate() {
        let word = u32::from_ne_bytes([word[0], word[1], word[2], word[3]]);
        let addr = regs::scratch(regs::ARGS_SCRATCH + i);
        let _ = writeln!(script, "mww {addr:#010x} {word:#010x}");
    }
    // Clear the result so a stale one isn't mistaken for this run's.
    let _ = writeln!(script, "mww {:#010x} 0x00000000", regs::scratch(regs::RESULT_SCRATCH));
    script
}

fn main() -> Result<()> {
    let xtask = Xtask::parse();

    match xtask {
        Xtask::Build {
            board,
            out,
            objcopy,
            verbose,
        } => {
            build(board, out, objcopy, verbose)?;
        }
        Xtask::Args {
            mode,
            length,
            offset,
            image_base,
            read,
            partition,
            boot_partition,
        } => {
            let addressing = match (partition, boot_partition) {
                (Some(index), _) => Addressing::Partition(PartitionSelector::Index(index.into())),
                (None, true) => Addressing::Partition(PartitionSelector::BootType),
                (None, false) => Addressing::Physical,
            };
            let config = FlashConfig {
                mode: BootTargetMode::from_raw(mode),
                request: TransferRequest {
                    length_sectors: length,
                    offset_sectors: offset,
                    image_base: usize::try_from(image_base)?,
                    addressing,
                },
                direction: if read {
                    Direction::Read
                } else {
                    Direction::Write
                },
            };
            print!("{}", args(&config));
        }
    }
    Ok(())
}

// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{ArgAction, Parser};
use diskimg::exit::exit_code;
use diskimg::{BuildOptions, Config, PlanOptions, SpecEntry, build, logging, parse_set, plan, scan_directory};
use diskimg_contracts::BuildError;
use diskimg_sys::{HostTools, InterruptGuard, mkfs};
use diskimg_types::{ByteSize, MechanismPreference};
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "diskimgcreator", version)]
#[command(about = "Create a partitioned raw disk image from partition specs")]
struct Cli {
    /// Image file to create
    image: PathBuf,

    /// Directory holding the partition entries
    #[arg(short = 'd', long, default_value = ".")]
    partitions_dir: PathBuf,

    /// Explicit partition spec, SPEC[=CONTENT]; replaces the directory scan
    #[arg(long = "partition", value_name = "SPEC[=PATH]")]
    partitions: Vec<SpecEntry>,

    /// Total image size, e.g. 4GiB
    #[arg(long)]
    size: Option<ByteSize>,

    /// Overwrite an existing image file
    #[arg(short, long)]
    force: bool,

    /// Expose partitions through partfs instead of loop devices
    #[arg(long)]
    use_partfs: bool,

    /// Print the resolved layout as JSON and exit without creating anything
    #[arg(long)]
    print_plan: bool,

    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn run(cli: Cli, mut config: Config) -> anyhow::Result<()> {
    let entries = if cli.partitions.is_empty() {
        scan_directory(&cli.partitions_dir)
            .with_context(|| format!("scanning {}", cli.partitions_dir.display()))?
    } else {
        cli.partitions
    };

    let specs = parse_set(&entries)?;
    let layout = plan(&specs, PlanOptions { image_size: cli.size })?;

    if cli.print_plan {
        println!("{}", serde_json::to_string_pretty(&layout)?);
        return Ok(());
    }
    info!("layout: {layout}");

    if cli.use_partfs {
        config.tools.mechanism = MechanismPreference::Fuse;
    }

    let _interrupts = InterruptGuard::install()
        .inspect_err(|error| warn!(%error, "interrupts will not be handled gracefully"))
        .ok();

    mkfs::detect_installed();
    let tools = HostTools::new(config.tools);
    let report = build(
        &tools,
        &layout,
        &cli.image,
        BuildOptions {
            overwrite: cli.force,
        },
    )?;
    print!("{report}");
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("diskimgcreator: {error}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(cli.verbose, config.log_file.as_deref());

    match run(cli, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("{error:#}");
            if let Some(image) = error
                .downcast_ref::<BuildError>()
                .and_then(BuildError::partial_image)
            {
                warn!(image = %image.display(), "incomplete image left on disk");
            }
            ExitCode::from(exit_code(&error).clamp(1, 255) as u8)
        }
    }
}

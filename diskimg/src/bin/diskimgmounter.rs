// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeSet;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use diskimg::exit::exit_code;
use diskimg::{Config, logging, run_command, with_session};
use diskimg_sys::{HostTools, InterruptGuard};
use diskimg_types::MechanismPreference;
use tracing::{error, warn};

/// Shell convention for a command that could not be found
const COMMAND_NOT_FOUND: i32 = 127;
/// Shell convention for a command that was found but could not be started
const COMMAND_NOT_EXECUTABLE: i32 = 126;
/// Shell convention for a run cut short by an interrupt
const COMMAND_INTERRUPTED: i32 = 130;

#[derive(Debug, Parser)]
#[command(name = "diskimgmounter", version)]
#[command(about = "Mount partitions of a disk image while a command runs")]
struct Cli {
    /// Comma separated partition numbers, counting from 1
    #[arg(
        short,
        long,
        value_delimiter = ',',
        required = true,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    partitions: Vec<u32>,

    image: PathBuf,

    /// Where the p<N> mount points are created
    #[arg(long, value_name = "DIR")]
    mount_root: Option<PathBuf>,

    /// Expose partitions through partfs instead of loop devices
    #[arg(long)]
    use_partfs: bool,

    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Command to run; its working directory is the mount root
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

fn run(cli: Cli, mut config: Config) -> anyhow::Result<i32> {
    if let Some(root) = cli.mount_root {
        config.tools.mount_root = root;
    }
    if cli.use_partfs {
        config.tools.mechanism = MechanismPreference::Fuse;
    }
    if !cli.image.is_file() {
        anyhow::bail!("image {} does not exist", cli.image.display());
    }

    let _interrupts = InterruptGuard::install()
        .inspect_err(|error| warn!(%error, "signals will not be forwarded to the command"))
        .ok();

    let tools = HostTools::new(config.tools);
    let mount_root = tools.config().mount_root.clone();
    let requested: BTreeSet<u32> = cli.partitions.iter().copied().collect();

    let outcome = with_session(&tools, &cli.image, &requested, |mounts| {
        run_command(&cli.command, &mount_root, mounts)
    })?;
    let (result, teardown) = outcome.split();

    let code = match result {
        Ok(code) => code,
        Err(error) => {
            error!(command = %cli.command.join(" "), %error, "could not run command");
            match error.kind() {
                io::ErrorKind::NotFound => COMMAND_NOT_FOUND,
                io::ErrorKind::Interrupted => COMMAND_INTERRUPTED,
                _ => COMMAND_NOT_EXECUTABLE,
            }
        }
    };

    if let Some(teardown) = teardown {
        if code == 0 {
            return Err(teardown.into());
        }
        error!("{teardown}");
    }
    Ok(code)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("diskimgmounter: {error}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(cli.verbose, config.log_file.as_deref());

    let code = match run(cli, config) {
        Ok(code) => code,
        Err(error) => {
            error!("{error:#}");
            exit_code(&error)
        }
    };
    ExitCode::from(code.clamp(0, 255) as u8)
}

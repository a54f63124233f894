use std::{fs::File, path::PathBuf, process::ExitCode};

use anyhow::Result;
use clap::Parser;
use nufs::{storage::FileBackedStorage, Volume};

#[derive(Parser)]
struct Args {
    /// NUFS disk file
    disk_file: PathBuf,
}

fn main() -> Result<ExitCode> {
    env_logger::init();

    let args = Args::parse();

    let disk_file = File::options().read(true).open(args.disk_file)?;
    let storage = FileBackedStorage::new(disk_file)?;

    let volume = Volume::open(storage)?;
    let problems = volume.check()?;

    for problem in &problems {
        println!("{problem}");
    }

    if problems.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

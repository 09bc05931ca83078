//! Platter - record crates and cue points from the command line
//!
//! This is the front end to platter-core. It:
//! 1. Imports every configured library source through the scanner
//! 2. Prints the crates and their records in artist order
//! 3. Optionally loads or saves one track's cue points via the rig loop
//!
//! ## Command line flags
//!
//! ```text
//! platter [-c CONFIG] [-s SCANNER] [-q CUELOADER] [-l PATH]...
//!         [--cues TRACK] [--save-cues TRACK POS...] [--write-config]
//! ```
//!
//! `--save-cues` takes the rest of the command line as positions, one per
//! label; `-` leaves a label unset.

use anyhow::{anyhow, bail, Context, Result};
use crossbeam::channel::{Receiver, RecvTimeoutError};
use platter_core::config::{self, PlatterConfig};
use platter_core::cues::{serialize_slot, CueOutcome, CuePoints, MAX_CUES};
use platter_core::library::{Library, SortOrder};
use platter_core::rig::{Rig, RigHandle};
use platter_core::Status;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// How long to wait for the cue loader before giving up
const CUE_TIMEOUT: Duration = Duration::from_secs(30);

const USAGE: &str = "Usage: platter [-c CONFIG] [-s SCANNER] [-q CUELOADER] [-l PATH]...\n\
                     \x20              [--cues TRACK] [--save-cues TRACK POS...] [--write-config]";

enum CueAction {
    Load(PathBuf),
    Save(PathBuf, Vec<String>),
}

#[derive(Default)]
struct Args {
    config: Option<PathBuf>,
    scanner: Option<PathBuf>,
    cue_loader: Option<PathBuf>,
    library: Vec<PathBuf>,
    cues: Option<CueAction>,
    write_config: bool,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args> {
    let mut parsed = Args::default();

    fn value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<PathBuf> {
        args.next()
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("{} requires an argument\n{}", flag, USAGE))
    }

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" => parsed.config = Some(value(&mut args, "-c")?),
            "-s" => parsed.scanner = Some(value(&mut args, "-s")?),
            "-q" => parsed.cue_loader = Some(value(&mut args, "-q")?),
            "-l" => parsed.library.push(value(&mut args, "-l")?),
            "--cues" => parsed.cues = Some(CueAction::Load(value(&mut args, "--cues")?)),
            "--save-cues" => {
                let track = value(&mut args, "--save-cues")?;
                let positions: Vec<String> = args.by_ref().collect();
                if positions.len() > MAX_CUES {
                    bail!("At most {} cue positions can be saved", MAX_CUES);
                }
                parsed.cues = Some(CueAction::Save(track, positions));
            }
            "--write-config" => parsed.write_config = true,
            "-h" | "--help" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            other => bail!("Unknown argument '{}'\n{}", other, USAGE),
        }
    }

    Ok(parsed)
}

fn main() -> Result<()> {
    let args = parse_args(std::env::args().skip(1))?;

    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    log::info!("platter starting up");

    let config_path = args.config.clone().unwrap_or_else(config::default_config_path);
    let mut config: PlatterConfig = config::load_config(&config_path);

    if let Some(scanner) = args.scanner {
        config.scanner = scanner;
    }
    if let Some(cue_loader) = args.cue_loader {
        config.cue_loader = cue_loader;
    }
    config.library.extend(args.library);

    if args.write_config {
        config::save_config(&config, &config_path)?;
        println!("Wrote {}", config_path.display());
    }

    let status = Status::new();

    let mut library = Library::new();
    for source in &config.library {
        if let Err(e) = library.import(&config.scanner, source) {
            log::error!("Import of {:?} failed: {}", source, e);
            status.alert(format!("Error scanning {}", source.display()));
        }
    }
    print_library(&library);

    if let Some(action) = args.cues {
        exchange_cues(&config, &status, action)?;
    }

    if let Some(message) = status.current() {
        println!("{}", message);
    }
    if status.alerts() > 0 {
        bail!("{} error(s) reported", status.alerts());
    }
    Ok(())
}

fn print_library(library: &Library) {
    for krate in library.crates() {
        println!("{} ({} records)", krate.name(), krate.len());
    }

    for krate in library.crates().filter(|c| !c.is_fixed()) {
        println!();
        println!("[{}]", krate.name());
        for (_, record) in library.crate_records(krate, SortOrder::Artist) {
            println!(
                "  {:>6}  {} - {}  ({})",
                record.format_bpm(),
                record.artist,
                record.title,
                record.pathname.display()
            );
        }
    }
}

/// Run one cue exchange on a background rig and print the resulting points
fn exchange_cues(config: &PlatterConfig, status: &Status, action: CueAction) -> Result<()> {
    let mut rig = Rig::new(config.rig_config(), status.clone()).context("Failed to start rig")?;
    let rig_handle = rig.handle();
    let rig_thread = thread::Builder::new()
        .name("rig".into())
        .spawn(move || rig.run())
        .context("Failed to spawn rig thread")?;

    let result = run_exchange(&rig_handle, &config.cue_loader, action);

    rig_handle.quit();
    match rig_thread.join() {
        Ok(run) => run.context("Rig loop failed")?,
        Err(_) => bail!("Rig thread panicked"),
    }

    let points = result?;
    print_cues(&points);
    Ok(())
}

fn run_exchange(rig: &RigHandle, cue_loader: &Path, action: CueAction) -> Result<CuePoints> {
    let (handle, done) = {
        let mut state = rig.lock();
        let handle = state.cues.create();
        let set = state
            .cues
            .get_mut(handle)
            .ok_or_else(|| anyhow!("{} vanished after creation", handle))?;

        if let CueAction::Save(_, positions) = &action {
            for (label, position) in positions.iter().enumerate() {
                set.points_mut().apply_line(label, position);
            }
        }
        (handle, set.completion().subscribe())
    };

    let started = match &action {
        CueAction::Load(track) => rig.begin_load(handle, cue_loader, track),
        CueAction::Save(track, _) => rig.begin_save(handle, cue_loader, track),
    };
    if let Err(e) = started {
        rig.lock().cues.release(handle);
        return Err(e).context("Cue exchange could not start");
    }

    let outcome = await_outcome(&done);

    let mut state = rig.lock();
    let points = state
        .cues
        .get(handle)
        .map(|set| *set.points())
        .unwrap_or_default();
    state.cues.release(handle);
    drop(state);
    rig.notify();

    match outcome? {
        CueOutcome::Completed => Ok(points),
        CueOutcome::Failed(reason) => {
            log::warn!("Keeping partial cue points after failure: {}", reason);
            Ok(points)
        }
        CueOutcome::Terminated => bail!("Cue exchange was cancelled"),
    }
}

fn await_outcome(done: &Receiver<CueOutcome>) -> Result<CueOutcome> {
    match done.recv_timeout(CUE_TIMEOUT) {
        Ok(outcome) => Ok(outcome),
        Err(RecvTimeoutError::Timeout) => {
            bail!("Cue loader did not finish within {:?}", CUE_TIMEOUT)
        }
        Err(RecvTimeoutError::Disconnected) => bail!("Cue set dropped before completing"),
    }
}

fn print_cues(points: &CuePoints) {
    for label in 0..MAX_CUES {
        println!("cue {:>2}: {}", label, serialize_slot(points.get(label)));
    }
}

mod args;

use std::io::Write as _;
use std::process::ExitCode;

use anyhow::{bail, Context as _, Result};
use args::Args;
use chrono::{TimeZone, Utc};
use clap::Parser as _;
use rack_common::{valid_sensor_id, JsonStore};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = run().await {
        eprintln!("{e:#}");
        return ExitCode::from(1);
    }

    ExitCode::from(0)
}

async fn run() -> Result<()> {
    let args = Args::parse();

    if !valid_sensor_id(&args.sensor) {
        bail!("invalid sensor id {:?}", args.sensor);
    }
    if args.batch_size == 0 {
        bail!("--batch-size must be at least 1");
    }

    let Some(midnight) = args.before.and_hms_opt(0, 0, 0) else {
        bail!("invalid cutoff date {}", args.before);
    };
    let cutoff = Utc.from_utc_datetime(&midnight);

    let store = JsonStore::new(args.data_dir.clone());

    println!(
        "Purging readings for sensor '{}' older than {} (UTC) under {}",
        args.sensor,
        args.before,
        args.data_dir.display()
    );

    let matching = store
        .count_readings_before(&args.sensor, cutoff)
        .await
        .context("failed to count matching readings")?;
    if matching == 0 {
        println!("No readings match the cutoff; nothing to delete.");
        return Ok(());
    }
    println!("{matching} readings match.");

    if !args.yes && !confirm()? {
        println!("Cancelled.");
        return Ok(());
    }

    let mut deleted = 0usize;
    loop {
        // A failed batch aborts the whole run rather than deleting onward
        // with an unknown amount of damage behind it.
        let removed = store
            .delete_readings_before(&args.sensor, cutoff, args.batch_size)
            .await
            .with_context(|| format!("batch delete failed after {deleted} deletions; stopping"))?;
        if removed == 0 {
            break;
        }
        deleted += removed;
        println!("Deleted batch of {removed} ({deleted}/{matching}).");
    }

    println!("Done. {deleted} readings deleted for '{}'.", args.sensor);
    Ok(())
}

fn confirm() -> Result<bool> {
    print!("This permanently deletes readings. Type 'yes' to continue: ");
    std::io::stdout().flush().context("failed to flush prompt")?;

    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("failed to read confirmation")?;
    Ok(line.trim().eq_ignore_ascii_case("yes"))
}

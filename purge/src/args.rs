use std::path::PathBuf;

use chrono::NaiveDate;
use clap::Parser;

#[derive(Debug, Parser)]
#[command(about = "Batch-delete old readings for one sensor")]
pub struct Args {
    #[arg(long)]
    pub sensor: String,

    /// Delete readings strictly before this UTC date.
    #[arg(long)]
    pub before: NaiveDate,

    #[arg(long, env = "RACK_DATA_DIR", default_value = "./.rack")]
    pub data_dir: PathBuf,

    #[arg(long, default_value_t = 500)]
    pub batch_size: usize,

    /// Skip the interactive confirmation prompt.
    #[arg(long)]
    pub yes: bool,
}

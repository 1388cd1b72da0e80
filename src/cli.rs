//! CLI argument definitions using clap derive macros.

use clap::Parser;
use std::path::PathBuf;

/// Search multiple book catalogs and download what they agree on.
///
/// Bookfetch queries every configured catalog for the given title or
/// author, merges the results into canonical records, and fetches the
/// book files (and covers) through ranked mirror lists.
#[derive(Parser, Debug)]
#[command(name = "bookfetch")]
#[command(author, version, about)]
pub struct Args {
    /// Title, author, or ISBN to search for
    pub query: String,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Maximum results requested per catalog (1-100)
    #[arg(short = 'n', long, default_value_t = 10, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub max_results: u8,

    /// Maximum concurrent downloads (1-50); defaults from account tier
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=50))]
    pub concurrency: Option<u8>,

    /// Times a failed download is re-enqueued before abandonment (0-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub retry_ceiling: Option<u8>,

    /// Use the elevated account tier (wider budget and worker pool)
    #[arg(long)]
    pub elevated: bool,

    /// Skip cover images
    #[arg(long)]
    pub no_covers: bool,

    /// Skip the metadata enrichment pass
    #[arg(long)]
    pub no_enrichment: bool,

    /// Output directory for artifacts and the dedup cache
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,
}

//! staylens - listing insight CLI
//!
//! Configuration comes from `STAYLENS_*` environment variables; output is
//! JSON on stdout, logs go to stderr.

use clap::{Parser, Subcommand};
use serde::Serialize;
use staylens_core::{ListingId, StaylensConfig, StaylensResult, ValidationError};
use staylens_insights::{connect, init_tracing, TelemetryConfig};

#[derive(Parser)]
#[command(name = "staylens")]
#[command(about = "Incremental quality insights for short-term-rental listings")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print insights for a listing, analyzing new feedback if needed
    Insights {
        /// Listing identifier
        listing: String,

        /// Discard cached insights and analyze everything again
        #[arg(short, long)]
        force: bool,
    },

    /// Report whether a listing's feedback changed since the last analysis
    Check {
        /// Listing identifier
        listing: String,
    },

    /// Drop cached insights and the processed-item ledger of a listing
    Invalidate {
        /// Listing identifier
        listing: String,
    },

    /// Create the ledger and insight tables if missing
    InitSchema,

    /// Row counts of the ledger and insight tables
    Stats,
}

#[tokio::main]
async fn main() -> StaylensResult<()> {
    let cli = Cli::parse();
    init_tracing(&TelemetryConfig::from_env()?)?;

    let config = StaylensConfig::from_env()?;
    let service = connect(&config).await?;

    match cli.command {
        Commands::Insights { listing, force } => {
            let result = service.get_insights(&ListingId::new(listing), force).await?;
            print_json(&result)
        }
        Commands::Check { listing } => {
            let listing = ListingId::new(listing);
            let changed = service.has_changed(&listing).await?;
            print_json(&serde_json::json!({
                "listing_id": listing,
                "changed": changed,
            }))
        }
        Commands::Invalidate { listing } => {
            let outcome = service.invalidate(&ListingId::new(listing)).await?;
            print_json(&outcome)
        }
        // connect() already ran the idempotent schema setup.
        Commands::InitSchema => print_json(&serde_json::json!({ "schema": "ready" })),
        Commands::Stats => print_json(&service.stats().await?),
    }
}

fn print_json<T: Serialize>(value: &T) -> StaylensResult<()> {
    let text = serde_json::to_string_pretty(value).map_err(|e| ValidationError::InvalidValue {
        field: "output".to_string(),
        reason: e.to_string(),
    })?;
    println!("{}", text);
    Ok(())
}

//! Example: Reading One Meter
//!
//! This example fetches the current reading for a single meter and prints
//! its measurements. The merchant token is read from `METERWATCH_TOKEN`.
//!
//! Run with: `cargo run --example read_meter -- <BASE_URL> <METER_ID>`

use std::env;

use meterwatch_core::{ApiClient, ApiSettings, AuthContext, with_retry, RetryConfig, RetryOutcome};
use meterwatch_types::Meter;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <BASE_URL> <METER_ID>", args[0]);
        eprintln!();
        eprintln!("Example:");
        eprintln!("  METERWATCH_TOKEN=... {} https://api.example.com M1", args[0]);
        std::process::exit(1);
    }

    let token = env::var("METERWATCH_TOKEN")?;
    let client = ApiClient::new(ApiSettings::new(&args[1]))?;
    let auth = AuthContext::new(token);
    let meter = Meter::new(&args[2], &args[2]);

    println!("Fetching {} from {}...", meter, client.reading_url(&meter.id));

    let cancel = CancellationToken::new();
    let outcome = with_retry(&RetryConfig::default(), &cancel, &meter.id, || {
        client.fetch_reading(&meter, &auth)
    })
    .await;

    match outcome {
        RetryOutcome::Succeeded { value, attempts } => {
            println!();
            println!("Reading at {} ({} attempt(s)):", value.timestamp, attempts);
            for (name, measurement) in &value.measurements {
                println!("  {:<20} {}", name, measurement);
            }
        }
        RetryOutcome::Failed { error, attempts } => {
            eprintln!("Failed after {} attempt(s) [{}]: {}", attempts, error.kind(), error);
            std::process::exit(1);
        }
        RetryOutcome::Cancelled { .. } => eprintln!("Cancelled"),
    }

    Ok(())
}

#![forbid(unsafe_code)]

use clap::Parser;
use log::info;

use web_listener::traffic::generator::{send_requests, GeneratorPlan,
                                       DEFAULT_REQUESTS_PER_MINUTE, DEFAULT_TOTAL_MINUTES};
use web_listener::utils::config::init_log;

// ---------------------------------------------------------------------------
// GeneratorArgs:
// ---------------------------------------------------------------------------
#[derive(Debug, Parser)]
#[command(name = "traffic_generator", version, about = "Send randomized HTTP requests to a listener.")]
struct GeneratorArgs {
    /// Listener host.
    host: String,

    /// Listener port.
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,

    /// How many minutes worth of requests to send.
    #[arg(long, default_value_t = DEFAULT_TOTAL_MINUTES)]
    minutes: u32,

    /// Requests per minute.
    #[arg(long, default_value_t = DEFAULT_REQUESTS_PER_MINUTE)]
    rpm: u32,
}

// ---------------------------------------------------------------------------
// main:
// ---------------------------------------------------------------------------
#[tokio::main]
async fn main() {
    let args = GeneratorArgs::parse();
    if let Err(e) = init_log() {
        println!("{}", e);
    }

    let mut plan = GeneratorPlan::new(&args.host, args.port);
    plan.total_minutes = args.minutes;
    plan.requests_per_minute = args.rpm;

    let summary = send_requests(&plan).await;
    info!("Sent {} requests: {} answered, {} failed.", summary.sent, summary.succeeded, summary.failed);
}

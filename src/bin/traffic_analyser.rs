#![forbid(unsafe_code)]

use std::io;
use std::path::PathBuf;
use std::process;

use anyhow::Result;
use chrono::NaiveDateTime;
use clap::Parser;
use log::error;

use web_listener::traffic::analyser::TrafficAnalyser;
use web_listener::utils::config::{get_parms, init_log, DEFAULT_LOG_FILE};
use web_listener::utils::listener_utils::{get_absolute_path, log_str_to_timestamp,
                                          parse_timezone, timestamp_in};

// ---------------------------------------------------------------------------
// AnalyserArgs:
// ---------------------------------------------------------------------------
#[derive(Debug, Parser)]
#[command(name = "traffic_analyser", version, about = "Summarize request rates recorded in the listener's access log.")]
struct AnalyserArgs {
    /// Start of the window, "YYYY-MM-DD HH:MM:SS".  Defaults to 10 hours before --to.
    #[arg(long, value_parser = parse_log_timestamp)]
    from: Option<NaiveDateTime>,

    /// End of the window, "YYYY-MM-DD HH:MM:SS".  Defaults to now.
    #[arg(long, value_parser = parse_log_timestamp)]
    to: Option<NaiveDateTime>,

    /// JSON access log to analyse.
    #[arg(long, default_value = DEFAULT_LOG_FILE)]
    log_file: String,
}

fn parse_log_timestamp(s: &str) -> Result<NaiveDateTime, String> {
    log_str_to_timestamp(s).map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// main:
// ---------------------------------------------------------------------------
fn main() {
    let args = AnalyserArgs::parse();
    if let Err(e) = init_log() {
        println!("{}", e);
    }

    if let Err(e) = run(&args) {
        error!("{}", e);
        println!("Error: {}", e);
        process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// run:
// ---------------------------------------------------------------------------
fn run(args: &AnalyserArgs) -> Result<()> {
    let parms = get_parms()?;
    let tz = parse_timezone(&parms.config.timezone)?;
    let now = timestamp_in(&tz).naive_local();

    // A lone --to moves the default window with it.
    let end = args.to.unwrap_or(now);
    let log_file = PathBuf::from(get_absolute_path(&args.log_file));
    let mut analyser = TrafficAnalyser::new(&log_file, args.from, Some(end), end)?;
    analyser.analyze(&mut io::stdout().lock())?;
    Ok(())
}

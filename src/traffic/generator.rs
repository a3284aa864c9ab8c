#![forbid(unsafe_code)]

use std::time::Duration;

use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::utils::errors::Errors;

// ***************************************************************************
//                                Constants
// ***************************************************************************
pub const ENDPOINTS: [&str; 3] = ["/", "/path1", "/path2"];
pub const METHODS: [&str; 3] = ["GET", "POST", "PUT"];

pub const DEFAULT_TOTAL_MINUTES: u32 = 3;
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 5;

// Pause between requests, in seconds.
pub const DEFAULT_MIN_DELAY_SECS: f64 = 0.5;
pub const DEFAULT_MAX_DELAY_SECS: f64 = 2.0;

// ***************************************************************************
//                              Plan and Summary
// ***************************************************************************
#[derive(Debug, Clone)]
pub struct GeneratorPlan {
    pub host: String,
    pub port: u16,
    pub total_minutes: u32,
    pub requests_per_minute: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl GeneratorPlan {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            total_minutes: DEFAULT_TOTAL_MINUTES,
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            min_delay: Duration::from_secs_f64(DEFAULT_MIN_DELAY_SECS),
            max_delay: Duration::from_secs_f64(DEFAULT_MAX_DELAY_SECS),
        }
    }

    pub fn total_requests(&self) -> u32 {
        self.total_minutes.saturating_mul(self.requests_per_minute)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GeneratorSummary {
    pub sent: u32,
    pub succeeded: u32,
    pub failed: u32,
}

// ---------------------------------------------------------------------------
// build_request:
// ---------------------------------------------------------------------------
/** A bodiless HTTP/1.1 request that asks the server to close afterwards. */
pub fn build_request(method: &str, endpoint: &str, host: &str, port: u16) -> String {
    let mut request = format!("{method} {endpoint} HTTP/1.1\r\nHost: {host}:{port}\r\n");
    if method != "GET" {
        request.push_str("Content-Length: 0\r\n");
    }
    request.push_str("Connection: close\r\n\r\n");
    request
}

// ---------------------------------------------------------------------------
// parse_status_code:
// ---------------------------------------------------------------------------
/** Pull the numeric code out of the response's status line. */
pub fn parse_status_code(response: &[u8]) -> Result<u16, Errors> {
    let text = String::from_utf8_lossy(response);
    let status_line = text.lines().next().unwrap_or_default();
    let mut parts = status_line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => code.parse::<u16>()
            .map_err(|_| Errors::MalformedResponse(status_line.to_string())),
        _ => Err(Errors::MalformedResponse(status_line.to_string())),
    }
}

// ---------------------------------------------------------------------------
// send_request:
// ---------------------------------------------------------------------------
/** Send one request and read the reply until the server closes. */
pub async fn send_request(host: &str, port: u16, method: &str, endpoint: &str) -> Result<u16, Errors> {
    let mut stream = TcpStream::connect((host, port)).await?;
    stream.write_all(build_request(method, endpoint, host, port).as_bytes()).await?;

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;
    debug!("{} {} returned {} bytes", method, endpoint, response.len());
    parse_status_code(&response)
}

// ---------------------------------------------------------------------------
// send_requests:
// ---------------------------------------------------------------------------
/** Send total_requests() randomized requests, pausing a random time inside
 * the plan's delay range after each one.  Outcomes are printed as they come.
 */
pub async fn send_requests(plan: &GeneratorPlan) -> GeneratorSummary {
    let mut summary = GeneratorSummary::default();
    let url_base = plan.base_url();

    while summary.sent < plan.total_requests() {
        let (method, endpoint, delay) = pick_request(plan);
        let url = format!("{}{}", url_base, endpoint);

        match send_request(&plan.host, plan.port, method, endpoint).await {
            Ok(code) => {
                println!("Request to {} with {} - Status Code: {}", url, method, code);
                summary.succeeded += 1;
            }
            Err(e) => {
                println!("Request to {} with {} failed: {}", url, method, e);
                summary.failed += 1;
            }
        }
        summary.sent += 1;

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    println!("Finished sending requests.");
    summary
}

// ---------------------------------------------------------------------------
// pick_request:
// ---------------------------------------------------------------------------
// The rng is dropped before returning so callers stay Send across awaits.
fn pick_request(plan: &GeneratorPlan) -> (&'static str, &'static str, Duration) {
    let mut rng = rand::thread_rng();
    let method = METHODS.choose(&mut rng).copied().unwrap_or("GET");
    let endpoint = ENDPOINTS.choose(&mut rng).copied().unwrap_or("/");

    let (lo, hi) = (plan.min_delay.as_secs_f64(), plan.max_delay.as_secs_f64());
    let delay = if hi > lo { Duration::from_secs_f64(rng.gen_range(lo..hi)) } else { plan.min_delay };
    (method, endpoint, delay)
}

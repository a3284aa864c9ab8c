#![forbid(unsafe_code)]

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDateTime};
use extended_isolation_forest::{Forest, ForestOptions};
use log::{debug, info};
use serde::{Deserialize, Deserializer};

use crate::utils::errors::Errors;
use crate::utils::listener_utils::log_str_to_timestamp;

// ***************************************************************************
//                                Constants
// ***************************************************************************
// Window used when --from is not given.
pub const DEFAULT_WINDOW_HOURS: i64 = 10;

const PERCENTILE: f64 = 95.0;
const SUCCESS_CODE: &str = "200";

// Isolation forest settings.  CONTAMINATION is the share of gaps flagged.
const CONTAMINATION: f64 = 0.1;
const FOREST_TREES: usize = 100;
const FOREST_SAMPLE_SIZE: usize = 256;
// Added per gap index so no two training points are identical.
const TIE_BREAK_SECS: f64 = 1e-9;

// ***************************************************************************
//                             TrafficEntry Struct
// ***************************************************************************
/** An access log record as read back by the analyser. */
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrafficEntry {
    #[serde(deserialize_with = "deserialize_log_timestamp")]
    pub timestamp: NaiveDateTime,
    #[serde(default)]
    pub client_ip: Option<String>,
    #[serde(rename = "HTTP_code", default)]
    pub http_code: String,
}

fn deserialize_log_timestamp<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    log_str_to_timestamp(&s).map_err(serde::de::Error::custom)
}

// ***************************************************************************
//                              Result Structs
// ***************************************************************************
/** Request rate figures.  Intervals are measured in minutes. */
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RequestStats {
    pub max_rpm: f64,
    pub avg_rpm: f64,
    pub percentile_95th: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrafficReport {
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub stats: RequestStats,
    pub http_status_rate: f64,
    pub anomalies: Vec<NaiveDateTime>,
}

// ***************************************************************************
//                            TrafficAnalyser Struct
// ***************************************************************************
#[derive(Debug)]
pub struct TrafficAnalyser {
    log_file: PathBuf,
    start_time: NaiveDateTime,
    end_time: NaiveDateTime,
    entries: Vec<TrafficEntry>,
    filtered_entries: Vec<TrafficEntry>,
}

impl TrafficAnalyser {
    /** Set up an analysis of log_file over [start_time, end_time].  Missing
     * bounds default to the DEFAULT_WINDOW_HOURS ending at now.  The log file
     * has to exist.
     */
    pub fn new(log_file: &Path, start_time: Option<NaiveDateTime>, end_time: Option<NaiveDateTime>,
               now: NaiveDateTime) -> Result<Self, Errors> {
        if !log_file.is_file() {
            return Err(Errors::LogFileNotFound(log_file.display().to_string()));
        }

        Ok(Self {
            log_file: log_file.to_path_buf(),
            start_time: start_time.unwrap_or(now - Duration::hours(DEFAULT_WINDOW_HOURS)),
            end_time: end_time.unwrap_or(now),
            entries: Vec::new(),
            filtered_entries: Vec::new(),
        })
    }

    pub fn start_time(&self) -> NaiveDateTime {
        self.start_time
    }

    pub fn end_time(&self) -> NaiveDateTime {
        self.end_time
    }

    pub fn entries(&self) -> &[TrafficEntry] {
        &self.entries
    }

    pub fn filtered_entries(&self) -> &[TrafficEntry] {
        &self.filtered_entries
    }

    // -----------------------------------------------------------------------
    // validate_log_file:
    // -----------------------------------------------------------------------
    /** Every non-blank line must be a JSON document. */
    pub fn validate_log_file(&self) -> Result<(), Errors> {
        for (lineno, line) in self.lines()?.into_iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            if let Err(e) = serde_json::from_str::<serde_json::Value>(&line) {
                return Err(Errors::InvalidLogLine(lineno + 1, e.to_string()));
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // load_log_entries:
    // -----------------------------------------------------------------------
    pub fn load_log_entries(&mut self) -> Result<&[TrafficEntry], Errors> {
        let mut entries = Vec::new();
        for (lineno, line) in self.lines()?.into_iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: TrafficEntry = serde_json::from_str(&line)
                .map_err(|e| Errors::InvalidLogLine(lineno + 1, e.to_string()))?;
            entries.push(entry);
        }
        debug!("Loaded {} entries from {}", entries.len(), self.log_file.display());
        self.entries = entries;
        Ok(&self.entries)
    }

    // -----------------------------------------------------------------------
    // filter_entries_by_time:
    // -----------------------------------------------------------------------
    /** Keep the entries whose timestamp lies in the window, bounds included. */
    pub fn filter_entries_by_time(&mut self) -> &[TrafficEntry] {
        self.filtered_entries = filter_entries_by_time(&self.entries, self.start_time, self.end_time);
        &self.filtered_entries
    }

    // -----------------------------------------------------------------------
    // analyze:
    // -----------------------------------------------------------------------
    /** Run every step, writing each result to out as soon as it's known.  A
     * failing step leaves the earlier output in place.
     */
    pub fn analyze<W: Write>(&mut self, out: &mut W) -> Result<TrafficReport, Errors> {
        info!("Analyzing traffic in {}", self.log_file.display());
        writeln!(out, "Analyzing traffic from {} to {}", self.start_time, self.end_time)?;
        self.validate_log_file()?;
        self.load_log_entries()?;
        if self.entries.is_empty() {
            return Err(Errors::AnalysisError("No log entries provided. Cannot analyze traffic.".to_string()));
        }

        self.filter_entries_by_time();
        let stats = calculate_request_stats(&self.filtered_entries)?;
        print_statistics(out, self.start_time, self.end_time, &stats)?;

        let http_status_rate = calculate_http_status_rate(&self.filtered_entries)?;
        writeln!(out, "HTTP Status Code Rate per minute: {}", http_status_rate)?;

        let anomalies = detect_anomalies(&self.filtered_entries)?;
        print_anomalies(out, &anomalies)?;

        Ok(TrafficReport { start_time: self.start_time, end_time: self.end_time, stats, http_status_rate, anomalies })
    }

    fn lines(&self) -> Result<Vec<String>, Errors> {
        let file = File::open(&self.log_file)?;
        Ok(BufReader::new(file).lines().collect::<Result<Vec<_>, _>>()?)
    }
}

// ***************************************************************************
//                             Public Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// filter_entries_by_time:
// ---------------------------------------------------------------------------
pub fn filter_entries_by_time(entries: &[TrafficEntry], start_time: NaiveDateTime,
                              end_time: NaiveDateTime) -> Vec<TrafficEntry> {
    entries.iter()
        .filter(|e| start_time <= e.timestamp && e.timestamp <= end_time)
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// calculate_request_stats:
// ---------------------------------------------------------------------------
/** Compute request rates from the gaps between consecutive requests.
 * Zero-length gaps (requests within the same second) are dropped before
 * the shortest gap and the percentile are taken.
 */
pub fn calculate_request_stats(entries: &[TrafficEntry]) -> Result<RequestStats, Errors> {
    if entries.is_empty() {
        return Err(Errors::AnalysisError("No log entries provided. Cannot calculate request stats.".to_string()));
    }

    let timestamps = sorted_timestamps(entries.iter());
    if timestamps.len() <= 1 {
        return Err(Errors::AnalysisError(
            "Not enough timestamps to calculate request stats. At least two timestamps are required.".to_string()));
    }

    let intervals: Vec<f64> = timestamps.windows(2)
        .map(|pair| minutes_between(pair[0], pair[1]))
        .filter(|i| *i != 0.0)
        .collect();
    if intervals.is_empty() {
        return Err(Errors::AnalysisError("All intervals are zero. Cannot calculate request stats.".to_string()));
    }

    let shortest_interval = intervals.iter().copied().fold(f64::INFINITY, f64::min);
    let span = minutes_between(timestamps[0], timestamps[timestamps.len() - 1]);
    let percentile_95th = percentile(&intervals, PERCENTILE).unwrap_or_default();

    Ok(RequestStats {
        max_rpm: 60.0 / shortest_interval,
        avg_rpm: entries.len() as f64 / span,
        percentile_95th,
    })
}

// ---------------------------------------------------------------------------
// calculate_http_status_rate:
// ---------------------------------------------------------------------------
/** Successful (200) responses per minute.  A single success counts as a
 * rate of one.
 */
pub fn calculate_http_status_rate(entries: &[TrafficEntry]) -> Result<f64, Errors> {
    let timestamps = sorted_timestamps(entries.iter().filter(|e| e.http_code.contains(SUCCESS_CODE)));

    match timestamps.len() {
        0 => Err(Errors::AnalysisError(
            "No timestamps found for HTTP status 200 entries. Cannot calculate HTTP status rate.".to_string())),
        1 => Ok(1.0),
        count => {
            let total_minutes = minutes_between(timestamps[0], timestamps[count - 1]);
            if total_minutes == 0.0 {
                return Err(Errors::AnalysisError(
                    "Total duration in minutes is zero. Cannot calculate HTTP status rate.".to_string()));
            }
            Ok(count as f64 / total_minutes)
        }
    }
}

// ---------------------------------------------------------------------------
// detect_anomalies:
// ---------------------------------------------------------------------------
/** Flag unusual gaps between consecutive requests with an isolation forest
 * trained on the gaps themselves (in seconds).  The CONTAMINATION share of
 * gaps with the highest anomaly scores is reported, each by the timestamp of
 * the request that ended it.
 */
pub fn detect_anomalies(entries: &[TrafficEntry]) -> Result<Vec<NaiveDateTime>, Errors> {
    if entries.is_empty() {
        return Err(Errors::AnalysisError("No log entries provided. Cannot detect anomalies.".to_string()));
    }

    let timestamps = sorted_timestamps(entries.iter());
    if timestamps.len() <= 1 {
        return Err(Errors::AnalysisError(
            "Not enough timestamps to detect anomalies. At least two timestamps are required.".to_string()));
    }

    let intervals: Vec<[f64; 1]> = timestamps.windows(2)
        .enumerate()
        .map(|(i, pair)| [(pair[1] - pair[0]).num_seconds() as f64 + i as f64 * TIE_BREAK_SECS])
        .collect();

    let options = ForestOptions {
        n_trees: FOREST_TREES,
        sample_size: FOREST_SAMPLE_SIZE.min(intervals.len()),
        max_tree_depth: None,
        extension_level: 0,
    };
    let forest = Forest::<f64, 1>::from_slice(&intervals, &options)
        .map_err(|e| Errors::AnalysisError(format!("Unable to build isolation forest: {:?}", e)))?;

    let scores: Vec<f64> = intervals.iter().map(|i| forest.score(i)).collect();
    let threshold = percentile(&scores, 100.0 * (1.0 - CONTAMINATION)).unwrap_or(f64::INFINITY);
    debug!("Anomaly score threshold {} over {} gaps", threshold, scores.len());

    Ok(scores.iter()
        .enumerate()
        .filter(|(_, score)| **score > threshold)
        .map(|(i, _)| timestamps[i + 1])
        .collect())
}

// ---------------------------------------------------------------------------
// print_statistics:
// ---------------------------------------------------------------------------
pub fn print_statistics<W: Write>(out: &mut W, start_time: NaiveDateTime, end_time: NaiveDateTime,
                                  stats: &RequestStats) -> Result<(), Errors> {
    writeln!(out, "Statistics from {} to {}", start_time, end_time)?;
    writeln!(out, "Maximum RPM: {:.2}", stats.max_rpm)?;
    writeln!(out, "Average RPM: {:.2}", stats.avg_rpm)?;
    writeln!(out, "95 percentile: {:.2}", stats.percentile_95th)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// print_anomalies:
// ---------------------------------------------------------------------------
pub fn print_anomalies<W: Write>(out: &mut W, anomalies: &[NaiveDateTime]) -> Result<(), Errors> {
    if anomalies.is_empty() {
        writeln!(out, "No anomalies detected.")?;
        return Ok(());
    }
    writeln!(out, "Anomalies detected at the following timestamps:")?;
    for ts in anomalies {
        writeln!(out, "{}", ts)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// percentile:
// ---------------------------------------------------------------------------
/** The pct-th percentile using linear interpolation between the closest
 * ranks.  None for an empty slice.
 */
pub fn percentile(values: &[f64], pct: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64))
}

// ***************************************************************************
//                             Private Functions
// ***************************************************************************
fn sorted_timestamps<'a>(entries: impl Iterator<Item = &'a TrafficEntry>) -> Vec<NaiveDateTime> {
    let mut timestamps: Vec<NaiveDateTime> = entries.map(|e| e.timestamp).collect();
    timestamps.sort();
    timestamps
}

fn minutes_between(from: NaiveDateTime, to: NaiveDateTime) -> f64 {
    (to - from).num_seconds() as f64 / 60.0
}

#![forbid(unsafe_code)]

use thiserror::Error;

/// Error enumerates the errors returned by this application.
#[derive(Error, Debug)]
pub enum Errors {
    /// Input parameter logging.
    #[error("web_listener input parameters:\n{}", .0)]
    InputParms(String),

    /// Wrong argument count or an unparsable argument.  The payload is the
    /// usage text shown to the operator.
    #[error("{}", .0)]
    Usage(String),

    /// Represents all other cases of `std::io::Error`.
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Inaccessible logger configuration file.
    #[error("Unable to access the Log4rs configuration file: {}", .0)]
    Log4rsInitialization(String),

    #[error("Reading application configuration file: {}", .0)]
    ReadingConfigFile(String),

    #[error("Unable to parse TOML file: {}", .0)]
    TOMLParseError(String),

    #[error("Unknown time zone (expected an IANA name such as CET): {}", .0)]
    InvalidTimezone(String),

    #[error("Unable to resolve listener address {}", .0)]
    AddressResolution(String),

    #[error("Socket bind failed for {}: {}", .0, .1)]
    SocketBind(String, std::io::Error),

    #[error("Socket listen failed for {}: {}", .0, .1)]
    SocketListen(String, std::io::Error),

    #[error("Timed out after {} seconds waiting for the request from {}", .0, .1)]
    ReadTimeout(u64, String),

    #[error("Unable to encode access log entry: {}", .0)]
    AccessLogEncode(#[from] serde_json::Error),

    #[error("Malformed HTTP response: {}", .0)]
    MalformedResponse(String),

    #[error("Log file not found at {}", .0)]
    LogFileNotFound(String),

    #[error("Invalid JSON format in log file at line {}: {}", .0, .1)]
    InvalidLogLine(usize, String),

    #[error("Unable to parse timestamp (expected YYYY-MM-DD HH:MM:SS): {}", .0)]
    InvalidTimestamp(String),

    #[error("Traffic analysis error: {}", .0)]
    AnalysisError(String),
}

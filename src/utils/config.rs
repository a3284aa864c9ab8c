#![forbid(unsafe_code)]

use anyhow::{Result, anyhow};
use chrono_tz::Tz;
use clap::error::ErrorKind;
use clap::Parser;
use lazy_static::lazy_static;
use log::{info, error, LevelFilter};
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config as LogConfig, Root};
use log4rs::encode::pattern::PatternEncoder;
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fmt, fs, process};

use crate::utils::errors::Errors;
use crate::utils::listener_utils::{get_absolute_path, parse_timezone};

// ***************************************************************************
//                                Constants
// ***************************************************************************
// Configuration files are looked up relative to the working directory.
const LOG4RS_CONFIG_FILE   : &str = "config/log4rs.yml";
const LISTENER_CONFIG_FILE : &str = "config/listener.toml";
const CONSOLE_LOG_PATTERN  : &str = "{d(%Y-%m-%d %H:%M:%S)} {h({l})} {t} - {m}{n}";

// Networking.
pub const DEFAULT_HOST     : &str = "127.0.0.1";
pub const DEFAULT_PORT     : u16  = 8080;
pub const LISTEN_BACKLOG   : u32  = 5;
pub const READ_CHUNK_SIZE  : usize = 1024;

// Logging.
pub const DEFAULT_LOG_FILE : &str = "logs/server.log";
pub const DEFAULT_TIMEZONE : &str = "CET"; // switches to CEST in summer

// Slow clients are abandoned after this long; 0 disables the limit.
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;

// Exit code used for every startup failure, including bad arguments.
pub const STARTUP_FAILURE_EXIT_CODE: i32 = 1;

// ***************************************************************************
//                             Static Variables
// ***************************************************************************
// Assign the command line arguments BEFORE RUNTIME_CTX is initialized in main.
lazy_static! {
    pub static ref LISTENER_ARGS: ListenerArgs = init_listener_args();
}

// ***************************************************************************
//                                 Enums
// ***************************************************************************
/// How the end of a request is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadPolicy {
    /// Keep reading until the buffer holds a blank line (CRLF CRLF) or the peer closes.
    #[default]
    UntilTerminator,
    /// A single bounded read is taken as the whole request.
    SingleRead,
}

/// Encoding of access log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

/// Whether connections are served one at a time or each on its own task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    #[default]
    Sequential,
    Concurrent,
}

impl fmt::Display for ReadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReadPolicy::UntilTerminator => write!(f, "until_terminator"),
            ReadPolicy::SingleRead      => write!(f, "single_read"),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LogFormat::Json => write!(f, "json"),
            LogFormat::Text => write!(f, "text"),
        }
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectionMode::Sequential => write!(f, "sequential"),
            ConnectionMode::Concurrent => write!(f, "concurrent"),
        }
    }
}

// ***************************************************************************
//                               Config Structs
// ***************************************************************************
// ---------------------------------------------------------------------------
// ListenerArgs:
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Parser)]
#[command(name = "web_listener", version, about = "Minimal HTTP listener that answers every request with a canned response.")]
pub struct ListenerArgs {
    /// Address to bind, for example 127.0.0.1.
    pub host: String,

    /// TCP port to bind (1-65535).
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    pub port: u16,

    /// Access log location, defaults to logs/server.log.
    pub log_file: Option<String>,
}

// ---------------------------------------------------------------------------
// Parms:
// ---------------------------------------------------------------------------
#[derive(Debug)]
pub struct Parms {
    pub config_file: String,
    pub config: Config,
}

// ---------------------------------------------------------------------------
// Config:
// ---------------------------------------------------------------------------
/** Policy settings read from config/listener.toml.  Every key is optional. */
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub read_policy: ReadPolicy,
    pub log_format: LogFormat,
    pub timezone: String,
    pub read_timeout_secs: u64,
    pub connection_mode: ConnectionMode,
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            read_policy: ReadPolicy::default(),
            log_format: LogFormat::default(),
            timezone: DEFAULT_TIMEZONE.to_string(),
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            connection_mode: ConnectionMode::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// ServerConfig:
// ---------------------------------------------------------------------------
/** Everything the listener loop needs, fixed for the life of the process. */
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_file: PathBuf,
    pub read_policy: ReadPolicy,
    pub log_format: LogFormat,
    pub timezone: Tz,
    pub read_timeout: Option<Duration>,
    pub connection_mode: ConnectionMode,
}

impl ServerConfig {
    /** Server settings with default policies. */
    pub fn new(host: &str, port: u16, log_file: &Path) -> Self {
        Self {
            host: host.to_string(),
            port,
            log_file: log_file.to_path_buf(),
            read_policy: ReadPolicy::default(),
            log_format: LogFormat::default(),
            timezone: Tz::CET,
            read_timeout: Some(Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS)),
            connection_mode: ConnectionMode::default(),
        }
    }

    /** Combine command line arguments with the configuration file settings. */
    pub fn from_parts(args: &ListenerArgs, config: &Config) -> Result<Self, Errors> {
        let log_file = get_absolute_path(args.log_file.as_deref().unwrap_or(DEFAULT_LOG_FILE));
        let read_timeout = match config.read_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Self {
            host: args.host.clone(),
            port: args.port,
            log_file: PathBuf::from(log_file),
            read_policy: config.read_policy,
            log_format: config.log_format,
            timezone: parse_timezone(&config.timezone)?,
            read_timeout,
            connection_mode: config.connection_mode,
        })
    }

    /** The host:port string handed to the resolver.  Bare IPv6 literals
     * are bracketed.
     */
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT, Path::new(DEFAULT_LOG_FILE))
    }
}

// ---------------------------------------------------------------------------
// RuntimeCtx:
// ---------------------------------------------------------------------------
#[derive(Debug)]
pub struct RuntimeCtx {
    pub parms: Parms,
    pub server: ServerConfig,
    pub listener_args: &'static ListenerArgs,
}

// ***************************************************************************
//                             Argument Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// usage_text:
// ---------------------------------------------------------------------------
pub fn usage_text(program: &str) -> String {
    format!("Usage: {program} <host> <port> [<log_file_location>]\n\
             Example: {program} {DEFAULT_HOST} {DEFAULT_PORT} {DEFAULT_LOG_FILE}")
}

// ---------------------------------------------------------------------------
// parse_args:
// ---------------------------------------------------------------------------
/** Parse the listener's command line.  Any argument error, including the
 * wrong number of arguments or a port outside 1-65535, is reported as
 * Errors::Usage carrying the usage text.  Requests for help or version
 * information are printed and the process exits successfully.
 */
pub fn parse_args<I, T>(args: I) -> Result<ListenerArgs, Errors>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
    let program = args.first()
        .and_then(|p| Path::new(p).file_name())
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| "web_listener".to_string());

    match ListenerArgs::try_parse_from(&args) {
        Ok(a) => Ok(a),
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => e.exit(),
            _ => Err(Errors::Usage(usage_text(&program))),
        },
    }
}

// ---------------------------------------------------------------------------
// init_listener_args:
// ---------------------------------------------------------------------------
/** Get the command line arguments.  Bad arguments print the usage text to
 * stdout and exit before anything else is initialized.
 */
fn init_listener_args() -> ListenerArgs {
    match parse_args(std::env::args_os()) {
        Ok(args) => args,
        Err(e) => {
            println!("{}", e);
            process::exit(STARTUP_FAILURE_EXIT_CODE);
        }
    }
}

// ***************************************************************************
//                               Log Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// init_log:
// ---------------------------------------------------------------------------
/** Initialize log4rs from config/log4rs.yml when that file exists, otherwise
 * log to the console at info level.
 */
pub fn init_log() -> Result<(), Errors> {
    let logconfig = get_absolute_path(LOG4RS_CONFIG_FILE);
    if Path::new(&logconfig).is_file() {
        if let Err(e) = log4rs::init_file(&logconfig, Default::default()) {
            println!("{}", e);
            return Err(Errors::Log4rsInitialization(logconfig));
        }
        info!("Log4rs initialized using: {}", logconfig);
        return Ok(());
    }

    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(CONSOLE_LOG_PATTERN)))
        .build();
    let config = LogConfig::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info))
        .map_err(|e| Errors::Log4rsInitialization(e.to_string()))?;
    log4rs::init_config(config).map_err(|e| Errors::Log4rsInitialization(e.to_string()))?;
    info!("Log4rs initialized with the built-in console configuration.");
    Ok(())
}

// ***************************************************************************
//                             Parms Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// get_parms:
// ---------------------------------------------------------------------------
/** Read the policy settings from config/listener.toml.  A missing or
 * unreadable file means defaults; a file that doesn't parse is an error.
 */
pub fn get_parms() -> Result<Parms> {
    read_parms(&get_absolute_path(LISTENER_CONFIG_FILE))
}

// ---------------------------------------------------------------------------
// read_parms:
// ---------------------------------------------------------------------------
pub fn read_parms(config_file: &str) -> Result<Parms> {
    info!("{}", Errors::ReadingConfigFile(config_file.to_string()));
    let contents = match fs::read_to_string(config_file) {
        Ok(c) => c,
        Err(_) => {
            println!("Unable to read configuration at {}. Using default values.", config_file);
            return Ok(Parms { config_file: Default::default(), config: Config::new() });
        }
    };

    // Parse the toml configuration.
    let config : Config = match toml::from_str(&contents) {
        Ok(c)  => c,
        Err(e) => {
            let msg = format!("{}\n   {}", Errors::TOMLParseError(config_file.to_string()), e);
            error!("{}", msg);
            return Result::Err(anyhow!(msg));
        }
    };

    Ok(Parms { config_file: config_file.to_string(), config })
}

// ***************************************************************************
//                             Config Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// init_runtime_context:
// ---------------------------------------------------------------------------
/** Assemble the runtime context from the command line and the configuration
 * file.  Failures are reported on stdout and the process exits.
 */
pub fn init_runtime_context() -> RuntimeCtx {
    let listener_args: &'static ListenerArgs = &LISTENER_ARGS;
    let parms = match get_parms() {
        Ok(p) => p,
        Err(e) => {
            println!("FAILED to read configuration file: {}", e);
            process::exit(STARTUP_FAILURE_EXIT_CODE);
        }
    };
    let server = match ServerConfig::from_parts(listener_args, &parms.config) {
        Ok(s) => s,
        Err(e) => {
            println!("FAILED to assemble server configuration: {}", e);
            process::exit(STARTUP_FAILURE_EXIT_CODE);
        }
    };
    RuntimeCtx { parms, server, listener_args }
}

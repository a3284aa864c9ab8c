#![forbid(unsafe_code)]

use lazy_static::lazy_static;
use log::{error, info};
use std::process;

use web_listener::listener;
use web_listener::utils::config::{init_log, init_runtime_context, RuntimeCtx, LISTENER_ARGS,
                                  STARTUP_FAILURE_EXIT_CODE};
use web_listener::utils::errors::Errors;

// ***************************************************************************
//                             Static Variables
// ***************************************************************************
// Lazily initialize the runtime context so that it has a 'static lifetime.
// We exit if the arguments or the configuration file can't be used.
lazy_static! {
    static ref RUNTIME_CTX: RuntimeCtx = init_runtime_context();
}

// ---------------------------------------------------------------------------
// main:
// ---------------------------------------------------------------------------
#[tokio::main]
async fn main() {
    // Announce ourselves.
    println!("Starting web_listener!");

    // Initialize the listener.
    listener_init();

    // ------------------ Main Loop -------------------
    if let Err(e) = listener::start(RUNTIME_CTX.server.clone()).await {
        error!("Listener failed: {}", e);
        println!("Listener failed: {}", e);
        process::exit(STARTUP_FAILURE_EXIT_CODE);
    }
    info!("web_listener stopped.");
}

// ***************************************************************************
//                             Private Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// listener_init:
// ---------------------------------------------------------------------------
/** Initialize the subsystems the accept loop depends on. */
fn listener_init() {
    // Force argument parsing first so usage errors exit before anything else.
    lazy_static::initialize(&LISTENER_ARGS);

    // Configure our log.
    if let Err(e) = init_log() {
        println!("{}", e);
        process::exit(STARTUP_FAILURE_EXIT_CODE);
    }

    // Force the reading of the configuration file and initialization of the
    // runtime context now that messages have somewhere to go.
    info!("{}", Errors::InputParms(format!("{:#?}", *RUNTIME_CTX)));

    // Log build info.
    print_version_info();
}

// ---------------------------------------------------------------------------
// print_version_info:
// ---------------------------------------------------------------------------
fn print_version_info() {
    info!("\n*** Running WEB_LISTENER={}, RUSTC={}.",
          option_env!("CARGO_PKG_VERSION").unwrap_or("unknown"),
          env!("RUSTC_VERSION"));
}

//! OSC routing daemon
//!
//! ## Protocol architecture
//!
//! - **UDP (default)**: one OSC packet per datagram, handled under the
//!   configured concurrency strategy (blocking / threading / forking)
//! - **TCP (`mode = "streaming"`)**: length-prefixed OSC frames, one
//!   thread per connection
//!
//! The daemon registers the conventional `/info`, `/subscribe`, and
//! `/unsubscribe` handlers plus a `/print` handler that logs its arguments
//! and replies on `/printed`. Subscribed targets form the outbound
//! fan-out table.

use sandesh_osc::config::{AppConfig, ServerMode, DEFAULT_PORT};
use sandesh_osc::dispatch::AddressSpace;
use sandesh_osc::error::{Error, Result};
use sandesh_osc::proto::Message;
use sandesh_osc::transport::convention::add_default_handlers;
use sandesh_osc::transport::strategy::ConcurrencyStrategy;
use sandesh_osc::transport::target::{MultiClient, Target};
use sandesh_osc::transport::{Blocking, DatagramServer, StreamServer, Threaded};
use std::env;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Default config path when none is given on the command line
const DEFAULT_CONFIG_PATH: &str = "/etc/sandesh-osc.toml";

/// Parse config path from command line arguments.
///
/// Supports:
/// - `sandesh-osc <path>` (positional)
/// - `sandesh-osc --config <path>` (flag-based)
/// - `sandesh-osc -c <path>` (short flag)
///
/// Returns the path and whether it was explicitly given.
fn parse_config_path() -> (String, bool) {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return (args[i + 1].clone(), true);
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return (args[1].clone(), true);
    }

    (DEFAULT_CONFIG_PATH.to_string(), false)
}

/// Load config, falling back to built-in defaults when the default path
/// is simply absent. An explicitly given path must exist.
fn load_config() -> Result<AppConfig> {
    let (path, explicit) = parse_config_path();
    if !explicit && !std::path::Path::new(&path).exists() {
        log::info!("no config at {}, using built-in defaults", path);
        return Ok(AppConfig::builtin_defaults());
    }
    log::info!("using config: {}", path);
    AppConfig::from_file(&path)
}

/// Register the daemon's handlers: the reserved-address conventions plus
/// a `/print` logger that replies on `/printed`
fn register_handlers(
    space: &Arc<AddressSpace>,
    subscribers: Arc<MultiClient>,
    description: String,
) -> Result<()> {
    add_default_handlers(space, subscribers, description, DEFAULT_PORT)?;

    space.register("/print", |msg: &Message, source| {
        let rendered = format!("{} [{}] {:?}", msg.addr(), msg.type_tags(), msg.args());
        log::info!("got '{}' from {}", rendered, source);
        let mut reply = Message::new("/printed")?;
        reply.push(rendered);
        Ok(Some(reply))
    })?;

    // Replies routed back to this server land here
    space.register("/printed", |msg: &Message, _source| {
        log::info!("reply: {:?}", msg.args());
        Ok(None)
    })?;

    Ok(())
}

fn main() -> Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("sandesh-osc v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;

    // Shared address space and the subscriber fan-out table
    let space = Arc::new(AddressSpace::new());
    space.set_error_prefix(&config.server.error_prefix);
    space.set_info_prefix(&config.server.info_prefix);

    let subscribers = Arc::new(MultiClient::new()?);
    for spec in &config.client.targets {
        let target = Target::parse(spec, DEFAULT_PORT)?;
        log::info!("configured target: {}", target.url_str());
        subscribers.set_target(target);
    }

    let description = format!(
        "sandesh-osc v{} ({:?} mode) on {}",
        env!("CARGO_PKG_VERSION"),
        config.server.mode,
        config.server.bind_address
    );
    register_handlers(&space, Arc::clone(&subscribers), description)?;

    match config.server.mode {
        ServerMode::Streaming => {
            let server = StreamServer::bind(&config.server.bind_address, space)?;

            let shutdown = server.shutdown_flag();
            ctrlc::set_handler(move || {
                log::info!("received shutdown signal");
                shutdown.store(true, Ordering::Relaxed);
            })
            .map_err(|e| Error::Spawn(format!("error setting Ctrl-C handler: {}", e)))?;

            log::info!("sandesh-osc running (streaming). Press Ctrl-C to stop.");
            server.serve()?;
        }
        mode => {
            let strategy: Box<dyn ConcurrencyStrategy> = match mode {
                ServerMode::Blocking => Box::new(Blocking),
                ServerMode::Threading => Box::new(Threaded::new()),
                #[cfg(unix)]
                ServerMode::Forking => Box::new(sandesh_osc::transport::Forked::new()),
                #[cfg(not(unix))]
                ServerMode::Forking => {
                    return Err(Error::NotSupported(
                        "forking mode requires a unix platform".into(),
                    ))
                }
                ServerMode::Streaming => unreachable!("handled above"),
            };

            let mut server =
                DatagramServer::bind(&config.server.bind_address, space, strategy)?;
            server.set_return_port(config.server.return_port);

            let shutdown = server.shutdown_flag();
            ctrlc::set_handler(move || {
                log::info!("received shutdown signal");
                shutdown.store(true, Ordering::Relaxed);
            })
            .map_err(|e| Error::Spawn(format!("error setting Ctrl-C handler: {}", e)))?;

            log::info!("sandesh-osc running ({:?}). Press Ctrl-C to stop.", mode);
            server.serve()?;
        }
    }

    log::info!("sandesh-osc stopped");
    Ok(())
}

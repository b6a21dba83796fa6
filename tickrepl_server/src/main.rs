// CLI entry point: a standalone host running the tickrepl nREPL server.
//
// The binary plays the part of the host application. Its main thread is the
// host thread: it owns a `CooperativeScheduler` and a `tickrepl_lisp`
// runtime, and runs due timers until SIGINT/SIGTERM, then shuts the server
// down in order. Editors connect to the printed `nrepl://` URL or find the
// port in the port file.
//
// Usage:
//   tickrepl [OPTIONS]
//     --config <FILE>         JSON config file; flags below override it
//     --host <HOST>           Interface to bind (default: 127.0.0.1)
//     --port <PORT>           Listen port, 0 for any free port (default: 0)
//     --port-file <FILE>      Port file path (default: .nrepl-port)
//     --no-port-file          Do not write a port file
//     --interval <SECONDS>    Tick interval (default: 0.1)
//     --log-level <FILTER>    Log filter when RUST_LOG is unset (default: info)
//     --log-file <FILE>       Log to a file instead of stderr

use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tickrepl_lisp::Runtime;
use tickrepl_server::config::ServerConfig;
use tickrepl_server::lifecycle::ServerLifecycle;
use tickrepl_server::logging;
use tickrepl_server::scheduler::CooperativeScheduler;
use tracing::info;

/// Longest the host loop sleeps before rechecking the shutdown flag.
const MAX_IDLE: Duration = Duration::from_millis(100);

/// Parsed flags. `None` means "keep what the config file (or default) says".
#[derive(Default)]
struct Args {
    config: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
    port_file: Option<Option<PathBuf>>,
    interval: Option<f64>,
    log_level: Option<String>,
    log_file: Option<PathBuf>,
}

fn main() {
    let args = parse_args();

    let log_level = args.log_level.as_deref().unwrap_or(logging::DEFAULT_LEVEL);
    if let Err(e) = logging::init(log_level, args.log_file.as_deref()) {
        eprintln!("Failed to initialise logging: {e}");
        std::process::exit(1);
    }

    let config = build_config(&args).unwrap_or_else(|e| {
        eprintln!("{e}");
        std::process::exit(1);
    });

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        if let Err(e) = signal_hook::flag::register(signal, shutdown.clone()) {
            eprintln!("Failed to install signal handler: {e}");
            std::process::exit(1);
        }
    }

    let scheduler = Rc::new(CooperativeScheduler::new());
    let mut lifecycle = ServerLifecycle::new(scheduler.clone());
    match lifecycle.start(&config, Runtime::new()) {
        Ok(server) => {
            println!("nREPL server listening on {}", server.url());
            if let Some(path) = server.port_file_path() {
                println!("Port written to {}", path.display());
            }
            println!("Press Ctrl+C to stop.");
        }
        Err(e) => {
            eprintln!("Failed to start nREPL server: {e}");
            std::process::exit(1);
        }
    }

    while !shutdown.load(Ordering::SeqCst) {
        scheduler.run_due(Instant::now());
        let now = Instant::now();
        let idle = scheduler
            .next_deadline()
            .map_or(MAX_IDLE, |deadline| deadline.saturating_duration_since(now))
            .min(MAX_IDLE);
        if !idle.is_zero() {
            std::thread::sleep(idle);
        }
    }

    info!("shutdown requested");
    lifecycle.shutdown();
}

/// Config file first, then flag overrides.
fn build_config(args: &Args) -> Result<ServerConfig, String> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path).map_err(|e| e.to_string())?,
        None => ServerConfig::default(),
    };
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(port_file) = &args.port_file {
        config.port_file_path = port_file.clone();
    }
    if let Some(interval) = args.interval {
        config.tick_interval_seconds = interval;
    }
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

/// Parse command-line arguments with plain `std::env::args()` matching.
fn parse_args() -> Args {
    let mut args = Args::default();
    let argv: Vec<String> = std::env::args().collect();
    let mut i = 1;

    while i < argv.len() {
        match argv[i].as_str() {
            "--config" => {
                i += 1;
                args.config = Some(path_arg(&argv, i, "--config"));
            }
            "--host" => {
                i += 1;
                args.host = Some(argv.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--host requires a value");
                    std::process::exit(1);
                }));
            }
            "--port" => {
                i += 1;
                args.port = Some(argv.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                    eprintln!("--port requires a valid port number");
                    std::process::exit(1);
                }));
            }
            "--port-file" => {
                i += 1;
                args.port_file = Some(Some(path_arg(&argv, i, "--port-file")));
            }
            "--no-port-file" => {
                args.port_file = Some(None);
            }
            "--interval" => {
                i += 1;
                args.interval =
                    Some(argv.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                        eprintln!("--interval requires a number of seconds");
                        std::process::exit(1);
                    }));
            }
            "--log-level" => {
                i += 1;
                args.log_level = Some(argv.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--log-level requires a value");
                    std::process::exit(1);
                }));
            }
            "--log-file" => {
                i += 1;
                args.log_file = Some(path_arg(&argv, i, "--log-file"));
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    args
}

fn path_arg(argv: &[String], i: usize, flag: &str) -> PathBuf {
    argv.get(i).map(PathBuf::from).unwrap_or_else(|| {
        eprintln!("{flag} requires a path");
        std::process::exit(1);
    })
}

fn print_usage() {
    println!("Usage: tickrepl [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config <FILE>         JSON config file; flags below override it");
    println!("  --host <HOST>           Interface to bind (default: 127.0.0.1)");
    println!("  --port <PORT>           Listen port, 0 for any free port (default: 0)");
    println!("  --port-file <FILE>      Port file path (default: .nrepl-port)");
    println!("  --no-port-file          Do not write a port file");
    println!("  --interval <SECONDS>    Tick interval (default: 0.1)");
    println!("  --log-level <FILTER>    Log filter when RUST_LOG is unset (default: info)");
    println!("  --log-file <FILE>       Log to a file instead of stderr");
    println!("  --help, -h              Show this help");
}

//! Deskspan server entry point.
//!
//! Parses the command line, loads the configuration, opens the primary
//! screen back-end, binds the listener, and runs the server loop on the
//! Tokio runtime.  SIGHUP reloads the configuration; Ctrl-C shuts down.
//!
//! Exit codes: 0 success, 2 bad arguments, 3 configuration problem,
//! 4 runtime failure.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use deskspan_server::application::server::{Server, ServerEvent};
use deskspan_server::infrastructure::network::listener::spawn_accept_loop;
use deskspan_server::infrastructure::primary::{
    open_primary_screen, PrimaryScreen, PrimaryScreenError,
};
use deskspan_server::infrastructure::storage::config::{load_config, ConfigError};

const EX_OK: i32 = 0;
const EX_ARGS: i32 = 2;
const EX_CONFIG: i32 = 3;
const EX_FAILED: i32 = 4;

const DEFAULT_PORT: u16 = 24800;

/// Bounds on the primary-screen retry back-off.
const RETRY_MIN: Duration = Duration::from_secs(1);
const RETRY_MAX: Duration = Duration::from_secs(60);

/// Pause between attempts to take a busy listen address.
const BIND_RETRY: Duration = Duration::from_secs(10);

const USAGE: &str = "\
usage: deskspan-server [options]

options:
  -a, --address <host[:port]>  listen address (default from the config file)
  -c, --config <path>          configuration file
  -n, --name <name>            use this screen name for the local machine
  -d, --debug <level>          log level: error, warn, note, info, debug,
                               debug1, debug2
      --daemon                 accepted for launcher compatibility
  -f, --no-daemon              run in the foreground (the default)
      --restart                keep retrying recoverable failures (default)
  -1, --no-restart             exit on recoverable failures instead
  -h, --help                   print this help
";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Args {
    address: Option<String>,
    config: Option<PathBuf>,
    name: Option<String>,
    debug: Option<String>,
    daemon: bool,
    restart: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            address: None,
            config: None,
            name: None,
            debug: None,
            daemon: false,
            restart: true,
        }
    }
}

/// Parses the command line.  `Ok(None)` means help was requested.
fn parse_args<I>(mut argv: I) -> Result<Option<Args>, String>
where
    I: Iterator<Item = String>,
{
    let mut args = Args::default();
    while let Some(arg) = argv.next() {
        let mut value_for = |flag: &str| {
            argv.next().ok_or_else(|| format!("missing argument for {flag}"))
        };
        match arg.as_str() {
            "-a" | "--address" => args.address = Some(value_for(&arg)?),
            "-c" | "--config" => args.config = Some(PathBuf::from(value_for(&arg)?)),
            "-n" | "--name" => args.name = Some(value_for(&arg)?),
            "-d" | "--debug" => args.debug = Some(value_for(&arg)?),
            "--daemon" => args.daemon = true,
            "-f" | "--no-daemon" => args.daemon = false,
            "--restart" => args.restart = true,
            "-1" | "--no-restart" => args.restart = false,
            "-h" | "--help" => return Ok(None),
            other => return Err(format!("unrecognized option {other:?}")),
        }
    }
    Ok(Some(args))
}

/// Maps a `--debug` level onto a tracing filter directive.
fn log_directive(level: &str) -> Result<&'static str, String> {
    match level.to_ascii_lowercase().as_str() {
        "error" => Ok("error"),
        "warn" | "warning" => Ok("warn"),
        "note" | "info" => Ok("info"),
        "debug" => Ok("debug"),
        "debug1" | "debug2" => Ok("trace"),
        other => Err(format!("unknown debug level {other:?}")),
    }
}

fn init_logging(debug: Option<&str>) -> Result<(), String> {
    let filter = match debug {
        Some(level) => EnvFilter::new(log_directive(level)?),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

/// Expands `host[:port]` into a socket address, defaulting the port.
fn resolve_address(spec: &str) -> Result<SocketAddr, String> {
    let candidate = match spec.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => spec.to_string(),
        _ => format!("{spec}:{DEFAULT_PORT}"),
    };
    candidate
        .to_socket_addrs()
        .map_err(|e| format!("cannot resolve address {spec:?}: {e}"))?
        .next()
        .ok_or_else(|| format!("address {spec:?} resolves to nothing"))
}

/// The machine's own screen name when `--name` is absent.
fn local_screen_name() -> String {
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.trim().is_empty() {
            return name.trim().to_string();
        }
    }
    for path in ["/proc/sys/kernel/hostname", "/etc/hostname"] {
        if let Ok(name) = std::fs::read_to_string(path) {
            if !name.trim().is_empty() {
                return name.trim().to_string();
            }
        }
    }
    "local".to_string()
}

/// Configuration file search order when `--config` is absent: the user's
/// config directory, then the system file.
fn config_path_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    let user_base = std::env::var_os("XDG_CONFIG_HOME").map(PathBuf::from).or_else(|| {
        std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config"))
    });
    if let Some(base) = user_base {
        candidates.push(base.join("deskspan").join("deskspan.toml"));
    }
    candidates.push(PathBuf::from("/etc/deskspan.toml"));
    candidates
}

fn find_config_path(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }
    let candidates = config_path_candidates();
    candidates
        .iter()
        .find(|p| p.exists())
        .cloned()
        .unwrap_or_else(|| candidates[0].clone())
}

/// Opens the platform back-end, retrying recoverable failures with a bounded
/// back-off while `restart` holds.
async fn open_primary(restart: bool) -> anyhow::Result<Arc<dyn PrimaryScreen>> {
    loop {
        match open_primary_screen() {
            Ok(primary) => return Ok(primary),
            Err(e @ PrimaryScreenError::Fatal(_)) => return Err(e.into()),
            Err(e @ PrimaryScreenError::Unavailable { .. }) if !restart => return Err(e.into()),
            Err(PrimaryScreenError::Unavailable { retry }) => {
                let wait = retry.clamp(RETRY_MIN, RETRY_MAX);
                warn!(wait_secs = wait.as_secs(), "primary screen unavailable; retrying");
                tokio::time::sleep(wait).await;
            }
        }
    }
}

async fn bind_with_retry(addr: SocketAddr, restart: bool) -> anyhow::Result<TcpListener> {
    loop {
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse && restart => {
                warn!(%addr, "listen address in use; retrying");
                tokio::time::sleep(BIND_RETRY).await;
            }
            Err(e) => return Err(e).with_context(|| format!("cannot bind listener on {addr}")),
        }
    }
}

/// SIGHUP re-reads the configuration; Ctrl-C requests shutdown.
fn spawn_signal_tasks(
    events: mpsc::UnboundedSender<ServerEvent>,
    config_path: PathBuf,
    screen_name: String,
) {
    #[cfg(unix)]
    {
        let events = events.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let Ok(mut hup) = signal(SignalKind::hangup()) else { return };
            while hup.recv().await.is_some() {
                info!(path = %config_path.display(), "reloading configuration");
                match load_config(&config_path)
                    .and_then(|file| file.build_screen_map(&screen_name))
                {
                    Ok(map) => {
                        let _ = events.send(ServerEvent::ConfigReload(map));
                    }
                    Err(e) => warn!(error = %e, "reload failed; keeping the old configuration"),
                }
            }
        });
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = events.send(ServerEvent::Shutdown);
        }
    });
}

/// Brings the server up and runs it to completion.
async fn serve(args: Args) -> anyhow::Result<()> {
    let config_path = find_config_path(args.config.clone());
    let config_file = load_config(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;

    let screen_name = args.name.clone().unwrap_or_else(local_screen_name);
    let screen_map = config_file
        .build_screen_map(&screen_name)
        .with_context(|| format!("validating configuration from {}", config_path.display()))?;
    if !screen_map.is_screen(&screen_name) {
        return Err(ConfigError::LocalScreenMissing(screen_name).into());
    }

    let address_spec = args.address.clone().unwrap_or_else(|| config_file.address.clone());
    let addr = resolve_address(&address_spec).map_err(anyhow::Error::msg)?;

    let primary = open_primary(args.restart)
        .await
        .context("opening the primary screen")?;
    let listener = bind_with_retry(addr, args.restart).await?;
    info!(%addr, screen = %screen_name, "listening");

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let accept_task = spawn_accept_loop(listener, events_tx.clone());
    spawn_signal_tasks(events_tx, config_path, screen_name.clone());

    let server = Server::new(screen_map, primary, &screen_name);
    server.run(events_rx).await;

    accept_task.abort();
    Ok(())
}

/// Anything traceable to the configuration exits 3; other failures are
/// runtime errors and exit 4.
fn exit_code_for(error: &anyhow::Error) -> i32 {
    if error.downcast_ref::<ConfigError>().is_some() {
        EX_CONFIG
    } else {
        EX_FAILED
    }
}

async fn run() -> i32 {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(Some(args)) => args,
        Ok(None) => {
            print!("{USAGE}");
            return EX_OK;
        }
        Err(e) => {
            eprintln!("deskspan-server: {e}");
            eprint!("{USAGE}");
            return EX_ARGS;
        }
    };

    if let Err(e) = init_logging(args.debug.as_deref()) {
        eprintln!("deskspan-server: {e}");
        return EX_ARGS;
    }
    if args.daemon {
        warn!("daemonization is handled by the service manager; running in the foreground");
    }
    // An unusable address given on the command line is a usage error; the
    // config file's default is checked again inside serve().
    if let Some(spec) = &args.address {
        if let Err(e) = resolve_address(spec) {
            error!("{e}");
            return EX_ARGS;
        }
    }

    match serve(args).await {
        Ok(()) => EX_OK,
        Err(e) => {
            error!(error = format!("{e:#}"), "fatal");
            exit_code_for(&e)
        }
    }
}

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Option<Args>, String> {
        parse_args(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_no_arguments_yields_defaults() {
        let args = parse(&[]).unwrap().unwrap();
        assert_eq!(args, Args::default());
        assert!(args.restart);
    }

    #[test]
    fn test_long_and_short_flags_parse() {
        let args = parse(&[
            "--address", "0.0.0.0:5000",
            "-c", "/tmp/deskspan.toml",
            "-n", "apollo",
            "--debug", "debug",
            "-1",
        ])
        .unwrap()
        .unwrap();
        assert_eq!(args.address.as_deref(), Some("0.0.0.0:5000"));
        assert_eq!(args.config.as_deref(), Some(std::path::Path::new("/tmp/deskspan.toml")));
        assert_eq!(args.name.as_deref(), Some("apollo"));
        assert_eq!(args.debug.as_deref(), Some("debug"));
        assert!(!args.restart);
    }

    #[test]
    fn test_help_short_circuits() {
        assert_eq!(parse(&["-h"]).unwrap(), None);
        assert_eq!(parse(&["--help"]).unwrap(), None);
    }

    #[test]
    fn test_unknown_option_is_an_error() {
        assert!(parse(&["--frobnicate"]).is_err());
    }

    #[test]
    fn test_missing_value_is_an_error() {
        assert!(parse(&["--address"]).is_err());
    }

    #[test]
    fn test_resolve_address_appends_the_default_port() {
        let addr = resolve_address("127.0.0.1").unwrap();
        assert_eq!(addr.port(), DEFAULT_PORT);
    }

    #[test]
    fn test_resolve_address_keeps_an_explicit_port() {
        let addr = resolve_address("127.0.0.1:9999").unwrap();
        assert_eq!(addr.port(), 9999);
    }

    #[test]
    fn test_resolve_address_rejects_garbage() {
        assert!(resolve_address("not an address at all").is_err());
    }

    #[test]
    fn test_log_directive_mapping() {
        assert_eq!(log_directive("NOTE").unwrap(), "info");
        assert_eq!(log_directive("debug2").unwrap(), "trace");
        assert_eq!(log_directive("error").unwrap(), "error");
        assert!(log_directive("loud").is_err());
    }

    #[test]
    fn test_find_config_path_prefers_the_explicit_flag() {
        let explicit = PathBuf::from("/tmp/explicit.toml");
        assert_eq!(find_config_path(Some(explicit.clone())), explicit);
    }

    #[test]
    fn test_exit_codes_classify_configuration_problems() {
        // A configuration error keeps its identity through added context.
        let config_error: anyhow::Error =
            ConfigError::Missing { path: PathBuf::from("/tmp/deskspan.toml") }.into();
        assert_eq!(exit_code_for(&config_error.context("loading configuration")), EX_CONFIG);

        let runtime_error = anyhow::anyhow!("listener socket failed");
        assert_eq!(exit_code_for(&runtime_error), EX_FAILED);
    }
}

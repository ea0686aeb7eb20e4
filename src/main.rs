use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

use smartmarks::app::{App, AppEvent};
use smartmarks::backend::Backend;
use smartmarks::callback;
use smartmarks::config::{Config, ConfigError};
use smartmarks::session::SessionAccessor;
use smartmarks::storage::{Database, DatabaseError};
use smartmarks::ui;

/// How long the callback listener gets to finish open connections on exit.
const LISTENER_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Get the config directory path (~/.config/smartmarks/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let config_dir = PathBuf::from(home).join(".config").join("smartmarks");
    Ok(config_dir)
}

/// Create the config directory with user-only permissions.
fn prepare_config_dir(config_dir: &Path) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;
        println!("Created config directory: {}", config_dir.display());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(config_dir, perms) {
                    eprintln!(
                        "Warning: could not restrict permissions on {}: {}",
                        config_dir.display(),
                        e
                    );
                }
            }
            Err(e) => {
                eprintln!(
                    "Warning: could not read metadata for {}: {}",
                    config_dir.display(),
                    e
                );
            }
        }
    }

    Ok(())
}

/// Initialize tracing. The TUI owns the terminal, so logs go to a file in the
/// config directory; stderr is the fallback when the file cannot be opened.
fn init_tracing(config_dir: &Path) {
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    let log_path = config_dir.join("smartmarks.log");

    let mut options = std::fs::OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    match options.open(&log_path) {
        Ok(file) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        Err(e) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            tracing::warn!(path = %log_path.display(), error = %e, "Could not open log file, logging to stderr");
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "smartmarks",
    about = "Terminal bookmark manager with live sync across sessions"
)]
struct Args {
    /// Config file to use instead of ~/.config/smartmarks/config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Forget the stored session and exit
    #[arg(long)]
    sign_out: bool,

    /// Loopback port for the OAuth callback (overrides the config file)
    #[arg(long, value_name = "PORT")]
    callback_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_dir = get_config_dir()?;
    prepare_config_dir(&config_dir)?;
    init_tracing(&config_dir);

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let settings = match config.backend_settings() {
        Ok(settings) => settings,
        Err(e @ ConfigError::MissingSetting { .. }) => {
            eprintln!("Error: {}", e);
            eprintln!();
            eprintln!("Point smartmarks at your backend project, for example:");
            eprintln!("  export SUPABASE_URL=https://<project>.supabase.co");
            eprintln!("  export SUPABASE_ANON_KEY=<public anon key>");
            eprintln!();
            eprintln!("Or set backend_url and backend_key in {}.", config_path.display());
            std::process::exit(1);
        }
        Err(e) => return Err(e).context("Invalid backend configuration"),
    };
    tracing::info!(host = %settings.host(), "Using backend");

    // Open database
    let db_path = config_dir.join("session.db");
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of smartmarks appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    let backend = Backend::new(&settings).context("Failed to create HTTP client")?;
    let callback_port = args.callback_port.unwrap_or(config.callback_port);
    let accessor = SessionAccessor::new(
        backend.clone(),
        db,
        &config.oauth_provider,
        callback_port,
    )
    .context("Failed to build OAuth redirect URL")?;

    // Handle --sign-out flag
    if args.sign_out {
        accessor.clear_local().await;
        println!("Signed out.");
        return Ok(());
    }

    // Create event channel for background tasks
    let (event_tx, event_rx) = mpsc::channel::<AppEvent>(64);

    let listener = TcpListener::bind(("127.0.0.1", callback_port))
        .await
        .with_context(|| {
            format!(
                "Failed to listen on 127.0.0.1:{} for the OAuth callback (try --callback-port)",
                callback_port
            )
        })?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(callback::serve(
        listener,
        callback::router(accessor.clone(), event_tx.clone()),
        async move {
            let _ = shutdown_rx.await;
        },
    ));

    let mut app = App::new(accessor, backend);
    ui::spawn_session_check(&app, &event_tx);

    // Run the TUI
    let result = ui::run(&mut app, event_tx, event_rx).await;
    drop(app);

    let _ = shutdown_tx.send(());
    match tokio::time::timeout(LISTENER_SHUTDOWN_GRACE, server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => tracing::warn!(error = %e, "OAuth callback listener failed"),
        Ok(Err(e)) => tracing::warn!(error = %e, "OAuth callback listener task failed"),
        Err(_) => tracing::debug!("OAuth callback listener did not stop in time"),
    }

    result?;
    println!("Goodbye!");
    Ok(())
}

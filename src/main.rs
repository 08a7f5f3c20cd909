//! Pulse Overlay - live heart rate overlay binary
//!
//! Runs the overlay with a terminal label standing in for the desktop window.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use pulse_overlay::style::load_current;
use pulse_overlay::{
    connect_webdriver, ConsoleWidget, DisplaySync, OverlayConfig, OverlayShell, ShellState,
    SourceDiscoverer, StyleSettings, TungsteniteTransport, DEFAULT_CHECK_INTERVAL_MS,
    DEFAULT_COLOR, DEFAULT_ELEMENT_ID, DEFAULT_FONT, DEFAULT_OBSERVATION_SECS,
    DEFAULT_SETTINGS_PATH, DEFAULT_WEBDRIVER_URL,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;
use tracing::{error, info, Level};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "pulse_overlay")]
#[command(about = "Live heart rate overlay")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = "Shows the heart rate from a streaming web dashboard as an always-on-top label")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Dashboard page URL
    #[arg(short, long, env = "STROMNO_URL")]
    url: Option<String>,

    /// Default label color
    #[arg(long, env = "COLOR", default_value = DEFAULT_COLOR)]
    color: String,

    /// Default label font
    #[arg(long, env = "FONT", default_value = DEFAULT_FONT)]
    font: String,

    /// Polling and settings check interval in milliseconds
    #[arg(short, long, env = "CHECK_INTERVAL", default_value_t = DEFAULT_CHECK_INTERVAL_MS)]
    interval: u64,

    /// Id of the value element on the dashboard page
    #[arg(long, default_value = DEFAULT_ELEMENT_ID)]
    element_id: String,

    /// Style settings file written by the color/font editor
    #[arg(long, default_value = DEFAULT_SETTINGS_PATH)]
    settings_path: PathBuf,

    /// WebDriver server URL
    #[arg(long, env = "WEBDRIVER_URL", default_value = DEFAULT_WEBDRIVER_URL)]
    webdriver_url: String,

    /// Launch and manage this chromedriver binary
    #[arg(long, env = "CHROMEDRIVER_PATH")]
    chromedriver: Option<PathBuf>,

    /// Seconds to watch the dashboard's traffic during discovery
    #[arg(long, default_value_t = DEFAULT_OBSERVATION_SECS)]
    observe_secs: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the overlay until Ctrl-C (default)
    Run,

    /// Look for the dashboard's streaming endpoint and exit
    Discover(DiscoverArgs),

    /// Show the style settings that would be applied
    Settings,
}

#[derive(Args)]
struct DiscoverArgs {
    /// Print endpoints as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    init_logging(&cli)?;

    match &cli.command {
        Some(Commands::Run) | None => run_command(&cli)?,
        Some(Commands::Discover(args)) => discover_command(&cli, args)?,
        Some(Commands::Settings) => settings_command(&cli),
    }

    Ok(())
}

fn init_logging(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG, when set, takes precedence over the command-line level.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(log_level(cli)));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

fn log_level(cli: &Cli) -> Level {
    if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else {
        Level::WARN
    }
}

fn default_filter(level: Level) -> EnvFilter {
    EnvFilter::default().add_directive(LevelFilter::from_level(level).into())
}

fn build_config(cli: &Cli) -> OverlayConfig {
    OverlayConfig::new(cli.url.clone().unwrap_or_default())
        .with_element_id(&cli.element_id)
        .with_default_style(StyleSettings::new(&cli.color, &cli.font))
        .with_settings_path(&cli.settings_path)
        .with_check_interval(Duration::from_millis(cli.interval))
        .with_observation_window(Duration::from_secs(cli.observe_secs))
        .with_webdriver_url(&cli.webdriver_url)
        .with_chromedriver_path(cli.chromedriver.clone())
}

/// Run the overlay. The main thread owns the label; everything else runs on the tokio runtime.
fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let config = build_config(cli);
    config.validate()?;

    let runtime = Runtime::new().context("failed to start async runtime")?;

    let style = load_current(&config.settings_path, &config.default_style);
    let (mut display, handle) = DisplaySync::new(ConsoleWidget::new(style));

    let (engine, driver) = runtime
        .block_on(connect_webdriver(&config))
        .context("failed to reach the WebDriver server")?;

    let mut shell = OverlayShell::new(
        config,
        Arc::new(engine),
        Arc::new(TungsteniteTransport),
        handle.clone(),
    )
    .with_driver(driver);

    {
        let _guard = runtime.enter();
        shell.start()?;
    }
    let state_log = runtime.spawn(log_state_changes(shell.subscribe_state()));

    let lifecycle = runtime.spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
        }
        info!("Stop requested");
        shell.stop().await;
        if let Err(e) = handle.close() {
            error!("Failed to close display: {}", e);
        }
    });

    display.run();

    runtime
        .block_on(lifecycle)
        .context("shutdown task failed")?;
    state_log.abort();
    Ok(())
}

async fn log_state_changes(states: watch::Receiver<ShellState>) {
    let mut states = WatchStream::new(states);
    while let Some(state) = states.next().await {
        info!("Overlay state: {:?}", state);
    }
}

fn discover_command(cli: &Cli, args: &DiscoverArgs) -> anyhow::Result<()> {
    let config = build_config(cli);
    config.validate()?;

    let runtime = Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(async {
        let (engine, driver) = connect_webdriver(&config).await?;
        let discoverer = SourceDiscoverer::new(Arc::new(engine));

        let cancel = CancellationToken::new();
        let interrupt = cancel.clone();
        let interrupted = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupt.cancel();
            }
        });
        let result = discoverer
            .discover(&config.dashboard_url, config.observation_window, &cancel)
            .await;
        interrupted.abort();

        if let Some(mut driver) = driver {
            if let Err(e) = driver.shutdown().await {
                error!("Failed to stop driver process: {}", e);
            }
        }

        let endpoints = result?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&endpoints)?);
        } else if endpoints.is_empty() {
            println!("No streaming endpoint found on {}", config.dashboard_url);
        } else {
            for endpoint in &endpoints {
                println!("{}", endpoint.url);
            }
        }
        Ok::<_, anyhow::Error>(())
    })
}

fn settings_command(cli: &Cli) {
    let config = build_config(cli);
    let style = load_current(&config.settings_path, &config.default_style);

    println!("Settings file: {}", config.settings_path.display());
    println!("  Color: {}", style.color);
    println!("  Font: {}", style.font_family);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from([
            "pulse_overlay",
            "--url",
            "https://x/dashboard",
            "--interval",
            "250",
            "discover",
            "--json",
        ])
        .unwrap();
        assert_eq!(cli.url.as_deref(), Some("https://x/dashboard"));
        assert_eq!(cli.interval, 250);
        assert!(matches!(cli.command, Some(Commands::Discover(DiscoverArgs { json: true }))));
    }

    #[test]
    fn test_config_from_flags() {
        let cli = Cli::try_parse_from([
            "pulse_overlay",
            "--url",
            "https://x/dashboard",
            "--color",
            "#00FF00",
            "--font",
            "Georgia",
        ])
        .unwrap();
        let config = build_config(&cli);
        assert_eq!(config.dashboard_url, "https://x/dashboard");
        assert_eq!(config.default_style, StyleSettings::new("#00FF00", "Georgia"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_log_level_flags_reach_filter() {
        let cli = Cli::try_parse_from(["pulse_overlay", "--debug"]).unwrap();
        assert_eq!(
            default_filter(log_level(&cli)).max_level_hint(),
            Some(LevelFilter::DEBUG)
        );

        let cli = Cli::try_parse_from(["pulse_overlay", "--verbose"]).unwrap();
        assert_eq!(
            default_filter(log_level(&cli)).max_level_hint(),
            Some(LevelFilter::INFO)
        );

        let cli = Cli::try_parse_from(["pulse_overlay"]).unwrap();
        assert_eq!(
            default_filter(log_level(&cli)).max_level_hint(),
            Some(LevelFilter::WARN)
        );
    }
}

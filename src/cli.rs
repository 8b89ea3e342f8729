use crate::{
    install_prometheus, serve, AppState, CaptureRequest, Config, ScreenshotService,
};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "webshot")]
#[command(about = "Pooled headless-browser screenshot service")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, help = "Configuration file path (JSON)")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Number of browser sessions in the pool")]
    pub pool_size: Option<usize>,

    #[arg(long, global = true, help = "Screenshot timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(long, global = true, help = "Seconds to wait for a free session")]
    pub worker_timeout: Option<u64>,

    #[arg(long, global = true, help = "Cache duration in seconds")]
    pub cache_ttl: Option<u64>,

    #[arg(long, global = true, help = "Disable the response cache")]
    pub no_cache: bool,

    #[arg(long, global = true, help = "Chrome executable path")]
    pub chrome_path: Option<String>,

    #[arg(long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP screenshot service
    Serve {
        #[arg(short, long, help = "Server port")]
        port: Option<u16>,

        #[arg(long, help = "Bind address")]
        bind: Option<String>,

        #[arg(long, help = "Expose Prometheus metrics on /metrics")]
        metrics: bool,
    },

    /// Take a single screenshot and write it to a file
    Capture {
        #[arg(short, long, help = "URL to screenshot")]
        url: String,

        #[arg(long, help = "Viewport width")]
        width: Option<u32>,

        #[arg(long, help = "Viewport height")]
        height: Option<u32>,

        #[arg(short, long, help = "Output file path")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        #[arg(short, long, help = "Configuration file to validate")]
        config: PathBuf,
    },
}

impl Cli {
    /// Apply command-line overrides on top of `config`.
    pub fn apply_overrides(&self, mut config: Config) -> Config {
        if let Some(pool_size) = self.pool_size {
            config.max_sessions = pool_size;
        }
        if let Some(timeout) = self.timeout {
            config.screenshot_timeout = Duration::from_secs(timeout);
        }
        if let Some(wait) = self.worker_timeout {
            config.worker_timeout = Duration::from_secs(wait);
        }
        if let Some(ttl) = self.cache_ttl {
            config.cache_ttl = Duration::from_secs(ttl);
        }
        if self.no_cache {
            config.cache_enabled = false;
        }
        if let Some(chrome_path) = &self.chrome_path {
            config.chrome_path = Some(chrome_path.clone());
        }
        if let Commands::Serve { port, bind, .. } = &self.command {
            if let Some(port) = port {
                config.port = *port;
            }
            if let Some(bind) = bind {
                config.bind = bind.clone();
            }
        }
        config
    }
}

/// Resolve the effective configuration: JSON file or environment, then flags.
pub async fn load_config(args: &Cli) -> anyhow::Result<Config> {
    let base = match &args.config {
        Some(path) => read_config_file(path).await?,
        None => Config::from_env(),
    };

    let config = args.apply_overrides(base);
    config.validate()?;

    info!("Configuration loaded successfully");
    info!("Session pool size: {}", config.max_sessions);
    info!("Screenshot timeout: {:?}", config.screenshot_timeout);
    info!("Worker timeout: {:?}", config.worker_timeout);
    info!(
        "Cache: {} (ttl {:?})",
        if config.cache_enabled { "enabled" } else { "disabled" },
        config.cache_ttl
    );

    Ok(config)
}

async fn read_config_file(path: &Path) -> anyhow::Result<Config> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let config = serde_json::from_str(&content)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(config)
}

pub struct CliRunner {
    pub config: Config,
}

impl CliRunner {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run `command`. `shutdown` resolves when the process is asked to stop.
    pub async fn run<F>(&self, command: Commands, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match command {
            Commands::Serve { metrics, .. } => self.run_server(metrics, shutdown).await,
            Commands::Capture {
                url,
                width,
                height,
                output,
            } => self.run_capture(url, width, height, output).await,
            Commands::Validate { config } => validate_config(config).await,
        }
    }

    pub async fn run_server<F>(&self, metrics: bool, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let service = Arc::new(ScreenshotService::new(self.config.clone()).await?);

        let mut state = AppState::new(service.clone());
        if metrics {
            state = state.with_prometheus(
                install_prometheus().context("installing Prometheus recorder")?,
            );
        }

        let addr = format!("{}:{}", self.config.bind, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding {addr}"))?;

        let served = serve(listener, state, shutdown).await;

        info!("Received shutdown signal, cleaning up...");
        service.shutdown().await;

        served.context("HTTP server failed")
    }

    pub async fn run_capture(
        &self,
        url: String,
        width: Option<u32>,
        height: Option<u32>,
        output: PathBuf,
    ) -> anyhow::Result<()> {
        info!("Taking screenshot of: {}", url);

        // One session is enough for a single capture
        let config = Config {
            max_sessions: 1,
            ..self.config.clone()
        };
        let service = ScreenshotService::new(config).await?;

        let started = Instant::now();
        let request = CaptureRequest {
            url: Some(url.clone()),
            width,
            height,
        };
        let result = service.capture(request).await;
        service.shutdown().await;
        let capture = result?;

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&output, &capture.payload)
            .await
            .with_context(|| format!("writing {}", output.display()))?;
        info!("Screenshot saved to: {}", output.display());

        println!("Screenshot captured successfully:");
        println!("  URL: {url}");
        println!("  Output: {}", output.display());
        println!("  Viewport: {}", capture.viewport);
        println!("  Size: {}", crate::format_bytes(capture.payload.len() as u64));
        println!("  Duration: {}", crate::format_duration(started.elapsed()));

        Ok(())
    }
}

pub async fn validate_config(path: PathBuf) -> anyhow::Result<()> {
    println!("Validating configuration: {}", path.display());

    let config = read_config_file(&path).await?;
    if let Err(e) = config.validate() {
        warn!("Invalid configuration: {}", e);
        return Err(e.into());
    }

    println!("Configuration is valid:");
    println!("  Session pool size: {}", config.max_sessions);
    println!("  Screenshot timeout: {:?}", config.screenshot_timeout);
    println!("  Worker timeout: {:?}", config.worker_timeout);
    println!(
        "  Cache: {} (ttl {:?})",
        config.cache_enabled, config.cache_ttl
    );
    println!("  Default viewport: {}", config.default_viewport());
    println!("  Listen: {}:{}", config.bind, config.port);

    Ok(())
}

/// Install the global tracing subscriber. `RUST_LOG` wins unless `verbose` is set.
pub fn setup_logging(verbose: bool) -> anyhow::Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))?;

    Ok(())
}

mod camera;
mod http;
mod pipeline;
mod session;

use camstream_common::config::{CameraBackend, Config};
use clap::{Parser, ValueEnum};
use session::{CameraSession, SessionError};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "camstream")]
#[command(about = "MJPEG camera streaming server", long_about = None)]
struct Args {
    /// TOML config file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// HTTP port [default: 5000]
    #[arg(long)]
    port: Option<u16>,

    /// Frame width [default: 640]
    #[arg(long)]
    width: Option<u32>,

    /// Frame height [default: 480]
    #[arg(long)]
    height: Option<u32>,

    /// Bind host [default: 0.0.0.0]
    #[arg(long)]
    host: Option<String>,

    /// Camera backend [default: v4l]
    #[arg(long, value_enum)]
    backend: Option<BackendArg>,

    /// Video device path [default: /dev/video0]
    #[arg(long)]
    device: Option<String>,

    /// JPEG quality, 1-100 [default: 50]
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: Option<u8>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    V4l,
    TestPattern,
}

impl From<BackendArg> for CameraBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::V4l => CameraBackend::V4l,
            BackendArg::TestPattern => CameraBackend::TestPattern,
        }
    }
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(width) = self.width {
            config.camera.width = width;
        }
        if let Some(height) = self.height {
            config.camera.height = height;
        }
        if let Some(backend) = self.backend {
            config.camera.backend = backend.into();
        }
        if let Some(device) = self.device {
            config.camera.device = device;
        }
        if let Some(quality) = self.quality {
            config.pipeline.jpeg_quality = quality;
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error("failed to initialize camera: {0}")]
    Camera(#[from] SessionError),
    #[error("failed to bind HTTP listener on {0}: {1}")]
    Bind(String, #[source] std::io::Error),
    #[error("HTTP server error: {0}")]
    Serve(#[source] std::io::Error),
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[tokio::main]
async fn main() {
    let mut args = Args::parse();

    let mut config = match args.config.take() {
        Some(path) => match Config::load(&path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config from {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    args.apply(&mut config);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        backend = ?config.camera.backend,
        device = config.camera.device,
        width = config.camera.width,
        height = config.camera.height,
        quality = config.pipeline.jpeg_quality,
        "starting camstream"
    );

    // Listeners are armed here, before the camera starts.
    let shutdown = shutdown_signal();
    if let Err(e) = run(&config, shutdown).await {
        error!(error = %e, "camstream failed");
        std::process::exit(1);
    }
    info!("camstream exited");
}

/// Start the camera, serve HTTP until `shutdown` resolves, then release the
/// camera. The camera is released on every path out of here.
async fn run<F>(config: &Config, shutdown: F) -> Result<(), AppError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let session = Arc::new(CameraSession::from_config(
        &config.camera,
        config.pipeline.clone(),
    ));
    let mut shutdown = tokio::spawn(shutdown);

    let (width, height) = (config.camera.width, config.camera.height);
    let startup = {
        let session = Arc::clone(&session);
        tokio::task::spawn_blocking(move || session.start(width, height))
    };
    tokio::select! {
        started = startup => started??,
        _ = &mut shutdown => {
            info!("shutdown requested during camera startup");
            // Waits for the in-progress start before releasing.
            stop_session(&session).await;
            return Ok(());
        }
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            stop_session(&session).await;
            return Err(AppError::Bind(addr, e));
        }
    };
    info!(addr, "starting HTTP server");

    let app = http::router(Arc::clone(&session));
    let graceful = {
        let session = Arc::clone(&session);
        async move {
            if let Err(e) = shutdown.await {
                error!(error = %e, "shutdown listener failed");
            }
            info!("shutting down");
            // Open streams end once streaming is cleared, which lets the
            // server finish draining connections.
            stop_session(&session).await;
        }
    };
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(graceful)
        .await;

    stop_session(&session).await;
    served.map_err(AppError::Serve)
}

async fn stop_session(session: &Arc<CameraSession>) {
    let session = Arc::clone(session);
    if let Err(e) = tokio::task::spawn_blocking(move || session.stop()).await {
        error!(error = %e, "spawn_blocking failed");
    }
}

/// Registers the SIGINT and SIGTERM listeners immediately. The returned
/// future resolves when either signal arrives.
#[cfg(unix)]
fn shutdown_signal() -> impl Future<Output = ()> + Send + 'static {
    use tokio::signal::unix::{signal, SignalKind};

    let interrupt = signal(SignalKind::interrupt());
    let terminate = signal(SignalKind::terminate());
    async move {
        let interrupt = async {
            match interrupt {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "failed to listen for SIGINT");
                    std::future::pending::<()>().await;
                }
            }
        };
        let terminate = async {
            match terminate {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };
        tokio::select! {
            _ = interrupt => {},
            _ = terminate => {},
        }
    }
}

#[cfg(not(unix))]
fn shutdown_signal() -> impl Future<Output = ()> + Send + 'static {
    async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    }
}

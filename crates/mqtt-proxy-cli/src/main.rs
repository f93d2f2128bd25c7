//! MQTT Intercepting Proxy CLI
//!
//! A TCP proxy that sits between MQTT clients and a broker and runs every
//! packet through a configurable sample handler.

use std::sync::Arc;

use anyhow::{bail, Context as _};
use clap::Parser;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mqtt_proxy_core::config::{HandlerKind, LoggingConfig, ProxyConfig};
use mqtt_proxy_core::handlers::build_handler;
use mqtt_proxy_core::metrics::{MetricsInterceptor, ProxyMetrics};
use mqtt_proxy_core::network::ProxyListener;

/// Intercepting MQTT proxy.
#[derive(Parser)]
#[command(name = "mqtt-proxy")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<String>,

    /// Override listen address.
    #[arg(long)]
    listen: Option<String>,

    /// Override broker address.
    #[arg(long)]
    broker: Option<String>,

    /// Override sample handler (simple, translator, injector, user_injector,
    /// host_translator).
    #[arg(long)]
    handler: Option<HandlerKind>,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = load_config(&args)?;

    // Override log level from verbosity flag
    let log_config = match args.verbose {
        0 => config.logging.clone(),
        1 => LoggingConfig {
            level: "debug".to_string(),
            ..config.logging.clone()
        },
        _ => LoggingConfig {
            level: "trace".to_string(),
            ..config.logging.clone()
        },
    };

    setup_tracing(&log_config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.listen.address,
        broker = %config.broker.address(),
        handler = %config.handler.kind,
        tls = config.listen.tls.is_some(),
        "starting mqtt proxy"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move { run_proxy(config).await })
}

fn load_config(args: &Args) -> anyhow::Result<ProxyConfig> {
    let mut config = match (&args.config, &args.broker) {
        (Some(path), _) => ProxyConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {path}"))?,
        (None, Some(broker)) => ProxyConfig::new(broker.clone()),
        (None, None) => bail!("either --config or --broker is required"),
    };

    // Apply CLI overrides
    if let Some(listen) = &args.listen {
        config.listen.address.clone_from(listen);
    }
    if let Some(broker) = &args.broker {
        config.broker.address.clone_from(broker);
    }
    if let Some(kind) = args.handler {
        config.handler.kind = kind;
    }

    config.validate()?;
    Ok(config)
}

fn setup_tracing(config: &LoggingConfig) {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer()).init();
    }
}

async fn run_proxy(config: ProxyConfig) -> anyhow::Result<()> {
    let metrics = Arc::new(ProxyMetrics::new());
    let handler = build_handler(&config.handler)?;

    if config.metrics.enabled {
        let metrics_clone = Arc::clone(&metrics);
        let metrics_addr = config.metrics.address.clone();
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(&metrics_addr, metrics_clone).await {
                tracing::error!(error = %e, "metrics server error");
            }
        });
    }

    let listener = ProxyListener::new(config, handler)?
        .with_interceptor(Arc::new(MetricsInterceptor::new(Arc::clone(&metrics))))
        .with_metrics(metrics);
    let shutdown_handle = listener.shutdown_handle();

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received, stopping proxy");
        shutdown_handle.cancel();
    });

    listener.run().await?;

    info!("proxy shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

async fn start_metrics_server(
    addr: &str,
    metrics: Arc<ProxyMetrics>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    let addr: SocketAddr = addr.parse()?;
    let listener = TcpListener::bind(addr).await?;

    info!(address = %addr, "metrics server listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = Arc::clone(&metrics);

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let metrics = Arc::clone(&metrics);
                async move {
                    let mut response = if req.uri().path() == "/metrics" {
                        Response::new(Full::new(Bytes::from(
                            metrics.encode().unwrap_or_default(),
                        )))
                    } else {
                        Response::new(Full::new(Bytes::from_static(b"not found")))
                    };
                    if req.uri().path() != "/metrics" {
                        *response.status_mut() = StatusCode::NOT_FOUND;
                    }
                    Ok::<_, hyper::Error>(response)
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(error = %e, "metrics connection error");
            }
        });
    }
}

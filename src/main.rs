// src/main.rs
use anyhow::Result;
use clap::Parser;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use failover_lb::{
    config::{self, Config, SelectionPolicy},
    health::HealthChecker,
    load_balancer::create_load_balancer,
    metrics::MetricsRegistry,
    proxy::{BackendPool, Dispatcher, HttpForwarder},
    server::{RequestHandler, ServerBuilder},
};

/// Round-robin HTTP load balancer with health checks and failover.
#[derive(Parser, Debug)]
#[command(name = "failover-lb")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Backend servers, separated by commas
    /// Example: -s http://localhost:3031,http://localhost:3032
    #[arg(short = 's', long = "servers")]
    servers: Option<String>,

    /// Port to listen on (default 8080)
    #[arg(short, long)]
    port: Option<u16>,

    /// YAML or JSON config file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend selection policy
    #[arg(long, value_enum)]
    policy: Option<SelectionPolicy>,

    /// Seconds between health check rounds
    #[arg(long)]
    health_interval: Option<u64>,

    /// Seconds before a health probe gives up
    #[arg(long)]
    probe_timeout: Option<u64>,

    /// Serve prometheus metrics on this port
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Log level: trace, debug, info, warn, error (RUST_LOG takes precedence)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level))
                .add_directive("hyper=info".parse()?),
        )
        .init();

    let config = build_config(&args).await?;
    config.validate()?;

    let metrics_registry = if config.metrics.enabled {
        Some(Arc::new(MetricsRegistry::new()?))
    } else {
        None
    };
    let metrics = metrics_registry.as_ref().map(|r| r.collector());

    // Backend pool, built once and shared
    let pool = Arc::new(BackendPool::from_urls(config.servers.clone()));

    let balancer = create_load_balancer(config.policy);
    let forwarder = Arc::new(HttpForwarder::new(config.retry.forward_timeout()));
    let mut dispatcher = Dispatcher::new(pool.clone(), balancer, forwarder, config.retry.clone())
        .with_max_body_bytes(config.max_body_bytes);
    if let Some(metrics) = &metrics {
        dispatcher = dispatcher.with_metrics(metrics.clone());
    }
    let dispatcher = Arc::new(dispatcher);

    // Start health checker
    let health_checker = Arc::new(HealthChecker::new(
        config.health_check.clone(),
        pool.clone(),
        metrics.clone(),
    ));
    tokio::spawn(health_checker.clone().start());

    if let Some(registry) = metrics_registry {
        let metrics_addr: SocketAddr = ([0, 0, 0, 0], config.metrics.port).into();
        start_metrics_server(metrics_addr, registry, config.metrics.path.clone());
    }

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    info!(
        backends = pool.len(),
        policy = %config.policy,
        "Starting load balancer on {}",
        addr
    );

    ServerBuilder::new(addr)
        .with_handler(RequestHandler::new(dispatcher))
        .serve(shutdown_signal())
        .await?;

    health_checker.shutdown();
    Ok(())
}

/// Defaults, then the config file, then command line flags.
async fn build_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            config::load_config(path).await?
        }
        None => Config::default(),
    };

    if let Some(servers) = &args.servers {
        config.servers = config::parse_server_list(servers)?;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(policy) = args.policy {
        config.policy = policy;
    }
    if let Some(secs) = args.health_interval {
        config.health_check.interval_secs = secs;
    }
    if let Some(secs) = args.probe_timeout {
        config.health_check.timeout_secs = secs;
    }
    if let Some(port) = args.metrics_port {
        config.metrics.enabled = true;
        config.metrics.port = port;
    }

    Ok(config)
}

fn start_metrics_server(addr: SocketAddr, registry: Arc<MetricsRegistry>, path: String) {
    let metrics_path = Arc::new(path);
    let service_path = metrics_path.clone();

    let make_service = hyper::service::make_service_fn(move |_| {
        let registry = registry.clone();
        let path = service_path.clone();

        async move {
            Ok::<_, Infallible>(hyper::service::service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                let path = path.clone();

                async move {
                    let mut response = Response::new(Body::empty());
                    if req.uri().path() != path.as_str() {
                        *response.status_mut() = StatusCode::NOT_FOUND;
                        return Ok::<_, Infallible>(response);
                    }

                    match registry.gather() {
                        Ok(metrics) => {
                            *response.body_mut() = Body::from(metrics);
                            response.headers_mut().insert(
                                CONTENT_TYPE,
                                HeaderValue::from_static("text/plain; version=0.0.4"),
                            );
                        }
                        Err(e) => {
                            error!("Failed to encode metrics: {}", e);
                            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                        }
                    }
                    Ok(response)
                }
            }))
        }
    });

    info!(
        "Metrics server listening on http://{}{}",
        addr,
        metrics_path.as_str()
    );

    tokio::spawn(async move {
        match Server::try_bind(&addr) {
            Ok(builder) => {
                if let Err(e) = builder.serve(make_service).await {
                    error!("Metrics server error: {}", e);
                }
            }
            Err(e) => error!("Metrics server could not bind {}: {}", addr, e),
        }
    });
}

// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

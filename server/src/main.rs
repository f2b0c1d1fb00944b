use fincache_server::agent::memory::MemoryCacheStore;
use fincache_server::agent::sqlite::SqliteCacheStore;
use fincache_server::{AgentConfig, AgentState, CacheStore, UpstreamFetcher, server};
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use std::error::Error;
use std::io;
use std::sync::Arc;
use tower::Service;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fincache_server=debug".into()),
        )
        .init();

    let config = AgentConfig::from_env()?;

    // STORAGE_DIR holds cache.db; without it the cache lives only as long as the process
    let store: Arc<dyn CacheStore> = match &config.storage_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let db_path = dir.join("cache.db");
            info!("💾 Cache database: {}", db_path.display());
            Arc::new(SqliteCacheStore::new(&db_path)?)
        }
        None => {
            info!("💾 Using in-memory cache store");
            Arc::new(MemoryCacheStore::new())
        }
    };
    let network = Arc::new(UpstreamFetcher::new(&config.upstream, config.upstream_timeout)?);

    let listen_addr = config.listen_addr;
    let upstream = config.upstream.clone();
    let state = Arc::new(AgentState::new(config, store, network));

    // The proxy still serves from the network when the install fails
    if let Err(e) = state.install_configured().await {
        warn!("⚠️ Initial install failed: {}", e);
    }

    // Create and run the server
    let app = server::create_app(state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!(
        "Fincache agent listening on http://{} (HTTP/1.1 + HTTP/2), upstream {}",
        listen_addr, upstream
    );

    // Use hyper's auto-negotiating server to support both HTTP/1.1 and HTTP/2
    let conn_builder = ConnBuilder::new(hyper_util::rt::TokioExecutor::new());

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                continue;
            }
        };
        debug!("New connection from: {}", addr);
        let io = TokioIo::new(stream);
        let app_clone = app.clone();
        let conn_builder = conn_builder.clone();

        tokio::spawn(async move {
            if let Err(err) = conn_builder
                .serve_connection_with_upgrades(
                    io,
                    hyper::service::service_fn(move |req| app_clone.clone().call(req)),
                )
                .await
            {
                // Check if the error is an io::Error indicating a normal close
                let is_normal_close = err
                    .source()
                    .and_then(|e| e.downcast_ref::<io::Error>())
                    .map(|io_err| {
                        matches!(
                            io_err.kind(),
                            io::ErrorKind::ConnectionReset
                                | io::ErrorKind::BrokenPipe
                                | io::ErrorKind::UnexpectedEof
                        )
                    })
                    .unwrap_or(false);

                if is_normal_close {
                    debug!("Connection from {} closed normally", addr);
                } else {
                    error!("Error serving connection from {}: {}", addr, err);
                }
            } else {
                debug!("Connection from {} completed successfully", addr);
            }
        });
    }
}

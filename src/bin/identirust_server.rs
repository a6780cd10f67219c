use identirust::config::{ConfigOverrides, ServerOverrides, StorageOverrides};
use identirust::{IdentiConfig, Identirust, StorageBackend};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn parse_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

fn has_flag(flag: &str) -> bool {
    std::env::args().any(|arg| arg == flag)
}

fn print_help() {
    eprintln!(
        r#"identirust_server - identity reconciliation HTTP service

USAGE:
    identirust_server [OPTIONS]

OPTIONS:
    -c, --config <FILE>      Path to config file (TOML)
    -l, --listen <ADDR>      Override listen address [default: 127.0.0.1:3000]
        --backend <KIND>     Contact store: memory | rocksdb [default: memory]
        --data-dir <DIR>     RocksDB data directory [default: ./identirust-data]
    -h, --help               Print help

ENVIRONMENT:
    IDENTIRUST_CONFIG                Path to config file
    IDENTIRUST_SERVER__LISTEN        Listen address
    IDENTIRUST_STORAGE__BACKEND      Contact store backend
    IDENTIRUST_STORAGE__DATA_DIR     RocksDB data directory
    IDENTIRUST_RETRY__MAX_ATTEMPTS   Attempts per request before answering 503
    RUST_LOG                         Log filter, overrides logging.filter

CONFIG FILE (identirust.toml):
    [server]
    listen = "0.0.0.0:3000"

    [storage]
    backend = "rocksdb"
    data_dir = "/var/lib/identirust"
"#
    );
}

fn parse_backend(value: &str) -> anyhow::Result<StorageBackend> {
    match value {
        "memory" => Ok(StorageBackend::Memory),
        "rocksdb" => Ok(StorageBackend::Rocksdb),
        other => anyhow::bail!("unknown storage backend {other:?}, expected memory or rocksdb"),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if has_flag("-h") || has_flag("--help") {
        print_help();
        return Ok(());
    }

    // Build CLI overrides
    let mut overrides = ConfigOverrides::default();
    if let Some(listen) = parse_arg("--listen").or_else(|| parse_arg("-l")) {
        overrides.server = Some(ServerOverrides {
            listen: Some(listen.parse()?),
        });
    }

    let mut storage_overrides = StorageOverrides::default();
    if let Some(backend) = parse_arg("--backend") {
        storage_overrides.backend = Some(parse_backend(&backend)?);
    }
    if let Some(data_dir) = parse_arg("--data-dir") {
        storage_overrides.data_dir = Some(data_dir.into());
    }
    if storage_overrides.backend.is_some() || storage_overrides.data_dir.is_some() {
        overrides.storage = Some(storage_overrides);
    }

    // Load config: CLI > Env > File > Defaults
    let config_path = parse_arg("--config")
        .or_else(|| parse_arg("-c"))
        .or_else(|| std::env::var("IDENTIRUST_CONFIG").ok());
    let config = IdentiConfig::load(config_path.as_deref(), overrides)?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.filter))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let service = Identirust::from_config(&config)?;
    info!(
        backend = ?config.storage.backend,
        data_dir = %config.storage.data_dir.display(),
        max_attempts = config.retry.max_attempts,
        "contact store ready"
    );

    let listener = TcpListener::bind(config.server.listen).await?;
    info!(listen = %config.server.listen, "identirust listening");
    axum::serve(listener, identirust::http::router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use identirust::config::{
    listen_addr_for_port, ConfigOverrides, IdentirustConfig, ServerOverrides, StorageOverrides,
};
use identirust::{http, Identirust};
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

fn print_usage() {
    println!(
        "Usage: identirust_server [--config PATH] [--listen ADDR] [--data-dir PATH] [--repair]\n\
         \n\
         Environment:\n  \
           IDENTIRUST_CONFIG     config file path when --config is absent\n  \
           PORT                  listen port on 0.0.0.0 when --listen is absent\n  \
           IDENTIRUST_*          section overrides, e.g. IDENTIRUST_STORAGE__DATA_DIR\n  \
           RUST_LOG              log filter (default: info)"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if has_flag("-h") || has_flag("--help") {
        print_usage();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = parse_arg("--config")
        .or_else(|| parse_arg("-c"))
        .or_else(|| std::env::var("IDENTIRUST_CONFIG").ok());

    let listen: Option<SocketAddr> = match parse_arg("--listen") {
        Some(raw) => Some(raw.parse()?),
        None => match std::env::var("PORT") {
            Ok(port) => Some(listen_addr_for_port(&port)?),
            Err(_) => None,
        },
    };
    let data_dir: Option<PathBuf> = parse_arg("--data-dir").map(Into::into);
    let repair = has_flag("--repair").then_some(true);

    let overrides = ConfigOverrides {
        server: listen.map(|listen| ServerOverrides {
            listen: Some(listen),
        }),
        storage: (data_dir.is_some() || repair.is_some())
            .then_some(StorageOverrides { data_dir, repair }),
    };
    let config = IdentirustConfig::load(config_path.as_deref(), overrides)?;

    let identirust = Arc::new(Identirust::open(&config)?);
    http::serve(identirust, config.server.listen).await
}

use clap::Parser;
use env_logger::Env;
use log::info;
use runvault::{
    ArchiveHttpServer, ArchiveHttpServerConfig, ArchiveService, FilterEnv, RecordStore, StoreConfig,
};
use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "runvault-server", about = "Archive server for pipeline execution records")]
struct Args {
    /// Address the HTTP API listens on
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Path to the SQLite database file
    #[arg(long, default_value = "runvault.db")]
    db: PathBuf,

    /// Maximum concurrent connections
    #[arg(long)]
    max_connections: Option<usize>,

    /// env_logger-style filter string (e.g. "info,runvault=debug"); overrides RUST_LOG
    #[arg(long)]
    log: Option<String>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let env = match &args.log {
        Some(filter) => Env::default().default_filter_or(filter.clone()),
        None => Env::default().default_filter_or("info"),
    };
    env_logger::Builder::from_env(env).init();

    let store = RecordStore::open(&StoreConfig::new(&args.db))?;
    let service = Arc::new(ArchiveService::new(
        Arc::new(store),
        Arc::new(FilterEnv::new()),
    ));
    let _handle = ArchiveHttpServer::spawn(
        ArchiveHttpServerConfig {
            bind: args.bind,
            max_connections: args.max_connections,
        },
        service,
    )?;
    info!("event=archive_server_started bind={} db={}", args.bind, args.db.display());

    // The accept loop owns its own threads; park the main thread until the
    // process is terminated.
    loop {
        thread::sleep(Duration::from_secs(3600));
    }
}

use std::{
    net::{Ipv4Addr, SocketAddrV4},
    sync::Arc,
};

use tokio::net::TcpListener;
use tracing::{info, warn};

use revealcache::{
    logging::{self, Verbosity},
    server, Config, FileStorage, MemoryStorage, RevealStore, Storage,
};

const ADDRESS: Ipv4Addr = Ipv4Addr::LOCALHOST;

fn open_storage(config: &Config) -> Arc<dyn Storage> {
    match config.dir() {
        Some(dir) => match FileStorage::open(&dir) {
            Ok(storage) => {
                info!(dir = %dir.display(), "persisting reveals to disk");
                Arc::new(storage)
            }
            Err(e) => {
                // The store sees a dead backend and stays in memory.
                warn!(dir = %dir.display(), error = %e, "cannot open storage directory");
                Arc::new(MemoryStorage::disabled())
            }
        },
        None => Arc::new(MemoryStorage::new()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_args(std::env::args().skip(1))?;
    logging::init_subscriber(Verbosity::from_flags(config.verbose, config.quiet));

    let store = Arc::new(RevealStore::new(
        open_storage(&config),
        config.store_config()?,
    ));
    store.start_sweeper()?;

    let listener = TcpListener::bind(SocketAddrV4::new(ADDRESS, config.port()?)).await?;
    info!(addr = %listener.local_addr()?, "revealcache listening");

    let config = Arc::new(config);
    tokio::select! {
        result = server::serve(listener, store.clone(), config) => result?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    store.shutdown().await;
    Ok(())
}

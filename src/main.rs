use std::{net::SocketAddr, sync::Arc};

use anonvoidz::{
    app,
    clock::SystemClock,
    config::Config,
    deletion,
    storage::{FsBucket, ObjectStorage, RestBucket},
    store::{RestStore, SqliteStore, Store},
    AppState,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "anonvoidz=info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&env_filter))
        .init();

    let config = Config::load();
    let (store, storage): (Arc<dyn Store>, Arc<dyn ObjectStorage>) = match &config.store {
        Some((url, key)) => {
            tracing::info!("using hosted store at {url}");
            (
                Arc::new(RestStore::new(url.as_str(), key.as_str())),
                Arc::new(RestBucket::new(url.as_str(), key.as_str(), config.media_bucket.as_str())),
            )
        }
        None => (
            Arc::new(SqliteStore::connect(&config.database_url).await?),
            Arc::new(FsBucket::new(&config.media_dir, config.public_url.as_str())),
        ),
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = AppState::new(store, storage, Arc::new(SystemClock), config);
    tokio::spawn(deletion::janitor(state.clone()));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on {addr}");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

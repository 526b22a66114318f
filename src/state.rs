use std::sync::Arc;

use sqlx::SqlitePool;

use super::{config::Config, database::init_pool, storage::Signer};

pub struct AppState {
    pub config: Config,
    pub pool: SqlitePool,
    pub signer: Signer,
}

impl AppState {
    pub async fn new() -> Arc<Self> {
        let config = Config::load();

        let pool = init_pool(&config.database_url).await;
        let signer = Signer::new(&config.storage_base_url, &config.storage_signing_key);

        Arc::new(Self {
            config,
            pool,
            signer,
        })
    }
}

use serde::{Deserialize, Serialize};

/// Connection settings for the device-record database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    /// Upper bound on pooled connections shared by all sessions of a node
    pub max_pool_size: usize,
}

impl PostgresConfig {
    /// deadpool settings for this database
    pub fn pool_config(&self) -> deadpool_postgres::Config {
        let mut cfg = deadpool_postgres::Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.database.clone());
        cfg.user = Some(self.username.clone());
        cfg.password = Some(self.password.clone());
        cfg.manager = Some(deadpool_postgres::ManagerConfig {
            recycling_method: deadpool_postgres::RecyclingMethod::Fast,
        });
        cfg
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "canopy".to_string(),
            username: "canopy".to_string(),
            password: "canopy".to_string(),
            max_pool_size: 10,
        }
    }
}

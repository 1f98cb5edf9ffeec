use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres connection string. Read from `DATABASE_URL` if the config
    /// file leaves this empty.
    #[serde(default)]
    pub url: String,
    #[serde(default = "d_pool_size")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: d_pool_size(),
        }
    }
}

fn d_pool_size() -> u32 {
    10
}

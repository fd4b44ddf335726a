use clap::Parser;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "sale-service", about = "Flash sale holds, orders and payment settlement")]
pub struct Args {
    /// Postgres connection string. Without it the service keeps state in memory.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Redis connection string for the availability cache. Defaults to an in-process cache.
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    #[arg(long, env = "PORT", default_value = "8000")]
    pub port: u16,

    #[arg(long, env = "DB_POOL_SIZE", default_value = "10")]
    pub db_pool_size: u32,

    /// How long a computed availability figure may be served from cache.
    #[arg(long, env = "AVAILABILITY_CACHE_TTL_MS", default_value = "1000")]
    pub availability_cache_ttl_ms: u64,

    /// Seed the demo flash-sale product on startup.
    #[arg(long, env = "SEED_DEMO", default_value_t = false)]
    pub seed_demo: bool,
}

impl Args {
    pub fn availability_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.availability_cache_ttl_ms)
    }
}

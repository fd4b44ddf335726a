use anyhow::Result;
use bigdecimal::BigDecimal;
use clap::Parser;
use diesel::{Connection, PgConnection};
use diesel_async::pooled_connection::{bb8::Pool, AsyncDieselConnectionManager};
use diesel_async::AsyncPgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use shared::{Clock, Product, SystemClock};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sale_service::api::{self, AppState};
use sale_service::cache::{AvailabilityCache, InMemoryCache, RedisCache};
use sale_service::config::Args;
use sale_service::store::{InMemoryStore, PgStore, Store};
use sale_service::SaleEngine;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

const DEMO_PRODUCT_NAME: &str = "Flash Sale Product";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let cache: Arc<dyn AvailabilityCache> = match &args.redis_url {
        Some(url) => {
            info!("Using Redis availability cache");
            Arc::new(RedisCache::connect(url).await?)
        }
        None => {
            info!("REDIS_URL not set, using in-process availability cache");
            Arc::new(InMemoryCache::new())
        }
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match &args.database_url {
        Some(database_url) => {
            info!("Running database migrations...");
            let mut conn = PgConnection::establish(database_url)?;
            conn.run_pending_migrations(MIGRATIONS)
                .map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
            info!("Migrations completed successfully");

            let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
            let pool = Pool::builder().max_size(args.db_pool_size).build(config).await?;
            let store = Arc::new(PgStore::new(pool));

            if args.seed_demo {
                store.seed_product(&demo_product()?).await?;
            }

            serve(SaleEngine::new(store, cache, clock, args.availability_cache_ttl()), args.port).await
        }
        None => {
            warn!("DATABASE_URL not set, sale state lives in memory and is lost on exit");
            let store = Arc::new(InMemoryStore::new());

            if args.seed_demo && store.product_by_name(DEMO_PRODUCT_NAME).is_none() {
                let product = demo_product()?;
                info!("Seeded product {} ({})", product.name, product.id);
                store.insert_product(product);
            }

            serve(SaleEngine::new(store, cache, clock, args.availability_cache_ttl()), args.port).await
        }
    }
}

fn demo_product() -> Result<Product> {
    Ok(Product::new(DEMO_PRODUCT_NAME, BigDecimal::from_str("49.99")?, 100))
}

async fn serve<S: Store>(engine: SaleEngine<S>, port: u16) -> Result<()> {
    let app = api::create_router(AppState {
        engine: Arc::new(engine),
    });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("Sale service web server started on port {}", port);
    info!("Sale service ready to accept HTTP requests at http://0.0.0.0:{}/products", port);

    axum::serve(listener, app).await?;

    Ok(())
}

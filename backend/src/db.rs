use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use log::{error, info};

use crate::config::AppConfig;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;
pub type DbConnection = PooledConnection<ConnectionManager<PgConnection>>;

pub fn establish_pool(config: &AppConfig) -> Result<DbPool, diesel::r2d2::PoolError> {
    info!(
        "Attempting to connect to database with URL: {}",
        config.redacted_database_url()
    );
    let manager = ConnectionManager::<PgConnection>::new(&config.database_url);
    match Pool::builder()
        .max_size(config.db_pool_size)
        .build(manager)
    {
        Ok(pool) => {
            info!("Database connection pool established successfully");
            Ok(pool)
        }
        Err(e) => {
            error!("Failed to establish database connection pool: {}", e);
            Err(e)
        }
    }
}

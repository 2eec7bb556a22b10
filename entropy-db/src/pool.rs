use diesel::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool, PoolError};

pub type ConnectionPool = Pool<ConnectionManager<PgConnection>>;

pub fn get_pool(max_size: u32) -> Result<ConnectionPool, PoolError> {
    let manager = ConnectionManager::new(crate::postgres_url_from_environment());

    Pool::builder().max_size(max_size).build(manager)
}

/// Pool that establishes connections only on first checkout. Lets
/// components be constructed before the database is reachable.
pub fn lazy_pool(url: &str, max_size: u32) -> ConnectionPool {
    Pool::builder()
        .max_size(max_size)
        .min_idle(Some(0))
        .build_unchecked(ConnectionManager::new(url))
}

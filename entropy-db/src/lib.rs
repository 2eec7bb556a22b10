mod url;
mod schema;
mod pool;

pub mod db;
pub mod migrations;
pub mod models;

pub(crate) use schema::*;

pub use url::*;
pub use pool::{ConnectionPool, get_pool, lazy_pool};
pub use db::ListError;

pub use diesel::r2d2::PoolError;
pub use diesel::{Connection, ConnectionError, PgConnection, QueryResult};

pub type QueryError = diesel::result::Error;

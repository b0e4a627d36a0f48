// Database module: PostgreSQL pool, Redis pool, and repositories.

pub mod pool;
pub mod redis;
pub mod repositories;

pub use pool::DbPool;
pub use redis::RedisPool;

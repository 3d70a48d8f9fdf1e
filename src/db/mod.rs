pub mod kv_store;
pub mod memory_kv;
pub mod redis_config;
pub mod redis_kv;

pub use kv_store::{KvError, KvStore};
pub use memory_kv::MemoryKv;
pub use redis_config::RedisConfig;
pub use redis_kv::{KvHealth, RedisKv};

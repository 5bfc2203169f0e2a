use redis::AsyncCommands;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::cache::CacheService;

const NEARBY_PREFIX: &str = "geo:nearby:";

/// Ключ кеша поиска: хеш канонической query-строки параметров.
///
/// Порядок полей фиксирован структурой, поэтому одинаковые запросы дают одинаковый ключ.
pub fn nearby_key<P: Serialize>(params: &P) -> Option<String> {
    let canonical = serde_urlencoded::to_string(params).ok()?;
    Some(format!("{}{:x}", NEARBY_PREFIX, Sha256::digest(canonical.as_bytes())))
}

impl CacheService {
    /// Получает закешированный результат поиска по ключу.
    pub async fn get_cached_search(&self, key: &str) -> Result<Option<String>, redis::RedisError> {
        let mut conn = self.redis.conn.clone();
        conn.get(key).await
    }

    /// Сохраняет результат поиска в кеш с указанным TTL (в секундах).
    pub async fn cache_search_result(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.redis.conn.clone();
        conn.set_ex(key, value, ttl_seconds).await
    }
}

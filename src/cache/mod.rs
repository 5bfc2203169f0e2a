use crate::redis_client::RedisClient;

pub mod search;

/// Кеш ответов поверх Redis. Ошибки Redis не ломают запрос: вызывающий
/// код просто идёт в базу.
#[derive(Clone)]
pub struct CacheService {
    redis: RedisClient,
}

impl CacheService {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }

    pub async fn ping(&self) -> bool {
        let mut conn = self.redis.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }
}

use crate::registry::cache::Error;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

/// Cache shared by several registry instances through a Redis-compatible server.
#[derive(Debug)]
pub struct RedisBackend {
    client: redis::Client,
    key_prefix: String,
}

impl RedisBackend {
    pub fn new(redis_url: &str, key_prefix: String) -> Result<Self, Error> {
        let client = redis::Client::open(redis_url)?;
        Ok(RedisBackend { client, key_prefix })
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }

    async fn connection(&self) -> Result<MultiplexedConnection, Error> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    pub async fn store(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), Error> {
        let mut conn = self.connection().await?;
        let () = conn.set_ex(self.prefixed(key), value, ttl_secs.max(1)).await?;
        Ok(())
    }

    pub async fn retrieve(&self, key: &str) -> Result<String, Error> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(self.prefixed(key)).await?;
        value.ok_or(Error::Miss)
    }
}

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Script;
use std::time::Duration;

use crate::error::{Error, ErrorDetails};
use crate::quota::store::{QuotaStore, Versioned};

/// Redis-backed store adapter: the durable production backend.
///
/// Each key is a hash holding `version` and `payload` fields. The
/// compare-and-swap runs as a Lua script so the version check and the write
/// are a single atomic step, and `PEXPIRE` gives every key a native TTL —
/// Redis itself evicts fingerprints that go quiet.
pub struct RedisQuotaStore {
    conn: MultiplexedConnection,
    cas_script: Script,
}

impl RedisQuotaStore {
    pub async fn new(url: &str) -> Result<Self, Error> {
        let client = redis::Client::open(url).map_err(|e| {
            Error::new(ErrorDetails::Config {
                message: format!("Failed to create Redis client: {e}"),
            })
        })?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                Error::new(ErrorDetails::Config {
                    message: format!("Failed to get Redis connection: {e}"),
                })
            })?;

        let cas_script = Script::new(
            r#"
            local current = redis.call('HGET', KEYS[1], 'version')
            local expected = tonumber(ARGV[1])

            if (not current and expected == 0)
                or (current and tonumber(current) == expected) then
                redis.call('HSET', KEYS[1], 'version', expected + 1, 'payload', ARGV[2])
                redis.call('PEXPIRE', KEYS[1], ARGV[3])
                return 1
            end
            return 0
            "#,
        );

        Ok(Self { conn, cas_script })
    }
}

#[async_trait]
impl QuotaStore for RedisQuotaStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, Error> {
        let mut conn = self.conn.clone();
        let (version, payload): (Option<u64>, Option<String>) = redis::cmd("HMGET")
            .arg(key)
            .arg("version")
            .arg("payload")
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                Error::new(ErrorDetails::Store {
                    message: format!("Redis HMGET failed for {key}: {e}"),
                })
            })?;

        match (version, payload) {
            (Some(version), Some(payload)) => Ok(Some(Versioned { version, payload })),
            _ => Ok(None),
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<u64>,
        payload: String,
        ttl: Duration,
    ) -> Result<bool, Error> {
        let mut conn = self.conn.clone();
        let applied: i64 = self
            .cas_script
            .key(key)
            .arg(expected.unwrap_or(0))
            .arg(payload)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                Error::new(ErrorDetails::Store {
                    message: format!("Redis CAS script failed for {key}: {e}"),
                })
            })?;

        Ok(applied == 1)
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                Error::new(ErrorDetails::Store {
                    message: format!("Redis DEL failed for {key}: {e}"),
                })
            })?;
        Ok(())
    }
}

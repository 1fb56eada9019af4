//! Redis-backed job state store.
//!
//! Layout: one hash per job at `job:{correlation_id}`, one hash field per
//! [`JobField`]. Every write refreshes the key's TTL so abandoned jobs expire.
//! `take_if_complete` runs as a Lua script, making check-and-delete atomic on
//! the server.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::instrument;

use aurasign_core::{CorrelationId, JobField, JobFields};
use aurasign_events::{JobStateStore, StoreError};

pub const DEFAULT_JOB_TTL: Duration = Duration::from_secs(300);

const KEY_PREFIX: &str = "job:";

const TAKE_IF_COMPLETE: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return false
end
for i = 1, #ARGV do
  if redis.call('HEXISTS', KEYS[1], ARGV[i]) == 0 then
    return false
  end
end
local fields = redis.call('HGETALL', KEYS[1])
redis.call('DEL', KEYS[1])
return fields
"#;

#[derive(Clone)]
pub struct RedisJobStateStore {
    conn: ConnectionManager,
    ttl: Duration,
    take_script: redis::Script,
}

impl RedisJobStateStore {
    /// Connect eagerly so a bad URL or unreachable server fails at startup.
    pub async fn connect(redis_url: impl AsRef<str>, ttl: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(backend)?;
        let conn = ConnectionManager::new(client).await.map_err(backend)?;
        Ok(Self {
            conn,
            ttl,
            take_script: redis::Script::new(TAKE_IF_COMPLETE),
        })
    }

    fn key(correlation_id: &CorrelationId) -> String {
        format!("{KEY_PREFIX}{correlation_id}")
    }
}

fn backend(err: redis::RedisError) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn to_fields<I>(pairs: I) -> Result<JobFields, StoreError>
where
    I: IntoIterator<Item = (String, String)>,
{
    pairs
        .into_iter()
        .map(|(name, value)| {
            name.parse::<JobField>()
                .map(|field| (field, value))
                .map_err(|_| StoreError::Corrupt(format!("unknown job field `{name}`")))
        })
        .collect()
}

/// HGETALL replies are a flat `[field, value, field, value, ...]` list.
fn pairs_from_flat(flat: Vec<String>) -> Vec<(String, String)> {
    let mut iter = flat.into_iter();
    let mut pairs = Vec::new();
    while let (Some(name), Some(value)) = (iter.next(), iter.next()) {
        pairs.push((name, value));
    }
    pairs
}

#[async_trait]
impl JobStateStore for RedisJobStateStore {
    #[instrument(skip(self, value), fields(correlation_id = %correlation_id, field = %field), err)]
    async fn set_field(
        &self,
        correlation_id: &CorrelationId,
        field: JobField,
        value: &str,
    ) -> Result<(), StoreError> {
        let key = Self::key(correlation_id);
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("HSET")
            .arg(&key)
            .arg(field.as_str())
            .arg(value)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(self.ttl.as_secs().max(1))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn get_job(&self, correlation_id: &CorrelationId) -> Result<JobFields, StoreError> {
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = conn
            .hgetall(Self::key(correlation_id))
            .await
            .map_err(backend)?;
        to_fields(raw)
    }

    async fn clear(&self, correlation_id: &CorrelationId) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(Self::key(correlation_id)).await.map_err(backend)?;
        Ok(())
    }

    #[instrument(skip(self, required), fields(correlation_id = %correlation_id), err)]
    async fn take_if_complete(
        &self,
        correlation_id: &CorrelationId,
        required: &[JobField],
    ) -> Result<Option<JobFields>, StoreError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.take_script.key(Self::key(correlation_id));
        for field in required {
            invocation.arg(field.as_str());
        }

        let reply: Option<Vec<String>> = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;

        reply.map(|flat| to_fields(pairs_from_flat(flat))).transpose()
    }
}

//! The admission work queue.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::protocol::{EndpointInfo, SessionRequest};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("malformed session request {payload:?}: {source}")]
    Decode {
        payload: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode reply: {0}")]
    Encode(#[source] serde_json::Error),
}

impl QueueError {
    /// Whether the failure is in the queue itself (retry after backoff) as
    /// opposed to one bad payload.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, QueueError::Unavailable(_) | QueueError::Redis(_))
    }
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Block until the next admission request arrives.
    async fn pop_next_session_request(&self) -> Result<SessionRequest, QueueError>;

    async fn publish_reply(&self, session_id: &str, info: &EndpointInfo) -> Result<(), QueueError>;
}

/// Redis lists: requests are `LPUSH`ed onto `key` and popped oldest first
/// with `BRPOP`; replies are pushed onto a list named by the session id.
pub struct RedisQueue {
    client: redis::Client,
    key: String,
    reply_ttl_secs: u64,
    conn: Mutex<Option<redis::aio::Connection>>,
}

impl RedisQueue {
    pub fn new(url: &str, key: impl Into<String>, reply_ttl_secs: u64) -> Result<Self, QueueError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            key: key.into(),
            reply_ttl_secs,
            conn: Mutex::new(None),
        })
    }

    async fn connection(
        &self,
    ) -> Result<tokio::sync::MutexGuard<'_, Option<redis::aio::Connection>>, QueueError> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            let conn = self.client.get_async_connection().await?;
            tracing::debug!(key = %self.key, "connected to redis");
            *guard = Some(conn);
        }
        Ok(guard)
    }
}

#[async_trait]
impl WorkQueue for RedisQueue {
    async fn pop_next_session_request(&self) -> Result<SessionRequest, QueueError> {
        let mut guard = self.connection().await?;
        let conn = guard
            .as_mut()
            .ok_or_else(|| QueueError::Unavailable("no redis connection".into()))?;

        // Timeout 0 blocks indefinitely.
        let popped: Result<Option<(String, String)>, redis::RedisError> = redis::cmd("BRPOP")
            .arg(&self.key)
            .arg(0)
            .query_async(conn)
            .await;

        let (_, payload) = match popped {
            Ok(Some(item)) => item,
            Ok(None) => return Err(QueueError::Unavailable("BRPOP returned nil".into())),
            Err(e) => {
                // Drop the connection so the next call reconnects.
                *guard = None;
                return Err(e.into());
            }
        };

        serde_json::from_str(&payload).map_err(|source| QueueError::Decode { payload, source })
    }

    async fn publish_reply(&self, session_id: &str, info: &EndpointInfo) -> Result<(), QueueError> {
        let payload = serde_json::to_string(info).map_err(QueueError::Encode)?;
        let mut guard = self.connection().await?;
        let conn = guard
            .as_mut()
            .ok_or_else(|| QueueError::Unavailable("no redis connection".into()))?;

        let result = redis::pipe()
            .cmd("LPUSH")
            .arg(session_id)
            .arg(&payload)
            .ignore()
            .cmd("EXPIRE")
            .arg(session_id)
            .arg(self.reply_ttl_secs)
            .ignore()
            .query_async::<_, ()>(conn)
            .await;

        if let Err(e) = result {
            *guard = None;
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infrastructure_classification() {
        assert!(QueueError::Unavailable("down".into()).is_infrastructure());
        let decode = serde_json::from_str::<SessionRequest>("{").unwrap_err();
        assert!(!QueueError::Decode {
            payload: "{".into(),
            source: decode
        }
        .is_infrastructure());
    }

    #[test]
    fn invalid_url_is_rejected() {
        assert!(RedisQueue::new("not-a-url", "sessions", 60).is_err());
    }
}

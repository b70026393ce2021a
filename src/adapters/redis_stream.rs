//! Redis Streams transport for order messages.
//!
//! Messages are stream entries carrying the raw order JSON in the
//! [`PAYLOAD_FIELD`] field. The consumer reads through a consumer group and
//! acknowledges an entry once the pipeline is done with it.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::ports::{ConsumerError, ConsumerResult, MessageConsumer};

pub const PAYLOAD_FIELD: &str = "payload";

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub stream: String,
    pub group: String,
    pub consumer: String,
    /// How long one `XREADGROUP` blocks before reporting an empty poll.
    pub block: Duration,
}

/// Consumer-group reader.
///
/// An entry is acknowledged only when the next read starts, since the
/// ingestion loop asks for a new message after finishing the previous one.
/// Entries left unacknowledged by a crash, a dropped read or a shutdown stay
/// in this consumer's pending list and are read again, from id `0`, before
/// any new entry.
pub struct RedisStreamConsumer {
    state: Mutex<ConsumerState>,
    settings: StreamSettings,
}

struct ConsumerState {
    conn: Option<MultiplexedConnection>,
    /// Where the next pending-list read resumes. `None` once the list is drained.
    pending_cursor: Option<String>,
    /// Delivered to the pipeline, not yet acknowledged.
    unacked: Option<String>,
}

impl RedisStreamConsumer {
    /// Connects and makes sure the consumer group exists.
    pub async fn connect(redis_url: &str, settings: StreamSettings) -> ConsumerResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;

        // Start from the beginning of the stream so entries published while the
        // service was down are still delivered.
        let created: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(&settings.stream, &settings.group, "0")
            .await;
        match created {
            Ok(()) => tracing::info!(
                stream = %settings.stream,
                group = %settings.group,
                "Created consumer group"
            ),
            Err(e) if e.code() == Some("BUSYGROUP") => {}
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            stream = %settings.stream,
            group = %settings.group,
            consumer = %settings.consumer,
            "Stream consumer connected"
        );

        Ok(Self {
            state: Mutex::new(ConsumerState {
                conn: Some(conn),
                pending_cursor: Some("0".to_string()),
                unacked: None,
            }),
            settings,
        })
    }

    fn read_options(&self, pending: bool) -> StreamReadOptions {
        let options = StreamReadOptions::default()
            .group(&self.settings.group, &self.settings.consumer)
            .count(1);
        if pending {
            options
        } else {
            options.block(self.settings.block.as_millis() as usize)
        }
    }

    async fn acknowledge(&self, conn: &mut MultiplexedConnection, id: &str) -> ConsumerResult<()> {
        let _: i64 = conn
            .xack(&self.settings.stream, &self.settings.group, &[id])
            .await?;
        tracing::debug!(entry_id = %id, "Acknowledged entry");
        Ok(())
    }
}

fn first_entry(reply: Option<StreamReadReply>) -> Option<StreamId> {
    reply
        .into_iter()
        .flat_map(|r| r.keys)
        .flat_map(|k| k.ids)
        .next()
}

#[async_trait]
impl MessageConsumer for RedisStreamConsumer {
    async fn read_message(&self) -> ConsumerResult<Vec<u8>> {
        let (mut conn, unacked) = {
            let mut state = self.state.lock().await;
            let conn = state.conn.clone().ok_or(ConsumerError::Closed)?;
            (conn, state.unacked.take())
        };

        if let Some(id) = unacked {
            if let Err(e) = self.acknowledge(&mut conn, &id).await {
                self.state.lock().await.unacked = Some(id);
                return Err(e);
            }
        }

        let mut entry = None;
        let cursor = self.state.lock().await.pending_cursor.clone();
        if let Some(cursor) = cursor {
            let reply: Option<StreamReadReply> = conn
                .xread_options(&[&self.settings.stream], &[&cursor], &self.read_options(true))
                .await?;
            entry = first_entry(reply);

            let mut state = self.state.lock().await;
            match &entry {
                Some(found) => {
                    tracing::info!(entry_id = %found.id, "Redelivering pending entry");
                    state.pending_cursor = Some(found.id.clone());
                }
                None => {
                    tracing::debug!(stream = %self.settings.stream, "Pending entries drained");
                    state.pending_cursor = None;
                }
            }
        }

        let entry = match entry {
            Some(entry) => entry,
            None => {
                let reply: Option<StreamReadReply> = conn
                    .xread_options(&[&self.settings.stream], &[">"], &self.read_options(false))
                    .await?;
                first_entry(reply).ok_or(ConsumerError::Timeout)?
            }
        };

        self.state.lock().await.unacked = Some(entry.id.clone());

        match entry.get::<Vec<u8>>(PAYLOAD_FIELD) {
            Some(payload) => {
                tracing::debug!(entry_id = %entry.id, bytes = payload.len(), "Received message");
                Ok(payload)
            }
            None => {
                // Hand an empty payload downstream; decoding rejects and logs it.
                tracing::warn!(entry_id = %entry.id, "Stream entry has no payload field");
                Ok(Vec::new())
            }
        }
    }

    /// The last delivered entry stays pending; it may still be in flight.
    async fn close(&self) -> ConsumerResult<()> {
        if self.state.lock().await.conn.take().is_some() {
            tracing::info!(stream = %self.settings.stream, "Stream consumer closed");
        }
        Ok(())
    }
}

/// Appends raw order messages to the stream.
pub struct RedisStreamProducer {
    conn: MultiplexedConnection,
    stream: String,
}

impl RedisStreamProducer {
    pub async fn connect(redis_url: &str, stream: impl Into<String>) -> redis::RedisResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            stream: stream.into(),
        })
    }

    /// Returns the id Redis assigned to the new entry.
    pub async fn publish(&self, payload: &[u8]) -> redis::RedisResult<String> {
        let mut conn = self.conn.clone();
        let id: String = conn
            .xadd(&self.stream, "*", &[(PAYLOAD_FIELD, payload)])
            .await?;
        tracing::debug!(stream = %self.stream, entry_id = %id, "Published message");
        Ok(id)
    }
}

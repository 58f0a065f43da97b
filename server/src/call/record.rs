//! Call Record Sinks
//!
//! Terminal sessions are handed to a [`CallRecordSink`] for history and
//! downstream processing (persistence, transcription). Delivery is
//! fire-and-forget and at-most-once.

use chrono::{DateTime, Utc};
use fred::interfaces::PubsubInterface;
use fred::prelude::*;
use sb_common::{CallOutcome, Identity, RoomId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// History entry for one finished call attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    pub room_id: RoomId,
    pub caller: Identity,
    pub callee: Identity,
    pub started_at: DateTime<Utc>,
    /// When the callee accepted, if ever.
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
    pub outcome: CallOutcome,
    /// Seconds since acceptance; zero for calls never answered.
    pub duration_seconds: u64,
}

/// Consumer of terminal call records.
///
/// `record` must not block. Implementations that do I/O spawn it.
pub trait CallRecordSink: Send + Sync + 'static {
    fn record(&self, record: CallRecord);
}

/// Writes each record as a structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl CallRecordSink for TracingSink {
    fn record(&self, record: CallRecord) {
        info!(
            room_id = %record.room_id,
            caller = %record.caller.key(),
            callee = %record.callee.key(),
            outcome = ?record.outcome,
            duration_seconds = record.duration_seconds,
            "Call record"
        );
    }
}

/// Publishes each record as JSON on a Redis channel.
#[derive(Clone)]
pub struct RedisSink {
    client: Client,
    channel: String,
}

impl RedisSink {
    /// Connect to Redis and publish records on `channel`.
    pub async fn connect(
        redis_url: &str,
        channel: impl Into<String>,
    ) -> Result<Self, fred::error::Error> {
        let config = Config::from_url(redis_url)?;
        let client = Client::new(config, None, None, None);
        client.connect();
        client.wait_for_connect().await?;

        info!("Connected to Redis for call records");
        Ok(Self {
            client,
            channel: channel.into(),
        })
    }
}

impl CallRecordSink for RedisSink {
    fn record(&self, record: CallRecord) {
        let client = self.client.clone();
        let channel = self.channel.clone();

        tokio::spawn(async move {
            let payload = match serde_json::to_string(&record) {
                Ok(p) => p,
                Err(e) => {
                    warn!(room_id = %record.room_id, error = %e, "Failed to serialize call record");
                    return;
                }
            };

            if let Err(e) = client.publish::<(), _, _>(&channel, payload).await {
                warn!(room_id = %record.room_id, error = %e, "Failed to publish call record");
            }
        });
    }
}

/// Forwards records into an in-process channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<CallRecord>,
}

impl ChannelSink {
    /// Create a sink and the receiver it feeds.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CallRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl CallRecordSink for ChannelSink {
    fn record(&self, record: CallRecord) {
        if self.tx.send(record).is_err() {
            warn!("Call record receiver dropped");
        }
    }
}

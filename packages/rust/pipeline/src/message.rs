//! Typed message contracts between pipeline stages.
//!
//! Every stage boundary carries one of the [`Message`] variants, serialized
//! with an explicit `type` tag so consumers can validate payloads instead of
//! pattern-matching string-keyed maps. Messages travel inside an
//! [`Envelope`] that records the delivery attempt, making retry bounds
//! explicit rather than implied by requeue loops.

use pagewatch_shared::{JobId, PageWatchError, Result, RunId, SnapshotId};
use serde::{Deserialize, Serialize};

/// Stage-addressed queue a message is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    /// Consumed by the Fetch Stage.
    Fetch,
    /// Consumed by the Parse Stage.
    Parse,
    /// Consumed by the Change-Detection Stage.
    Detect,
}

impl Topic {
    /// All topics in pipeline order.
    pub const ALL: [Topic; 3] = [Topic::Fetch, Topic::Parse, Topic::Detect];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Parse => "parse",
            Self::Detect => "detect",
        }
    }
}

/// One pipeline message. The serialized form carries a `type` tag matching
/// the wire names below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Message {
    /// Orchestrator → Fetch Stage: retrieve content for a run.
    StartFetch {
        job_id: JobId,
        run_id: RunId,
        url: String,
    },
    /// Fetch Stage → Parse Stage: raw content, emitted on success only.
    RawContent {
        job_id: JobId,
        run_id: RunId,
        url: String,
        content: String,
    },
    /// Parse Stage → Change-Detection Stage: published only after the
    /// snapshot write committed.
    SnapshotReady {
        job_id: JobId,
        run_id: RunId,
        url: String,
        version: u32,
        snapshot_id: SnapshotId,
    },
}

impl Message {
    /// The queue this message is addressed to.
    pub fn topic(&self) -> Topic {
        match self {
            Self::StartFetch { .. } => Topic::Fetch,
            Self::RawContent { .. } => Topic::Parse,
            Self::SnapshotReady { .. } => Topic::Detect,
        }
    }

    /// The run this message belongs to.
    pub fn run_id(&self) -> RunId {
        match self {
            Self::StartFetch { run_id, .. }
            | Self::RawContent { run_id, .. }
            | Self::SnapshotReady { run_id, .. } => *run_id,
        }
    }

    /// The job this message belongs to.
    pub fn job_id(&self) -> JobId {
        match self {
            Self::StartFetch { job_id, .. }
            | Self::RawContent { job_id, .. }
            | Self::SnapshotReady { job_id, .. } => *job_id,
        }
    }

    /// Parse and validate a wire payload at the consumer boundary.
    ///
    /// [`MemoryBroker`](crate::MemoryBroker) moves typed values in-process
    /// and never produces a malformed payload; this is the contract for a
    /// broker adapter with a real wire format (JSON bodies over a network
    /// queue). Such an adapter decodes before dispatch and dead-letters a
    /// payload this rejects instead of delivering it.
    pub fn decode(payload: &str) -> Result<Self> {
        serde_json::from_str(payload)
            .map_err(|e| PageWatchError::validation(format!("malformed message: {e}")))
    }

    /// Serialize to the wire form.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| PageWatchError::validation(format!("message serialization: {e}")))
    }
}

/// A message together with its delivery-attempt counter. The first delivery
/// is attempt 1; the broker increments on every redelivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub message: Message,
    pub attempt: u32,
}

impl Envelope {
    /// Wrap a message for first delivery.
    pub fn first(message: Message) -> Self {
        Self {
            message,
            attempt: 1,
        }
    }

    /// The same message, one attempt later.
    pub fn redelivered(self) -> Self {
        Self {
            message: self.message,
            attempt: self.attempt + 1,
        }
    }
}

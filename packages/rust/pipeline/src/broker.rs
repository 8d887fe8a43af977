//! Broker abstraction over at-least-once, stage-addressed queues.
//!
//! The [`Broker`] trait is what stages are written against; implementations
//! are constructed explicitly and injected, never reached through process
//! globals. Consumers settle every delivery with an explicit
//! [`Disposition`]: acknowledge, requeue for another attempt, or dead-letter
//! a payload that can never be processed.
//!
//! [`MemoryBroker`] is the in-process implementation used by the CLI driver
//! and tests. It redelivers retried envelopes with an incremented attempt
//! counter, which is exactly the at-least-once behavior handlers must
//! tolerate.

use std::collections::{HashMap, VecDeque};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use pagewatch_shared::Result;

use crate::message::{Envelope, Message, Topic};

/// How a consumer settles a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processing durably completed (or was a terminal no-op); remove the
    /// message from redelivery.
    Ack,
    /// Nothing durable changed; redeliver with an incremented attempt.
    Retry,
    /// The payload can never be processed (unknown run, malformed body);
    /// park it for inspection instead of looping.
    DeadLetter,
}

/// Queue transport used by the pipeline stages.
pub trait Broker: Send + Sync {
    /// Publish a message to its stage's queue, first attempt.
    fn publish(&self, message: Message) -> impl Future<Output = Result<()>> + Send;

    /// Take the next pending delivery for a topic, if any. The delivery is
    /// in flight until settled.
    fn next(&self, topic: Topic) -> impl Future<Output = Result<Option<Envelope>>> + Send;

    /// Settle an in-flight delivery.
    fn settle(
        &self,
        envelope: Envelope,
        disposition: Disposition,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// In-process broker backed by per-topic queues.
#[derive(Default)]
pub struct MemoryBroker {
    queues: Mutex<HashMap<Topic, VecDeque<Envelope>>>,
    dead_letters: Mutex<Vec<Envelope>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending deliveries across all topics.
    pub async fn pending(&self) -> usize {
        self.queues.lock().await.values().map(VecDeque::len).sum()
    }

    /// Dead-lettered envelopes, oldest first.
    pub async fn dead_letters(&self) -> Vec<Envelope> {
        self.dead_letters.lock().await.clone()
    }

    /// Requeue an envelope as-is. Test hook for simulating redelivery of a
    /// message that was already processed once.
    pub async fn requeue(&self, envelope: Envelope) {
        let topic = envelope.message.topic();
        self.queues
            .lock()
            .await
            .entry(topic)
            .or_default()
            .push_back(envelope);
    }
}

impl Broker for MemoryBroker {
    async fn publish(&self, message: Message) -> Result<()> {
        let topic = message.topic();
        debug!(topic = topic.as_str(), "publish");
        self.queues
            .lock()
            .await
            .entry(topic)
            .or_default()
            .push_back(Envelope::first(message));
        Ok(())
    }

    async fn next(&self, topic: Topic) -> Result<Option<Envelope>> {
        Ok(self
            .queues
            .lock()
            .await
            .get_mut(&topic)
            .and_then(VecDeque::pop_front))
    }

    async fn settle(&self, envelope: Envelope, disposition: Disposition) -> Result<()> {
        match disposition {
            Disposition::Ack => {}
            Disposition::Retry => {
                let redelivered = envelope.redelivered();
                debug!(
                    topic = redelivered.message.topic().as_str(),
                    attempt = redelivered.attempt,
                    "redelivering"
                );
                let topic = redelivered.message.topic();
                self.queues
                    .lock()
                    .await
                    .entry(topic)
                    .or_default()
                    .push_back(redelivered);
            }
            Disposition::DeadLetter => {
                warn!(
                    topic = envelope.message.topic().as_str(),
                    attempt = envelope.attempt,
                    "dead-lettering message"
                );
                self.dead_letters.lock().await.push(envelope);
            }
        }
        Ok(())
    }
}

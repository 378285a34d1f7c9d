//! Bounded row channels between stage copies.
//!
//! A row channel connects exactly one producer stage copy to one consumer stage
//! copy. It is a strict-FIFO bounded queue: `send` awaits while the channel is
//! full (backpressure) and `recv` awaits while it is empty and not yet done.
//! Fan-out and fan-in are modeled as multiple channel instances, never as a
//! shared multi-reader queue.
//!
//! Backpressure: when the consumer is slow and the buffer fills up,
//! `producer.send(..).await` will wait until there is capacity again.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;

use tokio::sync::mpsc;

use rowflow_common::{Result, RowflowError};
use rowflow_core::{Row, RowSchema};

/// Identity of a channel, used for diagnostics and routing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelId {
    /// Producing stage name.
    pub origin_stage: String,
    /// Producing stage copy index.
    pub origin_copy: u16,
    /// Consuming stage name.
    pub dest_stage: String,
    /// Consuming stage copy index.
    pub dest_copy: u16,
}

impl ChannelId {
    /// Identity for the channel from `origin` copy `origin_copy` to `dest` copy `dest_copy`.
    pub fn new(
        origin_stage: impl Into<String>,
        origin_copy: u16,
        dest_stage: impl Into<String>,
        dest_copy: u16,
    ) -> Self {
        Self {
            origin_stage: origin_stage.into(),
            origin_copy,
            dest_stage: dest_stage.into(),
            dest_copy,
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{}",
            self.origin_stage, self.origin_copy, self.dest_stage, self.dest_copy
        )
    }
}

#[derive(Debug)]
struct ChannelCore {
    id: ChannelId,
    capacity: usize,
    schema: OnceLock<Arc<RowSchema>>,
    done: AtomicBool,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
}

/// Create a bounded row channel of `capacity` rows.
pub fn row_channel(id: ChannelId, capacity: usize) -> (RowProducer, RowConsumer) {
    let (tx, rx) = mpsc::channel::<Row>(capacity.max(1));
    let core = Arc::new(ChannelCore {
        id,
        capacity: capacity.max(1),
        schema: OnceLock::new(),
        done: AtomicBool::new(false),
        enqueued: AtomicU64::new(0),
        dequeued: AtomicU64::new(0),
    });
    (
        RowProducer {
            tx: Some(tx),
            core: Arc::clone(&core),
        },
        RowConsumer { rx, core },
    )
}

/// Producing end of a row channel. Not `Clone`: one producer per channel.
#[derive(Debug)]
pub struct RowProducer {
    tx: Option<mpsc::Sender<Row>>,
    core: Arc<ChannelCore>,
}

impl RowProducer {
    /// Enqueue a row, awaiting while the channel is full.
    ///
    /// Fails when the channel was already marked done (a programming error, not
    /// a data error) or when the consumer side no longer exists.
    pub async fn send(&mut self, row: Row) -> Result<()> {
        let Some(tx) = &self.tx else {
            return Err(RowflowError::Execution(format!(
                "enqueue on channel {} after mark_done",
                self.core.id
            )));
        };
        tx.send(row).await.map_err(|_| {
            RowflowError::Execution(format!("consumer of channel {} is gone", self.core.id))
        })?;
        self.core.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Signal that no more rows will ever be enqueued.
    ///
    /// Idempotent and irreversible. Rows already buffered stay deliverable; the
    /// consumer observes exhaustion once the buffer drains. Wakes blocked
    /// consumers.
    pub fn mark_done(&mut self) {
        if self.tx.take().is_some() {
            self.core.done.store(true, Ordering::Release);
        }
    }

    /// True once [`RowProducer::mark_done`] has been called.
    pub fn is_done(&self) -> bool {
        self.core.done.load(Ordering::Acquire)
    }

    /// Bind the channel's row schema. Set exactly once, during pipeline wiring.
    pub fn bind_schema(&self, schema: Arc<RowSchema>) -> Result<()> {
        self.core.schema.set(schema).map_err(|_| {
            RowflowError::Schema(format!("schema bound twice on channel {}", self.core.id))
        })
    }

    /// Channel identity.
    pub fn id(&self) -> &ChannelId {
        &self.core.id
    }
}

impl Drop for RowProducer {
    fn drop(&mut self) {
        // A dropped producer must never leave its consumer blocked.
        self.mark_done();
    }
}

/// True for the error `send` produces when the consumer side vanished, which
/// during shutdown means the pipeline is already coming down.
pub(crate) fn is_disconnect(e: &RowflowError) -> bool {
    matches!(e, RowflowError::Execution(m) if m.contains("consumer of channel") && m.ends_with("is gone"))
}

/// Consuming end of a row channel. Not `Clone`: one consumer per channel.
#[derive(Debug)]
pub struct RowConsumer {
    rx: mpsc::Receiver<Row>,
    core: Arc<ChannelCore>,
}

impl RowConsumer {
    /// Dequeue the oldest row, awaiting while the channel is empty and not done.
    ///
    /// Returns `None` exactly when the channel is drained *and* marked done,
    /// and forever after. Dequeue transfers exclusive ownership of the row.
    pub async fn recv(&mut self) -> Option<Row> {
        let row = self.rx.recv().await;
        if row.is_some() {
            self.core.dequeued.fetch_add(1, Ordering::Relaxed);
        }
        row
    }

    /// Schema bound to this channel, when wiring has happened.
    pub fn schema(&self) -> Option<Arc<RowSchema>> {
        self.core.schema.get().cloned()
    }

    /// Channel identity.
    pub fn id(&self) -> &ChannelId {
        &self.core.id
    }

    /// Configured capacity in rows.
    pub fn capacity(&self) -> usize {
        self.core.capacity
    }

    /// Total rows enqueued so far.
    pub fn rows_enqueued(&self) -> u64 {
        self.core.enqueued.load(Ordering::Relaxed)
    }

    /// Total rows dequeued so far.
    pub fn rows_dequeued(&self) -> u64 {
        self.core.dequeued.load(Ordering::Relaxed)
    }
}

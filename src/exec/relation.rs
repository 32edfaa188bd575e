//! Relations realize the edges of a task graph at runtime.
//!
//! A relation owns the queue pair of one producer output port: a *data*
//! queue carrying populated buffers downstream and a *recycle* queue
//! returning emptied buffers upstream. The recycle pool is fixed in size, so
//! a producer that outruns its consumers blocks on the recycle queue; this
//! is the credit-based backpressure of the whole engine. Multiple consumer
//! ports attached to one relation compete for buffers on the shared data
//! queue.
//!
//! End-of-stream is signaled in-band with [`Message::PoisonPill`]:
//! [`Relation::push_poison_pill()`] delivers the sentinel exactly once to
//! every attached consumer.

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::resource::Buffer;
use crate::task::TaskRef;

/// An item traveling through a relation queue.
#[derive(Debug)]
pub enum Message {
    /// A data buffer, populated on the data queue, emptied on the recycle
    /// queue.
    Buffer(Buffer),
    /// End-of-stream sentinel. A consumer receiving it forwards it on the
    /// same input's recycle path, pills its own outputs and terminates.
    PoisonPill,
}

impl Message {
    /// True if this message is the end-of-stream sentinel.
    pub fn is_poison_pill(&self) -> bool {
        matches!(self, Message::PoisonPill)
    }
}

/// The runtime realization of one producer output port.
///
/// Created by the scheduler at launch from the graph's edges and owned by it
/// for the duration of the run; workers only hold cloned queue endpoints and
/// borrowed views.
pub struct Relation {
    producer: TaskRef,
    producer_port: usize,
    consumers: Vec<(TaskRef, usize)>,
    data_tx: Sender<Message>,
    data_rx: Receiver<Message>,
    recycle_tx: Sender<Message>,
    recycle_rx: Receiver<Message>,
}

impl Relation {
    /// Create a relation for `producer`'s output port `producer_port`,
    /// without consumers yet.
    pub fn new(producer: TaskRef, producer_port: usize) -> Self {
        let (data_tx, data_rx) = unbounded();
        let (recycle_tx, recycle_rx) = unbounded();
        Relation {
            producer,
            producer_port,
            consumers: Vec::new(),
            data_tx,
            data_rx,
            recycle_tx,
            recycle_rx,
        }
    }

    /// Attach a consumer's input port to this relation.
    pub fn add_consumer(&mut self, consumer: TaskRef, input_port: usize) {
        self.consumers.push((consumer, input_port));
    }

    /// The producing task.
    pub fn producer(&self) -> &TaskRef {
        &self.producer
    }

    /// The producer output port this relation realizes.
    pub fn producer_port(&self) -> usize {
        self.producer_port
    }

    /// The attached `(consumer, input port)` pairs.
    pub fn consumers(&self) -> &[(TaskRef, usize)] {
        &self.consumers
    }

    /// True if `task` consumes from this relation.
    pub fn has_consumer(&self, task: &TaskRef) -> bool {
        self.consumers.iter().any(|(consumer, _)| TaskRef::ptr_eq(consumer, task))
    }

    /// The input port `task` consumes this relation on.
    pub fn consumer_port(&self, task: &TaskRef) -> Option<usize> {
        self.consumers
            .iter()
            .find(|(consumer, _)| TaskRef::ptr_eq(consumer, task))
            .map(|&(_, port)| port)
    }

    /// The producer-side endpoints: push filled buffers, pop recycled ones.
    pub fn producer_queues(&self) -> (Sender<Message>, Receiver<Message>) {
        (self.data_tx.clone(), self.recycle_rx.clone())
    }

    /// The consumer-side endpoints for `task`: push recycled buffers, pop
    /// filled ones.
    pub fn consumer_queues(&self, task: &TaskRef) -> Option<(Sender<Message>, Receiver<Message>)> {
        self.has_consumer(task).then(|| (self.recycle_tx.clone(), self.data_rx.clone()))
    }

    /// Sender used to seed the recycle pool with freshly allocated buffers.
    pub(crate) fn recycle_seed(&self) -> Sender<Message> {
        self.recycle_tx.clone()
    }

    /// Deliver the end-of-stream sentinel exactly once to every attached
    /// consumer. Consumers compete on the shared data queue but stop popping
    /// after their first pill, so each observes exactly one.
    pub fn push_poison_pill(&self) {
        for _ in 0..self.consumers.len() {
            // Cannot disconnect, the relation holds both channel ends.
            let _ = self.data_tx.send(Message::PoisonPill);
        }
    }
}

static_assertions::assert_impl_all!(Relation: Send, Sync);
static_assertions::assert_impl_all!(Message: Send);

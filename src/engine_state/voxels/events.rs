//! Chunk change notifications flowing from the world to the region scheduler.
//!
//! Producers on any thread hold a cloned [`ChunkEventSender`]; the scheduler owns
//! the single receiver and drains it once per tick.

use std::sync::mpsc::{channel, Receiver, Sender};

use super::position::ChunkPosition;

/// A change to the set or contents of loaded chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkEvent {
    /// The chunk became available.
    Added(ChunkPosition),
    /// Blocks in or next to the chunk changed.
    Updated(ChunkPosition),
    /// The chunk was unloaded.
    Removed(ChunkPosition),
}

impl ChunkEvent {
    /// The chunk the event refers to.
    pub fn position(&self) -> ChunkPosition {
        match *self {
            ChunkEvent::Added(position)
            | ChunkEvent::Updated(position)
            | ChunkEvent::Removed(position) => position,
        }
    }
}

/// Cloneable, thread-safe producer side of the chunk event queue.
#[derive(Debug, Clone)]
pub struct ChunkEventSender {
    sender: Sender<ChunkEvent>,
}

impl ChunkEventSender {
    /// Queues an event. Events sent after the scheduler is gone are dropped.
    pub fn send(&self, event: ChunkEvent) {
        if self.sender.send(event).is_err() {
            log::trace!("Chunk event {event:?} dropped, scheduler is gone");
        }
    }
}

/// Creates a connected sender/receiver pair.
pub fn chunk_event_channel() -> (ChunkEventSender, Receiver<ChunkEvent>) {
    let (sender, receiver) = channel();
    (ChunkEventSender { sender }, receiver)
}

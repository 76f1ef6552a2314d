//! External collaborators the client calls out to.
//!
//! The transport and the cache policy live outside this crate.  The client
//! only tells them what it needs; their answers come back as
//! [`TransportEvent`](crate::driver::TransportEvent)s.

use cardsync_shared::{EntityId, EntityKind};

/// Fetches entities and part bodies on behalf of the client.
pub trait Loader {
    /// Start loading `id`.  Completion is reported through
    /// `complete_*_load` or `*_load_failed`.
    fn load(&mut self, kind: EntityKind, id: &EntityId);

    /// Start fetching the body of `part_id`.  Completion is reported through
    /// `part_content_changed` or `part_fetch_failed`.
    fn fetch_part_content(&mut self, message_id: &EntityId, part_id: &EntityId);
}

/// Decides when cached entities may be evicted.  Eviction itself goes back
/// through the client's remove operations.
pub trait CacheEvictor {
    fn schedule_check_and_purge(&mut self, kind: EntityKind, id: &EntityId);
}

#[derive(Debug, Default)]
pub struct NoopLoader;

impl Loader for NoopLoader {
    fn load(&mut self, kind: EntityKind, id: &EntityId) {
        tracing::trace!(%kind, %id, "no loader installed");
    }

    fn fetch_part_content(&mut self, _message_id: &EntityId, part_id: &EntityId) {
        tracing::trace!(part = %part_id, "no loader installed");
    }
}

#[derive(Debug, Default)]
pub struct NoopEvictor;

impl CacheEvictor for NoopEvictor {
    fn schedule_check_and_purge(&mut self, _kind: EntityKind, _id: &EntityId) {}
}

//! Matchmaking queue catalog, per-queue "queued" flags and eligibility.

use crate::error::Staleness;
use shared::{Party, QueueDefinition, QueueId, Revision};
use std::collections::BTreeSet;

/// Queues that appeared or disappeared in a catalog refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDiff {
    pub added: Vec<QueueId>,
    pub removed: Vec<QueueId>,
}

impl QueueDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct QueueCatalog {
    queues: Vec<QueueDefinition>,
    queued: BTreeSet<QueueId>,
    /// Revision of the last accepted QueueEntered/QueueLeft or snapshot.
    revision: Revision,
}

impl QueueCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queues(&self) -> &[QueueDefinition] {
        &self.queues
    }

    pub fn get(&self, queue_id: QueueId) -> Option<&QueueDefinition> {
        self.queues.iter().find(|q| q.id == queue_id)
    }

    pub fn is_queued(&self, queue_id: QueueId) -> bool {
        self.queued.contains(&queue_id)
    }

    pub fn queued(&self) -> Vec<QueueId> {
        self.queued.iter().copied().collect()
    }

    pub fn is_any_queued(&self) -> bool {
        !self.queued.is_empty()
    }

    /// Replaces the whole catalog in one step and reports what changed.
    pub fn refresh(&mut self, queues: Vec<QueueDefinition>) -> QueueDiff {
        let old: BTreeSet<QueueId> = self.queues.iter().map(|q| q.id).collect();
        let new: BTreeSet<QueueId> = queues.iter().map(|q| q.id).collect();

        let diff = QueueDiff {
            added: new.difference(&old).copied().collect(),
            removed: old.difference(&new).copied().collect(),
        };

        self.queues = queues;
        self.queued.retain(|id| new.contains(id));
        diff
    }

    /// Sets or clears the queued flag for one queue. Returns whether the flag
    /// changed.
    pub fn set_queued(
        &mut self,
        queue_id: QueueId,
        queued: bool,
        revision: Revision,
    ) -> Result<bool, Staleness> {
        if revision <= self.revision {
            return Err(Staleness::OldRevision {
                received: revision,
                current: self.revision,
            });
        }
        self.revision = revision;
        Ok(if queued {
            self.queued.insert(queue_id)
        } else {
            self.queued.remove(&queue_id)
        })
    }

    pub fn clear_queued(&mut self) -> bool {
        let changed = !self.queued.is_empty();
        self.queued.clear();
        changed
    }

    /// Clears the flags and forgets the revision. Queue revisions are counted
    /// per party, so a new party starts from zero.
    pub fn reset(&mut self) -> bool {
        self.revision = 0;
        self.clear_queued()
    }

    /// Restores the queued set from a snapshot unless a newer queue event was
    /// already applied.
    pub fn restore(&mut self, queued: &[QueueId], revision: Revision) -> bool {
        if revision < self.revision {
            return false;
        }
        self.revision = revision;
        let restored: BTreeSet<QueueId> = queued
            .iter()
            .copied()
            .filter(|id| self.get(*id).is_some())
            .collect();
        if restored == self.queued {
            return false;
        }
        self.queued = restored;
        true
    }

    /// Queues the party could join right now: size within the team, not
    /// already queued there, and no outgoing invite still pending.
    pub fn eligible_queues(&self, party: &Party, has_blocking_invites: bool) -> Vec<QueueId> {
        if has_blocking_invites {
            return Vec::new();
        }
        self.queues
            .iter()
            .filter(|q| q.admits(party.len()) && !self.queued.contains(&q.id))
            .map(|q| q.id)
            .collect()
    }
}

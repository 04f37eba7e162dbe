//! Per-sector waiting queues for conversations pending a human agent.
//!
//! Process-wide state: initialized empty at startup (optionally rebuilt from
//! the store), never persisted. All access goes through [`SectorQueues`];
//! a single internal lock makes every operation atomic with respect to
//! concurrent claims.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use crate::error::Error;
use crate::model::Sector;

/// FIFO waiting lists, one per sector.
pub struct SectorQueues {
    inner: Mutex<HashMap<Sector, VecDeque<i64>>>,
}

impl SectorQueues {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Append a conversation to a sector's queue tail.
    ///
    /// Idempotent: re-enqueueing into the same sector is a no-op. If the
    /// conversation sits in a different sector's queue (sector change while
    /// waiting), it is moved — a conversation is never in two queues.
    /// Returns true if membership changed.
    pub fn enqueue(&self, sector: Sector, conversation_id: i64) -> bool {
        let mut inner = self.inner.lock().unwrap();

        if let Some(queue) = inner.get(&sector) {
            if queue.contains(&conversation_id) {
                return false;
            }
        }
        for (other, queue) in inner.iter_mut() {
            if *other != sector {
                queue.retain(|id| *id != conversation_id);
            }
        }
        inner.entry(sector).or_default().push_back(conversation_id);
        true
    }

    /// Atomic check-and-remove for the claim protocol.
    ///
    /// Fails with [`Error::AlreadyClaimed`] if the conversation is no longer
    /// in the sector's queue — another claim won the race or the conversation
    /// left the waiting state by another path.
    pub fn dequeue_for_claim(&self, sector: Sector, conversation_id: i64) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        let queue = inner.entry(sector).or_default();
        match queue.iter().position(|id| *id == conversation_id) {
            Some(pos) => {
                queue.remove(pos);
                Ok(())
            }
            None => Err(Error::AlreadyClaimed),
        }
    }

    /// Remove a conversation from whichever queue holds it, if any.
    ///
    /// Used when a conversation transitions away from the waiting state by
    /// any path other than a claim (administrative close, takeover), so no
    /// stale entry survives.
    pub fn remove(&self, conversation_id: i64) -> Option<Sector> {
        let mut inner = self.inner.lock().unwrap();
        for (sector, queue) in inner.iter_mut() {
            if let Some(pos) = queue.iter().position(|id| *id == conversation_id) {
                queue.remove(pos);
                return Some(*sector);
            }
        }
        None
    }

    /// Which sector's queue holds the conversation, if any.
    pub fn position(&self, conversation_id: i64) -> Option<Sector> {
        let inner = self.inner.lock().unwrap();
        inner.iter().find_map(|(sector, queue)| {
            queue.contains(&conversation_id).then_some(*sector)
        })
    }

    /// Queue contents for one sector, oldest first. Best-effort read: may be
    /// momentarily stale relative to concurrent claims.
    pub fn entries(&self, sector: Sector) -> Vec<i64> {
        let inner = self.inner.lock().unwrap();
        inner
            .get(&sector)
            .map(|queue| queue.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Per-sector queue sizes, every sector present (zero when empty).
    pub fn sizes(&self) -> BTreeMap<Sector, usize> {
        let inner = self.inner.lock().unwrap();
        Sector::ALL
            .into_iter()
            .map(|sector| (sector, inner.get(&sector).map_or(0, VecDeque::len)))
            .collect()
    }

    pub fn len(&self, sector: Sector) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.get(&sector).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.values().all(VecDeque::is_empty)
    }
}

impl Default for SectorQueues {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let queues = SectorQueues::new();
        queues.enqueue(Sector::Comercial, 1);
        queues.enqueue(Sector::Comercial, 2);
        queues.enqueue(Sector::Comercial, 3);

        assert_eq!(queues.entries(Sector::Comercial), vec![1, 2, 3]);
    }

    #[test]
    fn test_enqueue_idempotent() {
        let queues = SectorQueues::new();
        assert!(queues.enqueue(Sector::Comercial, 1));
        assert!(!queues.enqueue(Sector::Comercial, 1));

        assert_eq!(queues.entries(Sector::Comercial), vec![1]);
        assert_eq!(queues.len(Sector::Comercial), 1);
    }

    #[test]
    fn test_at_most_one_queue() {
        let queues = SectorQueues::new();
        queues.enqueue(Sector::Comercial, 1);
        queues.enqueue(Sector::Rh, 1);

        assert_eq!(queues.len(Sector::Comercial), 0);
        assert_eq!(queues.entries(Sector::Rh), vec![1]);
        assert_eq!(queues.position(1), Some(Sector::Rh));
    }

    #[test]
    fn test_claim_removes_exactly_once() {
        let queues = SectorQueues::new();
        queues.enqueue(Sector::Comercial, 1);

        assert!(queues.dequeue_for_claim(Sector::Comercial, 1).is_ok());
        assert!(matches!(
            queues.dequeue_for_claim(Sector::Comercial, 1),
            Err(Error::AlreadyClaimed)
        ));
    }

    #[test]
    fn test_remove_clears_stale_entry() {
        let queues = SectorQueues::new();
        queues.enqueue(Sector::Geral, 5);

        assert_eq!(queues.remove(5), Some(Sector::Geral));
        assert_eq!(queues.remove(5), None);
        assert!(queues.is_empty());
    }

    #[test]
    fn test_sizes_cover_all_sectors() {
        let queues = SectorQueues::new();
        queues.enqueue(Sector::Comercial, 1);
        queues.enqueue(Sector::Comercial, 2);

        let sizes = queues.sizes();
        assert_eq!(sizes.len(), Sector::ALL.len());
        assert_eq!(sizes[&Sector::Comercial], 2);
        assert_eq!(sizes[&Sector::Rh], 0);
    }
}

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::Message;

/// Where a locally held message stands with the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "state", content = "id", rename_all = "snake_case")]
pub enum EntryId {
    /// Sent optimistically; the id is the client correlation id.
    Pending(Uuid),
    Confirmed(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub id: EntryId,
    pub message: Message,
    #[serde(skip)]
    seq: u64,
}

impl Entry {
    pub fn is_pending(&self) -> bool {
        matches!(self.id, EntryId::Pending(_))
    }
}

/// The time-bounded, creation-ordered messages of one void as one client
/// sees them.
///
/// Arrivals are deduplicated by id no matter which channel delivered them,
/// ids that were deleted never come back, and inserting never reorders what
/// is already there.
#[derive(Debug, Clone, Default)]
pub struct RoomView {
    entries: Vec<Entry>,
    /// Ids applied so far, with their expiry.
    seen: HashMap<Uuid, OffsetDateTime>,
    /// Deleted ids. The expiry is unknown for ids deleted before this view
    /// ever held them, until a late delivery shows it.
    tombstones: HashMap<Uuid, Option<OffsetDateTime>>,
    seq: u64,
}

impl RoomView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().map(|entry| &entry.message)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&Message> {
        self.messages().find(|message| message.id == id)
    }

    /// The message `message` replies to, if it is still held.
    pub fn reply_target(&self, message: &Message) -> Option<&Message> {
        message.reply_to.and_then(|id| self.get(id)).filter(|target| target.id != message.id)
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// A marker for a fetch about to be issued; see [`RoomView::merge_poll`].
    pub fn checkpoint(&self) -> u64 {
        self.seq
    }

    fn bury(&mut self, id: Uuid, expires_at: Option<OffsetDateTime>) {
        let known = self.tombstones.get(&id).copied().flatten();
        self.tombstones.insert(id, expires_at.or(known));
    }

    /// Applies a freshly fetched message. Returns whether the view changed.
    pub fn apply_insert(&mut self, message: Message, now: OffsetDateTime) -> bool {
        if let Some(expiry) = self.tombstones.get_mut(&message.id) {
            expiry.get_or_insert(message.expires_at);
            return false;
        }
        if !message.is_live(now) {
            return false;
        }

        let correlated = message
            .client_ref
            .and_then(|local| self.entries.iter().position(|e| e.id == EntryId::Pending(local)));
        if let Some(index) = correlated {
            // our own send, echoed back before the create call returned
            self.confirm_at(index, message);
            return true;
        }

        if self.seen.insert(message.id, message.expires_at).is_some() {
            return false;
        }
        let seq = self.next_seq();
        let key = message.order_key();
        // optimistic entries stay at the bottom, confirmed arrivals go above them
        let index = self
            .entries
            .iter()
            .rposition(|e| !e.is_pending() && e.message.order_key() <= key)
            .map_or(0, |i| i + 1);
        self.entries.insert(index, Entry { id: EntryId::Confirmed(message.id), message, seq });
        true
    }

    /// Merges a fetch of the live messages issued at `checkpoint`; the
    /// initial load is merged the same way. Confirmed messages held at the
    /// checkpoint but missing from the result were deleted or expired on the
    /// store and are dropped.
    pub fn merge_poll(&mut self, checkpoint: u64, messages: Vec<Message>, now: OffsetDateTime) -> bool {
        let present: HashSet<Uuid> = messages.iter().map(|m| m.id).collect();
        let mut changed = false;
        let mut gone = Vec::new();
        self.entries.retain(|entry| {
            let keep = entry.is_pending() || entry.seq > checkpoint || present.contains(&entry.message.id);
            if !keep {
                gone.push((entry.message.id, entry.message.expires_at));
            }
            keep
        });
        if !gone.is_empty() {
            changed = true;
            for (id, expires_at) in gone {
                self.bury(id, Some(expires_at));
            }
        }
        for message in messages {
            changed |= self.apply_insert(message, now);
        }
        changed
    }

    /// Appends an optimistic message whose `id` is its correlation id.
    pub fn push_pending(&mut self, message: Message) {
        let seq = self.next_seq();
        self.entries.push(Entry { id: EntryId::Pending(message.id), message, seq });
    }

    /// Swaps the pending entry `local` for the stored record, in place.
    pub fn confirm(&mut self, local: Uuid, message: Message) {
        match self.entries.iter().position(|e| e.id == EntryId::Pending(local)) {
            Some(index) => self.confirm_at(index, message),
            None => {
                // already confirmed through the feed, or swept
            }
        }
    }

    fn confirm_at(&mut self, index: usize, message: Message) {
        if self.tombstones.contains_key(&message.id) || self.seen.insert(message.id, message.expires_at).is_some() {
            self.entries.remove(index);
            return;
        }
        let seq = self.next_seq();
        self.entries[index] = Entry { id: EntryId::Confirmed(message.id), message, seq };
    }

    /// Drops the pending entry `local` and hands it back.
    pub fn reject(&mut self, local: Uuid) -> Option<Message> {
        let index = self.entries.iter().position(|e| e.id == EntryId::Pending(local))?;
        Some(self.entries.remove(index).message)
    }

    /// Removes `id` and every message replying to it. Returns the removed ids.
    pub fn remove(&mut self, id: Uuid) -> Vec<Uuid> {
        let mut removed = Vec::new();
        self.entries.retain(|entry| {
            let hit = entry.message.id == id || entry.message.reply_to == Some(id);
            if hit {
                removed.push((entry.message.id, entry.message.expires_at));
            }
            !hit
        });
        if !removed.iter().any(|&(removed_id, _)| removed_id == id) {
            self.bury(id, None);
        }
        removed
            .into_iter()
            .map(|(removed_id, expires_at)| {
                self.bury(removed_id, Some(expires_at));
                removed_id
            })
            .collect()
    }

    /// Removes `id` from this view alone.
    pub fn hide(&mut self, id: Uuid) -> bool {
        let expires_at = self.get(id).map(|message| message.expires_at);
        self.bury(id, expires_at);
        let before = self.entries.len();
        self.entries.retain(|entry| entry.message.id != id);
        before != self.entries.len()
    }

    /// Drops expired messages; returns how many went. Bookkeeping for
    /// expired ids goes too, since expired arrivals are refused anyway.
    pub fn sweep(&mut self, now: OffsetDateTime) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.message.is_live(now));
        self.seen.retain(|_, expires_at| *expires_at > now);
        self.tombstones.retain(|_, expires_at| expires_at.is_none_or(|expires_at| expires_at > now));
        before - self.entries.len()
    }
}

use std::collections::{HashMap, HashSet};

use tracing::debug;
use uuid::Uuid;

use turf_types::models::Reaction;

/// One emoji's tally on one message, as the UI renders it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionTally {
    pub emoji: String,
    /// Distinct users, not raw rows.
    pub count: usize,
    pub is_mine: bool,
}

/// Fold the flat reaction list into per-message tallies.
///
/// Deliberately a full recompute on every call: expected list sizes are
/// tens of rows, so incremental diffing is not worth the bookkeeping.
/// Emoji groups keep first-seen order so chips don't jump around.
pub fn aggregate(
    reactions: &[Reaction],
    current_user: Option<Uuid>,
) -> HashMap<Uuid, Vec<ReactionTally>> {
    let mut grouped: HashMap<Uuid, Vec<(String, HashSet<Uuid>)>> = HashMap::new();
    for r in reactions {
        let groups = grouped.entry(r.message_id).or_default();
        match groups.iter_mut().find(|(emoji, _)| emoji == &r.emoji) {
            Some((_, users)) => {
                users.insert(r.user_id);
            }
            None => groups.push((r.emoji.clone(), HashSet::from([r.user_id]))),
        }
    }

    grouped
        .into_iter()
        .map(|(message_id, groups)| {
            let tallies = groups
                .into_iter()
                .map(|(emoji, users)| ReactionTally {
                    count: users.len(),
                    is_mine: current_user.is_some_and(|u| users.contains(&u)),
                    emoji,
                })
                .collect();
            (message_id, tallies)
        })
        .collect()
}

/// The flat, feed-maintained reaction list for one room.
///
/// Add of an already-present (message, user, emoji) triple is a no-op at
/// this layer; removal is always an explicit delete event, never inferred
/// from a repeated add.
#[derive(Default)]
pub struct ReactionLog {
    rows: Vec<Reaction>,
}

impl ReactionLog {
    pub fn rows(&self) -> &[Reaction] {
        &self.rows
    }

    /// Replace the whole list, e.g. from the initial room fetch.
    pub fn replace_all(&mut self, rows: Vec<Reaction>) {
        self.rows = rows;
    }

    pub fn apply_insert(&mut self, reaction: Reaction) {
        if self.position_of(&reaction).is_some() {
            debug!(message = %reaction.message_id, "duplicate reaction row, ignoring");
            return;
        }
        self.rows.push(reaction);
    }

    pub fn apply_delete(&mut self, reaction: &Reaction) {
        if let Some(pos) = self.position_of(reaction) {
            self.rows.remove(pos);
        }
    }

    fn position_of(&self, reaction: &Reaction) -> Option<usize> {
        self.rows.iter().position(|r| {
            r.message_id == reaction.message_id
                && r.user_id == reaction.user_id
                && r.emoji == reaction.emoji
        })
    }
}

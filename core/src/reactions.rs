//! Reaction set semantics: one entry per (user, emoji).

use crate::models::Reaction;

/// Adds the pair unless present. Returns whether the set changed.
pub fn add(set: &mut Vec<Reaction>, user_id: &str, emoji: &str) -> bool {
    if contains(set, user_id, emoji) {
        return false;
    }
    set.push(Reaction {
        user_id: user_id.to_string(),
        emoji: emoji.to_string(),
    });
    true
}

/// Removes the pair if present. Returns whether the set changed.
pub fn remove(set: &mut Vec<Reaction>, user_id: &str, emoji: &str) -> bool {
    let before = set.len();
    set.retain(|r| !(r.user_id == user_id && r.emoji == emoji));
    set.len() != before
}

/// Flips membership and returns whether the pair is present afterwards.
pub fn toggle(set: &mut Vec<Reaction>, user_id: &str, emoji: &str) -> bool {
    if remove(set, user_id, emoji) {
        false
    } else {
        add(set, user_id, emoji)
    }
}

pub fn contains(set: &[Reaction], user_id: &str, emoji: &str) -> bool {
    set.iter().any(|r| r.user_id == user_id && r.emoji == emoji)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionSummary {
    pub emoji: String,
    pub count: usize,
    pub user_ids: Vec<String>,
}

/// Groups reactions by emoji in first-seen order.
pub fn summarize(set: &[Reaction]) -> Vec<ReactionSummary> {
    let mut summary: Vec<ReactionSummary> = Vec::new();
    for reaction in set {
        match summary.iter_mut().find(|s| s.emoji == reaction.emoji) {
            Some(entry) => {
                entry.count += 1;
                entry.user_ids.push(reaction.user_id.clone());
            }
            None => summary.push(ReactionSummary {
                emoji: reaction.emoji.clone(),
                count: 1,
                user_ids: vec![reaction.user_id.clone()],
            }),
        }
    }
    summary
}

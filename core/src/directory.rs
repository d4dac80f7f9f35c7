//! Conversation directory projections: search, filter and recency sort.

use crate::models::{Conversation, ConversationFilter};

/// Case-insensitive match on counterpart name, product name or preview.
pub fn matches_search(conv: &Conversation, me: &str, term: &str) -> bool {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return true;
    }

    let contains = |field: Option<&str>| field.map(|f| f.to_lowercase().contains(&term)).unwrap_or(false);

    contains(Some(conv.counterpart_name(me)))
        || contains(conv.product_name.as_deref())
        || contains(conv.last_message.as_deref())
}

pub fn matches_filter(conv: &Conversation, me: &str, filter: ConversationFilter) -> bool {
    match filter {
        ConversationFilter::All => !conv.archived,
        ConversationFilter::Unread => !conv.archived && conv.unread_for(me) > 0,
        ConversationFilter::Archived => conv.archived,
    }
}

/// Most recent activity first; ties keep a stable id order.
pub fn sort_by_recency(conversations: &mut [Conversation]) {
    conversations.sort_by(|a, b| {
        b.last_activity()
            .cmp(&a.last_activity())
            .then_with(|| a.id.cmp(&b.id))
    });
}

pub fn filter_conversations(
    conversations: &[Conversation],
    me: &str,
    filter: ConversationFilter,
    term: Option<&str>,
) -> Vec<Conversation> {
    let term = term.unwrap_or("");
    let mut selected: Vec<Conversation> = conversations
        .iter()
        .filter(|c| matches_filter(c, me, filter) && matches_search(c, me, term))
        .cloned()
        .collect();
    sort_by_recency(&mut selected);
    selected
}

/// Badge count: unread messages across active, unmuted conversations.
pub fn total_unread(conversations: &[Conversation], me: &str) -> u32 {
    conversations
        .iter()
        .filter(|c| !c.archived && !c.muted)
        .map(|c| c.unread_for(me))
        .sum()
}

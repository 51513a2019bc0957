//! Merging parsed items into a feed's stored messages.
//!
//! Pure: takes a [`FeedSnapshot`] and candidates, returns the writes to
//! perform. The store applies the plan in one transaction.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

use crate::feed::ParsedItem;
use crate::storage::{ExistingMessage, FeedSnapshot, MessageUpdate, NewMessage};
use crate::util::canonical_link;

/// Per-feed result counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileCounts {
    pub new: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl std::ops::AddAssign for ReconcileCounts {
    fn add_assign(&mut self, other: Self) {
        self.new += other.new;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
    }
}

/// Writes needed to bring a feed's messages in line with a fetched document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub feed_id: i64,
    pub inserts: Vec<NewMessage>,
    pub updates: Vec<MessageUpdate>,
    pub counts: ReconcileCounts,
}

/// Stable identity of an item within its feed.
///
/// `url:<canonical link>` when the item has an absolute link, otherwise
/// `hash:<sha256 of title, U+001F, body>`. Every format uses the same rule.
pub fn identity_of(item: &ParsedItem) -> String {
    if let Some(link) = item.link.as_deref().and_then(canonical_link) {
        return format!("url:{}", link);
    }

    let mut hasher = Sha256::new();
    hasher.update(item.title.as_bytes());
    hasher.update([0x1f]);
    hasher.update(item.body.as_deref().unwrap_or("").as_bytes());
    format!("hash:{:x}", hasher.finalize())
}

fn content_changed(existing: &ExistingMessage, item: &ParsedItem) -> bool {
    existing.title != item.title || existing.body != item.body || existing.author != item.author
}

/// Compare candidates against the stored snapshot.
///
/// - Unknown identity: insert with cleared flags.
/// - Known identity with different title, body or author: update those
///   three fields only.
/// - Known identity with identical content, or a purged identity: unchanged.
/// - Repeated identity within `items`: the first occurrence wins, later ones
///   are ignored and not counted.
pub fn reconcile(feed_id: i64, snapshot: &FeedSnapshot, items: &[ParsedItem]) -> ReconcilePlan {
    let existing: HashMap<&str, &ExistingMessage> = snapshot
        .messages
        .iter()
        .map(|m| (m.identity.as_str(), m))
        .collect();
    let mut seen: HashSet<String> = HashSet::with_capacity(items.len());
    let mut plan = ReconcilePlan {
        feed_id,
        ..Default::default()
    };

    for item in items {
        let identity = identity_of(item);
        if !seen.insert(identity.clone()) {
            tracing::trace!(feed_id = feed_id, identity = %identity, "Duplicate item in document");
            continue;
        }

        if snapshot.tombstones.contains(&identity) {
            plan.counts.unchanged += 1;
            continue;
        }

        match existing.get(identity.as_str()) {
            Some(stored) if content_changed(stored, item) => {
                plan.updates.push(MessageUpdate {
                    id: stored.id,
                    title: item.title.clone(),
                    body: item.body.clone(),
                    author: item.author.clone(),
                });
                plan.counts.updated += 1;
            }
            Some(_) => plan.counts.unchanged += 1,
            None => {
                plan.inserts.push(NewMessage {
                    identity,
                    title: item.title.clone(),
                    url: item.link.clone(),
                    author: item.author.clone(),
                    body: item.body.clone(),
                    published: item.published.map(|p| p.timestamp()),
                });
                plan.counts.new += 1;
            }
        }
    }

    plan
}

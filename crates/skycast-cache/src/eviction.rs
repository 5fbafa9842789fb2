//! Priority-aware LRU eviction planning.
//!
//! Candidates are drained tier by tier (Low, Medium, High). Within a tier
//! the entry with the highest score goes first, where the score is its idle
//! time shrunk by a grace factor that grows with access frequency.
//! Victims are taken a whole batch at a time and the budgets are re-checked
//! between batches; a batch never reaches into the next tier.
//! Critical entries are never candidates.

use std::collections::HashMap;

use skycast_core::Millis;

use crate::entry::CacheEntry;
use crate::error::CacheError;

/// Budgets and tuning knobs used while planning an eviction.
#[derive(Debug, Clone, Copy)]
pub struct EvictionPolicy {
    pub max_entries: usize,
    pub max_memory_bytes: u64,
    pub batch_size: usize,
    pub frequency_weight: f64,
}

/// Eviction score, higher is evicted sooner.
pub fn eviction_score(entry: &CacheEntry, now: Millis, frequency_weight: f64) -> f64 {
    let idle_ms = now.saturating_sub(entry.last_accessed_at).max(0) as f64;
    let grace = 1.0 + frequency_weight * (1.0 + entry.access_count as f64).ln();
    (idle_ms + 1.0) / grace
}

/// Decide which keys must go so that `incoming_size` bytes can be stored
/// under `incoming_key` within both budgets.
///
/// An existing entry under `incoming_key` is replaced, never evicted. If no
/// combination of evictable entries makes room, nothing is planned and
/// `CapacityExceeded` is returned.
pub fn plan_eviction(
    entries: &HashMap<String, CacheEntry>,
    total_bytes: u64,
    incoming_key: &str,
    incoming_size: u64,
    policy: &EvictionPolicy,
    now: Millis,
) -> Result<Vec<String>, CacheError> {
    let replaced_size = entries.get(incoming_key).map_or(0, |e| e.size_bytes);
    let replaced = entries.contains_key(incoming_key) as usize;

    let mut count = entries.len() - replaced + 1;
    let mut bytes = total_bytes - replaced_size + incoming_size;

    let within = |count: usize, bytes: u64| {
        count <= policy.max_entries && bytes <= policy.max_memory_bytes
    };

    if within(count, bytes) {
        return Ok(Vec::new());
    }

    let mut candidates: Vec<(&CacheEntry, f64)> = entries
        .values()
        .filter(|e| e.key != incoming_key && e.priority.is_evictable())
        .map(|e| (e, eviction_score(e, now, policy.frequency_weight)))
        .collect();

    let evictable_bytes: u64 = candidates.iter().map(|(e, _)| e.size_bytes).sum();
    if !within(count - candidates.len(), bytes - evictable_bytes) {
        return Err(CacheError::CapacityExceeded {
            needed: incoming_size,
            budget: policy.max_memory_bytes,
        });
    }

    candidates.sort_by(|(a, score_a), (b, score_b)| {
        a.priority
            .eviction_rank()
            .cmp(&b.priority.eviction_rank())
            .then_with(|| score_b.total_cmp(score_a))
            .then_with(|| a.access_seq.cmp(&b.access_seq))
    });

    let batch_size = policy.batch_size.max(1);
    let mut victims = Vec::new();
    let tiers = candidates.chunk_by(|(a, _), (b, _)| a.priority == b.priority);
    'tiers: for tier in tiers {
        for batch in tier.chunks(batch_size) {
            if within(count, bytes) {
                break 'tiers;
            }
            for (entry, _) in batch {
                victims.push(entry.key.clone());
                count -= 1;
                bytes -= entry.size_bytes;
            }
            tracing::debug!(evicted = victims.len(), "Eviction batch planned");
        }
    }

    Ok(victims)
}

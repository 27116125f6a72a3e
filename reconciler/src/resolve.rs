use std::collections::HashMap;

use crate::event::{NotificationEvent, ResolvedSlot, SlotKey};

/// Collapse all visible events into the current authoritative state per
/// slot. Groups by slot key, orders each group by arrival time, and lets
/// the latest event win. The sort is stable, so events sharing an arrival
/// timestamp keep their input order and the last one in iteration order
/// wins.
///
/// Deterministic for identical input: re-running after a partial sink
/// failure reproduces the same map, which is what makes re-sync idempotent.
pub fn resolve(events: Vec<NotificationEvent>) -> HashMap<SlotKey, ResolvedSlot> {
    let mut groups: HashMap<SlotKey, Vec<NotificationEvent>> = HashMap::new();
    for event in events {
        groups.entry(event.key()).or_default().push(event);
    }

    groups
        .into_iter()
        .filter_map(|(key, mut group)| {
            group.sort_by_key(|e| e.received_at);
            let source_ids = group.iter().map(|e| e.source_id.clone()).collect();
            let is_duplicate = group.len() > 1;
            let winner = group.pop()?;
            Some((
                key,
                ResolvedSlot {
                    winner,
                    is_duplicate,
                    source_ids,
                },
            ))
        })
        .collect()
}

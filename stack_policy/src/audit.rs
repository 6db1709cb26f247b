//! Audit trail of policy decisions.
//!
//! Entries keep the internal reason for each decision so operators can
//! see why a call was denied without that detail reaching the caller.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::engine::{Decision, Outcome, Query, Reason};
use crate::persona::PersonaSet;

/// Audit entry for one policy decision.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyAudit {
    /// Sequence number, increasing in recording order.
    pub id: u64,

    pub scope: String,

    pub action: String,

    /// Personas the caller held.
    pub personas: PersonaSet,

    pub outcome: Outcome,

    pub reason: Reason,

    /// Policy rule that made the decision.
    pub rule: Option<String>,

    /// Rule-set generation the decision was made against.
    pub generation: u64,

    /// When the decision was made.
    pub timestamp: DateTime<Utc>,
}

/// Bounded, concurrent log of recent decisions.
///
/// Once `capacity` entries are held, recording a new one evicts the oldest.
#[derive(Debug)]
pub struct DecisionLog {
    entries: DashMap<u64, PolicyAudit>,
    next_id: AtomicU64,

    /// Lowest id not yet claimed for eviction.
    evict_from: AtomicU64,
    capacity: usize,
}

impl DecisionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            next_id: AtomicU64::new(1),
            evict_from: AtomicU64::new(1),
            capacity,
        }
    }

    /// Record a decision. Returns the entry id, or `None` when disabled.
    pub fn record(&self, query: &Query<'_>, decision: &Decision, generation: u64) -> Option<u64> {
        if self.capacity == 0 {
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.entries.insert(
            id,
            PolicyAudit {
                id,
                scope: query.scope.to_string(),
                action: query.action.to_string(),
                personas: query.personas,
                outcome: decision.outcome,
                reason: decision.reason,
                rule: decision.matched_rule.clone(),
                generation,
                timestamp: Utc::now(),
            },
        );

        // Ids are dense, so everything at or below `floor` is past capacity.
        // Each stale id is claimed by exactly one recorder.
        if let Some(floor) = id.checked_sub(self.capacity as u64) {
            let mut low = self.evict_from.load(Ordering::SeqCst);
            while low <= floor {
                match self.evict_from.compare_exchange(
                    low,
                    low + 1,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                ) {
                    Ok(_) => {
                        self.entries.remove(&low);
                        low += 1;
                    }
                    Err(current) => low = current,
                }
            }
        }

        // This id may have been claimed before the insert above landed.
        if id < self.evict_from.load(Ordering::SeqCst) {
            self.entries.remove(&id);
        }
        Some(id)
    }

    pub fn get(&self, id: u64) -> Option<PolicyAudit> {
        self.entries.get(&id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recent entries first.
    pub fn recent(&self, limit: usize) -> Vec<PolicyAudit> {
        let mut entries: Vec<PolicyAudit> = self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        entries.sort_by(|a, b| b.id.cmp(&a.id));
        entries.truncate(limit);

        entries
    }

    /// Distinct `(scope, action)` pairs that had no rule. Sorted.
    pub fn misses(&self) -> Vec<(String, String)> {
        let misses: BTreeSet<(String, String)> = self
            .entries
            .iter()
            .filter(|entry| entry.reason == Reason::NoRuleDefined)
            .map(|entry| (entry.scope.clone(), entry.action.clone()))
            .collect();
        misses.into_iter().collect()
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::Persona;
    use std::sync::Arc;
    use std::thread;

    fn decision(outcome: Outcome, reason: Reason) -> Decision {
        Decision {
            outcome,
            reason,
            matched_rule: None,
            matched_personas: PersonaSet::empty(),
        }
    }

    #[test]
    fn test_record_and_recent() {
        let log = DecisionLog::new(10);
        let personas = PersonaSet::from(Persona::ProjectMember);

        let first = log
            .record(
                &Query::new("stacks", "create", personas),
                &decision(Outcome::Permit, Reason::ExplicitAllow),
                0,
            )
            .unwrap();
        let second = log
            .record(
                &Query::new("stacks", "delete", personas),
                &decision(Outcome::Deny, Reason::NotInAllowList),
                3,
            )
            .unwrap();

        assert!(second > first);
        let recent = log.recent(5);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].action, "delete");
        assert_eq!(recent[0].generation, 3);
        assert_eq!(recent[1].outcome, Outcome::Permit);
        assert_eq!(log.get(first).unwrap().scope, "stacks");
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let log = DecisionLog::new(3);
        let personas = PersonaSet::empty();
        let ids: Vec<u64> = (0..5)
            .map(|_| {
                log.record(
                    &Query::new("events", "index", personas),
                    &decision(Outcome::Deny, Reason::NotInAllowList),
                    0,
                )
                .unwrap()
            })
            .collect();

        assert_eq!(log.len(), 3);
        assert!(log.get(ids[0]).is_none());
        assert!(log.get(ids[1]).is_none());
        assert!(log.get(ids[4]).is_some());
    }

    #[test]
    fn test_zero_capacity_disables() {
        let log = DecisionLog::new(0);
        let recorded = log.record(
            &Query::new("events", "index", PersonaSet::empty()),
            &decision(Outcome::Deny, Reason::NoRuleDefined),
            0,
        );
        assert!(recorded.is_none());
        assert!(log.is_empty());
    }

    #[test]
    fn test_misses_are_distinct() {
        let log = DecisionLog::new(16);
        let personas = PersonaSet::from(Persona::ProjectAdmin);
        for (scope, action) in [("volumes", "create"), ("volumes", "create"), ("backups", "index")] {
            log.record(
                &Query::new(scope, action, personas),
                &decision(Outcome::Deny, Reason::NoRuleDefined),
                0,
            );
        }
        log.record(
            &Query::new("stacks", "create", personas),
            &decision(Outcome::Deny, Reason::NotInAllowList),
            0,
        );

        assert_eq!(
            log.misses(),
            vec![
                ("backups".to_string(), "index".to_string()),
                ("volumes".to_string(), "create".to_string()),
            ]
        );
    }

    #[test]
    fn test_capacity_holds_under_concurrent_recording() {
        let log = Arc::new(DecisionLog::new(4));
        let mut handles = Vec::new();

        for t in 0..8 {
            let log = Arc::clone(&log);
            handles.push(thread::spawn(move || {
                let personas = PersonaSet::from(Persona::ALL[t % Persona::ALL.len()]);
                for _ in 0..5_000 {
                    log.record(
                        &Query::new("stacks", "index", personas),
                        &decision(Outcome::Permit, Reason::ExplicitAllow),
                        0,
                    );
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // The newest ids survive and nothing older lingers.
        assert_eq!(log.len(), 4);
        let ids: Vec<u64> = log.recent(10).iter().map(|entry| entry.id).collect();
        assert_eq!(ids, vec![40_000, 39_999, 39_998, 39_997]);
    }

    #[test]
    fn test_single_slot_under_concurrent_recording() {
        let log = Arc::new(DecisionLog::new(1));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for _ in 0..20_000 {
                        log.record(
                            &Query::new("events", "index", PersonaSet::empty()),
                            &decision(Outcome::Deny, Reason::NoRuleDefined),
                            0,
                        );
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(log.len(), 1);
        assert_eq!(log.misses().len(), 1);
    }
}

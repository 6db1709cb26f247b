//! Stack Policy - Authorization rules for the orchestration API
//!
//! This crate decides whether a caller may invoke an API call, given the
//! call's scope and action and the personas the caller holds.
//!
//! Key concepts:
//!
//! 1. **Persona**: a class of caller (`system_admin`, `project_admin`,
//!    `project_member`, `project_reader`, `stack_user`).
//!
//! 2. **Rule**: maps actions in a scope to allowed and denied personas.
//!
//! 3. **Rule index**: the compiled rule set, loaded once and read-only.
//!
//! 4. **Evaluation**: deny wins over allow, and nothing is allowed unless
//!    a rule says so.

mod audit;
mod config;
mod engine;
mod error;
mod persona;
mod rule;
mod store;

pub use audit::{DecisionLog, PolicyAudit};
pub use config::PolicyConfig;
pub use engine::{Decision, Outcome, PolicyEngine, PolicyEvaluator, Query, Reason};
pub use error::{ConfigurationError, PolicyError, Result};
pub use persona::{Persona, PersonaSet, UnknownPersona};
pub use rule::{PolicyRule, RuleFormat, RuleRecord};
pub use store::{HierarchyGap, PolicyStore, RuleIndex, RuleSnapshot};

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

/// Core policy manager that integrates storage, evaluation and auditing.
pub struct PolicyManager {
    /// Active rules.
    store: Arc<PolicyStore>,

    /// Policy engine.
    engine: Arc<dyn PolicyEngine>,

    /// Audit log for policy decisions.
    audit_log: DecisionLog,
}

impl PolicyManager {
    /// Create a new policy manager.
    pub fn new(store: Arc<PolicyStore>, engine: Arc<dyn PolicyEngine>, audit_log: DecisionLog) -> Self {
        Self {
            store,
            engine,
            audit_log,
        }
    }

    /// Manager over `index` with the default evaluator.
    pub fn with_index(index: RuleIndex, audit_capacity: usize) -> Self {
        Self::new(
            Arc::new(PolicyStore::new(index)),
            Arc::new(PolicyEvaluator::new()),
            DecisionLog::new(audit_capacity),
        )
    }

    /// Build a manager from configuration. Fails if the rules don't load.
    pub fn from_config(config: &PolicyConfig) -> std::result::Result<Self, ConfigurationError> {
        let index = config.load_index()?;
        Ok(Self::with_index(index, config.audit_capacity))
    }

    /// Evaluate a call and record the decision.
    ///
    /// The returned decision carries the internal reason; do not pass it on
    /// to the caller.
    pub fn check(&self, scope: &str, action: &str, personas: PersonaSet) -> Result<Decision> {
        let snapshot = self.store.snapshot();
        let query = Query::new(scope, action, personas);
        let decision = self.engine.evaluate(&snapshot, &query)?;
        self.audit_log.record(&query, &decision, snapshot.generation());
        Ok(decision)
    }

    /// Like [`check`](Self::check) but takes raw role labels.
    ///
    /// Labels that name no persona grant nothing.
    pub fn check_labels<'a, I>(&self, scope: &str, action: &str, labels: I) -> Result<Decision>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let (personas, unknown) = PersonaSet::from_labels(labels);
        if !unknown.is_empty() {
            debug!(scope, action, ?unknown, "Ignoring unrecognized role labels");
        }
        self.check(scope, action, personas)
    }

    /// Evaluate a call and return only the external signal.
    pub fn enforce(&self, scope: &str, action: &str, personas: PersonaSet) -> Result<()> {
        self.check(scope, action, personas)?.enforce()
    }

    /// Swap in a new rule index.
    pub fn replace_rules(&self, index: RuleIndex) -> Arc<RuleIndex> {
        self.store.replace(index)
    }

    /// Reload rules from a file, keeping the current ones on failure.
    pub fn reload_from_file(
        &self,
        path: impl AsRef<Path>,
    ) -> std::result::Result<Arc<RuleIndex>, ConfigurationError> {
        self.store.reload_from_file(path)
    }

    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    pub fn audit_log(&self) -> &DecisionLog {
        &self.audit_log
    }

    /// Get recent policy decisions.
    pub fn recent_decisions(&self, limit: usize) -> Vec<PolicyAudit> {
        self.audit_log.recent(limit)
    }
}

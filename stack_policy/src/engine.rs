//! Policy evaluation engine.
//!
//! This module decides whether a caller may perform an action. Precedence,
//! highest first:
//!
//! 1. No rule for `(scope, action)`: deny (`no_rule_defined`).
//! 2. Any held persona is denied by the rule: deny (`explicit_deny`).
//! 3. Any held persona is allowed by the rule: permit (`explicit_allow`).
//! 4. Otherwise: deny (`not_in_allow_list`).
//!
//! All personas a caller holds are considered together, so a denial for one
//! of them overrides an allowance for another.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::{PolicyError, Result};
use crate::persona::PersonaSet;
use crate::store::RuleIndex;

/// One authorization question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Query<'a> {
    pub scope: &'a str,
    pub action: &'a str,
    pub personas: PersonaSet,
}

impl<'a> Query<'a> {
    pub fn new(scope: &'a str, action: &'a str, personas: PersonaSet) -> Self {
        Self {
            scope,
            action,
            personas,
        }
    }

    /// Reject queries that can only come from a broken caller.
    pub fn validate(&self) -> Result<()> {
        if self.scope.trim().is_empty() {
            return Err(PolicyError::InvalidQuery("scope is empty".to_string()));
        }
        if self.action.trim().is_empty() {
            return Err(PolicyError::InvalidQuery(format!(
                "action is empty (scope '{}')",
                self.scope
            )));
        }
        Ok(())
    }
}

/// Result of an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Permit,
    Deny,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Permit => f.write_str("PERMIT"),
            Outcome::Deny => f.write_str("DENY"),
        }
    }
}

/// Why an evaluation came out the way it did. For audit only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    NoRuleDefined,
    ExplicitDeny,
    ExplicitAllow,
    NotInAllowList,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::NoRuleDefined => "no_rule_defined",
            Reason::ExplicitDeny => "explicit_deny",
            Reason::ExplicitAllow => "explicit_allow",
            Reason::NotInAllowList => "not_in_allow_list",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Internal decision record.
///
/// Only `outcome` may reach the caller; use [`Decision::enforce`] to turn
/// it into the external signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub outcome: Outcome,
    pub reason: Reason,

    /// Name of the rule consulted, if one covered the call.
    pub matched_rule: Option<String>,

    /// Held personas that triggered the explicit deny or allow.
    pub matched_personas: PersonaSet,
}

impl Decision {
    pub fn is_permit(&self) -> bool {
        self.outcome == Outcome::Permit
    }

    pub fn is_deny(&self) -> bool {
        self.outcome == Outcome::Deny
    }

    /// Map to the signal the API layer returns. Every denial looks the same.
    pub fn enforce(&self) -> Result<()> {
        match self.outcome {
            Outcome::Permit => Ok(()),
            Outcome::Deny => Err(PolicyError::Forbidden),
        }
    }

    fn deny(reason: Reason, matched_rule: Option<&str>, matched_personas: PersonaSet) -> Self {
        Self {
            outcome: Outcome::Deny,
            reason,
            matched_rule: matched_rule.map(str::to_string),
            matched_personas,
        }
    }
}

/// Interface for policy evaluation.
pub trait PolicyEngine: Send + Sync {
    /// Decide `query` against `index`.
    fn evaluate(&self, index: &RuleIndex, query: &Query<'_>) -> Result<Decision>;
}

/// Default deny-wins evaluator. Stateless.
#[derive(Debug, Default, Clone, Copy)]
pub struct PolicyEvaluator;

impl PolicyEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl PolicyEngine for PolicyEvaluator {
    fn evaluate(&self, index: &RuleIndex, query: &Query<'_>) -> Result<Decision> {
        query.validate()?;

        let Some(rule) = index.lookup(query.scope, query.action) else {
            warn!(
                scope = query.scope,
                action = query.action,
                "No policy rule defined, denying"
            );
            return Ok(Decision::deny(Reason::NoRuleDefined, None, PersonaSet::empty()));
        };

        let denied = query.personas.intersection(&rule.denied());
        if !denied.is_empty() {
            debug!(
                scope = query.scope,
                action = query.action,
                rule = rule.name(),
                personas = %denied,
                "Explicitly denied"
            );
            return Ok(Decision::deny(Reason::ExplicitDeny, Some(rule.name()), denied));
        }

        let allowed = query.personas.intersection(&rule.allowed());
        if !allowed.is_empty() {
            trace!(
                scope = query.scope,
                action = query.action,
                rule = rule.name(),
                personas = %allowed,
                "Permitted"
            );
            return Ok(Decision {
                outcome: Outcome::Permit,
                reason: Reason::ExplicitAllow,
                matched_rule: Some(rule.name().to_string()),
                matched_personas: allowed,
            });
        }

        debug!(
            scope = query.scope,
            action = query.action,
            rule = rule.name(),
            personas = %query.personas,
            "Not in allow list"
        );
        Ok(Decision::deny(Reason::NotInAllowList, Some(rule.name()), PersonaSet::empty()))
    }
}

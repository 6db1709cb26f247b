//! Policy storage.
//!
//! `RuleIndex` is the compiled, read-only rule set keyed by
//! `(scope, action)`. `PolicyStore` is the process-wide handle that
//! evaluators read snapshots from and operators swap on reload.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::ConfigurationError;
use crate::persona::Persona;
use crate::rule::{parse_records, PolicyRule, RuleFormat, RuleRecord};

const BUILTIN_RULES: &str = include_str!("../policies/orchestration.yaml");

/// Compiled rule set.
#[derive(Debug, Default)]
pub struct RuleIndex {
    /// Rules in load order.
    rules: Vec<PolicyRule>,

    /// scope -> action -> position in `rules`.
    by_scope: HashMap<String, HashMap<String, usize>>,
}

impl RuleIndex {
    /// An index with no rules. Every query against it is a policy miss.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compile an ordered collection of named records.
    ///
    /// All or nothing: any invalid or ambiguous record fails the whole load.
    pub fn load<I, S>(records: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = (S, RuleRecord)>,
        S: Into<String>,
    {
        let mut index = Self::empty();
        let mut names = HashSet::new();

        for (name, record) in records {
            let rule = PolicyRule::compile(name, record)?;
            if !names.insert(rule.name().to_string()) {
                return Err(ConfigurationError::DuplicateRule(rule.name().to_string()));
            }

            let position = index.rules.len();
            let actions = index.by_scope.entry(rule.scope().to_string()).or_default();
            for action in rule.actions() {
                if let Some(&existing) = actions.get(action) {
                    return Err(ConfigurationError::DuplicateAction {
                        scope: rule.scope().to_string(),
                        action: action.clone(),
                        first: index.rules[existing].name().to_string(),
                        second: rule.name().to_string(),
                    });
                }
                actions.insert(action.clone(), position);
            }
            index.rules.push(rule);
        }

        debug!(
            rules = index.rules.len(),
            scopes = index.by_scope.len(),
            "Compiled rule index"
        );
        Ok(index)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigurationError> {
        Self::load(parse_records(text, RuleFormat::Yaml, None)?)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigurationError> {
        Self::load(parse_records(text, RuleFormat::Json, None)?)
    }

    /// Load a rule file. The format follows the file extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let index = Self::load(parse_records(&text, RuleFormat::from_path(path), Some(path))?)?;
        info!(
            path = %path.display(),
            rules = index.len(),
            "Loaded policy rules"
        );
        Ok(index)
    }

    /// The orchestration service's default rule set.
    pub fn builtin() -> Result<Self, ConfigurationError> {
        Self::from_yaml_str(BUILTIN_RULES)
    }

    /// Find the rule covering `action` in `scope`.
    ///
    /// `None` means no rule exists, which is different from a rule with
    /// empty persona lists.
    pub fn lookup(&self, scope: &str, action: &str) -> Option<&PolicyRule> {
        self.by_scope
            .get(scope)
            .and_then(|actions| actions.get(action))
            .map(|&position| &self.rules[position])
    }

    /// Every `(scope, action, rule)` triple, in load order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str, &PolicyRule)> {
        self.rules.iter().flat_map(|rule| {
            rule.actions()
                .iter()
                .map(move |action| (rule.scope(), action.as_str(), rule))
        })
    }

    /// Scope names, sorted.
    pub fn scopes(&self) -> Vec<&str> {
        let mut scopes: Vec<&str> = self.by_scope.keys().map(String::as_str).collect();
        scopes.sort_unstable();
        scopes
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Number of distinct `(scope, action)` pairs covered.
    pub fn action_count(&self) -> usize {
        self.by_scope.values().map(HashMap::len).sum()
    }

    /// Rules that let a project persona through while saying nothing about
    /// a more privileged one.
    ///
    /// Reported for rule authors only. Evaluation never fills these in.
    pub fn hierarchy_gaps(&self) -> Vec<HierarchyGap> {
        let mut gaps = Vec::new();
        for rule in &self.rules {
            let listed = rule.allowed().union(&rule.denied());
            for omitted in Persona::ALL {
                let Some(rank) = omitted.project_rank() else {
                    continue;
                };
                if listed.contains(omitted) {
                    continue;
                }
                let lower = rule
                    .allowed()
                    .iter()
                    .filter(|p| p.project_rank().is_some_and(|r| r < rank))
                    .max_by_key(|p| p.project_rank());
                if let Some(allowed_lower) = lower {
                    gaps.push(HierarchyGap {
                        rule: rule.name().to_string(),
                        scope: rule.scope().to_string(),
                        omitted,
                        allowed_lower,
                    });
                }
            }
        }
        gaps
    }

    /// Emit a warning for every hierarchy gap.
    pub fn warn_hierarchy_gaps(&self) -> usize {
        let gaps = self.hierarchy_gaps();
        for gap in &gaps {
            warn!(rule = %gap.rule, scope = %gap.scope, "{}", gap);
        }
        gaps.len()
    }
}

/// A rule that allows a lower project persona but omits a higher one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HierarchyGap {
    pub rule: String,
    pub scope: String,
    pub omitted: Persona,
    pub allowed_lower: Persona,
}

impl fmt::Display for HierarchyGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rule '{}' allows {} but does not list {}; {} will be denied",
            self.rule, self.allowed_lower, self.omitted, self.omitted
        )
    }
}

/// A rule index pinned at one generation.
#[derive(Debug, Clone)]
pub struct RuleSnapshot {
    index: Arc<RuleIndex>,
    generation: u64,
}

impl RuleSnapshot {
    /// Number of swaps that happened before this index became current.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Deref for RuleSnapshot {
    type Target = RuleIndex;

    fn deref(&self) -> &RuleIndex {
        &self.index
    }
}

/// Shared handle to the active rule index.
///
/// Readers take a snapshot and evaluate against it without holding any
/// lock. A reload swaps the whole index in one step, so a reader sees
/// either the old rules or the new ones, never a mix.
#[derive(Debug)]
pub struct PolicyStore {
    current: RwLock<RuleSnapshot>,
}

impl PolicyStore {
    /// Create a store serving `index` as generation 0.
    pub fn new(index: RuleIndex) -> Self {
        Self {
            current: RwLock::new(RuleSnapshot {
                index: Arc::new(index),
                generation: 0,
            }),
        }
    }

    /// The active index.
    pub fn snapshot(&self) -> RuleSnapshot {
        self.current.read().clone()
    }

    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }

    /// Make `index` active and return the one it replaced.
    pub fn replace(&self, index: RuleIndex) -> Arc<RuleIndex> {
        let mut current = self.current.write();
        let generation = current.generation + 1;
        let previous = std::mem::replace(
            &mut *current,
            RuleSnapshot {
                index: Arc::new(index),
                generation,
            },
        );
        info!(generation, rules = current.index.len(), "Swapped policy rules");
        previous.index
    }

    /// Load `path` and swap it in.
    ///
    /// On failure the active rules stay in place and the error is returned.
    pub fn reload_from_file(&self, path: impl AsRef<Path>) -> Result<Arc<RuleIndex>, ConfigurationError> {
        let path = path.as_ref();
        match RuleIndex::from_file(path) {
            Ok(index) => Ok(self.replace(index)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Policy reload rejected, keeping active rules");
                Err(e)
            }
        }
    }
}

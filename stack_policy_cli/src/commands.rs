//! Command handlers.
//!
//! Each handler prints to stdout and returns the process exit status.

use serde::Serialize;
use stack_policy::{
    Decision, Persona, PersonaSet, PolicyEngine, PolicyEvaluator, PolicyManager, Query, RuleIndex,
};
use tracing::warn;

use crate::error::CliError;

/// Exit status for a denied `check`.
pub const EXIT_DENIED: u8 = 2;

pub fn validate(index: &RuleIndex) -> Result<u8, CliError> {
    println!(
        "Loaded {} rules covering {} actions in {} scopes",
        index.len(),
        index.action_count(),
        index.scopes().len()
    );

    let gaps = index.hierarchy_gaps();
    if gaps.is_empty() {
        println!("No hierarchy gaps found");
    } else {
        println!("Hierarchy gaps: {}", gaps.len());
        for gap in &gaps {
            println!("  warning: {}", gap);
        }
    }
    Ok(0)
}

#[derive(Serialize)]
struct CheckReport<'a> {
    scope: &'a str,
    action: &'a str,
    personas: PersonaSet,
    ignored_labels: &'a [String],
    #[serde(flatten)]
    decision: &'a Decision,
}

pub fn check(
    index: RuleIndex,
    scope: &str,
    action: &str,
    labels: &[String],
    json: bool,
) -> Result<u8, CliError> {
    let (personas, unknown) = PersonaSet::from_labels(labels.iter().map(String::as_str));
    for label in &unknown {
        warn!(label = %label, "Ignoring unknown persona");
    }

    let manager = PolicyManager::with_index(index, 0);
    let decision = manager.check(scope, action, personas)?;

    if json {
        let report = CheckReport {
            scope,
            action,
            personas,
            ignored_labels: &unknown,
            decision: &decision,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        if !unknown.is_empty() {
            println!("Ignored unknown personas: {}", unknown.join(", "));
        }
        println!("{} {}:{} for {}", decision.outcome, scope, action, personas);
        println!("  reason: {}", decision.reason);
        println!(
            "  rule:   {}",
            decision.matched_rule.as_deref().unwrap_or("(none)")
        );
    }

    Ok(if decision.is_permit() { 0 } else { EXIT_DENIED })
}

pub fn coverage(index: &RuleIndex) -> Result<u8, CliError> {
    let width = index
        .entries()
        .map(|(scope, action, _)| scope.len() + action.len() + 1)
        .max()
        .unwrap_or(0);

    for (scope, action, rule) in index.entries() {
        let call = format!("{}:{}", scope, action);
        match rule.description() {
            Some(description) => println!(
                "{:<width$}  {}  # {}",
                call,
                rule.name(),
                description,
                width = width
            ),
            None => println!("{:<width$}  {}", call, rule.name(), width = width),
        }
    }
    Ok(0)
}

pub fn matrix(index: &RuleIndex) -> Result<u8, CliError> {
    let evaluator = PolicyEvaluator::new();
    let width = index
        .entries()
        .map(|(scope, action, _)| scope.len() + action.len() + 1)
        .max()
        .unwrap_or(0);

    let mut header = format!("{:<width$}", "call", width = width);
    for persona in Persona::ALL {
        header.push_str(&format!("  {:<14}", persona.as_str()));
    }
    println!("{}", header.trim_end());

    for (scope, action, _) in index.entries() {
        let mut row = format!("{:<width$}", format!("{}:{}", scope, action), width = width);
        for persona in Persona::ALL {
            let query = Query::new(scope, action, PersonaSet::from(persona));
            let decision = evaluator.evaluate(index, &query)?;
            let cell = if decision.is_permit() { "PERMIT" } else { "-" };
            row.push_str(&format!("  {:<14}", cell));
        }
        println!("{}", row.trim_end());
    }
    Ok(0)
}

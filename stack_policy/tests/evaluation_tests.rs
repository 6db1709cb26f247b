// Evaluation tests against the built-in rule set and small hand-built ones.

use stack_policy::{
    ConfigurationError, Decision, Outcome, Persona, PersonaSet, PolicyEngine, PolicyEvaluator,
    Query, Reason, RuleIndex, RuleRecord,
};

fn personas(list: &[Persona]) -> PersonaSet {
    list.iter().copied().collect()
}

fn decide(index: &RuleIndex, scope: &str, action: &str, held: &[Persona]) -> Decision {
    PolicyEvaluator::new()
        .evaluate(index, &Query::new(scope, action, personas(held)))
        .unwrap()
}

/// Every non-empty combination of personas.
fn persona_combinations() -> Vec<PersonaSet> {
    (1u32..(1 << Persona::ALL.len()))
        .map(|mask| {
            Persona::ALL
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << *i) != 0)
                .map(|(_, p)| *p)
                .collect()
        })
        .collect()
}

#[test]
fn test_documented_scenarios() {
    let index = RuleIndex::builtin().unwrap();

    let cases: &[(&str, &str, &[Persona], Outcome, Reason)] = &[
        ("stacks", "create", &[Persona::ProjectMember], Outcome::Permit, Reason::ExplicitAllow),
        ("stacks", "create", &[Persona::ProjectReader], Outcome::Deny, Reason::NotInAllowList),
        ("service", "index", &[Persona::SystemAdmin], Outcome::Deny, Reason::ExplicitDeny),
        ("resource", "metadata", &[Persona::StackUser], Outcome::Permit, Reason::ExplicitAllow),
        (
            "actions",
            "snapshot",
            &[Persona::ProjectReader, Persona::StackUser],
            Outcome::Deny,
            Reason::NotInAllowList,
        ),
        ("unknown_scope", "anything", &[Persona::ProjectAdmin], Outcome::Deny, Reason::NoRuleDefined),
    ];

    for (scope, action, held, outcome, reason) in cases {
        let decision = decide(&index, scope, action, held);
        assert_eq!(decision.outcome, *outcome, "{}:{} for {:?}", scope, action, held);
        assert_eq!(decision.reason, *reason, "{}:{} for {:?}", scope, action, held);
    }
}

#[test]
fn test_actions_allowed_only_for_member() {
    let index = RuleIndex::builtin().unwrap();
    let rule = index.lookup("actions", "snapshot").unwrap();
    assert_eq!(rule.allowed(), PersonaSet::from(Persona::ProjectMember));
}

#[test]
fn test_default_deny_for_uncovered_calls() {
    let index = RuleIndex::builtin().unwrap();
    let uncovered = [
        ("stacks", "adopt"),
        ("volumes", "create"),
        ("events", "delete"),
        ("resource_types", "OS::Nova::Server"),
    ];
    for held in persona_combinations() {
        for (scope, action) in uncovered {
            let decision = PolicyEvaluator::new()
                .evaluate(&index, &Query::new(scope, action, held))
                .unwrap();
            assert_eq!(decision.outcome, Outcome::Deny);
            assert_eq!(decision.reason, Reason::NoRuleDefined);
        }
    }
}

#[test]
fn test_deny_precedence_over_union() {
    let index = RuleIndex::builtin().unwrap();
    for (scope, action, rule) in index.entries() {
        for held in persona_combinations() {
            if held.intersection(&rule.denied()).is_empty() {
                continue;
            }
            let decision = PolicyEvaluator::new()
                .evaluate(&index, &Query::new(scope, action, held))
                .unwrap();
            assert_eq!(decision.reason, Reason::ExplicitDeny, "{}:{} for {}", scope, action, held);
        }
    }
}

#[test]
fn test_permit_requires_explicit_membership() {
    let index = RuleIndex::builtin().unwrap();
    for (scope, action, rule) in index.entries() {
        for held in persona_combinations() {
            let decision = PolicyEvaluator::new()
                .evaluate(&index, &Query::new(scope, action, held))
                .unwrap();
            if decision.is_permit() {
                assert!(!held.intersection(&rule.allowed()).is_empty());
                assert!(held.intersection(&rule.denied()).is_empty());
            }
        }
    }
}

#[test]
fn test_system_admin_is_not_all_powerful() {
    let index = RuleIndex::builtin().unwrap();
    for (scope, action) in [("stacks", "global_index"), ("software_configs", "global_index"), ("stacks", "create")] {
        assert!(decide(&index, scope, action, &[Persona::SystemAdmin]).is_deny());
    }
}

#[test]
fn test_project_levels_do_not_cascade() {
    let index = RuleIndex::load(vec![(
        "member_only",
        RuleRecord::new("stacks", ["create"]).allow([Persona::ProjectMember]),
    )])
    .unwrap();

    assert!(decide(&index, "stacks", "create", &[Persona::ProjectMember]).is_permit());
    let admin = decide(&index, "stacks", "create", &[Persona::ProjectAdmin]);
    assert_eq!(admin.reason, Reason::NotInAllowList);
}

#[test]
fn test_determinism() {
    let index = RuleIndex::builtin().unwrap();
    let held = [Persona::ProjectReader, Persona::StackUser];
    let first = decide(&index, "resource", "signal", &held);
    for _ in 0..100 {
        assert_eq!(decide(&index, "resource", "signal", &held), first);
    }
}

#[test]
fn test_duplicate_create_fails_load() {
    let text = r#"
stacks_create:
  scope: stacks
  actions: [create]
  allowed: [project_member]
stacks_write:
  scope: stacks
  actions: [update, create]
  allowed: [project_admin]
"#;
    let err = RuleIndex::from_yaml_str(text).unwrap_err();
    assert!(matches!(
        err,
        ConfigurationError::DuplicateAction { ref action, .. } if action == "create"
    ));
}

#[test]
fn test_builtin_hierarchy_gaps_are_reported() {
    let index = RuleIndex::builtin().unwrap();
    let gaps: Vec<(String, Persona)> = index
        .hierarchy_gaps()
        .into_iter()
        .map(|gap| (gap.rule, gap.omitted))
        .collect();
    assert_eq!(
        gaps,
        vec![
            ("actions_member".to_string(), Persona::ProjectAdmin),
            ("stacks_create".to_string(), Persona::ProjectAdmin),
        ]
    );
}

use riskchain::{
    Action, ChainOutcome, Condition, ConditionRule, EngineConfig, FactValue, InferenceEngine,
    Operator, RecommendationPolicy, RuleCatalog, SessionState, TraceEvent,
};

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

fn scenario_a_catalog(reverse: bool) -> RuleCatalog {
    let mut rules = vec![
        ConditionRule::builder("new_account_high_amount")
            .when(Condition::new("account_age_days", Operator::Lt, 7))
            .when(Condition::new("amount", Operator::Gt, 1500))
            .then("fraud_risk", true, 0.7)
            .build()
            .unwrap(),
        ConditionRule::builder("elevated_ip_risk")
            .when(Condition::new("ip_risk_score", Operator::Ge, 50))
            .then("fraud_risk", true, 0.5)
            .build()
            .unwrap(),
    ];
    if reverse {
        rules.reverse();
    }
    RuleCatalog::builder().extend(rules).build().unwrap()
}

#[test]
fn independent_rules_merge_with_noisy_or() {
    let config = EngineConfig {
        recommendation: RecommendationPolicy::default().bind("fraud_risk", Action::Decline),
        ..EngineConfig::default()
    };
    let engine = InferenceEngine::with_config(scenario_a_catalog(false), config).unwrap();
    let mut session = engine
        .load_data([
            ("amount", 2000),
            ("ip_risk_score", 60),
            ("account_age_days", 2),
        ])
        .unwrap();

    let report = engine.forward_chain(&mut session).unwrap();
    assert!(report.reached_fixpoint());

    let (value, confidence) = session.facts().get("fraud_risk").unwrap();
    assert_eq!(value, &FactValue::Bool(true));
    assert_close(confidence, 0.85);

    let trace = engine.trace(&session);
    assert_eq!(trace.len(), 2);
    assert_eq!(report.trace(), trace.entries());
    let first = &trace.entries()[0];
    assert_eq!(first.rule.as_deref(), Some("new_account_high_amount"));
    assert_eq!(first.matched.len(), 2);
    assert!(matches!(first.event, TraceEvent::Asserted { .. }));
    let second = &trace.entries()[1];
    assert_eq!(second.event.before(), Some(0.7));
    assert_close(second.event.after().unwrap(), 0.85);

    let fact = session.facts().fact("fraud_risk").unwrap();
    let supporters: Vec<&str> = fact.supporting_rules().collect();
    assert_eq!(supporters, vec!["new_account_high_amount", "elevated_ip_risk"]);

    let recommendations = engine.get_recommendations(&session);
    assert_eq!(recommendations.len(), 1);
    let top = &recommendations[0];
    assert_eq!(top.action, Action::Decline);
    assert_close(top.confidence, 0.85);
    assert_eq!(top.supporting_keys, vec!["fraud_risk".to_string()]);
    assert_eq!(
        top.rules,
        vec!["new_account_high_amount".to_string(), "elevated_ip_risk".to_string()]
    );
}

#[test]
fn unmatched_input_yields_empty_trace_and_no_recommendations() {
    let engine = InferenceEngine::new(scenario_a_catalog(false));
    let mut session = engine
        .load_data([("amount", 20), ("ip_risk_score", 3), ("account_age_days", 400)])
        .unwrap();

    let report = engine.forward_chain(&mut session).unwrap();
    assert_eq!(report.outcome, ChainOutcome::Fixpoint);
    assert_eq!(report.iterations, 1);
    assert!(report.trace().is_empty());
    assert!(engine.trace(&session).is_empty());
    assert!(engine.get_recommendations(&session).is_empty());
    assert_eq!(session.facts().len(), 3);
}

#[test]
fn conflicting_conclusions_keep_first_value() {
    let catalog = RuleCatalog::builder()
        .rule(
            ConditionRule::builder("gold_tier")
                .when(Condition::new("spend", Operator::Gt, 1000))
                .then("tier", "gold", 0.9)
                .build()
                .unwrap(),
        )
        .rule(
            ConditionRule::builder("silver_tier")
                .when(Condition::new("spend", Operator::Gt, 100))
                .then("tier", "silver", 0.6)
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();
    let engine = InferenceEngine::new(catalog);
    let mut session = engine.load_data([("spend", 5000)]).unwrap();

    let report = engine.forward_chain(&mut session).unwrap();
    assert!(report.reached_fixpoint());

    let (value, confidence) = session.facts().get("tier").unwrap();
    assert_eq!(value, &FactValue::from("gold"));
    assert_close(confidence, 0.9);

    let conflicts: Vec<_> = session
        .trace()
        .iter()
        .filter(|e| matches!(e.event, TraceEvent::ValueConflict { .. }))
        .collect();
    assert_eq!(conflicts.len(), 1, "conflict is traced once per rule and key");
    assert_eq!(conflicts[0].rule.as_deref(), Some("silver_tier"));
    assert_eq!(conflicts[0].event.key(), Some("tier"));
    assert_eq!(session.trace().anomalies().count(), 1);
}

#[test]
fn circular_rules_terminate() {
    let catalog = RuleCatalog::builder()
        .rule(
            ConditionRule::builder("x_implies_y")
                .when(Condition::is_true("x"))
                .then("y", true, 0.5)
                .build()
                .unwrap(),
        )
        .rule(
            ConditionRule::builder("y_implies_x")
                .when(Condition::is_true("y"))
                .then("x", true, 0.5)
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();
    let engine = InferenceEngine::new(catalog);
    let mut session = engine.load_data([("x", (true, 0.5))]).unwrap();

    let report = engine.forward_chain(&mut session).unwrap();
    assert!(report.reached_fixpoint());
    assert!(report.iterations < engine.config().iteration_cap(2));
    assert_eq!(session.state(), SessionState::Fixpoint);

    // Both facts creep up to x = 0.5 + 0.5 * (0.5 * 0.5 * x), i.e. x = 4/7.
    let x = session.facts().get("x").unwrap().1;
    let y = session.facts().get("y").unwrap().1;
    assert!((x - 4.0 / 7.0).abs() < 1e-6, "x = {x}");
    assert!((y - 0.5 * x).abs() < 1e-6, "y = {y}");
}

#[test]
fn input_values_are_never_overwritten() {
    let catalog = RuleCatalog::builder()
        .rule(
            ConditionRule::builder("flip")
                .when(Condition::new("amount", Operator::Gt, 0))
                .then("amount", 0, 1.0)
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();
    let engine = InferenceEngine::new(catalog);
    let mut session = engine.load_data([("amount", 250)]).unwrap();
    engine.forward_chain(&mut session).unwrap();

    let fact = session.facts().fact("amount").unwrap();
    assert_eq!(fact.value, FactValue::from(250));
    assert!(fact.is_input());
    assert_close(fact.confidence, 1.0);
}

#[test]
fn final_facts_do_not_depend_on_rule_order() {
    let input = [
        ("amount", 2000),
        ("ip_risk_score", 60),
        ("account_age_days", 2),
    ];
    let forward = InferenceEngine::new(scenario_a_catalog(false))
        .evaluate(input)
        .unwrap();
    let backward = InferenceEngine::new(scenario_a_catalog(true))
        .evaluate(input)
        .unwrap();

    let facts_a: Vec<_> = forward.session.facts().iter().collect();
    let facts_b: Vec<_> = backward.session.facts().iter().collect();
    assert_eq!(facts_a.len(), facts_b.len());
    for ((key_a, a), (key_b, b)) in facts_a.iter().zip(&facts_b) {
        assert_eq!(key_a, key_b);
        assert_eq!(a.value, b.value);
        assert_close(a.confidence, b.confidence);
    }
}

#[test]
fn repeated_evaluations_produce_identical_traces() {
    let engine = InferenceEngine::new(scenario_a_catalog(false));
    let input = [
        ("amount", 2000),
        ("ip_risk_score", 60),
        ("account_age_days", 2),
    ];
    let first = engine.evaluate(input).unwrap();
    let second = engine.evaluate(input).unwrap();

    assert_ne!(first.session.id(), second.session.id());
    assert_eq!(first.session.trace(), second.session.trace());
    assert_eq!(
        first.session.trace().digest().unwrap(),
        second.session.trace().digest().unwrap()
    );
}

#[test]
fn priority_orders_rules_within_an_iteration() {
    let catalog = RuleCatalog::builder()
        .rule(
            ConditionRule::builder("low")
                .when(Condition::is_true("a"))
                .then("b", true, 0.4)
                .build()
                .unwrap(),
        )
        .rule(
            ConditionRule::builder("high")
                .priority(10)
                .when(Condition::is_true("a"))
                .then("c", true, 0.4)
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();
    let engine = InferenceEngine::new(catalog);
    let evaluation = engine.evaluate([("a", true)]).unwrap();

    let order: Vec<_> = evaluation
        .session
        .trace()
        .iter()
        .map(|e| (e.rule.clone().unwrap_or_default(), e.priority))
        .collect();
    assert_eq!(order, vec![("high".to_string(), 10), ("low".to_string(), 0)]);
}

#[test]
fn trace_serializes_to_json() {
    let engine = InferenceEngine::new(scenario_a_catalog(false));
    let evaluation = engine
        .evaluate([
            ("amount", 2000),
            ("ip_risk_score", 60),
            ("account_age_days", 2),
        ])
        .unwrap();

    let json = serde_json::to_value(evaluation.session.trace()).unwrap();
    let entries = json.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["event"]["kind"], "asserted");
    assert_eq!(entries[0]["rule"], "new_account_high_amount");
}

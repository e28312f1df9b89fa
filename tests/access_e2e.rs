//! Host data access, numeric coercion and per-rule fault containment.

use std::sync::{Arc, RwLock};

use salience::{
    impl_fact, Action, AssignOp, DataContext, EngineConfig, Expr, FactRef, KnowledgeBase, RuleDef, RuleEngine,
    Value,
};
use tracing_subscriber::EnvFilter;

// Swallowed rule failures are only visible in the log.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Default, Clone)]
struct Account {
    balance: i64,
    small: i8,
    quota: u32,
    rate: f64,
    name: String,
    checked: bool,
}

impl_fact!(Account {
    "Balance" => balance,
    "Small" => small,
    "Quota" => quota,
    "Rate" => rate,
    "Name" => name,
    "Checked" => checked,
});

fn field(name: &str) -> Expr {
    Expr::var("Account").field(name)
}

fn run(rules: &[RuleDef], account: Account, config: EngineConfig) -> (salience::RuleResult<()>, Account) {
    let mut kb = KnowledgeBase::new("Access", "1");
    for rule in rules {
        kb.add_rule(rule).unwrap();
    }
    let shared = Arc::new(RwLock::new(account));
    let mut data = DataContext::new();
    data.add_fact("Account", FactRef::from_shared(Arc::clone(&shared)));
    let result = RuleEngine::new(config).execute(&mut data, Some(&mut kb));
    let account = shared.read().unwrap().clone();
    (result, account)
}

fn once(name: &str) -> RuleDef {
    RuleDef::new(name).then(Action::call("Retract", [Expr::from(name)]))
}

#[test]
fn float_assignment_truncates_into_integer_fields() {
    let rule = once("Truncate")
        .when(field("Checked").eq(false))
        .then(Action::set(field("Balance"), 12.9))
        .then(Action::set(field("Small"), -3.7))
        .then(Action::set(field("Quota"), 7.99))
        .then(Action::set(field("Checked"), true));
    let (result, account) = run(&[rule], Account::default(), EngineConfig::default());
    result.unwrap();
    assert_eq!(account.balance, 12);
    assert_eq!(account.small, -3);
    assert_eq!(account.quota, 7);
    assert!(account.checked);
}

#[test]
fn compound_assignment_and_mixed_comparison() {
    let rules = [
        RuleDef::new("Decrement")
            .when(field("Balance").gt(10))
            .then(Action::update(field("Balance"), AssignOp::Sub, 1)),
        once("Compare")
            .salience(-1)
            .when(field("Balance").eq(10.0).and(Expr::lit(12).eq(12.0)))
            .then(Action::update(field("Rate"), AssignOp::Mul, 2))
            .then(Action::update(field("Name"), AssignOp::Add, "-done")),
    ];
    let account = Account {
        balance: 13,
        rate: 1.25,
        name: "acct".into(),
        ..Account::default()
    };
    let (result, account) = run(&rules, account, EngineConfig::default());
    result.unwrap();
    assert_eq!(account.balance, 10);
    assert!((account.rate - 2.5).abs() < f64::EPSILON);
    assert_eq!(account.name, "acct-done");
}

#[test]
fn string_methods_in_conditions() {
    let rule = once("Prefix")
        .when(
            field("Name")
                .method("HasPrefix", [Expr::from("ac")])
                .and(field("Name").method("ToUpper", []).eq("ACCT"))
                .and(field("Name").method("Len", []).eq(4)),
        )
        .then(Action::set(field("Checked"), true));
    let account = Account {
        name: "acct".into(),
        ..Account::default()
    };
    let (result, account) = run(&[rule], account, EngineConfig::default());
    result.unwrap();
    assert!(account.checked);
}

fn out_of_bounds_rules() -> Vec<RuleDef> {
    vec![
        once("Peek")
            .salience(5)
            .when(Expr::var("Cart").field("Items").index(5).eq(1))
            .then(Action::set(Expr::var("Cart").field("Seen"), true)),
        once("Healthy").then(Action::set(Expr::var("Cart").field("Total"), 6)).when(Expr::lit(true)),
    ]
}

fn cart() -> DataContext {
    let mut data = DataContext::new();
    data.add_json("Cart", br#"{"Items": [1, 2, 3], "Seen": false, "Total": 0}"#).unwrap();
    data
}

#[test]
fn out_of_bounds_index_is_contained_in_loose_mode() {
    init_tracing();
    let mut kb = KnowledgeBase::new("Cart", "1");
    for rule in out_of_bounds_rules() {
        kb.add_rule(&rule).unwrap();
    }
    let mut data = cart();
    let report = RuleEngine::default().execute_with_report(&mut data, Some(&mut kb)).unwrap();
    assert_eq!(report.fired, ["Healthy"]);
    assert_eq!(data.get("Cart.Seen").unwrap().into_value(), Value::Bool(false));
    assert_eq!(data.get("Cart.Total").unwrap().into_value(), Value::from(6_i64));
}

#[test]
fn out_of_bounds_index_aborts_in_strict_mode() {
    init_tracing();
    let mut kb = KnowledgeBase::new("Cart", "1");
    for rule in out_of_bounds_rules() {
        kb.add_rule(&rule).unwrap();
    }
    let mut data = cart();
    let strict = RuleEngine::new(EngineConfig::default().with_strict(true));
    let err = strict.execute(&mut data, Some(&mut kb)).unwrap_err();
    assert!(err.is_access());
    assert!(err.to_string().contains("out of bounds"));
    assert_eq!(data.get("Cart.Total").unwrap().into_value(), Value::from(0_i64));
}

#[test]
fn json_facts_are_navigable_and_writable() {
    let mut kb = KnowledgeBase::new("Json", "1");
    kb.add_rule(
        &once("Tag")
            .when(Expr::path(r#"Order.Lines[1]["sku"]"#).unwrap().eq("B-2"))
            .then(Action::set(Expr::path(r#"Order.Lines[1]["qty"]"#).unwrap(), 5))
            .then(Action::eval(Expr::path("Order.Tags").unwrap().method("Append", [Expr::from("bulk")]))),
    )
    .unwrap();
    let mut data = DataContext::new();
    data.add_json(
        "Order",
        br#"{"Lines": [{"sku": "A-1", "qty": 1}, {"sku": "B-2", "qty": 2}], "Tags": []}"#,
    )
    .unwrap();
    RuleEngine::default().execute(&mut data, Some(&mut kb)).unwrap();
    assert_eq!(data.get(r#"Order.Lines[1]["qty"]"#).unwrap().into_value(), Value::from(5_i64));
    assert_eq!(
        data.get("Order.Tags").unwrap().into_value(),
        Value::Array(vec![Value::from("bulk")])
    );
}

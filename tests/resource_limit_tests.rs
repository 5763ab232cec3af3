//! Step and memory ceilings on evaluation, and recovery after an abort.

use deductive::ast::builders::{atom, RuleBuilder};
use deductive::execution::ResourceLimits;
use deductive::{Database, EngineError, RelationState, Value};

// Test Helpers
fn numbers(n: i64) -> Database {
    let mut db = Database::new();
    for i in 0..n {
        db.insert("num", &[Value::Integer(i)]).unwrap();
    }
    db.add_rule(
        &RuleBuilder::new("pair")
            .head_vars(["X", "Y"])
            .body_atom("num", ["X"])
            .body_atom("num", ["Y"])
            .build(),
    )
    .unwrap();
    db
}

fn chain(db: &mut Database, length: i64) {
    for i in 0..length {
        db.insert("edge", &[Value::Integer(i), Value::Integer(i + 1)]).unwrap();
    }
    db.add_rule(&RuleBuilder::new("path").head_vars(["X", "Y"]).body_atom("edge", ["X", "Y"]).build())
        .unwrap();
    db.add_rule(
        &RuleBuilder::new("path")
            .head_vars(["X", "Y"])
            .body_atom("path", ["X", "Z"])
            .body_atom("edge", ["Z", "Y"])
            .build(),
    )
    .unwrap();
}

// Step Limit Tests
#[test]
fn test_step_limit_aborts_query() {
    let mut db = numbers(50);
    db.set_limits(ResourceLimits::unlimited().with_max_steps(100));
    let err = db.query(&atom("pair", ["X", "Y"]).into()).unwrap_err();
    assert_eq!(err, EngineError::StepLimitExceeded { limit: 100 });
    assert!(db.diagnostics().errors().contains(&err));
}

#[test]
fn test_rows_derived_before_abort_remain() {
    let mut db = numbers(50);
    db.set_limits(ResourceLimits::unlimited().with_max_steps(100));
    assert!(db.rows("pair", 2).is_err());

    let name = db.predicate("pair", 2);
    let relation = db.relation(&name).unwrap();
    assert_eq!(relation.state(), RelationState::Unanalyzed);
    let partial = relation.table().len();
    assert!(partial > 0 && partial < 2500, "{partial}");

    db.set_limits(ResourceLimits::unlimited());
    assert_eq!(db.rows("pair", 2).unwrap().len(), 2500);
}

#[test]
fn test_generous_limit_succeeds() {
    let mut db = numbers(10);
    db.set_limits(ResourceLimits::unlimited().with_max_steps(1_000_000));
    let result = db.query(&atom("pair", ["X", "Y"]).into()).unwrap();
    assert_eq!(result.len(), 100);
    assert!(db.is_successful());
}

#[test]
fn test_recursive_unit_recovers_after_abort() {
    let mut db = Database::new();
    chain(&mut db, 40);
    db.set_limits(ResourceLimits::unlimited().with_max_steps(200));
    let err = db.query(&atom("path", ["X", "Y"]).into()).unwrap_err();
    assert!(err.is_limit());

    db.set_limits(ResourceLimits::unlimited());
    let result = db.query(&atom("path", ["X", "Y"]).into()).unwrap();
    // 40 + 39 + ... + 1 paths along the chain
    assert_eq!(result.len(), 40 * 41 / 2);
}

#[test]
fn test_limit_applies_per_query() {
    let mut db = Database::new();
    for i in 0..30 {
        db.insert("a", &[Value::Integer(i)]).unwrap();
        db.insert("b", &[Value::Integer(i)]).unwrap();
    }
    db.add_rule(&RuleBuilder::new("ca").head_vars(["X"]).body_atom("a", ["X"]).build())
        .unwrap();
    db.add_rule(&RuleBuilder::new("cb").head_vars(["X"]).body_atom("b", ["X"]).build())
        .unwrap();
    // Each query needs about 60 steps; together they would exceed 100.
    db.set_limits(ResourceLimits::unlimited().with_max_steps(100));
    assert_eq!(db.rows("ca", 1).unwrap().len(), 30);
    assert_eq!(db.rows("cb", 1).unwrap().len(), 30);
}

// Memory Limit Tests
#[test]
fn test_memory_limit_aborts_query() {
    let mut db = numbers(200);
    db.set_limits(
        ResourceLimits::unlimited()
            .with_max_memory(64 * 1024)
            .with_memory_check_interval(100),
    );
    let err = db.query(&atom("pair", ["X", "Y"]).into()).unwrap_err();
    assert!(matches!(err, EngineError::MemoryLimitExceeded { limit, used } if limit == 64 * 1024 && used > limit));
    assert!(err.is_limit());
}

#[test]
fn test_memory_limit_not_reached() {
    let mut db = numbers(5);
    db.set_limits(
        ResourceLimits::unlimited()
            .with_max_memory(64 * 1024 * 1024)
            .with_memory_check_interval(1),
    );
    assert_eq!(db.rows("pair", 2).unwrap().len(), 25);
}

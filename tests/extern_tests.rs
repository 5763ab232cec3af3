//! Extern predicates called from rule bodies.

use deductive::ast::builders::{atom, PredicateBuilder, RuleBuilder};
use deductive::{ArgMode, Database, EngineError, ExternModule, ExternRegistry, StandardModule, Value};
use std::collections::BTreeSet;

// Test Helpers
fn standard_db() -> Database {
    let mut db = Database::new();
    db.load_module(&StandardModule).unwrap();
    for i in 1..=3 {
        db.insert("num", &[Value::Integer(i)]).unwrap();
    }
    db
}

fn integer_rows(db: &mut Database, name: &str, arity: usize) -> BTreeSet<Vec<i64>> {
    db.rows(name, arity)
        .unwrap()
        .into_iter()
        .map(|row| row.iter().filter_map(Value::as_integer).collect())
        .collect()
}

fn pairs(items: &[(i64, i64)]) -> BTreeSet<Vec<i64>> {
    items.iter().map(|&(a, b)| vec![a, b]).collect()
}

// Standard Module
#[test]
fn test_add_forward() {
    let mut db = standard_db();
    db.add_rule(
        &RuleBuilder::new("next")
            .head_vars(["X", "Y"])
            .body_atom("num", ["X"])
            .body(PredicateBuilder::new("add").var("X").int(1).var("Y").clause())
            .build(),
    )
    .unwrap();
    assert_eq!(integer_rows(&mut db, "next", 2), pairs(&[(1, 2), (2, 3), (3, 4)]));
    assert!(db.is_successful());
}

#[test]
fn test_add_backward_uses_other_registration() {
    let mut db = standard_db();
    // add(1, X, Y) with Y bound runs the (In, Out, In) registration
    db.add_rule(
        &RuleBuilder::new("less")
            .head_vars(["X", "Y"])
            .body_atom("num", ["Y"])
            .body(PredicateBuilder::new("add").int(1).var("X").var("Y").clause())
            .build(),
    )
    .unwrap();
    assert_eq!(integer_rows(&mut db, "less", 2), pairs(&[(0, 1), (1, 2), (2, 3)]));
}

#[test]
fn test_range_produces_many_rows() {
    let mut db = standard_db();
    db.add_rule(
        &RuleBuilder::new("digit")
            .head_vars(["X"])
            .body(PredicateBuilder::new("range").int(0).int(5).var("X").clause())
            .build(),
    )
    .unwrap();
    let digits: BTreeSet<i64> = integer_rows(&mut db, "digit", 1).into_iter().flatten().collect();
    assert_eq!(digits, (0..5).collect());
}

#[test]
fn test_fully_bound_call_filters() {
    let mut db = standard_db();
    db.add_rule(
        &RuleBuilder::new("two")
            .head_vars(["X"])
            .body_atom("num", ["X"])
            .body(PredicateBuilder::new("add").var("X").int(1).int(3).clause())
            .build(),
    )
    .unwrap();
    assert_eq!(integer_rows(&mut db, "two", 1), BTreeSet::from([vec![2]]));
}

#[test]
fn test_length_of_strings() {
    let mut db = Database::new();
    db.load_module(&StandardModule).unwrap();
    for word in ["ab", "héllo", ""] {
        let value = db.string(word);
        db.insert("word", &[value]).unwrap();
    }
    db.add_rule(
        &RuleBuilder::new("size")
            .head_vars(["N"])
            .body_atom("word", ["W"])
            .body(PredicateBuilder::new("length").var("W").var("N").clause())
            .build(),
    )
    .unwrap();
    let sizes: BTreeSet<i64> = integer_rows(&mut db, "size", 1).into_iter().flatten().collect();
    assert_eq!(sizes, BTreeSet::from([0, 2, 5]));
}

// Host Registrations
#[test]
fn test_custom_extern() {
    let mut db = standard_db();
    db.register_extern("double", &[("x", ArgMode::In), ("y", ArgMode::Out)], |cx| {
        let x = cx.get_integer(0).ok_or("double expects an integer")?;
        cx.set_integer(1, x * 2);
        cx.yield_row();
        Ok(())
    });
    db.add_rule(
        &RuleBuilder::new("doubled")
            .head_vars(["X", "Y"])
            .body_atom("num", ["X"])
            .body(PredicateBuilder::new("double").var("X").var("Y").clause())
            .build(),
    )
    .unwrap();
    assert_eq!(integer_rows(&mut db, "doubled", 2), pairs(&[(1, 2), (2, 4), (3, 6)]));
}

#[test]
fn test_extern_failure_is_isolated() {
    let mut db = standard_db();
    db.register_extern("odd", &[("x", ArgMode::In)], |cx| match cx.get_integer(0) {
        Some(2) => Err("two is not welcome".to_string()),
        Some(x) if x % 2 == 1 => {
            cx.yield_row();
            Ok(())
        }
        _ => Ok(()),
    });
    db.add_rule(
        &RuleBuilder::new("odds")
            .head_vars(["X"])
            .body_atom("num", ["X"])
            .body(PredicateBuilder::new("odd").var("X").clause())
            .build(),
    )
    .unwrap();

    let result = db.query(&atom("odds", ["X"]).into()).unwrap();
    assert_eq!(result.column("X").map(|c| c.len()), Some(2));
    assert_eq!(db.error_count(), 1);
    assert!(matches!(
        &db.diagnostics().errors()[0],
        EngineError::ExternCall { name, message } if name == "odd" && message.contains("two")
    ));
}

#[test]
fn test_unresolvable_call_is_a_compile_error() {
    let mut db = standard_db();
    db.add_rule(
        &RuleBuilder::new("sums")
            .head_vars(["A", "B", "C"])
            .body(PredicateBuilder::new("add").var("A").var("B").var("C").clause())
            .build(),
    )
    .unwrap();
    assert!(db
        .diagnostics()
        .errors()
        .iter()
        .any(|e| matches!(e, EngineError::ExternCall { name, .. } if name == "add")));
    assert!(db.rows("sums", 3).unwrap().is_empty());
}

// Modules
struct Broken;

impl ExternModule for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    fn register(&self, _registry: &mut ExternRegistry) -> Result<(), String> {
        Err("missing symbol".to_string())
    }
}

#[test]
fn test_module_load_failure_is_reported() {
    let mut db = Database::new();
    let err = db.load_module(&Broken).unwrap_err();
    assert!(matches!(err, EngineError::ModuleLoad { ref module, .. } if module == "broken"));
    assert_eq!(db.error_count(), 1);
}

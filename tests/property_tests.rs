//! Property-based tests (proptest).

use proptest::prelude::*;
use std::collections::{BTreeSet, HashMap, HashSet};

use deductive::ast::builders::{atom, RuleBuilder};
use deductive::compiler::context::CompilationContext;
use deductive::config::{Config, EvaluationMode};
use deductive::interner::StrId;
use deductive::table::primes::{probe, TABLE_SIZES};
use deductive::table::Table;
use deductive::value::encoding::{decode, encode};
use deductive::{Database, Value};

fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::None),
        any::<i64>().prop_map(Value::Integer),
        (-1000i64..=1000).prop_map(Value::Integer),
        any::<f64>().prop_map(Value::Float),
        any::<bool>().prop_map(Value::Boolean),
        any::<u32>().prop_map(|id| Value::String(StrId(id))),
        (0u32..0x2_0000).prop_map(|id| Value::Atom(StrId(id))),
        any::<u32>().prop_map(Value::Char),
        any::<u8>().prop_map(Value::Byte),
        any::<u64>().prop_map(Value::Opaque),
    ]
}

/// Reference closure of `edges` by repeated squaring on a set.
fn closure(edges: &[(i64, i64)]) -> BTreeSet<(i64, i64)> {
    let mut paths: BTreeSet<(i64, i64)> = edges.iter().copied().collect();
    loop {
        let mut added = false;
        let snapshot: Vec<_> = paths.iter().copied().collect();
        for &(a, b) in &snapshot {
            for &(c, d) in edges {
                if b == c && paths.insert((a, d)) {
                    added = true;
                }
            }
        }
        if !added {
            return paths;
        }
    }
}

fn path_rows(edges: &[(i64, i64)], config: Config) -> BTreeSet<(i64, i64)> {
    let mut db = Database::with_config(config);
    for &(a, b) in edges {
        db.insert("edge", &[Value::Integer(a), Value::Integer(b)]).unwrap();
    }
    db.add_rule(&RuleBuilder::new("path").head_vars(["X", "Y"]).body_atom("edge", ["X", "Y"]).build())
        .unwrap();
    db.add_rule(
        &RuleBuilder::new("path")
            .head_vars(["X", "Y"])
            .body_atom("path", ["X", "Z"])
            .body_atom("path", ["Z", "Y"])
            .build(),
    )
    .unwrap();
    db.rows("path", 2)
        .unwrap()
        .into_iter()
        .filter_map(|row| Some((row[0].as_integer()?, row[1].as_integer()?)))
        .collect()
}

proptest! {
    #[test]
    fn prop_encoding_roundtrip(value in value_strategy()) {
        let bytes = encode(&value);
        let (back, used) = decode(&bytes).unwrap();
        prop_assert_eq!(used, bytes.len());
        prop_assert_eq!(back.payload_bits(), value.payload_bits());
        prop_assert_eq!(back, value);
    }

    #[test]
    fn prop_probe_visits_every_cell(hash in any::<u64>(), index in 0usize..12) {
        let size = TABLE_SIZES[index];
        let mut seen = vec![false; size];
        for step in 0..size {
            let cell = probe(hash, step, size);
            prop_assert!(!seen[cell], "cell {} revisited at step {}", cell, step);
            seen[cell] = true;
        }
    }

    #[test]
    fn prop_set_semantics(rows in prop::collection::vec((any::<i64>(), any::<i64>()), 0..200)) {
        let mut table = Table::new(2, 0).unwrap();
        let mut expected = HashSet::new();
        for &(a, b) in &rows {
            let row = [Value::Integer(a), Value::Integer(b)];
            prop_assert_eq!(table.add(&row), expected.insert((a, b)));
            let len = table.len();
            prop_assert!(!table.add(&row));
            prop_assert_eq!(table.len(), len);
        }
        prop_assert_eq!(table.len(), expected.len());
    }

    #[test]
    fn prop_branch_bindings_do_not_leak(names in prop::collection::vec(0u32..20, 1..10)) {
        let mut ctx = CompilationContext::new();
        let point = ctx.branch();
        let mut slots = HashMap::new();
        for &n in &names {
            let (slot, _) = ctx.bind_variable(StrId(n));
            prop_assert_eq!(*slots.entry(n).or_insert(slot), slot);
        }
        ctx.rewind(point);
        let mut seen = HashSet::new();
        for &n in &names {
            if !seen.insert(n) {
                continue;
            }
            prop_assert!(!ctx.is_bound(StrId(n)));
            let (again, was_bound) = ctx.bind_variable(StrId(n));
            prop_assert_eq!(again, slots[&n]);
            prop_assert!(!was_bound);
        }
    }

    #[test]
    fn prop_semi_naive_matches_naive(edges in prop::collection::vec((0i64..8, 0i64..8), 0..24)) {
        let semi = path_rows(&edges, Config::default());
        let mut naive_config = Config::default();
        naive_config.engine.evaluation = EvaluationMode::Naive;
        let naive = path_rows(&edges, naive_config);
        let mut unoptimized = Config::default();
        unoptimized.optimizer.binding_patterns = false;
        unoptimized.optimizer.eliminate_dead_bindings = false;
        let plain = path_rows(&edges, unoptimized);

        let expected = closure(&edges);
        prop_assert_eq!(&semi, &expected);
        prop_assert_eq!(&naive, &expected);
        prop_assert_eq!(&plain, &expected);
    }

    #[test]
    fn prop_units_are_strongly_connected_components(
        links in prop::collection::vec((0usize..6, 0usize..6), 0..14)
    ) {
        const N: usize = 6;
        let mut db = Database::new();
        let names: Vec<String> = (0..N).map(|i| format!("r{i}")).collect();
        for (i, name) in names.iter().enumerate() {
            db.insert(name, &[Value::Integer(i as i64)]).unwrap();
        }
        for &(head, body) in &links {
            let rule = RuleBuilder::new(names[head].as_str())
                .head_vars(["X"])
                .body_atom(&names[body], ["X"])
                .build();
            db.add_rule(&rule).unwrap();
        }
        db.evaluate().unwrap();

        // reach[a][b]: a reads b, transitively
        let mut reach = [[false; N]; N];
        for (i, row) in reach.iter_mut().enumerate() {
            row[i] = true;
        }
        for &(head, body) in &links {
            reach[head][body] = true;
        }
        for k in 0..N {
            for i in 0..N {
                for j in 0..N {
                    if reach[i][k] && reach[k][j] {
                        reach[i][j] = true;
                    }
                }
            }
        }

        let units: Vec<_> = (0..N)
            .map(|i| {
                let name = db.predicate(&names[i], 1);
                db.relation(&name).and_then(|r| r.unit())
            })
            .collect();
        for i in 0..N {
            for j in 0..N {
                let same = units[i] == units[j];
                prop_assert_eq!(same, reach[i][j] && reach[j][i], "r{} r{}", i, j);
            }
            let rows: BTreeSet<i64> = db
                .rows(&names[i], 1)
                .unwrap()
                .into_iter()
                .filter_map(|r| r[0].as_integer())
                .collect();
            let expected: BTreeSet<i64> = (0..N).filter(|&j| reach[i][j]).map(|j| j as i64).collect();
            prop_assert_eq!(rows, expected);
        }
    }
}

#[test]
fn test_query_matches_reference_closure() {
    let edges = [(1, 2), (2, 3), (3, 1), (4, 4)];
    let mut db = Database::new();
    for (a, b) in edges {
        db.insert("edge", &[Value::Integer(a), Value::Integer(b)]).unwrap();
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
    let result = db.query(&atom("path", ["X", "Y"]).into()).unwrap();
    assert_eq!(result.len(), closure(&edges).len());
}

use super::*;

fn int_value(store: &mut Store, v: i64) -> ValueId {
    store.allocate(Value::Int(v))
}

#[test]
fn test_reference_counting() {
    let mut store = Store::default();
    let id = int_value(&mut store, 42);
    assert_eq!(store.refcount(id), Ok(1));

    store.retain(id).unwrap();
    assert_eq!(store.refcount(id), Ok(2));
    store.release(id).unwrap();
    assert_eq!(store.refcount(id), Ok(1));
    assert!(store.is_alive(id));

    store.release(id).unwrap();
    assert!(!store.is_alive(id));
    assert_eq!(store.live_count(), 0);
    assert_eq!(store.get(id).unwrap_err().kind(), &EvalErrorKind::UseAfterFree(id));
    assert!(store.retain(id).is_err());
}

#[test]
fn test_reused_slot_has_new_generation() {
    let mut store = Store::default();
    let old = int_value(&mut store, 1);
    store.release(old).unwrap();

    let new = store.allocate(Value::Text("new".to_string()));
    assert_eq!(new.index, old.index);
    assert_ne!(new.generation, old.generation);
    assert_ne!(new, old);

    // The stale handle does not reach the new occupant
    assert_eq!(store.kind(old).unwrap_err().kind(), &EvalErrorKind::UseAfterFree(old));
    assert_eq!(store.kind(new), Ok(ValueKind::Text));
}

#[test]
fn test_release_cascades() {
    let mut store = Store::default();
    let shared = int_value(&mut store, 7);
    store.retain(shared).unwrap();
    let inner = store.allocate(Value::List(vec![shared]));
    let outer = store.allocate(Value::List(vec![inner, shared]));
    assert_eq!(store.live_count(), 3);
    assert_eq!(store.refcount(shared), Ok(2));

    store.release(outer).unwrap();
    assert_eq!(store.live_count(), 0);
    assert!(!store.is_alive(inner));
    assert!(!store.is_alive(shared));

    // Deep nesting is released without recursion
    let mut current = store.allocate(Value::List(Vec::new()));
    for _ in 0..100_000 {
        current = store.allocate(Value::List(vec![current]));
    }
    assert_eq!(store.live_count(), 100_001);
    store.release(current).unwrap();
    assert_eq!(store.live_count(), 0);
}

#[test]
fn test_mutations() {
    let mut store = Store::default();
    let elem = int_value(&mut store, 1);
    let list = store.allocate(Value::List(Vec::new()));

    assert_eq!(store.mutate_in_place(list, Mutation::Append(elem)), Ok(None));
    assert_eq!(store.refcount(elem), Ok(2));
    assert_eq!(store.mutate_in_place(list, Mutation::Repeat(3)), Ok(None));
    assert_eq!(store.refcount(elem), Ok(4));

    // Removal hands the list's reference over
    assert_eq!(store.mutate_in_place(list, Mutation::Remove(0)), Ok(Some(elem)));
    assert_eq!(store.refcount(elem), Ok(4));
    store.release(elem).unwrap();

    let other = int_value(&mut store, 2);
    store.mutate_in_place(list, Mutation::Replace(0, other)).unwrap();
    assert_eq!(store.refcount(elem), Ok(2));
    assert_eq!(store.refcount(other), Ok(2));

    store.mutate_in_place(list, Mutation::Splice{ start: 0, end: 2, items: vec![] }).unwrap();
    assert_eq!(store.get(list).unwrap().as_list(), Some(&[][..]));
    assert_eq!(store.refcount(elem), Ok(1));
    assert_eq!(store.refcount(other), Ok(1));
}

#[test]
fn test_failed_mutation_changes_nothing() {
    let mut store = Store::default();
    let number = int_value(&mut store, 3);
    let text = store.allocate(Value::Text("abc".to_string()));
    let elem = int_value(&mut store, 1);
    let list = store.allocate(Value::List(Vec::new()));

    assert_eq!(
        store.mutate_in_place(number, Mutation::Append(elem)).unwrap_err().kind(),
        &EvalErrorKind::ImmutableTarget(ValueKind::Int)
    );
    assert_eq!(
        store.mutate_in_place(text, Mutation::Repeat(2)).unwrap_err().kind(),
        &EvalErrorKind::ImmutableTarget(ValueKind::Text)
    );
    assert_eq!(
        store.mutate_in_place(list, Mutation::Replace(0, elem)).unwrap_err().kind(),
        &EvalErrorKind::IndexOutOfRange{ kind: ValueKind::List, index: 0, len: 0 }
    );
    assert!(matches!(
        store.mutate_in_place(list, Mutation::MapInsert{ key: elem, value: elem }).unwrap_err().kind(),
        EvalErrorKind::TypeMismatch{ .. }
    ));
    assert_eq!(store.refcount(elem), Ok(1));
    assert_eq!(store.get(text).unwrap().as_text(), Some("abc"));
}

#[test]
fn test_mapping_mutations() {
    let mut store = Store::default();
    let mapping = store.allocate(Value::Mapping(Mapping::default()));
    let int_key = int_value(&mut store, 1);
    let float_key = store.allocate(Value::Float(1.0));
    let first = int_value(&mut store, 10);
    let second = int_value(&mut store, 20);

    store.mutate_in_place(mapping, Mutation::MapInsert{ key: int_key, value: first }).unwrap();
    store.mutate_in_place(mapping, Mutation::MapInsert{ key: float_key, value: second }).unwrap();

    // The pair keeps its first key, only the value is replaced
    let pairs: Vec<_> = store.get(mapping).unwrap().as_mapping().unwrap()
        .pairs()
        .map(|(_, k, v)| (k, v))
        .collect();
    assert_eq!(pairs, vec![(int_key, second)]);
    assert_eq!(store.refcount(int_key), Ok(2));
    assert_eq!(store.refcount(float_key), Ok(1));
    assert_eq!(store.refcount(first), Ok(1));
    assert_eq!(store.refcount(second), Ok(2));

    let removed = store.mutate_in_place(mapping, Mutation::MapRemove(MapKey::Int(1))).unwrap();
    assert_eq!(removed, Some(second));
    assert_eq!(store.refcount(int_key), Ok(1));
    assert_eq!(store.refcount(second), Ok(2));

    assert_eq!(
        store.mutate_in_place(mapping, Mutation::MapRemove(MapKey::Int(1))).unwrap_err().kind(),
        &EvalErrorKind::KeyNotFound("1".to_string())
    );

    let list = store.allocate(Value::List(Vec::new()));
    assert_eq!(
        store.mutate_in_place(mapping, Mutation::MapInsert{ key: list, value: first }).unwrap_err().kind(),
        &EvalErrorKind::UnhashableKey(ValueKind::List)
    );
}

#[test]
fn test_self_referencing_list_is_reclaimed() {
    let mut tester = Tester::new_program_expect_ok("self append", vec![
        assign("L", ints(&[1])),
        expr(method(var("L"), Method::Append, vec![var("L")])),
        Statement::Delete(vec![name("L")]),
    ])
        // Unreachable, but kept alive by its own reference
        .assert_live(2)
        .assert_unbound("L");

    assert_eq!(tester.evaluator().collect_cycles(), 1);
    let mut tester = tester.assert_live(0);

    // A second scan finds nothing
    assert_eq!(tester.evaluator().collect_cycles(), 0);
    assert_eq!(tester.evaluator().stats().scans, 2);
    assert_eq!(tester.evaluator().stats().reclaimed_by_scan, 1);
}

#[test]
fn test_mutual_cycle_is_reclaimed() {
    let mut tester = Tester::new_program_expect_ok("two lists", vec![
        assign("A", list(vec![])),
        assign("B", list(vec![var("A")])),
        expr(method(var("A"), Method::Append, vec![var("B")])),
        Statement::Delete(vec![name("A"), name("B")]),
    ]).assert_live(2);

    assert_eq!(tester.evaluator().collect_cycles(), 2);
    tester.assert_live(0);
}

#[test]
fn test_cycle_scan_keeps_reachable_values() {
    let mut tester = Tester::new_program_expect_ok("survivors", vec![
        // Garbage cycle referencing a bound list
        assign("X", ints(&[5])),
        assign("G", list(vec![var("X")])),
        expr(method(var("G"), Method::Append, vec![var("G")])),
        Statement::Delete(vec![name("G")]),
        // Cycle that is still reachable through a binding
        assign("K", list(vec![])),
        expr(method(var("K"), Method::Append, vec![var("K")])),
        assign("H", list(vec![var("K")])),
        Statement::Delete(vec![name("K")]),
    ]);

    let before = tester.live();
    assert_eq!(tester.evaluator().collect_cycles(), 1);
    let x = tester.id_of("X");
    assert_eq!(tester.evaluator().store().refcount(x), Ok(1));
    assert_eq!(tester.live(), before - 1);

    tester
        .assert_renders("X", "[5]")
        .assert_renders("H", "[[[...]]]");
}

#[test]
fn test_automatic_cycle_scan() {
    let config = EvalConfig{ cycle_scan_threshold: 5, ..EvalConfig::default() };
    let mut tester = Tester::new("scan between statements")
        .with_config(config)
        .with_statement(for_loop(name("i"), call(Builtin::Range, vec![int(20)]), vec![
            assign("L", list(vec![])),
            expr(method(var("L"), Method::Append, vec![var("L")])),
        ], vec![]))
        .run()
        .expect_ok();

    let stats = tester.evaluator().stats();
    assert!(stats.scans > 0, "no automatic scan ran");
    assert!(stats.reclaimed_by_scan > 0, "automatic scans reclaimed nothing");
    // Between scans fewer than threshold worth of cycles can pile up
    assert!(tester.live() < 20);

    let mut tester = tester
        .then(vec![Statement::Delete(vec![name("L"), name("i")])])
        .expect_ok();
    tester.evaluator().collect_cycles();
    tester.assert_live(0);
}

#[test]
fn test_scanning_can_be_disabled() {
    let config = EvalConfig{ cycle_scan_threshold: 0, ..EvalConfig::default() };
    let mut tester = Tester::new("no scans")
        .with_config(config)
        .with_statement(for_loop(name("i"), call(Builtin::Range, vec![int(10)]), vec![
            assign("L", list(vec![])),
            expr(method(var("L"), Method::Append, vec![var("L")])),
        ], vec![]))
        .run()
        .expect_ok();

    assert_eq!(tester.evaluator().stats().scans, 0);
    // Ten lists plus the loop variable
    tester.assert_live(11);
}

#[test]
fn test_stats() {
    let mut store = Store::default();
    let a = int_value(&mut store, 1);
    let b = store.allocate(Value::List(vec![a]));
    store.release(b).unwrap();

    assert_eq!(store.stats(), StoreStats{ allocated: 2, reclaimed: 2, reclaimed_by_scan: 0, scans: 0 });
}

#[test]
fn test_copies() {
    Tester::new_program_expect_ok("deep copy of a cycle", vec![
        assign("L", ints(&[1])),
        expr(method(var("L"), Method::Append, vec![var("L")])),
        assign("M", call(Builtin::DeepCopy, vec![var("L")])),
        assign("inner", index(var("M"), int(1))),
        assign("a", index(var("L"), int(0))),
        assign("b", index(var("M"), int(0))),
    ])
        .assert_renders("M", "[1, [...]]")
        .assert_same("M", "inner")
        .assert_not_same("M", "L")
        // Immutable elements are shared with the original
        .assert_same("a", "b");

    let mut store = Store::default();
    let text = store.allocate(Value::Text("t".to_string()));
    assert_eq!(store.copy_shallow(text), Ok(text));
    assert_eq!(store.copy_deep(text, 10), Ok(text));
    assert_eq!(store.refcount(text), Ok(3));

    // Too deep: nothing of the partial copy stays behind
    let mut current = store.allocate(Value::List(Vec::new()));
    for _ in 0..5 {
        current = store.allocate(Value::List(vec![current]));
    }
    let live = store.live_count();
    assert_eq!(store.copy_deep(current, 3).unwrap_err().kind(), &EvalErrorKind::RecursionLimit(3));
    assert_eq!(store.live_count(), live);
}

#[test]
fn test_interned_integers() {
    let config = EvalConfig{ intern_small_ints: true, ..EvalConfig::default() };
    let mut store = Store::new(&config);
    let a = int_value(&mut store, 7);
    let b = int_value(&mut store, 7);
    let c = int_value(&mut store, 300);
    let d = int_value(&mut store, 300);
    assert_eq!(a, b);
    assert_ne!(c, d);

    // The cache holds on to its own reference
    store.release(a).unwrap();
    store.release(b).unwrap();
    assert!(store.is_alive(a));
    assert_eq!(store.refcount(a), Ok(1));
}

use super::*;
use maplit::hashmap;

#[test]
fn test_indexing() {
    Tester::new_program_expect_ok("list index", vec![
        assign("L", ints(&[1, 2, 3])),
        assign("a", index(var("L"), int(-1))),
        assign("b", index(var("L"), int(0))),
        assign_to(index_target(var("L"), int(-2)), int(20)),
    ])
        .assert_ints(hashmap!{ "a" => 3, "b" => 1 })
        .assert_renders("L", "[1, 20, 3]");

    Tester::new_program_expect_ok("text index", vec![
        assign("t", text("abc")),
        assign("c", index(var("t"), int(1))),
        assign("d", index(var("t"), int(-1))),
    ])
        .assert_renders("c", "b")
        .assert_renders("d", "c");

    Tester::new_program_expect_err("out of range", vec![
        assign("L", ints(&[1, 2, 3])),
        expr(index(var("L"), int(3))),
    ])
        .assert_kind_eq(EvalErrorKind::IndexOutOfRange{ kind: ValueKind::List, index: 3, len: 3 })
        .assert_position(&[1]);

    Tester::new_program_expect_err("not subscriptable", vec![
        expr(index(int(5), int(0))),
    ]).assert_kind_eq(EvalErrorKind::NotIndexable(ValueKind::Int));

    Tester::new_program_expect_err("text is immutable", vec![
        assign("t", text("abc")),
        assign_to(index_target(var("t"), int(0)), text("x")),
    ])
        .assert_kind_eq(EvalErrorKind::ImmutableTarget(ValueKind::Text))
        .state()
        .assert_renders("t", "abc");
}

#[test]
fn test_slice_deletion_and_insertion() {
    Tester::new_program_expect_ok("slice assignment", vec![
        assign("L", ints(&[1, 2, 3, 4])),
        assign("alias", var("L")),
        assign_to(slice_target(var("L"), Some(int(1)), Some(int(2))), list(vec![])),
        emit(vec![var("L")]),
        assign_to(slice_target(var("L"), Some(int(1)), Some(int(1))), ints(&[9])),
    ])
        .assert_emitted(&["[1, 3, 4]"])
        .assert_renders("L", "[1, 9, 3, 4]")
        .assert_same("L", "alias");

    Tester::new_program_expect_ok("slice replacement", vec![
        assign("L", ints(&[1, 2, 3, 4])),
        assign_to(slice_target(var("L"), None, Some(int(2))), text("xyz")),
        assign("M", ints(&[1, 2])),
        assign_to(slice_target(var("M"), Some(int(2)), None), var("M")),
    ])
        .assert_renders("L", "['x', 'y', 'z', 3, 4]")
        .assert_renders("M", "[1, 2, 1, 2]");

    Tester::new_program_expect_ok("slice deletion", vec![
        assign("L", ints(&[1, 2, 3, 4, 5])),
        Statement::Delete(vec![Target::Slice(var("L"), Some(int(-2)), None)]),
        Statement::Delete(vec![index_target(var("L"), int(0))]),
    ]).assert_renders("L", "[2, 3]");
}

#[test]
fn test_slice_reading() {
    Tester::new_program_expect_ok("slices", vec![
        assign("L", ints(&[1, 2, 3, 4])),
        assign("a", slice(var("L"), Some(int(1)), Some(int(3)))),
        assign("b", slice(var("L"), None, Some(int(-1)))),
        assign("c", slice(var("L"), Some(int(10)), None)),
        assign("d", slice(var("L"), None, None)),
        assign("t", slice(text("hello"), Some(int(1)), Some(nil()))),
    ])
        .assert_renders("a", "[2, 3]")
        .assert_renders("b", "[1, 2, 3]")
        .assert_renders("c", "[]")
        .assert_renders("t", "ello")
        .assert_not_same("L", "d")
        .assert_equal("L", "d", true);
}

#[test]
fn test_mapping_reinsertion_order() {
    Tester::new_program_expect_ok("reinsertion", vec![
        assign("D", mapping(vec![(text("a"), int(1)), (text("b"), int(2))])),
        Statement::Delete(vec![index_target(var("D"), text("a"))]),
        assign_to(index_target(var("D"), text("a")), int(9)),
        for_loop(name("k"), var("D"), vec![emit(vec![var("k")])], vec![]),
    ])
        .assert_renders("D", "{'b': 2, 'a': 9}")
        .assert_emitted(&["b", "a"]);

    Tester::new_program_expect_ok("update keeps position", vec![
        assign("D", mapping(vec![(text("a"), int(1)), (text("b"), int(2))])),
        assign_to(index_target(var("D"), text("a")), int(5)),
    ]).assert_renders("D", "{'a': 5, 'b': 2}");
}

#[test]
fn test_mapping_keys() {
    // Equal numbers address the same pair, the first key object is kept
    Tester::new_program_expect_ok("numeric keys", vec![
        assign("D", mapping(vec![(int(1), text("x"))])),
        assign_to(index_target(var("D"), float(1.0)), text("y")),
        assign("v", index(var("D"), float(1.0))),
        assign("n", call(Builtin::Len, vec![var("D")])),
    ])
        .assert_renders("D", "{1: 'y'}")
        .assert_renders("v", "y")
        .assert_ints(hashmap!{ "n" => 1 });

    Tester::new_program_expect_err("unhashable", vec![
        assign("D", mapping(vec![])),
        assign_to(index_target(var("D"), ints(&[1])), int(2)),
    ]).assert_kind_eq(EvalErrorKind::UnhashableKey(ValueKind::List));

    Tester::new_program_expect_err("unhashable literal", vec![
        assign("D", mapping(vec![(mapping(vec![]), int(2))])),
    ]).assert_kind_eq(EvalErrorKind::UnhashableKey(ValueKind::Mapping));

    Tester::new_program_expect_err("missing key", vec![
        assign("D", mapping(vec![(text("a"), int(1))])),
        expr(index(var("D"), text("zz"))),
    ])
        .assert_kind_eq(EvalErrorKind::KeyNotFound("'zz'".to_string()))
        .assert_msg_has("key 'zz' not found");

    Tester::new_program_expect_err("delete missing key", vec![
        assign("D", mapping(vec![])),
        Statement::Delete(vec![index_target(var("D"), int(3))]),
    ]).assert_kind_eq(EvalErrorKind::KeyNotFound("3".to_string()));
}

#[test]
fn test_list_methods() {
    Tester::new_program_expect_ok("methods", vec![
        assign("L", ints(&[1])),
        expr(method(var("L"), Method::Append, vec![int(2)])),
        expr(method(var("L"), Method::Extend, vec![ints(&[3, 4])])),
        expr(method(var("L"), Method::Insert, vec![int(0), int(0)])),
        expr(method(var("L"), Method::Insert, vec![int(-1), int(99)])),
        expr(method(var("L"), Method::Insert, vec![int(100), int(5)])),
        assign("last", method(var("L"), Method::Pop, vec![])),
        assign("first", method(var("L"), Method::Pop, vec![int(0)])),
        assign("r", method(var("L"), Method::Append, vec![int(7)])),
    ])
        .assert_ints(hashmap!{ "last" => 5, "first" => 0 })
        .assert_renders("L", "[1, 2, 3, 99, 4, 7]")
        .assert_renders("r", "nil");

    Tester::new_program_expect_err("pop empty", vec![
        assign("L", list(vec![])),
        expr(method(var("L"), Method::Pop, vec![])),
    ]).assert_kind_eq(EvalErrorKind::IndexOutOfRange{ kind: ValueKind::List, index: -1, len: 0 });

    Tester::new_program_expect_err("wrong kind", vec![
        expr(method(int(3), Method::Append, vec![int(1)])),
    ]).assert_kind(|k| matches!(k, EvalErrorKind::TypeMismatch{ op: "append", .. }));

    Tester::new_program_expect_err("wrong arity", vec![
        assign("L", list(vec![])),
        expr(method(var("L"), Method::Append, vec![])),
    ]).assert_msg_has("append() takes 1 argument(s), 0 given");
}

#[test]
fn test_mapping_methods() {
    Tester::new_program_expect_ok("methods", vec![
        assign("D", mapping(vec![(text("a"), int(1)), (text("b"), ints(&[2]))])),
        assign("k", method(var("D"), Method::Keys, vec![])),
        assign("v", method(var("D"), Method::Values, vec![])),
        assign("a", method(var("D"), Method::Get, vec![text("a")])),
        assign("z", method(var("D"), Method::Get, vec![text("z"), int(-1)])),
        assign("n", method(var("D"), Method::Get, vec![text("z")])),
        assign("b", index(var("D"), text("b"))),
    ])
        .assert_renders("k", "['a', 'b']")
        .assert_renders("v", "[1, [2]]")
        .assert_ints(hashmap!{ "a" => 1, "z" => -1 })
        .assert_renders("n", "nil");
}

#[test]
fn test_builtins() {
    Tester::new_program_expect_ok("builtins", vec![
        assign("a", call(Builtin::Len, vec![text("héllo")])),
        assign("b", call(Builtin::Len, vec![ints(&[1, 2])])),
        assign("c", call(Builtin::Range, vec![int(3)])),
        assign("d", call(Builtin::Range, vec![int(1), int(4)])),
        assign("e", call(Builtin::Range, vec![int(5), int(0), int(-2)])),
        assign("f", call(Builtin::List, vec![text("ab")])),
        assign("g", call(Builtin::List, vec![mapping(vec![(int(1), int(2))])])),
        assign("h", call(Builtin::Text, vec![list(vec![int(1), text("a"), nil(), boolean(true), float(2.0)])])),
    ])
        .assert_ints(hashmap!{ "a" => 5, "b" => 2 })
        .assert_renders("c", "[0, 1, 2]")
        .assert_renders("d", "[1, 2, 3]")
        .assert_renders("e", "[5, 3, 1]")
        .assert_renders("f", "['a', 'b']")
        .assert_renders("g", "[1]")
        .assert_renders("h", "[1, 'a', nil, true, 2.0]");

    Tester::new_program_expect_err("zero step", vec![
        expr(call(Builtin::Range, vec![int(1), int(2), int(0)])),
    ]).assert_msg_has("step must not be zero");

    Tester::new_program_expect_err("len of int", vec![
        expr(call(Builtin::Len, vec![int(1)])),
    ]).assert_kind(|k| matches!(k, EvalErrorKind::TypeMismatch{ .. }));
}

#[test]
fn test_repetition_is_one_level_deep() {
    Tester::new_program_expect_ok("shared rows", vec![
        assign("row", ints(&[0])),
        assign("grid", mul(list(vec![var("row")]), int(3))),
        assign_to(index_target(index(var("grid"), int(0)), int(0)), int(1)),
        assign("first", index(var("grid"), int(0))),
        assign("last", index(var("grid"), int(2))),
    ])
        .assert_renders("grid", "[[1], [1], [1]]")
        .assert_renders("row", "[1]")
        .assert_same("first", "last");

    Tester::new_program_expect_ok("concatenation makes a new list", vec![
        assign("A", ints(&[1])),
        assign("B", add(var("A"), ints(&[2]))),
        assign("C", mul(text("ab"), int(2))),
    ])
        .assert_renders("A", "[1]")
        .assert_renders("B", "[1, 2]")
        .assert_renders("C", "abab")
        .assert_not_same("A", "B");
}

#[test]
fn test_self_containing_list() {
    Tester::new_program_expect_ok("append to self", vec![
        assign("L", ints(&[1])),
        expr(method(var("L"), Method::Append, vec![var("L")])),
        assign("inner", index(var("L"), int(1))),
    ])
        .assert_renders("L", "[1, [...]]")
        .assert_same("L", "inner")
        .assert_equal("L", "inner", true);
}

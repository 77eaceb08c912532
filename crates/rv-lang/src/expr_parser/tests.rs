use super::*;

fn n(v: f64) -> Logic {
    Logic::Number(v)
}

fn s(v: &str) -> Logic {
    Logic::Str(v.to_string())
}

fn call(name: &str, args: Vec<Logic>) -> Logic {
    Logic::call(name, args)
}

fn parse(src: &str) -> Logic {
    compile_expr(src).unwrap_or_else(|e| panic!("{src}: {e}"))
}

// ---------------------------------------------------------------------------
// Precedence and associativity
// ---------------------------------------------------------------------------

#[test]
fn multiplication_binds_tighter_than_addition() {
    assert_eq!(
        parse("1 + 2 * 3"),
        call("add", vec![n(1.0), call("mul", vec![n(2.0), n(3.0)])])
    );
}

#[test]
fn same_tier_associates_left() {
    assert_eq!(
        parse("10 - 3 - 2"),
        call("sub", vec![call("sub", vec![n(10.0), n(3.0)]), n(2.0)])
    );
    assert_eq!(
        parse("8 / 2 * 2"),
        call("mul", vec![call("div", vec![n(8.0), n(2.0)]), n(2.0)])
    );
}

#[test]
fn modulo_sits_between_additive_and_multiplicative() {
    assert_eq!(
        parse("1 + 6 % 4 * 2"),
        call(
            "add",
            vec![
                n(1.0),
                call("mod", vec![n(6.0), call("mul", vec![n(4.0), n(2.0)])])
            ]
        )
    );
}

#[test]
fn power_binds_tighter_than_multiplication() {
    assert_eq!(
        parse("2 ** 3 * 2"),
        call("mul", vec![call("exp", vec![n(2.0), n(3.0)]), n(2.0)])
    );
}

#[test]
fn logical_tiers() {
    assert_eq!(
        parse("@.a || @.b && @.c"),
        call(
            "or",
            vec![
                Logic::var(&["a"]),
                call("and", vec![Logic::var(&["b"]), Logic::var(&["c"])])
            ]
        )
    );
    assert_eq!(
        parse("@.a > 1 && @.b <= 2"),
        call(
            "and",
            vec![
                call("gt", vec![Logic::var(&["a"]), n(1.0)]),
                call("lte", vec![Logic::var(&["b"]), n(2.0)])
            ]
        )
    );
}

#[test]
fn longer_operators_shadow_their_prefixes() {
    assert_eq!(parse("@ === 1"), call("eeq", vec![Logic::var(&[]), n(1.0)]));
    assert_eq!(parse("@ !== 1"), call("neeq", vec![Logic::var(&[]), n(1.0)]));
    assert_eq!(parse("@ == 1"), call("eq", vec![Logic::var(&[]), n(1.0)]));
    assert_eq!(parse("@ != 1"), call("ne", vec![Logic::var(&[]), n(1.0)]));
    assert_eq!(parse("@ >= 1"), call("gte", vec![Logic::var(&[]), n(1.0)]));
    assert_eq!(parse("2**2"), call("exp", vec![n(2.0), n(2.0)]));
}

#[test]
fn unary_not_binds_tightest() {
    assert_eq!(
        parse("!@.a && @.b"),
        call(
            "and",
            vec![call("not", vec![Logic::var(&["a"])]), Logic::var(&["b"])]
        )
    );
    assert_eq!(
        parse("!(1 != 2)"),
        call("not", vec![call("ne", vec![n(1.0), n(2.0)])])
    );
}

#[test]
fn parentheses_override_precedence() {
    assert_eq!(
        parse("(1 + 2) * 3"),
        call("mul", vec![call("add", vec![n(1.0), n(2.0)]), n(3.0)])
    );
}

// ---------------------------------------------------------------------------
// References, literals, calls
// ---------------------------------------------------------------------------

#[test]
fn references() {
    assert_eq!(parse("@"), Logic::var(&[]));
    assert_eq!(parse("@.a.0"), Logic::var(&["a", "0"]));
    assert_eq!(
        parse("@.^.^.a"),
        Logic::Var(VarRef {
            ascend: 2,
            path: vec!["a".to_string()]
        })
    );
    assert_eq!(parse("$"), Logic::context(&[]));
    assert_eq!(parse("$.accumulator"), Logic::context(&["accumulator"]));
    assert_eq!(parse("@group"), Logic::Group);
}

#[test]
fn keyword_literals() {
    assert_eq!(parse("true"), Logic::Bool(true));
    assert_eq!(parse("false"), Logic::Bool(false));
    assert_eq!(parse("null"), Logic::Null);
    assert_eq!(parse("undefined"), Logic::Undefined);
    assert_eq!(parse("Infinity"), n(f64::INFINITY));
    assert_eq!(parse("1.5"), n(1.5));
    assert_eq!(parse(".5"), n(0.5));
}

#[test]
fn calls_and_dotted_method_names() {
    assert_eq!(
        parse("Math.max(1, @.x)"),
        call("Math.max", vec![n(1.0), Logic::var(&["x"])])
    );
    assert_eq!(parse("now()"), call("now", vec![]));
}

#[test]
fn property_access_after_call_is_get() {
    assert_eq!(
        parse("toPairs(@).0.1"),
        call(
            "get",
            vec![
                call("get", vec![call("toPairs", vec![Logic::var(&[])]), s("0")]),
                s("1")
            ]
        )
    );
    assert_eq!(parse("(@).a"), call("get", vec![Logic::var(&[]), s("a")]));
}

#[test]
fn string_literals_resolve_from_table() {
    assert_eq!(
        parse(r#"eq(@.name, "bob") || startsWith(@.name, 'a,b')"#),
        call(
            "or",
            vec![
                call("eq", vec![Logic::var(&["name"]), s("bob")]),
                call("startsWith", vec![Logic::var(&["name"]), s("a,b")])
            ]
        )
    );
}

#[test]
fn object_and_list_sugar() {
    assert_eq!(
        parse(r#"{total: @.a + 1, tags: [1, "x"]}"#),
        call(
            "obj",
            vec![
                s("total"),
                call("add", vec![Logic::var(&["a"]), n(1.0)]),
                s("tags"),
                call("list", vec![n(1.0), s("x")])
            ]
        )
    );
}

#[test]
fn whitespace_and_newlines_inside_parentheses() {
    assert_eq!(
        parse("add(\n  1,\n  2\n)"),
        call("add", vec![n(1.0), n(2.0)])
    );
}

// ---------------------------------------------------------------------------
// Canonical serialization
// ---------------------------------------------------------------------------

#[test]
fn canonical_form_round_trips() {
    let sources = [
        "1 + 2 * 3",
        "!(@.a === 'x\"y') || $.flag",
        "{a: [1, 2.5, null], b: @.^.c}",
        "toPairs(@).0",
        "Math.min(@group, Infinity, undefined, true)",
        "'line\\nbreak' + \"back\\\\slash\"",
        "0.1 + 100000",
    ];
    for src in sources {
        let tree = parse(src);
        let printed = tree.to_string();
        assert_eq!(parse(&printed), tree, "{src} -> {printed}");
    }
}

#[test]
fn canonical_form_uses_call_syntax() {
    assert_eq!(parse("1 + 2 * 3").to_string(), "add(1,mul(2,3))");
    assert_eq!(parse("@.^.a").to_string(), "@.^.a");
    assert_eq!(parse(r#"eq($.k, "v")"#).to_string(), r#"eq($.k,"v")"#);
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[test]
fn dangling_operator_is_an_error() {
    let err = compile_expr("1 +").unwrap_err();
    assert!(err.expected.iter().any(|e| e == "operand"), "{err}");
    assert_eq!(err.found, "end of input");
}

#[test]
fn bare_identifier_is_an_error() {
    let err = compile_expr("1 + foo").unwrap_err();
    assert_eq!(err.start.column, 5);
    assert_eq!(err.found, "foo");
    assert!(err.expected.iter().any(|e| e == "function call or literal"));
}

#[test]
fn single_equals_is_rejected() {
    let err = compile_expr("@.a = 2").unwrap_err();
    assert_eq!(err.start.column, 5);
}

#[test]
fn missing_closing_paren() {
    let err = compile_expr("add(1, 2").unwrap_err();
    assert!(err.expected.iter().any(|e| e == "',' or ')'"), "{err}");
}

#[test]
fn misplaced_ascend_segment() {
    assert!(compile_expr("@.a.^").is_err());
    assert!(compile_expr("$.^.a").is_err());
}

#[test]
fn malformed_number() {
    let err = compile_expr("1.2.3").unwrap_err();
    assert!(err.expected.iter().any(|e| e == "number"));
}

#[test]
fn errors_after_string_literals_point_at_source() {
    let err = compile_expr(r#"eq("a long literal", ) "#).unwrap_err();
    assert_eq!(err.start.column, 22);
    assert_eq!(err.found, ")");
}

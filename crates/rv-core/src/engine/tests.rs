use futures::FutureExt;
use rv_lang::compile_expr;
use serde_json::json;

use super::*;

fn eval(src: &str, data: Value) -> Value {
    let engine = Engine::with_builtins();
    let logic = compile_expr(src).unwrap();
    engine.run(&logic, &data).unwrap()
}

#[test]
fn arithmetic_follows_precedence() {
    assert_eq!(eval("1 + 2 * 3", Value::Null), json!(7));
    assert_eq!(eval("(1 + 2) * 3", Value::Null), json!(9));
    assert_eq!(eval("2 ** 3 ** 2", Value::Null), json!(64));
    assert_eq!(eval("7 % 4 + 10 / 4", Value::Null), json!(5.5));
}

#[test]
fn addition_concatenates_strings() {
    assert_eq!(eval("'id-' + @.n", json!({"n": 7})), json!("id-7"));
    assert_eq!(eval("@.a + @.b", json!({"a": "1", "b": 2})), json!("12"));
}

#[test]
fn missing_paths_read_as_null() {
    assert_eq!(eval("@.a.b.c", json!({"a": 1})), Value::Null);
    assert_eq!(eval("@.items.1", json!({"items": [10, 20]})), json!(20));
}

#[test]
fn comparisons_and_equality() {
    assert_eq!(eval("@ > 3 && @ <= 5", json!(4)), json!(true));
    assert_eq!(eval("@ == '4'", json!(4)), json!(true));
    assert_eq!(eval("@ === '4'", json!(4)), json!(false));
    assert_eq!(eval("@ !== 4.0", json!(4)), json!(false));
    assert_eq!(eval("'b' > 'a'", Value::Null), json!(true));
}

#[test]
fn and_or_return_operands() {
    assert_eq!(eval("@.a || 'fallback'", json!({})), json!("fallback"));
    assert_eq!(eval("@.a && @.b", json!({"a": 1, "b": 2})), json!(2));
    assert_eq!(eval("@.a && @.b", json!({"a": 0, "b": 2})), json!(0));
    assert_eq!(eval("!@.a", json!({"a": ""})), json!(true));
}

#[test]
fn if_chains_conditions() {
    let src = "if(@ > 10, 'big', @ > 5, 'medium', 'small')";
    assert_eq!(eval(src, json!(12)), json!("big"));
    assert_eq!(eval(src, json!(7)), json!("medium"));
    assert_eq!(eval(src, json!(1)), json!("small"));
}

#[test]
fn lazy_methods_skip_unevaluated_branches() {
    let mut engine = Engine::with_builtins();
    engine.add_pure("boom", |_| Err(EvalError::Other("evaluated".into())));
    let logic = compile_expr("if(true, 1, boom())").unwrap();
    assert_eq!(engine.run(&logic, &Value::Null).unwrap(), json!(1));
    let logic = compile_expr("false && boom()").unwrap();
    assert_eq!(engine.run(&logic, &Value::Null).unwrap(), json!(false));
}

#[test]
fn object_and_list_literals_build_values() {
    assert_eq!(
        eval("{name: @.n, tags: [1, @.t]}", json!({"n": "a", "t": "x"})),
        json!({"name": "a", "tags": [1, "x"]})
    );
}

#[test]
fn context_and_group_come_from_scope() {
    let engine = Engine::with_builtins();
    let callable = engine
        .build(&compile_expr("[@group, $.limit, @]").unwrap())
        .unwrap();
    let scope = Scope::new(json!({"limit": 3})).with_group(json!("eu"));
    assert_eq!(callable.call(&json!(1), &scope).unwrap(), json!(["eu", 3, 1]));
    assert_eq!(
        callable.call(&json!(1), &Scope::default()).unwrap(),
        json!([null, null, 1])
    );
}

#[test]
fn data_helpers() {
    assert_eq!(eval("get(@, 'a.b', 9)", json!({"a": {"b": 2}})), json!(2));
    assert_eq!(eval("get(@, 'a.x', 9)", json!({"a": {"b": 2}})), json!(9));
    assert_eq!(eval("from('k', 1)", Value::Null), json!({"k": 1}));
    assert_eq!(
        eval("combine({a: 1, b: 1}, {b: 2})", Value::Null),
        json!({"a": 1, "b": 2})
    );
    assert_eq!(eval("merge([1, 2], 3, [[4]])", Value::Null), json!([1, 2, 3, [4]]));
    assert_eq!(eval("toPairs({a: 1})", Value::Null), json!([["a", 1]]));
    assert_eq!(eval("fromPairs([['a', 1], ['b']])", Value::Null), json!({"a": 1, "b": null}));
    assert_eq!(eval("split('a,b', ',')", Value::Null), json!(["a", "b"]));
    assert_eq!(eval("startsWith(123, '12')", Value::Null), json!(true));
    assert_eq!(eval("stringify({a: [1]})", Value::Null), json!("{\"a\":[1]}"));
    assert_eq!(eval("first(@) + last(@)", json!([1, 2, 3])), json!(4));
    assert_eq!(eval("length(@)", json!("héllo")), json!(5));
    assert_eq!(eval("xy(1, 2)", Value::Null), json!({"x": 1, "y": 2}));
    assert_eq!(eval("get(xy(1, 2), 'y')", Value::Null), json!(2));
    assert_eq!(eval("xy(1, 2).x", Value::Null), json!(1));
}

#[test]
fn overwrite_sets_one_field_on_a_copy() {
    let row = json!({"a": 1, "b": 2});
    assert_eq!(eval("overwrite(@, 'a', 9)", row.clone()), json!({"a": 9, "b": 2}));
    assert_eq!(eval("overwrite(@, 'c', @.a)", row), json!({"a": 1, "b": 2, "c": 1}));
    assert_eq!(eval("overwrite(@, 'k', 1)", json!(5)), json!({"k": 1}));
}

#[test]
fn snake_case_splits_words() {
    assert_eq!(eval("snakeCase(@)", json!("fooBar")), json!("foo_bar"));
    assert_eq!(eval("snakeCase(@)", json!("Foo Bar")), json!("foo_bar"));
    assert_eq!(eval("snakeCase(@)", json!("--FOO-BAR--")), json!("foo_bar"));
    assert_eq!(eval("snakeCase(@)", json!("XMLHttpRequest")), json!("xml_http_request"));
    assert_eq!(eval("snakeCase(@)", json!("foo2bar")), json!("foo_2_bar"));
}

#[test]
fn csvify_quotes_every_cell() {
    assert_eq!(
        eval("csvify(@, 'a,b,c')", json!({"a": 1, "b": "say \"hi\""})),
        json!(r#""1","say ""hi""","""#)
    );
}

#[test]
fn each_maps_values_with_access_to_the_enclosing_datum() {
    assert_eq!(
        eval("each(@.prices, @ * @.^.rate)", json!({"prices": {"a": 2, "b": 3}, "rate": 10})),
        json!({"a": 20, "b": 30})
    );
    assert_eq!(eval("each(@, @ + 1)", json!([1, 2])), json!([2, 3]));
}

#[test]
fn group_by_collects_or_transforms() {
    assert_eq!(
        eval("groupBy(@.acc, @.cur, @.k)", json!({"acc": {"x": [1]}, "cur": {"k": "x"}})),
        json!({"x": [1, {"k": "x"}]})
    );
    assert_eq!(
        eval(
            "groupBy(@.acc, @.cur, @.k, @.accumulator + @.current.v, 0)",
            json!({"acc": null, "cur": {"k": "y", "v": 5}})
        ),
        json!({"y": 5})
    );
}

#[test]
fn math_module() {
    assert_eq!(eval("Math.max(1, @, 3)", json!(7)), json!(7));
    assert_eq!(eval("Math.min(4, 2)", Value::Null), json!(2));
    assert_eq!(eval("Math.round(2.5) + Math.round(0 - 2.5)", Value::Null), json!(1));
    assert_eq!(eval("Math.floor(2.7) + Math.ceil(2.1)", Value::Null), json!(5));
    assert_eq!(eval("Math.sqrt(16) - Math.abs(0 - 2)", Value::Null), json!(2));
}

#[test]
fn aggregate_and_process_bin() {
    let stats = eval("aggregate(aggregate(aggregate(null, 2), 4), 6)", Value::Null);
    assert_eq!(stats, json!({"count": 3, "sum": 12, "sum2": 56, "min": 2, "max": 6}));
    let summary = eval("processBin(@)", stats);
    assert_eq!(summary["variance"], json!(4));
    assert_eq!(summary["stddev"], json!(2));
    assert_eq!(summary["average"], json!(4));
}

#[test]
fn dynamic_bin_method_accumulates() {
    let engine = Engine::with_builtins();
    let callable = engine
        .build(&compile_expr("dynamicBin(@.acc, xy(@.x, 1), 2)").unwrap())
        .unwrap();
    let mut acc = Value::Null;
    for x in [1, 2, 7] {
        acc = callable
            .call(&json!({"acc": acc, "x": x}), &Scope::default())
            .unwrap();
    }
    let buckets = acc.as_object().unwrap();
    assert_eq!(buckets.len(), 2);
    let total: u64 = buckets.values().map(|b| b["count"].as_u64().unwrap()).sum();
    assert_eq!(total, 3);
}

#[test]
fn configured_bin_reducers_replace_defaults() {
    let mut engine = Engine::with_builtins();
    engine.add_bin_reducer("hist", BinReducer::new(3, vec![10.0], false));
    let logic = compile_expr("hist(null, {x: 15, y: 2})").unwrap();
    assert_eq!(
        engine.run(&logic, &Value::Null).unwrap(),
        json!({"10-20": {"count": 1, "sum": 2, "sum2": 4, "min": 2, "max": 2}})
    );
}

#[test]
fn ijoin_evaluates_predicates_on_row_pairs() {
    let data = json!({
        "a": [{"id": 1, "v": "x"}, {"id": 2, "v": "z"}],
        "b": [{"ref": 2, "w": "y"}],
    });
    assert_eq!(
        eval("ijoin(@.a, @.b, @.0.id == @.1.ref)", data),
        json!([{"id": 2, "v": "z", "ref": 2, "w": "y"}])
    );
}

#[test]
fn kjoin_uses_key_pairs() {
    let data = json!({"a": [{"id": 1, "v": "x"}], "b": [{"id": 1, "w": "y"}, {"id": 3}]});
    assert_eq!(
        eval("kjoin(@.a, @.b, ['id', 'id'])", data),
        json!([{"id": 1, "v": "x", "w": "y"}])
    );
}

#[test]
fn join_arity_errors_surface_at_call_time() {
    let engine = Engine::with_builtins();
    let logic = compile_expr("kjoin(@, @)").unwrap();
    let err = engine.run(&logic, &json!([])).unwrap_err();
    assert!(matches!(err, BuildError::Eval(EvalError::Join(_))), "{err}");
}

#[test]
fn unknown_methods_fail_at_build() {
    let engine = Engine::with_builtins();
    let err = engine.build(&compile_expr("nope(1)").unwrap()).unwrap_err();
    assert_eq!(err, BuildError::UnknownMethod { name: "nope".into() });
}

fn engine_with_fetch() -> Engine {
    let mut engine = Engine::with_builtins();
    engine.add_async("fetch", |args| {
        async move { Ok(json!({"fetched": args.first().cloned().unwrap_or(Value::Null)})) }.boxed()
    });
    engine
}

#[test]
fn async_methods_are_rejected_by_sync_builds() {
    let engine = engine_with_fetch();
    let err = engine.build(&compile_expr("fetch(@)").unwrap()).unwrap_err();
    assert_eq!(err, BuildError::AsyncMethod { name: "fetch".into() });
}

#[test]
fn async_methods_cannot_hide_under_lazy_methods() {
    let engine = engine_with_fetch();
    let err = engine
        .build_async(&compile_expr("@ && fetch(@)").unwrap())
        .unwrap_err();
    assert_eq!(
        err,
        BuildError::AsyncInLazy {
            name: "fetch".into(),
            within: "and".into()
        }
    );
}

#[tokio::test]
async fn async_callables_await_methods() {
    let engine = engine_with_fetch();
    let callable = engine
        .build_async(&compile_expr("get(fetch(@ + 1), 'fetched') * 2").unwrap())
        .unwrap();
    let out = callable.call(json!(4), Scope::default()).await.unwrap();
    assert_eq!(out, json!(10));
}

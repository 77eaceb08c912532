use futures::FutureExt;
use serde_json::json;

use super::*;

fn compile(src: &str) -> Pipeline {
    Pipeline::compile(src, &Registry::with_defaults(), &Engine::with_builtins())
        .unwrap_or_else(|e| panic!("{e}"))
}

fn ints(n: i64) -> Vec<Value> {
    (1..=n).map(Value::from).collect()
}

#[tokio::test]
async fn reduce_in_accumulator_mode() {
    let pipeline = compile("!reduce $.accumulator + $.current, 0");
    assert_eq!(pipeline.collect(ints(3)).await.unwrap(), vec![json!(6)]);
}

#[tokio::test]
async fn pipelines_are_reusable() {
    let pipeline = compile("map @ * 2\nfilter @ > 2");
    assert_eq!(pipeline.collect(ints(3)).await.unwrap(), vec![json!(4), json!(6)]);
    assert_eq!(pipeline.collect(vec![json!(5)]).await.unwrap(), vec![json!(10)]);
}

#[tokio::test]
async fn context_is_visible_to_every_stage() {
    let options = PipelineOptions {
        context: json!({"limit": 2, "factor": 3}),
        ..PipelineOptions::default()
    };
    let pipeline = Pipeline::compile_with(
        "take $.limit\nmap @ * $.factor",
        &Registry::with_defaults(),
        &Engine::with_builtins(),
        options,
    )
    .unwrap();
    assert_eq!(pipeline.collect(ints(5)).await.unwrap(), vec![json!(3), json!(6)]);
}

#[tokio::test]
async fn dynamic_bins_accumulate_through_scan() {
    let pipeline = compile("map xy(@.t, @.v)\nscan dynamicBin($.accumulator, $.current, 2), null\ntakeLast 1");
    let rows: Vec<Value> = [1, 2, 7, 9]
        .iter()
        .map(|t| json!({"t": t, "v": 1}))
        .collect();
    let out = pipeline.collect(rows).await.unwrap();
    let buckets = out[0].as_object().unwrap();
    assert!(buckets.len() <= 2);
    let total: u64 = buckets.values().map(|b| b["count"].as_u64().unwrap()).sum();
    assert_eq!(total, 4);
}

#[tokio::test]
async fn joins_run_inside_expressions() {
    let pipeline = compile("map kjoin(@.users, @.orders, ['id', 'owner'])\nmergeMap @\npluck 'item'");
    let input = json!({
        "users": [{"id": 1, "name": "ann"}, {"id": 2, "name": "bo"}],
        "orders": [{"owner": 2, "item": "ink"}, {"owner": 1, "item": "pen"}],
    });
    assert_eq!(
        pipeline.collect(vec![input]).await.unwrap(),
        vec![json!("pen"), json!("ink")]
    );
}

#[tokio::test]
async fn leftover_sub_streams_are_flattened() {
    let pipeline = compile("windowCount 2");
    assert_eq!(pipeline.collect(ints(3)).await.unwrap(), ints(3));
}

#[tokio::test]
async fn run_stops_after_the_first_error() {
    let mut engine = Engine::with_builtins();
    engine.add_pure("check", |args| match args.first().and_then(Value::as_i64) {
        Some(2) => Err(EvalError::Other("two".into())),
        _ => Ok(args.first().cloned().unwrap_or(Value::Null)),
    });
    let pipeline = Pipeline::compile("map check(@)", &Registry::with_defaults(), &engine).unwrap();
    let out: Vec<_> = pipeline.run(from_values(ints(4))).collect().await;
    assert_eq!(out, vec![Ok(json!(1)), Err(EvalError::Other("two".into()))]);
    assert_eq!(
        pipeline.collect(ints(4)).await.unwrap_err(),
        EvalError::Other("two".into())
    );
}

#[tokio::test(start_paused = true)]
async fn ordered_async_keeps_input_order() {
    let mut engine = Engine::with_builtins();
    engine.add_async("slow", |args| {
        let v = args.first().cloned().unwrap_or(Value::Null);
        async move {
            let wait = 50 - v.as_u64().unwrap_or(0) * 10;
            tokio::time::sleep(std::time::Duration::from_millis(wait)).await;
            Ok(v)
        }
        .boxed()
    });
    let options = PipelineOptions {
        ordered_async: true,
        ..PipelineOptions::default()
    };
    let pipeline =
        Pipeline::compile_with("mapAsync slow(@)", &Registry::with_defaults(), &engine, options).unwrap();
    assert_eq!(pipeline.collect(ints(4)).await.unwrap(), ints(4));
}

#[test]
fn compile_errors_are_reported() {
    let registry = Registry::with_defaults();
    let engine = Engine::with_builtins();
    assert!(Pipeline::compile("map (@", &registry, &engine).is_err());
    assert!(Pipeline::compile("nope @", &registry, &engine).is_err());
    assert!(Pipeline::compile("reduce @, 0", &registry, &engine).is_err());
}

#[test]
fn program_is_kept_for_inspection() {
    let pipeline = compile("groupBy @.k >> map @group << concat\ntake 1");
    let ops: Vec<&str> = pipeline
        .program()
        .stages()
        .iter()
        .map(|s| s.operator.as_str())
        .collect();
    assert_eq!(ops, vec!["groupBy", "map", "take"]);
}

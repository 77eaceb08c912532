use std::time::Duration;

use rv_core::EvalError;
use serde_json::json;
use tokio::io::{AsyncWriteExt, BufReader};

use super::*;

fn session(source: &str) -> Session {
    Session::from_source(source, PipelineOptions::default()).unwrap_or_else(|e| panic!("{e}"))
}

async fn run(session: &Session, input: &'static str) -> (RunStats, String) {
    let mut out = Vec::new();
    let stats = session.run_jsonl(input.as_bytes(), &mut out).await.unwrap();
    (stats, String::from_utf8(out).unwrap())
}

fn write_project(dir: &Path, script: &str, extra: &str) -> RivuletConfig {
    std::fs::write(dir.join("main.rv"), script).unwrap();
    format!("[pipeline]\nscript = \"main.rv\"\n{extra}")
        .parse()
        .unwrap()
}

#[tokio::test]
async fn jsonl_round_trip_skips_bad_lines() {
    let session = session("filter @.v > 1\npluck 'v'");
    let input = "{\"v\": 1}\n\n{\"v\": 2}\nnot json\n{\"v\": 3}\n";
    let (stats, out) = run(&session, input).await;
    assert_eq!(out, "2\n3\n");
    assert_eq!(
        stats,
        RunStats {
            events_in: 3,
            events_out: 2,
            skipped: 1,
        }
    );
}

#[tokio::test]
async fn empty_input_still_runs_reducers() {
    let session = session("!reduce $.accumulator + 1, 0");
    let (stats, out) = run(&session, "").await;
    assert_eq!(out, "0\n");
    assert_eq!(stats.events_in, 0);
    assert_eq!(stats.events_out, 1);
}

#[tokio::test]
async fn config_supplies_vars_and_context() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_project(
        dir.path(),
        "map @ * $.factor\ntake $LIMIT",
        "[context]\nfactor = 10\n[vars]\nLIMIT = \"2\"\n",
    );
    let session = Session::from_config(&config, dir.path()).unwrap();
    let (_, out) = run(&session, "1\n2\n3\n").await;
    assert_eq!(out, "10\n20\n");
}

#[tokio::test]
async fn configured_bin_reducers_become_methods() {
    let dir = tempfile::tempdir().unwrap();
    let script = "map xy(@, 1)\nscan coarse($.accumulator, $.current), null\ntakeLast 1";
    let config = write_project(
        dir.path(),
        script,
        "[binning.coarse]\nmax_buckets = 4\nintervals = [10, 100]\n",
    );
    let session = Session::from_config(&config, dir.path()).unwrap();
    let (_, out) = run(&session, "1\n5\n12\n25\n").await;
    let buckets: Value = serde_json::from_str(out.trim()).unwrap();
    let buckets = buckets.as_object().unwrap();
    assert!(!buckets.is_empty() && buckets.len() <= 4);
    let total: u64 = buckets.values().map(|b| b["count"].as_u64().unwrap()).sum();
    assert_eq!(total, 4);

    assert!(Session::from_source(script, PipelineOptions::default()).is_err());
}

#[test]
fn bootstrap_failures_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let config: RivuletConfig = "[pipeline]\nscript = \"absent.rv\"\n".parse().unwrap();
    assert!(Session::from_config(&config, dir.path()).is_err());

    let config = write_project(dir.path(), "take $RIVULET_UNSET_LIMIT", "");
    assert!(Session::from_config(&config, dir.path()).is_err());

    let config = write_project(dir.path(), "frobnicate @", "");
    assert!(Session::from_config(&config, dir.path()).is_err());
}

#[tokio::test]
async fn evaluation_errors_end_the_run() {
    let mut engine = Engine::with_builtins();
    engine.add_pure("check", |args| match args.first().and_then(Value::as_i64) {
        Some(n) if n < 0 => Err(EvalError::Other("negative input".into())),
        _ => Ok(args.first().cloned().unwrap_or(Value::Null)),
    });
    let session = Session::compile("map check(@)", &engine, PipelineOptions::default()).unwrap();
    let mut out = Vec::new();
    let result = session.run_jsonl("1\n-1\n2\n".as_bytes(), &mut out).await;
    assert!(result.is_err());
    assert_eq!(String::from_utf8(out).unwrap(), "1\n");
}

#[tokio::test]
async fn cancellation_closes_the_input() {
    let session = session("map @ + 1");
    let (mut tx, rx) = tokio::io::duplex(64);
    tx.write_all(b"1\n2\n").await.unwrap();

    let cancel = session.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });

    let mut out = Vec::new();
    let stats = session.run_jsonl(BufReader::new(rx), &mut out).await.unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "2\n3\n");
    assert_eq!(stats.events_in, 2);
    drop(tx);
}

#[tokio::test]
async fn context_values_are_exposed() {
    let options = PipelineOptions {
        context: json!({"min": 2}),
        ..PipelineOptions::default()
    };
    let session = Session::from_source("filter @ >= $.min", options).unwrap();
    let (_, out) = run(&session, "1\n2\n3\n").await;
    assert_eq!(out, "2\n3\n");
}

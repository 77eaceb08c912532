//! End-to-end: rivulet.toml + script on disk → Session → JSON lines.

use std::path::Path;

use rv_config::RivuletConfig;
use rv_runtime::Session;
use rv_runtime::tracing_init::DomainFormat;
use tokio::io::BufReader;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

const CONFIG: &str = r#"
[pipeline]
script = "pipelines/totals.rv"

[context]
min_total = 3

[vars]
KEY = "user"

[logging]
level = "debug"
"#;

const SCRIPT: &str = "\
groupBy @.$KEY >>
  !reduce $.accumulator + $.current.amount, 0
  map {user: @group, total: @}
<< concat
filter @.total >= $.min_total
";

const EVENTS: &str = r#"{"user": "alice", "amount": 5}
{"user": "bob", "amount": 2}
{"user": "carol", "amount": 1}
{"user": "alice", "amount": 7}
{"user": "carol", "amount": 4}
"#;

fn init_test_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .event_format(DomainFormat::default())
                .with_test_writer()
                .with_filter(EnvFilter::new("debug")),
        )
        .try_init();
}

fn write_project(dir: &Path) -> RivuletConfig {
    std::fs::create_dir_all(dir.join("pipelines")).unwrap();
    std::fs::write(dir.join("pipelines/totals.rv"), SCRIPT).unwrap();
    std::fs::write(dir.join("events.jsonl"), EVENTS).unwrap();
    std::fs::write(dir.join("rivulet.toml"), CONFIG).unwrap();
    RivuletConfig::load(dir.join("rivulet.toml")).unwrap()
}

#[tokio::test]
async fn e2e_group_totals_from_disk() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = write_project(dir.path());

    let session = Session::from_config(&config, dir.path()).unwrap();
    let input = tokio::fs::File::open(dir.path().join("events.jsonl")).await.unwrap();
    let mut out = Vec::new();
    let stats = session.run_jsonl(BufReader::new(input), &mut out).await.unwrap();

    assert_eq!(
        String::from_utf8(out).unwrap(),
        "{\"user\":\"alice\",\"total\":12}\n{\"user\":\"carol\",\"total\":5}\n"
    );
    assert_eq!(stats.events_in, 5);
    assert_eq!(stats.events_out, 2);
    assert_eq!(stats.skipped, 0);
}

#[tokio::test]
async fn e2e_same_session_runs_twice() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = write_project(dir.path());
    let session = Session::from_config(&config, dir.path()).unwrap();

    for _ in 0..2 {
        let mut out = Vec::new();
        let stats = session
            .run_jsonl(EVENTS.as_bytes(), &mut out)
            .await
            .unwrap();
        assert_eq!(stats.events_out, 2);
    }
}

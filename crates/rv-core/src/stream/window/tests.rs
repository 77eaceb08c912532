use std::sync::Arc;
use std::time::Duration;

use futures::stream;
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::time::{Instant, advance, sleep};

use super::*;
use crate::error::EvalError;
use crate::stream::{EventStream, ReduceFn, from_values};
use crate::value::{num, to_number};

fn summing() -> ReduceFn {
    Arc::new(|acc: Value, cur: Value, _: &Scope| Ok(num(to_number(&acc) + to_number(&cur))))
}

fn pushing() -> ReduceFn {
    Arc::new(|acc: Value, cur: Value, _: &Scope| {
        let mut items = acc.as_array().cloned().unwrap_or_default();
        items.push(cur);
        Ok(Value::Array(items))
    })
}

/// Each value is delivered `delay` milliseconds after the previous one.
fn timed(items: Vec<(u64, Value)>) -> EventStream {
    stream::iter(items)
        .then(|(delay, v)| async move {
            sleep(Duration::from_millis(delay)).await;
            Ok(Event::Data(v))
        })
        .boxed()
}

async fn values(out: EventStream) -> Vec<Value> {
    out.map(|item| item.unwrap().into_data("test").unwrap())
        .collect()
        .await
}

async fn windows(out: EventStream) -> Vec<Vec<Value>> {
    let groups: Vec<_> = out.collect().await;
    let mut result = Vec::new();
    for group in groups {
        match group.unwrap() {
            Event::Group(g) => result.push(values(g.events).await),
            Event::Data(v) => panic!("expected a window, got {v}"),
        }
    }
    result
}

// ---------------------------------------------------------------------------
// bufferReduce
// ---------------------------------------------------------------------------

#[tokio::test]
async fn buffer_reduce_emits_full_windows() {
    let input = from_values((1..=6).map(Value::from).collect::<Vec<_>>());
    let out = buffer_reduce(input, Scope::default(), summing(), json!(0), 3);
    assert_eq!(values(out).await, vec![json!(6), json!(15)]);
}

#[tokio::test]
async fn buffer_reduce_flushes_partial_window_on_completion() {
    let input = from_values((1..=4).map(Value::from).collect::<Vec<_>>());
    let out = buffer_reduce(input, Scope::default(), summing(), json!(0), 3);
    assert_eq!(values(out).await, vec![json!(6), json!(4)]);

    let out = buffer_reduce(from_values(vec![]), Scope::default(), summing(), json!(0), 3);
    assert!(values(out).await.is_empty());
}

#[tokio::test]
async fn buffer_reduce_starts_each_window_from_initial() {
    let input = from_values((1..=5).map(Value::from).collect::<Vec<_>>());
    let out = buffer_reduce(input, Scope::default(), pushing(), json!([0]), 2);
    assert_eq!(
        values(out).await,
        vec![json!([0, 1, 2]), json!([0, 3, 4]), json!([0, 5])]
    );
}

#[tokio::test]
async fn buffer_reduce_stops_on_reducer_error() {
    let failing: ReduceFn = Arc::new(|_: Value, _: Value, _: &Scope| Err(EvalError::Other("nope".into())));
    let input = from_values(vec![json!(1), json!(2)]);
    let out: Vec<_> = buffer_reduce(input, Scope::default(), failing, json!(0), 1)
        .collect()
        .await;
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].as_ref().unwrap_err(), &EvalError::Other("nope".into()));
}

// ---------------------------------------------------------------------------
// throttleReduce
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn throttle_reduce_releases_on_trailing_edge() {
    let input = timed((1..=5).map(|i| (300, Value::from(i))).collect());
    let out = throttle_reduce(
        input,
        Scope::default(),
        summing(),
        json!(0),
        ThrottleOptions::default(),
    );
    assert_eq!(values(out).await, vec![json!(10), json!(5)]);
}

#[tokio::test(start_paused = true)]
async fn throttle_reduce_waits_for_pending_trailing_release() {
    let started = Instant::now();
    let input = from_values(vec![json!(1), json!(2)]);
    let options = ThrottleOptions {
        period: Duration::from_millis(500),
        ..ThrottleOptions::default()
    };
    let out = throttle_reduce(input, Scope::default(), summing(), json!(0), options);
    assert_eq!(values(out).await, vec![json!(3)]);
    assert!(started.elapsed() >= Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn throttle_reduce_leading_edge() {
    let leading_only = ThrottleOptions {
        period: Duration::from_millis(1000),
        leading: true,
        trailing: false,
    };
    let input = from_values(vec![json!(1), json!(2), json!(3)]);
    let out = throttle_reduce(input, Scope::default(), summing(), json!(0), leading_only);
    assert_eq!(values(out).await, vec![json!(1)]);

    let both = ThrottleOptions {
        trailing: true,
        ..leading_only
    };
    let input = from_values(vec![json!(1), json!(2), json!(3)]);
    let out = throttle_reduce(input, Scope::default(), summing(), json!(0), both);
    assert_eq!(values(out).await, vec![json!(1), json!(5)]);
}

#[tokio::test(start_paused = true)]
async fn throttle_reduce_reopens_after_quiet_period() {
    let options = ThrottleOptions {
        period: Duration::from_millis(1000),
        leading: true,
        trailing: false,
    };
    let input = timed(vec![(0, json!(1)), (1500, json!(2))]);
    let out = throttle_reduce(input, Scope::default(), summing(), json!(0), options);
    assert_eq!(values(out).await, vec![json!(1), json!(2)]);
}

// ---------------------------------------------------------------------------
// flush
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn flush_opens_windows_on_demand() {
    let input = timed((1..=6).map(|i| (40, Value::from(i))).collect());
    let out = flush(input, Duration::from_millis(100), false);
    assert_eq!(
        windows(out).await,
        vec![
            vec![json!(1), json!(2), json!(3)],
            vec![json!(4), json!(5), json!(6)],
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn flush_skips_idle_periods() {
    let input = timed(vec![(10, json!("a")), (1000, json!("b"))]);
    let out = flush(input, Duration::from_millis(100), false);
    assert_eq!(windows(out).await, vec![vec![json!("a")], vec![json!("b")]]);
}

#[tokio::test(start_paused = true)]
async fn strict_flush_bounds_window_length_under_load() {
    let started = Instant::now();
    let input = stream::iter(0..20)
        .then(move |_| async move {
            advance(Duration::from_millis(30)).await;
            Ok(Event::Data(Value::from(started.elapsed().as_millis() as u64)))
        })
        .boxed();
    let all = windows(flush(input, Duration::from_millis(100), true)).await;
    assert!(all.len() >= 5, "{all:?}");
    for window in &all {
        let first = window.first().and_then(Value::as_u64).unwrap();
        let last = window.last().and_then(Value::as_u64).unwrap();
        assert!(last - first <= 100, "window spans {first}..{last}");
    }
    assert_eq!(all.iter().map(Vec::len).sum::<usize>(), 20);
}

#[tokio::test]
async fn window_expiry_is_strictly_after_the_period() {
    let opened = Instant::now();
    let period = Duration::from_millis(100);
    assert!(!window_expired(opened, opened + period, period));
    assert!(window_expired(opened, opened + period + Duration::from_millis(1), period));
    assert!(!window_expired(opened, opened, period));
}

#[tokio::test]
async fn flush_forwards_errors_into_the_open_window() {
    let input = stream::iter(vec![
        Ok(Event::Data(json!(1))),
        Err(EvalError::Other("bad".into())),
        Ok(Event::Data(json!(2))),
    ])
    .boxed();
    let mut outer: Vec<_> = flush(input, Duration::from_millis(100), false)
        .collect()
        .await;
    assert_eq!(outer.len(), 2);
    assert_eq!(outer[1].as_ref().unwrap_err(), &EvalError::Other("bad".into()));
    let Ok(Event::Group(group)) = outer.remove(0) else {
        panic!("expected a window");
    };
    let inner: Vec<_> = group.events.collect().await;
    assert!(matches!(inner[0], Ok(Event::Data(ref v)) if v == &json!(1)));
    assert_eq!(inner[1].as_ref().unwrap_err(), &EvalError::Other("bad".into()));
}

// ---------------------------------------------------------------------------
// debounceTime / throttleTime / timeout
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn debounce_keeps_the_last_value_of_each_burst() {
    let input = timed(vec![(0, json!(1)), (50, json!(2)), (200, json!(3)), (50, json!(4))]);
    let out = values(debounce_time(input, Duration::from_millis(100))).await;
    // 2 settles at t=150; 4 is still pending when the input completes
    assert_eq!(out, vec![json!(2), json!(4)]);
}

#[tokio::test(start_paused = true)]
async fn debounce_drops_the_pending_value_on_error() {
    let input = stream::iter(vec![Ok(Event::Data(json!(1))), Err(EvalError::Other("bad".into()))]).boxed();
    let out: Vec<_> = debounce_time(input, Duration::from_millis(100)).collect().await;
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].as_ref().unwrap_err(), &EvalError::Other("bad".into()));
}

#[tokio::test(start_paused = true)]
async fn throttle_time_passes_the_first_value_per_period() {
    let input = timed(vec![(0, json!(1)), (50, json!(2)), (60, json!(3)), (120, json!(4))]);
    let out = values(throttle_time(input, Duration::from_millis(100))).await;
    assert_eq!(out, vec![json!(1), json!(3), json!(4)]);
}

#[tokio::test(start_paused = true)]
async fn timeout_fails_after_a_silent_period() {
    let input = timed(vec![(10, json!(1)), (200, json!(2))]);
    let out: Vec<_> = timeout(input, Duration::from_millis(100)).collect().await;
    assert_eq!(out.len(), 2);
    assert!(matches!(out[0], Ok(Event::Data(ref v)) if v == &json!(1)));
    assert_eq!(
        out[1].as_ref().unwrap_err(),
        &EvalError::Timeout(Duration::from_millis(100))
    );

    let input = timed(vec![(90, json!(1)), (90, json!(2))]);
    let out = values(timeout(input, Duration::from_millis(100))).await;
    assert_eq!(out, vec![json!(1), json!(2)]);
}

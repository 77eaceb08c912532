//! A compiled pipeline bound to its configuration, run over JSON-lines
//! input.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use futures::StreamExt;
use futures::stream;
use orion_error::compat_prelude::*;
use orion_error::prelude::*;
use rv_config::RivuletConfig;
use rv_core::bins::BinReducer;
use rv_core::stream::{Event, EventStream};
use rv_core::{CoreReason, Engine, Pipeline, PipelineOptions};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::error::{RuntimeReason, RuntimeResult};

#[cfg(test)]
mod tests;

/// Counts for one `run_jsonl` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Input lines parsed into events.
    pub events_in: u64,
    /// Values written to the output.
    pub events_out: u64,
    /// Malformed input lines that were dropped.
    pub skipped: u64,
}

#[derive(Default)]
struct InputCounters {
    events_in: AtomicU64,
    skipped: AtomicU64,
}

pub struct Session {
    pipeline: Pipeline,
    cancel: CancellationToken,
}

impl Session {
    /// Load the configured script, substitute `[vars]`, install the
    /// configured bin reducers and compile.
    pub fn from_config(config: &RivuletConfig, base_dir: &Path) -> RuntimeResult<Self> {
        let script = config.pipeline.script_path(base_dir);
        let raw = std::fs::read_to_string(&script)
            .owe_sys()
            .position(script.display().to_string())?;
        let source = rv_lang::preprocess_vars(&raw, &config.vars)
            .owe_data()
            .position(script.display().to_string())?;

        let mut engine = Engine::with_builtins();
        for bin in &config.binning {
            let reducer = BinReducer::new(bin.max_buckets, bin.intervals.clone(), bin.warn);
            engine.add_bin_reducer(&bin.name, reducer);
            rv_debug!(conf, method = %bin.name, max_buckets = bin.max_buckets, "bin reducer installed");
        }

        let options = PipelineOptions {
            context: config.context.clone(),
            ordered_async: config.pipeline.ordered_async,
            ..PipelineOptions::default()
        };
        let session = Self::compile(&source, &engine, options)
            .position(script.display().to_string())?;
        rv_info!(
            conf,
            script = %script.display(),
            stages = session.pipeline.program().stages().len(),
            "session ready"
        );
        Ok(session)
    }

    /// Compile `source` against the built-in methods.
    pub fn from_source(source: &str, options: PipelineOptions) -> RuntimeResult<Self> {
        Self::compile(source, &Engine::with_builtins(), options)
    }

    /// Compile `source` against a caller-supplied engine.
    pub fn compile(source: &str, engine: &Engine, options: PipelineOptions) -> RuntimeResult<Self> {
        let pipeline =
            Pipeline::compile_with(source, &rv_core::Registry::with_defaults(), engine, options)
                .err_conv()?;
        Ok(Self {
            pipeline,
            cancel: CancellationToken::new(),
        })
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Cancelling this token closes the input of every run. Stages still
    /// drain, so pending windows and trailing releases are written out.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Feed one JSON value per line of `reader` through the pipeline and
    /// write one JSON value per line to `writer`. Blank lines are ignored and
    /// malformed lines are skipped with a warning. The run fails on the first
    /// evaluation error or I/O failure.
    pub async fn run_jsonl<R, W>(&self, reader: R, mut writer: W) -> RuntimeResult<RunStats>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin,
    {
        let counters = Arc::new(InputCounters::default());
        let read_failure = Arc::new(OnceLock::new());
        let input = json_lines(
            reader,
            self.cancel.clone(),
            Arc::clone(&counters),
            Arc::clone(&read_failure),
        );

        let mut output = self.pipeline.run(input);
        let mut events_out = 0;
        while let Some(item) = output.next().await {
            let value = item.owe(RuntimeReason::Core(CoreReason::Exec))?;
            let mut line = serde_json::to_vec(&value).owe(RuntimeReason::Io)?;
            line.push(b'\n');
            writer.write_all(&line).await.owe(RuntimeReason::Io)?;
            writer.flush().await.owe(RuntimeReason::Io)?;
            events_out += 1;
        }
        if let Some(message) = read_failure.get() {
            return Err(StructError::from(RuntimeReason::Io).with_detail(message.clone()));
        }

        let stats = RunStats {
            events_in: counters.events_in.load(Ordering::Relaxed),
            events_out,
            skipped: counters.skipped.load(Ordering::Relaxed),
        };
        rv_info!(
            pipe,
            events_in = stats.events_in,
            events_out = stats.events_out,
            skipped = stats.skipped,
            "run finished"
        );
        Ok(stats)
    }
}

fn json_lines<R>(
    reader: R,
    cancel: CancellationToken,
    counters: Arc<InputCounters>,
    failure: Arc<OnceLock<String>>,
) -> EventStream
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    stream::unfold((reader.lines(), 0u64), move |(mut lines, mut line_no)| {
        let cancel = cancel.clone();
        let counters = Arc::clone(&counters);
        let failure = Arc::clone(&failure);
        async move {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        rv_debug!(io, line = line_no, "input closed by cancellation");
                        return None;
                    }
                    next = lines.next_line() => next,
                };
                line_no += 1;
                let line = match next {
                    Ok(Some(line)) => line,
                    Ok(None) => return None,
                    Err(e) => {
                        rv_error!(io, line = line_no, error = %e, "reading input failed");
                        let _ = failure.set(e.to_string());
                        return None;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(&line) {
                    Ok(value) => {
                        counters.events_in.fetch_add(1, Ordering::Relaxed);
                        return Some((Ok(Event::Data(value)), (lines, line_no)));
                    }
                    Err(e) => {
                        counters.skipped.fetch_add(1, Ordering::Relaxed);
                        rv_warn!(io, line = line_no, error = %e, "skipping malformed input line");
                    }
                }
            }
        }
    })
    .boxed()
}

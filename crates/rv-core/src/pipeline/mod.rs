//! Host entry point: compile pipeline source once, run it over any number
//! of input streams.

use futures::StreamExt;
use futures::stream;
use orion_error::compat_prelude::*;
use rv_lang::{Program, parse_pipeline};
use serde_json::Value;

use crate::engine::{Engine, Scope};
use crate::error::{CoreReason, CoreResult, EvalError};
use crate::operator::{Builder, Registry};
use crate::stream::{EventStream, Subjects, Transform, flatten_groups, from_values};

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Exposed to expressions as `$`.
    pub context: Value,
    /// Keep async stage output in input order.
    pub ordered_async: bool,
    /// Channels `emit` stages publish into.
    pub subjects: Subjects,
}

/// A compiled pipeline.
#[derive(Debug, Clone)]
pub struct Pipeline {
    program: Program,
    transform: Transform,
    scope: Scope,
}

impl Pipeline {
    pub fn compile(source: &str, registry: &Registry, engine: &Engine) -> CoreResult<Self> {
        Self::compile_with(source, registry, engine, PipelineOptions::default())
    }

    pub fn compile_with(
        source: &str,
        registry: &Registry,
        engine: &Engine,
        options: PipelineOptions,
    ) -> CoreResult<Self> {
        let program = parse_pipeline(source).owe(CoreReason::Parse)?;
        let scope = Scope::new(options.context).with_subjects(options.subjects);
        let transform = Builder::new(registry, engine)
            .with_scope(scope.clone())
            .ordered_async(options.ordered_async)
            .build_program(&program)
            .owe(CoreReason::Build)?;
        tracing::debug!(stages = program.stages().len(), "pipeline compiled");
        Ok(Self {
            program,
            transform,
            scope,
        })
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Subscribe here to receive what `emit` stages publish.
    pub fn subjects(&self) -> &Subjects {
        self.scope.subjects()
    }

    /// Apply the pipeline without flattening sub-streams or stopping on
    /// errors.
    pub fn apply(&self, input: EventStream) -> EventStream {
        self.transform.apply(input, self.scope.clone())
    }

    /// Run over `input`. Leftover sub-streams are flattened in order and the
    /// output ends after the first error.
    pub fn run(&self, input: EventStream) -> stream::BoxStream<'static, Result<Value, EvalError>> {
        flatten_groups(self.apply(input))
            .map(|item| item.and_then(|event| event.into_data("output")))
            .scan(false, |failed, item| {
                let out = (!*failed).then(|| {
                    *failed = item.is_err();
                    item
                });
                futures::future::ready(out)
            })
            .boxed()
    }

    /// Run over a batch of values and collect the output.
    pub async fn collect(&self, values: Vec<Value>) -> Result<Vec<Value>, EvalError> {
        let mut out = self.run(from_values(values));
        let mut collected = Vec::new();
        while let Some(item) = out.next().await {
            collected.push(item?);
        }
        Ok(collected)
    }
}

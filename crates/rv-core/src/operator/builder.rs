use rv_lang::{Logic, Program, StageDesc, StageMode, Step};
use serde_json::Value;
use tracing::debug;

use super::{DefaultArg, Registry, StageArg, StageContext, StageFn};
use crate::engine::{Engine, Scope};
use crate::error::BuildError;
use crate::stream::{self, Transform};

/// Resolves parsed programs into transforms against a registry and an
/// expression engine. Build-time evaluation sees `scope`'s context.
pub struct Builder<'a> {
    registry: &'a Registry,
    engine: &'a Engine,
    scope: Scope,
    ordered_async: bool,
}

impl<'a> Builder<'a> {
    pub fn new(registry: &'a Registry, engine: &'a Engine) -> Self {
        Self {
            registry,
            engine,
            scope: Scope::default(),
            ordered_async: false,
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn ordered_async(mut self, ordered: bool) -> Self {
        self.ordered_async = ordered;
        self
    }

    /// Fold every step of `program` into one transform.
    pub fn build_program(&self, program: &Program) -> Result<Transform, BuildError> {
        program
            .steps
            .iter()
            .try_fold(Transform::identity(), |acc, step| Ok(acc.then(self.build_step(step)?)))
    }

    fn build_step(&self, step: &Step) -> Result<Transform, BuildError> {
        match step {
            Step::Stage(stage) => self.build_stage(stage),
            Step::Split(block) => {
                let decl = self.declaration(&block.head)?;
                if !decl.kind.emits_groups() {
                    return Err(BuildError::invalid(
                        &block.head.operator,
                        "cannot open a split block, it does not emit sub-streams",
                    ));
                }
                let head = self.build_stage(&block.head)?;
                let body = self.build_program(&block.body)?;
                let name = block.head.operator.clone();
                let merge = block.merge;
                Ok(Transform::new(move |input, scope| {
                    let groups = head.apply(input, scope.clone());
                    stream::split(groups, scope, &name, body.clone(), merge)
                }))
            }
            Step::Fork(block) => {
                let branches = block
                    .branches
                    .iter()
                    .map(|branch| self.build_program(branch))
                    .collect::<Result<Vec<_>, _>>()?;
                let join = block.join;
                Ok(Transform::new(move |input, scope| stream::fork(input, scope, &branches, join)))
            }
        }
    }

    fn declaration(&self, stage: &StageDesc) -> Result<&'a super::Declaration, BuildError> {
        self.registry
            .get(&stage.operator)
            .ok_or_else(|| BuildError::UnknownOperator {
                name: stage.operator.clone(),
                span: stage.span,
            })
    }

    /// Resolve one stage: pad and classify its arguments, build them, and
    /// configure the operator family.
    pub fn build_stage(&self, stage: &StageDesc) -> Result<Transform, BuildError> {
        let decl = self.declaration(stage)?;
        let config = &decl.config;
        let op = stage.operator.as_str();

        let accumulator = match stage.mode {
            StageMode::Accumulator if !decl.kind.accepts_reducer() => {
                return Err(BuildError::NotAReducer {
                    operator: op.to_string(),
                });
            }
            StageMode::Accumulator => true,
            _ => config.context,
        };

        let (min, max) = decl.kind.arity(config.is_async);
        if stage.exprs.is_empty() && min > 0 {
            return Err(BuildError::MissingArguments {
                operator: op.to_string(),
            });
        }
        let mut pending: Vec<DefaultArg> = stage.exprs.iter().cloned().map(DefaultArg::Expr).collect();
        while let Some(default) = pending
            .len()
            .checked_sub(config.default_start)
            .and_then(|i| config.defaults.get(i))
        {
            pending.push(default.clone());
        }
        if pending.len() < min {
            return Err(BuildError::InsufficientArguments {
                operator: op.to_string(),
                min,
                got: pending.len(),
            });
        }
        if let Some(max) = max
            && pending.len() > max
        {
            return Err(BuildError::TooManyArguments {
                operator: op.to_string(),
                max,
                got: pending.len(),
            });
        }

        let immediate = stage.mode == StageMode::Immediate;
        let args = pending
            .into_iter()
            .enumerate()
            .map(|(i, arg)| match arg {
                DefaultArg::Value(v) => Ok(StageArg::Value(v)),
                DefaultArg::Expr(logic) if immediate || i >= config.immediate_from => {
                    self.evaluate(&logic).map(StageArg::Value)
                }
                DefaultArg::Expr(logic) => self
                    .build_fn(op, &logic, accumulator, config.is_async)
                    .map(StageArg::Fn),
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            operator = op,
            kind = ?decl.kind,
            args = args.len(),
            accumulator,
            immediate,
            "stage built"
        );
        decl.kind.build(
            args,
            StageContext {
                operator: op,
                ordered_async: self.ordered_async,
            },
        )
    }

    fn evaluate(&self, logic: &Logic) -> Result<Value, BuildError> {
        let callable = self.engine.build(logic)?;
        Ok(callable.call(&Value::Null, &self.scope)?)
    }

    fn build_fn(
        &self,
        op: &str,
        logic: &Logic,
        accumulator: bool,
        is_async: bool,
    ) -> Result<StageFn, BuildError> {
        if accumulator {
            let rewritten = accumulator_context(op, logic)?;
            return Ok(StageFn::Reducer(self.engine.build(&rewritten)?));
        }
        if is_async {
            return Ok(StageFn::Async(self.engine.build_async(logic)?));
        }
        Ok(StageFn::Unary(self.engine.build(logic)?))
    }
}

/// Rewrite `$` references to read the `{accumulator, current}` pair. Plain
/// `@` references are rejected since a reducer has no single datum.
pub fn accumulator_context(op: &str, logic: &Logic) -> Result<Logic, BuildError> {
    logic.rewrite(&mut |node| match node {
        Logic::Var(_) => Err(BuildError::ContextMisuse {
            operator: op.to_string(),
        }),
        Logic::Context(path) => Ok(Some(Logic::Var(rv_lang::VarRef {
            ascend: 0,
            path: path.clone(),
        }))),
        _ => Ok(None),
    })
}

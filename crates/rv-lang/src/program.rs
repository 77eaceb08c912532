use std::fmt;

use crate::error::Span;
use crate::logic::Logic;

/// A parsed pipeline: an ordered list of steps, tree-shaped through split
/// and fork blocks.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Stage(StageDesc),
    Split(SplitBlock),
    Fork(ForkBlock),
}

/// One `<operator> <expr>, <expr>...` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct StageDesc {
    pub operator: String,
    /// Argument expressions, not yet built against an engine.
    pub exprs: Vec<Logic>,
    pub mode: StageMode,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageMode {
    #[default]
    Normal,
    /// `!stage`: callables receive the `{accumulator, current}` pair.
    Accumulator,
    /// `#stage`: every argument is evaluated once, at build time.
    Immediate,
}

/// `<grouping stage> >> <body> << [merge [N] | concat]`
#[derive(Debug, Clone, PartialEq)]
pub struct SplitBlock {
    pub head: StageDesc,
    pub body: Program,
    pub merge: MergeStrategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Flatten sub-streams unordered, optionally bounded.
    Merge { limit: Option<usize> },
    /// Flatten sub-streams one after another.
    Concat,
}

impl Default for MergeStrategy {
    fn default() -> Self {
        MergeStrategy::Merge { limit: None }
    }
}

/// `fork [join] >> <branch>; <branch> <<`
#[derive(Debug, Clone, PartialEq)]
pub struct ForkBlock {
    pub join: JoinStrategy,
    pub branches: Vec<Program>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinStrategy {
    #[default]
    Merge,
    Zip,
    Race,
    Concat,
}

impl JoinStrategy {
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "merge" => Some(Self::Merge),
            "zip" => Some(Self::Zip),
            "race" => Some(Self::Race),
            "concat" => Some(Self::Concat),
            _ => None,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Zip => "zip",
            Self::Race => "race",
            Self::Concat => "concat",
        }
    }
}

impl Program {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Every stage in the program, depth-first, including split heads.
    pub fn stages(&self) -> Vec<&StageDesc> {
        let mut out = Vec::new();
        collect_stages(self, &mut out);
        out
    }
}

fn collect_stages<'a>(program: &'a Program, out: &mut Vec<&'a StageDesc>) {
    for step in &program.steps {
        match step {
            Step::Stage(stage) => out.push(stage),
            Step::Split(split) => {
                out.push(&split.head);
                collect_stages(&split.body, out);
            }
            Step::Fork(fork) => fork.branches.iter().for_each(|b| collect_stages(b, out)),
        }
    }
}

// ---------------------------------------------------------------------------
// Canonical rendering (re-parseable)
// ---------------------------------------------------------------------------

impl fmt::Display for StageDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            StageMode::Normal => {}
            StageMode::Accumulator => f.write_str("!")?,
            StageMode::Immediate => f.write_str("#")?,
        }
        f.write_str(&self.operator)?;
        for (i, expr) in self.exprs.iter().enumerate() {
            f.write_str(if i == 0 { " " } else { ", " })?;
            write!(f, "{expr}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_steps(f, &self.steps, 0)
    }
}

fn write_steps(f: &mut fmt::Formatter<'_>, steps: &[Step], indent: usize) -> fmt::Result {
    steps.iter().try_for_each(|step| write_step(f, step, indent))
}

fn write_step(f: &mut fmt::Formatter<'_>, step: &Step, indent: usize) -> fmt::Result {
    let pad = " ".repeat(indent);
    match step {
        Step::Stage(stage) => writeln!(f, "{pad}{stage}"),
        Step::Split(split) => {
            writeln!(f, "{pad}{} >>", split.head)?;
            write_steps(f, &split.body.steps, indent + 2)?;
            match split.merge {
                MergeStrategy::Merge { limit: None } => writeln!(f, "{pad}<<"),
                MergeStrategy::Merge { limit: Some(n) } => writeln!(f, "{pad}<< merge {n}"),
                MergeStrategy::Concat => writeln!(f, "{pad}<< concat"),
            }
        }
        Step::Fork(fork) => {
            writeln!(f, "{pad}fork {} >>", fork.join.keyword())?;
            for branch in &fork.branches {
                match branch.steps.as_slice() {
                    [single] => write_step(f, single, indent + 2)?,
                    steps => {
                        writeln!(f, "{pad}  (")?;
                        write_steps(f, steps, indent + 4)?;
                        writeln!(f, "{pad}  )")?;
                    }
                }
            }
            writeln!(f, "{pad}<<")
        }
    }
}

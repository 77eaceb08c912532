use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::Result;

use rv_config::{load_script_with_env, parse_vars};
use rv_core::{Engine, Pipeline, Registry};
use rv_lang::{StageDesc, StageMode};

const BOLD: &str = "\x1b[1m";
const CYAN: &str = "\x1b[36m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

pub fn run(script: PathBuf, vars: Vec<String>) -> Result<()> {
    let var_map = parse_vars(&vars)?;
    let source = load_script_with_env(&script, &var_map)?;

    let registry = Registry::with_defaults();
    let pipeline = Pipeline::compile(&source, &registry, &Engine::with_builtins())
        .map_err(|e| anyhow::anyhow!("{}: {e}", script.display()))?;
    let program = pipeline.program();

    if !std::io::stdout().is_terminal() {
        print!("{program}");
        return Ok(());
    }

    println!("{BOLD}Pipeline:{RESET} {}", script.display());
    for line in program.to_string().lines() {
        println!("  {line}");
    }
    println!("{BOLD}Stages:{RESET}");
    for stage in program.stages() {
        let kind = registry
            .get(&stage.operator)
            .map(|decl| format!("{:?}", decl.kind))
            .unwrap_or_default();
        println!(
            "  {CYAN}{:<16}{RESET} {kind:<14} {DIM}{}{RESET}",
            stage.operator,
            describe(stage)
        );
    }
    Ok(())
}

fn describe(stage: &StageDesc) -> String {
    let mode = match stage.mode {
        StageMode::Normal => "per event",
        StageMode::Accumulator => "accumulator",
        StageMode::Immediate => "evaluated once",
    };
    format!("{mode}, {} argument(s)", stage.exprs.len())
}

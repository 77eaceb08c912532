use std::path::PathBuf;

use anyhow::Result;
use tokio::io::{AsyncBufRead, BufReader};

use rv_config::RivuletConfig;
use rv_runtime::Session;
use rv_runtime::signal::cancel_on_signal;
use rv_runtime::tracing_init::init_tracing;

pub async fn run(config: PathBuf, input: Option<PathBuf>) -> Result<()> {
    let config_path = config
        .canonicalize()
        .map_err(|e| anyhow::anyhow!("config path '{}': {e}", config.display()))?;
    let rivulet_config = RivuletConfig::load(&config_path)?;
    let base_dir = config_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("config path has no parent directory"))?;

    let _guard = init_tracing(&rivulet_config.logging, base_dir)?;

    let session =
        Session::from_config(&rivulet_config, base_dir).map_err(|e| anyhow::anyhow!("{e}"))?;
    tokio::spawn(cancel_on_signal(session.cancel_token()));

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .map_err(|e| anyhow::anyhow!("input '{}': {e}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let stats = session
        .run_jsonl(reader, tokio::io::stdout())
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    tracing::info!(
        domain = "sys",
        events_in = stats.events_in,
        events_out = stats.events_out,
        skipped = stats.skipped,
        "rivulet finished"
    );
    Ok(())
}

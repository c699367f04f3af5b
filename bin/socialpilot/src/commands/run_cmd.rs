use socialpilot_core::{Config, InvocationRequest, Paths};
use socialpilot_engine::Engine;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Accept inline JSON, a file path, or `-` for stdin.
pub fn parse_request(input: &str) -> anyhow::Result<InvocationRequest> {
    let raw = if input == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else if input.trim_start().starts_with('{') {
        input.to_string()
    } else if Path::new(input).is_file() {
        std::fs::read_to_string(input)?
    } else {
        anyhow::bail!("'{}' is neither JSON nor a readable file", input);
    };
    serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("Failed to parse request JSON: {}\nInput: {}", e, raw.trim()))
}

/// Run one request through the engine and print the result as JSON.
/// Ctrl-C stops the action loop after the current item.
pub async fn execute(paths: Paths, request: InvocationRequest) -> anyhow::Result<()> {
    let config = Config::load_or_default(&paths)?;
    let engine = Arc::new(Engine::new(config, paths));

    let cancel = engine.cancellation();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing current item");
            cancel.cancel();
        }
    });

    let result = engine.execute(request).await;
    interrupt.abort();
    engine.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.ok {
        std::process::exit(1);
    }
    Ok(())
}

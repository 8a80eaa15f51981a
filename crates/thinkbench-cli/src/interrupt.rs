use anyhow::{Context, Result};
use thinkbench_core::CancelToken;

/// Watches for Ctrl-C on a helper thread. The first signal cancels the run
/// (the in-flight fold is discarded, finished folds are reported); a second
/// one exits immediately.
pub fn install(cancel: CancelToken) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build signal runtime")?;
    std::thread::Builder::new()
        .name("thinkbench-signal".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                tracing::warn!("interrupt received; stopping after the current batch");
                cancel.cancel();
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("tool error: interrupted twice, exiting without a report");
                    std::process::exit(130);
                }
            });
        })
        .context("spawn signal thread")?;
    Ok(())
}

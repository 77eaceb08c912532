use tokio_util::sync::CancellationToken;

/// Cancel `cancel` on the first Ctrl-C (or SIGTERM on unix).
pub async fn cancel_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        rv_info!(sys, signal = "SIGINT", "received signal, closing input");
                    }
                    _ = sigterm.recv() => {
                        rv_info!(sys, signal = "SIGTERM", "received signal, closing input");
                    }
                }
            }
            Err(e) => {
                rv_warn!(sys, error = %e, "cannot listen for SIGTERM, only Ctrl-C stops the run");
                wait_for_ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    wait_for_ctrl_c().await;
    cancel.cancel();
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => rv_info!(sys, signal = "SIGINT", "received signal, closing input"),
        // Without a handler the run only ends with its input.
        Err(e) => {
            rv_warn!(sys, error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await
        }
    }
}

pub mod check_auth;
pub mod status;
pub mod sync;
pub mod wait;

use tokio_util::sync::CancellationToken;

/// Token cancelled when the process receives Ctrl-C
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            trigger.cancel();
        }
    });
    token
}

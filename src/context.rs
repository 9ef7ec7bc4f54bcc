use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Child of `parent` that is cancelled once `timeout` elapses.
///
/// Cancelling `parent` cancels the child as well. Must be called inside a tokio runtime.
#[must_use]
pub fn deadline_token(parent: &CancellationToken, timeout: Duration) -> CancellationToken {
    let child = parent.child_token();
    let timer = child.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = tokio::time::sleep(timeout) => timer.cancel(),
            () = timer.cancelled() => {}
        }
    });
    child
}

//! Small shared helpers for worker threads.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::error::{OTelSdkError, OTelSdkResult};

/// Drives `fut` to completion, waiting at most `timeout` for the result.
///
/// The future is run on a short-lived named thread so the caller can abandon
/// it on expiry; an abandoned export keeps running until the exporter itself
/// gives up, but its result is discarded.
pub(crate) fn block_on_timeout(
    fut: BoxFuture<'static, OTelSdkResult>,
    timeout: Duration,
) -> OTelSdkResult {
    let (result_sender, result_receiver) = mpsc::sync_channel(1);
    thread::Builder::new()
        .name("opentelemetry-export".to_string())
        .spawn(move || {
            let _ = result_sender.send(futures_executor::block_on(fut));
        })
        .map_err(|err| {
            OTelSdkError::InternalFailure(format!("failed to spawn export thread: {err}"))
        })?;

    match result_receiver.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(OTelSdkError::Timeout(timeout)),
        Err(RecvTimeoutError::Disconnected) => Err(OTelSdkError::InternalFailure(
            "export task exited without a result".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;

    #[test]
    fn completes_within_deadline() {
        let result = block_on_timeout(
            async { Ok(()) }.boxed(),
            Duration::from_secs(1),
        );
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn expires_on_slow_future() {
        let result = block_on_timeout(
            async {
                std::thread::sleep(Duration::from_millis(200));
                Ok(())
            }
            .boxed(),
            Duration::from_millis(20),
        );
        assert_eq!(result, Err(OTelSdkError::Timeout(Duration::from_millis(20))));
    }
}

use crate::error::{SyncError, SyncResult};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::error;

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unexpected failure".to_string()
    }
}

/// Run `future`, turning a panic into [`SyncError::Internal`]
///
/// Used at the top of long-running loops so one bad event degrades to an
/// error value instead of taking the session down.
pub async fn run_guarded<F, T>(future: F) -> SyncResult<T>
where
    F: Future<Output = SyncResult<T>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(error = %message, "Task panicked");
            Err(SyncError::Internal(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_panic_becomes_internal_error() {
        let rows: Vec<u8> = Vec::new();
        let result: SyncResult<()> = run_guarded(async {
            if rows.is_empty() {
                panic!("bad row");
            }
            Ok(())
        })
        .await;
        assert_eq!(result, Err(SyncError::Internal("bad row".to_string())));
    }

    #[test]
    fn test_errors_pass_through() {
        let result: SyncResult<u8> =
            tokio_test::block_on(run_guarded(async { Err(SyncError::validation("nope")) }));
        assert_eq!(tokio_test::assert_err!(result), SyncError::validation("nope"));

        let value = tokio_test::block_on(run_guarded(async { Ok(7) }));
        assert_eq!(tokio_test::assert_ok!(value), 7);
    }
}

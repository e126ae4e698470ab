//! Loop run mode: one pipeline pass per tick until shutdown.
//!
//! The first pass runs immediately. Shutdown is only observed between
//! passes, so a run in flight always finishes its current message.

use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::error::Result;
use crate::pipeline::processor::IngestPipeline;

/// Poll until `shutdown` resolves or a run fails in a way that needs an
/// operator (state or config). Other failures wait for the next tick.
pub async fn run_loop<F>(pipeline: &mut IngestPipeline, interval: Duration, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    info!("Poller started, running every {}s", interval.as_secs());

    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("Poller shutting down");
                return Ok(());
            }
            _ = tick.tick() => {}
        }

        match pipeline.run_once().await {
            Ok(_) => {}
            Err(e) if e.requires_intervention() => return Err(e),
            Err(e) => {
                warn!(error = %e, "Run failed, will retry on next tick");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use crate::config::IngestConfig;
    use crate::error::{DestinationError, Error, FetchError};
    use crate::mail::{MailProvider, MessageStream};
    use crate::pipeline::types::Row;
    use crate::sheets::{Destination, SheetHandle};
    use crate::store::JsonStateStore;

    /// Fails every listing; asks for shutdown after `stop_after` calls.
    struct FlakyInbox {
        calls: AtomicUsize,
        stop_after: usize,
        shutdown: Arc<Notify>,
    }

    #[async_trait]
    impl MailProvider for FlakyInbox {
        async fn list_unread(&self) -> std::result::Result<MessageStream, FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.stop_after {
                self.shutdown.notify_one();
            }
            Err(FetchError::Timeout(Duration::from_secs(30)))
        }

        async fn mark_handled(&self, _id: &str) -> std::result::Result<(), FetchError> {
            Ok(())
        }
    }

    struct NullSheet;

    #[async_trait]
    impl Destination for NullSheet {
        async fn ensure_destination(&self) -> std::result::Result<SheetHandle, DestinationError> {
            Ok(SheetHandle {
                spreadsheet_id: "s".into(),
                sheet_name: "Log".into(),
            })
        }

        async fn append_row(
            &self,
            _handle: &SheetHandle,
            _row: &Row,
        ) -> std::result::Result<(), DestinationError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn transient_failures_keep_polling_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let shutdown = Arc::new(Notify::new());
        let inbox = Arc::new(FlakyInbox {
            calls: AtomicUsize::new(0),
            stop_after: 3,
            shutdown: Arc::clone(&shutdown),
        });
        let mut pipeline = IngestPipeline::new(
            &IngestConfig::default(),
            inbox.clone(),
            Arc::new(NullSheet),
            Box::new(JsonStateStore::new(dir.path().join("state.json"))),
        )
        .unwrap();

        let signal = Arc::clone(&shutdown);
        run_loop(&mut pipeline, Duration::from_millis(5), async move {
            signal.notified().await
        })
        .await
        .unwrap();

        assert_eq!(inbox.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn corrupt_state_stops_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"garbage").unwrap();

        let inbox = Arc::new(FlakyInbox {
            calls: AtomicUsize::new(0),
            stop_after: usize::MAX,
            shutdown: Arc::new(Notify::new()),
        });
        let mut pipeline = IngestPipeline::new(
            &IngestConfig::default(),
            inbox.clone(),
            Arc::new(NullSheet),
            Box::new(JsonStateStore::new(&path)),
        )
        .unwrap();

        let err = run_loop(&mut pipeline, Duration::from_millis(5), std::future::pending())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::State(_)));
        assert_eq!(inbox.calls.load(Ordering::SeqCst), 0);
    }
}

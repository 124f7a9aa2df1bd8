//! Polling change detection: a fast fill loop and a slow rotation loop.

use crate::error::ErrorSlot;
use crate::file::{SharedFile, TrackedFile, with_file};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// Spawns both polling loops for `shared`.
pub(crate) fn spawn(
    shared: &SharedFile,
    errors: &ErrorSlot,
    fast: Duration,
    slow: Duration,
    shutdown: &broadcast::Sender<()>,
) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(fill_loop(
            shared.clone(),
            errors.clone(),
            fast,
            shutdown.subscribe(),
        )),
        tokio::spawn(rotation_loop(
            shared.clone(),
            errors.clone(),
            slow,
            shutdown.subscribe(),
        )),
    ]
}

/// Refills the ring buffer every `interval`, reopening the file when the
/// handle shrank under us or stopped working.
pub(crate) async fn fill_loop(
    shared: SharedFile,
    errors: ErrorSlot,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {}
        }

        let filled = with_file(&shared, |file| {
            file.reopen_if_truncated()?;
            file.fill()
        })
        .await;

        if let Err(e) = filled {
            tracing::debug!(error = %e, "fill failed, reopening");
            if let Err(e) = with_file(&shared, TrackedFile::reopen).await {
                errors.report(e);
            }
        }
    }
}

/// Compares the path on disk with the open handle every `interval`.
pub(crate) async fn rotation_loop(
    shared: SharedFile,
    errors: ErrorSlot,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {}
        }

        if let Err(e) = with_file(&shared, TrackedFile::check_rotation).await {
            errors.report(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::options::StartPosition;
    use crate::test_helpers::TempLogFile;
    use std::sync::{Arc, Mutex};

    const FAST: Duration = Duration::from_millis(5);
    const SLOW: Duration = Duration::from_millis(20);

    fn shared_for(temp: &TempLogFile) -> SharedFile {
        let tracked =
            TrackedFile::open(temp.path().to_path_buf(), StartPosition::End, 256).unwrap();
        Arc::new(Mutex::new(tracked))
    }

    async fn wait_for_buffered(shared: &SharedFile, want: usize) -> Vec<u8> {
        let deadline = time::Instant::now() + Duration::from_secs(2);
        loop {
            {
                let mut tracked = shared.lock().unwrap();
                if tracked.buffered() >= want {
                    let mut out = vec![0u8; tracked.buffered()];
                    let n = tracked.read_buffered(&mut out);
                    out.truncate(n);
                    return out;
                }
            }
            assert!(time::Instant::now() < deadline, "timed out waiting for data");
            time::sleep(FAST).await;
        }
    }

    #[tokio::test]
    async fn test_fill_loop_picks_up_appends() {
        let temp = TempLogFile::new().unwrap();
        let shared = shared_for(&temp);
        let (errors, _rx) = ErrorSlot::channel();
        let (shutdown_tx, _) = broadcast::channel(1);

        let handle = tokio::spawn(fill_loop(
            shared.clone(),
            errors,
            FAST,
            shutdown_tx.subscribe(),
        ));

        temp.append(b"hello").unwrap();
        assert_eq!(wait_for_buffered(&shared, 5).await, b"hello");

        let _ = shutdown_tx.send(());
        let result = time::timeout(Duration::from_millis(500), handle).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_loops_follow_rename_rotation() {
        let temp = TempLogFile::new().unwrap();
        let shared = shared_for(&temp);
        let (errors, mut rx) = ErrorSlot::channel();
        let (shutdown_tx, _) = broadcast::channel(1);

        let handles = spawn(&shared, &errors, FAST, SLOW, &shutdown_tx);

        temp.append(b"before").unwrap();
        assert_eq!(wait_for_buffered(&shared, 6).await, b"before");

        temp.rename_and_recreate().unwrap();
        temp.append(b"after").unwrap();
        assert_eq!(wait_for_buffered(&shared, 5).await, b"after");

        let _ = shutdown_tx.send(());
        for handle in handles {
            assert!(time::timeout(Duration::from_millis(500), handle).await.is_ok());
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fill_loop_recovers_from_truncation() {
        let temp = TempLogFile::new().unwrap();
        let shared = shared_for(&temp);
        let (errors, mut rx) = ErrorSlot::channel();
        let (shutdown_tx, _) = broadcast::channel(1);

        tokio::spawn(fill_loop(
            shared.clone(),
            errors,
            FAST,
            shutdown_tx.subscribe(),
        ));

        temp.append(b"0123456789").unwrap();
        wait_for_buffered(&shared, 10).await;

        temp.truncate().unwrap();
        temp.append(b"abc").unwrap();
        assert_eq!(wait_for_buffered(&shared, 3).await, b"abc");
        assert!(matches!(rx.try_recv(), Err(_)));
    }

    #[tokio::test]
    async fn test_loops_stop_when_sender_dropped() {
        let temp = TempLogFile::new().unwrap();
        let shared = shared_for(&temp);
        let (errors, _rx) = ErrorSlot::channel();
        let (shutdown_tx, _) = broadcast::channel(1);

        let handles = spawn(&shared, &errors, FAST, SLOW, &shutdown_tx);
        drop(shutdown_tx);

        for handle in handles {
            assert!(time::timeout(Duration::from_millis(500), handle).await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_rotation_loop_tolerates_missing_file() {
        let temp = TempLogFile::new().unwrap();
        let shared = shared_for(&temp);
        let (errors, mut rx) = ErrorSlot::channel();
        let (shutdown_tx, _) = broadcast::channel(1);

        tokio::spawn(rotation_loop(
            shared.clone(),
            errors,
            SLOW,
            shutdown_tx.subscribe(),
        ));

        std::fs::remove_file(temp.path()).unwrap();
        time::sleep(SLOW * 3).await;

        let reported: Option<Error> = rx.try_recv().ok();
        assert!(reported.is_none(), "unexpected error: {:?}", reported);
        let _ = shutdown_tx.send(());
    }
}

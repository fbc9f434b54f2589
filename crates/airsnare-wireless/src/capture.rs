//! Capture reader
//!
//! A blocking thread owns the frame source and pushes frames into a bounded
//! channel consumed by the async dispatch loop. Cancellation reaches the
//! thread through an atomic flag bridged from a [`CancellationToken`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::source::{FrameSource, RawFrame, ReadOutcome};

/// Frames buffered between the reader and the dispatch loop
pub const CAPTURE_QUEUE: usize = 1024;

/// Create an AtomicBool flag that gets set when the CancellationToken is cancelled.
///
/// The flag can be polled by blocking code that cannot await the token.
pub fn create_cancel_flag(token: &CancellationToken) -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let flag_clone = flag.clone();
    let token_clone = token.clone();

    tokio::spawn(async move {
        token_clone.cancelled().await;
        flag_clone.store(true, Ordering::SeqCst);
    });

    flag
}

/// Why the reader stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderExit {
    Cancelled,
    Eof,
    Failed,
    /// Dispatch loop went away
    Disconnected,
}

/// Pump frames from `source` into `tx` until stopped.
///
/// The source is closed exactly once before returning, whatever the reason.
pub fn read_frames(
    mut source: Box<dyn FrameSource>,
    tx: mpsc::Sender<RawFrame>,
    stop: &AtomicBool,
) -> ReaderExit {
    let exit = loop {
        if stop.load(Ordering::SeqCst) {
            break ReaderExit::Cancelled;
        }
        match source.read_frame() {
            Ok(ReadOutcome::Frame(frame)) => {
                if tx.blocking_send(frame).is_err() {
                    break ReaderExit::Disconnected;
                }
            }
            Ok(ReadOutcome::Timeout) => continue,
            Ok(ReadOutcome::Eof) => {
                tracing::info!("End of capture source reached");
                break ReaderExit::Eof;
            }
            Err(e) => {
                tracing::error!("Error while reading frames: {}", e);
                break ReaderExit::Failed;
            }
        }
    };

    source.close();
    tracing::debug!(?exit, "Capture reader stopped");
    exit
}

/// Run [`read_frames`] on the blocking pool, stopping when `cancel` fires
pub fn spawn_reader(
    source: Box<dyn FrameSource>,
    tx: mpsc::Sender<RawFrame>,
    cancel: &CancellationToken,
) -> JoinHandle<ReaderExit> {
    let stop = create_cancel_flag(cancel);
    tokio::task::spawn_blocking(move || read_frames(source, tx, &stop))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, WirelessError};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Scripted {
        outcomes: VecDeque<Result<ReadOutcome>>,
        closes: Arc<AtomicUsize>,
    }

    impl FrameSource for Scripted {
        fn read_frame(&mut self) -> Result<ReadOutcome> {
            match self.outcomes.pop_front() {
                Some(outcome) => outcome,
                None => {
                    std::thread::sleep(Duration::from_millis(5));
                    Ok(ReadOutcome::Timeout)
                }
            }
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn scripted(outcomes: Vec<Result<ReadOutcome>>) -> (Box<dyn FrameSource>, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        let source = Scripted {
            outcomes: outcomes.into(),
            closes: closes.clone(),
        };
        (Box::new(source), closes)
    }

    #[tokio::test]
    async fn test_cancel_flag_cancelled() {
        let token = CancellationToken::new();
        let flag = create_cancel_flag(&token);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!flag.load(Ordering::SeqCst));

        token.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_reader_forwards_until_eof() {
        let (source, closes) = scripted(vec![
            Ok(ReadOutcome::Frame(RawFrame::new(vec![1]))),
            Ok(ReadOutcome::Timeout),
            Ok(ReadOutcome::Frame(RawFrame::new(vec![2]))),
            Ok(ReadOutcome::Eof),
        ]);
        let (tx, mut rx) = mpsc::channel(8);
        let token = CancellationToken::new();

        let exit = spawn_reader(source, tx, &token).await.unwrap();
        assert_eq!(exit, ReaderExit::Eof);
        assert_eq!(rx.recv().await.unwrap().data, vec![1]);
        assert_eq!(rx.recv().await.unwrap().data, vec![2]);
        assert!(rx.recv().await.is_none());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reader_stops_on_cancel() {
        let (source, closes) = scripted(Vec::new());
        let (tx, _rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        let handle = spawn_reader(source, tx, &token);

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        let exit = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("reader should stop")
            .unwrap();
        assert_eq!(exit, ReaderExit::Cancelled);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reader_stops_on_error() {
        let (source, closes) = scripted(vec![Err(WirelessError::Capture("gone".into()))]);
        let (tx, _rx) = mpsc::channel(8);
        let exit = spawn_reader(source, tx, &CancellationToken::new()).await.unwrap();
        assert_eq!(exit, ReaderExit::Failed);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}

//! Threaded scanner: the capture side offers frames through a [`FrameSink`],
//! a dedicated worker runs the session, and the host awaits [`ScanEvent`]s.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use uuid::Uuid;

use crate::error::ScanError;
use crate::models::{Frame, PixelFormat};
use crate::pipeline::{FramePermit, FramePipeline};
use crate::session::{CancelToken, ScanProgress, ScanReport, ScanSession, ScanStatus};

/// How long the idle worker waits for a frame before re-checking the
/// cancel flag and deadline.
const IDLE_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub enum ScanEvent {
    Progress(ScanProgress),
    Complete(ScanReport),
    Cancelled,
    TimedOut,
    Failed(ScanError),
}

impl ScanEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ScanEvent::Progress(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Handed to the worker.
    Accepted,
    /// A frame is already in flight; this one was dropped.
    Skipped,
    /// The session has ended.
    Closed,
}

/// Capture-side handle. Cheap to clone; never blocks.
#[derive(Clone)]
pub struct FrameSink {
    pipeline: Arc<FramePipeline>,
    frames: mpsc::Sender<(FramePermit, Frame)>,
    cancel: CancelToken,
}

impl FrameSink {
    /// Claim the pipeline slot and pass the frame to the worker. Colour
    /// frames are converted to luminance here, on the capture thread.
    pub fn offer(&self, frame: Frame) -> Offer {
        if self.cancel.is_cancelled() {
            return Offer::Closed;
        }
        let Some(permit) = self.pipeline.try_reserve() else {
            return Offer::Skipped;
        };
        let frame = if frame.format() == PixelFormat::Luma8 {
            frame
        } else {
            frame.into_luma()
        };
        match self.frames.send((permit, frame)) {
            Ok(()) => Offer::Accepted,
            // The permit comes back inside the error and is released on drop.
            Err(_) => Offer::Closed,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Host-side handle to a running scan.
pub struct ScanHandle {
    session_id: Uuid,
    events: UnboundedReceiver<ScanEvent>,
    cancel: CancelToken,
    worker: Option<thread::JoinHandle<()>>,
}

impl ScanHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Next event, or `None` after the terminal event has been delivered.
    pub async fn next_event(&mut self) -> Option<ScanEvent> {
        self.events.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ScanHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Move `session` onto a worker thread.
pub fn spawn_scanner(session: ScanSession) -> std::io::Result<(FrameSink, ScanHandle)> {
    let (frame_tx, frame_rx) = mpsc::channel::<(FramePermit, Frame)>();
    let (event_tx, event_rx) = unbounded_channel();
    let cancel = session.cancel_token();
    let session_id = session.id();

    let sink = FrameSink {
        pipeline: session.pipeline().clone(),
        frames: frame_tx,
        cancel: cancel.clone(),
    };

    let worker = thread::Builder::new()
        .name("cardscan-worker".into())
        .spawn(move || run_worker(session, frame_rx, event_tx))?;

    Ok((
        sink,
        ScanHandle {
            session_id,
            events: event_rx,
            cancel,
            worker: Some(worker),
        },
    ))
}

fn run_worker(
    mut session: ScanSession,
    frames: mpsc::Receiver<(FramePermit, Frame)>,
    events: UnboundedSender<ScanEvent>,
) {
    log::debug!("worker started for session {}", session.id());
    loop {
        let outcome = match frames.recv_timeout(IDLE_POLL) {
            Ok((permit, frame)) => session.process_reserved(permit, &frame).map(Some),
            Err(RecvTimeoutError::Timeout) => session.poll().map(|()| None),
            Err(RecvTimeoutError::Disconnected) => {
                // Every sink is gone; nobody can feed the session any more.
                session.cancel();
                Err(ScanError::Cancelled)
            }
        };

        let event = match outcome {
            Ok(None) => continue,
            Ok(Some(ScanStatus::Scanning(progress))) => ScanEvent::Progress(progress),
            Ok(Some(ScanStatus::Complete(report))) => ScanEvent::Complete(report),
            Err(ScanError::Cancelled) => ScanEvent::Cancelled,
            Err(ScanError::TimedOut { .. }) => ScanEvent::TimedOut,
            Err(e) => ScanEvent::Failed(e),
        };

        let terminal = event.is_terminal();
        if events.send(event).is_err() {
            // Host dropped its handle.
            session.cancel();
            break;
        }
        if terminal {
            break;
        }
    }
    log::debug!("worker for session {} exiting ({:?})", session.id(), session.state());
}

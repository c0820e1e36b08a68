//! Runs an attendance session on its own OS thread.
//!
//! Frame capture blocks, so the session lives on a dedicated thread and
//! the async side talks to it over channels: controls in, per-frame
//! reports out, and a final summary over a oneshot.

use presence_core::{
    AttendanceRecord, AttendanceSession, FaceEncoder, FrameReport, FrameSource, MarkOutcome,
    Matcher, SessionError,
};
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{mpsc, oneshot};

/// Triggers sent from the UI side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionControl {
    Mark,
    Stop,
}

/// Updates sent to the UI side. Frame reports may be dropped if the
/// receiver falls behind; the outcome of the session is in [`SessionSummary`].
#[derive(Debug)]
pub enum SessionEvent {
    Frame(FrameReport),
    MarkPending,
}

#[derive(Debug, Default)]
pub struct SessionSummary {
    pub frames: usize,
    pub marked: Option<AttendanceRecord>,
}

/// Handle to a running session thread.
pub struct SessionHandle {
    tx: mpsc::Sender<SessionControl>,
    pub events: mpsc::Receiver<SessionEvent>,
    pub done: oneshot::Receiver<Result<SessionSummary, SessionError>>,
}

impl SessionHandle {
    pub async fn mark(&self) {
        // A closed channel means the session already ended.
        let _ = self.tx.send(SessionControl::Mark).await;
    }

    pub async fn stop(&self) {
        let _ = self.tx.send(SessionControl::Stop).await;
    }
}

/// Spawn a started session on a dedicated thread.
///
/// The session is dropped on the thread when it ends, which releases the
/// frame source on every exit path.
pub fn spawn_session<E, S, M>(session: AttendanceSession<E, S, M>) -> std::io::Result<SessionHandle>
where
    E: FaceEncoder + Send + 'static,
    S: FrameSource + Send + 'static,
    M: Matcher + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<SessionControl>(8);
    let (event_tx, events) = mpsc::channel::<SessionEvent>(16);
    let (done_tx, done) = oneshot::channel();

    std::thread::Builder::new()
        .name("presence-session".into())
        .spawn(move || {
            tracing::info!("session thread started");
            let result = run(session, rx, event_tx);
            if let Err(e) = &result {
                tracing::error!(error = %e, "session ended with error");
            }
            let _ = done_tx.send(result);
            tracing::info!("session thread exiting");
        })?;

    Ok(SessionHandle { tx, events, done })
}

fn run<E: FaceEncoder, S: FrameSource, M: Matcher>(
    mut session: AttendanceSession<E, S, M>,
    mut rx: mpsc::Receiver<SessionControl>,
    events: mpsc::Sender<SessionEvent>,
) -> Result<SessionSummary, SessionError> {
    let mut summary = SessionSummary::default();

    while session.is_running() {
        loop {
            match rx.try_recv() {
                Ok(SessionControl::Mark) => match session.request_mark()? {
                    MarkOutcome::Marked(record) => summary.marked = Some(record),
                    MarkOutcome::Pending => emit(&events, SessionEvent::MarkPending),
                },
                Ok(SessionControl::Stop) | Err(TryRecvError::Disconnected) => session.stop(),
                Err(TryRecvError::Empty) => break,
            }
            if !session.is_running() {
                break;
            }
        }
        if !session.is_running() {
            break;
        }

        let report = session.process_frame()?;
        summary.frames += 1;
        if let Some(record) = &report.marked {
            summary.marked = Some(record.clone());
        }
        emit(&events, SessionEvent::Frame(report));
    }

    Ok(summary)
}

fn emit(events: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    match events.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => tracing::trace!("event receiver behind; dropping event"),
        Err(TrySendError::Closed(_)) => {}
    }
}

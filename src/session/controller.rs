use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use log::{info, warn};
use serde::Serialize;
use tokio::{
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
    time::{self, Duration, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    catalog::TaskAssignment,
    db::{Database, JournalEntry, JournalStatus},
    error::SessionError,
    inference::InferenceController,
    models::{ClientInfo, Detection, SessionMetadata, UploadPayload},
    permission::CameraAccess,
    playback::{MediaPlayer, PlaybackGuard, Presentation, SeekOutcome},
    upload::{destination_key, UploadPipeline},
};

use super::{Session, SessionEvent, Stage};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// How often `progress_percent` is refreshed while playing.
pub const PROGRESS_UPDATE_INTERVAL: Duration = Duration::from_millis(250);

/// What hosts render: the stage, how much has been captured, how far the
/// video has played and the completion code once there is one.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub stage: Stage,
    pub event_count: usize,
    pub progress_percent: f64,
    pub worker_id: String,
    pub task_id: String,
    pub completion_code: Option<String>,
}

impl SessionSnapshot {
    fn of(session: &Session, assignment: &TaskAssignment, player: &dyn MediaPlayer) -> Self {
        Self {
            session_id: session.id.clone(),
            stage: session.stage.clone(),
            event_count: session.signals().len(),
            progress_percent: progress_percent(player),
            worker_id: session.worker_id.clone(),
            task_id: session.task_id.clone(),
            completion_code: (session.stage == Stage::Complete)
                .then(|| assignment.completion_code.clone()),
        }
    }
}

/// Host capabilities the controller drives.
#[derive(Clone)]
pub struct SessionHost {
    pub camera: Arc<dyn CameraAccess>,
    pub player: Arc<dyn MediaPlayer>,
    pub presentation: Arc<dyn Presentation>,
    pub client: ClientInfo,
}

/// A spawned loop and the token that stops it.
struct BackgroundTask {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl BackgroundTask {
    fn spawn<F>(task: impl FnOnce(CancellationToken) -> F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(task(cancel_token.clone()));
        Self {
            handle,
            cancel_token,
        }
    }

    async fn stop(self, name: &str) {
        self.cancel_token.cancel();
        if let Err(err) = self.handle.await {
            log_warn!("{name} failed to join: {err}");
        }
    }
}

/// Owns the live session and performs the side effects around each
/// transition. Async results are checked against the session id captured
/// before the await, so outcomes for a session replaced by `retry` are
/// dropped.
#[derive(Clone)]
pub struct SessionController {
    session: Arc<Mutex<Session>>,
    assignment: Arc<TaskAssignment>,
    host: SessionHost,
    inference: Arc<Mutex<InferenceController>>,
    upload: UploadPipeline,
    guard: PlaybackGuard,
    journal: Option<Database>,
    snapshot_tx: Arc<watch::Sender<SessionSnapshot>>,
    pump: Arc<Mutex<Option<BackgroundTask>>>,
    progress: Arc<Mutex<Option<BackgroundTask>>>,
}

impl SessionController {
    pub fn new(
        assignment: TaskAssignment,
        worker_id: String,
        host: SessionHost,
        inference: InferenceController,
        upload: UploadPipeline,
        guard: PlaybackGuard,
    ) -> Self {
        let session = Session::new(&assignment, worker_id);
        let (snapshot_tx, _) = watch::channel(SessionSnapshot::of(
            &session,
            &assignment,
            host.player.as_ref(),
        ));

        Self {
            session: Arc::new(Mutex::new(session)),
            assignment: Arc::new(assignment),
            host,
            inference: Arc::new(Mutex::new(inference)),
            upload,
            guard,
            journal: None,
            snapshot_tx: Arc::new(snapshot_tx),
            pump: Arc::new(Mutex::new(None)),
            progress: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_journal(mut self, journal: Database) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub async fn stage(&self) -> Stage {
        self.session.lock().await.stage.clone()
    }

    pub fn guard(&self) -> &PlaybackGuard {
        &self.guard
    }

    fn publish(&self, session: &Session) {
        self.snapshot_tx.send_replace(SessionSnapshot::of(
            session,
            &self.assignment,
            self.host.player.as_ref(),
        ));
    }

    /// Asks for camera access and, once granted, starts inference and
    /// playback. Calling it again while the first request is pending does
    /// nothing.
    pub async fn request_permission(&self) -> Result<Stage> {
        let session_id = {
            let mut session = self.session.lock().await;
            if session.stage == Stage::AwaitingPermission {
                log_info!("Permission request already pending for {}", session.id);
                return Ok(session.stage.clone());
            }
            session.apply(SessionEvent::RequestPermission)?;
            self.publish(&session);
            session.id.clone()
        };

        if !self.host.camera.is_supported() {
            return self.fail(&session_id, SessionError::DeviceUnsupported).await;
        }

        let outcome = self.host.camera.request_access().await;

        let mut session = self.session.lock().await;
        if session.id != session_id || session.stage != Stage::AwaitingPermission {
            log_info!("Ignoring permission result for stale session {session_id}");
            return Ok(session.stage.clone());
        }

        match outcome {
            Ok(()) => {
                drop(session);
                self.begin_playback(&session_id).await
            }
            Err(category) => {
                warn!("Camera access denied for {session_id}: {category:?}");
                session.apply(SessionEvent::PermissionDenied(category))?;
                self.publish(&session);
                Ok(session.stage.clone())
            }
        }
    }

    async fn begin_playback(&self, session_id: &str) -> Result<Stage> {
        let configured = self.inference.lock().await.ensure_configured().await;
        let events = match configured {
            Ok(events) => events,
            Err(err) => {
                return self
                    .fail(session_id, SessionError::InferenceInitFailed(format!("{err:#}")))
                    .await;
            }
        };
        if let Some(events) = events {
            self.spawn_pump(events).await;
        }

        let started = self.inference.lock().await.start_stream().await;
        if let Err(err) = started {
            return self
                .fail(session_id, SessionError::InferenceInitFailed(format!("{err:#}")))
                .await;
        }

        let entry = {
            let mut session = self.session.lock().await;
            if session.id != session_id {
                drop(session);
                return self.abandon_start(session_id).await;
            }
            session.apply(SessionEvent::PermissionGranted)?;
            self.publish(&session);
            journal_entry_for(&session)
        };
        info!(
            "Session {session_id} playing {} for worker {}",
            entry.task_id, entry.worker_id
        );
        if let Some(journal) = &self.journal {
            if let Err(err) = journal.insert_journal_entry(&entry).await {
                warn!("Failed to journal session {session_id}: {err:#}");
            }
        }
        if !self.is_playing(session_id).await {
            return self.abandon_start(session_id).await;
        }

        self.guard.arm(Arc::clone(&self.host.player)).await;

        if let Err(err) = self.host.presentation.enter_exclusive().await {
            let err = SessionError::PresentationUnavailable(err.to_string());
            log_warn!("{err}");
        }
        if !self.is_playing(session_id).await {
            return self.abandon_start(session_id).await;
        }

        if let Err(err) = self.host.player.play().await {
            return self
                .fail(session_id, SessionError::PlaybackFailed(format!("{err:#}")))
                .await;
        }
        if !self.is_playing(session_id).await {
            return self.abandon_start(session_id).await;
        }

        self.spawn_progress().await;
        Ok(Stage::Playing)
    }

    async fn is_playing(&self, session_id: &str) -> bool {
        let session = self.session.lock().await;
        session.id == session_id && session.stage == Stage::Playing
    }

    /// Undoes a start whose session was replaced or failed part way through.
    /// Capture and playback are left alone when a newer session is already
    /// playing with them.
    async fn abandon_start(&self, session_id: &str) -> Result<Stage> {
        let stage = self.stage().await;
        log_info!("Session {session_id} left Playing while starting, releasing capture");
        if stage != Stage::Playing {
            self.release_playback().await;
            self.host.player.pause();
        }
        Ok(stage)
    }

    /// Called by the host when the media reaches its end. Freezes the
    /// buffer, tears down capture and uploads the result.
    pub async fn on_playback_ended(&self) -> Result<Stage> {
        let (session_id, tracking_data, worker_id, task_id, video_url, started_at) = {
            let mut session = self.session.lock().await;
            session.apply(SessionEvent::PlaybackEnded)?;
            self.publish(&session);
            (
                session.id.clone(),
                session.signals().snapshot(),
                session.worker_id.clone(),
                session.task_id.clone(),
                session.video_url.clone(),
                session.started_at,
            )
        };

        self.guard.disarm().await;
        self.stop_progress().await;
        let stopped = self.inference.lock().await.stop_stream().await;
        self.exit_presentation_quietly().await;
        if let Err(err) = stopped {
            return self
                .fail(&session_id, SessionError::FinalizeFailed(format!("{err:#}")))
                .await;
        }

        let finalized_at = Utc::now();
        let session_timestamp = finalized_at.timestamp_millis();
        let key = destination_key(&task_id, &worker_id, session_timestamp);
        let event_count = tracking_data.len();
        let client = &self.host.client;
        let payload = UploadPayload {
            tracking_data,
            metadata: SessionMetadata {
                session_id: session_id.clone(),
                session_timestamp,
                worker_id,
                task_id,
                video_url,
                total_frames: event_count,
                duration: self.host.player.duration(),
                timestamp: finalized_at,
                started_at,
                user_agent: client.user_agent.clone(),
                screen_resolution: client.screen_resolution.clone(),
                viewport: client.viewport.clone(),
            },
        };

        {
            let mut session = self.session.lock().await;
            if session.id != session_id {
                return Ok(session.stage.clone());
            }
            session.apply(SessionEvent::PayloadReady)?;
            self.publish(&session);
        }
        info!("Session {session_id} finalized with {event_count} events, uploading {key}");
        self.journal_update(
            &session_id,
            JournalStatus::Uploading,
            Some(event_count as u64),
            Some(key.clone()),
            None,
        )
        .await;

        let outcome = self.upload.upload(&key, &payload).await;

        let (stage, journal_status, error_message) = {
            let mut session = self.session.lock().await;
            if session.id != session_id {
                log_info!("Discarding upload outcome for replaced session {session_id}");
                return Ok(session.stage.clone());
            }
            let (event, journal_status, error_message) = match outcome {
                Ok(receipt) => {
                    info!(
                        "Session {session_id} complete after {} upload attempt(s)",
                        receipt.attempts
                    );
                    (SessionEvent::UploadSucceeded, JournalStatus::Completed, None)
                }
                Err(SessionError::UploadExhausted {
                    attempts,
                    last_error,
                }) => {
                    log_error!(
                        "Upload for {session_id} exhausted after {attempts} attempts: {last_error}"
                    );
                    let message = format!("upload failed after {attempts} attempts: {last_error}");
                    (
                        SessionEvent::UploadExhausted {
                            attempts,
                            last_error,
                        },
                        JournalStatus::Failed,
                        Some(message),
                    )
                }
                Err(other) => {
                    log_error!("Finalizing {session_id} failed: {other}");
                    let message = other.to_string();
                    (SessionEvent::Fail(other), JournalStatus::Failed, Some(message))
                }
            };
            session.apply(event)?;
            self.publish(&session);
            (session.stage.clone(), journal_status, error_message)
        };

        self.journal_update(&session_id, journal_status, None, None, error_message)
            .await;
        Ok(stage)
    }

    /// Discards the current attempt and starts over with a fresh session.
    /// Valid from any stage.
    pub async fn retry(&self) -> Result<Stage> {
        let (previous_id, was_open) = {
            let mut session = self.session.lock().await;
            let previous_id = session.id.clone();
            let was_open = matches!(
                session.stage,
                Stage::Playing | Stage::Finalizing | Stage::Uploading
            );
            session.apply(SessionEvent::Retry)?;
            self.publish(&session);
            info!("Session {previous_id} reset, new session {}", session.id);
            (previous_id, was_open)
        };

        self.release_playback().await;
        if was_open {
            self.journal_update(&previous_id, JournalStatus::Abandoned, None, None, None)
                .await;
        }
        self.host.player.pause();
        self.host.player.set_current_time(0.0);
        self.snapshot_tx
            .send_modify(|snapshot| snapshot.progress_percent = 0.0);

        Ok(Stage::Idle)
    }

    /// Host `seeking` event.
    pub fn handle_seeking(&self) -> SeekOutcome {
        self.guard.on_seeking(self.host.player.as_ref())
    }

    /// Host key press. True means the key must not reach the player.
    pub fn handle_key(&self, code: &str) -> bool {
        self.guard.on_key(code)
    }

    /// True when leaving the page should be confirmed first.
    pub fn handle_close_request(&self) -> bool {
        self.guard.on_close_requested()
    }

    pub async fn handle_presentation_change(&self) {
        // Failures are already logged by the guard and never end the session.
        let _ = self
            .guard
            .on_presentation_changed(self.host.player.as_ref(), self.host.presentation.as_ref())
            .await;
    }

    /// Host media error. Only ends the session while it is playing.
    pub async fn handle_media_error(&self, message: &str) -> Result<Stage> {
        let session_id = {
            let session = self.session.lock().await;
            if session.stage != Stage::Playing {
                log_info!("Ignoring media error outside playback: {message}");
                return Ok(session.stage.clone());
            }
            session.id.clone()
        };
        self.fail(&session_id, SessionError::PlaybackFailed(message.to_string()))
            .await
    }

    /// Stops background work. The controller is unusable afterwards.
    pub async fn shutdown(&self) {
        self.release_playback().await;
        if let Some(pump) = self.pump.lock().await.take() {
            pump.stop("signal pump").await;
        }
    }

    async fn fail(&self, session_id: &str, failure: SessionError) -> Result<Stage> {
        let stage = {
            let mut session = self.session.lock().await;
            if session.id != session_id {
                return Ok(session.stage.clone());
            }
            session.apply(SessionEvent::Fail(failure.clone()))?;
            self.publish(&session);
            session.stage.clone()
        };
        log_error!("Session {session_id} failed: {failure}");

        self.release_playback().await;
        self.journal_update(
            session_id,
            JournalStatus::Failed,
            None,
            None,
            Some(failure.to_string()),
        )
        .await;
        Ok(stage)
    }

    async fn release_playback(&self) {
        self.guard.disarm().await;
        self.stop_progress().await;
        self.stop_inference_quietly().await;
        self.exit_presentation_quietly().await;
    }

    async fn stop_inference_quietly(&self) {
        if let Err(err) = self.inference.lock().await.stop_stream().await {
            warn!("Failed to stop inference stream: {err:#}");
        }
    }

    async fn exit_presentation_quietly(&self) {
        if !self.host.presentation.is_exclusive() {
            return;
        }
        if let Err(err) = self.host.presentation.exit_exclusive().await {
            warn!("Failed to leave exclusive presentation: {err:#}");
        }
    }

    async fn journal_update(
        &self,
        session_id: &str,
        status: JournalStatus,
        event_count: Option<u64>,
        object_key: Option<String>,
        error_message: Option<String>,
    ) {
        let Some(journal) = &self.journal else {
            return;
        };
        match journal
            .update_journal_status(session_id, status, event_count, object_key, error_message)
            .await
        {
            Ok(true) => {}
            Ok(false) => log_info!("Session {session_id} has no journal entry"),
            Err(err) => warn!("Failed to journal {} for {session_id}: {err:#}", status.as_str()),
        }
    }

    /// The engine is configured once per controller, so the pump outlives
    /// individual sessions and stamps each detection into whichever session
    /// is current.
    async fn spawn_pump(&self, events: mpsc::UnboundedReceiver<Detection>) {
        let mut pump = self.pump.lock().await;
        if let Some(previous) = pump.take() {
            previous.cancel_token.cancel();
            previous.handle.abort();
        }

        let session = Arc::clone(&self.session);
        let player = Arc::clone(&self.host.player);
        let snapshot_tx = Arc::clone(&self.snapshot_tx);
        *pump = Some(BackgroundTask::spawn(move |cancel_token| {
            pump_signals(events, session, player, snapshot_tx, cancel_token)
        }));
    }

    async fn spawn_progress(&self) {
        let mut progress = self.progress.lock().await;
        if let Some(previous) = progress.take() {
            previous.cancel_token.cancel();
        }

        let player = Arc::clone(&self.host.player);
        let snapshot_tx = Arc::clone(&self.snapshot_tx);
        *progress = Some(BackgroundTask::spawn(move |cancel_token| {
            report_progress(player, snapshot_tx, cancel_token)
        }));
    }

    async fn stop_progress(&self) {
        let ticker = self.progress.lock().await.take();
        if let Some(ticker) = ticker {
            ticker.stop("progress ticker").await;
        }
        let progress = progress_percent(self.host.player.as_ref());
        self.snapshot_tx
            .send_modify(|snapshot| snapshot.progress_percent = progress);
    }
}

/// Share of the media played so far, 0 to 100. Zero until the duration is
/// known.
fn progress_percent(player: &dyn MediaPlayer) -> f64 {
    match player.duration() {
        Some(duration) if duration > 0.0 => {
            (player.current_time() / duration * 100.0).clamp(0.0, 100.0)
        }
        _ => 0.0,
    }
}

fn journal_entry_for(session: &Session) -> JournalEntry {
    let now = Utc::now();
    JournalEntry {
        id: session.id.clone(),
        worker_id: session.worker_id.clone(),
        task_id: session.task_id.clone(),
        video_url: session.video_url.clone(),
        status: JournalStatus::Playing,
        event_count: 0,
        object_key: None,
        error_message: None,
        started_at: session.started_at,
        finished_at: None,
        created_at: now,
        updated_at: now,
    }
}

async fn pump_signals(
    mut events: mpsc::UnboundedReceiver<Detection>,
    session: Arc<Mutex<Session>>,
    player: Arc<dyn MediaPlayer>,
    snapshot_tx: Arc<watch::Sender<SessionSnapshot>>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            received = events.recv() => {
                let Some(detection) = received else {
                    log_info!("Inference event stream closed");
                    break;
                };
                let media_time = player.current_time();
                let mut current = session.lock().await;
                if current.record(detection, media_time) {
                    let count = current.signals().len();
                    snapshot_tx.send_modify(|snapshot| snapshot.event_count = count);
                }
            }
            _ = cancel_token.cancelled() => break,
        }
    }
}

async fn report_progress(
    player: Arc<dyn MediaPlayer>,
    snapshot_tx: Arc<watch::Sender<SessionSnapshot>>,
    cancel_token: CancellationToken,
) {
    let mut ticker = time::interval(PROGRESS_UPDATE_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let progress = progress_percent(player.as_ref());
                snapshot_tx.send_modify(|snapshot| snapshot.progress_percent = progress);
                if player.is_ended() {
                    break;
                }
            }
            _ = cancel_token.cancelled() => break,
        }
    }
}

use crate::config::EngineConfig;
use crate::log::{LogEntry, MessageLog};
use crate::reconnect::{ReconnectPolicy, ReconnectSchedule};
use crate::status::StatusReducer;
use crate::transport::{Transport, TransportError, TransportEvent};
use crate::{EngineError, SyncFault};
use chrono::Utc;
use parley_core::wire::{
    decode_frame, encode_frame, Envelope, Frame, MessageConfirmedPayload, ProtocolVersion,
    SendMessagePayload, CURRENT_PROTOCOL_VERSION,
};
use parley_core::AgentStatus;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SWEEP_INTERVAL_MS: u64 = 500;

/// Point-in-time view of the conversation published after every visible
/// change. `fault` rides exactly one snapshot and describes the most recent
/// non-fatal problem.
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    pub connected: bool,
    pub conversation_id: String,
    pub messages: Arc<Vec<LogEntry>>,
    pub status: AgentStatus,
    pub fault: Option<SyncFault>,
}

#[derive(Debug)]
enum EngineCommand {
    Send { text: String },
    RequestStatus,
    ResetConversation { conversation_id: Option<String> },
    ClearHistory,
    Shutdown,
}

enum Step {
    Transport(Option<TransportEvent>),
    Command(Option<EngineCommand>),
    Retry,
    Sweep,
}

/// Spawns the engine task and returns the handle used to drive it. The
/// engine connects immediately and keeps reconnecting with exponential
/// backoff until shut down or the retry ceiling is reached.
pub fn start<T>(transport: T, config: EngineConfig) -> EngineHandle
where
    T: Transport + 'static,
{
    let (commands_tx, commands_rx) = mpsc::channel(config.command_capacity.max(1));
    let (updates_tx, _) = broadcast::channel(config.update_capacity.max(1));
    let engine = Engine::new(transport, config, updates_tx.clone());
    let task = tokio::spawn(engine.run(commands_rx));
    EngineHandle {
        commands: commands_tx,
        updates: updates_tx,
        task,
    }
}

pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    updates: broadcast::Sender<EngineSnapshot>,
    task: JoinHandle<()>,
}

impl EngineHandle {
    /// Queues a message for optimistic append and transmission. The text is
    /// trimmed; whitespace-only input is rejected up front.
    pub async fn send(&self, text: &str) -> Result<(), EngineError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(EngineError::EmptyMessage);
        }
        self.commands
            .send(EngineCommand::Send {
                text: trimmed.to_string(),
            })
            .await
            .map_err(|_| EngineError::Terminated)
    }

    pub async fn request_status(&self) -> Result<(), EngineError> {
        self.commands
            .send(EngineCommand::RequestStatus)
            .await
            .map_err(|_| EngineError::Terminated)
    }

    /// Switches to a fresh conversation, clearing the local transcript. Pass
    /// None to draw a new conversation id.
    pub async fn reset_conversation(
        &self,
        conversation_id: Option<String>,
    ) -> Result<(), EngineError> {
        self.commands
            .send(EngineCommand::ResetConversation { conversation_id })
            .await
            .map_err(|_| EngineError::Terminated)
    }

    pub async fn clear_history(&self) -> Result<(), EngineError> {
        self.commands
            .send(EngineCommand::ClearHistory)
            .await
            .map_err(|_| EngineError::Terminated)
    }

    /// Subscribes to snapshot updates. A receiver that falls behind sees a
    /// `Lagged` error and can resume with the next snapshot.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineSnapshot> {
        self.updates.subscribe()
    }

    pub async fn shutdown(self) {
        let _ = self.commands.send(EngineCommand::Shutdown).await;
        let _ = self.task.await;
    }
}

struct Engine<T> {
    config: EngineConfig,
    transport: T,
    schedule: ReconnectSchedule,
    log: MessageLog,
    status: StatusReducer,
    conversation_id: String,
    pending_sends: HashMap<u64, Instant>,
    pending_clear: Option<Instant>,
    fault: Option<SyncFault>,
    updates: broadcast::Sender<EngineSnapshot>,
    retry_at: Option<Instant>,
}

impl<T: Transport> Engine<T> {
    fn new(transport: T, config: EngineConfig, updates: broadcast::Sender<EngineSnapshot>) -> Self {
        let schedule = ReconnectSchedule::new(ReconnectPolicy {
            base: config.backoff_base,
            cap: config.backoff_cap,
            max_retries: config.max_retries,
        });
        let conversation_id = config.conversation_id.clone();
        Self {
            config,
            transport,
            schedule,
            log: MessageLog::default(),
            status: StatusReducer::default(),
            conversation_id,
            pending_sends: HashMap::new(),
            pending_clear: None,
            fault: None,
            updates,
            retry_at: None,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<EngineCommand>) {
        self.try_open().await;
        let mut sweep = tokio::time::interval(Duration::from_millis(SWEEP_INTERVAL_MS));
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let connected = self.schedule.is_connected();
            let retry_deadline = self.retry_at.unwrap_or_else(Instant::now);

            let step = tokio::select! {
                event = self.transport.next_event(), if connected => Step::Transport(event),
                command = commands.recv() => Step::Command(command),
                _ = tokio::time::sleep_until(retry_deadline), if self.retry_at.is_some() => {
                    Step::Retry
                }
                _ = sweep.tick() => Step::Sweep,
            };

            match step {
                Step::Transport(Some(event)) => self.apply_transport_event(event).await,
                Step::Transport(None) => self.handle_closed("transport finished").await,
                Step::Command(Some(EngineCommand::Shutdown)) => break,
                Step::Command(Some(command)) => self.apply_command(command).await,
                Step::Command(None) => break,
                Step::Retry => {
                    self.retry_at = None;
                    self.try_open().await;
                }
                Step::Sweep => self.sweep_deadlines(),
            }
        }

        self.transport.close().await;
        self.schedule.shutdown();
        info!(event = "engine_stopped", conversation_id = %self.conversation_id);
    }

    async fn apply_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Send { text } => self.handle_send(text).await,
            EngineCommand::RequestStatus => self.handle_request_status().await,
            EngineCommand::ResetConversation { conversation_id } => {
                self.handle_reset(conversation_id).await
            }
            EngineCommand::ClearHistory => self.handle_clear().await,
            EngineCommand::Shutdown => {}
        }
    }

    async fn try_open(&mut self) {
        self.schedule.opening();
        match self.transport.open().await {
            Ok(()) => {
                self.schedule.opened();
                info!(event = "engine_connected", conversation_id = %self.conversation_id);
                let _ = self.transmit(Frame::RequestHistory).await;
                let _ = self.transmit(Frame::RequestStatus).await;
                self.publish();
            }
            Err(err) => {
                warn!("connect_error: {err}");
                self.schedule_retry();
            }
        }
    }

    fn schedule_retry(&mut self) {
        match self.schedule.retry_after_failure() {
            Some(wait) => {
                self.retry_at = Some(Instant::now() + wait);
                debug!(event = "reconnect_scheduled", wait_ms = wait.as_millis() as u64);
            }
            None => {
                let attempts = self.schedule.attempts();
                warn!("reconnect_gave_up: attempts={attempts}");
                self.fault = Some(SyncFault::RetriesExhausted { attempts });
                self.retry_at = None;
                self.publish();
            }
        }
    }

    async fn handle_closed(&mut self, reason: &str) {
        warn!("connection_closed: {reason}");
        let pending: Vec<u64> = self.pending_sends.drain().map(|(id, _)| id).collect();
        let mut dropped = false;
        for local_id in pending {
            if self.log.mark_failed(local_id) {
                dropped = true;
            }
        }
        self.pending_clear = None;
        if dropped {
            self.fault = Some(SyncFault::NotConnected);
        }
        self.schedule_retry();
        self.publish();
    }

    async fn handle_send(&mut self, text: String) {
        let local_id = self.log.append_optimistic(&text, Utc::now());
        if !self.schedule.is_connected() {
            self.log.mark_failed(local_id);
            self.fault = Some(SyncFault::NotConnected);
            debug!(event = "send_while_disconnected", local_id = local_id);
            self.publish();
            return;
        }
        self.publish();
        let frame = Frame::SendMessage(SendMessagePayload { local_id, text });
        match self.transmit(frame).await {
            Ok(()) => {
                self.pending_sends
                    .insert(local_id, Instant::now() + self.config.confirm_timeout);
            }
            Err(err) => {
                warn!("send_error: {err}");
                self.log.mark_failed(local_id);
                self.fault = Some(SyncFault::SendFailed {
                    local_id: Some(local_id),
                });
                self.publish();
            }
        }
    }

    async fn handle_request_status(&mut self) {
        if !self.schedule.is_connected() {
            debug!(event = "status_request_while_disconnected");
            return;
        }
        let _ = self.transmit(Frame::RequestStatus).await;
    }

    async fn handle_reset(&mut self, conversation_id: Option<String>) {
        self.conversation_id = conversation_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        self.log.clear();
        self.pending_sends.clear();
        self.pending_clear = None;
        self.fault = None;
        info!(event = "conversation_reset", conversation_id = %self.conversation_id);
        if self.schedule.is_connected() {
            let _ = self.transmit(Frame::RequestHistory).await;
        }
        self.publish();
    }

    async fn handle_clear(&mut self) {
        if !self.schedule.is_connected() {
            self.fault = Some(SyncFault::NotConnected);
            self.publish();
            return;
        }
        if self.pending_clear.is_some() {
            debug!(event = "clear_already_pending");
            return;
        }
        match self.transmit(Frame::ClearHistory).await {
            Ok(()) => {
                self.pending_clear = Some(Instant::now() + self.config.confirm_timeout);
            }
            Err(err) => {
                warn!("clear_request_error: {err}");
                self.fault = Some(SyncFault::SendFailed { local_id: None });
                self.publish();
            }
        }
    }

    async fn apply_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Frame(text) => {
                match decode_frame::<Envelope>(&text, self.config.max_frame_bytes) {
                    Ok(envelope) => self.apply_frame(envelope),
                    Err(err) => warn!("frame_decode_error: {err}"),
                }
            }
            TransportEvent::Closed { reason } => self.handle_closed(&reason).await,
        }
    }

    fn apply_frame(&mut self, envelope: Envelope) {
        if envelope.conversation_id != self.conversation_id {
            debug!(
                event = "frame_for_other_conversation",
                conversation_id = %envelope.conversation_id
            );
            return;
        }
        if envelope.version.0 > CURRENT_PROTOCOL_VERSION {
            warn!("frame_version_unsupported: version={}", envelope.version.0);
            return;
        }
        match envelope.frame {
            Frame::ConnectionAck => {
                debug!(event = "connection_ack");
            }
            Frame::MessageConfirmed(payload) => self.apply_confirmation(payload),
            Frame::MessageReceived(payload) => {
                if self.log.append_remote(&payload.message) {
                    self.publish();
                } else {
                    debug!(event = "duplicate_message_dropped", server_id = payload.message.id);
                }
            }
            Frame::HistorySnapshot(payload) => {
                self.log.replace_all(&payload.messages);
                self.publish();
            }
            Frame::StatusSnapshot(payload) => {
                self.status.apply_snapshot(payload.status);
                self.publish();
            }
            Frame::StatusPatch(patch) => {
                self.status.apply_patch(patch, Utc::now());
                self.publish();
            }
            Frame::HistoryCleared(payload) => self.apply_history_cleared(payload.success),
            Frame::ServerError(payload) => {
                warn!("server_error: {}", payload.message);
                self.fault = Some(SyncFault::ServerError {
                    message: payload.message,
                });
                self.publish();
            }
            Frame::SendMessage(_)
            | Frame::RequestHistory
            | Frame::RequestStatus
            | Frame::ClearHistory => {
                debug!(event = "client_frame_ignored");
            }
            Frame::Unknown => {
                warn!("unknown_frame_dropped");
            }
        }
    }

    fn apply_confirmation(&mut self, payload: MessageConfirmedPayload) {
        self.pending_sends.remove(&payload.local_id);
        if self.log.reconcile(payload.local_id, &payload.message) {
            self.publish();
        } else {
            debug!(event = "confirmation_without_entry", local_id = payload.local_id);
        }
    }

    fn apply_history_cleared(&mut self, success: bool) {
        if self.pending_clear.take().is_none() {
            debug!(event = "unsolicited_history_cleared");
        }
        if success {
            self.log.clear();
            info!(event = "history_cleared", conversation_id = %self.conversation_id);
        } else {
            warn!("history_clear_rejected");
            self.fault = Some(SyncFault::ServerError {
                message: "history clear rejected".to_string(),
            });
        }
        self.publish();
    }

    fn sweep_deadlines(&mut self) {
        let now = Instant::now();
        let expired: Vec<u64> = self
            .pending_sends
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(local_id, _)| *local_id)
            .collect();
        let mut changed = false;
        for local_id in expired {
            self.pending_sends.remove(&local_id);
            warn!("confirm_timeout: local_id={local_id}");
            self.log.mark_failed(local_id);
            self.fault = Some(SyncFault::ConfirmationTimeout {
                local_id: Some(local_id),
            });
            changed = true;
        }
        if let Some(deadline) = self.pending_clear {
            if deadline <= now {
                self.pending_clear = None;
                warn!("clear_confirm_timeout");
                self.fault = Some(SyncFault::ConfirmationTimeout { local_id: None });
                changed = true;
            }
        }
        if changed {
            self.publish();
        }
    }

    async fn transmit(&mut self, frame: Frame) -> Result<(), TransportError> {
        let envelope = Envelope {
            version: ProtocolVersion::CURRENT,
            conversation_id: self.conversation_id.clone(),
            sent_at: Utc::now(),
            frame,
        };
        let encoded = match encode_frame(&envelope, self.config.max_frame_bytes) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!("frame_encode_error: {err}");
                return Err(TransportError::Send(err.to_string()));
            }
        };
        self.transport.send_frame(&encoded).await
    }

    fn publish(&mut self) {
        let snapshot = EngineSnapshot {
            connected: self.schedule.is_connected(),
            conversation_id: self.conversation_id.clone(),
            messages: Arc::new(self.log.entries().to_vec()),
            status: self.status.status().clone(),
            fault: self.fault.take(),
        };
        let _ = self.updates.send(snapshot);
    }
}

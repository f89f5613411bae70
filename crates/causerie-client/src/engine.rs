//! The engine: one sequential event loop per client session.
//!
//! Channel notifications, resolved async work, periodic ticks and user
//! intents all drain through a single queue, so every store transition is
//! applied in dequeue order and no two interleave. Suspension points
//! (transmits, fetches) run in spawned tasks that re-enter the loop through
//! the same queue; no lock is held across any of them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use causerie_net::{call, ChannelCommand, ChannelError, ChannelNotification};
use causerie_shared::constants::{
    ONLINE_POLL_INTERVAL_SECS, TYPING_STOP_SECS, UPDATE_HISTORY_INTERVAL_SECS,
};
use causerie_shared::protocol::{
    HistoryRequest, MessageKind, OnlineMembersRequest, OnlineMembersResponse, ReceiptRequest,
    ServerEvent, TypingIndicatorRequest, UpdateHistoryRequest, WireMessage,
    CALL_GET_LINKMAN_HISTORY_MESSAGES, CALL_SEND_DELIVERY_RECEIPT, CALL_SEND_READ_RECEIPT,
    CALL_SEND_TYPING_INDICATOR, CALL_UPDATE_HISTORY, CALL_GET_GROUP_ONLINE_MEMBERS,
};
use causerie_shared::types::{LinkmanId, MessageId};
use causerie_store::{LinkmanVariant, Message, RosterSnapshot, SessionState};

use crate::bootstrap;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::notify::{run_alert_effect, EffectGate, Notifier, SideEffect};
use crate::outbound::{self, Uploader};
use crate::presence::{OnlineMemberCache, ReceiptIndex, TypingDebouncer, TypingSignal};
use crate::reconciler::{self, Reconciler};
use crate::router;

/// A user-originated action fed into the engine.
#[derive(Debug, Clone)]
pub enum Intent {
    SendText { to: LinkmanId, content: String },
    /// Two-phase media send: `local_ref` is the local/blob preview reference;
    /// the upload happens asynchronously before the transmit.
    SendMedia {
        to: LinkmanId,
        kind: MessageKind,
        local_ref: String,
    },
    Focus(LinkmanId),
    /// A qualifying keystroke in the composer for `LinkmanId`.
    InputActivity(LinkmanId),
    SetWindowForeground(bool),
    Logout,
}

/// Everything the engine loop dequeues.
enum EngineEvent {
    Channel(ChannelNotification),
    Intent(Intent),
    BootstrapResolved(Result<RosterSnapshot, EngineError>),
    SendResolved {
        linkman: LinkmanId,
        placeholder: MessageId,
        media: bool,
        result: Result<WireMessage, ChannelError>,
    },
    UploadResolved {
        linkman: LinkmanId,
        placeholder: MessageId,
        kind: MessageKind,
        result: anyhow::Result<String>,
    },
    BackfillResolved {
        linkman: LinkmanId,
        result: Result<Vec<WireMessage>, ChannelError>,
    },
    OnlineMembersResolved {
        group: LinkmanId,
        result: Result<OnlineMembersResponse, ChannelError>,
    },
}

/// Cloneable handle for feeding intents into a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    events_tx: mpsc::Sender<EngineEvent>,
}

impl EngineHandle {
    async fn intent(&self, intent: Intent) {
        if self.events_tx.send(EngineEvent::Intent(intent)).await.is_err() {
            warn!("Engine is gone, dropping intent");
        }
    }

    pub async fn send_text(&self, to: LinkmanId, content: String) {
        self.intent(Intent::SendText { to, content }).await;
    }

    pub async fn send_media(&self, to: LinkmanId, kind: MessageKind, local_ref: String) {
        self.intent(Intent::SendMedia {
            to,
            kind,
            local_ref,
        })
        .await;
    }

    pub async fn focus(&self, linkman: LinkmanId) {
        self.intent(Intent::Focus(linkman)).await;
    }

    pub async fn input_activity(&self, linkman: LinkmanId) {
        self.intent(Intent::InputActivity(linkman)).await;
    }

    pub async fn set_window_foreground(&self, foreground: bool) {
        self.intent(Intent::SetWindowForeground(foreground)).await;
    }

    pub async fn logout(&self) {
        self.intent(Intent::Logout).await;
    }
}

pub struct Engine {
    state: SessionState,
    receipts: ReceiptIndex,
    online_cache: OnlineMemberCache,
    typing: TypingDebouncer,
    reconciler: Reconciler,
    window_foreground: bool,
    config: EngineConfig,
    cmd_tx: mpsc::Sender<ChannelCommand>,
    events_tx: mpsc::Sender<EngineEvent>,
    events_rx: Option<mpsc::Receiver<EngineEvent>>,
    notifier: Arc<dyn Notifier>,
    uploader: Arc<dyn Uploader>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        cmd_tx: mpsc::Sender<ChannelCommand>,
        notifier: Arc<dyn Notifier>,
        uploader: Arc<dyn Uploader>,
    ) -> (Self, EngineHandle) {
        let (events_tx, events_rx) = mpsc::channel(256);
        let handle = EngineHandle {
            events_tx: events_tx.clone(),
        };
        let engine = Self {
            state: SessionState::new(),
            receipts: ReceiptIndex::new(),
            online_cache: OnlineMemberCache::new(),
            typing: TypingDebouncer::new(Duration::from_secs(TYPING_STOP_SECS)),
            reconciler: Reconciler::new(),
            window_foreground: true,
            config,
            cmd_tx,
            events_tx,
            events_rx: Some(events_rx),
            notifier,
            uploader,
        };
        (engine, handle)
    }

    /// Read access for embedders and tests.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Drive the engine until the channel closes.
    pub async fn run(mut self, mut notif_rx: mpsc::Receiver<ChannelNotification>) {
        let mut events_rx = self.events_rx.take().expect("run may only be called once");

        let period = |secs| {
            tokio::time::interval_at(
                tokio::time::Instant::now() + Duration::from_secs(secs),
                Duration::from_secs(secs),
            )
        };
        let mut update_tick = period(UPDATE_HISTORY_INTERVAL_SECS);
        let mut online_tick = period(ONLINE_POLL_INTERVAL_SECS);
        let mut typing_tick = period(1);

        info!("Engine loop started");
        loop {
            tokio::select! {
                notification = notif_rx.recv() => match notification {
                    Some(notification) => self.handle_event(EngineEvent::Channel(notification)),
                    None => {
                        info!("Channel task gone, engine stopping");
                        break;
                    }
                },
                event = events_rx.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                _ = update_tick.tick() => {
                    let captured = self.state.focus.clone();
                    self.on_update_history_tick(captured);
                }
                _ = online_tick.tick() => self.on_online_poll_tick(),
                _ = typing_tick.tick() => self.on_typing_expiry_tick(),
            }
        }
        info!("Engine loop terminated");
    }

    // -----------------------------------------------------------------------
    // Event handling (sequential; the only place state transitions happen)
    // -----------------------------------------------------------------------

    fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Channel(ChannelNotification::Connected) => {
                self.state.set_connected(true);
                // Full resync on every connect.
                self.spawn_bootstrap();
            }

            EngineEvent::Channel(ChannelNotification::Disconnected) => {
                self.state.set_connected(false);
            }

            EngineEvent::Channel(ChannelNotification::Event { name, payload }) => {
                match ServerEvent::parse(&name, payload) {
                    Ok(event) => {
                        let effects = router::route(&mut self.state, &mut self.receipts, event);
                        self.run_effects(effects);
                    }
                    Err(e) => warn!(error = %e, "Dropping unroutable hub event"),
                }
            }

            EngineEvent::BootstrapResolved(Ok(snapshot)) => {
                let guest_fallback = snapshot.guest_fallback;
                self.state.apply_snapshot(snapshot);
                self.reconciler.reset();
                if guest_fallback {
                    self.run_effects(vec![SideEffect::Toast {
                        text: "Session resume failed, continuing as guest".to_string(),
                    }]);
                }
            }

            EngineEvent::BootstrapResolved(Err(e)) => {
                warn!(error = %e, "Bootstrap failed, waiting for reconnect");
            }

            EngineEvent::Intent(intent) => self.handle_intent(intent),

            EngineEvent::SendResolved {
                linkman,
                placeholder,
                media,
                result,
            } => {
                let effect =
                    outbound::resolve_send(&mut self.state, &linkman, &placeholder, result, media);
                if let Some(effect) = effect {
                    self.run_effects(vec![effect]);
                }
            }

            EngineEvent::UploadResolved {
                linkman,
                placeholder,
                kind,
                result,
            } => match result {
                Ok(url) => {
                    let still_held = self
                        .state
                        .linkman(&linkman)
                        .is_some_and(|l| l.messages.contains(&placeholder));
                    if still_held {
                        self.spawn_transmit(linkman, placeholder, kind, url, true);
                    } else {
                        debug!(linkman = %linkman, "Upload finished for a discarded message");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Media upload failed");
                    outbound::mark_failed(&mut self.state, &linkman, &placeholder);
                    self.run_effects(vec![SideEffect::Toast {
                        text: format!("Upload failed: {e}"),
                    }]);
                }
            },

            EngineEvent::BackfillResolved { linkman, result } => match result {
                Ok(wires) => {
                    let messages: Vec<Message> =
                        wires.into_iter().map(Message::from_wire).collect();
                    self.state.add_history_messages(&linkman, messages);
                }
                Err(e) => debug!(linkman = %linkman, error = %e, "History backfill failed"),
            },

            EngineEvent::OnlineMembersResolved { group, result } => match result {
                Ok(response) => {
                    let members = self.online_cache.apply_response(&group, response);
                    let ids = members.into_iter().map(|m| m.id).collect();
                    self.state.set_online_members(&group, ids);
                }
                Err(e) => debug!(group = %group, error = %e, "Online member poll failed"),
            },
        }
    }

    fn handle_intent(&mut self, intent: Intent) {
        match intent {
            Intent::SendText { to, content } => {
                let Some(user) = self.state.user.clone() else {
                    self.run_effects(vec![SideEffect::Toast {
                        text: "Sign in to send messages".to_string(),
                    }]);
                    return;
                };
                let can_post = match self.state.linkman(&to) {
                    None => {
                        warn!(linkman = %to, "Send intent for unknown linkman, ignoring");
                        return;
                    }
                    Some(linkman) => linkman.variant.can_post(&user.id),
                };
                if !can_post {
                    self.run_effects(vec![SideEffect::Toast {
                        text: "Only the channel owner can post here".to_string(),
                    }]);
                    return;
                }

                if self.typing.on_send(&to) == Some(TypingSignal::Stop) {
                    self.spawn_typing_signal(to.clone(), false);
                }

                let message =
                    outbound::build_optimistic(&user, &to, MessageKind::Text, content, Utc::now());
                let placeholder = message.id.clone();
                let kind = message.kind;
                let content = message.content.clone();
                self.state.add_linkman_message(&to, message);
                self.spawn_transmit(to, placeholder, kind, content, false);
            }

            Intent::SendMedia {
                to,
                kind,
                local_ref,
            } => {
                let Some(user) = self.state.user.clone() else {
                    self.run_effects(vec![SideEffect::Toast {
                        text: "Sign in to send messages".to_string(),
                    }]);
                    return;
                };
                let can_post = match self.state.linkman(&to) {
                    None => {
                        warn!(linkman = %to, "Media send for unknown linkman, ignoring");
                        return;
                    }
                    Some(linkman) => linkman.variant.can_post(&user.id),
                };
                if !can_post {
                    self.run_effects(vec![SideEffect::Toast {
                        text: "Only the channel owner can post here".to_string(),
                    }]);
                    return;
                }

                let message =
                    outbound::build_optimistic(&user, &to, kind, local_ref.clone(), Utc::now());
                let placeholder = message.id.clone();
                self.state.add_linkman_message(&to, message);

                let upload = self.uploader.upload(&local_ref);
                let events_tx = self.events_tx.clone();
                let linkman = to;
                tokio::spawn(async move {
                    let result = upload.await;
                    let _ = events_tx
                        .send(EngineEvent::UploadResolved {
                            linkman,
                            placeholder,
                            kind,
                            result,
                        })
                        .await;
                });
            }

            Intent::Focus(id) => {
                self.state.set_focus(&id);
                if let Some(request) = reconciler::backfill_request(&self.state, &id) {
                    self.spawn_backfill(request);
                }
            }

            Intent::InputActivity(id) => {
                if self.state.linkman(&id).is_none() {
                    debug!(linkman = %id, "Input activity for unknown linkman, ignoring");
                    return;
                }
                if self.typing.on_input(&id, Instant::now()) == Some(TypingSignal::Start) {
                    self.spawn_typing_signal(id, true);
                }
            }

            Intent::SetWindowForeground(foreground) => {
                self.window_foreground = foreground;
            }

            Intent::Logout => {
                self.state.logout();
                self.receipts.clear();
                self.online_cache.clear();
                self.typing.reset();
                self.reconciler.reset();
                info!("Session torn down to guest default");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Periodic ticks
    // -----------------------------------------------------------------------

    fn on_update_history_tick(&mut self, captured: Option<LinkmanId>) {
        let request =
            self.reconciler
                .update_history_due(&self.state, self.window_foreground, captured.as_ref());
        if let Some(request) = request {
            let cmd_tx = self.cmd_tx.clone();
            tokio::spawn(async move {
                if let Err(e) =
                    call::<UpdateHistoryRequest, Value>(&cmd_tx, CALL_UPDATE_HISTORY, &request)
                        .await
                {
                    debug!(error = %e, "update-history push failed");
                }
            });
        }
    }

    fn on_online_poll_tick(&mut self) {
        let Some(focus) = self.state.focus.clone() else {
            return;
        };
        let is_member_surface = matches!(
            self.state.linkman(&focus).map(|l| &l.variant),
            Some(LinkmanVariant::Group(_)) | Some(LinkmanVariant::Channel(_))
        );
        if !is_member_surface {
            return;
        }

        let request = OnlineMembersRequest {
            group_id: focus.clone(),
            cache: self.online_cache.token(&focus),
        };
        let cmd_tx = self.cmd_tx.clone();
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = call::<OnlineMembersRequest, OnlineMembersResponse>(
                &cmd_tx,
                CALL_GET_GROUP_ONLINE_MEMBERS,
                &request,
            )
            .await;
            let _ = events_tx
                .send(EngineEvent::OnlineMembersResolved {
                    group: request.group_id,
                    result,
                })
                .await;
        });
    }

    fn on_typing_expiry_tick(&mut self) {
        for linkman in self.typing.expire(Instant::now()) {
            self.spawn_typing_signal(linkman, false);
        }
    }

    // -----------------------------------------------------------------------
    // Spawned work (suspension points; results re-enter through the queue)
    // -----------------------------------------------------------------------

    fn spawn_bootstrap(&self) {
        let cmd_tx = self.cmd_tx.clone();
        let config = self.config.clone();
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = bootstrap::bootstrap(&cmd_tx, &config).await;
            let _ = events_tx.send(EngineEvent::BootstrapResolved(result)).await;
        });
    }

    fn spawn_transmit(
        &self,
        to: LinkmanId,
        placeholder: MessageId,
        kind: MessageKind,
        content: String,
        media: bool,
    ) {
        let cmd_tx = self.cmd_tx.clone();
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = outbound::transmit(&cmd_tx, &to, kind, &content).await;
            let _ = events_tx
                .send(EngineEvent::SendResolved {
                    linkman: to,
                    placeholder,
                    media,
                    result,
                })
                .await;
        });
    }

    fn spawn_backfill(&self, request: HistoryRequest) {
        let cmd_tx = self.cmd_tx.clone();
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = call::<HistoryRequest, Vec<WireMessage>>(
                &cmd_tx,
                CALL_GET_LINKMAN_HISTORY_MESSAGES,
                &request,
            )
            .await;
            let _ = events_tx
                .send(EngineEvent::BackfillResolved {
                    linkman: request.linkman_id,
                    result,
                })
                .await;
        });
    }

    fn spawn_typing_signal(&self, to: LinkmanId, is_typing: bool) {
        let cmd_tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            let request = TypingIndicatorRequest {
                to: to.clone(),
                is_typing,
            };
            if let Err(e) =
                call::<TypingIndicatorRequest, Value>(&cmd_tx, CALL_SEND_TYPING_INDICATOR, &request)
                    .await
            {
                debug!(linkman = %to, error = %e, "Typing indicator failed");
            }
        });
    }

    fn spawn_receipt(&self, event: &'static str, linkman_id: LinkmanId, message_id: MessageId) {
        let cmd_tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            let request = ReceiptRequest {
                message_id,
                linkman_id,
            };
            if let Err(e) = call::<ReceiptRequest, Value>(&cmd_tx, event, &request).await {
                debug!(event, error = %e, "Receipt send failed");
            }
        });
    }

    // -----------------------------------------------------------------------
    // Post-commit effects
    // -----------------------------------------------------------------------

    fn run_effects(&mut self, effects: Vec<SideEffect>) {
        let gate = EffectGate {
            window_foreground: self.window_foreground,
            notifications_enabled: self.config.notifications_enabled,
            sound_enabled: self.config.sound_enabled,
            voice_enabled: self.config.voice_enabled,
        };

        for effect in effects {
            match &effect {
                SideEffect::BackfillHistory { linkman_id } => {
                    let exist_count = self
                        .state
                        .linkman(linkman_id)
                        .map(|l| l.messages.len())
                        .unwrap_or(0);
                    self.spawn_backfill(HistoryRequest {
                        linkman_id: linkman_id.clone(),
                        exist_count,
                    });
                }
                SideEffect::SendDeliveryReceipt {
                    linkman_id,
                    message_id,
                } => self.spawn_receipt(
                    CALL_SEND_DELIVERY_RECEIPT,
                    linkman_id.clone(),
                    message_id.clone(),
                ),
                SideEffect::SendReadReceipt {
                    linkman_id,
                    message_id,
                } => self.spawn_receipt(
                    CALL_SEND_READ_RECEIPT,
                    linkman_id.clone(),
                    message_id.clone(),
                ),
                alert => {
                    if gate.allows(alert) {
                        run_alert_effect(self.notifier.as_ref(), alert);
                    }
                }
            }
        }
    }
}

/// Wire everything up: spawn the channel, spawn the engine loop, hand back
/// the intent handle.
pub fn start(
    config: EngineConfig,
    notifier: Arc<dyn Notifier>,
    uploader: Arc<dyn Uploader>,
) -> EngineHandle {
    let (cmd_tx, notif_rx) = causerie_net::spawn_channel(config.channel_config());
    let (engine, handle) = Engine::new(config, cmd_tx, notifier, uploader);
    tokio::spawn(engine.run(notif_rx));
    handle
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use futures::future::BoxFuture;
    use serde_json::json;

    use causerie_shared::constants::CHANNEL_COMMAND_BUFFER;
    use causerie_shared::protocol::{UserProfile, CALL_GUEST, CALL_SEND_MESSAGE};
    use causerie_shared::types::UserId;
    use causerie_store::{Linkman, MessageMap};
    use chrono::TimeZone;

    #[derive(Default)]
    struct RecordingNotifier {
        toasts: Mutex<Vec<String>>,
        notifications: Mutex<Vec<String>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, title: &str, _body: &str) -> anyhow::Result<()> {
            self.notifications.lock().unwrap().push(title.to_string());
            Ok(())
        }
        fn play_sound(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn speak(&self, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }
        fn toast(&self, text: &str) -> anyhow::Result<()> {
            self.toasts.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    struct FailingUploader;

    impl Uploader for FailingUploader {
        fn upload(&self, _local_ref: &str) -> BoxFuture<'static, anyhow::Result<String>> {
            Box::pin(async { Err(anyhow::anyhow!("object store unreachable")) })
        }
    }

    fn fake_channel(
        responses: impl Fn(&str, &Value) -> Result<Value, String> + Send + Sync + 'static,
    ) -> mpsc::Sender<ChannelCommand> {
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<ChannelCommand>(CHANNEL_COMMAND_BUFFER);
        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                match cmd {
                    ChannelCommand::Emit {
                        event,
                        payload,
                        reply,
                    } => {
                        let result =
                            responses(&event, &payload).map_err(ChannelError::from_hub_error);
                        let _ = reply.send(result);
                    }
                    ChannelCommand::Shutdown => break,
                }
            }
        });
        cmd_tx
    }

    fn engine_with(
        cmd_tx: mpsc::Sender<ChannelCommand>,
        uploader: Arc<dyn Uploader>,
    ) -> (Engine, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let (engine, _handle) = Engine::new(
            EngineConfig::default(),
            cmd_tx,
            notifier.clone(),
            uploader,
        );
        (engine, notifier)
    }

    fn seed_user_and_friend(engine: &mut Engine, linkman: &str) {
        engine.state.user = Some(UserProfile {
            id: UserId::from("u1"),
            username: "alice".to_string(),
            avatar: String::new(),
            tag: String::new(),
        });
        engine.state.insert_linkman(Linkman {
            id: LinkmanId::from(linkman),
            name: linkman.to_string(),
            avatar: String::new(),
            create_time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            variant: LinkmanVariant::Friend,
            unread: 0,
            messages: MessageMap::new(),
            typing_users: None,
        });
    }

    /// Wait for one spawned-task result and apply it.
    async fn pump(engine: &mut Engine) {
        let event = engine
            .events_rx
            .as_mut()
            .unwrap()
            .recv()
            .await
            .expect("engine event");
        engine.handle_event(event);
    }

    #[tokio::test]
    async fn test_send_text_rekeys_on_ack() {
        let cmd_tx = fake_channel(|event, payload| match event {
            CALL_SEND_MESSAGE => Ok(json!({
                "id": "srv-1",
                "to": payload["to"],
                "type": payload["type"],
                "content": payload["content"],
                "from": {"id": "u1", "username": "alice", "avatar": "", "tag": ""},
                "createTime": "2024-05-01T12:00:00Z",
            })),
            other => Err(format!("unexpected call {other}")),
        });
        let (mut engine, _) = engine_with(cmd_tx, Arc::new(outbound::PassthroughUploader));
        seed_user_and_friend(&mut engine, "f1");

        engine.handle_event(EngineEvent::Intent(Intent::SendText {
            to: LinkmanId::from("f1"),
            content: "hello".to_string(),
        }));

        // Optimistic echo is in place before the ack.
        let linkman = engine.state.linkman(&LinkmanId::from("f1")).unwrap();
        assert_eq!(linkman.messages.len(), 1);
        assert!(linkman.messages.newest().unwrap().loading);

        pump(&mut engine).await;

        let linkman = engine.state.linkman(&LinkmanId::from("f1")).unwrap();
        assert_eq!(linkman.messages.len(), 1);
        let held = linkman.messages.get(&MessageId::from("srv-1")).unwrap();
        assert!(!held.loading);
    }

    #[tokio::test]
    async fn test_send_failure_rolls_back_and_toasts() {
        let cmd_tx = fake_channel(|_, _| Err("validation failed".to_string()));
        let (mut engine, notifier) = engine_with(cmd_tx, Arc::new(outbound::PassthroughUploader));
        seed_user_and_friend(&mut engine, "f1");

        engine.handle_event(EngineEvent::Intent(Intent::SendText {
            to: LinkmanId::from("f1"),
            content: "hello".to_string(),
        }));
        pump(&mut engine).await;

        let linkman = engine.state.linkman(&LinkmanId::from("f1")).unwrap();
        assert!(linkman.messages.is_empty());
        assert_eq!(notifier.toasts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_media_upload_failure_marks_failed_in_place() {
        let cmd_tx = fake_channel(|_, _| Err("should not be called".to_string()));
        let (mut engine, notifier) = engine_with(cmd_tx, Arc::new(FailingUploader));
        seed_user_and_friend(&mut engine, "f1");

        engine.handle_event(EngineEvent::Intent(Intent::SendMedia {
            to: LinkmanId::from("f1"),
            kind: MessageKind::Image,
            local_ref: "blob:preview-1".to_string(),
        }));
        pump(&mut engine).await;

        let linkman = engine.state.linkman(&LinkmanId::from("f1")).unwrap();
        let held = linkman.messages.newest().unwrap();
        assert!(held.failed);
        assert!(!held.loading);
        assert_eq!(held.content, "blob:preview-1");
        assert_eq!(notifier.toasts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_connect_bootstraps_as_guest() {
        let cmd_tx = fake_channel(|event, _| match event {
            CALL_GUEST => Ok(json!({
                "linkmans": [{
                    "id": "lobby",
                    "name": "Lobby",
                    "avatar": "",
                    "type": "group",
                    "createTime": "2024-05-01T12:00:00Z",
                    "creator": "u0",
                }],
            })),
            "getLinkmansLastMessagesV2" => Ok(json!({
                "lobby": {"messages": [], "unread": 0},
            })),
            other => Err(format!("unexpected call {other}")),
        });
        let (mut engine, _) = engine_with(cmd_tx, Arc::new(outbound::PassthroughUploader));

        engine.handle_event(EngineEvent::Channel(ChannelNotification::Connected));
        pump(&mut engine).await;

        assert!(engine.state.connected);
        assert!(engine.state.user.is_none());
        assert!(engine.state.linkman(&LinkmanId::from("lobby")).is_some());
    }

    #[tokio::test]
    async fn test_stranger_message_backfills_history() {
        let cmd_tx = fake_channel(|event, payload| match event {
            CALL_GET_LINKMAN_HISTORY_MESSAGES => {
                assert_eq!(payload["existCount"], 1);
                Ok(json!([{
                    "id": "old-1",
                    "to": "U123",
                    "type": "text",
                    "content": "earlier",
                    "from": {"id": "u9", "username": "mallory", "avatar": "", "tag": ""},
                    "createTime": "2024-05-01T11:00:00Z",
                }]))
            }
            other => Err(format!("unexpected call {other}")),
        });
        let (mut engine, _) = engine_with(cmd_tx, Arc::new(outbound::PassthroughUploader));
        seed_user_and_friend(&mut engine, "f1");

        let push = json!({
            "id": "m1",
            "to": "U123",
            "type": "text",
            "content": "psst",
            "from": {"id": "u9", "username": "mallory", "avatar": "", "tag": ""},
            "createTime": "2024-05-01T12:00:00Z",
        });
        engine.handle_event(EngineEvent::Channel(ChannelNotification::Event {
            name: "message".to_string(),
            payload: push,
        }));

        let linkman = engine.state.linkman(&LinkmanId::from("U123")).unwrap();
        assert_eq!(linkman.unread, 1);
        assert_eq!(linkman.messages.len(), 1);

        pump(&mut engine).await;

        let linkman = engine.state.linkman(&LinkmanId::from("U123")).unwrap();
        assert_eq!(linkman.messages.len(), 2);
        assert_eq!(linkman.unread, 1);
    }

    #[tokio::test]
    async fn test_guest_cannot_send() {
        let cmd_tx = fake_channel(|_, _| Err("should not be called".to_string()));
        let (mut engine, notifier) = engine_with(cmd_tx, Arc::new(outbound::PassthroughUploader));
        seed_user_and_friend(&mut engine, "f1");
        engine.state.user = None;

        engine.handle_event(EngineEvent::Intent(Intent::SendText {
            to: LinkmanId::from("f1"),
            content: "hello".to_string(),
        }));

        assert!(engine
            .state
            .linkman(&LinkmanId::from("f1"))
            .unwrap()
            .messages
            .is_empty());
        assert_eq!(notifier.toasts.lock().unwrap().len(), 1);
    }
}

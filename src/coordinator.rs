use crate::conversation::SessionState;
use crate::gateway::GatewayError;
use crate::panel;
use crate::pipeline::Pipeline;
use crate::prompts;
use crate::types::{IncomingMessage, OutgoingMessage};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Transport that delivers user messages and shows bot output.
#[async_trait]
pub trait ChatSurface: Send + Sync {
    /// Next inbound message, or `None` once the surface has closed.
    async fn recv(&mut self) -> Option<IncomingMessage>;
    async fn send(&self, message: &OutgoingMessage) -> Result<()>;
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct ConversationKey {
    conversation_id: String,
    thread_id: Option<String>,
}

impl ConversationKey {
    fn of(msg: &IncomingMessage) -> Self {
        Self {
            conversation_id: msg.conversation_id.clone(),
            thread_id: msg.thread_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    ToggleDebug,
    Reset,
}

fn parse_command(text: &str) -> Option<Command> {
    match text.trim() {
        "/debug" => Some(Command::ToggleDebug),
        "/reset" => Some(Command::Reset),
        _ => None,
    }
}

struct Session {
    state: SessionState,
    last_active: Instant,
}

pub struct Coordinator<S> {
    pipeline: Pipeline,
    surface: S,
    debug_default: bool,
    idle_timeout: Option<Duration>,
    sessions: HashMap<ConversationKey, Session>,
}

impl<S: ChatSurface> Coordinator<S> {
    pub fn new(pipeline: Pipeline, surface: S, debug_default: bool) -> Self {
        Self {
            pipeline,
            surface,
            debug_default,
            idle_timeout: None,
            sessions: HashMap::new(),
        }
    }

    /// Sessions silent for longer than `timeout` are dropped; the next message
    /// in that conversation starts over with a greeting.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Handles messages one at a time until the surface closes. Returns early
    /// only on a configuration error, which no later message could recover
    /// from.
    pub async fn run(mut self) -> Result<()> {
        while let Some(msg) = self.surface.recv().await {
            if let Err(err) = self.handle_incoming(msg).await {
                let fatal = err
                    .downcast_ref::<GatewayError>()
                    .is_some_and(GatewayError::is_configuration);
                if fatal {
                    return Err(err.context("model gateway is not configured"));
                }
                error!("incoming error: {err:#}");
            }
        }
        info!("surface closed, coordinator stopping");
        Ok(())
    }

    async fn handle_incoming(&mut self, msg: IncomingMessage) -> Result<()> {
        let now = Instant::now();
        self.evict_idle(now);
        let key = ConversationKey::of(&msg);

        if !self.sessions.contains_key(&key) {
            self.start_session(&key).await?;
        }
        if let Some(session) = self.sessions.get_mut(&key) {
            session.last_active = now;
        }

        match parse_command(&msg.text) {
            Some(Command::ToggleDebug) => {
                let enabled = match self.sessions.get_mut(&key) {
                    Some(session) => session.state.toggle_debug(),
                    None => return Ok(()),
                };
                info!(conversation = %key.conversation_id, enabled, "debug panel toggled");
                self.send(&key, panel::debug_toggled(enabled), Some(panel::SYSTEM_AUTHOR))
                    .await
            }
            Some(Command::Reset) => {
                info!(conversation = %key.conversation_id, "session reset");
                self.sessions.remove(&key);
                self.start_session(&key).await
            }
            None => self.handle_turn(&key, &msg.text).await,
        }
    }

    fn evict_idle(&mut self, now: Instant) {
        let Some(timeout) = self.idle_timeout else {
            return;
        };
        self.sessions.retain(|key, session| {
            let keep = now.saturating_duration_since(session.last_active) < timeout;
            if !keep {
                info!(
                    conversation = %key.conversation_id,
                    thread = key.thread_id.as_deref().unwrap_or("-"),
                    "session expired"
                );
            }
            keep
        });
    }

    async fn start_session(&mut self, key: &ConversationKey) -> Result<()> {
        info!(
            conversation = %key.conversation_id,
            thread = key.thread_id.as_deref().unwrap_or("-"),
            "starting session"
        );
        let state = SessionState::new(self.debug_default);
        let show_panel = state.debug_mode;
        self.sessions.insert(
            key.clone(),
            Session {
                state,
                last_active: Instant::now(),
            },
        );

        self.send(key, prompts::WELCOME_MESSAGE.to_string(), None).await?;
        if show_panel {
            self.send(key, panel::intro_panel(), Some(panel::PANEL_AUTHOR))
                .await?;
        }
        Ok(())
    }

    async fn handle_turn(&mut self, key: &ConversationKey, text: &str) -> Result<()> {
        let Some(session) = self.sessions.get_mut(key) else {
            return Ok(());
        };
        let report = self.pipeline.run_turn(&mut session.state, text).await?;

        self.send(key, report.reply_text().to_string(), None).await?;
        if let Some(panel_text) = report.panel {
            self.send(key, panel_text, Some(panel::PANEL_AUTHOR)).await?;
        }
        if let Some(alert) = report.high_alert {
            self.send(key, alert, Some(panel::SYSTEM_AUTHOR)).await?;
        }
        Ok(())
    }

    async fn send(&self, key: &ConversationKey, text: String, author: Option<&str>) -> Result<()> {
        let outgoing = OutgoingMessage {
            text,
            author: author.map(str::to_string),
            conversation_id: key.conversation_id.clone(),
            thread_id: key.thread_id.clone(),
        };
        self.surface.send(&outgoing).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::{ScriptedGateway, service_error};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    struct RecordingSurface {
        incoming: VecDeque<IncomingMessage>,
        sent: Arc<Mutex<Vec<OutgoingMessage>>>,
    }

    #[async_trait]
    impl ChatSurface for RecordingSurface {
        async fn recv(&mut self) -> Option<IncomingMessage> {
            self.incoming.pop_front()
        }

        async fn send(&self, message: &OutgoingMessage) -> Result<()> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn msg(conversation: &str, text: &str) -> IncomingMessage {
        IncomingMessage {
            text: text.to_string(),
            conversation_id: conversation.to_string(),
            thread_id: None,
        }
    }

    async fn run(
        gateway: ScriptedGateway,
        inputs: Vec<IncomingMessage>,
    ) -> (Result<()>, Vec<OutgoingMessage>, Arc<ScriptedGateway>) {
        let gateway = Arc::new(gateway);
        let sent = Arc::new(Mutex::new(Vec::new()));
        let surface = RecordingSurface {
            incoming: inputs.into(),
            sent: sent.clone(),
        };
        let pipeline = Pipeline::new(gateway.clone(), "gpt-4o-mini", 20);
        let result = Coordinator::new(pipeline, surface, true).run().await;
        let sent = sent.lock().unwrap().clone();
        (result, sent, gateway)
    }

    fn turn(gateway: ScriptedGateway, score: u8, reply: &str) -> ScriptedGateway {
        gateway
            .reply(format!(r#"{{"progress_score": {score}, "buyer_interest": "high"}}"#))
            .reply(r#"{"current_topic": "gaming", "relevance_to_goal": "high"}"#)
            .reply(r#"{"strategy": "direct_pitch", "reasoning": "r", "approach": "a"}"#)
            .reply(reply)
    }

    #[tokio::test]
    async fn new_session_gets_welcome_then_turn_output() {
        let gateway = turn(turn(ScriptedGateway::new(), 20, "first!!!"), 30, "second!!!");
        let (result, sent, _) = run(gateway, vec![msg("c1", "hi"), msg("c1", "games?")]).await;
        result.unwrap();

        let texts: Vec<&str> = sent.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(sent.len(), 6);
        assert_eq!(texts[0], prompts::WELCOME_MESSAGE);
        assert_eq!(sent[1].author.as_deref(), Some(panel::PANEL_AUTHOR));
        assert!(texts[1].contains("Initialization"));
        assert_eq!(texts[2], "first!!!");
        assert!(sent[2].author.is_none());
        assert!(texts[3].contains("**Messages:** 1"));
        assert_eq!(texts[4], "second!!!");
        assert!(texts[5].contains("**Messages:** 2"));
        assert!(texts[5].contains("**Peak Progress:** 30%"));
    }

    #[tokio::test]
    async fn high_score_appends_system_alert() {
        let gateway = turn(ScriptedGateway::new(), 95, "SOLD!!!");
        let (result, sent, _) = run(gateway, vec![msg("c1", "deal")]).await;
        result.unwrap();

        let last_three: Vec<&OutgoingMessage> = sent.iter().rev().take(3).rev().collect();
        assert_eq!(last_three[0].text, "SOLD!!!");
        assert_eq!(last_three[1].author.as_deref(), Some(panel::PANEL_AUTHOR));
        assert_eq!(last_three[2].author.as_deref(), Some(panel::SYSTEM_AUTHOR));
        assert!(last_three[2].text.contains("Sale is imminent! Progress at 95%"));
    }

    #[tokio::test]
    async fn debug_command_hides_panel_without_model_calls() {
        let gateway = turn(ScriptedGateway::new(), 10, "yo!!!");
        let (result, sent, gateway) =
            run(gateway, vec![msg("c1", "/debug"), msg("c1", "hello")]).await;
        result.unwrap();

        assert_eq!(gateway.requests().len(), 4);
        let texts: Vec<&str> = sent.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts[2], "🔧 Debug panel has been **disabled**!");
        assert_eq!(texts[3], "yo!!!");
        assert_eq!(sent.len(), 4);
    }

    #[tokio::test]
    async fn reset_starts_fresh_session() {
        let gateway = turn(turn(ScriptedGateway::new(), 50, "one"), 10, "two");
        let (result, sent, gateway) = run(
            gateway,
            vec![msg("c1", "a"), msg("c1", "/reset"), msg("c1", "b")],
        )
        .await;
        result.unwrap();

        let welcomes = sent
            .iter()
            .filter(|m| m.text == prompts::WELCOME_MESSAGE)
            .count();
        assert_eq!(welcomes, 2);
        // The transcript after reset holds only the new message.
        assert!(gateway.requests()[4].user.ends_with("Conversation so far:\nUser: b"));
        let last_panel = &sent.last().unwrap().text;
        assert!(last_panel.contains("**Messages:** 1"));
        assert!(last_panel.contains("**Peak Progress:** 10%"));
    }

    #[tokio::test]
    async fn conversations_keep_separate_sessions() {
        let gateway = turn(turn(ScriptedGateway::new(), 40, "x"), 5, "y");
        let (result, sent, gateway) = run(gateway, vec![msg("c1", "one"), msg("c2", "two")]).await;
        result.unwrap();

        assert!(gateway.requests()[4].user.ends_with("Conversation so far:\nUser: two"));
        let c2: Vec<&OutgoingMessage> = sent.iter().filter(|m| m.conversation_id == "c2").collect();
        assert_eq!(c2[0].text, prompts::WELCOME_MESSAGE);
        assert!(c2.last().unwrap().text.contains("**Peak Progress:** 5%"));
    }

    #[tokio::test]
    async fn transient_failures_keep_the_loop_alive() {
        let gateway = ScriptedGateway::new()
            .fail(service_error())
            .fail(service_error())
            .fail(service_error())
            .fail(service_error());
        let gateway = turn(gateway, 0, "still here");
        let (result, sent, _) = run(gateway, vec![msg("c1", "a"), msg("c1", "b")]).await;
        result.unwrap();

        assert_eq!(sent[2].text, prompts::FALLBACK_REPLY);
        assert!(sent.iter().any(|m| m.text == "still here"));
    }

    #[tokio::test]
    async fn missing_credential_stops_the_coordinator() {
        let gateway = ScriptedGateway::new().fail(GatewayError::MissingCredential);
        let (result, sent, gateway) = run(gateway, vec![msg("c1", "a"), msg("c1", "b")]).await;

        let err = result.unwrap_err();
        assert!(err.downcast_ref::<GatewayError>().is_some());
        assert_eq!(gateway.requests().len(), 1);
        // Only the session greeting went out.
        assert_eq!(sent.len(), 2);
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted_and_restart_with_greeting() {
        let gateway = turn(turn(ScriptedGateway::new(), 40, "x"), 5, "y");
        let gateway = Arc::new(turn(gateway, 7, "z"));
        let sent = Arc::new(Mutex::new(Vec::new()));
        let surface = RecordingSurface {
            incoming: VecDeque::new(),
            sent: sent.clone(),
        };
        let pipeline = Pipeline::new(gateway.clone(), "gpt-4o-mini", 20);
        let mut coordinator = Coordinator::new(pipeline, surface, false)
            .with_idle_timeout(Some(Duration::from_secs(60)));

        coordinator.handle_incoming(msg("c1", "one")).await.unwrap();
        coordinator.handle_incoming(msg("c2", "two")).await.unwrap();
        assert_eq!(coordinator.sessions.len(), 2);

        coordinator.evict_idle(Instant::now() + Duration::from_secs(30));
        assert_eq!(coordinator.sessions.len(), 2);
        coordinator.evict_idle(Instant::now() + Duration::from_secs(61));
        assert!(coordinator.sessions.is_empty());

        coordinator.handle_incoming(msg("c1", "back")).await.unwrap();
        assert!(gateway.requests()[8].user.ends_with("Conversation so far:\nUser: back"));
        let welcomes = sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.conversation_id == "c1" && m.text == prompts::WELCOME_MESSAGE)
            .count();
        assert_eq!(welcomes, 2);
    }

    #[tokio::test]
    async fn sessions_persist_without_idle_timeout() {
        let gateway = Arc::new(turn(ScriptedGateway::new(), 40, "x"));
        let surface = RecordingSurface {
            incoming: VecDeque::new(),
            sent: Arc::new(Mutex::new(Vec::new())),
        };
        let pipeline = Pipeline::new(gateway, "gpt-4o-mini", 20);
        let mut coordinator = Coordinator::new(pipeline, surface, true);

        coordinator.handle_incoming(msg("c1", "one")).await.unwrap();
        coordinator.evict_idle(Instant::now() + Duration::from_secs(86_400));
        assert_eq!(coordinator.sessions.len(), 1);
    }

    #[test]
    fn commands_are_exact() {
        assert_eq!(parse_command(" /debug "), Some(Command::ToggleDebug));
        assert_eq!(parse_command("/reset"), Some(Command::Reset));
        assert_eq!(parse_command("/debug please"), None);
        assert_eq!(parse_command("debug"), None);
    }
}

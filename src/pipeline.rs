//! Per-turn orchestration: performance -> topic -> strategy -> response.
//!
//! Stages run strictly one after another and each makes exactly one gateway
//! call. A transient failure in one stage only swaps that stage's output for
//! its default; the remaining stages still run.

use crate::analysis::{PerformanceAssessment, StrategyDecision, TopicAnalysis};
use crate::conversation::{ConversationHistory, STRATEGY_WINDOW, SessionState};
use crate::gateway::{ChatRequest, GatewayError, ModelGateway, StageOutcome, request_record, request_text};
use crate::panel;
use crate::prompts;
use crate::types::Message;
use std::sync::Arc;
use tracing::{debug, info};

const ANALYSIS_TEMPERATURE: f32 = 0.3;
const STRATEGY_TEMPERATURE: f32 = 0.5;
const REPLY_TEMPERATURE: f32 = 0.8;
const REPLY_MAX_TOKENS: u32 = 300;

/// Everything one turn produced, for the coordinator to emit.
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub performance: StageOutcome<PerformanceAssessment>,
    pub topic: StageOutcome<TopicAnalysis>,
    pub strategy: StageOutcome<StrategyDecision>,
    pub reply: StageOutcome<String>,
    /// Rendered debug panel, present when the session has debug mode on.
    pub panel: Option<String>,
    pub high_alert: Option<String>,
}

impl TurnReport {
    pub fn reply_text(&self) -> &str {
        self.reply.value()
    }

    pub fn fallback_count(&self) -> usize {
        [
            self.performance.is_fallback(),
            self.topic.is_fallback(),
            self.strategy.is_fallback(),
            self.reply.is_fallback(),
        ]
        .into_iter()
        .filter(|fell_back| *fell_back)
        .count()
    }
}

pub struct Pipeline {
    gateway: Arc<dyn ModelGateway>,
    model: String,
    bar_width: usize,
}

impl Pipeline {
    pub fn new(gateway: Arc<dyn ModelGateway>, model: impl Into<String>, bar_width: usize) -> Self {
        Self {
            gateway,
            model: model.into(),
            bar_width,
        }
    }

    fn request(&self, system: &str, user: String, temperature: f32, json_mode: bool) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            system: system.to_string(),
            user,
            temperature,
            max_tokens: None,
            json_mode,
        }
    }

    pub async fn assess_performance(
        &self,
        history: &ConversationHistory,
    ) -> Result<StageOutcome<PerformanceAssessment>, GatewayError> {
        let request = self.request(
            prompts::PERFORMANCE_SYSTEM,
            prompts::performance_prompt(&history.transcript()),
            ANALYSIS_TEMPERATURE,
            true,
        );
        request_record(
            self.gateway.as_ref(),
            "performance",
            &request,
            PerformanceAssessment::fallback,
        )
        .await
    }

    pub async fn analyze_topic(
        &self,
        user_message: &str,
    ) -> Result<StageOutcome<TopicAnalysis>, GatewayError> {
        let request = self.request(
            prompts::TOPIC_SYSTEM,
            prompts::topic_prompt(user_message),
            ANALYSIS_TEMPERATURE,
            true,
        );
        request_record(self.gateway.as_ref(), "topic", &request, TopicAnalysis::fallback).await
    }

    pub async fn choose_strategy(
        &self,
        performance: &PerformanceAssessment,
        topic: &TopicAnalysis,
        history: &ConversationHistory,
    ) -> Result<StageOutcome<StrategyDecision>, GatewayError> {
        let request = self.request(
            prompts::STRATEGY_SYSTEM,
            prompts::strategy_prompt(
                performance,
                topic,
                &history.recent_transcript(STRATEGY_WINDOW),
            ),
            STRATEGY_TEMPERATURE,
            true,
        );
        request_record(
            self.gateway.as_ref(),
            "strategy",
            &request,
            StrategyDecision::fallback,
        )
        .await
    }

    pub async fn generate_reply(
        &self,
        user_message: &str,
        decision: &StrategyDecision,
    ) -> Result<StageOutcome<String>, GatewayError> {
        let mut request = self.request(
            prompts::PERSONA_PROMPT,
            prompts::response_prompt(decision, user_message),
            REPLY_TEMPERATURE,
            false,
        );
        request.max_tokens = Some(REPLY_MAX_TOKENS);
        request_text(self.gateway.as_ref(), "response", &request, || {
            prompts::FALLBACK_REPLY.to_string()
        })
        .await
    }

    /// Runs one full turn for `text` and updates `session`.
    ///
    /// Only a configuration error aborts the turn. When that happens the user
    /// message has already been appended but no reply or metrics are recorded.
    pub async fn run_turn(
        &self,
        session: &mut SessionState,
        text: &str,
    ) -> Result<TurnReport, GatewayError> {
        session.history.push(Message::user(text));

        let performance = self.assess_performance(&session.history).await?;
        debug!(
            score = performance.value().progress_score,
            interest = performance.value().buyer_interest.as_str(),
            "performance assessed"
        );

        let topic = self.analyze_topic(text).await?;
        debug!(topic = %topic.value().current_topic, "topic analyzed");

        let strategy = self
            .choose_strategy(performance.value(), topic.value(), &session.history)
            .await?;
        debug!(strategy = strategy.value().strategy.label(), "strategy chosen");

        let reply = self.generate_reply(text, strategy.value()).await?;

        session.history.push(Message::assistant(reply.value().clone()));
        session
            .metrics
            .record_turn(performance.value(), &strategy.value().strategy);

        let panel = session.debug_mode.then(|| {
            panel::render_panel(
                performance.value(),
                topic.value(),
                strategy.value(),
                &session.metrics,
                self.bar_width,
            )
        });
        let high_alert = panel::high_alert(performance.value().progress_score);

        let report = TurnReport {
            performance,
            topic,
            strategy,
            reply,
            panel,
            high_alert,
        };
        info!(
            turn = session.metrics.total_messages,
            score = report.performance.value().progress_score,
            strategy = report.strategy.value().strategy.label(),
            fallbacks = report.fallback_count(),
            "turn complete"
        );
        Ok(report)
    }
}

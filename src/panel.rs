//! Debug panel rendering. Everything here is a pure function of the turn's
//! analysis records and the session metrics.

use crate::analysis::{BuyerInterest, PerformanceAssessment, Strategy, StrategyDecision, TopicAnalysis};
use crate::conversation::SessionMetrics;
use crate::prompts::SALES_GOAL;
use std::fmt::Write;

pub const PANEL_AUTHOR: &str = "🤖 Debug Panel";
pub const SYSTEM_AUTHOR: &str = "System";
pub const FALLBACK_STRATEGY_EMOJI: &str = "📋";
pub const HIGH_ALERT_THRESHOLD: u8 = 90;

const HISTORY_WINDOW: usize = 5;
const MAX_SIGNALS: usize = 3;

pub fn progress_bar(score: u8, width: usize) -> String {
    let filled = (usize::from(score) * width / 100).min(width);
    format!(
        "[{}{}] {score}%",
        "█".repeat(filled),
        "░".repeat(width - filled)
    )
}

pub fn interest_emoji(interest: BuyerInterest) -> &'static str {
    match interest {
        BuyerInterest::Low => "🔴",
        BuyerInterest::Medium => "🟡",
        BuyerInterest::High => "🟢",
        BuyerInterest::Unknown => "⚪",
    }
}

pub fn strategy_emoji(strategy: &Strategy) -> &'static str {
    match strategy {
        Strategy::DirectPitch => "🎯",
        Strategy::SoftSell => "💬",
        Strategy::BuildRapport => "🤝",
        Strategy::CreateUrgency => "⚡",
        Strategy::HandleObjection => "🛡️",
        Strategy::Other(_) => FALLBACK_STRATEGY_EMOJI,
    }
}

/// `"create_urgency"` -> `"Create Urgency"`.
pub fn strategy_title(strategy: &Strategy) -> String {
    strategy
        .label()
        .split(|c: char| c == '_' || c.is_whitespace())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn progress_banner(score: u8) -> &'static str {
    match score {
        80..=u8::MAX => "🎉 **ALERT:** Very close to sale! Closing strategy active.",
        60..=79 => "✨ **HIGH ENGAGEMENT:** Strong buying signals detected!",
        40..=59 => "💡 **MODERATE INTEREST:** Building momentum...",
        _ => "🌱 **EARLY STAGE:** Establishing rapport and interest.",
    }
}

pub fn high_alert(score: u8) -> Option<String> {
    (score >= HIGH_ALERT_THRESHOLD).then(|| {
        format!(
            "🎊 **[SYSTEM ALERT]** Sale is imminent! Progress at {score}% - maintain closing strategy!"
        )
    })
}

fn or_na(text: &str) -> &str {
    if text.trim().is_empty() { "N/A" } else { text }
}

/// Renders the panel shown after each reply. `metrics` must already include
/// the current turn.
pub fn render_panel(
    performance: &PerformanceAssessment,
    topic: &TopicAnalysis,
    decision: &StrategyDecision,
    metrics: &SessionMetrics,
    bar_width: usize,
) -> String {
    let score = performance.progress_score;
    let interest = performance.buyer_interest;
    let recent = metrics.recent_strategies(HISTORY_WINDOW);
    let trail = recent
        .iter()
        .map(strategy_emoji)
        .collect::<Vec<_>>()
        .join(" → ");
    let titles = recent
        .iter()
        .map(strategy_title)
        .collect::<Vec<_>>()
        .join(", ");

    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write!(
        out,
        "\n## 🎯 Goal-Seeking AI Debug Panel\n\n\
         ### 📊 Current Metrics\n\
         **Goal:** {goal}  \n\
         **Progress:** {bar}  \n\
         **Interest Level:** {interest_emoji} {interest_label}  \n\
         **Messages:** {messages}  \n\
         **Peak Progress:** {peak}%\n\n\
         ### 🧠 Current Analysis\n\
         **Topic:** {topic}  \n\
         **Relevance to Goal:** {relevance}  \n\
         **Active Strategy:** {strategy_emoji} {strategy_title}  \n\
         **Strategy Reason:** {reasoning}  \n\
         **Approach:** {approach}\n\n\
         ### 📈 Strategy History\n\
         {trail}  \n\
         *{titles}*\n\n\
         ### 🔍 Key Insights\n",
        goal = SALES_GOAL,
        bar = progress_bar(score, bar_width),
        interest_emoji = interest_emoji(interest),
        interest_label = interest.as_str().to_uppercase(),
        messages = metrics.total_messages,
        peak = metrics.peak_progress,
        topic = topic.current_topic,
        relevance = topic.relevance_to_goal.as_str().to_uppercase(),
        strategy_emoji = strategy_emoji(&decision.strategy),
        strategy_title = strategy_title(&decision.strategy),
        reasoning = or_na(&decision.reasoning),
        approach = or_na(&decision.approach),
    );

    let signals: Vec<&String> = performance
        .key_signals
        .iter()
        .filter(|s| !s.trim().is_empty())
        .take(MAX_SIGNALS)
        .collect();
    if signals.is_empty() {
        out.push_str("• Waiting for user engagement signals...\n");
    } else {
        for signal in signals {
            let _ = writeln!(out, "• {signal}");
        }
    }

    if !performance.assessment.trim().is_empty() {
        let _ = writeln!(out, "\n**Assessment:** {}", performance.assessment);
    }

    out.push('\n');
    out.push_str(progress_banner(score));
    out.push_str(
        "\n\n---\n*Real-time goal-seeking AI analysis • Strategy adapts based on your responses*",
    );
    out
}

/// Panel shown once when a session starts, before any analysis exists.
pub fn intro_panel() -> String {
    format!(
        "\n## 🎯 Goal-Seeking AI Debug Panel\n\n\
         **Current Goal:** {SALES_GOAL}\n\n\
         **Status:** 🟢 Active\n\
         **Messages:** 0\n\
         **Progress:** 0%\n\
         **Strategy:** Initialization\n\n\
         ---\n\
         *This panel shows the AI's goal-seeking process in real-time. Watch how it analyzes, strategizes, and adapts!*\n\n\
         💡 **Tip:** The debug panel appears after each message. Send `/debug` to show or hide it.\n"
    )
}

pub fn debug_toggled(enabled: bool) -> String {
    let status = if enabled { "enabled" } else { "disabled" };
    format!("🔧 Debug panel has been **{status}**!")
}

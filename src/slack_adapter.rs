use crate::config::SlackConfig;
use crate::coordinator::ChatSurface;
use crate::types::{IncomingMessage, OutgoingMessage};
use anyhow::{Context, Result};
use async_trait::async_trait;
use slack_morphism::prelude::SlackClientHyperHttpsConnector;
use slack_morphism::prelude::*;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Clone)]
struct SlackBridge {
    tx: mpsc::UnboundedSender<IncomingMessage>,
}

pub struct SlackAdapter {
    client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    bot_token: SlackApiToken,
    rx: mpsc::UnboundedReceiver<IncomingMessage>,
}

impl SlackAdapter {
    pub async fn connect(cfg: &SlackConfig) -> Result<Self> {
        info!("slack: connecting (socket mode)");
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = SlackClientHyperHttpsConnector::new()
            .context("failed to create slack hyper connector")?;
        let client: Arc<SlackClient<SlackClientHyperHttpsConnector>> =
            Arc::new(SlackClient::new(connector));
        let bot_token = SlackApiToken::new(SlackApiTokenValue(cfg.bot_token.clone()));
        let app_token = SlackApiToken::new(SlackApiTokenValue(cfg.app_token.clone()));

        let env = Arc::new(
            SlackClientEventsListenerEnvironment::new(client.clone())
                .with_user_state(SlackBridge { tx }),
        );

        let callbacks = SlackSocketModeListenerCallbacks::new()
            .with_push_events(push_events_callback::<SlackClientHyperHttpsConnector>);

        let socket_mode_config = SlackClientSocketModeConfig::new();
        let socket_mode_listener =
            SlackClientSocketModeListener::new(&socket_mode_config, env, callbacks);

        socket_mode_listener
            .listen_for(&app_token)
            .await
            .context("failed to register socket mode listener")?;
        info!("slack: socket mode listener registered");

        tokio::spawn(async move {
            socket_mode_listener.start().await;
            warn!("slack: socket mode listener stopped");
        });

        Ok(SlackAdapter {
            client,
            bot_token,
            rx,
        })
    }
}

#[async_trait]
impl ChatSurface for SlackAdapter {
    async fn recv(&mut self) -> Option<IncomingMessage> {
        self.rx.recv().await
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<()> {
        debug!(
            channel = %message.conversation_id,
            thread = message.thread_id.as_deref().unwrap_or("-"),
            "slack: sending message"
        );
        let session = self.client.open_session(&self.bot_token);
        let req = SlackApiChatPostMessageRequest {
            channel: SlackChannelId(message.conversation_id.clone()),
            content: SlackMessageContent {
                text: Some(message.text.clone()),
                blocks: None,
                attachments: None,
                upload: None,
                files: None,
                reactions: None,
                metadata: None,
                markdown_text: None,
            },
            as_user: None,
            icon_emoji: None,
            icon_url: None,
            link_names: None,
            parse: None,
            thread_ts: message.thread_id.clone().map(SlackTs),
            username: message.author.clone(),
            reply_broadcast: None,
            unfurl_links: None,
            unfurl_media: None,
        };

        session
            .chat_post_message(&req)
            .await
            .context("failed to post slack message")?;
        Ok(())
    }
}

/// Drops `<@U123>` style mention tokens so only the user's words reach the
/// pipeline.
pub fn strip_mentions(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<@") {
        out.push_str(&rest[..start]);
        match rest[start..].find('>') {
            Some(end) => rest = &rest[start + end + 1..],
            None => {
                rest = &rest[start..];
                break;
            }
        }
    }
    out.push_str(rest);
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

async fn push_events_callback<SCHC>(
    event: SlackPushEventCallback,
    _client: Arc<SlackClient<SCHC>>,
    state: SlackClientEventsUserState,
) -> UserCallbackResult<()>
where
    SCHC: SlackClientHttpConnector + Send + Sync + 'static,
{
    let bridge = {
        let guard = state.read().await;
        guard
            .get_user_state::<SlackBridge>()
            .cloned()
            .ok_or_else(|| "missing slack bridge")?
    };

    if let SlackEventCallbackBody::AppMention(app_mention) = event.event {
        let text = strip_mentions(&app_mention.content.text.unwrap_or_default());
        let channel = app_mention
            .origin
            .channel
            .map(|c| c.to_string())
            .unwrap_or_default();
        let thread_id = app_mention.origin.thread_ts.map(|ts| ts.to_string());

        if !text.is_empty() && !channel.is_empty() {
            debug!(
                channel = %channel,
                thread = thread_id.as_deref().unwrap_or("-"),
                "slack: app_mention -> incoming"
            );
            let _ = bridge.tx.send(IncomingMessage {
                text,
                conversation_id: channel,
                thread_id,
            });
        } else {
            debug!(channel = %channel, "slack: app_mention ignored (empty text or channel)");
        }
    }

    Ok(())
}

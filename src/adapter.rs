use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::builder::{self, response_message_id};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::gateway::dispatcher::EventHandler;
use crate::gateway::session::SessionSnapshot;
use crate::gateway::Gateway;
use crate::models::message::{MessageChain, Routing, Segment};
use crate::models::wire::{DeleteMessageRequest, SendMessageRequest};
use crate::transport::HttpTransport;

/// One bot instance: a streaming connection plus the REST calls that send
/// and recall messages. Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct BotAdapter {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    instance_id: Uuid,
    transport: HttpTransport,
    gateway: Gateway,
}

impl BotAdapter {
    pub fn new(config: Config) -> Self {
        let transport = HttpTransport::new(config.api_base.clone(), config.authorization())
            .with_timeout(config.request_timeout);
        let gateway = Gateway::new(&config, transport.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                instance_id: Uuid::new_v4(),
                transport,
                gateway,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn instance_id(&self) -> Uuid {
        self.inner.instance_id
    }

    pub fn transport(&self) -> &HttpTransport {
        &self.inner.transport
    }

    pub fn gateway(&self) -> &Gateway {
        &self.inner.gateway
    }

    pub fn is_alive(&self) -> bool {
        self.inner.gateway.session().is_alive()
    }

    pub fn session(&self) -> SessionSnapshot {
        self.inner.gateway.session().snapshot()
    }

    /// Keep the stream connected, reconnecting as needed, until [`close`]
    /// is called. Inbound events go to `handler`.
    ///
    /// [`close`]: BotAdapter::close
    pub async fn connect(&self, handler: EventHandler) {
        info!(
            appid = %self.inner.config.appid,
            instance = %self.inner.instance_id,
            "adapter starting"
        );
        self.inner.gateway.run(handler).await;
    }

    pub fn close(&self) {
        self.inner.gateway.close();
    }

    /// Routed chain for a proactive send. Group delivery unless only a user
    /// is known.
    pub fn build_active_chain(
        &self,
        segments: Vec<Segment>,
        user_id: &str,
        channel_id: &str,
    ) -> Result<MessageChain> {
        let routing = Routing::new(user_id, channel_id);
        if !routing.has_destination() {
            return Err(Error::Build(
                "active message needs a channel_id or a user_id".to_string(),
            ));
        }
        Ok(segments
            .into_iter()
            .fold(MessageChain::new(routing), MessageChain::push))
    }

    pub async fn build_message(&self, chain: &MessageChain) -> Result<SendMessageRequest> {
        builder::build_message(&self.inner.transport, chain).await
    }

    /// Build and send `chain`. Returns one callback per non-empty response.
    pub async fn send_chain_message(&self, chain: &MessageChain) -> Result<Vec<MessageCallback>> {
        let request = self.build_message(chain).await?;
        debug!(
            detail_type = ?request.detail_type,
            fragments = request.message.len(),
            "sending message"
        );

        let response = self.inner.transport.post("/send_message", &request).await?;
        Ok(response
            .into_iter()
            .map(|response| MessageCallback {
                adapter: self.clone(),
                response,
            })
            .collect())
    }

    pub async fn recall_message(&self, message_id: &str) -> Result<Option<Value>> {
        debug!(message_id, "recalling message");
        self.inner
            .transport
            .post("/delete_message", &DeleteMessageRequest { message_id })
            .await
    }
}

/// Result of a completed send. Keeps a handle to the adapter so the message
/// can be recalled later.
#[derive(Clone)]
pub struct MessageCallback {
    adapter: BotAdapter,
    response: Value,
}

impl MessageCallback {
    pub fn response(&self) -> &Value {
        &self.response
    }

    pub fn message_id(&self) -> Option<String> {
        response_message_id(&self.response)
    }

    /// Delete the sent message. `Ok(false)` if the response carried no
    /// message id to recall.
    pub async fn recall(&self) -> Result<bool> {
        let Some(message_id) = self.message_id() else {
            warn!("send response has no message id, nothing to recall");
            return Ok(false);
        };
        self.adapter.recall_message(&message_id).await?;
        Ok(true)
    }
}

impl std::fmt::Debug for MessageCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageCallback")
            .field("response", &self.response)
            .finish_non_exhaustive()
    }
}

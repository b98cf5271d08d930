use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Group,
    Private,
}

/// Where a chain is delivered. Empty strings mean "absent".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routing {
    pub message_type: MessageType,
    pub user_id: String,
    pub channel_id: String,
}

impl Routing {
    /// Group delivery when a channel is known, private delivery otherwise.
    pub fn new(user_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        let channel_id = channel_id.into();
        let message_type = if channel_id.is_empty() && !user_id.is_empty() {
            MessageType::Private
        } else {
            MessageType::Group
        };
        Self {
            message_type,
            user_id,
            channel_id,
        }
    }

    pub fn has_destination(&self) -> bool {
        !self.user_id.is_empty() || !self.channel_id.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    Bytes(Vec<u8>),
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mention {
    /// A single user; `None` targets the chain's own `user_id`.
    User(Option<String>),
    All,
}

/// Materializes rich content (e.g. a rendered snapshot) into image bytes.
/// Returning `None` means rendering failed.
pub trait RenderContent: Send + Sync {
    fn render(&self) -> BoxFuture<'_, Option<Vec<u8>>>;
}

impl<F, Fut> RenderContent for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Option<Vec<u8>>> + Send + 'static,
{
    fn render(&self) -> BoxFuture<'_, Option<Vec<u8>>> {
        Box::pin(self())
    }
}

#[derive(Clone)]
pub enum Segment {
    Text(String),
    Mention(Mention),
    Image(MediaSource),
    Voice(MediaSource),
    Rendered(Arc<dyn RenderContent>),
    /// Platform-specific fragment, sent exactly as given.
    Extension(serde_json::Value),
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Text(content) => f.debug_tuple("Text").field(content).finish(),
            Segment::Mention(target) => f.debug_tuple("Mention").field(target).finish(),
            Segment::Image(MediaSource::Bytes(b)) => write!(f, "Image(<{} bytes>)", b.len()),
            Segment::Image(MediaSource::Url(u)) => f.debug_tuple("Image").field(u).finish(),
            Segment::Voice(MediaSource::Bytes(b)) => write!(f, "Voice(<{} bytes>)", b.len()),
            Segment::Voice(MediaSource::Url(u)) => f.debug_tuple("Voice").field(u).finish(),
            Segment::Rendered(_) => f.write_str("Rendered(..)"),
            Segment::Extension(payload) => f.debug_tuple("Extension").field(payload).finish(),
        }
    }
}

/// Ordered message segments plus routing. Insertion order is rendering order.
#[derive(Debug, Clone)]
pub struct MessageChain {
    pub routing: Routing,
    segments: Vec<Segment>,
}

impl MessageChain {
    pub fn new(routing: Routing) -> Self {
        Self {
            routing,
            segments: Vec::new(),
        }
    }

    pub fn to(user_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self::new(Routing::new(user_id, channel_id))
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn into_segments(self) -> Vec<Segment> {
        self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn push(mut self, segment: Segment) -> Self {
        self.segments.push(segment);
        self
    }

    pub fn text(self, content: impl Into<String>) -> Self {
        self.push(Segment::Text(content.into()))
    }

    /// Mention a user, or the chain's own user when `target` is `None`.
    pub fn at(self, target: Option<String>) -> Self {
        self.push(Segment::Mention(Mention::User(target)))
    }

    pub fn at_all(self) -> Self {
        self.push(Segment::Mention(Mention::All))
    }

    pub fn image_bytes(self, bytes: impl Into<Vec<u8>>) -> Self {
        self.push(Segment::Image(MediaSource::Bytes(bytes.into())))
    }

    pub fn image_url(self, url: impl Into<String>) -> Self {
        self.push(Segment::Image(MediaSource::Url(url.into())))
    }

    pub fn voice(self, source: MediaSource) -> Self {
        self.push(Segment::Voice(source))
    }

    pub fn rendered(self, capability: impl RenderContent + 'static) -> Self {
        self.push(Segment::Rendered(Arc::new(capability)))
    }

    pub fn extend(self, payload: serde_json::Value) -> Self {
        self.push(Segment::Extension(payload))
    }
}

//! Turns a [`MessageChain`] into the platform's send-message body.
//!
//! Images (and rendered content) must be uploaded before they can be
//! referenced, so building is async. An upload that fails drops only its
//! own fragment; the rest of the message is still sent.

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::message::{MediaSource, Mention, MessageChain, Segment};
use crate::models::wire::{Fragment, SendMessageRequest, UploadRequest, UploadResponse};
use crate::transport::HttpTransport;

/// Build the full send request. Fails if the chain has no destination.
pub async fn build_message(
    transport: &HttpTransport,
    chain: &MessageChain,
) -> Result<SendMessageRequest> {
    if !chain.routing.has_destination() {
        return Err(Error::Build(
            "message chain needs a channel_id or a user_id".to_string(),
        ));
    }

    let message = build_fragments(transport, chain).await;

    Ok(SendMessageRequest {
        detail_type: chain.routing.message_type,
        user_id: chain.routing.user_id.clone(),
        group_id: chain.routing.channel_id.clone(),
        message,
    })
}

/// Map every segment, in order, to at most one fragment.
pub async fn build_fragments(transport: &HttpTransport, chain: &MessageChain) -> Vec<Fragment> {
    let mut fragments = Vec::with_capacity(chain.segments().len());

    for segment in chain.segments() {
        let fragment = match segment {
            Segment::Mention(Mention::User(target)) => {
                let user_id = target.as_deref().unwrap_or(&chain.routing.user_id);
                Some(Fragment::mention(user_id))
            }
            Segment::Mention(Mention::All) => Some(Fragment::mention_all()),
            Segment::Text(content) => Some(Fragment::text(content)),
            Segment::Image(source) => append_image(transport, source).await,
            Segment::Rendered(capability) => match capability.render().await {
                Some(bytes) => append_image(transport, &MediaSource::Bytes(bytes)).await,
                None => {
                    warn!("rendered content produced no image, segment dropped");
                    None
                }
            },
            Segment::Extension(payload) => Some(Fragment::Raw(payload.clone())),
            Segment::Voice(_) => {
                debug!("voice segments are not supported on this platform, skipped");
                None
            }
        };

        if let Some(fragment) = fragment {
            fragments.push(fragment);
        }
    }

    fragments
}

/// Upload an image and return a fragment referencing it, or `None` if the
/// source is unusable or the upload fails.
pub async fn append_image(transport: &HttpTransport, source: &MediaSource) -> Option<Fragment> {
    let request = match source {
        MediaSource::Bytes(bytes) => UploadRequest::from_bytes(bytes),
        MediaSource::Url(url) if is_valid_url(url) => UploadRequest::Url { url: url.clone() },
        MediaSource::Url(url) => {
            debug!(url = %url, "image url is not valid, segment dropped");
            return None;
        }
    };

    match upload_file(transport, &request).await {
        Ok(Some(file_id)) => Some(Fragment::image(&file_id)),
        Ok(None) => {
            warn!("upload_file returned no file id, image dropped");
            None
        }
        Err(e) => {
            warn!(error = %e, "image upload failed, image dropped");
            None
        }
    }
}

async fn upload_file(transport: &HttpTransport, request: &UploadRequest) -> Result<Option<String>> {
    let Some(body) = transport.post("/upload_file", request).await? else {
        return Ok(None);
    };
    let response: UploadResponse = serde_json::from_value(body)?;
    Ok(Some(response.data.file_id))
}

/// Absolute http(s) URL with a host.
pub fn is_valid_url(candidate: &str) -> bool {
    match url::Url::parse(candidate) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https") && parsed.has_host(),
        Err(_) => false,
    }
}

/// Message id from a send response (`{"data": {"message_id": ..}}`).
pub fn response_message_id(response: &Value) -> Option<String> {
    match response.get("data")?.get("message_id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

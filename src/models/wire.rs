use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::message::MessageType;

/// One piece of an outbound message in the platform's wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Fragment {
    Typed {
        #[serde(rename = "type")]
        kind: String,
        data: Value,
    },
    /// Passed through verbatim from an extension segment.
    Raw(Value),
}

impl Fragment {
    pub fn typed(kind: &str, data: Value) -> Self {
        Fragment::Typed {
            kind: kind.to_string(),
            data,
        }
    }

    pub fn mention(user_id: &str) -> Self {
        Self::typed("mention", json!({ "user_id": user_id }))
    }

    pub fn mention_all() -> Self {
        Self::typed("mention_all", json!({}))
    }

    pub fn text(content: &str) -> Self {
        Self::typed("text", json!({ "text": content }))
    }

    pub fn image(file_id: &str) -> Self {
        Self::typed("image", json!({ "file_id": file_id }))
    }

    pub fn kind(&self) -> Option<&str> {
        match self {
            Fragment::Typed { kind, .. } => Some(kind),
            Fragment::Raw(value) => value.get("type").and_then(Value::as_str),
        }
    }
}

/// Body of the send-message call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub detail_type: MessageType,
    pub user_id: String,
    pub group_id: String,
    pub message: Vec<Fragment>,
}

/// Body of `upload_file`: inline base64 data or a URL reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UploadRequest {
    Data { data: String },
    Url { url: String },
}

impl UploadRequest {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        UploadRequest::Data {
            data: format!("base64://{}", data_encoding::BASE64.encode(bytes)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    pub data: UploadedFile,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadedFile {
    pub file_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteMessageRequest<'a> {
    pub message_id: &'a str,
}

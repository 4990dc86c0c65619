//! Peer connection protocol
//!
//! Every frame is a JSON object with a `type` discriminator. Peers send
//! `register`, `heartbeat` and `taskResult`; the hub answers with `task`,
//! `info` and `error`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::dispatch::Attachment;
use crate::registry::PeerMeta;

/// Inbound `type` values the hub understands
pub const INBOUND_TYPES: [&str; 3] = ["register", "heartbeat", "taskResult"];

// ─────────────────────────────────────────────────────────────────
// Peer → Hub
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InboundMessage {
    Register(RegisterMessage),
    Heartbeat(HeartbeatMessage),
    TaskResult(TaskResultMessage),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterMessage {
    pub peer_id: String,
    #[serde(default)]
    pub meta: PeerMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatMessage {
    pub peer_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResultMessage {
    pub peer_id: String,
    pub task_id: String,
    #[serde(default)]
    pub result: Value,
}

// ─────────────────────────────────────────────────────────────────
// Hub → Peer
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundMessage {
    #[serde(rename_all = "camelCase")]
    Task {
        task_id: String,
        task: Value,
        file: Option<FileAttachment>,
    },
    Info {
        message: String,
    },
    Error {
        message: String,
    },
}

impl OutboundMessage {
    pub fn info(message: impl Into<String>) -> Self {
        OutboundMessage::Info {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        OutboundMessage::Error {
            message: message.into(),
        }
    }
}

/// Attachment as it travels to a peer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileAttachment {
    pub name: String,
    pub mime: String,
    pub size: usize,
    pub data_base64: String,
}

impl From<&Attachment> for FileAttachment {
    fn from(attachment: &Attachment) -> Self {
        Self {
            name: attachment.name.clone(),
            mime: attachment.mime.clone(),
            size: attachment.data.len(),
            data_base64: STANDARD.encode(&attachment.data),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Parsing
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("message has no type")]
    MissingType,

    #[error("unsupported message type: {0}")]
    UnsupportedType(String),

    #[error("invalid {kind} message: {reason}")]
    InvalidFields { kind: String, reason: String },
}

/// Parse one inbound text frame.
///
/// Unknown types are reported separately from known types with bad fields so
/// the peer gets a useful error back.
pub fn parse_inbound(text: &str) -> Result<InboundMessage, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let kind = match value.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        Some(other) => return Err(ProtocolError::UnsupportedType(other.to_string())),
        None => return Err(ProtocolError::MissingType),
    };

    if !INBOUND_TYPES.contains(&kind.as_str()) {
        return Err(ProtocolError::UnsupportedType(kind));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidFields {
        kind,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_register() {
        let text = json!({
            "type": "register",
            "peerId": "gpu-1",
            "meta": {"name": "Basement rig", "lat": 48.2, "lon": 16.37, "tags": ["cuda"]}
        })
        .to_string();

        match parse_inbound(&text).unwrap() {
            InboundMessage::Register(msg) => {
                assert_eq!(msg.peer_id, "gpu-1");
                assert_eq!(msg.meta.name.as_deref(), Some("Basement rig"));
                assert_eq!(msg.meta.tags, vec!["cuda".to_string()]);
                assert_eq!(msg.meta.coordinates(), Some((48.2, 16.37)));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_register_without_meta() {
        let text = r#"{"type":"register","peerId":"p"}"#;
        match parse_inbound(text).unwrap() {
            InboundMessage::Register(msg) => assert_eq!(msg.meta, PeerMeta::default()),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_task_result() {
        let text = r#"{"type":"taskResult","peerId":"p","taskId":"t","result":{"label":"cat"}}"#;
        match parse_inbound(text).unwrap() {
            InboundMessage::TaskResult(msg) => {
                assert_eq!(msg.task_id, "t");
                assert_eq!(msg.result["label"], "cat");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            parse_inbound("{not json"),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_unknown_type() {
        assert_eq!(
            parse_inbound(r#"{"type":"shutdown","peerId":"p"}"#),
            Err(ProtocolError::UnsupportedType("shutdown".to_string()))
        );
        assert_eq!(
            parse_inbound(r#"{"peerId":"p"}"#),
            Err(ProtocolError::MissingType)
        );
    }

    #[test]
    fn test_known_type_missing_fields() {
        let err = parse_inbound(r#"{"type":"heartbeat"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidFields { ref kind, .. } if kind == "heartbeat"));
    }

    #[test]
    fn test_task_message_shape() {
        let attachment = Attachment {
            name: "cat.png".to_string(),
            mime: "image/png".to_string(),
            data: vec![1, 2, 3],
        };
        let msg = OutboundMessage::Task {
            task_id: "t-1".to_string(),
            task: json!({"model": "resnet50"}),
            file: Some(FileAttachment::from(&attachment)),
        };
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["type"], "task");
        assert_eq!(value["taskId"], "t-1");
        assert_eq!(value["task"]["model"], "resnet50");
        assert_eq!(value["file"]["size"], 3);
        assert_eq!(value["file"]["dataBase64"], "AQID");
    }

    #[test]
    fn test_task_message_without_file() {
        let msg = OutboundMessage::Task {
            task_id: "t-2".to_string(),
            task: json!("echo"),
            file: None,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert!(value["file"].is_null());
    }

    #[test]
    fn test_info_and_error_shapes() {
        let info = serde_json::to_value(OutboundMessage::info("hello")).unwrap();
        assert_eq!(info, json!({"type": "info", "message": "hello"}));

        let error = serde_json::to_value(OutboundMessage::error("nope")).unwrap();
        assert_eq!(error, json!({"type": "error", "message": "nope"}));
    }
}

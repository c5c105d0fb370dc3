//! Message Codec (component D): the wire discriminated union and its
//! self-describing text (de)serialization.
//!
//! Unknown top-level fields are ignored on decode (serde's default
//! struct-field behaviour). An unknown `type` decodes to `Err` at the call
//! site, which the transport logs at debug level rather than propagating as
//! a disconnect.

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSummary {
    pub name: String,
    pub windows: u32,
    pub attached: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    // ---- Outbound (agent -> relay) ----
    #[serde(rename = "register")]
    Register {
        #[serde(rename = "machineId")]
        machine_id: String,
        label: String,
        token: String,
        role: String,
    },
    #[serde(rename = "screen")]
    Screen {
        #[serde(rename = "sessionName")]
        session_name: String,
        screen: String,
    },
    #[serde(rename = "screenGz")]
    ScreenGz {
        #[serde(rename = "sessionName")]
        session_name: String,
        screen: String,
    },
    #[serde(rename = "sessions")]
    Sessions { sessions: Vec<SessionSummary> },
    #[serde(rename = "file_view")]
    FileView {
        filename: String,
        content: String,
        #[serde(rename = "contentType")]
        content_type: String,
        path: String,
    },
    #[serde(rename = "uploadComplete")]
    UploadComplete {
        filename: String,
        path: String,
        size: u64,
    },
    #[serde(rename = "uploadError")]
    UploadError { filename: String, error: String },

    // ---- Inbound (relay -> agent) ----
    #[serde(rename = "keys")]
    Keys {
        #[serde(rename = "sessionName")]
        session_name: String,
        keys: String,
        #[serde(default)]
        enter: bool,
    },
    #[serde(rename = "resize")]
    Resize {
        #[serde(rename = "sessionName")]
        session_name: String,
        cols: u32,
        rows: u32,
    },
    #[serde(rename = "createSession")]
    CreateSession {
        #[serde(rename = "sessionName")]
        session_name: String,
        #[serde(rename = "workDir", default)]
        work_dir: Option<String>,
    },
    #[serde(rename = "killSession")]
    KillSession {
        #[serde(rename = "sessionName")]
        session_name: String,
    },
    #[serde(rename = "requestFileView")]
    RequestFileView {
        #[serde(rename = "sessionName")]
        session_name: String,
        path: String,
    },
    #[serde(rename = "uploadFile")]
    UploadFile {
        #[serde(rename = "sessionName")]
        session_name: String,
        filename: String,
        content: String,
        #[serde(rename = "chunkIndex")]
        chunk_index: u32,
        #[serde(rename = "totalChunks")]
        total_chunks: u32,
    },
    #[serde(rename = "error")]
    Error { code: String, message: String },
    #[serde(rename = "ping")]
    Ping {},
    #[serde(rename = "pong")]
    Pong {},
}

impl Message {
    pub fn type_tag(&self) -> &'static str {
        match self {
            Message::Register { .. } => "register",
            Message::Screen { .. } => "screen",
            Message::ScreenGz { .. } => "screenGz",
            Message::Sessions { .. } => "sessions",
            Message::FileView { .. } => "file_view",
            Message::UploadComplete { .. } => "uploadComplete",
            Message::UploadError { .. } => "uploadError",
            Message::Keys { .. } => "keys",
            Message::Resize { .. } => "resize",
            Message::CreateSession { .. } => "createSession",
            Message::KillSession { .. } => "killSession",
            Message::RequestFileView { .. } => "requestFileView",
            Message::UploadFile { .. } => "uploadFile",
            Message::Error { .. } => "error",
            Message::Ping {} => "ping",
            Message::Pong {} => "pong",
        }
    }
}

/// Encode a message to its wire text representation.
pub fn encode(message: &Message) -> Result<String> {
    serde_json::to_string(message).map_err(|e| AgentError::Encode(e.to_string()))
}

/// Decode a wire text frame. An unrecognized `type` or malformed JSON both
/// surface as `AgentError::Decode` — callers log and drop, never disconnect.
pub fn decode(text: &str) -> Result<Message> {
    serde_json::from_str(text).map_err(|e| AgentError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(m: Message) {
        let encoded = encode(&m).unwrap();
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.type_tag(), m.type_tag());
    }

    #[test]
    fn register_round_trips() {
        round_trip(Message::Register {
            machine_id: "m1".into(),
            label: "host".into(),
            token: "t".into(),
            role: "host".into(),
        });
    }

    #[test]
    fn keys_missing_enter_defaults_false() {
        let decoded = decode(r#"{"type":"keys","sessionName":"s1","keys":"ls"}"#).unwrap();
        match decoded {
            Message::Keys { enter, session_name, keys, .. } => {
                assert!(!enter);
                assert_eq!(session_name, "s1");
                assert_eq!(keys, "ls");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn keys_with_enter_true() {
        let decoded =
            decode(r#"{"type":"keys","sessionName":"s1","keys":"ls","enter":true}"#).unwrap();
        match decoded {
            Message::Keys { enter, .. } => assert!(enter),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_top_level_fields_are_ignored() {
        let decoded = decode(r#"{"type":"ping","bogus":123}"#).unwrap();
        assert_eq!(decoded.type_tag(), "ping");
    }

    #[test]
    fn unknown_type_is_a_decode_error_not_a_panic() {
        let result = decode(r#"{"type":"not-a-real-type"}"#);
        assert!(matches!(result, Err(AgentError::Decode(_))));
    }

    #[test]
    fn resize_round_trips_with_equal_fields() {
        round_trip(Message::Resize {
            session_name: "s1".into(),
            cols: 80,
            rows: 24,
        });
        let decoded = decode(r#"{"type":"resize","sessionName":"s1","cols":100,"rows":40}"#).unwrap();
        match decoded {
            Message::Resize { session_name, cols, rows } => {
                assert_eq!(session_name, "s1");
                assert_eq!(cols, 100);
                assert_eq!(rows, 40);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn screen_gz_payload_round_trips() {
        round_trip(Message::ScreenGz {
            session_name: "s1".into(),
            screen: "base64data".into(),
        });
    }
}

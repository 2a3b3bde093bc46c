use crate::generation::GenerationParams;
use serde::{Deserialize, Serialize};

/// Frames pushed to the attached viewer. Every job ends with exactly
/// one of `complete`, `error` or `canceled`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Connected,
    Started { job_id: String },
    Chunk { seq: u64, content: String },
    Complete { job_id: String },
    Error { code: String, message: String },
    Canceled { job_id: String },
    Pong,
}

impl ServerFrame {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServerFrame::Complete { .. } | ServerFrame::Error { .. } | ServerFrame::Canceled { .. }
        )
    }
}

/// Frames accepted from the client. `authorize` must come first and
/// carries the one-time stream ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Authorize {
        ticket: String,
    },
    Generate(GenerationParams),
    Resume {
        job_id: String,
        #[serde(default)]
        last_seq: u64,
    },
    Cancel {
        job_id: String,
    },
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_serialize_with_type_tags() {
        let frame = ServerFrame::Chunk {
            seq: 3,
            content: "hello".to_string(),
        };
        let raw = serde_json::to_string(&frame).unwrap();
        assert!(raw.contains(r#""type":"chunk""#));
        assert!(raw.contains(r#""seq":3"#));

        let parsed: ClientFrame =
            serde_json::from_str(r#"{"type":"resume","job_id":"j-1","last_seq":4}"#).unwrap();
        match parsed {
            ClientFrame::Resume { job_id, last_seq } => {
                assert_eq!(job_id, "j-1");
                assert_eq!(last_seq, 4);
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn terminal_classification() {
        assert!(ServerFrame::Complete {
            job_id: "j".to_string()
        }
        .is_terminal());
        assert!(!ServerFrame::Pong.is_terminal());
    }
}

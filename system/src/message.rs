use crate::document::DEFAULT_LANGUAGE;
use crate::operation::OperationKind;
use crate::types::{ParticipantId, ParticipantInfo};
use serde::{Deserialize, Serialize};

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_owned()
}

/// First frame a connection must send before it is admitted.
#[derive(Debug, Default, Deserialize)]
pub struct JoinRequest {
    #[serde(default)]
    pub name: Option<String>,
}

/// Participant → hub.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Operation {
        #[serde(default)]
        op_type: OperationKind,
        #[serde(default)]
        position: i64,
        #[serde(default)]
        content: String,
        #[serde(default)]
        length: i64,
        #[serde(default)]
        revision: Option<u64>,
    },
    Cursor {
        #[serde(default)]
        position: i64,
        #[serde(default)]
        line: i64,
        #[serde(default)]
        column: i64,
    },
    Language {
        #[serde(default = "default_language")]
        language: String,
    },
    Chat {
        #[serde(default)]
        message: String,
    },
    Execute {
        #[serde(default)]
        code: String,
        #[serde(default = "default_language")]
        language: String,
        #[serde(default)]
        stdin: String,
    },
    Ping,
    #[serde(other)]
    Unknown,
}

/// Hub → participant.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Init {
        user_id: ParticipantId,
        user_name: String,
        user_color: String,
        code: String,
        language: String,
        revision: u64,
        users: Vec<ParticipantInfo>,
    },
    UserJoined {
        user: ParticipantInfo,
        users: Vec<ParticipantInfo>,
    },
    UserLeft {
        user_id: ParticipantId,
        user_name: String,
        users: Vec<ParticipantInfo>,
    },
    Operation {
        op_type: OperationKind,
        position: i64,
        content: String,
        length: i64,
        user_id: ParticipantId,
        user_name: String,
        user_color: String,
        revision: u64,
        code: String,
    },
    Cursor {
        user_id: ParticipantId,
        user_name: String,
        user_color: String,
        position: i64,
        line: i64,
        column: i64,
    },
    Language {
        language: String,
        user_id: ParticipantId,
        user_name: String,
    },
    Chat {
        user_id: ParticipantId,
        user_name: String,
        user_color: String,
        message: String,
        timestamp: f64,
    },
    ExecutionResult {
        user_id: ParticipantId,
        user_name: String,
        user_color: String,
        #[serde(flatten)]
        result: ExecutionResponse,
    },
    Pong,
}

/// Input of one run of the execution collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub code: String,
    pub language: String,
    #[serde(default)]
    pub stdin: String,
}

/// Outcome of one run. Every failure mode is encoded here with
/// `succeeded == false` and a readable `stderr`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResponse {
    #[serde(rename = "success")]
    pub succeeded: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    #[serde(rename = "execution_time")]
    pub elapsed_seconds: f64,
}

impl ExecutionResponse {
    pub fn failure(stderr: impl Into<String>, elapsed_seconds: f64) -> Self {
        Self {
            succeeded: false,
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: -1,
            elapsed_seconds,
        }
    }
}

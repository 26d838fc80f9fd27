//! Blockpost wire vocabulary: operations, directions, data types, status codes, message metadata.

use serde::{Deserialize, Serialize};

/// Operation carried in every message. Only LOGIN, SAVE and UPLOAD have defined flows;
/// the rest are reserved names the peer may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Save,
    Delete,
    Get,
    Upload,
    Download,
    Bye,
    Login,
    Error,
}

/// Whether a message is a request from the client or a response from the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Request,
    Response,
}

/// Message category (`type` on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    File,
    Data,
    Auth,
}

/// Response status. Values outside 100..=599 are rejected when decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u16")]
pub struct StatusCode(u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200);

    pub fn new(code: u16) -> Result<Self, InvalidStatus> {
        if (100..=599).contains(&code) {
            Ok(StatusCode(code))
        } else {
            Err(InvalidStatus(code as i64))
        }
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }

    pub fn is_ok(self) -> bool {
        self == Self::OK
    }
}

impl TryFrom<i64> for StatusCode {
    type Error = InvalidStatus;

    fn try_from(v: i64) -> Result<Self, Self::Error> {
        u16::try_from(v)
            .map_err(|_| InvalidStatus(v))
            .and_then(StatusCode::new)
    }
}

impl From<StatusCode> for u16 {
    fn from(s: StatusCode) -> u16 {
        s.0
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("status code {0} out of range")]
pub struct InvalidStatus(pub i64);

/// Message metadata: the JSON object in front of every frame.
/// Absent optional fields are omitted on the wire; unknown keys from the peer are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub operation: Operation,
    pub direction: Direction,
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_block: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_msg: Option<String>,
}

impl Message {
    fn bare(data_type: DataType, operation: Operation, direction: Direction) -> Self {
        Self {
            operation,
            direction,
            data_type,
            username: None,
            password: None,
            token: None,
            key: None,
            size: None,
            total_block: None,
            block_size: None,
            block_index: None,
            md5: None,
            status: None,
            status_msg: None,
        }
    }

    /// Empty request of the given type and operation.
    pub fn request(data_type: DataType, operation: Operation) -> Self {
        Self::bare(data_type, operation, Direction::Request)
    }

    /// Response with a status; `status_msg` is left for the caller.
    pub fn response(data_type: DataType, operation: Operation, status: StatusCode) -> Self {
        let mut m = Self::bare(data_type, operation, Direction::Response);
        m.status = Some(status);
        m
    }

    /// LOGIN/AUTH request.
    pub fn login(username: &str, password: &str) -> Self {
        let mut m = Self::request(DataType::Auth, Operation::Login);
        m.username = Some(username.to_string());
        m.password = Some(password.to_string());
        m
    }

    /// SAVE/FILE request proposing a key for a file of `size` bytes.
    pub fn save(token: &str, key: &str, size: u64) -> Self {
        let mut m = Self::request(DataType::File, Operation::Save);
        m.token = Some(token.to_string());
        m.key = Some(key.to_string());
        m.size = Some(size);
        m
    }

    /// UPLOAD/FILE request for one block; the block bytes travel as the frame payload.
    pub fn upload(token: &str, key: &str, size: u64, block_index: u64) -> Self {
        let mut m = Self::request(DataType::File, Operation::Upload);
        m.token = Some(token.to_string());
        m.key = Some(key.to_string());
        m.size = Some(size);
        m.block_index = Some(block_index);
        m
    }

    /// True when this is a RESPONSE to an `operation` request.
    pub fn answers(&self, operation: Operation) -> bool {
        self.direction == Direction::Response && self.operation == operation
    }

    /// Status of a response. A response without a status is treated as a server error.
    pub fn status_or_error(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode(500))
    }

    /// `status_msg`, or an empty string when the peer sent none.
    pub fn status_message(&self) -> &str {
        self.status_msg.as_deref().unwrap_or("")
    }
}

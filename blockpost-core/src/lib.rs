//! Blockpost protocol reference implementation.
//! Host-driven: no I/O; host performs socket and file reads and feeds responses in.

pub mod auth;
pub mod chunk;
pub mod integrity;
pub mod protocol;
pub mod upload;
pub mod wire;

pub use auth::{AuthError, Token};
pub use chunk::{BlockRange, UploadPlan};
pub use integrity::DigestAlgorithm;
pub use protocol::{DataType, Direction, Message, Operation, StatusCode};
pub use upload::{BlockAck, TransferStats, UploadController, UploadError, UploadEvent, UploadState};
pub use wire::{decode_frame, encode_frame, Frame, FrameDecodeError, FrameEncodeError};

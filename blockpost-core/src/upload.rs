//! Chunked upload controller. Host-driven: the host performs I/O and feeds responses in;
//! the controller builds requests and tracks `Idle -> PlanRequested -> Uploading -> Verifying -> Completed | Failed`.

use std::path::Path;
use std::time::Duration;

use crate::auth::Token;
use crate::chunk::{BlockRange, PlanError, UploadPlan};
use crate::integrity::digests_match;
use crate::protocol::{Direction, Message, Operation, StatusCode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    PlanRequested,
    Uploading {
        plan: UploadPlan,
        block_index: u64,
        /// A block request was built and its acknowledgement has not arrived yet.
        awaiting_ack: bool,
    },
    Verifying {
        plan: UploadPlan,
        remote_digest: String,
    },
    Completed,
    Failed,
}

/// Outcome of an acknowledged block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockAck {
    /// Send block `block_index` next.
    Next { block_index: u64 },
    /// Final block acknowledged; verify against `remote_digest`.
    Final { remote_digest: String },
}

/// Drives one upload. A new controller (and a new SAVE) is needed per file.
pub struct UploadController {
    token: Token,
    proposed_key: String,
    file_size: u64,
    bytes_sent: u64,
    state: UploadState,
}

impl UploadController {
    pub fn new(token: Token, proposed_key: impl Into<String>, file_size: u64) -> Self {
        Self {
            token,
            proposed_key: proposed_key.into(),
            file_size,
            bytes_sent: 0,
            state: UploadState::Idle,
        }
    }

    /// Candidate storage key for a path: file name plus extension.
    pub fn key_for_path(path: &Path) -> Option<String> {
        path.file_name().map(|n| n.to_string_lossy().into_owned())
    }

    pub fn state(&self) -> &UploadState {
        &self.state
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Block the host should read and send next.
    pub fn next_block(&self) -> Option<BlockRange> {
        match &self.state {
            UploadState::Uploading {
                plan,
                block_index,
                awaiting_ack: false,
            } => plan.block(*block_index, self.file_size),
            _ => None,
        }
    }

    /// Idle -> PlanRequested: SAVE request proposing our key and size.
    pub fn plan_request(&mut self) -> Result<Message, UploadError> {
        if self.state != UploadState::Idle {
            return self.fail(UploadError::InvalidState("plan already requested"));
        }
        if self.file_size == 0 {
            return self.fail(UploadError::EmptyFile);
        }
        self.state = UploadState::PlanRequested;
        Ok(Message::save(
            self.token.as_str(),
            &self.proposed_key,
            self.file_size,
        ))
    }

    /// PlanRequested -> Uploading on 200, Failed otherwise. The peer's key, block size and
    /// block count are authoritative.
    pub fn on_plan_response(&mut self, response: &Message) -> Result<UploadPlan, UploadError> {
        if self.state != UploadState::PlanRequested {
            return self.fail(UploadError::InvalidState("no plan requested"));
        }
        if !response.answers(Operation::Save) {
            return self.fail(UploadError::unexpected(Stage::Save, response));
        }
        let status = response.status_or_error();
        if !status.is_ok() {
            return self.fail(UploadError::Rejected {
                stage: Stage::Save,
                status,
                message: response.status_message().to_string(),
            });
        }
        let plan = match UploadPlan::from_response(response, self.file_size) {
            Ok(p) => p,
            Err(e) => return self.fail(e.into()),
        };
        self.state = UploadState::Uploading {
            plan: plan.clone(),
            block_index: 0,
            awaiting_ack: false,
        };
        Ok(plan)
    }

    /// UPLOAD request for the current block, carrying `data_len` bytes of payload.
    /// Every block but the last must be exactly `block_size`; a zero-length read before the
    /// last block means the file is shorter than declared.
    pub fn block_request(&mut self, data_len: u64) -> Result<Message, UploadError> {
        let (plan, block_index) = match &self.state {
            UploadState::Uploading {
                plan,
                block_index,
                awaiting_ack: false,
            } => (plan.clone(), *block_index),
            UploadState::Uploading { .. } => {
                return self.fail(UploadError::InvalidState("previous block not acknowledged"))
            }
            _ => return self.fail(UploadError::InvalidState("not uploading")),
        };
        if data_len == 0 {
            return self.fail(UploadError::ShortRead {
                block_index,
                total_blocks: plan.total_blocks,
            });
        }
        if data_len > plan.block_size {
            return self.fail(UploadError::InvalidState("block larger than plan block size"));
        }
        let sent = self.bytes_sent + data_len;
        if plan.is_last(block_index) {
            if sent != self.file_size {
                return self.fail(UploadError::SizeMismatch {
                    declared: self.file_size,
                    sent,
                });
            }
        } else if data_len != plan.block_size {
            return self.fail(UploadError::ShortRead {
                block_index,
                total_blocks: plan.total_blocks,
            });
        }
        self.bytes_sent = sent;
        self.state = UploadState::Uploading {
            plan: plan.clone(),
            block_index,
            awaiting_ack: true,
        };
        Ok(Message::upload(
            self.token.as_str(),
            &plan.key,
            data_len,
            block_index,
        ))
    }

    /// Acknowledgement for the in-flight block. Non-200 fails the upload; the last 200 moves to Verifying.
    pub fn on_block_response(&mut self, response: &Message) -> Result<BlockAck, UploadError> {
        let (plan, block_index) = match &self.state {
            UploadState::Uploading {
                plan,
                block_index,
                awaiting_ack: true,
            } => (plan.clone(), *block_index),
            _ => return self.fail(UploadError::InvalidState("no block in flight")),
        };
        if !response.answers(Operation::Upload) {
            return self.fail(UploadError::unexpected(
                Stage::Upload { block_index },
                response,
            ));
        }
        let status = response.status_or_error();
        if !status.is_ok() {
            return self.fail(UploadError::Rejected {
                stage: Stage::Upload { block_index },
                status,
                message: response.status_message().to_string(),
            });
        }
        if !plan.is_last(block_index) {
            let next = block_index + 1;
            self.state = UploadState::Uploading {
                plan,
                block_index: next,
                awaiting_ack: false,
            };
            return Ok(BlockAck::Next { block_index: next });
        }
        let remote_digest = match &response.md5 {
            Some(d) => d.clone(),
            None => return self.fail(UploadError::MissingDigest),
        };
        self.state = UploadState::Verifying {
            plan,
            remote_digest: remote_digest.clone(),
        };
        Ok(BlockAck::Final { remote_digest })
    }

    /// Verifying -> Completed when `local_digest` equals the peer's digest, Failed otherwise.
    pub fn verify(&mut self, local_digest: &str) -> Result<(), UploadError> {
        let remote = match &self.state {
            UploadState::Verifying { remote_digest, .. } => remote_digest.clone(),
            _ => return self.fail(UploadError::InvalidState("not verifying")),
        };
        if !digests_match(local_digest, &remote) {
            return self.fail(UploadError::IntegrityMismatch {
                local: local_digest.to_string(),
                remote,
            });
        }
        self.state = UploadState::Completed;
        Ok(())
    }

    /// Abandon the upload (transport failure or cancellation). The peer's partial state is undefined.
    pub fn abort(&mut self) {
        if self.state != UploadState::Completed {
            self.state = UploadState::Failed;
        }
    }

    fn fail<T>(&mut self, err: UploadError) -> Result<T, UploadError> {
        self.state = UploadState::Failed;
        Err(err)
    }
}

/// Which request a rejection answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Save,
    Upload { block_index: u64 },
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Save => f.write_str("SAVE"),
            Stage::Upload { block_index } => write!(f, "UPLOAD block {}", block_index),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("{stage} rejected: status {status}: {message}")]
    Rejected {
        stage: Stage,
        status: StatusCode,
        message: String,
    },
    #[error("invalid upload plan: {0}")]
    InvalidPlan(#[from] PlanError),
    #[error("file ended early at block {block_index} of {total_blocks}")]
    ShortRead { block_index: u64, total_blocks: u64 },
    #[error("declared size {declared} but sent {sent} bytes")]
    SizeMismatch { declared: u64, sent: u64 },
    #[error("final acknowledgement carried no digest")]
    MissingDigest,
    #[error("integrity mismatch: local {local}, peer {remote}")]
    IntegrityMismatch { local: String, remote: String },
    #[error("invalid upload state: {0}")]
    InvalidState(&'static str),
    #[error("file is empty; nothing to upload")]
    EmptyFile,
    #[error("expected a response to {stage}, got {operation:?} {direction:?}")]
    UnexpectedResponse {
        stage: Stage,
        operation: Operation,
        direction: Direction,
    },
}

impl UploadError {
    fn unexpected(stage: Stage, response: &Message) -> Self {
        UploadError::UnexpectedResponse {
            stage,
            operation: response.operation,
            direction: response.direction,
        }
    }
}

/// Throughput of a completed upload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferStats {
    pub bytes: u64,
    pub elapsed: Duration,
}

impl TransferStats {
    pub fn bytes_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.bytes as f64 / secs
    }

    pub fn mib_per_sec(&self) -> f64 {
        self.bytes_per_sec() / 1_048_576.0
    }
}

/// Progress events for the host to render.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    PlanAccepted(UploadPlan),
    BlockAcknowledged {
        index: u64,
        total_blocks: u64,
        bytes: u64,
    },
    Completed(TransferStats),
    Failed {
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DataType;

    fn ok_plan(key: &str, block_size: u64, total: u64) -> Message {
        let mut r = Message::response(DataType::File, Operation::Save, StatusCode::OK);
        r.key = Some(key.into());
        r.block_size = Some(block_size);
        r.total_block = Some(total);
        r
    }

    fn ack(md5: Option<&str>) -> Message {
        let mut r = Message::response(DataType::File, Operation::Upload, StatusCode::OK);
        r.md5 = md5.map(str::to_string);
        r
    }

    fn err(status: u16, msg: &str) -> Message {
        let mut r = Message::response(
            DataType::File,
            Operation::Upload,
            StatusCode::new(status).unwrap(),
        );
        r.status_msg = Some(msg.into());
        r
    }

    fn controller(size: u64) -> UploadController {
        UploadController::new(Token::new("tok"), "data.bin", size)
    }

    #[test]
    fn key_from_path() {
        assert_eq!(
            UploadController::key_for_path(Path::new("/tmp/dir/report.final.pdf")).as_deref(),
            Some("report.final.pdf")
        );
        assert!(UploadController::key_for_path(Path::new("/")).is_none());
    }

    #[test]
    fn full_upload_two_blocks() {
        let mut c = controller(16);
        let save = c.plan_request().unwrap();
        assert_eq!(save.operation, Operation::Save);
        assert_eq!(save.size, Some(16));
        assert_eq!(save.key.as_deref(), Some("data.bin"));
        assert_eq!(c.state(), &UploadState::PlanRequested);

        let plan = c.on_plan_response(&ok_plan("data(1).bin", 8, 2)).unwrap();
        assert_eq!(plan.key, "data(1).bin");
        assert_eq!(c.next_block().unwrap().index, 0);

        let m0 = c.block_request(8).unwrap();
        assert_eq!(m0.block_index, Some(0));
        assert_eq!(m0.key.as_deref(), Some("data(1).bin"));
        assert_eq!(m0.token.as_deref(), Some("tok"));
        assert!(c.next_block().is_none());
        assert_eq!(c.on_block_response(&ack(None)).unwrap(), BlockAck::Next { block_index: 1 });

        let m1 = c.block_request(8).unwrap();
        assert_eq!(m1.block_index, Some(1));
        assert_eq!(m1.size, Some(8));
        let fin = c.on_block_response(&ack(Some("abc"))).unwrap();
        assert_eq!(fin, BlockAck::Final { remote_digest: "abc".into() });
        assert!(matches!(c.state(), UploadState::Verifying { .. }));

        c.verify("abc").unwrap();
        assert_eq!(c.state(), &UploadState::Completed);
        assert_eq!(c.bytes_sent(), 16);
    }

    #[test]
    fn short_final_block() {
        let mut c = controller(9);
        c.plan_request().unwrap();
        c.on_plan_response(&ok_plan("data.bin", 8, 2)).unwrap();
        c.block_request(8).unwrap();
        c.on_block_response(&ack(None)).unwrap();
        let last = c.block_request(1).unwrap();
        assert_eq!(last.size, Some(1));
        assert!(matches!(
            c.on_block_response(&ack(Some("d"))),
            Ok(BlockAck::Final { .. })
        ));
    }

    #[test]
    fn save_rejected() {
        let mut c = controller(9);
        c.plan_request().unwrap();
        let mut r = Message::response(
            DataType::File,
            Operation::Save,
            StatusCode::new(403).unwrap(),
        );
        r.status_msg = Some("quota".into());
        match c.on_plan_response(&r) {
            Err(UploadError::Rejected { stage, status, message }) => {
                assert_eq!(stage, Stage::Save);
                assert_eq!(status.as_u16(), 403);
                assert_eq!(message, "quota");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(c.state(), &UploadState::Failed);
    }

    #[test]
    fn block_rejected_stops_upload() {
        let mut c = controller(24);
        c.plan_request().unwrap();
        c.on_plan_response(&ok_plan("data.bin", 8, 3)).unwrap();
        c.block_request(8).unwrap();
        c.on_block_response(&ack(None)).unwrap();
        c.block_request(8).unwrap();
        match c.on_block_response(&err(500, "disk full")) {
            Err(UploadError::Rejected { stage, status, message }) => {
                assert_eq!(stage, Stage::Upload { block_index: 1 });
                assert_eq!(status.as_u16(), 500);
                assert_eq!(message, "disk full");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(c.state(), &UploadState::Failed);
        assert!(c.next_block().is_none());
        assert!(c.block_request(8).is_err());
    }

    #[test]
    fn digest_mismatch_fails_after_all_acks() {
        let mut c = controller(4);
        c.plan_request().unwrap();
        c.on_plan_response(&ok_plan("data.bin", 8, 1)).unwrap();
        c.block_request(4).unwrap();
        c.on_block_response(&ack(Some("remote"))).unwrap();
        assert!(matches!(
            c.verify("local"),
            Err(UploadError::IntegrityMismatch { .. })
        ));
        assert_eq!(c.state(), &UploadState::Failed);
    }

    #[test]
    fn zero_read_before_last_block() {
        let mut c = controller(16);
        c.plan_request().unwrap();
        c.on_plan_response(&ok_plan("data.bin", 8, 2)).unwrap();
        c.block_request(8).unwrap();
        c.on_block_response(&ack(None)).unwrap();
        assert!(matches!(
            c.block_request(0),
            Err(UploadError::ShortRead { block_index: 1, total_blocks: 2 })
        ));
        assert_eq!(c.state(), &UploadState::Failed);
    }

    #[test]
    fn final_block_size_must_match_declared() {
        let mut c = controller(9);
        c.plan_request().unwrap();
        c.on_plan_response(&ok_plan("data.bin", 8, 2)).unwrap();
        c.block_request(8).unwrap();
        c.on_block_response(&ack(None)).unwrap();
        assert!(matches!(
            c.block_request(3),
            Err(UploadError::SizeMismatch { declared: 9, sent: 11 })
        ));
    }

    #[test]
    fn inconsistent_plan_rejected() {
        let mut c = controller(100);
        c.plan_request().unwrap();
        assert!(matches!(
            c.on_plan_response(&ok_plan("data.bin", 8, 2)),
            Err(UploadError::InvalidPlan(PlanError::BlockCount { .. }))
        ));
        assert_eq!(c.state(), &UploadState::Failed);
    }

    #[test]
    fn second_block_before_ack_is_rejected() {
        let mut c = controller(16);
        c.plan_request().unwrap();
        c.on_plan_response(&ok_plan("data.bin", 8, 2)).unwrap();
        c.block_request(8).unwrap();
        assert!(matches!(
            c.block_request(8),
            Err(UploadError::InvalidState(_))
        ));
    }

    #[test]
    fn final_ack_without_digest() {
        let mut c = controller(4);
        c.plan_request().unwrap();
        c.on_plan_response(&ok_plan("data.bin", 8, 1)).unwrap();
        c.block_request(4).unwrap();
        assert!(matches!(
            c.on_block_response(&ack(None)),
            Err(UploadError::MissingDigest)
        ));
    }

    #[test]
    fn empty_file_fails_before_save() {
        let mut c = controller(0);
        assert!(matches!(c.plan_request(), Err(UploadError::EmptyFile)));
        assert_eq!(c.state(), &UploadState::Failed);
    }

    #[test]
    fn echoed_request_is_not_an_ack() {
        let mut c = controller(16);
        c.plan_request().unwrap();
        c.on_plan_response(&ok_plan("data.bin", 8, 2)).unwrap();
        let mut echoed = c.block_request(8).unwrap();
        echoed.status = Some(StatusCode::OK);
        assert!(matches!(
            c.on_block_response(&echoed),
            Err(UploadError::UnexpectedResponse {
                stage: Stage::Upload { block_index: 0 },
                direction: Direction::Request,
                ..
            })
        ));
        assert_eq!(c.state(), &UploadState::Failed);
    }

    #[test]
    fn plan_answer_must_be_save_response() {
        let mut c = controller(16);
        c.plan_request().unwrap();
        let mut wrong = ok_plan("data.bin", 8, 2);
        wrong.operation = Operation::Login;
        assert!(matches!(
            c.on_plan_response(&wrong),
            Err(UploadError::UnexpectedResponse {
                stage: Stage::Save,
                operation: Operation::Login,
                ..
            })
        ));
    }

    #[test]
    fn abort_marks_failed() {
        let mut c = controller(4);
        c.plan_request().unwrap();
        c.abort();
        assert_eq!(c.state(), &UploadState::Failed);
    }

    #[test]
    fn stats_rates() {
        let s = TransferStats {
            bytes: 2 * 1_048_576,
            elapsed: Duration::from_secs(2),
        };
        assert!((s.bytes_per_sec() - 1_048_576.0).abs() < f64::EPSILON);
        assert!((s.mib_per_sec() - 1.0).abs() < f64::EPSILON);
        let z = TransferStats {
            bytes: 10,
            elapsed: Duration::ZERO,
        };
        assert_eq!(z.bytes_per_sec(), 0.0);
    }
}

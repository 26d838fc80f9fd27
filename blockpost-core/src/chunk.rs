//! Upload plan and block arithmetic: server-chosen block size, block count, per-block lengths.

use crate::protocol::Message;
use crate::wire::MAX_PAYLOAD_LEN;

/// Server-issued parameters for one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPlan {
    /// Final stored name; may differ from the key the client proposed.
    pub key: String,
    pub block_size: u64,
    pub total_blocks: u64,
}

impl UploadPlan {
    /// Build a plan from a 200 SAVE response and check it against the declared file size.
    pub fn from_response(response: &Message, file_size: u64) -> Result<Self, PlanError> {
        let key = response.key.clone().ok_or(PlanError::Missing("key"))?;
        let block_size = response.block_size.ok_or(PlanError::Missing("block_size"))?;
        let total_blocks = response.total_block.ok_or(PlanError::Missing("total_block"))?;
        let plan = Self {
            key,
            block_size,
            total_blocks,
        };
        plan.validate(file_size)?;
        Ok(plan)
    }

    /// Block size and count must be non-zero and consistent with `file_size`, and one
    /// block must fit in a frame payload.
    pub fn validate(&self, file_size: u64) -> Result<(), PlanError> {
        if self.block_size == 0 {
            return Err(PlanError::ZeroBlockSize);
        }
        if self.block_size > u64::from(MAX_PAYLOAD_LEN) {
            return Err(PlanError::BlockTooLarge {
                block_size: self.block_size,
                max: u64::from(MAX_PAYLOAD_LEN),
            });
        }
        if self.total_blocks == 0 {
            return Err(PlanError::NoBlocks);
        }
        let expected = expected_total_blocks(file_size, self.block_size);
        if expected != self.total_blocks {
            return Err(PlanError::BlockCount {
                expected,
                got: self.total_blocks,
            });
        }
        Ok(())
    }

    /// Block `index` of this plan for a file of `file_size` bytes.
    pub fn block(&self, index: u64, file_size: u64) -> Option<BlockRange> {
        if index >= self.total_blocks {
            return None;
        }
        let offset = index.checked_mul(self.block_size)?;
        if offset >= file_size {
            return None;
        }
        Some(BlockRange {
            index,
            len: (file_size - offset).min(self.block_size),
        })
    }

    pub fn is_last(&self, index: u64) -> bool {
        index + 1 == self.total_blocks
    }
}

/// ceil(file_size / block_size); 0 when `block_size` is 0.
pub fn expected_total_blocks(file_size: u64, block_size: u64) -> u64 {
    if block_size == 0 {
        return 0;
    }
    file_size.div_ceil(block_size)
}

/// One block of the source file; blocks are read in index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub index: u64,
    pub len: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("plan is missing `{0}`")]
    Missing(&'static str),
    #[error("plan block size is zero")]
    ZeroBlockSize,
    #[error("plan has no blocks")]
    NoBlocks,
    #[error("plan block size {block_size} exceeds the {max}-byte frame payload limit")]
    BlockTooLarge { block_size: u64, max: u64 },
    #[error("plan block count {got} does not cover the file (expected {expected})")]
    BlockCount { expected: u64, got: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DataType, Operation, StatusCode};

    fn plan(block_size: u64, total_blocks: u64) -> UploadPlan {
        UploadPlan {
            key: "k".into(),
            block_size,
            total_blocks,
        }
    }

    #[test]
    fn total_blocks_is_ceiling() {
        assert_eq!(expected_total_blocks(0, 8), 0);
        assert_eq!(expected_total_blocks(8, 8), 1);
        assert_eq!(expected_total_blocks(9, 8), 2);
        assert_eq!(expected_total_blocks(16, 8), 2);
        assert_eq!(expected_total_blocks(5, 0), 0);
    }

    #[test]
    fn plan_block_lengths() {
        let p = plan(8, 2);
        assert_eq!(p.block(0, 9).unwrap().len, 8);
        assert_eq!(p.block(1, 9).unwrap(), BlockRange { index: 1, len: 1 });
        assert!(p.block(2, 9).is_none());
        assert!(p.is_last(1));
        assert!(!p.is_last(0));
    }

    #[test]
    fn plan_from_response() {
        let mut r = Message::response(DataType::File, Operation::Save, StatusCode::OK);
        r.key = Some("renamed.bin".into());
        r.block_size = Some(4);
        r.total_block = Some(3);
        let p = UploadPlan::from_response(&r, 10).unwrap();
        assert_eq!(p.key, "renamed.bin");
        assert_eq!(p.total_blocks, 3);
    }

    #[test]
    fn plan_missing_field() {
        let mut r = Message::response(DataType::File, Operation::Save, StatusCode::OK);
        r.key = Some("a".into());
        r.total_block = Some(1);
        assert!(matches!(
            UploadPlan::from_response(&r, 1),
            Err(PlanError::Missing("block_size"))
        ));
    }

    #[test]
    fn plan_validation() {
        assert!(matches!(plan(0, 1).validate(1), Err(PlanError::ZeroBlockSize)));
        assert!(matches!(plan(8, 0).validate(0), Err(PlanError::NoBlocks)));
        assert!(matches!(
            plan(8, 1).validate(9),
            Err(PlanError::BlockCount { expected: 2, got: 1 })
        ));
        assert!(plan(8, 2).validate(16).is_ok());
    }

    #[test]
    fn block_larger_than_frame_payload_rejected() {
        let max = u64::from(MAX_PAYLOAD_LEN);
        assert!(plan(max, 1).validate(max).is_ok());
        assert!(matches!(
            plan(max * 2, 1).validate(300 << 20),
            Err(PlanError::BlockTooLarge { block_size, .. }) if block_size == max * 2
        ));
    }
}

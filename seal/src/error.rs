use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SealError>;

/// The pipeline stages, used to tag stage failures.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Stage {
    Init,
    Pc1,
    Pc2,
    Pc2Cleanup,
    C1,
    ClearCache,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "init",
            Stage::Pc1 => "pc1",
            Stage::Pc2 => "pc2",
            Stage::Pc2Cleanup => "pc2_cleanup",
            Stage::C1 => "c1",
            Stage::ClearCache => "clear_cache",
        };
        write!(f, "{}", name)
    }
}

#[derive(Error, Debug)]
pub enum SealError {
    #[error("invalid input shape: {what} has length {actual}, expected {expected}")]
    InvalidInputShape {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("sector slot {slot} is outside a batch of {num_sectors} sectors")]
    InvalidSectorSlot { slot: usize, num_sectors: usize },

    #[error("unsupported sector size: {0}")]
    UnsupportedSectorSize(u64),

    #[error("sector size {requested} does not match the initialized sector size {initialized}")]
    SectorSizeMismatch { initialized: u64, requested: u64 },

    #[error("no storage device configured")]
    NoDevice,

    #[error("slot [{offset}, {offset}+{blocks}) exceeds device capacity of {capacity} blocks")]
    SlotOutOfBounds {
        offset: u64,
        blocks: u64,
        capacity: u64,
    },

    #[error("missing or inconsistent artifact {}: {reason}", path.display())]
    MissingArtifact { path: PathBuf, reason: String },

    #[error("{kind} is not writable")]
    ReadOnlyCommitment { kind: crate::types::CommitmentKind },

    #[error("could not write {kind} to {}: {source:#}", path.display())]
    CommitmentWrite {
        kind: crate::types::CommitmentKind,
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{stage} failed: {source:#}")]
    Stage {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },
}

impl SealError {
    pub(crate) fn stage(stage: Stage) -> impl FnOnce(anyhow::Error) -> SealError {
        move |source| SealError::Stage { stage, source }
    }

    /// Integer status for callers that expect the `0 == success` contract.
    pub fn code(&self) -> i32 {
        match self {
            SealError::InvalidInputShape { .. } => 1,
            SealError::InvalidSectorSlot { .. } => 2,
            SealError::UnsupportedSectorSize(_) => 3,
            SealError::SectorSizeMismatch { .. } => 4,
            SealError::NoDevice => 5,
            SealError::SlotOutOfBounds { .. } => 6,
            SealError::MissingArtifact { .. } => 7,
            SealError::ReadOnlyCommitment { .. } => 8,
            SealError::CommitmentWrite { .. } => 9,
            SealError::Config(_) => 10,
            SealError::Stage { stage, .. } => match stage {
                Stage::Init => 20,
                Stage::Pc1 => 21,
                Stage::Pc2 => 22,
                Stage::Pc2Cleanup => 23,
                Stage::C1 => 24,
                Stage::ClearCache => 25,
            },
        }
    }
}

/// Collapses an operation result into the integer status contract.
pub fn status<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.code(),
    }
}

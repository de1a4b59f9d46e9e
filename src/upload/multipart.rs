//! Chunked transfer policy
//!
//! Decides how a payload of known size is moved: a single PutObject or a
//! multipart upload of fixed-size parts. The policy is handed to the storage
//! backend at startup and never changes.

use crate::config::TransferConfig;
use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Minimum part size (5MB) - S3 requirement
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Maximum part size (5GB) - S3 requirement
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Maximum parts allowed
pub const MAX_PARTS: usize = 10000;

/// A payload the policy refuses before any network write
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    #[error("{size} bytes exceeds the {limit} byte limit ({max_parts} parts of {part_size} bytes)")]
    TooLarge {
        size: u64,
        limit: u64,
        part_size: u64,
        max_parts: usize,
    },
}

/// Part sizing and concurrency for one upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPolicy {
    part_size: u64,
    max_concurrent_parts: usize,
    max_parts: usize,
}

impl Default for TransferPolicy {
    fn default() -> Self {
        Self::from_config(&TransferConfig::default())
    }
}

impl TransferPolicy {
    /// Create a policy, clamping every knob into the range S3 accepts
    pub fn new(part_size: u64, max_concurrent_parts: usize, max_parts: usize) -> Self {
        Self {
            part_size: part_size.clamp(MIN_PART_SIZE, MAX_PART_SIZE),
            max_concurrent_parts: max_concurrent_parts.max(1),
            max_parts: max_parts.clamp(1, MAX_PARTS),
        }
    }

    pub fn from_config(config: &TransferConfig) -> Self {
        Self::new(
            config.part_size,
            config.max_concurrent_parts,
            config.max_parts,
        )
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn max_concurrent_parts(&self) -> usize {
        self.max_concurrent_parts
    }

    pub fn max_parts(&self) -> usize {
        self.max_parts
    }

    /// Largest payload this policy accepts
    pub fn max_object_size(&self) -> u64 {
        self.part_size.saturating_mul(self.max_parts as u64)
    }

    /// Choose how to transfer `size` bytes.
    ///
    /// Payloads up to one part go out as a single request; larger ones are
    /// split into `ceil(size / part_size)` parts, all full-size except the
    /// last.
    pub fn plan(&self, size: u64) -> Result<TransferPlan, PolicyViolation> {
        if size > self.max_object_size() {
            return Err(PolicyViolation::TooLarge {
                size,
                limit: self.max_object_size(),
                part_size: self.part_size,
                max_parts: self.max_parts,
            });
        }

        if size <= self.part_size {
            return Ok(TransferPlan::Single { size });
        }

        let parts = size.div_ceil(self.part_size) as usize;
        Ok(TransferPlan::Multipart {
            size,
            part_size: self.part_size,
            parts,
        })
    }
}

/// How one payload is transferred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPlan {
    Single {
        size: u64,
    },
    Multipart {
        size: u64,
        part_size: u64,
        parts: usize,
    },
}

impl TransferPlan {
    pub fn size(&self) -> u64 {
        match self {
            TransferPlan::Single { size } | TransferPlan::Multipart { size, .. } => *size,
        }
    }

    pub fn part_count(&self) -> usize {
        match self {
            TransferPlan::Single { .. } => 1,
            TransferPlan::Multipart { parts, .. } => *parts,
        }
    }

    /// Length of the part with 1-based `part_number`
    pub fn part_length(&self, part_number: usize) -> u64 {
        match self {
            TransferPlan::Single { size } => *size,
            TransferPlan::Multipart {
                size, part_size, ..
            } => {
                let offset = (part_number.saturating_sub(1) as u64) * part_size;
                size.saturating_sub(offset).min(*part_size)
            }
        }
    }
}

/// Read exactly `len` bytes from `reader`.
///
/// A short read means the file shrank after it was sized, which is reported as
/// `UnexpectedEof`.
pub async fn read_part<R>(reader: &mut R, len: u64) -> std::io::Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(len as usize);
    reader.take(len).read_to_end(&mut buf).await?;

    if (buf.len() as u64) < len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("expected {} bytes, file ended after {}", len, buf.len()),
        ));
    }

    Ok(Bytes::from(buf))
}

//! Range reconciliation message types.
//!
//! A message is a sequence of ranges covering the item space from
//! [`Bound::MIN`] upward. Each range closes at its `upper` bound and starts
//! where the previous one closed.

use serde::{Deserialize, Serialize};

use hypersync_core::{BlobId, Bound, Fingerprint};

use crate::error::{Result, SyncError};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Message size limits enforced on decode.
pub mod limits {
    /// Max encoded message size in bytes.
    pub const MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;
    /// Max ranges in one message.
    pub const MAX_RANGES: usize = 64 * 1024;
    /// Max ids in one id list.
    pub const MAX_IDS_PER_RANGE: usize = 1024;
    /// Max length of an id or bound prefix.
    pub const MAX_ID_LEN: usize = hypersync_core::BlobId::MAX_LEN;
    /// Smallest non-zero frame size limit a session accepts.
    pub const MIN_FRAME_SIZE_LIMIT: usize = 4096;
}

/// What a range carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Nothing left to do for this range.
    Skip,
    /// Digest of the sender's items in the range.
    Fingerprint(Fingerprint),
    /// Every id the sender has in the range.
    IdList(Vec<BlobId>),
}

/// One range of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    /// Exclusive upper bound.
    pub upper: Bound,
    /// Payload.
    pub mode: Mode,
}

impl Range {
    /// Conservative estimate of the encoded size.
    pub fn encoded_len_hint(&self) -> usize {
        bound_len_hint(&self.upper) + self.mode.encoded_len_hint()
    }
}

impl Mode {
    /// Conservative estimate of the encoded size.
    pub fn encoded_len_hint(&self) -> usize {
        match self {
            Mode::Skip => SKIP_LEN_HINT,
            Mode::Fingerprint(_) => FINGERPRINT_LEN_HINT,
            Mode::IdList(ids) => 12 + ids.iter().map(|id| id.len() + 4).sum::<usize>(),
        }
    }
}

pub(crate) const SKIP_LEN_HINT: usize = 8;
pub(crate) const FINGERPRINT_LEN_HINT: usize = 48;
/// Message envelope around the ranges.
pub(crate) const ENVELOPE_LEN_HINT: usize = 32;

/// Conservative estimate of an encoded bound.
pub(crate) fn bound_len_hint(bound: &Bound) -> usize {
    match bound {
        Bound::Infinity => 24,
        Bound::Item { id_prefix, .. } => 52 + id_prefix.len(),
    }
}

/// A full reconciliation message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeMessage {
    /// Protocol version of the sender.
    pub version: u8,
    /// Ranges in ascending bound order.
    pub ranges: Vec<Range>,
}

impl RangeMessage {
    /// Message with the current protocol version.
    pub fn new(ranges: Vec<Range>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            ranges,
        }
    }

    /// Encode as CBOR.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        ciborium::into_writer(self, &mut out).map_err(|e| SyncError::Encode(e.to_string()))?;
        Ok(out)
    }

    /// Decode and validate. Never panics on hostile input.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > limits::MAX_MESSAGE_BYTES {
            return Err(SyncError::InvalidMessage(format!(
                "message of {} bytes exceeds limit",
                bytes.len()
            )));
        }
        let msg: RangeMessage = ciborium::from_reader(bytes)
            .map_err(|e| SyncError::InvalidMessage(format!("malformed message: {}", e)))?;
        msg.validate()?;
        Ok(msg)
    }

    /// Check structure and size limits.
    pub fn validate(&self) -> Result<()> {
        if self.version != PROTOCOL_VERSION {
            return Err(SyncError::VersionMismatch {
                local: PROTOCOL_VERSION,
                peer: self.version,
            });
        }
        if self.ranges.len() > limits::MAX_RANGES {
            return Err(SyncError::InvalidMessage("too many ranges".into()));
        }

        let mut prev = &Bound::MIN;
        for range in &self.ranges {
            if range.upper <= *prev {
                return Err(SyncError::InvalidMessage(
                    "range bounds are not strictly ascending".into(),
                ));
            }
            if let Bound::Item { id_prefix, .. } = &range.upper {
                if id_prefix.len() > limits::MAX_ID_LEN {
                    return Err(SyncError::InvalidMessage("bound prefix too long".into()));
                }
            }
            if let Mode::IdList(ids) = &range.mode {
                if ids.len() > limits::MAX_IDS_PER_RANGE {
                    return Err(SyncError::InvalidMessage("too many ids in range".into()));
                }
                if ids.iter().any(|id| !id.is_valid()) {
                    return Err(SyncError::InvalidMessage("invalid id length".into()));
                }
            }
            prev = &range.upper;
        }
        Ok(())
    }

    /// Whether every range is a skip.
    pub fn is_done(&self) -> bool {
        self.ranges.iter().all(|r| r.mode == Mode::Skip)
    }
}

//! Human-readable order numbers: `YYYYMMDDHHMMSS` + 6 random digits.
//!
//! Lexicographic order matches creation order to the second. Uniqueness is
//! enforced by the order-number index, which rejects collisions.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use storefront_core::{DomainError, DomainResult};

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const TIMESTAMP_LEN: usize = 14;
const SUFFIX_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNo(String);

impl OrderNo {
    pub fn generate(at: DateTime<Utc>) -> Self {
        let random = Uuid::now_v7();
        let bytes = random.as_bytes();
        let mut tail = [0u8; 8];
        tail.copy_from_slice(&bytes[8..16]);
        // Top two bits of byte 8 are the UUID variant; mask them out.
        let entropy = u64::from_be_bytes(tail) & 0x3fff_ffff_ffff_ffff;
        Self(format!(
            "{}{:06}",
            at.format(TIMESTAMP_FORMAT),
            entropy % 1_000_000
        ))
    }

    pub fn parse(raw: &str) -> DomainResult<Self> {
        if raw.len() != TIMESTAMP_LEN + SUFFIX_LEN || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::invalid_id(format!("OrderNo: malformed '{raw}'")));
        }
        NaiveDateTime::parse_from_str(&raw[..TIMESTAMP_LEN], TIMESTAMP_FORMAT)
            .map_err(|e| DomainError::invalid_id(format!("OrderNo: {e}")))?;
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Creation time encoded in the number (second precision).
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(&self.0[..TIMESTAMP_LEN], TIMESTAMP_FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    }
}

impl core::fmt::Display for OrderNo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

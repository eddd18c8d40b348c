//! Wire format for a persisted bucket.
//!
//! A snapshot lives in a generic string-keyed cache as two fields:
//! `tokens` (non-negative decimal) and `tokenLastIncreaseTime` (RFC 3339 with an explicit
//! offset).

use crate::cache::Fields;
use crate::error::SnapshotError;
use chrono::{DateTime, SecondsFormat, Utc};

/// Field holding the remaining token count.
pub const TOKENS_FIELD: &str = "tokens";
/// Field holding the instant of the last token increase.
pub const LAST_INCREASE_FIELD: &str = "tokenLastIncreaseTime";

/// Persisted state of one caller's bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSnapshot {
    pub tokens: u32,
    pub last_increase: DateTime<Utc>,
}

impl BucketSnapshot {
    pub fn new(tokens: u32, last_increase: DateTime<Utc>) -> Self {
        Self { tokens, last_increase }
    }

    /// Decode a snapshot from cache fields.
    ///
    /// An empty map means "no snapshot" and yields `Ok(None)`.
    pub fn from_fields(fields: &Fields) -> Result<Option<Self>, SnapshotError> {
        if fields.is_empty() {
            return Ok(None);
        }
        let raw_tokens =
            fields.get(TOKENS_FIELD).ok_or(SnapshotError::MissingField(TOKENS_FIELD))?;
        let raw_time = fields
            .get(LAST_INCREASE_FIELD)
            .ok_or(SnapshotError::MissingField(LAST_INCREASE_FIELD))?;

        let parsed: i64 = raw_tokens
            .trim()
            .parse()
            .map_err(|_| SnapshotError::InvalidTokenCount(raw_tokens.clone()))?;
        if parsed < 0 {
            return Err(SnapshotError::NegativeTokenCount(parsed));
        }
        let tokens =
            u32::try_from(parsed).map_err(|_| SnapshotError::InvalidTokenCount(raw_tokens.clone()))?;

        let last_increase = DateTime::parse_from_rfc3339(raw_time.trim())
            .map_err(|e| SnapshotError::InvalidTimestamp {
                value: raw_time.clone(),
                reason: e.to_string(),
            })?
            .with_timezone(&Utc);

        Ok(Some(Self { tokens, last_increase }))
    }

    /// Encode into cache fields.
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::with_capacity(2);
        fields.insert(TOKENS_FIELD.to_string(), self.tokens.to_string());
        fields.insert(
            LAST_INCREASE_FIELD.to_string(),
            self.last_increase.to_rfc3339_opts(SecondsFormat::Millis, true),
        );
        fields
    }
}

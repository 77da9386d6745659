//! Record metadata: audit stamps and permission bits.

use crate::error::{Result, ValidationError};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Milliseconds since the Unix epoch.
pub fn timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A (timestamp, acting identity) pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMeta {
    /// Milliseconds since the Unix epoch, 0 when never stamped.
    #[serde(default)]
    pub timestamp: i64,
    /// Identity that performed the action.
    #[serde(default)]
    pub user_id: Option<Uuid>,
}

impl ModelMeta {
    /// Returns a stamp for the current instant.
    pub fn now(user_id: Option<Uuid>) -> Self {
        Self {
            timestamp: timestamp_ms(),
            user_id,
        }
    }

    /// Re-stamps with the current instant and `user_id`.
    pub fn touch(&mut self, user_id: Option<Uuid>) {
        *self = Self::now(user_id);
    }
}

/// Read/write bits of one permission tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Read access.
    pub read: bool,
    /// Write access.
    pub write: bool,
}

impl Permission {
    /// Read and write.
    pub const READ_WRITE: Self = Self {
        read: true,
        write: true,
    };

    /// No access.
    pub const NONE: Self = Self {
        read: false,
        write: false,
    };

    fn from_digit(digit: char) -> Option<Self> {
        let bits = digit.to_digit(8)?;
        Some(Self {
            read: bits & 4 != 0,
            write: bits & 2 != 0,
        })
    }
}

/// Group/all/other permission tiers stored verbatim with each record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    /// Owner's group.
    pub group: Permission,
    /// Every authenticated identity.
    pub all: Permission,
    /// Anonymous access.
    pub other: Permission,
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            group: Permission::READ_WRITE,
            all: Permission::NONE,
            other: Permission::NONE,
        }
    }
}

impl Permissions {
    /// Parses a unix-style mode such as `"640"`: one digit per tier
    /// (group, all, other) where 4 grants read and 2 grants write.
    pub fn from_mode(mode: &str) -> Result<Self> {
        let invalid = || ValidationError::InvalidMode {
            mode: mode.to_string(),
        };

        let digits: Vec<Permission> = mode
            .chars()
            .map(Permission::from_digit)
            .collect::<Option<_>>()
            .ok_or_else(invalid)?;

        match digits.as_slice() {
            [group, all, other] => Ok(Self {
                group: *group,
                all: *all,
                other: *other,
            }),
            _ => Err(invalid().into()),
        }
    }
}

use serde::Serialize;

use crate::domain::error::{CoreError, Result};

/// Order-independent identity for two users: `(a, b)` and `(b, a)` map to the
/// same key, with `lo < hi` always.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PairKey {
    lo: i64,
    hi: i64,
}

impl PairKey {
    pub fn normalize(u1: i64, u2: i64) -> Result<Self> {
        if u1 <= 0 || u2 <= 0 || u1 == u2 {
            return Err(CoreError::InvalidPair);
        }
        Ok(Self {
            lo: u1.min(u2),
            hi: u1.max(u2),
        })
    }

    pub fn lo(&self) -> i64 {
        self.lo
    }

    pub fn hi(&self) -> i64 {
        self.hi
    }

    pub fn contains(&self, user_id: i64) -> bool {
        self.lo == user_id || self.hi == user_id
    }

    /// The other member of the pair, if `user_id` is a member.
    pub fn other(&self, user_id: i64) -> Option<i64> {
        if user_id == self.lo {
            Some(self.hi)
        } else if user_id == self.hi {
            Some(self.lo)
        } else {
            None
        }
    }
}

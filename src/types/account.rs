use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{ChainError, ChainResult};

/// Hex-encoded identifier derived from an account's public key.
///
/// Always 64 lowercase hex characters; conversions reject anything else so a
/// malformed id can never become a ledger key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

pub const ACCOUNT_ID_LEN: usize = 64;

impl AccountId {
    pub fn from_digest(digest: [u8; 32]) -> Self {
        Self(hex::encode(digest))
    }

    pub fn from_hex(value: &str) -> ChainResult<Self> {
        if value.len() != ACCOUNT_ID_LEN {
            return Err(ChainError::Config(format!(
                "account id must be {ACCOUNT_ID_LEN} characters, got {}",
                value.len()
            )));
        }
        if !value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(ChainError::Config(
                "account id must be lowercase hex".into(),
            ));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::from_digest([0u8; 32])
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AccountId {
    type Err = ChainError;

    fn from_str(s: &str) -> ChainResult<Self> {
        Self::from_hex(s)
    }
}

impl TryFrom<String> for AccountId {
    type Error = ChainError;

    fn try_from(value: String) -> ChainResult<Self> {
        Self::from_hex(&value)
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.0
    }
}

/// Balance and replay-protection state for one account. Accounts spring into
/// existence zero-valued on first touch; genesis pre-funds a subset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub balance: u64,
    pub nonce: u64,
}

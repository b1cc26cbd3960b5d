use serde::{Deserialize, Serialize};

use crate::time::Timestamp;

/// A user record as stored in `users.json`, keyed by username.
///
/// `password` is the legacy plaintext field from older data files; new
/// records only ever carry `password_hash`. Absent optional fields are
/// kept absent on rewrite so old records round-trip byte-for-byte.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UserRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
}

/// The credential-free view of a user handed back over the API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub username: String,
    pub display_name: String,
    pub is_admin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
}

impl User {
    pub fn from_record(username: &str, record: &UserRecord) -> Self {
        Self {
            username: username.into(),
            display_name: record
                .display_name
                .clone()
                .unwrap_or_else(|| username.into()),
            is_admin: record.is_admin,
            created_at: record.created_at,
        }
    }
}

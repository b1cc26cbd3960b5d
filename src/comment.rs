use serde::{Deserialize, Serialize};

use crate::time::Timestamp;

/// One comment on a bill. Comments are append-only; the list order under
/// a bill id is insertion order, which is also chronological order.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Comment {
    pub text: String,
    pub user: String,
    pub timestamp: Timestamp,
}

impl Comment {
    pub fn new(author: &str, text: &str) -> Self {
        Self {
            text: text.into(),
            user: author.into(),
            timestamp: Timestamp::now(),
        }
    }
}

use std::fmt;

use log::error;
use serde::{Deserialize, Serialize};
use ::time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// A UTC timestamp, persisted as an RFC 3339 string ("...Z") so the
/// JSON files stay human-readable.
#[derive(Debug, Clone, Copy, PartialOrd, Ord, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(#[serde(with = "::time::serde::rfc3339")] OffsetDateTime);

impl Timestamp {
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    #[cfg(test)]
    pub fn from_unix(secs: i64) -> Self {
        Self(OffsetDateTime::from_unix_timestamp(secs).unwrap())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.format(&Rfc3339) {
            Ok(s) => write!(fmt, "{}", s),
            Err(e) => {
                error!("couldn't format timestamp: {e:?}");
                write!(fmt, "{}", self.0.unix_timestamp())
            }
        }
    }
}

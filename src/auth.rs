use std::fmt;
use std::str::FromStr;

use log::error;
use uuid::Uuid;

use crate::user::UserRecord;

/// An opaque session token, handed out on login via the `sessionid`
/// cookie and looked up in the in-memory session table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl FromStr for SessionId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::try_parse(s).map(Self).map_err(|_| ())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}", self.0)
    }
}

/// A stored credential, resolved from the user record at read time.
///
/// Bcrypt hashes carry the fixed `$2` prefix; anything else is a legacy
/// plaintext password kept for old data files. Plaintext comparison is a
/// compatibility bridge, not a security boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Credential {
    Hashed(String),
    Plaintext(String),
}

impl Credential {
    pub fn from_record(record: &UserRecord) -> Option<Self> {
        let stored = record
            .password_hash
            .as_deref()
            .or(record.password.as_deref())?;

        if stored.is_empty() {
            return None;
        }

        if stored.starts_with("$2") {
            Some(Self::Hashed(stored.into()))
        } else {
            Some(Self::Plaintext(stored.into()))
        }
    }

    pub fn verify(&self, password: &str) -> bool {
        match self {
            Self::Hashed(hash) => bcrypt::verify(password, hash).unwrap_or_else(|e| {
                error!("couldn't verify bcrypt hash: {e:?}");
                false
            }),
            Self::Plaintext(stored) => stored == password,
        }
    }

    /// Legacy records are upgraded to bcrypt on the next successful login.
    pub fn needs_rehash(&self) -> bool {
        matches!(self, Self::Plaintext(_))
    }
}

pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
}

#[cfg(test)]
mod test {
    use super::*;

    fn record(json: &str) -> UserRecord {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn hashed_password_verifies() {
        let hash = hash_password("hunter2").unwrap();
        assert!(hash.starts_with("$2"));

        let cred = Credential::Hashed(hash);
        assert!(cred.verify("hunter2"));
        assert!(!cred.verify("hunter3"));
        assert!(!cred.needs_rehash());
    }

    #[test]
    fn plaintext_password_verifies() {
        let cred = Credential::Plaintext("plainpass".into());
        assert!(cred.verify("plainpass"));
        assert!(!cred.verify("wrong"));
        assert!(cred.needs_rehash());
    }

    #[test]
    fn resolves_by_prefix_at_read_time() {
        let legacy = record(r#"{"password":"plainpass"}"#);
        assert!(matches!(
            Credential::from_record(&legacy),
            Some(Credential::Plaintext(_))
        ));

        let hashed = record(r#"{"password_hash":"$2b$12$abcdefghijklmnopqrstuv"}"#);
        assert!(matches!(
            Credential::from_record(&hashed),
            Some(Credential::Hashed(_))
        ));
    }

    #[test]
    fn empty_or_missing_credential_is_none() {
        assert_eq!(Credential::from_record(&record("{}")), None);
        assert_eq!(Credential::from_record(&record(r#"{"password":""}"#)), None);
    }

    #[test]
    fn session_id_roundtrips() {
        let id = SessionId::new();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);

        assert!("not-a-uuid".parse::<SessionId>().is_err());
    }
}

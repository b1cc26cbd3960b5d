use std::collections::HashMap;
use std::result;
use std::sync::Mutex;

use log::{error, info, trace};
use uuid::Uuid;
use warp::http;

use crate::auth::{self, Credential, SessionId};
use crate::bill::{Bill, Catalog};
use crate::comment::Comment;
use crate::publish::{Publication, PublishKind};
use crate::store::Store;
use crate::time::Timestamp;
use crate::user::{User, UserRecord};

/// The application core: owns the document store, the bill catalog and the
/// in-memory session table. Sessions do not survive a restart; user and
/// comment data does.
pub struct Civica {
    store: Store,
    catalog: Catalog,
    sessions: Mutex<HashMap<SessionId, String>>,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Error {
    Internal,
    Unauthorized,
    BadRequest,
    Duplicate,
    NotFound,
}

pub type Result<T> = result::Result<T, Error>;

impl Into<http::StatusCode> for Error {
    fn into(self) -> http::StatusCode {
        match self {
            Self::Internal => http::StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unauthorized => http::StatusCode::UNAUTHORIZED,
            // observed contract: duplicate signups answer 400, not 409
            Self::BadRequest | Self::Duplicate => http::StatusCode::BAD_REQUEST,
            Self::NotFound => http::StatusCode::NOT_FOUND,
        }
    }
}

impl warp::reject::Reject for Error {}

impl Civica {
    pub fn new(store: Store, catalog: Catalog) -> Self {
        Self {
            store,
            catalog,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Whether store writes are also guarded against other processes.
    pub fn cross_process_safe(&self) -> bool {
        self.store.cross_process_safe()
    }
}

impl Civica {
    pub fn signup(
        &self,
        username: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<User> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(Error::BadRequest);
        }

        let hash = auth::hash_password(password).map_err(|e| {
            error!("couldn't hash password for {username}: {e:?}");
            Error::Internal
        })?;

        let record = UserRecord {
            password_hash: Some(hash),
            password: None,
            display_name: Some(display_name.unwrap_or(username).into()),
            is_admin: false,
            created_at: Some(Timestamp::now()),
        };

        let stored = record.clone();
        self.store
            .users
            .try_update(move |users| {
                if users.contains_key(username) {
                    info!("rejecting signup for existing user {username}");
                    return Err(Error::Duplicate);
                }
                users.insert(username.into(), stored);
                Ok(())
            })
            .map_err(|e| {
                error!("couldn't store user {username}: {e:?}");
                Error::Internal
            })??;

        info!("{username} signed up");
        Ok(User::from_record(username, &record))
    }

    pub fn login(&self, username: &str, password: &str) -> Result<(User, SessionId)> {
        let record = self.store.users.get(username).ok_or_else(|| {
            info!("rejecting non-existent user {username}");
            Error::Unauthorized
        })?;

        let credential = Credential::from_record(&record).ok_or_else(|| {
            info!("{username} has no usable credential");
            Error::Unauthorized
        })?;

        if !credential.verify(password) {
            info!("wrong password for user {username}");
            return Err(Error::Unauthorized);
        }

        if credential.needs_rehash() {
            self.migrate_credential(username, password);
        }

        let session_id = SessionId::new();
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session_id, username.into());

        info!("{username} logged in");
        Ok((User::from_record(username, &record), session_id))
    }

    /// One-way upgrade of a legacy plaintext record to bcrypt, after the
    /// password has already been verified. Best-effort: the login stands
    /// even if the rewrite fails.
    fn migrate_credential(&self, username: &str, password: &str) {
        let hash = match auth::hash_password(password) {
            Ok(h) => h,
            Err(e) => {
                error!("couldn't rehash for {username}: {e:?}");
                return;
            }
        };

        let result = self.store.users.update(|users| {
            if let Some(record) = users.get_mut(username) {
                record.password_hash = Some(hash);
                record.password = None;
            }
        });

        match result {
            Ok(()) => info!("{username}: migrated legacy password to bcrypt"),
            Err(e) => error!("couldn't migrate credential for {username}: {e:?}"),
        }
    }

    pub fn logout(&self, session_id: SessionId) {
        let user = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&session_id);

        if let Some(username) = user {
            info!("{username} logged out");
        }
    }

    /// Resolve a session cookie to its user, re-reading the record so a
    /// password rotation or admin flip is picked up immediately.
    pub fn session_user(&self, session_id: Option<SessionId>) -> Option<User> {
        let session_id = session_id?;
        let username = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&session_id)
            .cloned()?;

        let record = self.store.users.get(&username)?;
        Some(User::from_record(&username, &record))
    }

    pub fn update_password(&self, username: &str, new_password: &str) -> Result<()> {
        if new_password.is_empty() {
            return Err(Error::BadRequest);
        }

        let hash = auth::hash_password(new_password).map_err(|e| {
            error!("couldn't hash password for {username}: {e:?}");
            Error::Internal
        })?;

        self.store
            .users
            .try_update(move |users| match users.get_mut(username) {
                Some(record) => {
                    record.password_hash = Some(hash);
                    record.password = None;
                    Ok(())
                }
                None => Err(Error::NotFound),
            })
            .map_err(|e| {
                error!("couldn't update password for {username}: {e:?}");
                Error::Internal
            })??;

        info!("{username} rotated their password");
        Ok(())
    }
}

impl Civica {
    pub fn comments_for_bill(&self, bill_id: &str) -> Vec<Comment> {
        trace!("loading comments for {bill_id}");
        self.store.comments.get(bill_id).unwrap_or_default()
    }

    pub fn add_comment(&self, bill_id: &str, author: &str, text: &str) -> Result<Comment> {
        if text.trim().is_empty() {
            return Err(Error::BadRequest);
        }

        let comment = Comment::new(author, text);
        let stored = comment.clone();

        self.store
            .comments
            .update(move |comments| {
                comments
                    .entry(bill_id.into())
                    .or_default()
                    .push(stored);
            })
            .map_err(|e| {
                error!("couldn't store comment on {bill_id}: {e:?}");
                Error::Internal
            })?;

        info!("{author} commented on {bill_id}");
        Ok(comment)
    }
}

impl Civica {
    pub fn bills(&self) -> Result<Vec<Bill>> {
        self.catalog.bills().map_err(|e| {
            error!("couldn't read bill catalog: {e}");
            Error::Internal
        })
    }

    pub fn add_bill(
        &self,
        title: &str,
        description: &str,
        category: Option<&str>,
    ) -> Result<Bill> {
        if title.trim().is_empty() || description.trim().is_empty() {
            return Err(Error::BadRequest);
        }

        let bill = self.catalog.append(title, description, category).map_err(|e| {
            error!("couldn't append to bill catalog: {e}");
            Error::Internal
        })?;

        info!("added bill {}", bill.id);
        Ok(bill)
    }
}

impl Civica {
    /// Publications newest-first, optionally narrowed by a free-text query
    /// and kind.
    pub fn publishes(
        &self,
        query: Option<&str>,
        kind: Option<PublishKind>,
    ) -> Vec<(String, Publication)> {
        let mut publishes: Vec<_> = self
            .store
            .publishes
            .load()
            .into_iter()
            .filter(|(_, p)| p.matches(query, kind))
            .collect();

        publishes.sort_by(|(_, a), (_, b)| b.timestamp.cmp(&a.timestamp));
        publishes
    }

    pub fn publication(&self, id: &str) -> Option<Publication> {
        self.store.publishes.get(id)
    }

    pub fn publish(
        &self,
        title: &str,
        content: &str,
        kind: PublishKind,
    ) -> Result<(String, Publication)> {
        if title.trim().is_empty() || content.trim().is_empty() {
            return Err(Error::BadRequest);
        }

        let id = Uuid::new_v4().to_string();
        let publication = Publication::new(title, content, kind);

        let stored = publication.clone();
        let key = id.clone();
        self.store
            .publishes
            .update(move |publishes| {
                publishes.insert(key, stored);
            })
            .map_err(|e| {
                error!("couldn't store publication: {e:?}");
                Error::Internal
            })?;

        info!("published {:?} ({kind:?})", title);
        Ok((id, publication))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use tempfile::TempDir;

    fn civica() -> (TempDir, Civica) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let catalog = Catalog::new(dir.path().join("billsList.txt"));
        (dir, Civica::new(store, catalog))
    }

    #[test]
    fn signup_then_login() {
        let (_dir, app) = civica();

        let user = app.signup("alice", "secret123", None).unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.display_name, "alice");
        assert!(!user.is_admin);
        assert!(user.created_at.is_some());

        let (user, session) = app.login("alice", "secret123").unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(app.session_user(Some(session)).unwrap().username, "alice");
    }

    #[test]
    fn signup_rejects_empty_fields() {
        let (_dir, app) = civica();
        assert_eq!(app.signup("", "pass", None), Err(Error::BadRequest));
        assert_eq!(app.signup("bob", "", None), Err(Error::BadRequest));
    }

    #[test]
    fn duplicate_signup_leaves_record_unchanged() {
        let (_dir, app) = civica();
        app.signup("alice", "first", Some("Alice A")).unwrap();

        let before = app.login("alice", "first").unwrap().0;
        assert_eq!(app.signup("alice", "second", None), Err(Error::Duplicate));

        // original credentials and profile still in place
        let after = app.login("alice", "first").unwrap().0;
        assert_eq!(after.display_name, "Alice A");
        assert_eq!(before.created_at, after.created_at);
        assert_eq!(app.login("alice", "second"), Err(Error::Unauthorized));
    }

    #[test]
    fn login_rejects_bad_credentials() {
        let (_dir, app) = civica();
        app.signup("alice", "secret123", None).unwrap();

        assert_eq!(app.login("alice", "wrong"), Err(Error::Unauthorized));
        assert_eq!(app.login("nobody", "secret123"), Err(Error::Unauthorized));
    }

    #[test]
    fn legacy_plaintext_login_migrates_to_bcrypt() {
        let (dir, app) = civica();

        std::fs::write(
            dir.path().join("users.json"),
            r#"{"legacyuser": {"password": "plainpass", "is_admin": false}}"#,
        )
        .unwrap();

        let (user, _) = app.login("legacyuser", "plainpass").unwrap();
        assert_eq!(user.username, "legacyuser");

        // record rewritten with a bcrypt hash, legacy field dropped
        let raw = std::fs::read_to_string(dir.path().join("users.json")).unwrap();
        assert!(raw.contains("$2"));
        assert!(!raw.contains("plainpass"));

        // and the same password still works via the bcrypt path
        assert!(app.login("legacyuser", "plainpass").is_ok());
        assert_eq!(app.login("legacyuser", "other"), Err(Error::Unauthorized));
    }

    #[test]
    fn logout_invalidates_session() {
        let (_dir, app) = civica();
        app.signup("alice", "secret123", None).unwrap();

        let (_, session) = app.login("alice", "secret123").unwrap();
        app.logout(session);
        assert!(app.session_user(Some(session)).is_none());

        // idempotent
        app.logout(session);
    }

    #[test]
    fn update_password_rotates() {
        let (_dir, app) = civica();
        app.signup("alice", "oldpass", None).unwrap();

        app.update_password("alice", "newpass").unwrap();
        assert_eq!(app.login("alice", "oldpass"), Err(Error::Unauthorized));
        assert!(app.login("alice", "newpass").is_ok());

        assert_eq!(app.update_password("nobody", "x"), Err(Error::NotFound));
        assert_eq!(app.update_password("alice", ""), Err(Error::BadRequest));
    }

    #[test]
    fn comment_roundtrip() {
        let (_dir, app) = civica();

        let comment = app.add_comment("B001", "alice", "hello").unwrap();
        assert_eq!(comment.text, "hello");
        assert_eq!(comment.user, "alice");

        let comments = app.comments_for_bill("B001");
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].text, "hello");
        assert_eq!(comments[0].user, "alice");

        assert!(app.comments_for_bill("B999").is_empty());
    }

    #[test]
    fn comments_keep_insertion_order() {
        let (_dir, app) = civica();

        app.add_comment("B001", "alice", "first").unwrap();
        app.add_comment("B001", "bob", "second").unwrap();
        app.add_comment("B002", "carol", "elsewhere").unwrap();

        let comments = app.comments_for_bill("B001");
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].text, "first");
        assert_eq!(comments[1].text, "second");
    }

    #[test]
    fn empty_comment_rejected() {
        let (_dir, app) = civica();
        assert_eq!(app.add_comment("B001", "alice", "  "), Err(Error::BadRequest));
        assert!(app.comments_for_bill("B001").is_empty());
    }

    #[test]
    fn bills_come_from_the_catalog() {
        let (dir, app) = civica();
        std::fs::write(
            dir.path().join("billsList.txt"),
            "B001: Clean Air Act — Reduces emissions. [Environment]\n",
        )
        .unwrap();

        let bills = app.bills().unwrap();
        assert_eq!(bills.len(), 1);
        assert_eq!(bills[0].title, "Clean Air Act");

        let added = app.add_bill("Transit", "Buses", None).unwrap();
        assert_eq!(added.id, "B002");
        assert_eq!(app.bills().unwrap().len(), 2);

        assert_eq!(app.add_bill("", "x", None), Err(Error::BadRequest));
    }

    #[test]
    fn publishes_list_newest_first_and_filter() {
        let (_dir, app) = civica();

        let (id, _) = app
            .publish("Budget Vote", "The council voted.", PublishKind::Article)
            .unwrap();
        app.publish("Weekly Blog", "Opinions.", PublishKind::Blog)
            .unwrap();

        assert_eq!(app.publishes(None, None).len(), 2);
        let articles = app.publishes(None, Some(PublishKind::Article));
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].0, id);

        let hits = app.publishes(Some("budget"), None);
        assert_eq!(hits.len(), 1);

        assert_eq!(app.publication(&id).unwrap().title, "Budget Vote");
        assert!(app.publication("missing").is_none());

        assert_eq!(
            app.publish("", "x", PublishKind::Blog),
            Err(Error::BadRequest)
        );
    }
}

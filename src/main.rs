use std::convert::Infallible;
use std::sync::Arc;

use clap::Parser;
use cookie::Cookie;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use warp::http::header::SET_COOKIE;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

mod args;
mod auth;
mod bill;
mod civica;
mod comment;
mod publish;
mod store;
mod time;
mod user;

use args::Args;
use auth::SessionId;
use bill::{Bill, Catalog};
use civica::{Civica, Error};
use comment::Comment;
use publish::{Publication, PublishKind};
use store::Store;
use crate::time::Timestamp;
use user::User;

const SESSION_COOKIE: &str = "sessionid";

#[tokio::main]
async fn main() {
    pretty_env_logger::init();

    let args = Args::parse();
    let addr = match args.addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!("couldn't parse listen address: {e}");
            return;
        }
    };

    let civica = Arc::new(Civica::new(
        Store::new(args.data_dir()),
        Catalog::new(args.bills().to_path_buf()),
    ));
    if !civica.cross_process_safe() {
        warn!("file locking unavailable: a second civica process could race on writes");
    }
    let secure = args.secure();

    let with_app = {
        let civica = Arc::clone(&civica);
        warp::any().map(move || Arc::clone(&civica))
    };

    let session = warp::cookie::optional::<String>(SESSION_COOKIE)
        .map(|raw: Option<String>| raw.and_then(|s| s.parse::<SessionId>().ok()));

    let login = warp::path!("login")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_app.clone())
        .and_then(move |req: LoginRequest, app: Arc<Civica>| async move {
            let (username, password) = req.fields().ok_or(Error::BadRequest).reject()?;
            let (user, session_id) = app.login(username, password).reject()?;

            Ok::<_, Rejection>(warp::reply::with_header(
                warp::reply::json(&AuthResponse::ok("Login successful", user)),
                SET_COOKIE,
                session_cookie(&session_id.to_string(), secure),
            ))
        });

    let signup = warp::path!("signup")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_app.clone())
        .and_then(|req: SignupRequest, app: Arc<Civica>| async move {
            let (username, password) = req.fields().ok_or(Error::BadRequest).reject()?;
            let user = app
                .signup(username, password, req.display_name.as_deref())
                .reject()?;

            Ok::<_, Rejection>(warp::reply::json(&AuthResponse::ok(
                "Signup successful",
                user,
            )))
        });

    let logout = warp::path!("logout")
        .and(warp::get())
        .and(session.clone())
        .and(with_app.clone())
        .map(move |session: Option<SessionId>, app: Arc<Civica>| {
            if let Some(session_id) = session {
                app.logout(session_id);
            }

            warp::reply::with_header(
                warp::reply::json(&Status::ok("Logged out")),
                SET_COOKIE,
                clear_session_cookie(secure),
            )
        });

    let bills = {
        let list = warp::path!("api" / "bills")
            .and(warp::get())
            .and(with_app.clone())
            .and_then(|app: Arc<Civica>| async move {
                let bills = app.bills().reject()?;
                Ok::<_, Rejection>(warp::reply::json(&bills))
            });

        let create = warp::path!("api" / "bills")
            .and(warp::post())
            .and(warp::body::json())
            .and(session.clone())
            .and(with_app.clone())
            .and_then(
                |req: BillCreate, session: Option<SessionId>, app: Arc<Civica>| async move {
                    require_admin(&app, session)?;

                    let bill = app
                        .add_bill(
                            req.title.as_deref().unwrap_or(""),
                            req.description.as_deref().unwrap_or(""),
                            req.category.as_deref().filter(|c| !c.is_empty()),
                        )
                        .reject()?;

                    Ok::<_, Rejection>(warp::reply::json(&BillResponse {
                        success: true,
                        id: bill.id.clone(),
                        bill,
                    }))
                },
            );

        list.or(create)
    };

    let comments = {
        let list = warp::path!("api" / "bills" / String / "comments")
            .and(warp::get())
            .and(with_app.clone())
            .and_then(|bill_id: String, app: Arc<Civica>| async move {
                Ok::<_, Rejection>(warp::reply::json(&app.comments_for_bill(&bill_id)))
            });

        let create = warp::path!("api" / "bills" / String / "comments")
            .and(warp::post())
            .and(warp::body::json())
            .and(session.clone())
            .and(with_app.clone())
            .and_then(
                |bill_id: String,
                 req: CommentCreate,
                 session: Option<SessionId>,
                 app: Arc<Civica>| async move {
                    let author = app
                        .session_user(session)
                        .map(|u| u.username)
                        .unwrap_or_else(|| "anonymous".into());

                    let comment = app
                        .add_comment(&bill_id, &author, req.text.as_deref().unwrap_or(""))
                        .reject()?;

                    Ok::<_, Rejection>(warp::reply::json(&CommentResponse {
                        success: true,
                        comment,
                    }))
                },
            );

        list.or(create)
    };

    let publishes = {
        let list = warp::path!("api" / "publishes")
            .and(warp::get())
            .and(warp::query::<PublishQuery>())
            .and(with_app.clone())
            .and_then(|query: PublishQuery, app: Arc<Civica>| async move {
                let kind = query.r#type.as_deref().and_then(PublishKind::parse);
                let items: Vec<_> = app
                    .publishes(query.q.as_deref(), kind)
                    .into_iter()
                    .map(|(id, p)| PublishItem::new(id, p))
                    .collect();

                Ok::<_, Rejection>(warp::reply::json(&items))
            });

        let get = warp::path!("api" / "publishes" / String)
            .and(warp::get())
            .and(with_app.clone())
            .and_then(|id: String, app: Arc<Civica>| async move {
                let publication = app.publication(&id).ok_or(Error::NotFound).reject()?;
                Ok::<_, Rejection>(warp::reply::json(&PublishItem::new(id, publication)))
            });

        let create = warp::path!("api" / "publishes")
            .and(warp::post())
            .and(warp::body::json())
            .and(session.clone())
            .and(with_app.clone())
            .and_then(
                |req: PublishCreate, session: Option<SessionId>, app: Arc<Civica>| async move {
                    require_admin(&app, session)?;

                    let kind = req
                        .r#type
                        .as_deref()
                        .and_then(PublishKind::parse)
                        .ok_or(Error::BadRequest)
                        .reject()?;

                    let (id, publication) = app
                        .publish(
                            req.title.as_deref().unwrap_or(""),
                            req.content.as_deref().unwrap_or(""),
                            kind,
                        )
                        .reject()?;

                    Ok::<_, Rejection>(warp::reply::json(&PublishResponse {
                        success: true,
                        publish: PublishItem::new(id, publication),
                    }))
                },
            );

        list.or(get).or(create)
    };

    let password = warp::path!("api" / "password")
        .and(warp::post())
        .and(warp::body::json())
        .and(session.clone())
        .and(with_app.clone())
        .and_then(
            |req: PasswordChange, session: Option<SessionId>, app: Arc<Civica>| async move {
                let user = app.session_user(session).ok_or(Error::Unauthorized).reject()?;
                app.update_password(&user.username, req.new_password.as_deref().unwrap_or(""))
                    .reject()?;

                Ok::<_, Rejection>(warp::reply::json(&Status::ok("Password updated")))
            },
        );

    let routes = login
        .or(signup)
        .or(logout)
        .or(bills)
        .or(comments)
        .or(publishes)
        .or(password)
        .recover(handle_rejection)
        .with(warp::log("civica"));

    info!("listening on {addr}");
    warp::serve(routes).run(addr).await;
}

fn require_admin(app: &Civica, session: Option<SessionId>) -> Result<User, Rejection> {
    match app.session_user(session) {
        Some(user) if user.is_admin => Ok(user),
        _ => Err(warp::reject::custom(Error::Unauthorized)),
    }
}

fn session_cookie(value: &str, secure: bool) -> String {
    Cookie::build((SESSION_COOKIE, value))
        .path("/")
        .http_only(true)
        .secure(secure)
        .build()
        .to_string()
}

fn clear_session_cookie(secure: bool) -> String {
    Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .http_only(true)
        .secure(secure)
        .max_age(::time::Duration::ZERO)
        .build()
        .to_string()
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found")
    } else if let Some(&e) = err.find::<Error>() {
        (e.into(), error_message(e))
    } else if err
        .find::<warp::filters::body::BodyDeserializeError>()
        .is_some()
    {
        (StatusCode::BAD_REQUEST, "invalid request body")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
    } else {
        error!("unhandled rejection: {err:?}");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&Status {
            success: false,
            message: message.into(),
        }),
        status,
    ))
}

fn error_message(e: Error) -> &'static str {
    match e {
        Error::Internal => "internal error",
        Error::Unauthorized => "Invalid credentials",
        Error::BadRequest => "missing or invalid fields",
        Error::Duplicate => "username already exists",
        Error::NotFound => "not found",
    }
}

/// Shorthand for turning a `civica::Error` into a warp rejection at the
/// end of a handler.
trait RejectExt<T> {
    fn reject(self) -> Result<T, Rejection>;
}

impl<T> RejectExt<T> for Result<T, Error> {
    fn reject(self) -> Result<T, Rejection> {
        self.map_err(warp::reject::custom)
    }
}

#[derive(Debug, Serialize)]
struct Status {
    success: bool,
    message: String,
}

impl Status {
    fn ok(message: &str) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct AuthResponse {
    success: bool,
    message: String,
    user: User,
}

impl AuthResponse {
    fn ok(message: &str, user: User) -> Self {
        Self {
            success: true,
            message: message.into(),
            user,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: Option<String>,
    password: Option<String>,
}

impl LoginRequest {
    fn fields(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some((u, p)),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SignupRequest {
    username: Option<String>,
    password: Option<String>,
    display_name: Option<String>,
}

impl SignupRequest {
    fn fields(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some((u, p)),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PasswordChange {
    new_password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommentCreate {
    text: Option<String>,
}

#[derive(Debug, Serialize)]
struct CommentResponse {
    success: bool,
    comment: Comment,
}

#[derive(Debug, Deserialize)]
struct BillCreate {
    title: Option<String>,
    description: Option<String>,
    category: Option<String>,
}

#[derive(Debug, Serialize)]
struct BillResponse {
    success: bool,
    id: String,
    bill: Bill,
}

#[derive(Debug, Deserialize)]
struct PublishQuery {
    q: Option<String>,
    r#type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PublishCreate {
    title: Option<String>,
    content: Option<String>,
    r#type: Option<String>,
}

#[derive(Debug, Serialize)]
struct PublishItem {
    id: String,
    title: String,
    content: String,
    r#type: PublishKind,
    timestamp: Timestamp,
}

impl PublishItem {
    fn new(id: String, p: Publication) -> Self {
        Self {
            id,
            title: p.title,
            content: p.content,
            r#type: p.r#type,
            timestamp: p.timestamp,
        }
    }
}

#[derive(Debug, Serialize)]
struct PublishResponse {
    success: bool,
    publish: PublishItem,
}

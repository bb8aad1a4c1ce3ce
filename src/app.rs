use std::result;

use cookie::{Cookie, SameSite};
use log::{error, info, warn};
use warp::http::StatusCode;
use warp::Reply;

use crate::auth::{Denied, Hasher, Session, SessionId};
use crate::backend::{Backend, FeedbackStore, Repository, SessionStore, StoreError, UserStore};
use crate::feedback::Feedback;
use crate::form::{AddFeedbackForm, Errors, LoginForm, RegisterForm, UpdateFeedbackForm};
use crate::user::User;
use crate::view;

pub const SESSION_COOKIE: &str = "sessionid";

pub type Response = warp::reply::Response;

pub struct Feedbacker {
    backend: Backend,
    hasher: Hasher,
    secure: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    Internal,
    NotFound,
    UsernameTaken,
    InvalidCredentials,
}

pub type Result<T> = result::Result<T, Error>;

impl From<Error> for StatusCode {
    fn from(e: Error) -> Self {
        match e {
            Error::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::UsernameTaken => StatusCode::CONFLICT,
            Error::InvalidCredentials => StatusCode::UNAUTHORIZED,
        }
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => Error::NotFound,
            // usernames are the only unique column
            StoreError::Conflict => Error::UsernameTaken,
            StoreError::Internal => Error::Internal,
        }
    }
}

impl warp::reject::Reject for Error {}

pub fn redirect(location: &str) -> Response {
    warp::reply::with_header(StatusCode::FOUND, "location", location).into_response()
}

fn user_page(user_id: i64) -> String {
    format!("/users/{user_id}")
}

fn html(body: String) -> Response {
    warp::reply::html(body).into_response()
}

fn denial(message: &str) -> Response {
    warp::reply::with_status(html(view::denial(message)), StatusCode::FORBIDDEN).into_response()
}

/// Where a client is sent when it may not touch someone else's resource.
fn redirect_denied(denied: Denied) -> Response {
    match denied {
        Denied::Anonymous => redirect("/login"),
        Denied::NotOwner { user_id } => redirect(&user_page(user_id)),
    }
}

fn with_cookie(response: Response, cookie: Cookie<'_>) -> Response {
    warp::reply::with_header(response, "set-cookie", cookie.to_string()).into_response()
}

impl Feedbacker {
    pub fn new(backend: Backend, hasher: Hasher, secure: bool) -> Self {
        Self {
            backend,
            hasher,
            secure,
        }
    }

    #[cfg(test)]
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    fn users(&self) -> &dyn UserStore {
        &self.backend
    }

    fn feedbacks(&self) -> &dyn FeedbackStore {
        &self.backend
    }

    fn sessions(&self) -> &dyn SessionStore {
        &self.backend
    }

    /// Resolve the client's `sessionid` cookie. Unknown or malformed ids are
    /// treated as no session at all.
    pub async fn session(&self, cookie: Option<String>) -> Result<Session> {
        let Some(id) = cookie.and_then(|c| c.parse::<SessionId>().ok()) else {
            return Ok(Session::anonymous());
        };

        match self.sessions().session_user(id).await {
            Ok(user_id) => Ok(Session::authenticated(id, user_id)),
            Err(StoreError::NotFound) => {
                warn!("unknown session {id}");
                Ok(Session::anonymous())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn session_cookie(&self, id: SessionId) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, id.to_string()))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .build()
    }

    fn removal_cookie(&self) -> Cookie<'static> {
        let mut cookie = Cookie::build((SESSION_COOKIE, ""))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .build();
        cookie.make_removal();
        cookie
    }

    /// Log `user_id` in, replacing whatever session the client had.
    async fn start_session(&self, session: &Session, user_id: i64) -> Result<Cookie<'static>> {
        self.end_session(session).await?;

        let id = self.sessions().create_session(user_id).await?;
        info!("user {user_id} login: new session created");

        Ok(self.session_cookie(id))
    }

    async fn create_user(&self, form: &RegisterForm) -> Result<User> {
        let new = User::register(
            self.users(),
            &self.hasher,
            &form.username,
            &form.password,
            &form.email,
            &form.first_name,
            &form.last_name,
        )
        .await?;

        Ok(self.users().save(new).await?)
    }

    async fn end_session(&self, session: &Session) -> Result<()> {
        if let Some(id) = session.id() {
            self.sessions().delete_session(id).await?;
            if let Some(user_id) = session.user_id() {
                info!("user {user_id} logout");
            }
        }
        Ok(())
    }
}

impl Feedbacker {
    pub async fn register(&self, session: Session, form: Option<RegisterForm>) -> Result<Response> {
        // opening the registration page logs the client out
        self.end_session(&session).await?;

        let render = |form: &RegisterForm, errors: &Errors, flash: Option<&str>| {
            let page = html(view::registration(form, errors, flash));
            if session.id().is_some() {
                with_cookie(page, self.removal_cookie())
            } else {
                page
            }
        };

        let Some(form) = form else {
            return Ok(render(&Default::default(), &Default::default(), None));
        };
        if let Err(errors) = form.validate() {
            return Ok(render(&form, &errors, None));
        }

        let user = match self.create_user(&form).await {
            Ok(user) => user,
            Err(Error::UsernameTaken) => {
                let flash = format!("Username {} is already taken.", form.username);
                return Ok(render(&form, &Errors::default(), Some(&flash)));
            }
            Err(e) => return Err(e),
        };
        info!("registered {} as user {}", user.username, user.id);

        let id = self.sessions().create_session(user.id).await?;

        Ok(with_cookie(
            redirect(&user_page(user.id)),
            self.session_cookie(id),
        ))
    }

    pub async fn login(&self, session: Session, form: Option<LoginForm>) -> Result<Response> {
        let Some(form) = form else {
            return Ok(html(view::login(
                &Default::default(),
                &Default::default(),
                None,
            )));
        };
        if let Err(errors) = form.validate() {
            return Ok(html(view::login(&form, &errors, None)));
        }

        match User::authenticate(self.users(), &self.hasher, &form.username, &form.password).await
        {
            Ok(user) => {
                let cookie = self.start_session(&session, user.id).await?;
                Ok(with_cookie(redirect(&user_page(user.id)), cookie))
            }
            Err(Error::InvalidCredentials) => Ok(html(view::login(
                &form,
                &Errors::default(),
                Some("Invalid username/password"),
            ))),
            Err(e) => Err(e),
        }
    }

    pub async fn profile(&self, session: Session, user_id: i64) -> Result<Response> {
        let Ok(viewer) = session.require_authenticated() else {
            return Ok(denial("You must be a user to access this"));
        };

        let user = self.users().find_by_id(user_id).await?;
        let feedbacks = self.feedbacks().for_user(user.id).await?;

        Ok(html(view::user(&user, &feedbacks, viewer)))
    }

    pub async fn logout(&self, session: Session) -> Result<Response> {
        self.end_session(&session).await?;

        Ok(with_cookie(redirect("/login"), self.removal_cookie()))
    }

    pub async fn delete_user(&self, session: Session, user_id: i64) -> Result<Response> {
        if let Err(denied) = session.require_owner(Some(user_id)) {
            warn!("refusing to delete user {user_id}: {denied:?}");
            return Ok(denial("You cannot delete an account that is not yours"));
        }

        self.users().delete_with_feedback(user_id).await?;

        Ok(with_cookie(redirect("/register"), self.removal_cookie()))
    }

    pub async fn add_feedback(
        &self,
        session: Session,
        user_id: i64,
        form: Option<AddFeedbackForm>,
    ) -> Result<Response> {
        if let Err(denied) = session.require_owner(Some(user_id)) {
            return Ok(redirect_denied(denied));
        }

        let (form, errors) = match form {
            Some(form) => match form.validate() {
                Ok(()) => {
                    let new =
                        Feedback::add(self.users(), &form.title, &form.content, user_id).await?;
                    let feedback = self.feedbacks().save(new).await?;
                    info!("user {user_id} added feedback {}", feedback.id);

                    return Ok(redirect(&user_page(user_id)));
                }
                Err(errors) => (form, errors),
            },
            None => Default::default(),
        };

        let user = self.users().find_by_id(user_id).await?;

        Ok(html(view::add_feedback(&form, &errors, &user)))
    }

    pub async fn update_feedback(
        &self,
        session: Session,
        feedback_id: i64,
        form: Option<UpdateFeedbackForm>,
    ) -> Result<Response> {
        let mut feedback = self.feedbacks().find_by_id(feedback_id).await?;

        let owner = match session.require_owner(feedback.user_id) {
            Ok(owner) => owner,
            Err(denied) => return Ok(redirect_denied(denied)),
        };

        let (form, errors) = match form {
            Some(form) => match form.validate() {
                Ok(()) => {
                    feedback.apply(form.into_update());
                    self.feedbacks().update(&feedback).await?;
                    info!("user {owner} updated feedback {feedback_id}");

                    return Ok(redirect(&user_page(owner)));
                }
                Err(errors) => (form, errors),
            },
            None => Default::default(),
        };

        Ok(html(view::update_feedback(&form, &errors, &feedback)))
    }

    pub async fn delete_feedback(&self, session: Session, feedback_id: i64) -> Result<Response> {
        let feedback = self.feedbacks().find_by_id(feedback_id).await?;

        let owner = match session.require_owner(feedback.user_id) {
            Ok(owner) => owner,
            Err(denied) => {
                warn!("refusing to delete feedback {feedback_id}: {denied:?}");
                return Ok(denial("You cannot delete feedback that is not yours"));
            }
        };

        self.feedbacks().delete(feedback_id).await?;
        info!("user {owner} deleted feedback {feedback_id}");

        Ok(redirect(&user_page(owner)))
    }
}

pub fn error_response(e: Error) -> Response {
    let status = StatusCode::from(e);
    if status.is_server_error() {
        error!("request failed: {e:?}");
    }

    warp::reply::with_status(html(view::error(status)), status).into_response()
}

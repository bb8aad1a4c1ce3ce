use std::convert::Infallible;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use warp::{Filter, Rejection, Reply};

use crate::app::{self, Feedbacker, Response, SESSION_COOKIE};
use crate::auth::Session;
use crate::form::{AddFeedbackForm, LoginForm, RegisterForm, UpdateFeedbackForm};

const FORM_LIMIT: u64 = 16 * 1024;

fn with_app(
    app: Arc<Feedbacker>,
) -> impl Filter<Extract = (Arc<Feedbacker>,), Error = Infallible> + Clone {
    warp::any().map(move || Arc::clone(&app))
}

fn with_session(
    app: Arc<Feedbacker>,
) -> impl Filter<Extract = (Session,), Error = Rejection> + Clone {
    warp::cookie::optional::<String>(SESSION_COOKIE)
        .and(with_app(app))
        .and_then(|cookie, app: Arc<Feedbacker>| async move {
            app.session(cookie).await.map_err(warp::reject::custom)
        })
}

/// `None` on GET, the submitted form on POST.
fn form<T>() -> impl Filter<Extract = (Option<T>,), Error = Rejection> + Clone
where
    T: DeserializeOwned + Send + 'static,
{
    let show = warp::get().map(|| None::<T>);
    let submit = warp::post()
        .and(warp::body::content_length_limit(FORM_LIMIT))
        .and(warp::body::form::<T>())
        .map(Some);

    show.or(submit).unify()
}

async fn recover(err: Rejection) -> Result<Response, Rejection> {
    match err.find::<app::Error>() {
        Some(&e) => Ok(app::error_response(e)),
        None => Err(err),
    }
}

pub fn routes(
    app: Arc<Feedbacker>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let index = warp::path::end()
        .and(warp::get())
        .map(|| app::redirect("/register"));

    let register = warp::path!("register")
        .and(with_app(app.clone()))
        .and(with_session(app.clone()))
        .and(form::<RegisterForm>())
        .and_then(|app: Arc<Feedbacker>, session, form| async move {
            app.register(session, form)
                .await
                .map_err(warp::reject::custom)
        });

    let login = warp::path!("login")
        .and(with_app(app.clone()))
        .and(with_session(app.clone()))
        .and(form::<LoginForm>())
        .and_then(|app: Arc<Feedbacker>, session, form| async move {
            app.login(session, form).await.map_err(warp::reject::custom)
        });

    let logout = warp::path!("logout")
        .and(warp::post())
        .and(with_app(app.clone()))
        .and(with_session(app.clone()))
        .and_then(|app: Arc<Feedbacker>, session| async move {
            app.logout(session).await.map_err(warp::reject::custom)
        });

    let users = {
        let profile = warp::path!("users" / i64)
            .and(warp::get())
            .and(with_app(app.clone()))
            .and(with_session(app.clone()))
            .and_then(|user_id, app: Arc<Feedbacker>, session| async move {
                app.profile(session, user_id)
                    .await
                    .map_err(warp::reject::custom)
            });

        let delete = warp::path!("users" / i64 / "delete")
            .and(warp::post())
            .and(with_app(app.clone()))
            .and(with_session(app.clone()))
            .and_then(|user_id, app: Arc<Feedbacker>, session| async move {
                app.delete_user(session, user_id)
                    .await
                    .map_err(warp::reject::custom)
            });

        let add_feedback = warp::path!("users" / i64 / "feedback" / "add")
            .and(with_app(app.clone()))
            .and(with_session(app.clone()))
            .and(form::<AddFeedbackForm>())
            .and_then(|user_id, app: Arc<Feedbacker>, session, form| async move {
                app.add_feedback(session, user_id, form)
                    .await
                    .map_err(warp::reject::custom)
            });

        profile.or(delete).unify().or(add_feedback).unify()
    };

    let feedback = {
        let update = warp::path!("feedback" / i64 / "update")
            .and(with_app(app.clone()))
            .and(with_session(app.clone()))
            .and(form::<UpdateFeedbackForm>())
            .and_then(|feedback_id, app: Arc<Feedbacker>, session, form| async move {
                app.update_feedback(session, feedback_id, form)
                    .await
                    .map_err(warp::reject::custom)
            });

        let delete = warp::path!("feedback" / i64 / "delete")
            .and(warp::post())
            .and(with_app(app.clone()))
            .and(with_session(app))
            .and_then(|feedback_id, app: Arc<Feedbacker>, session| async move {
                app.delete_feedback(session, feedback_id)
                    .await
                    .map_err(warp::reject::custom)
            });

        update.or(delete).unify()
    };

    index
        .or(register)
        .unify()
        .or(login)
        .unify()
        .or(logout)
        .unify()
        .or(users)
        .unify()
        .or(feedback)
        .unify()
        .recover(recover)
        .with(warp::log("feedbacker"))
}

#[cfg(test)]
mod test {
    use super::*;

    use warp::http::{self, StatusCode};
    use warp::hyper::body::Bytes;

    use crate::auth::Hasher;
    use crate::backend::{self, FeedbackStore, Repository};
    use crate::feedback::Feedback;

    const FORM: &str = "application/x-www-form-urlencoded";

    type HttpReply = http::Response<Bytes>;

    /// A browser: remembers its session cookie between requests.
    struct Client {
        app: Arc<Feedbacker>,
        cookie: Option<String>,
    }

    async fn setup() -> (Arc<Feedbacker>, Client) {
        let backend = backend::test::create_db().await;
        let app = Arc::new(Feedbacker::new(backend, Hasher::fast(), false));
        let client = Client {
            app: Arc::clone(&app),
            cookie: None,
        };
        (app, client)
    }

    impl Client {
        fn another(&self) -> Self {
            Self {
                app: Arc::clone(&self.app),
                cookie: None,
            }
        }

        async fn send(&mut self, method: &str, path: &str, body: &str) -> HttpReply {
            let mut request = warp::test::request().method(method).path(path);
            if let Some(cookie) = &self.cookie {
                request = request.header("cookie", cookie.as_str());
            }
            if method == "POST" {
                request = request.header("content-type", FORM).body(body);
            }

            let reply = request.reply(&routes(Arc::clone(&self.app))).await;

            if let Some(set) = reply.headers().get("set-cookie") {
                let set = set.to_str().unwrap();
                let pair = set.split(';').next().unwrap();
                self.cookie = if pair == format!("{SESSION_COOKIE}=") {
                    None
                } else {
                    Some(pair.to_string())
                };
            }

            reply
        }

        async fn get(&mut self, path: &str) -> HttpReply {
            self.send("GET", path, "").await
        }

        async fn post(&mut self, path: &str, body: &str) -> HttpReply {
            self.send("POST", path, body).await
        }

        async fn register(&mut self, username: &str, password: &str) -> HttpReply {
            let body = format!(
                "username={username}&password={password}&email={username}%40example.com\
                 &first_name=First&last_name=Last"
            );
            self.post("/register", &body).await
        }
    }

    fn location(reply: &HttpReply) -> &str {
        assert_eq!(reply.status(), StatusCode::FOUND);
        reply.headers()["location"].to_str().unwrap()
    }

    fn body(reply: &HttpReply) -> &str {
        std::str::from_utf8(reply.body()).unwrap()
    }

    async fn feedback(app: &Feedbacker, id: i64) -> Option<Feedback> {
        let feedbacks: &dyn FeedbackStore = app.backend();
        feedbacks.find_by_id(id).await.ok()
    }

    #[tokio::test]
    async fn index_redirects_to_register() {
        let (_, mut client) = setup().await;

        assert_eq!(location(&client.get("/").await), "/register");
    }

    #[tokio::test]
    async fn register_logs_in() {
        let (_, mut client) = setup().await;

        let reply = client.register("alice", "pw1").await;
        assert_eq!(location(&reply), "/users/1");
        assert!(client.cookie.is_some());

        let reply = client.get("/users/1").await;
        assert_eq!(reply.status(), StatusCode::OK);
        assert!(body(&reply).contains("alice"));
    }

    #[tokio::test]
    async fn register_rejects_taken_username() {
        let (_, mut client) = setup().await;
        client.register("alice", "pw1").await;

        let mut other = client.another();
        let reply = other.register("alice", "pw2").await;
        assert_eq!(reply.status(), StatusCode::OK);
        assert!(body(&reply).contains("Username alice is already taken."));
        assert!(other.cookie.is_none());
    }

    #[tokio::test]
    async fn register_rerenders_invalid_form() {
        let (_, mut client) = setup().await;

        let reply = client
            .post("/register", "username=alice&email=nope")
            .await;
        assert_eq!(reply.status(), StatusCode::OK);
        assert!(body(&reply).contains("Please provide a password."));
        assert!(body(&reply).contains("Email provided is not valid."));
        assert!(body(&reply).contains("value=\"alice\""));
    }

    #[tokio::test]
    async fn visiting_register_logs_out() {
        let (_, mut client) = setup().await;
        client.register("alice", "pw1").await;
        let stale = client.cookie.clone();

        let reply = client.get("/register").await;
        assert_eq!(reply.status(), StatusCode::OK);
        assert!(client.cookie.is_none());

        // the old cookie no longer works either
        client.cookie = stale;
        let reply = client.get("/users/1").await;
        assert_eq!(reply.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn login() {
        let (_, mut client) = setup().await;
        client.register("alice", "pw1").await;
        client.post("/logout", "").await;
        assert!(client.cookie.is_none());

        let reply = client.post("/login", "username=alice&password=pw2").await;
        assert_eq!(reply.status(), StatusCode::OK);
        assert!(body(&reply).contains("Invalid username/password"));
        assert!(client.cookie.is_none());

        let reply = client.post("/login", "username=nobody&password=pw1").await;
        assert!(body(&reply).contains("Invalid username/password"));

        let reply = client.post("/login", "username=alice&password=pw1").await;
        assert_eq!(location(&reply), "/users/1");
        assert_eq!(client.get("/users/1").await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn login_replaces_earlier_sessions() {
        let (app, mut client) = setup().await;
        client.register("alice", "pw1").await;
        let first = client.cookie.clone();

        for _ in 0..5 {
            let mut browser = client.another();
            let reply = browser.post("/login", "username=alice&password=pw1").await;
            assert_eq!(location(&reply), "/users/1");
        }

        let rows = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM sessions")
            .fetch_one(&app.backend().0)
            .await
            .unwrap();
        assert_eq!(rows, 1);

        client.cookie = first;
        let reply = client.get("/users/1").await;
        assert_eq!(reply.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn profile_needs_a_session() {
        let (_, mut client) = setup().await;
        client.register("alice", "pw1").await;

        let reply = client.another().get("/users/1").await;
        assert_eq!(reply.status(), StatusCode::FORBIDDEN);
        assert!(body(&reply).contains("You must be a user to access this"));

        let reply = client.get("/users/7").await;
        assert_eq!(reply.status(), StatusCode::NOT_FOUND);

        let reply = client.get("/users/alice").await;
        assert_eq!(reply.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn logout_redirects_to_login() {
        let (_, mut client) = setup().await;
        client.register("alice", "pw1").await;

        let reply = client.post("/logout", "").await;
        assert_eq!(location(&reply), "/login");

        let reply = client.get("/users/1").await;
        assert_eq!(reply.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn add_and_list_feedback() {
        let (_, mut client) = setup().await;
        client.register("alice", "pw1").await;

        let reply = client.get("/users/1/feedback/add").await;
        assert_eq!(reply.status(), StatusCode::OK);

        let reply = client
            .post("/users/1/feedback/add", "title=Hi&content=Hello")
            .await;
        assert_eq!(location(&reply), "/users/1");

        let reply = client.get("/users/1").await;
        assert!(body(&reply).contains("<b>Hi</b> Hello"));

        let reply = client.post("/users/1/feedback/add", "title=Hi").await;
        assert_eq!(reply.status(), StatusCode::OK);
        assert!(body(&reply).contains("Please provide text for content."));
    }

    #[tokio::test]
    async fn add_feedback_for_someone_else() {
        let (_, mut alice) = setup().await;
        alice.register("alice", "pw1").await;
        let mut bob = alice.another();
        bob.register("bob", "pw2").await;

        let reply = bob
            .post("/users/1/feedback/add", "title=Hi&content=Hello")
            .await;
        assert_eq!(location(&reply), "/users/2");

        let reply = alice
            .another()
            .post("/users/1/feedback/add", "title=Hi&content=Hello")
            .await;
        assert_eq!(location(&reply), "/login");

        let reply = alice.get("/users/1").await;
        assert!(!body(&reply).contains("<b>Hi</b>"));
    }

    #[tokio::test]
    async fn partial_update() {
        let (app, mut client) = setup().await;
        client.register("alice", "pw1").await;
        client
            .post("/users/1/feedback/add", "title=Hi&content=Hello")
            .await;

        let reply = client.get("/feedback/1/update").await;
        assert_eq!(reply.status(), StatusCode::OK);

        let reply = client
            .post("/feedback/1/update", "title=&content=Goodbye")
            .await;
        assert_eq!(location(&reply), "/users/1");

        let feedback = feedback(&app, 1).await.unwrap();
        assert_eq!(feedback.title, "Hi");
        assert_eq!(feedback.content, "Goodbye");

        let reply = client.get("/feedback/9/update").await;
        assert_eq!(reply.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn update_checks_the_feedback_owner() {
        let (app, mut alice) = setup().await;
        alice.register("alice", "pw1").await;
        let mut bob = alice.another();
        bob.register("bob", "pw2").await;

        // feedback 1 and 2 are alice's, so feedback 2 has bob's user id
        alice
            .post("/users/1/feedback/add", "title=One&content=1")
            .await;
        alice
            .post("/users/1/feedback/add", "title=Two&content=2")
            .await;

        let reply = bob.post("/feedback/2/update", "title=Mine").await;
        assert_eq!(location(&reply), "/users/2");
        assert_eq!(feedback(&app, 2).await.unwrap().title, "Two");

        let reply = alice
            .another()
            .post("/feedback/2/update", "title=Mine")
            .await;
        assert_eq!(location(&reply), "/login");
    }

    #[tokio::test]
    async fn delete_feedback() {
        let (app, mut alice) = setup().await;
        alice.register("alice", "pw1").await;
        let mut bob = alice.another();
        bob.register("bob", "pw2").await;
        alice
            .post("/users/1/feedback/add", "title=Hi&content=Hello")
            .await;

        let reply = bob.post("/feedback/1/delete", "").await;
        assert_eq!(reply.status(), StatusCode::FORBIDDEN);
        assert!(body(&reply).contains("You cannot delete feedback that is not yours"));
        assert!(feedback(&app, 1).await.is_some());

        let reply = alice.post("/feedback/1/delete", "").await;
        assert_eq!(location(&reply), "/users/1");
        assert!(feedback(&app, 1).await.is_none());

        let reply = alice.post("/feedback/1/delete", "").await;
        assert_eq!(reply.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_account() {
        let (app, mut alice) = setup().await;
        alice.register("alice", "pw1").await;
        let mut bob = alice.another();
        bob.register("bob", "pw2").await;
        alice
            .post("/users/1/feedback/add", "title=Hi&content=Hello")
            .await;

        let reply = bob.post("/users/1/delete", "").await;
        assert_eq!(reply.status(), StatusCode::FORBIDDEN);

        let reply = alice.post("/users/1/delete", "").await;
        assert_eq!(location(&reply), "/register");
        assert!(alice.cookie.is_none());
        assert!(feedback(&app, 1).await.is_none());

        let reply = bob.get("/users/1").await;
        assert_eq!(reply.status(), StatusCode::NOT_FOUND);

        // the name is free again
        let reply = alice.register("alice", "pw3").await;
        assert_eq!(location(&reply), "/users/3");
    }
}

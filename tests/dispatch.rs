//! End-to-end dispatch through the standard chain and through custom stages.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use serde_json::{Map, Value, json};

use plinth::session::{password_digest, unix_now};
use plinth::{
    ApiError, App, Args, BoxFuture, Config, Error, Identity, Middleware, Next, Params, Reply,
    RequestContext, Router, SessionCodec, TemplateRenderer, UserLookup,
};

struct Users(HashMap<String, Identity>);

impl Users {
    fn seeded() -> Self {
        let mut users = HashMap::new();
        for (id, admin) in [("admin1", true), ("reader1", false)] {
            users.insert(id.to_owned(), Identity {
                id: id.to_owned(),
                name: id.to_owned(),
                email: format!("{id}@example.com"),
                admin,
                passwd: password_digest(id, "secret"),
                ..Identity::default()
            });
        }
        Self(users)
    }
}

impl UserLookup for Users {
    fn find_user<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Identity>, Error>> {
        Box::pin(async move { Ok(self.0.get(id).cloned()) })
    }
}

/// Renders `<name>|<user name or "-">|<title>`.
struct Templates;

impl TemplateRenderer for Templates {
    fn render(&self, name: &str, context: &Map<String, Value>) -> Result<String, Error> {
        if name == "missing.html" {
            return Err(Error::Template { name: name.to_owned(), reason: "not found".to_owned() });
        }
        let user = context["__user__"]["name"].as_str().unwrap_or("-");
        let title = context.get("title").and_then(Value::as_str).unwrap_or("");
        Ok(format!("{name}|{user}|{title}"))
    }
}

fn config() -> Config {
    Config::from_layers("[session]\nsecret = \"integration-test-secret\"\n", None).unwrap()
}

fn app(router: Router) -> App {
    App::standard(router, &config(), Arc::new(Users::seeded()), Arc::new(Templates))
}

fn cookie_for(id: &str) -> String {
    let users = Users::seeded();
    let codec = SessionCodec::new(&config().session);
    format!("{}={}", codec.cookie_name(), codec.encode(&users.0[id], unix_now()).unwrap())
}

fn get(uri: &str) -> http::Request<Full<Bytes>> {
    http::Request::get(uri).body(Full::new(Bytes::new())).unwrap()
}

fn post_json(uri: &str, body: Value) -> http::Request<Full<Bytes>> {
    http::Request::post(uri)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

async fn send(app: &App, req: http::Request<Full<Bytes>>) -> (StatusCode, http::HeaderMap, String) {
    let resp = app.handle(req).await;
    let (parts, body) = resp.into_parts();
    let bytes = body.collect().await.unwrap().to_bytes();
    (parts.status, parts.headers, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn admin_prefix_redirects_anonymous_visitors_without_calling_the_handler() {
    let called = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&called);
    let router = Router::new().get("/manage/blogs", Params::new(), move |_args: Args| {
        let flag = Arc::clone(&flag);
        async move {
            flag.store(true, Ordering::SeqCst);
            Ok::<_, Error>("manage")
        }
    });
    let app = app(router);

    let (status, headers, _) = send(&app, get("/manage/blogs")).await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(headers["location"], "/signin");
    assert!(!called.load(Ordering::SeqCst));

    let mut req = get("/manage/blogs");
    req.headers_mut().insert("cookie", cookie_for("reader1").parse().unwrap());
    let (status, _, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::FOUND);
    assert!(!called.load(Ordering::SeqCst));
}

#[tokio::test]
async fn admin_cookie_reaches_the_handler() {
    let router = Router::new().get("/manage/blogs", Params::new(), |_args: Args| async {
        Ok::<_, Error>("<h1>manage</h1>")
    });
    let mut req = get("/manage/blogs");
    req.headers_mut().insert("cookie", cookie_for("admin1").parse().unwrap());

    let (status, headers, body) = send(&app(router), req).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers["content-type"].to_str().unwrap().starts_with("text/html"));
    assert_eq!(body, "<h1>manage</h1>");
}

#[tokio::test]
async fn forged_cookie_is_anonymous() {
    let router = Router::new().get("/me", Params::new().context(), |args: Args| async move {
        let name = args.user().map(|u| u.name.clone()).unwrap_or_default();
        Ok::<_, Error>(format!("user:{name}"))
    });
    let mut cookie = cookie_for("admin1");
    cookie.pop();
    cookie.push('x');
    let mut req = get("/me");
    req.headers_mut().insert("cookie", cookie.parse().unwrap());

    let (_, _, body) = send(&app(router), req).await;
    assert_eq!(body, "user:");
}

#[tokio::test]
async fn templates_receive_the_current_user() {
    let router = Router::new()
        .get("/", Params::new(), |_args: Args| async {
            Ok::<_, Error>(Reply::template("blogs.html", Map::from_iter([("title".to_owned(), json!("Home"))])))
        })
        .get("/broken", Params::new(), |_args: Args| async {
            Ok::<_, Error>(Reply::template("missing.html", Map::new()))
        });
    let app = app(router);

    let (_, _, body) = send(&app, get("/")).await;
    assert_eq!(body, "blogs.html|-|Home");

    let mut req = get("/");
    req.headers_mut().insert("cookie", cookie_for("reader1").parse().unwrap());
    let (_, _, body) = send(&app, req).await;
    assert_eq!(body, "blogs.html|reader1|Home");

    let (status, _, _) = send(&app, get("/broken")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn reply_shapes_map_to_responses() {
    let router = Router::new()
        .get("/json", Params::new(), |_args: Args| async { Ok::<_, Error>(json!({"a": 1})) })
        .get("/gone", Params::new(), |_args: Args| async { Ok::<_, Error>(404u16) })
        .get("/teapot", Params::new(), |_args: Args| async { Ok::<_, Error>((418u16, "short and stout")) })
        .get("/go", Params::new(), |_args: Args| async { Ok::<_, Error>("redirect:/signin") })
        .get("/raw", Params::new(), |_args: Args| async { Ok::<_, Error>(vec![1u8, 2, 3]) });
    let app = app(router);

    let (status, headers, body) = send(&app, get("/json")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-type"], "application/json; charset=utf-8");
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!({"a": 1}));

    let (status, _, body) = send(&app, get("/gone")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.is_empty());

    let (status, _, body) = send(&app, get("/teapot")).await;
    assert_eq!(status.as_u16(), 418);
    assert_eq!(body, "short and stout");

    let (status, headers, _) = send(&app, get("/go")).await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(headers["location"], "/signin");

    let (_, headers, body) = send(&app, get("/raw")).await;
    assert_eq!(headers["content-type"], "application/octet-stream");
    assert_eq!(body.as_bytes(), [1, 2, 3]);
}

#[tokio::test]
async fn arguments_are_bound_from_path_query_and_body() {
    let router = Router::new()
        .get("/api/blogs/{id}", Params::new().arg("id"), |args: Args| async move {
            Ok::<_, Error>(json!({ "id": args.text("id")? }))
        })
        .get("/api/blogs", Params::new().optional("page", "1"), |args: Args| async move {
            Ok::<_, Error>(json!({ "page": args.text("page")? }))
        })
        .post(
            "/api/blogs/{id}/comments",
            Params::new().arg("id").context().required("content"),
            |args: Args| async move {
                Ok::<_, Error>(json!({ "id": args.text("id")?, "content": args.text("content")? }))
            },
        );
    let app = app(router);

    let (_, _, body) = send(&app, get("/api/blogs/42?id=7")).await;
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!({"id": "42"}));

    let (_, _, body) = send(&app, get("/api/blogs?page=3&page=4")).await;
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!({"page": "3"}));

    let (_, _, body) = send(&app, get("/api/blogs")).await;
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!({"page": "1"}));

    let req = post_json("/api/blogs/42/comments", json!({"id": "9", "content": "hi"}));
    let (_, _, body) = send(&app, req).await;
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!({"id": "42", "content": "hi"}));

    let (status, _, body) = send(&app, post_json("/api/blogs/42/comments", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Missing argument: content");
}

async fn create_user(args: Args) -> Result<Reply, Error> {
    if args.text("name")?.trim().is_empty() {
        return Err(ApiError::validation("name", "name cannot be empty").into());
    }
    Ok(Reply::from(json!({"ok": true})))
}

async fn explode(_args: Args) -> Result<Reply, Error> {
    Err(Error::Storage("disk on fire".into()))
}

#[tokio::test]
async fn api_errors_become_json_and_other_errors_become_500() {
    let router = Router::new()
        .post("/api/users", Params::new().required("name"), create_user)
        .get("/boom", Params::new(), explode);
    let app = app(router);

    let (status, _, body) = send(&app, post_json("/api/users", json!({"name": " "}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        serde_json::from_str::<Value>(&body).unwrap(),
        json!({"error": "value:invalid", "data": "name", "message": "name cannot be empty"}),
    );

    let (status, _, body) = send(&app, get("/boom")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!body.contains("disk on fire"));
}

#[tokio::test]
async fn unknown_routes_and_methods() {
    let app = app(Router::new().get("/", Params::new(), |_args: Args| async { Ok::<_, Error>("home") }));

    let (status, _, body) = send(&app, get("/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.is_empty());

    let req = http::Request::builder()
        .method("PURGE")
        .uri("/")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let (status, _, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn form_posts_bind_like_json() {
    let router = Router::new().post(
        "/api/authenticate",
        Params::new().required("email").required("passwd"),
        |args: Args| async move { Ok::<_, Error>(format!("{}:{}", args.text("email")?, args.text("passwd")?)) },
    );
    let req = http::Request::post("/api/authenticate")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Full::new(Bytes::from("email=a%40b.c&passwd=pw")))
        .unwrap();

    let (_, _, body) = send(&app(router), req).await;
    assert_eq!(body, "a@b.c:pw");
}

#[tokio::test]
async fn oversized_bodies_are_refused_before_binding() {
    let called = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&called);
    let router = Router::new().post("/api/blogs", Params::new().required("name"), move |_args: Args| {
        let flag = Arc::clone(&flag);
        async move {
            flag.store(true, Ordering::SeqCst);
            Ok::<_, Error>("created")
        }
    });
    let app = app(router);

    let big = "x".repeat(2 * 1024 * 1024);
    let (status, _, body) = send(&app, post_json("/api/blogs", json!({ "name": big }))).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body, "413 Payload Too Large");
    assert!(!called.load(Ordering::SeqCst));

    let (status, _, body) = send(&app, post_json("/api/blogs", json!({ "name": "small" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "created");
}

#[tokio::test]
async fn body_limit_comes_from_config() {
    let config = Config::from_layers(
        "[server]\nmax_body_size = 64\n[session]\nsecret = \"integration-test-secret\"\n",
        None,
    )
    .unwrap();
    let router = Router::new().post("/echo", Params::new().required("text"), |args: Args| async move {
        Ok::<_, Error>(args.text("text")?)
    });
    let app = App::standard(router, &config, Arc::new(Users::seeded()), Arc::new(Templates));

    let (status, _, _) = send(&app, post_json("/echo", json!({ "text": "y".repeat(100) }))).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

    let (status, _, body) = send(&app, post_json("/echo", json!({ "text": "hi" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "hi");
}

// ── Custom stages ────────────────────────────────────────────────────────────

type Trace = Arc<Mutex<Vec<String>>>;

fn record(trace: &Trace, entry: impl Into<String>) {
    trace.lock().unwrap().push(entry.into());
}

/// Records entry and exit around the rest of the chain.
struct Recorder {
    name: &'static str,
    trace: Trace,
}

impl Middleware for Recorder {
    fn call<'a>(&'a self, ctx: RequestContext, next: Next<'a>) -> BoxFuture<'a, Result<Reply, Error>> {
        Box::pin(async move {
            record(&self.trace, format!("in:{}", self.name));
            let reply = next.run(ctx).await;
            record(&self.trace, format!("out:{}", self.name));
            reply
        })
    }
}

/// Appends `!` to text replies coming back from the handler.
struct Shout;

impl Middleware for Shout {
    fn call<'a>(&'a self, ctx: RequestContext, next: Next<'a>) -> BoxFuture<'a, Result<Reply, Error>> {
        Box::pin(async move {
            match next.run(ctx).await? {
                Reply::Text(t) => Ok(Reply::Text(format!("{t}!"))),
                other => Ok(other),
            }
        })
    }
}

/// Fails without delegating.
struct Refuse;

impl Middleware for Refuse {
    fn call<'a>(&'a self, _ctx: RequestContext, _next: Next<'a>) -> BoxFuture<'a, Result<Reply, Error>> {
        Box::pin(async { Err(Error::Storage("session store unavailable".into())) })
    }
}

fn traced_router(trace: &Trace) -> Router {
    let trace = Arc::clone(trace);
    Router::new().get("/hello", Params::new(), move |_args: Args| {
        let trace = Arc::clone(&trace);
        async move {
            record(&trace, "handler");
            Ok::<_, Error>("hello")
        }
    })
}

#[tokio::test]
async fn stages_run_outermost_first_and_unwind_in_reverse() {
    let trace = Trace::default();
    let app = App::new(traced_router(&trace))
        .wrap(Recorder { name: "a", trace: Arc::clone(&trace) })
        .wrap(Recorder { name: "b", trace: Arc::clone(&trace) });

    let (status, _, body) = send(&app, get("/hello")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "hello");
    assert_eq!(*trace.lock().unwrap(), ["in:a", "in:b", "handler", "out:b", "out:a"]);
}

#[tokio::test]
async fn stages_can_rewrite_the_handler_result() {
    let trace = Trace::default();
    let app = App::new(traced_router(&trace)).wrap(Shout);

    let (status, headers, body) = send(&app, get("/hello")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers["content-type"].to_str().unwrap().starts_with("text/html"));
    assert_eq!(body, "hello!");
}

#[tokio::test]
async fn failing_stage_short_circuits_with_a_bare_500() {
    let trace = Trace::default();
    let app = App::new(traced_router(&trace))
        .wrap(Recorder { name: "a", trace: Arc::clone(&trace) })
        .wrap(Refuse);

    let (status, _, body) = send(&app, get("/hello")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "500 Internal Server Error");
    assert!(!body.contains("session store"));
    assert_eq!(*trace.lock().unwrap(), ["in:a", "out:a"]);
}

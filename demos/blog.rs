//! A tiny blog wired through the full pipeline, with in-memory storage.
//!
//! Run with:
//!   RUST_LOG=plinth=debug,info cargo run --example blog
//!
//! Try:
//!   curl http://localhost:9000/
//!   curl http://localhost:9000/api/blogs?page=1
//!   curl -i -X POST http://localhost:9000/api/authenticate \
//!        -H 'content-type: application/json' \
//!        -d '{"email":"admin@example.com","passwd":"change-me"}'
//!   curl -X POST http://localhost:9000/api/blogs \
//!        -H 'cookie: awesession=<token from the previous response>' \
//!        -H 'content-type: application/x-www-form-urlencoded' \
//!        -d 'name=Hello&summary=First&content=Hello+world'
//!   curl -i http://localhost:9000/manage/blogs
//!
//! Point `BLOG_CONFIG` at a TOML file to override the settings below.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

use plinth::middleware::USER_KEY;
use plinth::session::{password_digest, unix_now};
use plinth::{
    ApiError, App, Args, BoxFuture, Config, Error, Identity, Params, Reply, Response, Router,
    Server, SessionCodec, TemplateRenderer, UserLookup,
};

const DEFAULTS: &str = r#"
[server]
addr = "127.0.0.1:9000"

[session]
secret = "demo-secret-please-override"
"#;

const PAGE_SIZE: usize = 10;

#[derive(Clone, Debug, Serialize)]
struct Blog {
    id: String,
    user_id: String,
    user_name: String,
    name: String,
    summary: String,
    content: String,
    created_at: u64,
}

struct Store {
    users: HashMap<String, Identity>,
    blogs: RwLock<Vec<Blog>>,
    codec: SessionCodec,
}

impl Store {
    fn new(codec: SessionCodec) -> Self {
        let admin = Identity {
            id: "u0001".to_owned(),
            name: "Admin".to_owned(),
            email: "admin@example.com".to_owned(),
            admin: true,
            passwd: password_digest("u0001", "change-me"),
            ..Identity::default()
        };
        let users = HashMap::from([(admin.id.clone(), admin)]);
        Self { users, blogs: RwLock::new(Vec::new()), codec }
    }

    fn user_by_email(&self, email: &str) -> Option<&Identity> {
        self.users.values().find(|u| u.email == email)
    }

    fn page(&self, page: usize) -> Vec<Blog> {
        let blogs = self.blogs.read().unwrap_or_else(PoisonError::into_inner);
        blogs.iter().rev().skip((page - 1) * PAGE_SIZE).take(PAGE_SIZE).cloned().collect()
    }

    fn blog(&self, id: &str) -> Option<Blog> {
        let blogs = self.blogs.read().unwrap_or_else(PoisonError::into_inner);
        blogs.iter().find(|b| b.id == id).cloned()
    }

    fn insert(&self, author: &Identity, name: String, summary: String, content: String) -> Blog {
        let mut blogs = self.blogs.write().unwrap_or_else(PoisonError::into_inner);
        let blog = Blog {
            id: format!("b{:04}", blogs.len() + 1),
            user_id: author.id.clone(),
            user_name: author.name.clone(),
            name,
            summary,
            content,
            created_at: unix_now(),
        };
        blogs.push(blog.clone());
        blog
    }
}

impl UserLookup for Store {
    fn find_user<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Identity>, Error>> {
        Box::pin(async move { Ok(self.users.get(id).cloned()) })
    }
}

/// Dumps the context as JSON inside a minimal page.
struct Pages;

impl TemplateRenderer for Pages {
    fn render(&self, name: &str, context: &Map<String, Value>) -> Result<String, Error> {
        let user = context
            .get(USER_KEY)
            .and_then(|u| u.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("guest");
        let body = serde_json::to_string_pretty(context)?;
        Ok(format!(
            "<!doctype html>\n<title>{name}</title>\n<p>Hello, {user}.</p>\n<pre>{body}</pre>\n"
        ))
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(m) => m,
        _ => Map::new(),
    }
}

fn page_index(args: &Args) -> Result<usize, Error> {
    let raw = args.text("page")?;
    match raw.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ApiError::validation("page", "page must be a positive integer").into()),
    }
}

fn non_empty(args: &Args, name: &str) -> Result<String, Error> {
    let value = args.text(name)?.trim().to_owned();
    if value.is_empty() {
        return Err(ApiError::validation(name, format!("{name} cannot be empty.")).into());
    }
    Ok(value)
}

// ── Pages ────────────────────────────────────────────────────────────────────

async fn index(store: Arc<Store>, args: Args) -> Result<Reply, Error> {
    let page = page_index(&args)?;
    let context = json!({ "page": page, "blogs": store.page(page) });
    Ok(Reply::template("blogs.html", object(context)))
}

async fn blog_page(store: Arc<Store>, args: Args) -> Result<Reply, Error> {
    let id = args.text("id")?;
    let Some(blog) = store.blog(&id) else {
        return Ok(Reply::from((404u16, "blog not found")));
    };
    Ok(Reply::template("blog.html", object(json!({ "blog": blog }))))
}

async fn signin(_store: Arc<Store>, _args: Args) -> Result<Reply, Error> {
    Ok(Reply::template("signin.html", Map::new()))
}

async fn signout(store: Arc<Store>, args: Args) -> Result<Reply, Error> {
    let back = args.context()?.header("referer").unwrap_or("/").to_owned();
    Ok(Response::redirect(&back)
        .with_header("set-cookie", &store.codec.clear_cookie())
        .into())
}

async fn manage_blogs(store: Arc<Store>, args: Args) -> Result<Reply, Error> {
    let page = page_index(&args)?;
    let context = json!({ "page": page, "blogs": store.page(page) });
    Ok(Reply::template("manage_blogs.html", object(context)))
}

// ── API ──────────────────────────────────────────────────────────────────────

async fn authenticate(store: Arc<Store>, args: Args) -> Result<Reply, Error> {
    let email = args.text("email")?;
    let passwd = args.text("passwd")?;
    let Some(user) = store.user_by_email(&email) else {
        return Err(ApiError::validation("email", "Email not exist.").into());
    };
    if user.passwd != password_digest(&user.id, &passwd) {
        return Err(ApiError::validation("passwd", "Invalid password.").into());
    }
    let token = store.codec.encode(user, unix_now())?;
    let body = serde_json::to_vec(&user.clone().redacted())?;
    Ok(Response::json(body)
        .with_header("set-cookie", &store.codec.set_cookie(&token))
        .into())
}

async fn api_blogs(store: Arc<Store>, args: Args) -> Result<Reply, Error> {
    let page = page_index(&args)?;
    Ok(Reply::from(json!({ "page": page, "blogs": store.page(page) })))
}

async fn api_get_blog(store: Arc<Store>, args: Args) -> Result<Reply, Error> {
    let id = args.text("id")?;
    let blog = store.blog(&id).ok_or_else(|| ApiError::not_found("blog"))?;
    Reply::object(&blog)
}

async fn api_create_blog(store: Arc<Store>, args: Args) -> Result<Reply, Error> {
    let Some(author) = args.user().filter(|u| u.admin).cloned() else {
        return Err(ApiError::Permission.into());
    };
    let name = non_empty(&args, "name")?;
    let summary = non_empty(&args, "summary")?;
    let content = non_empty(&args, "content")?;
    let blog = store.insert(&author, name, summary, content);
    Reply::object(&blog)
}

/// Adapts `f(store, args)` to a route handler.
fn with<F, Fut>(store: &Arc<Store>, f: F) -> impl Fn(Args) -> Fut + Send + Sync + 'static
where
    F: Fn(Arc<Store>, Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply, Error>> + Send + 'static,
{
    let store = Arc::clone(store);
    move |args| f(Arc::clone(&store), args)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let overrides = match std::env::var("BLOG_CONFIG") {
        Ok(path) => Some(std::fs::read_to_string(path)?),
        Err(_) => None,
    };
    let config = Config::from_layers(DEFAULTS, overrides.as_deref())?;
    let store = Arc::new(Store::new(SessionCodec::new(&config.session)));

    let router = Router::new()
        .get("/", Params::new().optional("page", "1"), with(&store, index))
        .get("/blog/{id}", Params::new().arg("id"), with(&store, blog_page))
        .get("/signin", Params::new(), with(&store, signin))
        .get("/signout", Params::new().context(), with(&store, signout))
        .get("/manage/blogs", Params::new().optional("page", "1"), with(&store, manage_blogs))
        .post(
            "/api/authenticate",
            Params::new().required("email").required("passwd"),
            with(&store, authenticate),
        )
        .get("/api/blogs", Params::new().optional("page", "1"), with(&store, api_blogs))
        .get("/api/blogs/{id}", Params::new().arg("id"), with(&store, api_get_blog))
        .post(
            "/api/blogs",
            Params::new().context().required("name").required("summary").required("content"),
            with(&store, api_create_blog),
        );

    let app = App::standard(router, &config, Arc::clone(&store) as Arc<dyn UserLookup>, Arc::new(Pages));
    Server::from_config(&config.server)?.serve(app).await
}

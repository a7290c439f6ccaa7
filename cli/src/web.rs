//! HTML dashboard over the manager's read/query surface.
//!
//! Pure presentation: every route either renders registry views or calls a
//! single manager operation and redirects back to the list. The server is
//! rebuilt from scratch whenever the listen port or refresh cadence
//! changes, so the old listener is fully released before the new bind.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, HOST};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{info, warn};
use uuid::Uuid;

use portward_core::{DashboardSettings, TunnelKind, TunnelManager, TunnelView};

/// The dashboard server for one settings snapshot.
pub struct Dashboard {
    manager: Arc<TunnelManager>,
    settings: DashboardSettings,
}

#[derive(Clone)]
struct WebState {
    manager: Arc<TunnelManager>,
    refresh: Duration,
}

impl Dashboard {
    pub fn new(manager: Arc<TunnelManager>, settings: DashboardSettings) -> Self {
        Self { manager, settings }
    }

    /// Runs the server until the shutdown future resolves.
    pub async fn run_with_shutdown(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.settings.port));
        let state = WebState {
            manager: self.manager,
            refresh: self.settings.refresh_interval,
        };
        let router = build_router(state);

        let listener = TcpListener::bind(addr).await?;
        info!(bind = %addr, "Dashboard listening");
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("Dashboard stopped");
        Ok(())
    }
}

fn build_router(state: WebState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/list", get(list_tunnels))
        .route("/startTunnel", get(start_tunnel))
        .route("/stopTunnel", get(stop_tunnel))
        .route("/restartTunnel", get(restart_tunnel))
        .route("/style.css", get(styles))
        .route("/intellij", get(intellij))
        .route("/favicon.ico", get(|| async { StatusCode::NOT_FOUND }))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ActionQuery {
    id: Option<String>,
}

impl ActionQuery {
    fn id(&self) -> Option<Uuid> {
        self.id.as_deref().and_then(|s| Uuid::parse_str(s).ok())
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn index() -> Html<String> {
    Html(render_index())
}

async fn list_tunnels(State(state): State<WebState>, headers: HeaderMap) -> Response {
    let views = state.manager.list_tunnels().await;
    let host = request_host(&headers);
    let body = render_list(&views, &host);

    let refresh_secs = state.refresh.as_secs();
    if refresh_secs > 0 {
        (
            [("refresh", format!("{refresh_secs} url=/list"))],
            Html(body),
        )
            .into_response()
    } else {
        Html(body).into_response()
    }
}

async fn start_tunnel(State(state): State<WebState>, Query(query): Query<ActionQuery>) -> Redirect {
    if let Some(id) = query.id() {
        if let Err(e) = state.manager.start_tunnel(&id).await {
            warn!(%id, error = %e, "Start request rejected");
        }
    }
    Redirect::to("/list")
}

async fn stop_tunnel(State(state): State<WebState>, Query(query): Query<ActionQuery>) -> Redirect {
    if let Some(id) = query.id() {
        if let Err(e) = state.manager.stop_tunnel(&id).await {
            warn!(%id, error = %e, "Stop request rejected");
        }
    }
    Redirect::to("/list")
}

async fn restart_tunnel(
    State(state): State<WebState>,
    Query(query): Query<ActionQuery>,
) -> Redirect {
    if let Some(id) = query.id() {
        if let Err(e) = state.manager.stop_tunnel(&id).await {
            warn!(%id, error = %e, "Restart request rejected");
        } else if let Err(e) = state.manager.start_tunnel(&id).await {
            warn!(%id, error = %e, "Restart request rejected");
        }
    }
    Redirect::to("/list")
}

async fn styles() -> impl IntoResponse {
    (
        [
            (CONTENT_TYPE, "text/css"),
            (CACHE_CONTROL, "max-age=300"),
        ],
        STYLESHEET,
    )
}

async fn intellij(
    State(state): State<WebState>,
    Query(query): Query<ActionQuery>,
    headers: HeaderMap,
) -> Response {
    let host = request_host(&headers);
    let datasource = match query.id() {
        Some(id) => state
            .manager
            .list_tunnels()
            .await
            .iter()
            .find(|v| v.id == id)
            .and_then(|v| render_datasource(v, &host)),
        None => None,
    };
    match datasource {
        Some(body) => ([(CONTENT_TYPE, "text/plain")], body).into_response(),
        None => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

fn request_host(headers: &HeaderMap) -> String {
    headers
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.split(':').next())
        .unwrap_or("127.0.0.1")
        .to_string()
}

// ============================================================================
// Rendering
// ============================================================================

fn render_index() -> String {
    format!(
        "{}<h1>Portward</h1>\n<a href=\"/list\">List tunnels</a>\n{}",
        header("Portward"),
        footer()
    )
}

fn render_list(views: &[TunnelView], host: &str) -> String {
    let mut ordered: Vec<&TunnelView> = views.iter().collect();
    ordered.sort_by(|a, b| {
        b.start_on_startup
            .cmp(&a.start_on_startup)
            .then_with(|| a.target.cmp(&b.target))
            .then_with(|| a.context.cmp(&b.context))
    });

    let rows: Vec<String> = ordered.iter().map(|v| render_row(v, host)).collect();
    format!(
        "{}<table>\n<thead>\n<tr><th>Context</th><th>Target</th><th>Local port</th><th>State</th></tr>\n</thead>\n<tbody>\n{}\n</tbody>\n</table>\n{}",
        header("Tunnels - Portward"),
        rows.join("\n"),
        footer()
    )
}

fn render_row(view: &TunnelView, host: &str) -> String {
    format!(
        "<tr>\n<td>{}</td>\n<td>{}</td>\n<td>{}</td>\n<td>{}</td>\n</tr>",
        view.context,
        render_target(view),
        view.local_port,
        action_icons(view, host)
    )
}

fn render_target(view: &TunnelView) -> String {
    let namespace = if view.namespace.eq_ignore_ascii_case("default") {
        String::new()
    } else {
        format!(" ({})", view.namespace)
    };
    format!(
        "{}<span class=\"notimportant\">:{}{}</span>",
        view.target, view.destination_port, namespace
    )
}

fn action_icons(view: &TunnelView, host: &str) -> String {
    let start_stop = if view.is_running {
        let checked = view
            .last_checked_ago
            .map(|ago| format!("{} s", ago.as_secs()))
            .unwrap_or_default();
        format!(
            "<a href=\"/stopTunnel?id={id}\" class=\"running\" title=\"Stop tunnel\">&#x23F9;</a>\n\
             <a href=\"/restartTunnel?id={id}\" class=\"running\" title=\"Restart tunnel\">&#x27F3;</a>\n\
             <span class=\"notimportant\">{checked}</span>\n",
            id = view.id,
            checked = checked
        )
    } else {
        format!(
            "<a href=\"/startTunnel?id={id}\" class=\"stopped\" title=\"Start tunnel\">&#x23F5;</a>\n",
            id = view.id
        )
    };

    let database = if view.kind == Some(TunnelKind::Database) {
        format!(
            "<a href=\"/intellij?id={}\" target=\"_blank\" class=\"iconlink\" title=\"Generate IntelliJ Datasource\">&#x1F5C2;</a>\n",
            view.id
        )
    } else {
        String::new()
    };

    let http = if view.kind == Some(TunnelKind::Http) {
        format!(
            "<a href=\"http://{}:{}\" class=\"iconlink\" target=\"_blank\">&#x1F517;</a>",
            host, view.local_port
        )
    } else {
        String::new()
    };

    format!("{start_stop}{database}{http}")
}

fn header(title: &str) -> String {
    format!(
        "<!doctype html>\n<html>\n<head>\n<title>{title}</title>\n\
         <link rel=\"stylesheet\" href=\"/style.css\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         </head>\n<body>\n<main>\n"
    )
}

fn footer() -> String {
    format!(
        "</main>\n<footer>\n<p>Version: {}</p>\n</footer>\n</body>\n</html>\n",
        env!("CARGO_PKG_VERSION")
    )
}

/// Generates an IntelliJ datasource definition for a database tunnel.
fn render_datasource(view: &TunnelView, host: &str) -> Option<String> {
    if view.kind != Some(TunnelKind::Database) {
        return None;
    }
    let db = view.database.as_ref()?;
    let d = db.kind.descriptor();

    let name = format!("{}-{}", db.name, view.context);
    let uuid = Uuid::new_v4();
    let jdbc_url = format!(
        "jdbc:{}://{}:{}/{}",
        d.jdbc_prefix, host, view.local_port, db.name
    );
    let group = capitalize(&view.context);

    Some(format!(
        "#DataSourceSettings#\n\
         #LocalDataSource: {name}\n\
         #BEGIN#\n\
         <?xml version=\"1.0\"?>\n\
         <data-source source=\"LOCAL\" name=\"{name}\" group=\"{group}\" uuid=\"{uuid}\">\n\
         \x20\x20<database-info product=\"{product}\" version=\"\" jdbc-version=\"{jdbc_version}\" driver-name=\"{driver_name}\" driver-version=\"{driver_version}\" dbms=\"{dbms}\" exact-version=\"\" exact-driver-version=\"{exact_driver_version}\">\n\
         \x20\x20<identifier-quote-string >{quote}</identifier-quote-string>\n\
         </database-info>\n\
         \x20\x20<case-sensitivity plain-identifiers=\"lower\" quoted-identifiers=\"exact\"/>\n\
         \x20\x20<driver-ref>{driver_ref}</driver-ref>\n\
         \x20\x20<synchronize>true</synchronize>\n\
         \x20\x20<jdbc-driver>{driver_class}</jdbc-driver>\n\
         \x20\x20<jdbc-url>{jdbc_url}</jdbc-url>\n\
         \x20\x20<secret-storage>master_key</secret-storage>\n\
         \x20\x20<user-name>{username}</user-name>\n\
         \x20\x20<schema-mapping>\n\
         \x20\x20\x20\x20<introspection-scope>\n\
         \x20\x20\x20\x20\x20\x20<node kind=\"database\" qname=\"@\">\n\
         \x20\x20\x20\x20\x20\x20\x20\x20<node kind=\"schema\" qname=\"@\"/>\n\
         \x20\x20\x20\x20\x20\x20</node>\n\
         \x20\x20\x20\x20</introspection-scope>\n\
         \x20\x20</schema-mapping>\n\
         \x20\x20<working-dir>$ProjectFileDir$</working-dir>\n\
         </data-source>\n\
         #END#\n",
        name = name,
        group = group,
        uuid = uuid,
        product = d.product,
        jdbc_version = d.jdbc_version,
        driver_name = d.driver_name,
        driver_version = d.driver_version,
        dbms = d.dbms,
        exact_driver_version = d.exact_driver_version,
        quote = d.identifier_quote,
        driver_ref = d.driver_ref,
        driver_class = d.driver_class,
        jdbc_url = jdbc_url,
        username = db.username,
    ))
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

const STYLESHEET: &str = r#"html { margin: 0; padding: 0; }
body {
    font-family: Arial, sans-serif;
    margin: 0; padding: 0;
    background-color: #151515;
    color: #b0b0b0;
}
main {
    margin: 1rem;
    width: fit-content;
    block-size: fit-content;
}
footer {
    margin: 1rem;
    color: #888;
    font-size: 75%;
    border-top: 1px solid #282828;
}
table {
    border-collapse: collapse;
}
th, td {
    border: 1px solid #444;
    padding: 8px;
    text-align: left;
}
th {
    background-color: #282828;
}
tr:nth-child(even) {
    background-color: #1c1c1c;
}
tr:hover {
    background-color: #222;
}
a {
    text-decoration: none;
    color: #ddd;
    font-weight: bold;
}
a:hover {
    text-decoration: underline;
}
.notimportant {
    color: #888;
    font-size: 75%;
}
.running {
    color: green;
}
.stopped {
    color: red;
}
.running:hover, .stopped:hover, .iconlink:hover {
    text-decoration: none;
}"#;

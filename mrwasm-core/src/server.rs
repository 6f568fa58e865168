//! Static file server for the output directory.
//!
//! Serving refuses to start until a host page has been built. The
//! optional browser launch waits for an explicit readiness signal sent
//! once the listener is bound.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::{HOST_PAGE, ServeConfig};
use crate::error::ServeError;

pub struct ArtifactServer {
    listener: TcpListener,
    root: Arc<PathBuf>,
    addr: SocketAddr,
}

impl ArtifactServer {
    /// Checks for the host page, then binds. No socket is opened when the check fails.
    pub async fn bind(config: &ServeConfig) -> Result<Self, ServeError> {
        let host_page = config.host_page();
        if !host_page.is_file() {
            return Err(ServeError::NotBuilt(host_page));
        }

        let listener = TcpListener::bind(config.addr)
            .await
            .map_err(|source| ServeError::Bind {
                addr: config.addr,
                source,
            })?;
        let addr = listener.local_addr()?;
        info!(%addr, root = %config.root.display(), "serving artifacts");
        Ok(Self {
            listener,
            root: Arc::new(config.root.clone()),
            addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn entry_url(&self) -> String {
        format!("http://{}/{HOST_PAGE}", self.addr)
    }

    /// Accepts connections until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServeError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("server stopped");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(err) => {
                            warn!(%err, "failed to accept connection");
                            continue;
                        }
                    };
                    let root = Arc::clone(&self.root);
                    tokio::spawn(async move {
                        let service = service_fn(move |req: Request<Incoming>| {
                            let root = Arc::clone(&root);
                            let method = req.method().clone();
                            let path = req.uri().path().to_owned();
                            async move { Ok::<_, Infallible>(respond(&root, &method, &path).await) }
                        });
                        if let Err(err) = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            debug!(%peer, %err, "connection ended with error");
                        }
                    });
                }
            }
        }
    }
}

/// Serves `config.root` in the foreground until Ctrl-C.
pub async fn serve(config: ServeConfig) -> Result<(), ServeError> {
    serve_until(config, BrowserLauncher::for_platform(), shutdown_signal()).await
}

/// Like [`serve`], with the launcher and the stop condition supplied by the caller.
pub async fn serve_until<F>(
    config: ServeConfig,
    launcher: BrowserLauncher,
    shutdown: F,
) -> Result<(), ServeError>
where
    F: Future<Output = ()>,
{
    let (ready_tx, ready_rx) = oneshot::channel::<String>();
    if config.open_browser {
        tokio::spawn(open_when_ready(launcher, ready_rx));
    }

    let server = ArtifactServer::bind(&config).await?;
    println!("Serving {} at {}", config.root.display(), server.entry_url());
    // The receiver is gone when no browser was requested.
    let _ = ready_tx.send(server.entry_url());

    server.run_until(shutdown).await
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(%err, "cannot listen for Ctrl-C; serving until killed");
        std::future::pending::<()>().await;
    }
}

async fn respond(root: &Path, method: &Method, uri_path: &str) -> Response<Full<Bytes>> {
    if method != Method::GET && method != Method::HEAD {
        info!(%method, path = uri_path, status = 405, "request");
        return status_response(StatusCode::METHOD_NOT_ALLOWED);
    }

    let Some(path) = resolve_request_path(root, uri_path) else {
        info!(%method, path = uri_path, status = 404, "request");
        return status_response(StatusCode::NOT_FOUND);
    };

    match tokio::fs::read(&path).await {
        Ok(contents) => {
            info!(%method, path = uri_path, status = 200, "request");
            let length = contents.len();
            let body = if method == Method::HEAD {
                Bytes::new()
            } else {
                Bytes::from(contents)
            };
            let mut response = Response::new(Full::new(body));
            let headers = response.headers_mut();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type(&path)));
            headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
            response
        }
        Err(err) => {
            debug!(path = %path.display(), %err, "cannot read requested file");
            info!(%method, path = uri_path, status = 404, "request");
            status_response(StatusCode::NOT_FOUND)
        }
    }
}

fn status_response(status: StatusCode) -> Response<Full<Bytes>> {
    let reason = status.canonical_reason().unwrap_or_default();
    let mut response = Response::new(Full::new(Bytes::from(format!("{reason}\n"))));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Maps a request path onto the web root. `None` for anything that could escape it.
fn resolve_request_path(root: &Path, uri_path: &str) -> Option<PathBuf> {
    let relative = uri_path.trim_start_matches('/');
    let relative = if relative.is_empty() { HOST_PAGE } else { relative };

    let mut resolved = root.to_path_buf();
    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            ".." => return None,
            segment if segment.contains('\\') || segment.contains(':') => return None,
            segment => resolved.push(segment),
        }
    }
    Some(resolved)
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        Some("wasm") => "application/wasm",
        Some("css") => "text/css; charset=utf-8",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

/// The platform command that opens a URL in the default browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserLauncher {
    program: String,
    args: Vec<String>,
}

impl BrowserLauncher {
    /// A launcher that runs `program args... <url>`.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn for_platform() -> Self {
        if cfg!(target_os = "windows") {
            // `start` treats its first quoted argument as a window title.
            Self::new("cmd", ["/C", "start", ""])
        } else if cfg!(target_os = "linux") {
            Self::new("xdg-open", [] as [&str; 0])
        } else {
            Self::new("open", [] as [&str; 0])
        }
    }

    pub fn command_line(&self, url: &str) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .chain(std::iter::once(url.to_string()))
            .collect()
    }

    async fn open(&self, url: &str) {
        let program = self.program.as_str();
        match Command::new(program).args(&self.args).arg(url).status().await {
            Ok(status) if status.success() => info!(url, "opened browser"),
            Ok(status) => warn!(program, %status, "browser launcher failed"),
            Err(err) => warn!(program, %err, "cannot start browser launcher"),
        }
    }
}

async fn open_when_ready(launcher: BrowserLauncher, ready: oneshot::Receiver<String>) {
    match ready.await {
        Ok(url) => launcher.open(&url).await,
        Err(_) => debug!("server never became ready; not opening a browser"),
    }
}

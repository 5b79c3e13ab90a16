//! Static asset mount
//!
//! Serves a local directory tree under a fixed path prefix. The prefix is
//! stripped and the remainder resolved against the root directory.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE, IF_MODIFIED_SINCE, LAST_MODIFIED, LOCATION};
use hyper::{Method, Request, Response, StatusCode};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

use crate::error::{full_body, json_error_response, GatewayErrorCode};
use crate::middleware::Handler;
use crate::GatewayBody;

const INDEX_FILE: &str = "index.html";

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// File server bound to a path prefix
pub struct StaticMount {
    prefix: String,
    root: PathBuf,
}

impl StaticMount {
    pub fn new(prefix: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
            root: root.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Serve the file or directory addressed by `req`
    pub async fn serve(&self, req: Request<GatewayBody>) -> Response<GatewayBody> {
        let path = req.uri().path();
        let rest = path.strip_prefix(self.prefix.as_str()).unwrap_or(path);

        let Ok(decoded) = urlencoding::decode(rest) else {
            return not_found();
        };
        let Some(relative) = sanitize_path(&decoded) else {
            debug!(path, "Rejected static path");
            return not_found();
        };

        let full_path = self.root.join(&relative);
        let meta = match tokio::fs::metadata(&full_path).await {
            Ok(meta) => meta,
            Err(_) => return not_found(),
        };

        let is_head = req.method() == Method::HEAD;

        if meta.is_dir() {
            if !path.ends_with('/') {
                let location = match req.uri().query() {
                    Some(query) => format!("{path}/?{query}"),
                    None => format!("{path}/"),
                };
                return redirect(&location);
            }

            let index_path = full_path.join(INDEX_FILE);
            if let Ok(index_meta) = tokio::fs::metadata(&index_path).await {
                if index_meta.is_file() {
                    return serve_file(&index_path, &index_meta, &req, is_head).await;
                }
            }
            return list_directory(&full_path, path, is_head).await;
        }

        serve_file(&full_path, &meta, &req, is_head).await
    }
}

impl Handler for StaticMount {
    fn call(&self, req: Request<GatewayBody>) -> BoxFuture<'_, Response<GatewayBody>> {
        self.serve(req).boxed()
    }
}

/// Turn a request path into a relative filesystem path, rejecting `..`
fn sanitize_path(path: &str) -> Option<PathBuf> {
    let path = path.trim_start_matches('/');

    let mut result = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(c) => result.push(c),
            Component::CurDir => {}
            _ => return None,
        }
    }

    Some(result)
}

async fn serve_file(
    path: &Path,
    meta: &std::fs::Metadata,
    req: &Request<GatewayBody>,
    is_head: bool,
) -> Response<GatewayBody> {
    let modified = meta.modified().ok();

    if let Some(modified) = modified {
        if not_modified_since(req, modified) {
            return Response::builder()
                .status(StatusCode::NOT_MODIFIED)
                .header(LAST_MODIFIED, http_date(modified))
                .body(full_body(""))
                .expect("valid response with StatusCode enum and static headers");
        }
    }

    let content = match tokio::fs::read(path).await {
        Ok(content) => content,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read static file");
            return not_found();
        }
    };

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, content_type(path))
        .header(CONTENT_LENGTH, content.len());

    if let Some(modified) = modified {
        builder = builder.header(LAST_MODIFIED, http_date(modified));
    }

    let body = if is_head {
        full_body("")
    } else {
        full_body(content)
    };

    builder
        .body(body)
        .expect("valid response with StatusCode enum and static headers")
}

async fn list_directory(dir: &Path, request_path: &str, is_head: bool) -> Response<GatewayBody> {
    let mut reader = match tokio::fs::read_dir(dir).await {
        Ok(reader) => reader,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "Failed to read static directory");
            return not_found();
        }
    };

    let mut entries = Vec::new();
    while let Ok(Some(entry)) = reader.next_entry().await {
        let name = entry.file_name().to_string_lossy().to_string();
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        entries.push((name, is_dir));
    }
    entries.sort();

    let html = render_listing(request_path, &entries);
    let length = html.len();

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "text/html; charset=utf-8")
        .header(CONTENT_LENGTH, length)
        .body(if is_head { full_body("") } else { full_body(html) })
        .expect("valid response with StatusCode enum and static headers")
}

fn render_listing(path: &str, entries: &[(String, bool)]) -> String {
    let mut html = String::from("<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">");
    html.push_str(&format!("<title>Index of {}</title></head><body>\n", escape_html(path)));
    html.push_str(&format!("<h1>Index of {}</h1>\n<pre>\n", escape_html(path)));

    for (name, is_dir) in entries {
        let suffix = if *is_dir { "/" } else { "" };
        html.push_str(&format!(
            "<a href=\"{}{}\">{}{}</a>\n",
            urlencoding::encode(name),
            suffix,
            escape_html(name),
            suffix
        ));
    }

    html.push_str("</pre>\n</body></html>\n");
    html
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn redirect(location: &str) -> Response<GatewayBody> {
    Response::builder()
        .status(StatusCode::MOVED_PERMANENTLY)
        .header(LOCATION, location)
        .body(full_body(""))
        .unwrap_or_else(|_| not_found())
}

fn not_found() -> Response<GatewayBody> {
    json_error_response(GatewayErrorCode::FileNotFound, "File not found")
}

fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).format(HTTP_DATE_FORMAT).to_string()
}

fn not_modified_since(req: &Request<GatewayBody>, modified: SystemTime) -> bool {
    let Some(since) = req
        .headers()
        .get(IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
    else {
        return false;
    };

    DateTime::<Utc>::from(modified).timestamp() <= since.timestamp()
}

/// Content-Type for a file, inferred from its extension
pub fn content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("txt" | "md") => "text/plain; charset=utf-8",
        Some("xml") => "application/xml",
        Some("js" | "mjs") => "application/javascript",
        Some("json") => "application/json",
        Some("wasm") => "application/wasm",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("webp") => "image/webp",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        Some("otf") => "font/otf",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("gz") => "application/gzip",
        _ => "application/octet-stream",
    }
}

//! Static file location handler.
//!
//! Serves files below `root` through `tower-http`'s `ServeDir`. The path is
//! taken relative to the prefix the host's router matched, so a location
//! registered at `/static` serves `/static/app.js` from `<root>/app.js`.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use axum::body::Body;
use axum::http::{header, HeaderValue, Method, Request, Uri};
use axum::response::Response;
use futures_util::future::BoxFuture;
use tower::ServiceExt;
use tower_http::services::ServeDir;

use crate::http::handler::HttpHandler;
use crate::http::request::MatchedPath;

pub struct FileHandler {
    root: PathBuf,
    serve: ServeDir,
    directory_listing: bool,
}

impl FileHandler {
    pub fn new(root: impl Into<PathBuf>, directory_listing: bool) -> Self {
        let root = root.into();
        Self {
            serve: ServeDir::new(&root),
            root,
            directory_listing,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory below `root` named by `relative`, when it should be listed.
    async fn listable_dir(&self, relative: &str) -> Option<PathBuf> {
        let mut dir = self.root.clone();
        for segment in relative.split('/').filter(|s| !s.is_empty()) {
            if segment == "." || segment == ".." || segment.contains(['%', '\\']) {
                return None;
            }
            dir.push(segment);
        }
        let metadata = tokio::fs::metadata(&dir).await.ok()?;
        if !metadata.is_dir() || tokio::fs::try_exists(dir.join("index.html")).await.unwrap_or(false) {
            return None;
        }
        Some(dir)
    }

    async fn listing(&self, dir: &Path, request_path: &str) -> Response {
        let mut entries = Vec::new();
        if let Ok(mut read_dir) = tokio::fs::read_dir(dir).await {
            while let Ok(Some(entry)) = read_dir.next_entry().await {
                let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
                let mut name = entry.file_name().to_string_lossy().into_owned();
                if is_dir {
                    name.push('/');
                }
                entries.push(name);
            }
        }
        entries.sort();

        let title = escape_html(request_path);
        let mut html = format!("<!DOCTYPE html>\n<html><head><title>Index of {title}</title></head><body>\n<h1>Index of {title}</h1>\n<ul>\n");
        for name in &entries {
            let name = escape_html(name);
            let _ = writeln!(html, "<li><a href=\"{name}\">{name}</a></li>");
        }
        html.push_str("</ul>\n</body></html>\n");

        let mut response = Response::new(Body::from(html));
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );
        response
    }

    async fn respond(&self, req: Request<Body>) -> Response {
        let matched = req.extensions().get::<MatchedPath>().cloned();
        let original_path = req.uri().path().to_string();
        let mut relative = matched
            .as_ref()
            .map(|m| m.relative.clone())
            .unwrap_or_else(|| original_path.clone());
        if original_path.ends_with('/') && !relative.ends_with('/') {
            relative.push('/');
        }

        let readable = matches!(*req.method(), Method::GET | Method::HEAD);
        if self.directory_listing && readable && original_path.ends_with('/') {
            if let Some(dir) = self.listable_dir(&relative).await {
                return self.listing(&dir, &original_path).await;
            }
        }

        let (mut parts, body) = req.into_parts();
        parts.uri = rewrite_path(&parts.uri, &relative);
        let response = match self.serve.clone().oneshot(Request::from_parts(parts, body)).await {
            Ok(response) => response.map(Body::new),
            Err(never) => match never {},
        };
        match matched {
            Some(m) if m.prefix != "/" => prefix_redirect(response, &m.prefix),
            _ => response,
        }
    }
}

impl HttpHandler for FileHandler {
    fn handle(&self, req: Request<Body>) -> BoxFuture<'_, Response> {
        Box::pin(self.respond(req))
    }
}

fn rewrite_path(uri: &Uri, path: &str) -> Uri {
    let path_and_query = match uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    };
    Uri::builder()
        .path_and_query(path_and_query)
        .build()
        .unwrap_or_else(|_| uri.clone())
}

/// Directory redirects from `ServeDir` point below the rewritten path; put
/// the location prefix back.
fn prefix_redirect(mut response: Response, prefix: &str) -> Response {
    if !response.status().is_redirection() {
        return response;
    }
    let location = response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .filter(|v| v.starts_with('/'))
        .map(|v| format!("{prefix}{v}"));
    if let Some(value) = location.and_then(|l| HeaderValue::from_str(&l).ok()) {
        response.headers_mut().insert(header::LOCATION, value);
    }
    response
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

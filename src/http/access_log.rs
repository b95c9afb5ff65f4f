//! Access logging.
//!
//! One line per completed request, rendered from a pattern and emitted on
//! the `access_log` tracing target so subscribers can route it separately
//! from diagnostic output.
//!
//! # Pattern tokens
//! ```text
//! %h remote host     %l ident (-)       %u user (-)       %t time
//! %r request line    %s status          %b bytes sent     %D millis
//! %T seconds         %U path            %q query          %m method
//! %H protocol        %{i,Name} request header   %{o,Name} response header
//! ```
//! `common` and `combined` are accepted as pattern names.

use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, HttpBody};
use axum::http::{header, HeaderMap, HeaderName, Request};
use axum::response::Response;
use futures_util::future::BoxFuture;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::http::handler::{HandlerWrapper, HttpHandler, SharedHandler};
use crate::http::request::ConnectionInfo;

pub const ACCESS_LOG_TARGET: &str = "access_log";

const COMMON: &str = "%h %l %u %t \"%r\" %s %b";
const COMBINED: &str = "%h %l %u %t \"%r\" %s %b \"%{i,Referer}\" \"%{i,User-Agent}\"";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("unknown access log token '%{0}'")]
    UnknownToken(char),
    #[error("unterminated '%{{' in access log pattern")]
    Unterminated,
    #[error("invalid header token '%{{{0}}}'")]
    InvalidHeader(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    RemoteHost,
    Ident,
    User,
    Time,
    RequestLine,
    Status,
    BytesSent,
    Millis,
    Seconds,
    Path,
    Query,
    Method,
    Protocol,
    RequestHeader(HeaderName),
    ResponseHeader(HeaderName),
}

/// A parsed access log pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessLogPattern {
    tokens: Vec<Token>,
}

impl AccessLogPattern {
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        let source = match pattern {
            "common" => COMMON,
            "combined" => COMBINED,
            other => other,
        };

        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars();
        while let Some(c) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }
            let Some(code) = chars.next() else {
                literal.push('%');
                break;
            };
            let token = match code {
                '%' => {
                    literal.push('%');
                    continue;
                }
                'h' | 'a' => Token::RemoteHost,
                'l' => Token::Ident,
                'u' => Token::User,
                't' => Token::Time,
                'r' => Token::RequestLine,
                's' => Token::Status,
                'b' => Token::BytesSent,
                'D' => Token::Millis,
                'T' => Token::Seconds,
                'U' => Token::Path,
                'q' => Token::Query,
                'm' => Token::Method,
                'H' => Token::Protocol,
                '{' => {
                    let mut inner = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        inner.push(c);
                    }
                    if !closed {
                        return Err(PatternError::Unterminated);
                    }
                    parse_header_token(&inner)?
                }
                other => return Err(PatternError::UnknownToken(other)),
            };
            if !literal.is_empty() {
                tokens.push(Token::Literal(std::mem::take(&mut literal)));
            }
            tokens.push(token);
        }
        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }
        Ok(Self { tokens })
    }

    fn render(&self, entry: &Entry<'_>) -> String {
        let mut line = String::with_capacity(128);
        for token in &self.tokens {
            match token {
                Token::Literal(text) => line.push_str(text),
                Token::RemoteHost => line.push_str(&entry.remote),
                Token::Ident | Token::User => line.push('-'),
                Token::Time => line.push_str(&entry.time),
                Token::RequestLine => {
                    line.push_str(&entry.method);
                    line.push(' ');
                    line.push_str(&entry.target);
                    line.push(' ');
                    line.push_str(&entry.protocol);
                }
                Token::Status => line.push_str(&entry.status.to_string()),
                Token::BytesSent => match entry.bytes {
                    Some(bytes) => line.push_str(&bytes.to_string()),
                    None => line.push('-'),
                },
                Token::Millis => line.push_str(&entry.elapsed.as_millis().to_string()),
                Token::Seconds => line.push_str(&format!("{:.3}", entry.elapsed.as_secs_f64())),
                Token::Path => line.push_str(&entry.path),
                Token::Query => {
                    if let Some(query) = &entry.query {
                        line.push('?');
                        line.push_str(query);
                    }
                }
                Token::Method => line.push_str(&entry.method),
                Token::Protocol => line.push_str(&entry.protocol),
                Token::RequestHeader(name) => push_header(&mut line, &entry.request_headers, name),
                Token::ResponseHeader(name) => push_header(&mut line, entry.response_headers, name),
            }
        }
        line
    }
}

fn parse_header_token(inner: &str) -> Result<Token, PatternError> {
    let invalid = || PatternError::InvalidHeader(inner.to_string());
    let (kind, name) = inner.split_once(',').ok_or_else(invalid)?;
    let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|_| invalid())?;
    match kind.trim() {
        "i" => Ok(Token::RequestHeader(name)),
        "o" => Ok(Token::ResponseHeader(name)),
        _ => Err(invalid()),
    }
}

fn push_header(line: &mut String, headers: &HeaderMap, name: &HeaderName) {
    match headers.get(name).and_then(|v| v.to_str().ok()) {
        Some(value) => line.push_str(value),
        None => line.push('-'),
    }
}

struct Entry<'a> {
    remote: String,
    time: String,
    method: String,
    target: String,
    path: String,
    query: Option<String>,
    protocol: String,
    status: u16,
    bytes: Option<u64>,
    elapsed: std::time::Duration,
    request_headers: HeaderMap,
    response_headers: &'a HeaderMap,
}

/// Access log attached to a host.
pub struct AccessLogService {
    host: Arc<str>,
    pattern: Arc<AccessLogPattern>,
}

impl AccessLogService {
    pub fn new(host: &str, pattern: AccessLogPattern) -> Self {
        Self {
            host: Arc::from(host),
            pattern: Arc::new(pattern),
        }
    }

    pub fn from_pattern(host: &str, pattern: &str) -> Result<Self, PatternError> {
        Ok(Self::new(host, AccessLogPattern::parse(pattern)?))
    }

    pub fn pattern(&self) -> &AccessLogPattern {
        &self.pattern
    }
}

impl HandlerWrapper for AccessLogService {
    fn wrap(&self, next: SharedHandler) -> SharedHandler {
        Arc::new(AccessLogHandler {
            host: Arc::clone(&self.host),
            pattern: Arc::clone(&self.pattern),
            next,
        })
    }
}

struct AccessLogHandler {
    host: Arc<str>,
    pattern: Arc<AccessLogPattern>,
    next: SharedHandler,
}

impl HttpHandler for AccessLogHandler {
    fn handle(&self, req: Request<Body>) -> BoxFuture<'_, Response> {
        let start = Instant::now();
        let remote = req
            .extensions()
            .get::<ConnectionInfo>()
            .map(|info| info.peer_addr.ip().to_string())
            .unwrap_or_else(|| "-".to_string());
        let method = req.method().to_string();
        let target = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| req.uri().path().to_string());
        let path = req.uri().path().to_string();
        let query = req.uri().query().map(str::to_string);
        let protocol = format!("{:?}", req.version());
        let request_headers = req.headers().clone();

        Box::pin(async move {
            let response = self.next.handle(req).await;
            let bytes = response
                .headers()
                .get(header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .or_else(|| response.body().size_hint().exact());
            let line = self.pattern.render(&Entry {
                remote,
                time: format_time(OffsetDateTime::now_utc()),
                method,
                target,
                path,
                query,
                protocol,
                status: response.status().as_u16(),
                bytes,
                elapsed: start.elapsed(),
                request_headers,
                response_headers: response.headers(),
            });
            tracing::info!(target: ACCESS_LOG_TARGET, host = %self.host, "{}", line);
            response
        })
    }
}

fn format_time(now: OffsetDateTime) -> String {
    let format = format_description!(
        "[[[day]/[month repr:short]/[year]:[hour]:[minute]:[second] +0000]"
    );
    now.format(&format).unwrap_or_else(|_| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};
    use time::macros::datetime;

    fn entry(headers: &HeaderMap) -> Entry<'_> {
        let mut request_headers = HeaderMap::new();
        request_headers.insert(header::USER_AGENT, HeaderValue::from_static("curl/8"));
        Entry {
            remote: "10.0.0.1".into(),
            time: "[01/Jan/2024:00:00:00 +0000]".into(),
            method: "GET".into(),
            target: "/a?b=1".into(),
            path: "/a".into(),
            query: Some("b=1".into()),
            protocol: "HTTP/1.1".into(),
            status: 200,
            bytes: Some(12),
            elapsed: std::time::Duration::from_millis(7),
            request_headers,
            response_headers: headers,
        }
    }

    #[test]
    fn common_pattern_renders() {
        let headers = HeaderMap::new();
        let pattern = AccessLogPattern::parse("common").unwrap();
        assert_eq!(
            pattern.render(&entry(&headers)),
            "10.0.0.1 - - [01/Jan/2024:00:00:00 +0000] \"GET /a?b=1 HTTP/1.1\" 200 12"
        );
    }

    #[test]
    fn custom_tokens() {
        let mut headers = HeaderMap::new();
        headers.insert("x-served-by", HeaderValue::from_static("node-1"));
        let pattern = AccessLogPattern::parse("%m %U%q %D %{i,User-Agent} %{o,X-Served-By} 100%%").unwrap();
        assert_eq!(pattern.render(&entry(&headers)), "GET /a?b=1 7 curl/8 node-1 100%");
    }

    #[test]
    fn rejects_bad_tokens() {
        assert_eq!(AccessLogPattern::parse("%z"), Err(PatternError::UnknownToken('z')));
        assert_eq!(AccessLogPattern::parse("%{i,Host"), Err(PatternError::Unterminated));
        assert!(matches!(
            AccessLogPattern::parse("%{x,Host}"),
            Err(PatternError::InvalidHeader(_))
        ));
    }

    #[test]
    fn time_is_clf_formatted() {
        assert_eq!(
            format_time(datetime!(2024-03-05 07:08:09 UTC)),
            "[05/Mar/2024:07:08:09 +0000]"
        );
    }

    #[tokio::test]
    async fn wrapper_passes_response_through() {
        use crate::http::handler::handler_fn;
        use crate::http::response::text_response;

        let service = AccessLogService::from_pattern("default-host", "combined").unwrap();
        let handler = service.wrap(handler_fn(|_req: Request<Body>| async {
            text_response(StatusCode::CREATED, "made")
        }));
        let res = handler
            .handle(Request::builder().uri("/x").body(Body::empty()).unwrap())
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);
    }
}

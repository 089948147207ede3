//! Short-lived in-browser operation runner.
//!
//! Page-touching operations open a fresh CDP session straight against the
//! backend port (never through the proxy, so the proxy's connection set
//! stays a faithful census of downstream clients), perform their round
//! trips, and disconnect. Connecting resolves the DevTools WebSocket URL
//! from the backend's `/json/version` endpoint.
//!
//! # Submodules
//!
//! - [`dom`] - Element and bounding-box result types
//! - [`screenshot`] - Capture options, clipping precedence, output paths
//! - [`scripts`] - Injected JavaScript expressions

pub mod dom;
pub mod screenshot;
pub mod scripts;

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, Viewport};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::session::dom::BoundingBox;
use crate::session::screenshot::{capture_target, output_path, CaptureTarget};

pub use dom::DomElement;
pub use screenshot::{CapturedScreenshot, ClipRegion, ScreenshotFormat, ScreenshotOptions};

/// Default bound for a single awaited evaluation.
pub const DEFAULT_EVAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors surfaced by page operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The backend's HTTP debugging endpoint was unreachable.
    #[error("debugging endpoint unreachable on port {port}: {source}")]
    Endpoint {
        port: u16,
        #[source]
        source: reqwest::Error,
    },

    /// The version payload did not name a WebSocket endpoint.
    #[error("debugging endpoint on port {0} did not advertise a WebSocket URL")]
    NoWebSocketUrl(u16),

    /// A CDP-level failure.
    #[error("CDP session error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),

    /// The script evaluated but produced no usable value.
    #[error("script evaluation failed: {0}")]
    Evaluation(String),

    /// The operation exceeded its caller-supplied bound.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// No element matched the requested selector.
    #[error("no element matches selector {0:?}")]
    ElementNotFound(String),

    /// The requested URL could not be parsed into an origin.
    #[error("could not determine origin of {0:?}")]
    InvalidUrl(String),

    /// The page ended up on a different origin than requested.
    #[error(
        "origin mismatch: requested {requested} but the page loaded {actual} \
         (a redirect crossed origins; retry the fetch against {actual} directly)"
    )]
    OriginMismatch { requested: String, actual: String },

    /// Filesystem failure while persisting a result.
    #[error("failed to persist result: {0}")]
    Io(#[from] std::io::Error),
}

/// Parameters for the in-browser fetch operation.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub method: Option<String>,
    pub headers: Option<serde_json::Map<String, serde_json::Value>>,
    pub body: Option<String>,
    pub timeout: Duration,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: None,
            headers: None,
            body: None,
            timeout: DEFAULT_EVAL_TIMEOUT,
        }
    }
}

/// Resolve the DevTools WebSocket URL advertised on a backend port.
pub async fn devtools_ws_url(port: u16) -> Result<String, SessionError> {
    let url = format!("http://127.0.0.1:{}/json/version", port);
    let payload: serde_json::Value = reqwest::get(&url)
        .await
        .map_err(|source| SessionError::Endpoint { port, source })?
        .json()
        .await
        .map_err(|source| SessionError::Endpoint { port, source })?;

    payload
        .get("webSocketDebuggerUrl")
        .and_then(|value| value.as_str())
        .map(str::to_string)
        .ok_or(SessionError::NoWebSocketUrl(port))
}

/// Extract `scheme://host[:port]` from a URL string.
pub(crate) fn origin_of(url: &str) -> Option<String> {
    let scheme_end = url.find("://")?;
    let scheme = &url[..scheme_end];
    if scheme.is_empty() {
        return None;
    }
    let rest = &url[scheme_end + 3..];
    let host_end = rest
        .find(|c| matches!(c, '/' | '?' | '#'))
        .unwrap_or(rest.len());
    let host = &rest[..host_end];
    if host.is_empty() {
        return None;
    }
    Some(format!("{}://{}", scheme.to_lowercase(), host.to_lowercase()))
}

/// A connected, short-lived CDP session.
pub struct PageRunner {
    browser: Browser,
    handler_task: JoinHandle<()>,
}

impl PageRunner {
    /// Connect to the browser listening on `backend_port`.
    pub async fn connect(backend_port: u16) -> Result<Self, SessionError> {
        let ws_url = devtools_ws_url(backend_port).await?;
        debug!(port = backend_port, ws = %ws_url, "opening CDP session");

        let (browser, mut handler) = Browser::connect(ws_url).await?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            browser,
            handler_task,
        })
    }

    /// The page operations act on: the first open page, or a fresh blank
    /// one when the browser has none.
    async fn page(&self) -> Result<Page, SessionError> {
        let pages = self.browser.pages().await?;
        match pages.into_iter().next() {
            Some(page) => Ok(page),
            None => Ok(self.browser.new_page("about:blank").await?),
        }
    }

    /// Navigate the current page.
    pub async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), SessionError> {
        let page = self.page().await?;
        tokio::time::timeout(timeout, page.goto(url))
            .await
            .map_err(|_| SessionError::Timeout(timeout))??;
        Ok(())
    }

    /// Evaluate an expression on the current page, awaiting promises, and
    /// return its value.
    pub async fn eval(
        &self,
        expression: &str,
        timeout: Duration,
    ) -> Result<serde_json::Value, SessionError> {
        let page = self.page().await?;
        self.eval_on(&page, expression, timeout).await
    }

    async fn eval_on(
        &self,
        page: &Page,
        expression: &str,
        timeout: Duration,
    ) -> Result<serde_json::Value, SessionError> {
        let params = EvaluateParams::builder()
            .expression(expression)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(SessionError::Evaluation)?;

        let result = tokio::time::timeout(timeout, page.evaluate(params))
            .await
            .map_err(|_| SessionError::Timeout(timeout))??;

        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    /// Capture a screenshot per the clipping precedence and save it.
    pub async fn capture(
        &self,
        options: &ScreenshotOptions,
    ) -> Result<CapturedScreenshot, SessionError> {
        let page = self.page().await?;

        let mut full_page = false;
        let clip = match capture_target(options) {
            CaptureTarget::Clip(clip) => Some(clip),
            CaptureTarget::Element(selector) => {
                let value = self
                    .eval_on(&page, &scripts::bounding_box(&selector), DEFAULT_EVAL_TIMEOUT)
                    .await?;
                let encoded = value
                    .as_str()
                    .ok_or_else(|| SessionError::ElementNotFound(selector.clone()))?;
                let bounds: BoundingBox = serde_json::from_str(encoded)
                    .map_err(|e| SessionError::Evaluation(e.to_string()))?;
                if bounds.is_empty() {
                    return Err(SessionError::ElementNotFound(selector));
                }
                Some(bounds.into())
            }
            CaptureTarget::FullPage => {
                full_page = true;
                None
            }
            CaptureTarget::Viewport => None,
        };

        let mut params = ScreenshotParams::builder()
            .format(cdp_format(options.format))
            .full_page(full_page);
        if let Some(clip) = clip {
            params = params.clip(Viewport {
                x: clip.x,
                y: clip.y,
                width: clip.width,
                height: clip.height,
                scale: clip.scale,
            });
        }

        let bytes = page.screenshot(params.build()).await?;

        let path = output_path(options.output_dir.as_deref(), options.format);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &bytes).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "screenshot saved");

        Ok(CapturedScreenshot {
            path,
            base64: BASE64.encode(&bytes),
        })
    }

    /// Fetch a URL from page context, carrying the page's cookies.
    ///
    /// A transient tab navigates to the URL's origin first; if the page
    /// lands on a different origin (a cross-origin redirect), the operation
    /// fails rather than silently fetching from the wrong origin. The tab
    /// is closed on every exit path.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<String, SessionError> {
        let requested_origin = origin_of(&request.url)
            .ok_or_else(|| SessionError::InvalidUrl(request.url.clone()))?;

        let page = self.browser.new_page("about:blank").await?;
        let result = self.fetch_on(&page, request, &requested_origin).await;

        if let Err(e) = page.close().await {
            debug!("transient fetch tab close failed: {}", e);
        }
        result
    }

    async fn fetch_on(
        &self,
        page: &Page,
        request: &FetchRequest,
        requested_origin: &str,
    ) -> Result<String, SessionError> {
        tokio::time::timeout(request.timeout, page.goto(format!("{}/", requested_origin)))
            .await
            .map_err(|_| SessionError::Timeout(request.timeout))??;

        let actual = self
            .eval_on(page, scripts::ORIGIN, request.timeout)
            .await?
            .as_str()
            .map(str::to_lowercase)
            .unwrap_or_default();
        if actual != requested_origin {
            return Err(SessionError::OriginMismatch {
                requested: requested_origin.to_string(),
                actual,
            });
        }

        // The origin page itself is just a cookie carrier; stop loading the
        // rest of it before running the fetch.
        let _ = self.eval_on(page, scripts::STOP_LOADING, request.timeout).await;

        let script = scripts::page_fetch(
            &request.url,
            request.method.as_deref(),
            request.headers.as_ref(),
            request.body.as_deref(),
        );
        let value = self.eval_on(page, &script, request.timeout).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SessionError::Evaluation("fetch script returned no value".to_string()))
    }

    /// Disconnect the session.
    pub async fn close(self) {
        // Dropping `self` here drops `browser` and aborts `handler_task`
        // via the `Drop` impl below.
    }
}

impl Drop for PageRunner {
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}

/// Map our format enum onto the CDP capture format.
fn cdp_format(format: ScreenshotFormat) -> CaptureScreenshotFormat {
    match format {
        ScreenshotFormat::Png => CaptureScreenshotFormat::Png,
        ScreenshotFormat::Jpeg => CaptureScreenshotFormat::Jpeg,
        ScreenshotFormat::Webp => CaptureScreenshotFormat::Webp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_of_basic() {
        assert_eq!(
            origin_of("https://a.example/x?y#z").as_deref(),
            Some("https://a.example")
        );
        assert_eq!(
            origin_of("http://localhost:8080/path").as_deref(),
            Some("http://localhost:8080")
        );
        assert_eq!(
            origin_of("HTTPS://A.Example/x").as_deref(),
            Some("https://a.example")
        );
    }

    #[test]
    fn test_origin_of_bare_host() {
        assert_eq!(
            origin_of("https://a.example").as_deref(),
            Some("https://a.example")
        );
    }

    #[test]
    fn test_origin_of_rejects_garbage() {
        assert!(origin_of("not a url").is_none());
        assert!(origin_of("://missing-scheme").is_none());
        assert!(origin_of("https://").is_none());
    }

    #[test]
    fn test_fetch_request_defaults() {
        let request = FetchRequest::new("https://api.example/data");
        assert_eq!(request.timeout, DEFAULT_EVAL_TIMEOUT);
        assert!(request.method.is_none());
    }
}

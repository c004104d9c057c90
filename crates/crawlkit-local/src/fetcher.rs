//! Plain-HTTP implementation of the [`Fetcher`] trait.
//!
//! No JavaScript, no rendering: one HTTP exchange per URL. Also understands
//! two local schemes so the pipeline can run without a network at all:
//! `raw://<html>` returns the literal HTML and `file://` reads from disk;
//! both yield status 200 with empty headers.

use crawlkit_core::{
    Error, FetchHook, FetchOptions, FetchResponse, Fetcher, Result,
};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

#[derive(Default)]
struct Hooks {
    before_request: Option<crawlkit_core::BeforeRequestHook>,
    after_response: Option<crawlkit_core::AfterResponseHook>,
}

pub struct HttpFetcher {
    /// One client per (verify_ssl, follow_redirects) combination; reqwest
    /// bakes both into the client.
    clients: [reqwest::Client; 4],
    user_agent: Mutex<String>,
    hooks: Mutex<Hooks>,
}

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; Crawlkit/1.0)";

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let build = |verify: bool, redirects: bool| -> Result<reqwest::Client> {
            reqwest::Client::builder()
                .danger_accept_invalid_certs(!verify)
                .redirect(if redirects {
                    reqwest::redirect::Policy::limited(10)
                } else {
                    reqwest::redirect::Policy::none()
                })
                .connect_timeout(Duration::from_secs(10))
                .build()
                .map_err(|e| Error::FetchNetwork(e.to_string()))
        };
        Ok(Self {
            clients: [
                build(false, false)?,
                build(false, true)?,
                build(true, false)?,
                build(true, true)?,
            ],
            user_agent: Mutex::new(DEFAULT_USER_AGENT.to_string()),
            hooks: Mutex::new(Hooks::default()),
        })
    }

    fn client(&self, opts: &FetchOptions) -> &reqwest::Client {
        let idx = (opts.verify_ssl as usize) * 2 + (opts.follow_redirects as usize);
        &self.clients[idx]
    }

    async fn fetch_http(&self, url: &str, opts: &FetchOptions) -> Result<FetchResponse> {
        let method: reqwest::Method = opts
            .method
            .to_uppercase()
            .parse()
            .map_err(|_| Error::FetchNetwork(format!("bad method: {}", opts.method)))?;

        let mut headers = opts.headers.clone();
        if let Some(hook) = self.hooks.lock().unwrap().before_request.clone() {
            hook(url, &mut headers);
        }

        let ua = opts
            .user_agent
            .clone()
            .unwrap_or_else(|| self.user_agent.lock().unwrap().clone());

        let mut rb = self
            .client(opts)
            .request(method, url)
            .timeout(opts.page_timeout)
            .header(reqwest::header::USER_AGENT, ua);
        for (k, v) in &headers {
            if let (Ok(name), Ok(value)) = (
                reqwest::header::HeaderName::from_bytes(k.as_bytes()),
                reqwest::header::HeaderValue::from_str(v),
            ) {
                rb = rb.header(name, value);
            }
        }
        if let Some(body) = &opts.body {
            rb = rb.body(body.clone());
        }

        let resp = rb.send().await.map_err(|e| classify_error(url, &e))?;
        let status_code = resp.status().as_u16();
        let redirected_url = resp.url().to_string();
        let mut response_headers = BTreeMap::new();
        for (k, v) in resp.headers() {
            if let Ok(s) = v.to_str() {
                response_headers.insert(k.as_str().to_string(), s.to_string());
            }
        }
        let html = resp.text().await.map_err(|e| classify_error(url, &e))?;

        Ok(FetchResponse {
            html,
            status_code,
            redirected_url,
            response_headers,
            screenshot: None,
            pdf: None,
            js_result: None,
            downloaded_files: Vec::new(),
        })
    }

    async fn fetch_file(&self, url: &str) -> Result<FetchResponse> {
        let parsed = Url::parse(url).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        let path = parsed
            .to_file_path()
            .map_err(|_| Error::InvalidUrl(format!("not a file path: {url}")))?;
        let html = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::FetchNetwork(format!("read {}: {e}", path.display())))?;
        Ok(FetchResponse::synthetic(url, html))
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, opts: &FetchOptions) -> Result<FetchResponse> {
        let out = if let Some(html) = url.strip_prefix("raw://").or_else(|| url.strip_prefix("raw:"))
        {
            Ok(FetchResponse::synthetic(url, html.to_string()))
        } else if url.starts_with("file://") {
            self.fetch_file(url).await
        } else {
            self.fetch_http(url, opts).await
        };

        if let Ok(resp) = &out {
            if let Some(hook) = self.hooks.lock().unwrap().after_response.clone() {
                hook(resp);
            }
        }
        out
    }

    fn set_hook(&self, hook: FetchHook) {
        let mut hooks = self.hooks.lock().unwrap();
        match hook {
            FetchHook::BeforeRequest(f) => hooks.before_request = Some(f),
            FetchHook::AfterResponse(f) => hooks.after_response = Some(f),
        }
    }

    fn update_user_agent(&self, user_agent: &str) {
        *self.user_agent.lock().unwrap() = user_agent.to_string();
    }
}

fn classify_error(url: &str, e: &reqwest::Error) -> Error {
    if e.is_timeout() {
        return Error::FetchTimeout(url.to_string());
    }
    // reqwest does not expose a TLS error kind; the error chain names it.
    let chain = format!("{e:?}").to_lowercase();
    if chain.contains("certificate") || chain.contains("tls") || chain.contains("ssl") {
        return Error::FetchSsl(format!("{url}: {e}"));
    }
    if let Some(status) = e.status() {
        return Error::FetchHttp {
            status: status.as_u16(),
            url: url.to_string(),
        };
    }
    Error::FetchNetwork(format!("{url}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::{header, HeaderMap},
        response::Redirect,
        routing::{get, post},
        Router,
    };
    use std::io::Write;
    use std::net::SocketAddr;
    use std::sync::Arc;

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn plain_get_returns_body_and_headers() {
        let app = Router::new().route(
            "/",
            get(|| async { ([(header::CONTENT_TYPE, "text/html")], "<p>hi</p>") }),
        );
        let addr = serve(app).await;

        let f = HttpFetcher::new().unwrap();
        let resp = f
            .fetch(&format!("http://{addr}/"), &FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.html, "<p>hi</p>");
        assert_eq!(
            resp.response_headers.get("content-type").map(String::as_str),
            Some("text/html")
        );
    }

    #[tokio::test]
    async fn post_sends_configured_body() {
        let app = Router::new().route("/", post(|body: String| async move { body }));
        let addr = serve(app).await;

        let f = HttpFetcher::new().unwrap();
        let opts = FetchOptions {
            method: "POST".into(),
            body: Some("payload".into()),
            ..Default::default()
        };
        let resp = f.fetch(&format!("http://{addr}/"), &opts).await.unwrap();
        assert_eq!(resp.html, "payload");
    }

    #[tokio::test]
    async fn redirects_surface_final_url() {
        let app = Router::new()
            .route("/start", get(|| async { Redirect::permanent("/end") }))
            .route("/end", get(|| async { "arrived" }));
        let addr = serve(app).await;

        let f = HttpFetcher::new().unwrap();
        let resp = f
            .fetch(&format!("http://{addr}/start"), &FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(resp.html, "arrived");
        assert!(resp.redirected_url.ends_with("/end"));

        // With redirects disabled, the 308 comes back as-is.
        let opts = FetchOptions {
            follow_redirects: false,
            ..Default::default()
        };
        let resp = f.fetch(&format!("http://{addr}/start"), &opts).await.unwrap();
        assert_eq!(resp.status_code, 308);
    }

    #[tokio::test]
    async fn raw_scheme_returns_literal_html() {
        let f = HttpFetcher::new().unwrap();
        let resp = f
            .fetch("raw://<html><body>ok</body></html>", &FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.html, "<html><body>ok</body></html>");
        assert!(resp.response_headers.is_empty());
    }

    #[tokio::test]
    async fn file_scheme_reads_local_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(tmp, "<h1>from disk</h1>").unwrap();
        let url = format!("file://{}", tmp.path().display());

        let f = HttpFetcher::new().unwrap();
        let resp = f.fetch(&url, &FetchOptions::default()).await.unwrap();
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.html, "<h1>from disk</h1>");
    }

    #[tokio::test]
    async fn connection_refused_is_network_error() {
        let f = HttpFetcher::new().unwrap();
        let err = f
            .fetch("http://127.0.0.1:1/", &FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FetchNetwork(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn timeout_is_classified() {
        let app = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        );
        let addr = serve(app).await;

        let f = HttpFetcher::new().unwrap();
        let opts = FetchOptions {
            page_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let err = f.fetch(&format!("http://{addr}/slow"), &opts).await.unwrap_err();
        assert!(matches!(err, Error::FetchTimeout(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn hooks_mutate_headers_and_observe_responses() {
        let app = Router::new().route(
            "/",
            get(|headers: HeaderMap| async move {
                headers
                    .get("x-injected")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("missing")
                    .to_string()
            }),
        );
        let addr = serve(app).await;

        let f = HttpFetcher::new().unwrap();
        f.set_hook(FetchHook::BeforeRequest(Arc::new(|_url, headers| {
            headers.insert("x-injected".into(), "yes".into());
        })));
        let seen = Arc::new(std::sync::atomic::AtomicU16::new(0));
        let seen2 = Arc::clone(&seen);
        f.set_hook(FetchHook::AfterResponse(Arc::new(move |resp| {
            seen2.store(resp.status_code, std::sync::atomic::Ordering::SeqCst);
        })));

        let resp = f
            .fetch(&format!("http://{addr}/"), &FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(resp.html, "yes");
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 200);
    }

    #[tokio::test]
    async fn user_agent_update_applies_to_later_requests() {
        let app = Router::new().route(
            "/",
            get(|headers: HeaderMap| async move {
                headers
                    .get(header::USER_AGENT)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string()
            }),
        );
        let addr = serve(app).await;

        let f = HttpFetcher::new().unwrap();
        f.update_user_agent("custom-agent/2.0");
        let resp = f
            .fetch(&format!("http://{addr}/"), &FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(resp.html, "custom-agent/2.0");

        // A per-run user agent takes precedence.
        let opts = FetchOptions {
            user_agent: Some("run-agent/1.0".into()),
            ..Default::default()
        };
        let resp = f.fetch(&format!("http://{addr}/"), &opts).await.unwrap();
        assert_eq!(resp.html, "run-agent/1.0");
    }

    #[tokio::test]
    async fn fetch_many_preserves_order_and_isolates_failures() {
        let app = Router::new().route("/ok", get(|| async { "fine" }));
        let addr = serve(app).await;

        let f = HttpFetcher::new().unwrap();
        let urls = vec![
            format!("http://{addr}/ok"),
            "http://127.0.0.1:1/".to_string(),
            "raw://<p>r</p>".to_string(),
        ];
        let out = f.fetch_many(&urls, &FetchOptions::default()).await;
        assert_eq!(out.len(), 3);
        assert!(out[0].is_ok());
        assert!(out[1].is_err());
        assert_eq!(out[2].as_ref().unwrap().html, "<p>r</p>");
    }
}

//! WaveKit Smoke Harness
//!
//! Drives a full service worker flow end to end: register a worker, install
//! its pre-cache manifest, activate, then take the origin offline and replay
//! the manifest to prove the app shell serves entirely from cache. Prints a
//! JSON result line for CI.
//!
//! By default the harness runs against a scripted in-process origin so it has
//! no network dependency. Pass `--origin` to exercise a real server instead
//! (the offline leg is skipped in that mode).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, StatusCode};
use serde_json::json;
use tracing::{error, info};
use url::Url;

use wavekit_common::logging::{init_logging, LogConfig, LogFormat};
use wavekit_fetch::{FetchError, Fetcher, HttpFetcher, Request, Response};
use wavekit_sw::{FetchEvent, ResponseSource, ServiceWorkerHost, SwEvent, WorkerConfig};

const DEFAULT_SCOPE: &str = "https://smoke.wavekit.test/";
const DEFAULT_CACHE_NAME: &str = "app-shell";

const SHELL_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>WaveKit Demo</title>
    <link rel="manifest" href="/manifest.json">
    <link rel="stylesheet" href="/src/css/styles.css">
</head>
<body>
    <img src="/assets/images/logo.svg" alt="WaveKit">
    <h1>WaveKit Demo</h1>
    <p>This shell is pre-cached at install time.</p>
    <img src="/assets/images/offline.svg" alt="offline" hidden>
    <script src="/src/js/main.js"></script>
</body>
</html>"#;

const MANIFEST_JSON: &str =
    r#"{"name":"WaveKit Demo","short_name":"WaveKit","start_url":"/","display":"standalone"}"#;

const MAIN_JS: &str = r#"document.querySelector('img[alt=offline]').hidden = navigator.onLine;"#;

const STYLES_CSS: &str = r#"body { font-family: system-ui, sans-serif; margin: 40px auto; max-width: 640px; }"#;

const LOGO_SVG: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 16 16"><path d="M0 8q4-8 8 0t8 0"/></svg>"#;

const OFFLINE_SVG: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 16 16"><path d="M2 2l12 12M8 12a1 1 0 100 2"/></svg>"#;

/// In-process origin with a fixed route table and an offline switch.
struct ScriptedSite {
    routes: Vec<(&'static str, &'static str, &'static str)>,
    offline: AtomicBool,
    requests: AtomicUsize,
}

impl ScriptedSite {
    /// A small installable app shell plus one dynamic endpoint.
    fn shell() -> Arc<Self> {
        Arc::new(Self {
            routes: vec![
                ("/", "text/html", SHELL_HTML),
                ("/manifest.json", "application/json", MANIFEST_JSON),
                ("/src/js/main.js", "text/javascript", MAIN_JS),
                ("/src/css/styles.css", "text/css", STYLES_CSS),
                ("/assets/images/logo.svg", "image/svg+xml", LOGO_SVG),
                ("/assets/images/offline.svg", "image/svg+xml", OFFLINE_SVG),
                ("/api/now", "application/json", r#"{"now":"scripted"}"#),
            ],
            offline: AtomicBool::new(false),
            requests: AtomicUsize::new(0),
        })
    }

    fn go_offline(&self) {
        self.offline.store(true, Ordering::Relaxed);
    }

    fn request_count(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Fetcher for ScriptedSite {
    async fn fetch(&self, request: Request) -> Result<Response, FetchError> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if self.offline.load(Ordering::Relaxed) {
            return Err(FetchError::RequestFailed(format!(
                "origin offline: {}",
                request.url
            )));
        }
        let path = request.url.path();
        let (status, content_type, body) = match self
            .routes
            .iter()
            .find(|(route, _, _)| *route == path)
        {
            Some((_, content_type, body)) => (StatusCode::OK, *content_type, *body),
            None => (StatusCode::NOT_FOUND, "text/plain", "not found"),
        };
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static(content_type));
        Ok(Response {
            request_id: request.id,
            url: request.url.clone(),
            status,
            headers,
            content_type: None,
            body: Bytes::from_static(body.as_bytes()),
        })
    }
}

/// Parse command line arguments
struct Args {
    origin: Option<String>,
    cache_name: String,
    manifest: Vec<String>,
    result_output: Option<String>,
    log_json: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut origin = None;
        let mut cache_name = DEFAULT_CACHE_NAME.to_string();
        let mut manifest: Vec<String> = [
            "/",
            "/manifest.json",
            "/src/js/main.js",
            "/src/css/styles.css",
            "/assets/images/logo.svg",
            "/assets/images/offline.svg",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let mut result_output = None;
        let mut log_json = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--origin" => {
                    origin = args.next();
                }
                "--cache-name" => {
                    if let Some(val) = args.next() {
                        cache_name = val;
                    }
                }
                "--manifest" => {
                    if let Some(val) = args.next() {
                        manifest = val
                            .split(',')
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(String::from)
                            .collect();
                    }
                }
                "--result-output" => {
                    result_output = args.next();
                }
                "--log-json" => {
                    log_json = true;
                }
                _ => {}
            }
        }

        Self {
            origin,
            cache_name,
            manifest,
            result_output,
            log_json,
        }
    }
}

fn fail(reason: &str, detail: &str) -> ! {
    let result = json!({
        "status": "fail",
        "reason": reason,
        "detail": detail,
    });
    println!("{}", result);
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let log_config = if args.log_json {
        LogConfig::default().with_format(LogFormat::Json)
    } else {
        LogConfig::default()
    };
    init_logging(log_config);

    info!(
        origin = ?args.origin,
        cache = %args.cache_name,
        manifest_entries = args.manifest.len(),
        "Starting WaveKit smoke harness"
    );

    let start = Instant::now();

    let scripted: Option<Arc<ScriptedSite>>;
    let fetcher: Arc<dyn Fetcher>;
    let scope: Url;
    match &args.origin {
        Some(origin) => {
            scope = match Url::parse(origin) {
                Ok(url) => url,
                Err(e) => fail("bad_origin", &e.to_string()),
            };
            fetcher = match HttpFetcher::with_defaults() {
                Ok(f) => Arc::new(f),
                Err(e) => fail("fetcher_init", &e.to_string()),
            };
            scripted = None;
        }
        None => {
            let site = ScriptedSite::shell();
            scope = Url::parse(DEFAULT_SCOPE).expect("default scope parses");
            fetcher = site.clone();
            scripted = Some(site);
        }
    }

    let (host, mut events) = ServiceWorkerHost::new(fetcher);
    let config = WorkerConfig::new(scope.clone(), args.cache_name.clone())
        .with_precache(args.manifest.clone());

    let key = match host.register(config).await {
        Ok(key) => key,
        Err(e) => fail("register_failed", &e.to_string()),
    };

    let install_start = Instant::now();
    if let Err(e) = host.install(&key).await {
        error!(error = %e, "Install failed");
        fail("install_failed", &e.to_string());
    }
    let install_ms = install_start.elapsed().as_millis();

    if let Err(e) = host.activate(&key).await {
        fail("activate_failed", &e.to_string());
    }

    // An uncached fetch while the origin is still reachable goes to the network.
    let mut network_leg = json!(null);
    if let Ok(probe) = scope.join("/api/now") {
        match host.handle_fetch(FetchEvent::get(probe)).await {
            Ok(served) => {
                network_leg = json!({
                    "status": served.status,
                    "source": format!("{:?}", served.source),
                });
                if served.source != ResponseSource::Network {
                    error!("Uncached probe unexpectedly served from cache");
                }
            }
            Err(e) => {
                network_leg = json!({ "error": e.to_string() });
            }
        }
    }

    if let Some(site) = &scripted {
        site.go_offline();
        info!("Origin switched offline; replaying manifest");
    }

    let mut from_cache = 0usize;
    let mut misses = Vec::new();
    for entry in &args.manifest {
        let url = match scope.join(entry) {
            Ok(url) => url,
            Err(e) => {
                misses.push(json!({ "entry": entry, "error": e.to_string() }));
                continue;
            }
        };
        match host.handle_fetch(FetchEvent::get(url.clone())).await {
            Ok(served) if served.source == ResponseSource::Cache => {
                info!(url = %url, bytes = served.body.len(), "Served from cache");
                from_cache += 1;
            }
            Ok(served) => {
                error!(url = %url, source = ?served.source, "Expected a cache hit");
                misses.push(json!({ "entry": entry, "source": format!("{:?}", served.source) }));
            }
            Err(e) => {
                error!(url = %url, error = %e, "Replay fetch failed");
                misses.push(json!({ "entry": entry, "error": e.to_string() }));
            }
        }
    }

    // Offline, an uncached path must surface the network failure.
    let mut offline_fallback_errored = None;
    if scripted.is_some() {
        if let Ok(probe) = scope.join("/api/now") {
            match host.handle_fetch(FetchEvent::get(probe)).await {
                Err(e) => {
                    info!(error = %e, "Uncached fetch fails offline, as it should");
                    offline_fallback_errored = Some(true);
                }
                Ok(_) => {
                    error!("Uncached fetch unexpectedly succeeded offline");
                    offline_fallback_errored = Some(false);
                }
            }
        }
    }

    let mut lifecycle = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SwEvent::StateChange { state, .. } = event {
            lifecycle.push(state);
        }
    }

    let cache_entries = {
        let caches = host.caches.read().await;
        caches.get(&args.cache_name).map(|c| c.len())
    };

    let pass = misses.is_empty() && offline_fallback_errored != Some(false);
    let result = json!({
        "status": if pass { "pass" } else { "fail" },
        "scope": key,
        "cache": {
            "name": args.cache_name,
            "entries": cache_entries,
        },
        "replay": {
            "manifest": args.manifest.len(),
            "from_cache": from_cache,
            "misses": misses,
        },
        "network_leg": network_leg,
        "offline_fallback_errored": offline_fallback_errored,
        "origin_requests": scripted.as_ref().map(|s| s.request_count()),
        "lifecycle": lifecycle,
        "install_ms": install_ms,
        "elapsed_ms": start.elapsed().as_millis(),
    });
    println!("{}", result);

    if let Some(path) = &args.result_output {
        if let Err(e) = std::fs::write(path, result.to_string()) {
            error!(error = %e, ?path, "Failed to write result output");
        } else {
            info!(?path, "Result written");
        }
    }

    std::process::exit(if pass { 0 } else { 1 });
}

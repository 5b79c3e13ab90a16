//! Integration tests for Switchyard

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use switchyard::config::{GatewayOptions, ServiceRegistry, StartupPolicy};
use switchyard::middleware;
use switchyard::pool::ConnectionPool;
use switchyard::router::build_router;
use switchyard::server::GatewayServer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Start a backend that answers `<tag> <method> <path-and-query> <body>`
/// and echoes the forwarding headers it received
async fn start_mock_backend(tag: &'static str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| async move {
                    let method = req.method().clone();
                    let target = req
                        .uri()
                        .path_and_query()
                        .map(|pq| pq.to_string())
                        .unwrap_or_default();
                    let forwarded_for = header(&req, "x-forwarded-for");
                    let forwarded_host = header(&req, "x-forwarded-host");
                    let request_id = header(&req, "x-request-id");
                    let body = req.into_body().collect().await.unwrap().to_bytes();

                    let text = format!(
                        "{tag} {method} {target} {}",
                        String::from_utf8_lossy(&body)
                    );
                    let response = Response::builder()
                        .header("x-seen-forwarded-for", forwarded_for)
                        .header("x-seen-forwarded-host", forwarded_host)
                        .header("x-seen-request-id", request_id)
                        .header("access-control-allow-origin", "https://backend.example")
                        .header("keep-alive", "timeout=5")
                        .body(Full::new(Bytes::from(text)))
                        .unwrap();
                    Ok::<_, Infallible>(response)
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    port
}

/// Start a backend that records every request target and request id it sees
async fn start_counting_backend() -> (u16, Arc<AtomicUsize>, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let hits = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let (task_hits, task_seen) = (Arc::clone(&hits), Arc::clone(&seen));
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let (hits, seen) = (Arc::clone(&task_hits), Arc::clone(&task_seen));
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let (hits, seen) = (Arc::clone(&hits), Arc::clone(&seen));
                    async move {
                        let count = hits.fetch_add(1, Ordering::SeqCst) + 1;
                        let target = req
                            .uri()
                            .path_and_query()
                            .map(|pq| pq.to_string())
                            .unwrap_or_default();
                        seen.lock()
                            .unwrap()
                            .push(format!("{target} {}", header(&req, "x-request-id")));
                        Ok::<_, Infallible>(Response::new(Full::new(Bytes::from(format!(
                            "hit {count}"
                        )))))
                    }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    (port, hits, seen)
}

fn header(req: &Request<Incoming>, name: &str) -> String {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

/// A port with nothing listening on it
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn registry_json(services: &[(&str, &str, u16)]) -> String {
    let entries: Vec<serde_json::Value> = services
        .iter()
        .map(|(name, prefix, port)| {
            serde_json::json!({ "name": name, "prefix": prefix, "port": port.to_string() })
        })
        .collect();
    serde_json::Value::Array(entries).to_string()
}

/// Start the full gateway on an ephemeral port
async fn start_gateway(
    dir: &Path,
    services: &[(&str, &str, u16)],
    policy: StartupPolicy,
) -> SocketAddr {
    let services_path = dir.join("services.json");
    std::fs::write(&services_path, registry_json(services)).unwrap();

    let static_dir = dir.join("cdn");
    std::fs::create_dir_all(&static_dir).unwrap();
    std::fs::write(static_dir.join("app.js"), "console.log('hi');").unwrap();

    let options = GatewayOptions {
        services_path: services_path.clone(),
        static_dir,
        policy,
        live_count: false,
    };
    let registry = ServiceRegistry::load(&services_path).unwrap();
    let router = build_router(&registry, &options, ConnectionPool::default()).unwrap();

    let server = GatewayServer::bind(
        "127.0.0.1:0".parse().unwrap(),
        Arc::new(middleware::chain(router)),
    )
    .await
    .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    addr
}

/// Send a raw HTTP/1.1 request and read the whole response
async fn http_request(
    addr: SocketAddr,
    method: &str,
    path: &str,
    extra_headers: &str,
    body: &str,
) -> Result<String, Box<dyn std::error::Error>> {
    let mut stream = TcpStream::connect(addr).await?;

    let request = format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        method,
        path,
        addr,
        extra_headers,
        body.len(),
        body
    );
    stream.write_all(request.as_bytes()).await?;

    let mut response = String::new();
    stream.read_to_string(&mut response).await?;
    Ok(response)
}

async fn http_get(addr: SocketAddr, path: &str) -> Result<String, Box<dyn std::error::Error>> {
    http_request(addr, "GET", path, "", "").await
}

fn status_line(response: &str) -> &str {
    response.lines().next().unwrap_or("")
}

fn header_value<'a>(response: &'a str, name: &str) -> Option<&'a str> {
    let head = response.split("\r\n\r\n").next()?;
    head.lines().skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.eq_ignore_ascii_case(name).then(|| value.trim())
    })
}

fn body(response: &str) -> &str {
    response.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("")
}

#[tokio::test]
async fn test_prefix_stripped_per_service() {
    let port_a = start_mock_backend("A").await;
    let port_b = start_mock_backend("B").await;
    let dir = tempfile::tempdir().unwrap();
    let gateway = start_gateway(
        dir.path(),
        &[("A", "/a/", port_a), ("B", "/b/", port_b)],
        StartupPolicy::FailFast,
    )
    .await;

    let response = http_get(gateway, "/a/foo").await.unwrap();
    assert!(status_line(&response).contains("200"), "{response}");
    assert_eq!(body(&response), "A GET /foo ");

    let response = http_get(gateway, "/b/bar?x=1&y=2").await.unwrap();
    assert!(status_line(&response).contains("200"), "{response}");
    assert_eq!(body(&response), "B GET /bar?x=1&y=2 ");
}

#[tokio::test]
async fn test_post_body_and_method_forwarded() {
    let port = start_mock_backend("A").await;
    let dir = tempfile::tempdir().unwrap();
    let gateway = start_gateway(dir.path(), &[("A", "/a/", port)], StartupPolicy::FailFast).await;

    let response = http_request(gateway, "POST", "/a/items", "", "payload")
        .await
        .unwrap();
    assert_eq!(body(&response), "A POST /items payload");
}

#[tokio::test]
async fn test_proxy_headers() {
    let port = start_mock_backend("A").await;
    let dir = tempfile::tempdir().unwrap();
    let gateway = start_gateway(dir.path(), &[("A", "/a/", port)], StartupPolicy::FailFast).await;

    let response = http_request(gateway, "GET", "/a/", "X-Request-Id: req-42\r\n", "")
        .await
        .unwrap();

    assert_eq!(header_value(&response, "x-seen-forwarded-for"), Some("127.0.0.1"));
    assert_eq!(
        header_value(&response, "x-seen-forwarded-host"),
        Some(gateway.to_string().as_str())
    );
    assert_eq!(header_value(&response, "x-seen-request-id"), Some("req-42"));
    assert_eq!(header_value(&response, "x-request-id"), Some("req-42"));
    // Upstream CORS value is replaced, hop-by-hop headers are dropped
    assert_eq!(header_value(&response, "access-control-allow-origin"), Some("*"));
    assert_eq!(header_value(&response, "keep-alive"), None);
}

#[tokio::test]
async fn test_longest_prefix_routing() {
    let port_api = start_mock_backend("api").await;
    let port_v2 = start_mock_backend("v2").await;
    let dir = tempfile::tempdir().unwrap();
    let gateway = start_gateway(
        dir.path(),
        &[("api", "/api/", port_api), ("v2", "/api/v2/", port_v2)],
        StartupPolicy::FailFast,
    )
    .await;

    assert_eq!(body(&http_get(gateway, "/api/v2/users").await.unwrap()), "v2 GET /users ");
    assert_eq!(body(&http_get(gateway, "/api/v1/users").await.unwrap()), "api GET /v1/users ");
}

#[tokio::test]
async fn test_unmapped_path_returns_404_with_cors() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = start_gateway(dir.path(), &[], StartupPolicy::FailFast).await;

    let response = http_get(gateway, "/unknown/path").await.unwrap();
    assert!(status_line(&response).contains("404"), "{response}");
    assert_eq!(header_value(&response, "x-gateway-error"), Some("ROUTE_NOT_FOUND"));
    assert_eq!(header_value(&response, "access-control-allow-origin"), Some("*"));
    assert!(header_value(&response, "x-request-id").is_some());
}

#[tokio::test]
async fn test_unreachable_backend_returns_502() {
    let dead = closed_port().await;
    let dir = tempfile::tempdir().unwrap();
    let gateway = start_gateway(dir.path(), &[("dead", "/dead/", dead)], StartupPolicy::FailFast).await;

    let response = http_get(gateway, "/dead/anything").await.unwrap();
    assert!(status_line(&response).contains("502"), "{response}");
    assert_eq!(header_value(&response, "x-gateway-error"), Some("UPSTREAM_UNREACHABLE"));
    assert_eq!(header_value(&response, "access-control-allow-origin"), Some("*"));
}

#[tokio::test]
async fn test_diagnostics_endpoints() {
    let port = start_mock_backend("A").await;
    let dir = tempfile::tempdir().unwrap();
    let gateway = start_gateway(
        dir.path(),
        &[("A", "/a/", port), ("broken", "/broken/", 0)],
        StartupPolicy::SkipInvalid,
    )
    .await;

    let response = http_get(gateway, "/ping").await.unwrap();
    assert!(status_line(&response).contains("200"));
    assert_eq!(body(&response), "pong");
    assert_eq!(header_value(&response, "access-control-allow-origin"), Some("*"));

    let response = http_request(gateway, "POST", "/ping", "", "").await.unwrap();
    assert_eq!(body(&response), "pong");

    let response = http_get(gateway, "/services.json").await.unwrap();
    assert_eq!(header_value(&response, "content-type"), Some("application/json"));
    assert_eq!(header_value(&response, "access-control-allow-origin"), Some("*"));
    let json: serde_json::Value = serde_json::from_str(body(&response)).unwrap();
    assert_eq!(json, serde_json::json!({ "count": 1 }));
}

#[tokio::test]
async fn test_static_files() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = start_gateway(dir.path(), &[], StartupPolicy::FailFast).await;

    let response = http_get(gateway, "/cdn/app.js").await.unwrap();
    assert!(status_line(&response).contains("200"), "{response}");
    assert_eq!(body(&response), "console.log('hi');");
    assert_eq!(header_value(&response, "access-control-allow-origin"), Some("*"));

    let response = http_get(gateway, "/cdn/missing.js").await.unwrap();
    assert!(status_line(&response).contains("404"), "{response}");
    assert_eq!(header_value(&response, "x-gateway-error"), Some("FILE_NOT_FOUND"));

    let response = http_get(gateway, "/cdn/../services.json").await.unwrap();
    assert!(status_line(&response).contains("404"), "{response}");
}

#[tokio::test]
async fn test_binary_exits_on_missing_registry() {
    let dir = tempfile::tempdir().unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_switchyard"))
        .arg("-services")
        .arg(dir.path().join("missing.json"))
        .arg("-dir")
        .arg(dir.path())
        .output()
        .unwrap();

    assert!(!output.status.success());
}

#[tokio::test]
async fn test_repeated_requests_forwarded_independently() {
    let (port, hits, seen) = start_counting_backend().await;
    let dir = tempfile::tempdir().unwrap();
    let gateway = start_gateway(dir.path(), &[("root", "/", port)], StartupPolicy::FailFast).await;

    let first = http_get(gateway, "/foo/bar?q=1").await.unwrap();
    let second = http_get(gateway, "/foo/bar?q=1").await.unwrap();

    assert_eq!(body(&first), "hit 1");
    assert_eq!(body(&second), "hit 2");
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|line| line.starts_with("/foo/bar?q=1 ")));
    assert_ne!(seen[0], seen[1], "each request carries its own request id");
}


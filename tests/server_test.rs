//! End-to-end tests through the HTTP server.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use link_proxy::config::{MountConfig, MountKind, ProxyConfig};
use link_proxy::http::HttpServer;
use link_proxy::lifecycle::Shutdown;
use reqwest::StatusCode;
use tower::ServiceExt;

mod common;

use common::{pattern, start_origin, OriginOptions};

struct Running {
    addr: SocketAddr,
    shutdown: Shutdown,
    task: tokio::task::JoinHandle<()>,
    _dir: tempfile::TempDir,
}

impl Running {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

fn mount(name: &str, prefix: &str, kind: MountKind) -> MountConfig {
    MountConfig {
        name: name.to_string(),
        path_prefix: prefix.to_string(),
        kind,
        root: None,
        url: None,
        headers: BTreeMap::new(),
        concurrency: 0,
        part_size: 0,
        proxy_range: false,
        range_disabled: false,
    }
}

async fn start(mut config: ProxyConfig, origin: Option<SocketAddr>) -> Running {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("hello.txt"), b"hello, world").unwrap();
    std::fs::write(dir.path().join("guide.md"), b"# Guide\n\n<script>x()</script>").unwrap();
    std::fs::create_dir(dir.path().join("nested")).unwrap();

    let mut files = mount("files", "/files", MountKind::Local);
    files.root = Some(dir.path().to_string_lossy().into_owned());
    config.mounts.push(files);

    if let Some(origin) = origin {
        let mut remote = mount("remote", "/remote", MountKind::Http);
        remote.url = Some(format!("http://{}/store/", origin));
        remote.headers.insert("x-mount-key".into(), "k1".into());
        config.mounts.push(remote);

        let mut ranged = mount("ranged", "/ranged", MountKind::Http);
        ranged.url = Some(format!("http://{}/store/", origin));
        ranged.proxy_range = true;
        config.mounts.push(ranged);

        let mut parallel = mount("parallel", "/parallel", MountKind::Http);
        parallel.url = Some(format!("http://{}/store/", origin));
        parallel.concurrency = 3;
        parallel.part_size = 64 * 1024;
        config.mounts.push(parallel);
    }

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(config).unwrap();
    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    let task = tokio::spawn(async move {
        server.run(listener, rx).await.unwrap();
    });

    Running {
        addr,
        shutdown,
        task,
        _dir: dir,
    }
}

fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

#[tokio::test]
async fn test_local_mount_serves_files() {
    let server = start(ProxyConfig::default(), None).await;
    let client = client();

    let res = client.get(server.url("/files/hello.txt")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["accept-ranges"], "bytes");
    assert_eq!(res.headers()["content-type"], "text/plain");
    assert!(res.headers()["content-disposition"]
        .to_str()
        .unwrap()
        .starts_with("attachment; filename=\"hello.txt\""));
    assert!(res.headers().contains_key("x-request-id"));
    assert!(res.headers().contains_key("last-modified"));
    let etag = res.headers()["etag"].to_str().unwrap().to_string();
    assert_eq!(res.bytes().await.unwrap().as_ref(), b"hello, world");

    let res = client
        .get(server.url("/files/hello.txt"))
        .header("range", "bytes=7-")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(res.headers()["content-range"], "bytes 7-11/12");
    assert_eq!(res.bytes().await.unwrap().as_ref(), b"world");

    let res = client
        .get(server.url("/files/hello.txt"))
        .header("if-none-match", etag)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_MODIFIED);

    let res = client.head(server.url("/files/hello.txt")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-length"], "12");
}

#[tokio::test]
async fn test_errors_map_to_statuses() {
    let server = start(ProxyConfig::default(), None).await;
    let client = client();

    let res = client.get(server.url("/files/missing.txt")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client.get(server.url("/files/nested")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client.get(server.url("/unmounted/x")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client.get(server.url("/files/%2E%2E/etc/passwd")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client.post(server.url("/files/hello.txt")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);

    let res = client
        .get(server.url("/files/hello.txt"))
        .header("range", "bytes=100-200")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(res.headers()["content-range"], "bytes */12");
}

#[tokio::test]
async fn test_markdown_rendering_flag() {
    let server = start(ProxyConfig::default(), None).await;
    let res = client().get(server.url("/files/guide.md")).send().await.unwrap();
    assert_ne!(res.headers()["content-type"], "text/html; charset=utf-8");
    assert_eq!(res.bytes().await.unwrap().as_ref(), b"# Guide\n\n<script>x()</script>");

    let mut config = ProxyConfig::default();
    config.markdown.render = true;
    let server = start(config, None).await;
    let res = client().get(server.url("/files/guide.md")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "text/html; charset=utf-8");
    let html = res.text().await.unwrap();
    assert!(html.contains("<h1>Guide</h1>"));
    assert!(!html.contains("script"));
}

#[tokio::test]
async fn test_remote_mounts() {
    let data = pattern(200_000);
    let origin = start_origin(vec![("/store/data.bin", data.clone())], OriginOptions::default()).await;
    let server = start(ProxyConfig::default(), Some(origin.addr)).await;
    let client = client();

    // Plain passthrough keeps the origin's headers.
    let res = client.get(server.url("/remote/data.bin")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["x-origin"], "mock");
    assert_eq!(res.bytes().await.unwrap().as_ref(), &data[..]);
    assert_eq!(origin.stats.last_headers()["x-mount-key"], "k1");

    // Range enablement turns the link into a range source.
    let res = client
        .get(server.url("/ranged/data.bin"))
        .header("range", "bytes=1000-1999")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::PARTIAL_CONTENT);
    assert!(res.headers().contains_key("etag"));
    assert!(!res.headers().contains_key("x-origin"));
    assert_eq!(res.bytes().await.unwrap().as_ref(), &data[1000..2000]);

    // Parallel parts reassemble in order.
    let res = client.get(server.url("/parallel/data.bin")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-length"], "200000");
    assert_eq!(res.bytes().await.unwrap().as_ref(), &data[..]);

    let res = client.get(server.url("/remote/nothing.bin")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_shutdown_stops_server() {
    let server = start(ProxyConfig::default(), None).await;
    let res = client().get(server.url("/files/hello.txt")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    server.shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), server.task)
        .await
        .expect("server did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_router_without_socket() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"abc").unwrap();
    let mut config = ProxyConfig::default();
    let mut files = mount("files", "/files", MountKind::Local);
    files.root = Some(dir.path().to_string_lossy().into_owned());
    config.mounts.push(files);

    let router = HttpServer::new(config).unwrap().router();
    let request = axum::http::Request::builder()
        .uri("/files/a.txt")
        .header("x-request-id", "req-42")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    assert_eq!(response.headers()["x-request-id"], "req-42");
    assert_eq!(common::read_body(response).await, b"abc");
}

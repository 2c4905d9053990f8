use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::{BodyExt, Collected, Empty};
use hyper::{
    body::{Buf, Bytes},
    header::{HeaderName, AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE},
    Request, StatusCode, Uri,
};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use router_varz::{StaticRegistry, TopAppsEntry, Varz, VarzBuilder};
use router_varz_exporter::VarzExporterBuilder;
use tokio::net::TcpListener;

struct Fetched {
    status: StatusCode,
    body: String,
    content_type: String,
    www_authenticate: Option<String>,
}

fn varz() -> Arc<Varz<Arc<StaticRegistry>>> {
    let registry = Arc::new(StaticRegistry::new());
    registry.set_uris(3);
    registry.set_backends(5);
    registry.set_top_apps(vec![TopAppsEntry::new("dora", 600)]);

    let varz = VarzBuilder::new().build(registry).expect("valid settings");
    let backend = [("component", "dea"), ("runtime", "ruby19")];
    varz.capture_backend_request(&backend);
    varz.capture_backend_response(&backend, Some(200), Duration::from_millis(4));
    varz.capture_bad_request();

    Arc::new(varz)
}

fn test_runtime() -> tokio::runtime::Runtime {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|e| panic!("Failed to create test runtime: {:?}", e))
}

#[test]
fn test_http_listener() {
    let runtime = test_runtime();

    runtime.block_on(async {
        let local = [127, 0, 0, 1];
        let port = get_available_port(local).await;
        let socket_address = SocketAddr::from((local, port));

        let exporter = VarzExporterBuilder::new()
            .with_http_listener(socket_address)
            .build(varz())
            .unwrap_or_else(|e| panic!("failed to create varz http listener: {:?}", e));

        runtime.spawn(exporter);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let fetched = read_from(uri(socket_address, "/varz"), None).await;
        assert_eq!(fetched.status, StatusCode::OK);
        assert_eq!(fetched.content_type, "application/json");

        let document: serde_json::Value =
            serde_json::from_str(&fetched.body).expect("varz document is valid JSON");
        assert_eq!(document["all"]["requests"], 1);
        assert_eq!(document["all"]["responses_2xx"], 1);
        assert_eq!(document["tags"]["component"]["dea"]["requests"], 1);
        assert_eq!(document["tags"]["runtime"]["ruby19"]["latency"]["50"], 4_000_000.0);
        assert_eq!(document["urls"], 3);
        assert_eq!(document["droplets"], 5);
        assert_eq!(document["bad_requests"], 1);
        assert_eq!(document["top10_app_requests"][0]["application_id"], "dora");
        assert_eq!(document["top10_app_requests"][0]["rps"], 10);
        assert_eq!(document["top10_app_requests"][0]["rpm"], 600);

        let health = read_from(uri(socket_address, "/health"), None).await;
        assert_eq!(health.status, StatusCode::OK);
        assert_eq!(health.body, "OK");

        let missing = read_from(uri(socket_address, "/metrics"), None).await;
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
    });
}

#[test]
fn test_http_listener_basic_auth() {
    let runtime = test_runtime();

    runtime.block_on(async {
        let local = [127, 0, 0, 1];
        let port = get_available_port(local).await;
        let socket_address = SocketAddr::from((local, port));

        let exporter = VarzExporterBuilder::new()
            .with_http_listener(socket_address)
            .with_basic_auth("admin", "secret")
            .build(varz())
            .unwrap_or_else(|e| panic!("failed to create varz http listener: {:?}", e));

        runtime.spawn(exporter);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let anonymous = read_from(uri(socket_address, "/varz"), None).await;
        assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
        assert_eq!(anonymous.www_authenticate.as_deref(), Some("Basic realm=\"varz\""));

        let wrong = read_from(uri(socket_address, "/varz"), Some("Basic YWRtaW46d3Jvbmc=")).await;
        assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);

        let authorized =
            read_from(uri(socket_address, "/varz"), Some("Basic YWRtaW46c2VjcmV0")).await;
        assert_eq!(authorized.status, StatusCode::OK);
        assert!(authorized.body.contains("top10_app_requests"));

        let health = read_from(uri(socket_address, "/health"), None).await;
        assert_eq!(health.status, StatusCode::OK);
    });
}

#[test]
fn test_http_listener_allowlist() {
    let runtime = test_runtime();

    runtime.block_on(async {
        let local = [127, 0, 0, 1];
        let port = get_available_port(local).await;
        let socket_address = SocketAddr::from((local, port));

        let exporter = VarzExporterBuilder::new()
            .with_http_listener(socket_address)
            .add_allowed_address("10.0.0.0/8")
            .expect("valid subnet")
            .build(varz())
            .unwrap_or_else(|e| panic!("failed to create varz http listener: {:?}", e));

        runtime.spawn(exporter);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let forbidden = read_from(uri(socket_address, "/varz"), None).await;
        assert_eq!(forbidden.status, StatusCode::FORBIDDEN);
        assert!(forbidden.body.is_empty());

        let health = read_from(uri(socket_address, "/health"), None).await;
        assert_eq!(health.status, StatusCode::FORBIDDEN);
    });
}

fn uri(socket_address: SocketAddr, path: &str) -> Uri {
    format!("http://{socket_address}{path}")
        .parse::<Uri>()
        .unwrap_or_else(|e| panic!("Error parsing URI: {:?}", e))
}

async fn get_available_port(listen_address: [u8; 4]) -> u16 {
    let socket_address = SocketAddr::from((listen_address, 0));
    TcpListener::bind(socket_address)
        .await
        .unwrap_or_else(|e| {
            panic!("Unable to bind to an available port on address {socket_address}: {:?}", e);
        })
        .local_addr()
        .expect("Unable to obtain local address from TcpListener")
        .port()
}

async fn read_from(endpoint: Uri, authorization: Option<&str>) -> Fetched {
    let client = Client::builder(hyper_util::rt::TokioExecutor::new()).build(HttpConnector::new());

    let req = Request::builder().uri(endpoint.to_string());
    let req = if let Some(auth) = authorization { req.header(AUTHORIZATION, auth) } else { req };
    let req = req
        .body(Empty::<Bytes>::new())
        .unwrap_or_else(|e| panic!("Failed building request: {:?}", e));

    let response = client
        .request(req)
        .await
        .unwrap_or_else(|e| panic!("Failed requesting data from {endpoint}: {:?}", e));

    let status = response.status();
    let header = |name: HeaderName| {
        response.headers().get(name).and_then(|v| v.to_str().ok()).map(ToString::to_string)
    };
    let content_type = header(CONTENT_TYPE).unwrap_or_default();
    let www_authenticate = header(WWW_AUTHENTICATE);

    let mut body = response
        .into_body()
        .collect()
        .await
        .map(Collected::aggregate)
        .unwrap_or_else(|e| panic!("Error reading response: {:?}", e));

    let body_bytes = body.copy_to_bytes(body.remaining()).to_vec();
    let body = String::from_utf8(body_bytes).expect("response body is UTF-8");

    Fetched { status, body, content_type, www_authenticate }
}

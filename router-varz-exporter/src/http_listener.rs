use std::{
    convert::Infallible,
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use http_body_util::Full;
use hyper::{
    body::{Bytes, Incoming},
    header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE},
    server::conn::http1::Builder as HyperHttpBuilder,
    service::service_fn,
    Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use ipnet::IpNet;
use router_varz::{BackendRegistry, Varz};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use crate::{BuildError, ExporterError, ExporterFuture};

struct HttpListeningExporter<R> {
    inner: Arc<Inner<R>>,
}

struct Inner<R> {
    varz: Arc<Varz<R>>,
    allowed_addresses: Option<Vec<IpNet>>,
    credentials: Option<String>,
    path: String,
}

impl<R> Inner<R>
where
    R: BackendRegistry,
{
    fn is_allowed(&self, remote_address: IpAddr) -> bool {
        match &self.allowed_addresses {
            Some(addresses) => addresses.iter().any(|address| address.contains(&remote_address)),
            None => true,
        }
    }

    fn is_authorized(&self, req: &Request<Incoming>) -> bool {
        match &self.credentials {
            Some(expected) => req.headers().get(AUTHORIZATION).is_some_and(|provided| {
                constant_time_eq(provided.as_bytes(), expected.as_bytes())
            }),
            None => true,
        }
    }

    fn render(&self) -> Response<Full<Bytes>> {
        match self.varz.render() {
            Ok(document) => {
                let mut response = new_response(StatusCode::OK, document);
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                response
            }
            Err(e) => {
                warn!("Error rendering varz document. Error: {:?}", e);
                new_response(StatusCode::INTERNAL_SERVER_ERROR, Bytes::new())
            }
        }
    }
}

impl<R> HttpListeningExporter<R>
where
    R: BackendRegistry + 'static,
{
    async fn serve(&self, listener: std::net::TcpListener) -> Result<(), ExporterError> {
        let listener = TcpListener::from_std(listener)?;

        loop {
            let stream = match listener.accept().await {
                Ok((stream, _)) => stream,
                Err(e) => {
                    warn!("Error accepting connection. Ignoring request. Error: {:?}", e);
                    continue;
                }
            };

            let remote_addr = match stream.peer_addr() {
                Ok(remote_address) => remote_address.ip(),
                Err(e) => {
                    warn!("Error obtaining remote address. Ignoring request. Error: {:?}", e);
                    continue;
                }
            };

            self.process_stream(stream, remote_addr);
        }
    }

    fn process_stream(&self, stream: TcpStream, remote_address: IpAddr) {
        let inner = Arc::clone(&self.inner);
        let service = service_fn(move |req: Request<Incoming>| {
            let inner = Arc::clone(&inner);
            async move { Ok::<_, Infallible>(Self::handle_http_request(&inner, remote_address, &req)) }
        });

        tokio::task::spawn(async move {
            if let Err(err) =
                HyperHttpBuilder::new().serve_connection(TokioIo::new(stream), service).await
            {
                warn!("Error serving connection. Error: {:?}", err);
            };
        });
    }

    fn handle_http_request(
        inner: &Inner<R>,
        remote_address: IpAddr,
        req: &Request<Incoming>,
    ) -> Response<Full<Bytes>> {
        if !inner.is_allowed(remote_address) {
            debug!(%remote_address, "rejecting request from address outside the allowlist");
            return new_forbidden_response();
        }

        match req.uri().path() {
            "/health" => new_response(StatusCode::OK, "OK"),
            path if path == inner.path => {
                if inner.is_authorized(req) {
                    inner.render()
                } else {
                    debug!(%remote_address, "rejecting request with missing or invalid credentials");
                    new_unauthorized_response()
                }
            }
            _ => new_response(StatusCode::NOT_FOUND, Bytes::new()),
        }
    }
}

fn new_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

fn new_forbidden_response() -> Response<Full<Bytes>> {
    new_response(StatusCode::FORBIDDEN, Bytes::new())
}

fn new_unauthorized_response() -> Response<Full<Bytes>> {
    let mut response = new_response(StatusCode::UNAUTHORIZED, Bytes::new());
    response
        .headers_mut()
        .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Basic realm=\"varz\""));
    response
}

/// Creates an `ExporterFuture` implementing a http listener that serves the varz document.
///
/// # Errors
/// Will return Err if it cannot bind to the listen address
pub(crate) fn new_http_listener<R>(
    varz: Arc<Varz<R>>,
    listen_address: SocketAddr,
    allowed_addresses: Option<Vec<IpNet>>,
    credentials: Option<String>,
    path: String,
) -> Result<ExporterFuture, BuildError>
where
    R: BackendRegistry + 'static,
{
    let listener = std::net::TcpListener::bind(listen_address)
        .and_then(|listener| {
            listener.set_nonblocking(true)?;
            Ok(listener)
        })
        .map_err(|e| BuildError::FailedToCreateHTTPListener(e.to_string()))?;

    let exporter = HttpListeningExporter {
        inner: Arc::new(Inner { varz, allowed_addresses, credentials, path }),
    };

    Ok(Box::pin(async move { exporter.serve(listener).await }))
}

/// Compares two byte strings without stopping at the first mismatch.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;
    use std::sync::Arc;

    use hyper::{header::WWW_AUTHENTICATE, StatusCode};
    use ipnet::IpNet;
    use router_varz::{StaticRegistry, VarzBuilder};

    use super::{constant_time_eq, new_forbidden_response, new_unauthorized_response, Inner};

    fn inner(allowed: Option<Vec<IpNet>>) -> Inner<StaticRegistry> {
        let varz = VarzBuilder::new().build(StaticRegistry::new()).expect("valid settings");
        Inner {
            varz: Arc::new(varz),
            allowed_addresses: allowed,
            credentials: None,
            path: "/varz".to_string(),
        }
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"Basic YWRtaW46c2VjcmV0", b"Basic YWRtaW46c2VjcmV0"));
        assert!(constant_time_eq(b"", b""));
        assert!(!constant_time_eq(b"Basic YWRtaW46c2VjcmV0", b"Basic YWRtaW46d3Jvbmc="));
        assert!(!constant_time_eq(b"Basic YWRtaW46c2VjcmV0", b"Basic YWRtaW46c2VjcmV"));
        assert!(!constant_time_eq(b"Xasic YWRtaW46c2VjcmV0", b"Basic YWRtaW46c2VjcmV0"));
    }

    #[test]
    fn test_canned_responses() {
        assert_eq!(new_forbidden_response().status(), StatusCode::FORBIDDEN);

        let unauthorized = new_unauthorized_response();
        assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert!(unauthorized.headers().contains_key(WWW_AUTHENTICATE));
    }

    #[test]
    fn test_allowlist() {
        let local: IpAddr = [127, 0, 0, 1].into();
        let remote: IpAddr = [10, 1, 2, 3].into();

        assert!(inner(None).is_allowed(remote));

        let restricted = inner(Some(vec!["127.0.0.0/8".parse().expect("valid subnet")]));
        assert!(restricted.is_allowed(local));
        assert!(!restricted.is_allowed(remote));
    }

    #[test]
    fn test_render() {
        let response = inner(None).render();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(hyper::header::CONTENT_TYPE).map(|v| v.as_bytes()),
            Some(&b"application/json"[..])
        );
    }
}

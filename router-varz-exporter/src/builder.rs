use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    thread,
};

use base64::prelude::{Engine as _, BASE64_STANDARD};
use ipnet::IpNet;
use router_varz::{BackendRegistry, Varz};
use tracing::info;

use crate::{http_listener::new_http_listener, BuildError, ExporterFuture};

/// Default address the exporter listens on: the router status port, on every interface.
pub const DEFAULT_LISTEN_ADDRESS: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8080);

/// Default path the varz document is served from.
pub const DEFAULT_PATH: &str = "/varz";

/// Builder for creating and installing a varz HTTP exporter.
#[derive(Clone, Debug)]
pub struct VarzExporterBuilder {
    listen_address: SocketAddr,
    allowed_addresses: Option<Vec<IpNet>>,
    credentials: Option<String>,
    path: String,
}

impl VarzExporterBuilder {
    /// Creates a new [`VarzExporterBuilder`].
    pub fn new() -> Self {
        Self {
            listen_address: DEFAULT_LISTEN_ADDRESS,
            allowed_addresses: None,
            credentials: None,
            path: DEFAULT_PATH.to_string(),
        }
    }

    /// Configures the exporter to expose an HTTP listener on the given address.
    ///
    /// Defaults to listening on `0.0.0.0:8080`.
    #[must_use]
    pub fn with_http_listener(mut self, addr: impl Into<SocketAddr>) -> Self {
        self.listen_address = addr.into();
        self
    }

    /// Adds an IP address or subnet to the allowlist for the HTTP listener.
    ///
    /// If a client makes a request to the HTTP listener and their IP is not present in the
    /// allowlist, either as an exact match or within a subnet, they will receive a 403 Forbidden
    /// response.  `/health` is covered by the allowlist too.
    ///
    /// Defaults to allowing all IPs.
    ///
    /// ## Security Considerations
    ///
    /// On its own, an IP allowlist is insufficient for access control, if the exporter is running
    /// in an environment alongside applications (such as web browsers) that are susceptible to
    /// [DNS rebinding](https://en.wikipedia.org/wiki/DNS_rebinding) attacks.
    ///
    /// ## Errors
    ///
    /// If the given address cannot be parsed into an IP address or subnet, an error variant will
    /// be returned describing the error.
    pub fn add_allowed_address<A>(mut self, address: A) -> Result<Self, BuildError>
    where
        A: AsRef<str>,
    {
        let address = address.as_ref();
        let address = match address.parse::<IpNet>() {
            Ok(subnet) => subnet,
            Err(e) => address
                .parse::<IpAddr>()
                .map(IpNet::from)
                .map_err(|_| BuildError::InvalidAllowlistAddress(e.to_string()))?,
        };
        self.allowed_addresses.get_or_insert_with(Vec::new).push(address);

        Ok(self)
    }

    /// Requires HTTP basic authentication to fetch the varz document.
    ///
    /// Requests without matching credentials receive a 401 Unauthorized response.  `/health`
    /// never requires credentials.
    #[must_use]
    pub fn with_basic_auth(mut self, username: &str, password: &str) -> Self {
        let encoded = BASE64_STANDARD.encode(format!("{username}:{password}"));
        self.credentials = Some(format!("Basic {encoded}"));
        self
    }

    /// Sets the path the varz document is served from.
    ///
    /// Defaults to `/varz`.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Builds the exporter, returning the future that drives it.
    ///
    /// The future must be polled on a Tokio runtime with IO enabled.
    ///
    /// ## Errors
    ///
    /// If the configured path is invalid, or the listener cannot bind to its address, an error
    /// variant will be returned describing the error.
    pub fn build<R>(self, varz: Arc<Varz<R>>) -> Result<ExporterFuture, BuildError>
    where
        R: BackendRegistry + 'static,
    {
        if !self.path.starts_with('/') {
            return Err(BuildError::InvalidPath(self.path));
        }

        info!(address = %self.listen_address, path = %self.path, "serving varz document");
        new_http_listener(
            varz,
            self.listen_address,
            self.allowed_addresses,
            self.credentials,
            self.path,
        )
    }

    /// Builds the exporter and spawns it.
    ///
    /// If called from within a Tokio runtime, the exporter is spawned on that runtime.  Otherwise,
    /// a new single-threaded runtime is created on a background thread to drive it.
    ///
    /// ## Errors
    ///
    /// If there is an error while building the exporter, or creating the runtime, an error
    /// variant will be returned describing the error.
    pub fn install<R>(self, varz: Arc<Varz<R>>) -> Result<(), BuildError>
    where
        R: BackendRegistry + 'static,
    {
        use tokio::runtime;

        if let Ok(handle) = runtime::Handle::try_current() {
            let exporter = {
                let _g = handle.enter();
                self.build(varz)?
            };

            handle.spawn(exporter);
        } else {
            let runtime = runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| BuildError::FailedToCreateRuntime(e.to_string()))?;

            let exporter = {
                let _g = runtime.enter();
                self.build(varz)?
            };

            thread::Builder::new()
                .name("router-varz-exporter".to_string())
                .spawn(move || runtime.block_on(exporter))
                .map_err(|e| BuildError::FailedToCreateRuntime(e.to_string()))?;
        }

        Ok(())
    }
}

impl Default for VarzExporterBuilder {
    fn default() -> Self {
        VarzExporterBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use router_varz::{StaticRegistry, VarzBuilder};

    use super::{BuildError, VarzExporterBuilder, DEFAULT_LISTEN_ADDRESS};

    #[test]
    fn test_defaults() {
        let builder = VarzExporterBuilder::new();
        assert_eq!(builder.listen_address, DEFAULT_LISTEN_ADDRESS);
        assert_eq!(builder.listen_address, "0.0.0.0:8080".parse::<SocketAddr>().expect("valid"));
        assert_eq!(builder.path, "/varz");
        assert!(builder.allowed_addresses.is_none());
        assert!(builder.credentials.is_none());
    }

    #[test]
    fn test_add_allowed_address() {
        let builder = VarzExporterBuilder::new()
            .add_allowed_address("127.0.0.1")
            .expect("plain addresses are accepted")
            .add_allowed_address("10.0.0.0/8")
            .expect("subnets are accepted")
            .add_allowed_address("::1")
            .expect("ipv6 addresses are accepted");
        assert_eq!(builder.allowed_addresses.map(|a| a.len()), Some(3));

        let err = VarzExporterBuilder::new().add_allowed_address("not an address").unwrap_err();
        assert!(matches!(err, BuildError::InvalidAllowlistAddress(_)));
    }

    #[test]
    fn test_basic_auth_header() {
        let builder = VarzExporterBuilder::new().with_basic_auth("admin", "secret");
        assert_eq!(builder.credentials.as_deref(), Some("Basic YWRtaW46c2VjcmV0"));
    }

    #[test]
    fn test_relative_path_is_rejected() {
        let varz = Arc::new(VarzBuilder::new().build(StaticRegistry::new()).expect("valid"));
        let result = VarzExporterBuilder::new().with_path("varz").build(varz);
        assert!(matches!(result, Err(BuildError::InvalidPath(path)) if path == "varz"));
    }
}

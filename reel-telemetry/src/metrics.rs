use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Installs the global Prometheus recorder and serves `[::]:{port}/metrics`.
///
/// Every stage of a process reports into the same recorder, labelled with `worker`
/// as a global label so that several processes can be scraped side by side.
pub fn init_metrics(port: u16, worker: &str) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port))
        .add_global_label("worker", worker)
        .install()
}

use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum DiscoveryError {
    #[error("failed to start mDNS daemon: {0}")]
    #[diagnostic(
        code(mocap_relay::discovery::mdns_daemon),
        help("check that the host's multicast networking is available")
    )]
    MdnsDaemon(String),

    #[error("failed to browse mDNS service type {service_type}: {details}")]
    #[diagnostic(code(mocap_relay::discovery::mdns_browse))]
    MdnsBrowse {
        service_type: String,
        details: String,
    },
}

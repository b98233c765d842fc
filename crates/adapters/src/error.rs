use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum AdapterError {
    #[error("unknown adapter kind: {kind}")]
    #[diagnostic(
        code(mocap_relay::adapters::unknown_kind),
        help("register a constructor for this kind, or fix the device's `script` config key")
    )]
    UnknownKind { kind: String },

    #[error("device {device} has no endpoint to connect to")]
    #[diagnostic(code(mocap_relay::adapters::no_endpoint))]
    NoEndpoint { device: String },

    #[error("failed to connect to device {device} at {endpoint}: {details}")]
    #[diagnostic(code(mocap_relay::adapters::connect_failed))]
    ConnectFailed {
        device: String,
        endpoint: String,
        details: String,
    },

    #[error("failed to send command to device {device}: {details}")]
    #[diagnostic(code(mocap_relay::adapters::send_failed))]
    SendFailed { device: String, details: String },

    #[error("device {device} did not respond within {timeout_ms}ms")]
    #[diagnostic(code(mocap_relay::adapters::timeout))]
    Timeout { device: String, timeout_ms: u64 },
}

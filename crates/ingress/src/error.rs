use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum IngressError {
    #[error("failed to bind {addr}: {details}")]
    #[diagnostic(code(mocap_relay::ingress::bind_failed))]
    BindFailed { addr: String, details: String },

    #[error("failed to serve http ingress: {0}")]
    #[diagnostic(code(mocap_relay::ingress::serve_failed))]
    ServeFailed(String),
}

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

#[derive(Error, Diagnostic, Debug, Clone)]
pub enum ConfigError {
    #[error("failed to load config file: {path}")]
    #[diagnostic(
        code(mocap_relay::config::load_failed),
        help("check that the file exists and is readable")
    )]
    LoadFailed {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("invalid config format in {path}: {details}")]
    #[diagnostic(
        code(mocap_relay::config::invalid_format),
        help("check the YAML syntax")
    )]
    InvalidFormat {
        path: PathBuf,
        details: String,
        #[source_code]
        content: String,
        #[label("error occurred here")]
        span: SourceSpan,
    },

    #[error("missing required config file: {path}")]
    #[diagnostic(
        code(mocap_relay::config::missing),
        help("create the required configuration file")
    )]
    MissingConfig { path: PathBuf },

    #[error("duplicate device entry: {attached_name}")]
    #[diagnostic(
        code(mocap_relay::config::duplicate_device),
        help("each device's attached_name must be unique")
    )]
    DuplicateDevice { attached_name: String },
}

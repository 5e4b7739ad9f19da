use std::io;

use crate::icmp6::ndp::DecodeError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("configuration store error: {0}")]
    Store(#[from] StoreError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("interface {name} not found")]
    InterfaceNotFound { name: String },
}

pub type Result<T> = std::result::Result<T, Error>;

// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Edge Agent Authors

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("no application with id {0}")]
    InvalidId(String),

    #[error("no persistent application named {0}")]
    InvalidName(String),

    #[error("cannot get decryption key, no key configured")]
    KeyAbsent,

    #[error("failed to query TPM status: {0}")]
    TpmQueryFailed(String),

    #[error("RSA unwrap of lockkey failed: {0}")]
    RsaUnwrap(String),

    #[error("AES payload decryption failed: {0}")]
    AesPayload(String),

    #[error("package has no payload entry")]
    NoPayload,

    #[error("package has both an encrypted and a clear payload")]
    BothPayloads,

    #[error("package has no lockkey matching this device")]
    MissingLockkey,

    #[error("package has more than one lockkey matching this device")]
    MultipleLockkeys,

    #[error("decrypted lockkey buffer is shorter than expected")]
    DecryptedKeyShort,

    #[error("encrypted payload is not a multiple of the AES block size")]
    PayloadNotBlockAligned,

    #[error("archive entry escapes the extraction target")]
    PathTraversal,

    #[error("container runtime error: {0}")]
    Runtime(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Coarse HTTP status mapping used by the control-surface handlers.
    pub fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            Error::InvalidId(_) | Error::InvalidName(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

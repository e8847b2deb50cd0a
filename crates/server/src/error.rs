use std::io;

use thiserror::Error;

use crate::source::SourceError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("maximum clients reached")]
    Capacity,
    #[error("source feed: {0}")]
    Source(#[from] SourceError),
}

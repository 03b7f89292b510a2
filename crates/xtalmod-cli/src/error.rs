use std::path::PathBuf;
use thiserror::Error;
use xtalmod::core::io::jana::JanaError;
use xtalmod::core::models::frame::StructureError;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Failed to read '{path}': {source}", path = path.display())]
    FileParsing {
        path: PathBuf,
        #[source]
        source: JanaError,
    },

    #[error(transparent)]
    Structure(#[from] StructureError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    Argument(String),
}

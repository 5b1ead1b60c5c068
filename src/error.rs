use std::path::PathBuf;
use thiserror::Error;

/// Failures the import pipeline can report.
///
/// Everything except [`ImportError::Connection`] and [`ImportError::DataDir`]
/// is scoped to a single file pair: the session logs it, counts it and moves on.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Missing geometry file {expected} for {attribute}")]
    MissingCounterpart { attribute: PathBuf, expected: PathBuf },

    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Could not open store at {path}: {source}")]
    Connection {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Could not scan data directory {path}: {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Import session cannot start from state {0}")]
    InvalidState(String),
}

impl ImportError {
    pub fn parse(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        ImportError::Parse {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Run-level failures: the store cannot be opened or the data directory
    /// cannot be scanned. Either one terminates a run before any pair starts.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ImportError::Connection { .. } | ImportError::DataDir { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ImportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_run_level_errors_are_fatal() {
        let conn = ImportError::Connection {
            path: PathBuf::from("/nope/land.db"),
            source: rusqlite::Error::InvalidQuery,
        };
        assert!(conn.is_fatal());

        let data_dir = ImportError::DataDir {
            path: PathBuf::from("/nope"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(data_dir.is_fatal());

        let io = ImportError::Io {
            path: PathBuf::from("a.xml"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(!io.is_fatal());

        let store = ImportError::Store(rusqlite::Error::InvalidQuery);
        assert!(!store.is_fatal());

        let parse = ImportError::parse("a.xml", "unexpected end of stream");
        assert!(!parse.is_fatal());
        assert_eq!(
            parse.to_string(),
            "Failed to parse a.xml: unexpected end of stream"
        );
    }
}

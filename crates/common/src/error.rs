//! Common error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Command channel to the USB worker is closed or dropped a reply
    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_converts() {
        fn spawn_fails() -> Result<()> {
            Err(std::io::Error::other("thread limit").into())
        }

        let err = spawn_fails().unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.to_string(), "IO error: thread limit");
    }
}

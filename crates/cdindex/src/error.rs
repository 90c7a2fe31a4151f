use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid CD index: {0}")]
    InvalidFormat(PathBuf),

    #[error("Outdated CD index {path} (version {version}), use `cdindex upgrade` to upgrade it")]
    Outdated { path: PathBuf, version: u8 },

    #[error("CD index {path} has version {version} which is not supported by this tool")]
    Unsupported { path: PathBuf, version: u8 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Plugin error: {0}")]
    Plugin(String),

    #[error("Query parse error: {0}")]
    QueryParse(String),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CatalogError>;

impl CatalogError {
    /// Returns true for errors that only affect one listed or walked item.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::TypeMismatch(_) | Self::Plugin(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_errors_name_the_store() {
        let err = CatalogError::Outdated {
            path: PathBuf::from("/var/lib/cdindex/disc.cdi"),
            version: 1,
        };
        let message = err.to_string();
        assert!(message.contains("disc.cdi"));
        assert!(message.contains("upgrade"));
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: CatalogError = io.into();
        assert!(matches!(err, CatalogError::Io(_)));
        assert!(!err.is_local());
    }

    #[test]
    fn resolution_errors_are_local() {
        assert!(CatalogError::NotFound("a/b".into()).is_local());
        assert!(CatalogError::Plugin("x".into()).is_local());
        assert!(!CatalogError::QueryParse("x".into()).is_local());
    }
}

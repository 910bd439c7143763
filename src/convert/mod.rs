//! Source-specific conversion of upstream rows into [`CanonicalRecord`]s.
//!
//! The collector never matches on a source tag itself: it looks the converter
//! up in a [`ConverterRegistry`].

mod app_calls;
mod fuv;
mod install;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::record::{CanonicalRecord, SourceTag};
use crate::storage::{RangeStore, SourceStore, StorageError};

pub use app_calls::AppCallsConverter;
pub use fuv::FuvConverter;
pub use install::InstallConverter;

/// Version stamped into `subsystem_version` of every converted record.
pub const SUBSYSTEM_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("{tag} row {id} no longer exists")]
    MissingReference { tag: SourceTag, id: i64 },

    #[error("Unsupported source tag {0}")]
    UnsupportedSource(i64),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

#[async_trait]
pub trait Converter: Send + Sync {
    /// Read upstream row `id` and normalize it.
    ///
    /// `relational_id` is shared by every record unpacked from one broker row
    /// and stands in for a missing correlation id.
    async fn convert(&self, id: i64, relational_id: Uuid) -> Result<CanonicalRecord, ConvertError>;
}

/// Maps each source tag to the converter that understands it.
#[derive(Clone, Default)]
pub struct ConverterRegistry {
    converters: HashMap<SourceTag, Arc<dyn Converter>>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Converters for every install-side table, plus the FUV table when its store is available.
    pub fn standard(source: Arc<dyn SourceStore>, range: Option<Arc<dyn RangeStore>>) -> Self {
        let mut registry = Self::new();

        for tag in [
            SourceTag::EventLog,
            SourceTag::FstManageLog,
            SourceTag::ConnectionsSpecHistory,
            SourceTag::ModuleExecutionsSpecHistory,
        ] {
            registry.register(tag, Arc::new(InstallConverter::new(source.clone(), tag)));
        }
        registry.register(
            SourceTag::AppCallsLog,
            Arc::new(AppCallsConverter::new(source.clone())),
        );

        if let Some(range) = range {
            registry.register(SourceTag::FuvLog, Arc::new(FuvConverter::new(range)));
        }

        registry
    }

    pub fn register(&mut self, tag: SourceTag, converter: Arc<dyn Converter>) {
        self.converters.insert(tag, converter);
    }

    pub fn get(&self, tag: SourceTag) -> Option<Arc<dyn Converter>> {
        self.converters.get(&tag).cloned()
    }

    /// Resolve a raw payload code to its converter.
    pub fn for_code(&self, code: i64) -> Result<(SourceTag, Arc<dyn Converter>), ConvertError> {
        let tag = SourceTag::from_code(code).ok_or(ConvertError::UnsupportedSource(code))?;
        let converter = self.get(tag).ok_or(ConvertError::UnsupportedSource(code))?;
        Ok((tag, converter))
    }
}

/// Split "Name Version" into its parts; either part defaults to `N/A`.
pub(crate) fn split_client_app(client_app: Option<&str>) -> (String, String) {
    use crate::record::NOT_AVAILABLE;

    let client_app = client_app.map(str::trim).filter(|s| !s.is_empty());
    match client_app {
        None => (NOT_AVAILABLE.to_string(), NOT_AVAILABLE.to_string()),
        Some(app) => match app.split_once(' ') {
            Some((name, version)) => {
                let version = version.split(' ').next().unwrap_or(NOT_AVAILABLE);
                (name.to_string(), version.to_string())
            }
            None => (app.to_string(), NOT_AVAILABLE.to_string()),
        },
    }
}

/// Use the upstream correlation id when it parses, the relational id otherwise.
pub(crate) fn correlation_or(correlation_id: Option<&str>, relational_id: Uuid) -> Uuid {
    correlation_id
        .and_then(|id| Uuid::parse_str(id.trim()).ok())
        .unwrap_or(relational_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DuckDbStorage;

    #[test]
    fn test_split_client_app() {
        assert_eq!(
            split_client_app(Some("Forras 5.2.1")),
            ("Forras".to_string(), "5.2.1".to_string())
        );
        assert_eq!(
            split_client_app(Some("Forras")),
            ("Forras".to_string(), "N/A".to_string())
        );
        assert_eq!(
            split_client_app(None),
            ("N/A".to_string(), "N/A".to_string())
        );
    }

    #[test]
    fn test_correlation_falls_back_to_relational_id() {
        let relational = Uuid::new_v4();
        let upstream = Uuid::new_v4();

        assert_eq!(correlation_or(Some(&upstream.to_string()), relational), upstream);
        assert_eq!(correlation_or(Some("not-a-guid"), relational), relational);
        assert_eq!(correlation_or(None, relational), relational);
    }

    #[test]
    fn test_registry_rejects_unknown_and_unregistered_codes() {
        let storage = Arc::new(DuckDbStorage::in_memory().unwrap());
        let registry = ConverterRegistry::standard(storage, None);

        assert!(registry.for_code(1).is_ok());
        assert!(matches!(
            registry.for_code(0),
            Err(ConvertError::UnsupportedSource(0))
        ));
        assert!(matches!(
            registry.for_code(99),
            Err(ConvertError::UnsupportedSource(99))
        ));
        // FUV is only registered when the range store exists.
        assert!(matches!(
            registry.for_code(6),
            Err(ConvertError::UnsupportedSource(6))
        ));
    }
}

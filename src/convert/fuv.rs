use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{ConvertError, Converter, SUBSYSTEM_VERSION};
use crate::record::{CanonicalRecord, SourceTag, NOT_AVAILABLE};
use crate::storage::{FuvLogRow, RangeStore};

pub const FUV_SYSTEM: &str = "FÜV";
pub const FUV_SUBSYSTEM: &str = "FÜVLog";

fn additional_data(row: &FuvLogRow) -> String {
    fn field(value: Option<impl ToString>) -> String {
        value.map(|v| v.to_string()).unwrap_or_default()
    }

    format!(
        "<Data><TaskStatusId>{}</TaskStatusId><Status>{}</Status><Error>{}</Error></Data>",
        field(row.task_status_id),
        field(row.status),
        field(row.error.as_deref()),
    )
}

/// Converter for the range-sourced FUV table.
///
/// FUV records have no upstream correlation id, so `relational_id` is ignored.
pub struct FuvConverter {
    store: Arc<dyn RangeStore>,
}

impl FuvConverter {
    pub fn new(store: Arc<dyn RangeStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Converter for FuvConverter {
    async fn convert(&self, id: i64, _relational_id: Uuid) -> Result<CanonicalRecord, ConvertError> {
        let row = self
            .store
            .fetch_fuv_log(id)
            .await?
            .ok_or(ConvertError::MissingReference {
                tag: SourceTag::FuvLog,
                id,
            })?;

        let mut record = CanonicalRecord::new(SourceTag::FuvLog, row.log_date.unwrap_or_else(Utc::now));
        record.system = Some(FUV_SYSTEM.to_string());
        record.system_version = Some(NOT_AVAILABLE.to_string());
        record.subsystem = Some(FUV_SUBSYSTEM.to_string());
        record.subsystem_version = Some(SUBSYSTEM_VERSION.to_string());
        record.additional_data = Some(additional_data(&row));
        record.module = row.module;
        record.function = row.function;
        record.message = row.message;
        record.input_values = Some(row.input_values.unwrap_or_else(|| NOT_AVAILABLE.to_string()));
        record.external_id = Some(row.id.to_string());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DuckDbStorage;

    #[tokio::test]
    async fn test_convert_fuv_row() {
        let storage = DuckDbStorage::in_memory().unwrap();
        storage.init_range_schema().await.unwrap();
        storage
            .insert_fuv_log(&FuvLogRow {
                id: 130,
                task_status_id: Some(7),
                status: Some(2),
                error: Some("timeout".to_string()),
                module: Some("Import".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let converter = FuvConverter::new(Arc::new(storage));
        let record = converter.convert(130, Uuid::new_v4()).await.unwrap();

        assert_eq!(record.source, SourceTag::FuvLog);
        assert_eq!(record.system.as_deref(), Some(FUV_SYSTEM));
        assert_eq!(record.subsystem.as_deref(), Some(FUV_SUBSYSTEM));
        assert_eq!(record.correlation_id, None);
        assert_eq!(record.input_values.as_deref(), Some("N/A"));
        assert_eq!(record.range_position(), Some(130));
        assert_eq!(
            record.additional_data.as_deref(),
            Some("<Data><TaskStatusId>7</TaskStatusId><Status>2</Status><Error>timeout</Error></Data>")
        );
    }

    #[tokio::test]
    async fn test_missing_fuv_row() {
        let storage = DuckDbStorage::in_memory().unwrap();
        storage.init_range_schema().await.unwrap();
        let converter = FuvConverter::new(Arc::new(storage));

        assert!(matches!(
            converter.convert(1, Uuid::new_v4()).await,
            Err(ConvertError::MissingReference { id: 1, .. })
        ));
    }
}

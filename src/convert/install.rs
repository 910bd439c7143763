use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{correlation_or, split_client_app, ConvertError, Converter, SUBSYSTEM_VERSION};
use crate::record::{CanonicalRecord, SourceTag};
use crate::storage::{SourceStore, UpstreamRow};

fn log_type(tag: SourceTag) -> &'static str {
    match tag {
        SourceTag::EventLog => "EventLog",
        SourceTag::AppCallsLog => "AppCallsLog",
        SourceTag::FstManageLog => "FSTManageLog",
        SourceTag::ConnectionsSpecHistory => "ConnectionsSpecHistory",
        SourceTag::ModuleExecutionsSpecHistory => "ModuleExecutionsSpecHistory",
        SourceTag::FuvLog => "FUVLog",
    }
}

/// Field mapping shared by every install-side table.
pub(super) fn map_upstream(tag: SourceTag, row: UpstreamRow, relational_id: Uuid) -> CanonicalRecord {
    let (system, system_version) = split_client_app(row.client_app.as_deref());

    let mut record = CanonicalRecord::new(tag, row.log_date.unwrap_or_else(Utc::now));
    record.correlation_id = Some(correlation_or(row.correlation_id.as_deref(), relational_id));
    record.system = Some(system);
    record.system_version = Some(system_version);
    record.subsystem = Some(tag.name().to_string());
    record.subsystem_version = Some(SUBSYSTEM_VERSION.to_string());
    record.module = row.assembly_name;
    record.function = row.function;
    record.session = row.session;
    record.host = row.host;
    record.log_level = row.log_level;
    record.log_type = Some(log_type(tag).to_string());
    record.message = row.message;
    record.input_values = row.input_values;
    record.output_values = row.output_values;
    record.additional_data = row.additional_data;
    record.user_data = row.user_data;
    record.external_id = Some(row.forras_id.to_string());
    record
}

/// Converter for install tables that need no special handling.
pub struct InstallConverter {
    store: Arc<dyn SourceStore>,
    tag: SourceTag,
}

impl InstallConverter {
    pub fn new(store: Arc<dyn SourceStore>, tag: SourceTag) -> Self {
        Self { store, tag }
    }
}

#[async_trait]
impl Converter for InstallConverter {
    async fn convert(&self, id: i64, relational_id: Uuid) -> Result<CanonicalRecord, ConvertError> {
        let row = self
            .store
            .fetch_upstream(self.tag, id)
            .await?
            .ok_or(ConvertError::MissingReference { tag: self.tag, id })?;

        Ok(map_upstream(self.tag, row, relational_id))
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::traits::{HostKey, MasterDataKey};

/// Placeholder stored in mandatory natural-key columns when the source has no value.
pub const NOT_AVAILABLE: &str = "N/A";

/// Closed set of upstream log sources.
///
/// The integer codes are part of the broker payload wire format and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceTag {
    EventLog,
    AppCallsLog,
    FstManageLog,
    ConnectionsSpecHistory,
    ModuleExecutionsSpecHistory,
    FuvLog,
}

/// Which upstream database owns an original table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginDatabase {
    Install,
    Fuv,
}

/// Location of the original rows a source tag was collected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OriginalTable {
    pub database: OriginDatabase,
    pub table: &'static str,
    pub key_column: &'static str,
}

impl SourceTag {
    pub const ALL: [SourceTag; 6] = [
        SourceTag::EventLog,
        SourceTag::AppCallsLog,
        SourceTag::FstManageLog,
        SourceTag::ConnectionsSpecHistory,
        SourceTag::ModuleExecutionsSpecHistory,
        SourceTag::FuvLog,
    ];

    pub fn code(self) -> i64 {
        match self {
            SourceTag::EventLog => 1,
            SourceTag::AppCallsLog => 2,
            SourceTag::FstManageLog => 3,
            SourceTag::ConnectionsSpecHistory => 4,
            SourceTag::ModuleExecutionsSpecHistory => 5,
            SourceTag::FuvLog => 6,
        }
    }

    /// Returns `None` for the indefinite code `0` and any unknown code.
    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| tag.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            SourceTag::EventLog => "ForrasEventLog",
            SourceTag::AppCallsLog => "ForrasAppCallsLog",
            SourceTag::FstManageLog => "ForrasFSTManageLog",
            SourceTag::ConnectionsSpecHistory => "ForrasConnections_SpecHistory",
            SourceTag::ModuleExecutionsSpecHistory => "ForrasModuleExecutions_SpecHistory",
            SourceTag::FuvLog => "FUVLog",
        }
    }

    pub fn original_table(self) -> OriginalTable {
        let install = |table| OriginalTable {
            database: OriginDatabase::Install,
            table,
            key_column: "forras_id",
        };

        match self {
            SourceTag::EventLog => install("forras_event_log"),
            SourceTag::AppCallsLog => install("forras_app_calls_log"),
            SourceTag::FstManageLog => install("forras_fst_manage_log"),
            SourceTag::ConnectionsSpecHistory => install("forras_connections_spec_history"),
            SourceTag::ModuleExecutionsSpecHistory => install("forras_module_executions_spec_history"),
            SourceTag::FuvLog => OriginalTable {
                database: OriginDatabase::Fuv,
                table: "fuv_log",
                key_column: "id",
            },
        }
    }
}

impl std::fmt::Display for SourceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::fmt::Display for OriginalTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table)
    }
}

/// Normalized, source-agnostic log entry handed from the collector to the writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub unique_id: Uuid,
    pub correlation_id: Option<Uuid>,
    pub log_date: DateTime<Utc>,
    pub session: Option<String>,
    pub system: Option<String>,
    pub system_version: Option<String>,
    pub subsystem: Option<String>,
    pub subsystem_version: Option<String>,
    pub module: Option<String>,
    pub module_version: Option<String>,
    pub function: Option<String>,
    pub log_level: i64,
    pub log_type: Option<String>,
    pub message: Option<String>,
    pub input_values: Option<String>,
    pub output_values: Option<String>,
    pub additional_data: Option<String>,
    pub host: Option<String>,
    pub host_config: Option<String>,
    pub user_data: Option<String>,
    pub is_audit: bool,
    /// Points back to the origin row (or range position for the FUV source).
    pub external_id: Option<String>,
    pub source: SourceTag,
    /// Broker row the record was unpacked from; `None` for range-sourced records.
    pub broker_row_id: Option<i64>,
}

impl CanonicalRecord {
    /// An empty record for `source`; converters fill in what they know.
    pub fn new(source: SourceTag, log_date: DateTime<Utc>) -> Self {
        Self {
            unique_id: Uuid::new_v4(),
            correlation_id: None,
            log_date,
            session: None,
            system: None,
            system_version: None,
            subsystem: None,
            subsystem_version: None,
            module: None,
            module_version: None,
            function: None,
            log_level: 0,
            log_type: None,
            message: None,
            input_values: None,
            output_values: None,
            additional_data: None,
            host: None,
            host_config: None,
            user_data: None,
            is_audit: false,
            external_id: None,
            source,
            broker_row_id: None,
        }
    }

    /// Numeric position of a range-sourced record, used for high-water detection.
    pub fn range_position(&self) -> Option<i64> {
        if self.source != SourceTag::FuvLog || self.broker_row_id.is_some() {
            return None;
        }
        self.external_id.as_deref()?.parse().ok()
    }

    pub fn host_key(&self) -> HostKey {
        HostKey {
            host: self.host.clone(),
            host_config: self.host_config.clone(),
        }
    }

    pub fn master_data_key(&self) -> MasterDataKey {
        let or_na = |value: &Option<String>| {
            value.clone().unwrap_or_else(|| NOT_AVAILABLE.to_string())
        };

        MasterDataKey {
            system: or_na(&self.system),
            system_version: self.system_version.clone(),
            subsystem: or_na(&self.subsystem),
            subsystem_version: self.subsystem_version.clone(),
            module: or_na(&self.module),
            module_version: self.module_version.clone(),
            function: self.function.clone(),
        }
    }
}

/// Post-write cleanup directive passed from the writer to the remover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackInstruction {
    pub broker_row_id: Option<i64>,
    pub external_id: Option<String>,
    pub source: SourceTag,
    pub delete_original: bool,
}

impl FeedbackInstruction {
    pub fn for_record(record: &CanonicalRecord, delete_original: bool) -> Self {
        Self {
            broker_row_id: record.broker_row_id,
            external_id: record.external_id.clone(),
            source: record.source,
            delete_original,
        }
    }
}

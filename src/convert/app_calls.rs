use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use uuid::Uuid;

use super::install::map_upstream;
use super::{ConvertError, Converter};
use crate::record::{CanonicalRecord, SourceTag, NOT_AVAILABLE};
use crate::storage::SourceStore;

fn version_regex() -> &'static Regex {
    static VERSION_RE: OnceLock<Regex> = OnceLock::new();
    VERSION_RE.get_or_init(|| Regex::new(r#"Version="([0-9.]*)""#).expect("valid regex"))
}

/// Module version from an assembly info string such as `<Assembly Version="1.2.3"/>`.
pub(crate) fn module_version(assembly_info: Option<&str>) -> String {
    assembly_info
        .and_then(|info| version_regex().captures(info))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

/// App-call rows carry a related call id and an assembly descriptor.
pub struct AppCallsConverter {
    store: Arc<dyn SourceStore>,
}

impl AppCallsConverter {
    pub fn new(store: Arc<dyn SourceStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Converter for AppCallsConverter {
    async fn convert(&self, id: i64, relational_id: Uuid) -> Result<CanonicalRecord, ConvertError> {
        let tag = SourceTag::AppCallsLog;
        let row = self
            .store
            .fetch_upstream(tag, id)
            .await?
            .ok_or(ConvertError::MissingReference { tag, id })?;

        let related_id = row.related_id;
        let assembly_info = row.assembly_info.clone();
        let mut record = map_upstream(tag, row, relational_id);

        record.module_version = Some(module_version(assembly_info.as_deref()));
        record.external_id = Some(match related_id {
            Some(related) => format!("{}({})", id, related),
            None => id.to_string(),
        });

        let mut data = String::from("<Data>");
        if let Some(extra) = record.additional_data.take() {
            data.push_str(&extra);
        }
        if let Some(info) = assembly_info {
            data.push_str(&info);
        }
        data.push_str("</Data>");
        record.additional_data = Some(data);

        Ok(record)
    }
}

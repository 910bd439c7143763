use std::collections::HashMap;
use std::hash::Hash;

use chrono::{DateTime, Utc};

use crate::record::CanonicalRecord;
use crate::storage::{HostKey, MasterDataKey, TargetLogRow};

/// Reference from a planned log row to one of its dimension rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimRef {
    /// Already stored under this id.
    Existing(i64),
    /// Index into the batch's list of dimension rows still to be inserted.
    Pending(usize),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("{kind} placeholder {index} has no stored id ({available} ids returned)")]
    UnresolvedKey {
        kind: &'static str,
        index: usize,
        available: usize,
    },
}

/// Deduplicated set of dimension rows for one batch.
#[derive(Debug)]
struct DimTable<K> {
    refs: HashMap<K, DimRef>,
    pending: Vec<K>,
}

impl<K: Clone + Eq + Hash> DimTable<K> {
    fn new() -> Self {
        Self {
            refs: HashMap::new(),
            pending: Vec::new(),
        }
    }

    fn get(&self, key: &K) -> Option<DimRef> {
        self.refs.get(key).copied()
    }

    fn insert(&mut self, key: K, stored_id: Option<i64>) -> DimRef {
        if let Some(existing) = self.refs.get(&key) {
            return *existing;
        }
        let dim_ref = match stored_id {
            Some(id) => DimRef::Existing(id),
            None => {
                self.pending.push(key.clone());
                DimRef::Pending(self.pending.len() - 1)
            }
        };
        self.refs.insert(key, dim_ref);
        dim_ref
    }
}

fn resolve(kind: &'static str, dim_ref: DimRef, ids: &[i64]) -> Result<i64, PlanError> {
    match dim_ref {
        DimRef::Existing(id) => Ok(id),
        DimRef::Pending(index) => ids.get(index).copied().ok_or(PlanError::UnresolvedKey {
            kind,
            index,
            available: ids.len(),
        }),
    }
}

struct PlannedLog {
    host: DimRef,
    master_data: DimRef,
    record: CanonicalRecord,
}

/// Two-phase insert plan for one batch of canonical records.
///
/// Phase one records every log row against either a stored dimension id or a
/// placeholder for a dimension row created by this batch. Once the pending
/// dimension rows are inserted, [`WritePlan::resolve`] swaps placeholders for
/// the generated ids, in insertion order.
pub struct WritePlan {
    hosts: DimTable<HostKey>,
    master_data: DimTable<MasterDataKey>,
    logs: Vec<PlannedLog>,
}

impl Default for WritePlan {
    fn default() -> Self {
        Self::new()
    }
}

impl WritePlan {
    pub fn new() -> Self {
        Self {
            hosts: DimTable::new(),
            master_data: DimTable::new(),
            logs: Vec::new(),
        }
    }

    /// Reference for a host already seen in this batch.
    pub fn host_ref(&self, key: &HostKey) -> Option<DimRef> {
        self.hosts.get(key)
    }

    /// Register a host first seen in this batch, with its stored id if the store knows it.
    pub fn add_host(&mut self, key: HostKey, stored_id: Option<i64>) -> DimRef {
        self.hosts.insert(key, stored_id)
    }

    pub fn master_data_ref(&self, key: &MasterDataKey) -> Option<DimRef> {
        self.master_data.get(key)
    }

    pub fn add_master_data(&mut self, key: MasterDataKey, stored_id: Option<i64>) -> DimRef {
        self.master_data.insert(key, stored_id)
    }

    pub fn push_log(&mut self, record: CanonicalRecord, host: DimRef, master_data: DimRef) {
        self.logs.push(PlannedLog {
            host,
            master_data,
            record,
        });
    }

    pub fn pending_hosts(&self) -> &[HostKey] {
        &self.hosts.pending
    }

    pub fn pending_master_data(&self) -> &[MasterDataKey] {
        &self.master_data.pending
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    /// Build the final log rows given the ids generated for the pending dimension rows.
    pub fn resolve(
        self,
        host_ids: &[i64],
        master_data_ids: &[i64],
        created_on: DateTime<Utc>,
    ) -> Result<(Vec<TargetLogRow>, Vec<CanonicalRecord>), PlanError> {
        let mut rows = Vec::with_capacity(self.logs.len());
        let mut records = Vec::with_capacity(self.logs.len());

        for planned in self.logs {
            let host_id = resolve("host", planned.host, host_ids)?;
            let master_data_id = resolve("master data", planned.master_data, master_data_ids)?;
            let record = planned.record;

            rows.push(TargetLogRow {
                host_id,
                master_data_id,
                unique_id: record.unique_id,
                correlation_id: record.correlation_id,
                external_id: record.external_id.clone(),
                log_date: record.log_date,
                created_on,
                session: record.session.clone(),
                log_level: record.log_level,
                log_type: record.log_type.clone(),
                message: record.message.clone(),
                input_values: record.input_values.clone(),
                output_values: record.output_values.clone(),
                additional_data: record.additional_data.clone(),
                user_data: record.user_data.clone(),
                is_audit: record.is_audit,
            });
            records.push(record);
        }

        Ok((rows, records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SourceTag;

    fn host(name: &str) -> HostKey {
        HostKey {
            host: Some(name.to_string()),
            host_config: None,
        }
    }

    #[test]
    fn test_same_new_host_gets_one_placeholder() {
        let mut plan = WritePlan::new();
        let first = plan.add_host(host("H1"), None);
        assert_eq!(plan.host_ref(&host("H1")), Some(first));
        let again = plan.add_host(host("H1"), None);

        assert_eq!(first, DimRef::Pending(0));
        assert_eq!(again, first);
        assert_eq!(plan.pending_hosts().len(), 1);
    }

    #[test]
    fn test_existing_host_is_not_pending() {
        let mut plan = WritePlan::new();
        assert_eq!(plan.add_host(host("H1"), Some(7)), DimRef::Existing(7));
        assert!(plan.pending_hosts().is_empty());
    }

    #[test]
    fn test_resolve_rewrites_placeholders() {
        let mut plan = WritePlan::new();
        let record = CanonicalRecord::new(SourceTag::EventLog, Utc::now());
        let md_key = record.master_data_key();

        let h1 = plan.add_host(host("H1"), None);
        let h2 = plan.add_host(host("H2"), Some(3));
        let md = plan.add_master_data(md_key, None);
        plan.push_log(record.clone(), h1, md);
        plan.push_log(record.clone(), h2, md);
        plan.push_log(record, h1, md);

        let (rows, records) = plan.resolve(&[41], &[90], Utc::now()).unwrap();
        let hosts: Vec<_> = rows.iter().map(|r| r.host_id).collect();
        assert_eq!(hosts, vec![41, 3, 41]);
        assert!(rows.iter().all(|r| r.master_data_id == 90));
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn test_resolve_with_missing_ids_fails() {
        let mut plan = WritePlan::new();
        let record = CanonicalRecord::new(SourceTag::EventLog, Utc::now());
        let h = plan.add_host(host("H1"), None);
        let md = plan.add_master_data(record.master_data_key(), Some(1));
        plan.push_log(record, h, md);

        let result = plan.resolve(&[], &[], Utc::now());
        assert_eq!(
            result.err(),
            Some(PlanError::UnresolvedKey {
                kind: "host",
                index: 0,
                available: 0
            })
        );
    }
}

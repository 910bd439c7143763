pub mod duckdb;
pub mod traits;

pub use self::duckdb::DuckDbStorage;
pub use traits::{
    AlertEvent, AlertRule, BrokerRow, BrokerStatus, CursorStatus, FuvLogRow, HostKey,
    MasterDataKey, RangeClaim, RangeCursor, RangeStore, SourceStore, StorageError, TargetLogRow,
    TargetStore, UpstreamRow,
};

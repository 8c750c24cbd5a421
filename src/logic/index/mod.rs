//! Anomaly Index Module
//!
//! Mục đích: Trả lời nhanh "highlight frame nào" cho một danh sách anomaly đã chốt.
//!
//! # Components
//! - `types.rs`: `AnomalyFilter`, `IndexError`, `IndexStats`
//! - `snapshot.rs`: immutable inverted maps built in one pass
//! - `manager.rs`: `AnomalyIndex`, atomic build-and-swap over a snapshot
//!
//! # Query semantics
//! Values inside a facet are OR-ed, present facets are AND-ed, and a filter
//! with no facet at all matches nothing.

pub mod types;
pub mod snapshot;
pub mod manager;

pub use types::{AnomalyFilter, IndexError, IndexStats};
pub use snapshot::IndexSnapshot;
pub use manager::AnomalyIndex;

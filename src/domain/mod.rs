//! Domain types shared by the orchestrator and the stores.

mod attribute;
mod counter;
mod fingerprint;
mod limit;
mod operation;

pub use attribute::{Attribute, Attributes};
pub use counter::{Counter, ExceededCounter, NewCounter, Window, counter_hash};
pub use limit::{Limit, LimitType, LimitsFilter, LimitsPage, NewLimit, PeriodType, limit_hash};
pub use operation::{
    Amount, AppendOperationInfo, Context, FinalizeOperationsInfo, NewOperation, Operation,
    OperationInfo, OperationStatus,
};

//! Domain model (ids, status, records, deliveries, backoff, decisions, errors).

pub mod backoff;
pub mod decision;
pub mod delivery;
pub mod errors;
pub mod ids;
pub mod record;
pub mod status;

pub use backoff::BackoffPolicy;
pub use decision::{Decision, RETRIES_EXHAUSTED};
pub use delivery::{DeadLetterEnvelope, Delivery};
pub use errors::{
    ConfigError, DeliveryError, ProcessError, QueueError, StoreError, SubmitError, WorkError,
};
pub use ids::TaskId;
pub use record::TaskRecord;
pub use status::TaskStatus;

//! Wire objects shared by the broker, the consumer and API clients.
//!
//! All JSON field names are camelCase. Timestamps on the wire are unix
//! milliseconds.

pub mod crm;
pub mod delivery;
pub mod event;
pub mod sink;
pub mod stats;
pub mod subscription;

pub use crm::{CreateObjectRequest, CrmObjectResponse, ListObjectsQuery, ListObjectsResponse};
pub use delivery::{DeliveryPayload, FailedJobsResponse, IntakeAcceptedResponse};
pub use event::{ChangeEventPayload, IngressEvent, PublishResponse};
pub use sink::{SinkBatch, SinkDataPoint, SinkResponse};
pub use stats::{BrokerStats, ConsumerStats, JobStateCounts, JobView, PipelineCounters};
pub use subscription::{
    DeregisterResponse, ListSubscriptionsResponse, RegisterSubscriptionRequest,
    RegisterSubscriptionResponse, SubscriptionResponse,
};

/// Convert a timestamp into unix milliseconds.
pub fn unix_millis(at: time::OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

/// Convert unix milliseconds into a timestamp, saturating on out-of-range input.
pub fn from_unix_millis(millis: i64) -> time::OffsetDateTime {
    time::OffsetDateTime::from_unix_timestamp_nanos(millis as i128 * 1_000_000)
        .unwrap_or(time::OffsetDateTime::UNIX_EPOCH)
}

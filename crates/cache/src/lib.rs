//! Validated RPKI data and the serial-numbered history served to routers.
//!
//! [`ValidatedCache`] holds the current objects per trust anchor and
//! publishes their union into a [`SerialStore`], which keeps a bounded
//! window of deltas so sessions can answer Serial Queries incrementally.

mod error;
mod history;
mod payload;
mod query;
mod snapshot;
mod validated;

pub use error::{PayloadError, SerialUnknown};
pub use history::{SerialStore, StoreEvent, StoreView};
pub use payload::{Asn, Payload, Prefix, RouteOrigin, RouterCertificate, RouterKey, TrustAnchorId};
pub use query::{Paging, SearchTerm, SortBy, SortDirection, Sorting, ValidatedObjects};
pub use snapshot::{Delta, Diff, Snapshot};
pub use validated::{
    AnnouncementSet, ValidatedCache, ValidatedRoaPrefix, ValidatedRouterCertificate,
    ValidatedSnapshot,
};

mod auth;
mod client;
mod records;

pub use auth::{LoginStatus, LoginTicket};
pub use client::{
    Account, ApiErrorClass, CreatedRecord, DEFAULT_API_VERSION, FsListing, LOCAL_PROVIDER,
    PcapiClient, PcapiError, RecordsListing, SyncDelta,
};
pub use records::{AssetKind, Field, Geometry, Properties, Record, record_name_from_path};

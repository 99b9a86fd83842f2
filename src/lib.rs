//! Bookmark metadata for online videos: a directory tree of JSON sidecar
//! files, an in-memory store over it, and an asynchronous enrichment
//! pipeline that fills in thumbnails and channel identity after the fact.
//!
//! The moving parts:
//! - [`platform`] — vendor tags, the key grammar, URL conversion
//! - [`video`] / [`channel`] — one sidecar file each, with dirty tracking
//! - [`scanner`] — recursive discovery of sidecars under a root
//! - [`store`] — the long-lived cache plus all mutations
//! - [`view`] — filtered, sorted directory listings over a store
//! - [`enrich`] — the shared coordinator running network jobs
//!
//! Stores are single-threaded; the coordinator fans completed jobs back to
//! them over channels, and each store applies its queue with
//! [`Store::drain_enrichment`] on its own thread.

pub mod channel;
pub mod enrich;
pub mod pageinfo;
pub mod platform;
pub mod scanner;
pub mod store;
pub mod video;
pub mod view;

pub use channel::ChannelRecord;
pub use enrich::{Coordinator, EnrichEvent, ImageCache};
pub use pageinfo::{PageInfo, PageInfoExtract, RegexPageInfo};
pub use platform::Vendor;
pub use store::{AddRequest, Store, StoreEvent, StoreKind, StoreState};
pub use video::VideoRecord;
pub use view::{ViewEntry, ViewEntryKind, ViewOptions, ViewOverlay};

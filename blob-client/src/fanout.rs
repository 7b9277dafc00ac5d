//! Multi-target fan-out engines built on the single-target back-ends:
//! parallel listing/removal across Kinetic drives (C9) and replicated
//! broadcast-with-quorum upload (C10).

pub mod listing;
pub mod removal;
pub mod replicated;

pub use listing::ParallelListing;
pub use removal::ParallelRemoval;
pub use replicated::ReplicatedUpload;

//! VOD publication of recorded class videos.

mod coordinator;
mod store;

pub use coordinator::{BatchTranscodeCoordinator, ClassAsset, ClassOutcome, ClassReport, CourseAssets};
pub use store::{AssetStore, MemoryAssetStore};

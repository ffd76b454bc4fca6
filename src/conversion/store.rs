//! Where conversion results are reported.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use classcast_common::{ClassId, CourseId, StreamId};
use dashmap::DashMap;

/// The catalog side of a conversion: records manifest paths per class.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Record the published manifest of a class.
    async fn persist_manifest(
        &self,
        course: &CourseId,
        class: &ClassId,
        manifest: &Path,
    ) -> anyhow::Result<()>;

    /// Class a live stream publishes into, if the catalog knows one.
    async fn live_target(&self, _stream: &StreamId) -> Option<(CourseId, ClassId)> {
        None
    }
}

/// In-process store used by the server and by tests.
#[derive(Debug, Default)]
pub struct MemoryAssetStore {
    manifests: DashMap<(CourseId, ClassId), PathBuf>,
    live_targets: DashMap<StreamId, (CourseId, ClassId)>,
}

impl MemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn manifest(&self, course: &CourseId, class: &ClassId) -> Option<PathBuf> {
        self.manifests
            .get(&(course.clone(), class.clone()))
            .map(|p| p.value().clone())
    }

    /// Every recorded manifest of a course, ordered by class id.
    pub fn course_manifests(&self, course: &CourseId) -> Vec<(ClassId, PathBuf)> {
        let mut out: Vec<(ClassId, PathBuf)> = self
            .manifests
            .iter()
            .filter(|e| &e.key().0 == course)
            .map(|e| (e.key().1.clone(), e.value().clone()))
            .collect();
        out.sort();
        out
    }

    /// Route a live stream into a class directory.
    pub fn set_live_target(&self, stream: StreamId, course: CourseId, class: ClassId) {
        self.live_targets.insert(stream, (course, class));
    }
}

#[async_trait]
impl AssetStore for MemoryAssetStore {
    async fn persist_manifest(
        &self,
        course: &CourseId,
        class: &ClassId,
        manifest: &Path,
    ) -> anyhow::Result<()> {
        self.manifests
            .insert((course.clone(), class.clone()), manifest.to_path_buf());
        Ok(())
    }

    async fn live_target(&self, stream: &StreamId) -> Option<(CourseId, ClassId)> {
        self.live_targets.get(stream).map(|t| t.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_lists_manifests() {
        let store = MemoryAssetStore::new();
        let course = CourseId::parse("7").unwrap();
        store
            .persist_manifest(&course, &ClassId::parse("2").unwrap(), Path::new("/m/7/2/master.m3u8"))
            .await
            .unwrap();
        store
            .persist_manifest(&course, &ClassId::parse("1").unwrap(), Path::new("/m/7/1/master.m3u8"))
            .await
            .unwrap();
        store
            .persist_manifest(&CourseId::parse("8").unwrap(), &ClassId::parse("1").unwrap(), Path::new("/m/8/1/master.m3u8"))
            .await
            .unwrap();

        let listed = store.course_manifests(&course);
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].0, ClassId::parse("1").unwrap());
        assert_eq!(
            store.manifest(&course, &ClassId::parse("2").unwrap()),
            Some(PathBuf::from("/m/7/2/master.m3u8"))
        );
    }

    #[tokio::test]
    async fn live_targets_default_to_none() {
        let store = MemoryAssetStore::new();
        let stream = StreamId::parse("55_abc").unwrap();
        assert!(store.live_target(&stream).await.is_none());
        store.set_live_target(stream.clone(), CourseId::parse("7").unwrap(), ClassId::parse("3").unwrap());
        assert_eq!(
            store.live_target(&stream).await,
            Some((CourseId::parse("7").unwrap(), ClassId::parse("3").unwrap()))
        );
    }
}

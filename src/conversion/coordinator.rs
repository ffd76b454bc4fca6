//! Bounded-concurrency batch conversion of a course's class videos.
//!
//! Every class gets its own task; a semaphore sized to the number of usable
//! encoder slots keeps excess conversions queued. One class failing is
//! logged and reported, never propagated to its siblings.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use classcast_av::ladder;
use classcast_common::{paths, ClassId, CourseId, SessionKey};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use super::store::AssetStore;
use crate::engine::Engine;
use crate::error::{Result, StreamError};
use crate::supervisor::LaunchSpec;

/// One class video waiting to be published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassAsset {
    pub class_id: ClassId,
    pub source_path: PathBuf,
}

/// A course and its classes, in catalog order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseAssets {
    pub course_id: CourseId,
    pub classes: Vec<ClassAsset>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClassOutcome {
    Converted { manifest: PathBuf },
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassReport {
    pub class_id: ClassId,
    #[serde(flatten)]
    pub outcome: ClassOutcome,
}

impl ClassReport {
    pub fn is_converted(&self) -> bool {
        matches!(self.outcome, ClassOutcome::Converted { .. })
    }
}

/// Runs VOD conversions on a fixed pool of encoder slots.
#[derive(Clone)]
pub struct BatchTranscodeCoordinator {
    engine: Engine,
    store: Arc<dyn AssetStore>,
    slots: Arc<Semaphore>,
}

impl BatchTranscodeCoordinator {
    pub fn new(engine: Engine, store: Arc<dyn AssetStore>) -> Self {
        let slots = engine.config.transcode.encoder_slots.max(1);
        Self {
            engine,
            store,
            slots: Arc::new(Semaphore::new(slots)),
        }
    }

    /// Convert every class of `course` and wait for all of them.
    ///
    /// Reports come back in the order the classes were given.
    ///
    /// # Errors
    ///
    /// Only [`StreamError::InvalidInput`] for a course without classes;
    /// per-class failures are part of the returned reports.
    pub async fn convert_all(&self, course: CourseAssets) -> Result<Vec<ClassReport>> {
        if course.classes.is_empty() {
            return Err(StreamError::InvalidInput(format!(
                "course '{}' has no classes",
                course.course_id
            )));
        }

        tracing::info!(
            course = %course.course_id,
            classes = course.classes.len(),
            slots = self.slots.available_permits(),
            "starting batch conversion"
        );

        let mut handles = Vec::with_capacity(course.classes.len());
        for asset in course.classes {
            let this = self.clone();
            let course_id = course.course_id.clone();
            let class_id = asset.class_id.clone();
            let handle = tokio::spawn(async move {
                let _permit = match this.slots.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return ClassOutcome::Failed {
                            error: "encoder pool closed".to_string(),
                        }
                    }
                };
                this.convert_class(&course_id, &asset).await
            });
            handles.push((class_id, handle));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (class_id, handle) in handles {
            let outcome = handle.await.unwrap_or_else(|e| ClassOutcome::Failed {
                error: format!("conversion task failed: {e}"),
            });
            if let ClassOutcome::Failed { error } = &outcome {
                tracing::error!(course = %course.course_id, class = %class_id, "conversion failed: {error}");
            }
            reports.push(ClassReport { class_id, outcome });
        }

        let converted = reports.iter().filter(|r| r.is_converted()).count();
        tracing::info!(
            course = %course.course_id,
            converted,
            total = reports.len(),
            "batch conversion finished"
        );
        Ok(reports)
    }

    async fn convert_class(&self, course: &CourseId, asset: &ClassAsset) -> ClassOutcome {
        if let Some(reason) = self.skip_reason(course, asset) {
            tracing::debug!(course = %course, class = %asset.class_id, "skipping: {reason}");
            return ClassOutcome::Skipped { reason };
        }

        match self.transcode(course, asset).await {
            Ok(manifest) => ClassOutcome::Converted { manifest },
            Err(e) => ClassOutcome::Failed {
                error: e.to_string(),
            },
        }
    }

    fn skip_reason(&self, course: &CourseId, asset: &ClassAsset) -> Option<String> {
        let source = &asset.source_path;
        if source.as_os_str().is_empty() {
            Some("no source".to_string())
        } else if self
            .engine
            .layout
            .is_published(course, &asset.class_id, source)
        {
            Some("already published".to_string())
        } else if paths::is_manifest(source) {
            Some("already a manifest".to_string())
        } else if !paths::has_extension(source) {
            Some("source has no extension".to_string())
        } else {
            None
        }
    }

    async fn transcode(&self, course: &CourseId, asset: &ClassAsset) -> Result<PathBuf> {
        let class_dir = self.engine.layout.class_dir(course, &asset.class_id);
        let source = move_into(&asset.source_path, &class_dir).await?;

        let descriptor = self.engine.probe.probe_file(&source).await?;

        let rungs = ladder::plan(descriptor.total_pixels(), descriptor.fps);
        let accel = self.engine.accel().await;
        let command = self.engine.builder.build_with_ladder(
            &descriptor,
            rungs,
            false,
            accel,
            &self.engine.settings,
        )?;

        tracing::info!(
            course = %course,
            class = %asset.class_id,
            accel = %accel,
            renditions = command.ladder.len(),
            "transcoding class"
        );
        tracing::debug!(command = %command.display(), "transcoder argv");

        let key = SessionKey::from(format!("vod:{course}/{}", asset.class_id));
        let launched = self
            .engine
            .supervisor
            .start(LaunchSpec::new(key, command.argv, &class_dir))
            .await?;
        let report = launched.wait().await?;
        if !report.success() {
            return Err(StreamError::Av(classcast_av::Error::tool_failed(
                "ffmpeg",
                report.describe(),
            )));
        }

        let manifest = self.engine.layout.master_manifest(course, &asset.class_id);
        self.store
            .persist_manifest(course, &asset.class_id, &manifest)
            .await
            .map_err(|e| StreamError::Persist(format!("{e:#}")))?;
        tracing::info!(course = %course, class = %asset.class_id, manifest = ?manifest, "class published");
        Ok(manifest)
    }
}

/// Move `source` into `dir`, keeping its file name.
async fn move_into(source: &Path, dir: &Path) -> Result<PathBuf> {
    if !tokio::fs::try_exists(source).await.unwrap_or(false) {
        return Err(classcast_av::Error::file_not_found(source).into());
    }
    let name = source
        .file_name()
        .ok_or_else(|| StreamError::InvalidInput(format!("no file name in {}", source.display())))?;

    tokio::fs::create_dir_all(dir).await?;
    let target = dir.join(name);
    if tokio::fs::rename(source, &target).await.is_err() {
        // Cross-device moves need a copy.
        tokio::fs::copy(source, &target).await?;
        tokio::fs::remove_file(source).await?;
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::conversion::MemoryAssetStore;
    use tempfile::TempDir;

    fn coordinator(root: &Path) -> BatchTranscodeCoordinator {
        let mut config = Config::default();
        config.storage.videos_dir = root.to_path_buf();
        BatchTranscodeCoordinator::new(
            Engine::from_config(config),
            Arc::new(MemoryAssetStore::new()),
        )
    }

    fn asset(class: &str, path: impl Into<PathBuf>) -> ClassAsset {
        ClassAsset {
            class_id: ClassId::parse(class).unwrap(),
            source_path: path.into(),
        }
    }

    #[test]
    fn skip_rules() {
        let tmp = TempDir::new().unwrap();
        let c = coordinator(tmp.path());
        let course = CourseId::parse("7").unwrap();
        let published = tmp.path().join("7/1/master.m3u8");

        assert!(c.skip_reason(&course, &asset("1", "")).is_some());
        assert!(c.skip_reason(&course, &asset("1", published)).is_some());
        assert!(c.skip_reason(&course, &asset("1", "/up/old.m3u8")).is_some());
        assert!(c.skip_reason(&course, &asset("1", "/up/noext")).is_some());
        assert!(c.skip_reason(&course, &asset("1", "/up/lesson.mp4")).is_none());
    }

    #[tokio::test]
    async fn empty_course_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let c = coordinator(tmp.path());
        let err = c
            .convert_all(CourseAssets {
                course_id: CourseId::parse("7").unwrap(),
                classes: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn missing_source_fails_only_that_class() {
        let tmp = TempDir::new().unwrap();
        let c = coordinator(tmp.path());
        let reports = c
            .convert_all(CourseAssets {
                course_id: CourseId::parse("7").unwrap(),
                classes: vec![
                    asset("1", tmp.path().join("gone.mp4")),
                    asset("2", "/up/old.m3u8"),
                ],
            })
            .await
            .unwrap();

        assert_eq!(reports.len(), 2);
        assert!(matches!(reports[0].outcome, ClassOutcome::Failed { .. }));
        assert!(matches!(reports[1].outcome, ClassOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn move_into_relocates_file() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("in.mp4");
        std::fs::write(&src, b"x").unwrap();
        let dir = tmp.path().join("7/1");

        let moved = move_into(&src, &dir).await.unwrap();
        assert_eq!(moved, dir.join("in.mp4"));
        assert!(moved.exists());
        assert!(!src.exists());
    }
}

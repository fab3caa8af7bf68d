// Artifact naming and storage
//
// Annotated images and videos are written into a single storage directory and
// referenced by bare file name in the analysis records. Uploaded inputs are
// kept in an `incoming/` subdirectory so they can never shadow an artifact.

use chrono::Local;
use image::{ImageFormat, RgbImage};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use walkdir::WalkDir;

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::types::VideoArtifacts;

/// Fixed name used by [`ImageNaming::Reserved`].
pub const RESERVED_IMAGE_NAME: &str = "result.jpg";
const IMAGE_PREFIX: &str = "result_";
const INCOMING_DIR: &str = "incoming";

/// How annotated still images are named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ImageNaming {
    /// One `result.jpg` slot, replaced on every analysis.
    Reserved,
    /// `result_<stamp>.jpg` per request, pruned to the retention limit.
    #[default]
    Request,
}

pub struct ArtifactStore {
    root: PathBuf,
    image_naming: ImageNaming,
    retain_images: usize,
    counter: AtomicU64,
}

impl ArtifactStore {
    pub fn open(
        root: impl Into<PathBuf>,
        image_naming: ImageNaming,
        retain_images: usize,
    ) -> PipelineResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(INCOMING_DIR))?;
        tracing::info!(
            "Artifact store at {:?} (image naming: {:?}, retain: {})",
            root,
            image_naming,
            retain_images
        );

        Ok(Self {
            root,
            image_naming,
            retain_images: retain_images.max(1),
            counter: AtomicU64::new(0),
        })
    }

    /// Request-scoped location for an upload: `incoming/<stamp>_<name>`, where
    /// `name` is the client-supplied name reduced by [`upload_name`].
    pub fn incoming_path(&self, original_name: &str) -> Option<PathBuf> {
        let name = upload_name(original_name)?;
        let stamp = self.stamp(Path::new(name));
        Some(self.root.join(INCOMING_DIR).join(format!("{stamp}_{name}")))
    }

    /// Resolve an artifact name from a retrieval request. Only bare file names
    /// of existing files directly inside the store are accepted.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        if name.is_empty()
            || name.starts_with('.')
            || name.contains(['/', '\\'])
            || name.contains("..")
        {
            return None;
        }

        let path = self.root.join(name);
        path.is_file().then_some(path)
    }

    /// Unique, sortable stamp: local wall clock to the millisecond, a per-process
    /// sequence number, and a short digest over the input path and the clock.
    pub fn stamp(&self, input: &Path) -> String {
        let now = Local::now();
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);

        let mut hasher = Sha256::new();
        hasher.update(input.as_os_str().to_string_lossy().as_bytes());
        hasher.update(now.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
        hasher.update(seq.to_le_bytes());
        let digest = hex::encode(hasher.finalize());

        format!(
            "{}_{:06}_{}",
            now.format("%Y%m%d_%H%M%S_%3f"),
            seq % 1_000_000,
            &digest[..8]
        )
    }

    pub fn video_artifacts(&self, input: &Path) -> VideoArtifacts {
        let stamp = self.stamp(input);
        VideoArtifacts {
            intermediate: self.root.join(format!("output_{stamp}.mp4")),
            web: self.root.join(format!("web_output_{stamp}.mp4")),
        }
    }

    /// Empty the reserved `result.jpg` slot so a failing analysis cannot leave
    /// the previous request's image behind. No-op for request naming.
    pub fn clear_reserved_image(&self) -> PipelineResult<()> {
        if self.image_naming != ImageNaming::Reserved {
            return Ok(());
        }

        match fs::remove_file(self.root.join(RESERVED_IMAGE_NAME)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist an annotated still and return its artifact name.
    pub fn save_annotated_image(&self, image: &RgbImage, input: &Path) -> PipelineResult<String> {
        let name = match self.image_naming {
            ImageNaming::Reserved => RESERVED_IMAGE_NAME.to_string(),
            ImageNaming::Request => format!("{IMAGE_PREFIX}{}.jpg", self.stamp(input)),
        };

        let path = self.root.join(&name);
        image
            .save_with_format(&path, ImageFormat::Jpeg)
            .map_err(|e| PipelineError::encode(&path, e))?;

        if self.image_naming == ImageNaming::Request {
            match self.prune_images() {
                Ok(0) => {}
                Ok(removed) => tracing::debug!("Pruned {} old annotated images", removed),
                Err(e) => tracing::warn!("Failed to prune annotated images: {}", e),
            }
        }

        Ok(name)
    }

    /// Delete request-scoped annotated images beyond the newest `retain_images`.
    /// Returns how many files were removed.
    pub fn prune_images(&self) -> PipelineResult<usize> {
        let mut images: Vec<PathBuf> = WalkDir::new(&self.root)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                e.file_name()
                    .to_str()
                    .map(|n| n.starts_with(IMAGE_PREFIX) && n.ends_with(".jpg"))
                    .unwrap_or(false)
            })
            .map(|e| e.path().to_path_buf())
            .collect();

        if images.len() <= self.retain_images {
            return Ok(0);
        }

        // Stamped names sort chronologically; newest first.
        images.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
        let mut removed = 0;
        for stale in &images[self.retain_images..] {
            fs::remove_file(stale)?;
            removed += 1;
        }
        Ok(removed)
    }
}

/// Final path component of a client-supplied upload name; `None` if nothing
/// usable remains.
pub fn upload_name(original_name: &str) -> Option<&str> {
    let name = Path::new(original_name)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .last()?;

    if name.is_empty() || name.starts_with('.') {
        return None;
    }
    Some(name)
}

/// File name of an artifact path, as referenced in result records.
pub fn artifact_name(path: &Path) -> String {
    path.file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

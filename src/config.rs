//! Store and tool configuration

use std::path::{Path, PathBuf};

/// Filesystem layout and external tool paths for the article pipeline
///
/// Collects everything the stores need to know: where raw articles,
/// in-progress uploads, attachment blobs, and thumbnails live, which external
/// programs derive thumbnails, and whether article files are gzip-compressed
/// on disk.
///
/// # Example
///
/// ```
/// use newsd::StoreConfig;
///
/// // Recommended: the constructor with the four directories
/// let config = StoreConfig::new("articles", "incoming", "attachments", "thumbs");
///
/// // Enable gzip compression of stored articles
/// let config = StoreConfig::new("articles", "incoming", "attachments", "thumbs")
///     .with_compression(true);
/// ```
#[must_use]
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StoreConfig {
    /// Directory holding raw article files, one per message-id
    pub store_dir: PathBuf,

    /// Directory for temporary files during upload
    ///
    /// Temp files are never gzip-encoded and never decompressed on read.
    pub incoming_dir: PathBuf,

    /// Directory holding content-addressed attachment blobs
    pub attachments_dir: PathBuf,

    /// Directory holding derived thumbnails
    pub thumbs_dir: PathBuf,

    /// Path to the image converter (ImageMagick `convert` or compatible)
    #[serde(default = "default_convert_bin")]
    pub convert_bin: PathBuf,

    /// Path to the video/audio decoder (`ffmpeg` or compatible)
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: PathBuf,

    /// Path to the spectrogram generator (`sox`)
    #[serde(default = "default_sox_bin")]
    pub sox_bin: PathBuf,

    /// Gzip-compress stored article files
    ///
    /// Reads always sniff the gzip magic and fall back to raw, so this can
    /// be toggled without rewriting the store.
    #[serde(default)]
    pub compression: bool,
}

fn default_convert_bin() -> PathBuf {
    PathBuf::from("/usr/bin/convert")
}

fn default_ffmpeg_bin() -> PathBuf {
    PathBuf::from("/usr/bin/ffmpeg")
}

fn default_sox_bin() -> PathBuf {
    PathBuf::from("/usr/bin/sox")
}

impl StoreConfig {
    /// Create a configuration with the given directories and default tool paths
    pub fn new(
        store_dir: impl AsRef<Path>,
        incoming_dir: impl AsRef<Path>,
        attachments_dir: impl AsRef<Path>,
        thumbs_dir: impl AsRef<Path>,
    ) -> Self {
        Self {
            store_dir: store_dir.as_ref().to_path_buf(),
            incoming_dir: incoming_dir.as_ref().to_path_buf(),
            attachments_dir: attachments_dir.as_ref().to_path_buf(),
            thumbs_dir: thumbs_dir.as_ref().to_path_buf(),
            convert_bin: default_convert_bin(),
            ffmpeg_bin: default_ffmpeg_bin(),
            sox_bin: default_sox_bin(),
            compression: false,
        }
    }

    /// Place every directory under a single base directory
    ///
    /// Uses the conventional subdirectory names `articles`, `incoming`,
    /// `attachments`, and `thumbs`.
    pub fn under(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self::new(
            base.join("articles"),
            base.join("incoming"),
            base.join("attachments"),
            base.join("thumbs"),
        )
    }

    /// Toggle gzip compression of stored articles
    pub fn with_compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }

    /// Override the external tool paths
    pub fn with_tools(
        mut self,
        convert: impl AsRef<Path>,
        ffmpeg: impl AsRef<Path>,
        sox: impl AsRef<Path>,
    ) -> Self {
        self.convert_bin = convert.as_ref().to_path_buf();
        self.ffmpeg_bin = ffmpeg.as_ref().to_path_buf();
        self.sox_bin = sox.as_ref().to_path_buf();
        self
    }
}

//! Content-addressed attachment store
//!
//! Attachment bytes live at `<attachments>/<sha512>.<ext>`, so identical
//! content is stored exactly once no matter how many articles reference it.
//! Thumbnails are derived by external tools and live alongside in the
//! thumbnail directory.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha512};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::{NewsError, Result};

const IMAGE_EXTENSIONS: &[&str] = &["gif", "ico", "png", "jpeg", "jpg", "webp"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "ogg", "oga", "opus", "flac", "m4a"];

/// Content-addressed blob store with out-of-process thumbnailing
#[derive(Debug, Clone)]
pub struct BlobStore {
    attachments: PathBuf,
    thumbs: PathBuf,
    convert_bin: PathBuf,
    ffmpeg_bin: PathBuf,
    sox_bin: PathBuf,
}

impl BlobStore {
    /// Open the store, creating its directories if needed
    pub fn open(config: &StoreConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.attachments_dir)?;
        std::fs::create_dir_all(&config.thumbs_dir)?;
        Ok(Self {
            attachments: config.attachments_dir.clone(),
            thumbs: config.thumbs_dir.clone(),
            convert_bin: config.convert_bin.clone(),
            ffmpeg_bin: config.ffmpeg_bin.clone(),
            sox_bin: config.sox_bin.clone(),
        })
    }

    /// Save attachment bytes, returning the storage filename
    ///
    /// The filename is `<sha512-hex>.<extension>`. Re-saving identical bytes
    /// is a no-op, and concurrent saves of identical content are safe: the
    /// name is derived from the content, so both writers produce the same
    /// file.
    pub fn save(&self, data: &[u8], extension: &str) -> Result<String> {
        let hash = hex::encode(Sha512::digest(data));
        let storage_filename = format!("{}.{}", hash, extension.to_ascii_lowercase());
        let path = self.attachment_path(&storage_filename);
        if !path.is_file() {
            std::fs::write(&path, data)?;
            debug!("saved attachment {} ({} bytes)", storage_filename, data.len());
        }
        Ok(storage_filename)
    }

    /// Full path of a stored attachment
    #[must_use]
    pub fn attachment_path(&self, storage_filename: &str) -> PathBuf {
        self.attachments.join(storage_filename)
    }

    /// Full path of an attachment's thumbnail
    ///
    /// Thumbnails are JPEG, named `<storage_filename>.jpg`, except for GIF
    /// sources which keep their filename unchanged.
    #[must_use]
    pub fn thumbnail_path(&self, storage_filename: &str) -> PathBuf {
        if storage_filename.ends_with(".gif") {
            self.thumbs.join(storage_filename)
        } else {
            self.thumbs.join(format!("{}.jpg", storage_filename))
        }
    }

    /// Does a thumbnail already exist for this attachment?
    #[must_use]
    pub fn has_thumbnail(&self, storage_filename: &str) -> bool {
        self.thumbnail_path(storage_filename).is_file()
    }

    /// Derive a thumbnail for a stored attachment
    ///
    /// Images go through the converter, audio through a WAV intermediate and
    /// the spectrogram tool, everything else is treated as video and gets a
    /// single scaled frame. Failures are logged and returned; the source
    /// blob is never touched.
    pub async fn make_thumbnail(&self, storage_filename: &str) -> Result<()> {
        let input = self.attachment_path(storage_filename);
        let output = self.thumbnail_path(storage_filename);
        let ext = extension_of(storage_filename);

        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            run_tool(
                Command::new(&self.convert_bin)
                    .arg("-thumbnail")
                    .arg("200")
                    .arg(&input)
                    .arg(&output),
            )
            .await?;
        } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            let wav = self.attachments.join(format!("{}.wav", storage_filename));
            let decoded = run_tool(Command::new(&self.ffmpeg_bin).arg("-i").arg(&input).arg(&wav)).await;
            let spectro = match decoded {
                Ok(()) => {
                    run_tool(
                        Command::new(&self.sox_bin)
                            .arg(&wav)
                            .arg("-n")
                            .arg("spectrogram")
                            .arg("-a")
                            .arg("-d")
                            .arg("0:10")
                            .arg("-r")
                            .arg("-p")
                            .arg("6")
                            .arg("-x")
                            .arg("200")
                            .arg("-y")
                            .arg("150")
                            .arg("-o")
                            .arg(&output),
                    )
                    .await
                }
                Err(e) => Err(e),
            };
            // the intermediate goes away whether or not the tools succeeded
            let _ = std::fs::remove_file(&wav);
            spectro?;
        } else {
            run_tool(
                Command::new(&self.ffmpeg_bin)
                    .arg("-i")
                    .arg(&input)
                    .arg("-vf")
                    .arg("scale=300:200")
                    .arg("-vframes")
                    .arg("1")
                    .arg(&output),
            )
            .await?;
        }
        info!("made thumbnail for {}", storage_filename);
        Ok(())
    }

    /// Enumerate every stored attachment filename
    pub fn list_all(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.attachments)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(names)
    }

    /// Remove an attachment blob and its thumbnail, ignoring absence
    pub fn remove(&self, storage_filename: &str) -> Result<()> {
        remove_if_present(&self.attachment_path(storage_filename))?;
        remove_if_present(&self.thumbnail_path(storage_filename))?;
        debug!("removed attachment {}", storage_filename);
        Ok(())
    }
}

fn extension_of(storage_filename: &str) -> String {
    storage_filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn run_tool(cmd: &mut Command) -> Result<()> {
    let output = cmd.output().await?;
    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!("thumbnail tool failed: {}", stderr.trim());
        Err(NewsError::Thumbnail(stderr.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, BlobStore) {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig::under(tmp.path());
        let blobs = BlobStore::open(&config).unwrap();
        (tmp, blobs)
    }

    #[test]
    fn test_save_content_addressed() {
        let (_tmp, blobs) = store();
        let fname = blobs.save(b"png bytes", "png").unwrap();
        assert!(fname.ends_with(".png"));
        assert_eq!(fname.len(), 128 + 4);
        assert!(blobs.attachment_path(&fname).is_file());
        assert_eq!(std::fs::read(blobs.attachment_path(&fname)).unwrap(), b"png bytes");
    }

    #[test]
    fn test_save_idempotent() {
        let (_tmp, blobs) = store();
        let a = blobs.save(b"same bytes", "png").unwrap();
        let b = blobs.save(b"same bytes", "png").unwrap();
        assert_eq!(a, b);
        assert_eq!(blobs.list_all().unwrap().len(), 1);
    }

    #[test]
    fn test_save_distinct_content_distinct_files() {
        let (_tmp, blobs) = store();
        let a = blobs.save(b"one", "png").unwrap();
        let b = blobs.save(b"two", "png").unwrap();
        assert_ne!(a, b);
        assert_eq!(blobs.list_all().unwrap().len(), 2);
    }

    #[test]
    fn test_thumbnail_path_rules() {
        let (_tmp, blobs) = store();
        let jpg = blobs.thumbnail_path("abcd.png");
        assert!(jpg.to_string_lossy().ends_with("abcd.png.jpg"));
        let gif = blobs.thumbnail_path("abcd.gif");
        assert!(gif.to_string_lossy().ends_with("abcd.gif"));
        assert!(!gif.to_string_lossy().ends_with(".jpg"));
    }

    #[test]
    fn test_remove_blob_and_thumbnail() {
        let (_tmp, blobs) = store();
        let fname = blobs.save(b"bytes", "png").unwrap();
        std::fs::write(blobs.thumbnail_path(&fname), b"thumb").unwrap();
        blobs.remove(&fname).unwrap();
        assert!(!blobs.attachment_path(&fname).is_file());
        assert!(!blobs.has_thumbnail(&fname));
        // removing again is fine
        blobs.remove(&fname).unwrap();
    }

    #[tokio::test]
    async fn test_make_thumbnail_failure_keeps_blob() {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig::under(tmp.path()).with_tools(
            "/nonexistent/convert",
            "/nonexistent/ffmpeg",
            "/nonexistent/sox",
        );
        let blobs = BlobStore::open(&config).unwrap();
        let fname = blobs.save(b"image bytes", "png").unwrap();
        assert!(blobs.make_thumbnail(&fname).await.is_err());
        assert!(blobs.attachment_path(&fname).is_file());
        assert!(!blobs.has_thumbnail(&fname));
    }

    #[tokio::test]
    async fn test_make_thumbnail_audio_cleans_wav() {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig::under(tmp.path()).with_tools(
            "/nonexistent/convert",
            "/nonexistent/ffmpeg",
            "/nonexistent/sox",
        );
        let blobs = BlobStore::open(&config).unwrap();
        let fname = blobs.save(b"audio bytes", "mp3").unwrap();
        assert!(blobs.make_thumbnail(&fname).await.is_err());
        // no stray wav intermediate left behind
        let wavs: Vec<_> = blobs
            .list_all()
            .unwrap()
            .into_iter()
            .filter(|n| n.ends_with(".wav"))
            .collect();
        assert!(wavs.is_empty());
    }

    #[test]
    fn test_list_all_only_files() {
        let (_tmp, blobs) = store();
        blobs.save(b"a", "png").unwrap();
        std::fs::create_dir(blobs.attachments.join("subdir")).unwrap();
        let names = blobs.list_all().unwrap();
        assert_eq!(names.len(), 1);
    }
}

//! # Map store
//!
//! Occupancy maps live in the maps directory as `<name>.yaml` metadata next to a `<name>.pgm`
//! image. Clients download maps as PNG, which is converted from the PGM on first request and kept
//! next to it.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use image::ImageFormat;
use log::{debug, info};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Extensions of the files making up a map.
const MAP_EXTENSIONS: [&str; 3] = ["yaml", "pgm", "png"];

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MapStore {
    dir: PathBuf,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum MapStoreError {
    #[error("Invalid map name {0:?}")]
    InvalidName(String),

    #[error("No map named {0:?}")]
    NotFound(String),

    #[error("Could not convert map {0:?} to PNG: {1}")]
    Conversion(String, image::ImageError),

    #[error("Map IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("The conversion task failed: {0}")]
    TaskJoinError(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MapStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the named map without extension.
    pub fn map_base(&self, name: &str) -> Result<PathBuf, MapStoreError> {
        validate_name(name)?;
        Ok(self.dir.join(name))
    }

    /// Path of one file of the named map.
    pub fn map_file(&self, name: &str, ext: &str) -> Result<PathBuf, MapStoreError> {
        validate_name(name)?;
        Ok(self.dir.join(format!("{}.{}", name, ext)))
    }

    /// Get the named map as PNG bytes.
    pub async fn download(&self, name: &str) -> Result<Vec<u8>, MapStoreError> {
        let png_path = self.map_file(name, "png")?;
        let pgm_path = self.map_file(name, "pgm")?;

        if !png_path.exists() {
            if !pgm_path.exists() {
                return Err(MapStoreError::NotFound(name.into()));
            }

            info!("Converting map {:?} to PNG", name);
            let png_clone = png_path.clone();
            tokio::task::spawn_blocking(move || convert_pgm_to_png(&pgm_path, &png_clone))
                .await
                .map_err(|e| MapStoreError::TaskJoinError(e.to_string()))?
                .map_err(|e| MapStoreError::Conversion(name.into(), e))?;
        }

        debug!("Serving map {}", png_path.display());
        Ok(tokio::fs::read(&png_path).await?)
    }

    /// Names of all maps in the store, sorted.
    pub async fn list(&self) -> Result<Vec<String>, MapStoreError> {
        let mut names = BTreeSet::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();

            let is_map_file = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| MAP_EXTENSIONS.contains(&e))
                .unwrap_or(false);
            if !is_map_file {
                continue;
            }

            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_name(stem).is_ok() {
                    names.insert(stem.to_owned());
                }
            }
        }

        Ok(names.into_iter().collect())
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Map names are plain file stems, never paths.
pub fn validate_name(name: &str) -> Result<(), MapStoreError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains("..")
        && !name.contains(|c: char| c == '/' || c == '\\' || c.is_control());

    if valid {
        Ok(())
    } else {
        Err(MapStoreError::InvalidName(name.into()))
    }
}

/// Convert a PGM image to PNG. The PNG is written to a temporary file first so concurrent readers
/// never see a partial image.
fn convert_pgm_to_png(pgm_path: &Path, png_path: &Path) -> Result<(), image::ImageError> {
    let img = image::open(pgm_path)?;

    let tmp_path = png_path.with_extension("png.tmp");
    img.save_with_format(&tmp_path, ImageFormat::Png)?;
    std::fs::rename(&tmp_path, png_path)?;

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    const PNG_SIGNATURE: [u8; 4] = [0x89, b'P', b'N', b'G'];

    fn write_pgm(dir: &Path, name: &str) {
        let mut pgm = b"P5\n2 2\n255\n".to_vec();
        pgm.extend_from_slice(&[0, 127, 254, 255]);
        std::fs::write(dir.join(format!("{}.pgm", name)), pgm).unwrap();
    }

    #[tokio::test]
    async fn test_download_converts_once() {
        let dir = tempfile::tempdir().unwrap();
        write_pgm(dir.path(), "house");
        let store = MapStore::new(dir.path());

        let png = store.download("house").await.unwrap();
        assert_eq!(&png[..4], &PNG_SIGNATURE);
        assert!(dir.path().join("house.png").exists());
        assert!(!dir.path().join("house.png.tmp").exists());

        // Served from the PNG once the PGM is gone
        std::fs::remove_file(dir.path().join("house.pgm")).unwrap();
        assert_eq!(store.download("house").await.unwrap(), png);
    }

    #[tokio::test]
    async fn test_download_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.pgm"), b"not an image").unwrap();
        let store = MapStore::new(dir.path());

        assert!(matches!(
            store.download("missing").await,
            Err(MapStoreError::NotFound(_))
        ));
        assert!(matches!(
            store.download("../secret").await,
            Err(MapStoreError::InvalidName(_))
        ));
        assert!(matches!(
            store.download("broken").await,
            Err(MapStoreError::Conversion(_, _))
        ));
    }

    #[tokio::test]
    async fn test_list() {
        let dir = tempfile::tempdir().unwrap();
        for f in &["b.yaml", "b.pgm", "a.png", "c.yaml", "notes.txt"] {
            std::fs::write(dir.path().join(f), b"").unwrap();
        }
        let store = MapStore::new(dir.path());

        assert_eq!(store.list().await.unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("turtlebot3_house").is_ok());
        assert!(validate_name("lab-2").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("a\\b").is_err());
        assert!(validate_name(".hidden").is_err());
    }
}

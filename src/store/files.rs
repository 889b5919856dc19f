use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::info;

use crate::models::SlotImage;

/// Per-session directory tree for captured slot images, rooted at
/// `{data_dir}/scans`. Image files live at `{session_id}/images/{slot}.jpg`
/// so re-capturing a slot overwrites deterministically.
#[derive(Debug, Clone)]
pub struct ImageVault {
    root: PathBuf,
}

impl ImageVault {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.join("scans"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    pub fn images_dir(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("images")
    }

    pub fn slot_image_path(&self, session_id: &str, slot: u32) -> PathBuf {
        self.images_dir(session_id).join(format!("{slot}.jpg"))
    }

    /// Staging area for photos before they are committed to a slot.
    pub fn staging_dir(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("staging")
    }

    pub fn ensure_session_dirs(&self, session_id: &str) -> Result<()> {
        let images = self.images_dir(session_id);
        std::fs::create_dir_all(&images)
            .with_context(|| format!("failed to create {}", images.display()))?;
        let staging = self.staging_dir(session_id);
        std::fs::create_dir_all(&staging)
            .with_context(|| format!("failed to create {}", staging.display()))?;
        Ok(())
    }

    /// Copy a session's captured images into `{dest}/{session_id}`, ascending
    /// by slot, named `slot-NN.jpg` with the slot number 1-based and
    /// zero-padded. A missing source file fails the export.
    pub fn export_session_images(
        &self,
        session_id: &str,
        images: &[SlotImage],
        dest: &Path,
    ) -> Result<Vec<PathBuf>> {
        let export_dir = dest.join(session_id);
        std::fs::create_dir_all(&export_dir)
            .with_context(|| format!("failed to create {}", export_dir.display()))?;

        let mut sorted: Vec<&SlotImage> = images.iter().collect();
        sorted.sort_by_key(|image| image.slot);

        let mut exported = Vec::with_capacity(sorted.len());
        for image in sorted {
            let source = Path::new(&image.path);
            if !source.exists() {
                bail!("missing source image for slot {}", image.slot + 1);
            }
            let target = export_dir.join(format!("slot-{:02}.jpg", image.slot + 1));
            std::fs::copy(source, &target)
                .with_context(|| format!("failed to export {}", target.display()))?;
            exported.push(target);
        }

        info!(
            "Exported {} images for session {session_id} to {}",
            exported.len(),
            export_dir.display()
        );
        Ok(exported)
    }

    /// Remove the whole session tree. A missing tree is not an error, so the
    /// call is safe to repeat.
    pub fn delete_session_tree(&self, session_id: &str) -> Result<()> {
        let dir = self.session_dir(session_id);
        if !dir.exists() {
            return Ok(());
        }
        std::fs::remove_dir_all(&dir)
            .with_context(|| format!("failed to remove {}", dir.display()))?;
        info!("Removed scan directory {}", dir.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_deterministic_per_slot() {
        let vault = ImageVault::new(Path::new("/data"));
        assert_eq!(
            vault.slot_image_path("abc", 7),
            PathBuf::from("/data/scans/abc/images/7.jpg")
        );
    }

    #[test]
    fn export_copies_ascending_with_padded_names() {
        let dir = tempfile::tempdir().unwrap();
        let vault = ImageVault::new(dir.path());
        vault.ensure_session_dirs("s1").unwrap();

        // Out of slot order on purpose.
        let mut images = Vec::new();
        for slot in [7u32, 0, 12] {
            let path = vault.slot_image_path("s1", slot);
            std::fs::write(&path, format!("jpeg-{slot}")).unwrap();
            images.push(image_at(slot, &path));
        }

        let dest = dir.path().join("exported");
        let exported = vault.export_session_images("s1", &images, &dest).unwrap();

        let names: Vec<String> = exported
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["slot-01.jpg", "slot-08.jpg", "slot-13.jpg"]);
        assert_eq!(
            std::fs::read_to_string(dest.join("s1/slot-08.jpg")).unwrap(),
            "jpeg-7"
        );
    }

    #[test]
    fn export_fails_on_missing_source_naming_the_slot() {
        let dir = tempfile::tempdir().unwrap();
        let vault = ImageVault::new(dir.path());
        let images = vec![image_at(4, &vault.slot_image_path("s1", 4))];

        let err = vault
            .export_session_images("s1", &images, &dir.path().join("exported"))
            .unwrap_err();
        assert!(err.to_string().contains("slot 5"), "{err}");
    }

    fn image_at(slot: u32, path: &Path) -> SlotImage {
        SlotImage {
            slot,
            path: path.to_string_lossy().into_owned(),
            heading: f64::from(slot) * 15.0,
            captured_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn delete_removes_tree_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let vault = ImageVault::new(dir.path());
        vault.ensure_session_dirs("s1").unwrap();
        let image = vault.slot_image_path("s1", 0);
        std::fs::write(&image, b"jpeg").unwrap();
        assert!(image.exists());

        vault.delete_session_tree("s1").unwrap();
        assert!(!vault.session_dir("s1").exists());
        // Second delete of a gone tree succeeds.
        vault.delete_session_tree("s1").unwrap();
    }
}

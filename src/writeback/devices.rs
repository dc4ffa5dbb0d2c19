//! Output device images, one lock per open file.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::cluster::ClusterWrite;
use crate::error::{Result, VmaError};
use crate::header::{VmaHeader, DEVICE_ENTRY_LEN, DEVICE_TABLE_OFFSET, MAX_DEVICES};

pub struct DeviceFile {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    file:     Mutex<File>,
}

/// Open output files indexed by device id.
pub struct DeviceSet {
    slots: Vec<Option<DeviceFile>>,
}

impl DeviceSet {
    /// Create one image per present device under `dest`, sized to the
    /// declared device size.  Existing files are truncated.
    ///
    /// Every image needs a name of its own, distinct from the config files
    /// stored in the same archive.
    pub fn create(header: &VmaHeader, dest: &Path) -> Result<Self> {
        let mut claimed = HashSet::new();
        for slot in header.config_slots() {
            claimed.insert(header.config_name(slot)?);
        }

        let mut slots: Vec<Option<DeviceFile>> = (0..MAX_DEVICES).map(|_| None).collect();
        for (id, dev) in header.present_devices() {
            let name = dev.name(&header.blobs)?;
            if !claimed.insert(name.clone()) {
                return Err(VmaError::format(
                    DEVICE_TABLE_OFFSET + id as u64 * DEVICE_ENTRY_LEN,
                    format!("device {id} output name {name:?} is already in use"),
                ));
            }
            let path = output_path(dest, &name)?;
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)
                .map_err(|e| VmaError::output(&path, e))?;
            file.set_len(dev.size).map_err(|e| VmaError::output(&path, e))?;
            tracing::info!(device = id, %name, size = dev.size, "opened device image");
            slots[id as usize] = Some(DeviceFile { name, path, size: dev.size, file: Mutex::new(file) });
        }
        Ok(Self { slots })
    }

    pub fn get(&self, device_id: u8) -> Option<&DeviceFile> {
        self.slots.get(device_id as usize).and_then(Option::as_ref)
    }

    /// Place one cluster at its offset.  Holds the device lock for the
    /// seek and the write.
    ///
    /// Bytes past the declared device size are dropped, so the last cluster
    /// of an unaligned device never grows the image.
    pub fn write(&self, job: &ClusterWrite) -> Result<()> {
        let dev = self.get(job.device_id).ok_or(VmaError::UnknownDevice {
            offset:    job.offset,
            device_id: job.device_id,
        })?;
        let bytes = job.cluster.as_bytes();
        let room  = dev.size.saturating_sub(job.offset).min(bytes.len() as u64) as usize;
        if room == 0 {
            return Ok(());
        }
        // A poisoned lock only means another writer panicked mid-write;
        // the file handle itself is still usable.
        let mut file = dev.file.lock().unwrap_or_else(|p| p.into_inner());
        file.seek(SeekFrom::Start(job.offset))
            .and_then(|_| file.write_all(&bytes[..room]))
            .map_err(|e| VmaError::output(&dev.path, e))
    }

    /// Flush and close every image.
    pub fn close(self) -> Result<()> {
        for dev in self.slots.into_iter().flatten() {
            let mut file = dev.file.into_inner().unwrap_or_else(|p| p.into_inner());
            file.flush().map_err(|e| VmaError::output(&dev.path, e))?;
            tracing::debug!(path = %dev.path.display(), "closed device image");
        }
        Ok(())
    }
}

/// Join `name` onto `dest`, refusing anything that is not a plain file name.
pub(crate) fn output_path(dest: &Path, name: &str) -> Result<PathBuf> {
    let plain = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(|c: char| matches!(c, '/' | '\\' | '\0'));
    if !plain {
        return Err(VmaError::format(0, format!("refusing unsafe output name {name:?}")));
    }
    Ok(dest.join(name))
}

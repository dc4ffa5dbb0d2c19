//! High-level extraction API — the primary embedding surface.
//!
//! ```no_run
//! use vmax::extract::{ExtractOptions, Extractor};
//!
//! let mut ex = Extractor::open("vzdump-qemu-100.vma", ExtractOptions::default())?;
//! let stats = ex.extract_to("restore/", None)?;
//! println!("{} clusters written", stats.clusters);
//! # Ok::<(), vmax::VmaError>(())
//! ```

use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};

use crate::cluster::{read_cluster, skip_cluster, ClusterWrite};
use crate::cursor::ArchiveCursor;
use crate::error::{Result, VmaError};
use crate::extent::ExtentHeader;
use crate::header::VmaHeader;
use crate::writeback::devices::output_path;
use crate::writeback::{dispatch, DeviceSet, DispatchConfig, DEFAULT_MAX_IN_FLIGHT};

/// Archive read buffer.  Extent records and payloads are consumed strictly
/// sequentially, so a large buffer turns them into few big reads.
const READ_BUFFER_SIZE: usize = 1 << 20;

/// Progress callback: `(bytes_consumed, archive_len)`.
pub type ProgressFn<'a> = dyn FnMut(u64, u64) + 'a;

// ── ExtractOptions ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Check the header and extent MD5 checksums.
    pub verify_checksums: bool,
    /// Allow extraction into an existing destination directory.
    pub overwrite:        bool,
    /// Writer threads; `None` uses the available parallelism.
    pub workers:          Option<usize>,
    /// Clusters queued for writing before the reader waits.
    pub max_in_flight:    usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            verify_checksums: true,
            overwrite:        false,
            workers:          None,
            max_in_flight:    DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

impl ExtractOptions {
    fn dispatch_config(&self) -> DispatchConfig {
        let mut config = DispatchConfig { max_in_flight: self.max_in_flight, ..Default::default() };
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        config
    }
}

// ── ExtractStats ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractStats {
    pub extents:       u64,
    /// Clusters decoded, zero clusters included.
    pub clusters:      u64,
    pub zero_clusters: u64,
    /// Archive bytes consumed, header included.
    pub bytes_read:    u64,
}

// ── Extractor ─────────────────────────────────────────────────────────────────

pub struct Extractor<R: Read + Seek> {
    cursor:      ArchiveCursor<R>,
    header:      VmaHeader,
    archive_len: u64,
    opts:        ExtractOptions,
}

impl Extractor<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P, opts: ExtractOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| VmaError::output(path, e))?;
        Self::new(BufReader::with_capacity(READ_BUFFER_SIZE, file), opts)
    }
}

impl<R: Read + Seek> Extractor<R> {
    /// Parse (and, unless disabled, verify) the archive header.
    pub fn new(reader: R, opts: ExtractOptions) -> Result<Self> {
        let mut cursor = ArchiveCursor::new(reader)?;
        let archive_len = cursor.stream_len()?;
        let header = VmaHeader::read(&mut cursor, opts.verify_checksums)?;
        tracing::debug!(
            uuid = %header.uuid,
            header_size = header.header_size,
            blobs = header.blobs.len(),
            "parsed archive header"
        );
        Ok(Self { cursor, header, archive_len, opts })
    }

    pub fn header(&self) -> &VmaHeader {
        &self.header
    }

    pub fn archive_len(&self) -> u64 {
        self.archive_len
    }

    /// Write every config blob to `<dest>/<name>`.
    pub fn extract_configs(&self, dest: &Path) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for slot in self.header.config_slots() {
            let name = self.header.config_name(slot)?;
            let data = self.header.config_bytes(slot)?;
            let path = output_path(dest, &name)?;
            fs::write(&path, data).map_err(|e| VmaError::output(&path, e))?;
            tracing::info!(%name, bytes = data.len(), "extracted config");
            written.push(path);
        }
        Ok(written)
    }

    /// Reconstruct every device image and config file under `dest`.
    ///
    /// On error, images written so far stay on disk; all queued writes are
    /// finished before the error is returned.
    pub fn extract_to<P: AsRef<Path>>(
        &mut self,
        dest:     P,
        progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<ExtractStats> {
        let dest = dest.as_ref();
        prepare_destination(dest, self.opts.overwrite)?;

        let devices = DeviceSet::create(&self.header, dest)?;
        if let Err(err) = self.extract_configs(dest) {
            if let Err(close_err) = devices.close() {
                tracing::error!(error = %close_err, "closing device images failed");
            }
            return Err(err);
        }

        let config = self.opts.dispatch_config();
        let verify = self.opts.verify_checksums;
        let stats = self.decode_extents(verify, progress, |cursor, extent, submit| {
            let mut zero = 0;
            let mut total = 0;
            for info in extent.used_blocks() {
                let cluster = read_cluster(cursor, info)?;
                total += 1;
                if cluster.is_zero() {
                    zero += 1;
                }
                submit(ClusterWrite {
                    device_id: info.device_id,
                    offset:    info.device_offset(),
                    cluster,
                })?;
            }
            Ok((total, zero))
        }, Some((&devices, &config)));

        // Close the images whether or not decoding succeeded.
        let closed = devices.close();
        let stats = stats?;
        closed?;
        tracing::info!(
            extents = stats.extents,
            clusters = stats.clusters,
            zero_clusters = stats.zero_clusters,
            "extraction complete"
        );
        Ok(stats)
    }

    /// Walk every extent, checking identity and checksums and consuming
    /// payloads, without writing anything.
    ///
    /// Extent checksums are always verified here, whatever
    /// `verify_checksums` was set to when the archive was opened.
    pub fn verify(&mut self, progress: Option<&mut ProgressFn<'_>>) -> Result<ExtractStats> {
        self.decode_extents(true, progress, |cursor, extent, _| {
            let mut zero = 0;
            let mut total = 0;
            for info in extent.used_blocks() {
                skip_cluster(cursor, info)?;
                total += 1;
                if info.mask == 0 {
                    zero += 1;
                }
            }
            Ok((total, zero))
        }, None)
    }

    /// Shared extent loop.  Each extent's entries are checked against the
    /// device table before `per_extent` consumes its payloads and reports
    /// `(clusters, zero_clusters)`.
    fn decode_extents<F>(
        &mut self,
        verify:       bool,
        mut progress: Option<&mut ProgressFn<'_>>,
        mut per_extent: F,
        sink: Option<(&DeviceSet, &DispatchConfig)>,
    ) -> Result<ExtractStats>
    where
        F: FnMut(
            &mut ArchiveCursor<R>,
            &ExtentHeader,
            &mut dyn FnMut(ClusterWrite) -> Result<()>,
        ) -> Result<(u64, u64)>,
    {
        let total  = self.archive_len;
        let uuid   = self.header.uuid;
        let header = &self.header;
        let cursor = &mut self.cursor;
        cursor.seek_to(header.header_size as u64)?;

        let mut run = |submit: &mut dyn FnMut(ClusterWrite) -> Result<()>| -> Result<ExtractStats> {
            let mut stats = ExtractStats::default();
            while cursor.position() < total {
                let extent = ExtentHeader::read(cursor, &uuid, verify)?;
                tracing::debug!(offset = extent.offset, blocks = extent.block_count, "extent");
                check_targets(header, &extent)?;
                let (clusters, zero) = per_extent(&mut *cursor, &extent, &mut *submit)?;
                stats.extents       += 1;
                stats.clusters      += clusters;
                stats.zero_clusters += zero;
                if let Some(report) = progress.as_deref_mut() {
                    report(cursor.position(), total);
                }
            }
            stats.bytes_read = cursor.position();
            Ok(stats)
        };

        match sink {
            Some((devices, config)) => dispatch(devices, config, |submitter| {
                run(&mut |job: ClusterWrite| submitter.submit(job))
            }),
            None => run(&mut |_: ClusterWrite| Ok(())),
        }
    }
}

/// Every used entry must name a present device and land inside it.
fn check_targets(header: &VmaHeader, extent: &ExtentHeader) -> Result<()> {
    for info in extent.used_blocks() {
        let dev = header.device(info.device_id).ok_or(VmaError::UnknownDevice {
            offset:    extent.offset,
            device_id: info.device_id,
        })?;
        if info.device_offset() >= dev.size {
            return Err(VmaError::ClusterOutOfRange {
                offset:      extent.offset,
                device_id:   info.device_id,
                cluster:     info.cluster,
                device_size: dev.size,
            });
        }
    }
    Ok(())
}

/// Create `dest`, refusing an existing one unless `overwrite` is set.
pub fn prepare_destination(dest: &Path, overwrite: bool) -> Result<()> {
    if dest.exists() && !overwrite {
        return Err(VmaError::DestinationExists(dest.to_owned()));
    }
    fs::create_dir_all(dest).map_err(|e| VmaError::output(dest, e))
}

/// Open `archive` and extract it into `dest`.
pub fn extract<P: AsRef<Path>, Q: AsRef<Path>>(
    archive: P,
    dest:    Q,
    opts:    ExtractOptions,
) -> Result<ExtractStats> {
    Extractor::open(archive, opts)?.extract_to(dest, None)
}

//! Destination-to-source coordinate memoization with disk persistence.
//!
//! Building a remap table costs one trigonometric evaluation per pixel and
//! the result only depends on the correction configuration, so the table is
//! persisted under a file named from the configuration hash and replayed on
//! later runs. The file holds whitespace-separated signed integers, four
//! per entry: `dstRow dstCol srcRow srcCol ...`. Persistence is strictly
//! best-effort: a missing or unreadable file is a normal cache miss and a
//! failed write only costs future runs their speedup.

use image::RgbImage;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Coordinate pair in `(row, col)` order.
pub type PixelPos = (i32, i32);

/// Associative map from destination pixel to source pixel.
///
/// The `populated` flag distinguishes a table that was never built from one
/// that was built and legitimately ended up empty; only a populated,
/// non-empty table is usable for replay.
#[derive(Debug, Default)]
pub struct RemapTable {
    entries: HashMap<PixelPos, PixelPos>,
    populated: bool,
}

impl RemapTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets to empty and unpopulated.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.populated = false;
    }

    pub fn is_usable(&self) -> bool {
        self.populated && !self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Source position recorded for a destination position, if any.
    ///
    /// An absent key means the destination pixel was never mapped; callers
    /// must not substitute a default coordinate for it.
    pub fn get(&self, dst: PixelPos) -> Option<PixelPos> {
        self.entries.get(&dst).copied()
    }

    /// Inserts or overwrites an entry and marks the table populated.
    pub fn record(&mut self, src: PixelPos, dst: PixelPos) {
        self.populated = true;
        self.entries.insert(dst, src);
    }

    /// Replays the table, copying one 3-channel pixel per entry.
    ///
    /// Returns false without touching the destination when the table is
    /// not usable. Destination pixels with no entry are left as the caller
    /// initialized them. Entries that fall outside either raster (possible
    /// when a persisted file from a colliding hash is replayed against
    /// differently sized buffers) are skipped.
    pub fn apply(&self, src: &RgbImage, dst: &mut RgbImage) -> bool {
        if !self.is_usable() {
            return false;
        }
        let (src_w, src_h) = src.dimensions();
        let (dst_w, dst_h) = dst.dimensions();
        let mut skipped = 0usize;
        for (&(di, dj), &(si, sj)) in &self.entries {
            if di < 0
                || dj < 0
                || si < 0
                || sj < 0
                || dj as u32 >= dst_w
                || di as u32 >= dst_h
                || sj as u32 >= src_w
                || si as u32 >= src_h
            {
                skipped += 1;
                continue;
            }
            dst.put_pixel(dj as u32, di as u32, *src.get_pixel(sj as u32, si as u32));
        }
        if skipped > 0 {
            warn!("remap replay skipped {} out-of-bounds entries", skipped);
        }
        debug!("replayed {} remap entries", self.entries.len());
        true
    }

    /// File that persists the table for a configuration hash.
    pub fn cache_path(dir: &Path, config_hash: u32) -> PathBuf {
        dir.join(format!("REMAP{:x}.dat", config_hash))
    }

    /// Loads the persisted table for `config_hash` from `dir`.
    ///
    /// A no-op returning true when the table is already usable. A missing
    /// or unreadable file is a normal miss: false is returned and the table
    /// stays empty. Parsing stops at end-of-file or the first bad token; a
    /// trailing partial entry is dropped.
    pub fn load(&mut self, dir: &Path, config_hash: u32) -> bool {
        if self.is_usable() {
            return true;
        }
        let path = Self::cache_path(dir, config_hash);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) => {
                debug!("no remap cache at {}: {}", path.display(), err);
                return false;
            }
        };
        self.entries.clear();
        let mut tokens = text.split_ascii_whitespace();
        loop {
            let mut quad = [0i32; 4];
            let mut parsed = 0;
            for slot in &mut quad {
                match tokens.next().map(str::parse::<i32>) {
                    Some(Ok(value)) => {
                        *slot = value;
                        parsed += 1;
                    }
                    _ => break,
                }
            }
            if parsed < 4 {
                break;
            }
            self.entries.insert((quad[0], quad[1]), (quad[2], quad[3]));
        }
        self.populated = true;
        info!(
            "loaded {} remap entries from {}",
            self.entries.len(),
            path.display()
        );
        true
    }

    /// Writes every entry to the file for `config_hash`, truncating any
    /// previous content. Write failure is logged and otherwise ignored; the
    /// in-memory table stays valid.
    ///
    /// # Panics
    ///
    /// Persisting a table that is not usable is a programming error and
    /// panics.
    pub fn persist(&self, dir: &Path, config_hash: u32) {
        assert!(
            self.is_usable(),
            "persist called on an unusable remap table"
        );
        let path = Self::cache_path(dir, config_hash);
        match self.write_entries(&path) {
            Ok(()) => info!(
                "persisted {} remap entries to {}",
                self.entries.len(),
                path.display()
            ),
            Err(err) => warn!(
                "failed to persist remap cache to {}: {}",
                path.display(),
                err
            ),
        }
    }

    fn write_entries(&self, path: &Path) -> std::io::Result<()> {
        let file = fs::File::create(path)?;
        let mut out = std::io::BufWriter::new(file);
        for (&(di, dj), &(si, sj)) in &self.entries {
            write!(out, "{} {} {} {} ", di, dj, si, sj)?;
        }
        out.flush()
    }
}

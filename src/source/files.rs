//! File-sequence source
//!
//! Reads a directory of pre-encoded `<prefix>-<N>.h264` files, each holding
//! one frame's NAL units with 4-byte length prefixes. Files are sorted by
//! their numeric suffix and fully preloaded at open so the pacing tick
//! never touches the filesystem. The sequence loops forever.

use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::error::SourceError;
use crate::media::nal::split_length_prefixed;

/// Preloaded, looping file-sequence source
pub struct FileSequenceSource {
    dir: PathBuf,
    /// NAL bodies per file, in playback order
    frames: Vec<Vec<Bytes>>,
    cursor: usize,
}

impl FileSequenceSource {
    /// Enumerate, sort and preload every `*.h264` file under `dir`
    pub fn open(dir: &Path) -> Result<Self, SourceError> {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(SourceError::Read)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "h264"))
            .collect();

        if paths.is_empty() {
            return Err(SourceError::NoFiles(dir.to_path_buf()));
        }

        paths.sort_by_key(|p| file_number(p));

        let mut frames = Vec::with_capacity(paths.len());
        for path in &paths {
            let data = fs::read(path).map_err(SourceError::Read)?;
            frames.push(split_length_prefixed(&data));
        }

        tracing::info!(
            dir = %dir.display(),
            files = frames.len(),
            "Loaded H.264 file sequence"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            frames,
            cursor: 0,
        })
    }

    /// NAL bodies of the next file, looping back to the first at the end
    pub fn next_file(&mut self) -> Vec<Bytes> {
        if self.cursor >= self.frames.len() {
            self.cursor = 0;
            tracing::debug!(dir = %self.dir.display(), "Looping file sequence");
        }

        let frame = self.frames[self.cursor].clone();
        self.cursor += 1;
        frame
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_count(&self) -> usize {
        self.frames.len()
    }
}

/// Numeric suffix of `<prefix>-<N>.h264`; anything unparseable sorts as 0
fn file_number(path: &Path) -> u64 {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.rsplit('-').next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_frame(dir: &Path, name: &str, units: &[&[u8]]) {
        let mut data = Vec::new();
        for u in units {
            data.extend_from_slice(&(u.len() as u32).to_be_bytes());
            data.extend_from_slice(u);
        }
        let mut f = fs::File::create(dir.join(name)).unwrap();
        f.write_all(&data).unwrap();
    }

    #[test]
    fn test_numeric_suffix_ordering() {
        let dir = tempfile::tempdir().unwrap();
        // Lexicographic order would put sample-10 before sample-2.
        write_frame(dir.path(), "sample-10.h264", &[&[0x41, 0x0A]]);
        write_frame(dir.path(), "sample-2.h264", &[&[0x41, 0x02]]);
        write_frame(dir.path(), "sample-1.h264", &[&[0x41, 0x01]]);

        let mut src = FileSequenceSource::open(dir.path()).unwrap();
        assert_eq!(src.next_file()[0].as_ref(), &[0x41, 0x01]);
        assert_eq!(src.next_file()[0].as_ref(), &[0x41, 0x02]);
        assert_eq!(src.next_file()[0].as_ref(), &[0x41, 0x0A]);
    }

    #[test]
    fn test_missing_suffix_sorts_first() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), "nosuffix.h264", &[&[0x41, 0x00]]);
        write_frame(dir.path(), "sample-3.h264", &[&[0x41, 0x03]]);

        let mut src = FileSequenceSource::open(dir.path()).unwrap();
        assert_eq!(src.next_file()[0].as_ref(), &[0x41, 0x00]);
    }

    #[test]
    fn test_loops_at_end() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), "sample-0.h264", &[&[0x41, 0x00]]);
        write_frame(dir.path(), "sample-1.h264", &[&[0x41, 0x01]]);

        let mut src = FileSequenceSource::open(dir.path()).unwrap();
        src.next_file();
        src.next_file();
        // Back to the first file.
        assert_eq!(src.next_file()[0].as_ref(), &[0x41, 0x00]);
    }

    #[test]
    fn test_multiple_units_per_file() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(
            dir.path(),
            "sample-0.h264",
            &[&[0x67, 0x64], &[0x68, 0xEF], &[0x65, 0x88]],
        );

        let mut src = FileSequenceSource::open(dir.path()).unwrap();
        let units = src.next_file();
        assert_eq!(units.len(), 3);
        assert_eq!(units[0][0] & 0x1F, 7);
        assert_eq!(units[2][0] & 0x1F, 5);
    }

    #[test]
    fn test_empty_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            FileSequenceSource::open(dir.path()),
            Err(SourceError::NoFiles(_))
        ));
    }

    #[test]
    fn test_non_h264_files_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
        write_frame(dir.path(), "sample-0.h264", &[&[0x41, 0x00]]);

        let src = FileSequenceSource::open(dir.path()).unwrap();
        assert_eq!(src.file_count(), 1);
    }
}

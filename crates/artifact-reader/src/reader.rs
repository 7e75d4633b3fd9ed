//! Streaming unzip of CI artifact archives (design doc §4.2).
//!
//! Reads the archive sequentially (no central-directory seek, no
//! whole-archive buffering) and yields only entries matching the
//! JUnit-family name filter, enforcing per-entry and per-archive size caps
//! as bytes are counted.

use crate::error::{ArtifactReaderError, ArtifactResult};
use crate::filter::is_test_report_entry;
use std::io::Read;

#[derive(Debug, Clone, Copy)]
pub struct SizeCaps {
    pub per_entry_bytes: u64,
    pub per_archive_bytes: u64,
}

impl Default for SizeCaps {
    fn default() -> Self {
        Self {
            per_entry_bytes: 128 * 1024 * 1024,
            per_archive_bytes: 512 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactEntry {
    pub path: String,
    pub data: Vec<u8>,
}

/// Fails fast if the artifact is already known to be expired, per design
/// doc §4.2, before any bytes are read.
pub fn ensure_available(expired: bool) -> ArtifactResult<()> {
    if expired {
        Err(ArtifactReaderError::Expired)
    } else {
        Ok(())
    }
}

/// Returns an iterator over matching entries. The iterator stops (yielding
/// one final `Err`) as soon as either cap is exceeded; callers must treat
/// that as the whole archive failing, not a partial result.
pub fn read_entries<R: Read>(source: R, caps: SizeCaps) -> ArtifactEntryIter<R> {
    ArtifactEntryIter {
        source,
        caps,
        total_bytes: 0,
        done: false,
    }
}

pub struct ArtifactEntryIter<R: Read> {
    source: R,
    caps: SizeCaps,
    total_bytes: u64,
    done: bool,
}

impl<R: Read> Iterator for ArtifactEntryIter<R> {
    type Item = ArtifactResult<ArtifactEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match zip::read::read_zipfile_from_stream(&mut self.source) {
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(ArtifactReaderError::Malformed(e)));
                }
                Ok(Some(mut entry)) => {
                    let name = entry.name().to_string();
                    let is_dir = entry.is_dir();

                    let mut buf = Vec::new();
                    let cap = self.caps.per_entry_bytes;
                    let mut limited = (&mut entry).take(cap + 1);
                    if let Err(e) = limited.read_to_end(&mut buf) {
                        self.done = true;
                        return Some(Err(ArtifactReaderError::Io(e)));
                    }

                    if buf.len() as u64 > cap {
                        self.done = true;
                        return Some(Err(ArtifactReaderError::TooLarge(format!(
                            "entry {} exceeds per-entry cap of {} bytes",
                            name, cap
                        ))));
                    }

                    self.total_bytes += buf.len() as u64;
                    if self.total_bytes > self.caps.per_archive_bytes {
                        self.done = true;
                        return Some(Err(ArtifactReaderError::TooLarge(format!(
                            "archive exceeds per-archive cap of {} bytes",
                            self.caps.per_archive_bytes
                        ))));
                    }

                    if is_dir || !is_test_report_entry(&name) {
                        continue;
                    }

                    return Some(Ok(ArtifactEntry { path: name, data: buf }));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let cursor = Cursor::new(&mut buf);
            let mut writer = zip::ZipWriter::new(cursor);
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            for (name, data) in entries {
                writer.start_file(*name, options).unwrap();
                std::io::Write::write_all(&mut writer, data).unwrap();
            }
            writer.finish().unwrap();
        }
        buf
    }

    #[test]
    fn yields_only_matching_entries() {
        let zip_bytes = build_zip(&[
            ("TEST-FooTest.xml", b"<testsuite/>"),
            ("notes.txt", b"ignore me"),
            ("nested/dir/junit-report.xml", b"<testsuite/>"),
        ]);
        let entries: Vec<_> = read_entries(Cursor::new(zip_bytes), SizeCaps::default())
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.path == "TEST-FooTest.xml"));
        assert!(entries.iter().any(|e| e.path == "nested/dir/junit-report.xml"));
    }

    #[test]
    fn per_entry_cap_aborts_archive() {
        let zip_bytes = build_zip(&[("TEST-Big.xml", &[0u8; 1024])]);
        let caps = SizeCaps {
            per_entry_bytes: 100,
            per_archive_bytes: 1_000_000,
        };
        let result: Result<Vec<_>, _> = read_entries(Cursor::new(zip_bytes), caps).collect();
        assert!(matches!(result, Err(ArtifactReaderError::TooLarge(_))));
    }

    #[test]
    fn per_archive_cap_aborts_after_enough_entries() {
        let zip_bytes = build_zip(&[
            ("TEST-A.xml", &[0u8; 600]),
            ("TEST-B.xml", &[0u8; 600]),
        ]);
        let caps = SizeCaps {
            per_entry_bytes: 1000,
            per_archive_bytes: 1000,
        };
        let result: Result<Vec<_>, _> = read_entries(Cursor::new(zip_bytes), caps).collect();
        assert!(matches!(result, Err(ArtifactReaderError::TooLarge(_))));
    }

    #[test]
    fn expired_artifact_rejected_before_reading() {
        assert!(matches!(ensure_available(true), Err(ArtifactReaderError::Expired)));
        assert!(ensure_available(false).is_ok());
    }

    #[test]
    fn empty_archive_yields_nothing() {
        let zip_bytes = build_zip(&[]);
        let entries: Vec<_> = read_entries(Cursor::new(zip_bytes), SizeCaps::default())
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert!(entries.is_empty());
    }
}

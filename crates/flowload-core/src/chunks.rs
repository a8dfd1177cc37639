//! Chunk source
//!
//! Splits a CSV source file into bounded-size chunks at line boundaries so no
//! record straddles two chunks. Chunk and line totals are computed once at
//! open and cached for the session's lifetime; the chunk iterator itself is
//! lazy and can be restarted from the beginning for each upload attempt.

use crate::error::Result;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::ops::Range;
use std::path::{Path, PathBuf};

/// One bounded-size slice of the source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 1-based, contiguous chunk number
    pub number: u64,
    pub payload: Vec<u8>,
    /// Byte offsets of the payload within the source file
    pub byte_range: Range<u64>,
}

/// Lazily splittable view of a source file
#[derive(Debug, Clone)]
pub struct ChunkSource {
    path: PathBuf,
    chunk_size: usize,
    total_chunks: u64,
    total_lines: u64,
}

impl ChunkSource {
    /// Open a source file, scanning it once to cache chunk and line totals
    ///
    /// The header line is excluded from the row count.
    pub fn open(path: impl AsRef<Path>, chunk_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut total_chunks = 0;
        let mut total_lines = 0;
        let mut ends_with_newline = true;
        for chunk in ChunkIter::new(&path, chunk_size)? {
            let chunk = chunk?;
            total_chunks = chunk.number;
            total_lines += count_lines(&chunk.payload);
            ends_with_newline = chunk.payload.last() == Some(&b'\n');
        }
        // A final row without a trailing newline is still a row.
        if !ends_with_newline {
            total_lines += 1;
        }
        let total_lines = total_lines.saturating_sub(1);

        Ok(Self {
            path,
            chunk_size,
            total_chunks,
            total_lines,
        })
    }

    /// Number of chunks the file splits into
    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    /// Number of data rows (header excluded)
    pub fn total_lines(&self) -> u64 {
        self.total_lines
    }

    /// Lazy iterator over the file's chunks, starting from chunk 1
    pub fn chunks(&self) -> Result<ChunkIter> {
        ChunkIter::new(&self.path, self.chunk_size)
    }
}

fn count_lines(payload: &[u8]) -> u64 {
    payload.iter().filter(|b| **b == b'\n').count() as u64
}

/// Iterator yielding chunks split at line boundaries
pub struct ChunkIter {
    reader: BufReader<File>,
    chunk_size: usize,
    next_number: u64,
    offset: u64,
    done: bool,
}

impl ChunkIter {
    fn new(path: &Path, chunk_size: usize) -> Result<Self> {
        Ok(Self {
            reader: BufReader::new(File::open(path)?),
            chunk_size,
            next_number: 1,
            offset: 0,
            done: false,
        })
    }
}

impl Iterator for ChunkIter {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut payload = Vec::with_capacity(self.chunk_size);
        // Accumulate whole lines until the chunk size boundary is crossed.
        loop {
            match self.reader.read_until(b'\n', &mut payload) {
                Ok(0) => {
                    self.done = true;
                    break;
                },
                Ok(_) => {
                    if payload.len() >= self.chunk_size {
                        break;
                    }
                },
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                },
            }
        }

        if payload.is_empty() {
            return None;
        }

        let start = self.offset;
        self.offset += payload.len() as u64;
        let number = self.next_number;
        self.next_number += 1;

        Some(Ok(Chunk {
            number,
            payload,
            byte_range: start..self.offset,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    fn csv_file(rows: usize) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "case_id,activity,timestamp").unwrap();
        for i in 0..rows {
            writeln!(file, "case_{i},step_a,2026-01-01T00:00:{:02}", i % 60).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_counts_rows_excluding_header() {
        let file = csv_file(25);
        let source = ChunkSource::open(file.path(), 1024 * 1024).unwrap();

        assert_eq!(source.total_lines(), 25);
        assert_eq!(source.total_chunks(), 1);
    }

    #[test]
    fn test_counts_final_row_without_trailing_newline() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "case_id,activity,timestamp").unwrap();
        for i in 0..29 {
            writeln!(file, "case_{i},step_a,2026-01-01T00:00:00").unwrap();
        }
        // Last row deliberately unterminated.
        write!(file, "case_29,step_a,2026-01-01T00:00:00").unwrap();
        file.flush().unwrap();

        // Small chunk size so the unterminated row sits in the last of
        // several chunks.
        let source = ChunkSource::open(file.path(), 256).unwrap();
        assert!(source.total_chunks() > 1);
        assert_eq!(source.total_lines(), 30);
    }

    #[test]
    fn test_chunk_numbering_is_contiguous() {
        let file = csv_file(200);
        // Tiny chunk size to force many chunks.
        let source = ChunkSource::open(file.path(), 256).unwrap();
        assert!(source.total_chunks() > 1);

        let numbers: Vec<u64> = source
            .chunks()
            .unwrap()
            .map(|c| c.unwrap().number)
            .collect();
        let expected: Vec<u64> = (1..=source.total_chunks()).collect();
        assert_eq!(numbers, expected);
    }

    #[test]
    fn test_chunks_split_at_line_boundaries() {
        let file = csv_file(100);
        let source = ChunkSource::open(file.path(), 128).unwrap();

        for chunk in source.chunks().unwrap() {
            let chunk = chunk.unwrap();
            assert_eq!(*chunk.payload.last().unwrap(), b'\n');
            assert!(chunk.payload.len() >= 128 || chunk.number == source.total_chunks());
        }
    }

    #[test]
    fn test_chunks_reassemble_to_original() {
        let file = csv_file(50);
        let original = std::fs::read(file.path()).unwrap();
        let source = ChunkSource::open(file.path(), 200).unwrap();

        let mut reassembled = Vec::new();
        let mut expected_offset = 0;
        for chunk in source.chunks().unwrap() {
            let chunk = chunk.unwrap();
            assert_eq!(chunk.byte_range.start, expected_offset);
            expected_offset = chunk.byte_range.end;
            reassembled.extend_from_slice(&chunk.payload);
        }
        assert_eq!(reassembled, original);
    }

    #[test]
    fn test_empty_file_yields_zero_chunks() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let source = ChunkSource::open(file.path(), 1024).unwrap();

        assert_eq!(source.total_chunks(), 0);
        assert_eq!(source.total_lines(), 0);
        assert_eq!(source.chunks().unwrap().count(), 0);
    }

    #[test]
    fn test_iteration_is_restartable() {
        let file = csv_file(80);
        let source = ChunkSource::open(file.path(), 300).unwrap();

        let first: Vec<u64> = source.chunks().unwrap().map(|c| c.unwrap().number).collect();
        let second: Vec<u64> = source.chunks().unwrap().map(|c| c.unwrap().number).collect();
        assert_eq!(first, second);
    }
}

//src/fastq.rs

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::error::{Result, ShovillError};
use crate::types::ReadStats;

/// Open a FASTQ file, transparently decompressing `.gz`.
pub fn open_fastq<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead>> {
    let path = path.as_ref();
    let f = File::open(path)?;

    let is_gz = path
        .extension()
        .map(|ext| ext == "gz")
        .unwrap_or(false);

    let reader: Box<dyn BufRead> = if is_gz {
        Box::new(BufReader::new(MultiGzDecoder::new(f)))
    } else {
        Box::new(BufReader::new(f))
    };
    Ok(reader)
}

/// Stream a FASTQ file once and summarise read lengths.
///
/// Only the sequence line of each 4-line record is inspected, so memory use
/// is constant regardless of file size. The base total is doubled: R1 stands
/// in for the whole pair.
pub fn read_stats<P: AsRef<Path>>(path: P) -> Result<ReadStats> {
    let path = path.as_ref();
    let mut reader = open_fastq(path)?;

    let mut line = String::new();
    let mut num_reads: u64 = 0;
    let mut bases: u64 = 0;
    let mut min_len = usize::MAX;
    let mut max_len = 0usize;

    loop {
        // 1) header
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        if !line.starts_with('@') {
            // Blank trailing lines are tolerated, anything else is not FASTQ
            if line.trim().is_empty() {
                continue;
            }
            return Err(ShovillError::parse(format!(
                "{}: expected FASTQ header, found '{}'",
                path.display(),
                line.trim_end()
            )));
        }

        // 2) sequence
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(ShovillError::parse(format!(
                "{}: truncated FASTQ record",
                path.display()
            )));
        }
        let len = line.trim_end().len();

        // 3) plus line, 4) qualities
        for _ in 0..2 {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Err(ShovillError::parse(format!(
                    "{}: truncated FASTQ record",
                    path.display()
                )));
            }
        }

        num_reads += 1;
        bases += len as u64;
        min_len = min_len.min(len);
        max_len = max_len.max(len);
    }

    if num_reads == 0 {
        return Err(ShovillError::parse(format!(
            "{}: no reads found",
            path.display()
        )));
    }

    Ok(ReadStats {
        min_len,
        max_len,
        avg_len: (bases / num_reads) as usize,
        total_bp: bases * 2,
    })
}

//! Utility functions for working with files.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use flate2::read::MultiGzDecoder;

//-----------------------------------------------------------------------------

const SIZE_UNITS: [(f64, &str); 6] = [
    (1.0, "B"),
    (1024.0, "KiB"),
    (1024.0 * 1024.0, "MiB"),
    (1024.0 * 1024.0 * 1024.0, "GiB"),
    (1024.0 * 1024.0 * 1024.0 * 1024.0, "TiB"),
    (1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0, "PiB"),
];

/// Returns a human-readable representation of the given number of bytes.
pub fn human_readable_size(bytes: usize) -> String {
    let mut unit = 0;
    let value = bytes as f64;
    while unit + 1 < SIZE_UNITS.len() && value >= SIZE_UNITS[unit + 1].0 {
        unit += 1;
    }
    format!("{:.3} {}", value / SIZE_UNITS[unit].0, SIZE_UNITS[unit].1)
}

/// Returns a human-readable size of the file.
pub fn file_size<P: AsRef<Path>>(filename: P) -> Option<String> {
    let metadata = fs::metadata(filename).ok()?;
    Some(human_readable_size(metadata.len() as usize))
}

/// Returns `true` if the file exists.
pub fn file_exists<P: AsRef<Path>>(filename: P) -> bool {
    fs::metadata(filename).is_ok()
}

/// Returns the modification time of the file.
pub fn modified_time<P: AsRef<Path>>(filename: P) -> io::Result<SystemTime> {
    fs::metadata(filename)?.modified()
}

/// Returns `true` if the index file exists and is at least as recent as the data file.
///
/// If modification times are not available on the platform, an existing index is assumed to be current.
pub fn index_is_current<P: AsRef<Path>, Q: AsRef<Path>>(data_file: P, index_file: Q) -> bool {
    if !file_exists(&index_file) {
        return false;
    }
    match (modified_time(&data_file), modified_time(&index_file)) {
        (Ok(data_time), Ok(index_time)) => index_time >= data_time,
        _ => true,
    }
}

/// Returns the path with an extra extension appended, e.g. `data.bed.gz` to `data.bed.gz.tbi`.
pub fn append_extension<P: AsRef<Path>>(filename: P, extension: &str) -> PathBuf {
    let mut name = filename.as_ref().as_os_str().to_os_string();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

// Checks the buffered start of the reader without consuming it.
fn starts_with_gzip_magic<R: BufRead>(reader: &mut R) -> io::Result<bool> {
    Ok(reader.fill_buf()?.starts_with(&GZIP_MAGIC))
}

/// Returns `true` if the file appears to be gzip-compressed.
///
/// This includes BGZF files, which are valid multi-member gzip files.
pub fn is_gzipped<P: AsRef<Path>>(filename: P) -> bool {
    File::open(filename)
        .map(BufReader::new)
        .and_then(|mut reader| starts_with_gzip_magic(&mut reader))
        .unwrap_or(false)
}

/// Returns a buffered reader for the file, decompressing it if it starts with the gzip magic number.
pub fn open_file<P: AsRef<Path>>(filename: P) -> io::Result<Box<dyn BufRead>> {
    let mut reader = BufReader::new(File::open(filename)?);
    if starts_with_gzip_magic(&mut reader)? {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}

/// Removes a trailing newline and carriage return from the line buffer.
pub fn trim_line_end(buf: &mut Vec<u8>) {
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
}

//-----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::{Read, Write};

    #[test]
    fn sizes() {
        assert_eq!(human_readable_size(0), "0.000 B");
        assert_eq!(human_readable_size(1536), "1.500 KiB");
        assert_eq!(human_readable_size(3 * 1024 * 1024), "3.000 MiB");
    }

    #[test]
    fn extensions() {
        assert_eq!(append_extension("a/data.bed.gz", "tbi"), PathBuf::from("a/data.bed.gz.tbi"));
    }

    #[test]
    fn plain_and_gzipped() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain.txt");
        let gzipped = dir.path().join("plain.txt.gz");
        fs::write(&plain, b"first\nsecond\n").unwrap();
        let mut encoder = GzEncoder::new(File::create(&gzipped).unwrap(), Compression::default());
        encoder.write_all(b"first\nsecond\n").unwrap();
        encoder.finish().unwrap();

        assert!(!is_gzipped(&plain));
        assert!(is_gzipped(&gzipped));
        assert!(!is_gzipped(dir.path().join("missing")));
        assert!(open_file(dir.path().join("missing")).is_err());

        // Files shorter than the magic number are plain text.
        let short = dir.path().join("short.txt");
        fs::write(&short, b"\x1F").unwrap();
        assert!(!is_gzipped(&short));
        let empty = dir.path().join("empty.txt");
        fs::write(&empty, b"").unwrap();
        let mut content = String::new();
        open_file(&empty).unwrap().read_to_string(&mut content).unwrap();
        assert!(content.is_empty());
        for filename in [&plain, &gzipped] {
            let mut reader = open_file(filename).unwrap();
            let mut content = String::new();
            reader.read_to_string(&mut content).unwrap();
            assert_eq!(content, "first\nsecond\n", "Wrong content in {}", filename.display());
        }
    }

    #[test]
    fn index_currency() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        let index = dir.path().join("data.idx");
        fs::write(&data, b"x").unwrap();
        assert!(!index_is_current(&data, &index), "Missing index reported as current");
        fs::write(&index, b"y").unwrap();
        assert!(index_is_current(&data, &index), "Fresh index reported as stale");
    }

    #[test]
    fn line_ends() {
        let mut buf = b"abc\r\n".to_vec();
        trim_line_end(&mut buf);
        assert_eq!(buf, b"abc");
        let mut buf = b"abc".to_vec();
        trim_line_end(&mut buf);
        assert_eq!(buf, b"abc");
    }
}

//-----------------------------------------------------------------------------

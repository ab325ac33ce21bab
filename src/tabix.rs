//! Tabix indexes for sorted, BGZF-compressed, tab-delimited files.
//!
//! A tabix index (`.tbi`) maps genomic intervals to the [`Chunk`]s of the compressed file that may contain overlapping records.
//! It combines two structures for each sequence:
//!
//! * A hierarchical binning index with 37449 bins over a 512 Mbp sequence.
//!   Bin 0 covers the entire sequence and each bin has 8 children, down to 16 kbp bins at the lowest level.
//!   Each record is stored in the smallest bin containing it.
//! * A linear index with the smallest virtual offset of a record overlapping each 16 kbp window.
//!   Chunks ending before that offset cannot contain overlapping records.
//!
//! The index file itself is BGZF-compressed.
//! Its layout:
//!
//! ```text
//! magic "TBI\1", n_ref, format, col_seq, col_beg, col_end, meta, skip, l_nm, names
//! for each sequence:
//!   n_bin, then (bin: u32, n_chunk, n_chunk * (start: u64, end: u64)) for each bin
//!   n_intv, then n_intv * offset: u64
//! optional n_no_coor: u64
//! ```
//!
//! Column numbers in the header are 1-based.
//! Internally all intervals are 0-based and half-open.

use crate::bgzf::{self, BgzfWriter, Chunk, VirtualOffset};
use crate::utils;

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{self, BufRead, BufWriter, Read, Write};
use std::ops::Range;
use std::path::Path;

use flate2::read::MultiGzDecoder;
use log::{debug, info};

#[cfg(test)]
mod tests;

//-----------------------------------------------------------------------------

/// Record layout of a supported file format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    /// Tab-delimited file with start and optionally end columns.
    Generic,
    /// SAM: the end is determined by the CIGAR string in column 6.
    Sam,
    /// VCF: the end is determined by the `END` INFO field or the length of the reference allele.
    Vcf,
}

impl Format {
    fn code(&self) -> i32 {
        match self {
            Format::Generic => 0,
            Format::Sam => 1,
            Format::Vcf => 2,
        }
    }

    fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Format::Generic),
            1 => Some(Format::Sam),
            2 => Some(Format::Vcf),
            _ => None,
        }
    }
}

/// How to find the sequence name and the interval of a record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TabixConfig {
    pub format: Format,
    /// Start coordinates are 0-based (BED) rather than 1-based.
    pub zero_based: bool,
    /// 1-based column of the sequence name.
    pub col_seq: usize,
    /// 1-based column of the start coordinate.
    pub col_beg: usize,
    /// 1-based column of the end coordinate, or 0 if there is none.
    pub col_end: usize,
    /// Lines starting with this character are header lines.
    pub meta_char: u8,
    /// Number of header lines at the start of the file.
    pub skip: usize,
}

impl TabixConfig {
    // Flag for 0-based coordinates in the format field.
    const ZERO_BASED_FLAG: i32 = 0x10000;

    pub fn bed() -> Self {
        TabixConfig { format: Format::Generic, zero_based: true, col_seq: 1, col_beg: 2, col_end: 3, meta_char: b'#', skip: 0 }
    }

    pub fn gff() -> Self {
        TabixConfig { format: Format::Generic, zero_based: false, col_seq: 1, col_beg: 4, col_end: 5, meta_char: b'#', skip: 0 }
    }

    pub fn vcf() -> Self {
        TabixConfig { format: Format::Vcf, zero_based: false, col_seq: 1, col_beg: 2, col_end: 0, meta_char: b'#', skip: 0 }
    }

    pub fn sam() -> Self {
        TabixConfig { format: Format::Sam, zero_based: false, col_seq: 3, col_beg: 4, col_end: 0, meta_char: b'@', skip: 0 }
    }

    /// Generic 1-based format with the given columns.
    pub fn generic(col_seq: usize, col_beg: usize, col_end: usize) -> Self {
        TabixConfig { format: Format::Generic, zero_based: false, col_seq, col_beg, col_end, meta_char: b'#', skip: 0 }
    }

    /// Returns the configuration for a preset name (`bed`, `gff`, `vcf`, `sam`).
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "bed" => Some(Self::bed()),
            "gff" | "gtf" => Some(Self::gff()),
            "vcf" => Some(Self::vcf()),
            "sam" => Some(Self::sam()),
            _ => None,
        }
    }

    /// Returns `true` if the line is a header line, given its 0-based line number.
    pub fn is_header(&self, line: &[u8], line_num: usize) -> bool {
        line_num < self.skip || line.first() == Some(&self.meta_char)
    }

    /// Parses the sequence name and the 0-based half-open interval of a record.
    ///
    /// Zero-length intervals are extended to length 1.
    pub fn parse_record<'a>(&self, line: &'a [u8]) -> Result<(&'a str, Range<u64>), String> {
        let fields: Vec<&[u8]> = line.split(|&c| c == b'\t').collect();
        let field = |col: usize| -> Result<&'a str, String> {
            let bytes: &'a [u8] = *fields.get(col.wrapping_sub(1)).ok_or(format!("Missing column {}", col))?;
            std::str::from_utf8(bytes).map_err(|x| format!("Column {}: {}", col, x))
        };
        let number = |col: usize| -> Result<u64, String> {
            let value = field(col)?;
            value.trim().parse::<u64>().map_err(|x| format!("Column {}: invalid coordinate {}: {}", col, value, x))
        };

        let seq = field(self.col_seq)?;
        let mut start = number(self.col_beg)?;
        if !self.zero_based {
            if start == 0 {
                return Err(format!("Column {}: 1-based coordinate 0", self.col_beg));
            }
            start -= 1;
        }

        let end = match self.format {
            Format::Generic => {
                if self.col_end > 0 { number(self.col_end)? } else { start + 1 }
            },
            Format::Vcf => {
                let info_end = field(8).ok().and_then(|info| {
                    info.split(';').find_map(|x| x.strip_prefix("END=")).and_then(|x| x.parse::<u64>().ok())
                });
                match info_end {
                    Some(end) => end,
                    None => start + field(4)?.len() as u64,
                }
            },
            Format::Sam => start + cigar_reference_length(field(6)?)?,
        };

        Ok((seq, start..end.max(start + 1)))
    }

    fn format_code(&self) -> i32 {
        let flag = if self.zero_based { Self::ZERO_BASED_FLAG } else { 0 };
        self.format.code() | flag
    }
}

// Returns the number of reference bases covered by a CIGAR string.
fn cigar_reference_length(cigar: &str) -> Result<u64, String> {
    if cigar == "*" {
        return Ok(1);
    }
    let mut total = 0;
    let mut value: u64 = 0;
    for c in cigar.bytes() {
        match c {
            b'0'..=b'9' => value = value * 10 + (c - b'0') as u64,
            b'M' | b'D' | b'N' | b'=' | b'X' => { total += value; value = 0; },
            b'I' | b'S' | b'H' | b'P' => value = 0,
            _ => return Err(format!("Invalid CIGAR string {}", cigar)),
        }
    }
    Ok(total)
}

//-----------------------------------------------------------------------------

// Binning scheme.

/// Width of a linear index window as a power of 2.
pub const LINEAR_SHIFT: u32 = 14;

/// Pseudo-bin storing per-sequence statistics.
pub const META_BIN: u32 = 37450;

/// Returns the smallest bin containing the 0-based half-open interval.
pub fn reg2bin(start: u64, end: u64) -> u32 {
    let end = end.max(start + 1) - 1;
    let (start, end) = (start as i64, end as i64);
    if start >> 14 == end >> 14 { return (((1 << 15) - 1) / 7 + (start >> 14)) as u32; }
    if start >> 17 == end >> 17 { return (((1 << 12) - 1) / 7 + (start >> 17)) as u32; }
    if start >> 20 == end >> 20 { return (((1 << 9) - 1) / 7 + (start >> 20)) as u32; }
    if start >> 23 == end >> 23 { return (((1 << 6) - 1) / 7 + (start >> 23)) as u32; }
    if start >> 26 == end >> 26 { return (((1 << 3) - 1) / 7 + (start >> 26)) as u32; }
    0
}

/// Returns all bins that may contain records overlapping the 0-based half-open interval.
pub fn reg2bins(start: u64, end: u64) -> Vec<u32> {
    let max = 1u64 << 29;
    let start = start.min(max - 1);
    let end = end.clamp(start + 1, max) - 1;
    let mut bins = vec![0];
    for (offset, shift) in [(1u64, 26u32), (9, 23), (73, 20), (585, 17), (4681, 14)] {
        for bin in (offset + (start >> shift))..=(offset + (end >> shift)) {
            bins.push(bin as u32);
        }
    }
    bins
}

//-----------------------------------------------------------------------------

/// Index for a single sequence.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReferenceIndex {
    /// Chunks for each bin.
    pub bins: BTreeMap<u32, Vec<Chunk>>,
    /// Smallest virtual offset of a record overlapping each 16 kbp window.
    pub intervals: Vec<VirtualOffset>,
    /// Number of records, if the statistics pseudo-bin was present.
    pub records: Option<u64>,
}

impl ReferenceIndex {
    /// Returns the smallest virtual offset a record overlapping a position may start at.
    pub fn min_offset(&self, start: u64) -> VirtualOffset {
        if self.intervals.is_empty() {
            return VirtualOffset::default();
        }
        let window = ((start >> LINEAR_SHIFT) as usize).min(self.intervals.len() - 1);
        self.intervals[window]
    }
}

/// A tabix index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TabixIndex {
    config: TabixConfig,
    names: Vec<String>,
    ids: HashMap<String, usize>,
    references: Vec<ReferenceIndex>,
    unplaced: Option<u64>,
}

impl TabixIndex {
    const MAGIC: &'static [u8; 4] = b"TBI\x01";

    /// Returns the record layout.
    pub fn config(&self) -> &TabixConfig {
        &self.config
    }

    /// Returns the sequence names in file order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Returns the identifier of the named sequence.
    pub fn id(&self, name: &str) -> Option<usize> {
        self.ids.get(name).copied()
    }

    /// Returns the index for the sequence with the given identifier.
    pub fn reference(&self, id: usize) -> Option<&ReferenceIndex> {
        self.references.get(id)
    }

    /// Returns the number of records without coordinates, if stored.
    pub fn unplaced(&self) -> Option<u64> {
        self.unplaced
    }

    /// Returns the chunks that may contain records overlapping the 0-based half-open interval.
    ///
    /// Returns [`None`] if the sequence is not in the index.
    /// The chunks are sorted and non-overlapping.
    pub fn query(&self, name: &str, interval: Range<u64>) -> Option<Vec<Chunk>> {
        let reference = self.reference(self.id(name)?)?;
        let min_offset = reference.min_offset(interval.start);

        let mut chunks: Vec<Chunk> = Vec::new();
        for bin in reg2bins(interval.start, interval.end) {
            if let Some(bin_chunks) = reference.bins.get(&bin) {
                chunks.extend(bin_chunks.iter().filter(|chunk| chunk.end > min_offset));
            }
        }
        let chunks = bgzf::merge_chunks(chunks);
        debug!("{}:{}-{}: {} chunks", name, interval.start, interval.end, chunks.len());
        Some(chunks)
    }
}

//-----------------------------------------------------------------------------

// Binary I/O.

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

fn read_i32<R: Read>(reader: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_count<R: Read>(reader: &mut R, what: &str) -> io::Result<usize> {
    let value = read_i32(reader)?;
    if value < 0 {
        return Err(invalid_data(format!("Invalid {} count: {}", what, value)));
    }
    Ok(value as usize)
}

fn write_i32<W: Write>(writer: &mut W, value: usize) -> io::Result<()> {
    let value = i32::try_from(value).map_err(|_| invalid_data(format!("Value {} does not fit in i32", value)))?;
    writer.write_all(&value.to_le_bytes())
}

impl TabixIndex {
    /// Loads the index from a BGZF-compressed file.
    pub fn load<P: AsRef<Path>>(filename: P) -> io::Result<Self> {
        let file = File::open(filename)?;
        let mut decoder = MultiGzDecoder::new(io::BufReader::new(file));
        let mut data = Vec::new();
        decoder.read_to_end(&mut data)?;
        Self::read(&mut &data[..])
    }

    /// Reads an uncompressed index.
    pub fn read<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != Self::MAGIC {
            return Err(invalid_data(format!("Invalid tabix magic: {:?}", magic)));
        }

        let n_ref = read_count(reader, "sequence")?;
        let format_code = read_i32(reader)?;
        let format = Format::from_code(format_code & 0xFFFF).ok_or(
            invalid_data(format!("Unsupported tabix format: {}", format_code))
        )?;
        let col_seq = read_count(reader, "column")?;
        let col_beg = read_count(reader, "column")?;
        let col_end = read_count(reader, "column")?;
        let meta = read_i32(reader)?;
        let skip = read_count(reader, "skip")?;
        let config = TabixConfig {
            format,
            zero_based: format_code & TabixConfig::ZERO_BASED_FLAG != 0,
            col_seq, col_beg, col_end,
            meta_char: meta as u8,
            skip,
        };

        let l_nm = read_count(reader, "name byte")?;
        let mut name_bytes = vec![0u8; l_nm];
        reader.read_exact(&mut name_bytes)?;
        let mut names = Vec::with_capacity(n_ref);
        for name in name_bytes.split(|&c| c == 0).take(n_ref) {
            let name = String::from_utf8(name.to_vec()).map_err(|x| invalid_data(x.to_string()))?;
            names.push(name);
        }
        if names.len() != n_ref {
            return Err(invalid_data(format!("Expected {} sequence names, found {}", n_ref, names.len())));
        }
        let ids: HashMap<String, usize> = names.iter().enumerate().map(|(id, name)| (name.clone(), id)).collect();

        let mut references = Vec::with_capacity(n_ref);
        for _ in 0..n_ref {
            let mut reference = ReferenceIndex::default();
            let n_bin = read_count(reader, "bin")?;
            for _ in 0..n_bin {
                let bin = read_u32(reader)?;
                let n_chunk = read_count(reader, "chunk")?;
                let mut chunks = Vec::with_capacity(n_chunk);
                for _ in 0..n_chunk {
                    let start = VirtualOffset::from_raw(read_u64(reader)?);
                    let end = VirtualOffset::from_raw(read_u64(reader)?);
                    chunks.push(Chunk::new(start, end));
                }
                if bin == META_BIN {
                    reference.records = chunks.get(1).map(|chunk| chunk.start.as_raw());
                } else {
                    reference.bins.insert(bin, chunks);
                }
            }
            let n_intv = read_count(reader, "interval")?;
            for _ in 0..n_intv {
                reference.intervals.push(VirtualOffset::from_raw(read_u64(reader)?));
            }
            references.push(reference);
        }

        let unplaced = match read_u64(reader) {
            Ok(value) => Some(value),
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => None,
            Err(err) => return Err(err),
        };

        Ok(TabixIndex { config, names, ids, references, unplaced })
    }

    /// Writes the index without compression.
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(Self::MAGIC)?;
        write_i32(writer, self.names.len())?;
        writer.write_all(&self.config.format_code().to_le_bytes())?;
        write_i32(writer, self.config.col_seq)?;
        write_i32(writer, self.config.col_beg)?;
        write_i32(writer, self.config.col_end)?;
        write_i32(writer, self.config.meta_char as usize)?;
        write_i32(writer, self.config.skip)?;
        let name_bytes: usize = self.names.iter().map(|name| name.len() + 1).sum();
        write_i32(writer, name_bytes)?;
        for name in self.names.iter() {
            writer.write_all(name.as_bytes())?;
            writer.write_all(&[0])?;
        }

        for reference in self.references.iter() {
            let has_meta = reference.records.is_some();
            write_i32(writer, reference.bins.len() + (has_meta as usize))?;
            for (bin, chunks) in reference.bins.iter() {
                writer.write_all(&bin.to_le_bytes())?;
                write_i32(writer, chunks.len())?;
                for chunk in chunks.iter() {
                    writer.write_all(&chunk.start.as_raw().to_le_bytes())?;
                    writer.write_all(&chunk.end.as_raw().to_le_bytes())?;
                }
            }
            if let Some(records) = reference.records {
                let first = reference.bins.values().flatten().map(|chunk| chunk.start).min().unwrap_or_default();
                let last = reference.bins.values().flatten().map(|chunk| chunk.end).max().unwrap_or_default();
                writer.write_all(&META_BIN.to_le_bytes())?;
                write_i32(writer, 2)?;
                writer.write_all(&first.as_raw().to_le_bytes())?;
                writer.write_all(&last.as_raw().to_le_bytes())?;
                writer.write_all(&records.to_le_bytes())?;
                writer.write_all(&0u64.to_le_bytes())?;
            }
            write_i32(writer, reference.intervals.len())?;
            for offset in reference.intervals.iter() {
                writer.write_all(&offset.as_raw().to_le_bytes())?;
            }
        }

        if let Some(unplaced) = self.unplaced {
            writer.write_all(&unplaced.to_le_bytes())?;
        }
        Ok(())
    }

    /// Writes the index to a BGZF-compressed file.
    pub fn save<P: AsRef<Path>>(&self, filename: P) -> io::Result<()> {
        let file = File::create(filename)?;
        let mut writer = BgzfWriter::new(BufWriter::new(file));
        self.write(&mut writer)?;
        writer.finish()?.flush()
    }
}

//-----------------------------------------------------------------------------

// Index construction.

/// Accumulates the index while records are written in sorted order.
#[derive(Clone, Debug)]
pub struct IndexBuilder {
    config: TabixConfig,
    names: Vec<String>,
    ids: HashMap<String, usize>,
    references: Vec<ReferenceIndex>,
    // Linear index for each sequence; `None` until a record overlaps the window.
    windows: Vec<Vec<Option<VirtualOffset>>>,
    // Start of the last record on the current sequence.
    last_start: u64,
}

impl IndexBuilder {
    pub fn new(config: TabixConfig) -> Self {
        IndexBuilder {
            config,
            names: Vec::new(),
            ids: HashMap::new(),
            references: Vec::new(),
            windows: Vec::new(),
            last_start: 0,
        }
    }

    /// Adds a record stored at `chunk` with the given 0-based half-open interval.
    ///
    /// Returns an error if the record is out of order.
    pub fn add(&mut self, name: &str, interval: Range<u64>, chunk: Chunk) -> Result<(), String> {
        let id = match self.ids.get(name) {
            Some(&id) => {
                if id + 1 != self.names.len() {
                    return Err(format!("Records for sequence {} are not contiguous", name));
                }
                if interval.start < self.last_start {
                    return Err(format!(
                        "Records are not sorted: {}:{} after {}:{}",
                        name, interval.start + 1, name, self.last_start + 1
                    ));
                }
                id
            },
            None => {
                let id = self.names.len();
                self.names.push(name.to_string());
                self.ids.insert(name.to_string(), id);
                self.references.push(ReferenceIndex { records: Some(0), ..ReferenceIndex::default() });
                self.windows.push(Vec::new());
                id
            },
        };
        self.last_start = interval.start;
        if interval.end > (1 << 29) {
            return Err(format!("Record {}:{}-{} is beyond the 512 Mbp limit", name, interval.start + 1, interval.end));
        }

        let reference = &mut self.references[id];
        reference.records = reference.records.map(|x| x + 1);

        let bin = reg2bin(interval.start, interval.end);
        let chunks = reference.bins.entry(bin).or_default();
        match chunks.last_mut() {
            Some(last) if last.end.compressed_offset() == chunk.start.compressed_offset() || last.end == chunk.start => {
                last.end = chunk.end;
            },
            _ => chunks.push(chunk),
        }

        let first_window = (interval.start >> LINEAR_SHIFT) as usize;
        let last_window = ((interval.end.max(interval.start + 1) - 1) >> LINEAR_SHIFT) as usize;
        let windows = &mut self.windows[id];
        if windows.len() <= last_window {
            windows.resize(last_window + 1, None);
        }
        // The first record overlapping a window has the smallest offset.
        for window in windows[first_window..=last_window].iter_mut() {
            window.get_or_insert(chunk.start);
        }
        Ok(())
    }

    /// Finishes the index.
    ///
    /// Empty windows inherit the offset of the preceding window, and leading empty windows start from offset 0.
    pub fn finish(mut self) -> TabixIndex {
        for (reference, windows) in self.references.iter_mut().zip(self.windows.iter()) {
            let mut offset = VirtualOffset::default();
            reference.intervals = windows.iter().map(|window| {
                if let Some(start) = window {
                    offset = *start;
                }
                offset
            }).collect();
        }
        TabixIndex {
            config: self.config,
            names: self.names,
            ids: self.ids,
            references: self.references,
            unplaced: Some(0),
        }
    }
}

/// Compresses a sorted tab-delimited file into BGZF and builds a tabix index for it.
///
/// The input may be plain text or gzip-compressed.
/// The index is written to `<output>.tbi`.
///
/// # Errors
///
/// Returns an error if the output file already exists or if the records are not sorted by sequence and start.
/// Passes through any I/O errors.
pub fn compress_and_index(input: &Path, output: &Path, config: &TabixConfig) -> Result<TabixIndex, String> {
    info!("Compressing {} into {}", input.display(), output.display());
    if utils::file_exists(output) {
        return Err(format!("Output file {} already exists", output.display()));
    }
    let mut reader = utils::open_file(input).map_err(|x| format!("{}: {}", input.display(), x))?;
    let file = File::create(output).map_err(|x| format!("{}: {}", output.display(), x))?;
    let mut writer = BgzfWriter::new(BufWriter::new(file));
    let mut builder = IndexBuilder::new(config.clone());

    let mut line_num = 0;
    let mut buf: Vec<u8> = Vec::new();
    loop {
        buf.clear();
        let len = reader.read_until(b'\n', &mut buf).map_err(|x| format!("Line {}: {}", line_num + 1, x))?;
        if len == 0 {
            break;
        }
        if buf.last() != Some(&b'\n') {
            buf.push(b'\n');
        }
        let start = writer.virtual_position();
        writer.write_all(&buf).map_err(|x| x.to_string())?;
        let end = writer.virtual_position();

        let mut line = buf.clone();
        utils::trim_line_end(&mut line);
        if config.is_header(&line, line_num) || line.is_empty() {
            line_num += 1;
            continue;
        }
        let (name, interval) = config.parse_record(&line).map_err(|x| format!("Line {}: {}", line_num + 1, x))?;
        builder.add(name, interval, Chunk::new(start, end)).map_err(|x| format!("Line {}: {}", line_num + 1, x))?;
        line_num += 1;
    }
    writer.finish().map_err(|x| x.to_string())?.flush().map_err(|x| x.to_string())?;

    let index = builder.finish();
    let index_file = utils::append_extension(output, "tbi");
    index.save(&index_file).map_err(|x| format!("{}: {}", index_file.display(), x))?;
    info!(
        "Indexed {} lines on {} sequences; compressed size {}",
        line_num, index.names().len(), utils::file_size(output).unwrap_or(String::from("unknown"))
    );
    Ok(index)
}

//-----------------------------------------------------------------------------

use super::*;

use std::fs;
use std::path::PathBuf;

//-----------------------------------------------------------------------------

fn write_input(dir: &Path, name: &str, content: &str) -> PathBuf {
    let filename = dir.join(name);
    fs::write(&filename, content).unwrap();
    filename
}

fn build(dir: &Path, content: &str, config: &TabixConfig) -> Result<TabixIndex, String> {
    let input = write_input(dir, "input.txt", content);
    let output = dir.join("input.txt.gz");
    compress_and_index(&input, &output, config)
}

//-----------------------------------------------------------------------------

#[test]
fn binning() {
    assert_eq!(reg2bin(0, 1), 4681);
    assert_eq!(reg2bin(0, 1 << 14), 4681);
    assert_eq!(reg2bin(0, (1 << 14) + 1), 585);
    assert_eq!(reg2bin(1 << 14, 1 << 15), 4682);
    assert_eq!(reg2bin(0, 1 << 29), 0);
    assert_eq!(reg2bin(100, 100), 4681, "Empty intervals should be treated as length 1");

    let bins = reg2bins(0, 1);
    assert_eq!(bins, vec![0, 1, 9, 73, 585, 4681]);
    let bins = reg2bins(0, 1 << 29);
    assert_eq!(bins.len(), 37449, "Whole sequence should touch every bin");

    // Every record bin must be visited by a query overlapping the record.
    for (start, end) in [(5, 10), (16383, 16385), (1_000_000, 3_000_000), (100_000_000, 100_000_001)] {
        let bin = reg2bin(start, end);
        assert!(reg2bins(end - 1, end).contains(&bin), "Bin {} missing for {}..{}", bin, start, end);
        assert!(reg2bins(start, start + 1).contains(&bin), "Bin {} missing for {}..{}", bin, start, end);
    }
}

#[test]
fn record_parsing() {
    let bed = TabixConfig::bed();
    assert_eq!(bed.parse_record(b"chr1\t100\t200\tname"), Ok(("chr1", 100..200)));
    assert_eq!(bed.parse_record(b"chr1\t100\t100"), Ok(("chr1", 100..101)));
    assert!(bed.parse_record(b"chr1\tx\t200").is_err());
    assert!(bed.parse_record(b"chr1").is_err());

    let gff = TabixConfig::gff();
    assert_eq!(gff.parse_record(b"chr2\tsrc\tgene\t11\t20\t.\t+\t.\tID=a"), Ok(("chr2", 10..20)));
    assert!(gff.parse_record(b"chr2\tsrc\tgene\t0\t20").is_err(), "Accepted a 1-based coordinate 0");

    let vcf = TabixConfig::vcf();
    assert_eq!(vcf.parse_record(b"chr3\t5\t.\tACG\tA\t.\tPASS\tDP=3"), Ok(("chr3", 4..7)));
    assert_eq!(vcf.parse_record(b"chr3\t5\t.\tA\t<DEL>\t.\tPASS\tSVTYPE=DEL;END=100"), Ok(("chr3", 4..100)));

    let sam = TabixConfig::sam();
    assert_eq!(sam.parse_record(b"read\t0\tchr4\t10\t60\t5M2I3M1D2S\t*\t0\t0\tACGT\t*"), Ok(("chr4", 9..18)));

    let generic = TabixConfig::generic(1, 2, 0);
    assert_eq!(generic.parse_record(b"chr5\t42\t0.5"), Ok(("chr5", 41..42)));
}

#[test]
fn presets() {
    assert_eq!(TabixConfig::preset("bed"), Some(TabixConfig::bed()));
    assert_eq!(TabixConfig::preset("gtf"), Some(TabixConfig::gff()));
    assert_eq!(TabixConfig::preset("bam"), None);
    assert!(TabixConfig::vcf().is_header(b"#CHROM", 10));
    let config = TabixConfig { skip: 2, ..TabixConfig::generic(1, 2, 0) };
    assert!(config.is_header(b"position", 1));
    assert!(!config.is_header(b"chr1\t1", 2));
}

#[test]
fn builder_rejects_unsorted() {
    let mut builder = IndexBuilder::new(TabixConfig::bed());
    let chunk = Chunk::new(VirtualOffset::new(0, 0), VirtualOffset::new(0, 10));
    assert!(builder.add("chr1", 100..200, chunk).is_ok());
    assert!(builder.add("chr1", 50..60, chunk).is_err(), "Accepted a decreasing start");
    assert!(builder.add("chr2", 10..20, chunk).is_ok());
    assert!(builder.add("chr1", 300..400, chunk).is_err(), "Accepted a non-contiguous sequence");
    assert!(builder.add("chr3", 10..(1 << 30), chunk).is_err(), "Accepted a record beyond the limit");
}

#[test]
fn linear_index_is_filled() {
    let mut builder = IndexBuilder::new(TabixConfig::bed());
    let first = Chunk::new(VirtualOffset::new(0, 0), VirtualOffset::new(0, 20));
    let second = Chunk::new(VirtualOffset::new(0, 20), VirtualOffset::new(0, 40));
    builder.add("chr1", 0..10, first).unwrap();
    builder.add("chr1", 100_000..100_010, second).unwrap();
    let index = builder.finish();
    let reference = index.reference(0).unwrap();
    assert_eq!(reference.intervals.len(), (100_000 >> LINEAR_SHIFT) + 1);
    assert_eq!(reference.intervals[0], first.start);
    assert_eq!(reference.intervals[1], first.start, "Empty window not filled from the previous one");
    assert_eq!(*reference.intervals.last().unwrap(), second.start);
    assert_eq!(reference.records, Some(2));
}

#[test]
fn linear_index_keeps_offset_zero() {
    // A long record at the start of the file and a short one in the same window.
    let mut builder = IndexBuilder::new(TabixConfig::bed());
    let long = Chunk::new(VirtualOffset::new(0, 0), VirtualOffset::new(0, 18));
    let short = Chunk::new(VirtualOffset::new(0, 18), VirtualOffset::new(0, 36));
    builder.add("chr1", 0..20_000, long).unwrap();
    builder.add("chr1", 100..200, short).unwrap();

    // Leading empty windows start from offset 0.
    let late = Chunk::new(VirtualOffset::new(0, 0), VirtualOffset::new(0, 24));
    builder.add("chr2", 50_000..50_010, late).unwrap();

    let index = builder.finish();
    let reference = index.reference(0).unwrap();
    assert_eq!(reference.intervals, vec![long.start, long.start], "Window overwritten by a later record");
    assert_eq!(index.query("chr1", 0..50), Some(vec![Chunk::new(long.start, short.end)]));

    let reference = index.reference(1).unwrap();
    assert_eq!(reference.intervals.len(), (50_000 >> LINEAR_SHIFT) + 1);
    assert!(reference.intervals[..3].iter().all(|offset| *offset == VirtualOffset::default()));
    assert_eq!(*reference.intervals.last().unwrap(), late.start);
}

#[test]
fn serialization() {
    let dir = tempfile::tempdir().unwrap();
    let content = "#header\nchr1\t10\t20\nchr1\t15\t30\nchr2\t5\t6\n";
    let index = build(dir.path(), content, &TabixConfig::bed()).unwrap();
    assert_eq!(index.names(), &["chr1".to_string(), "chr2".to_string()]);

    let mut buffer: Vec<u8> = Vec::new();
    index.write(&mut buffer).unwrap();
    let copy = TabixIndex::read(&mut &buffer[..]).unwrap();
    assert_eq!(copy, index, "Index changed in serialization");

    let loaded = TabixIndex::load(dir.path().join("input.txt.gz.tbi")).unwrap();
    assert_eq!(loaded, index, "Index changed in compressed serialization");
    assert_eq!(loaded.config(), &TabixConfig::bed());
    assert_eq!(loaded.reference(0).unwrap().records, Some(2));
    assert_eq!(loaded.unplaced(), Some(0));

    assert!(TabixIndex::read(&mut &b"BAI\x01"[..]).is_err(), "Accepted a wrong magic");
    assert!(TabixIndex::read(&mut &buffer[..buffer.len() / 2]).is_err(), "Accepted a truncated index");
}

#[test]
fn build_rejects_unsorted_input() {
    let dir = tempfile::tempdir().unwrap();
    let result = build(dir.path(), "chr1\t100\t200\nchr1\t10\t20\n", &TabixConfig::bed());
    assert!(result.is_err(), "Indexed an unsorted file");

    // Existing output.
    let input = write_input(dir.path(), "sorted.bed", "chr1\t1\t2\n");
    let output = dir.path().join("sorted.bed.gz");
    assert!(compress_and_index(&input, &output, &TabixConfig::bed()).is_ok());
    assert!(compress_and_index(&input, &output, &TabixConfig::bed()).is_err(), "Overwrote an existing file");
}

#[test]
fn query_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let mut content = String::new();
    for i in 0..20000u64 {
        content.push_str(&format!("chr1\t{}\t{}\tfeature{}\n", i * 1000, i * 1000 + 500, i));
    }
    content.push_str("chr2\t0\t100\tlast\n");
    let index = build(dir.path(), &content, &TabixConfig::bed()).unwrap();

    assert_eq!(index.query("chrUn", 0..1000), None);
    let chunks = index.query("chr1", 5_000_000..5_001_000).unwrap();
    assert!(!chunks.is_empty(), "No chunks for a covered region");
    for pair in chunks.windows(2) {
        assert!(pair[0].end < pair[1].start, "Chunks are not merged: {:?}", pair);
    }
    let whole = index.query("chr1", 0..(1 << 29)).unwrap();
    assert_eq!(whole.len(), 1, "Whole-sequence query of contiguous records is fragmented");
    let chr2 = index.query("chr2", 0..10).unwrap();
    assert_eq!(chr2.len(), 1);
}

//-----------------------------------------------------------------------------

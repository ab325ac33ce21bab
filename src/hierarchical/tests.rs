use super::*;

use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use std::fs;
use tempfile::TempDir;

//-----------------------------------------------------------------------------

fn create_writer(dir: &TempDir, name: &str) -> (HierWriter, PathBuf) {
    let filename = dir.path().join(name);
    let writer = HierWriter::create(&filename);
    assert!(writer.is_ok(), "Failed to create store: {}", writer.unwrap_err());
    (writer.unwrap(), filename)
}

fn open_store(filename: &Path) -> HierStore {
    let store = HierStore::open(filename);
    assert!(store.is_ok(), "Failed to open store: {}", store.unwrap_err());
    store.unwrap()
}

fn random_array(rng: &mut StdRng, shape: &[usize]) -> NdArray {
    let len = shape.iter().product();
    let data = ArrayData::Float64((0..len).map(|_| rng.gen_range(0.0..100.0)).collect());
    NdArray::new(shape.to_vec(), data).unwrap()
}

// Extracts a sub-array of the reference by visiting every element.
fn reference_block(reference: &NdArray, axis: usize, range: Range<usize>) -> NdArray {
    let mut shape = reference.shape().to_vec();
    shape[axis] = range.len();
    let mut values = Vec::new();
    let ranges: Vec<Range<usize>> = shape.iter().enumerate().map(|(i, len)| {
        if i == axis { range.clone() } else { 0..*len }
    }).collect();
    if shape.iter().all(|len| *len > 0) {
        let mut coords: Vec<usize> = ranges.iter().map(|r| r.start).collect();
        loop {
            values.push(reference.get_f64(&coords).unwrap());
            if !next_coords(&mut coords, &ranges) {
                break;
            }
        }
    }
    NdArray::new(shape, ArrayData::Float64(values)).unwrap()
}

fn sample_table() -> Table {
    let mut table = Table::new(vec![String::from("sample"), String::from("group"), String::from("depth")]);
    table.push(vec![Value::Text(String::from("NA12878")), Value::Integer(1), Value::Real(31.5)]);
    table.push(vec![Value::Text(String::from("NA12891")), Value::Null, Value::Real(28.0)]);
    table.push(vec![Value::Text(String::from("NA12892")), Value::Integer(2), Value::Null]);
    table
}

//-----------------------------------------------------------------------------

#[test]
fn group_paths() {
    assert_eq!(normalize_group("/"), Some(String::from("/")));
    assert_eq!(normalize_group(""), Some(String::from("/")));
    assert_eq!(normalize_group("chr22"), Some(String::from("/chr22")));
    assert_eq!(normalize_group("/ExampleStudy/chr22/"), Some(String::from("/ExampleStudy/chr22")));
    assert_eq!(normalize_group("/a//b"), None);
    assert_eq!(parent_group("/a/b"), Some("/a"));
    assert_eq!(parent_group("/a"), Some("/"));
    assert_eq!(parent_group("/"), None);
    assert_eq!(join_path("/", "x"), "/x");
    assert_eq!(join_path("/a", "x"), "/a/x");
}

#[test]
fn layout() {
    let dir = tempfile::tempdir().unwrap();
    let (mut writer, filename) = create_writer(&dir, "layout.store");
    writer.create_group("/ExampleStudy/chr22").unwrap();
    writer.create_group("/ExampleStudy/chr21").unwrap();
    writer.create_dataset("/ExampleStudy/chr22", "Counts", DataType::Int32, &[12, 6, 2, 1000], &[12, 6, 2, 100], 0.0).unwrap();
    writer.create_dataset("/ExampleStudy/chr22", "Coverages", DataType::Int32, &[6, 2, 1000], &[6, 2, 100], 0.0).unwrap();
    writer.create_dataset("/", "Weights", DataType::Float64, &[10], &[4], 1.0).unwrap();
    writer.close().unwrap();

    let store = open_store(&filename);
    assert_eq!(store.version(), VERSION);
    assert_eq!(store.groups().unwrap(), vec!["/", "/ExampleStudy", "/ExampleStudy/chr21", "/ExampleStudy/chr22"]);

    let root = store.list_layout().unwrap();
    assert_eq!(root.path(), "/");
    let paths: Vec<&str> = root.nodes().iter().map(|node| node.path()).collect();
    assert_eq!(paths, vec![
        "/", "/ExampleStudy", "/ExampleStudy/chr21", "/ExampleStudy/chr22",
        "/ExampleStudy/chr22/Counts", "/ExampleStudy/chr22/Coverages", "/Weights"
    ]);
    let counts = root.find("/ExampleStudy/chr22/Counts").unwrap();
    assert!(!counts.is_group());
    assert_eq!(counts.shape(), Some(&[12, 6, 2, 1000][..]));
    assert!(root.find("/ExampleStudy").unwrap().is_group());
    assert!(root.find("/Missing").is_none());

    let info = store.dataset_info("ExampleStudy/chr22", "Coverages").unwrap();
    assert_eq!(info.rank(), 3);
    assert_eq!(info.chunk_grid(), vec![1, 1, 10]);
    assert_eq!(info.chunk_len(), 1200);
    let text = root.to_string();
    assert!(text.contains("  /ExampleStudy\n"), "Missing group in\n{}", text);
    assert!(text.contains("/Weights float64 [10] chunks [4]"), "Missing dataset in\n{}", text);
}

#[test]
fn large_sparse_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let (mut writer, filename) = create_writer(&dir, "tally.store");
    let shape = [12, 6, 2, 90_354_753];
    writer.create_group("/ExampleStudy/22").unwrap();
    writer.create_dataset("/ExampleStudy/22", "Counts", DataType::Int32, &shape, &[12, 6, 2, 4096], 0.0).unwrap();
    let slab_shape = vec![12, 6, 2, 100];
    let slab = NdArray::new(slab_shape.clone(), ArrayData::Int32((0..14400).collect())).unwrap();
    writer.write_slab("/ExampleStudy/22", "Counts", &[0, 0, 0, 29_000_500], &slab).unwrap();
    writer.write_side_table("/ExampleStudy/22", &sample_table()).unwrap();
    writer.close().unwrap();

    let store = open_store(&filename);
    let selector = BlockSelector::new(&["Counts"], 29_000_000..29_001_000);
    let block = store.read_block("/ExampleStudy/22", &selector).unwrap();
    assert_eq!(block.group, "/ExampleStudy/22");
    assert_eq!(block.axis_range, 29_000_000..29_001_000);
    let counts = block.array("Counts").unwrap();
    assert_eq!(counts.shape(), &[12, 6, 2, 1000], "Wrong block shape");
    assert_eq!(counts.get_i32(&[0, 0, 0, 499]), Some(0), "Unwritten element is not the fill value");
    assert_eq!(counts.get_i32(&[0, 0, 0, 500]), Some(0));
    assert_eq!(counts.get_i32(&[0, 0, 0, 501]), Some(1));
    assert_eq!(counts.get_i32(&[11, 5, 1, 599]), Some(14399));
    assert_eq!(counts.get_i32(&[3, 2, 1, 550]), slab.get_i32(&[3, 2, 1, 50]));
    assert_eq!(counts.get_i32(&[11, 5, 1, 600]), Some(0));
    assert_eq!(block.side_table, sample_table());

    // The last positions of the chromosome.
    let tail = BlockSelector::new(&["Counts"], 90_354_000..90_354_753);
    let block = store.read_block("/ExampleStudy/22", &tail).unwrap();
    assert_eq!(block.array("Counts").unwrap().shape(), &[12, 6, 2, 753]);
}

#[test]
fn matches_reference() {
    let dir = tempfile::tempdir().unwrap();
    let (mut writer, filename) = create_writer(&dir, "reference.store");
    let mut rng = StdRng::seed_from_u64(0x5EED);
    let shape = [3, 5, 257];
    let reference = random_array(&mut rng, &shape);
    writer.create_group("/g").unwrap();
    writer.create_dataset("/g", "values", DataType::Float64, &shape, &[2, 3, 16], -1.0).unwrap();

    // Write the reference in unaligned slabs along the last axis.
    let mut start = 0;
    while start < shape[2] {
        let end = (start + rng.gen_range(1..40)).min(shape[2]);
        let slab = reference_block(&reference, 2, start..end);
        writer.write_slab("/g", "values", &[0, 0, start], &slab).unwrap();
        start = end;
    }
    writer.close().unwrap();

    let store = open_store(&filename);
    for axis in 0..shape.len() {
        let extent = shape[axis];
        let mut ranges = vec![0..extent, 0..0, extent..extent, 0..1, (extent - 1)..extent];
        for _ in 0..10 {
            let a = rng.gen_range(0..=extent);
            let b = rng.gen_range(a..=extent);
            ranges.push(a..b);
        }
        for range in ranges {
            let selector = BlockSelector::new(&["values"], range.clone()).with_axis(axis);
            let block = store.read_block("/g", &selector).unwrap();
            let array = block.array("values").unwrap();
            assert_eq!(array.shape()[axis], range.len(), "Wrong length on axis {} for {:?}", axis, range);
            let expected = reference_block(&reference, axis, range.clone());
            assert_eq!(array, &expected, "Wrong block on axis {} for {:?}", axis, range);
        }
    }
}

#[test]
fn partial_writes_use_fill() {
    let dir = tempfile::tempdir().unwrap();
    let (mut writer, filename) = create_writer(&dir, "partial.store");
    writer.create_dataset("/", "x", DataType::Int32, &[2, 50], &[1, 8], 7.0).unwrap();
    let slab = NdArray::new(vec![1, 3], ArrayData::Int32(vec![1, 2, 3])).unwrap();
    writer.write_slab("/", "x", &[1, 10], &slab).unwrap();
    // Overwrite part of the slab.
    let slab = NdArray::new(vec![1, 1], ArrayData::Int32(vec![9])).unwrap();
    writer.write_slab("/", "x", &[1, 11], &slab).unwrap();
    writer.close().unwrap();

    let store = open_store(&filename);
    let block = store.read_block("/", &BlockSelector::new(&["x"], 9..14)).unwrap();
    let array = block.array("x").unwrap();
    assert_eq!(array.data(), &ArrayData::Int32(vec![7, 7, 7, 7, 7, 7, 1, 9, 3, 7]));
    assert!(block.side_table.is_empty());
    assert!(block.side_table.columns().is_empty());
}

#[test]
fn side_tables() {
    let dir = tempfile::tempdir().unwrap();
    let (mut writer, filename) = create_writer(&dir, "side.store");
    writer.create_group("/study").unwrap();
    writer.write_side_table("/study", &Table::new(vec![String::from("old")])).unwrap();
    writer.write_side_table("/study", &sample_table()).unwrap();

    // Rows cannot be stored without columns.
    let mut columnless = Table::new(Vec::new());
    columnless.push(Vec::new());
    assert!(writer.write_side_table("/study", &columnless).is_err(), "Accepted rows without columns");
    writer.write_side_table("/", &Table::new(Vec::new())).unwrap();
    writer.close().unwrap();

    let store = open_store(&filename);
    assert_eq!(store.read_side_table("/study").unwrap(), sample_table(), "Side table was not replaced");
    let root = store.read_side_table("/").unwrap();
    assert!(root.is_empty());
    assert!(matches!(store.read_side_table("/missing"), Err(AccessError::Layout { what: "group", .. })));
}

//-----------------------------------------------------------------------------

#[test]
fn layout_and_range_errors() {
    let dir = tempfile::tempdir().unwrap();
    let (mut writer, filename) = create_writer(&dir, "errors.store");
    writer.create_group("/g").unwrap();
    writer.create_dataset("/g", "a", DataType::Int32, &[4, 100], &[4, 10], 0.0).unwrap();
    writer.close().unwrap();
    let store = open_store(&filename);

    let selector = BlockSelector::new(&["a"], 0..10);
    assert!(matches!(store.read_block("/h", &selector), Err(AccessError::Layout { what: "group", .. })));
    let missing = BlockSelector::new(&["a", "b"], 0..10);
    match store.read_block("/g", &missing) {
        Err(AccessError::Layout { what, name, .. }) => {
            assert_eq!(what, "dataset");
            assert_eq!(name, "/g/b");
        },
        other => panic!("Expected a layout error, got {:?}", other),
    }

    assert!(store.read_block("/g", &BlockSelector::new(&["a"], 90..100)).is_ok(), "Range ending at the extent rejected");
    let past_end = BlockSelector::new(&["a"], 90..101);
    assert!(matches!(store.read_block("/g", &past_end), Err(AccessError::Range { .. })));
    let reversed = BlockSelector::new(&["a"], Range { start: 20, end: 10 });
    assert!(matches!(store.read_block("/g", &reversed), Err(AccessError::Range { .. })));
    let bad_axis = BlockSelector::new(&["a"], 0..1).with_axis(2);
    assert!(matches!(store.read_block("/g", &bad_axis), Err(AccessError::Range { .. })));
    let first_axis = BlockSelector::new(&["a"], 0..5).with_axis(0);
    assert!(matches!(store.read_block("/g", &first_axis), Err(AccessError::Range { .. })));

    let empty = BlockSelector::new(&[], 0..10);
    assert!(matches!(store.read_block("/g", &empty), Err(AccessError::InvalidRequest { .. })));
}

#[test]
fn open_errors() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.store");
    assert!(matches!(HierStore::open(&missing), Err(AccessError::Connection { .. })));

    let text = dir.path().join("notes.txt");
    fs::write(&text, "Not a store.\n".repeat(100)).unwrap();
    assert!(matches!(HierStore::open(&text), Err(AccessError::Connection { .. })));

    // A database that is not a store.
    let other = dir.path().join("other.db");
    let connection = Connection::open(&other).unwrap();
    connection.execute_batch("CREATE TABLE Tags (key TEXT PRIMARY KEY, value TEXT NOT NULL); INSERT INTO Tags VALUES ('version', 'v0');").unwrap();
    drop(connection);
    match HierStore::open(&other) {
        Err(AccessError::Connection { message, .. }) => assert!(message.contains("v0"), "Wrong message: {}", message),
        result => panic!("Expected a connection error, got {:?}", result),
    }
}

#[test]
fn writer_errors() {
    let dir = tempfile::tempdir().unwrap();
    let (mut writer, filename) = create_writer(&dir, "writer.store");
    assert!(HierWriter::create(&filename).is_err(), "Created a store over an existing file");

    assert!(writer.create_dataset("/missing", "x", DataType::Int32, &[10], &[5], 0.0).is_err(), "Created a dataset in a missing group");
    assert!(writer.create_dataset("/", "a/b", DataType::Int32, &[10], &[5], 0.0).is_err(), "Accepted a path as a dataset name");
    assert!(writer.create_dataset("/", "x", DataType::Int32, &[10, 10], &[5], 0.0).is_err(), "Accepted mismatched ranks");
    assert!(writer.create_dataset("/", "x", DataType::Int32, &[10], &[0], 0.0).is_err(), "Accepted an empty chunk");
    assert!(writer.create_dataset("/", "x", DataType::Int32, &[1 << 20, 1 << 20], &[1 << 12, 1 << 13], 0.0).is_err(), "Accepted a huge chunk");
    assert!(writer.create_dataset("/", "x", DataType::Int32, &[10], &[5], 0.0).is_ok());
    assert!(writer.create_dataset("/", "x", DataType::Int32, &[10], &[5], 0.0).is_err(), "Created a duplicate dataset");

    let ints = NdArray::new(vec![2], ArrayData::Int32(vec![1, 2])).unwrap();
    let floats = NdArray::new(vec![2], ArrayData::Float64(vec![1.0, 2.0])).unwrap();
    assert!(writer.write_slab("/", "x", &[8], &ints).is_ok());
    assert!(writer.write_slab("/", "x", &[9], &ints).is_err(), "Wrote past the end");
    assert!(writer.write_slab("/", "x", &[0], &floats).is_err(), "Wrote mismatched element types");
    assert!(writer.write_slab("/", "y", &[0], &ints).is_err(), "Wrote into a missing dataset");
    assert!(writer.create_group("/a//b").is_err(), "Accepted an invalid group path");
}

//-----------------------------------------------------------------------------

use super::*;

use std::fs;
use tempfile::TempDir;

//-----------------------------------------------------------------------------

fn create_database(dir: &TempDir) -> PathBuf {
    let db_file = dir.path().join("samples.db");
    let connection = Connection::open(&db_file).unwrap();
    connection.execute_batch(
        "CREATE TABLE samples (id INTEGER PRIMARY KEY, name TEXT NOT NULL, population TEXT, coverage REAL);
         CREATE TABLE variants (sample_id INTEGER, chrom TEXT, pos INTEGER, genotype BLOB);
         CREATE TABLE \"odd \"\"name\" (value INTEGER);
         CREATE INDEX variants_by_sample ON variants (sample_id);"
    ).unwrap();
    {
        let mut insert = connection.prepare("INSERT INTO samples (id, name, population, coverage) VALUES (?1, ?2, ?3, ?4)").unwrap();
        for i in 0..50i64 {
            let population = if i % 3 == 0 { None } else { Some(format!("pop{}", i % 3)) };
            insert.execute(rusqlite::params![i, format!("sample{}", i), population, 30.0 + i as f64 / 2.0]).unwrap();
        }
        let mut insert = connection.prepare("INSERT INTO variants (sample_id, chrom, pos, genotype) VALUES (?1, ?2, ?3, ?4)").unwrap();
        for i in 0..200i64 {
            insert.execute(rusqlite::params![i % 50, "chr22", 1000 + i * 10, vec![0u8, 1]]).unwrap();
        }
    }
    connection.execute("INSERT INTO \"odd \"\"name\" VALUES (7)", []).unwrap();
    drop(connection);
    db_file
}

fn open_source(filename: &Path) -> RelationalSource {
    let source = RelationalSource::open(filename);
    assert!(source.is_ok(), "Failed to open database: {}", source.unwrap_err());
    source.unwrap()
}

fn run_query(source: &RelationalSource, sql: &str) -> Table {
    let table = source.query(sql);
    assert!(table.is_ok(), "Query {} failed: {}", sql, table.unwrap_err());
    table.unwrap()
}

//-----------------------------------------------------------------------------

#[test]
fn list_tables() {
    let dir = tempfile::tempdir().unwrap();
    let db_file = create_database(&dir);
    let source = open_source(&db_file);
    let tables = source.list_tables().unwrap();
    let expected: BTreeSet<String> = ["odd \"name", "samples", "variants"].iter().map(|x| x.to_string()).collect();
    assert_eq!(tables, expected);
    assert_eq!(source.path(), db_file.as_path());
    assert!(source.filename().is_some());
    assert!(source.file_size().is_some());
}

#[test]
fn limit_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let db_file = create_database(&dir);
    let source = open_source(&db_file);
    for table in source.list_tables().unwrap() {
        let declared = source.columns(&table).unwrap();
        for limit in [0, 1, 5, 1000] {
            let sql = format!("SELECT * FROM {} LIMIT {}", quote_identifier(&table), limit);
            let result = run_query(&source, &sql);
            assert!(result.len() <= limit, "Too many rows from {} with limit {}", table, limit);
            assert_eq!(result.columns(), declared.as_slice(), "Wrong columns from {}", table);
            for row in result.rows() {
                assert_eq!(row.len(), declared.len(), "Wrong row width from {}", table);
            }
        }
    }
    let result = run_query(&source, "SELECT * FROM samples LIMIT 10");
    assert_eq!(result.len(), 10);
}

#[test]
fn values() {
    let dir = tempfile::tempdir().unwrap();
    let db_file = create_database(&dir);
    let source = open_source(&db_file);
    let result = run_query(&source, "SELECT id, name, population, coverage FROM samples WHERE id < 2 ORDER BY id");
    assert_eq!(result.len(), 2);
    assert_eq!(result.rows()[0], vec![
        Value::Integer(0), Value::Text(String::from("sample0")), Value::Null, Value::Real(30.0)
    ]);
    assert_eq!(result.rows()[1][2].as_text(), Some("pop1"));

    let result = run_query(&source, "SELECT genotype FROM variants LIMIT 1");
    assert_eq!(result.rows()[0][0], Value::Blob(vec![0, 1]));
}

#[test]
fn joins_and_aggregates() {
    let dir = tempfile::tempdir().unwrap();
    let db_file = create_database(&dir);
    let source = open_source(&db_file);
    let sql = "SELECT s.name, COUNT(*) AS n FROM samples s JOIN variants v ON v.sample_id = s.id \
        WHERE s.population = 'pop1' GROUP BY s.name ORDER BY s.name";
    let result = run_query(&source, sql);
    assert_eq!(result.columns(), &["name", "n"]);
    // Samples 1, 4, ..., 49 each have 4 variants.
    assert_eq!(result.len(), 17);
    for row in result.rows() {
        assert_eq!(row[1], Value::Integer(4), "Wrong variant count for {}", row[0]);
    }
}

#[test]
fn select_with_filter() {
    let dir = tempfile::tempdir().unwrap();
    let db_file = create_database(&dir);
    let source = open_source(&db_file);

    let filter = RowFilter::new().with_columns(&["name", "coverage"]).with_condition("coverage >= 50").with_limit(3);
    let result = source.select("samples", &filter).unwrap();
    assert_eq!(result.columns(), &["name", "coverage"]);
    assert_eq!(result.len(), 3);
    for row in result.rows() {
        assert!(matches!(row[1], Value::Real(x) if x >= 50.0), "Row {:?} does not match the condition", row);
    }

    let result = source.select("odd \"name", &RowFilter::new()).unwrap();
    assert_eq!(result.rows(), &[vec![Value::Integer(7)]]);
}

#[test]
fn lazy_rows() {
    let dir = tempfile::tempdir().unwrap();
    let db_file = create_database(&dir);
    let source = open_source(&db_file);
    let mut query = source.query_rows("SELECT pos FROM variants ORDER BY pos").unwrap();
    assert_eq!(query.columns(), &["pos"]);
    assert_eq!(query.sql(), "SELECT pos FROM variants ORDER BY pos");

    let first: Vec<Vec<Value>> = query.rows().unwrap().take(3).map(|x| x.unwrap()).collect();
    assert_eq!(first, vec![vec![Value::Integer(1000)], vec![Value::Integer(1010)], vec![Value::Integer(1020)]]);
    let count = query.rows().unwrap().count();
    assert_eq!(count, 200, "Restarted query returned a different number of rows");
}

//-----------------------------------------------------------------------------

#[test]
fn query_errors() {
    let dir = tempfile::tempdir().unwrap();
    let db_file = create_database(&dir);
    let source = open_source(&db_file);

    for sql in ["SELECT * FROM missing", "SELECT no_such_column FROM samples", "SELEC * FROM samples"] {
        match source.query(sql) {
            Err(AccessError::Query { query, message, .. }) => {
                assert_eq!(query, sql);
                assert!(!message.is_empty(), "No engine message for {}", sql);
            },
            other => panic!("Expected a query error for {}, got {:?}", sql, other),
        }
    }
    assert!(matches!(source.columns("missing"), Err(AccessError::Query { .. })));
    assert!(matches!(source.select("missing", &RowFilter::new()), Err(AccessError::Query { .. })));
}

#[test]
fn rejects_modifications() {
    let dir = tempfile::tempdir().unwrap();
    let db_file = create_database(&dir);
    let source = open_source(&db_file);
    for sql in ["DELETE FROM samples", "DROP TABLE variants", "INSERT INTO samples (id, name) VALUES (100, 'x')"] {
        assert!(matches!(source.query(sql), Err(AccessError::Query { .. })), "Accepted {}", sql);
    }
    let result = run_query(&source, "SELECT COUNT(*) FROM samples");
    assert_eq!(result.rows()[0][0], Value::Integer(50), "Database was modified");
}

#[test]
fn connection_errors() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.db");
    assert!(matches!(RelationalSource::open(&missing), Err(AccessError::Connection { .. })));
    assert!(!missing.exists(), "Opening created the database");

    let text = dir.path().join("notes.txt");
    fs::write(&text, "This is not a database, but it is long enough to look like a header.\n".repeat(20)).unwrap();
    let result = RelationalSource::open(&text);
    match result {
        Err(err @ AccessError::Connection { .. }) => assert_eq!(err.path(), text.as_path()),
        other => panic!("Expected a connection error, got {:?}", other),
    }
}

//-----------------------------------------------------------------------------

use std::io::{self, BufWriter, Write};
use std::ops::Range;
use std::{env, process};

use slice_base::slice::ArrayData;
use slice_base::{accessor, HierStore, IndexedSource, RelationalSource};
use slice_base::{BlockSelector, Locator, NdArray, Region, RowFilter, Selector, Slice, Source, SourceKind, Table};

use getopts::Options;
use log::debug;

//-----------------------------------------------------------------------------

fn main() -> Result<(), String> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Parse arguments.
    let config = Config::new()?;
    let source = Source::new(&config.filename, config.kind);
    debug!("Source {} ({})", config.filename, config.kind);

    let mut output = BufWriter::new(io::stdout().lock());
    match &config.request {
        Request::Tables => {
            let database = RelationalSource::open(&source.path).map_err(|x| x.to_string())?;
            for table in database.list_tables().map_err(|x| x.to_string())? {
                let columns = database.columns(&table).map_err(|x| x.to_string())?;
                writeln!(output, "{}\t{}", table, columns.join(",")).map_err(|x| x.to_string())?;
            }
        },
        Request::Layout => {
            let store = HierStore::open(&source.path).map_err(|x| x.to_string())?;
            let layout = store.list_layout().map_err(|x| x.to_string())?;
            write!(output, "{}", layout).map_err(|x| x.to_string())?;
        },
        Request::Sequences => {
            let file = IndexedSource::open(&source.path).map_err(|x| x.to_string())?;
            for name in file.sequences() {
                writeln!(output, "{}", name).map_err(|x| x.to_string())?;
            }
        },
        Request::SideTable(group) => {
            let store = HierStore::open(&source.path).map_err(|x| x.to_string())?;
            let table = store.read_side_table(group).map_err(|x| x.to_string())?;
            table.write_tsv(&mut output).map_err(|x| x.to_string())?;
        },
        Request::Regions(regions) if regions.len() > 1 => {
            let file = IndexedSource::open(&source.path).map_err(|x| x.to_string())?;
            let tables = file.fetch_ranges_parallel(regions).map_err(|x| x.to_string())?;
            let mut combined = Table::new(file.columns().to_vec());
            for table in tables {
                for row in table.rows() {
                    combined.push(row.clone());
                }
            }
            combined.write_tsv(&mut output).map_err(|x| x.to_string())?;
        },
        Request::Fetch(locator, selector) => {
            let slice = accessor::fetch(&source, locator, selector).map_err(|x| x.to_string())?;
            write_slice(&slice, &mut output).map_err(|x| x.to_string())?;
        },
        Request::Regions(regions) => {
            let selector = Selector::Region(regions[0].clone());
            let slice = accessor::fetch(&source, &Locator::None, &selector).map_err(|x| x.to_string())?;
            write_slice(&slice, &mut output).map_err(|x| x.to_string())?;
        },
    }
    output.flush().map_err(|x| x.to_string())?;

    Ok(())
}

//-----------------------------------------------------------------------------

enum Request {
    Tables,
    Layout,
    Sequences,
    SideTable(String),
    Regions(Vec<Region>),
    Fetch(Locator, Selector),
}

struct Config {
    pub filename: String,
    pub kind: SourceKind,
    pub request: Request,
}

impl Config {
    pub fn new() -> Result<Config, String> {
        let args: Vec<String> = env::args().collect();
        let program = args[0].clone();

        let mut opts = Options::new();
        opts.optflag("h", "help", "print this help");
        opts.optopt("k", "kind", "source kind: relational, interval, or hierarchical (default: from the file extension)", "STR");
        opts.optflag("", "tables", "list the tables and their columns (relational)");
        opts.optopt("", "sql", "run a read-only SQL query (relational)", "SQL");
        opts.optopt("t", "table", "select rows from this table (relational)", "STR");
        opts.optopt("", "columns", "comma-separated columns for --table (default: all)", "STR");
        opts.optopt("w", "where", "condition for --table", "EXPR");
        opts.optopt("l", "limit", "maximum number of rows for --table", "INT");
        opts.optflag("", "sequences", "list the sequences (interval)");
        opts.optmulti("r", "region", "fetch records overlapping a 1-based closed region chrom:start-end (interval)", "STR");
        opts.optflag("", "layout", "print the layout tree (hierarchical)");
        opts.optopt("g", "group", "group path (hierarchical)", "PATH");
        opts.optopt("d", "datasets", "comma-separated arrays to read from --group", "STR");
        opts.optopt("", "range", "half-open range start..end along the axis", "RANGE");
        opts.optopt("a", "axis", "axis for --range (default: last)", "INT");
        opts.optflag("", "side", "print the side table of --group");
        let matches = opts.parse(&args[1..]).map_err(|x| x.to_string())?;

        let header = format!("Usage: {} [options] source", program);
        if matches.opt_present("h") {
            eprint!("{}", opts.usage(&header));
            process::exit(0);
        }
        let filename = if let Some(s) = matches.free.first() {
            s.clone()
        } else {
            eprint!("{}", opts.usage(&header));
            process::exit(1);
        };
        let kind = match matches.opt_str("k") {
            Some(s) => s.parse::<SourceKind>()?,
            None => Self::infer_kind(&filename)?,
        };

        let request = if matches.opt_present("tables") {
            Request::Tables
        } else if matches.opt_present("layout") {
            Request::Layout
        } else if matches.opt_present("sequences") {
            Request::Sequences
        } else if let Some(sql) = matches.opt_str("sql") {
            Request::Fetch(Locator::None, Selector::Sql(sql))
        } else if let Some(table) = matches.opt_str("t") {
            let mut filter = RowFilter::new();
            if let Some(columns) = matches.opt_str("columns") {
                filter.columns = Self::split_list(&columns);
            }
            filter.condition = matches.opt_str("w");
            if let Some(s) = matches.opt_str("l") {
                filter.limit = Some(s.parse::<usize>().map_err(|x| format!("--limit: {}", x))?);
            }
            Request::Fetch(Locator::Table(table), Selector::Rows(filter))
        } else if matches.opt_present("r") {
            let mut regions = Vec::new();
            for s in matches.opt_strs("r") {
                regions.push(s.parse::<Region>().map_err(|x| format!("--region: {}", x))?);
            }
            Request::Regions(regions)
        } else if let Some(group) = matches.opt_str("g") {
            if matches.opt_present("side") {
                Request::SideTable(group)
            } else {
                let datasets = matches.opt_str("d").ok_or(String::from("Arrays must be provided with --datasets"))?;
                let range = matches.opt_str("range").ok_or(String::from("Range must be provided with --range"))?;
                let range = Self::parse_range(&range)?;
                let mut selector = BlockSelector::new(&[], range);
                selector.datasets = Self::split_list(&datasets);
                if let Some(s) = matches.opt_str("a") {
                    selector = selector.with_axis(s.parse::<usize>().map_err(|x| format!("--axis: {}", x))?);
                }
                Request::Fetch(Locator::Group(group), Selector::Block(selector))
            }
        } else {
            eprint!("{}", opts.usage(&header));
            process::exit(1);
        };

        Ok(Config { filename, kind, request })
    }

    fn infer_kind(filename: &str) -> Result<SourceKind, String> {
        let kinds = [
            (".db", SourceKind::Relational), (".sqlite", SourceKind::Relational), (".sqlite3", SourceKind::Relational),
            (".gz", SourceKind::Interval), (".bgz", SourceKind::Interval),
            (".store", SourceKind::Hierarchical),
        ];
        for (extension, kind) in kinds {
            if filename.ends_with(extension) {
                return Ok(kind);
            }
        }
        Err(format!("Cannot determine the kind of {}; use --kind", filename))
    }

    fn split_list(value: &str) -> Vec<String> {
        value.split(',').map(|x| x.trim()).filter(|x| !x.is_empty()).map(String::from).collect()
    }

    fn parse_range(value: &str) -> Result<Range<usize>, String> {
        let (start, end) = value.split_once("..").ok_or(format!("--range: expected start..end, got {}", value))?;
        let start = start.parse::<usize>().map_err(|x| format!("--range: {}", x))?;
        let end = end.parse::<usize>().map_err(|x| format!("--range: {}", x))?;
        Ok(start..end)
    }
}

//-----------------------------------------------------------------------------

fn write_slice<W: Write>(slice: &Slice, output: &mut W) -> io::Result<()> {
    match slice {
        Slice::Table(table) => table.write_tsv(output),
        Slice::Block(block) => {
            for (name, array) in block.arrays.iter() {
                write_array(name, array, output)?;
            }
            Ok(())
        },
    }
}

// Writes one line per position in all but the last axis, with the coordinates followed by the values along the last axis.
fn write_array<W: Write>(name: &str, array: &NdArray, output: &mut W) -> io::Result<()> {
    let shape = array.shape();
    let dims: Vec<String> = shape.iter().map(|x| x.to_string()).collect();
    writeln!(output, "# {} [{}]", name, dims.join(", "))?;
    let row_len = shape.last().copied().unwrap_or(0);
    if row_len == 0 {
        return Ok(());
    }
    let outer = &shape[..shape.len() - 1];
    for row in 0..(array.len() / row_len) {
        let mut coords = vec![0; outer.len()];
        let mut remaining = row;
        for (coord, len) in coords.iter_mut().zip(outer.iter()).rev() {
            *coord = remaining % len;
            remaining /= len;
        }
        let prefix: Vec<String> = coords.iter().map(|x| x.to_string()).collect();
        write!(output, "{}", prefix.join(","))?;
        let start = row * row_len;
        match array.data() {
            ArrayData::Int32(values) => {
                for value in &values[start..start + row_len] {
                    write!(output, "\t{}", value)?;
                }
            },
            ArrayData::Float64(values) => {
                for value in &values[start..start + row_len] {
                    write!(output, "\t{}", value)?;
                }
            },
        }
        writeln!(output)?;
    }
    Ok(())
}

//-----------------------------------------------------------------------------

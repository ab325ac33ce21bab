use std::path::Path;
use std::time::Instant;
use std::{env, fs, process};

use slice_base::tabix::{self, TabixConfig};
use slice_base::{utils, IndexedSource};

use getopts::Options;
use log::info;

//-----------------------------------------------------------------------------

fn main() -> Result<(), String> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let start_time = Instant::now();

    // Parse arguments.
    let config = Config::new()?;

    // Check if the output already exists.
    let index_file = utils::append_extension(&config.output, "tbi");
    if utils::file_exists(&config.output) || utils::file_exists(&index_file) {
        if config.overwrite {
            info!("Overwriting {}", config.output);
            for filename in [Path::new(&config.output), index_file.as_path()] {
                if utils::file_exists(filename) {
                    fs::remove_file(filename).map_err(|x| format!("{}: {}", filename.display(), x))?;
                }
            }
        } else {
            return Err(format!("Output {} or its index already exists", config.output));
        }
    }

    // Compress and index.
    tabix::compress_and_index(Path::new(&config.input), Path::new(&config.output), &config.tabix)?;

    // Statistics.
    let source = IndexedSource::open(&config.output).map_err(|x| x.to_string())?;
    info!(
        "The file contains {} sequences and {} header lines",
        source.sequences().len(), source.header_lines().len()
    );

    let end_time = Instant::now();
    let seconds = end_time.duration_since(start_time).as_secs_f64();
    info!("Used {:.3} seconds", seconds);

    Ok(())
}

//-----------------------------------------------------------------------------

struct Config {
    pub input: String,
    pub output: String,
    pub tabix: TabixConfig,
    pub overwrite: bool,
}

impl Config {
    pub fn new() -> Result<Config, String> {
        let args: Vec<String> = env::args().collect();
        let program = args[0].clone();

        let mut opts = Options::new();
        opts.optflag("h", "help", "print this help");
        opts.optopt("o", "output", "output file name (default: <input>.gz)", "FILE");
        opts.optopt("p", "preset", "file format: bed, gff, vcf, or sam (default: bed)", "STR");
        opts.optopt("s", "sequence", "1-based column of the sequence name", "INT");
        opts.optopt("b", "begin", "1-based column of the start coordinate", "INT");
        opts.optopt("e", "end", "1-based column of the end coordinate (0 if none)", "INT");
        opts.optopt("S", "skip", "skip this many header lines at the start", "INT");
        opts.optopt("c", "comment", "header lines start with this character (default: #)", "CHAR");
        opts.optflag("0", "zero-based", "start coordinates are 0-based");
        opts.optflag("", "overwrite", "overwrite the output files if they exist");
        let matches = opts.parse(&args[1..]).map_err(|x| x.to_string())?;

        let header = format!("Usage: {} [options] sorted.txt", program);
        if matches.opt_present("h") {
            eprint!("{}", opts.usage(&header));
            process::exit(0);
        }

        let preset = matches.opt_str("p").unwrap_or(String::from("bed"));
        let mut tabix = TabixConfig::preset(&preset).ok_or(format!("Unknown preset: {}", preset))?;
        let parse_column = |name: &str| -> Result<Option<usize>, String> {
            match matches.opt_str(name) {
                Some(s) => s.parse::<usize>().map(Some).map_err(|x| format!("--{}: {}", name, x)),
                None => Ok(None),
            }
        };
        if let Some(column) = parse_column("sequence")? {
            tabix.col_seq = column;
        }
        if let Some(column) = parse_column("begin")? {
            tabix.col_beg = column;
        }
        if let Some(column) = parse_column("end")? {
            tabix.col_end = column;
        }
        if let Some(skip) = parse_column("skip")? {
            tabix.skip = skip;
        }
        if tabix.col_seq == 0 || tabix.col_beg == 0 {
            return Err(String::from("Sequence and start columns must be positive"));
        }
        if let Some(s) = matches.opt_str("c") {
            let bytes = s.as_bytes();
            if bytes.len() != 1 {
                return Err(format!("--comment: expected a single character, got {}", s));
            }
            tabix.meta_char = bytes[0];
        }
        if matches.opt_present("0") {
            tabix.zero_based = true;
        }

        let input = if let Some(s) = matches.free.first() {
            s.clone()
        } else {
            eprint!("{}", opts.usage(&header));
            process::exit(1);
        };
        let output = match matches.opt_str("o") {
            Some(s) => s,
            None => {
                if utils::is_gzipped(&input) {
                    return Err(format!("Input {} is compressed; specify the output with --output", input));
                }
                format!("{}.gz", input)
            },
        };
        if output == input {
            return Err(String::from("Input and output must be different files"));
        }

        Ok(Config {
            input,
            output,
            tabix,
            overwrite: matches.opt_present("overwrite"),
        })
    }
}

//-----------------------------------------------------------------------------

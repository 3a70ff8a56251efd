//! hdag - command-line front-end for HDAG files and databases
//!
//! Usage:
//!   hdag file-from-txt 4 < graph.txt > graph.hdag
//!   hdag file-to-txt graph.hdag
//!   hdag file-to-dot graph.hdag | dot -Tsvg
//!   hdag db-create ./graph.db --hash-len 20
//!   hdag db-merge ./graph.db < graph.txt
//!   hdag db-info ./graph.db

use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use hdag::db::DEFAULT_FILE_MODE;
use hdag::text::{dot::write_dot, write_txt};
use hdag::{Bundle, Database, HdagFile, Pathname, TxtNodeSeq};

#[derive(Parser, Debug)]
#[command(name = "hdag", version, about = "Hash DAG files and databases")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Read an adjacency list from stdin, write a binary file to stdout
    FileFromTxt {
        hash_len: usize,
    },
    /// Dump a binary file as an adjacency list
    FileToTxt {
        path: PathBuf,
    },
    /// Render a binary file as a Graphviz digraph
    FileToDot {
        path: PathBuf,
    },
    /// Create an empty database directory
    DbCreate {
        path: PathBuf,
        #[arg(long)]
        hash_len: usize,
        /// Treat PATH as a name prefix and create a unique directory
        #[arg(long, default_value_t = false)]
        template: bool,
        /// Directory permission bits, in octal
        #[arg(long, default_value = "755", value_parser = parse_mode)]
        mode: u32,
    },
    /// Merge an adjacency list from stdin into a database
    DbMerge {
        dir: PathBuf,
    },
    /// Print database statistics
    DbInfo {
        dir: PathBuf,
    },
}

fn parse_mode(s: &str) -> std::result::Result<u32, String> {
    u32::from_str_radix(s, 8).map_err(|e| format!("invalid octal mode {:?}: {}", s, e))
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("HDAG_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt().with_env_filter(filter).with_writer(io::stderr).try_init();
}

fn open_bundle(path: &Path) -> Result<Bundle> {
    let file = HdagFile::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let bundle = Bundle::from_file(file);
    bundle.check().with_context(|| format!("{} is corrupt", path.display()))?;
    Ok(bundle)
}

fn file_from_txt(hash_len: usize) -> Result<()> {
    if !hdag::hash::is_valid_len(hash_len) {
        anyhow::bail!("invalid hash length {}: must be a positive multiple of 4", hash_len);
    }
    let stdin = io::stdin();
    let mut seq = TxtNodeSeq::new(stdin.lock(), hash_len);
    let mut bundle = Bundle::organized_from_node_seq(&mut seq)?;
    bundle.file(Pathname::Anonymous, DEFAULT_FILE_MODE)?;
    if let Some(file) = bundle.hdag_file() {
        let mut out = io::stdout().lock();
        out.write_all(file.as_bytes())?;
        out.flush()?;
    }
    bundle.close()?;
    Ok(())
}

fn file_to_txt(path: &Path) -> Result<()> {
    let bundle = open_bundle(path)?;
    let mut out = BufWriter::new(io::stdout().lock());
    write_txt(&bundle, &mut out)?;
    out.flush()?;
    Ok(())
}

fn file_to_dot(path: &Path) -> Result<()> {
    let bundle = open_bundle(path)?;
    let mut out = BufWriter::new(io::stdout().lock());
    write_dot(&bundle, &mut out)?;
    out.flush()?;
    Ok(())
}

fn db_create(path: &Path, hash_len: usize, template: bool, mode: u32) -> Result<()> {
    let db = Database::create(Some(path), template, mode, hash_len)?;
    if let Some(dir) = db.dir() {
        println!("{}", dir.display());
    }
    db.close()?;
    Ok(())
}

fn db_merge(dir: &Path) -> Result<()> {
    let db = Database::open(dir).with_context(|| format!("cannot open database {}", dir.display()))?;
    let stdin = io::stdin();
    let mut seq = TxtNodeSeq::new(stdin.lock(), db.hash_len());
    let stats = db.merge(&mut seq)?;
    println!(
        "incoming {}, dropped {}, rebuilt {}, committed {}",
        stats.incoming, stats.dropped, stats.rebuilt, stats.committed
    );
    db.close()?;
    Ok(())
}

fn db_info(dir: &Path) -> Result<()> {
    let db = Database::open(dir).with_context(|| format!("cannot open database {}", dir.display()))?;
    println!("hash length: {}", db.hash_len());
    println!("files:       {}", db.bundle_count());
    println!("nodes:       {}", db.node_count());
    println!("components:  {}", db.component_count());
    for path in db.bundle_paths() {
        println!("  {}", path.display());
    }
    db.close()?;
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    match cli.cmd {
        Cmd::FileFromTxt { hash_len } => file_from_txt(hash_len),
        Cmd::FileToTxt { path } => file_to_txt(&path),
        Cmd::FileToDot { path } => file_to_dot(&path),
        Cmd::DbCreate { path, hash_len, template, mode } => db_create(&path, hash_len, template, mode),
        Cmd::DbMerge { dir } => db_merge(&dir),
        Cmd::DbInfo { dir } => db_info(&dir),
    }
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("hdag: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! CLI tool for inspecting and repairing databases

use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use dbrepair::{
    storage::{Database, StorageEngine},
    BackgroundOperations, Config, DataFileSet, DatabaseName, Engine, FileSystem, LockManager,
    Repairer, StdFileSystem,
};
use humansize::{SizeFormatter, BINARY};
use std::{path::PathBuf, sync::Arc};
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    prelude::*,
    registry::Registry,
};

macro_rules! die {
    ($fmt:literal, $($arg:tt)*) => {{
        eprintln!($fmt, $($arg)*);
        std::process::exit(1);
    }};

    ($msg:literal) => {{
        eprintln!($msg);
        std::process::exit(1);
    }};
}

#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn};

pub fn init_tracing(quiet: bool, verbose: u8) -> (bool, LevelFilter) {
    let is_verbose = !quiet && verbose > 0;

    let level_filter = if quiet {
        LevelFilter::ERROR
    } else {
        match verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    };

    // Bridge log crate macros to tracing (the library logs through log::*)
    tracing_log::LogTracer::init().expect("Failed to set log tracer");

    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .with_env_var("DBREPAIR_LOG")
        .from_env_lossy();

    let subscriber = Registry::default().with(env_filter).with(
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .compact(),
    );

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        die!("INTERNAL ERROR: setting default tracing::subscriber failed");
    }

    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing_panic::panic_hook(info);
        prev_hook(info); // daisy-chain to old panic hook
    }));

    (is_verbose, level_filter)
}

/// CLI tool for inspecting and repairing databases
#[derive(Parser, Debug)]
#[command(name = "dbrepair")]
#[command(about = "CLI tool for inspecting and repairing databases")]
struct ToolArgs {
    /// Suppress all output except for errors. This overrides the -v flag.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Turn on verbose output. Supply -v multiple times to increase verbosity.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Root data directory
    #[arg(long, value_name = "PATH")]
    data_path: PathBuf,

    /// Directory that receives staging areas (defaults to the data path)
    #[arg(long, value_name = "PATH")]
    repair_path: Option<PathBuf>,

    /// Databases are stored in per-database subdirectories
    #[arg(long, default_value_t = false)]
    directory_per_db: bool,

    #[command(subcommand)]
    command: ToolCommand,
}

#[derive(Subcommand, Debug, Clone)]
enum ToolCommand {
    /// Rebuild a database from its records and install the result
    Repair {
        /// Database name
        db: String,

        /// Keep the staging area if the rebuild fails
        #[arg(long)]
        preserve_cloned_files_on_failure: bool,

        /// Move the original files into the staging area instead of deleting them
        #[arg(long)]
        backup_original_files: bool,
    },
    /// List the files of a database with their sizes
    Files {
        /// Database name
        db: String,
    },
    /// Show collections with their record counts and indexes
    Stats {
        /// Database name
        db: String,
    },
}

struct Session {
    config: Config,
    engine: Arc<Engine>,
    verbose: bool,
}

impl Session {
    fn database_name(&self, name: &str) -> DatabaseName {
        match DatabaseName::new(name) {
            Ok(db) => db,
            Err(e) => die!("Invalid database name {:?}: {}", name, e),
        }
    }

    fn fail(&self, what: &str, e: &dbrepair::Error) -> ! {
        let note = if self.verbose {
            ""
        } else {
            ". Note: Use -v (one or multiple times) for more information"
        };
        die!("Error {}: {}{}", what, e, note);
    }

    fn repair(&self, name: &str, preserve: bool, backup: bool) {
        let db = self.database_name(name);

        let locks = LockManager::default();
        let lock = locks.lock_exclusive(&db, &self.config.data_path);

        let repairer = Repairer::new(
            self.config.clone(),
            self.engine.clone(),
            Arc::new(BackgroundOperations::default()),
        );

        let size_before = repairer.database_size(&db).unwrap_or_default();

        if let Err(e) = repairer.repair_database(&lock, name, preserve, backup) {
            self.fail("repairing database", &e);
        }

        let size_after = repairer.database_size(&db).unwrap_or_default();

        println!(
            "repaired {db}: {} -> {}",
            SizeFormatter::new(size_before, BINARY),
            SizeFormatter::new(size_after, BINARY),
        );
    }

    fn files(&self, name: &str) {
        let db = self.database_name(name);
        let files = DataFileSet::new(&self.config, &self.config.data_path, &db);

        let mut remaining_misses = self.config.missing_file_slack;
        let mut total = 0;

        for path in files.paths() {
            match StdFileSystem.file_size(&path) {
                Ok(size) => {
                    total += size;
                    println!("{:>12}  {}", SizeFormatter::new(size, BINARY).to_string(), path.display());
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    if path != files.namespace_index_path() {
                        remaining_misses -= 1;

                        if remaining_misses == 0 {
                            break;
                        }
                    }
                }
                Err(e) => die!("Error reading {}: {}", path.display(), e),
            }
        }

        println!("{:>12}  total", SizeFormatter::new(total, BINARY).to_string());
    }

    fn stats(&self, name: &str) {
        let db = self.database_name(name);

        let database = match self.engine.get(&db, &self.config.data_path) {
            Ok(Some(database)) => database,
            Ok(None) => die!("Database {} does not exist", db),
            Err(e) => self.fail("opening database", &e),
        };

        for ns in database.collection_names() {
            let count = database.count(&ns).unwrap_or_default();

            let indexes = match database.index_specs(&ns) {
                Ok(specs) => specs
                    .into_iter()
                    .map(|spec| spec.name)
                    .collect::<Vec<_>>()
                    .join(", "),
                Err(e) => self.fail("reading indexes", &e),
            };

            println!("{ns}: {count} record(s), indexes: [{indexes}]");
        }
    }
}

fn main() {
    let args = ToolArgs::parse();
    let (verbose, level_filter) = init_tracing(args.quiet, args.verbose);

    let cmd = ToolArgs::command();

    info!(
        "starting {} ({} {}), log level: {level_filter}",
        cmd.get_name(),
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let mut config = Config::new(&args.data_path).directory_per_db(args.directory_per_db);
    if let Some(repair_path) = &args.repair_path {
        config = config.repair_path(repair_path);
    }

    let session = Session {
        engine: Arc::new(Engine::new(config.clone())),
        config,
        verbose,
    };

    match args.command {
        ToolCommand::Repair {
            db,
            preserve_cloned_files_on_failure,
            backup_original_files,
        } => session.repair(&db, preserve_cloned_files_on_failure, backup_original_files),
        ToolCommand::Files { db } => session.files(&db),
        ToolCommand::Stats { db } => session.stats(&db),
    }
}

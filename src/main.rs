use clap::{Parser, ValueEnum};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::rc::Rc;

use dcat::cli::Logger;
use dcat::{
    build_categories, AcsAnalysis, AcsAnalysisKind, Analyses, AnalysisConfig, EventBuilder,
    MultiPersAnalysis, Workspace,
};

#[derive(Parser)]
#[command(name = "dcat")]
#[command(about = "LRU data-cache access categorization for WCET analysis")]
#[command(version = "0.1.0")]
struct Cli {
    /// Input workspace description
    input: PathBuf,

    /// Output mode
    #[arg(short = 'm', long = "mode", default_value = "events")]
    mode: Mode,

    /// Restrict the analysis to the listed cache sets (repeatable)
    #[arg(long = "only-set")]
    only_set: Vec<usize>,

    /// Verbose event detail strings
    #[arg(long)]
    explicit: bool,

    /// Enable the MAY analysis (proves Always-Miss)
    #[arg(long)]
    may: bool,

    /// Enable the single-level persistence analysis
    #[arg(long)]
    pers: bool,

    /// Enable the multi-level persistence analysis
    #[arg(long = "multi-pers")]
    multi_pers: bool,

    /// Also build the per-edge prefix event lists
    #[arg(long)]
    prefix: bool,

    /// Output file (default: stdout)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode - minimal output
    #[arg(short, long)]
    quiet: bool,
}

#[derive(ValueEnum, Clone, Copy, PartialEq, Debug)]
enum Mode {
    /// Dump the per-set abstract cache states
    Acs,
    /// Dump the per-edge access categories
    Category,
    /// Dump the per-edge timing events (default)
    Events,
}

fn main() {
    let cli = Cli::parse();
    let logger = Logger::new(cli.verbose, cli.quiet);

    let source = match fs::read_to_string(&cli.input) {
        Ok(content) => content,
        Err(e) => {
            logger.error(&format!("cannot read {:?}: {}", cli.input, e));
            std::process::exit(1);
        }
    };

    let (ws, warnings) = match dcat::load_str(&source) {
        Ok(x) => x,
        Err(errors) => {
            logger.error(&format!("loading failed with {} error(s):", errors.len()));
            eprintln!("{}", dcat::format_errors(&errors, &source));
            std::process::exit(1);
        }
    };
    for w in &warnings {
        logger.degraded(w);
    }
    let tracked = (0..ws.coll.set_count()).map(|s| ws.coll.block_count(s)).sum();
    logger.cache_summary(
        ws.cache().set_count,
        ws.cache().way_count,
        ws.cache().block_size,
        tracked,
    );

    let config = AnalysisConfig { only_sets: cli.only_set.clone() };
    let mut must = run_acs(AcsAnalysisKind::Must, &ws, &config, &logger);
    let mut may = cli.may.then(|| run_acs(AcsAnalysisKind::May, &ws, &config, &logger));
    let mut pers = cli.pers.then(|| run_acs(AcsAnalysisKind::Pers, &ws, &config, &logger));
    let mut mpers = cli.multi_pers.then(|| run_multi(&ws, &config, &logger));

    let mut out = open_output(&cli, &logger);

    let result = match cli.mode {
        Mode::Acs => dump_acs(&mut must, may.as_mut(), pers.as_mut(), mpers.as_mut(), &mut *out),
        Mode::Category => {
            let mut an = Analyses {
                must: &mut must,
                may: may.as_mut(),
                pers: pers.as_mut(),
                multi_pers: mpers.as_mut(),
            };
            let categories = build_categories(&ws, &mut an);
            categories.dump(&ws, &mut *out)
        }
        Mode::Events => {
            let an = Analyses {
                must: &mut must,
                may: may.as_mut(),
                pers: pers.as_mut(),
                multi_pers: mpers.as_mut(),
            };
            let mut builder = EventBuilder::new(Rc::clone(&ws), an);
            let maps = if cli.prefix { builder.build_with_prefix() } else { builder.build() };
            maps.dump(&ws, cli.explicit, &mut *out)
        }
    };
    if let Err(e) = result {
        logger.error(&format!("output failed: {}", e));
        std::process::exit(1);
    }

    let mut collected = must.cleanup();
    if let Some(a) = may.as_mut() {
        collected += a.cleanup();
    }
    if let Some(a) = pers.as_mut() {
        collected += a.cleanup();
    }
    if let Some(a) = mpers.as_mut() {
        collected += a.cleanup();
    }
    logger.collected(collected);
}

fn run_acs(kind: AcsAnalysisKind, ws: &Rc<Workspace>, config: &AnalysisConfig, logger: &Logger) -> AcsAnalysis {
    let name = match kind {
        AcsAnalysisKind::Must => "MUST",
        AcsAnalysisKind::May => "MAY",
        AcsAnalysisKind::Pers => "PERS",
    };
    logger.analysis_start(name);
    let mut a = AcsAnalysis::new(kind, Rc::clone(ws), config).unwrap_or_else(|e| {
        logger.error(&e.to_string());
        std::process::exit(1);
    });
    for w in a.warnings().to_vec() {
        logger.degraded(&w);
    }
    if let Err(e) = a.run() {
        logger.error(&e.to_string());
        std::process::exit(1);
    }
    a
}

fn run_multi(ws: &Rc<Workspace>, config: &AnalysisConfig, logger: &Logger) -> MultiPersAnalysis {
    logger.analysis_start("MultiPERS");
    let mut a = MultiPersAnalysis::new(Rc::clone(ws), config).unwrap_or_else(|e| {
        logger.error(&e.to_string());
        std::process::exit(1);
    });
    for w in a.warnings().to_vec() {
        logger.degraded(&w);
    }
    if let Err(e) = a.run() {
        logger.error(&e.to_string());
        std::process::exit(1);
    }
    a
}

fn open_output(cli: &Cli, logger: &Logger) -> Box<dyn Write> {
    match &cli.output {
        Some(path) => match fs::File::create(path) {
            Ok(f) => {
                logger.writing(path);
                Box::new(f)
            }
            Err(e) => {
                logger.error(&format!("cannot create {:?}: {}", path, e));
                std::process::exit(1);
            }
        },
        None => Box::new(std::io::stdout()),
    }
}

fn dump_acs(
    must: &mut AcsAnalysis,
    may: Option<&mut AcsAnalysis>,
    pers: Option<&mut AcsAnalysis>,
    mpers: Option<&mut MultiPersAnalysis>,
    out: &mut dyn Write,
) -> std::io::Result<()> {
    writeln!(out, "MUST ACS")?;
    must.dump(out)?;
    if let Some(a) = may {
        writeln!(out, "MAY ACS")?;
        a.dump(out)?;
    }
    if let Some(a) = pers {
        writeln!(out, "PERS ACS")?;
        a.dump(out)?;
    }
    if let Some(a) = mpers {
        writeln!(out, "MULTI-PERS ACS")?;
        a.dump(out)?;
    }
    Ok(())
}

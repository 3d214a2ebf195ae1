use anyhow::{bail, Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use emerald::artifacts::Artifacts;
use emerald::gff::{write_gff_file, GffOptions};
use emerald::params::{DetectionParams, DEFAULT_GREED};
use emerald::pipeline::{load_inputs, InputFiles, Pipeline};
use emerald::preprocess::{Preprocessor, ToolRunner};

const HMM_LIBRARY_FILE: &str = "emerald.hmm";
const LOG_FILE: &str = "emerald.log";

/// EMERALD - Biosynthetic gene cluster detection
///
/// Predicts secondary-metabolite gene clusters from a nucleotide FASTA or
/// GenBank file, using gene calls and protein domain annotations.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Nucleotide FASTA or GenBank file (.gz accepted)
    #[clap(value_name = "SEQUENCE_FILE")]
    seq_file: PathBuf,

    /// Greediness level 0-3 (higher is more permissive)
    #[clap(short = 'g', long = "greed", default_value_t = DEFAULT_GREED)]
    greed: u8,

    /// Explicit cluster probability threshold in [0, 1]; overrides --greed
    #[clap(short = 's', long = "score")]
    score: Option<f64>,

    /// Run Prodigal in metagenomic mode
    #[clap(long = "meta")]
    meta: bool,

    /// Output directory
    #[clap(short = 'o', long = "outdir", default_value = ".")]
    outdir: PathBuf,

    /// Output GFF path (default OUTDIR/<base>.emerald/<base>.emerald.full.gff)
    #[clap(short = 'f', long = "outfile")]
    outfile: Option<PathBuf>,

    /// Omit per-gene CDS lines from the report
    #[clap(long = "minimal", default_value_t = true, action = clap::ArgAction::Set)]
    minimal: bool,

    /// Report refined cluster borders
    #[clap(long = "refined", default_value_t = true, action = clap::ArgAction::Set)]
    refined: bool,

    /// CPUs handed to hmmscan and InterProScan (0 = tool default)
    #[clap(long = "cpu", default_value = "0")]
    cpu: usize,

    /// Directory with the pretrained model artifacts
    #[clap(short = 'm', long = "models", env = "EMERALD_MODELS", default_value = "models")]
    models: PathBuf,

    /// HMM library for hmmscan (default MODELS/emerald.hmm)
    #[clap(long = "hmm-library")]
    hmm_library: Option<PathBuf>,

    /// InterProScan executable
    #[clap(long = "interproscan", default_value = "interproscan.sh")]
    interproscan: String,

    /// InterProScan member databases, comma separated (default all)
    #[clap(long = "appl", value_delimiter = ',')]
    appl: Vec<String>,

    /// Scorer window length and matrix padding block
    #[clap(long = "block-size", default_value_t = DetectionParams::default().block_size, value_parser = parse_block_size)]
    block_size: usize,

    /// Wall-clock limit per external tool in seconds (0 = unlimited)
    #[clap(long = "tool-timeout", default_value = "0")]
    tool_timeout: u64,

    /// Precomputed Prodigal protein FASTA (skips Prodigal)
    #[clap(long = "prodigal")]
    prodigal: Option<PathBuf>,

    /// Precomputed hmmscan domain table (skips hmmscan)
    #[clap(long = "hmm")]
    hmm: Option<PathBuf>,

    /// Precomputed InterProScan TSV or GFF3 (skips InterProScan)
    #[clap(long = "interpro")]
    interpro: Option<PathBuf>,

    /// Number of threads
    #[clap(short = 't', long = "threads", default_value = "4")]
    threads: usize,

    /// Only report warnings and errors
    #[clap(short = 'q', long = "quiet", conflicts_with = "verbose")]
    quiet: bool,

    /// Debug logging
    #[clap(short = 'v', long = "verbose")]
    verbose: bool,
}

/// Window length for the scorer; must be at least 1
fn parse_block_size(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("block size must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(format!("Invalid number: {e}")),
    }
}

fn base_name(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "emerald".to_string());
    name.strip_suffix(".gz").unwrap_or(&name).to_string()
}

/// Log sink that copies every record to stderr and to the run's log file
struct LogTee {
    file: File,
}

impl Write for LogTee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

fn init_logging(args: &Args, workdir: &Path) -> Result<()> {
    let level = if args.quiet {
        "warn"
    } else if args.verbose {
        "debug"
    } else {
        "info"
    };
    let path = workdir.join(LOG_FILE);
    let file =
        File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .target(env_logger::Target::Pipe(Box::new(LogTee { file })))
        .init();
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let base = base_name(&args.seq_file);
    let workdir = args.outdir.join(format!("{base}.emerald"));
    std::fs::create_dir_all(&workdir)
        .with_context(|| format!("Failed to create {}", workdir.display()))?;
    init_logging(&args, &workdir)?;

    rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads)
        .build_global()?;

    let params = DetectionParams::new().with_block_size(args.block_size);
    let threshold = params.resolve_threshold(args.greed, args.score)?;
    let outfile = args
        .outfile
        .clone()
        .unwrap_or_else(|| workdir.join(format!("{base}.emerald.full.gff")));

    // models are validated before any external tool runs
    let artifacts = Artifacts::load(&args.models)?;

    let given = InputFiles {
        gene_calls: args.prodigal.clone().unwrap_or_default(),
        gene_format: None,
        interpro: args.interpro.clone(),
        hmmer: args.hmm.clone(),
    };

    let files = if args.prodigal.is_some() && args.hmm.is_some() && args.interpro.is_some() {
        log::info!("using precomputed gene calls and annotations");
        given
    } else {
        let preprocessor = Preprocessor {
            outdir: workdir.clone(),
            meta: args.meta,
            cpus: args.cpu,
            runner: ToolRunner::new(
                (args.tool_timeout > 0).then(|| Duration::from_secs(args.tool_timeout)),
            ),
            hmm_library: args
                .hmm_library
                .clone()
                .unwrap_or_else(|| args.models.join(HMM_LIBRARY_FILE)),
            interproscan: args.interproscan.clone(),
            interpro_applications: args.appl.clone(),
        };
        preprocessor.process(&args.seq_file, &given)?
    };

    let (registry, index) = load_inputs(&files)?;
    let pipeline = Pipeline::new(&artifacts, params, threshold)?;
    let detection = pipeline.run(&registry, &index);

    if !detection.failures.is_empty() && detection.contigs.is_empty() {
        bail!("all {} contig(s) failed", detection.failures.len());
    }

    let options = GffOptions {
        minimal: args.minimal,
        refined_borders: args.refined,
    };
    write_gff_file(&outfile, &detection, &options)?;

    log::info!(
        "{} cluster(s) written to {}",
        detection.cluster_count(),
        outfile.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["emerald", "genome.fna.gz"]).unwrap();
        assert_eq!(args.greed, DEFAULT_GREED);
        assert!(args.minimal && args.refined);
        assert_eq!(args.block_size, 128);
        assert_eq!(base_name(&args.seq_file), "genome.fna");
    }

    #[test]
    fn test_args_precomputed_inputs() {
        let args = Args::try_parse_from([
            "emerald",
            "x.gbk",
            "--minimal",
            "false",
            "--hmm",
            "x.domtbl",
            "--appl",
            "Pfam,TIGRFAM",
        ])
        .unwrap();
        assert!(!args.minimal);
        assert_eq!(args.hmm, Some(PathBuf::from("x.domtbl")));
        assert_eq!(args.appl, vec!["Pfam", "TIGRFAM"]);
    }

    #[test]
    fn test_block_size_must_be_positive() {
        assert!(Args::try_parse_from(["emerald", "x.fna", "--block-size", "0"]).is_err());
        let args = Args::try_parse_from(["emerald", "x.fna", "--block-size", "64"]).unwrap();
        assert_eq!(args.block_size, 64);
    }

    #[test]
    fn test_log_tee_writes_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(LOG_FILE);
        let mut tee = LogTee {
            file: File::create(&path).unwrap(),
        };
        write!(tee, "[INFO emerald] loaded\n").unwrap();
        tee.flush().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[INFO emerald] loaded\n");
    }
}

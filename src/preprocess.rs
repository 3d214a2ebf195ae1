//! External tools that turn a sequence file into gene calls and domain
//! annotations: Prodigal, hmmscan and InterProScan.
//!
//! Each tool is run to completion with stdout discarded and stderr
//! captured to a temporary file. An optional wall-clock timeout kills the
//! child and fails with `ToolTimeout`.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use crate::error::{require_file, EmeraldError};
use crate::input::open_input;
use crate::pipeline::InputFiles;
use crate::registry::{first_qualifier, CdsFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Prodigal refuses single-genome mode below this length
const PRODIGAL_SHORT_SEQUENCE: &str = "Sequence must be 20000 characters";

/// Nucleotide input flavours
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceFormat {
    Fasta,
    GenBank,
}

impl SequenceFormat {
    /// FASTA when the first byte is `>`, GenBank otherwise
    pub fn detect<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut first = String::new();
        open_input(path)?.read_line(&mut first)?;
        if first.starts_with('>') {
            log::info!("FASTA sequence file detected");
            Ok(SequenceFormat::Fasta)
        } else {
            log::info!("FASTA sequence file NOT detected; trying GenBank");
            Ok(SequenceFormat::GenBank)
        }
    }
}

/// Locate an executable on PATH
pub fn find_tool(name: &str) -> Result<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        require_file(candidate)?;
        return Ok(candidate.to_path_buf());
    }

    if let Ok(output) = Command::new("which").arg(name).output() {
        if output.status.success() {
            let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !path.is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
    }

    Err(EmeraldError::FileNotFound(PathBuf::from(name)))
        .with_context(|| format!("{name} is not installed or not in PATH"))
}

#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stderr: String,
}

/// Runs external commands with an optional timeout
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolRunner {
    pub timeout: Option<Duration>,
}

impl ToolRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        ToolRunner { timeout }
    }

    /// Run to completion; only spawn failures and timeouts are errors
    pub fn run(&self, tool: &str, cmd: &mut Command) -> Result<ToolOutput> {
        log::info!("{cmd:?}");
        let mut stderr_file = tempfile::tempfile()?;
        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(stderr_file.try_clone()?)
            .spawn()
            .with_context(|| format!("Failed to start {tool}"))?;

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if let Some(limit) = self.timeout {
                if started.elapsed() >= limit {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(EmeraldError::ToolTimeout {
                        tool: tool.to_string(),
                        secs: limit.as_secs(),
                    }
                    .into());
                }
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        let mut stderr = String::new();
        stderr_file.seek(SeekFrom::Start(0))?;
        stderr_file.read_to_string(&mut stderr)?;
        if !stderr.trim().is_empty() {
            log::debug!("{tool} stderr: {}", stderr.trim());
        }
        Ok(ToolOutput { status, stderr })
    }

    /// Run and fail with `ToolFailed` on a non-zero exit
    pub fn run_checked(&self, tool: &str, cmd: &mut Command) -> Result<ToolOutput> {
        let output = self.run(tool, cmd)?;
        if !output.status.success() {
            return Err(EmeraldError::ToolFailed {
                tool: tool.to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr: output.stderr.trim().to_string(),
            }
            .into());
        }
        Ok(output)
    }
}

/// Settings for the annotation tools
#[derive(Debug, Clone)]
pub struct Preprocessor {
    pub outdir: PathBuf,
    pub meta: bool,
    pub cpus: usize,
    pub runner: ToolRunner,
    pub hmm_library: PathBuf,
    pub interproscan: String,
    /// InterProScan `-appl` member databases; empty runs them all
    pub interpro_applications: Vec<String>,
}

impl Preprocessor {
    fn out_path(&self, input: &Path, suffix: &str) -> PathBuf {
        let base = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input".to_string());
        self.outdir.join(format!("{base}{suffix}"))
    }

    /// Predict genes with Prodigal and return the cleaned protein FASTA
    pub fn run_prodigal(&self, seq_file: &Path) -> Result<PathBuf> {
        log::info!("Prodigal gene prediction...");
        require_file(seq_file)?;
        let prodigal = find_tool("prodigal")?;
        let out_faa = self.out_path(seq_file, ".prodigal.faa");

        let command = |meta: bool| {
            let mut cmd = Command::new(&prodigal);
            cmd.arg("-i").arg(seq_file).arg("-a").arg(&out_faa);
            if meta {
                cmd.args(["-p", "meta"]);
            }
            cmd
        };

        let output = self.runner.run("prodigal", &mut command(self.meta))?;
        if output.stderr.contains(PRODIGAL_SHORT_SEQUENCE) && !self.meta {
            log::info!("sequence too short for Prodigal normal mode. Trying -p meta");
            self.runner.run_checked("prodigal", &mut command(true))?;
        } else if !output.status.success() {
            return Err(EmeraldError::ToolFailed {
                tool: "prodigal".into(),
                status: output.status.code().unwrap_or(-1),
                stderr: output.stderr.trim().to_string(),
            }
            .into());
        }

        log::info!("Removing stop asterisks from Prodigal FASTA");
        strip_stop_codons(&out_faa)?;
        Ok(out_faa)
    }

    /// Write translated CDS features of a GenBank file as protein FASTA
    pub fn genbank_to_faa(&self, seq_file: &Path) -> Result<PathBuf> {
        log::info!("write GenBank CDS translations as FASTA");
        require_file(seq_file)?;
        let records = gb_io::reader::parse_file(seq_file.to_string_lossy().as_ref())
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("Could not parse GenBank file {}", seq_file.display()))?;

        let out_faa = self.out_path(seq_file, ".faa");
        let mut writer = BufWriter::new(File::create(&out_faa)?);
        let mut written = 0usize;
        for seq in &records {
            for feature in seq.features.iter().filter(|f| f.kind.to_string() == "CDS") {
                let translation = first_qualifier(feature, "translation");
                let id = first_qualifier(feature, "protein_id")
                    .or_else(|| first_qualifier(feature, "locus_tag"));
                if let (Some(id), Some(translation)) = (id, translation) {
                    let residues: String = translation.split_whitespace().collect();
                    writeln!(writer, ">{id}\n{residues}")?;
                    written += 1;
                }
            }
        }
        writer.flush()?;
        log::info!("{written} translated CDS written to {}", out_faa.display());
        Ok(out_faa)
    }

    /// Annotate proteins with the bundled HMM library
    pub fn run_hmmscan(&self, faa: &Path) -> Result<PathBuf> {
        log::info!("hmmscan functional annotation...");
        require_file(faa)?;
        require_file(&self.hmm_library)?;
        let hmmscan = find_tool("hmmscan")?;
        let out = self.out_path(faa, ".emerald.domtbl");

        let mut cmd = Command::new(hmmscan);
        cmd.arg("--domtblout").arg(&out).arg("--cut_ga");
        if self.cpus > 0 {
            cmd.arg("--cpu").arg(self.cpus.to_string());
        }
        cmd.arg(&self.hmm_library).arg(faa);
        self.runner.run_checked("hmmscan", &mut cmd)?;
        Ok(out)
    }

    /// Annotate proteins with InterProScan (TSV output)
    pub fn run_interproscan(&self, faa: &Path) -> Result<PathBuf> {
        log::info!("InterProScan annotation...");
        require_file(faa)?;
        let interproscan = find_tool(&self.interproscan)?;
        let out = self.out_path(faa, ".ip.tsv");

        let mut cmd = Command::new(interproscan);
        cmd.arg("-i").arg(faa).arg("-o").arg(&out).args(["-f", "TSV"]);
        if !self.interpro_applications.is_empty() {
            cmd.arg("-appl").arg(self.interpro_applications.join(","));
        }
        if self.cpus > 0 {
            cmd.arg("-cpu").arg(self.cpus.to_string());
        }
        self.runner.run_checked("interproscan", &mut cmd)?;
        Ok(out)
    }

    /// Produce every pipeline input for a sequence file, reusing given files
    pub fn process(&self, seq_file: &Path, given: &InputFiles) -> Result<InputFiles> {
        let mut files = given.clone();

        let faa = match SequenceFormat::detect(seq_file)? {
            SequenceFormat::Fasta => {
                if files.gene_calls.as_os_str().is_empty() {
                    files.gene_calls = self.run_prodigal(seq_file)?;
                    files.gene_format = Some(CdsFormat::ProdigalFasta);
                }
                files.gene_calls.clone()
            }
            SequenceFormat::GenBank => {
                if files.gene_calls.as_os_str().is_empty() {
                    files.gene_calls = seq_file.to_path_buf();
                    files.gene_format = Some(CdsFormat::GenBank);
                }
                if files.hmmer.is_some() && files.interpro.is_some() {
                    files.gene_calls.clone()
                } else {
                    self.genbank_to_faa(seq_file)?
                }
            }
        };

        if files.hmmer.is_none() {
            files.hmmer = Some(self.run_hmmscan(&faa)?);
        }
        if files.interpro.is_none() {
            files.interpro = Some(self.run_interproscan(&faa)?);
        }
        Ok(files)
    }
}

/// Remove `*` stop markers from a protein FASTA in place
pub fn strip_stop_codons(path: &Path) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        for line in open_input(path)?.lines() {
            let line = line?;
            writeln!(writer, "{}", line.replace('*', ""))?;
        }
        writer.flush()?;
    }
    temp.persist(path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

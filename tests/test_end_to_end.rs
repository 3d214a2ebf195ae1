/// End-to-end detection tests
///
/// Drives the library from precomputed gene calls and annotations through
/// to the GFF3 report, with a small model directory written to a tempdir.
use anyhow::Result;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

use emerald::artifacts::Artifacts;
use emerald::gff::{write_gff, GffOptions};
use emerald::pipeline::{load_inputs, InputFiles, Pipeline};
use emerald::DetectionParams;

const CLASSES: [&str; 7] = [
    "Alkaloid",
    "NRP",
    "Polyketide",
    "RiPP",
    "Saccharide",
    "Terpene",
    "Other",
];

fn write_models(dir: &Path) {
    fs::write(dir.join("vocab.txt"), "PF_KS\nPF_AT\nPF_TE\nPF_HK\nPF_OR\n").unwrap();
    fs::write(
        dir.join("token_scores.tsv"),
        "PF_KS\t0.95\nPF_AT\t0.9\nPF_TE\t0.85\nPF_HK\t0.05\nPF_OR\t0.9\n",
    )
    .unwrap();

    let mut models = String::new();
    for class in CLASSES {
        if class == "Polyketide" {
            models.push_str("Polyketide\t-2.0\tPF_KS:4.0,PF_AT:1.0\n");
        } else {
            models.push_str(&format!("{class}\t-4.0\t\n"));
        }
    }
    fs::write(dir.join("class_models.tsv"), models).unwrap();

    fs::write(
        dir.join("references.tsv"),
        "BGC0000001\tPolyketide\tPF_KS,PF_AT,PF_TE\nBGC0000002\tNRP\tPF_A,PF_C\n",
    )
    .unwrap();
}

fn prodigal_faa() -> String {
    let mut out = String::new();
    for (contig, n) in [("ctgA", 12), ("ctgB", 3), ("ctgC", 4)] {
        for i in 0..n {
            let start = i * 1000 + 1;
            out.push_str(&format!(
                ">{contig}_{} # {start} # {} # 1 # ID=1_{};partial=00\nMKVLAAGIL\n",
                i + 1,
                start + 899,
                i + 1
            ));
        }
    }
    out
}

fn interpro_tsv() -> String {
    let hits = [
        ("ctgA_1", "PF_HK"),
        ("ctgA_2", "PF_HK"),
        ("ctgA_3", "PF_HK"),
        ("ctgA_4", "PF_KS"),
        ("ctgA_5", "PF_AT"),
        ("ctgA_7", "PF_TE"),
        ("ctgA_7", "PF_KS"),
        ("ctgA_8", "PF_TE"),
        ("ctgA_9", "PF_HK"),
        ("ctgA_10", "PF_HK"),
        ("ctgA_11", "PF_HK"),
        ("ctgA_12", "PF_HK"),
        ("ctgC_1", "PF_OR"),
        ("ctgC_2", "PF_OR"),
        ("ctgC_3", "PF_OR"),
        ("ctgC_4", "PF_OR"),
    ];
    hits.iter()
        .map(|(gene, domain)| {
            format!("{gene}\tmd5\t300\tPfam\t{domain}\tdesc\t1\t250\t1e-30\tT\t01-01-2024\t-\t-\n")
        })
        .collect()
}

fn hmmer_domtbl() -> String {
    let mut out = String::from("# target name  accession  query name  accession\n");
    for i in 1..=3 {
        out.push_str(&format!("PF_HK  PF00001.1  -  ctgB_{i}  -  300  1e-20\n"));
    }
    out
}

struct Fixture {
    _dir: TempDir,
    models: PathBuf,
    files: InputFiles,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let models = dir.path().join("models");
    fs::create_dir(&models).unwrap();
    write_models(&models);

    // gene calls go in gzipped to exercise transparent decompression
    let faa = dir.path().join("genome.prodigal.faa.gz");
    let mut gz = GzEncoder::new(fs::File::create(&faa).unwrap(), Compression::default());
    gz.write_all(prodigal_faa().as_bytes()).unwrap();
    gz.finish().unwrap();

    let tsv = dir.path().join("genome.ip.tsv");
    fs::write(&tsv, interpro_tsv()).unwrap();
    let domtbl = dir.path().join("genome.domtbl");
    fs::write(&domtbl, hmmer_domtbl()).unwrap();

    Fixture {
        models,
        files: InputFiles {
            gene_calls: faa,
            gene_format: None,
            interpro: Some(tsv),
            hmmer: Some(domtbl),
        },
        _dir: dir,
    }
}

fn report(fixture: &Fixture, options: &GffOptions) -> Result<String> {
    let (registry, index) = load_inputs(&fixture.files)?;
    let artifacts = Artifacts::load(&fixture.models)?;
    let params = DetectionParams::default();
    let threshold = params.resolve_threshold(2, None)?;
    let pipeline = Pipeline::new(&artifacts, params, threshold)?;
    let detection = pipeline.run(&registry, &index);
    assert!(detection.failures.is_empty());

    let mut out = Vec::new();
    write_gff(&mut out, &detection, options)?;
    Ok(String::from_utf8(out)?)
}

#[test]
fn test_detects_polyketide_cluster() -> Result<()> {
    let fixture = fixture();
    let text = report(&fixture, &GffOptions::default())?;
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(lines.len(), 3, "{text}");
    assert_eq!(lines[0], "##gff-version 3");

    let cluster: Vec<&str> = lines[1].split('\t').collect();
    assert_eq!(cluster[0], "ctgA");
    assert_eq!(cluster[2], "CLUSTER");
    assert_eq!((cluster[3], cluster[4]), ("3001", "7900"));
    assert_eq!(
        cluster[8],
        "ID=ctgA_emrld_1;nearest_MiBIG=BGC0000001;nearest_MiBIG_class=Polyketide;nearest_MiBIG_jaccardDistance=0.000;partial=00"
    );

    let border: Vec<&str> = lines[2].split('\t').collect();
    assert_eq!(border[2], "CLUSTER_border");
    assert_eq!((border[3], border[4]), ("3001", "7900"));
    assert!(border[8].starts_with("ID=ctgA_emrld_1_1;"));
    Ok(())
}

#[test]
fn test_full_report_scores_every_gene() -> Result<()> {
    let fixture = fixture();
    let options = GffOptions {
        minimal: false,
        refined_borders: false,
    };
    let text = report(&fixture, &options)?;

    let cds: Vec<&str> = text.lines().filter(|l| l.contains("\tCDS\t")).collect();
    assert_eq!(cds.len(), 12 + 3 + 4);

    // gene 6 carries no domain and sits between 0.9 and 0.95
    assert!(text.contains("ID=ctgA_6;emerald_probability=0.925"));
    assert!(text.contains("ID=ctgA_7;emerald_probability=0.950"));
    assert!(text.contains("ID=ctgB_2;emerald_probability=0.050"));

    // ctgC scores high everywhere but no class model accepts it
    assert!(!text.contains("ctgC_emrld"));
    assert_eq!(text.matches("\tCLUSTER\t").count(), 1);
    Ok(())
}

#[test]
fn test_rejected_cluster_is_cleared_from_masks() -> Result<()> {
    let fixture = fixture();
    let (registry, index) = load_inputs(&fixture.files)?;
    let artifacts = Artifacts::load(&fixture.models)?;
    let pipeline = Pipeline::new(&artifacts, DetectionParams::default(), 0.6)?;
    let detection = pipeline.run(&registry, &index);

    let names: Vec<&str> = detection.contigs.iter().map(|c| c.contig.as_str()).collect();
    assert_eq!(names, vec!["ctgA", "ctgB", "ctgC"]);

    let ctg_c = &detection.contigs[2];
    assert_eq!(ctg_c.scores, vec![0.9; 4]);
    assert_eq!(ctg_c.masks.cluster, vec![0; 4]);
    assert_eq!(ctg_c.masks.border, vec![0; 4]);
    assert!(ctg_c.clusters.is_empty());
    Ok(())
}

#[test]
fn test_missing_model_file_is_reported() {
    let fixture = fixture();
    fs::remove_file(fixture.models.join("token_scores.tsv")).unwrap();
    let err = Artifacts::load(&fixture.models).err().unwrap();
    assert!(format!("{err}").contains("token_scores.tsv"));
}

#[test]
fn test_cli_with_precomputed_inputs() -> Result<()> {
    let fixture = fixture();
    let outdir = TempDir::new()?;
    let seq = outdir.path().join("genome.fna");
    fs::write(&seq, ">ctgA\nACGT\n")?;

    let status = Command::new(env!("CARGO_BIN_EXE_emerald"))
        .arg(&seq)
        .arg("--prodigal")
        .arg(&fixture.files.gene_calls)
        .arg("--interpro")
        .arg(fixture.files.interpro.as_ref().unwrap())
        .arg("--hmm")
        .arg(fixture.files.hmmer.as_ref().unwrap())
        .arg("--models")
        .arg(&fixture.models)
        .arg("--outdir")
        .arg(outdir.path())
        .stderr(Stdio::null())
        .status()?;
    assert!(status.success());

    let workdir = outdir.path().join("genome.fna.emerald");
    let text = fs::read_to_string(workdir.join("genome.fna.emerald.full.gff"))?;
    assert!(text.contains("ID=ctgA_emrld_1;"));

    let log = fs::read_to_string(workdir.join("emerald.log"))?;
    assert!(log.contains("using precomputed gene calls and annotations"));
    assert!(log.contains("cluster(s) written to"));
    Ok(())
}

#[test]
fn test_cli_checks_models_before_tools() -> Result<()> {
    let outdir = TempDir::new()?;
    let seq = outdir.path().join("genome.fna");
    fs::write(&seq, ">ctgA\nACGT\n")?;

    // no precomputed inputs: without the model check first this would try prodigal
    let output = Command::new(env!("CARGO_BIN_EXE_emerald"))
        .arg(&seq)
        .arg("--models")
        .arg(outdir.path().join("no_such_models"))
        .arg("--outdir")
        .arg(outdir.path())
        .arg("--quiet")
        .output()?;
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("model artifact 'vocab.txt'"), "{stderr}");
    assert!(!outdir.path().join("genome.fna.emerald").join("genome.fna.prodigal.faa").exists());
    Ok(())
}

#[test]
fn test_cli_rejects_bad_greed() -> Result<()> {
    let fixture = fixture();
    let outdir = TempDir::new()?;
    let status = Command::new(env!("CARGO_BIN_EXE_emerald"))
        .arg("genome.fna")
        .args(["--greed", "7"])
        .arg("--models")
        .arg(&fixture.models)
        .arg("--outdir")
        .arg(outdir.path())
        .arg("--quiet")
        .status()?;
    assert!(!status.success());
    Ok(())
}

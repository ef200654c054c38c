// Command line driver for the scell pipeline

use anyhow::{Context, Error};
use clap::{value_parser, Arg, Command};
use log::info;
use scell::config::PipelineConfig;
use scell::export::{export_analysis, export_integrated};
use scell::pipeline::{analyze_sample, integrate_samples};
use scell::tenx::load_tenx_dir;
use std::fs::File;
use std::path::PathBuf;

pub fn main() -> Result<(), Error> {
    env_logger::init();

    let matches = Command::new("scell-cmd")
        .arg(
            Arg::new("SAMPLES")
                .help("One or two 10X matrix directories to analyze")
                .required(true)
                .num_args(1..=2)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("OUT_DIR")
                .help("Output directory")
                .short('o')
                .long("out_dir")
                .default_value(".")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("CONFIG")
                .help("JSON pipeline configuration; omitted fields keep their defaults")
                .short('c')
                .long("config")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("SEED")
                .help("Seed for all stochastic stages")
                .short('s')
                .long("seed")
                .value_parser(value_parser!(u64)),
        )
        .get_matches();

    let samples: Vec<&PathBuf> = matches.get_many("SAMPLES").unwrap().collect();
    let out_dir: &PathBuf = matches.get_one("OUT_DIR").unwrap();

    let mut config: PipelineConfig = match matches.get_one::<PathBuf>("CONFIG") {
        Some(path) => {
            let file = File::open(path).with_context(|| path.display().to_string())?;
            serde_json::from_reader(file).with_context(|| path.display().to_string())?
        }
        None => PipelineConfig::default(),
    };
    if let Some(&seed) = matches.get_one::<u64>("SEED") {
        config.seed = seed;
    }
    config.validate()?;

    let mut analyses = Vec::new();
    for dir in &samples {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "sample".to_string());
        info!("analyzing {name}");
        let adata = load_tenx_dir(dir, &name)?;
        let analysis = analyze_sample(&adata, &config)?;
        export_analysis(out_dir.join(&name), &analysis)?;
        analyses.push(analysis);
    }

    if let [a, b] = analyses.as_slice() {
        info!("integrating the two samples");
        let integrated = integrate_samples(&a.adata, &b.adata, &config)?;
        export_integrated(out_dir.join("integrated"), &integrated)?;
    }

    Ok(())
}

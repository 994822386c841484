use std::{io::Write, path::Path};

use anyhow::{Context as _, bail};
use clap::Parser;
use log::info;
use pbtor::{
    config::Config,
    energy::ScanData,
    keyfile::Writer,
    load_molecule, run,
};

/// fit polarizable force field torsion parameters to tabulated scans
#[derive(Parser, Debug)]
#[command(author, about, long_about = None)]
struct Args {
    /// input file
    #[arg(value_parser, default_value_t = String::from("pbtor.toml"))]
    infile: String,

    /// Overwrite existing output from a previous run. Defaults to false.
    #[arg(short, long, default_value_t = false)]
    overwrite: bool,

    /// Serialize the input file to JSON and exit.
    #[arg(short, default_value_t = false, hide = true)]
    json: bool,
}

const OUTPUT: &str = "pbtor.json";

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = Config::load(&args.infile)
        .with_context(|| format!("failed to load {}", args.infile))?;
    if args.json {
        println!("{}", serde_json::to_string(&config)?);
        return Ok(());
    }
    if Path::new(OUTPUT).exists() && !args.overwrite {
        bail!("existing pbtor output. overwrite with -o/--overwrite");
    }
    info!("{config}");

    let molecule = load_molecule(&config.molecule)
        .with_context(|| format!("failed to load {}", config.molecule))?;
    let scans = ScanData::load(&config.scans)
        .with_context(|| format!("failed to load {}", config.scans))?;
    let ctx = run(&config, molecule, scans.qm, scans.mm)?;
    let output = ctx.output();
    print!("{output}");

    let mut f = std::fs::File::create(OUTPUT)?;
    writeln!(f, "{}", serde_json::to_string_pretty(&output)?)?;

    if let Some(params) = &config.params {
        let input = std::fs::read_to_string(params)
            .with_context(|| format!("failed to read {params}"))?;
        let rewritten =
            Writer::new(&output.parameters, config.fold_offsets).rewrite(&input);
        std::fs::write(&config.output, rewritten)?;
        println!("\nwrote parameters to {}", config.output);
    }

    println!("normal termination of pbtor");

    Ok(())
}

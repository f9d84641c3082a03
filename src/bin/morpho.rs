//! morpho - mixed-model reanalysis of morphology measurements
//!
//! Command-line interface for fitting GLMMs, marginal means and contrasts.

use clap::{Parser, Subcommand, ValueEnum};
use log::{info, LevelFilter};
use morpho_glmm::correct::Adjustment;
use morpho_glmm::data::DataTable;
use morpho_glmm::error::{GlmmError, Result};
use morpho_glmm::marginal::EmmeansRequest;
use morpho_glmm::model::{Family, FamilyName, Link, ModelSpec};
use morpho_glmm::pipeline::{
    example_config, run_analysis, run_batch, Analysis, AnalysisReport, BatchConfig,
};
use morpho_glmm::simulate::{generate_synthetic, SyntheticConfig};
use std::path::{Path, PathBuf};

/// CLI-friendly family enum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliFamily {
    Gaussian,
    Gamma,
    Beta,
    /// Negative binomial
    Nb,
}

impl From<CliFamily> for FamilyName {
    fn from(family: CliFamily) -> Self {
        match family {
            CliFamily::Gaussian => FamilyName::Gaussian,
            CliFamily::Gamma => FamilyName::Gamma,
            CliFamily::Beta => FamilyName::Beta,
            CliFamily::Nb => FamilyName::NegativeBinomial,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliLink {
    Identity,
    Log,
    Logit,
    Probit,
}

impl From<CliLink> for Link {
    fn from(link: CliLink) -> Self {
        match link {
            CliLink::Identity => Link::Identity,
            CliLink::Log => Link::Log,
            CliLink::Logit => Link::Logit,
            CliLink::Probit => Link::Probit,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliAdjustment {
    /// Tukey unstratified, Bonferroni stratified
    Auto,
    Tukey,
    Bonferroni,
    None,
}

impl From<CliAdjustment> for Adjustment {
    fn from(adjustment: CliAdjustment) -> Self {
        match adjustment {
            CliAdjustment::Auto => Adjustment::Auto,
            CliAdjustment::Tukey => Adjustment::Tukey,
            CliAdjustment::Bonferroni => Adjustment::Bonferroni,
            CliAdjustment::None => Adjustment::None,
        }
    }
}

/// Synthetic dataset presets
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliPreset {
    /// Beta-distributed fractions
    Fraction,
    /// Negative-binomial Sholl intersections by distance
    Sholl,
    /// Gamma-distributed soma areas
    SomaArea,
}

/// Mixed-model reanalysis of morphology measurements
#[derive(Parser)]
#[command(name = "morpho")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a batch of analyses from a YAML configuration file
    Run {
        /// Path to batch configuration YAML
        #[arg(short, long)]
        config: PathBuf,

        /// Data file (overrides the configuration's `data`)
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Output directory for reports
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Fit one model and compare marginal means
    Fit {
        /// Data file (CSV, or TSV with a .tsv extension)
        #[arg(short, long)]
        data: PathBuf,

        /// Outcome column
        #[arg(short = 'y', long)]
        outcome: String,

        /// Model formula (e.g., "~ treatment + (1 | mouse)")
        #[arg(short, long)]
        formula: String,

        #[arg(long, value_enum, default_value = "gaussian")]
        family: CliFamily,

        /// Link function (default: canonical for the family)
        #[arg(long, value_enum)]
        link: Option<CliLink>,

        /// Variables whose marginal means are compared
        #[arg(short, long, num_args = 1.., default_value = "treatment")]
        specs: Vec<String>,

        /// Stratify contrasts by these variables
        #[arg(long, num_args = 1..)]
        by: Vec<String>,

        /// Columns to treat as factors
        #[arg(long = "factor")]
        factors: Vec<String>,

        #[arg(long, value_enum, default_value = "auto")]
        adjustment: CliAdjustment,

        #[arg(long, default_value = "0.95")]
        confidence: f64,

        /// Output directory for reports
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write a synthetic dataset
    Simulate {
        #[arg(long, value_enum, default_value = "fraction")]
        preset: CliPreset,

        #[arg(long, default_value = "42")]
        seed: u64,

        /// Output CSV path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print (or write) an example batch configuration
    Example {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Commands::Run {
            config,
            data,
            output,
        } => cmd_run(&config, data.as_deref(), &output),

        Commands::Fit {
            data,
            outcome,
            formula,
            family,
            link,
            specs,
            by,
            factors,
            adjustment,
            confidence,
            output,
        } => cmd_fit(
            &data,
            &outcome,
            &formula,
            family,
            link,
            &specs,
            &by,
            &factors,
            adjustment,
            confidence,
            output.as_deref(),
        ),

        Commands::Simulate {
            preset,
            seed,
            output,
        } => cmd_simulate(preset, seed, &output),

        Commands::Example { output } => cmd_example(output.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_table(path: &Path) -> Result<DataTable> {
    if path.extension().is_some_and(|e| e == "tsv") {
        DataTable::from_tsv(path)
    } else {
        DataTable::from_csv(path)
    }
}

/// Run a batch configuration
fn cmd_run(config_path: &Path, data: Option<&Path>, output: &Path) -> Result<()> {
    info!("Loading batch configuration from {:?}", config_path);
    let config = BatchConfig::from_file(config_path)?;
    let table = match data {
        Some(path) => load_table(path)?,
        None => config.load_data()?,
    };
    info!("Loaded {} rows, {} columns", table.n_rows(), table.n_columns());

    let batch = run_batch(&table, &config)?;
    for report in batch.reports() {
        print_report(report);
        for path in report.save(output)? {
            info!("Wrote {:?}", path);
        }
    }
    for comparison in &batch.comparisons {
        println!("{}\n", comparison);
    }

    let n_failed = batch.failures().count();
    for err in batch.failures() {
        eprintln!("Failed: {}", err);
    }
    if n_failed > 0 {
        return Err(GlmmError::InvalidParameter(format!(
            "{} of {} analyses failed",
            n_failed,
            batch.analyses.len()
        )));
    }
    Ok(())
}

/// Fit a single model from flags
#[allow(clippy::too_many_arguments)]
fn cmd_fit(
    data: &Path,
    outcome: &str,
    formula: &str,
    family: CliFamily,
    link: Option<CliLink>,
    specs: &[String],
    by: &[String],
    factors: &[String],
    adjustment: CliAdjustment,
    confidence: f64,
    output: Option<&Path>,
) -> Result<()> {
    let table = load_table(data)?;
    let family = match link {
        Some(link) => Family::new(family.into(), link.into())?,
        None => Family::canonical(family.into()),
    };
    let mut spec = ModelSpec::new(outcome, formula, family)?;
    for f in factors {
        spec = spec.with_factor(f);
    }

    let spec_refs: Vec<&str> = specs.iter().map(String::as_str).collect();
    let mut request = EmmeansRequest::new(&spec_refs).level(confidence);
    for b in by {
        request = request.by(b);
    }
    let analysis = Analysis::new(outcome, spec, &spec_refs)
        .emmeans(request)
        .adjustment(adjustment.into())
        .confidence(confidence);

    let report = run_analysis(&table, &analysis.to_config(), &Default::default())?;
    print_report(&report);
    if let Some(dir) = output {
        for path in report.save(dir)? {
            info!("Wrote {:?}", path);
        }
    }
    Ok(())
}

/// Write a synthetic dataset
fn cmd_simulate(preset: CliPreset, seed: u64, output: &Path) -> Result<()> {
    let config = match preset {
        CliPreset::Fraction => SyntheticConfig::fraction(),
        CliPreset::Sholl => SyntheticConfig::sholl(),
        CliPreset::SomaArea => SyntheticConfig::soma_area(),
    }
    .with_seed(seed);
    let data = generate_synthetic(&config)?;
    data.write_csv(output)?;
    eprintln!(
        "Wrote {} rows of '{}' ({}) to {:?}",
        data.table.n_rows(),
        config.outcome,
        config.family,
        output
    );
    Ok(())
}

/// Print or write the example configuration
fn cmd_example(output: Option<&Path>) -> Result<()> {
    let yaml = example_config();
    // Validate before handing it out.
    BatchConfig::from_yaml(yaml)?;
    match output {
        Some(path) => {
            std::fs::write(path, yaml)?;
            eprintln!("Wrote example configuration to {:?}", path);
        }
        None => println!("{}", yaml),
    }
    Ok(())
}

fn print_report(report: &AnalysisReport) {
    println!("== {} ==", report.name);
    println!(
        "{} ~ {} [{}({})]",
        report.model.outcome, report.model.formula, report.model.family, report.model.link
    );
    println!(
        "n = {} (dropped {}), logLik = {:.3}, AIC = {:.2}, BIC = {:.2}, {} = {:.4}",
        report.fit.n_obs,
        report.fit.n_dropped,
        report.fit.log_likelihood,
        report.fit.aic,
        report.fit.bic,
        report.fit.dispersion_name,
        report.fit.dispersion
    );
    for vc in &report.variance_components {
        println!("  random intercept {:<16} sd = {:.4} ({} groups)", vc.group, vc.sd, vc.n_groups);
    }
    if report.fit.singular {
        println!("  (singular fit: a random-intercept SD is at the boundary)");
    }

    println!("\nMarginal means (response scale):");
    for m in &report.means {
        let stratum = m.stratum_label();
        let prefix = if stratum.is_empty() {
            String::new()
        } else {
            format!("[{}] ", stratum)
        };
        println!(
            "  {}{:<24} {:>10.4}  SE {:>8.4}  CI [{:.4}, {:.4}]",
            prefix,
            m.label(),
            m.response,
            m.response_std_error,
            m.response_lower,
            m.response_upper
        );
    }

    println!("\nContrasts ({} adjustment):", report.contrasts.adjustment);
    for c in &report.contrasts.contrasts {
        println!(
            "  {} - {}{}: {:>8.4} (SE {:.4}), z = {:.3}, p = {:.4}, p_adj = {:.4}, d = {:.3}",
            c.minuend,
            c.subtrahend,
            if c.stratum.is_empty() {
                String::new()
            } else {
                format!(" | {}", c.stratum)
            },
            c.estimate,
            c.std_error,
            c.z,
            c.p_value,
            c.p_adjusted,
            c.effect_size
        );
    }
    println!();
}

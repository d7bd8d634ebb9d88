// 🧾 Fiscal Validator CLI
// extract → calculate → reconcile, one subcommand each.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use fiscal_validator::{
    run_filing, write_csv, FilingRequest, InvoiceExtractor, ReconciliationEngine, ValidatorConfig,
};

#[derive(Parser, Debug)]
#[command(name = "fiscal-validator", version, about = "CFDI extraction, monthly ISR and work paper reconciliation")]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// JSON configuration file (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the invoices found in a zip archive
    Extract {
        archive: PathBuf,

        /// Also export the records as CSV
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Compute the month's ISR and write the work paper
    Calculate {
        archive: PathBuf,

        /// Filer RFC (case-insensitive)
        #[arg(long)]
        rfc: String,

        #[arg(long)]
        year: i32,

        #[arg(long)]
        month: u32,

        /// Column header for the computation sheet (default: "<Mes> <año>")
        #[arg(long)]
        label: Option<String>,

        /// Where to write the .xlsx (default: papel_trabajo_<RFC>_<YYYY-MM>.xlsx)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Check a work paper against itself
    Reconcile { workbook: PathBuf },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("❌ {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = ValidatorConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Extract { archive, csv } => run_extract(&config, &archive, csv.as_deref()),
        Commands::Calculate {
            archive,
            rfc,
            year,
            month,
            label,
            output,
        } => run_calculate(&config, &archive, &rfc, year, month, label, output),
        Commands::Reconcile { workbook } => run_reconcile(&config, &workbook),
    }
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read {:?}", path))
}

fn run_extract(config: &ValidatorConfig, archive: &Path, csv: Option<&Path>) -> Result<ExitCode> {
    println!("📦 Extracción de CFDI - {}", archive.display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let bytes = read_input(archive)?;
    let batch = InvoiceExtractor::from_config(config).extract_archive(&bytes)?;

    for record in &batch.records {
        match &record.error {
            None => println!(
                "  ✓ {} | {} → {} | ${} | ISR ret. ${}",
                record.source_name,
                record.issuer_rfc,
                record.receiver_rfc,
                record.subtotal,
                record.withheld_isr
            ),
            Some(cause) => println!("  ✗ {} | {}", record.source_name, cause),
        }
    }

    println!("\n📊 Resumen");
    println!("   Facturas:        {}", batch.document_count());
    println!("   Con error:       {}", batch.error_count());
    println!("   Total facturado: ${}", batch.total_invoiced());
    if let Some(name) = &batch.declared_filer_name {
        println!("   Contribuyente:   {}", name);
    }

    if let Some(path) = csv {
        let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
        write_csv(&batch.records, file)?;
        println!("\n💾 CSV: {}", path.display());
    }

    Ok(ExitCode::SUCCESS)
}

fn run_calculate(
    config: &ValidatorConfig,
    archive: &Path,
    rfc: &str,
    year: i32,
    month: u32,
    label: Option<String>,
    output: Option<PathBuf>,
) -> Result<ExitCode> {
    let mut request = FilingRequest::new(read_input(archive)?, rfc, year, month)?;
    if let Some(label) = label {
        request = request.with_label(label);
    }

    println!("🧮 Cálculo ISR - {} ({})", request.filer_rfc(), request.label());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let outcome = run_filing(&request, config)?;
    let computation = &outcome.computation;

    println!("   Ingresos cobrados del mes: ${}", computation.total_income);
    println!("   Tasa aplicable:            {}%", computation.rate_percent().normalize());
    println!("   Impuesto Causado:          ${}", computation.tax_before_withholding);
    println!("   ISR retenido:              ${}", computation.withheld_isr);
    println!("   Total a pagar:             ${}", computation.net_due);
    if computation.is_favorable() {
        println!("   ℹ️  Saldo a favor");
    }
    if outcome.batch.error_count() > 0 {
        println!("   ⚠️  {} documento(s) con error", outcome.batch.error_count());
    }

    let path = output.unwrap_or_else(|| {
        PathBuf::from(format!(
            "papel_trabajo_{}_{}.xlsx",
            request.filer_rfc(),
            request.period()
        ))
    });
    fs::write(&path, &outcome.work_paper)
        .with_context(|| format!("Failed to write {:?}", path))?;
    println!("\n💾 Papel de trabajo: {}", path.display());

    Ok(ExitCode::SUCCESS)
}

fn run_reconcile(config: &ValidatorConfig, workbook: &Path) -> Result<ExitCode> {
    println!("⚖️  Conciliación - {}", workbook.display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let bytes = read_input(workbook)?;
    let findings = ReconciliationEngine::from_config(config).reconcile(&bytes)?;

    for finding in &findings {
        println!("{} {}. {}", finding.outcome.as_str(), finding.id, finding.label);
        println!("     {}", finding.message);
    }

    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if findings.iter().all(|f| f.is_ok()) {
        println!("🎉 El papel de trabajo es consistente");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("❌ Se encontraron diferencias");
        Ok(ExitCode::from(1))
    }
}

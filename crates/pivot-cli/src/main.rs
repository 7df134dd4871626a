//! Pivot table CLI
//!
//! Command-line tool for building keyword rank pivot tables from monthly
//! search term exports and keeping them up to date.

use clap::{Parser, Subcommand};
use pivot_core::{
    combine_monthly, scan_data_root, Config, MergeReport, ScanResult, TableManager, WideTable,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pivot-cli")]
#[command(about = "Keyword rank pivot table builder", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data root containing <country>/<category>/<file>.csv
    #[arg(long, global = true)]
    data_root: Option<PathBuf>,

    /// Output directory for tables and metadata
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the data root and list countries, categories and files
    Scan {
        /// Show the files of each category
        #[arg(short, long)]
        verbose: bool,
    },

    /// Create a country's table from an anchor file
    Create {
        /// Country name as it appears in the data root
        #[arg(short, long)]
        country: String,

        /// Anchor category
        #[arg(long)]
        category: String,

        /// Anchor file (Search Term plus one column per month)
        #[arg(short, long)]
        anchor: PathBuf,
    },

    /// Add a new category to a table
    AddCategory {
        #[arg(short, long)]
        country: String,

        #[arg(long)]
        category: String,

        /// Monthly files; defaults to the category's files in the data root
        #[arg(short, long)]
        files: Vec<PathBuf>,
    },

    /// Add new months for a category already in the table
    AddMonths {
        #[arg(short, long)]
        country: String,

        #[arg(long)]
        category: String,

        /// Monthly files
        #[arg(short, long, required = true)]
        files: Vec<PathBuf>,
    },

    /// Add every monthly file of a category found in the data root
    Expand {
        #[arg(short, long)]
        country: String,

        #[arg(long)]
        category: String,
    },

    /// Compare the data root with the table and print an update report
    Analyze {
        #[arg(short, long)]
        country: String,

        /// Print the analysis as JSON
        #[arg(long)]
        json: bool,
    },

    /// Merge all new months and categories found in the data root
    Update {
        #[arg(short, long)]
        country: String,

        /// Only show what would be merged
        #[arg(long)]
        dry_run: bool,
    },

    /// Record unmerged files and show processing status
    Status {
        #[arg(short, long)]
        country: String,
    },

    /// Show table dimensions, categories and months
    Info {
        #[arg(short, long)]
        country: String,
    },

    /// Print the table
    Show {
        #[arg(short, long)]
        country: String,

        /// Maximum number of rows to display
        #[arg(short, long)]
        limit: Option<usize>,

        /// Columns to display (comma-separated)
        #[arg(long)]
        columns: Option<String>,
    },

    /// Combine monthly exports into one anchor file
    Combine {
        /// Monthly files; defaults to the category's files in the data root
        #[arg(short, long)]
        files: Vec<PathBuf>,

        /// Country to take files from when none are given
        #[arg(long, requires = "category")]
        country: Option<String>,

        /// Category to take files from when none are given
        #[arg(long, requires = "country")]
        category: Option<String>,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Drop ranks above this value; defaults to the config value
        #[arg(long)]
        max_rank: Option<i64>,
    },

    /// Write a config file template
    InitConfig {
        /// Output path for the config file
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() {
    init_tracing();
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> pivot_core::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(root) = cli.data_root {
        config.data_root = root;
    }
    if let Some(dir) = cli.output_dir {
        config.output_dir = dir;
    }

    match cli.command {
        Commands::Scan { verbose } => cmd_scan(&config, verbose),
        Commands::Create {
            country,
            category,
            anchor,
        } => cmd_create(config, &country, &category, &anchor),
        Commands::AddCategory {
            country,
            category,
            files,
        } => cmd_add_category(config, &country, &category, files),
        Commands::AddMonths {
            country,
            category,
            files,
        } => cmd_add_months(config, &country, &category, &files),
        Commands::Expand { country, category } => cmd_expand(config, &country, &category),
        Commands::Analyze { country, json } => cmd_analyze(config, &country, json),
        Commands::Update { country, dry_run } => cmd_update(config, &country, dry_run),
        Commands::Status { country } => cmd_status(config, &country),
        Commands::Info { country } => cmd_info(config, &country),
        Commands::Show {
            country,
            limit,
            columns,
        } => cmd_show(config, &country, limit, columns),
        Commands::Combine {
            files,
            country,
            category,
            output,
            max_rank,
        } => cmd_combine(&config, files, country.zip(category), &output, max_rank),
        Commands::InitConfig { output } => cmd_init_config(&config, &output),
    }
}

fn scan(config: &Config) -> pivot_core::Result<ScanResult> {
    scan_data_root(&config.data_root)
}

fn print_report(report: &MergeReport) {
    println!("Category: {}", report.category);
    println!("  {} files merged, {} skipped", report.merged_files.len(), report.skipped_files.len());
    for (path, reason) in &report.skipped_files {
        println!("    - {}: {}", path.display(), reason);
    }
    if !report.months_added.is_empty() {
        println!("  Months added: {}", report.months_added.join(", "));
    }
    println!("  Rows added: {}", report.rows_added);
    if report.rows_skipped > 0 {
        println!("  Malformed rows skipped: {}", report.rows_skipped);
    }
    println!("  Table: {} rows x {} columns", report.shape.0, report.shape.1);
}

fn cmd_scan(config: &Config, verbose: bool) -> pivot_core::Result<()> {
    let result = scan(config)?;

    println!("Scanned {}", result.root.display());
    println!(
        "Found {} files in {} countries",
        result.total_files,
        result.countries.len()
    );
    println!();

    for (country, country_scan) in &result.countries {
        println!("{}", country);
        for (category, files) in &country_scan.categories {
            println!("  {} ({} files)", category, files.len());
            if verbose {
                for file in files {
                    println!("    {}", file.display());
                }
            }
        }
    }

    Ok(())
}

fn cmd_create(config: Config, country: &str, category: &str, anchor: &Path) -> pivot_core::Result<()> {
    let mut manager = TableManager::open(config, country)?;
    let report = manager.create_from_anchor(category, anchor)?;
    print_report(&report);
    println!("Saved to {}", manager.table_path().display());
    Ok(())
}

fn cmd_add_category(
    config: Config,
    country: &str,
    category: &str,
    files: Vec<PathBuf>,
) -> pivot_core::Result<()> {
    let files = if files.is_empty() {
        let result = scan(&config)?;
        result
            .find_country(country)
            .ok_or_else(|| pivot_core::Error::CountryNotFound(country.to_string()))?
            .monthly_files(category)
    } else {
        files
    };

    let mut manager = TableManager::open(config, country)?;
    let report = manager.add_category(category, &files)?;
    print_report(&report);
    Ok(())
}

fn cmd_add_months(config: Config, country: &str, category: &str, files: &[PathBuf]) -> pivot_core::Result<()> {
    let mut manager = TableManager::open(config, country)?;
    let report = manager.add_months(category, files)?;
    print_report(&report);
    Ok(())
}

fn cmd_expand(config: Config, country: &str, category: &str) -> pivot_core::Result<()> {
    let result = scan(&config)?;
    let mut manager = TableManager::open(config, country)?;
    let report = manager.expand_months(&result, category)?;
    print_report(&report);
    Ok(())
}

fn cmd_analyze(config: Config, country: &str, json: bool) -> pivot_core::Result<()> {
    let result = scan(&config)?;
    let manager = TableManager::open(config, country)?;
    let report = manager.report(&result)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report.analysis)?);
    } else {
        println!("{}", report);
    }
    Ok(())
}

fn cmd_update(config: Config, country: &str, dry_run: bool) -> pivot_core::Result<()> {
    let result = scan(&config)?;
    let mut manager = TableManager::open(config, country)?;
    let outcome = manager.update(&result, dry_run)?;

    if outcome.dry_run {
        println!("{}", manager.report(&result)?);
        return Ok(());
    }

    if outcome.reports.is_empty() {
        println!("No new data detected, table is current");
    }
    for report in &outcome.reports {
        print_report(report);
        println!();
    }
    for category in &outcome.skipped_categories {
        println!("Skipped new category '{}': no monthly files", category);
    }
    Ok(())
}

fn cmd_status(config: Config, country: &str) -> pivot_core::Result<()> {
    let result = scan(&config)?;
    let mut manager = TableManager::open(config, country)?;
    let status = manager.refresh_status(&result)?;
    let summary = manager.processing_summary();

    println!("Processing status for {}", country);
    println!(
        "  {} of {} categories processed ({:.1}%)",
        summary.processed.len(),
        summary.total_categories,
        summary.completion_percentage
    );
    for name in &summary.processed {
        let record = manager.schema().category(name);
        let files = record.map(|r| r.processed_files.len()).unwrap_or_default();
        let keywords = record.map(|r| r.keyword_count).unwrap_or_default();
        println!("  [processed] {} ({} files, {} keywords)", name, files, keywords);
    }
    for name in &summary.pending {
        println!("  [pending]   {}", name);
    }

    if !status.pending_files.is_empty() {
        println!();
        println!("Files not yet merged:");
        for (category, files) in &status.pending_files {
            println!("  {} ({} files)", category, files.len());
            for file in files {
                println!("    {}", file);
            }
        }
    }
    if !status.new_categories.is_empty() {
        println!();
        println!("Categories not in the table: {}", status.new_categories.join(", "));
    }
    Ok(())
}

fn cmd_info(config: Config, country: &str) -> pivot_core::Result<()> {
    let manager = TableManager::open(config, country)?;
    println!("{}", manager.info());
    Ok(())
}

fn cmd_show(
    config: Config,
    country: &str,
    limit: Option<usize>,
    columns: Option<String>,
) -> pivot_core::Result<()> {
    let manager = TableManager::open(config, country)?;
    let table: &WideTable = manager
        .table()
        .ok_or_else(|| pivot_core::Error::TableMissing(country.to_string()))?;

    // Filter columns if requested
    let col_filter: Option<Vec<&str>> = columns.as_ref().map(|c| c.split(',').collect());
    let display_cols: Vec<usize> = table
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, name)| {
            col_filter
                .as_ref()
                .map_or(true, |f| f.contains(&name.as_str()))
        })
        .map(|(i, _)| i)
        .collect();

    // Print header
    let mut header = vec!["Search Term"];
    header.extend(display_cols.iter().map(|&i| table.columns()[i].as_str()));
    println!("{}", header.join("\t"));
    println!("{}", "-".repeat(header.len() * 12));

    // Print rows
    let row_limit = limit.unwrap_or(table.row_count());
    for row in table.rows().iter().take(row_limit) {
        let mut values = vec![row.term.clone()];
        values.extend(
            display_cols
                .iter()
                .map(|&i| row.get(i).map(|v| v.to_string()).unwrap_or_default()),
        );
        println!("{}", values.join("\t"));
    }

    if table.row_count() > row_limit {
        println!("... ({} more rows)", table.row_count() - row_limit);
    }

    Ok(())
}

fn cmd_combine(
    config: &Config,
    files: Vec<PathBuf>,
    source: Option<(String, String)>,
    output: &Path,
    max_rank: Option<i64>,
) -> pivot_core::Result<()> {
    let files = match source {
        Some((country, category)) if files.is_empty() => {
            let result = scan(config)?;
            result
                .find_country(&country)
                .ok_or(pivot_core::Error::CountryNotFound(country))?
                .monthly_files(&category)
        }
        _ => files,
    };
    if files.is_empty() {
        println!("No monthly files given");
        return Ok(());
    }

    let max_rank = max_rank.unwrap_or(config.max_rank);
    let Some(combined) = combine_monthly(&files, max_rank) else {
        println!("No usable monthly files among {} given", files.len());
        return Ok(());
    };

    for month in &combined.months {
        println!(
            "  {}: {} terms ({} above rank {} removed)",
            month.month, month.terms, month.filtered, max_rank
        );
    }
    for (path, reason) in &combined.skipped {
        println!("  skipped {}: {}", path.display(), reason);
    }

    combined.save(output)?;
    println!(
        "Combined {} months into {} ({} terms, base month {})",
        combined.months.len(),
        output.display(),
        combined.table.row_count(),
        combined.base_month
    );
    Ok(())
}

fn cmd_init_config(config: &Config, output: &Path) -> pivot_core::Result<()> {
    config.save(output)?;
    println!("Created config file: {}", output.display());
    println!();
    println!("Edit the file to point at your data, then run:");
    println!("  pivot-cli --config {} scan", output.display());
    Ok(())
}

// Entry point and high-level CLI flow.
//
// `fleet_report report` runs the selected dataset reports and exports them.
// Without a subcommand the tool falls back to a small interactive menu:
// - Option [1] loads every dataset and prints load diagnostics.
// - Option [2] generates all reports, the CSV tables and a JSON summary.
use clap::{Parser, Subcommand};
use fleet_report::config::{Config, DatasetKind, EmissionColumn};
use fleet_report::{loader, output, reports, util};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "fleet_report")]
#[command(about = "Descriptive statistics and rankings for vehicle fleet datasets", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory holding the dataset CSV files
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Directory for exported CSV tables and summary.json
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Rows shown per table on the console
    #[arg(long)]
    preview_rows: Option<usize>,

    /// Debug logging (RUST_LOG still wins when set)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate reports for one or more datasets
    Report {
        /// Datasets to report on (default: all)
        #[arg(long, value_enum)]
        dataset: Vec<DatasetKind>,

        /// Emission column used by the regional make ranking
        #[arg(long, value_enum)]
        emission: Option<EmissionColumn>,

        /// Make analysed in the regional fleet scenario
        #[arg(long)]
        make: Option<String>,

        /// Vehicles in the regional fleet scenario
        #[arg(long)]
        fleet_size: Option<u32>,

        /// Average daily distance per vehicle (km)
        #[arg(long)]
        daily_km: Option<f64>,

        /// Print only; do not write CSV/JSON files
        #[arg(long)]
        no_export: bool,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn load_config(cli: &Cli) -> fleet_report::Result<Config> {
    let mut cfg = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(d) = &cli.data_dir {
        cfg.data_dir = d.clone();
    }
    if let Some(d) = &cli.output_dir {
        cfg.output_dir = d.clone();
    }
    if let Some(n) = cli.preview_rows {
        cfg.preview_rows = n;
    }
    Ok(cfg)
}

/// Read a single line of input after printing the common "Enter choice:" prompt.
fn read_choice() -> Option<String> {
    print!("Enter choice: ");
    let _ = io::stdout().flush();
    let mut buf = String::new();
    match io::stdin().read_line(&mut buf) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(buf.trim().to_string()),
    }
}

/// Ask whether to go back to the menu after generating reports.
fn prompt_back_to_menu() -> bool {
    loop {
        print!("Back to Report Selection (Y/N): ");
        let _ = io::stdout().flush();
        let mut buf = String::new();
        if matches!(io::stdin().read_line(&mut buf), Ok(0) | Err(_)) {
            return false;
        }
        match buf.trim().to_uppercase().as_str() {
            "Y" => return true,
            "N" => return false,
            _ => println!("Invalid choice. Please enter Y or N."),
        }
    }
}

/// Handle option [1]: load every dataset into the cache and report what
/// happened. Later report runs reuse the cached copies.
fn handle_load(cfg: &Config) {
    for kind in DatasetKind::ALL {
        let path = cfg.dataset_path(kind);
        match loader::load_cached(
            kind.name(),
            &path,
            cfg.source(kind),
            reports::expected_columns(kind),
        ) {
            Ok((_, load_report)) => {
                println!(
                    "{}: {} rows loaded ({} skipped due to parse errors)",
                    kind.name(),
                    util::format_int(load_report.loaded_rows),
                    util::format_int(load_report.parse_errors)
                );
                if !load_report.missing_columns.is_empty() {
                    println!(
                        "  missing columns: {}",
                        load_report.missing_columns.join(", ")
                    );
                }
            }
            Err(e) => println!("{}: unavailable ({})", kind.name(), e),
        }
    }
    println!();
}

/// Handle option [2] and the `report` subcommand: run reports, print
/// previews and, unless disabled, export tables plus `summary.json`.
fn handle_generate_reports(cfg: &Config, kinds: &[DatasetKind], export: bool) -> fleet_report::Result<()> {
    println!("Generating reports...\n");
    let results = reports::run_all(kinds, cfg);
    for r in &results {
        output::print_report(r, cfg.preview_rows);
    }
    output::preview_table_rows(&output::status_rows(&results), results.len());

    if !export {
        return Ok(());
    }
    for r in results.iter().filter(|r| r.is_available()) {
        let written = output::write_report(&cfg.output_dir, r)?;
        log::info!("{}: wrote {} tables", r.dataset, written.len());
    }
    let summary = reports::generate_summary(&results);
    let path = cfg.output_dir.join("summary.json");
    output::write_json(&path, &summary)?;
    println!(
        "Outputs saved to {} ({} datasets available, {} unavailable)\n",
        cfg.output_dir.display(),
        summary.datasets_available,
        summary.datasets_unavailable
    );
    Ok(())
}

fn run_menu(cfg: &Config) -> fleet_report::Result<()> {
    loop {
        println!("Fleet Report");
        println!("[1] Load the datasets");
        println!("[2] Generate Reports\n");
        let Some(choice) = read_choice() else {
            return Ok(());
        };
        match choice.as_str() {
            "1" => handle_load(cfg),
            "2" => {
                println!();
                if let Err(e) = handle_generate_reports(cfg, &DatasetKind::ALL, true) {
                    eprintln!("Write error: {}", e);
                }
                if !prompt_back_to_menu() {
                    println!("Exiting the program.");
                    return Ok(());
                }
            }
            _ => println!("Invalid choice. Please enter 1 or 2.\n"),
        }
    }
}

fn run(cli: Cli) -> fleet_report::Result<()> {
    let mut cfg = load_config(&cli)?;
    match cli.command {
        None => run_menu(&cfg),
        Some(Commands::Report {
            dataset,
            emission,
            make,
            fleet_size,
            daily_km,
            no_export,
        }) => {
            if let Some(e) = emission {
                cfg.regional.emission_column = e;
            }
            if make.is_some() {
                cfg.regional.make = make;
            }
            if let Some(n) = fleet_size {
                cfg.regional.fleet_size = n;
            }
            if let Some(km) = daily_km {
                cfg.regional.daily_km = km;
            }
            cfg.validate()?;
            let kinds = if dataset.is_empty() {
                DatasetKind::ALL.to_vec()
            } else {
                dataset
            };
            handle_generate_reports(&cfg, &kinds, !no_export)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

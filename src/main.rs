use std::{fs, path::Path};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use hazardwatch::{
    config::load_config,
    core::{
        alert::{AlertDirective, AlertSeverity},
        ids::forecast_run_id,
        output::{write_assessment, write_forecasts, OutputFormat},
        store::Store,
        time::{now_utc, parse_window},
        types::ForecastResult,
    },
    pipeline::{
        cluster::{detect_cluster, ClusterOutcome},
        forecast::{
            run_all, run_drought_forecast, run_flood_forecast, run_heat_wave_forecast,
            run_monthly_rainfall_forecast, run_rainy_season_anomaly, run_seasonal_outlook,
            run_seasonal_rain_check, RunReport,
        },
        hotspots::build_hotspots,
        scorer::{attach_near_term_flood, score_incident},
    },
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "hazardwatch",
    about = "Season-aware disaster risk scoring and forecasting"
)]
struct Cli {
    /// Path to config file (TOML). Default: config/hazardwatch.toml
    #[arg(long)]
    config: Option<String>,
    /// SQLite path override
    #[arg(long)]
    db_path: Option<String>,
    /// Increase verbosity (info, debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Optional log file path
    #[arg(long, default_value = "data/hazardwatch.log")]
    log_file: String,
    /// Output format for results
    #[arg(long, default_value = "jsonl", value_enum)]
    format: FormatArg,
    /// Optional output file path
    #[arg(long)]
    output: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Score one incident and persist a fresh assessment
    Score {
        incident_id: String,
        /// Also attach the near-term flood probability driver
        #[arg(long)]
        near_term: bool,
    },
    /// Run cluster detection for a scored incident
    Cluster {
        incident_id: String,
        /// Neighborhood radius in kilometres
        #[arg(long)]
        radius_km: Option<f64>,
    },
    /// Rebuild the density hotspots for a trailing window
    Hotspots {
        /// Window tag (7d or 30d)
        #[arg(long, default_value = "7d")]
        window: String,
        #[arg(long)]
        radius_km: Option<f64>,
    },
    /// Run one forecast generator, or all of them
    Forecast {
        #[arg(value_enum, default_value = "all")]
        hazard: HazardArg,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum HazardArg {
    All,
    Flood,
    Drought,
    HeatWave,
    SeasonalRainCheck,
    MonthlyRainfallTrend,
    RainySeasonAnomaly,
    SeasonalOutlook,
}

#[derive(ValueEnum, Clone, Debug)]
enum FormatArg {
    Jsonl,
    Md,
}

impl From<FormatArg> for OutputFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Jsonl => OutputFormat::Jsonl,
            FormatArg::Md => OutputFormat::Markdown,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    let mut cfg = load_config(cli.config.as_deref())?;
    if let Some(db_path) = &cli.db_path {
        cfg.db_path = db_path.clone();
    }
    let mut store = Store::new(Path::new(&cfg.db_path))?;
    let now = now_utc();
    let format: OutputFormat = cli.format.clone().into();

    match &cli.command {
        Command::Score { incident_id, near_term } => {
            let report = score_incident(&mut store, &cfg, incident_id, now)?;
            if let Some(alert) = &report.alert {
                log_alert(alert);
            }
            if *near_term {
                match attach_near_term_flood(&mut store, incident_id)? {
                    Some(p) => tracing::info!(incident = incident_id, p, "near-term flood probability"),
                    None => tracing::info!(
                        incident = incident_id,
                        "near-term flood probability unavailable (missing features)"
                    ),
                }
            }
            let assessment = store
                .latest_assessment(incident_id)?
                .ok_or_else(|| anyhow!("assessment vanished for {incident_id}"))?;
            match &cli.output {
                Some(path) => write_assessment(&assessment, format, Path::new(path))?,
                None => println!("{}", serde_json::to_string_pretty(&assessment)?),
            }
        }
        Command::Cluster { incident_id, radius_km } => {
            let radius = radius_km.unwrap_or(cfg.cluster_radius_km);
            match detect_cluster(&mut store, incident_id, radius, now)? {
                ClusterOutcome::NoCluster { neighbor_count } => {
                    println!("no cluster ({neighbor_count} neighbors within {radius} km)");
                }
                ClusterOutcome::AlreadyApplied { key, neighbor_count } => {
                    println!("already applied ({neighbor_count} neighbors, key {key})");
                }
                ClusterOutcome::Applied { assessment, alert, neighbor_count, adjustment } => {
                    log_alert(&alert);
                    println!(
                        "escalated to {:.1} (+{adjustment:.0}, {neighbor_count} neighbors)",
                        assessment.risk_score
                    );
                }
            }
        }
        Command::Hotspots { window, radius_km } => {
            let duration = parse_window(window)?;
            let radius = radius_km.unwrap_or(cfg.hotspot_radius_km);
            let hotspots =
                build_hotspots(&mut store, duration.num_days() as u32, radius, now)?;
            println!("{}", serde_json::to_string_pretty(&hotspots)?);
        }
        Command::Forecast { hazard } => {
            let reports = match hazard {
                HazardArg::All => run_all(&mut store, &cfg, now)?,
                HazardArg::Flood => vec![run_flood_forecast(&mut store, &cfg, now)?],
                HazardArg::Drought => vec![run_drought_forecast(&mut store, &cfg, now)?],
                HazardArg::HeatWave => vec![run_heat_wave_forecast(&mut store, &cfg, now)?],
                HazardArg::SeasonalRainCheck => {
                    vec![run_seasonal_rain_check(&mut store, &cfg, now)?]
                }
                HazardArg::MonthlyRainfallTrend => {
                    vec![run_monthly_rainfall_forecast(&mut store, &cfg, now)?]
                }
                HazardArg::RainySeasonAnomaly => {
                    vec![run_rainy_season_anomaly(&mut store, &cfg, now)?]
                }
                HazardArg::SeasonalOutlook => vec![run_seasonal_outlook(&mut store, &cfg, now)?],
            };

            let mut results: Vec<ForecastResult> = Vec::new();
            for report in &reports {
                report_run(report, now);
                results.extend(report.results.iter().cloned());
            }
            if let Some(path) = &cli.output {
                write_forecasts(&results, format, Path::new(path), now)?;
            }
        }
    }
    Ok(())
}

fn report_run(report: &RunReport, now: chrono::DateTime<chrono::Utc>) {
    let run_id = forecast_run_id(&report.model, &now.to_rfc3339());
    tracing::info!(model = %report.model, %run_id, status = %report.status, "forecast run");
    println!("{}: {}", report.model, report.status);
    for alert in &report.alerts {
        log_alert(alert);
    }
}

fn log_alert(alert: &AlertDirective) {
    match alert.severity {
        AlertSeverity::Critical => {
            tracing::error!(title = %alert.title, recipients = ?alert.recipients, "{}", alert.message)
        }
        AlertSeverity::Warning => {
            tracing::warn!(title = %alert.title, recipients = ?alert.recipients, "{}", alert.message)
        }
        AlertSeverity::Info => {
            tracing::info!(title = %alert.title, recipients = ?alert.recipients, "{}", alert.message)
        }
    }
}

fn init_tracing(cli: &Cli) -> Result<()> {
    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let log_path = Path::new(&cli.log_file);
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)?;
    }
    if log_path.exists() {
        if let Ok(meta) = fs::metadata(log_path) {
            if meta.len() > 1_000_000 {
                let rotated = log_path.with_extension("log.1");
                let _ = fs::rename(log_path, rotated);
            }
        }
    }
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;

    let file_layer = fmt::layer()
        .with_writer(file)
        .with_ansi(false)
        .with_target(false);

    let stdout_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .map_err(|e| anyhow!("tracing init failed: {e}"))?;
    Ok(())
}

/// Command-line front end: wire the configuration, database and artifact store together
/// and run one operation per invocation
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use aurora_air::config::AppConfig;
use aurora_air::features::Feature;
use aurora_air::models::TrainedModel;
use aurora_air::plot::{plot_comparison, plot_importances};
use aurora_air::users::Registration;
use aurora_air::{AirQualityService, AqiError, ModelFamily};

#[derive(Parser)]
#[command(name = "aurora-air")]
#[command(about = "Train AQI regression models and predict air quality from sensor readings")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "AURORA_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Directory holding the database and models (overrides the configuration)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and the default administrator
    Init,

    /// Register a user account
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        mobile: String,
        #[arg(long, env = "AURORA_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Load observations from a CSV file with the eight readings and AQI
    Upload {
        csv: PathBuf,
        /// Email of the uploading account
        #[arg(long)]
        by: Option<String>,
    },

    /// Retrain all three models on every stored observation
    Train,

    /// Predict AQI for one set of readings
    Predict {
        /// Linear Regression, Random Forest or XGBoost
        #[arg(short, long, default_value = "XGBoost")]
        model: String,
        /// Email of the requesting account
        #[arg(long)]
        user: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        temperature: Option<String>,
        #[arg(long)]
        humidity: Option<String>,
        #[arg(long = "pm2_5", alias = "pm25")]
        pm2_5: Option<String>,
        #[arg(long)]
        pm10: Option<String>,
        #[arg(long)]
        co: Option<String>,
        #[arg(long)]
        no2: Option<String>,
        #[arg(long)]
        so2: Option<String>,
        #[arg(long)]
        o3: Option<String>,
    },

    /// Show the latest metrics of each model and the best one
    Compare {
        /// Write an R² / RMSE chart to this PNG file
        #[arg(long)]
        chart: Option<PathBuf>,
    },

    /// List recent predictions
    History {
        /// Only predictions made by this account
        #[arg(long)]
        user: Option<String>,
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Dataset statistics, correlations and feature importances
    Insights {
        /// Write importance and coefficient charts into this directory
        #[arg(long)]
        plot_dir: Option<PathBuf>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Defaults, then the file, then `AURORA_*` variables, then flags.
fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = AppConfig::load(cli.config.as_deref())?;
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

fn user_id(service: &AirQualityService, email: Option<&str>) -> Result<Option<i64>> {
    let Some(email) = email else {
        return Ok(None);
    };
    let user = service
        .database()
        .find_user_by_email(&email.trim().to_lowercase())?
        .with_context(|| format!("no account with email {}", email))?;
    Ok(Some(user.id))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// run one subcommand
/// input: parsed command line
/// output: none (prints results to stdout, charts to the requested paths)
/// logic: load the configuration; open the service; dispatch on the subcommand
fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let mut service = AirQualityService::open(&config)
        .with_context(|| format!("opening data directory {}", config.data_dir.display()))?;

    match cli.command {
        Commands::Init => {
            let created = service.seed_admin(&config.admin)?;
            println!("Database ready at {}", config.database_path().display());
            if created {
                println!("Created administrator {}", config.admin.email);
            }
        }

        Commands::Register {
            name,
            email,
            mobile,
            password,
        } => {
            let user = service.register_user(Registration {
                name,
                email,
                mobile,
                password,
                confirm_password: None,
            })?;
            println!("Registered {} <{}> (id {})", user.name, user.email, user.id);
        }

        Commands::Upload { csv, by } => {
            let uploader = user_id(&service, by.as_deref())?;
            let file = File::open(&csv).with_context(|| format!("opening {}", csv.display()))?;
            let report = service.upload_dataset(file, uploader)?;
            if cli.json {
                print_json(&report)?;
            } else {
                println!(
                    "Inserted {} records ({} dropped, {} malformed)",
                    report.inserted, report.dropped, report.skipped
                );
            }
        }

        Commands::Train => {
            let report = service.train_all_models()?;
            if cli.json {
                print_json(&report)?;
            } else {
                println!(
                    "Trained on {} rows ({} train / {} test)",
                    report.total_rows, report.train_rows, report.test_rows
                );
                for m in &report.models {
                    println!("\n{} (generation {})\n{}", m.model, m.generation, m.scores);
                }
            }
        }

        Commands::Predict {
            model,
            user,
            temperature,
            humidity,
            pm2_5,
            pm10,
            co,
            no2,
            so2,
            o3,
        } => {
            let uid = user_id(&service, user.as_deref())?;
            let readings: Vec<(&str, String)> = Feature::ALL
                .iter()
                .map(|f| f.name())
                .zip([temperature, humidity, pm2_5, pm10, co, no2, so2, o3])
                .filter_map(|(name, value)| value.map(|v| (name, v)))
                .collect();
            let outcome = service.predict(uid, &model, readings)?;
            if cli.json {
                print_json(&outcome)?;
            } else {
                println!("Predicted AQI: {:.2} ({})", outcome.aqi, outcome.model);
                println!("Category: {} [{}]", outcome.category, outcome.color);
                println!("{}", outcome.message);
            }
        }

        Commands::Compare { chart } => {
            let comparison = service.compare()?;
            let best = service.best_model()?;
            if cli.json {
                print_json(&serde_json::json!({
                    "comparison": comparison,
                    "best_model": best.as_ref().map(|(name, _)| name),
                }))?;
            } else if comparison.is_empty() {
                println!("No metrics yet. Train the models first.");
            } else {
                println!("{:<20} {:>10} {:>10} {:>10} {:>8}", "Model", "MAE", "MSE", "RMSE", "R²");
                for i in 0..comparison.models.len() {
                    println!(
                        "{:<20} {:>10.4} {:>10.4} {:>10.4} {:>8.4}",
                        comparison.models[i],
                        comparison.mae[i],
                        comparison.mse[i],
                        comparison.rmse[i],
                        comparison.r2[i]
                    );
                }
                if let Some((name, metrics)) = &best {
                    println!("\nBest model: {} (R² {:.4})", name, metrics.r2);
                }
            }
            if let Some(path) = chart {
                if !comparison.is_empty() {
                    plot_comparison(&path, &comparison).map_err(|e| anyhow::anyhow!(e))?;
                    println!("Wrote {}", path.display());
                }
            }
        }

        Commands::History { user, limit } => {
            let uid = user_id(&service, user.as_deref())?;
            let rows = service.recent_predictions(uid, limit)?;
            if cli.json {
                let rows: Vec<_> = rows
                    .iter()
                    .map(|r| {
                        serde_json::json!({
                            "id": r.id,
                            "user": r.user_email,
                            "model": r.model_used,
                            "aqi": r.predicted_aqi,
                            "category": r.category,
                            "created_at": r.created_at,
                        })
                    })
                    .collect();
                print_json(&rows)?;
            } else {
                for r in &rows {
                    println!(
                        "{}  {:<18} {:>8.2}  {:<30} {}",
                        r.created_at.format("%Y-%m-%d %H:%M:%S"),
                        r.model_used,
                        r.predicted_aqi,
                        r.category,
                        r.user_email.as_deref().unwrap_or("-")
                    );
                }
            }
        }

        Commands::Insights { plot_dir } => {
            let insights = service.insights()?;
            if cli.json {
                print_json(&insights)?;
            } else if !insights.has_data() {
                println!("No data uploaded yet.");
            } else {
                println!("{} observations\n", insights.observations);
                println!("{:<12} {:>10} {:>10} {:>10} {:>10}", "Feature", "Mean", "Std", "Min", "Max");
                for s in &insights.feature_stats {
                    println!(
                        "{:<12} {:>10.3} {:>10.3} {:>10.3} {:>10.3}",
                        s.feature.label(),
                        s.mean,
                        s.std,
                        s.min,
                        s.max
                    );
                }
                println!("\nAQI distribution:");
                for (category, count) in &insights.aqi_distribution {
                    println!("  {:<32} {}", category.label(), count);
                }
            }
            if let Some(dir) = plot_dir {
                write_insight_charts(&service, &dir, &insights)?;
            }
        }
    }
    Ok(())
}

/// Importance charts for the tree models and a coefficient chart for the linear model
fn write_insight_charts(
    service: &AirQualityService,
    dir: &Path,
    insights: &aurora_air::insights::Insights,
) -> Result<()> {
    fs::create_dir_all(dir)?;
    let label = |ranked: &[(Feature, f64)]| -> Vec<(String, f64)> {
        ranked.iter().map(|(f, v)| (f.label().to_string(), *v)).collect()
    };
    let charts = [
        ("rf_importance.png", "Random Forest Feature Importances", insights.rf_importance.as_deref()),
        ("xgb_importance.png", "XGBoost Feature Importances", insights.xgb_importance.as_deref()),
    ];
    for (file, caption, ranked) in charts {
        if let Some(ranked) = ranked {
            let path = dir.join(file);
            plot_importances(&path, caption, &label(ranked)).map_err(|e| anyhow::anyhow!(e))?;
            println!("Wrote {}", path.display());
        }
    }

    if service.artifacts().has_model(ModelFamily::Linear) {
        if let TrainedModel::Linear(linear) = service.artifacts().load_model(ModelFamily::Linear)?.payload {
            let path = dir.join("linear_coefficients.png");
            plot_importances(&path, "Linear Regression Coefficients", &linear.coefficient_ranking())
                .map_err(|e| anyhow::anyhow!(e))?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    init_tracing();
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<AqiError>() {
                Some(aqi) => eprintln!("error: {}", aqi.user_message()),
                None => eprintln!("error: {:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

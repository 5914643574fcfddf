use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use genchart::callback::CallbackRegistry;
use genchart::data::MeasureStore;
use genchart::ir::{ChartConfig, QueryConfig, RenderType};
use genchart::timechart::{TimeChartConfig, TimeChartResponse};
use genchart::{render_generic_chart, render_time_chart, RenderOptions};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "genchart")]
#[command(about = "Build chart render configurations from saved chart configs and query results", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a generic chart (bar, box, pie, scatter, line)
    Render {
        /// Saved chart config JSON
        #[arg(long)]
        config: PathBuf,
        /// Query response JSON, or a CSV file
        #[arg(long)]
        data: PathBuf,
        /// Override the saved render type (e.g. bar_chart)
        #[arg(long = "type")]
        render_type: Option<RenderType>,
        #[arg(long)]
        max_charts: Option<usize>,
        /// Query name used as the x label of box plots without an x measure
        #[arg(long, default_value = "query")]
        query_name: String,
        /// Turn an empty response into a warning instead of an error
        #[arg(long)]
        include_filter_msg: bool,
        #[arg(long)]
        default_number_format: Option<String>,
    },
    /// Render a time chart from individual and/or aggregate responses
    TimeChart {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        individual: Option<PathBuf>,
        #[arg(long)]
        aggregate: Option<PathBuf>,
        #[arg(long)]
        max_charts: Option<usize>,
    },
    /// Print the reusable script snippet for a chart
    Export {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        query: PathBuf,
    },
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

fn read_store(path: &Path) -> Result<MeasureStore> {
    let is_csv = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if is_csv {
        let file = fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        return MeasureStore::from_csv(file).with_context(|| format!("Failed to read CSV {}", path.display()));
    }
    let value: Value = read_json(path)?;
    MeasureStore::from_json(&value).with_context(|| format!("Invalid query response in {}", path.display()))
}

fn read_response(path: Option<&PathBuf>) -> Result<Option<TimeChartResponse>> {
    path.map(|p| {
        let value: Value = read_json(p)?;
        TimeChartResponse::from_json(&value).with_context(|| format!("Invalid time chart response in {}", p.display()))
    })
    .transpose()
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{}", text).context("Failed to write to stdout")?;
    handle.flush().context("Failed to flush stdout")?;
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let callbacks = CallbackRegistry::new();

    match args.command {
        Command::Render {
            config,
            data,
            render_type,
            max_charts,
            query_name,
            include_filter_msg,
            default_number_format,
        } => {
            let mut chart: ChartConfig = read_json(&config)?;
            if let Some(render_type) = render_type {
                chart.render_type = render_type;
            }
            let store = read_store(&data)?;
            let mut options = RenderOptions { include_filter_msg, default_number_format, ..Default::default() };
            if let Some(max) = max_charts {
                options.defaults.max_charts = max;
            }
            let outcome = render_generic_chart(&chart, &query_name, store, &options, &callbacks)?;
            print_json(&outcome)
        }
        Command::TimeChart { config, individual, aggregate, max_charts } => {
            let chart: TimeChartConfig = read_json(&config)?;
            let mut options = RenderOptions::default();
            if let Some(max) = max_charts {
                options.defaults.max_charts = max;
            }
            let outcome = render_time_chart(
                &chart,
                read_response(individual.as_ref())?,
                read_response(aggregate.as_ref())?,
                &options,
                &callbacks,
            )?;
            print_json(&outcome)
        }
        Command::Export { config, query } => {
            let chart: ChartConfig = read_json(&config)?;
            let query: QueryConfig = read_json(&query)?;
            print_json(&genchart::export::export_script(&chart, &query)?)
        }
    }
}

use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::process::ExitCode;
use tokio::net::TcpListener;

use crate::core::{
    AdminFee, MonthRecord, Projection, ProjectionSummary, ProjectionWarning, SimulationConfig,
    monthly_rate_from_annual, simulate, summarize,
};

const DISTRIBUTION_TOTAL_PCT: f64 = 100.0;
const DISTRIBUTION_TOLERANCE_PCT: f64 = 1e-9;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliAdminFeeType {
    Percentage,
    Fixed,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiAdminFeeType {
    #[serde(alias = "porcentual", alias = "pct")]
    Percentage,
    #[serde(alias = "fija", alias = "fija-mensual", alias = "fixedMonthly")]
    Fixed,
}

impl From<ApiAdminFeeType> for CliAdminFeeType {
    fn from(value: ApiAdminFeeType) -> Self {
        match value {
            ApiAdminFeeType::Percentage => CliAdminFeeType::Percentage,
            ApiAdminFeeType::Fixed => CliAdminFeeType::Fixed,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    num_users: Option<u32>,
    monthly_contribution: Option<f64>,

    admin_fee_type: Option<ApiAdminFeeType>,
    admin_fee_pct: Option<f64>,
    admin_fee_fixed: Option<f64>,

    utilization_rate: Option<f64>,
    default_rate: Option<f64>,

    nucleus_annual_rate: Option<f64>,
    fic_annual_rate: Option<f64>,

    fee_dist: Option<f64>,
    nucleus_dist: Option<f64>,
    fic_dist: Option<f64>,

    duration_months: Option<u32>,
}

#[derive(Parser, Debug)]
#[command(
    name = "sidepe",
    about = "Month-by-month projection of a pooled savings scheme (stability fund + nucleus + FIC)"
)]
struct Cli {
    #[arg(long, default_value_t = 100, help = "Number of savers in the pool")]
    num_users: u32,
    #[arg(
        long,
        default_value_t = 400.0,
        help = "Contribution per saver per month"
    )]
    monthly_contribution: f64,
    #[arg(long, value_enum, default_value_t = CliAdminFeeType::Percentage)]
    admin_fee_type: CliAdminFeeType,
    #[arg(
        long,
        default_value_t = 2.5,
        help = "Annual administration fee in percent, used when --admin-fee-type=percentage"
    )]
    admin_fee_pct: f64,
    #[arg(
        long,
        default_value_t = 500_000.0,
        help = "Fixed monthly administration cost, used when --admin-fee-type=fixed"
    )]
    admin_fee_fixed: f64,
    #[arg(
        long,
        default_value_t = 65.0,
        help = "Share of nucleus capital actually lent out, in percent"
    )]
    utilization_rate: f64,
    #[arg(
        long,
        default_value_t = 8.0,
        help = "Share of nucleus earnings lost to delinquency, in percent"
    )]
    default_rate: f64,
    #[arg(
        long,
        default_value_t = 42.6,
        help = "Gross annual return of the nucleus in percent (GAT)"
    )]
    nucleus_annual_rate: f64,
    #[arg(
        long,
        default_value_t = 14.0,
        help = "Gross annual return of the FIC fund in percent"
    )]
    fic_annual_rate: f64,
    #[arg(
        long,
        default_value_t = 10.0,
        help = "Percent of each contribution sent to the stability fund"
    )]
    fee_dist: f64,
    #[arg(
        long,
        default_value_t = 80.0,
        help = "Percent of each contribution sent to the nucleus"
    )]
    nucleus_dist: f64,
    #[arg(
        long,
        default_value_t = 10.0,
        help = "Percent of each contribution sent to the FIC fund"
    )]
    fic_dist: f64,
    #[arg(long, default_value_t = SimulationConfig::DEFAULT_DURATION_MONTHS)]
    duration_months: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse<'a> {
    duration_months: u32,
    group_contribution: f64,
    summary: Option<ProjectionSummary>,
    records: &'a [MonthRecord],
    warnings: &'a [ProjectionWarning],
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn build_config(cli: Cli) -> Result<SimulationConfig, String> {
    if cli.num_users == 0 {
        return Err("--num-users must be > 0".to_string());
    }

    if !cli.monthly_contribution.is_finite() || cli.monthly_contribution <= 0.0 {
        return Err("--monthly-contribution must be > 0".to_string());
    }

    if cli.duration_months == 0 {
        return Err("--duration-months must be > 0".to_string());
    }

    for (name, pct) in [
        ("--utilization-rate", cli.utilization_rate),
        ("--default-rate", cli.default_rate),
        ("--fee-dist", cli.fee_dist),
        ("--nucleus-dist", cli.nucleus_dist),
        ("--fic-dist", cli.fic_dist),
    ] {
        if !(0.0..=100.0).contains(&pct) {
            return Err(format!("{name} must be between 0 and 100"));
        }
    }

    for (name, pct) in [
        ("--nucleus-annual-rate", cli.nucleus_annual_rate),
        ("--fic-annual-rate", cli.fic_annual_rate),
    ] {
        if !pct.is_finite() || pct < 0.0 {
            return Err(format!("{name} must be >= 0"));
        }
    }

    let dist_total = cli.fee_dist + cli.nucleus_dist + cli.fic_dist;
    if (dist_total - DISTRIBUTION_TOTAL_PCT).abs() > DISTRIBUTION_TOLERANCE_PCT {
        return Err(format!(
            "--fee-dist + --nucleus-dist + --fic-dist must equal 100, got {dist_total}"
        ));
    }

    let admin_fee = match cli.admin_fee_type {
        CliAdminFeeType::Percentage => {
            if !(0.0..=100.0).contains(&cli.admin_fee_pct) {
                return Err("--admin-fee-pct must be between 0 and 100".to_string());
            }
            AdminFee::Percentage {
                annual_pct: cli.admin_fee_pct,
            }
        }
        CliAdminFeeType::Fixed => {
            if !cli.admin_fee_fixed.is_finite() || cli.admin_fee_fixed < 0.0 {
                return Err("--admin-fee-fixed must be >= 0".to_string());
            }
            AdminFee::Fixed {
                monthly_amount: cli.admin_fee_fixed,
            }
        }
    };

    Ok(SimulationConfig {
        num_users: cli.num_users,
        monthly_contribution: cli.monthly_contribution,
        utilization_rate: cli.utilization_rate / 100.0,
        default_rate: cli.default_rate / 100.0,
        admin_fee,
        nucleus_monthly_rate: monthly_rate_from_annual(cli.nucleus_annual_rate / 100.0),
        fic_monthly_rate: monthly_rate_from_annual(cli.fic_annual_rate / 100.0),
        fee_dist: cli.fee_dist / 100.0,
        nucleus_dist: cli.nucleus_dist / 100.0,
        fic_dist: cli.fic_dist / 100.0,
        duration_months: cli.duration_months,
    })
}

/// Parses command-line flags, runs one projection and prints the report.
pub fn run_cli() -> ExitCode {
    let config = match build_config(Cli::parse()) {
        Ok(config) => config,
        Err(msg) => {
            eprintln!("error: {msg}");
            return ExitCode::from(2);
        }
    };

    match simulate(&config) {
        Ok(projection) => {
            print!("{}", render_report(&config, &projection));
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    println!("Projection API listening on http://{addr}");
    println!("Local access: http://127.0.0.1:{port}/api/simulate");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_get_handler(Query(payload): Query<SimulatePayload>) -> Response {
    simulate_handler_impl(payload).await
}

async fn simulate_post_handler(Json(payload): Json<SimulatePayload>) -> Response {
    simulate_handler_impl(payload).await
}

async fn simulate_handler_impl(payload: SimulatePayload) -> Response {
    let config = match config_from_payload(payload) {
        Ok(config) => config,
        Err(msg) => {
            log::debug!("rejected simulate request: {msg}");
            return error_response(StatusCode::BAD_REQUEST, &msg);
        }
    };

    match simulate(&config) {
        Ok(projection) => {
            json_response(StatusCode::OK, build_simulate_response(&config, &projection))
        }
        Err(e) => {
            log::debug!("rejected simulate request: {e}");
            error_response(StatusCode::BAD_REQUEST, &e.to_string())
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn config_from_json(json: &str) -> Result<SimulationConfig, String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    config_from_payload(payload)
}

fn config_from_payload(payload: SimulatePayload) -> Result<SimulationConfig, String> {
    let mut cli = default_cli_for_api();

    if let Some(v) = payload.num_users {
        cli.num_users = v;
    }
    if let Some(v) = payload.monthly_contribution {
        cli.monthly_contribution = v;
    }

    if let Some(v) = payload.admin_fee_type {
        cli.admin_fee_type = v.into();
    }
    if let Some(v) = payload.admin_fee_pct {
        cli.admin_fee_pct = v;
    }
    if let Some(v) = payload.admin_fee_fixed {
        cli.admin_fee_fixed = v;
    }

    if let Some(v) = payload.utilization_rate {
        cli.utilization_rate = v;
    }
    if let Some(v) = payload.default_rate {
        cli.default_rate = v;
    }

    if let Some(v) = payload.nucleus_annual_rate {
        cli.nucleus_annual_rate = v;
    }
    if let Some(v) = payload.fic_annual_rate {
        cli.fic_annual_rate = v;
    }

    if let Some(v) = payload.fee_dist {
        cli.fee_dist = v;
    }
    if let Some(v) = payload.nucleus_dist {
        cli.nucleus_dist = v;
    }
    if let Some(v) = payload.fic_dist {
        cli.fic_dist = v;
    }

    if let Some(v) = payload.duration_months {
        cli.duration_months = v;
    }

    build_config(cli)
}

fn default_cli_for_api() -> Cli {
    Cli {
        num_users: 100,
        monthly_contribution: 400.0,
        admin_fee_type: CliAdminFeeType::Percentage,
        admin_fee_pct: 2.5,
        admin_fee_fixed: 500_000.0,
        utilization_rate: 65.0,
        default_rate: 8.0,
        nucleus_annual_rate: 42.6,
        fic_annual_rate: 14.0,
        fee_dist: 10.0,
        nucleus_dist: 80.0,
        fic_dist: 10.0,
        duration_months: SimulationConfig::DEFAULT_DURATION_MONTHS,
    }
}

fn build_simulate_response<'a>(
    config: &SimulationConfig,
    projection: &'a Projection,
) -> SimulateResponse<'a> {
    SimulateResponse {
        duration_months: config.duration_months,
        group_contribution: config.group_contribution(),
        summary: summarize(config, &projection.records),
        records: &projection.records,
        warnings: &projection.warnings,
    }
}

fn render_report(config: &SimulationConfig, projection: &Projection) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "{:>5}  {:>18}  {:>18}  {:>18}  {:>18}",
        "Month", "Contributions", "Net growth", "Total value", "Net return"
    );
    for record in &projection.records {
        let _ = writeln!(
            out,
            "{:>5}  {:>18}  {:>18}  {:>18}  {:>18}",
            record.month,
            format_currency(record.cumulative_contributions),
            format_currency(record.net_growth_this_month),
            format_currency(record.total_system_value),
            format_currency(record.cumulative_net_return),
        );
    }

    if let Some(summary) = summarize(config, &projection.records) {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Investment per person:  {}",
            format_currency(summary.total_invested_per_person)
        );
        let _ = writeln!(
            out,
            "Net profit per person:  {}",
            format_currency(summary.net_profit_per_person)
        );
        let _ = writeln!(out, "Return on investment:   {:.2}%", summary.roi_pct);
    }

    for warning in &projection.warnings {
        let line = match *warning {
            ProjectionWarning::DegenerateFee {
                month,
                fee_amount,
                total_before_fee,
            } => format!(
                "warning: month {month}: fee {} exceeds pool value {}, funds went negative",
                format_currency(fee_amount),
                format_currency(total_before_fee)
            ),
            ProjectionWarning::FeeSkipped {
                month,
                fee_amount,
                total_before_fee,
            } => format!(
                "warning: month {month}: pool value {} is not positive, fee {} not charged",
                format_currency(total_before_fee),
                format_currency(fee_amount)
            ),
        };
        let _ = writeln!(out, "{line}");
    }

    out
}

fn format_currency(value: f64) -> String {
    let cents = (value.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (idx, ch) in whole.chars().enumerate() {
        if idx > 0 && (whole.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if value < 0.0 && cents > 0 { "-" } else { "" };
    format!("{sign}${grouped}.{:02}", cents % 100)
}

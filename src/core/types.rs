use serde::Serialize;

/// How the monthly administration fee is charged against the pool.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum AdminFee {
    /// Annual percentage (0-100) of the pre-fee pool value, charged monthly as `pct / 100 / 12`.
    Percentage { annual_pct: f64 },
    /// Flat amount per month, independent of pool size.
    Fixed { monthly_amount: f64 },
}

impl AdminFee {
    pub fn monthly_charge(self, total_before_fee: f64) -> f64 {
        match self {
            AdminFee::Percentage { annual_pct } => total_before_fee * (annual_pct / 100.0) / 12.0,
            AdminFee::Fixed { monthly_amount } => monthly_amount,
        }
    }
}

/// Engine input. Rates and distributions are fractions, never percentages.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub num_users: u32,
    pub monthly_contribution: f64,
    pub utilization_rate: f64,
    pub default_rate: f64,
    pub admin_fee: AdminFee,
    pub nucleus_monthly_rate: f64,
    pub fic_monthly_rate: f64,
    pub fee_dist: f64,
    pub nucleus_dist: f64,
    pub fic_dist: f64,
    pub duration_months: u32,
}

impl SimulationConfig {
    pub const DEFAULT_DURATION_MONTHS: u32 = 12;

    pub fn group_contribution(&self) -> f64 {
        self.num_users as f64 * self.monthly_contribution
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FundState {
    pub fee_fund: f64,
    pub nucleus_fund: f64,
    pub fic_fund: f64,
}

impl FundState {
    pub fn total(self) -> f64 {
        self.fee_fund + self.nucleus_fund + self.fic_fund
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthRecord {
    pub month: u32,
    pub cumulative_contributions: f64,
    pub net_growth_this_month: f64,
    pub total_system_value: f64,
    pub cumulative_net_return: f64,
    /// Fund balances after this month's fee.
    pub funds: FundState,
}

/// Non-fatal conditions raised while projecting. The arithmetic is never altered.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ProjectionWarning {
    /// The fee exceeded the pre-fee total and drove the funds negative.
    #[serde(rename_all = "camelCase")]
    DegenerateFee {
        month: u32,
        fee_amount: f64,
        total_before_fee: f64,
    },
    /// Pre-fee total was zero or negative, so no fee was charged.
    #[serde(rename_all = "camelCase")]
    FeeSkipped {
        month: u32,
        fee_amount: f64,
        total_before_fee: f64,
    },
}

impl ProjectionWarning {
    pub fn month(self) -> u32 {
        match self {
            ProjectionWarning::DegenerateFee { month, .. }
            | ProjectionWarning::FeeSkipped { month, .. } => month,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Projection {
    pub records: Vec<MonthRecord>,
    pub warnings: Vec<ProjectionWarning>,
}

impl Projection {
    pub fn has_degenerate_fee(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, ProjectionWarning::DegenerateFee { .. }))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionSummary {
    pub total_invested_per_person: f64,
    pub net_profit_per_person: f64,
    pub roi_pct: f64,
    pub final_total_system_value: f64,
    pub final_cumulative_contributions: f64,
}

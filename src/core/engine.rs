use super::error::ProjectionError;
use super::types::{
    AdminFee, FundState, MonthRecord, Projection, ProjectionSummary, ProjectionWarning,
    SimulationConfig,
};

const DISTRIBUTION_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
enum FeeOutcome {
    Charged {
        fee_amount: f64,
        total_before_fee: f64,
    },
    Skipped {
        fee_amount: f64,
        total_before_fee: f64,
    },
}

/// Converts an annual rate into the monthly rate that compounds to it: `(1 + r)^(1/12) - 1`.
pub fn monthly_rate_from_annual(annual_rate: f64) -> f64 {
    (1.0 + annual_rate).powf(1.0 / 12.0) - 1.0
}

/// Runs the monthly recurrence for `config.duration_months` periods.
///
/// All validation happens up front; once the loop starts it cannot fail.
/// Fee conditions the caller should surface are returned as warnings with the
/// arithmetic left untouched.
pub fn simulate(config: &SimulationConfig) -> Result<Projection, ProjectionError> {
    validate_config(config)?;

    log::debug!(
        "projecting {} months for {} users at {:.2}/month",
        config.duration_months,
        config.num_users,
        config.monthly_contribution
    );

    let group_contribution = config.group_contribution();
    let mut funds = FundState::default();
    let mut records = Vec::with_capacity(config.duration_months as usize);
    let mut warnings = Vec::new();

    for month in 1..=config.duration_months {
        let last_month_total = funds.total();

        accrue_month(&mut funds, config, group_contribution);

        match charge_admin_fee(&mut funds, config.admin_fee) {
            FeeOutcome::Charged {
                fee_amount,
                total_before_fee,
            } if fee_amount > total_before_fee => {
                log::warn!(
                    "month={month} fee {fee_amount:.2} exceeds pool value {total_before_fee:.2}; funds are now negative"
                );
                warnings.push(ProjectionWarning::DegenerateFee {
                    month,
                    fee_amount,
                    total_before_fee,
                });
            }
            FeeOutcome::Charged { .. } => {}
            FeeOutcome::Skipped {
                fee_amount,
                total_before_fee,
            } => {
                log::warn!(
                    "month={month} pool value {total_before_fee:.2} is not positive; fee {fee_amount:.2} not charged"
                );
                warnings.push(ProjectionWarning::FeeSkipped {
                    month,
                    fee_amount,
                    total_before_fee,
                });
            }
        }

        let total_system_value = funds.total();
        let cumulative_contributions = group_contribution * month as f64;
        let record = MonthRecord {
            month,
            cumulative_contributions,
            net_growth_this_month: total_system_value - last_month_total - group_contribution,
            total_system_value,
            cumulative_net_return: total_system_value - cumulative_contributions,
            funds,
        };
        log::trace!(
            "month={month} total={:.2} net_growth={:.2}",
            record.total_system_value,
            record.net_growth_this_month
        );
        records.push(record);
    }

    log::debug!(
        "projection finished: {} records, {} warnings",
        records.len(),
        warnings.len()
    );

    Ok(Projection { records, warnings })
}

/// Per-person metrics derived from the final month. `None` when there are no records.
pub fn summarize(config: &SimulationConfig, records: &[MonthRecord]) -> Option<ProjectionSummary> {
    let last = records.last()?;
    let total_invested_per_person = config.monthly_contribution * records.len() as f64;
    let net_profit_per_person = if config.num_users > 0 {
        last.cumulative_net_return / config.num_users as f64
    } else {
        0.0
    };
    let roi_pct = if total_invested_per_person > 0.0 {
        net_profit_per_person / total_invested_per_person * 100.0
    } else {
        0.0
    };

    Some(ProjectionSummary {
        total_invested_per_person,
        net_profit_per_person,
        roi_pct,
        final_total_system_value: last.total_system_value,
        final_cumulative_contributions: last.cumulative_contributions,
    })
}

// Growth is computed on the balances carried in from the previous month,
// before this month's contributions land.
fn accrue_month(funds: &mut FundState, config: &SimulationConfig, group_contribution: f64) {
    let utilized_nucleus = funds.nucleus_fund * config.utilization_rate;
    let gross_nucleus_growth = utilized_nucleus * config.nucleus_monthly_rate;
    let default_loss = gross_nucleus_growth * config.default_rate;
    let net_nucleus_growth = gross_nucleus_growth - default_loss;

    let fic_growth = funds.fic_fund * config.fic_monthly_rate;

    funds.fee_fund += group_contribution * config.fee_dist;
    funds.nucleus_fund += net_nucleus_growth + group_contribution * config.nucleus_dist;
    funds.fic_fund += fic_growth + group_contribution * config.fic_dist;
}

fn charge_admin_fee(funds: &mut FundState, admin_fee: AdminFee) -> FeeOutcome {
    let total_before_fee = funds.total();
    let fee_amount = admin_fee.monthly_charge(total_before_fee);

    if total_before_fee <= 0.0 {
        return FeeOutcome::Skipped {
            fee_amount,
            total_before_fee,
        };
    }

    // Not clamped: a fee larger than the pool yields a negative factor.
    let factor = 1.0 - fee_amount / total_before_fee;
    funds.fee_fund *= factor;
    funds.nucleus_fund *= factor;
    funds.fic_fund *= factor;

    FeeOutcome::Charged {
        fee_amount,
        total_before_fee,
    }
}

fn validate_config(config: &SimulationConfig) -> Result<(), ProjectionError> {
    if config.duration_months < 1 {
        return Err(ProjectionError::invalid("duration_months", "must be at least 1"));
    }

    if config.num_users < 1 {
        return Err(ProjectionError::invalid("num_users", "must be at least 1"));
    }

    if !config.monthly_contribution.is_finite() || config.monthly_contribution <= 0.0 {
        return Err(ProjectionError::invalid(
            "monthly_contribution",
            format!("must be > 0, got {}", config.monthly_contribution),
        ));
    }

    for (field, value) in [
        ("utilization_rate", config.utilization_rate),
        ("default_rate", config.default_rate),
        ("fee_dist", config.fee_dist),
        ("nucleus_dist", config.nucleus_dist),
        ("fic_dist", config.fic_dist),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(ProjectionError::invalid(
                field,
                format!("must be a fraction between 0 and 1, got {value}"),
            ));
        }
    }

    for (field, value) in [
        ("nucleus_monthly_rate", config.nucleus_monthly_rate),
        ("fic_monthly_rate", config.fic_monthly_rate),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(ProjectionError::invalid(field, format!("must be >= 0, got {value}")));
        }
    }

    match config.admin_fee {
        AdminFee::Percentage { annual_pct } if !annual_pct.is_finite() || annual_pct < 0.0 => {
            return Err(ProjectionError::invalid(
                "admin_fee",
                format!("annual percentage must be >= 0, got {annual_pct}"),
            ));
        }
        AdminFee::Fixed { monthly_amount }
            if !monthly_amount.is_finite() || monthly_amount < 0.0 =>
        {
            return Err(ProjectionError::invalid(
                "admin_fee",
                format!("fixed monthly amount must be >= 0, got {monthly_amount}"),
            ));
        }
        _ => {}
    }

    let dist_sum = config.fee_dist + config.nucleus_dist + config.fic_dist;
    if (dist_sum - 1.0).abs() > DISTRIBUTION_TOLERANCE {
        return Err(ProjectionError::invalid(
            "distribution",
            format!("fee, nucleus and fic shares must sum to 1, got {dist_sum}"),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn assert_approx_tol(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn sample_config() -> SimulationConfig {
        SimulationConfig {
            num_users: 100,
            monthly_contribution: 400.0,
            utilization_rate: 0.65,
            default_rate: 0.08,
            admin_fee: AdminFee::Percentage { annual_pct: 2.5 },
            nucleus_monthly_rate: monthly_rate_from_annual(0.426),
            fic_monthly_rate: monthly_rate_from_annual(0.14),
            fee_dist: 0.10,
            nucleus_dist: 0.80,
            fic_dist: 0.10,
            duration_months: 12,
        }
    }

    fn zero_growth_config() -> SimulationConfig {
        let mut config = sample_config();
        config.nucleus_monthly_rate = 0.0;
        config.fic_monthly_rate = 0.0;
        config.admin_fee = AdminFee::Percentage { annual_pct: 0.0 };
        config
    }

    #[test]
    fn monthly_rate_compounds_back_to_annual() {
        let monthly = monthly_rate_from_annual(0.426);
        assert_approx_tol(monthly, 0.0300, 5e-4);
        assert_approx((1.0 + monthly).powi(12) - 1.0, 0.426);

        let fic = monthly_rate_from_annual(0.14);
        assert_approx_tol(fic, 0.0110, 5e-4);
        assert_approx(monthly_rate_from_annual(0.0), 0.0);
    }

    #[test]
    fn reference_scenario_produces_twelve_increasing_months() {
        let projection = simulate(&sample_config()).expect("valid config");

        assert_eq!(projection.records.len(), 12);
        assert!(projection.warnings.is_empty());
        for (idx, record) in projection.records.iter().enumerate() {
            assert_eq!(record.month, idx as u32 + 1);
        }
        for pair in projection.records.windows(2) {
            assert!(
                pair[1].total_system_value > pair[0].total_system_value,
                "total should grow: {} -> {}",
                pair[0].total_system_value,
                pair[1].total_system_value
            );
        }
    }

    #[test]
    fn first_month_nucleus_is_pure_contribution_before_fee() {
        let config = sample_config();
        let mut funds = FundState::default();

        accrue_month(&mut funds, &config, config.group_contribution());

        assert_approx(funds.nucleus_fund, 32_000.0);
        assert_approx(funds.fee_fund, 4_000.0);
        assert_approx(funds.fic_fund, 4_000.0);

        let expected_fee = 40_000.0 * 0.025 / 12.0;
        match charge_admin_fee(&mut funds, config.admin_fee) {
            FeeOutcome::Charged {
                fee_amount,
                total_before_fee,
            } => {
                assert_approx(fee_amount, expected_fee);
                assert_approx(total_before_fee, 40_000.0);
            }
            other => panic!("expected a charged fee, got {other:?}"),
        }
        assert_approx(funds.total(), 40_000.0 - expected_fee);
        assert_approx(funds.nucleus_fund, 32_000.0 * (1.0 - 0.025 / 12.0));
    }

    #[test]
    fn first_month_record_matches_hand_computation() {
        let projection = simulate(&sample_config()).expect("valid config");
        let first = projection.records[0];
        let fee = 40_000.0 * 0.025 / 12.0;

        assert_approx(first.cumulative_contributions, 40_000.0);
        assert_approx(first.total_system_value, 40_000.0 - fee);
        assert_approx(first.net_growth_this_month, -fee);
        assert_approx(first.cumulative_net_return, -fee);
    }

    #[test]
    fn second_month_growth_uses_prior_balances() {
        let config = sample_config();
        let projection = simulate(&config).expect("valid config");
        let prior = projection.records[0].funds;

        let nucleus_growth = prior.nucleus_fund
            * config.utilization_rate
            * config.nucleus_monthly_rate
            * (1.0 - config.default_rate);
        let fic_growth = prior.fic_fund * config.fic_monthly_rate;
        let before_fee = prior.total() + nucleus_growth + fic_growth + 40_000.0;
        let expected_total = before_fee * (1.0 - 0.025 / 12.0);

        assert_approx(projection.records[1].total_system_value, expected_total);
    }

    #[test]
    fn fee_deduction_preserves_fund_split() {
        let projection = simulate(&zero_growth_config()).expect("valid config");
        let mut config = zero_growth_config();
        config.admin_fee = AdminFee::Percentage { annual_pct: 6.0 };
        let charged = simulate(&config).expect("valid config");

        for (free, paid) in projection.records.iter().zip(charged.records.iter()) {
            let free_share = free.funds.nucleus_fund / free.funds.total();
            let paid_share = paid.funds.nucleus_fund / paid.funds.total();
            assert_approx(free_share, paid_share);
        }
    }

    #[test]
    fn zero_rates_and_fee_accumulate_contributions_only() {
        let config = zero_growth_config();
        let group = config.group_contribution();
        let projection = simulate(&config).expect("valid config");

        for record in &projection.records {
            assert_approx(record.total_system_value, group * record.month as f64);
            assert_approx(record.net_growth_this_month, 0.0);
            assert_approx(record.cumulative_net_return, 0.0);
        }
    }

    #[test]
    fn default_rate_of_one_wipes_nucleus_growth() {
        let mut config = sample_config();
        config.default_rate = 1.0;
        config.fic_monthly_rate = 0.0;
        config.admin_fee = AdminFee::Fixed { monthly_amount: 0.0 };

        let projection = simulate(&config).expect("valid config");
        for record in &projection.records {
            assert_approx(record.cumulative_net_return, 0.0);
        }
    }

    #[test]
    fn fixed_fee_larger_than_pool_goes_negative_without_clamping() {
        let mut config = sample_config();
        config.num_users = 1;
        config.monthly_contribution = 100.0;
        config.admin_fee = AdminFee::Fixed {
            monthly_amount: 500_000.0,
        };

        let projection = simulate(&config).expect("degenerate fee must not error");
        assert_eq!(projection.records.len(), 12);

        let first = projection.records[0];
        assert_approx(first.total_system_value, 100.0 - 500_000.0);
        assert!(first.funds.fee_fund < 0.0);
        assert!(first.funds.nucleus_fund < 0.0);
        assert!(first.funds.fic_fund < 0.0);
        assert!(projection.has_degenerate_fee());
        match projection.warnings[0] {
            ProjectionWarning::DegenerateFee {
                month,
                fee_amount,
                total_before_fee,
            } => {
                assert_eq!(month, 1);
                assert_approx(fee_amount, 500_000.0);
                assert_approx(total_before_fee, 100.0);
            }
            other => panic!("expected a degenerate fee warning, got {other:?}"),
        }
    }

    #[test]
    fn non_positive_pool_skips_fee_in_later_months() {
        let mut config = zero_growth_config();
        config.num_users = 1;
        config.monthly_contribution = 100.0;
        config.admin_fee = AdminFee::Fixed {
            monthly_amount: 500_000.0,
        };

        let projection = simulate(&config).expect("degenerate fee must not error");

        // Month 1 leaves -499,900; each later month only adds the contribution.
        for record in &projection.records[1..] {
            let expected = -499_900.0 + 100.0 * (record.month as f64 - 1.0);
            assert_approx(record.total_system_value, expected);
            assert_approx(record.net_growth_this_month, 0.0);
        }

        let skipped_months: Vec<u32> = projection
            .warnings
            .iter()
            .filter(|w| matches!(w, ProjectionWarning::FeeSkipped { .. }))
            .map(|w| w.month())
            .collect();
        assert_eq!(skipped_months, (2..=12).collect::<Vec<_>>());
    }

    #[test]
    fn distribution_sum_below_one_is_rejected() {
        let mut config = sample_config();
        config.fic_dist = 0.09;

        let err = simulate(&config).expect_err("0.99 split must be rejected");
        assert!(matches!(
            err,
            ProjectionError::InvalidConfiguration {
                field: "distribution",
                ..
            }
        ));
    }

    #[test]
    fn zero_duration_is_rejected() {
        let mut config = sample_config();
        config.duration_months = 0;
        assert!(matches!(
            simulate(&config),
            Err(ProjectionError::InvalidConfiguration {
                field: "duration_months",
                ..
            })
        ));
    }

    #[test]
    fn negative_inputs_are_rejected() {
        let mut config = sample_config();
        config.nucleus_monthly_rate = -0.01;
        assert!(simulate(&config).is_err());

        let mut config = sample_config();
        config.admin_fee = AdminFee::Fixed {
            monthly_amount: -1.0,
        };
        assert!(simulate(&config).is_err());

        let mut config = sample_config();
        config.utilization_rate = 1.5;
        assert!(simulate(&config).is_err());

        let mut config = sample_config();
        config.monthly_contribution = 0.0;
        assert!(simulate(&config).is_err());

        let mut config = sample_config();
        config.num_users = 0;
        assert!(simulate(&config).is_err());
    }

    #[test]
    fn summary_uses_last_record_per_person() {
        let config = sample_config();
        let projection = simulate(&config).expect("valid config");
        let summary = summarize(&config, &projection.records).expect("non-empty");
        let last = projection.records[11];

        assert_approx(summary.total_invested_per_person, 4_800.0);
        assert_approx(summary.net_profit_per_person, last.cumulative_net_return / 100.0);
        assert_approx(
            summary.roi_pct,
            summary.net_profit_per_person / 4_800.0 * 100.0,
        );
        assert!(summary.roi_pct > 0.0);
        assert_approx(summary.final_total_system_value, last.total_system_value);
    }

    #[test]
    fn summary_of_empty_sequence_is_none() {
        assert!(summarize(&sample_config(), &[]).is_none());
    }

    #[test]
    fn repeated_runs_do_not_share_state() {
        let config = sample_config();
        let first = simulate(&config).expect("valid config");
        let second = simulate(&config).expect("valid config");
        assert_eq!(first.records, second.records);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_records_are_complete_and_consistent(
            num_users in 1u32..500,
            contribution_cents in 1u32..1_000_000,
            utilization_bp in 0u32..=10_000,
            default_bp in 0u32..=10_000,
            nucleus_annual_bp in 0u32..8_000,
            fic_annual_bp in 0u32..4_000,
            fee_pct_bp in 0u32..1_000,
            fee_share in 0u32..=20,
            fic_share in 0u32..=30,
            duration_months in 1u32..60
        ) {
            let config = SimulationConfig {
                num_users,
                monthly_contribution: contribution_cents as f64 / 100.0,
                utilization_rate: utilization_bp as f64 / 10_000.0,
                default_rate: default_bp as f64 / 10_000.0,
                admin_fee: AdminFee::Percentage { annual_pct: fee_pct_bp as f64 / 100.0 },
                nucleus_monthly_rate: monthly_rate_from_annual(nucleus_annual_bp as f64 / 10_000.0),
                fic_monthly_rate: monthly_rate_from_annual(fic_annual_bp as f64 / 10_000.0),
                fee_dist: fee_share as f64 / 100.0,
                nucleus_dist: (100 - fee_share - fic_share) as f64 / 100.0,
                fic_dist: fic_share as f64 / 100.0,
                duration_months,
            };

            let projection = simulate(&config).expect("valid config");
            prop_assert_eq!(projection.records.len(), duration_months as usize);
            prop_assert!(projection.warnings.is_empty());

            for (idx, record) in projection.records.iter().enumerate() {
                prop_assert_eq!(record.month, idx as u32 + 1);
                let tol = 1e-9 * record.total_system_value.abs().max(1.0);
                prop_assert!(
                    (record.total_system_value
                        - (record.cumulative_contributions + record.cumulative_net_return))
                        .abs()
                        <= tol
                );
                prop_assert!(record.funds.fee_fund >= 0.0);
                prop_assert!(record.funds.nucleus_fund >= 0.0);
                prop_assert!(record.funds.fic_fund >= 0.0);
            }

            for pair in projection.records.windows(2) {
                prop_assert!(pair[1].cumulative_contributions > pair[0].cumulative_contributions);
            }
        }
    }
}

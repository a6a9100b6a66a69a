use txo_analyzer::models::{ChipStatus, ContractRole, OptionRow, OptionSide};
use txo_analyzer::processor::{aggregate, put_call_ratio, ChipThresholds};
use txo_analyzer::settlement::SettlementResolver;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn row(month: &str, strike: f64, side: OptionSide, oi: f64) -> OptionRow {
        OptionRow {
            contract_month: month.to_string(),
            strike,
            side,
            open_interest: oi,
            settlement_price: None,
            volume: None,
        }
    }

    fn priced_row(
        month: &str,
        strike: f64,
        side: OptionSide,
        oi: f64,
        price: f64,
    ) -> OptionRow {
        OptionRow {
            settlement_price: Some(price),
            ..row(month, strike, side, oi)
        }
    }

    fn defaults() -> (SettlementResolver, ChipThresholds) {
        (SettlementResolver::new(), ChipThresholds::default())
    }

    #[test]
    fn test_empty_input_is_no_data() {
        let (resolver, thresholds) = defaults();
        let analysis = aggregate(&[], date(2025, 3, 10), &resolver, &thresholds);
        assert_eq!(analysis.status, ChipStatus::NoData);
        assert!(analysis.targets.is_empty());
    }

    #[test]
    fn test_zero_total_oi_is_no_data() {
        let (resolver, thresholds) = defaults();
        let rows = vec![
            row("202503", 21000.0, OptionSide::Call, 0.0),
            row("202503", 21000.0, OptionSide::Put, 0.0),
        ];
        let analysis = aggregate(&rows, date(2025, 3, 10), &resolver, &thresholds);
        assert_eq!(analysis.status, ChipStatus::NoData);
    }

    #[test]
    fn test_group_below_max_oi_guard_is_dropped() {
        let (resolver, thresholds) = defaults();
        // 410 clears the per-strike floor (300) but not the group guard (500)
        let rows = vec![
            row("202503", 21000.0, OptionSide::Call, 320.0),
            row("202503", 21000.0, OptionSide::Put, 410.0),
        ];
        let analysis = aggregate(&rows, date(2025, 3, 10), &resolver, &thresholds);
        assert_eq!(analysis.status, ChipStatus::NoContracts);
        assert!(analysis.targets.is_empty());
    }

    #[test]
    fn test_group_above_max_oi_guard_survives() {
        let (resolver, thresholds) = defaults();
        let rows = vec![
            row("202503", 21000.0, OptionSide::Call, 320.0),
            row("202503", 21000.0, OptionSide::Put, 410.0),
            row("202503", 20500.0, OptionSide::Put, 600.0),
        ];
        let analysis = aggregate(&rows, date(2025, 3, 10), &resolver, &thresholds);
        assert_eq!(analysis.status, ChipStatus::Ok);
        assert_eq!(analysis.targets.len(), 1);

        let target = &analysis.targets[0];
        assert_eq!(target.code, "202503");
        // Both significant strikes survive, sorted ascending
        let strikes: Vec<f64> = target.rows.iter().map(|r| r.strike).collect();
        assert_eq!(strikes, vec![20500.0, 21000.0]);
        // The 21000 join carries both sides
        assert_eq!(target.rows[1].call_oi, 320.0);
        assert_eq!(target.rows[1].put_oi, 410.0);
    }

    #[test]
    fn test_strike_union_is_preserved() {
        let (resolver, thresholds) = defaults();
        // Calls and puts at disjoint strikes; all significant
        let rows = vec![
            row("202503", 20000.0, OptionSide::Call, 700.0),
            row("202503", 21000.0, OptionSide::Put, 800.0),
            row("202503", 22000.0, OptionSide::Call, 350.0),
        ];
        let analysis = aggregate(&rows, date(2025, 3, 10), &resolver, &thresholds);
        assert_eq!(analysis.status, ChipStatus::Ok);

        let target = &analysis.targets[0];
        let strikes: Vec<f64> = target.rows.iter().map(|r| r.strike).collect();
        assert_eq!(strikes, vec![20000.0, 21000.0, 22000.0]);
        // Missing sides are zero, not absent
        assert_eq!(target.rows[0].put_oi, 0.0);
        assert_eq!(target.rows[1].call_oi, 0.0);
    }

    #[test]
    fn test_expired_and_malformed_contracts_are_excluded() {
        let (resolver, thresholds) = defaults();
        let rows = vec![
            // Settles 2025/03/05, before the report date
            row("202503W1", 21000.0, OptionSide::Put, 900.0),
            // Unresolvable code
            row("GARBAGE", 21000.0, OptionSide::Put, 900.0),
            // Settles on the report date itself: also gone
            row("202503W2", 21000.0, OptionSide::Put, 900.0),
            // Future contract survives
            row("202503", 21000.0, OptionSide::Put, 900.0),
        ];
        let analysis = aggregate(&rows, date(2025, 3, 12), &resolver, &thresholds);
        assert_eq!(analysis.status, ChipStatus::Ok);
        assert_eq!(analysis.targets.len(), 1);
        assert_eq!(analysis.targets[0].code, "202503");
    }

    #[test]
    fn test_nearest_weekly_plus_nearest_monthly_selection() {
        let (resolver, thresholds) = defaults();
        let rows = vec![
            row("202503W4", 21000.0, OptionSide::Put, 900.0), // 2025/03/26
            row("202503", 21000.0, OptionSide::Put, 900.0),   // 2025/03/19
            row("202504", 21000.0, OptionSide::Put, 900.0),   // 2025/04/16
            row("202504W1", 21000.0, OptionSide::Put, 900.0), // 2025/04/02
        ];
        let analysis = aggregate(&rows, date(2025, 3, 13), &resolver, &thresholds);
        assert_eq!(analysis.status, ChipStatus::Ok);

        // Nearest by settlement is the March monthly (2025/03/19): it takes
        // the monthly slot alone, no duplicate
        assert_eq!(analysis.targets.len(), 1);
        assert_eq!(analysis.targets[0].code, "202503");
        assert_eq!(analysis.targets[0].role, ContractRole::Monthly);

        let rows = vec![
            row("202503W4", 21000.0, OptionSide::Put, 900.0), // 2025/03/26
            row("202504", 21000.0, OptionSide::Put, 900.0),   // 2025/04/16
            row("202504W1", 21000.0, OptionSide::Put, 900.0), // 2025/04/02
        ];
        let analysis = aggregate(&rows, date(2025, 3, 20), &resolver, &thresholds);
        assert_eq!(analysis.targets.len(), 2);
        assert_eq!(analysis.targets[0].code, "202503W4");
        assert_eq!(analysis.targets[0].role, ContractRole::Nearest);
        assert_eq!(analysis.targets[1].code, "202504");
        assert_eq!(analysis.targets[1].role, ContractRole::Monthly);
    }

    #[test]
    fn test_nearest_monthly_is_relabeled_not_duplicated() {
        let (resolver, thresholds) = defaults();
        let rows = vec![
            row("202503", 21000.0, OptionSide::Put, 900.0), // 2025/03/19
            row("202504", 21000.0, OptionSide::Put, 900.0), // 2025/04/16
        ];
        let analysis = aggregate(&rows, date(2025, 3, 17), &resolver, &thresholds);

        // 202503 is both nearest and monthly: one entry, labeled monthly
        assert_eq!(analysis.targets.len(), 1);
        assert_eq!(analysis.targets[0].code, "202503");
        assert_eq!(analysis.targets[0].role, ContractRole::Monthly);
    }

    #[test]
    fn test_amounts_and_pc_ratios() {
        let (resolver, thresholds) = defaults();
        let rows = vec![
            priced_row("202503", 21000.0, OptionSide::Call, 400.0, 100.0),
            priced_row("202503", 21000.0, OptionSide::Put, 600.0, 200.0),
        ];
        let analysis = aggregate(&rows, date(2025, 3, 10), &resolver, &thresholds);
        let target = &analysis.targets[0];

        assert_eq!(target.call_amount_total, 400.0 * 100.0 * 50.0);
        assert_eq!(target.put_amount_total, 600.0 * 200.0 * 50.0);
        assert_eq!(target.pc_ratio_oi, 600.0 / 400.0 * 100.0);
        assert_eq!(target.pc_ratio_amount, 6_000_000.0 / 2_000_000.0 * 100.0);
    }

    #[test]
    fn test_pc_ratio_zero_when_call_side_empty() {
        let (resolver, thresholds) = defaults();
        let rows = vec![row("202503", 21000.0, OptionSide::Put, 900.0)];
        let analysis = aggregate(&rows, date(2025, 3, 10), &resolver, &thresholds);
        let target = &analysis.targets[0];

        assert_eq!(target.call_oi_total, 0.0);
        // Guard value, not a balance signal
        assert_eq!(target.pc_ratio_oi, 0.0);
        assert_eq!(target.pc_ratio_amount, 0.0);

        // And the helper directly
        assert_eq!(put_call_ratio(900.0, 0.0), 0.0);
        assert_eq!(put_call_ratio(900.0, 450.0), 200.0);
    }

    #[test]
    fn test_aggregate_is_idempotent() {
        let (resolver, thresholds) = defaults();
        let rows = vec![
            row("202503W4", 21000.0, OptionSide::Put, 900.0),
            row("202503", 20500.0, OptionSide::Call, 700.0),
            row("202503", 21000.0, OptionSide::Put, 800.0),
            row("202504", 21500.0, OptionSide::Call, 650.0),
        ];
        let first = aggregate(&rows, date(2025, 3, 13), &resolver, &thresholds);
        let second = aggregate(&rows, date(2025, 3, 13), &resolver, &thresholds);
        assert_eq!(first, second);
    }

    #[test]
    fn test_custom_thresholds_are_respected() {
        let resolver = SettlementResolver::new();
        let thresholds = ChipThresholds {
            strike_min_oi: 50.0,
            contract_min_max_oi: 100.0,
        };
        let rows = vec![
            row("202503", 21000.0, OptionSide::Call, 60.0),
            row("202503", 21000.0, OptionSide::Put, 120.0),
        ];
        let analysis = aggregate(&rows, date(2025, 3, 10), &resolver, &thresholds);
        assert_eq!(analysis.status, ChipStatus::Ok);
        assert_eq!(analysis.targets[0].rows.len(), 1);
    }
}

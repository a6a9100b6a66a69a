use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};

use crate::config;
use crate::models::{
    ChipAnalysis, ChipStatus, ContractRole, ContractTarget, OptionRow, OptionSide, StrikeRow,
};
use crate::settlement::SettlementResolver;

/// Tunable OI significance floors. The exchange publishes no guidance here;
/// both values are operator knobs, not invariants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChipThresholds {
    /// Keep a strike when either side's OI exceeds this.
    pub strike_min_oi: f64,
    /// Keep a contract when its best strike's OI exceeds this.
    pub contract_min_max_oi: f64,
}

impl Default for ChipThresholds {
    fn default() -> Self {
        Self {
            strike_min_oi: config::DEFAULT_STRIKE_MIN_OI,
            contract_min_max_oi: config::DEFAULT_CONTRACT_MIN_MAX_OI,
        }
    }
}

impl ChipThresholds {
    pub fn from_env() -> Self {
        Self {
            strike_min_oi: config::get_strike_min_oi(),
            contract_min_max_oi: config::get_contract_min_max_oi(),
        }
    }
}

/// Aggregate raw report rows into per-contract chip distributions and pick
/// the contracts worth charting.
///
/// Pure and deterministic: same rows + report date → identical output,
/// including ordering. Bad rows are skipped, never errors; expired and
/// unresolvable contracts are silently excluded.
pub fn aggregate(
    rows: &[OptionRow],
    report_date: NaiveDate,
    resolver: &SettlementResolver,
    thresholds: &ChipThresholds,
) -> ChipAnalysis {
    let total_oi: f64 = rows
        .iter()
        .map(|r| r.open_interest)
        .filter(|oi| oi.is_finite() && *oi > 0.0)
        .sum();
    if rows.is_empty() || total_oi <= 0.0 {
        return ChipAnalysis {
            status: ChipStatus::NoData,
            report_date,
            targets: vec![],
        };
    }

    // Partition by contract; BTreeMap keeps group order stable.
    let mut groups: BTreeMap<String, Vec<&OptionRow>> = BTreeMap::new();
    for row in rows {
        let code = row.contract_month.trim().to_uppercase();
        if code.is_empty() {
            continue;
        }
        groups.entry(code).or_default().push(row);
    }

    let mut candidates: Vec<ContractTarget> = Vec::new();
    for (code, group) in groups {
        // Expired or unresolvable contracts never reach the chart.
        let Some(settlement) = resolver.resolve(&code) else {
            continue;
        };
        if settlement <= report_date {
            continue;
        }

        let mut strikes = join_strikes(&group);
        strikes.retain(|s| {
            s.call_oi > thresholds.strike_min_oi || s.put_oi > thresholds.strike_min_oi
        });
        if strikes.is_empty() {
            continue;
        }

        let max_oi = strikes
            .iter()
            .map(|s| s.call_oi.max(s.put_oi))
            .fold(0.0, f64::max);
        if max_oi <= thresholds.contract_min_max_oi {
            continue;
        }

        let call_oi_total: f64 = strikes.iter().map(|s| s.call_oi).sum();
        let put_oi_total: f64 = strikes.iter().map(|s| s.put_oi).sum();
        let call_amount_total: f64 = strikes.iter().map(|s| s.call_amount).sum();
        let put_amount_total: f64 = strikes.iter().map(|s| s.put_amount).sum();

        candidates.push(ContractTarget {
            code,
            settlement,
            role: ContractRole::Nearest, // finalized during selection
            rows: strikes,
            call_oi_total,
            put_oi_total,
            call_amount_total,
            put_amount_total,
            pc_ratio_oi: put_call_ratio(put_oi_total, call_oi_total),
            pc_ratio_amount: put_call_ratio(put_amount_total, call_amount_total),
        });
    }

    candidates.sort_by(|a, b| a.settlement.cmp(&b.settlement).then(a.code.cmp(&b.code)));

    let targets = select_targets(candidates);
    let status = if targets.is_empty() {
        ChipStatus::NoContracts
    } else {
        ChipStatus::Ok
    };

    ChipAnalysis {
        status,
        report_date,
        targets,
    }
}

/// Outer-join a contract's call and put rows on strike. The union of
/// strikes present on either side survives; the missing side is zero.
fn join_strikes(rows: &[&OptionRow]) -> Vec<StrikeRow> {
    let mut merged: HashMap<u64, StrikeRow> = HashMap::new();

    for row in rows {
        if !row.strike.is_finite() || row.strike <= 0.0 {
            continue;
        }
        if !row.open_interest.is_finite() || row.open_interest < 0.0 {
            continue;
        }

        let amount = row
            .settlement_price
            .filter(|p| p.is_finite() && *p > 0.0)
            .map(|p| row.open_interest * p * config::CONTRACT_MULTIPLIER)
            .unwrap_or(0.0);

        let entry = merged
            .entry(row.strike.to_bits())
            .or_insert_with(|| StrikeRow {
                strike: row.strike,
                call_oi: 0.0,
                put_oi: 0.0,
                call_amount: 0.0,
                put_amount: 0.0,
            });

        match row.side {
            OptionSide::Call => {
                entry.call_oi += row.open_interest;
                entry.call_amount += amount;
            }
            OptionSide::Put => {
                entry.put_oi += row.open_interest;
                entry.put_amount += amount;
            }
        }
    }

    let mut strikes: Vec<StrikeRow> = merged.into_values().collect();
    strikes.sort_by(|a, b| {
        a.strike
            .partial_cmp(&b.strike)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    strikes
}

/// Pick at most two contracts: the nearest-dated one, plus the nearest
/// monthly when that is a different contract. When the nearest already is
/// the monthly it keeps a single entry, relabeled.
fn select_targets(ranked: Vec<ContractTarget>) -> Vec<ContractTarget> {
    let mut iter = ranked.into_iter();
    let Some(mut nearest) = iter.next() else {
        return vec![];
    };

    if is_monthly_code(&nearest.code) {
        nearest.role = ContractRole::Monthly;
        return vec![nearest];
    }

    nearest.role = ContractRole::Nearest;
    let mut targets = vec![nearest];
    if let Some(mut monthly) = iter.find(|c| is_monthly_code(&c.code)) {
        monthly.role = ContractRole::Monthly;
        targets.push(monthly);
    }
    targets
}

/// A code with no weekly suffix (`YYYYMM` only) is the monthly contract.
pub fn is_monthly_code(code: &str) -> bool {
    let code = code.trim();
    code.len() == 6 && code.chars().all(|c| c.is_ascii_digit())
}

/// Put/Call ratio as a percentage. Returns 0 when the call side is empty —
/// a divide-by-zero guard, not a claim of balance.
pub fn put_call_ratio(total_put: f64, total_call: f64) -> f64 {
    if total_call <= 0.0 {
        0.0
    } else {
        total_put / total_call * 100.0
    }
}

// src/core/budget.rs - Per-run resource ledger and execution gates
//
// One ledger per run_id, three independent dimensions (units, cost, wall
// time). Counters only grow and `is_exceeded` only ever flips to true.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use crate::infra::config::BudgetConfig;
use crate::infra::errors::TollgateError;
use crate::library::ExecutorKind;

/// Ceilings for one run. A ceiling of zero leaves that dimension unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetLimits {
    #[serde(default)]
    pub max_total_units: u64,
    #[serde(default)]
    pub max_total_cost: f64,
    #[serde(default)]
    pub max_duration_ms: u64,
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: f64,
}

fn default_warning_threshold() -> f64 {
    0.8
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self::from(&BudgetConfig::default())
    }
}

impl From<&BudgetConfig> for BudgetLimits {
    fn from(cfg: &BudgetConfig) -> Self {
        Self {
            max_total_units: cfg.max_total_units,
            max_total_cost: cfg.max_total_cost,
            max_duration_ms: cfg.max_duration_secs.saturating_mul(1000),
            warning_threshold: cfg.warning_threshold,
        }
    }
}

impl BudgetLimits {
    pub fn new(max_total_units: u64, max_total_cost: f64, max_duration_ms: u64) -> Self {
        Self {
            max_total_units,
            max_total_cost,
            max_duration_ms,
            warning_threshold: default_warning_threshold(),
        }
    }

    /// No ceilings at all.
    pub fn unbounded() -> Self {
        Self::new(0, 0.0, 0)
    }

    pub fn with_warning_threshold(mut self, threshold: f64) -> Self {
        self.warning_threshold = threshold;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.max_total_cost.is_finite() || self.max_total_cost < 0.0 {
            return Err(format!(
                "max_total_cost must be finite and >= 0, got {}",
                self.max_total_cost
            ));
        }
        if !(self.warning_threshold > 0.0 && self.warning_threshold <= 1.0) {
            return Err(format!(
                "warning_threshold must be within (0, 1], got {}",
                self.warning_threshold
            ));
        }
        Ok(())
    }
}

/// Consumption reported for one attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub units_in: u64,
    pub units_out: u64,
    pub cost_estimate: f64,
}

impl ResourceUsage {
    pub fn new(units_in: u64, units_out: u64, cost_estimate: f64) -> Self {
        Self {
            units_in,
            units_out,
            cost_estimate,
        }
    }

    pub fn total_units(&self) -> u64 {
        self.units_in.saturating_add(self.units_out)
    }

    pub fn is_zero(&self) -> bool {
        self.total_units() == 0 && self.cost_estimate <= 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceededReason {
    UnitsLimitExceeded,
    CostLimitExceeded,
    TimeLimitExceeded,
}

impl ExceededReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnitsLimitExceeded => "units_limit_exceeded",
            Self::CostLimitExceeded => "cost_limit_exceeded",
            Self::TimeLimitExceeded => "time_limit_exceeded",
        }
    }
}

impl std::fmt::Display for ExceededReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a run's ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetState {
    pub run_id: String,
    pub limits: BudgetLimits,
    pub total_units_used: u64,
    pub total_cost_used: f64,
    pub elapsed_ms: u64,
    pub units_pct: f64,
    pub cost_pct: f64,
    pub time_pct: f64,
    pub calls: u64,
    pub avg_units_per_call: f64,
    pub avg_cost_per_call: f64,
    pub estimated_ops_remaining: Option<u64>,
    pub is_exceeded: bool,
    pub exceeded_reason: Option<ExceededReason>,
    pub warning_issued: bool,
    pub heavy_ops_allowed: bool,
    pub lightweight_ops_allowed: bool,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
}

impl BudgetState {
    fn new(run_id: &str, limits: BudgetLimits) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.to_string(),
            limits,
            total_units_used: 0,
            total_cost_used: 0.0,
            elapsed_ms: 0,
            units_pct: 0.0,
            cost_pct: 0.0,
            time_pct: 0.0,
            calls: 0,
            avg_units_per_call: 0.0,
            avg_cost_per_call: 0.0,
            estimated_ops_remaining: None,
            is_exceeded: false,
            exceeded_reason: None,
            warning_issued: false,
            heavy_ops_allowed: true,
            lightweight_ops_allowed: true,
            started_at: now,
            updated_at: now,
            finalized_at: None,
        }
    }

    /// Units left before the ceiling, `None` when unbounded.
    pub fn remaining_units(&self) -> Option<u64> {
        (self.limits.max_total_units > 0)
            .then(|| self.limits.max_total_units.saturating_sub(self.total_units_used))
    }

    /// Cost left before the ceiling, `None` when unbounded.
    pub fn remaining_cost(&self) -> Option<f64> {
        (self.limits.max_total_cost > 0.0)
            .then(|| (self.limits.max_total_cost - self.total_cost_used).max(0.0))
    }

    fn remaining_ms(&self) -> Option<u64> {
        (self.limits.max_duration_ms > 0)
            .then(|| self.limits.max_duration_ms.saturating_sub(self.elapsed_ms))
    }

    fn max_pct(&self) -> f64 {
        self.units_pct.max(self.cost_pct).max(self.time_pct)
    }

    fn refresh(&mut self, elapsed_ms: u64) {
        self.elapsed_ms = self.elapsed_ms.max(elapsed_ms);
        self.units_pct = ratio(self.total_units_used as f64, self.limits.max_total_units as f64);
        self.cost_pct = ratio(self.total_cost_used, self.limits.max_total_cost);
        self.time_pct = ratio(self.elapsed_ms as f64, self.limits.max_duration_ms as f64);
    }

    fn first_exceeded(&self) -> Option<ExceededReason> {
        let l = &self.limits;
        if l.max_total_units > 0 && self.total_units_used >= l.max_total_units {
            Some(ExceededReason::UnitsLimitExceeded)
        } else if l.max_total_cost > 0.0 && self.total_cost_used >= l.max_total_cost {
            Some(ExceededReason::CostLimitExceeded)
        } else if l.max_duration_ms > 0 && self.elapsed_ms >= l.max_duration_ms {
            Some(ExceededReason::TimeLimitExceeded)
        } else {
            None
        }
    }

    fn estimate_ops_remaining(&self) -> Option<u64> {
        if self.is_exceeded {
            return Some(0);
        }
        if self.calls == 0 {
            return None;
        }
        let avg_ms = self.elapsed_ms as f64 / self.calls as f64;
        [
            (self.remaining_units().map(|r| r as f64), self.avg_units_per_call),
            (self.remaining_cost(), self.avg_cost_per_call),
            (self.remaining_ms().map(|r| r as f64), avg_ms),
        ]
        .into_iter()
        .filter_map(|(remaining, avg)| match remaining {
            Some(r) if avg > 0.0 => Some((r / avg).floor() as u64),
            _ => None,
        })
        .min()
    }
}

fn ratio(used: f64, limit: f64) -> f64 {
    if limit > 0.0 {
        used / limit
    } else {
        0.0
    }
}

/// Outcome of a gate check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl GateDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

pub const RUN_NOT_INITIALIZED: &str = "run_not_initialized";

struct Ledger {
    state: BudgetState,
    started: Instant,
}

impl Ledger {
    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Owns every active run ledger.
#[derive(Default)]
pub struct BudgetController {
    ledgers: Mutex<HashMap<String, Ledger>>,
}

impl BudgetController {
    pub fn new() -> Self {
        Self::default()
    }

    fn ledgers(&self) -> std::sync::MutexGuard<'_, HashMap<String, Ledger>> {
        self.ledgers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn init_run(&self, run_id: &str, limits: BudgetLimits) -> Result<BudgetState, TollgateError> {
        let mut ledgers = self.ledgers();
        if ledgers.contains_key(run_id) {
            return Err(TollgateError::RunAlreadyActive(run_id.to_string()));
        }
        let state = BudgetState::new(run_id, limits);
        ledgers.insert(
            run_id.to_string(),
            Ledger {
                state: state.clone(),
                started: Instant::now(),
            },
        );
        tracing::debug!(
            run_id,
            max_units = limits.max_total_units,
            max_cost = limits.max_total_cost,
            max_duration_ms = limits.max_duration_ms,
            "budget ledger opened"
        );
        Ok(state)
    }

    /// The only mutator. Returns the updated snapshot.
    pub fn record_usage(&self, run_id: &str, usage: &ResourceUsage) -> Result<BudgetState, TollgateError> {
        let mut ledgers = self.ledgers();
        let ledger = ledgers
            .get_mut(run_id)
            .ok_or_else(|| TollgateError::UnknownRun(run_id.to_string()))?;
        let elapsed = ledger.elapsed_ms();
        let state = &mut ledger.state;

        let cost = if usage.cost_estimate.is_finite() {
            usage.cost_estimate.max(0.0)
        } else {
            0.0
        };
        state.total_units_used = state.total_units_used.saturating_add(usage.total_units());
        state.total_cost_used += cost;
        state.calls += 1;
        state.avg_units_per_call = state.total_units_used as f64 / state.calls as f64;
        state.avg_cost_per_call = state.total_cost_used / state.calls as f64;
        state.refresh(elapsed);
        state.updated_at = Utc::now();

        if !state.is_exceeded {
            if let Some(reason) = state.first_exceeded() {
                state.is_exceeded = true;
                state.exceeded_reason = Some(reason);
                state.heavy_ops_allowed = false;
                tracing::warn!(
                    run_id,
                    reason = reason.as_str(),
                    units = state.total_units_used,
                    cost = state.total_cost_used,
                    elapsed_ms = state.elapsed_ms,
                    "budget exceeded; heavy operations blocked"
                );
            }
        }

        if !state.warning_issued && state.max_pct() >= state.limits.warning_threshold {
            state.warning_issued = true;
            tracing::warn!(
                run_id,
                units_pct = state.units_pct,
                cost_pct = state.cost_pct,
                time_pct = state.time_pct,
                "budget warning threshold crossed"
            );
        }

        state.estimated_ops_remaining = state.estimate_ops_remaining();
        Ok(state.clone())
    }

    pub fn check_heavy(&self, run_id: &str) -> GateDecision {
        match self.ledgers().get(run_id) {
            None => GateDecision::deny(RUN_NOT_INITIALIZED),
            Some(l) if l.state.heavy_ops_allowed => GateDecision::allow(),
            Some(l) => GateDecision::deny(
                l.state
                    .exceeded_reason
                    .map(|r| r.as_str())
                    .unwrap_or("heavy_ops_blocked"),
            ),
        }
    }

    pub fn check_lightweight(&self, run_id: &str) -> GateDecision {
        match self.ledgers().get(run_id) {
            None => GateDecision::deny(RUN_NOT_INITIALIZED),
            Some(l) if l.state.lightweight_ops_allowed => GateDecision::allow(),
            Some(_) => GateDecision::deny("lightweight_ops_blocked"),
        }
    }

    /// Gate for a task of the given executor kind.
    pub fn check(&self, run_id: &str, kind: ExecutorKind) -> GateDecision {
        if kind.is_heavy() {
            self.check_heavy(run_id)
        } else {
            self.check_lightweight(run_id)
        }
    }

    /// Current snapshot with elapsed time brought up to date.
    pub fn state(&self, run_id: &str) -> Option<BudgetState> {
        self.ledgers().get(run_id).map(|l| {
            let mut s = l.state.clone();
            s.refresh(l.elapsed_ms());
            s
        })
    }

    pub fn is_active(&self, run_id: &str) -> bool {
        self.ledgers().contains_key(run_id)
    }

    pub fn active_runs(&self) -> Vec<String> {
        let mut runs: Vec<String> = self.ledgers().keys().cloned().collect();
        runs.sort();
        runs
    }

    /// Close the ledger and return its final snapshot.
    pub fn finalize_run(&self, run_id: &str) -> Result<BudgetState, TollgateError> {
        let ledger = self
            .ledgers()
            .remove(run_id)
            .ok_or_else(|| TollgateError::UnknownRun(run_id.to_string()))?;
        let mut state = ledger.state;
        state.refresh(ledger.started.elapsed().as_millis().try_into().unwrap_or(u64::MAX));
        state.finalized_at = Some(Utc::now());
        tracing::debug!(
            run_id,
            units = state.total_units_used,
            cost = state.total_cost_used,
            calls = state.calls,
            exceeded = state.is_exceeded,
            "budget ledger finalized"
        );
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(units: u64, cost: f64) -> BudgetLimits {
        BudgetLimits::new(units, cost, 3_600_000)
    }

    // ─── Lifecycle ──────────────────────────────────────────────

    #[test]
    fn test_init_and_finalize() {
        let bc = BudgetController::new();
        let state = bc.init_run("r1", limits(100, 1.0)).unwrap();
        assert!(state.heavy_ops_allowed);
        assert!(state.lightweight_ops_allowed);
        assert_eq!(bc.active_runs(), vec!["r1".to_string()]);

        let snap = bc.finalize_run("r1").unwrap();
        assert!(snap.finalized_at.is_some());
        assert!(!bc.is_active("r1"));
        assert!(bc.finalize_run("r1").is_err());
    }

    #[test]
    fn test_reinit_active_run_rejected() {
        let bc = BudgetController::new();
        bc.init_run("r1", limits(100, 1.0)).unwrap();
        let err = bc.init_run("r1", limits(100, 1.0)).unwrap_err();
        assert!(matches!(err, TollgateError::RunAlreadyActive(_)));
    }

    #[test]
    fn test_unknown_run_denies_both_gates() {
        let bc = BudgetController::new();
        let heavy = bc.check_heavy("nope");
        assert!(!heavy.allowed);
        assert_eq!(heavy.reason.as_deref(), Some(RUN_NOT_INITIALIZED));
        assert!(!bc.check_lightweight("nope").allowed);
        assert!(bc.record_usage("nope", &ResourceUsage::default()).is_err());
    }

    // ─── Accounting ─────────────────────────────────────────────

    #[test]
    fn test_units_ceiling_closes_heavy_gate_only() {
        let bc = BudgetController::new();
        bc.init_run("r1", limits(1000, 0.0)).unwrap();
        let s = bc.record_usage("r1", &ResourceUsage::new(600, 400, 0.0)).unwrap();
        assert!(s.is_exceeded);
        assert_eq!(s.exceeded_reason, Some(ExceededReason::UnitsLimitExceeded));
        assert!(!bc.check("r1", ExecutorKind::RemoteCall).allowed);
        assert!(!bc.check("r1", ExecutorKind::Hybrid).allowed);
        assert!(bc.check("r1", ExecutorKind::LocalFunction).allowed);
    }

    #[test]
    fn test_cost_exceeded_after_three_calls() {
        let bc = BudgetController::new();
        bc.init_run("r1", limits(0, 1.0)).unwrap();
        for cost in [0.4, 0.4, 0.4] {
            bc.record_usage("r1", &ResourceUsage::new(1, 1, cost)).unwrap();
        }
        let s = bc.state("r1").unwrap();
        assert!(s.is_exceeded);
        assert_eq!(s.exceeded_reason, Some(ExceededReason::CostLimitExceeded));
        assert_eq!(
            serde_json::to_value(s.exceeded_reason).unwrap(),
            serde_json::json!("cost_limit_exceeded")
        );
    }

    #[test]
    fn test_units_checked_before_cost() {
        let bc = BudgetController::new();
        bc.init_run("r1", limits(10, 1.0)).unwrap();
        let s = bc.record_usage("r1", &ResourceUsage::new(10, 0, 5.0)).unwrap();
        assert_eq!(s.exceeded_reason, Some(ExceededReason::UnitsLimitExceeded));
    }

    #[test]
    fn test_exceeded_reason_never_overwritten() {
        let bc = BudgetController::new();
        bc.init_run("r1", limits(100, 1.0)).unwrap();
        bc.record_usage("r1", &ResourceUsage::new(0, 0, 2.0)).unwrap();
        let s = bc.record_usage("r1", &ResourceUsage::new(500, 0, 0.0)).unwrap();
        assert!(s.is_exceeded);
        assert_eq!(s.exceeded_reason, Some(ExceededReason::CostLimitExceeded));
    }

    #[test]
    fn test_counters_monotonic_and_negative_cost_clamped() {
        let bc = BudgetController::new();
        bc.init_run("r1", limits(0, 0.0)).unwrap();
        let a = bc.record_usage("r1", &ResourceUsage::new(5, 5, 0.3)).unwrap();
        let b = bc.record_usage("r1", &ResourceUsage::new(0, 0, -1.0)).unwrap();
        assert_eq!(b.total_units_used, a.total_units_used);
        assert!((b.total_cost_used - a.total_cost_used).abs() < f64::EPSILON);
        assert_eq!(b.calls, 2);
    }

    #[test]
    fn test_warning_issued_once() {
        let bc = BudgetController::new();
        bc.init_run("r1", limits(100, 0.0)).unwrap();
        let s = bc.record_usage("r1", &ResourceUsage::new(50, 0, 0.0)).unwrap();
        assert!(!s.warning_issued);
        let s = bc.record_usage("r1", &ResourceUsage::new(35, 0, 0.0)).unwrap();
        assert!(s.warning_issued);
        assert!(!s.is_exceeded);
        let s = bc.record_usage("r1", &ResourceUsage::new(1, 0, 0.0)).unwrap();
        assert!(s.warning_issued);
    }

    #[test]
    fn test_estimated_ops_remaining() {
        let bc = BudgetController::new();
        let st = bc.init_run("r1", limits(1000, 0.0)).unwrap();
        assert_eq!(st.estimated_ops_remaining, None);
        let s = bc.record_usage("r1", &ResourceUsage::new(100, 0, 0.0)).unwrap();
        // 900 units left at 100 per call; time dimension is far from binding.
        assert_eq!(s.estimated_ops_remaining, Some(9));
        assert!((s.units_pct - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_time_limit_enforced_on_record() {
        let bc = BudgetController::new();
        bc.init_run("r1", BudgetLimits::new(0, 0.0, 1)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let s = bc.record_usage("r1", &ResourceUsage::default()).unwrap();
        assert_eq!(s.exceeded_reason, Some(ExceededReason::TimeLimitExceeded));
    }

    #[test]
    fn test_limits_from_config() {
        let cfg = BudgetConfig::default();
        let l = BudgetLimits::from(&cfg);
        assert_eq!(l.max_duration_ms, cfg.max_duration_secs * 1000);
        assert!(l.validate().is_ok());
        assert!(BudgetLimits::new(1, -1.0, 0).validate().is_err());
    }
}

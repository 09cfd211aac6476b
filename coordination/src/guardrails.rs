//! Call-count and wall-clock guardrails for one orchestration run.
//!
//! A [`GuardrailMeter`] is created per run and dropped with it. It keeps a
//! ledger per expert and answers one question before every external call:
//! would this call push the expert past its budget? Counters only grow
//! within a run; cancelled calls are still charged for the time they held.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default maximum external calls per expert per run.
pub const DEFAULT_MAX_CALLS: u32 = 5;

/// Default wall-clock budget per expert per run.
pub const DEFAULT_MAX_WALL_CLOCK_MS: u64 = 45_000;

/// Per-expert budget for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailBudget {
    /// Maximum external calls.
    pub max_calls: u32,
    /// Maximum wall-clock time spent inside external calls.
    pub max_wall_clock_ms: u64,
}

impl Default for GuardrailBudget {
    fn default() -> Self {
        Self {
            max_calls: DEFAULT_MAX_CALLS,
            max_wall_clock_ms: DEFAULT_MAX_WALL_CLOCK_MS,
        }
    }
}

/// Cost of a prospective reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallCost {
    pub calls: u32,
    pub time_ms: u64,
}

impl CallCost {
    /// One call, time charged after the fact.
    pub fn single() -> Self {
        Self {
            calls: 1,
            time_ms: 0,
        }
    }
}

/// Counters consumed so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterUsage {
    pub calls_used: u32,
    pub time_used_ms: u64,
}

/// Why a reservation was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationDenial {
    CallsExhausted { used: u32, max: u32 },
    TimeExhausted { used_ms: u64, max_ms: u64 },
    UnknownExpert { expert_id: String },
}

impl std::fmt::Display for ReservationDenial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CallsExhausted { used, max } => {
                write!(f, "calls_exhausted ({}/{})", used, max)
            }
            Self::TimeExhausted { used_ms, max_ms } => {
                write!(f, "time_exhausted ({}ms/{}ms)", used_ms, max_ms)
            }
            Self::UnknownExpert { expert_id } => write!(f, "unknown_expert ({})", expert_id),
        }
    }
}

#[derive(Debug)]
struct Ledger {
    budget: GuardrailBudget,
    usage: MeterUsage,
}

impl Ledger {
    fn check(&self, cost: CallCost) -> Result<(), ReservationDenial> {
        let calls = self.usage.calls_used.saturating_add(cost.calls);
        if calls > self.budget.max_calls {
            return Err(ReservationDenial::CallsExhausted {
                used: self.usage.calls_used,
                max: self.budget.max_calls,
            });
        }
        let time = self.usage.time_used_ms.saturating_add(cost.time_ms);
        if self.usage.time_used_ms >= self.budget.max_wall_clock_ms
            || time > self.budget.max_wall_clock_ms
        {
            return Err(ReservationDenial::TimeExhausted {
                used_ms: self.usage.time_used_ms,
                max_ms: self.budget.max_wall_clock_ms,
            });
        }
        Ok(())
    }
}

/// Budget tracker scoped to one orchestration run.
#[derive(Debug)]
pub struct GuardrailMeter {
    run_id: String,
    ledgers: Mutex<HashMap<String, Ledger>>,
}

impl GuardrailMeter {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            ledgers: Mutex::new(HashMap::new()),
        }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn ledgers(&self) -> MutexGuard<'_, HashMap<String, Ledger>> {
        // Counters stay meaningful even if a holder panicked mid-update.
        self.ledgers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register an expert's budget. Re-registering keeps existing usage.
    pub fn register(&self, expert_id: impl Into<String>, budget: GuardrailBudget) {
        self.ledgers()
            .entry(expert_id.into())
            .and_modify(|ledger| ledger.budget = budget)
            .or_insert(Ledger {
                budget,
                usage: MeterUsage::default(),
            });
    }

    /// Reserve `cost` for `expert_id` in `run_id`. Never blocks.
    pub fn reserve(&self, run_id: &str, expert_id: &str, cost: CallCost) -> bool {
        if run_id != self.run_id {
            warn!(meter_run = %self.run_id, run_id, "reservation against another run's meter");
            return false;
        }
        self.try_reserve(expert_id, cost).is_ok()
    }

    /// Reserve `cost`, reporting why on refusal.
    ///
    /// Check and increment happen under one lock, so two experts reserving
    /// concurrently never lose an update.
    pub fn try_reserve(&self, expert_id: &str, cost: CallCost) -> Result<(), ReservationDenial> {
        let mut ledgers = self.ledgers();
        let ledger = ledgers
            .get_mut(expert_id)
            .ok_or_else(|| ReservationDenial::UnknownExpert {
                expert_id: expert_id.to_string(),
            })?;
        if let Err(denial) = ledger.check(cost) {
            debug!(run_id = %self.run_id, expert_id, %denial, "reservation denied");
            return Err(denial);
        }
        ledger.usage.calls_used += cost.calls;
        ledger.usage.time_used_ms = ledger.usage.time_used_ms.saturating_add(cost.time_ms);
        Ok(())
    }

    /// Add wall-clock time actually spent by `expert_id`.
    pub fn charge_time(&self, expert_id: &str, elapsed_ms: u64) {
        if let Some(ledger) = self.ledgers().get_mut(expert_id) {
            ledger.usage.time_used_ms = ledger.usage.time_used_ms.saturating_add(elapsed_ms);
        }
    }

    pub fn usage(&self, expert_id: &str) -> Option<MeterUsage> {
        self.ledgers().get(expert_id).map(|l| l.usage)
    }

    /// Reserve one call and start its clock.
    ///
    /// The returned ticket charges elapsed time when dropped, which also
    /// covers calls cancelled by a timeout.
    pub fn begin_call(self: &Arc<Self>, expert_id: &str) -> Result<CallTicket, ReservationDenial> {
        self.try_reserve(expert_id, CallCost::single())?;
        Ok(CallTicket {
            meter: Arc::clone(self),
            expert_id: expert_id.to_string(),
            started: Instant::now(),
        })
    }
}

/// An in-flight metered call.
#[derive(Debug)]
pub struct CallTicket {
    meter: Arc<GuardrailMeter>,
    expert_id: String,
    started: Instant,
}

impl Drop for CallTicket {
    fn drop(&mut self) {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        self.meter.charge_time(&self.expert_id, elapsed_ms);
    }
}

//! Energy integration of the instantaneous power estimates.
//!
//! Each step multiplies power by the wall-clock time since the previous step.
//! The step is clamped so that a long gap (suspended process, missed ingests)
//! is not booked as hours of continuous full-power flow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::estimator::finite_or_zero;

/// Running energy totals for one day. Net is always derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DayTotals {
    // ---
    #[serde(rename = "energyInWh")]
    pub in_wh: f64,
    #[serde(rename = "energyOutWh")]
    pub out_wh: f64,
}

impl DayTotals {
    pub fn net_wh(&self) -> f64 {
        self.in_wh - self.out_wh
    }
}

/// Result of a single integration step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnergyStep {
    #[serde(rename = "energyInWh")]
    pub in_wh: f64,
    #[serde(rename = "energyOutWh")]
    pub out_wh: f64,
    #[serde(rename = "energyNetWh")]
    pub net_wh: f64,
    /// Seconds actually credited for this step, after clamping.
    pub dt_secs: f64,
}

/// Holds the elapsed-time baseline between ingests.
#[derive(Debug, Clone)]
pub struct EnergyIntegrator {
    last: Option<DateTime<Utc>>,
    max_step_secs: f64,
}

impl EnergyIntegrator {
    pub fn new(max_step_secs: i64) -> Self {
        Self {
            last: None,
            max_step_secs: max_step_secs.max(0) as f64,
        }
    }

    /// Forget the baseline so the next step credits zero time.
    pub fn reset(&mut self) {
        self.last = None;
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last
    }

    /// Accumulate `p_in`/`p_out` (watts) into `totals` for the time elapsed
    /// since the previous call.
    ///
    /// Skewed clocks (`now` before the baseline) credit zero time. The
    /// baseline always moves to `now`, so clamped gaps are never re-counted.
    pub fn integrate(
        &mut self,
        totals: &mut DayTotals,
        p_in: f64,
        p_out: f64,
        now: DateTime<Utc>,
    ) -> EnergyStep {
        // ---
        let dt_secs = match self.last {
            Some(last) => {
                let elapsed = (now - last).num_milliseconds().max(0) as f64 / 1000.0;
                elapsed.min(self.max_step_secs)
            }
            None => 0.0,
        };
        self.last = Some(now);

        let dt_hours = dt_secs / 3600.0;
        totals.in_wh = finite_or_zero(totals.in_wh + finite_or_zero(p_in * dt_hours));
        totals.out_wh = finite_or_zero(totals.out_wh + finite_or_zero(p_out * dt_hours));

        EnergyStep {
            in_wh: totals.in_wh,
            out_wh: totals.out_wh,
            net_wh: totals.net_wh(),
            dt_secs,
        }
    }
}

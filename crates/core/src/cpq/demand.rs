use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, FixedOffset, Timelike};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use crate::config::{DemandModelKind, PricingConfig};

pub const DEFAULT_BUSINESS_HOURS_START: u32 = 9;
pub const DEFAULT_BUSINESS_HOURS_END: u32 = 17;
pub const DEFAULT_DEMAND_SPREAD: f64 = 0.05;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DemandContext {
    pub base_price: Decimal,
    pub quantity: u32,
    pub evaluated_at: DateTime<FixedOffset>,
}

/// Produces the dynamic pricing delta for a price calculation, or `None` when
/// no dynamic entry should be recorded at all (including when the delta would
/// overflow).
pub trait DemandModel: Send + Sync + Debug {
    fn adjustment(&self, context: &DemandContext) -> Option<Decimal>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoDemandAdjustment;

impl DemandModel for NoDemandAdjustment {
    fn adjustment(&self, _context: &DemandContext) -> Option<Decimal> {
        None
    }
}

/// Surcharge inside business hours, small discount outside them. The hour is
/// read in the offset carried by the evaluation timestamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeOfDayDemand {
    pub start_hour: u32,
    pub end_hour: u32,
    pub peak_rate: Decimal,
    pub off_peak_rate: Decimal,
}

impl Default for TimeOfDayDemand {
    fn default() -> Self {
        Self::new(DEFAULT_BUSINESS_HOURS_START, DEFAULT_BUSINESS_HOURS_END)
    }
}

impl TimeOfDayDemand {
    pub fn new(start_hour: u32, end_hour: u32) -> Self {
        Self {
            start_hour,
            end_hour,
            peak_rate: Decimal::new(5, 2),
            off_peak_rate: Decimal::new(-2, 2),
        }
    }

    pub fn rate_at(&self, at: &DateTime<FixedOffset>) -> Decimal {
        if (self.start_hour..=self.end_hour).contains(&at.hour()) {
            self.peak_rate
        } else {
            self.off_peak_rate
        }
    }
}

impl DemandModel for TimeOfDayDemand {
    fn adjustment(&self, context: &DemandContext) -> Option<Decimal> {
        let rate = self.rate_at(&context.evaluated_at);
        context.base_price.checked_mul(rate)?.checked_mul(Decimal::from(context.quantity))
    }
}

/// Time-of-day term plus a uniform demand factor in `[-spread, spread)`.
/// Only reproducible when built with [`RandomizedDemand::seeded`].
#[derive(Debug)]
pub struct RandomizedDemand {
    time: TimeOfDayDemand,
    spread: f64,
    rng: Mutex<StdRng>,
}

impl RandomizedDemand {
    pub fn seeded(time: TimeOfDayDemand, seed: u64) -> Self {
        Self { time, spread: DEFAULT_DEMAND_SPREAD, rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }

    pub fn from_entropy(time: TimeOfDayDemand) -> Self {
        Self { time, spread: DEFAULT_DEMAND_SPREAD, rng: Mutex::new(StdRng::from_entropy()) }
    }

    fn demand_factor(&self) -> Decimal {
        let draw = match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(-self.spread..self.spread),
            Err(poisoned) => poisoned.into_inner().gen_range(-self.spread..self.spread),
        };
        Decimal::from_f64(draw).unwrap_or(Decimal::ZERO).round_dp(4)
    }
}

impl DemandModel for RandomizedDemand {
    fn adjustment(&self, context: &DemandContext) -> Option<Decimal> {
        let rate = self.time.rate_at(&context.evaluated_at) + self.demand_factor();
        let delta =
            context.base_price.checked_mul(rate)?.checked_mul(Decimal::from(context.quantity))?;
        Some(delta.round_dp(2))
    }
}

pub fn demand_model_from_config(config: &PricingConfig) -> Arc<dyn DemandModel> {
    let time = TimeOfDayDemand::new(config.business_hours_start, config.business_hours_end);
    match config.demand_model {
        DemandModelKind::None => Arc::new(NoDemandAdjustment),
        DemandModelKind::TimeOfDay => Arc::new(time),
        DemandModelKind::Randomized => match config.demand_seed {
            Some(seed) => Arc::new(RandomizedDemand::seeded(time, seed)),
            None => Arc::new(RandomizedDemand::from_entropy(time)),
        },
    }
}

//! Loss-trend driven learning-rate schedule.
//!
//! Evaluated once per epoch boundary, in this order:
//! 1. an observed loss strictly below the historical minimum resets the step counter;
//! 2. at step 1 the one-off first-step coefficient divides the rate, then is dropped;
//! 3. otherwise every `steps_per_decay` steps the rate is divided by the decrease coefficient;
//! 4. the step counter advances.
//!
//! The very first call, made before any epoch has run with `(0.0, Some(0.0))`,
//! only seeds the optimizer with the start rate.

use serde::{Deserialize, Serialize};
use tonet_core::LearningRateConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleState {
    pub current_rate: f64,
    pub step_counter: u64,
    pub decrease_coefficient: f64,
    pub first_step_coefficient: Option<f64>,
    pub steps_per_decay: u64,
}

impl ScheduleState {
    pub fn from_config(config: &LearningRateConfig) -> Self {
        Self {
            current_rate: config.start_value,
            step_counter: 0,
            decrease_coefficient: config.decrease_coefficient,
            first_step_coefficient: config.first_epoch_decrease_coeff,
            steps_per_decay: config.skip_steps_number.max(1),
        }
    }
}

/// Advance the schedule by one epoch boundary and return the rate for the next epoch.
pub fn next_rate(
    mut state: ScheduleState,
    observed_loss: f64,
    historical_min: Option<f64>,
) -> (ScheduleState, f64) {
    if let Some(min) = historical_min
        && observed_loss < min
    {
        tracing::debug!(observed_loss, min, "Loss improved, restarting decay clock");
        state.step_counter = 0;
    }

    match state.first_step_coefficient {
        Some(coeff) if state.step_counter == 1 => {
            state.current_rate /= coeff;
            state.first_step_coefficient = None;
            tracing::info!(rate = state.current_rate, "First-step learning rate decrease");
        }
        _ if state.step_counter > 0 && state.step_counter % state.steps_per_decay == 0 => {
            state.current_rate /= state.decrease_coefficient;
            tracing::info!(rate = state.current_rate, "Learning rate decreased");
        }
        _ => {}
    }

    state.step_counter += 1;
    let rate = state.current_rate;
    (state, rate)
}

/// Owning wrapper over [`ScheduleState`] for the orchestrator.
#[derive(Debug, Clone)]
pub struct LearningRateScheduler {
    state: ScheduleState,
}

impl LearningRateScheduler {
    pub fn new(config: &LearningRateConfig) -> Self {
        Self::from_state(ScheduleState::from_config(config))
    }

    pub fn from_state(state: ScheduleState) -> Self {
        Self { state }
    }

    /// Rate for the next epoch given the last validation loss and the best so far.
    pub fn value(&mut self, observed_loss: f64, historical_min: Option<f64>) -> f64 {
        let (state, rate) = next_rate(self.state.clone(), observed_loss, historical_min);
        self.state = state;
        rate
    }

    /// Seed call made before the first epoch.
    pub fn seed(&mut self) -> f64 {
        self.value(0.0, Some(0.0))
    }

    pub fn state(&self) -> &ScheduleState {
        &self.state
    }
}

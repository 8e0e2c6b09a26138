//! Multi-cycle loop driver for `buildfix run`.

use anyhow::Result;
use tracing::{info, warn};

use crate::io::session::Session;
use crate::step::{LoopState, StepEnv, StepOutcome, run_step};

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// `goals_accomplished` succeeded and the success marker exists.
    Succeeded,
    /// Every cycle was used without success.
    BudgetExhausted,
    /// The oracle or the shell became unusable.
    Fatal { reason: String },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub cycles_used: u32,
    pub steps_executed: u32,
    pub stop: LoopStop,
}

/// Run cycles until success, budget exhaustion or a fatal condition.
///
/// Always terminates: every dispatched command is charged, and unparsable
/// replies are charged once the configured tolerance is used up.
pub fn run_loop<F: FnMut(&StepOutcome)>(
    env: &StepEnv<'_>,
    session: &mut Session,
    state: &mut LoopState,
    mut on_step: F,
) -> Result<LoopOutcome> {
    let mut steps_executed = 0u32;
    let stop = loop {
        if state.budget.is_exhausted() {
            info!(limit = state.budget.limit(), "cycle budget exhausted");
            break LoopStop::BudgetExhausted;
        }

        let step = run_step(env, session, state)?;
        steps_executed += 1;
        on_step(&step);

        match step {
            StepOutcome::OracleFailed { reason } => break LoopStop::Fatal { reason },
            StepOutcome::Dispatched { finished: true, .. } => {
                if env.paths.success_marker.exists() {
                    break LoopStop::Succeeded;
                }
                warn!("goals_accomplished returned without a success marker");
            }
            StepOutcome::Dispatched { .. } | StepOutcome::Unparsable { .. } => {}
        }

        if session.channel.is_closed() {
            break LoopStop::Fatal {
                reason: "shell session closed".to_string(),
            };
        }
    };
    Ok(LoopOutcome {
        cycles_used: state.budget.used(),
        steps_executed,
        stop,
    })
}

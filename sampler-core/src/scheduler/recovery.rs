//! Chip-reset recovery.

use crate::driver::{Algorithms, AuxSensors, ChipControl, EventSink};
use crate::error::SchedulerError;
use crate::functions::FunctionMask;

use super::control::Command;
use super::{RecoveryState, Scheduler};

/// Outcome of the last unexpected-reset recovery.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RecoveryReport {
    /// Reinit attempts made, at most the configured retry count.
    pub attempts: u8,
    /// A configuration load succeeded.
    pub reinitialized: bool,
    /// Functions active after the restart.
    pub restored: FunctionMask,
}

impl<C, S, A, E> Scheduler<C, S, A, E>
where
    C: ChipControl,
    S: AuxSensors,
    A: Algorithms,
    E: EventSink,
{
    /// Resets the chip on behalf of the user. The chip-reset event that
    /// follows takes the plain stop-and-reinit path.
    pub fn request_chip_reset(&mut self) -> Result<(), SchedulerError> {
        self.ensure_ready()?;
        self.state.user_reset_pending = true;
        info!("recovery: reset requested");
        self.reset_chips()?;
        Ok(())
    }

    pub(super) fn handle_chip_reset(&mut self) {
        if self.state.recovery.is_recovering() {
            debug!("recovery: reset seen while recovering, ignored");
            return;
        }

        let index = self.state.config_index.unwrap_or(0);
        if self.state.user_reset_pending || self.state.active.is_empty() {
            self.state.user_reset_pending = false;
            info!("recovery: expected reset, reinitializing");
            self.stop_all();
            if let Err(err) = self.load_configuration(index) {
                warn!("recovery: reinit failed ({})", err);
            }
            self.reset_control();
            self.enter_low_power();
            return;
        }

        let snapshot = self.state.active;
        let wear = self.state.wear.snapshot();
        self.state.recovery = RecoveryState::Recovering { snapshot, wear };
        warn!("recovery: unexpected chip reset (active {})", snapshot);

        let mut attempts = 0;
        let mut reinitialized = false;
        while attempts < self.config.reset_retries {
            attempts += 1;
            if let Err(err) = self.reset_chips() {
                warn!("recovery: reset failed ({})", err);
            }
            self.chip.delay(self.config.reset_settle);
            self.stop_all();
            match self.load_configuration(index) {
                Ok(()) => {
                    reinitialized = true;
                    break;
                }
                Err(err) => warn!("recovery: reinit attempt {} failed ({})", attempts, err),
            }
        }
        self.reset_control();
        self.enter_low_power();

        let restarted = if self.state.engineering_mode {
            self.restart_with_param_groups(snapshot)
        } else {
            self.start_with_search(snapshot)
        };
        if let Err(err) = restarted {
            error!("recovery: restart of {} failed ({})", snapshot, err);
        }
        self.restore_wear(wear);
        self.state.recovery = RecoveryState::Idle;

        let restored = self.state.active;
        info!(
            "recovery: done after {} attempts (restored {})",
            attempts, restored
        );
        self.state.last_recovery = Some(RecoveryReport {
            attempts,
            reinitialized,
            restored,
        });
    }

    fn stop_all(&mut self) {
        let active = self.state.active;
        if let Err(err) = self.sampling_control(active, Command::Stop) {
            warn!("recovery: stop failed ({})", err);
        }
    }
}

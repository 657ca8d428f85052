//! Engineering sessions: sampling with operator-chosen parameter groups.

use heapless::Vec;

use crate::driver::{Algorithms, AuxSensors, ChipControl, EventSink};
use crate::engineering::{ChannelParams, MAX_PARAM_GROUPS, SampleParams, SavedRate};
use crate::error::{DriverError, SchedulerError};
use crate::functions::{ChannelTag, FunctionMask, MAX_CHANNELS};

use super::Scheduler;
use super::control::Command;

impl<C, S, A, E> Scheduler<C, S, A, E>
where
    C: ChipControl,
    S: AuxSensors,
    A: Algorithms,
    E: EventSink,
{
    /// Loads configuration `index`, applies `groups` and starts `mask` there.
    ///
    /// AGC is skipped until [`Self::stop_engineering_sampling`]. A chip reset
    /// during the session applies the groups again before restarting. When
    /// the switch or a parameter write fails the session is dropped; a failed
    /// start leaves it running so the caller can stop it.
    pub fn start_engineering_sampling(
        &mut self,
        mask: FunctionMask,
        index: usize,
        groups: &[SampleParams],
    ) -> Result<FunctionMask, SchedulerError> {
        self.ensure_ready()?;
        self.engineering.begin(groups)?;
        if let Err(err) = self.switch_configuration(index) {
            self.end_session();
            return Err(err);
        }
        self.state.engineering_mode = true;
        info!("engineering: session on configuration {} ({} groups)", index, groups.len());

        let mask = self.expand_request(mask);
        self.save_rates(mask);
        let rates_changed = match self.apply_param_groups(mask) {
            Ok(changed) => changed,
            Err(err) => {
                self.end_session();
                return Err(err.into());
            }
        };
        let started = self.start_sampling_with_config(mask, index)?;
        if rates_changed {
            self.rebalance();
            self.refresh_aligner();
        }
        Ok(started)
    }

    /// Ends the session: stops everything, reloads the first configuration
    /// set and puts back the rates the groups replaced.
    pub fn stop_engineering_sampling(&mut self) -> Result<(), SchedulerError> {
        self.ensure_ready()?;
        let active = self.state.active;
        let stopped = self.sampling_control(active, Command::Stop);
        self.end_session();

        self.reset_chips()?;
        self.chip.delay(self.config.reset_settle);
        self.load_configuration(0)?;
        self.reset_control();
        self.enter_low_power();
        info!("engineering: session ended");
        stopped?;
        Ok(())
    }

    /// Parameter groups of the running session.
    #[must_use]
    pub fn param_groups(&self) -> &[SampleParams] {
        self.engineering.groups()
    }

    /// Restart path of chip-reset recovery while a session runs.
    pub(super) fn restart_with_param_groups(
        &mut self,
        mask: FunctionMask,
    ) -> Result<FunctionMask, SchedulerError> {
        let rates_changed = match self.apply_param_groups(mask) {
            Ok(changed) => changed,
            Err(err) => {
                warn!("engineering: reapplying parameters failed ({})", err);
                false
            }
        };
        let started = self.start_with_search(mask)?;
        if rates_changed {
            self.rebalance();
            self.refresh_aligner();
        }
        Ok(started)
    }

    fn end_session(&mut self) {
        for saved in self.engineering.end() {
            if let Some(descriptor) = self.registry.lookup_mut(saved.function) {
                descriptor.sample_rate_hz = saved.sample_rate_hz;
                descriptor.user_sample_rate_hz = saved.user_sample_rate_hz;
            }
        }
        self.state.engineering_mode = false;
    }

    fn save_rates(&mut self, mask: FunctionMask) {
        let mut displaced: Vec<SavedRate, MAX_PARAM_GROUPS> = Vec::new();
        let overriding = self
            .engineering
            .groups()
            .iter()
            .filter(|g| mask.has(g.function) && g.sample_rate_hz.is_some());
        for group in overriding {
            if let Some(descriptor) = self.registry.lookup(group.function) {
                let _ = displaced.push(SavedRate {
                    function: group.function,
                    sample_rate_hz: descriptor.sample_rate_hz,
                    user_sample_rate_hz: descriptor.user_sample_rate_hz,
                });
            }
        }
        for saved in displaced {
            self.engineering.remember_rate(saved);
        }
    }

    /// Writes the groups of the functions in `mask` to every chip.
    ///
    /// Returns whether a group overrode a sample rate. All groups are
    /// attempted; the first write failure is returned.
    fn apply_param_groups(&mut self, mask: FunctionMask) -> Result<bool, DriverError> {
        let mut rates_changed = false;
        let mut failure = None;
        let groups = self.engineering.clone();

        for group in groups.groups().iter().filter(|g| mask.has(g.function)) {
            let Some(descriptor) = self.registry.lookup_mut(group.function) else {
                continue;
            };
            if let Some(rate_hz) = group.sample_rate_hz {
                descriptor.user_sample_rate_hz = Some(rate_hz);
                descriptor.sample_rate_hz = rate_hz;
                rates_changed = true;
            }
            let writes: Vec<(ChannelTag, ChannelParams), MAX_CHANNELS> = descriptor
                .channels()
                .iter()
                .enumerate()
                .map(|(index, tag)| (*tag, group.channel(index)))
                .filter(|(_, params)| !params.is_empty())
                .collect();

            let result = self.on_all_chips(|chip| {
                writes
                    .iter()
                    .try_for_each(|(tag, params)| chip.write_channel_params(*tag, *params))
            });
            match result {
                Ok(()) => debug!(
                    "engineering: {} channels of {} reprogrammed",
                    writes.len(),
                    group.function
                ),
                Err(err) => {
                    warn!("engineering: parameters for {} failed ({})", group.function, err);
                    failure = failure.or(Some(err));
                }
            }
        }

        failure.map_or(Ok(rates_changed), Err)
    }
}

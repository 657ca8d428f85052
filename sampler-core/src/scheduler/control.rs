//! Start/stop orchestration, configuration switching and rate overrides.

use crate::driver::{Algorithms, AuxSensorKind, AuxSensors, ChipControl, EventSink};
use crate::error::{DriverError, ParameterError, SchedulerError};
use crate::events::{EventReport, SoftEvents};
use crate::functions::{FunctionId, FunctionMask};
use crate::slots::SLOT_BASE_RATE_HZ;
use crate::wear::WearDetect;

use super::{LoopState, Scheduler};

/// Sample-rate overrides must be a multiple of this.
pub const SAMPLE_RATE_STEP_HZ: u16 = 25;

/// Direction of a sampling control request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    Start,
    Stop,
}

const ADT: FunctionMask = FunctionId::Adt.mask();

/// Functions that keep lead detection armed under hardware ADT.
const LEAD_GATE: FunctionMask = ADT.with(FunctionId::LeadDet);

impl<C, S, A, E> Scheduler<C, S, A, E>
where
    C: ChipControl,
    S: AuxSensors,
    A: Algorithms,
    E: EventSink,
{
    /// Starts the functions in `mask`, switching configuration sets when the
    /// loaded one cannot provide them.
    ///
    /// Returns the functions that actually started. Bits that name no known
    /// function are ignored.
    pub fn start_sampling(&mut self, mask: FunctionMask) -> Result<FunctionMask, SchedulerError> {
        self.ensure_ready()?;
        self.start_with_search(mask)
    }

    /// Switches to configuration `index` and starts `mask` there without
    /// searching the catalog.
    pub fn start_sampling_with_config(
        &mut self,
        mask: FunctionMask,
        index: usize,
    ) -> Result<FunctionMask, SchedulerError> {
        self.switch_configuration(index)?;
        let mask = self.expand_request(mask);
        let missing = Self::demand(mask).difference(self.loaded_functions());
        if !missing.is_empty() {
            warn!("control: configuration {} lacks {}", index, missing);
            return Err(SchedulerError::Resource { missing });
        }
        self.sampling_control(mask, Command::Start)
    }

    /// Stops the functions in `mask`. Stopping functions that are not running
    /// is a no-op.
    pub fn stop_sampling(&mut self, mask: FunctionMask) -> Result<FunctionMask, SchedulerError> {
        self.ensure_ready()?;
        self.sampling_control(mask, Command::Stop)
    }

    /// Stops everything and loads configuration `index`.
    pub fn switch_configuration(&mut self, index: usize) -> Result<(), SchedulerError> {
        self.ensure_ready()?;
        if index >= self.catalog.len() {
            return Err(ParameterError::ConfigIndex(index).into());
        }
        if self.state.config_index == Some(index) {
            return Ok(());
        }

        let active = self.state.active;
        self.sampling_control(active, Command::Stop)?;
        self.reset_chips()?;
        self.chip.delay(self.config.switch_settle);
        self.load_configuration(index)?;
        self.reset_control();
        self.enter_low_power();
        info!("control: switched to configuration {}", index);
        Ok(())
    }

    /// Overrides the sample rate of every function in `mask`.
    ///
    /// Active functions are rebalanced right away; the others pick the rate
    /// up when they start.
    pub fn set_function_sample_rate(
        &mut self,
        mask: FunctionMask,
        rate_hz: u16,
    ) -> Result<(), SchedulerError> {
        self.ensure_ready()?;
        validate_sample_rate(rate_hz)?;
        Self::ensure_known(mask)?;

        for descriptor in self.registry.for_each_active_mut(mask) {
            descriptor.user_sample_rate_hz = Some(rate_hz);
            descriptor.sample_rate_hz = rate_hz;
        }
        debug!("control: rate of {} set to {} Hz", mask, rate_hz);

        if mask.intersects(self.state.active) {
            self.rebalance();
            self.refresh_aligner();
        }
        Ok(())
    }

    /// Known functions of a start request. Lead detection runs on the ECG
    /// channels, so asking for it starts ECG as well.
    pub(super) fn expand_request(&self, mask: FunctionMask) -> FunctionMask {
        let mask = if mask.has(FunctionId::LeadDet) {
            mask.with(FunctionId::Ecg)
        } else {
            mask
        };
        mask.intersection(self.registry.supported())
    }

    /// Part of a start request the loaded configuration has to provide.
    /// ADT rides along with any configuration unless it is all that was asked for.
    fn demand(mask: FunctionMask) -> FunctionMask {
        if mask == ADT {
            ADT
        } else {
            mask.difference(ADT)
        }
    }

    pub(super) fn start_with_search(
        &mut self,
        mask: FunctionMask,
    ) -> Result<FunctionMask, SchedulerError> {
        let mask = self.expand_request(mask);
        if mask.is_empty() {
            return Ok(FunctionMask::EMPTY);
        }
        let demand = Self::demand(mask);
        if !self.loaded_functions().contains(demand) {
            let Some(index) = self.catalog.find_for(demand, ADT, self.config.topology) else {
                let missing = demand.difference(self.loaded_functions());
                warn!("control: no configuration provides {}", missing);
                return Err(SchedulerError::Resource { missing });
            };
            self.hot_swap(index)?;
        }
        self.sampling_control(mask, Command::Start)
    }

    /// Reloads the chip with configuration `index`, replaying ADT if it was running.
    fn hot_swap(&mut self, index: usize) -> Result<(), SchedulerError> {
        let previous = self.state.active;
        let wear = self.state.wear.snapshot();
        info!("control: hot-swap to configuration {} (active {})", index, previous);

        self.sampling_control(previous, Command::Stop)?;
        self.reset_chips()?;
        self.chip.delay(self.config.switch_settle);
        self.load_configuration(index)?;
        self.reset_control();
        self.enter_low_power();

        if previous.has(FunctionId::Adt) {
            self.sampling_control(ADT, Command::Start)?;
            self.restore_wear(wear);
        }
        Ok(())
    }

    /// Shared start/stop path. Returns the functions whose state changed.
    pub(super) fn sampling_control(
        &mut self,
        mask: FunctionMask,
        command: Command,
    ) -> Result<FunctionMask, SchedulerError> {
        let previous = self.state.active;
        let changing = match command {
            Command::Start => mask
                .intersection(self.loaded_functions())
                .difference(previous),
            Command::Stop => mask.intersection(previous),
        };
        if changing.is_empty() {
            return Ok(changing);
        }

        let recovering = self.state.recovery.is_recovering();
        let mut failure = None;
        for id in changing.functions() {
            let result = match command {
                Command::Start => self.start_function(id),
                Command::Stop => self.stop_function(id),
            };
            if let Err(err) = result {
                warn!("control: {} of {} failed ({})", command_label(command), id, err);
                failure = failure.or(Some(err));
                continue;
            }
            match command {
                Command::Start => {
                    self.state.active = self.state.active.with(id);
                    if let Some(descriptor) = self.registry.lookup_mut(id) {
                        descriptor.reset_runtime();
                    }
                }
                Command::Stop => self.state.active = self.state.active.without(id),
            }
            if recovering {
                continue;
            }
            let algorithm = match command {
                Command::Start => self.algorithms.start(id),
                Command::Stop => self.algorithms.stop(id),
            };
            if let Err(err) = algorithm {
                warn!(
                    "control: algorithm {} for {} failed ({})",
                    command_label(command),
                    id,
                    err
                );
            }
        }

        let active = self.state.active;
        let changed = match command {
            Command::Start => active.difference(previous),
            Command::Stop => previous.difference(active),
        };
        if command == Command::Stop {
            self.state.soft_events.insert(SoftEvents::FORCE_READ);
            if !previous.difference(ADT).is_empty() && active.difference(ADT).is_empty() {
                self.algorithms.reset_gain();
            }
        }
        self.update_aux_caching(previous, active);
        self.update_lead_detect(previous, active);
        self.apply_adt_only_watermark(active);
        if self.config.sample_rate_modify {
            self.rebalance();
        }
        self.refresh_slots();
        self.enter_low_power();
        self.refresh_aligner();
        debug!("control: active {} -> {}", previous, active);

        if !self.state.soft_events.is_empty() && self.state.loop_state == LoopState::Idle {
            self.drain()?;
        }

        match failure {
            Some(err) => Err(err.into()),
            None => Ok(changed),
        }
    }

    fn start_function(&mut self, id: FunctionId) -> Result<(), DriverError> {
        if id == FunctionId::Adt {
            self.start_adt()
        } else {
            self.chip.function_start(id)
        }
    }

    fn stop_function(&mut self, id: FunctionId) -> Result<(), DriverError> {
        if id == FunctionId::Adt {
            self.stop_adt()
        } else {
            self.chip.function_stop(id)
        }
    }

    fn start_adt(&mut self) -> Result<(), DriverError> {
        if self.config.soft_adt_confirm {
            self.algorithms.start_adt_with_motion();
            self.state.wear.start_timer(&mut self.algorithms);
            self.state.wear.set_hard_adt_owned(false);
        } else {
            self.chip.function_start(FunctionId::Adt)?;
            self.state.wear.set_hard_adt_owned(true);
        }
        self.state.wear.force(&mut self.chip, WearDetect::WearOn)
    }

    fn stop_adt(&mut self) -> Result<(), DriverError> {
        if self.config.soft_adt_confirm {
            self.algorithms.reset_motion();
            self.state.wear.stop_timer(&mut self.algorithms);
        }
        self.state.wear.set_hard_adt_owned(false);
        self.chip.function_stop(FunctionId::Adt)?;
        self.state.wear.force(&mut self.chip, WearDetect::WearOn)?;
        self.sink.report(&EventReport::wear_released());
        Ok(())
    }

    /// Caching follows the empty/non-empty edges of the active set only.
    fn update_aux_caching(&mut self, previous: FunctionMask, active: FunctionMask) {
        let starting = previous.is_empty() && !active.is_empty();
        let stopping = !previous.is_empty() && active.is_empty();
        if !starting && !stopping {
            return;
        }
        let aux = self.config.aux;
        let kinds = [
            (aux.accel, AuxSensorKind::Accel),
            (aux.cap, AuxSensorKind::Cap),
            (aux.temp, AuxSensorKind::Temp),
        ];
        for (_, kind) in kinds.into_iter().filter(|(enabled, _)| *enabled) {
            if starting {
                self.sensors.start_caching(kind);
            } else {
                self.sensors.stop_caching(kind);
            }
        }
        trace!("control: aux caching {}", if starting { "started" } else { "stopped" });
    }

    fn update_lead_detect(&mut self, previous: FunctionMask, active: FunctionMask) {
        if !self.config.lead_detect {
            return;
        }
        let was = previous.intersects(LEAD_GATE);
        let is = active.intersects(LEAD_GATE);
        if was != is {
            self.algorithms.set_hard_adt_lead_detect(is);
        }
    }

    fn apply_adt_only_watermark(&mut self, active: FunctionMask) {
        let Some(words) = self.config.adt_only_watermark else {
            return;
        };
        let adt_only = active == ADT;
        let target = match (adt_only, self.state.saved_watermark) {
            (true, None) => {
                self.state.saved_watermark = Some(self.state.fifo_watermark);
                words
            }
            (false, Some(saved)) => {
                self.state.saved_watermark = None;
                saved
            }
            _ => return,
        };
        self.state.fifo_watermark = target;
        if let Err(err) = self.chip.write_fifo_watermark(target) {
            warn!("control: watermark write failed ({})", err);
        }
    }

    pub(super) fn rebalance(&mut self) {
        let active = self.state.active;
        if let Err(err) = self
            .slots
            .rebalance_sample_rates(&mut self.chip, &mut self.registry, active)
        {
            warn!("control: rate rebalance failed ({})", err);
        }
    }

    /// Rewrites slot enables for the current active set.
    pub(super) fn refresh_slots(&mut self) {
        let slot_times = if self.config.dynamic_slot_order {
            self.loaded_config().map(|set| &set.slot_times)
        } else {
            None
        };
        if let Err(err) = self.slots.apply_enable(
            &mut self.chip,
            &self.registry,
            self.state.active,
            self.state.wear.hard_adt_owned(),
            slot_times,
        ) {
            warn!("control: slot enable failed ({})", err);
        }
    }

    /// Points the aligner at the fastest active function.
    pub(super) fn refresh_aligner(&mut self) {
        if !self.config.nonsync_aux {
            return;
        }
        let rates = self.slots.table().rates_hz;
        let reference = self
            .registry
            .fastest_active(self.state.active)
            .map(|descriptor| {
                let frame_rate = descriptor
                    .slots()
                    .indices()
                    .map(|slot| rates[usize::from(slot)])
                    .max()
                    .filter(|rate| *rate != 0)
                    .unwrap_or(descriptor.sample_rate_hz);
                (descriptor.id, frame_rate)
            });

        let current = self.aux.accel.reference();
        match reference {
            Some((id, rate))
                if current != Some(id) || self.aux.accel.step().den != u32::from(rate) =>
            {
                self.aux
                    .accel
                    .reconfigure(Some(id), self.config.accel_rate_hz, rate);
                trace!("control: aux aligned to {} at {} Hz", id, rate);
            }
            None if current.is_some() => self.aux.accel.reconfigure(None, 0, 0),
            _ => {}
        }
    }
}

/// Rejects rates the slot dividers cannot produce.
pub(crate) const fn validate_sample_rate(rate_hz: u16) -> Result<(), ParameterError> {
    if rate_hz == 0 || rate_hz % SAMPLE_RATE_STEP_HZ != 0 || rate_hz > SLOT_BASE_RATE_HZ {
        Err(ParameterError::SampleRate(rate_hz))
    } else {
        Ok(())
    }
}

const fn command_label(command: Command) -> &'static str {
    match command {
        Command::Start => "start",
        Command::Stop => "stop",
    }
}

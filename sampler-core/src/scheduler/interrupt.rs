//! Interrupt/event drain loop.
//!
//! One cycle runs passes until no soft event is left pending. Every pass
//! reads the chip status, arbitrates wear, reads the FIFO when asked to,
//! runs the lead and gain gates, handles chip resets, reports, and finally
//! dispatches the FIFO payload to the active functions.

use crate::aligner::AlignedWindow;
use crate::config::InterruptMode;
use crate::driver::{
    Algorithms, AuxSensorKind, AuxSensors, ChipControl, EventSink, LeadChange, SensorWindow,
};
use crate::error::{DriverError, SchedulerError};
use crate::events::{EventExtra, EventReport, IrqEvents, SoftEvents};
use crate::functions::{DispatchStats, FunctionId, LeadState};
use crate::irq::IrqLatch;
use crate::wear::SwitchMode;

use super::{FIFO_BUFFER_BYTES, Lifecycle, LoopState, Scheduler};

/// How a call into the loop ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CycleOutcome {
    /// At least one pass ran and no soft event is left.
    Completed,
    /// Interrupt mode without a latched interrupt or pending soft event.
    Spurious,
    /// The loop was already running; nothing was done.
    Reentrant,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CycleSummary {
    pub outcome: CycleOutcome,
    pub passes: u8,
    /// Union of the event bits reported over all passes.
    pub events: IrqEvents,
    pub stats: DispatchStats,
}

impl CycleSummary {
    const fn new(outcome: CycleOutcome) -> Self {
        Self {
            outcome,
            passes: 0,
            events: IrqEvents::empty(),
            stats: DispatchStats::new(),
        }
    }
}

struct PassSummary {
    events: IrqEvents,
    stats: DispatchStats,
}

impl<C, S, A, E> Scheduler<C, S, A, E>
where
    C: ChipControl,
    S: AuxSensors,
    A: Algorithms,
    E: EventSink,
{
    /// Records a hardware interrupt. Touches no chip state.
    pub fn note_interrupt(&mut self) {
        self.state.irq_seen = true;
    }

    /// Consumes `latch` and runs one cycle.
    pub fn service_interrupt(&mut self, latch: &IrqLatch) -> Result<CycleSummary, SchedulerError> {
        if latch.take() {
            self.note_interrupt();
        }
        self.run_interrupt_cycle()
    }

    /// Runs the drain loop once.
    ///
    /// Hitting the repeat cap leaves the scheduler uninitialized and returns
    /// [`SchedulerError::LoopExhausted`].
    pub fn run_interrupt_cycle(&mut self) -> Result<CycleSummary, SchedulerError> {
        self.ensure_ready()?;
        if self.state.loop_state == LoopState::Running {
            return Ok(CycleSummary::new(CycleOutcome::Reentrant));
        }
        match self.config.interrupt_mode {
            InterruptMode::Polling => self.tick_motion()?,
            InterruptMode::Interrupt => {
                if !self.state.irq_seen && self.state.soft_events.is_empty() {
                    trace!("loop: spurious call");
                    return Ok(CycleSummary::new(CycleOutcome::Spurious));
                }
            }
        }
        self.state.irq_seen = false;
        self.drain()
    }

    pub(super) fn drain(&mut self) -> Result<CycleSummary, SchedulerError> {
        self.state.loop_state = LoopState::Running;
        let result = self.drain_passes();
        self.state.loop_state = LoopState::Idle;
        result
    }

    fn drain_passes(&mut self) -> Result<CycleSummary, SchedulerError> {
        let mut summary = CycleSummary::new(CycleOutcome::Completed);
        loop {
            if summary.passes >= self.config.max_repeat {
                self.state.lifecycle = Lifecycle::Uninitialized;
                error!(
                    "loop: exhausted after {} passes (soft events {})",
                    summary.passes,
                    self.state.soft_events
                );
                return Err(SchedulerError::LoopExhausted {
                    passes: summary.passes,
                });
            }
            summary.passes += 1;

            let pass = self.process_pass()?;
            summary.events.insert(pass.events);
            summary.stats += pass.stats;

            if self.state.soft_events.is_empty() {
                return Ok(summary);
            }
            trace!("loop: repeating (soft events {})", self.state.soft_events);
        }
    }

    fn process_pass(&mut self) -> Result<PassSummary, SchedulerError> {
        let mask = IrqEvents::process_mask(self.config.hard_adt, self.config.lead_detect);
        let mut events = match self.read_irq_status() {
            Ok(status) => status & mask,
            Err(DriverError::Communication) => {
                warn!("loop: irq status unreadable, treating as chip reset");
                IrqEvents::CHIP_RESET
            }
            Err(err) => {
                warn!("loop: irq status read failed ({})", err);
                IrqEvents::empty()
            }
        };
        let mut extra = EventExtra::empty();

        self.arbitrate_wear(&mut events, &mut extra);

        if self.config.interrupt_mode == InterruptMode::Polling {
            events.insert(IrqEvents::FIFO_WATERMARK);
        }
        self.fifo_len = 0;
        let read_requested = self.state.soft_events.intersects(SoftEvents::READ);
        if events.intersects(IrqEvents::FIFO) || read_requested {
            self.read_fifo(read_requested);
        }

        if self.config.lead_detect {
            self.run_lead_gates(&mut events, &mut extra);
        }
        let agc = if self.state.engineering_mode {
            Ok(())
        } else {
            self.algorithms.process(&self.fifo[..self.fifo_len], events)
        };
        if let Err(err) = agc {
            warn!("loop: agc failed ({})", err);
        }

        if events.contains(IrqEvents::CHIP_RESET) {
            self.fifo_len = 0;
            self.handle_chip_reset();
        }
        self.enter_low_power();

        if !events.is_empty() || !extra.is_empty() {
            self.sink.report(&EventReport::new(events, extra));
        }

        let stats = if self.fifo_len > 0 || events.intersects(IrqEvents::FIFO) {
            self.dispatch_fifo()?
        } else {
            DispatchStats::new()
        };

        self.run_event_hooks(events, extra);
        Ok(PassSummary { events, stats })
    }

    fn arbitrate_wear(&mut self, events: &mut IrqEvents, extra: &mut EventExtra) {
        let soft = self.state.soft_events & SoftEvents::WEAR;
        self.state.soft_events.remove(SoftEvents::WEAR);
        if !self.config.hard_adt {
            return;
        }
        if soft.contains(SoftEvents::WEAR_ON) {
            events.insert(IrqEvents::WEAR_ON);
            extra.insert(EventExtra::LIVING);
        }
        if soft.contains(SoftEvents::WEAR_OFF) {
            events.insert(IrqEvents::WEAR_OFF);
        }

        let adt_active = self.state.active.has(FunctionId::Adt);
        self.state
            .wear
            .process_events(&mut self.chip, events, adt_active, SwitchMode::EventDriven);
        if self.config.soft_adt_confirm {
            self.state
                .wear
                .confirm_with_motion(&mut self.algorithms, events, extra, adt_active);
        }
    }

    /// Reads the FIFO into the pass buffer.
    ///
    /// Without a pending read request, interrupt mode skips reads below the
    /// watermark and leaves the soft events alone.
    fn read_fifo(&mut self, read_requested: bool) {
        let level = match self.read_fifo_level() {
            Ok(level) => level,
            Err(err) => {
                warn!("fifo: level read failed ({})", err);
                self.state.soft_events.remove(SoftEvents::READ);
                return;
            }
        };
        if !read_requested
            && self.config.interrupt_mode == InterruptMode::Interrupt
            && level < self.state.fifo_watermark
        {
            trace!(
                "fifo: {} words below watermark {}, skipped",
                level,
                self.state.fifo_watermark
            );
            return;
        }
        self.state.soft_events.remove(SoftEvents::READ);

        let available = usize::from(level) * 4;
        if available == 0 {
            return;
        }
        let bytes = available.min(FIFO_BUFFER_BYTES);
        match self.chip.read_fifo(&mut self.fifo[..bytes]) {
            Ok(read) => {
                self.fifo_len = read.bytes.min(bytes);
                if read.more_pending || available > bytes {
                    self.state.soft_events.insert(SoftEvents::TRY_READ);
                }
                trace!("fifo: read {} bytes", self.fifo_len);
            }
            Err(err) => warn!("fifo: read failed ({})", err),
        }
    }

    fn run_lead_gates(&mut self, events: &mut IrqEvents, extra: &mut EventExtra) {
        let fifo = &self.fifo[..self.fifo_len];
        if let Err(err) = self.algorithms.calibrate(fifo) {
            warn!("loop: lead calibration failed ({})", err);
        }
        match self.algorithms.handle(events, fifo) {
            Ok(outcome) => {
                extra.insert(outcome.extra);
                if outcome.force_reread {
                    self.state.soft_events.insert(SoftEvents::FORCE_READ);
                }
            }
            Err(err) => warn!("loop: lead handling failed ({})", err),
        }
    }

    fn run_event_hooks(&mut self, events: IrqEvents, extra: EventExtra) {
        let lead = if events.contains(IrqEvents::LEAD_ON) {
            Some((LeadChange::On, LeadState::On))
        } else if events.contains(IrqEvents::LEAD_OFF) {
            Some((LeadChange::Off, LeadState::Off))
        } else {
            None
        };
        if let Some((change, state)) = lead {
            for id in [FunctionId::Ecg, FunctionId::LeadDet] {
                if let Some(descriptor) = self.registry.lookup_mut(id) {
                    descriptor.variant.set_lead(state);
                }
            }
            self.sink.lead_changed(change, extra);
        }
        if events.intersects(IrqEvents::WEAR) {
            self.sink
                .wear_changed(&EventReport::new(events & IrqEvents::WEAR, extra));
        }
    }

    /// Marks the scheduler uninitialized when a sensor overran its buffer.
    pub(super) fn check_aux(
        &mut self,
        sensor: AuxSensorKind,
        count: usize,
        capacity: usize,
    ) -> Result<usize, SchedulerError> {
        if count <= capacity {
            return Ok(count);
        }
        self.state.lifecycle = Lifecycle::Uninitialized;
        error!(
            "loop: {} reported {} samples into {} slots",
            aux_label(sensor),
            count,
            capacity
        );
        Err(SchedulerError::AuxOverflow { sensor })
    }

    fn dispatch_fifo(&mut self) -> Result<DispatchStats, SchedulerError> {
        let aux = self.config.aux;
        let timer_running = self.state.wear.timer_running();

        // The confirm timer consumes the accelerometer while it runs.
        let accel_count = if aux.accel && !timer_running {
            let out = self.aux.accel.fresh_mut();
            let capacity = out.len();
            let count = self.sensors.read_accel(out);
            self.check_aux(AuxSensorKind::Accel, count, capacity)?
        } else {
            0
        };
        let cap_count = if aux.cap {
            let count = self.sensors.read_cap(&mut self.aux.cap);
            self.check_aux(AuxSensorKind::Cap, count, self.aux.cap.len())?
        } else {
            0
        };
        let temp_count = if aux.temp {
            let count = self.sensors.read_temp(&mut self.aux.temp);
            self.check_aux(AuxSensorKind::Temp, count, self.aux.temp.len())?
        } else {
            0
        };

        let active = self.state.active;
        let fifo = &self.fifo[..self.fifo_len];
        let reference = self
            .aux
            .accel
            .reference()
            .filter(|_| self.config.nonsync_aux && aux.accel && !timer_running);
        let window = match reference {
            Some(id) => {
                let frames = self
                    .registry
                    .lookup(id)
                    .map_or(0, |descriptor| descriptor.count_frames(fifo));
                self.aux.accel.align(frames, accel_count)
            }
            None => AlignedWindow {
                head: 0,
                len: accel_count,
            },
        };

        let sensors = SensorWindow {
            accel: self.aux.accel.window(window),
            cap: &self.aux.cap[..cap_count],
            temp: &self.aux.temp[..temp_count],
        };
        let stats = self
            .registry
            .dispatch(active, fifo, &sensors, &mut self.algorithms);

        if reference.is_some() {
            self.aux.accel.retain(accel_count, window);
        }
        if stats.decode_errors > 0 {
            debug!("loop: {} decode errors this pass", stats.decode_errors);
        }
        Ok(stats)
    }
}

pub(super) const fn aux_label(sensor: AuxSensorKind) -> &'static str {
    match sensor {
        AuxSensorKind::Accel => "accel",
        AuxSensorKind::Cap => "cap",
        AuxSensorKind::Temp => "temp",
    }
}

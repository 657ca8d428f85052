//! Hand-overs between hardware ADT and the accelerometer confirm path.

use crate::driver::{Algorithms, AuxSensorKind, AuxSensors, ChipControl, EventSink};
use crate::error::SchedulerError;
use crate::events::{EventExtra, EventReport, IrqEvents};
use crate::functions::FunctionId;
use crate::wear::{SwitchMode, WearDetect, WearSnapshot};

use super::Scheduler;

impl<C, S, A, E> Scheduler<C, S, A, E>
where
    C: ChipControl,
    S: AuxSensors,
    A: Algorithms,
    E: EventSink,
{
    /// Movement was seen: hardware ADT takes over wear detection.
    pub fn start_hard_adt(&mut self) -> Result<(), SchedulerError> {
        self.ensure_ready()?;
        if !self.state.active.has(FunctionId::Adt) {
            return Ok(());
        }
        self.chip.function_start(FunctionId::Adt)?;
        self.state.wear.set_hard_adt_owned(true);
        self.algorithms.reset_motion();
        self.refresh_slots();
        info!("adt: hardware detection owns wear");
        Ok(())
    }

    /// Hands wear detection from hardware ADT back to the confirm timer.
    pub fn stop_hard_adt_and_start_motion_detect(&mut self) -> Result<(), SchedulerError> {
        self.ensure_ready()?;
        if !self.state.active.has(FunctionId::Adt) {
            return Ok(());
        }
        self.chip.function_stop(FunctionId::Adt)?;

        let mut events = IrqEvents::WEAR_OFF;
        self.state
            .wear
            .process_events(&mut self.chip, &mut events, true, SwitchMode::Forced);
        self.state.wear.set_hard_adt_owned(false);
        self.algorithms.reset_motion();
        self.state.wear.start_timer(&mut self.algorithms);
        self.refresh_slots();

        if !events.is_empty() {
            self.sink
                .report(&EventReport::new(events, EventExtra::empty()));
        }
        info!("adt: motion detection owns wear");
        Ok(())
    }

    /// Re-arms wear-on detection when the device is currently considered worn.
    pub fn redetect_wear_on(&mut self) -> Result<(), SchedulerError> {
        self.ensure_ready()?;
        if self.state.wear.detect() != WearDetect::WearOff {
            return Ok(());
        }
        let mut events = IrqEvents::WEAR_OFF;
        let adt_active = self.state.active.has(FunctionId::Adt);
        self.state
            .wear
            .process_events(&mut self.chip, &mut events, adt_active, SwitchMode::Forced);
        if !events.is_empty() {
            self.sink
                .report(&EventReport::new(events, EventExtra::empty()));
        }
        Ok(())
    }

    /// Confirm timer handler: feeds fresh motion samples to the confirmer.
    pub fn motion_tick(&mut self) -> Result<(), SchedulerError> {
        self.ensure_ready()?;
        self.tick_motion()
    }

    pub(super) fn tick_motion(&mut self) -> Result<(), SchedulerError> {
        if !self.state.wear.timer_running() {
            return Ok(());
        }
        let aux = self.config.aux;
        let accel_count = if aux.accel {
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
        self.algorithms.feed(
            &self.aux.accel.fresh()[..accel_count],
            &self.aux.cap[..cap_count],
        );
        Ok(())
    }

    /// Puts ADT ownership, the confirm timer and the armed wear transition
    /// back to `snapshot` after a restart.
    pub(super) fn restore_wear(&mut self, snapshot: WearSnapshot) {
        if !self.state.active.has(FunctionId::Adt) {
            return;
        }

        let owned = self.state.wear.hard_adt_owned();
        if snapshot.hard_adt_owned != owned {
            let result = if snapshot.hard_adt_owned {
                self.chip.function_start(FunctionId::Adt)
            } else {
                self.chip.function_stop(FunctionId::Adt)
            };
            match result {
                Ok(()) => self.state.wear.set_hard_adt_owned(snapshot.hard_adt_owned),
                Err(err) => warn!("adt: ownership restore failed ({})", err),
            }
        }

        let running = self.state.wear.timer_running();
        if snapshot.timer_running && !running {
            self.state.wear.start_timer(&mut self.algorithms);
        } else if !snapshot.timer_running && running {
            self.state.wear.stop_timer(&mut self.algorithms);
        }

        let rearmed = if snapshot.detect == self.state.wear.detect() {
            Ok(())
        } else {
            self.state.wear.force(&mut self.chip, snapshot.detect)
        };
        if let Err(err) = rearmed {
            warn!("adt: wear restore failed ({})", err);
        }
        self.refresh_slots();
        debug!("adt: wear state restored");
    }
}

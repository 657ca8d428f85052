//! Wear/ADT arbitration between hardware wear interrupts and the
//! accelerometer-confirmed software path.

use crate::driver::{ChipControl, MotionConfirm};
use crate::error::DriverError;
use crate::events::{EventExtra, IrqEvents};

/// Transition the wear detector is currently armed for.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WearDetect {
    /// Waiting for the device to be put on.
    #[default]
    WearOn,
    /// Worn; waiting for it to come off.
    WearOff,
}

/// How a wear switch request is issued.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SwitchMode {
    /// Follows a wear interrupt; honored only while hardware ADT is owned.
    EventDriven,
    /// Issued by sampling control; always honored.
    Forced,
}

/// Wear state captured before a reset or configuration swap.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WearSnapshot {
    pub detect: WearDetect,
    pub hard_adt_owned: bool,
    pub timer_running: bool,
}

/// Owner of the wear state. All transitions go through [`WearArbiter::force`]
/// or [`WearArbiter::process_events`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WearArbiter {
    detect: WearDetect,
    hard_adt_owned: bool,
    timer_running: bool,
}

impl WearArbiter {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            detect: WearDetect::WearOn,
            hard_adt_owned: false,
            timer_running: false,
        }
    }

    #[must_use]
    pub const fn detect(&self) -> WearDetect {
        self.detect
    }

    /// Hardware ADT currently drives wear interrupts.
    #[must_use]
    pub const fn hard_adt_owned(&self) -> bool {
        self.hard_adt_owned
    }

    /// Software confirmation timer is running.
    #[must_use]
    pub const fn timer_running(&self) -> bool {
        self.timer_running
    }

    #[must_use]
    pub const fn snapshot(&self) -> WearSnapshot {
        WearSnapshot {
            detect: self.detect,
            hard_adt_owned: self.hard_adt_owned,
            timer_running: self.timer_running,
        }
    }

    pub fn set_hard_adt_owned(&mut self, owned: bool) {
        self.hard_adt_owned = owned;
    }

    pub fn start_timer<M: MotionConfirm>(&mut self, motion: &mut M) {
        motion.start_timer();
        self.timer_running = true;
    }

    pub fn stop_timer<M: MotionConfirm>(&mut self, motion: &mut M) {
        motion.stop_timer();
        self.timer_running = false;
    }

    /// Unconditionally arms the detector for `target`.
    pub fn force<C: ChipControl>(
        &mut self,
        chip: &mut C,
        target: WearDetect,
    ) -> Result<(), DriverError> {
        self.detect = target;
        chip.wear_detect_switch(target, SwitchMode::Forced)
    }

    /// Applies wear interrupt bits to the state machine.
    ///
    /// Bits are dropped when hardware ADT is not owned and the request is not
    /// forced, when ADT is inactive, or when the chip refuses the switch.
    /// The detect state follows the event even if the switch is refused.
    pub fn process_events<C: ChipControl>(
        &mut self,
        chip: &mut C,
        events: &mut IrqEvents,
        adt_active: bool,
        mode: SwitchMode,
    ) {
        if !self.hard_adt_owned && mode == SwitchMode::EventDriven {
            events.remove(IrqEvents::WEAR);
            return;
        }
        if !events.intersects(IrqEvents::WEAR) {
            return;
        }
        if !adt_active {
            events.remove(IrqEvents::WEAR);
            return;
        }

        if events.contains(IrqEvents::WEAR_ON) {
            self.detect = WearDetect::WearOff;
            match chip.wear_detect_switch(WearDetect::WearOff, mode) {
                Ok(()) => {
                    debug!("wear: on, armed for wear-off");
                }
                Err(err) => {
                    warn!("wear: switch to wear-off refused ({})", err);
                    events.remove(IrqEvents::WEAR_ON);
                }
            }
        } else {
            self.detect = WearDetect::WearOn;
            match chip.wear_detect_switch(WearDetect::WearOn, mode) {
                Ok(()) => {
                    debug!("wear: off, armed for wear-on");
                }
                Err(err) => {
                    warn!("wear: switch to wear-on refused ({})", err);
                    events.remove(IrqEvents::WEAR_OFF);
                }
            }
        }
    }

    /// Second stage of the software path: a wear-on seen while the
    /// confirmation timer runs only stands if movement was confirmed.
    pub fn confirm_with_motion<M: MotionConfirm>(
        &mut self,
        motion: &mut M,
        events: &mut IrqEvents,
        extra: &mut EventExtra,
        adt_active: bool,
    ) {
        if adt_active && self.detect == WearDetect::WearOff && self.timer_running {
            if motion.movement_confirmed() {
                events.insert(IrqEvents::WEAR_ON);
                motion.stop_adt_with_motion();
                self.stop_timer(motion);
                extra.insert(EventExtra::LIVING);
                info!("wear: on confirmed by movement");
            } else {
                events.remove(IrqEvents::WEAR_ON);
                extra.remove(EventExtra::LIVING);
            }
        }

        if events.contains(IrqEvents::WEAR_OFF) {
            motion.start_adt_with_motion();
            extra.remove(EventExtra::LIVING);
        }
    }
}

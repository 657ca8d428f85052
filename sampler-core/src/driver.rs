//! Collaborator traits the scheduler drives.
//!
//! The chip, the opaque algorithm library, the auxiliary sensors and the
//! protocol layer are all injected through these traits so the scheduler core
//! stays free of transport and vendor code. No-op implementations are
//! provided for targets that lack a given collaborator.

use core::time::Duration;

use crate::config::{ConfigSet, ResetKind};
use crate::error::{AlgorithmError, DriverError};
use crate::events::{EventExtra, EventReport, IrqEvents};
use crate::engineering::ChannelParams;
use crate::functions::{AlgorithmResult, ChannelTag, Frame, FunctionId};
use crate::slots::{SlotMask, SlotOrder};
use crate::wear::{SwitchMode, WearDetect};

/// Chip addressed by subsequent [`ChipControl`] calls in a cascaded topology.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChipSelect {
    Primary,
    Secondary,
}

/// Result of a raw FIFO read.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FifoRead {
    /// Bytes written into the caller's buffer.
    pub bytes: usize,
    /// The chip still holds data; the scheduler schedules a try-read.
    pub more_pending: bool,
}

/// Register-level operations on the front-end chip.
///
/// Transport retries and timeouts live below this trait.
pub trait ChipControl {
    /// Routes following calls to one chip of a cascade. Single-chip boards ignore it.
    fn select(&mut self, _chip: ChipSelect) {}

    fn reset(&mut self, kind: ResetKind) -> Result<(), DriverError>;

    fn delay(&mut self, duration: Duration);

    fn enter_low_power(&mut self) -> Result<(), DriverError>;

    fn exit_low_power(&mut self) -> Result<(), DriverError>;

    /// Loads a configuration array into the chip.
    fn load_configuration(&mut self, config: &ConfigSet) -> Result<(), DriverError>;

    /// Reads and clears the interrupt status.
    fn irq_status(&mut self) -> Result<IrqEvents, DriverError>;

    /// FIFO fill level in 4-byte words.
    fn fifo_level(&mut self) -> Result<u16, DriverError>;

    fn read_fifo(&mut self, buffer: &mut [u8]) -> Result<FifoRead, DriverError>;

    fn write_fifo_watermark(&mut self, words: u16) -> Result<(), DriverError>;

    /// State of the global sampling enable bit.
    fn sampling_enabled(&mut self) -> Result<bool, DriverError>;

    fn set_sampling_enabled(&mut self, enabled: bool) -> Result<(), DriverError>;

    fn write_slot_enable(&mut self, slots: SlotMask) -> Result<(), DriverError>;

    /// Sample-rate divider of a slot; the slot runs at `1000 / (divider + 1)` Hz.
    fn slot_divider(&mut self, slot: u8) -> Result<u16, DriverError>;

    fn write_slot_divider(&mut self, slot: u8, divider: u16) -> Result<(), DriverError>;

    fn write_slot_order(&mut self, position: u8, entry: SlotOrder) -> Result<(), DriverError>;

    fn write_slot_time(&mut self, position: u8, time: u16) -> Result<(), DriverError>;

    fn function_start(&mut self, id: FunctionId) -> Result<(), DriverError>;

    fn function_stop(&mut self, id: FunctionId) -> Result<(), DriverError>;

    /// Arms the wear detector for `target`. The chip may refuse an event-driven switch.
    fn wear_detect_switch(&mut self, target: WearDetect, mode: SwitchMode)
    -> Result<(), DriverError>;

    /// Overrides integrator time, TIA gain and LED current of one channel.
    fn write_channel_params(
        &mut self,
        channel: ChannelTag,
        params: ChannelParams,
    ) -> Result<(), DriverError>;
}

/// Auxiliary sensor streams.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AuxSensorKind {
    Accel,
    Cap,
    Temp,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AccelSample {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CapSample {
    pub channels: [i32; 4],
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TempSample {
    pub channels: [i32; 4],
}

/// Auxiliary data aligned to one FIFO read.
#[derive(Copy, Clone, Debug, Default)]
pub struct SensorWindow<'a> {
    pub accel: &'a [AccelSample],
    pub cap: &'a [CapSample],
    pub temp: &'a [TempSample],
}

impl SensorWindow<'static> {
    pub const EMPTY: Self = SensorWindow {
        accel: &[],
        cap: &[],
        temp: &[],
    };
}

/// Independently clocked sensors whose samples are cached between FIFO reads.
///
/// The `read_*` calls return the number of samples written; returning more
/// than the slice length is a fatal configuration error.
pub trait AuxSensors {
    fn start_caching(&mut self, kind: AuxSensorKind);

    fn stop_caching(&mut self, kind: AuxSensorKind);

    fn read_accel(&mut self, out: &mut [AccelSample]) -> usize;

    fn read_cap(&mut self, _out: &mut [CapSample]) -> usize {
        0
    }

    fn read_temp(&mut self, _out: &mut [TempSample]) -> usize {
        0
    }
}

/// Per-function frame decoding from the algorithm library.
pub trait FrameDecoder {
    fn start(&mut self, _id: FunctionId) -> Result<(), AlgorithmError> {
        Ok(())
    }

    fn stop(&mut self, _id: FunctionId) -> Result<(), AlgorithmError> {
        Ok(())
    }

    /// Decodes one admitted frame. `Ok(Some(_))` replaces the function's stored result.
    fn decode(&mut self, frame: &Frame<'_>) -> Result<Option<AlgorithmResult>, AlgorithmError>;
}

/// Automatic gain control over LED drive and TIA gain.
pub trait AgcEngine {
    fn process(&mut self, fifo: &[u8], events: IrqEvents) -> Result<(), AlgorithmError>;

    /// Drops accumulated gain state before a fresh sampling session.
    fn reset_gain(&mut self) {}
}

/// What the lead detector wants the loop to do next.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LeadOutcome {
    pub extra: EventExtra,
    /// Data was consumed for lead handling; read the FIFO again.
    pub force_reread: bool,
}

/// Electrode gain calibration and lead-on/off handling.
pub trait LeadDetector {
    fn calibrate(&mut self, _fifo: &[u8]) -> Result<(), AlgorithmError> {
        Ok(())
    }

    /// May clear lead bits from `events`.
    fn handle(&mut self, events: &mut IrqEvents, fifo: &[u8])
    -> Result<LeadOutcome, AlgorithmError>;

    /// Informs the detector whether lead detection rides on hardware ADT.
    fn set_hard_adt_lead_detect(&mut self, _enabled: bool) {}
}

/// Accelerometer-backed confirmation used by the software ADT path.
pub trait MotionConfirm {
    /// Starts ADT with accelerometer confirmation.
    fn start_adt_with_motion(&mut self);

    /// Hands ADT over to the accelerometer path.
    fn stop_adt_with_motion(&mut self);

    fn movement_confirmed(&mut self) -> bool;

    fn reset_motion(&mut self);

    fn feed(&mut self, accel: &[AccelSample], cap: &[CapSample]);

    fn start_timer(&mut self);

    fn stop_timer(&mut self);
}

/// Everything the scheduler needs from the algorithm library.
pub trait Algorithms: FrameDecoder + AgcEngine + LeadDetector + MotionConfirm {}

impl<T> Algorithms for T where T: FrameDecoder + AgcEngine + LeadDetector + MotionConfirm {}

/// Lead transitions forwarded to the protocol layer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LeadChange {
    On,
    Off,
}

/// Protocol-facing event consumer.
pub trait EventSink {
    fn report(&mut self, report: &EventReport);

    fn lead_changed(&mut self, _change: LeadChange, _extra: EventExtra) {}

    fn wear_changed(&mut self, _report: &EventReport) {}
}

/// Sensor stack that reports no samples.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopAuxSensors;

impl NoopAuxSensors {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl AuxSensors for NoopAuxSensors {
    fn start_caching(&mut self, _: AuxSensorKind) {}

    fn stop_caching(&mut self, _: AuxSensorKind) {}

    fn read_accel(&mut self, _: &mut [AccelSample]) -> usize {
        0
    }
}

/// Algorithm library stand-in that accepts every frame and never confirms movement.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopAlgorithms;

impl NoopAlgorithms {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl FrameDecoder for NoopAlgorithms {
    fn decode(&mut self, _: &Frame<'_>) -> Result<Option<AlgorithmResult>, AlgorithmError> {
        Ok(None)
    }
}

impl AgcEngine for NoopAlgorithms {
    fn process(&mut self, _: &[u8], _: IrqEvents) -> Result<(), AlgorithmError> {
        Ok(())
    }
}

impl LeadDetector for NoopAlgorithms {
    fn handle(&mut self, _: &mut IrqEvents, _: &[u8]) -> Result<LeadOutcome, AlgorithmError> {
        Ok(LeadOutcome::default())
    }
}

impl MotionConfirm for NoopAlgorithms {
    fn start_adt_with_motion(&mut self) {}

    fn stop_adt_with_motion(&mut self) {}

    fn movement_confirmed(&mut self) -> bool {
        false
    }

    fn reset_motion(&mut self) {}

    fn feed(&mut self, _: &[AccelSample], _: &[CapSample]) {}

    fn start_timer(&mut self) {}

    fn stop_timer(&mut self) {}
}

/// Sink that drops every report.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopEventSink;

impl NoopEventSink {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl EventSink for NoopEventSink {
    fn report(&mut self, _: &EventReport) {}
}

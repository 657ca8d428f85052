//! The acquisition scheduler.
//!
//! [`Scheduler`] owns every collaborator and a single [`SchedulerState`].
//! All entry points take `&mut self`, so the interrupt loop, sampling control
//! and recovery never observe each other half-way; the only re-entrancy left
//! is sampling control flushing pending soft events through the loop, which
//! [`LoopState`] guards.

use crate::aligner::{AUX_FIFO_LEN, NonSyncAligner};
use crate::config::{ConfigCatalog, ConfigSet, SchedulerConfig};
use crate::driver::{
    AccelSample, Algorithms, AuxSensors, CapSample, ChipControl, ChipSelect, EventSink,
    TempSample,
};
use crate::engineering::EngineeringSession;
use crate::error::{DriverError, ParameterError, SchedulerError};
use crate::events::{IrqEvents, SoftEvents};
use crate::functions::{FunctionMask, FunctionRegistry};
use crate::slots::{SlotAllocator, SlotTable};
use crate::wear::{WearArbiter, WearSnapshot};

mod adt;
mod control;
mod engineering;
mod interrupt;
mod recovery;

pub use control::{Command, SAMPLE_RATE_STEP_HZ};
pub(crate) use control::validate_sample_rate;
pub use interrupt::{CycleOutcome, CycleSummary};
pub use recovery::RecoveryReport;

/// FIFO bytes read per pass.
pub const FIFO_BUFFER_BYTES: usize = 1200;

/// Whether the scheduler accepts calls.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Lifecycle {
    /// Fresh, or after loop exhaustion / a fatal configuration error.
    #[default]
    Uninitialized,
    Ready,
}

/// Re-entrancy guard for the interrupt loop.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LoopState {
    #[default]
    Idle,
    Running,
}

/// Chip-reset recovery progress.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecoveryState {
    #[default]
    Idle,
    Recovering {
        /// Functions active right before the reset.
        snapshot: FunctionMask,
        wear: WearSnapshot,
    },
}

impl RecoveryState {
    #[must_use]
    pub const fn is_recovering(self) -> bool {
        matches!(self, RecoveryState::Recovering { .. })
    }
}

/// Mutable scheduler state shared by the loop, sampling control and recovery.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SchedulerState {
    lifecycle: Lifecycle,
    loop_state: LoopState,
    /// Single source of truth for which functions are sampling.
    active: FunctionMask,
    config_index: Option<usize>,
    wear: WearArbiter,
    recovery: RecoveryState,
    soft_events: SoftEvents,
    irq_seen: bool,
    user_reset_pending: bool,
    engineering_mode: bool,
    fifo_watermark: u16,
    saved_watermark: Option<u16>,
    last_recovery: Option<RecoveryReport>,
}

impl SchedulerState {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Uninitialized,
            loop_state: LoopState::Idle,
            active: FunctionMask::EMPTY,
            config_index: None,
            wear: WearArbiter::new(),
            recovery: RecoveryState::Idle,
            soft_events: SoftEvents::empty(),
            irq_seen: false,
            user_reset_pending: false,
            engineering_mode: false,
            fifo_watermark: 0,
            saved_watermark: None,
            last_recovery: None,
        }
    }

    #[must_use]
    pub const fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    #[must_use]
    pub const fn loop_state(&self) -> LoopState {
        self.loop_state
    }

    #[must_use]
    pub const fn active(&self) -> FunctionMask {
        self.active
    }

    /// Index of the loaded configuration set, `None` when nothing is loaded.
    #[must_use]
    pub const fn config_index(&self) -> Option<usize> {
        self.config_index
    }

    #[must_use]
    pub const fn wear(&self) -> &WearArbiter {
        &self.wear
    }

    #[must_use]
    pub const fn recovery(&self) -> RecoveryState {
        self.recovery
    }

    #[must_use]
    pub const fn soft_events(&self) -> SoftEvents {
        self.soft_events
    }

    #[must_use]
    pub const fn fifo_watermark(&self) -> u16 {
        self.fifo_watermark
    }

    #[must_use]
    pub const fn engineering_mode(&self) -> bool {
        self.engineering_mode
    }

    #[must_use]
    pub const fn last_recovery(&self) -> Option<RecoveryReport> {
        self.last_recovery
    }
}

/// Auxiliary buffers refilled on every dispatch.
#[derive(Clone, Debug)]
struct AuxBuffers {
    accel: NonSyncAligner<AccelSample>,
    cap: [CapSample; AUX_FIFO_LEN],
    temp: [TempSample; AUX_FIFO_LEN],
}

impl AuxBuffers {
    fn new() -> Self {
        Self {
            accel: NonSyncAligner::new(),
            cap: [CapSample::default(); AUX_FIFO_LEN],
            temp: [TempSample::default(); AUX_FIFO_LEN],
        }
    }
}

/// Interrupt-driven sampling scheduler for one front end (or one cascade).
pub struct Scheduler<C, S, A, E> {
    chip: C,
    sensors: S,
    algorithms: A,
    sink: E,
    config: SchedulerConfig,
    catalog: ConfigCatalog<'static>,
    registry: FunctionRegistry,
    slots: SlotAllocator,
    state: SchedulerState,
    fifo: [u8; FIFO_BUFFER_BYTES],
    fifo_len: usize,
    aux: AuxBuffers,
    engineering: EngineeringSession,
}

impl<C, S, A, E> Scheduler<C, S, A, E>
where
    C: ChipControl,
    S: AuxSensors,
    A: Algorithms,
    E: EventSink,
{
    /// Builds an uninitialized scheduler with the default function catalog.
    #[must_use]
    pub fn new(
        chip: C,
        sensors: S,
        algorithms: A,
        sink: E,
        config: SchedulerConfig,
        catalog: ConfigCatalog<'static>,
    ) -> Self {
        Self::with_registry(
            chip,
            sensors,
            algorithms,
            sink,
            config,
            catalog,
            FunctionRegistry::default(),
        )
    }

    #[must_use]
    pub fn with_registry(
        chip: C,
        sensors: S,
        algorithms: A,
        sink: E,
        config: SchedulerConfig,
        catalog: ConfigCatalog<'static>,
        registry: FunctionRegistry,
    ) -> Self {
        Self {
            chip,
            sensors,
            algorithms,
            sink,
            config,
            catalog,
            registry,
            slots: SlotAllocator::new(),
            state: SchedulerState::new(),
            fifo: [0; FIFO_BUFFER_BYTES],
            fifo_len: 0,
            aux: AuxBuffers::new(),
            engineering: EngineeringSession::new(),
        }
    }

    /// Resets the chip, loads the first configuration set and marks the
    /// scheduler ready. Also the explicit reinit after a fatal error.
    pub fn init(&mut self) -> Result<(), SchedulerError> {
        let engineering_mode = self.state.engineering_mode;
        self.state = SchedulerState::new();
        self.state.engineering_mode = engineering_mode;
        self.slots.clear();
        self.fifo_len = 0;

        self.reset_chips()?;
        self.chip.delay(self.config.reset_settle);
        self.load_configuration(0)?;
        self.reset_control();
        self.enter_low_power();
        self.state.lifecycle = Lifecycle::Ready;
        info!("scheduler: ready ({} configuration sets)", self.catalog.len());
        Ok(())
    }

    #[must_use]
    pub const fn state(&self) -> &SchedulerState {
        &self.state
    }

    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    #[must_use]
    pub const fn catalog(&self) -> &ConfigCatalog<'static> {
        &self.catalog
    }

    #[must_use]
    pub const fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    #[must_use]
    pub const fn slot_table(&self) -> &SlotTable {
        self.slots.table()
    }

    #[must_use]
    pub const fn chip(&self) -> &C {
        &self.chip
    }

    pub fn chip_mut(&mut self) -> &mut C {
        &mut self.chip
    }

    #[must_use]
    pub const fn sensors(&self) -> &S {
        &self.sensors
    }

    pub fn sensors_mut(&mut self) -> &mut S {
        &mut self.sensors
    }

    #[must_use]
    pub const fn algorithms(&self) -> &A {
        &self.algorithms
    }

    pub fn algorithms_mut(&mut self) -> &mut A {
        &mut self.algorithms
    }

    #[must_use]
    pub const fn sink(&self) -> &E {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut E {
        &mut self.sink
    }

    /// Latches soft events raised outside the loop, e.g. by the motion detector.
    pub fn raise_soft_event(&mut self, events: SoftEvents) {
        self.state.soft_events.insert(events);
    }

    fn ensure_ready(&self) -> Result<(), SchedulerError> {
        match self.state.lifecycle {
            Lifecycle::Ready => Ok(()),
            Lifecycle::Uninitialized => Err(SchedulerError::Uninitialized),
        }
    }

    fn ensure_known(mask: FunctionMask) -> Result<(), SchedulerError> {
        let unknown = mask.unknown_bits();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(ParameterError::UnknownFunction(unknown).into())
        }
    }

    fn loaded_config(&self) -> Option<&'static ConfigSet> {
        self.state.config_index.and_then(|index| self.catalog.get(index))
    }

    /// Functions programmed by the loaded configuration set.
    fn loaded_functions(&self) -> FunctionMask {
        self.loaded_config()
            .map_or(FunctionMask::EMPTY, |set| set.functions)
            .intersection(self.registry.supported())
    }

    /// Empties the active set and drops hardware ADT ownership.
    fn reset_control(&mut self) {
        self.state.active = FunctionMask::EMPTY;
        self.state.wear.set_hard_adt_owned(false);
    }

    fn on_all_chips(
        &mut self,
        mut op: impl FnMut(&mut C) -> Result<(), DriverError>,
    ) -> Result<(), DriverError> {
        if self.config.topology.is_cascaded() {
            self.chip.select(ChipSelect::Secondary);
            let secondary = op(&mut self.chip);
            self.chip.select(ChipSelect::Primary);
            let primary = op(&mut self.chip);
            secondary.and(primary)
        } else {
            op(&mut self.chip)
        }
    }

    fn reset_chips(&mut self) -> Result<(), DriverError> {
        let kind = self.config.reset_kind;
        self.on_all_chips(|chip| chip.reset(kind))
    }

    fn enter_low_power(&mut self) {
        if let Err(err) = self.on_all_chips(ChipControl::enter_low_power) {
            warn!("scheduler: enter low power failed ({})", err);
        }
    }

    fn read_irq_status(&mut self) -> Result<IrqEvents, DriverError> {
        if self.config.topology.is_cascaded() {
            self.chip.select(ChipSelect::Secondary);
            let secondary = self.chip.irq_status();
            self.chip.select(ChipSelect::Primary);
            let primary = self.chip.irq_status()?;
            Ok(primary | secondary?)
        } else {
            self.chip.irq_status()
        }
    }

    fn read_fifo_level(&mut self) -> Result<u16, DriverError> {
        if self.config.topology.is_cascaded() {
            self.chip.select(ChipSelect::Secondary);
            let secondary = self.chip.fifo_level();
            self.chip.select(ChipSelect::Primary);
            let primary = self.chip.fifo_level()?;
            Ok(primary.min(secondary?))
        } else {
            self.chip.fifo_level()
        }
    }

    /// Loads configuration `index`. On failure nothing is considered loaded.
    fn load_configuration(&mut self, index: usize) -> Result<(), SchedulerError> {
        let Some(set) = self.catalog.get(index) else {
            return Err(ParameterError::ConfigIndex(index).into());
        };
        if !set.supports(self.config.topology) {
            self.state.config_index = None;
            warn!("scheduler: configuration {} not valid for topology", set.name);
            return Err(SchedulerError::Resource {
                missing: set.functions,
            });
        }
        self.slots.clear();
        self.state.saved_watermark = None;
        match self.on_all_chips(|chip| chip.load_configuration(set)) {
            Ok(()) => {
                self.state.config_index = Some(index);
                self.state.fifo_watermark = set.fifo_watermark;
                debug!("scheduler: loaded configuration {}", set.name);
                Ok(())
            }
            Err(err) => {
                self.state.config_index = None;
                error!("scheduler: loading configuration {} failed ({})", set.name, err);
                Err(SchedulerError::Resource {
                    missing: set.functions,
                })
            }
        }
    }
}

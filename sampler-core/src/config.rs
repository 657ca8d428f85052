//! Scheduler feature toggles and the catalog of chip configuration sets.

use core::time::Duration;

use crate::functions::{FunctionId, FunctionMask};
use crate::slots::SLOT_COUNT;

/// Single chip or a primary/secondary cascade sharing one scheduler.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChipTopology {
    #[default]
    Single,
    Cascaded,
}

impl ChipTopology {
    #[must_use]
    pub const fn is_cascaded(self) -> bool {
        matches!(self, ChipTopology::Cascaded)
    }
}

/// How the interrupt loop is triggered.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InterruptMode {
    /// Hardware interrupt line; cycles without a latched interrupt are spurious.
    #[default]
    Interrupt,
    /// Periodic poll; every pass reads the FIFO.
    Polling,
}

/// Reset line used to bring the chip back.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResetKind {
    #[default]
    Soft,
    Hard,
}

/// Auxiliary sensors cached alongside the FIFO.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AuxSensorSet {
    pub accel: bool,
    pub cap: bool,
    pub temp: bool,
}

impl AuxSensorSet {
    pub const NONE: Self = Self {
        accel: false,
        cap: false,
        temp: false,
    };

    pub const ACCEL: Self = Self {
        accel: true,
        cap: false,
        temp: false,
    };
}

/// Runtime knobs for the scheduler.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SchedulerConfig {
    /// Hardware wear detection is wired up.
    pub hard_adt: bool,
    /// Wear-on must be confirmed by accelerometer movement.
    pub soft_adt_confirm: bool,
    pub lead_detect: bool,
    /// Rewrite the slot sequence fastest first on every slot change.
    pub dynamic_slot_order: bool,
    /// Rebalance slot dividers when functions with different rates share slots.
    pub sample_rate_modify: bool,
    /// Align an independently clocked accelerometer to the reference function.
    pub nonsync_aux: bool,
    pub aux: AuxSensorSet,
    pub topology: ChipTopology,
    pub interrupt_mode: InterruptMode,
    pub reset_kind: ResetKind,
    /// Cap on interrupt loop passes per cycle.
    pub max_repeat: u8,
    /// Reinit attempts during chip-reset recovery.
    pub reset_retries: u8,
    /// Settle time after a reset during recovery.
    pub reset_settle: Duration,
    /// Settle time after a reset during a configuration switch.
    pub switch_settle: Duration,
    pub accel_rate_hz: u16,
    /// Watermark (in words) used while ADT is the only active function.
    pub adt_only_watermark: Option<u16>,
}

impl SchedulerConfig {
    pub const DEFAULT_MAX_REPEAT: u8 = 20;
    pub const DEFAULT_RESET_RETRIES: u8 = 5;

    #[must_use]
    pub const fn new() -> Self {
        Self {
            hard_adt: true,
            soft_adt_confirm: false,
            lead_detect: false,
            dynamic_slot_order: false,
            sample_rate_modify: true,
            nonsync_aux: true,
            aux: AuxSensorSet::ACCEL,
            topology: ChipTopology::Single,
            interrupt_mode: InterruptMode::Interrupt,
            reset_kind: ResetKind::Soft,
            max_repeat: Self::DEFAULT_MAX_REPEAT,
            reset_retries: Self::DEFAULT_RESET_RETRIES,
            reset_settle: Duration::from_millis(30),
            switch_settle: Duration::from_millis(15),
            accel_rate_hz: 25,
            adt_only_watermark: None,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// One loadable register configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConfigSet {
    pub name: &'static str,
    /// Functions whose channels this configuration programs.
    pub functions: FunctionMask,
    /// FIFO watermark in 4-byte words.
    pub fifo_watermark: u16,
    /// Slot time budget per configuration slot index.
    pub slot_times: [u16; SLOT_COUNT],
    /// Programs both chips of a cascade.
    pub cascade: bool,
}

impl ConfigSet {
    pub const fn new(
        name: &'static str,
        functions: FunctionMask,
        fifo_watermark: u16,
        slot_times: [u16; SLOT_COUNT],
        cascade: bool,
    ) -> Self {
        Self {
            name,
            functions,
            fifo_watermark,
            slot_times,
            cascade,
        }
    }

    /// Returns `true` when this configuration can run on `topology`.
    #[must_use]
    pub const fn supports(&self, topology: ChipTopology) -> bool {
        match topology {
            ChipTopology::Single => true,
            ChipTopology::Cascaded => self.cascade,
        }
    }
}

const DEFAULT_SLOT_TIMES: [u16; SLOT_COUNT] = [200, 200, 200, 200, 200, 200, 200, 200];

/// Stock configuration sets, most general first.
pub const DEFAULT_CONFIG_SETS: [ConfigSet; 3] = [
    ConfigSet::new(
        "ppg",
        FunctionMask::EMPTY
            .with(FunctionId::Adt)
            .with(FunctionId::Hr)
            .with(FunctionId::Hrv)
            .with(FunctionId::Hsm)
            .with(FunctionId::Spo2)
            .with(FunctionId::Resp)
            .with(FunctionId::Af)
            .with(FunctionId::SoftAdtGreen)
            .with(FunctionId::SoftAdtIr),
        50,
        DEFAULT_SLOT_TIMES,
        true,
    ),
    ConfigSet::new(
        "ecg",
        FunctionMask::EMPTY
            .with(FunctionId::Adt)
            .with(FunctionId::Ecg)
            .with(FunctionId::LeadDet)
            .with(FunctionId::Pwtt)
            .with(FunctionId::Hr),
        100,
        DEFAULT_SLOT_TIMES,
        false,
    ),
    ConfigSet::new(
        "bench",
        FunctionMask::EMPTY
            .with(FunctionId::Adt)
            .with(FunctionId::Fpbp)
            .with(FunctionId::Pwa)
            .with(FunctionId::Bt)
            .with(FunctionId::Test1)
            .with(FunctionId::Test2)
            .with(FunctionId::Rs0)
            .with(FunctionId::Rs1)
            .with(FunctionId::Rs2),
        50,
        DEFAULT_SLOT_TIMES,
        false,
    ),
];

/// Ordered list of configuration sets the scheduler may load.
#[derive(Copy, Clone, Debug)]
pub struct ConfigCatalog<'a> {
    sets: &'a [ConfigSet],
}

impl<'a> ConfigCatalog<'a> {
    #[must_use]
    pub const fn new(sets: &'a [ConfigSet]) -> Self {
        Self { sets }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.sets.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&'a ConfigSet> {
        self.sets.get(index)
    }

    /// First configuration that covers `mask`, ignoring the `filter` bits,
    /// and that can run on `topology`.
    #[must_use]
    pub fn find_for(
        &self,
        mask: FunctionMask,
        filter: FunctionMask,
        topology: ChipTopology,
    ) -> Option<usize> {
        let wanted = mask.union(filter);
        self.sets.iter().position(|set| {
            set.supports(topology) && set.functions.intersection(mask).union(filter) == wanted
        })
    }
}

impl Default for ConfigCatalog<'static> {
    fn default() -> Self {
        Self::new(&DEFAULT_CONFIG_SETS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_skips_sets_missing_functions() {
        let catalog = ConfigCatalog::default();
        let ecg = FunctionId::Ecg.mask() | FunctionId::Adt.mask();
        assert_eq!(
            catalog.find_for(ecg, FunctionId::Adt.mask(), ChipTopology::Single),
            Some(1)
        );
        assert_eq!(
            catalog.find_for(FunctionId::Hr.mask(), FunctionId::Adt.mask(), ChipTopology::Single),
            Some(0),
            "earlier sets win"
        );
    }

    #[test]
    fn search_honors_topology() {
        let catalog = ConfigCatalog::default();
        assert_eq!(
            catalog.find_for(
                FunctionId::Ecg.mask(),
                FunctionId::Adt.mask(),
                ChipTopology::Cascaded
            ),
            None
        );
    }

    #[test]
    fn filter_bits_do_not_have_to_be_present() {
        let sets = [ConfigSet::new(
            "no-adt",
            FunctionId::Hr.mask(),
            10,
            DEFAULT_SLOT_TIMES,
            false,
        )];
        let catalog = ConfigCatalog::new(&sets);
        assert_eq!(
            catalog.find_for(FunctionId::Hr.mask(), FunctionId::Adt.mask(), ChipTopology::Single),
            Some(0)
        );
        assert_eq!(
            catalog.find_for(FunctionId::Spo2.mask(), FunctionId::Adt.mask(), ChipTopology::Single),
            None
        );
    }

    #[test]
    fn defaults_match_documented_limits() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_repeat, 20);
        assert_eq!(config.reset_retries, 5);
        assert_eq!(config.reset_settle, Duration::from_millis(30));
    }
}

//! Slot allocator: enable bits, fastest-first ordering, and per-slot rates.
//!
//! The pure planning functions are kept separate from the register writes so
//! the arithmetic can be checked without a chip.

use bitflags::bitflags;

use crate::driver::ChipControl;
use crate::error::DriverError;
use crate::functions::{FunctionId, FunctionMask, FunctionRegistry};

/// Hardware time slices available on the chip.
pub const SLOT_COUNT: usize = 8;

/// Base clock the slot dividers divide, in Hz.
pub const SLOT_BASE_RATE_HZ: u16 = 1000;

bitflags! {
    /// One bit per slot.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct SlotMask: u8 {
        const SLOT0 = 1 << 0;
        const SLOT1 = 1 << 1;
        const SLOT2 = 1 << 2;
        const SLOT3 = 1 << 3;
        const SLOT4 = 1 << 4;
        const SLOT5 = 1 << 5;
        const SLOT6 = 1 << 6;
        const SLOT7 = 1 << 7;
    }
}

impl SlotMask {
    pub const EMPTY: Self = Self::empty();

    /// Adds `slot`; indices past the last slot are ignored.
    #[must_use]
    pub const fn with(self, slot: u8) -> Self {
        if (slot as usize) < SLOT_COUNT {
            self.union(Self::from_bits_retain(1 << slot))
        } else {
            self
        }
    }

    #[must_use]
    pub const fn has(self, slot: u8) -> bool {
        (slot as usize) < SLOT_COUNT && self.bits() & (1 << slot) != 0
    }

    #[must_use]
    pub const fn count(self) -> u32 {
        self.bits().count_ones()
    }

    /// Enabled slot indices, lowest first.
    pub fn indices(self) -> impl Iterator<Item = u8> {
        (0u8..).take(SLOT_COUNT).filter(move |slot| self.has(*slot))
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for SlotMask {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{=u8:#010b}", self.bits());
    }
}

/// Entry of the slot sequence table.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlotOrder {
    /// Configuration slot index sampled at this position.
    Slot(u8),
    /// Sentinel for an unused position.
    #[default]
    Disabled,
}

impl SlotOrder {
    /// Nibble written into the sequence register; 8 marks a disabled position.
    #[must_use]
    pub const fn raw(self) -> u8 {
        match self {
            SlotOrder::Slot(index) => index,
            SlotOrder::Disabled => SLOT_COUNT as u8,
        }
    }
}

/// Slot rate in Hz for a raw divider.
#[must_use]
pub const fn slot_rate_from_divider(divider: u16) -> u16 {
    SLOT_BASE_RATE_HZ / divider.saturating_add(1)
}

/// Divider that makes a slot run at `rate_hz`. Zero rates map to the slowest divider.
#[must_use]
pub const fn divider_for_rate(rate_hz: u16) -> u16 {
    if rate_hz == 0 {
        SLOT_BASE_RATE_HZ - 1
    } else {
        (SLOT_BASE_RATE_HZ / rate_hz).saturating_sub(1)
    }
}

/// Bitwise OR of the slot membership of every active function.
///
/// ADT's slots are left out while hardware ADT ownership is not held.
#[must_use]
pub fn recompute_slot_enable(
    registry: &FunctionRegistry,
    active: FunctionMask,
    hard_adt_owned: bool,
) -> SlotMask {
    registry
        .for_each_active(active)
        .filter(|d| d.id != FunctionId::Adt || hard_adt_owned)
        .fold(SlotMask::EMPTY, |acc, d| acc.union(d.slots()))
}

/// Orders enabled slots fastest first (smallest divider), ties by index, and
/// pads the remaining positions with [`SlotOrder::Disabled`].
pub fn order_fastest_first(
    dividers: &[u16; SLOT_COUNT],
    enabled: SlotMask,
) -> [SlotOrder; SLOT_COUNT] {
    let mut indices: [u8; SLOT_COUNT] = [0, 1, 2, 3, 4, 5, 6, 7];
    indices.sort_unstable_by_key(|slot| (dividers[usize::from(*slot)], *slot));

    let mut order = [SlotOrder::Disabled; SLOT_COUNT];
    let mut position = 0;
    for slot in indices {
        if enabled.has(slot) {
            order[position] = SlotOrder::Slot(slot);
            position += 1;
        }
    }
    order
}

/// Target rate per slot: the fastest requested rate among active functions
/// using it, or 0 when no active function uses it.
#[must_use]
pub fn plan_slot_rates(registry: &FunctionRegistry, active: FunctionMask) -> [u16; SLOT_COUNT] {
    let mut targets = [0u16; SLOT_COUNT];
    for descriptor in registry.for_each_active(active) {
        let rate = descriptor.requested_rate_hz();
        for slot in descriptor.slots().indices() {
            let target = &mut targets[usize::from(slot)];
            *target = (*target).max(rate);
        }
    }
    targets
}

/// Frames to skip between emissions when a function rides a faster slot.
#[must_use]
pub fn down_sample_factor(slot_rate_hz: u16, function_rate_hz: u16) -> u8 {
    if function_rate_hz == 0 || slot_rate_hz <= function_rate_hz {
        return 0;
    }
    u8::try_from(slot_rate_hz / function_rate_hz - 1).unwrap_or(u8::MAX)
}

/// Runs `op` with the global sampling bit cleared, restoring it afterwards
/// even if `op` fails.
pub fn with_sampling_paused<C, T>(
    chip: &mut C,
    op: impl FnOnce(&mut C) -> Result<T, DriverError>,
) -> Result<T, DriverError>
where
    C: ChipControl,
{
    let was_running = chip.sampling_enabled()?;
    if was_running {
        chip.set_sampling_enabled(false)?;
    }
    let result = op(chip);
    if was_running {
        chip.set_sampling_enabled(true)?;
    }
    result
}

/// Shadow of the slot registers as last written.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlotTable {
    pub enabled: SlotMask,
    pub rates_hz: [u16; SLOT_COUNT],
    pub order: [SlotOrder; SLOT_COUNT],
}

impl SlotTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            enabled: SlotMask::EMPTY,
            rates_hz: [0; SLOT_COUNT],
            order: [SlotOrder::Disabled; SLOT_COUNT],
        }
    }
}

/// Applies slot plans to the chip and remembers what was written.
#[derive(Copy, Clone, Debug, Default)]
pub struct SlotAllocator {
    table: SlotTable,
}

impl SlotAllocator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            table: SlotTable::new(),
        }
    }

    #[must_use]
    pub const fn table(&self) -> &SlotTable {
        &self.table
    }

    /// Forgets the shadow after a chip reset.
    pub fn clear(&mut self) {
        self.table = SlotTable::new();
    }

    /// Writes the slot enable register for `active`, reordering the slot
    /// sequence first when `slot_times` is given.
    pub fn apply_enable<C: ChipControl>(
        &mut self,
        chip: &mut C,
        registry: &FunctionRegistry,
        active: FunctionMask,
        hard_adt_owned: bool,
        slot_times: Option<&[u16; SLOT_COUNT]>,
    ) -> Result<SlotMask, DriverError> {
        let enabled = recompute_slot_enable(registry, active, hard_adt_owned);
        if let Some(times) = slot_times {
            self.reorder_slots_by_speed(chip, enabled, times)?;
        }
        chip.write_slot_enable(enabled)?;
        self.table.enabled = enabled;
        trace!("slots: enable {:#x}", enabled.bits());
        Ok(enabled)
    }

    /// Rewrites the slot sequence fastest first under a sampling pause.
    pub fn reorder_slots_by_speed<C: ChipControl>(
        &mut self,
        chip: &mut C,
        enabled: SlotMask,
        slot_times: &[u16; SLOT_COUNT],
    ) -> Result<(), DriverError> {
        let mut dividers = [0u16; SLOT_COUNT];
        for (slot, divider) in (0u8..).zip(dividers.iter_mut()) {
            *divider = chip.slot_divider(slot)?;
        }
        let order = order_fastest_first(&dividers, enabled);

        with_sampling_paused(chip, |chip| {
            for (position, entry) in (0u8..).zip(order.iter()) {
                chip.write_slot_order(position, *entry)?;
                if let SlotOrder::Slot(index) = entry {
                    chip.write_slot_time(position, slot_times[usize::from(*index)])?;
                }
            }
            Ok(())
        })?;
        self.table.order = order;
        Ok(())
    }

    /// Sets every used slot to the fastest rate its functions ask for and
    /// re-derives each active function's down-sample factor.
    ///
    /// Returns `true` when any divider was rewritten.
    pub fn rebalance_sample_rates<C: ChipControl>(
        &mut self,
        chip: &mut C,
        registry: &mut FunctionRegistry,
        active: FunctionMask,
    ) -> Result<bool, DriverError> {
        let mut last = [0u16; SLOT_COUNT];
        for (slot, rate) in (0u8..).zip(last.iter_mut()) {
            *rate = slot_rate_from_divider(chip.slot_divider(slot)?);
        }
        let targets = plan_slot_rates(registry, active);
        let changed = targets
            .iter()
            .zip(last.iter())
            .any(|(target, last)| *target != 0 && target != last);

        if changed {
            with_sampling_paused(chip, |chip| {
                for (slot, (target, last)) in (0u8..).zip(targets.iter().zip(last.iter())) {
                    if *target != 0 && target != last {
                        chip.write_slot_divider(slot, divider_for_rate(*target))?;
                    }
                }
                Ok(())
            })?;
        }

        for descriptor in registry.for_each_active_mut(active) {
            if let Some(user_rate) = descriptor.user_sample_rate_hz {
                descriptor.sample_rate_hz = user_rate;
            }
            let slowest = descriptor
                .slots()
                .indices()
                .map(|slot| targets[usize::from(slot)])
                .filter(|rate| *rate != 0)
                .min();
            let factor = slowest.map_or(0, |slot_rate| {
                down_sample_factor(slot_rate, descriptor.sample_rate_hz)
            });
            descriptor.down_sample.set_factor(factor);
        }

        for (slot, rate) in self.table.rates_hz.iter_mut().enumerate() {
            *rate = if targets[slot] != 0 {
                targets[slot]
            } else {
                last[slot]
            };
        }
        if changed {
            debug!("slots: rates rebalanced for {}", active);
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_rates(rates: &[(FunctionId, u16)]) -> FunctionRegistry {
        let mut registry = FunctionRegistry::default();
        for (id, rate) in rates {
            registry
                .lookup_mut(*id)
                .expect("function registered")
                .user_sample_rate_hz = Some(*rate);
        }
        registry
    }

    #[test]
    fn enable_is_or_of_active_slots() {
        let registry = FunctionRegistry::default();
        let active = FunctionId::Hr.mask() | FunctionId::Spo2.mask();
        let slots = recompute_slot_enable(&registry, active, true);
        assert_eq!(slots, SlotMask::from_bits_retain(0b0001_1010));
    }

    #[test]
    fn adt_slot_suppressed_without_hardware_ownership() {
        let registry = FunctionRegistry::default();
        let active = FunctionId::Adt.mask() | FunctionId::Hr.mask();
        assert_eq!(
            recompute_slot_enable(&registry, active, false),
            SlotMask::from_bits_retain(0b0000_0010),
            "ADT slot must stay off while software confirmation owns ADT"
        );
        assert_eq!(
            recompute_slot_enable(&registry, active, true),
            SlotMask::from_bits_retain(0b0000_0011)
        );
    }

    #[test]
    fn fastest_slots_come_first_and_unused_positions_are_disabled() {
        let dividers = [39, 9, 19, 0, 39, 1, 39, 39];
        let enabled = SlotMask::from_bits_retain(0b0010_0111);
        let order = order_fastest_first(&dividers, enabled);
        assert_eq!(
            order,
            [
                SlotOrder::Slot(5),
                SlotOrder::Slot(1),
                SlotOrder::Slot(2),
                SlotOrder::Slot(0),
                SlotOrder::Disabled,
                SlotOrder::Disabled,
                SlotOrder::Disabled,
                SlotOrder::Disabled,
            ]
        );
        assert_eq!(SlotOrder::Disabled.raw(), 8);
    }

    #[test]
    fn equal_dividers_keep_slot_index_order() {
        let dividers = [9, 39, 9, 39, 9, 39, 9, 39];
        let order = order_fastest_first(&dividers, SlotMask::all());
        assert_eq!(
            order,
            [
                SlotOrder::Slot(0),
                SlotOrder::Slot(2),
                SlotOrder::Slot(4),
                SlotOrder::Slot(6),
                SlotOrder::Slot(1),
                SlotOrder::Slot(3),
                SlotOrder::Slot(5),
                SlotOrder::Slot(7),
            ],
            "ties resolve by slot index"
        );
    }

    #[test]
    fn shared_slot_runs_at_fastest_request() {
        let registry = registry_with_rates(&[(FunctionId::Hr, 25), (FunctionId::Hrv, 50)]);
        let active = FunctionId::Hr.mask() | FunctionId::Hrv.mask();
        let targets = plan_slot_rates(&registry, active);
        assert_eq!(targets[1], 50);
        assert_eq!(targets[0], 0, "unused slots keep no target");
        assert_eq!(down_sample_factor(targets[1], 25), 1);
        assert_eq!(down_sample_factor(targets[1], 50), 0);
    }

    #[test]
    fn factor_is_zero_when_slot_not_faster() {
        assert_eq!(down_sample_factor(25, 25), 0);
        assert_eq!(down_sample_factor(25, 100), 0);
        assert_eq!(down_sample_factor(100, 0), 0);
        assert_eq!(down_sample_factor(1000, 25), 39);
    }

    #[test]
    fn divider_and_rate_are_inverse_on_base_multiples() {
        for rate in [25u16, 50, 100, 200, 500, 1000] {
            assert_eq!(slot_rate_from_divider(divider_for_rate(rate)), rate);
        }
    }
}

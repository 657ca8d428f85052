//! Interrupt bits, soft events, and the report handed to the protocol layer.

use core::fmt;

use bitflags::bitflags;

bitflags! {
    /// Chip interrupt status bits.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct IrqEvents: u16 {
        const CHIP_WAKEUP = 0x0001;
        const LEAD_ON = 0x0002;
        const LEAD_OFF = 0x0004;
        const FAST_RECOVERY = 0x0008;
        const ADC_DONE = 0x0010;
        const FIFO_WATERMARK = 0x0020;
        const FIFO_FULL = 0x0040;
        const TUNING_FAIL = 0x0100;
        const TUNING_DONE = 0x0200;
        const WEAR_ON = 0x0400;
        const WEAR_OFF = 0x0800;
        const SLOT_TIMEOUT = 0x1000;
        const SAMPLE_RATE_ERROR = 0x2000;
        const CHIP_RESET = 0x4000;

        const FIFO = Self::FIFO_WATERMARK.bits() | Self::FIFO_FULL.bits();
        const WEAR = Self::WEAR_ON.bits() | Self::WEAR_OFF.bits();
        const TUNING = Self::TUNING_FAIL.bits() | Self::TUNING_DONE.bits();
        const LEAD = Self::LEAD_ON.bits() | Self::LEAD_OFF.bits();
    }
}

impl IrqEvents {
    /// Bits the scheduler acts on for the given feature set.
    #[must_use]
    pub const fn process_mask(hard_adt: bool, lead_detect: bool) -> Self {
        let mut mask = Self::FIFO.union(Self::TUNING).union(Self::CHIP_RESET);
        if hard_adt {
            mask = mask.union(Self::WEAR);
        }
        if lead_detect {
            mask = mask.union(Self::LEAD);
        }
        mask
    }
}

bitflags! {
    /// Conditions latched by the scheduler itself, distinct from chip bits.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct SoftEvents: u8 {
        const FORCE_READ = 0x01;
        const WEAR_OFF = 0x02;
        const TRY_READ = 0x04;
        const WEAR_ON = 0x08;

        const READ = Self::FORCE_READ.bits() | Self::TRY_READ.bits();
        const WEAR = Self::WEAR_ON.bits() | Self::WEAR_OFF.bits();
    }
}

bitflags! {
    /// Extra byte attached to every event report.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct EventExtra: u8 {
        /// Wear-on confirmed by movement (living body).
        const LIVING = 0x01;
        const PRIMARY_LEAD_ON = 0x02;
        const PRIMARY_LEAD_OFF = 0x04;
        const SECONDARY_LEAD_ON = 0x08;
        const SECONDARY_LEAD_OFF = 0x10;
        const RS0 = 0x20;
        const RS1 = 0x40;
        const RS2 = 0x80;
    }
}

impl fmt::Display for IrqEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.bits())
    }
}

impl fmt::Display for SoftEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.bits())
    }
}

impl fmt::Display for EventExtra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.bits())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for IrqEvents {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{=u16:#x}", self.bits());
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for SoftEvents {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{=u8:#x}", self.bits());
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for EventExtra {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{=u8:#x}", self.bits());
    }
}

/// Masked event bitmap plus the extra byte, as handed to the protocol layer.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EventReport {
    pub events: IrqEvents,
    pub extra: EventExtra,
    /// Raised by sampling control rather than read from the chip.
    pub synthetic: bool,
}

impl EventReport {
    #[must_use]
    pub const fn new(events: IrqEvents, extra: EventExtra) -> Self {
        Self {
            events,
            extra,
            synthetic: false,
        }
    }

    /// Report emitted when ADT is stopped and wear state falls back to wear-on detection.
    #[must_use]
    pub const fn wear_released() -> Self {
        Self {
            events: IrqEvents::WEAR_OFF,
            extra: EventExtra::empty(),
            synthetic: true,
        }
    }
}

impl fmt::Display for EventReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "events={} extra={}", self.events, self.extra)?;
        if self.synthetic {
            f.write_str(" (synthetic)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_mask_tracks_features() {
        let plain = IrqEvents::process_mask(false, false);
        assert!(!plain.intersects(IrqEvents::WEAR));
        assert!(plain.contains(IrqEvents::FIFO | IrqEvents::CHIP_RESET));

        let full = IrqEvents::process_mask(true, true);
        assert!(full.contains(IrqEvents::WEAR | IrqEvents::LEAD));
        assert!(
            !full.intersects(IrqEvents::SLOT_TIMEOUT),
            "slot timeouts are not handled by the scheduler"
        );
    }

    #[test]
    fn soft_event_insert_and_remove() {
        let mut soft = SoftEvents::empty();
        soft.insert(SoftEvents::FORCE_READ | SoftEvents::WEAR_ON);
        assert!(soft.intersects(SoftEvents::READ));
        soft.remove(SoftEvents::READ);
        assert_eq!(soft, SoftEvents::WEAR_ON);
    }

    #[test]
    fn wear_group_is_both_transitions() {
        assert_eq!(IrqEvents::WEAR, IrqEvents::WEAR_ON | IrqEvents::WEAR_OFF);
        assert_eq!(
            IrqEvents::from_bits_retain(0x8000).difference(IrqEvents::all()),
            IrqEvents::from_bits_retain(0x8000),
            "undocumented status bits survive the read"
        );
    }

    #[test]
    fn report_display_marks_synthetic() {
        let mut text: heapless::String<64> = heapless::String::new();
        core::fmt::write(&mut text, format_args!("{}", EventReport::wear_released()))
            .expect("fits");
        assert_eq!(text.as_str(), "events=0x0800 extra=0x00 (synthetic)");
    }
}

//! Aligns an independently clocked auxiliary stream (accelerometer) with the
//! frame cadence of the fastest active function.
//!
//! The step between the two clocks is kept as an exact ratio and the
//! fractional part is carried between reads, so long runs neither drift nor
//! depend on float rounding. Points that were read but not yet consumed are
//! parked in a small carry region in front of the fresh samples.

use crate::functions::FunctionId;

/// Points the carry region can hold.
pub const AUX_EXTRA_LEN: usize = 10;

/// Fresh points accepted per FIFO read.
pub const AUX_FIFO_LEN: usize = 100;

pub const AUX_BUFFER_LEN: usize = AUX_EXTRA_LEN + AUX_FIFO_LEN;

/// `num / den` auxiliary points per reference frame.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Ratio {
    pub num: u32,
    pub den: u32,
}

/// Slice of the aligned buffer handed to the decoders for one read.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AlignedWindow {
    /// Position relative to the first fresh point; negative values reach into the carry.
    pub head: isize,
    pub len: usize,
}

#[derive(Clone, Debug)]
pub struct NonSyncAligner<T> {
    reference: Option<FunctionId>,
    step: Ratio,
    carry: u32,
    remain: usize,
    buffer: [T; AUX_BUFFER_LEN],
}

const fn slot_of(position: isize) -> usize {
    // Positions never reach further back than the carry region.
    position.wrapping_add(AUX_EXTRA_LEN as isize).cast_unsigned()
}

impl<T: Copy + Default> NonSyncAligner<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            reference: None,
            step: Ratio::default(),
            carry: 0,
            remain: 0,
            buffer: [T::default(); AUX_BUFFER_LEN],
        }
    }

    /// Function whose frame count drives the alignment.
    #[must_use]
    pub const fn reference(&self) -> Option<FunctionId> {
        self.reference
    }

    #[must_use]
    pub const fn step(&self) -> Ratio {
        self.step
    }

    /// Points parked in the carry region.
    #[must_use]
    pub const fn remain(&self) -> usize {
        self.remain
    }

    /// Switches to a new reference and drops all carried state.
    pub fn reconfigure(
        &mut self,
        reference: Option<FunctionId>,
        aux_rate_hz: u16,
        reference_rate_hz: u16,
    ) {
        self.reference = reference;
        self.step = Ratio {
            num: u32::from(aux_rate_hz),
            den: u32::from(reference_rate_hz),
        };
        self.carry = 0;
        self.remain = 0;
    }

    /// Region the sensor fills with fresh points.
    pub fn fresh_mut(&mut self) -> &mut [T] {
        &mut self.buffer[AUX_EXTRA_LEN..]
    }

    #[must_use]
    pub fn fresh(&self) -> &[T] {
        &self.buffer[AUX_EXTRA_LEN..]
    }

    /// Points owed for `frames` reference frames, clamped to what can be served.
    pub fn needed_points(&mut self, frames: u16, current: usize) -> usize {
        let ceiling = AUX_EXTRA_LEN + current;
        if self.reference.is_none() || self.step.den == 0 {
            return current;
        }
        let total = u32::from(frames) * self.step.num + self.carry;
        self.carry = total % self.step.den;
        let needed = usize::try_from(total / self.step.den).unwrap_or(usize::MAX);
        needed.min(ceiling)
    }

    /// Picks the window for `frames` frames given `current` fresh points,
    /// backfilling an underrun with the oldest available point (or the
    /// default value when nothing is buffered).
    pub fn align(&mut self, frames: u16, current: usize) -> AlignedWindow {
        let current = current.min(AUX_FIFO_LEN);
        let needed = self.needed_points(frames, current);
        let from_fresh = current.cast_signed() - needed.cast_signed();
        let oldest = -self.remain.cast_signed();

        let head = if from_fresh < oldest {
            let fill = if self.remain > 0 {
                self.buffer[slot_of(oldest)]
            } else if current > 0 {
                self.buffer[slot_of(0)]
            } else {
                T::default()
            };
            self.buffer[slot_of(from_fresh)..slot_of(oldest)].fill(fill);
            from_fresh
        } else {
            oldest
        };

        AlignedWindow { head, len: needed }
    }

    #[must_use]
    pub fn window(&self, window: AlignedWindow) -> &[T] {
        let start = slot_of(window.head);
        &self.buffer[start..start + window.len]
    }

    /// Parks the points after `window` in the carry region, keeping the
    /// newest [`AUX_EXTRA_LEN`] of them.
    pub fn retain(&mut self, current: usize, window: AlignedWindow) {
        let current = current.min(AUX_FIFO_LEN).cast_signed();
        let mut source = window.head + window.len.cast_signed();
        let mut keep = (current - source).max(0);
        let cap = AUX_EXTRA_LEN.cast_signed();
        if keep > cap {
            source += keep - cap;
            keep = cap;
        }
        let keep = keep.cast_unsigned();
        let start = slot_of(source);
        self.buffer
            .copy_within(start..start + keep, AUX_EXTRA_LEN - keep);
        self.remain = keep;
    }
}

impl<T: Copy + Default> Default for NonSyncAligner<T> {
    fn default() -> Self {
        Self::new()
    }
}

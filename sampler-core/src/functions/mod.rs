//! Function registry: the catalog of sampling functions and their per-function
//! runtime state.
//!
//! Every function owns a bit in a 32-bit [`FunctionMask`]. Descriptors are
//! created once from the const catalog and live for the whole process; they
//! are enabled and disabled, never deallocated.

use core::{fmt, ops};

use bitflags::bitflags;

use heapless::Vec;

use crate::driver::{FrameDecoder, SensorWindow};
use crate::slots::SlotMask;

pub mod catalog;

pub use catalog::{DEFAULT_FUNCTIONS, FunctionSpec};

/// Number of function ids understood by the scheduler.
pub const FUNCTION_COUNT: usize = 20;

/// Upper bound on channels a single function can map.
pub const MAX_CHANNELS: usize = 32;

/// Values an algorithm result may carry.
pub const RESULT_VALUES: usize = 4;

/// Sampling functions, ordered by their bit offset in [`FunctionMask`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FunctionId {
    Adt,
    Hr,
    Hrv,
    Hsm,
    Fpbp,
    Pwa,
    Spo2,
    Ecg,
    Pwtt,
    SoftAdtGreen,
    Bt,
    Resp,
    Af,
    Test1,
    Test2,
    SoftAdtIr,
    Rs0,
    Rs1,
    Rs2,
    LeadDet,
}

impl FunctionId {
    /// Every function in bit-offset order.
    pub const ALL: [FunctionId; FUNCTION_COUNT] = [
        FunctionId::Adt,
        FunctionId::Hr,
        FunctionId::Hrv,
        FunctionId::Hsm,
        FunctionId::Fpbp,
        FunctionId::Pwa,
        FunctionId::Spo2,
        FunctionId::Ecg,
        FunctionId::Pwtt,
        FunctionId::SoftAdtGreen,
        FunctionId::Bt,
        FunctionId::Resp,
        FunctionId::Af,
        FunctionId::Test1,
        FunctionId::Test2,
        FunctionId::SoftAdtIr,
        FunctionId::Rs0,
        FunctionId::Rs1,
        FunctionId::Rs2,
        FunctionId::LeadDet,
    ];

    /// Bit offset inside a [`FunctionMask`].
    #[must_use]
    pub const fn offset(self) -> usize {
        self as usize
    }

    /// Attempts to construct a [`FunctionId`] from a raw bit offset.
    #[must_use]
    pub const fn from_offset(offset: usize) -> Option<Self> {
        if offset < FUNCTION_COUNT {
            Some(Self::ALL[offset])
        } else {
            None
        }
    }

    const fn bit(self) -> u32 {
        1 << self.offset()
    }

    /// Single-bit mask for this function.
    #[must_use]
    pub const fn mask(self) -> FunctionMask {
        FunctionMask::from_bits_retain(self.bit())
    }

    /// Short label used in logs and transcripts.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            FunctionId::Adt => "ADT",
            FunctionId::Hr => "HR",
            FunctionId::Hrv => "HRV",
            FunctionId::Hsm => "HSM",
            FunctionId::Fpbp => "FPBP",
            FunctionId::Pwa => "PWA",
            FunctionId::Spo2 => "SPO2",
            FunctionId::Ecg => "ECG",
            FunctionId::Pwtt => "PWTT",
            FunctionId::SoftAdtGreen => "SOFT_ADT_GREEN",
            FunctionId::Bt => "BT",
            FunctionId::Resp => "RESP",
            FunctionId::Af => "AF",
            FunctionId::Test1 => "TEST1",
            FunctionId::Test2 => "TEST2",
            FunctionId::SoftAdtIr => "SOFT_ADT_IR",
            FunctionId::Rs0 => "RS0",
            FunctionId::Rs1 => "RS1",
            FunctionId::Rs2 => "RS2",
            FunctionId::LeadDet => "LEAD_DET",
        }
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

bitflags! {
    /// Set of functions, one bit per [`FunctionId`].
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct FunctionMask: u32 {
        const ADT = FunctionId::Adt.bit();
        const HR = FunctionId::Hr.bit();
        const HRV = FunctionId::Hrv.bit();
        const HSM = FunctionId::Hsm.bit();
        const FPBP = FunctionId::Fpbp.bit();
        const PWA = FunctionId::Pwa.bit();
        const SPO2 = FunctionId::Spo2.bit();
        const ECG = FunctionId::Ecg.bit();
        const PWTT = FunctionId::Pwtt.bit();
        const SOFT_ADT_GREEN = FunctionId::SoftAdtGreen.bit();
        const BT = FunctionId::Bt.bit();
        const RESP = FunctionId::Resp.bit();
        const AF = FunctionId::Af.bit();
        const TEST1 = FunctionId::Test1.bit();
        const TEST2 = FunctionId::Test2.bit();
        const SOFT_ADT_IR = FunctionId::SoftAdtIr.bit();
        const RS0 = FunctionId::Rs0.bit();
        const RS1 = FunctionId::Rs1.bit();
        const RS2 = FunctionId::Rs2.bit();
        const LEAD_DET = FunctionId::LeadDet.bit();
    }
}

impl FunctionMask {
    pub const EMPTY: Self = Self::empty();

    #[must_use]
    pub const fn has(self, id: FunctionId) -> bool {
        self.intersects(id.mask())
    }

    #[must_use]
    pub const fn with(self, id: FunctionId) -> Self {
        self.union(id.mask())
    }

    #[must_use]
    pub const fn without(self, id: FunctionId) -> Self {
        self.difference(id.mask())
    }

    /// Bits that do not correspond to any [`FunctionId`].
    #[must_use]
    pub const fn unknown_bits(self) -> Self {
        Self::from_bits_retain(self.bits() & !Self::all().bits())
    }

    #[must_use]
    pub const fn count(self) -> u32 {
        self.bits().count_ones()
    }

    /// Iterates the contained functions in bit-offset order.
    pub fn functions(self) -> impl Iterator<Item = FunctionId> {
        FunctionId::ALL.into_iter().filter(move |id| self.has(*id))
    }
}

impl fmt::Display for FunctionMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.bits())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for FunctionMask {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{=u32:#x}", self.bits());
    }
}

impl From<FunctionId> for FunctionMask {
    fn from(value: FunctionId) -> Self {
        value.mask()
    }
}

/// Logical channel tag: slot index in bits 7..5, ADC index in bits 4..3.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelTag(u8);

impl ChannelTag {
    const SLOT_SHIFT: u8 = 5;
    const ADC_SHIFT: u8 = 3;
    /// Bits of a FIFO word's top byte that carry the tag.
    pub const TAG_MASK: u8 = 0xF8;

    #[must_use]
    pub const fn new(slot: u8, adc: u8) -> Self {
        Self(((slot & 0x07) << Self::SLOT_SHIFT) | ((adc & 0x03) << Self::ADC_SHIFT))
    }

    #[must_use]
    pub const fn from_raw(raw: u8) -> Self {
        Self(raw & Self::TAG_MASK)
    }

    #[must_use]
    pub const fn raw(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn slot(self) -> u8 {
        self.0 >> Self::SLOT_SHIFT
    }

    #[must_use]
    pub const fn adc(self) -> u8 {
        (self.0 >> Self::ADC_SHIFT) & 0x03
    }
}

/// One big-endian FIFO word: tag and gain in the top byte, 24-bit sample below.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RawWord(u32);

impl RawWord {
    pub const BYTES: usize = 4;

    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Builds a word the way the chip emits it.
    #[must_use]
    pub const fn compose(tag: ChannelTag, gain: u8, value: u32) -> Self {
        Self(((tag.raw() as u32 | (gain as u32 & 0x07)) << 24) | (value & 0x00FF_FFFF))
    }

    #[must_use]
    pub const fn tag(self) -> ChannelTag {
        ChannelTag::from_raw((self.0 >> 24) as u8)
    }

    #[must_use]
    pub const fn gain(self) -> u8 {
        ((self.0 >> 24) as u8) & 0x07
    }

    #[must_use]
    pub const fn value(self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    #[must_use]
    pub const fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

/// Splits a FIFO payload into words. A trailing partial word is ignored.
pub fn raw_words(fifo: &[u8]) -> impl Iterator<Item = RawWord> + '_ {
    fifo.chunks_exact(RawWord::BYTES)
        .map(|c| RawWord(u32::from_be_bytes([c[0], c[1], c[2], c[3]])))
}

/// Emit 1 of every `factor + 1` complete frames.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DownSampleState {
    factor: u8,
    counter: u8,
}

impl DownSampleState {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            factor: 0,
            counter: 0,
        }
    }

    #[must_use]
    pub const fn factor(self) -> u8 {
        self.factor
    }

    #[must_use]
    pub const fn counter(self) -> u8 {
        self.counter
    }

    /// Replaces the factor; the counter always restarts.
    pub fn set_factor(&mut self, factor: u8) {
        self.factor = factor;
        self.counter = 0;
    }

    /// Records one complete frame and reports whether it should be emitted.
    pub fn admit(&mut self) -> bool {
        let emit = self.counter == 0;
        self.counter = if self.counter >= self.factor {
            0
        } else {
            self.counter + 1
        };
        emit
    }
}

/// Partial frame carried across FIFO reads.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct IncompleteFrame {
    pub values: [u32; MAX_CHANNELS],
    pub gains: [u8; MAX_CHANNELS],
    /// Channels already filled for the frame under construction.
    pub bitmap: u32,
    /// Complete frames assembled since the function started.
    pub frame_counter: u32,
}

impl IncompleteFrame {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            values: [0; MAX_CHANNELS],
            gains: [0; MAX_CHANNELS],
            bitmap: 0,
            frame_counter: 0,
        }
    }
}

impl Default for IncompleteFrame {
    fn default() -> Self {
        Self::new()
    }
}

/// Output of an opaque algorithm call.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AlgorithmResult {
    pub values: [i32; RESULT_VALUES],
    pub confidence: u8,
    /// Frame counter of the frame that produced the result.
    pub frame_index: u32,
}

/// Electrode contact as last reported by the lead detector.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LeadState {
    #[default]
    Unknown,
    On,
    Off,
}

/// Catalog-level selector for [`Variant`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VariantKind {
    Optical,
    BioPotential,
    WearDetect,
    Passthrough,
}

/// Fields that only some families of functions carry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Variant {
    /// PPG-style functions publishing an algorithm result.
    Optical { result: Option<AlgorithmResult> },
    /// Electrode functions that also track lead contact.
    BioPotential {
        result: Option<AlgorithmResult>,
        lead: LeadState,
    },
    /// Wear detection; no algorithm result.
    WearDetect,
    /// Raw data only.
    Passthrough,
}

impl Variant {
    #[must_use]
    pub const fn from_kind(kind: VariantKind) -> Self {
        match kind {
            VariantKind::Optical => Variant::Optical { result: None },
            VariantKind::BioPotential => Variant::BioPotential {
                result: None,
                lead: LeadState::Unknown,
            },
            VariantKind::WearDetect => Variant::WearDetect,
            VariantKind::Passthrough => Variant::Passthrough,
        }
    }

    #[must_use]
    pub const fn result(&self) -> Option<&AlgorithmResult> {
        match self {
            Variant::Optical { result } | Variant::BioPotential { result, .. } => result.as_ref(),
            Variant::WearDetect | Variant::Passthrough => None,
        }
    }

    #[must_use]
    pub const fn lead(&self) -> Option<LeadState> {
        match self {
            Variant::BioPotential { lead, .. } => Some(*lead),
            Variant::Optical { .. } | Variant::WearDetect | Variant::Passthrough => None,
        }
    }

    /// Records electrode contact; ignored by variants without a lead.
    pub fn set_lead(&mut self, state: LeadState) {
        if let Variant::BioPotential { lead, .. } = self {
            *lead = state;
        }
    }

    fn store(&mut self, value: AlgorithmResult) {
        match self {
            Variant::Optical { result } | Variant::BioPotential { result, .. } => {
                *result = Some(value);
            }
            Variant::WearDetect | Variant::Passthrough => {}
        }
    }

    fn clear(&mut self) {
        match self {
            Variant::Optical { result } | Variant::BioPotential { result, .. } => *result = None,
            Variant::WearDetect | Variant::Passthrough => {}
        }
    }
}

/// Counters reported by one decode pass.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DispatchStats {
    pub frames_complete: u32,
    pub frames_emitted: u32,
    pub frames_dropped: u32,
    pub decode_errors: u32,
}

impl DispatchStats {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            frames_complete: 0,
            frames_emitted: 0,
            frames_dropped: 0,
            decode_errors: 0,
        }
    }
}

impl ops::AddAssign for DispatchStats {
    fn add_assign(&mut self, rhs: Self) {
        self.frames_complete += rhs.frames_complete;
        self.frames_emitted += rhs.frames_emitted;
        self.frames_dropped += rhs.frames_dropped;
        self.decode_errors += rhs.decode_errors;
    }
}

/// Complete frame handed to the decoder.
#[derive(Copy, Clone, Debug)]
pub struct Frame<'a> {
    pub function: FunctionId,
    pub index: u32,
    pub values: &'a [u32],
    pub gains: &'a [u8],
    pub sensors: &'a SensorWindow<'a>,
}

/// Runtime record for one function.
#[derive(Clone, Debug)]
pub struct Descriptor {
    pub id: FunctionId,
    channels: Vec<ChannelTag, MAX_CHANNELS>,
    /// Current effective sample rate in Hz.
    pub sample_rate_hz: u16,
    /// Rate requested through the command layer, applied at the next rebalance.
    pub user_sample_rate_hz: Option<u16>,
    slots: SlotMask,
    pub down_sample: DownSampleState,
    pub variant: Variant,
    pub carry: IncompleteFrame,
}

impl Descriptor {
    /// Builds a descriptor from a catalog entry. Channels past
    /// [`MAX_CHANNELS`] are ignored.
    #[must_use]
    pub fn from_spec(spec: &FunctionSpec) -> Self {
        let mut channels = Vec::new();
        for tag in spec.channels.iter().take(MAX_CHANNELS) {
            let _ = channels.push(*tag);
        }
        let mut descriptor = Self {
            id: spec.id,
            channels,
            sample_rate_hz: spec.sample_rate_hz,
            user_sample_rate_hz: None,
            slots: SlotMask::EMPTY,
            down_sample: DownSampleState::new(),
            variant: Variant::from_kind(spec.variant),
            carry: IncompleteFrame::new(),
        };
        descriptor.derive_slots();
        descriptor
    }

    #[must_use]
    pub fn channels(&self) -> &[ChannelTag] {
        &self.channels
    }

    /// Slots backing this function, derived from its channel map.
    #[must_use]
    pub const fn slots(&self) -> SlotMask {
        self.slots
    }

    /// Recomputes the slot membership from the channel map.
    pub fn derive_slots(&mut self) {
        self.slots = self
            .channels
            .iter()
            .fold(SlotMask::EMPTY, |acc, tag| acc.with(tag.slot()));
    }

    /// Rate the rebalancer should request for this function.
    #[must_use]
    pub fn requested_rate_hz(&self) -> u16 {
        self.user_sample_rate_hz.unwrap_or(self.sample_rate_hz)
    }

    /// Clears carry state and the last result. Called on function start.
    pub fn reset_runtime(&mut self) {
        self.carry = IncompleteFrame::new();
        self.down_sample.set_factor(self.down_sample.factor());
        self.variant.clear();
    }

    fn full_bitmap(&self) -> u32 {
        match self.channels.len() {
            0 => 0,
            n if n >= 32 => u32::MAX,
            n => (1u32 << n) - 1,
        }
    }

    fn channel_index(&self, tag: ChannelTag) -> Option<usize> {
        self.channels.iter().position(|c| *c == tag)
    }

    /// Counts the frames the payload would complete, starting from the
    /// current carry, without consuming it.
    #[must_use]
    pub fn count_frames(&self, fifo: &[u8]) -> u16 {
        let full = self.full_bitmap();
        if full == 0 {
            return 0;
        }
        let mut bitmap = self.carry.bitmap;
        let mut frames: u16 = 0;
        for word in raw_words(fifo) {
            let Some(index) = self.channel_index(word.tag()) else {
                continue;
            };
            let bit = 1u32 << index;
            if bitmap & bit != 0 {
                bitmap = 0;
            }
            bitmap |= bit;
            if bitmap == full {
                bitmap = 0;
                frames = frames.saturating_add(1);
            }
        }
        frames
    }

    /// Assembles frames out of `fifo`, gates them through down-sampling and
    /// hands the admitted ones to `decoder`.
    pub fn decode_fifo<D: FrameDecoder>(
        &mut self,
        fifo: &[u8],
        sensors: &SensorWindow<'_>,
        decoder: &mut D,
    ) -> DispatchStats {
        let mut stats = DispatchStats::default();
        let full = self.full_bitmap();
        if full == 0 {
            return stats;
        }
        let width = self.channels.len();

        for word in raw_words(fifo) {
            let Some(index) = self.channel_index(word.tag()) else {
                continue;
            };
            let bit = 1u32 << index;
            if self.carry.bitmap & bit != 0 {
                // A channel repeated before the frame completed; the partial frame is lost.
                self.carry.bitmap = 0;
                stats.frames_dropped += 1;
            }
            self.carry.values[index] = word.value();
            self.carry.gains[index] = word.gain();
            self.carry.bitmap |= bit;

            if self.carry.bitmap != full {
                continue;
            }
            self.carry.bitmap = 0;
            self.carry.frame_counter = self.carry.frame_counter.wrapping_add(1);
            stats.frames_complete += 1;

            if !self.down_sample.admit() {
                continue;
            }
            stats.frames_emitted += 1;
            let frame = Frame {
                function: self.id,
                index: self.carry.frame_counter,
                values: &self.carry.values[..width],
                gains: &self.carry.gains[..width],
                sensors,
            };
            match decoder.decode(&frame) {
                Ok(Some(result)) => self.variant.store(result),
                Ok(None) => {}
                Err(err) => {
                    warn!("registry: {} decode failed ({})", self.id, err);
                    stats.decode_errors += 1;
                }
            }
        }

        stats
    }
}

/// Fixed table of descriptors indexed by function offset.
#[derive(Clone, Debug)]
pub struct FunctionRegistry {
    descriptors: [Option<Descriptor>; FUNCTION_COUNT],
}

impl FunctionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            descriptors: [const { None }; FUNCTION_COUNT],
        }
    }

    /// Builds a registry from a catalog slice. Later duplicates win.
    #[must_use]
    pub fn from_catalog(catalog: &[FunctionSpec]) -> Self {
        let mut registry = Self::new();
        for spec in catalog {
            registry.descriptors[spec.id.offset()] = Some(Descriptor::from_spec(spec));
        }
        registry
    }

    /// Functions present in the registry.
    #[must_use]
    pub fn supported(&self) -> FunctionMask {
        self.iter()
            .fold(FunctionMask::EMPTY, |acc, descriptor| acc.with(descriptor.id))
    }

    #[must_use]
    pub fn lookup(&self, id: FunctionId) -> Option<&Descriptor> {
        self.descriptors[id.offset()].as_ref()
    }

    pub fn lookup_mut(&mut self, id: FunctionId) -> Option<&mut Descriptor> {
        self.descriptors[id.offset()].as_mut()
    }

    /// Iterates every registered descriptor.
    pub fn iter(&self) -> impl Iterator<Item = &Descriptor> {
        self.descriptors.iter().filter_map(Option::as_ref)
    }

    /// Iterates descriptors whose bit is set in `mask`. Unregistered bits are skipped.
    pub fn for_each_active(&self, mask: FunctionMask) -> impl Iterator<Item = &Descriptor> {
        self.iter().filter(move |d| mask.has(d.id))
    }

    pub fn for_each_active_mut(
        &mut self,
        mask: FunctionMask,
    ) -> impl Iterator<Item = &mut Descriptor> {
        self.descriptors
            .iter_mut()
            .filter_map(Option::as_mut)
            .filter(move |d| mask.has(d.id))
    }

    /// Active function with the highest sample rate; the first one wins ties.
    #[must_use]
    pub fn fastest_active(&self, mask: FunctionMask) -> Option<&Descriptor> {
        self.for_each_active(mask).fold(None, |best: Option<&Descriptor>, d| match best {
            Some(b) if b.sample_rate_hz >= d.sample_rate_hz => Some(b),
            _ => Some(d),
        })
    }

    /// Runs [`Descriptor::decode_fifo`] for every active function.
    pub fn dispatch<D: FrameDecoder>(
        &mut self,
        active: FunctionMask,
        fifo: &[u8],
        sensors: &SensorWindow<'_>,
        decoder: &mut D,
    ) -> DispatchStats {
        let mut total = DispatchStats::default();
        for descriptor in self.for_each_active_mut(active) {
            total += descriptor.decode_fifo(fifo, sensors, decoder);
        }
        total
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::from_catalog(&DEFAULT_FUNCTIONS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SensorWindow;
    use crate::error::AlgorithmError;

    struct CountingDecoder {
        calls: u32,
        fail: bool,
    }

    impl FrameDecoder for CountingDecoder {
        fn decode(&mut self, frame: &Frame<'_>) -> Result<Option<AlgorithmResult>, AlgorithmError> {
            self.calls += 1;
            if self.fail {
                return Err(AlgorithmError::Generic);
            }
            Ok(Some(AlgorithmResult {
                values: [i32::try_from(frame.values[0]).unwrap_or(0), 0, 0, 0],
                confidence: 100,
                frame_index: frame.index,
            }))
        }
    }

    fn payload(words: &[RawWord]) -> heapless::Vec<u8, 64> {
        let mut bytes = heapless::Vec::new();
        for word in words {
            bytes
                .extend_from_slice(&word.to_be_bytes())
                .expect("payload fits");
        }
        bytes
    }

    fn spo2() -> Descriptor {
        const CHANNELS: &[ChannelTag] = &[ChannelTag::new(3, 0), ChannelTag::new(4, 0)];
        Descriptor::from_spec(&FunctionSpec::new(
            FunctionId::Spo2,
            CHANNELS,
            25,
            VariantKind::Optical,
        ))
    }

    #[test]
    fn mask_iterates_in_offset_order() {
        let mask = FunctionMask::EMPTY
            .with(FunctionId::Ecg)
            .with(FunctionId::Adt)
            .with(FunctionId::Hr);
        let mut ids = mask.functions();
        assert_eq!(ids.next(), Some(FunctionId::Adt));
        assert_eq!(ids.next(), Some(FunctionId::Hr));
        assert_eq!(ids.next(), Some(FunctionId::Ecg));
        assert_eq!(ids.next(), None);
    }

    #[test]
    fn unknown_bits_are_reported() {
        let mask = FunctionMask::from_bits_retain(1 << 25 | 1);
        assert_eq!(mask.unknown_bits(), FunctionMask::from_bits_retain(1 << 25));
        assert!(FunctionMask::all().unknown_bits().is_empty());
        assert_eq!(FunctionMask::all().count(), 20);
    }

    #[test]
    fn from_offset_round_trips_every_id() {
        for id in FunctionId::ALL {
            assert_eq!(FunctionId::from_offset(id.offset()), Some(id));
        }
        assert_eq!(FunctionId::from_offset(FUNCTION_COUNT), None);
    }

    #[test]
    fn slots_are_derived_from_channel_map() {
        let descriptor = spo2();
        assert_eq!(descriptor.slots(), SlotMask::from_bits_retain(0b0001_1000));
    }

    #[test]
    fn down_sample_emits_one_of_factor_plus_one() {
        let mut state = DownSampleState::new();
        state.set_factor(2);
        let emitted: u32 = (0..9).map(|_| u32::from(state.admit())).sum();
        assert_eq!(emitted, 3, "factor 2 should emit every third frame");
    }

    #[test]
    fn set_factor_resets_counter() {
        let mut state = DownSampleState::new();
        state.set_factor(1);
        assert!(state.admit());
        assert_eq!(state.counter(), 1);
        state.set_factor(1);
        assert_eq!(state.counter(), 0);
    }

    #[test]
    fn incomplete_frame_carries_across_reads() {
        let mut descriptor = spo2();
        let mut decoder = CountingDecoder {
            calls: 0,
            fail: false,
        };
        let sensors = SensorWindow::EMPTY;

        let first = payload(&[
            RawWord::compose(ChannelTag::new(3, 0), 1, 100),
            RawWord::compose(ChannelTag::new(4, 0), 1, 200),
            RawWord::compose(ChannelTag::new(3, 0), 1, 300),
        ]);
        let stats = descriptor.decode_fifo(&first, &sensors, &mut decoder);
        assert_eq!(stats.frames_complete, 1);
        assert_eq!(descriptor.carry.bitmap, 0b01, "red channel should be carried");

        let second = payload(&[RawWord::compose(ChannelTag::new(4, 0), 1, 400)]);
        assert_eq!(descriptor.count_frames(&second), 1);
        let stats = descriptor.decode_fifo(&second, &sensors, &mut decoder);
        assert_eq!(stats.frames_complete, 1);
        assert_eq!(decoder.calls, 2);
        let result = descriptor.variant.result().expect("result stored");
        assert_eq!(result.values[0], 300);
        assert_eq!(result.frame_index, 2);
    }

    #[test]
    fn repeated_channel_drops_partial_frame() {
        let mut descriptor = spo2();
        let mut decoder = CountingDecoder {
            calls: 0,
            fail: false,
        };
        let fifo = payload(&[
            RawWord::compose(ChannelTag::new(3, 0), 0, 1),
            RawWord::compose(ChannelTag::new(3, 0), 0, 2),
            RawWord::compose(ChannelTag::new(4, 0), 0, 3),
        ]);
        let stats = descriptor.decode_fifo(&fifo, &SensorWindow::EMPTY, &mut decoder);
        assert_eq!(stats.frames_dropped, 1);
        assert_eq!(stats.frames_complete, 1);
    }

    #[test]
    fn decoder_errors_are_counted_not_escalated() {
        let mut descriptor = spo2();
        let mut decoder = CountingDecoder {
            calls: 0,
            fail: true,
        };
        let fifo = payload(&[
            RawWord::compose(ChannelTag::new(3, 0), 0, 1),
            RawWord::compose(ChannelTag::new(4, 0), 0, 2),
        ]);
        let stats = descriptor.decode_fifo(&fifo, &SensorWindow::EMPTY, &mut decoder);
        assert_eq!(stats.decode_errors, 1);
        assert!(descriptor.variant.result().is_none());
    }

    #[test]
    fn fastest_active_prefers_first_on_ties() {
        let registry = FunctionRegistry::default();
        let mask = FunctionId::Hr.mask() | FunctionId::Spo2.mask();
        let fastest = registry.fastest_active(mask).expect("active function");
        assert_eq!(fastest.id, FunctionId::Hr);
    }

    #[test]
    fn lookup_of_unregistered_function_is_absent() {
        let registry = FunctionRegistry::from_catalog(&DEFAULT_FUNCTIONS[..2]);
        assert!(registry.lookup(FunctionId::Ecg).is_none());
        assert_eq!(registry.for_each_active(FunctionMask::all()).count(), 2);
    }
}

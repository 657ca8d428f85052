//! Host stand-ins for the front-end chip, the accelerometer and the
//! algorithm library.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use sampler_core::config::{ConfigSet, ResetKind};
use sampler_core::driver::{
    AccelSample, AgcEngine, AuxSensorKind, AuxSensors, CapSample, ChipControl, ChipSelect,
    EventSink, FifoRead, FrameDecoder, LeadChange, LeadDetector, LeadOutcome, MotionConfirm,
};
use sampler_core::engineering::ChannelParams;
use sampler_core::functions::{AlgorithmResult, ChannelTag, Frame, FunctionId, RawWord};
use sampler_core::slots::{SLOT_COUNT, SlotMask, SlotOrder};
use sampler_core::wear::{SwitchMode, WearDetect};
use sampler_core::{AlgorithmError, DriverError, EventExtra, EventReport, IrqEvents};

/// Chip FIFO depth in words.
const FIFO_DEPTH_WORDS: usize = 1024;

/// Register-level model of the chip.
#[derive(Debug)]
pub struct SimChip {
    fifo: VecDeque<u8>,
    pending: IrqEvents,
    /// Interrupt line; cleared by [`SimChip::take_line`].
    line: bool,
    watermark: u16,
    slots: SlotMask,
    dividers: [u16; SLOT_COUNT],
    sampling: bool,
    low_power: bool,
    running: Vec<FunctionId>,
    loaded: Option<&'static str>,
    wear: WearDetect,
    sample_counter: u32,
    /// Per-channel overrides keyed by raw channel tag.
    channel_params: BTreeMap<u8, ChannelParams>,
    pub failing_loads: u32,
    pub resets: u32,
}

impl SimChip {
    pub fn new() -> Self {
        Self {
            fifo: VecDeque::new(),
            pending: IrqEvents::empty(),
            line: false,
            watermark: 0,
            slots: SlotMask::EMPTY,
            dividers: [39; SLOT_COUNT],
            sampling: false,
            low_power: true,
            running: Vec::new(),
            loaded: None,
            wear: WearDetect::WearOn,
            sample_counter: 0,
            channel_params: BTreeMap::new(),
            failing_loads: 0,
            resets: 0,
        }
    }

    /// Latches `events` and asserts the interrupt line.
    pub fn raise(&mut self, events: IrqEvents) {
        self.pending.insert(events);
        self.line = true;
    }

    /// Unexpected reset: the chip loses its state and reports it.
    pub fn glitch(&mut self) {
        self.clear();
        self.raise(IrqEvents::CHIP_RESET);
    }

    pub fn take_line(&mut self) -> bool {
        std::mem::take(&mut self.line)
    }

    /// Appends `frames` samples for every tag, raising the watermark
    /// interrupt when the level crosses it.
    pub fn push_frames(&mut self, tags: &[ChannelTag], frames: usize) -> usize {
        let mut pushed = 0;
        for _ in 0..frames {
            for tag in tags {
                if self.level() >= FIFO_DEPTH_WORDS {
                    self.raise(IrqEvents::FIFO_FULL);
                    return pushed;
                }
                self.sample_counter = self.sample_counter.wrapping_add(1);
                let value = 0x0008_0000 | (self.sample_counter & 0xFFFF);
                let word = RawWord::compose(*tag, 2, value);
                self.fifo.extend(word.to_be_bytes());
                pushed += 1;
            }
        }
        if self.watermark > 0 && self.level() >= usize::from(self.watermark) {
            self.raise(IrqEvents::FIFO_WATERMARK);
        }
        pushed
    }

    fn clear(&mut self) {
        self.fifo.clear();
        self.pending = IrqEvents::empty();
        self.slots = SlotMask::EMPTY;
        self.dividers = [39; SLOT_COUNT];
        self.sampling = false;
        self.running.clear();
        self.loaded = None;
        self.wear = WearDetect::WearOn;
        self.channel_params.clear();
    }

    pub fn level(&self) -> usize {
        self.fifo.len() / RawWord::BYTES
    }

    pub fn running(&self) -> &[FunctionId] {
        &self.running
    }

    pub fn loaded(&self) -> Option<&'static str> {
        self.loaded
    }

    pub fn watermark(&self) -> u16 {
        self.watermark
    }

    pub fn slots(&self) -> SlotMask {
        self.slots
    }

    pub fn divider(&self, slot: u8) -> u16 {
        self.dividers[usize::from(slot)]
    }

    pub fn low_power(&self) -> bool {
        self.low_power
    }

    pub fn wear(&self) -> WearDetect {
        self.wear
    }

    /// Channels carrying engineering overrides.
    pub fn tuned_channels(&self) -> usize {
        self.channel_params.len()
    }
}

impl Default for SimChip {
    fn default() -> Self {
        Self::new()
    }
}

impl ChipControl for SimChip {
    fn select(&mut self, chip: ChipSelect) {
        log::trace!("sim: select {chip:?}");
    }

    fn reset(&mut self, kind: ResetKind) -> Result<(), DriverError> {
        log::debug!("sim: {kind:?} reset");
        self.resets += 1;
        self.clear();
        Ok(())
    }

    fn delay(&mut self, duration: Duration) {
        log::trace!("sim: settle {} ms", duration.as_millis());
    }

    fn enter_low_power(&mut self) -> Result<(), DriverError> {
        self.low_power = true;
        Ok(())
    }

    fn exit_low_power(&mut self) -> Result<(), DriverError> {
        self.low_power = false;
        Ok(())
    }

    fn load_configuration(&mut self, config: &ConfigSet) -> Result<(), DriverError> {
        if self.failing_loads > 0 {
            self.failing_loads -= 1;
            return Err(DriverError::Resource);
        }
        self.loaded = Some(config.name);
        self.watermark = config.fifo_watermark;
        Ok(())
    }

    fn irq_status(&mut self) -> Result<IrqEvents, DriverError> {
        Ok(std::mem::take(&mut self.pending))
    }

    fn fifo_level(&mut self) -> Result<u16, DriverError> {
        u16::try_from(self.level()).map_err(|_| DriverError::Generic)
    }

    fn read_fifo(&mut self, buffer: &mut [u8]) -> Result<FifoRead, DriverError> {
        let bytes = buffer.len().min(self.fifo.len());
        for (slot, byte) in buffer.iter_mut().zip(self.fifo.drain(..bytes)) {
            *slot = byte;
        }
        Ok(FifoRead {
            bytes,
            more_pending: false,
        })
    }

    fn write_fifo_watermark(&mut self, words: u16) -> Result<(), DriverError> {
        self.watermark = words;
        Ok(())
    }

    fn sampling_enabled(&mut self) -> Result<bool, DriverError> {
        Ok(self.sampling)
    }

    fn set_sampling_enabled(&mut self, enabled: bool) -> Result<(), DriverError> {
        self.sampling = enabled;
        Ok(())
    }

    fn write_slot_enable(&mut self, slots: SlotMask) -> Result<(), DriverError> {
        self.slots = slots;
        Ok(())
    }

    fn slot_divider(&mut self, slot: u8) -> Result<u16, DriverError> {
        self.dividers
            .get(usize::from(slot))
            .copied()
            .ok_or(DriverError::Generic)
    }

    fn write_slot_divider(&mut self, slot: u8, divider: u16) -> Result<(), DriverError> {
        let entry = self
            .dividers
            .get_mut(usize::from(slot))
            .ok_or(DriverError::Generic)?;
        *entry = divider;
        Ok(())
    }

    fn write_slot_order(&mut self, position: u8, entry: SlotOrder) -> Result<(), DriverError> {
        log::trace!("sim: slot order {position} <- {entry:?}");
        Ok(())
    }

    fn write_slot_time(&mut self, _: u8, _: u16) -> Result<(), DriverError> {
        Ok(())
    }

    fn function_start(&mut self, id: FunctionId) -> Result<(), DriverError> {
        if self.loaded.is_none() {
            return Err(DriverError::Resource);
        }
        if !self.running.contains(&id) {
            self.running.push(id);
        }
        Ok(())
    }

    fn function_stop(&mut self, id: FunctionId) -> Result<(), DriverError> {
        self.running.retain(|running| *running != id);
        Ok(())
    }

    fn wear_detect_switch(
        &mut self,
        target: WearDetect,
        mode: SwitchMode,
    ) -> Result<(), DriverError> {
        log::trace!("sim: wear switch to {target:?} ({mode:?})");
        self.wear = target;
        Ok(())
    }

    fn write_channel_params(
        &mut self,
        channel: ChannelTag,
        params: ChannelParams,
    ) -> Result<(), DriverError> {
        if self.loaded.is_none() {
            return Err(DriverError::Resource);
        }
        log::trace!("sim: channel {:#04x} <- {params:?}", channel.raw());
        self.channel_params.insert(channel.raw(), params);
        Ok(())
    }
}

/// Accelerometer that serves queued samples.
#[derive(Debug, Default)]
pub struct SimSensors {
    queued: VecDeque<AccelSample>,
    caching: Vec<AuxSensorKind>,
}

impl SimSensors {
    /// Queues `count` samples of a slow wrist sway.
    pub fn queue_motion(&mut self, count: usize) {
        for step in 0..count {
            let phase = i16::try_from(step % 64).unwrap_or(0);
            self.queued.push_back(AccelSample {
                x: phase * 8,
                y: 512 - phase * 4,
                z: 1024,
            });
        }
    }

    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    pub fn caching(&self) -> &[AuxSensorKind] {
        &self.caching
    }
}

impl AuxSensors for SimSensors {
    fn start_caching(&mut self, kind: AuxSensorKind) {
        if !self.caching.contains(&kind) {
            self.caching.push(kind);
        }
    }

    fn stop_caching(&mut self, kind: AuxSensorKind) {
        self.caching.retain(|cached| *cached != kind);
        if kind == AuxSensorKind::Accel {
            self.queued.clear();
        }
    }

    fn read_accel(&mut self, out: &mut [AccelSample]) -> usize {
        let count = out.len().min(self.queued.len());
        for (slot, sample) in out.iter_mut().zip(self.queued.drain(..count)) {
            *slot = sample;
        }
        count
    }
}

/// Algorithm library double: averages channel values and counts frames.
#[derive(Debug, Default)]
pub struct SimAlgorithms {
    frames: BTreeMap<FunctionId, u32>,
    accel_points: usize,
    motion_samples: usize,
    agc_passes: u32,
    pub movement: bool,
    timer: bool,
}

impl SimAlgorithms {
    pub fn frames(&self) -> &BTreeMap<FunctionId, u32> {
        &self.frames
    }

    pub fn accel_points(&self) -> usize {
        self.accel_points
    }

    pub fn motion_samples(&self) -> usize {
        self.motion_samples
    }

    pub fn agc_passes(&self) -> u32 {
        self.agc_passes
    }

    pub fn timer(&self) -> bool {
        self.timer
    }
}

impl FrameDecoder for SimAlgorithms {
    fn start(&mut self, id: FunctionId) -> Result<(), AlgorithmError> {
        self.frames.insert(id, 0);
        Ok(())
    }

    fn stop(&mut self, id: FunctionId) -> Result<(), AlgorithmError> {
        self.frames.remove(&id);
        Ok(())
    }

    fn decode(&mut self, frame: &Frame<'_>) -> Result<Option<AlgorithmResult>, AlgorithmError> {
        *self.frames.entry(frame.function).or_default() += 1;
        self.accel_points += frame.sensors.accel.len();

        let sum: u64 = frame.values.iter().map(|value| u64::from(*value)).sum();
        let count = u64::try_from(frame.values.len().max(1)).map_err(|_| AlgorithmError::Generic)?;
        let mean = i32::try_from(sum / count).map_err(|_| AlgorithmError::Generic)?;
        Ok(Some(AlgorithmResult {
            values: [mean, 0, 0, 0],
            confidence: 90,
            frame_index: frame.index,
        }))
    }
}

impl AgcEngine for SimAlgorithms {
    fn process(&mut self, _: &[u8], _: IrqEvents) -> Result<(), AlgorithmError> {
        self.agc_passes += 1;
        Ok(())
    }

    fn reset_gain(&mut self) {
        log::debug!("sim: gain reset");
    }
}

impl LeadDetector for SimAlgorithms {
    fn handle(&mut self, _: &mut IrqEvents, _: &[u8]) -> Result<LeadOutcome, AlgorithmError> {
        Ok(LeadOutcome::default())
    }
}

impl MotionConfirm for SimAlgorithms {
    fn start_adt_with_motion(&mut self) {
        log::debug!("sim: adt waiting for movement");
    }

    fn stop_adt_with_motion(&mut self) {
        log::debug!("sim: adt movement confirmed");
    }

    fn movement_confirmed(&mut self) -> bool {
        self.movement
    }

    fn reset_motion(&mut self) {
        self.motion_samples = 0;
    }

    fn feed(&mut self, accel: &[AccelSample], _: &[CapSample]) {
        self.motion_samples += accel.len();
    }

    fn start_timer(&mut self) {
        self.timer = true;
    }

    fn stop_timer(&mut self) {
        self.timer = false;
    }
}

/// Collects protocol-facing reports as transcript lines.
#[derive(Debug, Default)]
pub struct TranscriptSink {
    lines: Vec<String>,
}

impl TranscriptSink {
    pub fn drain(&mut self) -> Vec<String> {
        std::mem::take(&mut self.lines)
    }
}

impl EventSink for TranscriptSink {
    fn report(&mut self, report: &EventReport) {
        self.lines.push(format!("event {report}"));
    }

    fn lead_changed(&mut self, change: LeadChange, extra: EventExtra) {
        self.lines.push(format!("lead {change:?} extra={extra}"));
    }

    fn wear_changed(&mut self, report: &EventReport) {
        self.lines.push(format!("wear {report}"));
    }
}

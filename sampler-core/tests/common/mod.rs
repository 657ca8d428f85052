#![allow(dead_code)]

use std::collections::VecDeque;
use std::time::Duration;

use critical_section as _;

use sampler_core::config::{ConfigSet, ResetKind};
use sampler_core::driver::{
    AccelSample, AgcEngine, AuxSensorKind, AuxSensors, CapSample, ChipControl, ChipSelect,
    EventSink, FifoRead, FrameDecoder, LeadChange, LeadDetector, LeadOutcome, MotionConfirm,
};
use sampler_core::engineering::ChannelParams;
use sampler_core::functions::{AlgorithmResult, ChannelTag, Frame, FunctionId, RawWord};
use sampler_core::slots::{SLOT_COUNT, SlotMask, SlotOrder};
use sampler_core::wear::{SwitchMode, WearDetect};
use sampler_core::{
    AlgorithmError, ConfigCatalog, DriverError, EventExtra, EventReport, IrqEvents, Scheduler,
    SchedulerConfig,
};

pub type TestScheduler = Scheduler<FakeChip, FakeSensors, FakeAlgorithms, RecordingSink>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChipCall {
    Select(ChipSelect),
    Reset(ResetKind),
    Delay(Duration),
    LowPower,
    Load(&'static str),
    ReadFifo(usize),
    Watermark(u16),
    SlotEnable(SlotMask),
    Divider(u8, u16),
    Order(u8, SlotOrder),
    Start(FunctionId),
    Stop(FunctionId),
    Wear(WearDetect, SwitchMode),
    Channel(ChannelTag, ChannelParams),
}

/// Chip double that records every call and serves queued interrupt status.
#[derive(Debug)]
pub struct FakeChip {
    pub calls: Vec<ChipCall>,
    /// Status returned by successive `irq_status` calls; empty once drained.
    pub irq: VecDeque<Result<IrqEvents, DriverError>>,
    pub fifo: Vec<u8>,
    /// Reports `more_pending` on every read.
    pub more_pending: bool,
    pub dividers: [u16; SLOT_COUNT],
    pub sampling: bool,
    /// Number of upcoming configuration loads that fail.
    pub failing_loads: usize,
    pub refuse_event_switch: bool,
    pub refuse_channel_params: bool,
}

impl Default for FakeChip {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            irq: VecDeque::new(),
            fifo: Vec::new(),
            more_pending: false,
            dividers: [39; SLOT_COUNT],
            sampling: false,
            failing_loads: 0,
            refuse_event_switch: false,
            refuse_channel_params: false,
        }
    }
}

impl FakeChip {
    pub fn push_words(&mut self, slot: u8, adc: u8, count: usize) {
        for value in 0..count {
            let value = u32::try_from(value).expect("word index fits");
            let word = RawWord::compose(ChannelTag::new(slot, adc), 1, value);
            self.fifo.extend_from_slice(&word.to_be_bytes());
        }
    }

    pub fn count(&self, call: &ChipCall) -> usize {
        self.calls.iter().filter(|c| *c == call).count()
    }

    pub fn loads(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, ChipCall::Load(_)))
            .count()
    }

    pub fn resets(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, ChipCall::Reset(_)))
            .count()
    }

    pub fn channel_writes(&self) -> Vec<(ChannelTag, ChannelParams)> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                ChipCall::Channel(tag, params) => Some((*tag, *params)),
                _ => None,
            })
            .collect()
    }

    pub fn fifo_reads(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, ChipCall::ReadFifo(_)))
            .count()
    }
}

impl ChipControl for FakeChip {
    fn select(&mut self, chip: ChipSelect) {
        self.calls.push(ChipCall::Select(chip));
    }

    fn reset(&mut self, kind: ResetKind) -> Result<(), DriverError> {
        self.calls.push(ChipCall::Reset(kind));
        self.fifo.clear();
        Ok(())
    }

    fn delay(&mut self, duration: Duration) {
        self.calls.push(ChipCall::Delay(duration));
    }

    fn enter_low_power(&mut self) -> Result<(), DriverError> {
        self.calls.push(ChipCall::LowPower);
        Ok(())
    }

    fn exit_low_power(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn load_configuration(&mut self, config: &ConfigSet) -> Result<(), DriverError> {
        self.calls.push(ChipCall::Load(config.name));
        if self.failing_loads > 0 {
            self.failing_loads -= 1;
            return Err(DriverError::Resource);
        }
        Ok(())
    }

    fn irq_status(&mut self) -> Result<IrqEvents, DriverError> {
        self.irq.pop_front().unwrap_or(Ok(IrqEvents::empty()))
    }

    fn fifo_level(&mut self) -> Result<u16, DriverError> {
        Ok(u16::try_from(self.fifo.len() / 4).expect("fifo level fits"))
    }

    fn read_fifo(&mut self, buffer: &mut [u8]) -> Result<FifoRead, DriverError> {
        let bytes = buffer.len().min(self.fifo.len());
        buffer[..bytes].copy_from_slice(&self.fifo[..bytes]);
        self.fifo.drain(..bytes);
        self.calls.push(ChipCall::ReadFifo(bytes));
        Ok(FifoRead {
            bytes,
            more_pending: self.more_pending,
        })
    }

    fn write_fifo_watermark(&mut self, words: u16) -> Result<(), DriverError> {
        self.calls.push(ChipCall::Watermark(words));
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
        self.calls.push(ChipCall::SlotEnable(slots));
        Ok(())
    }

    fn slot_divider(&mut self, slot: u8) -> Result<u16, DriverError> {
        Ok(self.dividers[usize::from(slot)])
    }

    fn write_slot_divider(&mut self, slot: u8, divider: u16) -> Result<(), DriverError> {
        self.calls.push(ChipCall::Divider(slot, divider));
        self.dividers[usize::from(slot)] = divider;
        Ok(())
    }

    fn write_slot_order(&mut self, position: u8, entry: SlotOrder) -> Result<(), DriverError> {
        self.calls.push(ChipCall::Order(position, entry));
        Ok(())
    }

    fn write_slot_time(&mut self, _: u8, _: u16) -> Result<(), DriverError> {
        Ok(())
    }

    fn function_start(&mut self, id: FunctionId) -> Result<(), DriverError> {
        self.calls.push(ChipCall::Start(id));
        Ok(())
    }

    fn function_stop(&mut self, id: FunctionId) -> Result<(), DriverError> {
        self.calls.push(ChipCall::Stop(id));
        Ok(())
    }

    fn wear_detect_switch(
        &mut self,
        target: WearDetect,
        mode: SwitchMode,
    ) -> Result<(), DriverError> {
        self.calls.push(ChipCall::Wear(target, mode));
        if self.refuse_event_switch && mode == SwitchMode::EventDriven {
            Err(DriverError::Generic)
        } else {
            Ok(())
        }
    }

    fn write_channel_params(
        &mut self,
        channel: ChannelTag,
        params: ChannelParams,
    ) -> Result<(), DriverError> {
        self.calls.push(ChipCall::Channel(channel, params));
        if self.refuse_channel_params {
            Err(DriverError::Communication)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeSensors {
    pub started: Vec<AuxSensorKind>,
    pub stopped: Vec<AuxSensorKind>,
    /// Accelerometer samples served by the next read.
    pub accel: Vec<AccelSample>,
    /// Overrides the count returned by `read_accel`.
    pub accel_count_override: Option<usize>,
}

impl AuxSensors for FakeSensors {
    fn start_caching(&mut self, kind: AuxSensorKind) {
        self.started.push(kind);
    }

    fn stop_caching(&mut self, kind: AuxSensorKind) {
        self.stopped.push(kind);
    }

    fn read_accel(&mut self, out: &mut [AccelSample]) -> usize {
        let count = self.accel.len().min(out.len());
        out[..count].copy_from_slice(&self.accel[..count]);
        self.accel.drain(..count);
        self.accel_count_override.unwrap_or(count)
    }
}

#[derive(Debug, Default)]
pub struct FakeAlgorithms {
    pub started: Vec<FunctionId>,
    pub stopped: Vec<FunctionId>,
    pub frames: Vec<(FunctionId, u32, usize)>,
    pub fail_decode: bool,
    pub agc_calls: usize,
    pub gain_resets: usize,
    pub lead_outcomes: VecDeque<LeadOutcome>,
    pub hard_adt_lead: Option<bool>,
    pub movement: bool,
    pub motion_resets: usize,
    pub motion_starts: usize,
    pub motion_stops: usize,
    pub timer: bool,
    pub fed: usize,
}

impl FrameDecoder for FakeAlgorithms {
    fn start(&mut self, id: FunctionId) -> Result<(), AlgorithmError> {
        self.started.push(id);
        Ok(())
    }

    fn stop(&mut self, id: FunctionId) -> Result<(), AlgorithmError> {
        self.stopped.push(id);
        Ok(())
    }

    fn decode(&mut self, frame: &Frame<'_>) -> Result<Option<AlgorithmResult>, AlgorithmError> {
        self.frames
            .push((frame.function, frame.index, frame.sensors.accel.len()));
        if self.fail_decode {
            return Err(AlgorithmError::Generic);
        }
        Ok(Some(AlgorithmResult {
            values: [i32::try_from(frame.index).unwrap_or(i32::MAX), 0, 0, 0],
            confidence: 100,
            frame_index: frame.index,
        }))
    }
}

impl AgcEngine for FakeAlgorithms {
    fn process(&mut self, _: &[u8], _: IrqEvents) -> Result<(), AlgorithmError> {
        self.agc_calls += 1;
        Ok(())
    }

    fn reset_gain(&mut self) {
        self.gain_resets += 1;
    }
}

impl LeadDetector for FakeAlgorithms {
    fn handle(&mut self, _: &mut IrqEvents, _: &[u8]) -> Result<LeadOutcome, AlgorithmError> {
        Ok(self.lead_outcomes.pop_front().unwrap_or_default())
    }

    fn set_hard_adt_lead_detect(&mut self, enabled: bool) {
        self.hard_adt_lead = Some(enabled);
    }
}

impl MotionConfirm for FakeAlgorithms {
    fn start_adt_with_motion(&mut self) {
        self.motion_starts += 1;
    }

    fn stop_adt_with_motion(&mut self) {
        self.motion_stops += 1;
    }

    fn movement_confirmed(&mut self) -> bool {
        self.movement
    }

    fn reset_motion(&mut self) {
        self.motion_resets += 1;
    }

    fn feed(&mut self, _: &[AccelSample], _: &[CapSample]) {
        self.fed += 1;
    }

    fn start_timer(&mut self) {
        self.timer = true;
    }

    fn stop_timer(&mut self) {
        self.timer = false;
    }
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    pub reports: Vec<EventReport>,
    pub leads: Vec<(LeadChange, EventExtra)>,
    pub wear: Vec<EventReport>,
}

impl RecordingSink {
    pub fn reported(&self, events: IrqEvents) -> bool {
        self.reports.iter().any(|r| r.events.contains(events))
    }
}

impl EventSink for RecordingSink {
    fn report(&mut self, report: &EventReport) {
        self.reports.push(*report);
    }

    fn lead_changed(&mut self, change: LeadChange, extra: EventExtra) {
        self.leads.push((change, extra));
    }

    fn wear_changed(&mut self, report: &EventReport) {
        self.wear.push(*report);
    }
}

pub fn scheduler_with(config: SchedulerConfig) -> TestScheduler {
    let mut scheduler = Scheduler::new(
        FakeChip::default(),
        FakeSensors::default(),
        FakeAlgorithms::default(),
        RecordingSink::default(),
        config,
        ConfigCatalog::default(),
    );
    scheduler.init().expect("scheduler initializes");
    scheduler
}

pub fn scheduler() -> TestScheduler {
    scheduler_with(SchedulerConfig::default())
}

/// Queues `events` and marks the interrupt as seen.
pub fn raise(scheduler: &mut TestScheduler, events: IrqEvents) {
    scheduler.chip_mut().irq.push_back(Ok(events));
    scheduler.note_interrupt();
}

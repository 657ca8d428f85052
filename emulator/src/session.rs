use std::time::{Duration, Instant};

use sampler_core::driver::AuxSensorKind;
use sampler_core::engineering::{IntegrationTime, SampleParams, TiaGain};
use sampler_core::functions::{ChannelTag, FunctionId, FunctionMask};
use sampler_core::scheduler::{CycleSummary, RecoveryReport};
use sampler_core::slots::slot_rate_from_divider;
use sampler_core::{
    ConfigCatalog, IrqEvents, IrqLatch, Scheduler, SchedulerConfig, SchedulerError, SoftEvents,
};

use crate::sim::{SimAlgorithms, SimChip, SimSensors, TranscriptSink};

/// Interrupts serviced per command before the session gives up.
const MAX_SERVICE_ROUNDS: usize = 4;

const BENCH_INTEGRATION_TIME: IntegrationTime = IntegrationTime::Us39;
const BENCH_TIA_GAIN: TiaGain = TiaGain::K100;

pub const HELP_TOPICS: &[(&str, &str)] = &[
    ("start", "start <fn[,fn..]>        - start sampling functions"),
    ("stop", "stop <fn[,fn..]>         - stop sampling functions"),
    ("rate", "rate <fn> <hz>           - override a function sample rate"),
    ("config", "config <index>           - switch configuration set"),
    ("eng", "eng <fn[,fn..]> <index> <hz> | eng stop - bench session with fixed gains"),
    ("fifo", "fifo <frames>            - feed frames for the active functions"),
    ("accel", "accel <samples>          - queue accelerometer samples"),
    ("irq", "irq <event[,event..]>    - raise chip interrupt bits"),
    ("soft", "soft <wear-on|wear-off|read> - latch a soft event and run the loop"),
    ("move", "move [on|off]            - movement seen by the motion confirmer"),
    ("hard-adt", "hard-adt                 - hand wear detection to hardware ADT"),
    ("motion-adt", "motion-adt               - hand wear detection to the confirm timer"),
    ("redetect", "redetect                 - re-arm wear-on detection"),
    ("tick", "tick                     - run the confirm timer once"),
    ("reset", "reset                    - request a chip reset"),
    ("glitch", "glitch                   - simulate an unexpected chip reset"),
    ("fail-loads", "fail-loads <count>       - fail the next configuration loads"),
    ("init", "init                     - reinitialize the scheduler"),
    ("status", "status                   - display scheduler and chip state"),
    ("help", "help [topic]             - show help for a command"),
];

type SimScheduler = Scheduler<SimChip, SimSensors, SimAlgorithms, TranscriptSink>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Scenario {
    Sampling,
    Reset,
    Wear,
}

impl Scenario {
    pub fn header(self) -> &'static str {
        match self {
            Scenario::Sampling => "Sampler emulator: multi-function sampling transcript",
            Scenario::Reset => "Sampler emulator: chip reset recovery transcript",
            Scenario::Wear => "Sampler emulator: wear detection transcript",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self, String> {
        if tag.eq_ignore_ascii_case("sampling") {
            Ok(Self::Sampling)
        } else if tag.eq_ignore_ascii_case("reset") {
            Ok(Self::Reset)
        } else if tag.eq_ignore_ascii_case("wear") {
            Ok(Self::Wear)
        } else {
            Err(format!("Unknown scenario `{tag}`"))
        }
    }

    pub fn script(self) -> &'static [&'static str] {
        match self {
            Scenario::Sampling => &[
                "status",
                "start hr,spo2",
                "accel 60",
                "fifo 60",
                "rate hrv 50",
                "start hrv",
                "fifo 60",
                "start ecg",
                "fifo 120",
                "stop ecg",
                "rate hr 30",
                "status",
            ],
            Scenario::Reset => &[
                "start adt,hr",
                "irq wear-on",
                "fifo 60",
                "glitch",
                "status",
                "fail-loads 6",
                "glitch",
                "status",
                "start hr",
                "reset",
                "status",
            ],
            Scenario::Wear => &[
                "start adt",
                "accel 25",
                "tick",
                "hard-adt",
                "irq wear-on",
                "move on",
                "irq wear-on",
                "redetect",
                "motion-adt",
                "soft wear-on",
                "stop adt",
                "status",
            ],
        }
    }

    fn config(self) -> SchedulerConfig {
        match self {
            Scenario::Sampling | Scenario::Reset => SchedulerConfig::default(),
            Scenario::Wear => SchedulerConfig {
                soft_adt_confirm: true,
                ..SchedulerConfig::default()
            },
        }
    }
}

pub struct Session {
    scheduler: SimScheduler,
    latch: IrqLatch,
    started_at: Instant,
}

impl Session {
    pub fn new(scenario: Scenario) -> Self {
        let scheduler = Scheduler::new(
            SimChip::new(),
            SimSensors::default(),
            SimAlgorithms::default(),
            TranscriptSink::default(),
            scenario.config(),
            ConfigCatalog::default(),
        );
        Self {
            scheduler,
            latch: IrqLatch::new(),
            started_at: Instant::now(),
        }
    }

    pub fn boot(&mut self) -> Vec<String> {
        let result = self.scheduler.init().map(|()| "OK init".to_string());
        let mut lines = vec![ack(result)];
        lines.extend(self.scheduler.sink_mut().drain());
        self.stamp(TranscriptRole::Emulator, lines)
    }

    pub fn handle_command(&mut self, line: &str) -> Vec<String> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }

        let mut lines = self.stamp(TranscriptRole::Host, vec![trimmed.to_string()]);
        let (verb, args) = trimmed
            .split_once(char::is_whitespace)
            .map_or((trimmed, ""), |(verb, args)| (verb, args.trim()));

        let mut output = match self.dispatch(verb, args) {
            Ok(output) => output,
            Err(message) => vec![format!("ERR {message}")],
        };
        output.extend(self.scheduler.sink_mut().drain());
        output.extend(self.pump());

        lines.extend(self.stamp(TranscriptRole::Emulator, output));
        lines
    }

    fn dispatch(&mut self, verb: &str, args: &str) -> Result<Vec<String>, String> {
        match verb.to_ascii_lowercase().as_str() {
            "help" => Ok(help(args)),
            "status" => Ok(self.status()),
            "start" => {
                let mask = parse_functions(args)?;
                let started = self.scheduler.start_sampling(mask);
                Ok(vec![ack(started.map(|m| format!("OK started {}", labels(m))))])
            }
            "stop" => {
                let mask = parse_functions(args)?;
                let stopped = self.scheduler.stop_sampling(mask);
                Ok(vec![ack(stopped.map(|m| format!("OK stopped {}", labels(m))))])
            }
            "rate" => self.handle_rate(args),
            "eng" => self.handle_engineering(args),
            "config" => {
                let index = parse_number::<usize>(args)?;
                let result = self.scheduler.switch_configuration(index);
                Ok(vec![ack(result.map(|()| format!("OK configuration {index}")))])
            }
            "fifo" => self.handle_fifo(args),
            "accel" => {
                let count = parse_number::<usize>(args)?;
                self.scheduler.sensors_mut().queue_motion(count);
                Ok(vec![format!(
                    "OK accel queued={}",
                    self.scheduler.sensors().queued()
                )])
            }
            "irq" => {
                let events = parse_events(args)?;
                self.scheduler.chip_mut().raise(events);
                Ok(vec![format!("OK irq {events}")])
            }
            "soft" => self.handle_soft(args),
            "move" | "hard-adt" | "motion-adt" | "redetect" | "tick" => {
                Ok(vec![self.handle_wear(verb, args)])
            }
            "reset" | "glitch" | "fail-loads" | "init" => self.handle_chip(verb, args),
            other => Err(format!("syntax unknown command `{other}`")),
        }
    }

    fn handle_wear(&mut self, verb: &str, args: &str) -> String {
        let result = match verb.to_ascii_lowercase().as_str() {
            "move" => {
                let movement = !args.eq_ignore_ascii_case("off");
                self.scheduler.algorithms_mut().movement = movement;
                return format!("OK movement={movement}");
            }
            "hard-adt" => self
                .scheduler
                .start_hard_adt()
                .map(|()| "OK hard adt".to_string()),
            "motion-adt" => self
                .scheduler
                .stop_hard_adt_and_start_motion_detect()
                .map(|()| "OK motion adt".to_string()),
            "redetect" => self
                .scheduler
                .redetect_wear_on()
                .map(|()| "OK redetect".to_string()),
            _ => self.scheduler.motion_tick().map(|()| {
                format!(
                    "OK tick motion-samples={}",
                    self.scheduler.algorithms().motion_samples()
                )
            }),
        };
        ack(result)
    }

    fn handle_chip(&mut self, verb: &str, args: &str) -> Result<Vec<String>, String> {
        let line = match verb.to_ascii_lowercase().as_str() {
            "reset" => {
                let result = self.scheduler.request_chip_reset();
                if result.is_ok() {
                    self.scheduler.chip_mut().raise(IrqEvents::CHIP_RESET);
                }
                ack(result.map(|()| "OK reset requested".to_string()))
            }
            "glitch" => {
                self.scheduler.chip_mut().glitch();
                "OK chip reset behind the scheduler".to_string()
            }
            "fail-loads" => {
                let count = parse_number::<u32>(args)?;
                self.scheduler.chip_mut().failing_loads = count;
                format!("OK next {count} loads fail")
            }
            _ => ack(self.scheduler.init().map(|()| "OK init".to_string())),
        };
        Ok(vec![line])
    }

    fn handle_rate(&mut self, args: &str) -> Result<Vec<String>, String> {
        let (function, rate) = args
            .split_once(char::is_whitespace)
            .ok_or_else(|| "syntax rate <fn> <hz>".to_string())?;
        let mask = parse_functions(function)?;
        let rate = parse_number::<u16>(rate.trim())?;
        let result = self.scheduler.set_function_sample_rate(mask, rate);
        Ok(vec![ack(
            result.map(|()| format!("OK rate {} {rate} Hz", labels(mask))),
        )])
    }

    fn handle_engineering(&mut self, args: &str) -> Result<Vec<String>, String> {
        if args.eq_ignore_ascii_case("stop") {
            let result = self.scheduler.stop_engineering_sampling();
            return Ok(vec![ack(result.map(|()| "OK engineering stopped".to_string()))]);
        }
        let mut words = args.split_whitespace();
        let (Some(functions), Some(index), Some(rate)) = (words.next(), words.next(), words.next())
        else {
            return Err("syntax eng <fn[,fn..]> <index> <hz>".to_string());
        };
        let mask = parse_functions(functions)?;
        let index = parse_number::<usize>(index)?;
        let rate = parse_number::<u16>(rate)?;
        let groups: Vec<SampleParams> = mask
            .functions()
            .map(|id| {
                SampleParams::new(id)
                    .with_sample_rate(rate)
                    .with_integration_time(BENCH_INTEGRATION_TIME)
                    .with_uniform_gain(BENCH_TIA_GAIN)
            })
            .collect();
        let result = self
            .scheduler
            .start_engineering_sampling(mask, index, &groups);
        Ok(vec![ack(result.map(|m| {
            format!(
                "OK engineering {} at {rate} Hz tuned-channels={}",
                labels(m),
                self.scheduler.chip().tuned_channels()
            )
        }))])
    }

    fn handle_fifo(&mut self, args: &str) -> Result<Vec<String>, String> {
        let frames = parse_number::<usize>(args)?;
        let active = self.scheduler.state().active();
        let mut tags: Vec<ChannelTag> = Vec::new();
        for descriptor in self.scheduler.registry().for_each_active(active) {
            for tag in descriptor.channels() {
                if !tags.contains(tag) {
                    tags.push(*tag);
                }
            }
        }
        tags.sort_by_key(|tag| (tag.slot(), tag.adc()));

        let words = self.scheduler.chip_mut().push_frames(&tags, frames);
        Ok(vec![format!(
            "OK fifo words={words} level={}",
            self.scheduler.chip().level()
        )])
    }

    fn handle_soft(&mut self, args: &str) -> Result<Vec<String>, String> {
        let event = match args.to_ascii_lowercase().as_str() {
            "wear-on" => SoftEvents::WEAR_ON,
            "wear-off" => SoftEvents::WEAR_OFF,
            "read" => SoftEvents::FORCE_READ,
            other => return Err(format!("syntax unknown soft event `{other}`")),
        };
        self.scheduler.raise_soft_event(event);
        Ok(vec![format!("OK soft {event}")])
    }

    /// Forwards the simulated interrupt line to the latch and services it
    /// until neither an interrupt nor a soft event is left.
    fn pump(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        for _ in 0..MAX_SERVICE_ROUNDS {
            if self.scheduler.chip_mut().take_line() {
                self.latch.notify();
            }
            if !self.latch.is_pending() && self.scheduler.state().soft_events().is_empty() {
                break;
            }
            match self.scheduler.service_interrupt(&self.latch) {
                Ok(summary) => lines.push(describe_cycle(&summary)),
                Err(err) => {
                    lines.push(format!("ERR loop {err}"));
                    lines.extend(self.scheduler.sink_mut().drain());
                    break;
                }
            }
            lines.extend(self.scheduler.sink_mut().drain());
        }
        lines
    }

    fn status(&self) -> Vec<String> {
        let state = self.scheduler.state();
        let chip = self.scheduler.chip();
        let config = state
            .config_index()
            .and_then(|index| self.scheduler.catalog().get(index))
            .map_or("none", |set| set.name);

        let mut lines = vec![
            format!(
                "scheduler {:?} config={config} active={} watermark={} soft={} engineering={}",
                state.lifecycle(),
                labels(state.active()),
                state.fifo_watermark(),
                state.soft_events(),
                state.engineering_mode(),
            ),
            format!(
                "wear detect={:?} hard-adt-owned={} timer={}",
                state.wear().detect(),
                state.wear().hard_adt_owned(),
                state.wear().timer_running(),
            ),
            format!(
                "chip loaded={} level={} watermark={} slots={:#010b} low-power={} wear={:?} running={} resets={}",
                chip.loaded().unwrap_or("none"),
                chip.level(),
                chip.watermark(),
                chip.slots().bits(),
                chip.low_power(),
                chip.wear(),
                chip.running()
                    .iter()
                    .copied()
                    .map(FunctionId::label)
                    .collect::<Vec<_>>()
                    .join(","),
                chip.resets,
            ),
            format!("slots {}", describe_slot_rates(chip)),
        ];

        let algorithms = self.scheduler.algorithms();
        let frames: Vec<String> = algorithms
            .frames()
            .iter()
            .map(|(id, count)| format!("{id}={count}"))
            .collect();
        lines.push(format!(
            "algorithms frames=[{}] accel-points={} agc-passes={}",
            frames.join(" "),
            algorithms.accel_points(),
            algorithms.agc_passes(),
        ));
        for descriptor in self.scheduler.registry().for_each_active(state.active()) {
            if let Some(result) = descriptor.variant.result() {
                lines.push(format!(
                    "  {} rate={} Hz down-sample={} value={} frame={}",
                    descriptor.id,
                    descriptor.sample_rate_hz,
                    descriptor.down_sample.factor(),
                    result.values[0],
                    result.frame_index,
                ));
            }
        }

        let caching: Vec<&str> = self
            .scheduler
            .sensors()
            .caching()
            .iter()
            .map(|kind| aux_label(*kind))
            .collect();
        lines.push(format!(
            "aux caching=[{}] queued={} motion-samples={} confirm-timer={}",
            caching.join(","),
            self.scheduler.sensors().queued(),
            algorithms.motion_samples(),
            algorithms.timer(),
        ));
        lines.push(describe_recovery(state.last_recovery()));
        lines
    }

    fn stamp(&self, role: TranscriptRole, lines: Vec<String>) -> Vec<String> {
        let elapsed = self.started_at.elapsed();
        lines
            .into_iter()
            .map(|line| format_line(elapsed, role, &line))
            .collect()
    }
}

#[derive(Clone, Copy)]
enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}

fn format_line(elapsed: Duration, role: TranscriptRole, line: &str) -> String {
    format!("[+{:>6} ms] {} {line}", elapsed.as_millis(), role.prefix())
}

fn ack(result: Result<String, SchedulerError>) -> String {
    match result {
        Ok(line) => line,
        Err(err) => format!("ERR {err}"),
    }
}

fn help(topic: &str) -> Vec<String> {
    if !topic.is_empty() {
        if let Some((_, detail)) = HELP_TOPICS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(topic))
        {
            return vec![(*detail).to_string()];
        }
        let topics: Vec<&str> = HELP_TOPICS.iter().map(|(name, _)| *name).collect();
        return vec![
            format!("No help available for `{topic}`."),
            format!("Available topics: {}", topics.join(", ")),
        ];
    }
    let mut lines = vec!["Available commands:".to_string()];
    for (_, detail) in HELP_TOPICS {
        lines.push(format!("  {detail}"));
    }
    lines.push("Type `help <topic>` for a specific command.".to_string());
    lines
}

fn parse_functions(text: &str) -> Result<FunctionMask, String> {
    if text.is_empty() {
        return Err("syntax expected function list".to_string());
    }
    text.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .try_fold(FunctionMask::EMPTY, |mask, name| {
            let normalized = name.replace('-', "_");
            FunctionId::ALL
                .iter()
                .find(|id| id.label().eq_ignore_ascii_case(&normalized))
                .map(|id| mask.with(*id))
                .ok_or_else(|| format!("syntax unknown function `{name}`"))
        })
}

fn parse_events(text: &str) -> Result<IrqEvents, String> {
    text.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .try_fold(IrqEvents::empty(), |events, name| {
            let bit = match name.to_ascii_lowercase().as_str() {
                "watermark" => IrqEvents::FIFO_WATERMARK,
                "full" => IrqEvents::FIFO_FULL,
                "wear-on" => IrqEvents::WEAR_ON,
                "wear-off" => IrqEvents::WEAR_OFF,
                "lead-on" => IrqEvents::LEAD_ON,
                "lead-off" => IrqEvents::LEAD_OFF,
                "tuning-done" => IrqEvents::TUNING_DONE,
                "tuning-fail" => IrqEvents::TUNING_FAIL,
                "chip-reset" => IrqEvents::CHIP_RESET,
                other => return Err(format!("syntax unknown event `{other}`")),
            };
            Ok(events | bit)
        })
}

fn parse_number<T: std::str::FromStr>(text: &str) -> Result<T, String> {
    text.trim()
        .parse()
        .map_err(|_| format!("syntax expected a number, got `{text}`"))
}

fn labels(mask: FunctionMask) -> String {
    if mask.is_empty() {
        return "-".to_string();
    }
    mask.functions()
        .map(FunctionId::label)
        .collect::<Vec<_>>()
        .join(",")
}

fn aux_label(kind: AuxSensorKind) -> &'static str {
    match kind {
        AuxSensorKind::Accel => "accel",
        AuxSensorKind::Cap => "cap",
        AuxSensorKind::Temp => "temp",
    }
}

fn describe_cycle(summary: &CycleSummary) -> String {
    format!(
        "cycle {:?} passes={} events={} frames={} emitted={} dropped={} decode-errors={}",
        summary.outcome,
        summary.passes,
        summary.events,
        summary.stats.frames_complete,
        summary.stats.frames_emitted,
        summary.stats.frames_dropped,
        summary.stats.decode_errors,
    )
}

fn describe_slot_rates(chip: &SimChip) -> String {
    let rates: Vec<String> = chip
        .slots()
        .indices()
        .map(|slot| {
            format!(
                "{slot}@{}Hz",
                slot_rate_from_divider(chip.divider(slot))
            )
        })
        .collect();
    if rates.is_empty() {
        "none enabled".to_string()
    } else {
        rates.join(" ")
    }
}

fn describe_recovery(report: Option<RecoveryReport>) -> String {
    match report {
        Some(report) => format!(
            "recovery attempts={} reinitialized={} restored={}",
            report.attempts,
            report.reinitialized,
            labels(report.restored),
        ),
        None => "recovery none".to_string(),
    }
}

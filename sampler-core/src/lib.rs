#![no_std]

//! Portable acquisition scheduler for the multi-function optical/bio-potential
//! front end. Hardware, algorithms, and auxiliary sensors are injected as
//! traits so the same logic runs on MCU firmware and under host tests.

#[macro_use]
mod log;

pub mod aligner;
pub mod config;
pub mod driver;
pub mod engineering;
pub mod error;
pub mod events;
pub mod functions;
pub mod irq;
pub mod scheduler;
pub mod slots;
pub mod wear;

pub use config::{ChipTopology, ConfigCatalog, ConfigSet, InterruptMode, SchedulerConfig};
pub use engineering::SampleParams;
pub use error::{AlgorithmError, DriverError, ParameterError, SchedulerError};
pub use events::{EventExtra, EventReport, IrqEvents, SoftEvents};
pub use functions::{FunctionId, FunctionMask};
pub use irq::IrqLatch;
pub use scheduler::{CycleOutcome, CycleSummary, Scheduler, SchedulerState};

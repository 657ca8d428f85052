//! Error taxonomy shared by the scheduler and its collaborators.

use core::fmt;

use crate::driver::AuxSensorKind;
use crate::functions::FunctionMask;

/// Failure reported by the chip collaborator.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverError {
    /// Transport transaction failed after the transport's own retries.
    Communication,
    /// The chip rejected a configuration or resource request.
    Resource,
    /// Any other driver-side failure.
    Generic,
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Failure reported by an opaque algorithm call. Logged, never escalated.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AlgorithmError {
    Generic,
}

impl fmt::Display for AlgorithmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Synchronously rejected arguments. No state is mutated when returned.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParameterError {
    /// Rate is zero, above the chip limit, or not a multiple of the base unit.
    SampleRate(u16),
    /// Mask carries bits that do not name a known function.
    UnknownFunction(FunctionMask),
    /// Configuration index outside the catalog.
    ConfigIndex(usize),
    /// LED driver current above the chip limit, in mA.
    LedCurrent(u8),
    /// More engineering parameter groups than a session holds.
    ParamGroups(usize),
}

impl fmt::Display for ParameterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SampleRate(hz) => write!(f, "invalid sample rate {hz} Hz"),
            Self::UnknownFunction(mask) => write!(f, "unknown function bits {mask}"),
            Self::ConfigIndex(index) => write!(f, "configuration index {index} out of range"),
            Self::LedCurrent(ma) => write!(f, "LED current {ma} mA out of range"),
            Self::ParamGroups(count) => {
                write!(f, "{count} parameter groups exceed the session limit")
            }
        }
    }
}

/// Errors surfaced to the command layer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SchedulerError {
    /// No configuration set provides the requested functions.
    Resource { missing: FunctionMask },
    /// Transport failure that could not be absorbed locally.
    Communication,
    /// Driver failure that is neither a transport nor a resource problem.
    Generic,
    /// Invalid argument.
    Parameter(ParameterError),
    /// The interrupt loop hit its repeat cap; the scheduler is now uninitialized.
    LoopExhausted { passes: u8 },
    /// An auxiliary sensor reported more samples than its buffer holds.
    AuxOverflow { sensor: AuxSensorKind },
    /// The scheduler must be reinitialized before it accepts calls.
    Uninitialized,
}

impl SchedulerError {
    /// Returns `true` when the caller has to run `init` again.
    #[must_use]
    pub const fn requires_reinit(self) -> bool {
        matches!(
            self,
            Self::LoopExhausted { .. } | Self::AuxOverflow { .. } | Self::Uninitialized
        )
    }
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource { missing } => {
                write!(f, "functions {missing} not available in any configuration")
            }
            Self::Communication => f.write_str("communication failure"),
            Self::Generic => f.write_str("driver failure"),
            Self::Parameter(err) => write!(f, "parameter error: {err}"),
            Self::LoopExhausted { passes } => {
                write!(f, "interrupt loop exhausted after {passes} passes")
            }
            Self::AuxOverflow { sensor } => write!(f, "{sensor:?} buffer overflow"),
            Self::Uninitialized => f.write_str("scheduler uninitialized"),
        }
    }
}

impl From<ParameterError> for SchedulerError {
    fn from(value: ParameterError) -> Self {
        Self::Parameter(value)
    }
}

impl From<DriverError> for SchedulerError {
    fn from(value: DriverError) -> Self {
        match value {
            DriverError::Communication => Self::Communication,
            DriverError::Resource => Self::Resource {
                missing: FunctionMask::EMPTY,
            },
            DriverError::Generic => Self::Generic,
        }
    }
}

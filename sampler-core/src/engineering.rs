//! Per-function sample parameters applied during engineering sessions.
//!
//! An engineering session starts functions with operator-chosen sample rate,
//! integration time, TIA gain and LED current instead of the values in the
//! loaded configuration set. AGC stays off for the whole session so the
//! chosen gains are not overwritten.

use heapless::Vec;

use crate::error::ParameterError;
use crate::functions::{FunctionId, MAX_CHANNELS};
use crate::scheduler::validate_sample_rate;

/// Parameter groups one session can carry.
pub const MAX_PARAM_GROUPS: usize = 8;

/// Highest LED driver current in mA.
pub const LED_CURRENT_MAX_MA: u8 = 200;

/// Integrator time of a slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IntegrationTime {
    Us10,
    Us20,
    Us30,
    Us39,
    Us79,
    Us158,
    Us316,
}

impl IntegrationTime {
    /// Register encoding.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn micros(self) -> u16 {
        match self {
            Self::Us10 => 10,
            Self::Us20 => 20,
            Self::Us30 => 30,
            Self::Us39 => 39,
            Self::Us79 => 79,
            Self::Us158 => 158,
            Self::Us316 => 316,
        }
    }
}

/// Transimpedance amplifier gain of one ADC channel.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TiaGain {
    #[default]
    K10,
    K25,
    K50,
    K75,
    K100,
    K250,
    K500,
    K750,
    K1000,
    K1250,
    K1500,
    K1750,
    K2000,
}

impl TiaGain {
    /// Register encoding.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn kilohms(self) -> u16 {
        match self {
            Self::K10 => 10,
            Self::K25 => 25,
            Self::K50 => 50,
            Self::K75 => 75,
            Self::K100 => 100,
            Self::K250 => 250,
            Self::K500 => 500,
            Self::K750 => 750,
            Self::K1000 => 1000,
            Self::K1250 => 1250,
            Self::K1500 => 1500,
            Self::K1750 => 1750,
            Self::K2000 => 2000,
        }
    }
}

/// Currents of both LED drivers for one channel, in mA.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LedCurrent {
    pub drv0_ma: u8,
    pub drv1_ma: u8,
}

impl LedCurrent {
    #[must_use]
    pub const fn new(drv0_ma: u8, drv1_ma: u8) -> Self {
        Self { drv0_ma, drv1_ma }
    }

    const fn in_range(self) -> bool {
        self.drv0_ma <= LED_CURRENT_MAX_MA && self.drv1_ma <= LED_CURRENT_MAX_MA
    }
}

/// Settings written for a single channel. `None` leaves the loaded value.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelParams {
    pub integration_time: Option<IntegrationTime>,
    pub tia_gain: Option<TiaGain>,
    pub led_current: Option<LedCurrent>,
}

impl ChannelParams {
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.integration_time.is_none() && self.tia_gain.is_none() && self.led_current.is_none()
    }
}

/// Sample parameters for one function. Gains and currents are indexed by the
/// function's channel order.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SampleParams {
    pub function: FunctionId,
    pub sample_rate_hz: Option<u16>,
    pub integration_time: Option<IntegrationTime>,
    pub tia_gain: Option<[TiaGain; MAX_CHANNELS]>,
    pub led_current: Option<[LedCurrent; MAX_CHANNELS]>,
}

impl SampleParams {
    /// A group that changes nothing.
    #[must_use]
    pub const fn new(function: FunctionId) -> Self {
        Self {
            function,
            sample_rate_hz: None,
            integration_time: None,
            tia_gain: None,
            led_current: None,
        }
    }

    #[must_use]
    pub const fn with_sample_rate(mut self, rate_hz: u16) -> Self {
        self.sample_rate_hz = Some(rate_hz);
        self
    }

    #[must_use]
    pub const fn with_integration_time(mut self, time: IntegrationTime) -> Self {
        self.integration_time = Some(time);
        self
    }

    /// Uses `gain` on every channel.
    #[must_use]
    pub const fn with_uniform_gain(mut self, gain: TiaGain) -> Self {
        self.tia_gain = Some([gain; MAX_CHANNELS]);
        self
    }

    #[must_use]
    pub const fn with_tia_gains(mut self, gains: [TiaGain; MAX_CHANNELS]) -> Self {
        self.tia_gain = Some(gains);
        self
    }

    /// Uses `current` on every channel.
    #[must_use]
    pub const fn with_uniform_current(mut self, current: LedCurrent) -> Self {
        self.led_current = Some([current; MAX_CHANNELS]);
        self
    }

    #[must_use]
    pub const fn with_led_currents(mut self, currents: [LedCurrent; MAX_CHANNELS]) -> Self {
        self.led_current = Some(currents);
        self
    }

    /// Register settings for the channel at `index` of the function.
    #[must_use]
    pub fn channel(&self, index: usize) -> ChannelParams {
        ChannelParams {
            integration_time: self.integration_time,
            tia_gain: self.tia_gain.and_then(|gains| gains.get(index).copied()),
            led_current: self
                .led_current
                .and_then(|currents| currents.get(index).copied()),
        }
    }

    pub fn validate(&self) -> Result<(), ParameterError> {
        if let Some(rate_hz) = self.sample_rate_hz {
            validate_sample_rate(rate_hz)?;
        }
        let currents = self.led_current.iter().flatten();
        if let Some(current) = currents.copied().find(|current| !current.in_range()) {
            return Err(ParameterError::LedCurrent(current.drv0_ma.max(current.drv1_ma)));
        }
        Ok(())
    }
}

/// Rates a function ran at before a session overrode them.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SavedRate {
    pub function: FunctionId,
    pub sample_rate_hz: u16,
    pub user_sample_rate_hz: Option<u16>,
}

/// Parameter groups of a running session and the rates they displaced.
#[derive(Clone, Debug, Default)]
pub struct EngineeringSession {
    groups: Vec<SampleParams, MAX_PARAM_GROUPS>,
    saved_rates: Vec<SavedRate, MAX_PARAM_GROUPS>,
}

impl EngineeringSession {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            groups: Vec::new(),
            saved_rates: Vec::new(),
        }
    }

    /// Validates `groups` and replaces the stored ones. Nothing changes on error.
    pub fn begin(&mut self, groups: &[SampleParams]) -> Result<(), ParameterError> {
        if groups.len() > MAX_PARAM_GROUPS {
            return Err(ParameterError::ParamGroups(groups.len()));
        }
        for group in groups {
            group.validate()?;
        }
        self.groups.clear();
        self.groups
            .extend_from_slice(groups)
            .map_err(|_| ParameterError::ParamGroups(groups.len()))
    }

    #[must_use]
    pub fn groups(&self) -> &[SampleParams] {
        &self.groups
    }

    /// Keeps the first rate seen for each function.
    pub fn remember_rate(&mut self, saved: SavedRate) {
        if self.saved_rates.iter().any(|s| s.function == saved.function) {
            return;
        }
        let _ = self.saved_rates.push(saved);
    }

    /// Empties the session, handing back the displaced rates.
    pub fn end(&mut self) -> Vec<SavedRate, MAX_PARAM_GROUPS> {
        self.groups.clear();
        core::mem::take(&mut self.saved_rates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_params_follow_channel_index() {
        let mut gains = [TiaGain::K10; MAX_CHANNELS];
        gains[1] = TiaGain::K500;
        let params = SampleParams::new(FunctionId::Hr)
            .with_integration_time(IntegrationTime::Us79)
            .with_tia_gains(gains);

        let second = params.channel(1);

        assert_eq!(second.integration_time, Some(IntegrationTime::Us79));
        assert_eq!(second.tia_gain, Some(TiaGain::K500));
        assert_eq!(second.led_current, None);
        assert_eq!(params.channel(0).tia_gain, Some(TiaGain::K10));
    }

    #[test]
    fn channels_past_the_table_only_carry_shared_settings() {
        let params = SampleParams::new(FunctionId::Hr)
            .with_integration_time(IntegrationTime::Us20)
            .with_uniform_gain(TiaGain::K100);

        let outside = params.channel(MAX_CHANNELS);

        assert_eq!(outside.integration_time, Some(IntegrationTime::Us20));
        assert_eq!(outside.tia_gain, None);
    }

    #[test]
    fn empty_group_writes_nothing() {
        assert!(SampleParams::new(FunctionId::Spo2).channel(0).is_empty());
    }

    #[test]
    fn led_current_is_capped() {
        let params = SampleParams::new(FunctionId::Spo2)
            .with_uniform_current(LedCurrent::new(20, LED_CURRENT_MAX_MA + 1));

        assert_eq!(
            params.validate(),
            Err(ParameterError::LedCurrent(LED_CURRENT_MAX_MA + 1))
        );
    }

    #[test]
    fn sample_rate_follows_the_override_rules() {
        let params = SampleParams::new(FunctionId::Hr).with_sample_rate(30);

        assert_eq!(params.validate(), Err(ParameterError::SampleRate(30)));
        assert!(SampleParams::new(FunctionId::Hr)
            .with_sample_rate(100)
            .validate()
            .is_ok());
    }

    #[test]
    fn session_rejects_too_many_groups() {
        let mut session = EngineeringSession::new();
        let groups = [SampleParams::new(FunctionId::Hr); MAX_PARAM_GROUPS + 1];

        assert_eq!(
            session.begin(&groups),
            Err(ParameterError::ParamGroups(MAX_PARAM_GROUPS + 1))
        );
        assert!(session.groups().is_empty());
    }

    #[test]
    fn invalid_group_keeps_previous_session() {
        let mut session = EngineeringSession::new();
        session
            .begin(&[SampleParams::new(FunctionId::Hr).with_sample_rate(100)])
            .expect("valid group");

        let bad = [SampleParams::new(FunctionId::Spo2).with_sample_rate(7)];
        assert!(session.begin(&bad).is_err());

        assert_eq!(session.groups().len(), 1);
        assert_eq!(session.groups()[0].function, FunctionId::Hr);
    }

    #[test]
    fn first_saved_rate_wins() {
        let mut session = EngineeringSession::new();
        let first = SavedRate {
            function: FunctionId::Hr,
            sample_rate_hz: 25,
            user_sample_rate_hz: None,
        };
        session.remember_rate(first);
        session.remember_rate(SavedRate {
            sample_rate_hz: 100,
            user_sample_rate_hz: Some(100),
            ..first
        });

        let saved = session.end();

        assert_eq!(saved.as_slice(), &[first]);
        assert!(session.groups().is_empty());
        assert!(session.end().is_empty());
    }

    #[test]
    fn register_codes_are_ordinal() {
        assert_eq!(IntegrationTime::Us10.code(), 0);
        assert_eq!(IntegrationTime::Us316.code(), 6);
        assert_eq!(TiaGain::K2000.code(), 12);
        assert_eq!(TiaGain::K250.kilohms(), 250);
    }
}

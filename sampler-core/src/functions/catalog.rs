//! Default channel maps and rates for every function.

use super::{ChannelTag, FUNCTION_COUNT, FunctionId, VariantKind};

/// Static description of a function, used to build its [`super::Descriptor`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FunctionSpec {
    pub id: FunctionId,
    pub channels: &'static [ChannelTag],
    pub sample_rate_hz: u16,
    pub variant: VariantKind,
}

impl FunctionSpec {
    #[must_use]
    pub const fn new(
        id: FunctionId,
        channels: &'static [ChannelTag],
        sample_rate_hz: u16,
        variant: VariantKind,
    ) -> Self {
        Self {
            id,
            channels,
            sample_rate_hz,
            variant,
        }
    }
}

const ADT_CHANNELS: [ChannelTag; 1] = [ChannelTag::new(0, 0)];
const GREEN_CHANNELS: [ChannelTag; 1] = [ChannelTag::new(1, 0)];
const FPBP_CHANNELS: [ChannelTag; 2] = [ChannelTag::new(2, 0), ChannelTag::new(2, 1)];
const PWA_CHANNELS: [ChannelTag; 1] = [ChannelTag::new(2, 0)];
const SPO2_CHANNELS: [ChannelTag; 2] = [ChannelTag::new(3, 0), ChannelTag::new(4, 0)];
const ECG_CHANNELS: [ChannelTag; 1] = [ChannelTag::new(5, 0)];
const PWTT_CHANNELS: [ChannelTag; 2] = [ChannelTag::new(5, 0), ChannelTag::new(1, 0)];
const BT_CHANNELS: [ChannelTag; 1] = [ChannelTag::new(6, 0)];
const TEST1_CHANNELS: [ChannelTag; 1] = [ChannelTag::new(7, 0)];
const TEST2_CHANNELS: [ChannelTag; 1] = [ChannelTag::new(7, 1)];
const SOFT_ADT_IR_CHANNELS: [ChannelTag; 1] = [ChannelTag::new(4, 0)];
const RS0_CHANNELS: [ChannelTag; 1] = [ChannelTag::new(6, 1)];
const RS1_CHANNELS: [ChannelTag; 1] = [ChannelTag::new(6, 2)];
const RS2_CHANNELS: [ChannelTag; 1] = [ChannelTag::new(6, 3)];
const LEAD_CHANNELS: [ChannelTag; 1] = [ChannelTag::new(5, 1)];

/// Catalog used by [`super::FunctionRegistry::default`], in offset order.
pub const DEFAULT_FUNCTIONS: [FunctionSpec; FUNCTION_COUNT] = [
    FunctionSpec::new(FunctionId::Adt, &ADT_CHANNELS, 25, VariantKind::WearDetect),
    FunctionSpec::new(FunctionId::Hr, &GREEN_CHANNELS, 25, VariantKind::Optical),
    FunctionSpec::new(FunctionId::Hrv, &GREEN_CHANNELS, 100, VariantKind::Optical),
    FunctionSpec::new(FunctionId::Hsm, &GREEN_CHANNELS, 25, VariantKind::Optical),
    FunctionSpec::new(FunctionId::Fpbp, &FPBP_CHANNELS, 100, VariantKind::Optical),
    FunctionSpec::new(FunctionId::Pwa, &PWA_CHANNELS, 100, VariantKind::Optical),
    FunctionSpec::new(FunctionId::Spo2, &SPO2_CHANNELS, 25, VariantKind::Optical),
    FunctionSpec::new(FunctionId::Ecg, &ECG_CHANNELS, 500, VariantKind::BioPotential),
    FunctionSpec::new(FunctionId::Pwtt, &PWTT_CHANNELS, 500, VariantKind::Optical),
    FunctionSpec::new(
        FunctionId::SoftAdtGreen,
        &GREEN_CHANNELS,
        25,
        VariantKind::WearDetect,
    ),
    FunctionSpec::new(FunctionId::Bt, &BT_CHANNELS, 25, VariantKind::Passthrough),
    FunctionSpec::new(FunctionId::Resp, &GREEN_CHANNELS, 25, VariantKind::Optical),
    FunctionSpec::new(FunctionId::Af, &GREEN_CHANNELS, 25, VariantKind::Optical),
    FunctionSpec::new(FunctionId::Test1, &TEST1_CHANNELS, 25, VariantKind::Passthrough),
    FunctionSpec::new(FunctionId::Test2, &TEST2_CHANNELS, 25, VariantKind::Passthrough),
    FunctionSpec::new(
        FunctionId::SoftAdtIr,
        &SOFT_ADT_IR_CHANNELS,
        25,
        VariantKind::WearDetect,
    ),
    FunctionSpec::new(FunctionId::Rs0, &RS0_CHANNELS, 25, VariantKind::Passthrough),
    FunctionSpec::new(FunctionId::Rs1, &RS1_CHANNELS, 25, VariantKind::Passthrough),
    FunctionSpec::new(FunctionId::Rs2, &RS2_CHANNELS, 25, VariantKind::Passthrough),
    FunctionSpec::new(
        FunctionId::LeadDet,
        &LEAD_CHANNELS,
        25,
        VariantKind::BioPotential,
    ),
];

/// Finds the catalog entry for `id`.
#[must_use]
pub fn default_spec(id: FunctionId) -> Option<&'static FunctionSpec> {
    DEFAULT_FUNCTIONS.iter().find(|spec| spec.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_in_offset_order() {
        for (offset, spec) in DEFAULT_FUNCTIONS.iter().enumerate() {
            assert_eq!(spec.id.offset(), offset, "{} out of order", spec.id);
        }
    }

    #[test]
    fn default_rates_are_multiples_of_base_unit() {
        for spec in &DEFAULT_FUNCTIONS {
            assert_eq!(spec.sample_rate_hz % 25, 0, "{} rate", spec.id);
            assert!(!spec.channels.is_empty(), "{} has no channels", spec.id);
        }
    }

    #[test]
    fn hr_and_hrv_share_the_green_slot() {
        let hr = default_spec(FunctionId::Hr).expect("hr entry");
        let hrv = default_spec(FunctionId::Hrv).expect("hrv entry");
        assert_eq!(hr.channels, hrv.channels);
    }
}

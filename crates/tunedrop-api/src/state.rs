//! Shared handler state.

use tunedrop_media::ConversionService;
use tunedrop_telemetry::Metrics;

pub(crate) struct ApiState {
    pub(crate) conversions: ConversionService,
    pub(crate) telemetry: Metrics,
}

impl ApiState {
    pub(crate) const fn new(conversions: ConversionService, telemetry: Metrics) -> Self {
        Self {
            conversions,
            telemetry,
        }
    }
}

//! Idempotent control over BLE advertising

use super::adapter::{AdvertisingParameters, BleError, PlatformStack};

/// Result of an advertising start request
#[derive(Debug)]
pub enum AdvertisingOutcome {
    /// Advertising was requested from the platform
    Started,
    /// Already advertising; nothing was done
    AlreadyAdvertising,
    /// The radio is not usable
    RadioUnavailable,
    /// The platform refused to advertise
    Failed(BleError),
}

/// Tracks whether the emulator is advertising and forwards start/stop to the
/// platform only on actual transitions.
#[derive(Debug)]
pub struct AdvertisingController {
    parameters: AdvertisingParameters,
    advertising: bool,
}

impl AdvertisingController {
    pub fn new(parameters: AdvertisingParameters) -> Self {
        Self {
            parameters,
            advertising: false,
        }
    }

    pub fn parameters(&self) -> &AdvertisingParameters {
        &self.parameters
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising
    }

    /// Begin advertising unless already advertising or the radio is down
    pub fn start(&mut self, platform: &dyn PlatformStack) -> AdvertisingOutcome {
        if self.advertising {
            return AdvertisingOutcome::AlreadyAdvertising;
        }
        if !platform.is_radio_available() {
            tracing::error!("Cannot advertise: radio unavailable");
            return AdvertisingOutcome::RadioUnavailable;
        }

        tracing::info!(
            "📡 Start advertising as {:?} ({:?}, {:?})",
            self.parameters.local_name,
            self.parameters.mode,
            self.parameters.tx_power
        );
        match platform.start_advertising(&self.parameters) {
            Ok(()) => {
                self.advertising = true;
                AdvertisingOutcome::Started
            }
            Err(e) => {
                tracing::error!("Cannot advertise: {}", e);
                AdvertisingOutcome::Failed(e)
            }
        }
    }

    /// End advertising if currently advertising. Returns whether it did.
    pub fn stop(&mut self, platform: &dyn PlatformStack) -> bool {
        if !self.advertising {
            return false;
        }
        self.advertising = false;
        tracing::info!("🛑 Stop advertising");
        platform.stop_advertising();
        true
    }

    /// The platform reported that advertising did not come up
    pub fn on_start_failed(&mut self) {
        self.advertising = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::simulated::{PlatformCall, SimulatedStack};
    use crate::config::EmulatorConfig;

    fn controller() -> AdvertisingController {
        AdvertisingController::new(EmulatorConfig::default().advertising_parameters())
    }

    #[test]
    fn test_start_is_idempotent() {
        let platform = SimulatedStack::new();
        let mut controller = controller();

        assert!(matches!(controller.start(&platform), AdvertisingOutcome::Started));
        assert!(matches!(
            controller.start(&platform),
            AdvertisingOutcome::AlreadyAdvertising
        ));
        assert!(controller.is_advertising());
        assert_eq!(platform.advertising_starts(), 1);
    }

    #[test]
    fn test_stop_only_when_advertising() {
        let platform = SimulatedStack::new();
        let mut controller = controller();

        assert!(!controller.stop(&platform));
        controller.start(&platform);
        assert!(controller.stop(&platform));
        assert!(!controller.stop(&platform));
        assert_eq!(
            platform
                .calls()
                .iter()
                .filter(|c| matches!(c, PlatformCall::StopAdvertising))
                .count(),
            1
        );
    }

    #[test]
    fn test_radio_unavailable() {
        let platform = SimulatedStack::new();
        platform.set_radio_available(false);
        let mut controller = controller();

        assert!(matches!(
            controller.start(&platform),
            AdvertisingOutcome::RadioUnavailable
        ));
        assert!(!controller.is_advertising());
        assert_eq!(platform.advertising_starts(), 0);
    }

    #[test]
    fn test_platform_failure_leaves_flag_clear() {
        let platform = SimulatedStack::new();
        platform.fail_advertising(true);
        let mut controller = controller();

        assert!(matches!(controller.start(&platform), AdvertisingOutcome::Failed(_)));
        assert!(!controller.is_advertising());

        platform.fail_advertising(false);
        assert!(matches!(controller.start(&platform), AdvertisingOutcome::Started));
        controller.on_start_failed();
        assert!(!controller.is_advertising());
    }
}

//! The reset-time boot decision (spec.md section 6): what a board's
//! startup code should do before `canboot`'s command loop is ever
//! entered, decided from the warm-reset argument the previous boot left
//! behind. Grounded in the original's `platform/mcu/armv7-m/boot_arg.c`
//! magic-word mechanism, abstracted here behind [`canboot_hal::Reboot`].
//!
//! The actual application jump is a raw vector-table transfer specific
//! to each microcontroller's memory map and is out of scope for this
//! crate; a board's startup code calls [`decide`] and, on
//! [`BootDecision::Application`], performs that jump itself before
//! `canboot`'s main loop ever runs.

use canboot_hal::{Reboot, RebootArg};

/// What a board's startup code should do this boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootDecision {
    /// Jump straight to the resident application; the command loop is
    /// never entered this boot.
    Application,
    /// Enter the command loop with the grace timer running.
    BootloaderWithTimeout,
    /// Enter the command loop with the grace timer disabled - the
    /// previous boot explicitly asked to stay in the bootloader (for
    /// example, `JUMP_TO_APPLICATION` found the application's CRC
    /// didn't match).
    BootloaderNoTimeout,
    /// Delegate to a vendor ROM bootloader where the platform has one.
    VendorBootloader,
}

/// Reads back the previous boot's argument and turns it into a
/// decision. A cold boot (no magic present) is treated the same as an
/// explicit `StartBootloader`: enter the command loop with the grace
/// timer running, so a node with no application yet still answers the
/// bus.
pub fn decide<R: Reboot>(reboot: &mut R) -> BootDecision {
    match reboot.take_boot_argument() {
        Some(RebootArg::StartApplication) => BootDecision::Application,
        Some(RebootArg::StartBootloader) | None => BootDecision::BootloaderWithTimeout,
        Some(RebootArg::StartBootloaderNoTimeout) => BootDecision::BootloaderNoTimeout,
        Some(RebootArg::StartStBootloader) => BootDecision::VendorBootloader,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canboot_hal::sim::SimReboot;

    #[test]
    fn cold_boot_enters_bootloader_with_timeout() {
        let mut reboot = SimReboot::new(None);
        assert_eq!(decide(&mut reboot), BootDecision::BootloaderWithTimeout);
    }

    #[test]
    fn seeded_start_application_jumps_straight_through() {
        let mut reboot = SimReboot::new(Some(RebootArg::StartApplication));
        assert_eq!(decide(&mut reboot), BootDecision::Application);
    }

    #[test]
    fn seeded_no_timeout_argument_disables_the_grace_timer() {
        let mut reboot = SimReboot::new(Some(RebootArg::StartBootloaderNoTimeout));
        assert_eq!(decide(&mut reboot), BootDecision::BootloaderNoTimeout);
    }

    #[test]
    fn boot_argument_is_consumed_once() {
        let mut reboot = SimReboot::new(Some(RebootArg::StartApplication));
        decide(&mut reboot);
        assert_eq!(reboot.take_boot_argument(), None);
    }
}

//! PSCI (Power State Coordination Interface)
//!
//! Firmware power control over the SMC conduit: CPU bring-up and
//! teardown for SMP init, and whole-system off/reset. Function IDs and
//! error codes per DEN 0022 (PSCI v1.0+), issued with the SMCCC
//! fast-call convention.

use xino_arch::smccc::{self, Args, Fid};
use xino_common::PhysAddr;

const PSCI_VERSION: Fid = 0x8400_0000;
const CPU_OFF: Fid = 0x8400_0002;
const CPU_ON_64: Fid = 0xc400_0003;
const AFFINITY_INFO_64: Fid = 0xc400_0004;
const SYSTEM_OFF: Fid = 0x8400_0008;
const SYSTEM_RESET: Fid = 0x8400_0009;

/// PSCI status codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum PsciError {
    NotSupported = -1,
    InvalidParameters = -2,
    Denied = -3,
    AlreadyOn = -4,
    OnPending = -5,
    InternalFailure = -6,
    NotPresent = -7,
    Disabled = -8,
    InvalidAddress = -9,
}

impl PsciError {
    fn from_ret(value: i64) -> Result<(), Self> {
        match value {
            0 => Ok(()),
            -1 => Err(Self::NotSupported),
            -2 => Err(Self::InvalidParameters),
            -3 => Err(Self::Denied),
            -4 => Err(Self::AlreadyOn),
            -5 => Err(Self::OnPending),
            -6 => Err(Self::InternalFailure),
            -7 => Err(Self::NotPresent),
            -8 => Err(Self::Disabled),
            -9 => Err(Self::InvalidAddress),
            _ => Err(Self::InternalFailure),
        }
    }
}

/// Power state of an affinity instance, per AFFINITY_INFO.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum AffinityState {
    On = 0,
    Off = 1,
    OnPending = 2,
}

/// PSCI version implemented by firmware (major, minor).
#[must_use]
pub fn version() -> (u32, u32) {
    // SAFETY: PSCI_VERSION is a state-free query.
    let out = unsafe { smccc::smc_call(&Args::new(PSCI_VERSION)) };
    let v = out.x[0] as u32;
    (v >> 16, v & 0xffff)
}

/// Power up a CPU at `entry` (a physical address) with `context` in
/// `x0`.
///
/// # Safety
///
/// `entry` must point at real startup code prepared for a cold CPU
/// (MMU off, identity view); `target_mpidr` must name a present CPU.
pub unsafe fn cpu_on(target_mpidr: u64, entry: PhysAddr, context: u64) -> Result<(), PsciError> {
    let mut args = Args::new(CPU_ON_64);
    args.x[1] = target_mpidr;
    args.x[2] = entry.value();
    args.x[3] = context;

    // SAFETY: forwarded caller contract.
    let out = unsafe { smccc::smc_call(&args) };
    PsciError::from_ret(smccc::retcode_from_x0(CPU_ON_64, out.x[0]))
}

/// Power down the calling CPU. Returns only on failure.
pub fn cpu_off() -> PsciError {
    // SAFETY: CPU_OFF only affects the calling CPU.
    let out = unsafe { smccc::smc_call(&Args::new(CPU_OFF)) };
    match PsciError::from_ret(smccc::retcode_from_x0(CPU_OFF, out.x[0])) {
        Err(e) => e,
        // A successful CPU_OFF does not return.
        Ok(()) => PsciError::InternalFailure,
    }
}

/// Query the power state of `target_mpidr`.
pub fn affinity_info(target_mpidr: u64) -> Result<AffinityState, PsciError> {
    let mut args = Args::new(AFFINITY_INFO_64);
    args.x[1] = target_mpidr;
    // x[2]: lowest affinity level = 0 (the CPU itself).

    // SAFETY: AFFINITY_INFO is a state-free query.
    let out = unsafe { smccc::smc_call(&args) };
    match smccc::retcode_from_x0(AFFINITY_INFO_64, out.x[0]) {
        0 => Ok(AffinityState::On),
        1 => Ok(AffinityState::Off),
        2 => Ok(AffinityState::OnPending),
        e => Err(PsciError::from_ret(e).unwrap_err()),
    }
}

/// Power the system off. Returns only on failure.
pub fn system_off() -> PsciError {
    // SAFETY: SYSTEM_OFF is the intended effect.
    let out = unsafe { smccc::smc_call(&Args::new(SYSTEM_OFF)) };
    match PsciError::from_ret(smccc::retcode_from_x0(SYSTEM_OFF, out.x[0])) {
        Err(e) => e,
        Ok(()) => PsciError::InternalFailure,
    }
}

/// Reset the system. Returns only on failure.
pub fn system_reset() -> PsciError {
    // SAFETY: SYSTEM_RESET is the intended effect.
    let out = unsafe { smccc::smc_call(&Args::new(SYSTEM_RESET)) };
    match PsciError::from_ret(smccc::retcode_from_x0(SYSTEM_RESET, out.x[0])) {
        Err(e) => e,
        Ok(()) => PsciError::InternalFailure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xino_arch::smccc::{make_fast_fid, CallConv, Oen};

    #[test]
    fn fids_follow_the_standard_service_allocation() {
        assert_eq!(PSCI_VERSION, make_fast_fid(CallConv::Smccc32, Oen::StdSecure, 0));
        assert_eq!(CPU_OFF, make_fast_fid(CallConv::Smccc32, Oen::StdSecure, 2));
        assert_eq!(CPU_ON_64, make_fast_fid(CallConv::Smccc64, Oen::StdSecure, 3));
        assert_eq!(
            AFFINITY_INFO_64,
            make_fast_fid(CallConv::Smccc64, Oen::StdSecure, 4)
        );
        assert_eq!(SYSTEM_OFF, make_fast_fid(CallConv::Smccc32, Oen::StdSecure, 8));
        assert_eq!(
            SYSTEM_RESET,
            make_fast_fid(CallConv::Smccc32, Oen::StdSecure, 9)
        );
    }

    #[test]
    fn error_decode() {
        assert_eq!(PsciError::from_ret(0), Ok(()));
        assert_eq!(PsciError::from_ret(-1), Err(PsciError::NotSupported));
        assert_eq!(PsciError::from_ret(-4), Err(PsciError::AlreadyOn));
        assert_eq!(PsciError::from_ret(-9), Err(PsciError::InvalidAddress));
        assert_eq!(PsciError::from_ret(-42), Err(PsciError::InternalFailure));
    }
}

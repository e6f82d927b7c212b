//! CONTEXT: Tests for the kernel/user ABI encodings
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 5 tests
//!
//! TEST_SCOPE:
//!   - Error code register encoding
//!   - Environment id generation arithmetic
//!   - Fault record layout in user memory
//!
//! TEST_SCENARIOS:
//!   - errno_matches_register_encoding(): negative codes decode to the same error
//!   - next_id_bumps_generation_and_keeps_slot(): reuse bumps generation only
//!   - generation_never_reads_negative(): wrap guard keeps ids positive
//!   - utrapframe_layout_is_field_ordered(): 13 LE words in declared order
//!   - syscall_numbers_are_stable(): ABI numbers decode back

use exo_abi::{
    EnvId, Error, PushRegs, Syscall, UTrapframe, ENVGENSHIFT, NENV,
};

#[test]
fn errno_matches_register_encoding() {
    for err in [
        Error::Unspecified,
        Error::BadEnv,
        Error::Inval,
        Error::NoMem,
        Error::NoFreeEnv,
        Error::Fault,
        Error::IpcNotRecv,
    ] {
        assert!(err.errno() < 0);
        assert_eq!(Error::from_errno(err.errno()), Some(err));
    }
    assert_eq!(Error::from_errno(0), None);
    assert_eq!(Error::from_errno(17), None);
    assert_eq!(Error::from_errno(-99), Some(Error::Unspecified));
}

#[test]
fn next_id_bumps_generation_and_keeps_slot() {
    let first = EnvId::next_for_slot(EnvId::from_raw(0), 5);
    assert_eq!(first.raw(), (1 << ENVGENSHIFT) | 5);
    let second = EnvId::next_for_slot(first, 5);
    assert_eq!(second.slot(), 5);
    assert_eq!(second.generation(), 2 << ENVGENSHIFT);
    assert_ne!(first, second);
}

#[test]
fn generation_never_reads_negative() {
    let old = EnvId::from_raw(0x7fff_f000 | 3);
    let next = EnvId::next_for_slot(old, 3);
    assert_eq!(next.raw(), (1 << ENVGENSHIFT) | 3);
    assert!((next.raw() as i32) > 0);
    assert_eq!(NENV, 1024);
}

#[test]
fn utrapframe_layout_is_field_ordered() {
    let utf = UTrapframe {
        fault_va: 0xdead_b000,
        err: 7,
        regs: PushRegs { edi: 1, esi: 2, ebp: 3, oesp: 4, ebx: 5, edx: 6, ecx: 7, eax: 8 },
        eip: 0x0080_0020,
        eflags: 0x200,
        esp: 0xeebf_dffc,
    };
    let bytes = utf.to_le_bytes();
    assert_eq!(bytes.len(), 52);
    assert_eq!(&bytes[0..4], &0xdead_b000u32.to_le_bytes());
    assert_eq!(&bytes[36..40], &8u32.to_le_bytes());
    assert_eq!(&bytes[48..52], &0xeebf_dffcu32.to_le_bytes());
    assert_eq!(UTrapframe::from_le_bytes(&bytes), utf);
}

#[test]
fn syscall_numbers_are_stable() {
    assert_eq!(Syscall::try_from(0), Ok(Syscall::Cputs));
    assert_eq!(Syscall::try_from(5), Ok(Syscall::Exofork));
    assert_eq!(Syscall::try_from(12), Ok(Syscall::IpcTrySend));
    assert_eq!(Syscall::IpcRecv as u32, 11);
    assert_eq!(Syscall::try_from(14), Err(Error::Inval));
}

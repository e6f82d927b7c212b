// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

mod common;

use common::{boot, frame_of};
use exo_abi::memlayout::{round_down, PGSIZE, UTEMP, UXSTACKTOP};
use exo_abi::{EnvId, PteFlags, UTrapframe, UserCpu};
use libexo::{syscall, Error, Process, PGFAULT_UPCALL};

const PUW: PteFlags = PteFlags::PRESENT.union(PteFlags::USER).union(PteFlags::WRITABLE);

/// Backs any faulting address with a fresh zero page.
fn demand_zero(_: &mut Process, cpu: &mut dyn UserCpu, utf: &UTrapframe) -> libexo::Result<()> {
    syscall::page_alloc(cpu, EnvId::SELF, round_down(utf.fault_va), PUW)
}

/// Like `demand_zero`, but first touches the page after the faulting one.
fn touch_next(process: &mut Process, cpu: &mut dyn UserCpu, utf: &UTrapframe) -> libexo::Result<()> {
    let va = round_down(utf.fault_va);
    if va == UTEMP {
        process.store(cpu, UTEMP + PGSIZE, b"inner")?;
    }
    syscall::page_alloc(cpu, EnvId::SELF, va, PUW)
}

fn refuse(_: &mut Process, _: &mut dyn UserCpu, utf: &UTrapframe) -> libexo::Result<()> {
    Err(Error::NoHandler { va: utf.fault_va })
}

#[test]
fn registration_sets_up_stack_and_entry() {
    let (mut m, ids) = boot(1);
    let mut process = Process::new();
    process.set_pgfault_handler(&mut m, demand_zero).unwrap();

    let (_, perm) = frame_of(&m, ids[0], UXSTACKTOP - PGSIZE).unwrap();
    assert_eq!(perm, PUW);
    assert_eq!(process.thisenv(&mut m).unwrap().pgfault_upcall, PGFAULT_UPCALL);

    let free = m.kernel().spaces().free_pages();
    process.set_pgfault_handler(&mut m, touch_next).unwrap();
    assert_eq!(m.kernel().spaces().free_pages(), free);
}

#[test]
fn handled_fault_resumes_the_faulting_access() {
    let (mut m, _) = boot(1);
    let mut process = Process::new();
    process.set_pgfault_handler(&mut m, demand_zero).unwrap();
    let before = m.context();

    process.store(&mut m, UTEMP + 16, b"on demand").unwrap();
    let mut buf = [0u8; 9];
    process.load(&mut m, UTEMP + 16, &mut buf).unwrap();
    assert_eq!(&buf, b"on demand");

    let after = m.context();
    assert_eq!((after.eip, after.esp, after.regs), (before.eip, before.esp, before.regs));
}

#[test]
fn fault_inside_the_handler_is_handled_too() {
    let (mut m, ids) = boot(1);
    let mut process = Process::new();
    process.set_pgfault_handler(&mut m, touch_next).unwrap();
    let esp = m.context().esp;

    process.store(&mut m, UTEMP, b"outer").unwrap();
    assert!(frame_of(&m, ids[0], UTEMP).is_some());
    let mut buf = [0u8; 5];
    process.load(&mut m, UTEMP + PGSIZE, &mut buf).unwrap();
    assert_eq!(&buf, b"inner");
    assert_eq!(m.context().esp, esp);
}

#[test]
fn failing_handler_terminates_the_env() {
    let (mut m, ids) = boot(2);
    let mut process = Process::new();
    process.set_pgfault_handler(&mut m, refuse).unwrap();

    assert_eq!(process.store(&mut m, UTEMP, b"x"), Err(Error::NoHandler { va: UTEMP }));
    assert!(m.kernel().env(ids[0]).is_none());
    assert_eq!(m.current(), Some(ids[1]));
}

#[test]
fn upcall_without_a_registered_handler_terminates_the_env() {
    let (mut m, ids) = boot(1);
    syscall::page_alloc(&mut m, EnvId::SELF, UXSTACKTOP - PGSIZE, PUW).unwrap();
    syscall::env_set_pgfault_upcall(&mut m, EnvId::SELF, PGFAULT_UPCALL).unwrap();

    let mut process = Process::new();
    assert_eq!(process.store(&mut m, UTEMP, b"x"), Err(Error::NoHandler { va: UTEMP }));
    assert!(m.kernel().env(ids[0]).is_none());
}

#[test]
fn console_and_clock_wrappers() {
    let (mut m, _) = boot(1);
    syscall::cputs(&mut m, common::DATA, 7).unwrap();
    assert_eq!(m.kernel().console().output(), "initial");

    assert_eq!(syscall::cgetc(&mut m), Ok(None));
    m.kernel().console().push_input(b"q");
    assert_eq!(syscall::cgetc(&mut m), Ok(Some(b'q')));

    m.timer_interrupt();
    assert_eq!(syscall::time_msec(&mut m), Ok(10));
}

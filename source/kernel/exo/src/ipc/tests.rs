// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Rendezvous IPC tests
//! INVARIANTS: One receive yields exactly one message; failed sends leave the receiver waiting

use exo_abi::memlayout::{PGSIZE, UTEMP, UTEXT, UTOP};
use exo_abi::{EnvId, EnvStatus, Error, PteFlags, Syscall, Trapped, UserCpu};

use crate::hal::Machine;
use crate::mm::PageHandle;
use crate::testutil::{boot, sys};

const PU: u32 = PteFlags::PRESENT.bits() | PteFlags::USER.bits();
const PUW: u32 = PU | PteFlags::WRITABLE.bits();

fn lookup(m: &Machine, env: EnvId, va: u32) -> Option<(PageHandle, PteFlags)> {
    let space = m.kernel().env(env)?.address_space()?;
    m.kernel().spaces().lookup(space, va)
}

/// The running env blocks in `ipc_recv(dst_va)`.
fn block_in_recv(m: &mut Machine, dst_va: u32) {
    assert_eq!(m.syscall(Syscall::IpcRecv, [dst_va, 0, 0, 0, 0]), Err(Trapped::Descheduled));
}

fn send(m: &mut Machine, to: EnvId, value: u32, src_va: u32, perm: u32) -> i32 {
    sys(m, Syscall::IpcTrySend, [to.raw(), value, src_va, perm, 0])
}

#[test]
fn one_receive_gets_exactly_one_message() {
    let (mut m, ids) = boot(3);
    let (r, s1, s2) = (ids[0], ids[1], ids[2]);
    block_in_recv(&mut m, UTOP);
    assert_eq!(m.kernel().env(r).unwrap().status(), EnvStatus::NotRunnable);

    assert_eq!(m.current(), Some(s1));
    assert_eq!(send(&mut m, r, 7, UTOP, 0), 0);
    assert!(m.preempt_until(s2));
    assert_eq!(send(&mut m, r, 9, UTOP, 0), Error::IpcNotRecv.errno());

    assert!(m.preempt_until(r));
    assert_eq!(m.frame().unwrap().regs.eax, 0);
    let info = m.env_info(r.slot());
    assert!(!info.ipc_recving);
    assert_eq!(info.ipc_from, s1);
    assert_eq!(info.ipc_value, 7);
    assert!(info.ipc_perm.is_empty());
}

#[test]
fn send_to_a_running_env_is_refused() {
    let (mut m, ids) = boot(2);
    assert_eq!(send(&mut m, ids[1], 1, UTOP, 0), Error::IpcNotRecv.errno());
    assert_eq!(send(&mut m, EnvId::from_raw(0x5003), 1, UTOP, 0), Error::BadEnv.errno());
}

#[test]
fn page_travels_with_the_message() {
    let (mut m, ids) = boot(2);
    let (r, s) = (ids[0], ids[1]);
    block_in_recv(&mut m, UTEMP);

    assert_eq!(sys(&mut m, Syscall::PageAlloc, [0, UTEMP + PGSIZE, PUW, 0, 0]), 0);
    m.store(UTEMP + PGSIZE, b"payload").unwrap();
    assert_eq!(send(&mut m, r, 3, UTEMP + PGSIZE, PU), 1);

    let (sent, _) = lookup(&m, s, UTEMP + PGSIZE).unwrap();
    let (got, perm) = lookup(&m, r, UTEMP).unwrap();
    assert_eq!(sent, got);
    assert_eq!(perm, PteFlags::from_user(PU));
    assert_eq!(m.kernel().spaces().refcount(got), 2);
    assert_eq!(m.env_info(r.slot()).ipc_perm, PteFlags::from_user(PU));

    assert!(m.preempt_until(r));
    let mut buf = [0u8; 7];
    m.load(UTEMP, &mut buf).unwrap();
    assert_eq!(&buf, b"payload");
}

#[test]
fn read_only_page_is_never_delivered_writable() {
    let (mut m, ids) = boot(2);
    let r = ids[0];
    block_in_recv(&mut m, UTEMP);

    assert_eq!(send(&mut m, r, 1, UTEXT, PUW), Error::Inval.errno());
    let env = m.kernel().env(r).unwrap();
    assert!(env.ipc().receiving);
    assert_eq!(env.status(), EnvStatus::NotRunnable);
    assert!(lookup(&m, r, UTEMP).is_none());

    assert_eq!(send(&mut m, r, 1, UTEXT, PU), 1);
    let (_, perm) = lookup(&m, r, UTEMP).unwrap();
    assert!(!perm.contains(PteFlags::WRITABLE));
}

#[test]
fn bad_page_arguments_leave_receiver_waiting() {
    let (mut m, ids) = boot(2);
    let r = ids[0];
    block_in_recv(&mut m, UTEMP);

    assert_eq!(send(&mut m, r, 1, UTEXT + 1, PU), Error::Inval.errno());
    assert_eq!(send(&mut m, r, 1, UTEXT, PteFlags::PRESENT.bits()), Error::Inval.errno());
    assert_eq!(send(&mut m, r, 1, UTEMP, PU), Error::Inval.errno());
    assert!(m.kernel().env(r).unwrap().ipc().receiving);
}

#[test]
fn receiver_that_refuses_pages_gets_only_the_value() {
    let (mut m, ids) = boot(2);
    let r = ids[0];
    block_in_recv(&mut m, UTOP);

    assert_eq!(send(&mut m, r, 5, UTEXT, PU), 0);
    assert!(lookup(&m, r, UTEMP).is_none());
    let info = m.env_info(r.slot());
    assert_eq!(info.ipc_value, 5);
    assert!(info.ipc_perm.is_empty());
}

#[test]
fn transfer_replaces_an_existing_mapping() {
    let (mut m, ids) = boot(2);
    let (r, s) = (ids[0], ids[1]);
    assert_eq!(sys(&mut m, Syscall::PageAlloc, [0, UTEMP, PUW, 0, 0]), 0);
    let (old, _) = lookup(&m, r, UTEMP).unwrap();
    block_in_recv(&mut m, UTEMP);

    assert_eq!(send(&mut m, r, 0, UTEXT, PU), 1);
    let (text, _) = lookup(&m, s, UTEXT).unwrap();
    let (now, _) = lookup(&m, r, UTEMP).unwrap();
    assert_eq!(now, text);
    assert_ne!(now, old);
    assert_eq!(m.kernel().spaces().refcount(old), 0);
}

#[test]
fn recv_rejects_unaligned_destination() {
    let (mut m, ids) = boot(2);
    assert_eq!(sys(&mut m, Syscall::IpcRecv, [UTEMP + 1, 0, 0, 0, 0]), Error::Inval.errno());
    assert_eq!(m.current(), Some(ids[0]));
    let env = m.kernel().env(ids[0]).unwrap();
    assert!(!env.ipc().receiving);
    assert_eq!(env.status(), EnvStatus::Runnable);
}

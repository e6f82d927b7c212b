// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

mod common;

use common::{boot, frame_of, DATA};
use exo_abi::memlayout::{PGSIZE, UTEMP, UTEXT};
use exo_abi::{EnvStatus, PteFlags};
use libexo::ipc::{self, Message};
use libexo::{syscall, Error, Process};

const PU: PteFlags = PteFlags::PRESENT.union(PteFlags::USER);

#[test]
fn value_reaches_the_waiting_receiver() {
    let (mut m, ids) = boot(2);
    let (r, s) = (ids[0], ids[1]);
    ipc::recv(&mut m, None).unwrap();
    assert_eq!(m.kernel().env(r).unwrap().status(), EnvStatus::NotRunnable);
    assert_eq!(m.current(), Some(s));

    assert_eq!(ipc::send(&mut m, r, 42, None), Ok(false));
    assert!(m.preempt_until(r));
    let msg = ipc::received(&mut m).unwrap();
    assert_eq!(msg, Message { from: s, value: 42, perm: PteFlags::empty() });
}

#[test]
fn sender_yields_until_the_receiver_is_ready() {
    let (mut m, ids) = boot(2);
    let (r, s) = (ids[0], ids[1]);
    assert!(m.preempt_until(s));

    assert_eq!(ipc::send(&mut m, r, 7, None), Err(Error::Descheduled));
    assert_eq!(m.current(), Some(r));
    ipc::recv(&mut m, None).unwrap();

    assert_eq!(m.current(), Some(s));
    assert_eq!(ipc::send(&mut m, r, 7, None), Ok(false));
    assert!(m.preempt_until(r));
    assert_eq!(ipc::received(&mut m).unwrap().value, 7);
}

#[test]
fn only_one_of_two_senders_is_delivered() {
    let (mut m, ids) = boot(3);
    let (r, s1, s2) = (ids[0], ids[1], ids[2]);
    ipc::recv(&mut m, None).unwrap();

    assert_eq!(m.current(), Some(s1));
    assert_eq!(syscall::ipc_try_send(&mut m, r, 1, u32::MAX, PteFlags::empty()), Ok(false));
    assert!(m.preempt_until(s2));
    assert_eq!(
        syscall::ipc_try_send(&mut m, r, 2, u32::MAX, PteFlags::empty()),
        Err(Error::Kernel(exo_abi::Error::IpcNotRecv))
    );

    assert!(m.preempt_until(r));
    let msg = ipc::received(&mut m).unwrap();
    assert_eq!((msg.from, msg.value), (s1, 1));
}

#[test]
fn page_grant_shares_the_senders_page() {
    let (mut m, ids) = boot(2);
    let (r, s) = (ids[0], ids[1]);
    ipc::recv(&mut m, Some(UTEMP)).unwrap();

    let mut sender = Process::new();
    sender.store(&mut m, DATA, b"shared words").unwrap();
    assert_eq!(ipc::send(&mut m, r, 9, Some((DATA, PU))), Ok(true));
    assert_eq!(frame_of(&m, r, UTEMP).unwrap().0, frame_of(&m, s, DATA).unwrap().0);

    assert!(m.preempt_until(r));
    let msg = ipc::received(&mut m).unwrap();
    assert_eq!(msg.perm, PU);
    let mut receiver = Process::new();
    let mut buf = [0u8; 12];
    receiver.load(&mut m, UTEMP, &mut buf).unwrap();
    assert_eq!(&buf, b"shared words");
}

#[test]
fn read_only_page_cannot_be_granted_writable() {
    let (mut m, ids) = boot(2);
    let r = ids[0];
    ipc::recv(&mut m, Some(UTEMP)).unwrap();

    let writable = PU | PteFlags::WRITABLE;
    assert_eq!(
        ipc::send(&mut m, r, 1, Some((UTEXT, writable))),
        Err(Error::Kernel(exo_abi::Error::Inval))
    );
    assert!(frame_of(&m, r, UTEMP).is_none());
    assert!(m.kernel().env(r).unwrap().ipc().receiving);
    assert_eq!(ipc::send(&mut m, r, 1, Some((UTEXT, PU))), Ok(true));
}

#[test]
fn recv_rejects_unaligned_destination() {
    let (mut m, ids) = boot(1);
    assert_eq!(
        ipc::recv(&mut m, Some(UTEMP + PGSIZE / 2)),
        Err(Error::Kernel(exo_abi::Error::Inval))
    );
    assert_eq!(m.current(), Some(ids[0]));
}

// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Environment table and lifecycle tests
//! INVARIANTS: Stale ids never resolve; exhaustion reports NoFreeEnv without side effects

use alloc::{vec, vec::Vec};

use exo_abi::memlayout::{PGSIZE, USTACKTOP, UTEXT, UTOP};
use exo_abi::{EnvId, EnvStatus, Error, PteFlags, NENV};
use proptest::prelude::*;

use super::{LoadError, ProgramImage, Segment};
use crate::testutil::image;
use crate::{Kernel, KernelConfig};

fn kernel() -> Kernel {
    Kernel::new(KernelConfig::default())
}

#[test]
fn first_env_gets_slot_zero_and_generation_one() {
    let mut kernel = kernel();
    let id = kernel.env_create(&image()).unwrap();
    assert_eq!(id.raw(), 0x1000);
    assert_eq!(id.slot(), 0);
    assert_eq!(kernel.env(id).unwrap().status(), EnvStatus::Runnable);
}

#[test]
fn reused_slot_gets_new_generation() {
    let mut kernel = kernel();
    let first = kernel.env_create(&image()).unwrap();
    kernel.env_free(first.slot());
    let second = kernel.env_create(&image()).unwrap();
    assert_eq!(second.slot(), first.slot());
    assert_ne!(second, first);
    assert_eq!(kernel.envs.lookup(first, None, false), Err(Error::BadEnv));
    assert_eq!(kernel.envs.lookup(second, None, false), Ok(second.slot()));
}

#[test]
fn table_exhaustion_reports_no_free_env() {
    let mut kernel = Kernel::new(KernelConfig::default().with_phys_pages(2 * NENV));
    for _ in 0..NENV {
        kernel.env_alloc(EnvId::SELF).unwrap();
    }
    let free_pages = kernel.spaces.free_pages();
    assert_eq!(kernel.env_alloc(EnvId::SELF), Err(Error::NoFreeEnv));
    assert_eq!(kernel.spaces.free_pages(), free_pages);
}

#[test]
fn memory_exhaustion_leaves_slot_free() {
    let mut kernel = Kernel::new(KernelConfig::default().with_phys_pages(0));
    assert_eq!(kernel.env_alloc(EnvId::SELF), Err(Error::NoMem));
    assert_eq!(kernel.envs.free_count(), NENV);
    assert_eq!(kernel.envs.live().count(), 0);
}

#[test]
fn lookup_permission_is_self_or_child() {
    let mut kernel = kernel();
    let parent = kernel.env_alloc(EnvId::SELF).unwrap();
    let parent_id = kernel.envs.get(parent).id();
    let child = kernel.env_alloc(parent_id).unwrap();
    let child_id = kernel.envs.get(child).id();
    let stranger = kernel.env_alloc(EnvId::SELF).unwrap();
    let grandchild = kernel.env_alloc(child_id).unwrap();
    let grandchild_id = kernel.envs.get(grandchild).id();

    let envs = &kernel.envs;
    assert_eq!(envs.lookup(EnvId::SELF, Some(parent), true), Ok(parent));
    assert_eq!(envs.lookup(parent_id, Some(parent), true), Ok(parent));
    assert_eq!(envs.lookup(child_id, Some(parent), true), Ok(child));
    assert_eq!(envs.lookup(grandchild_id, Some(parent), true), Err(Error::BadEnv));
    assert_eq!(envs.lookup(parent_id, Some(child), true), Err(Error::BadEnv));
    assert_eq!(envs.lookup(child_id, Some(stranger), true), Err(Error::BadEnv));
    assert_eq!(envs.lookup(child_id, Some(stranger), false), Ok(child));
    assert_eq!(envs.lookup(EnvId::SELF, None, false), Err(Error::BadEnv));
}

#[test]
fn loader_maps_segments_and_stack() {
    let mut kernel = kernel();
    let id = kernel.env_create(&image()).unwrap();
    let env = kernel.env(id).unwrap();
    let space = env.address_space().unwrap();
    assert_eq!(env.frame().eip, UTEXT + 0x20);
    assert_eq!(env.frame().esp, USTACKTOP);

    let (_, text) = kernel.spaces.lookup(space, UTEXT).unwrap();
    assert!(!text.contains(PteFlags::WRITABLE));
    let (_, data) = kernel.spaces.lookup(space, UTEXT + PGSIZE).unwrap();
    assert!(data.contains(PteFlags::WRITABLE | PteFlags::USER));
    let (_, stack) = kernel.spaces.lookup(space, USTACKTOP - PGSIZE).unwrap();
    assert!(stack.contains(PteFlags::WRITABLE));

    let mut buf = [0xffu8; 16];
    kernel.spaces.copy_in(space, UTEXT + PGSIZE, &mut buf).unwrap();
    assert_eq!(&buf[..12], b"initial data");
    assert_eq!(&buf[12..], &[0; 4]);
    // text + two data pages + stack
    assert_eq!(kernel.spaces.mapped_pages(space), 4);
}

#[test]
fn rejected_image_releases_everything() {
    let mut kernel = kernel();
    let baseline = kernel.spaces.free_pages();
    let image = ProgramImage {
        entry: UTEXT,
        segments: vec![
            Segment { va: UTEXT, data: vec![1; 8], mem_len: PGSIZE, writable: false },
            Segment { va: UTOP - PGSIZE, data: Vec::new(), mem_len: 2 * PGSIZE, writable: true },
        ],
    };
    assert_eq!(kernel.env_create(&image), Err(LoadError::OutOfRange { va: UTOP - PGSIZE }));
    assert_eq!(kernel.spaces.free_pages(), baseline);
    assert_eq!(kernel.envs.free_count(), NENV);

    let oversized = ProgramImage {
        entry: UTEXT,
        segments: vec![Segment { va: UTEXT, data: vec![0; 32], mem_len: 16, writable: false }],
    };
    assert_eq!(
        kernel.env_create(&oversized),
        Err(LoadError::FileLargerThanMemory { va: UTEXT })
    );
}

#[test]
fn destroy_returns_all_frames() {
    let mut kernel = kernel();
    let baseline = kernel.spaces.free_pages();
    let id = kernel.env_create(&image()).unwrap();
    assert!(kernel.spaces.free_pages() < baseline);
    kernel.env_free(id.slot());
    assert_eq!(kernel.spaces.free_pages(), baseline);
    assert!(kernel.env(id).is_none());
}

proptest! {
    #[test]
    fn stale_ids_never_resolve(ops in prop::collection::vec(0usize..8, 1..96)) {
        let mut kernel = kernel();
        let mut live: Vec<EnvId> = Vec::new();
        let mut dead: Vec<EnvId> = Vec::new();
        for op in ops {
            if op < 5 || live.is_empty() {
                if let Ok(slot) = kernel.env_alloc(EnvId::SELF) {
                    live.push(kernel.envs.get(slot).id());
                }
            } else {
                let id = live.remove(op % live.len());
                kernel.env_free(id.slot());
                dead.push(id);
            }
        }
        for id in &dead {
            prop_assert_eq!(kernel.envs.lookup(*id, None, false), Err(Error::BadEnv));
        }
        for id in &live {
            prop_assert_eq!(kernel.envs.lookup(*id, None, false), Ok(id.slot()));
            prop_assert!(!dead.contains(id));
        }
        prop_assert_eq!(kernel.envs.free_count() + live.len(), NENV);
    }
}

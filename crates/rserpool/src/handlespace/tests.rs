// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Handlespace invariants: index consistency, checksums, expiry and selection order.

use super::*;
use crate::message::PoolElementParameter;
use crate::policy::{PolicySettings, PolicyType};
use crate::types::TransportAddressBlock;

fn ph(name: &str) -> PoolHandle {
    PoolHandle::try_from(name).unwrap()
}

fn pe(identifier: u32, home: u32, policy: PolicySettings) -> PoolElementParameter {
    PoolElementParameter {
        identifier,
        home_registrar_identifier: home,
        registration_life: 10_000,
        user_transport: TransportAddressBlock::tcp(
            format!("10.0.0.{}:9000", identifier % 250 + 1).parse().unwrap(),
        ),
        policy,
        registrator_transport: None,
    }
}

fn pick_one(hs: &mut PoolHandlespace, pool: &PoolHandle) -> u32 {
    let picked = hs.handle_resolution(pool, 1, 1).unwrap();
    assert_eq!(picked.len(), 1);
    picked[0].identifier
}

#[test]
fn test_checksum_consistency_under_random_operations() {
    let mut hs = PoolHandlespace::with_seed(11);
    let mut rng = fastrand::Rng::with_seed(99);
    let pools = [ph("A"), ph("B"), ph("C")];
    let policies = [
        PolicySettings::round_robin(),
        PolicySettings::least_used(0),
        PolicySettings::weighted_random(3),
    ];

    for step in 0..500u64 {
        let pool_idx = rng.usize(0..pools.len());
        let identifier = rng.u32(1..20);
        let home = rng.u32(1..4);
        match rng.u8(0..3) {
            0 | 1 => {
                let mut policy = policies[pool_idx];
                policy.load = rng.u32(0..1000);
                policy.weight = rng.u32(0..10);
                hs.register_pool_element(
                    &pools[pool_idx],
                    &pe(identifier, home, policy),
                    Some(u64::from(home)),
                    step,
                )
                .unwrap();
            }
            _ => {
                let _ = hs.deregister_pool_element(&pools[pool_idx], identifier);
            }
        }
        hs.verify().unwrap();
    }

    hs.clear();
    hs.verify().unwrap();
    assert_eq!(hs.handlespace_checksum(), 0);
    for home in 1..4 {
        assert_eq!(hs.ownership_checksum(home), 0);
    }
}

#[test]
fn test_reregistration_updates_in_place() {
    let mut hs = PoolHandlespace::new();
    let pool = ph("EchoPool");
    let first = hs
        .register_pool_element(&pool, &pe(1, 5, PolicySettings::least_used(10)), None, 1)
        .unwrap();
    let second = hs
        .register_pool_element(&pool, &pe(1, 6, PolicySettings::least_used(20)), None, 2)
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(hs.pool_element_count(), 1);

    let node = hs.find_pool_element(&pool, 1).unwrap();
    assert_eq!(node.home_registrar_identifier, 6);
    assert_eq!(node.policy_settings.load, 20);
    assert_eq!(node.last_update, 2);
    assert_eq!(hs.ownership_checksum(5), 0);
    assert_eq!(hs.ownership_checksum(6), hs.handlespace_checksum());
    hs.verify().unwrap();
}

#[test]
fn test_find_reflects_net_present_set() {
    let mut hs = PoolHandlespace::new();
    let pool = ph("Net");
    for id in 1..=10 {
        hs.register_pool_element(&pool, &pe(id, 1, PolicySettings::round_robin()), None, 0)
            .unwrap();
    }
    for id in (2..=10).step_by(2) {
        hs.deregister_pool_element(&pool, id).unwrap();
    }
    hs.register_pool_element(&pool, &pe(4, 1, PolicySettings::round_robin()), None, 0)
        .unwrap();

    let present: Vec<u32> = hs.pool_elements(&pool).map(|n| n.identifier).collect();
    assert_eq!(present, vec![1, 3, 4, 5, 7, 9]);
    assert_eq!(
        hs.deregister_pool_element(&pool, 2).unwrap_err(),
        RspError::NotFound
    );
    hs.verify().unwrap();
}

#[test]
fn test_incompatible_pool_policy_and_transport() {
    let mut hs = PoolHandlespace::new();
    let pool = ph("Mixed");
    hs.register_pool_element(&pool, &pe(1, 1, PolicySettings::least_used(1)), None, 0)
        .unwrap();
    assert_eq!(
        hs.register_pool_element(&pool, &pe(2, 1, PolicySettings::priority(1)), None, 0),
        Err(RspError::IncompatiblePoolPolicy)
    );

    let mut udp = pe(3, 1, PolicySettings::least_used(1));
    udp.user_transport.protocol = crate::types::TransportProtocol::Udp;
    assert_eq!(
        hs.register_pool_element(&pool, &udp, None, 0),
        Err(RspError::IncompatiblePoolTransport)
    );
    assert_eq!(hs.pool_element_count(), 1);
}

#[test]
fn test_purge_expired_is_exact_and_idempotent() {
    let mut hs = PoolHandlespace::new();
    let pool = ph("Expiry");
    for id in 1..=6u32 {
        let h = hs
            .register_pool_element(&pool, &pe(id, 1, PolicySettings::round_robin()), None, 0)
            .unwrap();
        hs.restart_expiry_timer(h, u64::from(id) * 100, 1_000).unwrap();
    }
    // Element 7 never expires.
    hs.register_pool_element(&pool, &pe(7, 1, PolicySettings::round_robin()), None, 0)
        .unwrap();
    assert_eq!(hs.next_timer(), Some(1_100));

    assert_eq!(hs.purge_expired_pool_elements(1_300), 3);
    let left: Vec<u32> = hs.pool_elements(&pool).map(|n| n.identifier).collect();
    assert_eq!(left, vec![4, 5, 6, 7]);
    assert_eq!(hs.purge_expired_pool_elements(1_300), 0);
    hs.verify().unwrap();

    // Restarting pushes the deadline out.
    let h4 = hs.find_handle(&pool, 4).unwrap();
    hs.restart_expiry_timer(h4, 10_000, 1_300).unwrap();
    assert_eq!(hs.purge_expired_pool_elements(2_000), 2);
    assert!(hs.find_pool_element(&pool, 4).is_some());
    hs.verify().unwrap();
}

#[test]
fn test_keep_alive_timers_are_not_purged() {
    let mut hs = PoolHandlespace::new();
    let pool = ph("Timers");
    let h = hs
        .register_pool_element(&pool, &pe(1, 1, PolicySettings::round_robin()), Some(3), 0)
        .unwrap();
    hs.schedule_timer(h, TimerCode::KeepAliveTransmission, 50).unwrap();
    assert_eq!(hs.purge_expired_pool_elements(100), 0);
    assert_eq!(
        hs.due_timers(100),
        vec![(h, TimerCode::KeepAliveTransmission)]
    );
    hs.cancel_timer(h);
    assert!(hs.due_timers(100).is_empty());
    assert_eq!(hs.next_timer(), None);
    hs.verify().unwrap();
}

#[test]
fn test_round_robin_cycle_visits_each_once() {
    let mut hs = PoolHandlespace::new();
    let pool = ph("RR");
    let k = 7u32;
    for id in 1..=k {
        hs.register_pool_element(&pool, &pe(id, 1, PolicySettings::round_robin()), None, 0)
            .unwrap();
    }
    for _ in 0..3 {
        let mut seen: Vec<u32> = (0..k).map(|_| pick_one(&mut hs, &pool)).collect();
        seen.sort_unstable();
        assert_eq!(seen, (1..=k).collect::<Vec<_>>());
    }
    hs.verify().unwrap();
}

#[test]
fn test_weighted_round_robin_is_proportional() {
    let mut hs = PoolHandlespace::new();
    let pool = ph("WRR");
    for (id, weight) in [(1u32, 1u32), (2, 2), (3, 3)] {
        hs.register_pool_element(
            &pool,
            &pe(id, 1, PolicySettings::weighted_round_robin(weight)),
            None,
            0,
        )
        .unwrap();
    }
    for _ in 0..2 {
        let mut counts = [0usize; 4];
        for _ in 0..6 {
            counts[pick_one(&mut hs, &pool) as usize] += 1;
        }
        assert_eq!(&counts[1..], &[1, 2, 3]);
    }
    hs.verify().unwrap();
}

#[test]
fn test_weighted_round_robin_round_reset() {
    let mut hs = PoolHandlespace::new();
    let pool = ph("Rounds");
    let a = hs
        .register_pool_element(&pool, &pe(1, 1, PolicySettings::weighted_round_robin(1)), None, 0)
        .unwrap();
    hs.register_pool_element(&pool, &pe(2, 1, PolicySettings::weighted_round_robin(1)), None, 0)
        .unwrap();
    {
        let pool_node = hs.pools.get_mut(&pool).unwrap();
        let node = hs.arena.get_mut(a).unwrap();
        pool_node.selection.remove(&(node.selection_key, a));
        node.policy_state.round_counter = ROUND_COUNTER_RESET_THRESHOLD;
        node.selection_key = sort_key(&node.policy_settings, &node.policy_state);
        pool_node.selection.insert((node.selection_key, a));
    }
    assert_eq!(pick_one(&mut hs, &pool), 2);
    let round = hs.get(a).unwrap().policy_state.round_counter;
    assert_eq!(round, ROUND_COUNTER_RESET_THRESHOLD - 1);
    assert_eq!(
        hs.find_pool_element(&pool, 2).unwrap().policy_state.round_counter,
        0
    );
    hs.verify().unwrap();
}

#[test]
fn test_resequencing_preserves_order() {
    let mut hs = PoolHandlespace::new();
    let pool = ph("Seq");
    for id in 1..=3 {
        hs.register_pool_element(&pool, &pe(id, 1, PolicySettings::round_robin()), None, 0)
            .unwrap();
    }
    hs.pools.get_mut(&pool).unwrap().set_next_sequence(u64::MAX);
    assert_eq!(pick_one(&mut hs, &pool), 1);
    assert_eq!(pick_one(&mut hs, &pool), 2);
    assert_eq!(pick_one(&mut hs, &pool), 3);
    assert_eq!(pick_one(&mut hs, &pool), 1);
    assert!(hs.get(hs.find_handle(&pool, 1).unwrap()).unwrap().policy_state.sequence_number < 10);
    hs.verify().unwrap();
}

#[test]
fn test_priority_and_least_used_order() {
    let mut hs = PoolHandlespace::new();
    let prio = ph("Prio");
    for (id, priority) in [(1u32, 3u32), (2, 9), (3, 5)] {
        hs.register_pool_element(&prio, &pe(id, 1, PolicySettings::priority(priority)), None, 0)
            .unwrap();
    }
    let order: Vec<u32> = hs
        .handle_resolution(&prio, 3, 0)
        .unwrap()
        .iter()
        .map(|n| n.identifier)
        .collect();
    assert_eq!(order, vec![2, 3, 1]);

    let lu = ph("LU");
    for (id, load) in [(1u32, 500u32), (2, 100), (3, 100)] {
        hs.register_pool_element(&lu, &pe(id, 1, PolicySettings::least_used(load)), None, 0)
            .unwrap();
    }
    // Equal loads rotate among themselves.
    assert_eq!(pick_one(&mut hs, &lu), 2);
    assert_eq!(pick_one(&mut hs, &lu), 3);
    assert_eq!(pick_one(&mut hs, &lu), 2);
    hs.verify().unwrap();
}

#[test]
fn test_degradation_shifts_selection() {
    let mut hs = PoolHandlespace::new();
    let pool = ph("LUD");
    for id in [1u32, 2] {
        hs.register_pool_element(
            &pool,
            &pe(
                id,
                1,
                PolicySettings::with_load(PolicyType::LeastUsedDegradation, 1000, 600),
            ),
            None,
            0,
        )
        .unwrap();
    }
    assert_eq!(pick_one(&mut hs, &pool), 1);
    assert_eq!(pick_one(&mut hs, &pool), 2);
    let n1 = hs.find_pool_element(&pool, 1).unwrap();
    assert_eq!(n1.policy_state.degradation, 600);

    // Reregistration with new settings clears degradation.
    hs.register_pool_element(
        &pool,
        &pe(
            1,
            1,
            PolicySettings::with_load(PolicyType::LeastUsedDegradation, 900, 600),
        ),
        None,
        1,
    )
    .unwrap();
    assert_eq!(
        hs.find_pool_element(&pool, 1).unwrap().policy_state.degradation,
        0
    );
    assert_eq!(pick_one(&mut hs, &pool), 1);
    hs.verify().unwrap();
}

#[test]
fn test_max_increment_limits_updates() {
    let mut hs = PoolHandlespace::new();
    let pool = ph("Inc");
    for id in 1..=4 {
        hs.register_pool_element(&pool, &pe(id, 1, PolicySettings::round_robin()), None, 0)
            .unwrap();
    }
    let first: Vec<u32> = hs
        .handle_resolution(&pool, 3, 1)
        .unwrap()
        .iter()
        .map(|n| n.identifier)
        .collect();
    assert_eq!(first, vec![1, 2, 3]);
    let second: Vec<u32> = hs
        .handle_resolution(&pool, 3, 1)
        .unwrap()
        .iter()
        .map(|n| n.identifier)
        .collect();
    assert_eq!(second, vec![2, 3, 4]);
}

#[test]
fn test_randomized_selection_without_replacement() {
    let mut hs = PoolHandlespace::with_seed(5);
    let pool = ph("Rand");
    for id in 1..=5 {
        hs.register_pool_element(&pool, &pe(id, 1, PolicySettings::random()), None, 0)
            .unwrap();
    }
    for _ in 0..50 {
        let mut picked: Vec<u32> = hs
            .handle_resolution(&pool, 3, 3)
            .unwrap()
            .iter()
            .map(|n| n.identifier)
            .collect();
        assert_eq!(picked.len(), 3);
        picked.sort_unstable();
        picked.dedup();
        assert_eq!(picked.len(), 3);
    }

    let zero = ph("Zero");
    hs.register_pool_element(&zero, &pe(1, 1, PolicySettings::weighted_random(0)), None, 0)
        .unwrap();
    assert!(hs.handle_resolution(&zero, 1, 1).unwrap().is_empty());
    hs.verify().unwrap();
}

#[test]
fn test_empty_or_absent_pool_is_not_found() {
    let mut hs = PoolHandlespace::new();
    let pool = ph("Gone");
    assert_eq!(
        hs.handle_resolution(&pool, 1, 1).unwrap_err(),
        RspError::NotFound
    );
    hs.register_pool_element(&pool, &pe(1, 1, PolicySettings::round_robin()), None, 0)
        .unwrap();
    hs.deregister_pool_element(&pool, 1).unwrap();
    assert_eq!(hs.pool_count(), 0);
    assert_eq!(
        hs.handle_resolution(&pool, 1, 1).unwrap_err(),
        RspError::NotFound
    );
}

#[test]
fn test_owner_and_connection_indices() {
    let mut hs = PoolHandlespace::new();
    let pool = ph("Idx");
    hs.register_pool_element(&pool, &pe(1, 10, PolicySettings::round_robin()), Some(1), 0)
        .unwrap();
    hs.register_pool_element(&pool, &pe(2, 10, PolicySettings::round_robin()), Some(2), 0)
        .unwrap();
    hs.register_pool_element(&pool, &pe(3, 20, PolicySettings::round_robin()), Some(1), 0)
        .unwrap();

    assert_eq!(hs.pool_element_handles_of_owner(10).len(), 2);
    assert_eq!(hs.pool_element_handles_of_owner(20).len(), 1);
    assert_eq!(hs.pool_element_handles_of_connection(1).len(), 2);

    hs.update_home_registrar(&pool, 3, 10).unwrap();
    assert_eq!(hs.pool_element_handles_of_owner(10).len(), 3);
    assert_eq!(hs.ownership_checksum(20), 0);
    assert_eq!(hs.ownership_checksum(10), hs.handlespace_checksum());

    assert_eq!(hs.record_unreachability(&pool, 2).unwrap(), 1);
    assert_eq!(hs.record_unreachability(&pool, 2).unwrap(), 2);
    hs.verify().unwrap();
}

#[test]
fn test_remove_pool() {
    let mut hs = PoolHandlespace::new();
    for id in 1..=4 {
        hs.register_pool_element(&ph("A"), &pe(id, 1, PolicySettings::round_robin()), None, 0)
            .unwrap();
    }
    hs.register_pool_element(&ph("B"), &pe(9, 1, PolicySettings::round_robin()), None, 0)
        .unwrap();
    assert_eq!(hs.remove_pool(&ph("A")), 4);
    assert_eq!(hs.remove_pool(&ph("A")), 0);
    assert_eq!(hs.pool_handles(), vec![ph("B")]);
    assert!(hs.verify().is_ok());
}

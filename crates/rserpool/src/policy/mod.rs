// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pool member selection policies (RFC 5356 plus distance-penalty variants).
//!
//! A policy is a closed enum; every kind maps to exactly one of two strategies:
//!
//! - **Sorting order**: elements sit in a strict total order given by
//!   [`sort_key`]; selection takes the head of the order and [`apply_selection`]
//!   rotates the picked elements behind their peers.
//! - **Value tree**: each element carries a [`sampling_weight`]; selection
//!   samples without replacement proportionally to that weight
//!   (see [`sampling::sample_without_replacement`]).
//!
//! All load/weight arithmetic saturates at the `PPV_MAX_*` bounds.

pub mod sampling;

use std::fmt;

/// Upper bound of a load value (100 %).
pub const PPV_MAX_LOAD: u32 = 0xffff_ffff;
/// Upper bound of a load degradation value.
pub const PPV_MAX_LOAD_DEGRADATION: u32 = 0xffff_ffff;
/// Upper bound of a weight value.
pub const PPV_MAX_WEIGHT: u32 = 0xffff_ffff;
/// Upper bound of a load distance penalty factor.
pub const PPV_MAX_LOADDPF: u32 = 0xffff_ffff;
/// Upper bound of a weight distance penalty factor.
pub const PPV_MAX_WEIGHTDPF: u32 = 0xffff_ffff;

/// Round counters are renormalized once any of them passes this value.
pub const ROUND_COUNTER_RESET_THRESHOLD: u32 = u32::MAX - 1;

/// Selection strategy of a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
    SortingOrder,
    ValueTree,
}

/// Policy kind, with its on-wire type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PolicyType {
    RoundRobin,
    WeightedRoundRobin,
    Random,
    WeightedRandom,
    Priority,
    LeastUsed,
    LeastUsedDegradation,
    PriorityLeastUsed,
    RandomizedLeastUsed,
    PriorityLeastUsedDegradation,
    RandomizedPriorityLeastUsed,
    RandomizedLeastUsedDegradation,
    RandomizedPriorityLeastUsedDegradation,
    LeastUsedDpf,
    LeastUsedDegradationDpf,
    WeightedRandomDpf,
}

impl PolicyType {
    /// Every policy kind.
    pub const ALL: [PolicyType; 16] = [
        Self::RoundRobin,
        Self::WeightedRoundRobin,
        Self::Random,
        Self::WeightedRandom,
        Self::Priority,
        Self::LeastUsed,
        Self::LeastUsedDegradation,
        Self::PriorityLeastUsed,
        Self::RandomizedLeastUsed,
        Self::PriorityLeastUsedDegradation,
        Self::RandomizedPriorityLeastUsed,
        Self::RandomizedLeastUsedDegradation,
        Self::RandomizedPriorityLeastUsedDegradation,
        Self::LeastUsedDpf,
        Self::LeastUsedDegradationDpf,
        Self::WeightedRandomDpf,
    ];

    /// On-wire policy type code.
    pub const fn code(self) -> u32 {
        match self {
            Self::RoundRobin => 0x0000_0001,
            Self::WeightedRoundRobin => 0x0000_0002,
            Self::Random => 0x0000_0003,
            Self::WeightedRandom => 0x0000_0004,
            Self::Priority => 0x0000_0005,
            Self::WeightedRandomDpf => 0x0000_0010,
            Self::LeastUsed => 0x4000_0001,
            Self::LeastUsedDegradation => 0x4000_0002,
            Self::PriorityLeastUsed => 0x4000_0003,
            Self::RandomizedLeastUsed => 0x4000_0004,
            Self::PriorityLeastUsedDegradation => 0x4000_0005,
            Self::RandomizedPriorityLeastUsed => 0x4000_0006,
            Self::RandomizedLeastUsedDegradation => 0x4000_0007,
            Self::RandomizedPriorityLeastUsedDegradation => 0x4000_0008,
            Self::LeastUsedDpf => 0x4000_0010,
            Self::LeastUsedDegradationDpf => 0x4000_0011,
        }
    }

    /// Look up a policy by its type code.
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.code() == code)
    }

    pub const fn strategy(self) -> SelectionStrategy {
        match self {
            Self::Random
            | Self::WeightedRandom
            | Self::WeightedRandomDpf
            | Self::RandomizedLeastUsed
            | Self::RandomizedLeastUsedDegradation
            | Self::RandomizedPriorityLeastUsed
            | Self::RandomizedPriorityLeastUsedDegradation => SelectionStrategy::ValueTree,
            _ => SelectionStrategy::SortingOrder,
        }
    }

    /// Number of u32 fields following the type code on the wire.
    pub const fn field_count(self) -> usize {
        match self {
            Self::RoundRobin | Self::Random => 0,
            Self::WeightedRoundRobin
            | Self::WeightedRandom
            | Self::Priority
            | Self::LeastUsed
            | Self::RandomizedLeastUsed => 1,
            Self::LeastUsedDegradation
            | Self::PriorityLeastUsed
            | Self::PriorityLeastUsedDegradation
            | Self::RandomizedPriorityLeastUsed
            | Self::RandomizedLeastUsedDegradation
            | Self::RandomizedPriorityLeastUsedDegradation => 2,
            Self::LeastUsedDpf | Self::WeightedRandomDpf => 3,
            Self::LeastUsedDegradationDpf => 4,
        }
    }

    /// Whether selections accumulate degradation.
    pub const fn accumulates_degradation(self) -> bool {
        matches!(
            self,
            Self::LeastUsedDegradation
                | Self::LeastUsedDegradationDpf
                | Self::PriorityLeastUsedDegradation
                | Self::RandomizedLeastUsedDegradation
                | Self::RandomizedPriorityLeastUsedDegradation
        )
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::RoundRobin => "RoundRobin",
            Self::WeightedRoundRobin => "WeightedRoundRobin",
            Self::Random => "Random",
            Self::WeightedRandom => "WeightedRandom",
            Self::Priority => "Priority",
            Self::LeastUsed => "LeastUsed",
            Self::LeastUsedDegradation => "LeastUsedDegradation",
            Self::PriorityLeastUsed => "PriorityLeastUsed",
            Self::RandomizedLeastUsed => "RandomizedLeastUsed",
            Self::PriorityLeastUsedDegradation => "PriorityLeastUsedDegradation",
            Self::RandomizedPriorityLeastUsed => "RandomizedPriorityLeastUsed",
            Self::RandomizedLeastUsedDegradation => "RandomizedLeastUsedDegradation",
            Self::RandomizedPriorityLeastUsedDegradation => {
                "RandomizedPriorityLeastUsedDegradation"
            }
            Self::LeastUsedDpf => "LeastUsedDPF",
            Self::LeastUsedDegradationDpf => "LeastUsedDegradationDPF",
            Self::WeightedRandomDpf => "WeightedRandomDPF",
        }
    }
}

impl fmt::Display for PolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Policy parameters advertised by a pool element.
///
/// Only the fields relevant to `policy_type` are encoded; the others stay zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PolicySettings {
    pub policy_type: PolicyType,
    pub weight: u32,
    pub weight_dpf: u32,
    pub load: u32,
    pub load_degradation: u32,
    pub load_dpf: u32,
    pub distance: u32,
}

impl PolicySettings {
    /// Settings with all parameters zero.
    pub const fn new(policy_type: PolicyType) -> Self {
        Self {
            policy_type,
            weight: 0,
            weight_dpf: 0,
            load: 0,
            load_degradation: 0,
            load_dpf: 0,
            distance: 0,
        }
    }

    pub const fn round_robin() -> Self {
        Self::new(PolicyType::RoundRobin)
    }

    pub const fn random() -> Self {
        Self::new(PolicyType::Random)
    }

    pub const fn weighted_round_robin(weight: u32) -> Self {
        let mut s = Self::new(PolicyType::WeightedRoundRobin);
        s.weight = weight;
        s
    }

    pub const fn weighted_random(weight: u32) -> Self {
        let mut s = Self::new(PolicyType::WeightedRandom);
        s.weight = weight;
        s
    }

    pub const fn priority(priority: u32) -> Self {
        let mut s = Self::new(PolicyType::Priority);
        s.weight = priority;
        s
    }

    pub const fn least_used(load: u32) -> Self {
        let mut s = Self::new(PolicyType::LeastUsed);
        s.load = load;
        s
    }

    /// Load-based settings for any load policy.
    pub const fn with_load(policy_type: PolicyType, load: u32, load_degradation: u32) -> Self {
        let mut s = Self::new(policy_type);
        s.load = load;
        s.load_degradation = load_degradation;
        s
    }

    /// Policy parameters in wire order.
    pub fn fields(&self) -> Vec<u32> {
        match self.policy_type {
            PolicyType::RoundRobin | PolicyType::Random => vec![],
            PolicyType::WeightedRoundRobin | PolicyType::WeightedRandom | PolicyType::Priority => {
                vec![self.weight]
            }
            PolicyType::LeastUsed | PolicyType::RandomizedLeastUsed => vec![self.load],
            PolicyType::LeastUsedDegradation
            | PolicyType::PriorityLeastUsed
            | PolicyType::PriorityLeastUsedDegradation
            | PolicyType::RandomizedPriorityLeastUsed
            | PolicyType::RandomizedLeastUsedDegradation
            | PolicyType::RandomizedPriorityLeastUsedDegradation => {
                vec![self.load, self.load_degradation]
            }
            PolicyType::LeastUsedDpf => vec![self.load, self.load_dpf, self.distance],
            PolicyType::LeastUsedDegradationDpf => {
                vec![self.load, self.load_degradation, self.load_dpf, self.distance]
            }
            PolicyType::WeightedRandomDpf => vec![self.weight, self.weight_dpf, self.distance],
        }
    }

    /// Rebuild settings from wire fields; `None` if the field count is wrong.
    pub fn from_fields(policy_type: PolicyType, fields: &[u32]) -> Option<Self> {
        if fields.len() != policy_type.field_count() {
            return None;
        }
        let mut s = Self::new(policy_type);
        match policy_type {
            PolicyType::RoundRobin | PolicyType::Random => {}
            PolicyType::WeightedRoundRobin | PolicyType::WeightedRandom | PolicyType::Priority => {
                s.weight = fields[0];
            }
            PolicyType::LeastUsed | PolicyType::RandomizedLeastUsed => s.load = fields[0],
            PolicyType::LeastUsedDegradation
            | PolicyType::PriorityLeastUsed
            | PolicyType::PriorityLeastUsedDegradation
            | PolicyType::RandomizedPriorityLeastUsed
            | PolicyType::RandomizedLeastUsedDegradation
            | PolicyType::RandomizedPriorityLeastUsedDegradation => {
                s.load = fields[0];
                s.load_degradation = fields[1];
            }
            PolicyType::LeastUsedDpf => {
                s.load = fields[0];
                s.load_dpf = fields[1];
                s.distance = fields[2];
            }
            PolicyType::LeastUsedDegradationDpf => {
                s.load = fields[0];
                s.load_degradation = fields[1];
                s.load_dpf = fields[2];
                s.distance = fields[3];
            }
            PolicyType::WeightedRandomDpf => {
                s.weight = fields[0];
                s.weight_dpf = fields[1];
                s.distance = fields[2];
            }
        }
        Some(s)
    }

    /// Two settings may share a pool if they use the same policy.
    pub fn is_compatible(&self, other: &PolicySettings) -> bool {
        self.policy_type == other.policy_type
    }

    /// Weight used by weighted round robin; a zero weight counts as one.
    fn effective_weight(&self) -> u32 {
        self.weight.max(1)
    }
}

/// Mutable per-element selection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PolicyState {
    pub sequence_number: u64,
    pub selection_counter: u64,
    pub round_counter: u32,
    pub virtual_counter: u32,
    pub degradation: u32,
}

impl PolicyState {
    /// Fresh state for a newly inserted or updated element.
    pub fn initial(settings: &PolicySettings, sequence_number: u64, round_counter: u32) -> Self {
        Self {
            sequence_number,
            selection_counter: 0,
            round_counter,
            virtual_counter: settings.effective_weight(),
            degradation: 0,
        }
    }
}

/// Position of an element in the sorting order; smaller sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SortKey {
    pub primary: u64,
    pub secondary: u64,
    pub sequence: u64,
}

#[inline]
fn saturate_load(value: u64) -> u64 {
    value.min(u64::from(PPV_MAX_LOAD))
}

/// Load penalty for `distance` at `load_dpf` per distance unit.
fn load_distance_penalty(distance: u32, load_dpf: u32) -> u64 {
    let raw = u128::from(distance) * u128::from(load_dpf) * u128::from(PPV_MAX_LOAD)
        / u128::from(PPV_MAX_LOADDPF);
    u64::try_from(raw.min(u128::from(PPV_MAX_LOAD))).unwrap_or(u64::from(PPV_MAX_LOAD))
}

/// Effective load including the policy's adjustments.
fn effective_load(settings: &PolicySettings, state: &PolicyState) -> u64 {
    let load = u64::from(settings.load);
    let degradation = u64::from(state.degradation);
    let increment = u64::from(settings.load_degradation);
    let penalty = load_distance_penalty(settings.distance, settings.load_dpf);
    match settings.policy_type {
        PolicyType::LeastUsed | PolicyType::RandomizedLeastUsed => load,
        PolicyType::LeastUsedDpf => saturate_load(load + penalty),
        PolicyType::LeastUsedDegradation | PolicyType::RandomizedLeastUsedDegradation => {
            saturate_load(load + degradation)
        }
        PolicyType::LeastUsedDegradationDpf => saturate_load(load + degradation + penalty),
        PolicyType::PriorityLeastUsed | PolicyType::RandomizedPriorityLeastUsed => {
            saturate_load(load + increment)
        }
        PolicyType::PriorityLeastUsedDegradation
        | PolicyType::RandomizedPriorityLeastUsedDegradation => {
            saturate_load(load + increment + degradation)
        }
        _ => 0,
    }
}

/// Sorting-order key of an element.
pub fn sort_key(settings: &PolicySettings, state: &PolicyState) -> SortKey {
    let sequence = state.sequence_number;
    let (primary, secondary) = match settings.policy_type {
        PolicyType::WeightedRoundRobin => (
            u64::from(state.round_counter),
            u64::from(state.virtual_counter),
        ),
        PolicyType::Priority => (u64::from(PPV_MAX_WEIGHT - settings.weight), 0),
        PolicyType::LeastUsed
        | PolicyType::LeastUsedDpf
        | PolicyType::LeastUsedDegradation
        | PolicyType::LeastUsedDegradationDpf
        | PolicyType::PriorityLeastUsed
        | PolicyType::PriorityLeastUsedDegradation => (effective_load(settings, state), 0),
        // Randomized policies keep plain insertion order for iteration.
        _ => (0, 0),
    };
    SortKey {
        primary,
        secondary,
        sequence,
    }
}

/// Sampling weight of an element under a value-tree policy.
pub fn sampling_weight(settings: &PolicySettings, state: &PolicyState) -> u64 {
    match settings.policy_type {
        PolicyType::Random => 1,
        PolicyType::WeightedRandom => u64::from(settings.weight),
        PolicyType::WeightedRandomDpf => {
            if settings.weight == 0 {
                return 0;
            }
            let factor = (u128::from(settings.distance) * u128::from(settings.weight_dpf))
                .min(u128::from(PPV_MAX_WEIGHTDPF));
            let reduction = u128::from(settings.weight) * factor / u128::from(PPV_MAX_WEIGHTDPF);
            let weight = u128::from(settings.weight) - reduction;
            u64::try_from(weight).unwrap_or(1).max(1)
        }
        PolicyType::RandomizedLeastUsed
        | PolicyType::RandomizedLeastUsedDegradation
        | PolicyType::RandomizedPriorityLeastUsed
        | PolicyType::RandomizedPriorityLeastUsedDegradation => {
            (u64::from(PPV_MAX_LOAD) - effective_load(settings, state)).max(1)
        }
        // Sorting-order policies are never sampled; equal weights keep them uniform.
        _ => 1,
    }
}

/// Update rule applied to an element that was just selected.
///
/// `next_sequence` is the pool's next sequence number; assigning it moves the
/// element behind every peer with an equal primary key.
pub fn apply_selection(settings: &PolicySettings, state: &mut PolicyState, next_sequence: u64) {
    state.selection_counter = state.selection_counter.saturating_add(1);
    state.sequence_number = next_sequence;

    if settings.policy_type == PolicyType::WeightedRoundRobin {
        state.virtual_counter = state.virtual_counter.saturating_sub(1);
        if state.virtual_counter == 0 {
            state.round_counter = state.round_counter.saturating_add(1);
            state.virtual_counter = settings.effective_weight();
        }
    }

    if settings.policy_type.accumulates_degradation() {
        let degradation = u64::from(state.degradation) + u64::from(settings.load_degradation);
        state.degradation = u32::try_from(degradation.min(u64::from(PPV_MAX_LOAD_DEGRADATION)))
            .unwrap_or(PPV_MAX_LOAD_DEGRADATION);
    }
}

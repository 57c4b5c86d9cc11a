// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Helpers shared by the OVN provider crates.

pub mod logging;
pub mod network;

/// TCP port on which the Neutron-style API is served by default.
pub const DEFAULT_PROVIDER_PORT: u16 = 9696;

/// Northbound database remote used when none is configured.
pub const DEFAULT_OVN_REMOTE: &str = "tcp:127.0.0.1:6641";

/// Name of the northbound database on an OVSDB server.
pub const OVN_NORTHBOUND: &str = "OVN_Northbound";

/// Given two sets of items, return the items unique to each: those only in
/// `a` first, then those only in `b`.
pub fn purge_common<T>(a: &[T], b: &[T]) -> (Vec<T>, Vec<T>)
where
    T: Clone + Eq + std::hash::Hash,
{
    let a_set: std::collections::HashSet<&T> = a.iter().collect();
    let b_set: std::collections::HashSet<&T> = b.iter().collect();
    let only_a = a.iter().filter(|x| !b_set.contains(x)).cloned().collect();
    let only_b = b.iter().filter(|x| !a_set.contains(x)).cloned().collect();
    (only_a, only_b)
}

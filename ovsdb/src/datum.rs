// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Encoding and decoding of OVSDB datums.
//!
//! On the wire a column value is either a bare atom (string, number, boolean),
//! a tagged atom such as `["uuid", "<id>"]`, a set `["set", [<atom>, ...]]`,
//! or a map `["map", [[<key>, <value>], ...]]`. A set of exactly one element
//! may be sent as the bare element, so readers must accept both shapes.

use std::collections::BTreeMap;

use serde_json::json;
use serde_json::Value;
use uuid::Uuid;

const SET: &str = "set";
const MAP: &str = "map";
const UUID: &str = "uuid";
const NAMED_UUID: &str = "named-uuid";

fn tagged<'a>(v: &'a Value, tag: &str) -> Option<&'a Value> {
    match v.as_array().map(Vec::as_slice) {
        Some([Value::String(t), inner]) if t == tag => Some(inner),
        _ => None,
    }
}

/// `["uuid", "<id>"]`
pub fn uuid(id: &Uuid) -> Value {
    json!([UUID, id.to_string()])
}

/// `["named-uuid", "<name>"]`, a reference to a row inserted earlier in the
/// same transaction.
pub fn named_uuid(name: &str) -> Value {
    json!([NAMED_UUID, name])
}

pub fn set<I: IntoIterator<Item = Value>>(atoms: I) -> Value {
    json!([SET, atoms.into_iter().collect::<Vec<_>>()])
}

pub fn empty_set() -> Value {
    set(std::iter::empty())
}

pub fn map<K, V, I>(pairs: I) -> Value
where
    K: Into<String>,
    V: Into<String>,
    I: IntoIterator<Item = (K, V)>,
{
    let pairs: Vec<Value> = pairs
        .into_iter()
        .map(|(k, v)| json!([k.into(), v.into()]))
        .collect();
    json!([MAP, pairs])
}

/// Decode a `["uuid", "<id>"]` atom.
pub fn as_uuid(v: &Value) -> Option<Uuid> {
    tagged(v, UUID)?.as_str()?.parse().ok()
}

/// Decode the name carried by a `["named-uuid", "<name>"]` atom.
pub fn as_named_uuid(v: &Value) -> Option<&str> {
    tagged(v, NAMED_UUID)?.as_str()
}

/// Flatten a datum into its atoms: the members of a set, the `[key, value]`
/// pairs of a map, or the datum itself when it is a single atom.
pub fn atoms(v: &Value) -> Vec<Value> {
    if let Some(inner) = tagged(v, SET).or_else(|| tagged(v, MAP)) {
        return inner.as_array().cloned().unwrap_or_default();
    }
    vec![v.clone()]
}

/// Decode a set of UUIDs. A lone `["uuid", ..]` atom is a one-element set.
pub fn as_uuid_set(v: &Value) -> Option<Vec<Uuid>> {
    if tagged(v, MAP).is_some() {
        return None;
    }
    atoms(v).iter().map(as_uuid).collect()
}

/// Decode a set of strings. A lone string is a one-element set.
pub fn as_string_set(v: &Value) -> Option<Vec<String>> {
    if tagged(v, MAP).is_some() {
        return None;
    }
    atoms(v)
        .into_iter()
        .map(|a| a.as_str().map(str::to_string))
        .collect()
}

/// Decode an optional boolean column, which is a set of zero or one boolean.
pub fn as_optional_bool(v: &Value) -> Option<Option<bool>> {
    match atoms(v).as_slice() {
        [] => Some(None),
        [Value::Bool(b)] => Some(Some(*b)),
        _ => None,
    }
}

/// Decode a map with string keys and string values.
pub fn as_string_map(v: &Value) -> Option<BTreeMap<String, String>> {
    let inner = tagged(v, MAP)?.as_array()?;
    inner
        .iter()
        .map(|pair| match pair.as_array().map(Vec::as_slice) {
            Some([Value::String(k), Value::String(v)]) => {
                Some((k.clone(), v.clone()))
            }
            _ => None,
        })
        .collect()
}

/// Compare two datums as OVSDB does: sets and maps are unordered, and a
/// one-element set equals its sole member.
pub fn datum_eq(a: &Value, b: &Value) -> bool {
    canonical(a) == canonical(b)
}

fn canonical(v: &Value) -> Vec<String> {
    let mut atoms: Vec<String> =
        atoms(v).iter().map(Value::to_string).collect();
    atoms.sort();
    atoms
}

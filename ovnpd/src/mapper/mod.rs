// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Translation between REST entities and northbound rows.
//!
//! Every handler is a [`Pipeline`] of the same five steps, always run in this
//! order: decode the request, validate it, map it to the arguments of a
//! northbound call, make the call, and map the result back to a REST
//! document. No step catches the errors of another.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::dispatch::Handler;
use crate::dispatch::Input;
use crate::nb::NbClient;
use crate::types::ProviderError;
use crate::types::ProviderResult;

pub mod network;
pub mod port;
pub mod subnet;

pub struct Pipeline<I, A, O> {
    pub decode: fn(Input) -> ProviderResult<I>,
    pub validate: fn(&NbClient, &I) -> ProviderResult<()>,
    pub map_from_rest: fn(I) -> ProviderResult<A>,
    pub call: fn(&NbClient, A) -> ProviderResult<O>,
    pub map_to_rest: fn(O) -> ProviderResult<Option<Value>>,
}

impl<I, A, O> Handler for Pipeline<I, A, O> {
    fn handle(
        &self,
        nb: &NbClient,
        input: Input,
    ) -> ProviderResult<Option<Value>> {
        let input = (self.decode)(input)?;
        (self.validate)(nb, &input)?;
        let args = (self.map_from_rest)(input)?;
        let out = (self.call)(nb, args)?;
        (self.map_to_rest)(out)
    }
}

/// A REST entity that can arrive in a request body.
pub trait Entity: DeserializeOwned {
    /// The key wrapping the entity in a request, e.g. `network`.
    const KEY: &'static str;
}

/// The entity in a request body, either wrapped as `{"<key>": {...}}` or
/// given bare.
pub fn entity<T: Entity>(body: Option<Value>) -> ProviderResult<T> {
    let body = body.unwrap_or_else(|| Value::Object(Default::default()));
    let inner = match body {
        Value::Object(mut obj) if obj.len() == 1 && obj.contains_key(T::KEY) => {
            obj.remove(T::KEY).unwrap_or_default()
        }
        other => other,
    };
    Ok(serde_json::from_value(inner)?)
}

pub fn no_input(_input: Input) -> ProviderResult<()> {
    Ok(())
}

pub fn id_only(input: Input) -> ProviderResult<String> {
    input.id.ok_or(ProviderError::MissingId("Show"))
}

pub fn body_only<T: Entity>(input: Input) -> ProviderResult<T> {
    entity(input.body)
}

pub fn id_and_body<T: Entity>(input: Input) -> ProviderResult<(String, T)> {
    let id = input.id.ok_or(ProviderError::MissingId("Update"))?;
    Ok((id, entity(input.body)?))
}

pub fn no_validation<I>(_nb: &NbClient, _input: &I) -> ProviderResult<()> {
    Ok(())
}

pub fn unchanged<I>(input: I) -> ProviderResult<I> {
    Ok(input)
}

pub fn empty<T>(_out: T) -> ProviderResult<Option<Value>> {
    Ok(None)
}

/// `{"<key>": <value>}`
pub fn envelope<T: Serialize>(key: &str, value: T) -> ProviderResult<Option<Value>> {
    let value = serde_json::to_value(value).map_err(|e| {
        ProviderError::Other(format!("encoding {key} response: {e}"))
    })?;
    let mut obj = serde_json::Map::new();
    obj.insert(key.to_string(), value);
    Ok(Some(Value::Object(obj)))
}

/// Fail with a request data error naming `field` if it is absent or empty.
pub fn required<'a>(
    field: &str,
    value: &'a Option<String>,
) -> ProviderResult<&'a str> {
    match value.as_deref() {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ProviderError::RestData(format!(
            "Missing required field: {field}"
        ))),
    }
}

/// Fail unless `value`, when present, parses as a `T`.
pub fn parsed<T: std::str::FromStr>(
    field: &str,
    value: &Option<String>,
) -> ProviderResult<Option<T>> {
    value
        .as_deref()
        .map(|v| {
            v.parse().map_err(|_| {
                ProviderError::RestData(format!("Invalid {field}: {v}"))
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Thing {
        name: Option<String>,
    }

    impl Entity for Thing {
        const KEY: &'static str = "thing";
    }

    #[test]
    fn test_entity_envelope() {
        let wrapped: Thing = entity(Some(json!({"thing": {"name": "a"}}))).unwrap();
        let bare: Thing = entity(Some(json!({"name": "a"}))).unwrap();
        assert_eq!(wrapped, bare);

        let none: Thing = entity(None).unwrap();
        assert_eq!(none, Thing { name: None });

        assert!(matches!(
            entity::<Thing>(Some(json!("a"))),
            Err(ProviderError::RestData(_))
        ));
    }

    #[test]
    fn test_required_and_parsed() {
        assert_eq!(required("name", &Some("a".into())).unwrap(), "a");
        assert!(required("name", &Some(String::new())).is_err());
        assert!(required("name", &None).is_err());

        let ip: Option<std::net::IpAddr> =
            parsed("gateway_ip", &Some("10.0.0.1".into())).unwrap();
        assert!(ip.is_some());
        assert!(parsed::<std::net::IpAddr>("gateway_ip", &None)
            .unwrap()
            .is_none());
        match parsed::<std::net::IpAddr>("gateway_ip", &Some("x".into())) {
            Err(ProviderError::RestData(msg)) => {
                assert_eq!(msg, "Invalid gateway_ip: x")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Networks, stored as `Logical_Switch` rows.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use super::*;
use crate::dispatch::HandlerRegistry;
use crate::dispatch::Operation;
use crate::dispatch::ResourceKind;
use crate::nb::LogicalSwitch;

const KEY: &str = "network";
const LIST_KEY: &str = "networks";

/// A network as it arrives in a create or update request.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct NetworkRequest {
    #[serde(default)]
    pub name: Option<String>,
}

impl Entity for NetworkRequest {
    const KEY: &'static str = KEY;
}

/// A network as it is returned.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Network {
    pub id: String,
    pub name: String,
}

impl From<LogicalSwitch> for Network {
    fn from(ls: LogicalSwitch) -> Self {
        Network {
            id: ls.id.to_string(),
            name: ls.name,
        }
    }
}

fn not_found(id: &str) -> ProviderError {
    ProviderError::NotFound(format!("Network {id} does not exist"))
}

// Re-read the network, failing if it is gone.
fn existing(nb: &NbClient, id: &str) -> ProviderResult<LogicalSwitch> {
    nb.get_network(id)?.ok_or_else(|| not_found(id))
}

fn validate_add(_nb: &NbClient, request: &NetworkRequest) -> ProviderResult<()> {
    required("name", &request.name)?;
    Ok(())
}

fn validate_update(
    nb: &NbClient,
    (id, request): &(String, NetworkRequest),
) -> ProviderResult<()> {
    required("name", &request.name)?;
    existing(nb, id)?;
    Ok(())
}

fn validate_delete(nb: &NbClient, id: &String) -> ProviderResult<()> {
    if !existing(nb, id)?.ports.is_empty() {
        return Err(crate::nb::ports_exist(id));
    }
    Ok(())
}

fn map_from_rest(request: NetworkRequest) -> ProviderResult<String> {
    Ok(required("name", &request.name)?.to_string())
}

fn map_update_from_rest(
    (id, request): (String, NetworkRequest),
) -> ProviderResult<(String, String)> {
    Ok((id, map_from_rest(request)?))
}

fn map_to_rest(ls: LogicalSwitch) -> ProviderResult<Option<Value>> {
    envelope(KEY, Network::from(ls))
}

fn map_list_to_rest(switches: Vec<LogicalSwitch>) -> ProviderResult<Option<Value>> {
    envelope(
        LIST_KEY,
        switches.into_iter().map(Network::from).collect::<Vec<_>>(),
    )
}

fn list(nb: &NbClient, _: ()) -> ProviderResult<Vec<LogicalSwitch>> {
    nb.list_networks()
}

fn show(nb: &NbClient, id: String) -> ProviderResult<LogicalSwitch> {
    existing(nb, &id)
}

fn add(nb: &NbClient, name: String) -> ProviderResult<LogicalSwitch> {
    nb.add_network(&name)
}

fn update(
    nb: &NbClient,
    (id, name): (String, String),
) -> ProviderResult<LogicalSwitch> {
    nb.update_network(&id, &name)?.ok_or_else(|| not_found(&id))
}

fn delete(nb: &NbClient, id: String) -> ProviderResult<()> {
    nb.delete_network(&id)
}

pub fn register(registry: &mut HandlerRegistry) {
    let kind = ResourceKind::Networks;
    registry.register(
        Operation::List,
        kind,
        Pipeline {
            decode: no_input,
            validate: no_validation,
            map_from_rest: unchanged,
            call: list,
            map_to_rest: map_list_to_rest,
        },
    );
    registry.register(
        Operation::Show,
        kind,
        Pipeline {
            decode: id_only,
            validate: no_validation,
            map_from_rest: unchanged,
            call: show,
            map_to_rest,
        },
    );
    registry.register(
        Operation::Create,
        kind,
        Pipeline {
            decode: body_only::<NetworkRequest>,
            validate: validate_add,
            map_from_rest,
            call: add,
            map_to_rest,
        },
    );
    registry.register(
        Operation::Update,
        kind,
        Pipeline {
            decode: id_and_body::<NetworkRequest>,
            validate: validate_update,
            map_from_rest: map_update_from_rest,
            call: update,
            map_to_rest,
        },
    );
    registry.register(
        Operation::Delete,
        kind,
        Pipeline {
            decode: id_only,
            validate: validate_delete,
            map_from_rest: unchanged,
            call: delete,
            map_to_rest: empty,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nb::tests::attach_port;
    use crate::nb::tests::memory_nb;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_validate_add() {
        let (nb, _db) = memory_nb();
        assert!(validate_add(&nb, &NetworkRequest { name: Some("n".into()) }).is_ok());
        match validate_add(&nb, &NetworkRequest::default()) {
            Err(ProviderError::RestData(msg)) => assert!(msg.contains("name")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_validate_update_rereads() {
        let (nb, _db) = memory_nb();
        let missing = uuid::Uuid::new_v4().to_string();
        let req = NetworkRequest {
            name: Some("net2".into()),
        };
        assert!(matches!(
            validate_update(&nb, &(missing, req.clone())),
            Err(ProviderError::NotFound(_))
        ));

        let ls = nb.add_network("net1").unwrap();
        validate_update(&nb, &(ls.id.to_string(), req)).unwrap();
    }

    #[test]
    fn test_validate_delete() {
        let (nb, db) = memory_nb();
        let ls = nb.add_network("net1").unwrap();
        let id = ls.id.to_string();
        validate_delete(&nb, &id).unwrap();

        attach_port(&db, &ls.id);
        assert!(matches!(
            validate_delete(&nb, &id),
            Err(ProviderError::RestData(_))
        ));
        assert!(matches!(
            validate_delete(&nb, &uuid::Uuid::new_v4().to_string()),
            Err(ProviderError::NotFound(_))
        ));
    }

    // A network read back and submitted unchanged as an update names the same
    // network with the same name.
    #[test]
    fn test_round_trip() {
        let (nb, _db) = memory_nb();
        let ls = nb.add_network("net1").unwrap();

        let rest = map_to_rest(ls.clone()).unwrap().unwrap();
        let network: Network =
            serde_json::from_value(rest[KEY].clone()).unwrap();
        let input = Input {
            id: Some(network.id.clone()),
            body: Some(json!({"network": serde_json::to_value(&network).unwrap()})),
        };
        let decoded = id_and_body::<NetworkRequest>(input).unwrap();
        validate_update(&nb, &decoded).unwrap();
        let (id, name) = map_update_from_rest(decoded).unwrap();

        assert_eq!(id, ls.id.to_string());
        assert_eq!(name, ls.name);
    }

    #[test]
    fn test_list_to_rest() {
        let (nb, _db) = memory_nb();
        let a = nb.add_network("a").unwrap();
        let doc = map_list_to_rest(vec![a.clone()]).unwrap().unwrap();
        assert_eq!(
            doc,
            json!({"networks": [{"id": a.id.to_string(), "name": "a"}]})
        );
        assert_eq!(
            map_list_to_rest(vec![]).unwrap().unwrap(),
            json!({"networks": []})
        );
    }
}

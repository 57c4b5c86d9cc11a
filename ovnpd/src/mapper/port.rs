// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Ports, stored as `Logical_Switch_Port` rows.

use common::network::MacAddr;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use super::*;
use crate::dispatch::HandlerRegistry;
use crate::dispatch::Operation;
use crate::dispatch::ResourceKind;
use crate::nb;
use crate::nb::LogicalSwitchPort;
use crate::nb::PortArgs;
use crate::nb::PortUpdateArgs;

const KEY: &str = "port";
const LIST_KEY: &str = "ports";

const STATUS_ACTIVE: &str = "ACTIVE";
const STATUS_DOWN: &str = "DOWN";

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct PortRequest {
    #[serde(default)]
    pub network_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub admin_state_up: Option<bool>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub device_owner: Option<String>,
}

impl Entity for PortRequest {
    const KEY: &'static str = KEY;
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Port {
    pub id: String,
    pub name: String,
    pub network_id: String,
    pub mac_address: Option<String>,
    pub admin_state_up: bool,
    pub status: String,
    pub device_id: Option<String>,
    pub device_owner: Option<String>,
}

impl From<LogicalSwitchPort> for Port {
    fn from(lsp: LogicalSwitchPort) -> Self {
        let external = |key: &str| lsp.external_ids.get(key).cloned();
        Port {
            id: lsp.id.to_string(),
            mac_address: lsp.mac().map(|m| m.to_string()),
            network_id: external(nb::EXTERNAL_ID_NETWORK_ID)
                .unwrap_or_default(),
            device_id: external(nb::EXTERNAL_ID_DEVICE_ID),
            device_owner: external(nb::EXTERNAL_ID_DEVICE_OWNER),
            // An unset `enabled` column means the port is enabled.
            admin_state_up: lsp.enabled.unwrap_or(true),
            status: if lsp.up == Some(true) {
                STATUS_ACTIVE
            } else {
                STATUS_DOWN
            }
            .to_string(),
            name: lsp.name,
        }
    }
}

fn not_found(id: &str) -> ProviderError {
    ProviderError::NotFound(format!("Port {id} does not exist"))
}

fn existing(nb: &NbClient, id: &str) -> ProviderResult<LogicalSwitchPort> {
    nb.get_port(id)?.ok_or_else(|| not_found(id))
}

fn network_exists(nb: &NbClient, network_id: &str) -> ProviderResult<()> {
    match nb.get_network(network_id)? {
        Some(_) => Ok(()),
        None => Err(ProviderError::NotFound(format!(
            "Network {network_id} does not exist"
        ))),
    }
}

fn validate_add(nb: &NbClient, request: &PortRequest) -> ProviderResult<()> {
    let network_id = required("network_id", &request.network_id)?;
    required("name", &request.name)?;
    parsed::<MacAddr>("mac_address", &request.mac_address)?;
    network_exists(nb, network_id)
}

fn validate_update(
    nb: &NbClient,
    (id, request): &(String, PortRequest),
) -> ProviderResult<()> {
    parsed::<MacAddr>("mac_address", &request.mac_address)?;
    if let Some(network_id) = request.network_id.as_deref() {
        network_exists(nb, network_id)?;
    }
    existing(nb, id)?;
    Ok(())
}

fn validate_delete(nb: &NbClient, id: &String) -> ProviderResult<()> {
    existing(nb, id)?;
    Ok(())
}

fn map_from_rest(request: PortRequest) -> ProviderResult<PortArgs> {
    Ok(PortArgs {
        network_id: required("network_id", &request.network_id)?.to_string(),
        name: required("name", &request.name)?.to_string(),
        mac: parsed("mac_address", &request.mac_address)?,
        is_enabled: request.admin_state_up,
        is_up: None,
        external_device_id: request.device_id,
        external_owner: request.device_owner,
    })
}

fn map_update_from_rest(
    (id, request): (String, PortRequest),
) -> ProviderResult<(String, PortUpdateArgs)> {
    let args = PortUpdateArgs {
        mac: parsed("mac_address", &request.mac_address)?,
        network_id: request.network_id,
        name: request.name,
        is_enabled: request.admin_state_up,
        is_up: None,
        external_device_id: request.device_id,
        external_owner: request.device_owner,
    };
    Ok((id, args))
}

fn map_to_rest(lsp: Option<LogicalSwitchPort>) -> ProviderResult<Option<Value>> {
    envelope(KEY, lsp.map(Port::from))
}

fn map_list_to_rest(
    ports: Vec<LogicalSwitchPort>,
) -> ProviderResult<Option<Value>> {
    envelope(LIST_KEY, ports.into_iter().map(Port::from).collect::<Vec<_>>())
}

fn list(nb: &NbClient, _: ()) -> ProviderResult<Vec<LogicalSwitchPort>> {
    nb.list_ports()
}

fn show(
    nb: &NbClient,
    id: String,
) -> ProviderResult<Option<LogicalSwitchPort>> {
    existing(nb, &id).map(Some)
}

fn add(
    nb: &NbClient,
    args: PortArgs,
) -> ProviderResult<Option<LogicalSwitchPort>> {
    nb.add_port(args)
}

fn update(
    nb: &NbClient,
    (id, args): (String, PortUpdateArgs),
) -> ProviderResult<Option<LogicalSwitchPort>> {
    let mac = args.mac;
    let port = nb.update_port(&id, args)?;
    if let Some(mac) = mac {
        nb.update_port_mac(&id, mac)?;
    }
    Ok(port)
}

fn delete(nb: &NbClient, id: String) -> ProviderResult<()> {
    nb.delete_port(&id)
}

pub fn register(registry: &mut HandlerRegistry) {
    let kind = ResourceKind::Ports;
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
            decode: body_only::<PortRequest>,
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
            decode: id_and_body::<PortRequest>,
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
    use std::collections::BTreeMap;

    use super::*;
    use crate::nb::tests::memory_nb;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use uuid::Uuid;

    fn request(network_id: &str) -> PortRequest {
        PortRequest {
            network_id: Some(network_id.to_string()),
            name: Some("port1".into()),
            mac_address: Some("00:1a:4a:16:01:51".into()),
            ..Default::default()
        }
    }

    fn rest_data(result: ProviderResult<()>) -> String {
        match result {
            Err(ProviderError::RestData(msg)) => msg,
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_validate_add() {
        let (nb, _db) = memory_nb();
        let ls = nb.add_network("net1").unwrap();
        let network_id = ls.id.to_string();
        validate_add(&nb, &request(&network_id)).unwrap();

        let mut req = request(&network_id);
        req.name = None;
        assert!(rest_data(validate_add(&nb, &req)).contains("name"));

        let mut req = request(&network_id);
        req.network_id = None;
        assert!(rest_data(validate_add(&nb, &req)).contains("network_id"));

        let mut req = request(&network_id);
        req.mac_address = Some("00:1a:4a".into());
        assert_eq!(
            rest_data(validate_add(&nb, &req)),
            "Invalid mac_address: 00:1a:4a"
        );

        match validate_add(&nb, &request(&Uuid::new_v4().to_string())) {
            Err(ProviderError::NotFound(msg)) => {
                assert!(msg.starts_with("Network "))
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_update_and_delete_reread() {
        let (nb, _db) = memory_nb();
        match validate_update(&nb, &("p1".into(), PortRequest::default())) {
            Err(ProviderError::NotFound(msg)) => {
                assert_eq!(msg, "Port p1 does not exist")
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(
            validate_delete(&nb, &"p1".to_string()),
            Err(ProviderError::NotFound(_))
        ));
    }

    #[test]
    fn test_map_from_rest() {
        let network_id = Uuid::new_v4().to_string();
        let mut req = request(&network_id);
        req.admin_state_up = Some(false);
        req.device_id = Some("vm1".into());
        let args = map_from_rest(req).unwrap();
        assert_eq!(args.network_id, network_id);
        assert_eq!(args.name, "port1");
        assert_eq!(args.mac, Some(MacAddr::new(0x00, 0x1a, 0x4a, 0x16, 0x01, 0x51)));
        assert_eq!(args.is_enabled, Some(false));
        assert_eq!(args.external_device_id.as_deref(), Some("vm1"));

        let (id, update) =
            map_update_from_rest(("p1".into(), PortRequest::default())).unwrap();
        assert_eq!(id, "p1");
        assert_eq!(update, PortUpdateArgs::default());
    }

    #[test]
    fn test_port_view() {
        let id = Uuid::new_v4();
        let mut external_ids = BTreeMap::new();
        external_ids
            .insert(nb::EXTERNAL_ID_NETWORK_ID.to_string(), "net".to_string());
        external_ids
            .insert(nb::EXTERNAL_ID_DEVICE_ID.to_string(), "vm1".to_string());
        let lsp = LogicalSwitchPort {
            id,
            name: "port1".into(),
            addresses: vec!["00:1a:4a:16:01:51 10.0.0.5".into()],
            enabled: None,
            up: Some(true),
            external_ids,
        };
        assert_eq!(
            map_to_rest(Some(lsp)).unwrap().unwrap(),
            json!({"port": {
                "id": id.to_string(),
                "name": "port1",
                "network_id": "net",
                "mac_address": "00:1a:4a:16:01:51",
                "admin_state_up": true,
                "status": "ACTIVE",
                "device_id": "vm1",
                "device_owner": null,
            }})
        );
        assert_eq!(map_to_rest(None).unwrap().unwrap(), json!({"port": null}));
    }

    #[test]
    fn test_placeholder_operations() {
        let (nb, _db) = memory_nb();
        assert_eq!(
            map_list_to_rest(list(&nb, ()).unwrap()).unwrap().unwrap(),
            json!({"ports": []})
        );
        let args = map_from_rest(request("net")).unwrap();
        assert_eq!(add(&nb, args).unwrap(), None);
        delete(&nb, "p1".into()).unwrap();
    }
}

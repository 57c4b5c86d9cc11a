// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Subnets, stored as `DHCP_Options` rows.

use std::net::IpAddr;

use oxnet::IpNet;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use super::*;
use crate::dispatch::HandlerRegistry;
use crate::dispatch::Operation;
use crate::dispatch::ResourceKind;
use crate::nb;
use crate::nb::DhcpOptions;
use crate::nb::SubnetArgs;
use crate::nb::SubnetUpdateArgs;

const KEY: &str = "subnet";
const LIST_KEY: &str = "subnets";

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct SubnetRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub cidr: Option<String>,
    #[serde(default)]
    pub network_id: Option<String>,
    #[serde(default)]
    pub dns_nameservers: Option<Vec<String>>,
    #[serde(default)]
    pub gateway_ip: Option<String>,
}

impl Entity for SubnetRequest {
    const KEY: &'static str = KEY;
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Subnet {
    pub id: String,
    pub name: String,
    pub cidr: String,
    pub network_id: String,
    pub dns_nameservers: Vec<String>,
    pub gateway_ip: Option<String>,
    pub ip_version: u8,
}

impl From<DhcpOptions> for Subnet {
    fn from(dhcp: DhcpOptions) -> Self {
        let external = |key: &str| {
            dhcp.external_ids.get(key).cloned().unwrap_or_default()
        };
        let ip_version = match dhcp
            .cidr
            .split('/')
            .next()
            .and_then(|addr| addr.parse::<IpAddr>().ok())
        {
            Some(IpAddr::V6(_)) => 6,
            _ => 4,
        };
        Subnet {
            id: dhcp.id.to_string(),
            name: external(nb::EXTERNAL_ID_NAME),
            network_id: external(nb::EXTERNAL_ID_NETWORK_ID),
            dns_nameservers: dhcp.dns_servers(),
            gateway_ip: dhcp.options.get(DhcpOptions::ROUTER).cloned(),
            ip_version,
            cidr: dhcp.cidr,
        }
    }
}

fn not_found(id: &str) -> ProviderError {
    ProviderError::NotFound(format!("Subnet {id} does not exist"))
}

fn existing(nb: &NbClient, id: &str) -> ProviderResult<DhcpOptions> {
    nb.get_subnet(id)?.ok_or_else(|| not_found(id))
}

fn dns_servers(
    servers: &Option<Vec<String>>,
) -> ProviderResult<Option<Vec<IpAddr>>> {
    servers
        .as_ref()
        .map(|servers| {
            servers
                .iter()
                .map(|s| {
                    s.parse().map_err(|_| {
                        ProviderError::RestData(format!(
                            "Invalid dns_nameservers: {s}"
                        ))
                    })
                })
                .collect()
        })
        .transpose()
}

// Field checks shared by add and update.
fn validate_fields(request: &SubnetRequest) -> ProviderResult<()> {
    parsed::<IpNet>("cidr", &request.cidr)?;
    parsed::<IpAddr>("gateway_ip", &request.gateway_ip)?;
    dns_servers(&request.dns_nameservers)?;
    Ok(())
}

fn validate_add(nb: &NbClient, request: &SubnetRequest) -> ProviderResult<()> {
    required("name", &request.name)?;
    required("cidr", &request.cidr)?;
    let network_id = required("network_id", &request.network_id)?;
    validate_fields(request)?;
    match nb.get_network(network_id)? {
        Some(_) => Ok(()),
        None => Err(ProviderError::NotFound(format!(
            "Network {network_id} does not exist"
        ))),
    }
}

fn validate_update(
    nb: &NbClient,
    (id, request): &(String, SubnetRequest),
) -> ProviderResult<()> {
    validate_fields(request)?;
    existing(nb, id)?;
    Ok(())
}

fn validate_delete(nb: &NbClient, id: &String) -> ProviderResult<()> {
    existing(nb, id)?;
    Ok(())
}

fn map_from_rest(request: SubnetRequest) -> ProviderResult<SubnetArgs> {
    let cidr = parsed("cidr", &request.cidr)?.ok_or_else(|| {
        ProviderError::RestData("Missing required field: cidr".to_string())
    })?;
    Ok(SubnetArgs {
        name: required("name", &request.name)?.to_string(),
        cidr,
        network_id: required("network_id", &request.network_id)?.to_string(),
        dns: dns_servers(&request.dns_nameservers)?.unwrap_or_default(),
        gateway: parsed("gateway_ip", &request.gateway_ip)?,
    })
}

fn map_update_from_rest(
    (id, request): (String, SubnetRequest),
) -> ProviderResult<(String, SubnetUpdateArgs)> {
    let args = SubnetUpdateArgs {
        cidr: parsed("cidr", &request.cidr)?,
        dns: dns_servers(&request.dns_nameservers)?,
        gateway: parsed("gateway_ip", &request.gateway_ip)?,
        name: request.name,
    };
    Ok((id, args))
}

fn map_to_rest(dhcp: Option<DhcpOptions>) -> ProviderResult<Option<Value>> {
    envelope(KEY, dhcp.map(Subnet::from))
}

fn map_list_to_rest(subnets: Vec<DhcpOptions>) -> ProviderResult<Option<Value>> {
    envelope(
        LIST_KEY,
        subnets.into_iter().map(Subnet::from).collect::<Vec<_>>(),
    )
}

fn list(nb: &NbClient, _: ()) -> ProviderResult<Vec<DhcpOptions>> {
    nb.list_subnets()
}

fn show(nb: &NbClient, id: String) -> ProviderResult<Option<DhcpOptions>> {
    existing(nb, &id).map(Some)
}

fn add(nb: &NbClient, args: SubnetArgs) -> ProviderResult<Option<DhcpOptions>> {
    nb.add_subnet(args)
}

fn update(
    nb: &NbClient,
    (id, args): (String, SubnetUpdateArgs),
) -> ProviderResult<Option<DhcpOptions>> {
    nb.update_subnet(&id, args)
}

fn delete(nb: &NbClient, id: String) -> ProviderResult<()> {
    nb.delete_subnet(&id)
}

pub fn register(registry: &mut HandlerRegistry) {
    let kind = ResourceKind::Subnets;
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
            decode: body_only::<SubnetRequest>,
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
            decode: id_and_body::<SubnetRequest>,
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

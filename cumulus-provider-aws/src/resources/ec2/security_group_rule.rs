//! ec2.security_group_rule resource
//!
//! A rule is one ingress or egress permission of a security group. AWS has
//! no id for it, so the state identifier spells out the permission fields
//! (see [`SecurityGroupRuleAddress`]).

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_ec2::types::{IpPermission, IpRange, Ipv6Range, PrefixListId, UserIdGroupPair};
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use cumulus_core::provider::{ProviderError, ProviderResult};
use cumulus_core::resource::{AttributeMap, Resource, ResourceId, State, Value};
use cumulus_core::schema::ResourceSchema;

use super::protocol::protocol_for_value;
use super::security_group::find_security_group;
use crate::config::AwsClient;
use crate::error::{is_aws_err, sdk_error};
use crate::id::{SecurityGroupRuleAddress, parse_security_group_rule_id};
use crate::resources::{ResourceHandler, changed_value, read_after_create};
use crate::schemas::ec2::security_group_rule_schema;

pub struct SecurityGroupRuleHandler;

/// `6` and `tcp` name the same protocol, as do `-1` and `all`
pub fn suppress_equivalent_protocol(old: &Value, new: &Value) -> bool {
    match (old.as_str(), new.as_str()) {
        (Some(old), Some(new)) => protocol_for_value(old) == protocol_for_value(new),
        _ => false,
    }
}

/// The permission a configured rule describes
pub fn rule_address(resource: &Resource) -> ProviderResult<SecurityGroupRuleAddress> {
    let address = SecurityGroupRuleAddress {
        security_group_id: resource.require_str("security_group_id")?.to_string(),
        rule_type: resource.require_str("type")?.to_string(),
        protocol: protocol_for_value(resource.require_str("protocol")?),
        from_port: resource.get_int("from_port").unwrap_or_default(),
        to_port: resource.get_int("to_port").unwrap_or_default(),
        cidr_blocks: resource.get_string_list("cidr_blocks"),
        ipv6_cidr_blocks: resource.get_string_list("ipv6_cidr_blocks"),
        prefix_list_ids: resource.get_string_list("prefix_list_ids"),
        source_security_group_id: resource.get_str("source_security_group_id").map(String::from),
        self_referencing: resource.get_bool("self").unwrap_or(false),
    };

    if address.protocol == "-1" && (address.from_port != 0 || address.to_port != 0) {
        return Err(ProviderError::new(format!(
            "from_port ({}) and to_port ({}) must both be 0 to use the 'ALL' \"-1\" protocol!",
            address.from_port, address.to_port
        ))
        .for_resource(resource.id.clone()));
    }
    if address.cidr_blocks.is_empty()
        && address.ipv6_cidr_blocks.is_empty()
        && address.prefix_list_ids.is_empty()
        && address.source_groups().is_empty()
    {
        return Err(ProviderError::new(
            "One of cidr_blocks, ipv6_cidr_blocks, prefix_list_ids, self or source_security_group_id must be set",
        )
        .for_resource(resource.id.clone()));
    }
    Ok(address)
}

/// Source group pair; `{account}/{group}` names a group of another account
fn group_pair(source: &str, description: Option<&str>) -> UserIdGroupPair {
    let pair = match source.split_once('/') {
        Some((user_id, group_id)) => UserIdGroupPair::builder().user_id(user_id).group_id(group_id),
        None => UserIdGroupPair::builder().group_id(source),
    };
    pair.set_description(description.map(String::from)).build()
}

pub fn ip_permission(address: &SecurityGroupRuleAddress, description: Option<&str>) -> IpPermission {
    let description = description.map(String::from);
    IpPermission::builder()
        .ip_protocol(&address.protocol)
        .from_port(address.from_port as i32)
        .to_port(address.to_port as i32)
        .set_ip_ranges(Some(
            address
                .cidr_blocks
                .iter()
                .map(|cidr| {
                    IpRange::builder()
                        .cidr_ip(cidr)
                        .set_description(description.clone())
                        .build()
                })
                .collect(),
        ))
        .set_ipv6_ranges(Some(
            address
                .ipv6_cidr_blocks
                .iter()
                .map(|cidr| {
                    Ipv6Range::builder()
                        .cidr_ipv6(cidr)
                        .set_description(description.clone())
                        .build()
                })
                .collect(),
        ))
        .set_prefix_list_ids(Some(
            address
                .prefix_list_ids
                .iter()
                .map(|id| {
                    PrefixListId::builder()
                        .prefix_list_id(id)
                        .set_description(description.clone())
                        .build()
                })
                .collect(),
        ))
        .set_user_id_group_pairs(Some(
            address
                .source_groups()
                .into_iter()
                .map(|group| group_pair(group, description.as_deref()))
                .collect(),
        ))
        .build()
}

/// Whether `permission` covers every source of the rule
pub fn permission_matches(permission: &IpPermission, address: &SecurityGroupRuleAddress) -> bool {
    if protocol_for_value(permission.ip_protocol().unwrap_or_default()) != address.protocol {
        return false;
    }
    // Ports are omitted for the all-protocols rule
    if address.protocol != "-1"
        && (permission.from_port().map(i64::from) != Some(address.from_port)
            || permission.to_port().map(i64::from) != Some(address.to_port))
    {
        return false;
    }

    let has_cidrs = address
        .cidr_blocks
        .iter()
        .all(|cidr| permission.ip_ranges().iter().any(|r| r.cidr_ip() == Some(cidr.as_str())));
    let has_ipv6 = address
        .ipv6_cidr_blocks
        .iter()
        .all(|cidr| permission.ipv6_ranges().iter().any(|r| r.cidr_ipv6() == Some(cidr.as_str())));
    let has_prefix_lists = address.prefix_list_ids.iter().all(|id| {
        permission
            .prefix_list_ids()
            .iter()
            .any(|p| p.prefix_list_id() == Some(id.as_str()))
    });
    let has_groups = address.source_groups().into_iter().all(|source| {
        let group_id = source.rsplit('/').next().unwrap_or(source);
        permission
            .user_id_group_pairs()
            .iter()
            .any(|pair| pair.group_id() == Some(group_id))
    });

    has_cidrs && has_ipv6 && has_prefix_lists && has_groups
}

/// Description attached to the rule's sources, if any
fn permission_description(permission: &IpPermission) -> Option<String> {
    permission
        .ip_ranges()
        .iter()
        .filter_map(|r| r.description())
        .chain(permission.ipv6_ranges().iter().filter_map(|r| r.description()))
        .chain(permission.prefix_list_ids().iter().filter_map(|p| p.description()))
        .chain(permission.user_id_group_pairs().iter().filter_map(|p| p.description()))
        .next()
        .map(String::from)
}

fn address_state(id: &ResourceId, address: &SecurityGroupRuleAddress) -> State {
    let mut attributes = HashMap::new();
    attributes.insert("type".to_string(), Value::from(address.rule_type.as_str()));
    attributes.insert(
        "security_group_id".to_string(),
        Value::from(address.security_group_id.as_str()),
    );
    attributes.insert("protocol".to_string(), Value::from(address.protocol.as_str()));
    attributes.insert("from_port".to_string(), Value::Int(address.from_port));
    attributes.insert("to_port".to_string(), Value::Int(address.to_port));
    attributes.insert("cidr_blocks".to_string(), Value::string_list(address.cidr_blocks.clone()));
    attributes.insert(
        "ipv6_cidr_blocks".to_string(),
        Value::string_list(address.ipv6_cidr_blocks.clone()),
    );
    attributes.insert(
        "prefix_list_ids".to_string(),
        Value::string_list(address.prefix_list_ids.clone()),
    );
    attributes.insert("self".to_string(), Value::Bool(address.self_referencing));
    attributes.insert("rule_id".to_string(), Value::from(address.rule_id()));

    let mut state = State::existing(id.clone(), attributes).with_identifier(address.id());
    state.set_opt("source_security_group_id", address.source_security_group_id.clone());
    state
}

/// Authorize failures; a duplicate rule gets a hint on how to adopt it
fn authorize_error<E>(err: E, address: &SecurityGroupRuleAddress) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    if is_aws_err(&err, "InvalidPermission.Duplicate", "") {
        return ProviderError::new(format!(
            "A duplicate Security Group rule was found on ({}). The rule may have been \
             added outside this configuration; import it as {} or remove it",
            address.security_group_id,
            address.id()
        ))
        .with_cause(err);
    }
    sdk_error(
        &format!(
            "Failed to authorize security group rule on {}",
            address.security_group_id
        ),
        err,
    )
}

#[async_trait]
impl ResourceHandler for SecurityGroupRuleHandler {
    fn resource_type(&self) -> &'static str {
        "ec2.security_group_rule"
    }

    fn schema(&self) -> ResourceSchema {
        security_group_rule_schema()
    }

    async fn create(&self, client: &AwsClient, resource: &Resource) -> ProviderResult<State> {
        let address = rule_address(resource)?;
        let permission = ip_permission(&address, resource.get_str("description"));
        let group_id = address.security_group_id.as_str();

        // Concurrent changes to one group's rules overwrite each other
        let guard = client.locks.lock(group_id).await;
        log::debug!("Authorizing {} rule {} on {}", address.rule_type, address.id(), group_id);
        let result = if address.rule_type == "ingress" {
            client
                .ec2
                .authorize_security_group_ingress()
                .group_id(group_id)
                .ip_permissions(permission)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| authorize_error(e, &address))
        } else {
            client
                .ec2
                .authorize_security_group_egress()
                .group_id(group_id)
                .ip_permissions(permission)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| authorize_error(e, &address))
        };
        drop(guard);
        result.map_err(|e| e.for_resource(resource.id.clone()))?;
        log::info!("Created security group rule {}", address.rule_id());

        read_after_create(self, client, &resource.id, &address.id()).await
    }

    async fn read(
        &self,
        client: &AwsClient,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let address = parse_security_group_rule_id(identifier).map_err(|e| e.for_resource(id.clone()))?;
        let Some(group) = find_security_group(client, &address.security_group_id)
            .await
            .map_err(|e| e.for_resource(id.clone()))?
        else {
            log::warn!(
                "Security group {} not found, rule {} is gone",
                address.security_group_id,
                identifier
            );
            return Ok(State::not_found(id.clone()));
        };

        let permissions = if address.rule_type == "ingress" {
            group.ip_permissions()
        } else {
            group.ip_permissions_egress()
        };
        let Some(permission) = permissions.iter().find(|p| permission_matches(p, &address)) else {
            log::warn!("Security group rule {} not found", identifier);
            return Ok(State::not_found(id.clone()));
        };

        let mut state = address_state(id, &address);
        state.set_opt("description", permission_description(permission));
        Ok(state)
    }

    async fn update(
        &self,
        client: &AwsClient,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        let cleared = from.get_str("description").is_some() && to.get_str("description").is_none();
        if changed_value(from, to, "description").is_some() || cleared {
            let address = parse_security_group_rule_id(identifier)?;
            let permission = ip_permission(&address, to.get_str("description"));
            let group_id = address.security_group_id.as_str();

            let _guard = client.locks.lock(group_id).await;
            log::debug!("Updating description of rule {}", identifier);
            let context = format!("Failed to update rule description on {}", group_id);
            let result = if address.rule_type == "ingress" {
                client
                    .ec2
                    .update_security_group_rule_descriptions_ingress()
                    .group_id(group_id)
                    .ip_permissions(permission)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| sdk_error(&context, e))
            } else {
                client
                    .ec2
                    .update_security_group_rule_descriptions_egress()
                    .group_id(group_id)
                    .ip_permissions(permission)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| sdk_error(&context, e))
            };
            result.map_err(|e| e.for_resource(id.clone()))?;
        }

        self.read(client, id, identifier).await
    }

    async fn delete(
        &self,
        client: &AwsClient,
        id: &ResourceId,
        identifier: &str,
        _from: &State,
    ) -> ProviderResult<()> {
        let address = parse_security_group_rule_id(identifier).map_err(|e| e.for_resource(id.clone()))?;
        let permission = ip_permission(&address, None);
        let group_id = address.security_group_id.as_str();

        let _guard = client.locks.lock(group_id).await;
        log::info!("Revoking security group rule {}", address.rule_id());
        let context = format!("Failed to revoke security group rule on {}", group_id);
        let result = if address.rule_type == "ingress" {
            client
                .ec2
                .revoke_security_group_ingress()
                .group_id(group_id)
                .ip_permissions(permission)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| sdk_error(&context, e))
        } else {
            client
                .ec2
                .revoke_security_group_egress()
                .group_id(group_id)
                .ip_permissions(permission)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| sdk_error(&context, e))
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.for_resource(id.clone())),
        }
    }

    fn import_identifier(&self, import_id: &str) -> ProviderResult<String> {
        let mut address = parse_security_group_rule_id(import_id)?;
        address.protocol = protocol_for_value(&address.protocol);
        Ok(address.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ingress(protocol: &str, from: i64, to: i64) -> Resource {
        Resource::new("ec2.security_group_rule", "https")
            .with_attribute("type", "ingress")
            .with_attribute("security_group_id", "sg-123")
            .with_attribute("protocol", protocol)
            .with_attribute("from_port", from)
            .with_attribute("to_port", to)
    }

    #[test]
    fn protocol_aliases_are_equivalent() {
        assert!(suppress_equivalent_protocol(&Value::from("6"), &Value::from("tcp")));
        assert!(suppress_equivalent_protocol(&Value::from("all"), &Value::from("-1")));
        assert!(!suppress_equivalent_protocol(&Value::from("udp"), &Value::from("tcp")));
    }

    #[test]
    fn address_normalises_protocol() {
        let resource = ingress("6", 443, 443)
            .with_attribute("cidr_blocks", Value::string_list(["10.0.0.0/8"]));
        let address = rule_address(&resource).unwrap();
        assert_eq!(address.protocol, "tcp");
        assert_eq!(address.id(), "sg-123_ingress_tcp_443_443_10.0.0.0/8");
        assert!(address.rule_id().starts_with("sgrule-"));
    }

    #[test]
    fn all_protocol_requires_zero_ports() {
        let resource = ingress("-1", 0, 65535).with_attribute("self", true);
        let err = rule_address(&resource).unwrap_err();
        assert!(err.message.contains("must both be 0"));

        let resource = ingress("all", 0, 0).with_attribute("self", true);
        assert_eq!(rule_address(&resource).unwrap().protocol, "-1");
    }

    #[test]
    fn rule_needs_a_source() {
        let err = rule_address(&ingress("tcp", 22, 22)).unwrap_err();
        assert!(err.message.contains("must be set"));
    }

    #[test]
    fn permission_carries_sources_and_description() {
        let resource = ingress("tcp", 22, 22)
            .with_attribute("source_security_group_id", "123456789012/sg-999")
            .with_attribute("self", true);
        let address = rule_address(&resource).unwrap();
        let permission = ip_permission(&address, Some("ssh"));

        let pairs = permission.user_id_group_pairs();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].user_id(), Some("123456789012"));
        assert_eq!(pairs[0].group_id(), Some("sg-999"));
        assert_eq!(pairs[1].group_id(), Some("sg-123"));
        assert_eq!(permission_description(&permission).as_deref(), Some("ssh"));
    }

    #[test]
    fn matching_requires_every_configured_source() {
        let resource = ingress("tcp", 80, 80)
            .with_attribute("cidr_blocks", Value::string_list(["10.0.0.0/8"]));
        let address = rule_address(&resource).unwrap();

        let remote = IpPermission::builder()
            .ip_protocol("tcp")
            .from_port(80)
            .to_port(80)
            .ip_ranges(IpRange::builder().cidr_ip("10.0.0.0/8").build())
            .ip_ranges(IpRange::builder().cidr_ip("172.16.0.0/12").build())
            .build();
        assert!(permission_matches(&remote, &address));

        let other_port = IpPermission::builder()
            .ip_protocol("tcp")
            .from_port(8080)
            .to_port(8080)
            .ip_ranges(IpRange::builder().cidr_ip("10.0.0.0/8").build())
            .build();
        assert!(!permission_matches(&other_port, &address));

        let missing_cidr = IpPermission::builder()
            .ip_protocol("6")
            .from_port(80)
            .to_port(80)
            .ip_ranges(IpRange::builder().cidr_ip("172.16.0.0/12").build())
            .build();
        assert!(!permission_matches(&missing_cidr, &address));
    }

    #[test]
    fn import_normalises_protocol() {
        let handler = SecurityGroupRuleHandler;
        assert_eq!(
            handler.import_identifier("sg-1_egress_6_443_443_0.0.0.0/0").unwrap(),
            "sg-1_egress_tcp_443_443_0.0.0.0/0"
        );
        assert!(handler.import_identifier("sgrule-123").is_err());
    }
}

//! ec2.network_acl resource with inline entries

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_ec2::types::{
    Filter, IcmpTypeCode, NetworkAcl, NetworkAclEntry, PortRange, ResourceType as Ec2ResourceType,
    RuleAction,
};
use cumulus_core::provider::{ProviderError, ProviderResult};
use cumulus_core::resource::{AttributeMap, Resource, ResourceId, State, Value};
use cumulus_core::schema::ResourceSchema;

use super::ec2_arn;
use super::protocol::acl_protocol_number;
use crate::config::AwsClient;
use crate::error::{is_not_found, retry_on_aws_code, sdk_error};
use crate::resources::{ResourceHandler, read_after_create};
use crate::schemas::ec2::network_acl_schema;
use crate::tags::{
    desired_tags, ec2_tag_specification, ec2_tags_to_map, state_tags, tag_changes, update_ec2_tags,
};

/// Catch-all deny rules AWS adds to every ACL; they cannot be changed
const DEFAULT_RULE_NUMBER_IPV4: i32 = 32767;
const DEFAULT_RULE_NUMBER_IPV6: i32 = 32768;

const DELETE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

pub struct NetworkAclHandler;

/// Convert configured entry blocks into API entries.
///
/// Protocols may be given by name or number; the API always receives the number.
pub fn expand_network_acl_entries(
    configured: &[Value],
    entry_type: &str,
) -> ProviderResult<Vec<NetworkAclEntry>> {
    let mut entries = Vec::with_capacity(configured.len());
    for raw in configured {
        let Some(data) = raw.as_map() else {
            return Err(ProviderError::new("Network ACL entry must be a block"));
        };
        let rule_no = data.get_int("rule_no").unwrap_or_default();
        let protocol = data.get_str("protocol").unwrap_or_default();

        let number = match protocol.parse::<i32>() {
            Ok(n) => n,
            Err(_) => acl_protocol_number(protocol).ok_or_else(|| {
                ProviderError::new(format!(
                    "Invalid Protocol {} for rule {}",
                    protocol, rule_no
                ))
            })?,
        };

        let mut entry = NetworkAclEntry::builder()
            .protocol(number.to_string())
            .port_range(
                PortRange::builder()
                    .set_from(data.get_int("from_port").map(|p| p as i32))
                    .set_to(data.get_int("to_port").map(|p| p as i32))
                    .build(),
            )
            .egress(entry_type == "egress")
            .set_rule_action(data.get_str("action").map(RuleAction::from))
            .rule_number(rule_no as i32)
            .set_ipv6_cidr_block(data.get_str("ipv6_cidr_block").map(String::from))
            .set_cidr_block(data.get_str("cidr_block").map(String::from));

        // ICMP entries need a type and code
        if number == 1 {
            entry = entry.icmp_type_code(
                IcmpTypeCode::builder()
                    .set_code(data.get_int("icmp_code").map(|c| c as i32))
                    .set_type(data.get_int("icmp_type").map(|t| t as i32))
                    .build(),
            );
        }

        entries.push(entry.build());
    }
    Ok(entries)
}

/// Convert API entries back into entry blocks
pub fn flatten_network_acl_entries(entries: &[&NetworkAclEntry]) -> Value {
    let blocks = entries
        .iter()
        .map(|entry| {
            let mut block = HashMap::new();
            if let Some(range) = entry.port_range() {
                block.insert("from_port".to_string(), Value::Int(range.from().unwrap_or_default() as i64));
                block.insert("to_port".to_string(), Value::Int(range.to().unwrap_or_default() as i64));
            } else {
                block.insert("from_port".to_string(), Value::Int(0));
                block.insert("to_port".to_string(), Value::Int(0));
            }
            if let Some(action) = entry.rule_action() {
                block.insert("action".to_string(), Value::from(action.as_str()));
            }
            if let Some(rule_no) = entry.rule_number() {
                block.insert("rule_no".to_string(), Value::Int(rule_no as i64));
            }
            if let Some(protocol) = entry.protocol() {
                block.insert("protocol".to_string(), Value::from(protocol));
            }
            if let Some(cidr) = entry.cidr_block() {
                block.insert("cidr_block".to_string(), Value::from(cidr));
            }
            if let Some(cidr) = entry.ipv6_cidr_block() {
                block.insert("ipv6_cidr_block".to_string(), Value::from(cidr));
            }
            if let Some(icmp) = entry.icmp_type_code() {
                if let Some(t) = icmp.r#type() {
                    block.insert("icmp_type".to_string(), Value::Int(t as i64));
                }
                if let Some(c) = icmp.code() {
                    block.insert("icmp_code".to_string(), Value::Int(c as i64));
                }
            }
            Value::Map(block)
        })
        .collect();
    Value::List(blocks)
}

/// Canonical form of an entry block.
///
/// Protocols become numbers and unset ports read as 0, the way the API reports
/// them. ICMP type and code only count for ICMP entries and default to 0.
/// Empty CIDR blocks count as unset.
fn canonical_entry(value: &Value) -> String {
    let Some(map) = value.as_map() else {
        return value.to_json().to_string();
    };
    let mut map = map.clone();
    if let Some(protocol) = map.get("protocol").and_then(Value::as_str)
        && protocol.parse::<i32>().is_err()
        && let Some(number) = acl_protocol_number(protocol)
    {
        map.insert("protocol".to_string(), Value::String(number.to_string()));
    }
    for key in ["from_port", "to_port"] {
        map.entry(key.to_string()).or_insert(Value::Int(0));
    }
    if map.get("protocol").and_then(Value::as_str) == Some("1") {
        for key in ["icmp_type", "icmp_code"] {
            map.entry(key.to_string()).or_insert(Value::Int(0));
        }
    } else {
        map.remove("icmp_type");
        map.remove("icmp_code");
    }
    map.retain(|key, value| {
        !(matches!(key.as_str(), "cidr_block" | "ipv6_cidr_block") && value.as_str() == Some(""))
    });
    // serde_json maps are sorted by key
    Value::Map(map).to_json().to_string()
}

/// Entry lists are sets; protocol names equal their numbers
pub fn suppress_equivalent_acl_entries(old: &Value, new: &Value) -> bool {
    let (Some(old), Some(new)) = (old.as_list(), new.as_list()) else {
        return false;
    };
    let mut old: Vec<String> = old.iter().map(canonical_entry).collect();
    let mut new: Vec<String> = new.iter().map(canonical_entry).collect();
    old.sort();
    new.sort();
    old == new
}

async fn find_network_acl(client: &AwsClient, acl_id: &str) -> ProviderResult<Option<NetworkAcl>> {
    match client.ec2.describe_network_acls().network_acl_ids(acl_id).send().await {
        Ok(output) => Ok(output.network_acls().first().cloned()),
        Err(e) if is_not_found(&e) => Ok(None),
        Err(e) => Err(sdk_error(&format!("Failed to describe network ACL {}", acl_id), e)),
    }
}

async fn create_entry(client: &AwsClient, acl_id: &str, entry: &NetworkAclEntry) -> ProviderResult<()> {
    log::debug!(
        "Creating network ACL entry {} (egress: {}) in {}",
        entry.rule_number().unwrap_or_default(),
        entry.egress().unwrap_or_default(),
        acl_id
    );
    client
        .ec2
        .create_network_acl_entry()
        .network_acl_id(acl_id)
        .set_rule_number(entry.rule_number())
        .set_egress(entry.egress())
        .set_protocol(entry.protocol().map(String::from))
        .set_rule_action(entry.rule_action().cloned())
        .set_cidr_block(entry.cidr_block().map(String::from))
        .set_ipv6_cidr_block(entry.ipv6_cidr_block().map(String::from))
        .set_port_range(entry.port_range().cloned())
        .set_icmp_type_code(entry.icmp_type_code().cloned())
        .send()
        .await
        .map_err(|e| sdk_error(&format!("Failed to create network ACL entry in {}", acl_id), e))?;
    Ok(())
}

async fn delete_entry(client: &AwsClient, acl_id: &str, entry: &NetworkAclEntry) -> ProviderResult<()> {
    let result = client
        .ec2
        .delete_network_acl_entry()
        .network_acl_id(acl_id)
        .set_rule_number(entry.rule_number())
        .set_egress(entry.egress())
        .send()
        .await;
    match result {
        Ok(_) => Ok(()),
        Err(e) if is_not_found(&e) => Ok(()),
        Err(e) => Err(sdk_error(&format!("Failed to delete network ACL entry in {}", acl_id), e)),
    }
}

/// Apply the difference between two entry lists; removals go first so rule
/// numbers can be reused
async fn update_entries(
    client: &AwsClient,
    acl_id: &str,
    old: &[NetworkAclEntry],
    new: &[NetworkAclEntry],
) -> ProviderResult<()> {
    for entry in old.iter().filter(|e| !new.contains(e)) {
        delete_entry(client, acl_id, entry).await?;
    }
    for entry in new.iter().filter(|e| !old.contains(e)) {
        create_entry(client, acl_id, entry).await?;
    }
    Ok(())
}

/// The ACL association currently covering `subnet_id`
async fn subnet_association_id(client: &AwsClient, subnet_id: &str) -> ProviderResult<Option<String>> {
    let output = client
        .ec2
        .describe_network_acls()
        .filters(Filter::builder().name("association.subnet-id").values(subnet_id).build())
        .send()
        .await
        .map_err(|e| sdk_error(&format!("Failed to find ACL association of {}", subnet_id), e))?;
    Ok(output
        .network_acls()
        .iter()
        .flat_map(|acl| acl.associations())
        .find(|a| a.subnet_id() == Some(subnet_id))
        .and_then(|a| a.network_acl_association_id().map(String::from)))
}

async fn default_acl_id(client: &AwsClient, vpc_id: &str) -> ProviderResult<String> {
    let output = client
        .ec2
        .describe_network_acls()
        .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
        .filters(Filter::builder().name("default").values("true").build())
        .send()
        .await
        .map_err(|e| sdk_error("Failed to find default network ACL", e))?;
    output
        .network_acls()
        .first()
        .and_then(|acl| acl.network_acl_id())
        .map(String::from)
        .ok_or_else(|| ProviderError::new(format!("No default network ACL in {}", vpc_id)))
}

/// Move a subnet's association to `acl_id`
async fn associate_subnet(client: &AwsClient, subnet_id: &str, acl_id: &str) -> ProviderResult<()> {
    let Some(association_id) = subnet_association_id(client, subnet_id).await? else {
        return Err(ProviderError::not_found(format!(
            "Subnet {} has no network ACL association",
            subnet_id
        )));
    };
    log::debug!("Associating subnet {} with network ACL {}", subnet_id, acl_id);
    client
        .ec2
        .replace_network_acl_association()
        .association_id(association_id)
        .network_acl_id(acl_id)
        .send()
        .await
        .map_err(|e| sdk_error(&format!("Failed to associate subnet {}", subnet_id), e))?;
    Ok(())
}

fn configured_entries(resource: &Resource, key: &str) -> ProviderResult<Vec<NetworkAclEntry>> {
    expand_network_acl_entries(resource.get_list(key).unwrap_or_default(), key)
        .map_err(|e| e.for_resource(resource.id.clone()))
}

#[async_trait]
impl ResourceHandler for NetworkAclHandler {
    fn resource_type(&self) -> &'static str {
        "ec2.network_acl"
    }

    fn schema(&self) -> ResourceSchema {
        network_acl_schema()
    }

    async fn create(&self, client: &AwsClient, resource: &Resource) -> ProviderResult<State> {
        let vpc_id = resource.require_str("vpc_id")?;
        // Expand first so invalid protocols fail before anything is created
        let ingress = configured_entries(resource, "ingress")?;
        let egress = configured_entries(resource, "egress")?;
        let tags = desired_tags(client, resource);

        let output = client
            .ec2
            .create_network_acl()
            .vpc_id(vpc_id)
            .set_tag_specifications(
                ec2_tag_specification(Ec2ResourceType::NetworkAcl, &tags).map(|s| vec![s]),
            )
            .send()
            .await
            .map_err(|e| sdk_error("Failed to create network ACL", e).for_resource(resource.id.clone()))?;
        let acl_id = output
            .network_acl()
            .and_then(|acl| acl.network_acl_id())
            .ok_or_else(|| {
                ProviderError::new("Network ACL created but no ID returned")
                    .for_resource(resource.id.clone())
            })?
            .to_string();
        log::info!("Created network ACL {}", acl_id);

        for entry in ingress.iter().chain(egress.iter()) {
            create_entry(client, &acl_id, entry)
                .await
                .map_err(|e| e.for_resource(resource.id.clone()))?;
        }
        for subnet_id in resource.get_string_list("subnet_ids") {
            associate_subnet(client, &subnet_id, &acl_id)
                .await
                .map_err(|e| e.for_resource(resource.id.clone()))?;
        }

        read_after_create(self, client, &resource.id, &acl_id).await
    }

    async fn read(
        &self,
        client: &AwsClient,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let Some(acl) = find_network_acl(client, identifier)
            .await
            .map_err(|e| e.for_resource(id.clone()))?
        else {
            return Ok(State::not_found(id.clone()));
        };

        let (egress, ingress): (Vec<&NetworkAclEntry>, Vec<&NetworkAclEntry>) = acl
            .entries()
            .iter()
            .filter(|e| {
                !matches!(
                    e.rule_number(),
                    Some(DEFAULT_RULE_NUMBER_IPV4) | Some(DEFAULT_RULE_NUMBER_IPV6)
                )
            })
            .partition(|e| e.egress().unwrap_or_default());

        let mut subnet_ids: Vec<String> = acl
            .associations()
            .iter()
            .filter_map(|a| a.subnet_id().map(String::from))
            .collect();
        subnet_ids.sort();

        let mut attributes = HashMap::new();
        attributes.insert("vpc_id".to_string(), Value::from(acl.vpc_id().unwrap_or_default()));
        attributes.insert("ingress".to_string(), flatten_network_acl_entries(&ingress));
        attributes.insert("egress".to_string(), flatten_network_acl_entries(&egress));
        attributes.insert("subnet_ids".to_string(), Value::string_list(subnet_ids));
        attributes.insert("tags".to_string(), state_tags(client, ec2_tags_to_map(acl.tags())));
        if let Some(owner_id) = acl.owner_id() {
            attributes.insert("owner_id".to_string(), Value::from(owner_id));
            attributes.insert(
                "arn".to_string(),
                Value::from(ec2_arn(&client.region, owner_id, "network-acl", identifier)),
            );
        }

        Ok(State::existing(id.clone(), attributes).with_identifier(identifier))
    }

    async fn update(
        &self,
        client: &AwsClient,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        for key in ["ingress", "egress"] {
            let old = expand_network_acl_entries(from.get_list(key).unwrap_or_default(), key)?;
            let new = configured_entries(to, key)?;
            update_entries(client, identifier, &old, &new)
                .await
                .map_err(|e| e.for_resource(id.clone()))?;
        }

        let old_subnets = from.get_string_list("subnet_ids");
        let new_subnets = to.get_string_list("subnet_ids");
        let removed: Vec<&String> = old_subnets.iter().filter(|s| !new_subnets.contains(s)).collect();
        if !removed.is_empty() {
            let vpc_id = to.require_str("vpc_id")?;
            let default_acl = default_acl_id(client, vpc_id).await?;
            for subnet_id in removed {
                associate_subnet(client, subnet_id, &default_acl)
                    .await
                    .map_err(|e| e.for_resource(id.clone()))?;
            }
        }
        for subnet_id in new_subnets.iter().filter(|s| !old_subnets.contains(s)) {
            associate_subnet(client, subnet_id, identifier)
                .await
                .map_err(|e| e.for_resource(id.clone()))?;
        }

        if let Some((old, new)) = tag_changes(client, from, to) {
            update_ec2_tags(client, identifier, &old, &new)
                .await
                .map_err(|e| e.for_resource(id.clone()))?;
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
        let Some(acl) = find_network_acl(client, identifier).await? else {
            return Ok(());
        };

        // Subnets must always have an ACL, so hand them back to the default one
        let subnets: Vec<String> = acl
            .associations()
            .iter()
            .filter_map(|a| a.subnet_id().map(String::from))
            .collect();
        if !subnets.is_empty()
            && let Some(vpc_id) = acl.vpc_id()
        {
            let default_acl = default_acl_id(client, vpc_id).await?;
            for subnet_id in &subnets {
                associate_subnet(client, subnet_id, &default_acl)
                    .await
                    .map_err(|e| e.for_resource(id.clone()))?;
            }
        }

        log::info!("Deleting network ACL {}", identifier);
        let result = retry_on_aws_code("DependencyViolation", DELETE_TIMEOUT, || {
            client.ec2.delete_network_acl().network_acl_id(identifier).send()
        })
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(sdk_error(&format!("Failed to delete network ACL {}", identifier), e)
                .for_resource(id.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(pairs: Vec<(&str, Value)>) -> Value {
        Value::Map(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    fn rule(protocol: &str, port: i64, rule_no: i64) -> Value {
        block(vec![
            ("protocol", Value::from(protocol)),
            ("from_port", Value::Int(port)),
            ("to_port", Value::Int(port)),
            ("cidr_block", Value::from("0.0.0.0/0")),
            ("action", Value::from("deny")),
            ("rule_no", Value::Int(rule_no)),
        ])
    }

    fn expected(protocol: &str, port: i32, rule_no: i32) -> NetworkAclEntry {
        NetworkAclEntry::builder()
            .protocol(protocol)
            .port_range(PortRange::builder().from(port).to(port).build())
            .egress(true)
            .rule_action(RuleAction::Deny)
            .rule_number(rule_no)
            .cidr_block("0.0.0.0/0")
            .build()
    }

    #[test]
    fn expand_entries_maps_protocol_names() {
        let input = vec![rule("tcp", 22, 1), rule("tcp", 443, 2), rule("-1", 443, 2)];
        let expanded = expand_network_acl_entries(&input, "egress").unwrap();
        assert_eq!(
            expanded,
            vec![
                expected("6", 22, 1),
                expected("6", 443, 2),
                expected("-1", 443, 2),
            ]
        );
    }

    #[test]
    fn expand_entries_rejects_unknown_protocol() {
        let err = expand_network_acl_entries(&[rule("gre", 22, 7)], "ingress").unwrap_err();
        assert_eq!(err.to_string(), "Invalid Protocol gre for rule 7");
    }

    #[test]
    fn expand_icmp_entry_carries_type_and_code() {
        let input = vec![block(vec![
            ("protocol", Value::from("icmp")),
            ("from_port", Value::Int(0)),
            ("to_port", Value::Int(0)),
            ("cidr_block", Value::from("10.0.0.0/8")),
            ("action", Value::from("allow")),
            ("rule_no", Value::Int(10)),
            ("icmp_type", Value::Int(8)),
            ("icmp_code", Value::Int(-1)),
        ])];
        let expanded = expand_network_acl_entries(&input, "ingress").unwrap();
        let icmp = expanded[0].icmp_type_code().unwrap();
        assert_eq!(icmp.r#type(), Some(8));
        assert_eq!(icmp.code(), Some(-1));
        assert_eq!(expanded[0].protocol(), Some("1"));
        assert_eq!(expanded[0].egress(), Some(false));
    }

    #[test]
    fn flatten_then_expand_preserves_entries() {
        let entries = vec![expected("6", 22, 1), expected("-1", 443, 2)];
        let refs: Vec<&NetworkAclEntry> = entries.iter().collect();
        let flattened = flatten_network_acl_entries(&refs);
        let again = expand_network_acl_entries(flattened.as_list().unwrap(), "egress").unwrap();
        assert_eq!(again, entries);
    }

    #[test]
    fn entry_sets_compare_by_protocol_number() {
        let configured = Value::List(vec![rule("tcp", 22, 1), rule("udp", 53, 2)]);
        let remote = Value::List(vec![rule("17", 53, 2), rule("6", 22, 1)]);
        assert!(suppress_equivalent_acl_entries(&configured, &remote));

        let changed = Value::List(vec![rule("6", 22, 1)]);
        assert!(!suppress_equivalent_acl_entries(&configured, &changed));
    }

    #[test]
    fn icmp_entry_without_ports_matches_remote() {
        let configured = Value::List(vec![block(vec![
            ("protocol", Value::from("icmp")),
            ("cidr_block", Value::from("10.0.0.0/8")),
            ("ipv6_cidr_block", Value::from("")),
            ("action", Value::from("allow")),
            ("rule_no", Value::Int(10)),
            ("icmp_type", Value::Int(8)),
        ])]);
        let remote_entry = NetworkAclEntry::builder()
            .protocol("1")
            .egress(false)
            .rule_action(RuleAction::Allow)
            .rule_number(10)
            .cidr_block("10.0.0.0/8")
            .icmp_type_code(IcmpTypeCode::builder().r#type(8).code(0).build())
            .build();
        let remote = flatten_network_acl_entries(&[&remote_entry]);
        assert!(suppress_equivalent_acl_entries(&configured, &remote));

        let other_type = block(vec![
            ("protocol", Value::from("1")),
            ("cidr_block", Value::from("10.0.0.0/8")),
            ("action", Value::from("allow")),
            ("rule_no", Value::Int(10)),
            ("icmp_type", Value::Int(0)),
        ]);
        assert!(!suppress_equivalent_acl_entries(&Value::List(vec![other_type]), &remote));
    }

    #[test]
    fn icmp_fields_ignored_on_tcp_entries() {
        let configured = match rule("tcp", 22, 1) {
            Value::Map(mut map) => {
                map.insert("icmp_type".to_string(), Value::Int(0));
                map.insert("icmp_code".to_string(), Value::Int(0));
                Value::Map(map)
            }
            other => other,
        };
        let remote = Value::List(vec![rule("6", 22, 1)]);
        assert!(suppress_equivalent_acl_entries(&Value::List(vec![configured]), &remote));
    }
}

//! EC2 resource schema definitions

use cumulus_core::cidr::suppress_equivalent_cidr;
use cumulus_core::resource::Value;
use cumulus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

use super::types::one_of;
use crate::resources::ec2::network_acl::suppress_equivalent_acl_entries;
use crate::resources::ec2::security_group_rule::suppress_equivalent_protocol;

fn string_list() -> AttributeType {
    AttributeType::List(Box::new(AttributeType::String))
}

/// Returns the schema for the availability zones data source
pub fn availability_zones_schema() -> ResourceSchema {
    ResourceSchema::data_source("ec2.availability_zones")
        .with_description("Availability zones of the provider's region")
        .attribute(
            AttributeSchema::new(
                "state",
                one_of(&["available", "information", "impaired", "unavailable"]),
            )
            .with_description("Only zones in this state"),
        )
        .attribute(
            AttributeSchema::new("all_availability_zones", AttributeType::Bool)
                .with_description("Include Local Zones and Wavelength Zones regardless of opt-in"),
        )
        .attribute(AttributeSchema::new("exclude_names", string_list()))
        .attribute(AttributeSchema::new("exclude_zone_ids", string_list()))
        .attribute(AttributeSchema::new("names", string_list()).computed())
        .attribute(AttributeSchema::new("zone_ids", string_list()).computed())
        .attribute(AttributeSchema::new("group_names", string_list()).computed())
}

/// Returns the schema for VPC
pub fn vpc_schema() -> ResourceSchema {
    ResourceSchema::new("ec2.vpc")
        .with_description("An AWS VPC (Virtual Private Cloud)")
        .attribute(
            AttributeSchema::new("cidr_block", types::ipv4_cidr())
                .required()
                .force_new()
                .with_diff_suppress(suppress_equivalent_cidr)
                .with_description("The IPv4 network range for the VPC"),
        )
        .attribute(
            AttributeSchema::new("instance_tenancy", one_of(&["default", "dedicated"]))
                .force_new()
                .with_default(Value::from("default"))
                .with_description("Tenancy of instances launched into the VPC"),
        )
        .attribute(
            AttributeSchema::new("enable_dns_support", AttributeType::Bool)
                .with_default(Value::Bool(true)),
        )
        .attribute(
            AttributeSchema::new("enable_dns_hostnames", AttributeType::Bool).optional_computed(),
        )
        .attribute(
            AttributeSchema::new("assign_generated_ipv6_cidr_block", AttributeType::Bool)
                .with_default(Value::Bool(false))
                .with_description("Request an Amazon-provided /56 IPv6 CIDR block"),
        )
        .attribute(AttributeSchema::new("tags", types::tags()))
        .attribute(AttributeSchema::new("arn", AttributeType::String).computed())
        .attribute(AttributeSchema::new("ipv6_cidr_block", AttributeType::String).computed())
        .attribute(AttributeSchema::new("default_network_acl_id", AttributeType::String).computed())
        .attribute(
            AttributeSchema::new("default_security_group_id", AttributeType::String).computed(),
        )
        .attribute(AttributeSchema::new("owner_id", AttributeType::String).computed())
}

/// Fields of one network ACL entry
pub fn network_acl_entry_fields() -> Vec<AttributeSchema> {
    vec![
        AttributeSchema::new("protocol", AttributeType::String)
            .required()
            .with_description("Protocol name or number; -1 means all"),
        AttributeSchema::new("rule_no", types::positive_int()).required(),
        AttributeSchema::new("action", one_of(&["allow", "deny"])).required(),
        AttributeSchema::new("from_port", types::port()).required(),
        AttributeSchema::new("to_port", types::port()).required(),
        AttributeSchema::new("cidr_block", types::ipv4_cidr()),
        AttributeSchema::new("ipv6_cidr_block", types::ipv6_cidr()),
        AttributeSchema::new("icmp_type", AttributeType::Int),
        AttributeSchema::new("icmp_code", AttributeType::Int),
    ]
}

/// Returns the schema for a network ACL
pub fn network_acl_schema() -> ResourceSchema {
    ResourceSchema::new("ec2.network_acl")
        .with_description("A network ACL with inline ingress and egress entries")
        .attribute(
            AttributeSchema::new("vpc_id", AttributeType::String)
                .required()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new("subnet_ids", string_list())
                .with_description("Subnets associated with the ACL"),
        )
        .attribute(
            AttributeSchema::new("ingress", AttributeType::Block(network_acl_entry_fields()))
                .with_diff_suppress(suppress_equivalent_acl_entries),
        )
        .attribute(
            AttributeSchema::new("egress", AttributeType::Block(network_acl_entry_fields()))
                .with_diff_suppress(suppress_equivalent_acl_entries),
        )
        .attribute(AttributeSchema::new("tags", types::tags()))
        .attribute(AttributeSchema::new("arn", AttributeType::String).computed())
        .attribute(AttributeSchema::new("owner_id", AttributeType::String).computed())
}

/// Returns the schema for Security Group
pub fn security_group_schema() -> ResourceSchema {
    ResourceSchema::new("ec2.security_group")
        .with_description("A VPC security group; rules are managed as ec2.security_group_rule")
        .attribute(
            AttributeSchema::new("name", AttributeType::String)
                .required()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new("description", AttributeType::String)
                .force_new()
                .with_default(Value::from("Managed by Cumulus")),
        )
        .attribute(
            AttributeSchema::new("vpc_id", AttributeType::String)
                .optional_computed()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new("revoke_default_egress", AttributeType::Bool)
                .config_only()
                .with_default(Value::Bool(false))
                .with_description("Remove the allow-all egress rule AWS adds on creation"),
        )
        .attribute(AttributeSchema::new("tags", types::tags()))
        .attribute(AttributeSchema::new("arn", AttributeType::String).computed())
        .attribute(AttributeSchema::new("owner_id", AttributeType::String).computed())
}

/// Returns the schema for a single security group rule
pub fn security_group_rule_schema() -> ResourceSchema {
    ResourceSchema::new("ec2.security_group_rule")
        .with_description("One ingress or egress permission of a security group")
        .attribute(
            AttributeSchema::new("type", one_of(&["ingress", "egress"]))
                .required()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new("security_group_id", AttributeType::String)
                .required()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new("protocol", AttributeType::String)
                .required()
                .force_new()
                .with_diff_suppress(suppress_equivalent_protocol)
                .with_description("tcp, udp, icmp, icmpv6, a protocol number, or -1 / all"),
        )
        .attribute(
            AttributeSchema::new("from_port", types::port())
                .required()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new("to_port", types::port())
                .required()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new("cidr_blocks", AttributeType::List(Box::new(types::ipv4_cidr())))
                .force_new(),
        )
        .attribute(
            AttributeSchema::new(
                "ipv6_cidr_blocks",
                AttributeType::List(Box::new(types::ipv6_cidr())),
            )
            .force_new(),
        )
        .attribute(AttributeSchema::new("prefix_list_ids", string_list()).force_new())
        .attribute(
            AttributeSchema::new("source_security_group_id", AttributeType::String)
                .optional_computed()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new("self", AttributeType::Bool)
                .force_new()
                .with_default(Value::Bool(false))
                .with_description("Allow traffic from the group itself"),
        )
        .attribute(AttributeSchema::new("description", AttributeType::String))
        .attribute(
            AttributeSchema::new("rule_id", AttributeType::String)
                .computed()
                .with_description("Hash of the permission fields, `sgrule-<crc32>`"),
        )
}

/// Returns all EC2 schemas
pub fn schemas() -> Vec<ResourceSchema> {
    vec![
        availability_zones_schema(),
        vpc_schema(),
        network_acl_schema(),
        security_group_schema(),
        security_group_rule_schema(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn attrs(pairs: Vec<(&str, Value)>) -> HashMap<String, Value> {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    fn entry(protocol: &str, rule_no: i64, action: &str, port: i64) -> Value {
        Value::Map(attrs(vec![
            ("protocol", Value::from(protocol)),
            ("rule_no", Value::Int(rule_no)),
            ("action", Value::from(action)),
            ("from_port", Value::Int(port)),
            ("to_port", Value::Int(port)),
            ("cidr_block", Value::from("0.0.0.0/0")),
        ]))
    }

    #[test]
    fn valid_vpc_minimal() {
        let attrs = attrs(vec![("cidr_block", Value::from("10.0.0.0/16"))]);
        assert!(vpc_schema().validate(&attrs).is_ok());
    }

    #[test]
    fn vpc_cidr_must_be_network_address() {
        let attrs = attrs(vec![("cidr_block", Value::from("10.0.0.1/16"))]);
        assert!(vpc_schema().validate(&attrs).is_err());
    }

    #[test]
    fn vpc_rejects_computed_attributes() {
        let attrs = attrs(vec![
            ("cidr_block", Value::from("10.0.0.0/16")),
            ("arn", Value::from("arn:aws:ec2:us-east-1:123456789012:vpc/vpc-1")),
        ]);
        assert!(vpc_schema().validate(&attrs).is_err());
    }

    #[test]
    fn vpc_cidr_forces_replacement() {
        assert!(vpc_schema().attributes["cidr_block"].force_new);
        assert!(!vpc_schema().attributes["enable_dns_support"].force_new);
    }

    #[test]
    fn network_acl_entries_validate() {
        let ok = attrs(vec![
            ("vpc_id", Value::from("vpc-123")),
            ("ingress", Value::List(vec![entry("tcp", 100, "allow", 443)])),
            ("egress", Value::List(vec![entry("-1", 100, "allow", 0)])),
        ]);
        assert!(network_acl_schema().validate(&ok).is_ok());

        let bad_action = attrs(vec![
            ("vpc_id", Value::from("vpc-123")),
            ("ingress", Value::List(vec![entry("tcp", 100, "permit", 443)])),
        ]);
        assert!(network_acl_schema().validate(&bad_action).is_err());
    }

    #[test]
    fn security_group_rule_requires_type() {
        let attrs = attrs(vec![
            ("security_group_id", Value::from("sg-123")),
            ("protocol", Value::from("tcp")),
            ("from_port", Value::Int(80)),
            ("to_port", Value::Int(80)),
        ]);
        let errors = security_group_rule_schema().validate(&attrs).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("type"));
    }

    #[test]
    fn availability_zones_is_data_source() {
        assert!(availability_zones_schema().data_source);
        assert!(availability_zones_schema().attributes["names"].is_computed_only());
    }
}

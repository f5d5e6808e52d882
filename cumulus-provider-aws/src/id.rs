//! Composite identifiers
//!
//! Some AWS objects have no single identifier of their own. These ids are
//! persisted in state and accepted by import, so their formats are fixed.

use cumulus_core::provider::{ProviderError, ProviderResult};

/// `agmr-{restApiId}-{resourceId}-{httpMethod}-{statusCode}`
pub fn method_response_id(
    rest_api_id: &str,
    resource_id: &str,
    http_method: &str,
    status_code: &str,
) -> String {
    format!(
        "agmr-{}-{}-{}-{}",
        rest_api_id, resource_id, http_method, status_code
    )
}

/// Parts of a method response import id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodResponseKey {
    pub rest_api_id: String,
    pub resource_id: String,
    pub http_method: String,
    pub status_code: String,
}

impl MethodResponseKey {
    pub fn id(&self) -> String {
        method_response_id(
            &self.rest_api_id,
            &self.resource_id,
            &self.http_method,
            &self.status_code,
        )
    }
}

/// Parse an `agmr-` id back into its parts. API Gateway ids never contain `-`.
pub fn parse_method_response_id(id: &str) -> ProviderResult<MethodResponseKey> {
    let parts: Vec<&str> = id.split('-').collect();
    match parts.as_slice() {
        ["agmr", api, resource, method, status] if parts.iter().all(|p| !p.is_empty()) => {
            Ok(MethodResponseKey {
                rest_api_id: api.to_string(),
                resource_id: resource.to_string(),
                http_method: method.to_string(),
                status_code: status.to_string(),
            })
        }
        _ => Err(ProviderError::new(format!(
            "Unexpected format of method response ID ({:?})",
            id
        ))),
    }
}

/// Parse `REST-API-ID/RESOURCE-ID/HTTP-METHOD/STATUS-CODE`
pub fn parse_method_response_import_id(import_id: &str) -> ProviderResult<MethodResponseKey> {
    let parts: Vec<&str> = import_id.split('/').collect();
    match parts.as_slice() {
        [api, resource, method, status] if parts.iter().all(|p| !p.is_empty()) => {
            Ok(MethodResponseKey {
                rest_api_id: api.to_string(),
                resource_id: resource.to_string(),
                http_method: method.to_string(),
                status_code: status.to_string(),
            })
        }
        _ => Err(ProviderError::new(format!(
            "Unexpected format of ID ({:?}), expected REST-API-ID/RESOURCE-ID/HTTP-METHOD/STATUS-CODE",
            import_id
        ))),
    }
}

/// `{applicationId}/{configurationProfileId}/{versionNumber}`
pub fn hosted_configuration_version_id(
    application_id: &str,
    configuration_profile_id: &str,
    version_number: i64,
) -> String {
    format!(
        "{}/{}/{}",
        application_id, configuration_profile_id, version_number
    )
}

/// Parse a hosted configuration version id into its parts
pub fn parse_hosted_configuration_version_id(id: &str) -> ProviderResult<(String, String, i64)> {
    let parts: Vec<&str> = id.split('/').collect();
    if let [app, profile, version] = parts.as_slice()
        && !app.is_empty()
        && !profile.is_empty()
        && let Ok(version) = version.parse::<i64>()
    {
        return Ok((app.to_string(), profile.to_string(), version));
    }
    Err(ProviderError::new(format!(
        "Unexpected format of ID ({:?}), expected ApplicationID/ConfigurationProfileID/VersionNumber",
        id
    )))
}

/// The fields of a security group permission that identify a rule
#[derive(Debug, Clone, Default)]
pub struct IpPermissionKey<'a> {
    pub security_group_id: &'a str,
    /// `ingress` or `egress`
    pub rule_type: &'a str,
    pub protocol: &'a str,
    pub from_port: i64,
    pub to_port: i64,
    pub cidr_blocks: Vec<&'a str>,
    pub ipv6_cidr_blocks: Vec<&'a str>,
    pub prefix_list_ids: Vec<&'a str>,
    pub source_security_group_ids: Vec<&'a str>,
}

/// `sgrule-{crc32}` of the permission fields, stable under list reordering
pub fn security_group_rule_id(key: &IpPermissionKey<'_>) -> String {
    let mut buf = format!("{}-", key.security_group_id);
    if key.from_port > 0 {
        buf.push_str(&format!("{}-", key.from_port));
    }
    if key.to_port > 0 {
        buf.push_str(&format!("{}-", key.to_port));
    }
    buf.push_str(&format!("{}-", key.protocol));
    buf.push_str(&format!("{}-", key.rule_type));

    for list in [&key.cidr_blocks, &key.ipv6_cidr_blocks, &key.prefix_list_ids] {
        let mut sorted = list.clone();
        sorted.sort_unstable();
        for item in sorted {
            buf.push_str(&format!("{}-", item));
        }
    }

    // Source groups are written as `{group_id}-{group_name}-`; VPC groups have no name
    let mut groups = key.source_security_group_ids.clone();
    groups.sort_unstable();
    for group in groups {
        buf.push_str(&format!("{}--", group));
    }

    format!("sgrule-{}", crc32fast::hash(buf.as_bytes()))
}

/// A security group rule addressed by its fields:
/// `{sg}_{type}_{protocol}_{from}_{to}_{source}[_{source}...]`
///
/// A source is an IPv4 or IPv6 CIDR, a prefix list id, a security group id
/// or `self`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityGroupRuleAddress {
    pub security_group_id: String,
    pub rule_type: String,
    pub protocol: String,
    pub from_port: i64,
    pub to_port: i64,
    pub cidr_blocks: Vec<String>,
    pub ipv6_cidr_blocks: Vec<String>,
    pub prefix_list_ids: Vec<String>,
    pub source_security_group_id: Option<String>,
    pub self_referencing: bool,
}

impl SecurityGroupRuleAddress {
    pub fn id(&self) -> String {
        let mut parts = vec![
            self.security_group_id.clone(),
            self.rule_type.clone(),
            self.protocol.clone(),
            self.from_port.to_string(),
            self.to_port.to_string(),
        ];
        parts.extend(self.cidr_blocks.iter().cloned());
        parts.extend(self.ipv6_cidr_blocks.iter().cloned());
        parts.extend(self.prefix_list_ids.iter().cloned());
        if self.self_referencing {
            parts.push("self".to_string());
        }
        if let Some(group) = &self.source_security_group_id {
            parts.push(group.clone());
        }
        parts.join("_")
    }

    /// Source groups of the permission; `self` is the rule's own group
    pub fn source_groups(&self) -> Vec<&str> {
        let mut groups: Vec<&str> = self.source_security_group_id.as_deref().into_iter().collect();
        if self.self_referencing {
            groups.push(&self.security_group_id);
        }
        groups
    }

    /// `sgrule-{crc32}` id of this rule
    pub fn rule_id(&self) -> String {
        security_group_rule_id(&IpPermissionKey {
            security_group_id: &self.security_group_id,
            rule_type: &self.rule_type,
            protocol: &self.protocol,
            from_port: self.from_port,
            to_port: self.to_port,
            cidr_blocks: self.cidr_blocks.iter().map(String::as_str).collect(),
            ipv6_cidr_blocks: self.ipv6_cidr_blocks.iter().map(String::as_str).collect(),
            prefix_list_ids: self.prefix_list_ids.iter().map(String::as_str).collect(),
            source_security_group_ids: self.source_groups(),
        })
    }
}

pub fn parse_security_group_rule_id(id: &str) -> ProviderResult<SecurityGroupRuleAddress> {
    let invalid = || {
        ProviderError::new(format!(
            "Unexpected format of ID ({:?}), expected SECURITYGROUPID_TYPE_PROTOCOL_FROMPORT_TOPORT_SOURCE[_SOURCE]*",
            id
        ))
    };

    let parts: Vec<&str> = id.split('_').collect();
    let [group, rule_type, protocol, from, to, sources @ ..] = parts.as_slice() else {
        return Err(invalid());
    };
    if !group.starts_with("sg-") || sources.is_empty() || sources.iter().any(|s| s.is_empty()) {
        return Err(invalid());
    }
    if !matches!(*rule_type, "ingress" | "egress") {
        return Err(ProviderError::new(format!(
            "Invalid rule type {:?} in ID {:?}, expected ingress or egress",
            rule_type, id
        )));
    }
    let (Ok(from_port), Ok(to_port)) = (from.parse::<i64>(), to.parse::<i64>()) else {
        return Err(invalid());
    };

    let mut address = SecurityGroupRuleAddress {
        security_group_id: group.to_string(),
        rule_type: rule_type.to_string(),
        protocol: protocol.to_string(),
        from_port,
        to_port,
        ..Default::default()
    };
    for source in sources {
        if *source == "self" {
            address.self_referencing = true;
        } else if source.contains("sg-") {
            if address.source_security_group_id.is_some() {
                return Err(ProviderError::new(format!(
                    "ID {:?} names more than one source security group",
                    id
                )));
            }
            address.source_security_group_id = Some(source.to_string());
        } else if source.starts_with("pl-") {
            address.prefix_list_ids.push(source.to_string());
        } else if source.contains(':') {
            address.ipv6_cidr_blocks.push(source.to_string());
        } else {
            address.cidr_blocks.push(source.to_string());
        }
    }
    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_response_id_format() {
        assert_eq!(
            method_response_id("abc123", "res456", "GET", "200"),
            "agmr-abc123-res456-GET-200"
        );
    }

    #[test]
    fn method_response_id_parses_back() {
        let key = parse_method_response_id("agmr-abc123-res456-GET-200").unwrap();
        assert_eq!(key.resource_id, "res456");
        assert_eq!(key.status_code, "200");
        assert_eq!(key.id(), "agmr-abc123-res456-GET-200");
        assert!(parse_method_response_id("abc123-res456-GET-200").is_err());
        assert!(parse_method_response_id("agmr-abc123-res456-GET").is_err());
    }

    #[test]
    fn method_response_import_id() {
        let key = parse_method_response_import_id("abc123/res456/POST/201").unwrap();
        assert_eq!(key.rest_api_id, "abc123");
        assert_eq!(key.http_method, "POST");
        assert_eq!(key.id(), "agmr-abc123-res456-POST-201");

        assert!(parse_method_response_import_id("abc123/res456/POST").is_err());
        assert!(parse_method_response_import_id("abc123//POST/201").is_err());
        assert!(parse_method_response_import_id("a/b/c/d/e").is_err());
    }

    #[test]
    fn hosted_configuration_version_id_round_trip() {
        let id = hosted_configuration_version_id("app1", "prof1", 3);
        assert_eq!(id, "app1/prof1/3");
        assert_eq!(
            parse_hosted_configuration_version_id(&id).unwrap(),
            ("app1".to_string(), "prof1".to_string(), 3)
        );
        assert!(parse_hosted_configuration_version_id("app1/prof1").is_err());
        assert!(parse_hosted_configuration_version_id("app1/prof1/latest").is_err());
    }

    #[test]
    fn security_group_rule_id_ignores_cidr_order() {
        let a = IpPermissionKey {
            security_group_id: "sg-123",
            rule_type: "ingress",
            protocol: "tcp",
            from_port: 80,
            to_port: 8000,
            cidr_blocks: vec!["10.0.0.0/8", "192.168.0.0/16"],
            ..Default::default()
        };
        let b = IpPermissionKey {
            cidr_blocks: vec!["192.168.0.0/16", "10.0.0.0/8"],
            ..a.clone()
        };
        let id = security_group_rule_id(&a);
        assert!(id.starts_with("sgrule-"));
        assert_eq!(id, security_group_rule_id(&b));

        let egress = IpPermissionKey {
            rule_type: "egress",
            ..a.clone()
        };
        assert_ne!(id, security_group_rule_id(&egress));
    }

    #[test]
    fn security_group_rule_id_is_stable() {
        let simple = IpPermissionKey {
            security_group_id: "sg-12345",
            rule_type: "ingress",
            protocol: "tcp",
            from_port: 80,
            to_port: 8000,
            cidr_blocks: vec!["10.0.0.0/8"],
            ..Default::default()
        };
        assert_eq!(security_group_rule_id(&simple), "sgrule-3403497314");

        let egress = IpPermissionKey {
            rule_type: "egress",
            ..simple.clone()
        };
        assert_eq!(security_group_rule_id(&egress), "sgrule-1173186295");

        let egress_all = IpPermissionKey {
            protocol: "-1",
            from_port: 0,
            to_port: 0,
            ..egress.clone()
        };
        assert_eq!(security_group_rule_id(&egress_all), "sgrule-766323498");

        let source_groups = IpPermissionKey {
            cidr_blocks: vec![],
            source_security_group_ids: vec!["sg-12345678", "sg-987654321", "sg-12345678"],
            ..egress.clone()
        };
        assert_eq!(security_group_rule_id(&source_groups), "sgrule-351225364");
    }

    #[test]
    fn security_group_rule_address_parses_sources() {
        let address = parse_security_group_rule_id(
            "sg-123_ingress_tcp_80_8000_10.0.0.0/8_2001:db8::/32_pl-1a2b_self",
        )
        .unwrap();
        assert_eq!(address.security_group_id, "sg-123");
        assert_eq!(address.rule_type, "ingress");
        assert_eq!(address.from_port, 80);
        assert_eq!(address.to_port, 8000);
        assert_eq!(address.cidr_blocks, vec!["10.0.0.0/8"]);
        assert_eq!(address.ipv6_cidr_blocks, vec!["2001:db8::/32"]);
        assert_eq!(address.prefix_list_ids, vec!["pl-1a2b"]);
        assert!(address.self_referencing);
        assert_eq!(address.source_groups(), vec!["sg-123"]);
        assert_eq!(
            address.id(),
            "sg-123_ingress_tcp_80_8000_10.0.0.0/8_2001:db8::/32_pl-1a2b_self"
        );
    }

    #[test]
    fn security_group_rule_address_matches_rule_hash() {
        let address = parse_security_group_rule_id("sg-12345_ingress_tcp_80_8000_10.0.0.0/8").unwrap();
        assert_eq!(address.rule_id(), "sgrule-3403497314");

        let group = parse_security_group_rule_id("sg-1_egress_-1_0_0_123456789012/sg-2").unwrap();
        assert_eq!(group.protocol, "-1");
        assert_eq!(group.source_security_group_id.as_deref(), Some("123456789012/sg-2"));
    }

    #[test]
    fn security_group_rule_address_rejects_bad_ids() {
        assert!(parse_security_group_rule_id("sg-1_ingress_tcp_80_80").is_err());
        assert!(parse_security_group_rule_id("sg-1_sideways_tcp_80_80_10.0.0.0/8").is_err());
        assert!(parse_security_group_rule_id("sg-1_ingress_tcp_http_80_10.0.0.0/8").is_err());
        assert!(parse_security_group_rule_id("sgrule-3403497314").is_err());
        assert!(parse_security_group_rule_id("sg-1_ingress_tcp_80_80_sg-2_sg-3").is_err());
    }
}

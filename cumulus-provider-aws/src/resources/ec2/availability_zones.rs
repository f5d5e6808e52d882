//! ec2.availability_zones data source

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use aws_sdk_ec2::types::Filter;
use cumulus_core::provider::ProviderResult;
use cumulus_core::resource::{AttributeMap, Resource, State, Value};
use cumulus_core::schema::ResourceSchema;

use crate::config::AwsClient;
use crate::error::sdk_error;
use crate::resources::DataSourceHandler;
use crate::schemas::ec2::availability_zones_schema;

pub struct AvailabilityZonesHandler;

/// One zone as returned by DescribeAvailabilityZones
#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    pub name: String,
    pub zone_id: String,
    pub group_name: String,
}

/// Zones left after exclusions, as sorted name, zone id and group name lists
pub fn select_zones(
    zones: &[Zone],
    exclude_names: &[String],
    exclude_zone_ids: &[String],
) -> (Vec<String>, Vec<String>, Vec<String>) {
    let kept: Vec<&Zone> = zones
        .iter()
        .filter(|z| !exclude_names.contains(&z.name) && !exclude_zone_ids.contains(&z.zone_id))
        .collect();

    let mut names: Vec<String> = kept.iter().map(|z| z.name.clone()).collect();
    names.sort();
    let mut zone_ids: Vec<String> = kept.iter().map(|z| z.zone_id.clone()).collect();
    zone_ids.sort();
    let group_names: BTreeSet<String> = kept
        .iter()
        .filter(|z| !z.group_name.is_empty())
        .map(|z| z.group_name.clone())
        .collect();

    (names, zone_ids, group_names.into_iter().collect())
}

#[async_trait]
impl DataSourceHandler for AvailabilityZonesHandler {
    fn resource_type(&self) -> &'static str {
        "ec2.availability_zones"
    }

    fn schema(&self) -> ResourceSchema {
        availability_zones_schema()
    }

    async fn read(&self, client: &AwsClient, resource: &Resource) -> ProviderResult<State> {
        let mut req = client.ec2.describe_availability_zones();
        if let Some(all) = resource.get_bool("all_availability_zones") {
            req = req.all_availability_zones(all);
        }
        if let Some(state) = resource.get_str("state") {
            req = req.filters(Filter::builder().name("state").values(state).build());
        }

        log::debug!("Reading availability zones in {}", client.region);
        let output = req
            .send()
            .await
            .map_err(|e| sdk_error("Failed to describe availability zones", e))?;

        let zones: Vec<Zone> = output
            .availability_zones()
            .iter()
            .map(|az| Zone {
                name: az.zone_name().unwrap_or_default().to_string(),
                zone_id: az.zone_id().unwrap_or_default().to_string(),
                group_name: az.group_name().unwrap_or_default().to_string(),
            })
            .collect();

        let (names, zone_ids, group_names) = select_zones(
            &zones,
            &resource.get_string_list("exclude_names"),
            &resource.get_string_list("exclude_zone_ids"),
        );

        let mut attributes: HashMap<String, Value> = resource.attributes.clone();
        attributes.insert("names".to_string(), Value::string_list(names));
        attributes.insert("zone_ids".to_string(), Value::string_list(zone_ids));
        attributes.insert("group_names".to_string(), Value::string_list(group_names));

        Ok(State::existing(resource.id.clone(), attributes).with_identifier(client.region.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(name: &str, id: &str, group: &str) -> Zone {
        Zone {
            name: name.to_string(),
            zone_id: id.to_string(),
            group_name: group.to_string(),
        }
    }

    #[test]
    fn exclusions_and_sorting() {
        let zones = vec![
            zone("us-west-2c", "usw2-az3", "us-west-2"),
            zone("us-west-2a", "usw2-az1", "us-west-2"),
            zone("us-west-2-lax-1a", "usw2-lax1-az1", "us-west-2-lax-1"),
            zone("us-west-2b", "usw2-az2", "us-west-2"),
        ];
        let (names, ids, groups) = select_zones(
            &zones,
            &["us-west-2b".to_string()],
            &["usw2-lax1-az1".to_string()],
        );
        assert_eq!(names, vec!["us-west-2a", "us-west-2c"]);
        assert_eq!(ids, vec!["usw2-az1", "usw2-az3"]);
        assert_eq!(groups, vec!["us-west-2"]);
    }

    #[test]
    fn no_exclusions_keeps_everything() {
        let zones = vec![zone("a", "1", "g1"), zone("b", "2", "g2")];
        let (names, _, groups) = select_zones(&zones, &[], &[]);
        assert_eq!(names.len(), 2);
        assert_eq!(groups, vec!["g1", "g2"]);
    }
}

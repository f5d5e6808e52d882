//! Tag handling shared by taggable resources

use std::collections::{BTreeMap, HashMap};

use aws_sdk_ec2::types::{ResourceType as Ec2ResourceType, Tag, TagSpecification};
use cumulus_core::provider::ProviderResult;
use cumulus_core::resource::{AttributeMap, Resource, State, Value};

use crate::config::AwsClient;
use crate::error::sdk_error;

/// Tag keys reserved by AWS
const AWS_TAG_PREFIX: &str = "aws:";

/// Tags configured on a resource, merged over the provider's default tags
pub fn desired_tags(client: &AwsClient, resource: &Resource) -> HashMap<String, String> {
    merge_default_tags(&client.default_tags, &resource.get_string_map("tags"))
}

/// Resource tags win over default tags with the same key
pub fn merge_default_tags(
    defaults: &HashMap<String, String>,
    tags: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut merged = defaults.clone();
    merged.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Drop tags managed by AWS itself
pub fn ignore_aws_tags(tags: HashMap<String, String>) -> HashMap<String, String> {
    tags.into_iter()
        .filter(|(k, _)| !k.starts_with(AWS_TAG_PREFIX))
        .collect()
}

/// Remote tags as they should appear in state: AWS-managed tags and unchanged
/// default tags are hidden so that configurations without them do not diff
pub fn state_tags(client: &AwsClient, remote: HashMap<String, String>) -> Value {
    let visible: HashMap<String, String> = ignore_aws_tags(remote)
        .into_iter()
        .filter(|(k, v)| client.default_tags.get(k) != Some(v))
        .collect();
    tags_value(&visible)
}

pub fn tags_value(tags: &HashMap<String, String>) -> Value {
    Value::string_map(tags.iter().map(|(k, v)| (k.clone(), v.clone())))
}

/// Remote tags before and after an update, or `None` when they are unchanged
pub fn tag_changes(
    client: &AwsClient,
    from: &State,
    to: &Resource,
) -> Option<(HashMap<String, String>, HashMap<String, String>)> {
    let old = merge_default_tags(&client.default_tags, &from.get_string_map("tags"));
    let new = desired_tags(client, to);
    (old != new).then_some((old, new))
}

/// Tags to set and tag keys to remove to go from `old` to `new`
pub fn diff_tags(
    old: &HashMap<String, String>,
    new: &HashMap<String, String>,
) -> (BTreeMap<String, String>, Vec<String>) {
    let upsert: BTreeMap<String, String> = new
        .iter()
        .filter(|(k, v)| old.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let mut remove: Vec<String> = old
        .keys()
        .filter(|k| !new.contains_key(*k) && !k.starts_with(AWS_TAG_PREFIX))
        .cloned()
        .collect();
    remove.sort();
    (upsert, remove)
}

pub fn ec2_tags(tags: &HashMap<String, String>) -> Vec<Tag> {
    let sorted: BTreeMap<&String, &String> = tags.iter().collect();
    sorted
        .into_iter()
        .map(|(k, v)| Tag::builder().key(k).value(v).build())
        .collect()
}

pub fn ec2_tags_to_map(tags: &[Tag]) -> HashMap<String, String> {
    tags.iter()
        .filter_map(|t| Some((t.key()?.to_string(), t.value().unwrap_or_default().to_string())))
        .collect()
}

/// Tag specification for EC2 create calls; `None` when there is nothing to tag
pub fn ec2_tag_specification(
    resource_type: Ec2ResourceType,
    tags: &HashMap<String, String>,
) -> Option<TagSpecification> {
    if tags.is_empty() {
        return None;
    }
    Some(
        TagSpecification::builder()
            .resource_type(resource_type)
            .set_tags(Some(ec2_tags(tags)))
            .build(),
    )
}

/// Apply tag changes to an EC2 object
pub async fn update_ec2_tags(
    client: &AwsClient,
    ec2_id: &str,
    old: &HashMap<String, String>,
    new: &HashMap<String, String>,
) -> ProviderResult<()> {
    let (upsert, remove) = diff_tags(old, new);

    if !remove.is_empty() {
        log::debug!("Removing tags {:?} from {}", remove, ec2_id);
        let tags = remove.iter().map(|k| Tag::builder().key(k).build()).collect();
        client
            .ec2
            .delete_tags()
            .resources(ec2_id)
            .set_tags(Some(tags))
            .send()
            .await
            .map_err(|e| sdk_error(&format!("Failed to remove tags from {}", ec2_id), e))?;
    }

    if !upsert.is_empty() {
        log::debug!("Setting {} tags on {}", upsert.len(), ec2_id);
        let tags = upsert
            .iter()
            .map(|(k, v)| Tag::builder().key(k).value(v).build())
            .collect();
        client
            .ec2
            .create_tags()
            .resources(ec2_id)
            .set_tags(Some(tags))
            .send()
            .await
            .map_err(|e| sdk_error(&format!("Failed to tag {}", ec2_id), e))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn diff_tags_upserts_and_removes() {
        let old = map(&[("Name", "a"), ("env", "dev"), ("aws:cloudformation:stack", "x")]);
        let new = map(&[("Name", "b"), ("env", "dev"), ("owner", "me")]);
        let (upsert, remove) = diff_tags(&old, &new);
        assert_eq!(upsert.len(), 2);
        assert_eq!(upsert.get("Name").map(String::as_str), Some("b"));
        assert_eq!(upsert.get("owner").map(String::as_str), Some("me"));
        assert_eq!(remove, Vec::<String>::new());

        let (upsert, remove) = diff_tags(&new, &map(&[("env", "dev")]));
        assert!(upsert.is_empty());
        assert_eq!(remove, vec!["Name".to_string(), "owner".to_string()]);
    }

    #[test]
    fn resource_tags_override_defaults() {
        let merged = merge_default_tags(
            &map(&[("team", "infra"), ("env", "prod")]),
            &map(&[("env", "dev")]),
        );
        assert_eq!(merged, map(&[("team", "infra"), ("env", "dev")]));
    }

    #[test]
    fn aws_tags_ignored() {
        let tags = ignore_aws_tags(map(&[("aws:cloudformation:stack-id", "x"), ("Name", "y")]));
        assert_eq!(tags, map(&[("Name", "y")]));
    }

    #[test]
    fn ec2_tags_round_trip() {
        let tags = map(&[("b", "2"), ("a", "1")]);
        let ec2 = ec2_tags(&tags);
        assert_eq!(ec2[0].key(), Some("a"));
        assert_eq!(ec2_tags_to_map(&ec2), tags);
        assert!(ec2_tag_specification(Ec2ResourceType::Vpc, &HashMap::new()).is_none());
    }
}

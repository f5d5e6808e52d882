//! EC2 networking resources

pub mod availability_zones;
pub mod network_acl;
pub mod protocol;
pub mod security_group;
pub mod security_group_rule;
pub mod vpc;

use aws_sdk_ec2::types::AttributeBooleanValue;

pub(crate) fn attribute_bool(value: bool) -> AttributeBooleanValue {
    AttributeBooleanValue::builder().value(value).build()
}

/// `arn:{partition}:ec2:{region}:{account}:{kind}/{id}`
pub(crate) fn ec2_arn(region: &str, owner_id: &str, kind: &str, id: &str) -> String {
    let partition = if region.starts_with("cn-") {
        "aws-cn"
    } else if region.starts_with("us-gov-") {
        "aws-us-gov"
    } else {
        "aws"
    };
    format!(
        "arn:{}:ec2:{}:{}:{}/{}",
        partition, region, owner_id, kind, id
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arn_partition_follows_region() {
        assert_eq!(
            ec2_arn("eu-west-1", "123456789012", "vpc", "vpc-1"),
            "arn:aws:ec2:eu-west-1:123456789012:vpc/vpc-1"
        );
        assert!(ec2_arn("cn-north-1", "1", "vpc", "vpc-1").starts_with("arn:aws-cn:"));
        assert!(ec2_arn("us-gov-west-1", "1", "vpc", "vpc-1").starts_with("arn:aws-us-gov:"));
    }
}

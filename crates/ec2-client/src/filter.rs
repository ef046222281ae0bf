//! Describe filter builders

use crate::models::Filter;

impl Filter {
    /// Matches resources in a VPC
    pub fn vpc_id(vpc_id: &str) -> Self {
        Self {
            name: "vpc-id".to_string(),
            values: vec![vpc_id.to_string()],
        }
    }

    /// Matches resources carrying a tag key, whatever its value
    pub fn tag_key(key: &str) -> Self {
        Self {
            name: "tag-key".to_string(),
            values: vec![key.to_string()],
        }
    }

    /// Matches resources whose tag has the given value
    pub fn tag(key: &str, value: &str) -> Self {
        Self {
            name: format!("tag:{}", key),
            values: vec![value.to_string()],
        }
    }
}

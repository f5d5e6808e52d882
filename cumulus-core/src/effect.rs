//! Effect - A side effect described as a value
//!
//! Effects are produced by the differ and executed by the Interpreter.

use std::fmt;

use crate::resource::{Resource, ResourceId, State};

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Evaluate a data source
    Read(Resource),
    Create(Resource),
    Update {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// Delete the existing object, then create the desired one
    Replace {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// Delete an object that is no longer declared
    Delete { id: ResourceId, from: State },
}

impl Effect {
    pub fn resource_id(&self) -> &ResourceId {
        match self {
            Effect::Read(r) | Effect::Create(r) => &r.id,
            Effect::Update { id, .. } | Effect::Replace { id, .. } | Effect::Delete { id, .. } => id,
        }
    }

    /// Whether this Effect changes remote infrastructure
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Effect::Read(_))
    }

    /// Single-character marker used in plan output
    pub fn symbol(&self) -> &'static str {
        match self {
            Effect::Read(_) => "<=",
            Effect::Create(_) => "+",
            Effect::Update { .. } => "~",
            Effect::Replace { .. } => "-/+",
            Effect::Delete { .. } => "-",
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.symbol(), self.resource_id())?;
        match self {
            Effect::Update {
                changed_attributes, ..
            }
            | Effect::Replace {
                changed_attributes, ..
            } if !changed_attributes.is_empty() => {
                write!(f, " ({})", changed_attributes.join(", "))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_changed_attributes() {
        let id = ResourceId::new("ec2.vpc", "main");
        let effect = Effect::Replace {
            id: id.clone(),
            from: State::not_found(id.clone()),
            to: Resource::new("ec2.vpc", "main"),
            changed_attributes: vec!["cidr_block".to_string()],
        };
        assert_eq!(effect.to_string(), "-/+ ec2.vpc.main (cidr_block)");

        let delete = Effect::Delete {
            id: id.clone(),
            from: State::existing(id, Default::default()).with_identifier("vpc-123"),
        };
        assert_eq!(delete.to_string(), "- ec2.vpc.main");
        assert!(delete.is_mutating());
    }
}

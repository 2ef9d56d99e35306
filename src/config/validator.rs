//! Endpoint validation: every name an endpoint mentions must resolve against its model.

use crate::endpoint::Endpoint;
use crate::error::ConfigError;

fn unknown(endpoint: &Endpoint, column: &str, context: &'static str) -> ConfigError {
    ConfigError::UnknownColumn {
        endpoint: endpoint.name.clone(),
        column: column.to_string(),
        context,
    }
}

/// Checks one endpoint in isolation. Relationship targets are checked by
/// [`validate_relationships`] once every endpoint is known.
pub fn validate_endpoint(endpoint: &Endpoint) -> Result<(), ConfigError> {
    if endpoint.primary_keys.is_empty() {
        return Err(ConfigError::EmptyPrimaryKey {
            endpoint: endpoint.name.clone(),
        });
    }
    for pk in &endpoint.primary_keys {
        if endpoint.key_kind(pk).is_none() {
            return Err(ConfigError::UnknownPrimaryKey {
                endpoint: endpoint.name.clone(),
                key: pk.clone(),
            });
        }
    }

    let model = &endpoint.model;
    let checks: [(&'static str, Vec<&String>); 5] = [
        ("only", endpoint.only.iter().flatten().collect()),
        ("exclude", endpoint.exclude.iter().collect()),
        ("defaults", endpoint.defaults.keys().collect()),
        ("fixed", endpoint.fixed.keys().collect()),
        ("validators", endpoint.validators.keys().collect()),
    ];
    for (context, names) in checks {
        for name in names {
            if !model.has_column(name) {
                return Err(unknown(endpoint, name, context));
            }
        }
    }

    for rel in &endpoint.relationships {
        for (local, _) in &rel.pairs {
            if !model.has_column(local) {
                return Err(unknown(endpoint, local, "relationships"));
            }
        }
    }
    Ok(())
}

/// Relationship targets must be registered endpoints and their remote columns must exist.
pub fn validate_relationships(endpoints: &[&Endpoint]) -> Result<(), ConfigError> {
    for endpoint in endpoints {
        for rel in &endpoint.relationships {
            let target = endpoints.iter().find(|e| e.name == rel.target).ok_or_else(|| {
                ConfigError::UnknownRelationshipTarget {
                    endpoint: endpoint.name.clone(),
                    relationship: rel.name.clone(),
                    target: rel.target.clone(),
                }
            })?;
            for (_, remote) in &rel.pairs {
                if !target.model.has_column(remote) {
                    return Err(unknown(target, remote, "relationships"));
                }
            }
        }
    }
    Ok(())
}

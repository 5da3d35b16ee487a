//! The metamodel: validated entity descriptions built from a model source.
//!
//! Key invariants:
//! - Entity names are unique; inheritance chains are acyclic.
//! - Property names are unique within an entity and all of its ancestors.
//! - Relationship destinations and inverses resolve, and an inverse points
//!   back at a type assignable to the declaring entity.

mod definition;
mod entity;

pub use definition::{AttributeDefinition, EntityDefinition, ModelDefinition, RelationshipDefinition};
pub use entity::{
    AttributeDescription, AttributeType, Cardinality, EntityDescription, PropertyDescription,
    RelationshipDescription,
};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::error::ModelError;

/// Static type tag naming the entity a Rust type stands for.
///
/// ```
/// use objgraph::EntityKind;
///
/// struct Employee;
/// impl EntityKind for Employee {
///     const ENTITY_NAME: &'static str = "Employee";
/// }
/// ```
pub trait EntityKind {
    const ENTITY_NAME: &'static str;
}

/// A validated, immutable set of entity descriptions.
#[derive(Debug)]
pub struct Model {
    entities: BTreeMap<String, Arc<EntityDescription>>,
    definition: ModelDefinition,
    version_hash: String,
}

impl Model {
    /// Validates `definition` and builds every entity description.
    pub fn new(definition: ModelDefinition) -> Result<Self, ModelError> {
        let defs = index_definitions(&definition)?;

        let mut built: BTreeMap<String, EntityDescription> = BTreeMap::new();
        for def in &definition.entities {
            let chain = inheritance_chain(&defs, &def.name)?;
            built.insert(def.name.clone(), build_entity(&chain)?);
        }

        for def in &definition.entities {
            for rel in &def.relationships {
                validate_relationship(&built, &def.name, rel)?;
            }
        }

        let names: Vec<String> = built.keys().cloned().collect();
        for name in names {
            let ancestors = built.get(&name).map(|e| e.ancestors.clone()).unwrap_or_default();
            for ancestor in ancestors {
                if let Some(parent) = built.get_mut(&ancestor) {
                    parent.sub_entities.push(name.clone());
                }
            }
        }

        let version_hash = hash_definition(&definition);
        let entities = built.into_iter().map(|(k, v)| (k, Arc::new(v))).collect();

        Ok(Self {
            entities,
            definition,
            version_hash,
        })
    }

    /// Convenience for building from a list of entity definitions.
    pub fn from_entities(
        entities: impl IntoIterator<Item = EntityDefinition>,
    ) -> Result<Self, ModelError> {
        Self::new(ModelDefinition {
            entities: entities.into_iter().collect(),
        })
    }

    /// Looks up an entity by name.
    pub fn entity(&self, name: &str) -> Result<&Arc<EntityDescription>, ModelError> {
        self.entities.get(name).ok_or_else(|| ModelError::UnknownEntity {
            name: name.to_string(),
        })
    }

    /// Looks up the entity a type tag stands for.
    pub fn entity_of<T: EntityKind>(&self) -> Result<&Arc<EntityDescription>, ModelError> {
        self.entity(T::ENTITY_NAME)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityDescription>> {
        self.entities.values()
    }

    #[must_use]
    pub const fn definition(&self) -> &ModelDefinition {
        &self.definition
    }

    /// Stable blake3 hash (hex) of the model source, independent of entity
    /// declaration order. Stores record it to detect model drift.
    #[must_use]
    pub fn version_hash(&self) -> &str {
        &self.version_hash
    }
}

fn index_definitions(
    definition: &ModelDefinition,
) -> Result<HashMap<&str, &EntityDefinition>, ModelError> {
    let mut defs = HashMap::with_capacity(definition.entities.len());
    for def in &definition.entities {
        if defs.insert(def.name.as_str(), def).is_some() {
            return Err(ModelError::DuplicateEntity {
                name: def.name.clone(),
            });
        }
    }
    Ok(defs)
}

/// Returns `[root, ..., name]`.
fn inheritance_chain<'a>(
    defs: &HashMap<&str, &'a EntityDefinition>,
    name: &str,
) -> Result<Vec<&'a EntityDefinition>, ModelError> {
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut current = Some(name.to_string());

    while let Some(n) = current {
        if !seen.insert(n.clone()) {
            return Err(ModelError::InheritanceCycle {
                entity: name.to_string(),
            });
        }
        let def = defs
            .get(n.as_str())
            .ok_or(ModelError::UnknownEntity { name: n.clone() })?;
        chain.push(*def);
        current = def.parent.clone();
    }

    chain.reverse();
    Ok(chain)
}

fn build_entity(chain: &[&EntityDefinition]) -> Result<EntityDescription, ModelError> {
    let Some(own) = chain.last() else {
        return Err(ModelError::UnknownEntity {
            name: String::new(),
        });
    };

    let mut properties = Vec::new();
    let mut index = HashMap::new();
    let mut push = |prop: PropertyDescription| -> Result<(), ModelError> {
        let name = prop.name().to_string();
        if index.contains_key(&name) {
            return Err(ModelError::DuplicateProperty {
                entity: own.name.clone(),
                property: name,
            });
        }
        index.insert(name, properties.len());
        properties.push(prop);
        Ok(())
    };

    for def in chain {
        for attr in &def.attributes {
            let default = match &attr.default {
                None => None,
                Some(v) => Some(attr.attribute_type.coerce(v).ok_or_else(|| {
                    ModelError::InvalidDefault {
                        entity: def.name.clone(),
                        attribute: attr.name.clone(),
                        expected: attr.attribute_type.to_string(),
                    }
                })?),
            };
            push(PropertyDescription::Attribute(AttributeDescription {
                name: attr.name.clone(),
                entity: def.name.clone(),
                attribute_type: attr.attribute_type,
                required: attr.required,
                default,
            }))?;
        }
        for rel in &def.relationships {
            push(PropertyDescription::Relationship(RelationshipDescription {
                name: rel.name.clone(),
                entity: def.name.clone(),
                destination: rel.destination.clone(),
                cardinality: rel.cardinality,
                inverse: rel.inverse.clone(),
                required: rel.required,
            }))?;
        }
    }

    let ancestors = chain[..chain.len() - 1]
        .iter()
        .rev()
        .map(|d| d.name.clone())
        .collect();

    Ok(EntityDescription {
        name: own.name.clone(),
        super_entity: own.parent.clone(),
        ancestors,
        sub_entities: Vec::new(),
        properties,
        index,
    })
}

fn validate_relationship(
    built: &BTreeMap<String, EntityDescription>,
    entity: &str,
    rel: &RelationshipDefinition,
) -> Result<(), ModelError> {
    let destination = built
        .get(&rel.destination)
        .ok_or_else(|| ModelError::UnknownEntity {
            name: rel.destination.clone(),
        })?;

    let Some(inverse_name) = rel.inverse.as_deref() else {
        return Ok(());
    };

    let inverse = destination
        .relationship(inverse_name)
        .ok_or_else(|| ModelError::UnknownEntity {
            name: format!("{}.{inverse_name}", rel.destination),
        })?;

    let own = built.get(entity).ok_or_else(|| ModelError::UnknownEntity {
        name: entity.to_string(),
    })?;
    let back = built
        .get(&inverse.destination)
        .ok_or_else(|| ModelError::UnknownEntity {
            name: inverse.destination.clone(),
        })?;

    if own.is_kind_of(&back.name) || back.is_kind_of(&own.name) {
        Ok(())
    } else {
        Err(ModelError::IncompatibleInverse {
            entity: entity.to_string(),
            relationship: rel.name.clone(),
            inverse: inverse_name.to_string(),
        })
    }
}

fn hash_definition(definition: &ModelDefinition) -> String {
    let mut canonical = definition.clone();
    canonical.entities.sort_by(|a, b| a.name.cmp(&b.name));
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}

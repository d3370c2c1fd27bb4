//! Relationship schema: which relations each entity type declares.
//!
//! A schema is a static table keyed by `(entity type, relation name)`. Every entry names a
//! cardinality, the remote entity type, and the name of the reciprocal relation on that
//! remote type. Entries always come in matched pairs: if `Device.interfaces` points at
//! `Interface` with remote name `device`, then `Interface.device` must point back at
//! `Device` with remote name `interfaces`. [`Schema::new`] refuses unpaired declarations.
//!
//! Entity types may extend another type, inheriting its relations. Linking checks use
//! [`Schema::is_a`], so a `Router` extending `Device` can be linked wherever a `Device`
//! is expected.
//!
//! # Example
//!
//! ```
//! use netabase_relations::schema::{Cardinality, Schema};
//!
//! let schema = Schema::builder()
//!     .entity("Device", |t| {
//!         t.to_many_cont("interfaces", "Interface", "device")
//!             .to_one("location", "Location", "devices")
//!     })
//!     .entity("Interface", |t| t.to_one("device", "Device", "interfaces"))
//!     .entity("Location", |t| t.to_many("devices", "Device", "location"))
//!     .build()
//!     .unwrap();
//!
//! let rel = schema.lookup("Device", "interfaces").unwrap();
//! assert_eq!(rel.cardinality, Cardinality::ToManyCont);
//! assert_eq!(rel.remote_cardinality, Cardinality::ToOne);
//! ```

pub mod toml;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::{RelationsError, RelationsResult};

/// Relation cardinality.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    IntoStaticStr,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Cardinality {
    /// At most one link
    ToOne,
    /// Unordered set of links to entities owned elsewhere
    ToMany,
    /// Unordered set of links to entities this relation owns
    ToManyCont,
}

impl Cardinality {
    pub fn is_to_many(&self) -> bool {
        matches!(self, Cardinality::ToMany | Cardinality::ToManyCont)
    }

    /// Whether two sides may be declared as a pair.
    pub fn pairs_with(&self, other: Cardinality) -> bool {
        use Cardinality::*;
        match (self, other) {
            (ToManyCont, ToOne) | (ToOne, ToManyCont) => true,
            (ToManyCont, _) | (_, ToManyCont) => false,
            _ => true,
        }
    }
}

/// One declared relation on an entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelSchema {
    pub name: String,
    pub cardinality: Cardinality,
    pub remote_type: String,
    pub remote_name: String,
    /// Skip this relation when the owning entity is copied
    #[serde(default, skip_serializing_if = "is_false")]
    pub no_copy: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl RelSchema {
    pub fn new(
        name: impl Into<String>,
        cardinality: Cardinality,
        remote_type: impl Into<String>,
        remote_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            cardinality,
            remote_type: remote_type.into(),
            remote_name: remote_name.into(),
            no_copy: false,
        }
    }
}

/// Declaration of an entity type and the relations it introduces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityTypeDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    #[serde(default)]
    pub relations: Vec<RelSchema>,
}

impl EntityTypeDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extends: None,
            relations: Vec::new(),
        }
    }
}

/// The serialisable form of a schema, as found in TOML schema files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    #[serde(default, rename = "entity")]
    pub entities: Vec<EntityTypeDef>,
}

/// A relation as seen from one entity type, with both sides resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRelation {
    pub name: String,
    /// Type that declared the relation (may be an ancestor of the entity's type)
    pub owner_type: String,
    pub cardinality: Cardinality,
    pub remote_type: String,
    pub remote_name: String,
    pub remote_cardinality: Cardinality,
    pub no_copy: bool,
}

impl ResolvedRelation {
    /// True for the ToOne back-pointer of a containment relation.
    pub fn points_at_container(&self) -> bool {
        self.remote_cardinality == Cardinality::ToManyCont
    }
}

#[derive(Debug, Clone)]
struct ResolvedType {
    extends: Option<String>,
    relations: BTreeMap<String, Arc<ResolvedRelation>>,
}

/// Validated, immutable relationship schema.
#[derive(Debug, Clone)]
pub struct Schema {
    definition: SchemaDefinition,
    types: HashMap<String, ResolvedType>,
}

impl Schema {
    /// Validate and resolve a set of entity type declarations.
    pub fn new(entities: Vec<EntityTypeDef>) -> RelationsResult<Self> {
        Self::from_definition(SchemaDefinition { entities })
    }

    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn from_definition(definition: SchemaDefinition) -> RelationsResult<Self> {
        let mut declared: HashMap<String, &EntityTypeDef> = HashMap::new();
        for def in &definition.entities {
            if def.name.is_empty() {
                return Err(RelationsError::SchemaDefinition(
                    "Entity type name cannot be empty".to_string(),
                ));
            }
            if declared.insert(def.name.clone(), def).is_some() {
                return Err(RelationsError::SchemaDefinition(format!(
                    "Duplicate entity type: {}",
                    def.name
                )));
            }
        }

        let mut types = HashMap::new();
        for def in &definition.entities {
            let chain = ancestry(&declared, &def.name)?;
            let mut relations = BTreeMap::new();
            // Root ancestor first so redeclarations are caught against the inherited set
            for type_name in chain.iter().rev() {
                let owner = declared[type_name.as_str()];
                for rel in &owner.relations {
                    if rel.name.is_empty() {
                        return Err(RelationsError::SchemaDefinition(format!(
                            "Relation name cannot be empty on {}",
                            owner.name
                        )));
                    }
                    if relations.contains_key(&rel.name) {
                        return Err(RelationsError::SchemaDefinition(format!(
                            "Relation {} declared more than once on {}",
                            rel.name, def.name
                        )));
                    }
                    relations.insert(rel.name.clone(), (owner.name.clone(), rel.clone()));
                }
            }
            types.insert(
                def.name.clone(),
                (def.extends.clone(), relations),
            );
        }

        let mut resolved: HashMap<String, ResolvedType> = HashMap::new();
        for (type_name, (extends, relations)) in &types {
            let mut out = BTreeMap::new();
            for (rel_name, (owner, rel)) in relations {
                let remote_relations = match types.get(&rel.remote_type) {
                    Some((_, remote_relations)) => remote_relations,
                    None => {
                        return Err(RelationsError::SchemaDefinition(format!(
                            "{}.{} points at unknown type {}",
                            owner, rel.name, rel.remote_type
                        )));
                    }
                };
                let reciprocal = match remote_relations.get(&rel.remote_name) {
                    Some((_, reciprocal)) => reciprocal,
                    None => {
                        return Err(RelationsError::SchemaDefinition(format!(
                            "{}.{} has no reciprocal: {} does not declare {}",
                            owner, rel.name, rel.remote_type, rel.remote_name
                        )));
                    }
                };
                if reciprocal.remote_name != rel.name
                    || !(is_a_in(&declared, owner, &reciprocal.remote_type)
                        || is_a_in(&declared, &reciprocal.remote_type, owner))
                {
                    return Err(RelationsError::SchemaDefinition(format!(
                        "{}.{} and {}.{} are not a matched pair",
                        owner, rel.name, rel.remote_type, rel.remote_name
                    )));
                }
                if !rel.cardinality.pairs_with(reciprocal.cardinality) {
                    return Err(RelationsError::SchemaDefinition(format!(
                        "{}.{} ({}) cannot pair with {}.{} ({})",
                        owner,
                        rel.name,
                        rel.cardinality,
                        rel.remote_type,
                        rel.remote_name,
                        reciprocal.cardinality
                    )));
                }
                out.insert(
                    rel_name.clone(),
                    Arc::new(ResolvedRelation {
                        name: rel.name.clone(),
                        owner_type: owner.clone(),
                        cardinality: rel.cardinality,
                        remote_type: rel.remote_type.clone(),
                        remote_name: rel.remote_name.clone(),
                        remote_cardinality: reciprocal.cardinality,
                        no_copy: rel.no_copy,
                    }),
                );
            }
            resolved.insert(
                type_name.clone(),
                ResolvedType {
                    extends: extends.clone(),
                    relations: out,
                },
            );
        }

        Ok(Self {
            definition,
            types: resolved,
        })
    }

    pub fn definition(&self) -> &SchemaDefinition {
        &self.definition
    }

    pub fn has_type(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// All entity type names, sorted.
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Look up the relation `relation` on `type_name`, inherited relations included.
    pub fn lookup(&self, type_name: &str, relation: &str) -> RelationsResult<Arc<ResolvedRelation>> {
        let resolved = self
            .types
            .get(type_name)
            .ok_or_else(|| RelationsError::UnknownEntityType(type_name.to_string()))?;
        resolved
            .relations
            .get(relation)
            .cloned()
            .ok_or_else(|| RelationsError::UnknownRelation {
                type_name: type_name.to_string(),
                relation: relation.to_string(),
            })
    }

    /// Every relation an entity of `type_name` owns, ordered by name.
    pub fn relations_of(&self, type_name: &str) -> RelationsResult<Vec<Arc<ResolvedRelation>>> {
        self.types
            .get(type_name)
            .map(|t| t.relations.values().cloned().collect())
            .ok_or_else(|| RelationsError::UnknownEntityType(type_name.to_string()))
    }

    /// True if `type_name` is `ancestor` or extends it, directly or indirectly.
    pub fn is_a(&self, type_name: &str, ancestor: &str) -> bool {
        let mut current = Some(type_name);
        while let Some(name) = current {
            if name == ancestor {
                return true;
            }
            current = self.types.get(name).and_then(|t| t.extends.as_deref());
        }
        false
    }
}

fn ancestry(declared: &HashMap<String, &EntityTypeDef>, type_name: &str) -> RelationsResult<Vec<String>> {
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut current = Some(type_name.to_string());
    while let Some(name) = current {
        if !seen.insert(name.clone()) {
            return Err(RelationsError::SchemaDefinition(format!(
                "Inheritance cycle through {}",
                name
            )));
        }
        let def = declared.get(&name).ok_or_else(|| {
            RelationsError::SchemaDefinition(format!("{} extends unknown type {}", type_name, name))
        })?;
        chain.push(name);
        current = def.extends.clone();
    }
    Ok(chain)
}

fn is_a_in(declared: &HashMap<String, &EntityTypeDef>, type_name: &str, ancestor: &str) -> bool {
    let mut current = Some(type_name);
    let mut hops = 0;
    while let Some(name) = current {
        if name == ancestor {
            return true;
        }
        hops += 1;
        if hops > declared.len() {
            return false;
        }
        current = declared.get(name).and_then(|d| d.extends.as_deref());
    }
    false
}

/// Fluent construction of a [`Schema`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    entities: Vec<EntityTypeDef>,
}

impl SchemaBuilder {
    pub fn entity(
        mut self,
        name: impl Into<String>,
        declare: impl FnOnce(EntityTypeBuilder) -> EntityTypeBuilder,
    ) -> Self {
        let builder = declare(EntityTypeBuilder {
            def: EntityTypeDef::new(name),
        });
        self.entities.push(builder.def);
        self
    }

    pub fn build(self) -> RelationsResult<Schema> {
        Schema::new(self.entities)
    }
}

#[derive(Debug)]
pub struct EntityTypeBuilder {
    def: EntityTypeDef,
}

impl EntityTypeBuilder {
    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.def.extends = Some(parent.into());
        self
    }

    pub fn relation(mut self, rel: RelSchema) -> Self {
        self.def.relations.push(rel);
        self
    }

    pub fn to_one(self, name: &str, remote_type: &str, remote_name: &str) -> Self {
        self.relation(RelSchema::new(name, Cardinality::ToOne, remote_type, remote_name))
    }

    pub fn to_many(self, name: &str, remote_type: &str, remote_name: &str) -> Self {
        self.relation(RelSchema::new(name, Cardinality::ToMany, remote_type, remote_name))
    }

    pub fn to_many_cont(self, name: &str, remote_type: &str, remote_name: &str) -> Self {
        self.relation(RelSchema::new(
            name,
            Cardinality::ToManyCont,
            remote_type,
            remote_name,
        ))
    }

    /// Exclude an already declared relation from entity copies.
    pub fn no_copy(mut self, name: &str) -> Self {
        for rel in self.def.relations.iter_mut().filter(|r| r.name == name) {
            rel.no_copy = true;
        }
        self
    }
}

//! Type registry: maps type names to their declared schemas.
//!
//! The tree never inspects application types directly. It asks a
//! [`TypeRegistry`] for the [`TypeSchema`] of a type name, which lists the
//! storage [`TypeKey`], the transitive supertypes and the declared children.

use crate::error::{CoreError, CoreResult};
use parking_lot::RwLock;
use resdb_codec::{TypeKey, LIST_TYPE_NAME};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Debug;
use std::sync::Arc;

/// Names of the built-in types.
pub mod names {
    /// Base type every resource type is assignable to.
    pub const RESOURCE: &str = "Resource";
    /// Boolean leaf.
    pub const BOOLEAN: &str = "BooleanResource";
    /// Float leaf.
    pub const FLOAT: &str = "FloatResource";
    /// Int leaf.
    pub const INTEGER: &str = "IntegerResource";
    /// Long leaf, used for timestamps.
    pub const TIME: &str = "TimeResource";
    /// String leaf.
    pub const STRING: &str = "StringResource";
    /// Boolean array leaf.
    pub const BOOLEAN_ARRAY: &str = "BooleanArrayResource";
    /// Float array leaf.
    pub const FLOAT_ARRAY: &str = "FloatArrayResource";
    /// Int array leaf.
    pub const INTEGER_ARRAY: &str = "IntegerArrayResource";
    /// Long array leaf.
    pub const TIME_ARRAY: &str = "TimeArrayResource";
    /// String array leaf.
    pub const STRING_ARRAY: &str = "StringArrayResource";
    /// Opaque byte leaf.
    pub const BYTE_ARRAY: &str = "ByteArrayResource";
    /// Homogeneous list of complex resources.
    pub const LIST: &str = resdb_codec::LIST_TYPE_NAME;
}

/// A declared child slot of a type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildDecl {
    /// Declared type of the child.
    pub type_name: String,
    /// Element type when the child is a list.
    pub element_type: Option<String>,
    /// Whether the child is excluded from value persistence.
    pub nonpersistent: bool,
}

impl ChildDecl {
    /// A child of type `type_name`.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            element_type: None,
            nonpersistent: false,
        }
    }

    /// A list child holding elements of `element_type`.
    pub fn list_of(element_type: impl Into<String>) -> Self {
        Self {
            type_name: LIST_TYPE_NAME.to_string(),
            element_type: Some(element_type.into()),
            nonpersistent: false,
        }
    }

    /// Marks the child nonpersistent.
    #[must_use]
    pub fn nonpersistent(mut self) -> Self {
        self.nonpersistent = true;
        self
    }

    /// True if the slot holds a list.
    #[must_use]
    pub fn is_list(&self) -> bool {
        self.type_name == LIST_TYPE_NAME
    }
}

/// Resolved description of a type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSchema {
    name: String,
    type_key: TypeKey,
    supertypes: BTreeSet<String>,
    children: BTreeMap<String, ChildDecl>,
}

impl TypeSchema {
    /// A complex type with no children yet.
    pub fn complex(name: impl Into<String>) -> Self {
        Self::leaf(name, TypeKey::Complex)
    }

    /// A type stored as `key`.
    pub fn leaf(name: impl Into<String>, key: TypeKey) -> Self {
        Self {
            name: name.into(),
            type_key: key,
            supertypes: BTreeSet::new(),
            children: BTreeMap::new(),
        }
    }

    /// Declares `parent` as a supertype. Its children and supertypes are
    /// merged in when the schema is registered.
    #[must_use]
    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.supertypes.insert(parent.into());
        self
    }

    /// Declares a child slot.
    #[must_use]
    pub fn child(mut self, name: impl Into<String>, decl: ChildDecl) -> Self {
        self.children.insert(name.into(), decl);
        self
    }

    /// Type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Storage type.
    #[must_use]
    pub fn type_key(&self) -> TypeKey {
        self.type_key
    }

    /// All supertypes, transitively.
    #[must_use]
    pub fn supertypes(&self) -> &BTreeSet<String> {
        &self.supertypes
    }

    /// All declared children, inherited ones included.
    #[must_use]
    pub fn children(&self) -> &BTreeMap<String, ChildDecl> {
        &self.children
    }

    /// The declared child `name`.
    #[must_use]
    pub fn child_decl(&self, name: &str) -> Option<&ChildDecl> {
        self.children.get(name)
    }

    /// True if a value of this type may stand where `target` is expected.
    #[must_use]
    pub fn is_subtype_of(&self, target: &str) -> bool {
        target == names::RESOURCE || self.name == target || self.supertypes.contains(target)
    }
}

/// Resolves type names to schemas.
pub trait TypeRegistry: Send + Sync + Debug {
    /// Looks up `type_name`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnresolvableType`] for unknown names.
    fn resolve(&self, type_name: &str) -> CoreResult<Arc<TypeSchema>>;

    /// True if `candidate` may be used where `target` is declared.
    fn is_assignable(&self, target: &str, candidate: &str) -> bool {
        if target == names::RESOURCE || target == candidate {
            return true;
        }
        self.resolve(candidate)
            .map(|schema| schema.is_subtype_of(target))
            .unwrap_or(false)
    }
}

/// In-memory registry, preloaded with the primitive types and the list type.
#[derive(Debug)]
pub struct SchemaRegistry {
    types: RwLock<HashMap<String, Arc<TypeSchema>>>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRegistry {
    /// Creates a registry holding the built-in types.
    #[must_use]
    pub fn new() -> Self {
        let builtins = [
            TypeSchema::complex(names::RESOURCE),
            TypeSchema::leaf(names::BOOLEAN, TypeKey::Boolean),
            TypeSchema::leaf(names::FLOAT, TypeKey::Float),
            TypeSchema::leaf(names::INTEGER, TypeKey::Int),
            TypeSchema::leaf(names::TIME, TypeKey::Long),
            TypeSchema::leaf(names::STRING, TypeKey::String),
            TypeSchema::leaf(names::BOOLEAN_ARRAY, TypeKey::BooleanArray),
            TypeSchema::leaf(names::FLOAT_ARRAY, TypeKey::FloatArray),
            TypeSchema::leaf(names::INTEGER_ARRAY, TypeKey::IntArray),
            TypeSchema::leaf(names::TIME_ARRAY, TypeKey::LongArray),
            TypeSchema::leaf(names::STRING_ARRAY, TypeKey::StringArray),
            TypeSchema::leaf(names::BYTE_ARRAY, TypeKey::Opaque),
            TypeSchema::leaf(names::LIST, TypeKey::List),
        ];
        let types = builtins
            .into_iter()
            .map(|schema| (schema.name.clone(), Arc::new(schema)))
            .collect();
        Self {
            types: RwLock::new(types),
        }
    }

    /// Registers `schema`, flattening the children and supertypes of every
    /// declared parent. A complex schema extending a leaf type is stored
    /// as that leaf type.
    ///
    /// # Errors
    ///
    /// Fails if a declared parent is not registered, or if the name is
    /// a built-in type.
    pub fn register(&self, mut schema: TypeSchema) -> CoreResult<Arc<TypeSchema>> {
        if is_builtin(&schema.name) {
            return Err(CoreError::invalid_type(format!(
                "{} is a built-in type",
                schema.name
            )));
        }
        let mut types = self.types.write();

        let direct: Vec<String> = schema.supertypes.iter().cloned().collect();
        for parent_name in direct {
            let parent = types
                .get(&parent_name)
                .cloned()
                .ok_or_else(|| CoreError::unresolvable_type(&parent_name))?;
            schema.supertypes.extend(parent.supertypes.iter().cloned());
            for (name, decl) in &parent.children {
                schema
                    .children
                    .entry(name.clone())
                    .or_insert_with(|| decl.clone());
            }
            if schema.type_key == TypeKey::Complex && parent.type_key != TypeKey::Complex {
                schema.type_key = parent.type_key;
            }
        }

        let schema = Arc::new(schema);
        types.insert(schema.name.clone(), Arc::clone(&schema));
        Ok(schema)
    }

    /// Removes a registered type. Resources of that type fail to load at
    /// the next boot.
    pub fn unregister(&self, type_name: &str) -> bool {
        if is_builtin(type_name) {
            return false;
        }
        self.types.write().remove(type_name).is_some()
    }

    /// Number of known types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    /// Always false: the built-ins are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }
}

impl TypeRegistry for SchemaRegistry {
    fn resolve(&self, type_name: &str) -> CoreResult<Arc<TypeSchema>> {
        self.types
            .read()
            .get(type_name)
            .cloned()
            .ok_or_else(|| CoreError::unresolvable_type(type_name))
    }
}

fn is_builtin(type_name: &str) -> bool {
    use names::*;
    [
        RESOURCE,
        BOOLEAN,
        FLOAT,
        INTEGER,
        TIME,
        STRING,
        BOOLEAN_ARRAY,
        FLOAT_ARRAY,
        INTEGER_ARRAY,
        TIME_ARRAY,
        STRING_ARRAY,
        BYTE_ARRAY,
        LIST,
    ]
    .contains(&type_name)
}

//! Named database object types and the per-connection type cache.
//!
//! Type descriptors are fetched from the dictionary views on first use and
//! cached by `(schema, package, name)`. Attribute order is fixed at cache
//! time; binds and fetches address attributes by that order. Nested object
//! references are held as keys and resolved lazily on access.

use indexmap::IndexMap;
use std::sync::Arc;

use crate::constants::OraType;
use crate::error::{Error, Result};
use crate::row::Value;

/// Cache key for a named type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeKey {
    /// Owning schema, uppercased
    pub schema: String,
    /// Package for PL/SQL types, None for top-level types
    pub package: Option<String>,
    /// Type name, uppercased
    pub name: String,
}

impl TypeKey {
    /// Parse `[schema.][package.]name` against a default schema.
    pub fn parse(qualified: &str, default_schema: &str) -> Result<Self> {
        let parts: Vec<&str> = qualified.split('.').collect();
        match parts.as_slice() {
            [name] => Ok(Self {
                schema: default_schema.to_uppercase(),
                package: None,
                name: name.to_uppercase(),
            }),
            [schema, name] => Ok(Self {
                schema: schema.to_uppercase(),
                package: None,
                name: name.to_uppercase(),
            }),
            [schema, package, name] => Ok(Self {
                schema: schema.to_uppercase(),
                package: Some(package.to_uppercase()),
                name: name.to_uppercase(),
            }),
            _ => Err(Error::Interface(format!(
                "malformed type name {qualified:?}"
            ))),
        }
    }
}

impl std::fmt::Display for TypeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.package {
            Some(package) => write!(f, "{}.{}.{}", self.schema, package, self.name),
            None => write!(f, "{}.{}", self.schema, self.name),
        }
    }
}

/// Collection flavor of a collection type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    /// PL/SQL index-by table
    IndexBy,
    /// Nested table
    NestedTable,
    /// VARRAY
    Varray,
}

/// One attribute of an object type.
#[derive(Debug, Clone)]
pub struct DbObjectAttr {
    /// Attribute name
    pub name: String,
    /// Wire type
    pub ora_type: OraType,
    /// Maximum size for variable-length attributes
    pub max_size: u32,
    /// NUMBER precision
    pub precision: u8,
    /// NUMBER scale
    pub scale: i8,
    /// Referenced object type for nested objects, resolved lazily
    pub object_type: Option<TypeKey>,
}

/// A cached object type descriptor.
#[derive(Debug, Clone)]
pub struct DbObjectType {
    /// Cache key
    pub key: TypeKey,
    /// 16-byte type OID
    pub oid: Vec<u8>,
    /// Type version
    pub version: u32,
    /// True for collection types
    pub is_collection: bool,
    /// Collection flavor, when a collection
    pub collection_kind: Option<CollectionKind>,
    /// Element type of a collection
    pub element_type: Option<OraType>,
    /// Element object type of an object collection
    pub element_object: Option<TypeKey>,
    /// Attributes in server-describe order
    pub attributes: Vec<DbObjectAttr>,
}

impl DbObjectType {
    /// Look up an attribute index by name.
    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.attributes
            .iter()
            .position(|a| a.name.eq_ignore_ascii_case(name))
    }
}

/// An instance of a named type: attribute values in describe order, or
/// elements for collections.
#[derive(Debug, Clone)]
pub struct DbObject {
    object_type: Arc<DbObjectType>,
    values: Vec<Value>,
}

impl DbObject {
    /// A NULL-initialized instance.
    pub fn new(object_type: Arc<DbObjectType>) -> Self {
        let values = if object_type.is_collection {
            Vec::new()
        } else {
            vec![Value::Null; object_type.attributes.len()]
        };
        Self {
            object_type,
            values,
        }
    }

    /// The descriptor.
    pub fn object_type(&self) -> &Arc<DbObjectType> {
        &self.object_type
    }

    /// Attribute value by name.
    pub fn get(&self, name: &str) -> Result<&Value> {
        let idx = self
            .object_type
            .attribute_index(name)
            .ok_or_else(|| Error::Interface(format!("no attribute {name:?}")))?;
        Ok(&self.values[idx])
    }

    /// Set an attribute value by name.
    pub fn set(&mut self, name: &str, value: Value) -> Result<()> {
        let idx = self
            .object_type
            .attribute_index(name)
            .ok_or_else(|| Error::Interface(format!("no attribute {name:?}")))?;
        self.values[idx] = value;
        Ok(())
    }

    /// Append a collection element.
    pub fn append(&mut self, value: Value) -> Result<()> {
        if !self.object_type.is_collection {
            return Err(Error::Interface(format!(
                "{} is not a collection",
                self.object_type.key
            )));
        }
        self.values.push(value);
        Ok(())
    }

    /// Values in attribute/element order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

/// Per-connection cache of type descriptors.
#[derive(Debug, Default)]
pub struct TypeCache {
    types: IndexMap<TypeKey, Arc<DbObjectType>>,
}

impl TypeCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a cached type.
    pub fn get(&self, key: &TypeKey) -> Option<Arc<DbObjectType>> {
        self.types.get(key).cloned()
    }

    /// Insert a freshly described type. Attribute order becomes permanent.
    pub fn insert(&mut self, descriptor: DbObjectType) -> Arc<DbObjectType> {
        let key = descriptor.key.clone();
        let arc = Arc::new(descriptor);
        self.types.insert(key, Arc::clone(&arc));
        arc
    }

    /// Number of cached types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Drop everything. Used when the underlying session changes.
    pub fn clear(&mut self) {
        self.types.clear();
    }
}

/// Dictionary query fetching the descriptor of a named type.
pub fn type_lookup_sql() -> &'static str {
    "SELECT type_oid, version, typecode FROM all_types \
     WHERE owner = :1 AND type_name = :2"
}

/// Dictionary query fetching the attributes of a named type in order.
pub fn attribute_lookup_sql() -> &'static str {
    "SELECT attr_name, attr_type_name, length, precision, scale, \
            attr_type_owner \
     FROM all_type_attrs WHERE owner = :1 AND type_name = :2 \
     ORDER BY attr_no"
}

/// Map a dictionary type-name string onto a wire type.
pub fn ora_type_from_dictionary(name: &str) -> Option<OraType> {
    Some(match name {
        "VARCHAR2" | "VARCHAR" => OraType::Varchar,
        "NVARCHAR2" => OraType::Varchar,
        "NUMBER" | "INTEGER" | "FLOAT" | "DECIMAL" => OraType::Number,
        "CHAR" | "NCHAR" => OraType::Char,
        "DATE" => OraType::Date,
        "RAW" => OraType::Raw,
        "CLOB" | "NCLOB" => OraType::Clob,
        "BLOB" => OraType::Blob,
        "BFILE" => OraType::Bfile,
        "BINARY_FLOAT" => OraType::BinaryFloat,
        "BINARY_DOUBLE" => OraType::BinaryDouble,
        "JSON" => OraType::Json,
        "VECTOR" => OraType::Vector,
        "TIMESTAMP" => OraType::Timestamp,
        "TIMESTAMP WITH TIME ZONE" => OraType::TimestampTz,
        "TIMESTAMP WITH LOCAL TIME ZONE" => OraType::TimestampLtz,
        "INTERVAL YEAR TO MONTH" => OraType::IntervalYm,
        "INTERVAL DAY TO SECOND" => OraType::IntervalDs,
        "BOOLEAN" => OraType::Boolean,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point_type() -> DbObjectType {
        DbObjectType {
            key: TypeKey::parse("GEO.POINT", "SCOTT").unwrap(),
            oid: vec![0xAB; 16],
            version: 1,
            is_collection: false,
            collection_kind: None,
            element_type: None,
            element_object: None,
            attributes: vec![
                DbObjectAttr {
                    name: "X".into(),
                    ora_type: OraType::Number,
                    max_size: 0,
                    precision: 0,
                    scale: 0,
                    object_type: None,
                },
                DbObjectAttr {
                    name: "Y".into(),
                    ora_type: OraType::Number,
                    max_size: 0,
                    precision: 0,
                    scale: 0,
                    object_type: None,
                },
            ],
        }
    }

    #[test]
    fn key_parsing() {
        let key = TypeKey::parse("point", "SCOTT").unwrap();
        assert_eq!(key.schema, "SCOTT");
        assert_eq!(key.name, "POINT");
        assert!(key.package.is_none());

        let key = TypeKey::parse("geo.pkg.point", "SCOTT").unwrap();
        assert_eq!(key.package.as_deref(), Some("PKG"));

        assert!(TypeKey::parse("a.b.c.d", "SCOTT").is_err());
    }

    #[test]
    fn cache_round_trip() {
        let mut cache = TypeCache::new();
        let key = TypeKey::parse("GEO.POINT", "SCOTT").unwrap();
        assert!(cache.get(&key).is_none());

        let arc = cache.insert(point_type());
        let found = cache.get(&key).expect("cached");
        assert!(Arc::ptr_eq(&arc, &found));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn attribute_order_is_stable() {
        let mut cache = TypeCache::new();
        let arc = cache.insert(point_type());
        assert_eq!(arc.attribute_index("x"), Some(0));
        assert_eq!(arc.attribute_index("Y"), Some(1));
        assert_eq!(arc.attribute_index("Z"), None);
    }

    #[test]
    fn object_instances() {
        let mut cache = TypeCache::new();
        let arc = cache.insert(point_type());
        let mut obj = DbObject::new(Arc::clone(&arc));
        assert!(obj.get("X").unwrap().is_null());

        obj.set("X", Value::Integer(3)).unwrap();
        assert_eq!(obj.get("X").unwrap().as_i64(), Some(3));
        assert!(obj.set("Q", Value::Null).is_err());
        assert!(obj.append(Value::Null).is_err());
    }

    #[test]
    fn collection_append() {
        let mut descriptor = point_type();
        descriptor.is_collection = true;
        descriptor.collection_kind = Some(CollectionKind::Varray);
        descriptor.attributes.clear();
        descriptor.element_type = Some(OraType::Number);

        let mut cache = TypeCache::new();
        let arc = cache.insert(descriptor);
        let mut collection = DbObject::new(arc);
        collection.append(Value::Integer(1)).unwrap();
        collection.append(Value::Integer(2)).unwrap();
        assert_eq!(collection.values().len(), 2);
    }

    #[test]
    fn dictionary_type_mapping() {
        assert_eq!(ora_type_from_dictionary("NUMBER"), Some(OraType::Number));
        assert_eq!(ora_type_from_dictionary("VECTOR"), Some(OraType::Vector));
        assert_eq!(ora_type_from_dictionary("WEIRD"), None);
    }
}

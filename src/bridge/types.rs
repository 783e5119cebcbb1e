//! Type descriptors driving marshalling.
//!
//! Every exposed function carries a [`TypeDesc`] per parameter and one for its
//! return value. The codec reads them to coerce JSON into the declared shape,
//! and the registry inspects them at registration time.

use std::fmt;
use std::sync::Arc;

/// Scalar kinds a JSON primitive can be coerced into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    String,
    Char,
    Number,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Boolean,
    BigInteger,
    BigDecimal,
}

impl PrimitiveKind {
    pub fn name(&self) -> &'static str {
        match self {
            PrimitiveKind::String => "String",
            PrimitiveKind::Char => "Char",
            PrimitiveKind::Number => "Number",
            PrimitiveKind::Byte => "Byte",
            PrimitiveKind::Short => "Short",
            PrimitiveKind::Int => "Int",
            PrimitiveKind::Long => "Long",
            PrimitiveKind::Float => "Float",
            PrimitiveKind::Double => "Double",
            PrimitiveKind::Boolean => "Boolean",
            PrimitiveKind::BigInteger => "BigInteger",
            PrimitiveKind::BigDecimal => "BigDecimal",
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(
            self,
            PrimitiveKind::String | PrimitiveKind::Char | PrimitiveKind::Boolean
        )
    }
}

/// Use-site variance of a type projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variance {
    Invariant,
    Covariant,
    Contravariant,
}

impl fmt::Display for Variance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variance::Invariant => f.write_str("invariant"),
            Variance::Covariant => f.write_str("out"),
            Variance::Contravariant => f.write_str("in"),
        }
    }
}

/// The four kinds of script function a handle can stand for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleShape {
    Plain,
    WithArg,
    WithPromise,
    WithPromiseAndArg,
}

impl HandleShape {
    pub fn takes_arg(&self) -> bool {
        matches!(self, HandleShape::WithArg | HandleShape::WithPromiseAndArg)
    }

    pub fn yields_promise(&self) -> bool {
        matches!(
            self,
            HandleShape::WithPromise | HandleShape::WithPromiseAndArg
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDesc {
    pub name: String,
    pub ty: TypeDesc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordDesc {
    pub name: String,
    pub fields: Vec<FieldDesc>,
}

/// Declared type of a parameter, field or return value.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDesc {
    Primitive(PrimitiveKind),
    List(Box<TypeDesc>),
    Map(Box<TypeDesc>, Box<TypeDesc>),
    Record(Arc<RecordDesc>),
    /// A script function passed by handle ID.
    Handle {
        shape: HandleShape,
        arg: Option<Box<TypeDesc>>,
        result: Option<Box<TypeDesc>>,
    },
    /// Deferred result; only valid as a return type.
    Future(Box<TypeDesc>),
    Unit,
    /// Untyped JSON, passed through as is.
    Json,
    Projection(Variance, Box<TypeDesc>),
}

impl TypeDesc {
    pub fn string() -> Self {
        TypeDesc::Primitive(PrimitiveKind::String)
    }

    pub fn int() -> Self {
        TypeDesc::Primitive(PrimitiveKind::Int)
    }

    pub fn long() -> Self {
        TypeDesc::Primitive(PrimitiveKind::Long)
    }

    pub fn double() -> Self {
        TypeDesc::Primitive(PrimitiveKind::Double)
    }

    pub fn boolean() -> Self {
        TypeDesc::Primitive(PrimitiveKind::Boolean)
    }

    pub fn list(item: TypeDesc) -> Self {
        TypeDesc::List(Box::new(item))
    }

    pub fn map(key: TypeDesc, value: TypeDesc) -> Self {
        TypeDesc::Map(Box::new(key), Box::new(value))
    }

    pub fn future(result: TypeDesc) -> Self {
        TypeDesc::Future(Box::new(result))
    }

    pub fn projection(variance: Variance, inner: TypeDesc) -> Self {
        TypeDesc::Projection(variance, Box::new(inner))
    }

    pub fn record<'a, I>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, TypeDesc)>,
    {
        TypeDesc::Record(Arc::new(RecordDesc {
            name: name.into(),
            fields: fields
                .into_iter()
                .map(|(name, ty)| FieldDesc {
                    name: name.to_string(),
                    ty,
                })
                .collect(),
        }))
    }

    pub fn handle(shape: HandleShape, arg: Option<TypeDesc>, result: Option<TypeDesc>) -> Self {
        TypeDesc::Handle {
            shape,
            arg: arg.map(Box::new),
            result: result.map(Box::new),
        }
    }

    /// Strip invariant projections.
    pub fn unprojected(&self) -> &TypeDesc {
        match self {
            TypeDesc::Projection(Variance::Invariant, inner) => inner.unprojected(),
            other => other,
        }
    }

    pub fn is_unit(&self) -> bool {
        matches!(self.unprojected(), TypeDesc::Unit)
    }

    pub fn is_future(&self) -> bool {
        matches!(self.unprojected(), TypeDesc::Future(_))
    }

    /// Find the first non-invariant projection anywhere in the tree.
    pub fn find_variance(&self) -> Option<Variance> {
        match self {
            TypeDesc::Projection(Variance::Invariant, inner) => inner.find_variance(),
            TypeDesc::Projection(variance, _) => Some(*variance),
            TypeDesc::List(item) | TypeDesc::Future(item) => item.find_variance(),
            TypeDesc::Map(key, value) => key.find_variance().or_else(|| value.find_variance()),
            TypeDesc::Record(record) => record.fields.iter().find_map(|f| f.ty.find_variance()),
            TypeDesc::Handle { arg, result, .. } => arg
                .as_deref()
                .and_then(TypeDesc::find_variance)
                .or_else(|| result.as_deref().and_then(TypeDesc::find_variance)),
            TypeDesc::Primitive(_) | TypeDesc::Unit | TypeDesc::Json => None,
        }
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDesc::Primitive(kind) => f.write_str(kind.name()),
            TypeDesc::List(item) => write!(f, "List<{}>", item),
            TypeDesc::Map(key, value) => write!(f, "Map<{}, {}>", key, value),
            TypeDesc::Record(record) => f.write_str(&record.name),
            TypeDesc::Handle { shape, arg, result } => {
                write!(f, "{:?}", shape)?;
                match (arg, result) {
                    (Some(arg), Some(result)) => write!(f, "<{}, {}>", arg, result),
                    (Some(only), None) | (None, Some(only)) => write!(f, "<{}>", only),
                    (None, None) => Ok(()),
                }
            }
            TypeDesc::Future(result) => write!(f, "Future<{}>", result),
            TypeDesc::Unit => f.write_str("Unit"),
            TypeDesc::Json => f.write_str("Json"),
            TypeDesc::Projection(Variance::Invariant, inner) => write!(f, "{}", inner),
            TypeDesc::Projection(variance, inner) => write!(f, "{} {}", variance, inner),
        }
    }
}

/// Types with a static descriptor.
pub trait Describe {
    fn describe() -> TypeDesc;
}

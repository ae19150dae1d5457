//! Canonical WGSL types.
//!
//! Unlike AST nodes, types are compared by value: two types are equal iff
//! they agree on every discriminating field. Abstract numeric types only
//! exist between literal typing and concretization.

use smol_str::SmolStr;
use std::fmt;
use std::rc::Rc;
use strum::{Display, EnumString};

use crate::error::Error;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum AddressSpace {
    Function,
    Private,
    Workgroup,
    Uniform,
    Storage,
    Handle,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Display, EnumString)]
pub enum TexelFormat {
    #[strum(serialize = "rgba8unorm")]
    Rgba8Unorm,
    #[strum(serialize = "rgba8snorm")]
    Rgba8Snorm,
    #[strum(serialize = "rgba8uint")]
    Rgba8Uint,
    #[strum(serialize = "rgba8sint")]
    Rgba8Sint,
    #[strum(serialize = "rgba16uint")]
    Rgba16Uint,
    #[strum(serialize = "rgba16sint")]
    Rgba16Sint,
    #[strum(serialize = "rgba16float")]
    Rgba16Float,
    #[strum(serialize = "r32uint")]
    R32Uint,
    #[strum(serialize = "r32sint")]
    R32Sint,
    #[strum(serialize = "r32float")]
    R32Float,
    #[strum(serialize = "rg32uint")]
    Rg32Uint,
    #[strum(serialize = "rg32sint")]
    Rg32Sint,
    #[strum(serialize = "rg32float")]
    Rg32Float,
    #[strum(serialize = "rgba32uint")]
    Rgba32Uint,
    #[strum(serialize = "rgba32sint")]
    Rgba32Sint,
    #[strum(serialize = "rgba32float")]
    Rgba32Float,
    #[strum(serialize = "bgra8unorm")]
    Bgra8Unorm,
}

impl TexelFormat {
    /// The channel type texels of this format load as.
    pub fn channel_type(&self) -> Type {
        use TexelFormat::*;
        match self {
            Rgba8Uint | Rgba16Uint | R32Uint | Rg32Uint | Rgba32Uint => Type::U32,
            Rgba8Sint | Rgba16Sint | R32Sint | Rg32Sint | Rgba32Sint => Type::I32,
            _ => Type::F32,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SampledTextureDimension {
    D1,
    D2,
    D2Array,
    D3,
    Cube,
    CubeArray,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DepthTextureDimension {
    D2,
    D2Array,
    Cube,
    CubeArray,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum StorageTextureDimension {
    D1,
    D2,
    D2Array,
    D3,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct StructMember {
    pub name: SmolStr,
    pub ty: Type,
}

/// A resolved struct. Member order is preserved and observable.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct StructType {
    pub name: SmolStr,
    pub members: Vec<StructMember>,
}

impl StructType {
    pub fn member(&self, name: &str) -> Option<&Type> {
        self.members.iter().find(|m| m.name == name).map(|m| &m.ty)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Type {
    Bool,
    I32,
    U32,
    F16,
    F32,
    AbstractInt,
    AbstractFloat,
    /// `size` is 2, 3 or 4; `elem` is a scalar.
    Vector {
        size: u8,
        elem: Box<Type>,
    },
    /// `elem` is a float scalar.
    Matrix {
        columns: u8,
        rows: u8,
        elem: Box<Type>,
    },
    /// `count` of `None` is a runtime-sized array.
    Array {
        elem: Box<Type>,
        count: Option<u32>,
    },
    Pointer {
        space: AddressSpace,
        pointee: Box<Type>,
        access: AccessMode,
    },
    /// Synthesized by the resolver when a name denotes a storage location;
    /// never spelled in source.
    Reference {
        space: AddressSpace,
        store: Box<Type>,
        access: AccessMode,
    },
    /// `elem` is `I32` or `U32`.
    Atomic {
        elem: Box<Type>,
    },
    Struct(Rc<StructType>),
    Sampler,
    SamplerComparison,
    SampledTexture {
        dim: SampledTextureDimension,
        sampled: Box<Type>,
    },
    /// Always 2D.
    MultisampledTexture {
        sampled: Box<Type>,
    },
    DepthTexture {
        dim: DepthTextureDimension,
    },
    DepthMultisampledTexture,
    ExternalTexture,
    StorageTexture {
        dim: StorageTextureDimension,
        format: TexelFormat,
        access: AccessMode,
    },
}

/// A function's resolved signature.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FunctionType {
    pub parameters: Vec<Type>,
    pub return_type: Option<Type>,
}

impl Type {
    pub fn vector(size: u8, elem: Type) -> Type {
        Type::Vector {
            size,
            elem: Box::new(elem),
        }
    }

    pub fn matrix(columns: u8, rows: u8, elem: Type) -> Type {
        Type::Matrix {
            columns,
            rows,
            elem: Box::new(elem),
        }
    }

    pub fn array(elem: Type, count: Option<u32>) -> Type {
        Type::Array {
            elem: Box::new(elem),
            count,
        }
    }

    pub fn pointer(space: AddressSpace, pointee: Type, access: AccessMode) -> Type {
        Type::Pointer {
            space,
            pointee: Box::new(pointee),
            access,
        }
    }

    pub fn reference(space: AddressSpace, store: Type, access: AccessMode) -> Type {
        Type::Reference {
            space,
            store: Box::new(store),
            access,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Type::Bool
                | Type::I32
                | Type::U32
                | Type::F16
                | Type::F32
                | Type::AbstractInt
                | Type::AbstractFloat
        )
    }

    pub fn is_integer_scalar(&self) -> bool {
        matches!(self, Type::I32 | Type::U32 | Type::AbstractInt)
    }

    pub fn is_float_scalar(&self) -> bool {
        matches!(self, Type::F16 | Type::F32 | Type::AbstractFloat)
    }

    pub fn is_numeric_scalar(&self) -> bool {
        self.is_integer_scalar() || self.is_float_scalar()
    }

    /// Scalar, or vector/matrix of such.
    pub fn is_numeric(&self) -> bool {
        match self {
            Type::Vector { elem, .. } | Type::Matrix { elem, .. } => elem.is_numeric_scalar(),
            other => other.is_numeric_scalar(),
        }
    }

    /// The element type of a vector/matrix/array, or the type itself for a
    /// scalar.
    pub fn element(&self) -> &Type {
        match self {
            Type::Vector { elem, .. } | Type::Matrix { elem, .. } | Type::Array { elem, .. } => {
                elem
            }
            other => other,
        }
    }

    /// True iff the type transitively contains an abstract numeric.
    pub fn is_abstract(&self) -> bool {
        match self {
            Type::AbstractInt | Type::AbstractFloat => true,
            Type::Vector { elem, .. } | Type::Matrix { elem, .. } | Type::Array { elem, .. } => {
                elem.is_abstract()
            }
            _ => false,
        }
    }

    /// One step of the abstract-to-concrete relation: can `self` be
    /// concretized to `target`? Distributes point-wise through vectors,
    /// matrices and arrays of matching shape.
    pub fn is_abstraction_of(&self, target: &Type) -> bool {
        match (self, target) {
            (Type::AbstractInt, Type::I32)
            | (Type::AbstractInt, Type::U32)
            | (Type::AbstractInt, Type::AbstractFloat)
            | (Type::AbstractInt, Type::F16)
            | (Type::AbstractInt, Type::F32)
            | (Type::AbstractFloat, Type::F16)
            | (Type::AbstractFloat, Type::F32) => true,
            (Type::Vector { size: s1, elem: e1 }, Type::Vector { size: s2, elem: e2 }) => {
                s1 == s2 && e1.is_abstraction_of(e2)
            }
            (
                Type::Matrix {
                    columns: c1,
                    rows: r1,
                    elem: e1,
                },
                Type::Matrix {
                    columns: c2,
                    rows: r2,
                    elem: e2,
                },
            ) => c1 == c2 && r1 == r2 && e1.is_abstraction_of(e2),
            (Type::Array { elem: e1, count: n1 }, Type::Array { elem: e2, count: n2 }) => {
                n1 == n2 && e1.is_abstraction_of(e2)
            }
            _ => false,
        }
    }

    /// Replaces abstract components with their defaults: abstract-int
    /// becomes `i32`, abstract-float becomes `f32`.
    pub fn default_concretization(&self) -> Type {
        match self {
            Type::AbstractInt => Type::I32,
            Type::AbstractFloat => Type::F32,
            Type::Vector { size, elem } => Type::vector(*size, elem.default_concretization()),
            Type::Matrix {
                columns,
                rows,
                elem,
            } => Type::matrix(*columns, *rows, elem.default_concretization()),
            Type::Array { elem, count } => Type::array(elem.default_concretization(), *count),
            other => other.clone(),
        }
    }

    /// Whether using a value of this type as an expression triggers the
    /// implicit reference-to-value conversion.
    pub fn is_load_rule_invoked(&self) -> bool {
        matches!(
            self,
            Type::Reference {
                access: AccessMode::Read | AccessMode::ReadWrite,
                ..
            }
        )
    }

    /// The type obtained after applying the load rule, i.e. the store type
    /// for references and the type itself otherwise.
    pub fn store_type(&self) -> &Type {
        match self {
            Type::Reference { store, .. } => store,
            other => other,
        }
    }
}

/// Folds a list of types to the common type they all concretize to.
pub fn find_common_type(types: &[Type]) -> Result<Type, Error> {
    let mut iter = types.iter();
    let mut common = match iter.next() {
        Some(first) => first.clone(),
        None => {
            return Err(Error::ResolverInternal(
                "common type of empty list".to_string(),
            ))
        }
    };
    for ty in iter {
        if *ty == common {
            continue;
        } else if common.is_abstraction_of(ty) {
            common = ty.clone();
        } else if ty.is_abstraction_of(&common) {
            // keep `common`
        } else {
            return Err(Error::NoCommonType(common.to_string(), ty.to_string()));
        }
    }
    Ok(common)
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Type::Bool => write!(f, "bool"),
            Type::I32 => write!(f, "i32"),
            Type::U32 => write!(f, "u32"),
            Type::F16 => write!(f, "f16"),
            Type::F32 => write!(f, "f32"),
            Type::AbstractInt => write!(f, "abstract-int"),
            Type::AbstractFloat => write!(f, "abstract-float"),
            Type::Vector { size, elem } => write!(f, "vec{}<{}>", size, elem),
            Type::Matrix {
                columns,
                rows,
                elem,
            } => write!(f, "mat{}x{}<{}>", columns, rows, elem),
            Type::Array { elem, count: Some(n) } => write!(f, "array<{}, {}>", elem, n),
            Type::Array { elem, count: None } => write!(f, "array<{}>", elem),
            Type::Pointer {
                space,
                pointee,
                access,
            } => write!(f, "ptr<{}, {}, {}>", space, pointee, access),
            Type::Reference {
                space,
                store,
                access,
            } => write!(f, "ref<{}, {}, {}>", space, store, access),
            Type::Atomic { elem } => write!(f, "atomic<{}>", elem),
            Type::Struct(s) => write!(f, "{}", s.name),
            Type::Sampler => write!(f, "sampler"),
            Type::SamplerComparison => write!(f, "sampler_comparison"),
            Type::SampledTexture { dim, sampled } => {
                let dim = match dim {
                    SampledTextureDimension::D1 => "1d",
                    SampledTextureDimension::D2 => "2d",
                    SampledTextureDimension::D2Array => "2d_array",
                    SampledTextureDimension::D3 => "3d",
                    SampledTextureDimension::Cube => "cube",
                    SampledTextureDimension::CubeArray => "cube_array",
                };
                write!(f, "texture_{}<{}>", dim, sampled)
            }
            Type::MultisampledTexture { sampled } => {
                write!(f, "texture_multisampled_2d<{}>", sampled)
            }
            Type::DepthTexture { dim } => {
                let dim = match dim {
                    DepthTextureDimension::D2 => "2d",
                    DepthTextureDimension::D2Array => "2d_array",
                    DepthTextureDimension::Cube => "cube",
                    DepthTextureDimension::CubeArray => "cube_array",
                };
                write!(f, "texture_depth_{}", dim)
            }
            Type::DepthMultisampledTexture => write!(f, "texture_depth_multisampled_2d"),
            Type::ExternalTexture => write!(f, "texture_external"),
            Type::StorageTexture {
                dim,
                format,
                access,
            } => {
                let dim = match dim {
                    StorageTextureDimension::D1 => "1d",
                    StorageTextureDimension::D2 => "2d",
                    StorageTextureDimension::D2Array => "2d_array",
                    StorageTextureDimension::D3 => "3d",
                };
                write!(f, "texture_storage_{}<{}, {}>", dim, format, access)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abstraction_steps() {
        assert!(Type::AbstractInt.is_abstraction_of(&Type::I32));
        assert!(Type::AbstractInt.is_abstraction_of(&Type::U32));
        assert!(Type::AbstractInt.is_abstraction_of(&Type::AbstractFloat));
        assert!(Type::AbstractFloat.is_abstraction_of(&Type::F16));
        assert!(!Type::AbstractFloat.is_abstraction_of(&Type::I32));
        assert!(!Type::I32.is_abstraction_of(&Type::U32));
        assert!(Type::vector(3, Type::AbstractInt).is_abstraction_of(&Type::vector(3, Type::F32)));
        assert!(!Type::vector(2, Type::AbstractInt).is_abstraction_of(&Type::vector(3, Type::I32)));
    }

    #[test]
    fn common_types() {
        let t = find_common_type(&[Type::AbstractInt, Type::I32]).unwrap();
        assert_eq!(t, Type::I32);
        let t = find_common_type(&[Type::AbstractInt, Type::AbstractFloat]).unwrap();
        assert_eq!(t, Type::AbstractFloat);
        let t = find_common_type(&[Type::F32, Type::AbstractInt]).unwrap();
        assert_eq!(t, Type::F32);
        assert!(find_common_type(&[Type::I32, Type::U32]).is_err());
        assert!(find_common_type(&[Type::Bool, Type::I32]).is_err());
    }

    #[test]
    fn default_concretization_distributes() {
        assert_eq!(Type::AbstractInt.default_concretization(), Type::I32);
        assert_eq!(
            Type::vector(4, Type::AbstractFloat).default_concretization(),
            Type::vector(4, Type::F32)
        );
        assert_eq!(Type::U32.default_concretization(), Type::U32);
    }

    #[test]
    fn load_rule() {
        let r = Type::reference(AddressSpace::Function, Type::I32, AccessMode::ReadWrite);
        assert!(r.is_load_rule_invoked());
        assert_eq!(r.store_type(), &Type::I32);
        let w = Type::reference(AddressSpace::Storage, Type::I32, AccessMode::Write);
        assert!(!w.is_load_rule_invoked());
    }
}

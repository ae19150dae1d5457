//! The builtin-function catalog.
//!
//! One entry point types every predeclared WGSL function from its argument
//! types (plus `bitcast`'s template); a second classifies calls for the
//! uniformity analyzer.

use smol_str::SmolStr;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::types::{
    find_common_type, SampledTextureDimension, StorageTextureDimension, StructMember, StructType,
    Type,
};

/// How a builtin call constrains uniformity at its call site.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CallUniformity {
    /// No constraint.
    None,
    /// The call site must be in uniform control flow; always an error when
    /// violated (barriers, `workgroupUniformLoad`).
    Barrier,
    /// The call site must be in uniform control flow at the configured
    /// severity, and the returned value may be non-uniform (derivatives,
    /// implicit-derivative texture sampling, subgroup and quad ops).
    Derivative,
}

pub fn call_uniformity(name: &str) -> CallUniformity {
    match name {
        "workgroupBarrier" | "storageBarrier" | "textureBarrier" | "workgroupUniformLoad" => {
            CallUniformity::Barrier
        }
        "dpdx" | "dpdy" | "fwidth" | "dpdxCoarse" | "dpdyCoarse" | "fwidthCoarse" | "dpdxFine"
        | "dpdyFine" | "fwidthFine" => CallUniformity::Derivative,
        _ if name.starts_with("textureSample") => CallUniformity::Derivative,
        _ if name.starts_with("subgroup") || name.starts_with("quad") => {
            CallUniformity::Derivative
        }
        _ => CallUniformity::None,
    }
}

fn arg<'a>(name: &str, args: &'a [Type], index: usize) -> Result<&'a Type> {
    args.get(index).ok_or_else(|| {
        Error::TypeMismatch(format!(
            "`{}` expects at least {} argument(s), got {}",
            name,
            index + 1,
            args.len()
        ))
    })
}

fn common(name: &str, args: &[Type]) -> Result<Type> {
    if args.is_empty() {
        return Err(Error::TypeMismatch(format!("`{}` expects arguments", name)));
    }
    match find_common_type(args) {
        Ok(ty) => Ok(ty),
        // Trailing scalar arguments broadcast (`mix`, `clamp` on vectors).
        Err(err) => {
            if args.len() == 3 && args[2].is_scalar() {
                find_common_type(&args[..2]).map_err(|_| err)
            } else {
                Err(err)
            }
        }
    }
}

fn atomic_target(name: &str, args: &[Type]) -> Result<Type> {
    match arg(name, args, 0)? {
        Type::Pointer { pointee, .. } => match &**pointee {
            Type::Atomic { elem } => Ok((**elem).clone()),
            other => Err(Error::TypeMismatch(format!(
                "`{}` expects a pointer to an atomic, got a pointer to `{}`",
                name, other
            ))),
        },
        other => Err(Error::TypeMismatch(format!(
            "`{}` expects a pointer to an atomic, got `{}`",
            name, other
        ))),
    }
}

fn float_suffix(ty: &Type) -> &'static str {
    match ty {
        Type::F16 => "f16",
        Type::F32 => "f32",
        _ => "abstract",
    }
}

/// `frexp`/`modf` return one of a fixed family of synthetic structs
/// indexed by element type and optional vector width. Struct types compare
/// by value, so rebuilding one per call site is fine.
fn synthetic_result_struct(prefix: &str, arg: &Type, fields: &[(&str, SyntheticField)]) -> Type {
    let (width, elem) = match arg {
        Type::Vector { size, elem } => (Some(*size), (**elem).clone()),
        other => (None, other.clone()),
    };
    let name: SmolStr = match width {
        Some(w) => format!("__{}_result_vec{}_{}", prefix, w, float_suffix(&elem)).into(),
        None => format!("__{}_result_{}", prefix, float_suffix(&elem)).into(),
    };
    let lift = |ty: Type| match width {
        Some(w) => Type::vector(w, ty),
        None => ty,
    };
    let members = fields
        .iter()
        .map(|(field_name, kind)| StructMember {
            name: SmolStr::new(*field_name),
            ty: match kind {
                SyntheticField::SameAsArg => lift(elem.clone()),
                SyntheticField::I32 => lift(Type::I32),
            },
        })
        .collect();
    Type::Struct(Rc::new(StructType { name, members }))
}

enum SyntheticField {
    SameAsArg,
    I32,
}

fn texture_coordinate_dimensions(texture: &Type) -> Option<u8> {
    match texture {
        Type::SampledTexture { dim, .. } => Some(match dim {
            SampledTextureDimension::D1 => 1,
            SampledTextureDimension::D3 => 3,
            _ => 2,
        }),
        Type::MultisampledTexture { .. }
        | Type::DepthTexture { .. }
        | Type::DepthMultisampledTexture
        | Type::ExternalTexture => Some(2),
        Type::StorageTexture { dim, .. } => Some(match dim {
            StorageTextureDimension::D1 => 1,
            StorageTextureDimension::D3 => 3,
            _ => 2,
        }),
        _ => None,
    }
}

fn find_texture<'a>(name: &str, args: &'a [Type]) -> Result<&'a Type> {
    args.iter()
        .find(|a| texture_coordinate_dimensions(a).is_some())
        .ok_or_else(|| Error::TypeMismatch(format!("`{}` expects a texture argument", name)))
}

/// The texel type a read of the given texture produces.
fn texture_load_type(texture: &Type) -> Result<Type> {
    match texture {
        Type::SampledTexture { sampled, .. } | Type::MultisampledTexture { sampled } => {
            Ok(Type::vector(4, (**sampled).clone()))
        }
        Type::DepthTexture { .. } | Type::DepthMultisampledTexture => Ok(Type::F32),
        Type::ExternalTexture => Ok(Type::vector(4, Type::F32)),
        Type::StorageTexture { format, .. } => Ok(Type::vector(4, format.channel_type())),
        other => Err(Error::TypeMismatch(format!(
            "`{}` is not a texture",
            other
        ))),
    }
}

/// Return type of a call to the named builtin, or `Ok(None)` for builtins
/// that produce no value. Unknown names yield [`Error::UnknownCallee`].
pub fn call_return_type(
    name: &SmolStr,
    template: Option<&Type>,
    args: &[Type],
) -> Result<Option<Type>> {
    let ty = match name.as_str() {
        // Synchronization and stores produce no value.
        "workgroupBarrier" | "storageBarrier" | "textureBarrier" | "atomicStore"
        | "textureStore" => return Ok(None),

        // Identity-return unary numeric functions, including derivatives.
        "abs" | "acos" | "acosh" | "asin" | "asinh" | "atan" | "atanh" | "ceil" | "cos"
        | "cosh" | "degrees" | "exp" | "exp2" | "floor" | "fract" | "inverseSqrt" | "log"
        | "log2" | "normalize" | "quantizeToF16" | "radians" | "round" | "saturate" | "sign"
        | "sin" | "sinh" | "sqrt" | "tan" | "tanh" | "trunc" | "dpdx" | "dpdy" | "fwidth"
        | "dpdxCoarse" | "dpdyCoarse" | "fwidthCoarse" | "dpdxFine" | "dpdyFine"
        | "fwidthFine" => arg(name, args, 0)?.clone(),

        // The bit-count family concretizes its argument.
        "countOneBits" | "countLeadingZeros" | "countTrailingZeros" | "firstLeadingBit"
        | "firstTrailingBit" | "reverseBits" => arg(name, args, 0)?.default_concretization(),
        "extractBits" | "insertBits" => arg(name, args, 0)?.default_concretization(),

        // Binary and ternary reductions over a common type.
        "min" | "max" | "pow" | "step" | "atan2" | "reflect" => common(name, args)?,
        "clamp" | "fma" | "smoothstep" | "faceForward" | "mix" | "select" => common(name, args)?,
        "ldexp" | "refract" => arg(name, args, 0)?.clone(),

        "all" | "any" => Type::Bool,
        "arrayLength" => Type::U32,
        "length" => arg(name, args, 0)?.element().clone(),
        "distance" => common(name, args)?.element().clone(),
        "dot" => arg(name, args, 0)?.element().clone(),
        "cross" => arg(name, args, 0)?.clone(),
        "determinant" => arg(name, args, 0)?.element().clone(),
        "transpose" => match arg(name, args, 0)? {
            Type::Matrix {
                columns,
                rows,
                elem,
            } => Type::matrix(*rows, *columns, (**elem).clone()),
            other => {
                return Err(Error::TypeMismatch(format!(
                    "`transpose` expects a matrix, got `{}`",
                    other
                )))
            }
        },

        "frexp" => synthetic_result_struct(
            "frexp",
            arg(name, args, 0)?,
            &[
                ("fract", SyntheticField::SameAsArg),
                ("exp", SyntheticField::I32),
            ],
        ),
        "modf" => synthetic_result_struct(
            "modf",
            arg(name, args, 0)?,
            &[
                ("fract", SyntheticField::SameAsArg),
                ("whole", SyntheticField::SameAsArg),
            ],
        ),

        "atomicLoad" | "atomicAdd" | "atomicSub" | "atomicMax" | "atomicMin" | "atomicAnd"
        | "atomicOr" | "atomicXor" | "atomicExchange" => atomic_target(name, args)?,
        "atomicCompareExchangeWeak" => {
            let target = atomic_target(name, args)?;
            let suffix = match target {
                Type::U32 => "u32",
                _ => "i32",
            };
            Type::Struct(Rc::new(StructType {
                name: format!("__atomic_compare_exchange_result_{}", suffix).into(),
                members: vec![
                    StructMember {
                        name: "old_value".into(),
                        ty: target,
                    },
                    StructMember {
                        name: "exchanged".into(),
                        ty: Type::Bool,
                    },
                ],
            }))
        }

        "bitcast" => match template {
            Some(ty) => ty.clone(),
            None => {
                return Err(Error::TypeMismatch(
                    "`bitcast` requires a template argument".to_string(),
                ))
            }
        },
        "workgroupUniformLoad" => match arg(name, args, 0)? {
            Type::Pointer { pointee, .. } => (**pointee).clone(),
            other => {
                return Err(Error::TypeMismatch(format!(
                    "`workgroupUniformLoad` expects a pointer, got `{}`",
                    other
                )))
            }
        },

        "pack4x8snorm" | "pack4x8unorm" | "pack2x16snorm" | "pack2x16unorm" | "pack2x16float" => {
            Type::U32
        }
        "unpack4x8snorm" | "unpack4x8unorm" => Type::vector(4, Type::F32),
        "unpack2x16snorm" | "unpack2x16unorm" | "unpack2x16float" => Type::vector(2, Type::F32),

        "textureDimensions" => {
            let texture = find_texture(name, args)?;
            match texture_coordinate_dimensions(texture).unwrap() {
                1 => Type::U32,
                3 => Type::vector(3, Type::U32),
                _ => Type::vector(2, Type::U32),
            }
        }
        "textureNumLayers" | "textureNumLevels" | "textureNumSamples" => Type::U32,
        "textureLoad" => texture_load_type(find_texture(name, args)?)?,
        "textureSample" | "textureSampleLevel" => match find_texture(name, args)? {
            Type::DepthTexture { .. } | Type::DepthMultisampledTexture => Type::F32,
            _ => Type::vector(4, Type::F32),
        },
        "textureSampleBias" | "textureSampleGrad" | "textureSampleBaseClampToEdge" => {
            Type::vector(4, Type::F32)
        }
        "textureSampleCompare" | "textureSampleCompareLevel" => Type::F32,
        "textureGather" => match find_texture(name, args)? {
            Type::SampledTexture { sampled, .. } => Type::vector(4, (**sampled).clone()),
            _ => Type::vector(4, Type::F32),
        },
        "textureGatherCompare" => Type::vector(4, Type::F32),

        "subgroupBallot" => Type::vector(4, Type::U32),
        "subgroupElect" => Type::Bool,
        "subgroupAll" | "subgroupAny" => Type::Bool,
        "subgroupAdd" | "subgroupExclusiveAdd" | "subgroupInclusiveAdd" | "subgroupMul"
        | "subgroupExclusiveMul" | "subgroupInclusiveMul" | "subgroupMin" | "subgroupMax"
        | "subgroupAnd" | "subgroupOr" | "subgroupXor" | "subgroupBroadcast"
        | "subgroupBroadcastFirst" | "subgroupShuffle" | "subgroupShuffleDown"
        | "subgroupShuffleUp" | "subgroupShuffleXor" | "quadBroadcast" | "quadSwapX"
        | "quadSwapY" | "quadSwapDiagonal" => arg(name, args, 0)?.clone(),

        _ => return Err(Error::UnknownCallee(name.clone())),
    };
    Ok(Some(ty))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccessMode, AddressSpace};

    fn ret(name: &str, args: &[Type]) -> Type {
        call_return_type(&SmolStr::new(name), None, args)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn identity_and_concretizing_families() {
        assert_eq!(ret("sqrt", &[Type::F32]), Type::F32);
        assert_eq!(
            ret("abs", &[Type::vector(3, Type::F16)]),
            Type::vector(3, Type::F16)
        );
        assert_eq!(ret("countOneBits", &[Type::AbstractInt]), Type::I32);
    }

    #[test]
    fn reductions_find_common_types() {
        assert_eq!(ret("min", &[Type::F32, Type::AbstractInt]), Type::F32);
        assert_eq!(
            ret("clamp", &[Type::U32, Type::U32, Type::AbstractInt]),
            Type::U32
        );
        assert_eq!(
            ret("mix", &[
                Type::vector(2, Type::F32),
                Type::vector(2, Type::F32),
                Type::F32
            ]),
            Type::vector(2, Type::F32)
        );
        assert!(call_return_type(&SmolStr::new("min"), None, &[Type::I32, Type::U32]).is_err());
    }

    #[test]
    fn atomics_use_their_target_type() {
        let ptr = Type::pointer(
            AddressSpace::Workgroup,
            Type::Atomic {
                elem: Box::new(Type::I32),
            },
            AccessMode::ReadWrite,
        );
        assert_eq!(ret("atomicLoad", &[ptr.clone()]), Type::I32);
        match ret("atomicCompareExchangeWeak", &[ptr, Type::I32, Type::I32]) {
            Type::Struct(s) => {
                assert_eq!(s.name, "__atomic_compare_exchange_result_i32");
                assert_eq!(s.members[1].ty, Type::Bool);
            }
            other => panic!("unexpected type {}", other),
        }
    }

    #[test]
    fn frexp_family_is_indexed_by_shape() {
        match ret("frexp", &[Type::vector(2, Type::F32)]) {
            Type::Struct(s) => {
                assert_eq!(s.name, "__frexp_result_vec2_f32");
                assert_eq!(s.members[0].ty, Type::vector(2, Type::F32));
                assert_eq!(s.members[1].ty, Type::vector(2, Type::I32));
            }
            other => panic!("unexpected type {}", other),
        }
    }

    #[test]
    fn texture_returns() {
        let t2d = Type::SampledTexture {
            dim: SampledTextureDimension::D2,
            sampled: Box::new(Type::U32),
        };
        assert_eq!(ret("textureLoad", &[t2d.clone()]), Type::vector(4, Type::U32));
        assert_eq!(
            ret("textureDimensions", &[t2d]),
            Type::vector(2, Type::U32)
        );
        let depth = Type::DepthTexture {
            dim: crate::types::DepthTextureDimension::D2,
        };
        assert_eq!(ret("textureSample", &[depth]), Type::F32);
    }

    #[test]
    fn unknown_callee() {
        assert!(matches!(
            call_return_type(&SmolStr::new("nosuch"), None, &[]),
            Err(Error::UnknownCallee(_))
        ));
    }

    #[test]
    fn uniformity_classification() {
        assert_eq!(call_uniformity("workgroupBarrier"), CallUniformity::Barrier);
        assert_eq!(call_uniformity("dpdx"), CallUniformity::Derivative);
        assert_eq!(call_uniformity("textureSampleBias"), CallUniformity::Derivative);
        assert_eq!(call_uniformity("subgroupAdd"), CallUniformity::Derivative);
        assert_eq!(call_uniformity("max"), CallUniformity::None);
    }
}

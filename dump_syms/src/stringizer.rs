//! Renders CodeView type records into the C-ish type strings Breakpad embeds in `FUNC` lines.
//!
//! Grounded on the ancestor `ms-pdb` crate's `tpi::TypeStream::record()` (cached, O(log n) record
//! lookup by index) and `types::primitive::PRIMITIVES` (the base-type name table). The recursive
//! shape mirrors the original Breakpad `dump_syms` `TypeInfo::GetTypeName`.

use anyhow::{bail, Result};
use ms_codeview::types::{Alias, Array, MemberFunc, Pointer, Proc as ProcType, TypeData, TypeIndex};
use ms_pdb::tpi::TypeStream;
use std::fmt::Write as _;
use tracing::warn;

/// Recursion depth past which a type graph is assumed cyclic or pathological.
const MAX_DEPTH: u32 = 256;

bitflags::bitflags! {
    /// Controls whether qualifiers and pointer decoration are elided while stringizing.
    #[derive(Clone, Copy, Default)]
    pub struct StringizeFlags: u8 {
        /// We're recursing into the type underlying a `LF_MODIFIER`/`LF_POINTER`; the immediate
        /// caller will add its own decoration, so qualifier suffixes are suppressed here.
        const IS_UNDERLYING = 1 << 0;
        /// This is the outermost call for a given symbol; an empty arg list still emits `()`.
        const IS_TOP_LEVEL = 1 << 1;
    }
}

/// Renders `type_index` into `out`. Returns `true` if the rendered type was itself a function
/// type (`LF_PROCEDURE`/`LF_MFUNCTION`), telling a `LF_POINTER` caller to skip the trailing `*`.
pub fn stringize<D: AsRef<[u8]>>(
    types: &TypeStream<D>,
    type_index: TypeIndex,
    out: &mut String,
    flags: StringizeFlags,
) -> Result<bool> {
    stringize_depth(types, type_index, out, flags, 0)
}

fn stringize_depth<D: AsRef<[u8]>>(
    types: &TypeStream<D>,
    type_index: TypeIndex,
    out: &mut String,
    flags: StringizeFlags,
    depth: u32,
) -> Result<bool> {
    if depth > MAX_DEPTH {
        bail!("type graph too deep (possible cycle) at {type_index:?}");
    }

    if type_index.0 == 0 {
        out.push_str("...");
        return Ok(false);
    }

    if types.is_primitive(type_index) {
        stringize_primitive(type_index, out);
        return Ok(false);
    }

    let record = types.record(type_index)?;
    let data = record.parse()?;

    Ok(match data {
        TypeData::Modifier(modifier) => {
            let underlying = modifier.underlying_type.get();
            let is_func = stringize_depth(
                types,
                underlying,
                out,
                flags | StringizeFlags::IS_UNDERLYING,
                depth + 1,
            )?;
            if !flags.intersects(StringizeFlags::IS_UNDERLYING) {
                let bits = modifier.attributes();
                if bits.is_const() {
                    out.push_str(" const");
                }
                if bits.is_volatile() {
                    out.push_str(" volatile");
                }
                if bits.is_unaligned() {
                    out.push_str(" unaligned");
                }
            }
            is_func
        }

        TypeData::ArgList(args) => {
            out.push('(');
            for (i, arg) in args.args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                stringize_depth(types, arg.get(), out, flags, depth + 1)?;
            }
            out.push(')');
            false
        }

        TypeData::Pointer(pointer) => {
            stringize_pointer(types, &pointer, out, flags, depth)?;
            false
        }

        TypeData::Array(array) => {
            stringize_array(types, &array, out, flags, depth)?;
            false
        }

        TypeData::MemberFunc(mfunc) => {
            stringize_mfunc(types, mfunc, out, flags, depth)?;
            true
        }

        TypeData::Proc(proc) => {
            stringize_proc(types, proc, out, flags, depth)?;
            true
        }

        TypeData::Struct(s) => {
            out.push_str(&s.name.to_string());
            false
        }
        TypeData::Union(u) => {
            out.push_str(&u.name.to_string());
            false
        }
        TypeData::Enum(e) => {
            out.push_str(&e.name.to_string());
            false
        }
        TypeData::Alias(alias) => {
            stringize_alias(&alias, out);
            false
        }

        other => {
            warn!("unsupported type record kind for stringizing: {:?}", type_kind_of(&other));
            out.push_str("!Unknown!");
            false
        }
    })
}

fn type_kind_of(data: &TypeData<'_>) -> &'static str {
    match data {
        TypeData::Array(_) => "Array",
        TypeData::Struct(_) => "Struct",
        TypeData::Union(_) => "Union",
        TypeData::Enum(_) => "Enum",
        TypeData::Proc(_) => "Proc",
        TypeData::MemberFunc(_) => "MemberFunc",
        TypeData::VTableShape(_) => "VTableShape",
        TypeData::Pointer(_) => "Pointer",
        TypeData::Modifier(_) => "Modifier",
        TypeData::FieldList(_) => "FieldList",
        TypeData::MethodList(_) => "MethodList",
        TypeData::ArgList(_) => "ArgList",
        TypeData::Alias(_) => "Alias",
        TypeData::UdtSrcLine(_) => "UdtSrcLine",
        TypeData::UdtModSrcLine(_) => "UdtModSrcLine",
        TypeData::FuncId(_) => "FuncId",
        TypeData::MFuncId(_) => "MFuncId",
        TypeData::StringId(_) => "StringId",
        TypeData::SubStrList(_) => "SubStrList",
        TypeData::BuildInfo(_) => "BuildInfo",
        TypeData::VFTable(_) => "VFTable",
        TypeData::Unknown => "Unknown",
    }
}

fn stringize_alias(alias: &Alias<'_>, out: &mut String) {
    out.push_str(&alias.name.to_string());
}

fn stringize_pointer<D: AsRef<[u8]>>(
    types: &TypeStream<D>,
    pointer: &Pointer<'_>,
    out: &mut String,
    flags: StringizeFlags,
    depth: u32,
) -> Result<()> {
    let attr = pointer.fixed.attr();
    let is_func = stringize_depth(
        types,
        pointer.fixed.ty.get(),
        out,
        flags | StringizeFlags::IS_UNDERLYING,
        depth + 1,
    )?;

    if !is_func {
        match attr.mode() {
            MODE_REF => out.push_str(" &"),
            MODE_PMEM => out.push_str("::*"),
            MODE_PMFUNC => out.push_str("::"),
            MODE_RESERVED => out.push_str("&&"),
            _ => out.push_str(" *"),
        }
    }

    if attr.r#const() {
        out.push_str(" const");
    }
    if attr.volatile() {
        out.push_str(" volatile");
    }

    Ok(())
}

const MODE_REF: u32 = 1;
const MODE_PMEM: u32 = 2;
const MODE_PMFUNC: u32 = 3;
const MODE_RESERVED: u32 = 4;

fn stringize_array<D: AsRef<[u8]>>(
    types: &TypeStream<D>,
    array: &Array<'_>,
    out: &mut String,
    flags: StringizeFlags,
    depth: u32,
) -> Result<()> {
    stringize_depth(types, array.fixed.element_type.get(), out, flags, depth + 1)?;
    out.push('[');
    let index_type = array.fixed.index_type.get();
    if index_type.0 < 0x8000 {
        if let Ok(count) = u64::try_from(array.len) {
            write!(out, "{count}").ok();
        }
    } else {
        stringize_depth(types, index_type, out, flags, depth + 1)?;
    }
    out.push(']');
    Ok(())
}

fn stringize_proc<D: AsRef<[u8]>>(
    types: &TypeStream<D>,
    proc: &ProcType,
    out: &mut String,
    flags: StringizeFlags,
    depth: u32,
) -> Result<()> {
    if flags.intersects(StringizeFlags::IS_UNDERLYING) {
        stringize_depth(types, proc.return_value.get(), out, flags, depth + 1)?;
        out.push_str(" (*)");
    }
    stringize_depth(types, proc.arg_list.get(), out, flags, depth + 1)?;
    Ok(())
}

fn stringize_mfunc<D: AsRef<[u8]>>(
    types: &TypeStream<D>,
    mfunc: &MemberFunc,
    out: &mut String,
    flags: StringizeFlags,
    depth: u32,
) -> Result<()> {
    if flags.intersects(StringizeFlags::IS_UNDERLYING) {
        stringize_depth(types, mfunc.return_value.get(), out, flags, depth + 1)?;
        out.push_str(" (");
        stringize_depth(types, mfunc.class.get(), out, flags, depth + 1)?;
        out.push_str("::*)");
    }
    stringize_depth(types, mfunc.arg_list.get(), out, flags, depth + 1)?;
    Ok(())
}

fn stringize_primitive(type_index: TypeIndex, out: &mut String) {
    let base = type_index.0 & 0xff;
    let is_pointer = matches!(type_index.0 & 0x0f00, 0x0400 | 0x0600);

    out.push_str(primitive_base_name(base));
    if is_pointer {
        out.push_str(" *");
    }
}

fn primitive_base_name(base: u32) -> &'static str {
    match base {
        0x03 => "void",
        0x08 => "long", // T_HRESULT
        0x10 => "signed char", // T_CHAR
        0x20 => "unsigned char",
        0x70 => "char", // T_RCHAR
        0x71 => "wchar_t",
        0x11 => "short",
        0x21 => "unsigned short",
        0x12 => "long",
        0x22 => "unsigned long",
        0x13 => "long long",
        0x23 => "unsigned long long",
        0x68 => "signed char", // T_INT1
        0x69 => "unsigned char", // T_UINT1
        0x72 => "__int16",
        0x73 => "unsigned __int16",
        0x74 => "int",
        0x75 => "unsigned int",
        0x76 => "__int64",
        0x77 => "unsigned __int64",
        0x78 => "s128", // T_INT16
        0x79 => "u128", // T_UINT16
        0x30 | 0x31 | 0x32 | 0x33 => "bool",
        0x40 => "float",
        0x41 => "double",
        0x42 => "long double",
        0x43 => "f128",
        _ => "void",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_int_maps_to_int() {
        let mut out = String::new();
        stringize_primitive(TypeIndex::T_INT4, &mut out);
        assert_eq!(out, "int");
    }

    #[test]
    fn primitive_32bit_pointer_appends_star() {
        let mut out = String::new();
        stringize_primitive(TypeIndex(0x0474), &mut out);
        assert_eq!(out, "int *");
    }

    #[test]
    fn primitive_real_maps_to_double() {
        let mut out = String::new();
        stringize_primitive(TypeIndex::T_REAL64, &mut out);
        assert_eq!(out, "double");
    }

    #[test]
    fn hresult_renders_as_long() {
        let mut out = String::new();
        stringize_primitive(TypeIndex(0x0008), &mut out);
        assert_eq!(out, "long");
    }

    #[test]
    fn bool_widths_all_render_as_bool() {
        for base in [0x0030u32, 0x0031, 0x0032, 0x0033] {
            let mut out = String::new();
            stringize_primitive(TypeIndex(base), &mut out);
            assert_eq!(out, "bool");
        }
    }

    #[test]
    fn signed_char_variants_render_as_signed_char() {
        for base in [0x0010u32, 0x0068] {
            let mut out = String::new();
            stringize_primitive(TypeIndex(base), &mut out);
            assert_eq!(out, "signed char");
        }
    }

    #[test]
    fn real_char_renders_plain_char() {
        let mut out = String::new();
        stringize_primitive(TypeIndex(0x0070), &mut out);
        assert_eq!(out, "char");
    }

    #[test]
    fn int128_renders_as_s128_u128() {
        let mut out = String::new();
        stringize_primitive(TypeIndex(0x0078), &mut out);
        assert_eq!(out, "s128");

        let mut out = String::new();
        stringize_primitive(TypeIndex(0x0079), &mut out);
        assert_eq!(out, "u128");
    }
}

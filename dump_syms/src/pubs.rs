//! Public symbols (`S_PUB32`) from the Global Symbol Stream.
//!
//! The only thing this reader needs from them is the parameter size encoded in a `__stdcall`/
//! `__fastcall` decorated name, used as the last resort in parameter-size resolution when neither
//! FPO table has an entry for a function. Grounded on `ms-pdb`'s `globals::gss::GlobalSymbolStream`
//! (already does the GSS framing) and the original Breakpad `dump_syms`
//! `PDBSourceLineWriter::GetFunctionCodeData` decorated-name heuristic.

use crate::sections::Sections;
use anyhow::{Context, Result};
use ms_pdb::syms::{Pub, SymKind};
use ms_pdb::{Pdb, ReadAt};
use std::collections::HashMap;

/// The exact `PubFixed::flags` value (`CVPSF_FUNCTION`, `cvinfo.h`) a public symbol must carry to
/// be treated as a function. The original only accepts this exact value, not a bit test: a public
/// with `fCode|fFunction` set (`flags == 3`) is rejected.
const CVPSF_FUNCTION: u32 = 0x2;

/// RVA -> decorated name, for every function-flagged `S_PUB32` record in the Global Symbol Stream.
pub struct Publics {
    by_rva: HashMap<u32, String>,
}

impl Publics {
    /// Reads the Global Symbol Stream and indexes every function public by its RVA.
    pub fn read<F: ReadAt>(pdb: &Pdb<F>, sections: &Sections) -> Result<Self> {
        let gss = pdb.gss().context("failed to read Global Symbol Stream")?;
        let mut by_rva = HashMap::new();

        for sym in gss.iter_syms() {
            if sym.kind != SymKind::S_PUB32 {
                continue;
            }
            let Ok(p) = sym.parse_as::<Pub>() else {
                continue;
            };
            if p.fixed.flags.get() != CVPSF_FUNCTION {
                continue;
            }
            let os = p.offset_segment();
            let Some(rva) = sections.to_rva(os.segment(), os.offset()) else {
                continue;
            };
            by_rva.insert(rva, p.name.to_string());
        }

        Ok(Self { by_rva })
    }

    /// Resolves a function's parameter byte count from its decorated public name, if one exists
    /// at `rva` and the name carries a recognized decoration suffix.
    pub fn param_size(&self, rva: u32) -> Option<u32> {
        param_size_from_decorated_name(self.by_rva.get(&rva)?)
    }
}

/// Parses the trailing `@N` parameter-byte-count suffix that Microsoft's `__stdcall`/`__fastcall`
/// name-decoration schemes append (`_Foo@8`, `@Foo@8`). A leading `@` marks `__fastcall`, whose
/// first two (register-passed) arguments are excluded from the stack-parameter byte count the
/// compiler encodes, so Breakpad's convention is to subtract 8, floored at 0.
fn param_size_from_decorated_name(name: &str) -> Option<u32> {
    let at = name.rfind('@')?;
    let digits = &name[at + 1..];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let mut size: u32 = digits.parse().ok()?;
    if name.starts_with('@') {
        size = size.saturating_sub(8);
    }
    Some(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdcall_name_yields_param_size() {
        assert_eq!(param_size_from_decorated_name("_Foo@8"), Some(8));
    }

    #[test]
    fn fastcall_name_subtracts_register_args() {
        assert_eq!(param_size_from_decorated_name("@Qux@16"), Some(8));
    }

    #[test]
    fn fastcall_name_floors_at_zero() {
        assert_eq!(param_size_from_decorated_name("@Tiny@4"), Some(0));
    }

    #[test]
    fn mangled_cpp_name_has_no_digit_suffix() {
        assert_eq!(param_size_from_decorated_name("?Bar@@YAHH@Z"), None);
    }

    #[test]
    fn plain_name_has_no_at_sign() {
        assert_eq!(param_size_from_decorated_name("memset"), None);
    }
}

//! Structural scans over PTX text.

use crate::backend::{BackendError, Result};

/// Directive that precedes an externally visible kernel name in PTX.
pub const ENTRY_MARKER: &str = ".visible .entry ";

/// Resolve the kernel name declared by the single `.visible .entry` directive.
///
/// The name is the token between the marker and the next `(`. PTX without the
/// directive, with more than one, or with a malformed name is rejected.
pub fn entry_point(ptx: &str) -> Result<&str> {
    let mut hits = ptx.match_indices(ENTRY_MARKER);
    let (start, _) = hits.next().ok_or_else(|| {
        BackendError::EntryPointNotFound(format!("no '{}' directive", ENTRY_MARKER.trim_end()))
    })?;
    let extra = hits.count();
    if extra > 0 {
        return Err(BackendError::EntryPointNotFound(format!(
            "expected one '{}' directive, found {}",
            ENTRY_MARKER.trim_end(),
            extra + 1
        )));
    }

    let rest = &ptx[start + ENTRY_MARKER.len()..];
    let open = rest.find('(').ok_or_else(|| {
        BackendError::EntryPointNotFound("entry directive has no parameter list".to_string())
    })?;
    let name = rest[..open].trim();
    if !is_identifier(name) {
        return Err(BackendError::EntryPointNotFound(format!(
            "invalid entry name {name:?}"
        )));
    }
    Ok(name)
}

/// PTX identifiers: `[A-Za-z_$%][A-Za-z0-9_$]*`.
fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || matches!(c, '_' | '$' | '%') => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$'))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KERNEL: &str = r#"
//
// Generated by NVIDIA NVVM Compiler
//
.version 7.8
.target sm_35
.address_size 64

	// .globl	E_4

.visible .entry E_4(
	.param .u64 E_4_param_0,
	.param .u64 E_4_param_1
)
{
	ret;
}
"#;

    #[test]
    fn finds_generated_kernel_name() {
        assert_eq!(entry_point(KERNEL).unwrap(), "E_4");
    }

    #[test]
    fn inline_parameter_list() {
        assert_eq!(entry_point(".visible .entry foo(.param .u64 a)").unwrap(), "foo");
    }

    #[test]
    fn missing_marker_fails() {
        let err = entry_point(".version 7.8\n.func bar(\n)").unwrap_err();
        assert!(matches!(err, BackendError::EntryPointNotFound(_)));
        // The bare `.entry` form is not externally visible.
        assert!(entry_point(".entry foo(").is_err());
    }

    #[test]
    fn missing_parameter_list_fails() {
        assert!(entry_point(".visible .entry foo\n{ ret; }").is_err());
    }

    #[test]
    fn malformed_name_fails() {
        assert!(entry_point(".visible .entry (").is_err());
        assert!(entry_point(".visible .entry 9lives(").is_err());
        assert!(entry_point(".visible .entry a b(").is_err());
    }

    #[test]
    fn multiple_entries_fail() {
        let ptx = ".visible .entry a(\n)\n{}\n.visible .entry b(\n)\n{}";
        let err = entry_point(ptx).unwrap_err();
        assert!(err.to_string().contains("found 2"));
    }
}

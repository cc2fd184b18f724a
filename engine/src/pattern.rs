//! Sequence pattern detection.
//!
//! A sequence batch is transferred with one glob instead of a file list. The
//! glob is synthesized from the members' file names: the longest common prefix
//! of their stems with trailing frame digits removed, a `*`, then the shared
//! extension. `seq.0001.exr ..= seq.0010.exr` becomes `seq.*.exr`.

use glob::{MatchOptions, Pattern};
use std::path::Path;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: !cfg!(windows),
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Build a glob covering every name in `names`.
///
/// Returns `None` for an empty list. With no shared prefix the result is
/// `*.<ext>` (or `*` when the extensions differ).
pub fn sequence_pattern<S: AsRef<str>>(names: &[S]) -> Option<String> {
    let (first, rest) = names.split_first()?;
    let (first_stem, first_ext) = split_extension(first.as_ref());

    let mut prefix: &str = first_stem;
    let mut ext = first_ext;
    for name in rest {
        let (stem, this_ext) = split_extension(name.as_ref());
        prefix = common_prefix(prefix, stem);
        if ext != this_ext {
            ext = None;
        }
    }

    let prefix = prefix.trim_end_matches(|c: char| c.is_ascii_digit());
    let prefix = Pattern::escape(prefix);
    Some(match ext {
        Some(ext) => format!("{}*.{}", prefix, Pattern::escape(ext)),
        None => format!("{}*", prefix),
    })
}

/// `sequence_pattern` over the file names of `paths`.
pub fn sequence_pattern_for_paths<P: AsRef<Path>>(paths: &[P]) -> Option<String> {
    let names: Vec<String> = paths
        .iter()
        .filter_map(|p| p.as_ref().file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .collect();
    if names.len() != paths.len() {
        return None;
    }
    sequence_pattern(&names)
}

/// Whether `name` (a bare file name) matches `pattern`. Invalid patterns match nothing.
pub fn matches_pattern(pattern: &str, name: &str) -> bool {
    Pattern::new(pattern)
        .map(|p| p.matches_with(name, MATCH_OPTIONS))
        .unwrap_or(false)
}

pub fn is_valid_pattern(pattern: &str) -> bool {
    !pattern.is_empty() && !pattern.contains(['/', '\\']) && Pattern::new(pattern).is_ok()
}

fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], Some(&name[idx + 1..])),
        _ => (name, None),
    }
}

fn common_prefix<'a>(a: &'a str, b: &str) -> &'a str {
    let end = a
        .char_indices()
        .zip(b.chars())
        .find(|((_, ca), cb)| ca != cb)
        .map(|((idx, _), _)| idx)
        .unwrap_or_else(|| a.len().min(b.len()));
    &a[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(prefix: &str, range: std::ops::RangeInclusive<u32>, ext: &str) -> Vec<String> {
        range.map(|i| format!("{}{:04}.{}", prefix, i, ext)).collect()
    }

    #[test]
    fn test_frame_sequence() {
        let names = frames("seq.", 1..=10, "exr");
        assert_eq!(sequence_pattern(&names).as_deref(), Some("seq.*.exr"));
    }

    #[test]
    fn test_single_member_strips_frame_number() {
        assert_eq!(sequence_pattern(&["shot_010.1001.dpx"]).as_deref(), Some("shot_010.*.dpx"));
    }

    #[test]
    fn test_no_shared_prefix() {
        assert_eq!(sequence_pattern(&["0001.exr", "beauty.exr"]).as_deref(), Some("*.exr"));
    }

    #[test]
    fn test_mixed_extensions() {
        assert_eq!(sequence_pattern(&["plate_01.exr", "plate_02.jpg"]).as_deref(), Some("plate_*"));
    }

    #[test]
    fn test_empty_input() {
        let empty: [&str; 0] = [];
        assert_eq!(sequence_pattern(&empty), None);
    }

    #[test]
    fn test_metacharacters_are_escaped() {
        let pattern = sequence_pattern(&["take[1].001.png", "take[1].002.png"]).expect("pattern");
        assert!(matches_pattern(&pattern, "take[1].003.png"));
        assert!(!matches_pattern(&pattern, "take1.003.png"));
    }

    #[test]
    fn test_pattern_matches_members_only() {
        let names = frames("seq.", 1..=10, "exr");
        let pattern = sequence_pattern(&names).expect("pattern");
        assert!(names.iter().all(|n| matches_pattern(&pattern, n)));
        assert!(!matches_pattern(&pattern, "seq.0001.jpg"));
        assert!(!matches_pattern(&pattern, "other.0001.exr"));
    }

    #[test]
    fn test_paths_and_validation() {
        let paths = vec![Path::new("/in/a_001.tif"), Path::new("/in/a_002.tif")];
        assert_eq!(sequence_pattern_for_paths(&paths).as_deref(), Some("a_*.tif"));
        assert!(is_valid_pattern("a_*.tif"));
        assert!(!is_valid_pattern("sub/a_*.tif"));
        assert!(!is_valid_pattern(""));
    }
}

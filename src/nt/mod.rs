//! The NT-native file layer (spec.md §4.2): pure path translation plus the
//! open/read/write/close/seek/stat/unlink primitives the Win32 surrogate
//! calls into. Every handle returned here comes from [`crate::handle::HandleTable`].

pub mod file;

/// Strips a leading drive letter (`C:`) and folds backslashes to forward
/// slashes. Relative paths are preserved untouched. Idempotent: translating
/// an already-translated path is a no-op, per spec.md §8's round-trip law.
pub fn translate_path(path: &str) -> String {
    let bytes = path.as_bytes();
    let rest = if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        &path[2..]
    } else {
        path
    };
    rest.chars().map(|c| if c == '\\' { '/' } else { c }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_drive_letter_and_folds_backslashes() {
        assert_eq!(translate_path(r"C:\Windows\System32\foo.dll"), "/Windows/System32/foo.dll");
    }

    #[test]
    fn relative_paths_are_preserved() {
        assert_eq!(translate_path(r"data\config.ini"), "data/config.ini");
    }

    #[test]
    fn translation_is_idempotent() {
        let once = translate_path(r"C:\a\b");
        let twice = translate_path(&once);
        assert_eq!(once, twice);
    }
}

use crate::prelude::ValidationError;
use std::path::Path;

/// Characters refused anywhere in a recording file name.
pub const DISALLOWED_CHARACTERS: &str = ",^@=+{}[]~!?:&*\"|#%<>$'();`";

/// Checks a recording target before anything is opened.
///
/// Order: empty name, disallowed characters, relative path, then an existing file that
/// the caller has not confirmed overwriting (only when `check_overwrites` is set).
pub fn validate_target(path: &Path, check_overwrites: bool, confirm_overwrite: bool) -> Result<(), ValidationError> {
    let text = path.to_string_lossy();
    if text.trim().is_empty() {
        return Err(ValidationError::EmptyPath);
    }

    let mut offending = String::new();
    for ch in text.chars().filter(|ch| DISALLOWED_CHARACTERS.contains(*ch)) {
        if !offending.contains(ch) {
            offending.push(ch);
        }
    }
    if !offending.is_empty() {
        return Err(ValidationError::DisallowedCharacters(offending));
    }

    if !path.is_absolute() {
        return Err(ValidationError::NotAbsolute(path.to_path_buf()));
    }

    if check_overwrites && path.is_file() && !confirm_overwrite {
        return Err(ValidationError::OverwriteNotConfirmed(path.to_path_buf()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_name_is_refused() {
        assert_eq!(validate_target(Path::new(""), true, false), Err(ValidationError::EmptyPath));
    }

    #[test]
    fn every_disallowed_character_is_reported_once() {
        let err = validate_target(Path::new("/tmp/a,b,c#d.raw"), true, false).unwrap_err();
        assert_eq!(err, ValidationError::DisallowedCharacters(",#".into()));
        for ch in DISALLOWED_CHARACTERS.chars() {
            let path = PathBuf::from(format!("/tmp/take{}.raw", ch));
            assert!(matches!(
                validate_target(&path, false, false),
                Err(ValidationError::DisallowedCharacters(_))
            ));
        }
    }

    #[test]
    fn relative_path_is_refused() {
        assert!(matches!(
            validate_target(Path::new("take.raw"), false, false),
            Err(ValidationError::NotAbsolute(_))
        ));
    }

    #[test]
    fn existing_file_needs_confirmation_only_when_checking() {
        let temp = NamedTempFile::new().unwrap();
        assert!(matches!(
            validate_target(temp.path(), true, false),
            Err(ValidationError::OverwriteNotConfirmed(_))
        ));
        assert!(validate_target(temp.path(), true, true).is_ok());
        assert!(validate_target(temp.path(), false, false).is_ok());
    }

    #[test]
    fn directory_is_not_treated_as_an_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_target(dir.path(), true, false).is_ok());
    }
}

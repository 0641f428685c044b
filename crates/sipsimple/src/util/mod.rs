//! Small helpers shared by applications built on the library

pub mod timestamp;

use std::path::Path;

use crate::error::Result;

pub use timestamp::Timestamp;

/// Clamp `value` to `[min, max]`. When `min > max`, `min` wins.
pub fn limit<T: PartialOrd>(value: T, min: T, max: T) -> T {
    let value = if value > max { max } else { value };
    if value < min { min } else { value }
}

/// Create `path` and its parents. An existing directory is not an error.
pub fn makedirs(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    match std::fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(_) if path.is_dir() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_clamps() {
        assert_eq!(limit(5, 0, 10), 5);
        assert_eq!(limit(-3, 0, 10), 0);
        assert_eq!(limit(42, 0, 10), 10);
        assert_eq!(limit(0.5, 1.0, f64::INFINITY), 1.0);
        assert_eq!(limit(5, 10, 0), 10);
    }

    #[test]
    fn makedirs_creates_nested_and_tolerates_existing() {
        let root = std::env::temp_dir().join(format!("sipsimple-makedirs-{}", std::process::id()));
        let nested = root.join("a").join("b");
        makedirs(&nested).unwrap();
        assert!(nested.is_dir());
        makedirs(&nested).unwrap();

        let file = root.join("file");
        std::fs::write(&file, b"x").unwrap();
        assert!(makedirs(&file).is_err());
        std::fs::remove_dir_all(&root).unwrap();
    }
}

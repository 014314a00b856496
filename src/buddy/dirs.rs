//! `BUDDY_HOME`/`BUDDY_CONFIG` resolution (§5.3, §5.4). Modeled directly on
//! the teacher's `fae_dirs` module: an environment-variable override
//! checked first, falling back to the `dirs` crate's per-platform data
//! directory, falling back further to a hardcoded default.

use std::path::PathBuf;

/// The root directory relative configuration paths resolve against.
///
/// Resolution order: the `BUDDY_HOME` environment variable if set;
/// otherwise `dirs::data_dir()/buddy/`; otherwise `/tmp/buddy-home`.
#[must_use]
pub fn buddy_home() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("BUDDY_HOME") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("buddy"))
        .unwrap_or_else(|| PathBuf::from("/tmp/buddy-home"))
}

/// Path to the configuration file.
///
/// Resolution order: the `BUDDY_CONFIG` environment variable (resolved
/// against `buddy_home()` if relative); otherwise `<buddy_home>/config.yaml`.
#[must_use]
pub fn buddy_config_path() -> PathBuf {
    if let Some(override_path) = std::env::var_os("BUDDY_CONFIG") {
        let path = PathBuf::from(override_path);
        if path.is_relative() {
            return buddy_home().join(path);
        }
        return path;
    }
    buddy_home().join("config.yaml")
}

/// Resolve a possibly-relative path against `buddy_home()`. Absolute paths
/// are returned unchanged.
#[must_use]
pub fn resolve(path: &std::path::Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        buddy_home().join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EnvGuard {
        key: &'static str,
        previous: Option<std::ffi::OsString>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let previous = std::env::var_os(key);
            // SAFETY: tests run single-threaded per module.
            unsafe { std::env::set_var(key, value) };
            EnvGuard { key, previous }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match self.previous.take() {
                // SAFETY: tests run single-threaded per module.
                Some(val) => unsafe { std::env::set_var(self.key, val) },
                None => unsafe { std::env::remove_var(self.key) },
            }
        }
    }

    #[test]
    fn buddy_home_respects_override() {
        let _guard = EnvGuard::set("BUDDY_HOME", "/custom/buddy-home");
        assert_eq!(buddy_home(), PathBuf::from("/custom/buddy-home"));
    }

    #[test]
    fn buddy_config_path_defaults_under_home() {
        let home_guard = EnvGuard::set("BUDDY_HOME", "/custom/buddy-home");
        let config_guard = EnvGuard {
            key: "BUDDY_CONFIG",
            previous: std::env::var_os("BUDDY_CONFIG"),
        };
        // SAFETY: tests run single-threaded per module.
        unsafe { std::env::remove_var("BUDDY_CONFIG") };
        assert_eq!(buddy_config_path(), PathBuf::from("/custom/buddy-home/config.yaml"));
        drop(config_guard);
        drop(home_guard);
    }

    #[test]
    fn relative_buddy_config_resolves_against_home() {
        let _home = EnvGuard::set("BUDDY_HOME", "/custom/buddy-home");
        let _config = EnvGuard::set("BUDDY_CONFIG", "alt-config.yaml");
        assert_eq!(
            buddy_config_path(),
            PathBuf::from("/custom/buddy-home/alt-config.yaml")
        );
    }

    #[test]
    fn absolute_buddy_config_is_used_verbatim() {
        let _home = EnvGuard::set("BUDDY_HOME", "/custom/buddy-home");
        let _config = EnvGuard::set("BUDDY_CONFIG", "/elsewhere/config.yaml");
        assert_eq!(buddy_config_path(), PathBuf::from("/elsewhere/config.yaml"));
    }
}

//! Virtual/platform path translation and traversal guard.
//!
//! The UI only ever sees virtual paths rooted at [`VIRTUAL_WORKDIR`]; the
//! platform file manager only ever sees relative paths with forward slashes
//! and no leading slash. Every platform call crosses this boundary.

use crate::error::{Result, RuntimeError};

/// The fixed virtual workdir exposed to the editor.
pub const VIRTUAL_WORKDIR: &str = "/home/project";

/// Root-level dependency manifests whose write triggers a redeploy.
const REDEPLOY_TRIGGERS: &[&str] = &[
    "package.json",
    "package-lock.json",
    "pnpm-lock.yaml",
    "yarn.lock",
    "bun.lockb",
    "docker-compose.yml",
];

/// Map a virtual path to the platform-relative form. Fails on `..` segments.
pub fn to_platform_path(virtual_path: &str) -> Result<String> {
    let normalized = virtual_path.replace('\\', "/");
    let workdir_prefix = format!("{VIRTUAL_WORKDIR}/");

    let relative = if normalized == VIRTUAL_WORKDIR || normalized == workdir_prefix {
        ""
    } else if let Some(stripped) = normalized.strip_prefix(&workdir_prefix) {
        stripped
    } else {
        normalized.trim_start_matches('/')
    };

    canonical_segments(relative).map(|segments| segments.join("/"))
}

/// Map a platform-relative path back to its virtual form.
pub fn to_virtual_path(platform_path: &str) -> Result<String> {
    let normalized = platform_path.replace('\\', "/");
    let segments = canonical_segments(normalized.trim_start_matches('/'))?;
    if segments.is_empty() {
        Ok(VIRTUAL_WORKDIR.to_string())
    } else {
        Ok(format!("{VIRTUAL_WORKDIR}/{}", segments.join("/")))
    }
}

/// Whether a write to this virtual path must queue a redeploy. Only the
/// whitelisted manifests at the workdir root qualify; nested copies do not.
pub fn is_redeploy_trigger_path(virtual_path: &str) -> bool {
    match to_platform_path(virtual_path) {
        Ok(platform) => {
            let lowered = platform.to_ascii_lowercase();
            REDEPLOY_TRIGGERS.contains(&lowered.as_str())
        }
        Err(_) => false,
    }
}

fn canonical_segments(path: &str) -> Result<Vec<&str>> {
    let mut segments = Vec::new();
    for segment in path.split('/') {
        if segment == ".." {
            return Err(RuntimeError::invalid_path());
        }
        if segment.is_empty() || segment == "." {
            continue;
        }
        segments.push(segment);
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_workdir_to_empty() {
        assert_eq!(to_platform_path("/home/project").unwrap(), "");
        assert_eq!(to_platform_path("/home/project/").unwrap(), "");
    }

    #[test]
    fn strips_workdir_prefix() {
        assert_eq!(
            to_platform_path("/home/project/src/main.ts").unwrap(),
            "src/main.ts"
        );
    }

    #[test]
    fn strips_leading_slashes_outside_workdir() {
        assert_eq!(to_platform_path("/src/app.tsx").unwrap(), "src/app.tsx");
        assert_eq!(to_platform_path("src/app.tsx").unwrap(), "src/app.tsx");
    }

    #[test]
    fn rejects_traversal() {
        let err = to_platform_path("/home/project/../secret").unwrap_err();
        assert_eq!(err.message, "Invalid runtime path");
        assert!(to_platform_path("..\\..\\etc/passwd").is_err());
        assert!(to_virtual_path("a/../b").is_err());
    }

    #[test]
    fn normalizes_backslashes_and_duplicate_slashes() {
        assert_eq!(
            to_platform_path("/home/project/src\\nested//file.ts").unwrap(),
            "src/nested/file.ts"
        );
    }

    #[test]
    fn virtual_round_trip() {
        for path in ["", "src", "src/components/App.tsx"] {
            let virtual_path = to_virtual_path(path).unwrap();
            assert_eq!(to_platform_path(&virtual_path).unwrap(), path);
        }
        assert_eq!(to_virtual_path("").unwrap(), VIRTUAL_WORKDIR);
    }

    #[test]
    fn redeploy_trigger_detection() {
        assert!(is_redeploy_trigger_path("/home/project/package.json"));
        assert!(is_redeploy_trigger_path("/home/project/PNPM-lock.yaml"));
        assert!(is_redeploy_trigger_path("/home/project/docker-compose.yml"));
        assert!(!is_redeploy_trigger_path("/home/project/src/package.json"));
        assert!(!is_redeploy_trigger_path("/home/project/readme.md"));
        assert!(!is_redeploy_trigger_path("/home/project"));
    }
}

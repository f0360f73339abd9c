//! Host platform names as CI agents report them

/// Operating system name (`linux`, `darwin`, `windows`, ...)
#[must_use]
pub fn agent_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

/// CPU architecture name (`amd64`, `arm64`, ...)
#[must_use]
pub fn agent_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "powerpc64" => "ppc64",
        other => other,
    }
}

/// `os/arch` pair reported to the registry
#[must_use]
pub fn platform() -> String {
    format!("{}/{}", agent_os(), agent_arch())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_joins_os_and_arch() {
        let p = platform();
        assert_eq!(p, format!("{}/{}", agent_os(), agent_arch()));
        assert!(!agent_os().is_empty());
        assert_ne!(agent_os(), "macos");
        assert_ne!(agent_arch(), "x86_64");
    }
}

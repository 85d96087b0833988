//! Compile-time configuration: target platform, architecture, bit width, and
//! the optional `casm.toml` project file, generalising the per-target
//! `Profile` JSON loaded from a `platform-dirs` config directory into a
//! single project-local TOML file.

use serde::Deserialize;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Windows,
    Linux,
    Macos,
}

impl Default for Target {
    fn default() -> Self {
        Target::Windows
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Target::Windows => "windows",
            Target::Linux => "linux",
            Target::Macos => "macos",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Target {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "windows" => Ok(Target::Windows),
            "linux" => Ok(Target::Linux),
            "macos" => Ok(Target::Macos),
            other => Err(format!("unknown target '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    #[serde(rename = "x86_64")]
    X86_64,
    Arm64,
}

impl Default for Arch {
    fn default() -> Self {
        Arch::X86_64
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Arch::X86_64 => "x86_64",
            Arch::Arm64 => "arm64",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Arch {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x86_64" => Ok(Arch::X86_64),
            "arm64" => Ok(Arch::Arm64),
            other => Err(format!("unknown arch '{other}'")),
        }
    }
}

/// The full set of knobs the generator and formatter consult. ARM64 is
/// always 64-bit; `bits` only has an effect for `Arch::X86_64`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileConfig {
    pub target: Target,
    pub arch: Arch,
    pub bits: u8,
    pub verbose: bool,
    /// Per-helper assembly body overrides, keyed by stdlib helper name
    /// (`casm.toml`'s `[stdlib_overrides]` table), consulted by
    /// `StdlibCatalogue::apply_overrides`.
    pub stdlib_overrides: std::collections::HashMap<String, String>,
}

impl Default for CompileConfig {
    fn default() -> Self {
        CompileConfig {
            target: Target::default(),
            arch: Arch::default(),
            bits: 64,
            verbose: false,
            stdlib_overrides: std::collections::HashMap::new(),
        }
    }
}

impl CompileConfig {
    pub fn effective_bits(&self) -> u8 {
        match self.arch {
            Arch::Arm64 => 64,
            Arch::X86_64 => self.bits,
        }
    }
}

/// Mirrors the shape of a project-local `casm.toml`. Every field is
/// optional; anything absent falls back to `CompileConfig::default()` or to
/// CLI flags, whichever layer the caller merges last.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectConfig {
    pub target: Option<Target>,
    pub arch: Option<Arch>,
    pub bits: Option<u8>,
    #[serde(default)]
    pub stdlib_overrides: std::collections::HashMap<String, String>,
}

impl ProjectConfig {
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    }

    pub fn merge_into(&self, base: CompileConfig) -> CompileConfig {
        let mut stdlib_overrides = base.stdlib_overrides;
        stdlib_overrides.extend(self.stdlib_overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        CompileConfig {
            target: self.target.unwrap_or(base.target),
            arch: self.arch.unwrap_or(base.arch),
            bits: self.bits.unwrap_or(base.bits),
            verbose: base.verbose,
            stdlib_overrides,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm64_is_always_64_bit() {
        let cfg = CompileConfig {
            target: Target::Linux,
            arch: Arch::Arm64,
            bits: 32,
            ..CompileConfig::default()
        };
        assert_eq!(cfg.effective_bits(), 64);
    }

    #[test]
    fn target_round_trips_through_display_and_parse() {
        for t in [Target::Windows, Target::Linux, Target::Macos] {
            let parsed: Target = t.to_string().parse().unwrap();
            assert_eq!(parsed, t);
        }
    }

    #[test]
    fn project_config_merge_overrides_only_present_fields() {
        let proj = ProjectConfig {
            target: Some(Target::Macos),
            arch: None,
            bits: None,
            stdlib_overrides: Default::default(),
        };
        let merged = proj.merge_into(CompileConfig::default());
        assert_eq!(merged.target, Target::Macos);
        assert_eq!(merged.arch, Arch::X86_64);
    }

    #[test]
    fn project_config_merge_carries_stdlib_overrides() {
        let mut overrides = std::collections::HashMap::new();
        overrides.insert("print".to_string(), "    ; custom body\n".to_string());
        let proj = ProjectConfig {
            target: None,
            arch: None,
            bits: None,
            stdlib_overrides: overrides,
        };
        let merged = proj.merge_into(CompileConfig::default());
        assert_eq!(merged.stdlib_overrides.get("print").unwrap(), "    ; custom body\n");
    }
}

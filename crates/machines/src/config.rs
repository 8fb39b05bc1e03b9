//! Virtual machine configuration and its validation rules.
//!
//! `validate` is deterministic and returns a *normalized* configuration
//! (trimmed, lower-cased names, defaults filled in), so validating an already
//! validated configuration is a no-op.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CPU_COUNT: u32 = 1;
pub const DEFAULT_MEMORY_MB: u64 = 1024;
pub const MAX_CPU_COUNT: u32 = 240;
pub const MIN_MEMORY_MB: u64 = 32;
pub const MAX_MEMORY_MB: u64 = 12 * 1024 * 1024;
pub const MAX_DRIVE_SIZE_GB: u64 = 64 * 1024;
pub const MAX_NAME_LEN: usize = 15;
pub const DEFAULT_ADAPTER_NAME: &str = "eth0";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MachineConfig {
    pub name: String,
    /// Parent image the machine is built from; `None` builds an empty machine.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub cpu_count: Option<u32>,
    #[serde(default)]
    pub memory_mb: Option<u64>,
    #[serde(default)]
    pub drives: Vec<DriveConfig>,
    #[serde(default)]
    pub network_adapters: Vec<NetworkAdapterConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveConfig {
    pub name: String,
    #[serde(default)]
    pub size_gb: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAdapterConfig {
    pub name: String,
    #[serde(default)]
    pub network: Option<String>,
}

/// A single problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub member: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("machine configuration is invalid: {}", format_issues(.issues))]
pub struct ConfigValidationError {
    pub issues: Vec<ValidationIssue>,
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("{}: {}", i.member, i.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl MachineConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_memory_mb(mut self, memory_mb: u64) -> Self {
        self.memory_mb = Some(memory_mb);
        self
    }

    pub fn with_cpu_count(mut self, cpu_count: u32) -> Self {
        self.cpu_count = Some(cpu_count);
        self
    }

    /// Memory the machine needs on its host.
    pub fn required_memory_mb(&self) -> u64 {
        self.memory_mb.unwrap_or(DEFAULT_MEMORY_MB)
    }

    /// Cores the machine needs on its host.
    pub fn required_cpus(&self) -> u32 {
        self.cpu_count.unwrap_or(DEFAULT_CPU_COUNT)
    }

    /// Validate and normalize.
    pub fn validate(&self) -> Result<MachineConfig, ConfigValidationError> {
        let normalized = self.normalized();
        let mut issues = Vec::new();

        check_name("name", &normalized.name, &mut issues);

        let cpus = normalized.required_cpus();
        if cpus == 0 || cpus > MAX_CPU_COUNT {
            issues.push(issue(
                "cpu_count",
                format!("must be between 1 and {MAX_CPU_COUNT}"),
            ));
        }

        let memory = normalized.required_memory_mb();
        if !(MIN_MEMORY_MB..=MAX_MEMORY_MB).contains(&memory) {
            issues.push(issue(
                "memory_mb",
                format!("must be between {MIN_MEMORY_MB} and {MAX_MEMORY_MB}"),
            ));
        } else if memory % 2 != 0 {
            issues.push(issue("memory_mb", "must be a multiple of 2"));
        }

        for (idx, drive) in normalized.drives.iter().enumerate() {
            let member = format!("drives[{idx}]");
            check_name(&format!("{member}.name"), &drive.name, &mut issues);
            if let Some(size) = drive.size_gb {
                if size == 0 || size > MAX_DRIVE_SIZE_GB {
                    issues.push(issue(
                        format!("{member}.size_gb"),
                        format!("must be between 1 and {MAX_DRIVE_SIZE_GB}"),
                    ));
                }
            }
            if normalized.drives[..idx].iter().any(|d| d.name == drive.name) {
                issues.push(issue(format!("{member}.name"), "duplicate drive name"));
            }
        }

        for (idx, adapter) in normalized.network_adapters.iter().enumerate() {
            let member = format!("network_adapters[{idx}]");
            check_name(&format!("{member}.name"), &adapter.name, &mut issues);
            if normalized.network_adapters[..idx]
                .iter()
                .any(|a| a.name == adapter.name)
            {
                issues.push(issue(format!("{member}.name"), "duplicate adapter name"));
            }
        }

        if issues.is_empty() {
            Ok(normalized)
        } else {
            Err(ConfigValidationError { issues })
        }
    }

    fn normalized(&self) -> MachineConfig {
        let mut network_adapters: Vec<NetworkAdapterConfig> = self
            .network_adapters
            .iter()
            .map(|a| NetworkAdapterConfig {
                name: a.name.trim().to_lowercase(),
                network: a
                    .network
                    .as_deref()
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(str::to_string),
            })
            .collect();
        if network_adapters.is_empty() {
            network_adapters.push(NetworkAdapterConfig {
                name: DEFAULT_ADAPTER_NAME.to_string(),
                network: None,
            });
        }

        MachineConfig {
            name: self.name.trim().to_lowercase(),
            image: self
                .image
                .as_deref()
                .map(str::trim)
                .filter(|i| !i.is_empty())
                .map(str::to_string),
            cpu_count: Some(self.required_cpus()),
            memory_mb: Some(self.required_memory_mb()),
            drives: self
                .drives
                .iter()
                .map(|d| DriveConfig {
                    name: d.name.trim().to_lowercase(),
                    size_gb: d.size_gb,
                })
                .collect(),
            network_adapters,
        }
    }
}

fn issue(member: impl Into<String>, message: impl Into<String>) -> ValidationIssue {
    ValidationIssue {
        member: member.into(),
        message: message.into(),
    }
}

// Host names end up as NetBIOS names on the guest: 1-15 chars of [a-z0-9-],
// no leading or trailing hyphen.
fn check_name(member: &str, name: &str, issues: &mut Vec<ValidationIssue>) {
    if name.is_empty() {
        issues.push(issue(member, "cannot be empty"));
        return;
    }
    if name.chars().count() > MAX_NAME_LEN {
        issues.push(issue(
            member,
            format!("cannot be longer than {MAX_NAME_LEN} characters"),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        issues.push(issue(member, "may only contain letters, digits and '-'"));
    }
    if name.starts_with('-') || name.ends_with('-') {
        issues.push(issue(member, "cannot start or end with '-'"));
    }
}

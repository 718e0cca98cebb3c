//! Host configuration provisioning.
//!
//! Writes the flat host configuration JSON consumed by the bootloader, either
//! to `host_configuration.json` or into an EFI variable. Optional fields keep
//! "unset" (`None`, written as `null`) apart from "set to empty" (`Some("")`).

use crate::error::{Result, StmgrError};
use crate::fsutil::write_private;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::info;

pub const HOST_CONFIG_VERSION: u32 = 1;
pub const HOST_CONFIG_FILE: &str = "host_configuration.json";
pub const EFIVARFS_DIR: &str = "/sys/firmware/efi/efivars";
pub const EFI_VARIABLE_NAME: &str = "STHostConfig-f401f2c1-b005-4be0-8cee-f2e5945bcbe7";

const EFI_VARIABLE_NON_VOLATILE: u32 = 0x1;
const EFI_VARIABLE_BOOTSERVICE_ACCESS: u32 = 0x2;
const EFI_VARIABLE_RUNTIME_ACCESS: u32 = 0x4;

/// How the host obtains its network address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    Static,
    Dhcp,
}

impl std::str::FromStr for NetworkMode {
    type Err = StmgrError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "static" => Ok(Self::Static),
            "dhcp" => Ok(Self::Dhcp),
            other => Err(StmgrError::ParseError(format!(
                "unknown network mode '{}', use 'static' or 'dhcp'",
                other
            ))),
        }
    }
}

/// The host configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    pub version: u32,
    pub network_mode: Option<NetworkMode>,
    pub host_ip: Option<String>,
    pub gateway: Option<String>,
    pub dns: Option<String>,
    pub network_interface: Option<String>,
    pub provisioning_urls: Option<Vec<String>>,
    pub identity: Option<String>,
    pub authentication: Option<String>,
    pub timestamp: Option<i64>,
    pub network_interfaces: Option<Vec<String>>,
    pub bonding_mode: Option<String>,
    pub bond_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            version: HOST_CONFIG_VERSION,
            network_mode: None,
            host_ip: None,
            gateway: None,
            dns: None,
            network_interface: None,
            provisioning_urls: None,
            identity: None,
            authentication: None,
            timestamp: None,
            network_interfaces: None,
            bonding_mode: None,
            bond_name: None,
            custom: BTreeMap::new(),
        }
    }
}

impl HostConfig {
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Check field combinations the bootloader would refuse.
    pub fn validate(&self) -> Result<()> {
        if self.network_mode == Some(NetworkMode::Static) {
            for (name, value) in [("host_ip", &self.host_ip), ("gateway", &self.gateway)] {
                if value.as_deref().map_or(true, str::is_empty) {
                    return Err(StmgrError::ParseError(format!(
                        "static network mode requires {}",
                        name
                    )));
                }
            }
        }

        if let Some(urls) = &self.provisioning_urls {
            if let Some(bad) = urls
                .iter()
                .find(|u| !u.starts_with("http://") && !u.starts_with("https://"))
            {
                return Err(StmgrError::ParseError(format!(
                    "provisioning URL must be http(s): {}",
                    bad
                )));
            }
        }

        if self.bond_name.is_some() && self.network_interfaces.is_none() {
            return Err(StmgrError::ParseError(
                "bond_name requires network_interfaces".to_string(),
            ));
        }

        Ok(())
    }
}

/// Where the host configuration is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigTarget {
    /// A JSON file.
    File(PathBuf),
    /// An EFI variable in the given efivarfs mount.
    Efi { efivars_dir: PathBuf },
}

impl ConfigTarget {
    pub fn default_file() -> Self {
        Self::File(PathBuf::from(HOST_CONFIG_FILE))
    }

    pub fn default_efi() -> Self {
        Self::Efi {
            efivars_dir: PathBuf::from(EFIVARFS_DIR),
        }
    }
}

/// Validate and store a host configuration.
pub fn write_host_config(config: &HostConfig, target: &ConfigTarget) -> Result<()> {
    config.validate()?;
    let json = config.to_json()?;

    match target {
        ConfigTarget::File(path) => {
            write_private(path, &json)?;
            info!(path = %path.display(), "wrote host configuration");
        }
        ConfigTarget::Efi { efivars_dir } => {
            write_efi_variable(efivars_dir, EFI_VARIABLE_NAME, &json)?;
            info!(variable = EFI_VARIABLE_NAME, "wrote host configuration to EFI");
        }
    }

    Ok(())
}

/// Write `data` as a non-volatile EFI variable visible at boot and runtime.
///
/// efivarfs expects the 4-byte little-endian attribute mask followed by the
/// payload in a single write. An existing variable is replaced; variables
/// marked immutable (`chattr +i`) must be made mutable first.
pub fn write_efi_variable(efivars_dir: &Path, name: &str, data: &[u8]) -> Result<()> {
    let attributes =
        EFI_VARIABLE_NON_VOLATILE | EFI_VARIABLE_BOOTSERVICE_ACCESS | EFI_VARIABLE_RUNTIME_ACCESS;

    let mut buf = Vec::with_capacity(4 + data.len());
    buf.extend_from_slice(&attributes.to_le_bytes());
    buf.extend_from_slice(data);

    let path = efivars_dir.join(name);
    match fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(StmgrError::IoError(e)),
    }

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)?;
    file.write_all(&buf)?;
    Ok(())
}

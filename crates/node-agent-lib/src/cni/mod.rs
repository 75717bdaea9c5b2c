//! Flannel CNI configuration catalog
//!
//! A fixed set of CNI configuration documents keyed by host platform,
//! negotiated CNI spec version, and (for Windows 1.0.0) variant. The
//! documents are compile-time constants and are never modified; the only
//! templated value is the provider address in the extended Windows variant.

mod descriptors;

pub use descriptors::IPV4_ADDRESS_PLACEHOLDER;

use crate::models::Platform;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// CNI specification versions the catalog has documents for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CniVersion {
    #[serde(rename = "0.3.1")]
    V0_3_1,
    #[serde(rename = "1.0.0")]
    V1_0_0,
}

impl CniVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            CniVersion::V0_3_1 => "0.3.1",
            CniVersion::V1_0_0 => "1.0.0",
        }
    }
}

impl fmt::Display for CniVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CniVersion {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "0.3.1" => Ok(CniVersion::V0_3_1),
            "1.0.0" => Ok(CniVersion::V1_0_0),
            other => Err(CatalogError::UnknownVersion(other.to_string())),
        }
    }
}

/// Which flavour of a document to use when a version has more than one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptorVariant {
    #[default]
    Baseline,
    /// Port mappings, HNS v2 policies and a node provider address
    Extended,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("unknown CNI version {0:?}")]
    UnknownVersion(String),

    #[error("no {variant:?} CNI configuration for {platform} with CNI {version}")]
    Unsupported {
        platform: Platform,
        version: CniVersion,
        variant: DescriptorVariant,
    },
}

/// One CNI configuration document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkDescriptor {
    pub platform: Platform,
    /// The `cniVersion` written in the document
    pub cni_version: CniVersion,
    pub variant: DescriptorVariant,
    pub text: &'static str,
}

pub const LINUX: NetworkDescriptor = NetworkDescriptor {
    platform: Platform::Linux,
    cni_version: CniVersion::V0_3_1,
    variant: DescriptorVariant::Baseline,
    text: descriptors::LINUX_V0_3_1,
};

pub const WINDOWS_V0_3_1: NetworkDescriptor = NetworkDescriptor {
    platform: Platform::Windows,
    cni_version: CniVersion::V0_3_1,
    variant: DescriptorVariant::Baseline,
    text: descriptors::WINDOWS_V0_3_1,
};

pub const WINDOWS_V1_0_0: NetworkDescriptor = NetworkDescriptor {
    platform: Platform::Windows,
    cni_version: CniVersion::V1_0_0,
    variant: DescriptorVariant::Baseline,
    text: descriptors::WINDOWS_V1_0_0,
};

pub const WINDOWS_V1_0_0_EXTENDED: NetworkDescriptor = NetworkDescriptor {
    platform: Platform::Windows,
    cni_version: CniVersion::V1_0_0,
    variant: DescriptorVariant::Extended,
    text: descriptors::WINDOWS_V1_0_0_EXTENDED,
};

/// Every document in the catalog
pub const ALL: [&NetworkDescriptor; 4] = [
    &LINUX,
    &WINDOWS_V0_3_1,
    &WINDOWS_V1_0_0,
    &WINDOWS_V1_0_0_EXTENDED,
];

/// Pick the document for a platform and negotiated CNI version
///
/// Linux has a single document that serves every version. The extended
/// variant only exists for Windows with CNI 1.0.0.
pub fn select(
    platform: Platform,
    version: CniVersion,
    variant: DescriptorVariant,
) -> Result<&'static NetworkDescriptor, CatalogError> {
    use DescriptorVariant::*;

    match (platform, version, variant) {
        (Platform::Linux, _, Baseline) => Ok(&LINUX),
        (Platform::Windows, CniVersion::V0_3_1, Baseline) => Ok(&WINDOWS_V0_3_1),
        (Platform::Windows, CniVersion::V1_0_0, Baseline) => Ok(&WINDOWS_V1_0_0),
        (Platform::Windows, CniVersion::V1_0_0, Extended) => Ok(&WINDOWS_V1_0_0_EXTENDED),
        (platform, version, variant) => Err(CatalogError::Unsupported {
            platform,
            version,
            variant,
        }),
    }
}

impl NetworkDescriptor {
    /// Name of the CNI network the document configures
    pub fn network_name(&self) -> &'static str {
        match self.platform {
            Platform::Linux => "cbr0",
            Platform::Windows => crate::models::DEFAULT_FLANNEL_NETWORK,
        }
    }

    pub fn has_placeholder(&self) -> bool {
        self.text.contains(IPV4_ADDRESS_PLACEHOLDER)
    }

    /// Document text with the provider address filled in
    pub fn render(&self, node_ipv4: Ipv4Addr) -> String {
        self.text
            .replace(IPV4_ADDRESS_PLACEHOLDER, &node_ipv4.to_string())
    }
}

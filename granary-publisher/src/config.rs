//! Upload configuration
//!
//! All inputs are externally supplied; validation runs before any processing
//! begins so a bad configuration never touches the source file or a farmer.

use crate::farmer::DEFAULT_FARMER_TIMEOUT;
use granary_core::error::{GranaryError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Default number of parallel shard uploads
pub const DEFAULT_PARALLELISM: usize = 4;

/// One farmer as supplied by the (external) discovery mechanism
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FarmerAddr {
    /// Identity / payment key
    pub address: String,
    /// Network location
    pub endpoint: String,
    /// Deployment region
    pub region: String,
}

impl FarmerAddr {
    pub fn new(
        address: impl Into<String>,
        endpoint: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            endpoint: endpoint.into(),
            region: region.into(),
        }
    }
}

/// Configuration for one upload run
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Path of the file to publish
    pub file_path: PathBuf,
    /// Farmer directory, in the order that fixes manifest farmer indices
    pub farmers: Vec<FarmerAddr>,
    /// Publisher's wallet address
    pub publisher_address: String,
    /// Where to save the manifest
    pub manifest_path: PathBuf,
    /// Number of parallel shard uploads
    pub parallelism: usize,
    /// Timeout for one farmer call (distinct from any overall deadline)
    pub farmer_timeout: Duration,
}

impl UploadConfig {
    /// Create a config with default parallelism and farmer timeout
    pub fn new(
        file_path: impl Into<PathBuf>,
        farmers: Vec<FarmerAddr>,
        publisher_address: impl Into<String>,
        manifest_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            farmers,
            publisher_address: publisher_address.into(),
            manifest_path: manifest_path.into(),
            parallelism: DEFAULT_PARALLELISM,
            farmer_timeout: DEFAULT_FARMER_TIMEOUT,
        }
    }

    /// Validate the configuration before any work starts
    pub fn validate(&self) -> Result<()> {
        if self.file_path.as_os_str().is_empty() {
            return Err(GranaryError::Configuration(
                "file path must not be empty".to_string(),
            ));
        }
        if self.farmers.is_empty() {
            return Err(GranaryError::Configuration(
                "at least one farmer is required".to_string(),
            ));
        }
        for farmer in &self.farmers {
            if farmer.endpoint.is_empty() {
                return Err(GranaryError::Configuration(format!(
                    "farmer {} has an empty endpoint",
                    farmer.address
                )));
            }
        }
        if self.publisher_address.is_empty() {
            return Err(GranaryError::Configuration(
                "publisher address must not be empty".to_string(),
            ));
        }
        if self.manifest_path.as_os_str().is_empty() {
            return Err(GranaryError::Configuration(
                "manifest path must not be empty".to_string(),
            ));
        }
        if self.parallelism == 0 {
            return Err(GranaryError::Configuration(
                "parallelism must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for one retrieve run
#[derive(Debug, Clone)]
pub struct RetrieveConfig {
    /// Where to write the reassembled file
    pub output_path: PathBuf,
    /// Number of chunks reconstructed in parallel
    pub parallelism: usize,
    /// Timeout for one farmer call
    pub farmer_timeout: Duration,
}

impl RetrieveConfig {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            parallelism: DEFAULT_PARALLELISM,
            farmer_timeout: DEFAULT_FARMER_TIMEOUT,
        }
    }

    /// Validate the configuration before any work starts
    pub fn validate(&self) -> Result<()> {
        if self.output_path.as_os_str().is_empty() {
            return Err(GranaryError::Configuration(
                "output path must not be empty".to_string(),
            ));
        }
        if self.parallelism == 0 {
            return Err(GranaryError::Configuration(
                "parallelism must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn farmers(n: usize) -> Vec<FarmerAddr> {
        (0..n)
            .map(|i| {
                FarmerAddr::new(
                    format!("0xfarmer{}", i),
                    format!("http://farmer{}.example", i),
                    "eu-west",
                )
            })
            .collect()
    }

    #[test]
    fn test_valid_config() {
        let config = UploadConfig::new("/data/file.bin", farmers(6), "0xpub", "/data/manifest.json");
        assert_eq!(config.parallelism, DEFAULT_PARALLELISM);
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_file_path_rejected() {
        let config = UploadConfig::new("", farmers(1), "0xpub", "/m.json");
        assert!(matches!(
            config.validate(),
            Err(GranaryError::Configuration(_))
        ));
    }

    #[test]
    fn test_no_farmers_rejected() {
        let config = UploadConfig::new("/f", vec![], "0xpub", "/m.json");
        assert!(matches!(
            config.validate(),
            Err(GranaryError::Configuration(_))
        ));
    }

    #[test]
    fn test_empty_endpoint_rejected() {
        let mut fs = farmers(2);
        fs[1].endpoint.clear();
        let config = UploadConfig::new("/f", fs, "0xpub", "/m.json");
        assert!(matches!(
            config.validate(),
            Err(GranaryError::Configuration(_))
        ));
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let mut config = UploadConfig::new("/f", farmers(1), "0xpub", "/m.json");
        config.parallelism = 0;
        assert!(matches!(
            config.validate(),
            Err(GranaryError::Configuration(_))
        ));
    }

    #[test]
    fn test_retrieve_config_validation() {
        let config = RetrieveConfig::new("/out.bin");
        config.validate().unwrap();

        let mut bad = config.clone();
        bad.parallelism = 0;
        assert!(bad.validate().is_err());
    }
}

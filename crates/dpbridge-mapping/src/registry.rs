use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use jsonschema::Validator;
use serde_json::Value;

use crate::config::RegistryConfig;
use crate::error::{MappingError, Result};
use crate::profile::DeviceProfile;
use crate::validator::{compile_profile_schema, validate_document};

/// File suffix recognized when loading a profile directory.
pub const PROFILE_SUFFIX: &str = ".mapping.json";

/// Device-keyed set of validated mapping profiles.
pub struct ProfileRegistry {
    profiles: HashMap<String, DeviceProfile>,
    validator: Validator,
    config: RegistryConfig,
}

impl ProfileRegistry {
    /// Create an empty registry with default config.
    pub fn new() -> Result<Self> {
        Self::with_config(RegistryConfig::default())
    }

    /// Create an empty registry with explicit config.
    pub fn with_config(config: RegistryConfig) -> Result<Self> {
        Ok(Self {
            profiles: HashMap::new(),
            validator: compile_profile_schema(config.strict_mode)?,
            config,
        })
    }

    /// Add a profile built in code. Only the semantic checks apply.
    pub fn insert(&mut self, profile: DeviceProfile) -> Result<()> {
        profile.validate()?;
        if self.profiles.contains_key(&profile.device) {
            return Err(MappingError::DuplicateDevice(profile.device));
        }
        tracing::debug!(device = %profile.device, datapoints = profile.datapoints.len(), "profile registered");
        self.profiles.insert(profile.device.clone(), profile);
        Ok(())
    }

    /// Parse, schema-check, and register a profile document. Returns its device key.
    pub fn register_json(&mut self, source_name: &str, document: &str) -> Result<String> {
        let value: Value = serde_json::from_str(document)?;
        validate_document(source_name, &value, &self.validator)?;
        let profile: DeviceProfile = serde_json::from_value(value)?;
        let device = profile.device.clone();
        self.insert(profile)?;
        Ok(device)
    }

    /// Load `*.mapping.json` profiles from a directory.
    pub fn from_directory(path: &Path) -> Result<Self> {
        Self::from_directory_with_config(path, RegistryConfig::default())
    }

    /// Load profiles from a directory with explicit config.
    pub fn from_directory_with_config(path: &Path, config: RegistryConfig) -> Result<Self> {
        let mut registry = Self::with_config(config)?;
        let mut loaded = 0usize;

        let mut entries = std::fs::read_dir(path)
            .map_err(|err| MappingError::LoadFailed(format!("{}: {err}", path.display())))?
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(|err| MappingError::LoadFailed(err.to_string()))?;
        // Stable order so duplicate-device errors name the same file every run.
        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if !file_name.to_ascii_lowercase().ends_with(PROFILE_SUFFIX) {
                continue;
            }

            let entry_path = entry.path();
            let path_metadata = std::fs::symlink_metadata(&entry_path)
                .map_err(|err| MappingError::LoadFailed(err.to_string()))?;
            let file_type = path_metadata.file_type();
            if file_type.is_symlink() {
                return Err(MappingError::LoadFailed(format!(
                    "refusing to load profile symlink: {file_name}"
                )));
            }
            if !file_type.is_file() {
                continue;
            }

            loaded = loaded.saturating_add(1);
            if loaded > registry.config.max_profiles_from_directory {
                return Err(MappingError::LoadFailed(format!(
                    "profile count exceeds configured max ({}): {loaded}",
                    registry.config.max_profiles_from_directory
                )));
            }

            let file = std::fs::File::open(&entry_path).map_err(|err| {
                MappingError::LoadFailed(format!("failed opening {}: {err}", entry_path.display()))
            })?;
            let opened_metadata = file
                .metadata()
                .map_err(|err| MappingError::LoadFailed(err.to_string()))?;

            #[cfg(unix)]
            {
                if !same_file_identity(&path_metadata, &opened_metadata) {
                    return Err(MappingError::LoadFailed(format!(
                        "profile file changed during load: {file_name}"
                    )));
                }
            }

            let max_bytes = registry.config.max_profile_file_size;
            if opened_metadata.len() > max_bytes as u64 {
                return Err(MappingError::LoadFailed(format!(
                    "profile file too large ({} bytes): {file_name}",
                    opened_metadata.len()
                )));
            }

            let read_limit = u64::try_from(max_bytes.saturating_add(1)).unwrap_or(u64::MAX);
            let mut content = String::new();
            file.take(read_limit)
                .read_to_string(&mut content)
                .map_err(|err| {
                    MappingError::LoadFailed(format!("failed reading {}: {err}", entry_path.display()))
                })?;
            if content.len() > max_bytes {
                return Err(MappingError::LoadFailed(format!(
                    "profile file too large while reading: {file_name}"
                )));
            }

            registry.register_json(&file_name, &content)?;
        }

        tracing::info!(path = %path.display(), profiles = registry.len(), "profile directory loaded");
        Ok(registry)
    }

    pub fn get(&self, device: &str) -> Option<&DeviceProfile> {
        self.profiles.get(device)
    }

    /// Registered device keys, sorted.
    pub fn devices(&self) -> Vec<&str> {
        let mut devices: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        devices.sort_unstable();
        devices
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }
}

#[cfg(unix)]
fn same_file_identity(
    path_metadata: &std::fs::Metadata,
    opened_metadata: &std::fs::Metadata,
) -> bool {
    use std::os::unix::fs::MetadataExt;
    path_metadata.dev() == opened_metadata.dev() && path_metadata.ino() == opened_metadata.ino()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::profile::DpMapping;
    use crate::transform::Transform;

    const THERMOSTAT: &str = r#"{
        "device": "acme:trv01",
        "battery": { "percentage_dp": null, "voltage_dp": 35 },
        "datapoints": [
            { "dp": 2, "attribute": "target_temperature", "transform": { "kind": "scale", "divisor": 10 } },
            { "dp": 3, "attribute": "measure_temperature", "transform": { "kind": "scale", "divisor": 10 } },
            { "dp": 107 }
        ]
    }"#;

    const SENSOR: &str = r#"{ "device": "acme:th01" }"#;

    fn make_temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "dpbridge-mapping-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_file(dir: &Path, file_name: &str, contents: &str) {
        std::fs::write(dir.join(file_name), contents.as_bytes()).unwrap();
    }

    #[test]
    fn register_json_validates_and_indexes() {
        let mut registry = ProfileRegistry::new().unwrap();
        let device = registry.register_json("inline", THERMOSTAT).unwrap();
        assert_eq!(device, "acme:trv01");

        let profile = registry.get("acme:trv01").unwrap();
        assert_eq!(profile.battery.percentage_dp, None);
        assert_eq!(
            profile.mapping_for(2).map(|m| &m.transform),
            Some(&Transform::scale(10.0))
        );
        assert!(profile.mapping_for(107).unwrap().attribute.is_none());
    }

    #[test]
    fn schema_violations_are_invalid_profile() {
        let mut registry = ProfileRegistry::new().unwrap();
        let result = registry.register_json("bad", r#"{"device":"x","datapoints":[{"dp":0}]}"#);
        assert!(matches!(result, Err(MappingError::InvalidProfile { .. })));

        assert!(matches!(
            registry.register_json("bad", "not-json"),
            Err(MappingError::Json(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_device_is_rejected() {
        let mut registry = ProfileRegistry::new().unwrap();
        registry.insert(DeviceProfile::new("a")).unwrap();
        assert!(matches!(
            registry.insert(DeviceProfile::new("a").with_mapping(DpMapping::setting(4))),
            Err(MappingError::DuplicateDevice(_))
        ));
    }

    #[test]
    fn from_directory_loads_only_mapping_files() {
        let dir = make_temp_dir("load");
        write_file(&dir, "trv.mapping.json", THERMOSTAT);
        write_file(&dir, "th.mapping.json", SENSOR);
        write_file(&dir, "notes.json", "{}");

        let registry = ProfileRegistry::from_directory(&dir).unwrap();
        assert_eq!(registry.devices(), vec!["acme:th01", "acme:trv01"]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_directory_fails_to_load() {
        let result = ProfileRegistry::from_directory(Path::new("/nonexistent/dpbridge-profiles"));
        assert!(matches!(result, Err(MappingError::LoadFailed(_))));
    }

    #[test]
    fn profile_count_limit_is_enforced() {
        let dir = make_temp_dir("count");
        write_file(&dir, "a.mapping.json", r#"{"device":"a"}"#);
        write_file(&dir, "b.mapping.json", r#"{"device":"b"}"#);

        let config = RegistryConfig {
            max_profiles_from_directory: 1,
            ..RegistryConfig::default()
        };
        let result = ProfileRegistry::from_directory_with_config(&dir, config);
        assert!(matches!(result, Err(MappingError::LoadFailed(_))));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn profile_size_limit_is_enforced() {
        let dir = make_temp_dir("size");
        write_file(&dir, "trv.mapping.json", THERMOSTAT);

        let config = RegistryConfig {
            max_profile_file_size: 16,
            ..RegistryConfig::default()
        };
        let result = ProfileRegistry::from_directory_with_config(&dir, config);
        assert!(matches!(result, Err(MappingError::LoadFailed(_))));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_profile_is_rejected() {
        let dir = make_temp_dir("symlink");
        let target = dir.join("target.json");
        std::fs::write(&target, SENSOR.as_bytes()).unwrap();
        std::os::unix::fs::symlink(&target, dir.join("th.mapping.json")).unwrap();

        let result = ProfileRegistry::from_directory(&dir);
        assert!(matches!(result, Err(MappingError::LoadFailed(_))));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn strict_registry_rejects_unknown_keys() {
        let mut strict = ProfileRegistry::with_config(RegistryConfig {
            strict_mode: true,
            ..RegistryConfig::default()
        })
        .unwrap();
        let result = strict.register_json("x", r#"{"device":"x","comment":"hi"}"#);
        assert!(matches!(result, Err(MappingError::InvalidProfile { .. })));
    }
}

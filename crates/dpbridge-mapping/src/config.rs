/// Controls how profiles are loaded into a [`ProfileRegistry`](crate::ProfileRegistry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// When true, profile documents may not carry keys the schema does not name.
    pub strict_mode: bool,
    /// Maximum number of profiles loaded from a directory.
    pub max_profiles_from_directory: usize,
    /// Maximum bytes allowed per profile file.
    pub max_profile_file_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            strict_mode: false,
            max_profiles_from_directory: 1024,
            max_profile_file_size: 256 * 1024,
        }
    }
}

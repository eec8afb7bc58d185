//! Deployment configuration

/// What to do with the device session after a successful run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLifetime {
    /// Disconnect once the program is running (non-interactive callers)
    CloseAfterRun,
    /// Leave the session open for the caller
    KeepOpen,
}

/// How concatenation treats inputs with different family ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FamilyIdPolicy {
    /// Take the first non-empty input's family id, ignore the rest
    #[default]
    TakeFirst,
    /// Fail with `FamilyMismatch`
    Strict,
}

/// Deployment configuration
#[derive(Debug, Clone)]
pub struct DeployConfig {
    /// Device directory receiving the executable and run-script
    pub project_dir: String,

    /// Directory prefix of the file names embedded in the container
    pub container_dir: String,

    /// Prefix stripped from the suggested base filename
    pub strip_prefix: String,

    /// Base filename when none is suggested
    pub default_base_name: String,

    /// Whether this context can open a direct device transport
    pub live_deploy: bool,

    /// Session handling after a successful run
    pub session_lifetime: SessionLifetime,

    /// Produce the artifact when live deploy is skipped or fails
    pub save_on_fallback: bool,

    /// Family id handling when assembling the container
    pub family_policy: FamilyIdPolicy,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            project_dir: "../prjs/BrkProg_SAVE/".to_string(),
            container_dir: "Projects/".to_string(),
            strip_prefix: "lego-".to_string(),
            default_base_name: "pxt".to_string(),
            live_deploy: true,
            session_lifetime: SessionLifetime::KeepOpen,
            save_on_fallback: true,
            family_policy: FamilyIdPolicy::TakeFirst,
        }
    }
}

impl DeployConfig {
    /// Command-line mode: disconnect after run
    pub fn cli() -> Self {
        Self {
            session_lifetime: SessionLifetime::CloseAfterRun,
            ..Default::default()
        }
    }

    /// Editor mode: keep the session open after run
    pub fn interactive() -> Self {
        Self {
            session_lifetime: SessionLifetime::KeepOpen,
            ..Default::default()
        }
    }

    /// Set whether a device transport can be opened here
    pub fn with_live_deploy(mut self, live_deploy: bool) -> Self {
        self.live_deploy = live_deploy;
        self
    }

    /// Set whether fallback produces an artifact
    pub fn with_save_on_fallback(mut self, save: bool) -> Self {
        self.save_on_fallback = save;
        self
    }

    /// Set the device project directory
    pub fn with_project_dir(mut self, dir: impl Into<String>) -> Self {
        self.project_dir = dir.into();
        self
    }

    /// Set the family id policy
    pub fn with_family_policy(mut self, policy: FamilyIdPolicy) -> Self {
        self.family_policy = policy;
        self
    }

    /// Base filename with the configured prefix stripped
    pub fn base_name(&self, suggested: Option<&str>) -> String {
        let name = suggested
            .filter(|s| !s.is_empty())
            .unwrap_or(self.default_base_name.as_str());
        name.strip_prefix(self.strip_prefix.as_str())
            .unwrap_or(name)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert_eq!(DeployConfig::cli().session_lifetime, SessionLifetime::CloseAfterRun);
        assert_eq!(DeployConfig::interactive().session_lifetime, SessionLifetime::KeepOpen);
        assert!(DeployConfig::default().save_on_fallback);
    }

    #[test]
    fn test_base_name() {
        let config = DeployConfig::default();
        assert_eq!(config.base_name(Some("lego-rover")), "rover");
        assert_eq!(config.base_name(Some("rover-lego-")), "rover-lego-");
        assert_eq!(config.base_name(None), "pxt");
        assert_eq!(config.base_name(Some("")), "pxt");
    }

    #[test]
    fn test_builders() {
        let config = DeployConfig::cli()
            .with_live_deploy(false)
            .with_save_on_fallback(false)
            .with_project_dir("/media/card/")
            .with_family_policy(FamilyIdPolicy::Strict);
        assert!(!config.live_deploy);
        assert!(!config.save_on_fallback);
        assert_eq!(config.project_dir, "/media/card/");
        assert_eq!(config.family_policy, FamilyIdPolicy::Strict);
    }
}

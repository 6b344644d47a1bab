pub const DEFAULT_MAX_STEPS: usize = 10;
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Step budget used when a request does not carry its own.
    pub default_max_steps: usize,
    /// Prepended to every reconstructed history; `None` sends no system turn.
    pub system_prompt: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_max_steps: DEFAULT_MAX_STEPS,
            system_prompt: Some(DEFAULT_SYSTEM_PROMPT.to_owned()),
        }
    }
}

impl EngineConfig {
    pub fn with_default_max_steps(mut self, max_steps: usize) -> Self {
        self.default_max_steps = max_steps;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn without_system_prompt(mut self) -> Self {
        self.system_prompt = None;
        self
    }
}

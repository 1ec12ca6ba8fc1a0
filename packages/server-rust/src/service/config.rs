/// Limits applied to cloud function invocations.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Deadline for a single function call in milliseconds.
    pub function_timeout_ms: u64,
    /// Functions allowed to run at once, including ones abandoned after a
    /// timeout. Calls beyond this are rejected as overloaded.
    pub max_concurrent_functions: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            function_timeout_ms: 15_000,
            max_concurrent_functions: 1000,
        }
    }
}

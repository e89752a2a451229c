/// Get environment variable with LIMITS_ prefix, falling back to unprefixed version
///
/// Checks `LIMITS_{key}` first, then `{key}`, so deployments can either namespace
/// their variables or reuse conventional names such as `DATABASE_URL`.
///
/// ```rust
/// use limits_engine::utils::get_env_with_prefix;
///
/// // Checks LIMITS_MAX_LIMIT first, then MAX_LIMIT
/// let max_limit = get_env_with_prefix("MAX_LIMIT");
/// ```
pub fn get_env_with_prefix(key: &str) -> Option<String> {
    std::env::var(format!("LIMITS_{}", key))
        .or_else(|_| std::env::var(key))
        .ok()
}

/// Parse a prefixed environment variable, ignoring values that fail to parse.
pub fn parse_env_with_prefix<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = get_env_with_prefix(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment variable");
            None
        }
    }
}

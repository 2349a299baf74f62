//! `${VAR}` interpolation for configured command lines.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterpolateError {
    #[error("Unclosed variable reference: ${{{0}")]
    Unclosed(String),
    #[error("Environment variable '{0}' is not set")]
    Unset(String),
}

/// Interpolate `${VAR}` references in a string.
///
/// Variables are looked up in `vars` first and then in the process
/// environment.
///
/// ```
/// use std::collections::HashMap;
/// let vars = HashMap::from([("SUBMISSION".to_string(), "/tmp/as-1-2".to_string())]);
/// let cmd = testcenter::env::interpolate("make -C ${SUBMISSION}", &vars).unwrap();
/// assert_eq!(cmd, "make -C /tmp/as-1-2");
/// ```
pub fn interpolate(s: &str, vars: &HashMap<String, String>) -> Result<String, InterpolateError> {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let reference = &rest[start + 2..];
        let Some(end) = reference.find('}') else {
            return Err(InterpolateError::Unclosed(reference.to_string()));
        };
        let name = &reference[..end];
        match vars.get(name) {
            Some(value) => result.push_str(value),
            None => {
                let value = std::env::var(name)
                    .map_err(|_| InterpolateError::Unset(name.to_string()))?;
                result.push_str(&value);
            }
        }
        rest = &reference[end + 1..];
    }
    result.push_str(rest);
    Ok(result)
}

/// Interpolate every value of an environment map against the process
/// environment. Values may not reference other keys of the map.
pub fn interpolate_all(
    env: &HashMap<String, String>,
) -> Result<HashMap<String, String>, InterpolateError> {
    let none = HashMap::new();
    env.iter()
        .map(|(k, v)| Ok((k.clone(), interpolate(v, &none)?)))
        .collect()
}

use serde::Deserialize;

/// Options for [`crate::instrument_program`].
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InstrumentOptions {
    /// Copy source locations into generated operation nodes so logs carry `loc`.
    pub preserve_locations: bool,
}

impl Default for InstrumentOptions {
    fn default() -> Self {
        Self {
            preserve_locations: true,
        }
    }
}

/// Resource limits for [`crate::Interpreter`].
///
/// Limit violations surface as [`crate::ProvenanceError::StepLimit`] /
/// [`crate::ProvenanceError::CallDepth`] and cannot be caught by the executed program.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutionPolicy {
    /// Maximum number of evaluated statements and loop iterations.
    pub max_steps: u64,
    pub max_call_depth: usize,
    /// Largest array an index or `length` write may grow an array to.
    pub max_array_length: usize,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            max_steps: 1_000_000,
            max_call_depth: 128,
            max_array_length: 1 << 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let policy: ExecutionPolicy = serde_json::from_str(r#"{"maxSteps": 10}"#).unwrap();
        assert_eq!(policy.max_steps, 10);
        assert_eq!(policy.max_call_depth, ExecutionPolicy::default().max_call_depth);
        assert_eq!(policy.max_array_length, 1 << 20);

        let opts: InstrumentOptions = serde_json::from_str("{}").unwrap();
        assert!(opts.preserve_locations);
    }
}

//! Parse-time error taxonomy for operation specs.

/// A malformed operation spec. Fatal and never retried.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("effect '{effect}': syntax error at offset {offset}: {message}")]
    Syntax {
        effect: String,
        offset: usize,
        message: String,
    },

    #[error("effect '{effect}': unknown key or parameter '{key}'")]
    UnknownKey { effect: String, key: String },

    #[error("effect '{effect}': unknown function '{function}'")]
    UnknownFunction { effect: String, function: String },

    #[error("effect '{effect}': type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        effect: String,
        expected: String,
        found: String,
    },

    #[error("effect '{effect}': unbounded recursion in '{function}' ({detail})")]
    UnboundedRecursion {
        effect: String,
        function: String,
        detail: String,
    },

    #[error("effect '{effect}': declared {declared:?} but body reads {inferred:?}")]
    InconsistentFootprint {
        effect: String,
        declared: Vec<String>,
        inferred: Vec<String>,
    },

    #[error("invalid key pattern '{pattern}': {reason}")]
    InvalidKeyPattern { pattern: String, reason: String },

    #[error("duplicate effect name '{0}'")]
    DuplicateEffect(String),

    #[error("operation '{0}' declares no effects")]
    EmptyOperation(String),

    #[error("spec document could not be decoded: {0}")]
    Format(String),
}

impl ParseError {
    /// Effect the error is attributed to, when there is one.
    pub fn effect(&self) -> Option<&str> {
        match self {
            ParseError::Syntax { effect, .. }
            | ParseError::UnknownKey { effect, .. }
            | ParseError::UnknownFunction { effect, .. }
            | ParseError::TypeMismatch { effect, .. }
            | ParseError::UnboundedRecursion { effect, .. }
            | ParseError::InconsistentFootprint { effect, .. } => Some(effect),
            ParseError::DuplicateEffect(effect) => Some(effect),
            _ => None,
        }
    }

    pub(crate) fn with_effect(self, name: &str) -> ParseError {
        match self {
            ParseError::Syntax {
                offset, message, ..
            } => ParseError::Syntax {
                effect: name.to_string(),
                offset,
                message,
            },
            ParseError::UnknownKey { key, .. } => ParseError::UnknownKey {
                effect: name.to_string(),
                key,
            },
            ParseError::UnknownFunction { function, .. } => ParseError::UnknownFunction {
                effect: name.to_string(),
                function,
            },
            ParseError::TypeMismatch {
                expected, found, ..
            } => ParseError::TypeMismatch {
                effect: name.to_string(),
                expected,
                found,
            },
            ParseError::UnboundedRecursion {
                function, detail, ..
            } => ParseError::UnboundedRecursion {
                effect: name.to_string(),
                function,
                detail,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_key_names_effect_and_key() {
        let err = ParseError::UnknownKey {
            effect: "add_item".to_string(),
            key: "basket".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("add_item"));
        assert!(msg.contains("basket"));
        assert_eq!(err.effect(), Some("add_item"));
    }

    #[test]
    fn with_effect_rewrites_attribution() {
        let err = ParseError::UnboundedRecursion {
            effect: String::new(),
            function: "walk".to_string(),
            detail: "missing bound".to_string(),
        }
        .with_effect("scan");
        assert!(err.to_string().contains("effect 'scan'"));
        assert!(err.to_string().contains("walk"));
    }
}

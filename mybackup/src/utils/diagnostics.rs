//! A value paired with the non-fatal problems met while producing it.

/// Result of a best-effort step: the value it produced plus warnings that
/// must not fail the surrounding run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnosed<T> {
    pub value: T,
    pub warnings: Vec<String>,
}

impl<T> Diagnosed<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            warnings: Vec::new(),
        }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Move the warnings of `other` into `self` and hand back its value.
    pub fn absorb<U>(&mut self, other: Diagnosed<U>) -> U {
        self.warnings.extend(other.warnings);
        other.value
    }
}

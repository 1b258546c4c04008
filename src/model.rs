//! Performance-model hints exposed by iterators.
//!
//! An autotuner walks the iterator tree and asks each iterator for a
//! [`ModelNode`] describing how many input elements it consumes per output
//! element.

#[derive(Clone, Debug, PartialEq)]
pub enum ModelNode {
    /// Produces elements without consuming any input.
    Source { name: String },
    /// Consumes a fixed number of inputs per output.
    KnownRatio { name: String, ratio: f64 },
    /// Input/output ratio cannot be stated up front.
    UnknownRatio { name: String },
}

impl ModelNode {
    #[must_use]
    pub fn known_ratio(name: impl Into<String>, ratio: f64) -> Self {
        Self::KnownRatio {
            name: name.into(),
            ratio,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Source { name } | Self::KnownRatio { name, .. } | Self::UnknownRatio { name } => {
                name
            }
        }
    }

    /// Inputs consumed per output element, if known.
    #[must_use]
    pub fn ratio(&self) -> Option<f64> {
        match self {
            Self::KnownRatio { ratio, .. } => Some(*ratio),
            Self::Source { .. } => Some(0.0),
            Self::UnknownRatio { .. } => None,
        }
    }

    /// Share of `output_cost` attributable to each input element.
    #[must_use]
    pub fn cost_per_input(&self, output_cost: f64) -> Option<f64> {
        match self.ratio()? {
            r if r > 0.0 => Some(output_cost / r),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_ratio_splits_cost() {
        let node = ModelNode::known_ratio("Iterator::BatchV2", 4.0);
        assert_eq!(node.name(), "Iterator::BatchV2");
        assert_eq!(node.cost_per_input(10.0), Some(2.5));
        assert_eq!(
            ModelNode::UnknownRatio { name: "x".into() }.cost_per_input(10.0),
            None
        );
    }
}

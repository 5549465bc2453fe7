//! Labelled inference examples: `query<TAB>+pos<TAB>-neg...`.

use crate::error::{GroundError, ProResult};
use crate::logic::Query;
use crate::logic::parse::parse_query;

/// A query plus its labelled positive and negative solutions.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceExample {
    pub query: Query,
    pub pos: Vec<Query>,
    pub neg: Vec<Query>,
}

impl InferenceExample {
    pub fn new(query: Query, pos: Vec<Query>, neg: Vec<Query>) -> Self {
        Self { query, pos, neg }
    }

    /// An example without labels.
    pub fn unlabeled(query: Query) -> Self {
        Self::new(query, Vec::new(), Vec::new())
    }

    /// Parse one example line. `line` is only used in errors.
    pub fn parse_line(text: &str, line: usize) -> ProResult<Self> {
        let mut fields = text.trim_end_matches(['\r', '\n']).split('\t');
        let query_text = fields.next().unwrap_or("").trim();
        if query_text.is_empty() {
            return Err(GroundError::MalformedExample {
                line,
                reason: "missing query".into(),
            }
            .into());
        }
        let query = parse_query(query_text)?;
        let mut pos = Vec::new();
        let mut neg = Vec::new();
        for field in fields.map(str::trim).filter(|f| !f.is_empty()) {
            if let Some(rest) = field.strip_prefix('+') {
                pos.push(parse_query(rest)?);
            } else if let Some(rest) = field.strip_prefix('-') {
                neg.push(parse_query(rest)?);
            } else {
                return Err(GroundError::MalformedExample {
                    line,
                    reason: format!("label \"{field}\" must start with + or -"),
                }
                .into());
            }
        }
        Ok(Self { query, pos, neg })
    }

    /// Reject labels that still contain variables.
    pub fn validate_labels(&self) -> ProResult<()> {
        for label in self.pos.iter().chain(&self.neg) {
            if let Some(v) = label.variables().first() {
                return Err(GroundError::UnboundLabel {
                    label: label.to_string(),
                    argument: v.name().to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Number of labelled solutions.
    pub fn label_count(&self) -> usize {
        self.pos.len() + self.neg.len()
    }
}

impl std::fmt::Display for InferenceExample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.query)?;
        for p in &self.pos {
            write!(f, "\t+{p}")?;
        }
        for n in &self.neg {
            write!(f, "\t-{n}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_and_labels() {
        let ex = InferenceExample::parse_line(
            "predict(howard,Y)\t+predict(howard,bird)\t-predict(howard,mammal)",
            1,
        )
        .unwrap();
        assert_eq!(ex.query.to_string(), "predict(howard,Y)");
        assert_eq!(ex.pos.len(), 1);
        assert_eq!(ex.neg.len(), 1);
        assert_eq!(ex.label_count(), 2);
        ex.validate_labels().unwrap();
        assert_eq!(
            ex.to_string(),
            "predict(howard,Y)\t+predict(howard,bird)\t-predict(howard,mammal)"
        );
    }

    #[test]
    fn query_only_line() {
        let ex = InferenceExample::parse_line("p(a,X)\n", 3).unwrap();
        assert!(ex.pos.is_empty() && ex.neg.is_empty());
    }

    #[test]
    fn unbound_label_is_rejected() {
        let ex = InferenceExample::parse_line("p(a,X)\t+p(a,Y)", 1).unwrap();
        assert!(ex.validate_labels().is_err());
    }

    #[test]
    fn unsigned_label_is_malformed() {
        assert!(InferenceExample::parse_line("p(a,X)\tp(a,b)", 1).is_err());
        assert!(InferenceExample::parse_line("\t+p(a,b)", 1).is_err());
    }
}

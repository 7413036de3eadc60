//! `{{#node.var#}}` placeholders
//!
//! The same pattern drives [`VariablePool::convert_template`](super::VariablePool::convert_template)
//! and the streaming templates of response nodes.
//!
//! ```text
//! "Hello {{#start.name#}}!"  ─►  [Text("Hello "), Variable(["start","name"]), Text("!")]
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// First segment up to 50 word characters, then 1 to 9 more dotted segments of up to 30
const VARIABLE_PATTERN: &str = r"\{\{#([a-zA-Z0-9_]{1,50}(?:\.[a-zA-Z0-9_]{1,30}){1,9})#\}\}";

pub(crate) fn variable_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(VARIABLE_PATTERN).ok()).as_ref()
}

/// One piece of a parsed template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TemplateSegment {
    Text { text: String },
    Variable { selector: Vec<String> },
}

/// Parsed template of literal text and variable references
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub segments: Vec<TemplateSegment>,
}

/// Split `text` into literal and placeholder parts; empty literals are dropped
pub(crate) fn split_placeholders(text: &str) -> Vec<TemplateSegment> {
    let Some(pattern) = variable_pattern() else {
        return vec![TemplateSegment::Text {
            text: text.to_string(),
        }];
    };

    let mut segments = Vec::new();
    let mut cursor = 0;
    for captures in pattern.captures_iter(text) {
        let (Some(whole), Some(path)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        if whole.start() > cursor {
            segments.push(TemplateSegment::Text {
                text: text[cursor..whole.start()].to_string(),
            });
        }
        segments.push(TemplateSegment::Variable {
            selector: path.as_str().split('.').map(str::to_string).collect(),
        });
        cursor = whole.end();
    }
    if cursor < text.len() {
        segments.push(TemplateSegment::Text {
            text: text[cursor..].to_string(),
        });
    }
    segments
}

impl Template {
    pub fn parse(text: &str) -> Self {
        Self {
            segments: split_placeholders(text),
        }
    }

    /// A template made only of variable references
    pub fn from_selectors(selectors: impl IntoIterator<Item = Vec<String>>) -> Self {
        Self {
            segments: selectors
                .into_iter()
                .map(|selector| TemplateSegment::Variable { selector })
                .collect(),
        }
    }

    /// Distinct `(scope_id, name)` prefixes referenced by the template
    pub fn variable_selectors(&self) -> Vec<Vec<String>> {
        let mut seen: Vec<Vec<String>> = Vec::new();
        for segment in &self.segments {
            if let TemplateSegment::Variable { selector } = segment {
                let prefix: Vec<String> = selector.iter().take(2).cloned().collect();
                if !seen.contains(&prefix) {
                    seen.push(prefix);
                }
            }
        }
        seen
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(path: &str) -> TemplateSegment {
        TemplateSegment::Variable {
            selector: path.split('.').map(str::to_string).collect(),
        }
    }

    fn text(s: &str) -> TemplateSegment {
        TemplateSegment::Text { text: s.to_string() }
    }

    #[test]
    fn test_parse_mixed() {
        let template = Template::parse("Hello {{#start.name#}}, you are {{#llm.out.age#}}!");
        assert_eq!(
            template.segments,
            vec![text("Hello "), var("start.name"), text(", you are "), var("llm.out.age"), text("!")]
        );
    }

    #[test]
    fn test_adjacent_placeholders_have_no_empty_text() {
        let template = Template::parse("{{#a.b#}}{{#c.d#}}");
        assert_eq!(template.segments, vec![var("a.b"), var("c.d")]);
    }

    #[test]
    fn test_segment_length_limits() {
        let long_first = format!("{{{{#{}.x#}}}}", "n".repeat(51));
        assert_eq!(Template::parse(&long_first).segments, vec![text(&long_first)]);

        let ok_first = format!("{{{{#{}.x#}}}}", "n".repeat(50));
        assert!(matches!(Template::parse(&ok_first).segments[0], TemplateSegment::Variable { .. }));

        let long_attr = format!("{{{{#a.{}#}}}}", "x".repeat(31));
        assert_eq!(Template::parse(&long_attr).segments, vec![text(&long_attr)]);
    }

    #[test]
    fn test_at_most_ten_segments() {
        let ten = "{{#a.b.c.d.e.f.g.h.i.j#}}";
        assert!(matches!(Template::parse(ten).segments[0], TemplateSegment::Variable { .. }));

        let eleven = "{{#a.b.c.d.e.f.g.h.i.j.k#}}";
        assert_eq!(Template::parse(eleven).segments, vec![text(eleven)]);
    }

    #[test]
    fn test_single_segment_is_literal() {
        assert_eq!(Template::parse("{{#a#}}").segments, vec![text("{{#a#}}")]);
    }

    #[test]
    fn test_variable_selectors_deduplicated() {
        let template = Template::parse("{{#a.b#}} {{#a.b.c#}} {{#x.y#}}");
        assert_eq!(
            template.variable_selectors(),
            vec![vec!["a".to_string(), "b".to_string()], vec!["x".to_string(), "y".to_string()]]
        );
    }
}

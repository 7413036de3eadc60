//! System variables seeded into the `sys` scope

use super::file::File;
use super::segment::Segment;
use serde::{Deserialize, Serialize};

/// Run-level values every node can read under `sys.*`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemVariables {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_run_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialogue_count: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<File>,
}

impl SystemVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_workflow_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.workflow_run_id = Some(run_id.into());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_files(mut self, files: Vec<File>) -> Self {
        self.files = files;
        self
    }

    /// `(name, value)` pairs for every field that is set
    ///
    /// `files` is always present so that templates can rely on `sys.files`.
    pub fn to_pairs(&self) -> Vec<(&'static str, Segment)> {
        let mut pairs = Vec::new();
        let strings = [
            ("user_id", &self.user_id),
            ("app_id", &self.app_id),
            ("workflow_id", &self.workflow_id),
            ("workflow_run_id", &self.workflow_run_id),
            ("query", &self.query),
            ("conversation_id", &self.conversation_id),
        ];
        for (name, value) in strings {
            if let Some(value) = value {
                pairs.push((name, Segment::String(value.clone())));
            }
        }
        if let Some(count) = self.dialogue_count {
            pairs.push(("dialogue_count", Segment::Integer(count)));
        }
        let files = if self.files.is_empty() {
            Segment::Array(Vec::new())
        } else {
            Segment::ArrayFile(self.files.clone())
        };
        pairs.push(("files", files));
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_set_fields_are_emitted() {
        let sys = SystemVariables::new().with_user_id("u1").with_query("hi");
        let names: Vec<&str> = sys.to_pairs().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["user_id", "query", "files"]);
    }
}

//! File values
//!
//! Files travel through the pool as [`Segment::File`](super::Segment::File) or
//! [`Segment::ArrayFile`](super::Segment::ArrayFile). In plain JSON they are objects carrying
//! `"model_identity": "__file__"`, which is how untyped node outputs are recognised as files
//! again when they are stored.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Marker stored in the `model_identity` field of serialized files
pub const FILE_MODEL_IDENTITY: &str = "__file__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Image,
    Document,
    Audio,
    Video,
    Custom,
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileType::Image => "image",
            FileType::Document => "document",
            FileType::Audio => "audio",
            FileType::Video => "video",
            FileType::Custom => "custom",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileTransferMethod {
    RemoteUrl,
    LocalFile,
    ToolFile,
}

impl fmt::Display for FileTransferMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileTransferMethod::RemoteUrl => "remote_url",
            FileTransferMethod::LocalFile => "local_file",
            FileTransferMethod::ToolFile => "tool_file",
        };
        f.write_str(name)
    }
}

/// The closed set of attributes a selector may address inside a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileAttribute {
    Type,
    Size,
    Name,
    MimeType,
    TransferMethod,
    Url,
    Extension,
    RelatedId,
}

impl FileAttribute {
    /// Parse an attribute name; unknown names yield `None`
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "type" => Some(Self::Type),
            "size" => Some(Self::Size),
            "name" => Some(Self::Name),
            "mime_type" => Some(Self::MimeType),
            "transfer_method" => Some(Self::TransferMethod),
            "url" => Some(Self::Url),
            "extension" => Some(Self::Extension),
            "related_id" => Some(Self::RelatedId),
            _ => None,
        }
    }
}

fn file_model_identity() -> String {
    FILE_MODEL_IDENTITY.to_string()
}

/// A file reference
///
/// Only metadata is held here; content lives in external storage addressed by
/// `related_id` or `remote_url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct File {
    #[serde(default = "file_model_identity")]
    pub model_identity: String,

    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub tenant_id: String,

    #[serde(rename = "type")]
    pub file_type: FileType,

    pub transfer_method: FileTransferMethod,

    #[serde(default)]
    pub remote_url: Option<String>,

    #[serde(default)]
    pub related_id: Option<String>,

    #[serde(default)]
    pub filename: Option<String>,

    #[serde(default)]
    pub extension: Option<String>,

    #[serde(default)]
    pub mime_type: Option<String>,

    #[serde(default)]
    pub size: i64,
}

impl File {
    /// A file fetched from a remote URL
    pub fn remote(file_type: FileType, url: impl Into<String>) -> Self {
        Self {
            model_identity: file_model_identity(),
            id: None,
            tenant_id: String::new(),
            file_type,
            transfer_method: FileTransferMethod::RemoteUrl,
            remote_url: Some(url.into()),
            related_id: None,
            filename: None,
            extension: None,
            mime_type: None,
            size: -1,
        }
    }

    /// A file held in local storage under `related_id`
    pub fn local(file_type: FileType, related_id: impl Into<String>) -> Self {
        Self {
            transfer_method: FileTransferMethod::LocalFile,
            remote_url: None,
            related_id: Some(related_id.into()),
            ..Self::remote(file_type, "")
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        let filename = filename.into();
        if self.extension.is_none() {
            self.extension = filename
                .rsplit_once('.')
                .map(|(_, ext)| format!(".{}", ext.to_lowercase()));
        }
        self.filename = Some(filename);
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_size(mut self, size: i64) -> Self {
        self.size = size;
        self
    }

    /// Whether a JSON value is a serialized file
    pub fn is_file_value(value: &Value) -> bool {
        value.as_object().map(Self::is_file_value_map).unwrap_or(false)
    }

    pub fn is_file_value_map(map: &serde_json::Map<String, Value>) -> bool {
        map.get("model_identity").and_then(Value::as_str) == Some(FILE_MODEL_IDENTITY)
    }

    /// Recover a file from its JSON form
    pub fn from_value(value: &Value) -> Option<Self> {
        if !Self::is_file_value(value) {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// URL a client can use to fetch the file, if one is known
    pub fn url(&self) -> Option<&str> {
        match self.transfer_method {
            FileTransferMethod::RemoteUrl => self.remote_url.as_deref(),
            FileTransferMethod::LocalFile | FileTransferMethod::ToolFile => None,
        }
    }

    /// Value of one addressable attribute
    pub fn attribute(&self, attr: FileAttribute) -> Value {
        let opt = |v: &Option<String>| v.clone().map(Value::String).unwrap_or(Value::Null);
        match attr {
            FileAttribute::Type => Value::String(self.file_type.to_string()),
            FileAttribute::Size => Value::from(self.size),
            FileAttribute::Name => opt(&self.filename),
            FileAttribute::MimeType => opt(&self.mime_type),
            FileAttribute::TransferMethod => Value::String(self.transfer_method.to_string()),
            FileAttribute::Url => self
                .url()
                .map(|u| Value::String(u.to_string()))
                .unwrap_or(Value::Null),
            FileAttribute::Extension => opt(&self.extension),
            FileAttribute::RelatedId => opt(&self.related_id),
        }
    }

    /// Markdown link (or image) for display in answers
    pub fn markdown(&self) -> String {
        let name = self.filename.as_deref().unwrap_or("file");
        let url = self.url().unwrap_or_default();
        match self.file_type {
            FileType::Image => format!("![{}]({})", name, url),
            _ => format!("[{}]({})", name, url),
        }
    }
}

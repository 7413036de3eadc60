//! Variable addressing
//!
//! - [`Segment`] - typed value wrapper
//! - [`Variable`] - a segment with an identity
//! - [`Selector`] - `(scope_id, name[, attr...])` address
//! - [`VariablePool`] - scoped store nodes read from and write to
//! - [`Template`] - parsed `{{#node.var#}}` text used by response nodes

pub mod file;
pub mod pool;
pub mod segment;
pub mod selector;
pub mod system;
pub mod template;

pub use file::{File, FileAttribute, FileTransferMethod, FileType, FILE_MODEL_IDENTITY};
pub use pool::{RagPipelineVariableInput, VariablePool, VariablePoolBuilder};
pub use segment::{Segment, SegmentGroup, SegmentType, Variable};
pub use selector::{
    Selector, CONVERSATION_VARIABLE_NODE_ID, ENVIRONMENT_VARIABLE_NODE_ID,
    RAG_PIPELINE_VARIABLE_NODE_ID, SELECTORS_LENGTH, SYSTEM_VARIABLE_NODE_ID,
};
pub use system::SystemVariables;
pub use template::{Template, TemplateSegment};

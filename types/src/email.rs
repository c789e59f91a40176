//! Argument types of the email tools.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A file attached to an outgoing email.
///
/// Attachments without a filename or content are skipped when the message
/// is built, so both fields are optional on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttachmentArg {
    #[serde(default)]
    pub filename: Option<String>,
    /// Base64 encoded file content.
    #[serde(default)]
    pub content: Option<String>,
}

/// Arguments of the `send_email` tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "validation", derive(garde::Validate))]
pub struct SendEmailArgs {
    #[cfg_attr(feature = "validation", garde(length(min = 1)))]
    pub to: String,
    #[cfg_attr(feature = "validation", garde(skip))]
    pub subject: String,
    #[cfg_attr(feature = "validation", garde(skip))]
    pub body: String,
    #[serde(default)]
    #[cfg_attr(feature = "validation", garde(skip))]
    pub from_addr: Option<String>,
    #[serde(default)]
    #[cfg_attr(feature = "validation", garde(inner(length(min = 1))))]
    pub cc: Vec<String>,
    #[serde(default)]
    #[cfg_attr(feature = "validation", garde(inner(length(min = 1))))]
    pub bcc: Vec<String>,
    #[serde(default)]
    #[cfg_attr(feature = "validation", garde(skip))]
    pub html: bool,
    #[serde(default)]
    #[cfg_attr(feature = "validation", garde(skip))]
    pub attachments: Vec<AttachmentArg>,
}

impl SendEmailArgs {
    /// A plain message with no optional fields set.
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
            from_addr: None,
            cc: Vec::new(),
            bcc: Vec::new(),
            html: false,
            attachments: Vec::new(),
        }
    }
}

/// Arguments of the `send_bulk_email` tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "validation", derive(garde::Validate))]
pub struct SendBulkEmailArgs {
    #[cfg_attr(feature = "validation", garde(inner(length(min = 1))))]
    pub recipients: Vec<String>,
    #[cfg_attr(feature = "validation", garde(skip))]
    pub subject: String,
    #[cfg_attr(feature = "validation", garde(skip))]
    pub body: String,
    #[serde(default)]
    #[cfg_attr(feature = "validation", garde(skip))]
    pub from_addr: Option<String>,
    #[serde(default)]
    #[cfg_attr(feature = "validation", garde(skip))]
    pub html: bool,
}

/// Arguments of the `send_template_email` tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "validation", derive(garde::Validate))]
pub struct SendTemplateEmailArgs {
    #[cfg_attr(feature = "validation", garde(length(min = 1)))]
    pub to: String,
    #[cfg_attr(feature = "validation", garde(skip))]
    pub subject: String,
    /// Body template with `{variable}` placeholders.
    #[cfg_attr(feature = "validation", garde(skip))]
    pub template: String,
    #[cfg_attr(feature = "validation", garde(skip))]
    pub variables: Map<String, Value>,
    #[serde(default)]
    #[cfg_attr(feature = "validation", garde(skip))]
    pub from_addr: Option<String>,
    #[serde(default)]
    #[cfg_attr(feature = "validation", garde(skip))]
    pub html: bool,
}

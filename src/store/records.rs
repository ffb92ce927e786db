//! Row types and the enums stored as TEXT columns

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::StoreError;

/// Generates `as_str`, `Display` and `FromStr` for enums persisted as text.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = StoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(StoreError::Decode(format!(
                        "invalid {} value: {other:?}",
                        stringify!($name)
                    ))),
                }
            }
        }
    };
}

/// Loading lifecycle of a model row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadingStatus {
    Requested,
    Loading,
    Succeeded,
    Failed,
}

text_enum!(LoadingStatus {
    Requested => "REQUESTED",
    Loading => "LOADING",
    Succeeded => "SUCCEEDED",
    Failed => "FAILED",
});

impl LoadingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelFormat {
    Gguf,
    HuggingFace,
    NvidiaTriton,
    Ollama,
}

text_enum!(ModelFormat {
    Gguf => "GGUF",
    HuggingFace => "HUGGING_FACE",
    NvidiaTriton => "NVIDIA_TRITON",
    Ollama => "OLLAMA",
});

/// Where a model's bytes are fetched from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceRepository {
    ObjectStore,
    HuggingFace,
    Ollama,
}

text_enum!(SourceRepository {
    ObjectStore => "OBJECT_STORE",
    HuggingFace => "HUGGING_FACE",
    Ollama => "OLLAMA",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivationStatus {
    Active,
    Inactive,
}

text_enum!(ActivationStatus {
    Active => "ACTIVE",
    Inactive => "INACTIVE",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdapterType {
    #[default]
    Unspecified,
    Lora,
    Qlora,
}

text_enum!(AdapterType {
    Unspecified => "UNSPECIFIED",
    Lora => "LORA",
    Qlora => "QLORA",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuantizationType {
    #[default]
    Unspecified,
    Awq,
    Gguf,
}

text_enum!(QuantizationType {
    Unspecified => "UNSPECIFIED",
    Awq => "AWQ",
    Gguf => "GGUF",
});

/// Identity of a model row. An empty `project_id` means tenant-global scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelKey {
    pub model_id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub project_id: String,
}

impl ModelKey {
    pub fn new(
        model_id: impl Into<String>,
        tenant_id: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            tenant_id: tenant_id.into(),
            project_id: project_id.into(),
        }
    }

    /// Key of the tenant-global row
    pub fn global(model_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self::new(model_id, tenant_id, "")
    }

    pub fn is_global(&self) -> bool {
        self.project_id.is_empty()
    }
}

impl std::fmt::Display for ModelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_global() {
            write!(f, "{}@{}", self.model_id, self.tenant_id)
        } else {
            write!(f, "{}@{}/{}", self.model_id, self.tenant_id, self.project_id)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseModel {
    /// Insertion order; claims pick the lowest first
    pub id: i64,
    pub model_id: String,
    pub tenant_id: String,
    pub project_id: String,
    pub path: String,
    pub formats: Vec<ModelFormat>,
    pub gguf_model_path: String,
    pub source_repository: SourceRepository,
    pub loading_status: LoadingStatus,
    pub loading_failure_reason: String,
    pub loading_status_message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BaseModel {
    pub fn key(&self) -> ModelKey {
        ModelKey::new(&self.model_id, &self.tenant_id, &self.project_id)
    }

    /// Base models are implicitly published once their load succeeded
    pub fn is_loaded(&self) -> bool {
        self.loading_status == LoadingStatus::Succeeded
    }
}

/// A fine-tuned (derived) model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: i64,
    pub model_id: String,
    pub tenant_id: String,
    pub organization_id: String,
    pub project_id: String,
    pub path: String,
    pub is_published: bool,
    pub base_model_id: String,
    pub adapter: AdapterType,
    pub quantization: QuantizationType,
    pub source_repository: SourceRepository,
    pub model_file_location: String,
    pub loading_status: LoadingStatus,
    pub loading_failure_reason: String,
    pub loading_status_message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn is_loaded(&self) -> bool {
        self.loading_status == LoadingStatus::Succeeded
    }
}

/// Records that a whole Hugging Face repository was downloaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HfModelRepo {
    pub name: String,
    pub model_id: String,
    pub tenant_id: String,
    pub project_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub tenant_id: String,
    pub path_prefix: String,
}

pub(crate) fn encode_formats(formats: &[ModelFormat]) -> Result<String, StoreError> {
    Ok(serde_json::to_string(formats)?)
}

pub(crate) fn decode_formats(raw: &str) -> Result<Vec<ModelFormat>, StoreError> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(raw)?)
}

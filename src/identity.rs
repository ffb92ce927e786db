//! Model identity: canonical IDs, object-key segments and scope resolution
//!
//! External identifiers are Hugging Face repo paths (`org/name`, optionally
//! `org/name/file`), Ollama tags (`name:tag`) or object-store prefixes. The
//! canonical model ID replaces `/` with `-`. The mapping is lossy, and two
//! external IDs that normalize to the same canonical ID are not detected.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::store::{ActivationStatus, BaseModel, SourceRepository};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("invalid model ID {0:?}: expected <org>/<repo> or <org>/<repo>/<file>")]
    TooManySegments(String),

    #[error("model ID must not be empty")]
    Empty,
}

/// Canonical model ID for an external identifier
pub fn to_model_id(external: &str) -> String {
    external.replace('/', "-")
}

/// Path segment used when building object-store keys for a model.
///
/// Path separators are kept. Ollama tags additionally lose their `:` since
/// it is not portable in object keys.
pub fn object_key_segment(external: &str, source: SourceRepository) -> String {
    match source {
        SourceRepository::Ollama => external.replace(':', "-"),
        _ => external.to_string(),
    }
}

/// A Hugging Face download target: a whole repository or one file in it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HfTarget {
    pub repo: String,
    pub file: Option<String>,
}

impl HfTarget {
    /// The identifier the produced model is named after
    pub fn model_name(&self) -> String {
        match &self.file {
            Some(file) => format!("{}/{}", self.repo, file),
            None => self.repo.clone(),
        }
    }
}

/// Split `org/repo[/file]` into repository and optional file.
pub fn split_hf_repo_and_file(id: &str) -> Result<HfTarget, IdentityError> {
    if id.is_empty() {
        return Err(IdentityError::Empty);
    }

    let segments: Vec<&str> = id.split('/').collect();
    match segments.as_slice() {
        [_] | [_, _] => Ok(HfTarget {
            repo: id.to_string(),
            file: None,
        }),
        [org, repo, file] => Ok(HfTarget {
            repo: format!("{org}/{repo}"),
            file: Some((*file).to_string()),
        }),
        _ => Err(IdentityError::TooManySegments(id.to_string())),
    }
}

/// External ID for one file of a repository that fans out into several models
pub fn split_model_id(requested: &str, gguf_file: &Path) -> String {
    let stem = gguf_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{requested}/{stem}")
}

/// A loaded row with the activation status of its scope
#[derive(Debug, Clone, PartialEq)]
pub struct ListedModel {
    pub model: BaseModel,
    pub activation: ActivationStatus,
}

impl AsRef<BaseModel> for BaseModel {
    fn as_ref(&self) -> &BaseModel {
        self
    }
}

impl AsRef<BaseModel> for ListedModel {
    fn as_ref(&self) -> &BaseModel {
        &self.model
    }
}

fn model_of<T: AsRef<BaseModel>>(candidate: &T) -> &BaseModel {
    candidate.as_ref()
}

/// Pick the single loaded copy of a model visible from `project_id`.
///
/// `candidates` are the scoped copies of one canonical ID in creation order.
/// A requesting project sees its own copy first, then the tenant-global one.
/// Without a project the global copy wins, falling back to the earliest
/// loaded project copy.
pub fn resolve_loaded<'a, T: AsRef<BaseModel>>(
    candidates: &'a [T],
    project_id: Option<&str>,
) -> Option<&'a T> {
    let loaded = || candidates.iter().filter(|c| model_of(*c).is_loaded());
    let global = || loaded().find(|c| model_of(*c).project_id.is_empty());

    match project_id.filter(|p| !p.is_empty()) {
        Some(project) => loaded()
            .find(|c| model_of(*c).project_id == project)
            .or_else(global),
        None => global().or_else(|| loaded().next()),
    }
}

/// The copy `project_id` sees, kept only when its own activation status
/// matches. A shadowed copy never stands in for the one that shadows it.
pub fn resolve_listed<'a>(
    group: &'a [ListedModel],
    project_id: Option<&str>,
    activation: Option<ActivationStatus>,
) -> Option<&'a ListedModel> {
    resolve_loaded(group, project_id).filter(|r| activation.is_none_or(|a| r.activation == a))
}

/// One page of a listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: bool,
}

/// Collapse rows ordered by model ID into one resolved row per ID, keeping
/// at most `limit`. `has_more` is set when more IDs than `limit` survived.
pub fn assemble_page(
    rows: Vec<ListedModel>,
    project_id: Option<&str>,
    activation: Option<ActivationStatus>,
    limit: usize,
) -> Page<BaseModel> {
    let mut items: Vec<BaseModel> = Vec::new();

    for group in rows.chunk_by(|a, b| a.model.model_id == b.model.model_id) {
        if let Some(resolved) = resolve_listed(group, project_id, activation) {
            items.push(resolved.model.clone());
        }
    }

    let has_more = items.len() > limit;
    items.truncate(limit);
    Page { items, has_more }
}

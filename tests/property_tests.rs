//! Property-based tests using proptest
//!
//! Identity normalization, object key construction, page assembly and tree
//! classification checked over randomized inputs.

use chrono::Utc;
use model_manager::{
    identity::{ListedModel, assemble_page, split_hf_repo_and_file, to_model_id},
    loader::{
        classifier::{Layout, classify},
        uploader::object_key,
    },
    store::{ActivationStatus, BaseModel, LoadingStatus, ModelFormat, SourceRepository},
};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::path::PathBuf;

// =============================================================================
// Strategies
// =============================================================================

/// One path segment of a Hugging Face repo ID
fn arb_segment() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9][a-zA-Z0-9._-]{0,20}"
}

/// A relative file path inside a downloaded tree
fn arb_relative_path() -> impl Strategy<Value = PathBuf> {
    prop::collection::vec("[a-z0-9_]{1,8}", 1..4)
        .prop_map(|parts| parts.iter().collect::<PathBuf>())
}

/// Rows as the catalog query returns them: ordered by model ID, with
/// global and project copies of the same ID adjacent.
fn arb_rows() -> impl Strategy<Value = Vec<BaseModel>> {
    prop::collection::btree_map(
        "m[0-9]{2}",
        prop::collection::vec((prop::option::of("p[0-2]"), any::<bool>()), 1..4),
        0..12,
    )
    .prop_map(|ids| {
        let mut rows = Vec::new();
        for (model_id, copies) in ids {
            for (project, loaded) in copies {
                rows.push(BaseModel {
                    id: rows.len() as i64,
                    model_id: model_id.clone(),
                    tenant_id: "tenant0".to_string(),
                    project_id: project.unwrap_or_default(),
                    path: format!("models/{model_id}"),
                    formats: vec![ModelFormat::HuggingFace],
                    gguf_model_path: String::new(),
                    source_repository: SourceRepository::HuggingFace,
                    loading_status: if loaded {
                        LoadingStatus::Succeeded
                    } else {
                        LoadingStatus::Failed
                    },
                    loading_failure_reason: String::new(),
                    loading_status_message: String::new(),
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                });
            }
        }
        rows
    })
}

// =============================================================================
// Identity
// =============================================================================

proptest! {
    #[test]
    fn model_id_has_no_separators(external in "[a-zA-Z0-9/:._-]{0,60}") {
        let id = to_model_id(&external);
        prop_assert!(!id.contains('/'));
        prop_assert_eq!(id.len(), external.len());
        prop_assert_eq!(to_model_id(&id), id.clone());
    }

    #[test]
    fn hf_split_keeps_the_name(
        segments in prop::collection::vec(arb_segment(), 1..4),
    ) {
        let id = segments.join("/");
        let target = split_hf_repo_and_file(&id).unwrap();
        prop_assert_eq!(target.model_name(), id);
        prop_assert_eq!(target.file.is_some(), segments.len() == 3);
        prop_assert!(!target.repo.is_empty());
    }

    #[test]
    fn hf_split_rejects_deep_paths(
        segments in prop::collection::vec(arb_segment(), 4..8),
    ) {
        prop_assert!(split_hf_repo_and_file(&segments.join("/")).is_err());
    }

    #[test]
    fn object_key_joins_with_single_slashes(
        prefix in "[a-z]{1,8}(/[a-z0-9-]{1,8}){0,3}/?",
        relative in arb_relative_path(),
    ) {
        let key = object_key(&prefix, &relative);
        prop_assert!(key.starts_with(prefix.trim_end_matches('/')));
        prop_assert!(!key.contains("//"));
        prop_assert!(!key.ends_with('/'));
        let relative_str = relative.to_string_lossy().replace('\\', "/");
        prop_assert!(key.ends_with(&relative_str));
    }
}

// =============================================================================
// Paging
// =============================================================================

proptest! {
    #[test]
    fn page_has_one_entry_per_loaded_id(
        rows in arb_rows(),
        project in prop::option::of("p[0-2]"),
        limit in 1usize..6,
    ) {
        let visible: BTreeSet<String> = rows
            .iter()
            .filter(|r| r.loading_status == LoadingStatus::Succeeded)
            .filter(|r| match &project {
                Some(p) => r.project_id.is_empty() || &r.project_id == p,
                None => true,
            })
            .map(|r| r.model_id.clone())
            .collect();
        let scoped: Vec<ListedModel> = rows
            .into_iter()
            .filter(|r| match &project {
                Some(p) => r.project_id.is_empty() || &r.project_id == p,
                None => true,
            })
            .map(|model| ListedModel { model, activation: ActivationStatus::Inactive })
            .collect();

        let page = assemble_page(scoped, project.as_deref(), None, limit);

        prop_assert!(page.items.len() <= limit);
        prop_assert_eq!(page.has_more, visible.len() > limit);
        let ids: Vec<&str> = page.items.iter().map(|m| m.model_id.as_str()).collect();
        let expected: Vec<&str> = visible.iter().take(limit).map(String::as_str).collect();
        prop_assert_eq!(ids, expected);
        for item in &page.items {
            prop_assert!(item.is_loaded());
        }
    }
}

// =============================================================================
// Classification
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn gguf_count_decides_the_layout(
        names in prop::collection::btree_set("[a-z]{1,6}", 1..5),
        extras in prop::collection::btree_set("[a-z]{1,6}\\.txt", 0..3),
    ) {
        let dir = tempfile::tempdir().unwrap();
        for name in &names {
            std::fs::write(dir.path().join(format!("{name}.gguf")), b"x").unwrap();
        }
        for extra in &extras {
            std::fs::write(dir.path().join(extra), b"x").unwrap();
        }

        let classification = classify(dir.path()).unwrap();
        prop_assert_eq!(classification.files.len(), names.len() + extras.len());
        match classification.layout {
            Layout::Single { formats, gguf } => {
                prop_assert_eq!(names.len(), 1);
                prop_assert_eq!(formats, vec![ModelFormat::Gguf]);
                prop_assert!(gguf.is_some());
            }
            Layout::Split { ggufs } => {
                prop_assert_eq!(ggufs.len(), names.len());
                prop_assert_eq!(classification.files.len() - ggufs.len(), extras.len());
            }
            Layout::Ollama => prop_assert!(false, "no blobs directory was written"),
        }
    }
}

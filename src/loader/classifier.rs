//! Format and arity inference over a downloaded tree

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use walkdir::WalkDir;

use crate::identity;
use crate::store::ModelFormat;

const GGUF_EXTENSION: &str = "gguf";
const HF_CONFIG_FILES: [&str; 2] = ["config.json", "adapter_config.json"];
const TRITON_CONFIG_SUFFIX: &str = "tensorrt_llm/config.pbtxt";
const OLLAMA_BLOBS_DIR: &str = "blobs";

/// Regular files of a downloaded tree, relative to its root and sorted
pub fn list_files(root: &Path) -> Result<Vec<PathBuf>> {
    Ok(walk(root)?.files)
}

struct Tree {
    files: Vec<PathBuf>,
    has_blobs_dir: bool,
}

fn walk(root: &Path) -> Result<Tree> {
    let mut tree = Tree {
        files: Vec::new(),
        has_blobs_dir: false,
    };
    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        let file_type = entry.file_type();
        if file_type.is_file() {
            tree.files.push(entry.path().strip_prefix(root)?.to_path_buf());
        } else if file_type.is_dir() && entry.file_name() == OLLAMA_BLOBS_DIR {
            tree.has_blobs_dir = true;
        }
    }
    Ok(tree)
}

/// What a downloaded tree holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    /// An Ollama model store; the whole tree is one model
    Ollama,
    /// One model. `gguf` is the single GGUF file, if any.
    Single {
        formats: Vec<ModelFormat>,
        gguf: Option<PathBuf>,
    },
    /// One GGUF-only model per file
    Split { ggufs: Vec<PathBuf> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub files: Vec<PathBuf>,
    pub layout: Layout,
}

/// A model row to create from a classified tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// External name; the stored ID is its normalized form
    pub name: String,
    pub formats: Vec<ModelFormat>,
    /// GGUF file relative to the tree root
    pub gguf: Option<PathBuf>,
}

impl Classification {
    /// Models to create when `name` was requested
    pub fn candidates(&self, name: &str) -> Vec<Candidate> {
        match &self.layout {
            Layout::Ollama => vec![Candidate {
                name: name.to_string(),
                formats: vec![ModelFormat::Ollama],
                gguf: None,
            }],
            Layout::Single { formats, gguf } => vec![Candidate {
                name: name.to_string(),
                formats: formats.clone(),
                gguf: gguf.clone(),
            }],
            Layout::Split { ggufs } => ggufs
                .iter()
                .map(|gguf| Candidate {
                    name: identity::split_model_id(name, gguf),
                    formats: vec![ModelFormat::Gguf],
                    gguf: Some(gguf.clone()),
                })
                .collect(),
        }
    }
}

/// Walk `root` once and work out the formats and number of models in it.
pub fn classify(root: &Path) -> Result<Classification> {
    let Tree {
        files,
        has_blobs_dir,
    } = walk(root)?;
    if files.is_empty() {
        bail!("no files downloaded");
    }

    if has_blobs_dir {
        return Ok(Classification {
            files,
            layout: Layout::Ollama,
        });
    }

    let ggufs: Vec<PathBuf> = files
        .iter()
        .filter(|f| f.extension().is_some_and(|e| e == GGUF_EXTENSION))
        .cloned()
        .collect();

    let mut formats = Vec::new();
    if files.iter().any(|f| {
        f.file_name()
            .is_some_and(|n| HF_CONFIG_FILES.iter().any(|c| n == *c))
    }) {
        formats.push(ModelFormat::HuggingFace);
    }
    if files.iter().any(|f| f.ends_with(TRITON_CONFIG_SUFFIX)) {
        formats.push(ModelFormat::NvidiaTriton);
    }

    let layout = match ggufs.len() {
        0 if formats.is_empty() => bail!("no model format found"),
        0 => Layout::Single {
            formats,
            gguf: None,
        },
        1 => {
            formats.push(ModelFormat::Gguf);
            formats.sort();
            Layout::Single {
                formats,
                gguf: ggufs.into_iter().next(),
            }
        }
        n => {
            if !formats.is_empty() {
                bail!(
                    "found {n} GGUF files alongside other model formats {:?}",
                    formats.iter().map(|f| f.as_str()).collect::<Vec<_>>()
                );
            }
            Layout::Split { ggufs }
        }
    };

    Ok(Classification { files, layout })
}

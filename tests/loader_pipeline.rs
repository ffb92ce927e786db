//! End-to-end loader runs against the real service over an in-memory store.
//!
//! Sources are faked: a scripted downloader writes fixed trees, and object
//! store sources are served from a seeded in-memory bucket.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use model_manager::{
    Loader, LoaderSettings, LoadingResult, ModelClient, Status, StatusResult, Store,
    WorkerService,
    config::ModelConfig,
    loader::downloader::{Downloaders, ModelDownloader, ObjectStoreDownloader},
    object_store::MemoryObjectStore,
    queue::{AcquiredBaseModel, AcquiredModel},
    service::{CreateBaseModel, ModelPath, RegisterModel, RegisteredModel},
    store::{
        BaseModel, HfModelRepo, LoadingStatus, ModelFormat, ModelKey, SourceRepository,
        StorageConfig,
    },
};
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

const TENANT: &str = "default-tenant-id";

/// Writes a fixed tree per repository name and records every call
#[derive(Default)]
struct ScriptedDownloader {
    trees: HashMap<String, Vec<&'static str>>,
    calls: Mutex<Vec<(String, Option<String>)>>,
}

impl ScriptedDownloader {
    fn with(mut self, name: &str, files: &[&'static str]) -> Self {
        self.trees.insert(name.to_string(), files.to_vec());
        self
    }

    fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelDownloader for ScriptedDownloader {
    async fn download(&self, name: &str, file: Option<&str>, dest: &Path) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), file.map(str::to_string)));

        let tree = self
            .trees
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("repository {name} not found"))?;
        for relative in tree {
            if file.is_some_and(|f| f != *relative) {
                continue;
            }
            let path = dest.join(relative);
            tokio::fs::create_dir_all(path.parent().unwrap()).await?;
            tokio::fs::write(&path, relative.as_bytes()).await?;
        }
        Ok(())
    }
}

/// Never finishes; signals once the download has started
struct StuckDownloader {
    started: Arc<Notify>,
}

#[async_trait]
impl ModelDownloader for StuckDownloader {
    async fn download(&self, _name: &str, _file: Option<&str>, dest: &Path) -> Result<()> {
        tokio::fs::write(dest.join("partial.bin"), b"x").await?;
        self.started.notify_one();
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Delegates to the real service but fails the n-th `create_base_model`
struct FailingCreate {
    inner: Arc<WorkerService>,
    fail_on: usize,
    creates: AtomicUsize,
}

#[async_trait]
impl ModelClient for FailingCreate {
    async fn acquire_unloaded_base_model(
        &self,
        tenant_id: &str,
    ) -> StatusResult<Option<AcquiredBaseModel>> {
        self.inner.acquire_unloaded_base_model(tenant_id).await
    }

    async fn acquire_unloaded_model(&self, tenant_id: &str) -> StatusResult<Option<AcquiredModel>> {
        self.inner.acquire_unloaded_model(tenant_id).await
    }

    async fn update_base_model_loading_status(
        &self,
        tenant_id: &str,
        model_id: &str,
        project_id: &str,
        result: LoadingResult,
    ) -> StatusResult<()> {
        self.inner
            .update_base_model_loading_status(tenant_id, model_id, project_id, result)
            .await
    }

    async fn update_model_loading_status(
        &self,
        tenant_id: &str,
        model_id: &str,
        result: LoadingResult,
    ) -> StatusResult<()> {
        self.inner
            .update_model_loading_status(tenant_id, model_id, result)
            .await
    }

    async fn create_base_model(
        &self,
        tenant_id: &str,
        req: CreateBaseModel,
    ) -> StatusResult<BaseModel> {
        if self.creates.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
            return Err(Status::internal("object store unavailable"));
        }
        self.inner.create_base_model(tenant_id, req).await
    }

    async fn create_hf_model_repo(
        &self,
        tenant_id: &str,
        name: &str,
        project_id: &str,
    ) -> StatusResult<HfModelRepo> {
        self.inner
            .create_hf_model_repo(tenant_id, name, project_id)
            .await
    }

    async fn get_hf_model_repo(
        &self,
        tenant_id: &str,
        name: &str,
        project_id: &str,
    ) -> StatusResult<HfModelRepo> {
        self.inner.get_hf_model_repo(tenant_id, name, project_id).await
    }

    async fn get_base_model_path(
        &self,
        tenant_id: &str,
        model_id: &str,
        project_id: Option<&str>,
    ) -> StatusResult<ModelPath> {
        self.inner
            .get_base_model_path(tenant_id, model_id, project_id)
            .await
    }

    async fn get_model_path(&self, tenant_id: &str, model_id: &str) -> StatusResult<ModelPath> {
        self.inner.get_model_path(tenant_id, model_id).await
    }

    async fn request_base_model(
        &self,
        tenant_id: &str,
        model_id: &str,
        source_repository: SourceRepository,
        project_id: &str,
    ) -> StatusResult<BaseModel> {
        self.inner
            .request_base_model(tenant_id, model_id, source_repository, project_id)
            .await
    }

    async fn register_model(
        &self,
        tenant_id: &str,
        req: RegisterModel,
    ) -> StatusResult<RegisteredModel> {
        self.inner.register_model(tenant_id, req).await
    }

    async fn get_storage_config(&self, tenant_id: &str) -> StatusResult<StorageConfig> {
        self.inner.get_storage_config(tenant_id).await
    }

    async fn create_storage_config(
        &self,
        tenant_id: &str,
        path_prefix: &str,
    ) -> StatusResult<StorageConfig> {
        self.inner
            .create_storage_config(tenant_id, path_prefix)
            .await
    }
}

struct Harness {
    service: Arc<WorkerService>,
    bucket: Arc<MemoryObjectStore>,
    work_dir: TempDir,
}

impl Harness {
    async fn new() -> Self {
        Self {
            service: Arc::new(WorkerService::new(Store::in_memory().await.unwrap())),
            bucket: Arc::new(MemoryObjectStore::new()),
            work_dir: TempDir::new().unwrap(),
        }
    }

    fn settings(&self) -> LoaderSettings {
        LoaderSettings {
            tenant_id: TENANT.to_string(),
            path_prefix: "models".to_string(),
            base_model_path_prefix: "base-models".to_string(),
            work_dir: self.work_dir.path().to_path_buf(),
            poll_interval: Duration::from_secs(3600),
            status_interval: Duration::from_secs(3600),
            run_once: true,
            base_models: Vec::new(),
            base_model_source: SourceRepository::HuggingFace,
            models: Vec::new(),
        }
    }

    fn loader(&self, downloaders: Downloaders, settings: LoaderSettings) -> Loader {
        Loader::new(
            self.service.clone(),
            self.bucket.clone(),
            downloaders,
            settings,
        )
    }

    fn hf_loader(&self, downloader: Arc<ScriptedDownloader>) -> Loader {
        let mut downloaders = Downloaders::new();
        downloaders.insert(SourceRepository::HuggingFace, downloader);
        self.loader(downloaders, self.settings())
    }

    async fn request(&self, id: &str, source: SourceRepository) {
        self.service
            .request_base_model(TENANT, id, source, "")
            .await
            .unwrap();
    }

    async fn base_model_ids(&self) -> Vec<String> {
        self.service
            .store()
            .list_base_models(TENANT)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.model_id)
            .collect()
    }

    fn work_dir_is_empty(&self) -> bool {
        std::fs::read_dir(self.work_dir.path()).unwrap().next().is_none()
    }
}

async fn drain(loader: &Loader) {
    loader.drain(&CancellationToken::new()).await.unwrap();
}

#[tokio::test]
async fn test_single_gguf_repository() {
    let h = Harness::new().await;
    let hf = Arc::new(ScriptedDownloader::default().with(
        "google/gemma-2b",
        &["file0", "dir0/file1.gguf", "dir1/file2", "dir0/dir2/file3"],
    ));
    h.request("google/gemma-2b", SourceRepository::HuggingFace).await;

    drain(&h.hf_loader(hf.clone())).await;

    // The requested row is superseded by the normalized one.
    assert_eq!(h.base_model_ids().await, vec!["google-gemma-2b"]);
    let path = h
        .service
        .get_base_model_path(TENANT, "google-gemma-2b", None)
        .await
        .unwrap();
    assert_eq!(path.path, "models/base-models/google/gemma-2b");
    assert_eq!(path.formats, vec![ModelFormat::Gguf]);
    assert_eq!(
        path.gguf_model_path,
        "models/base-models/google/gemma-2b/dir0/file1.gguf"
    );

    assert_eq!(
        h.bucket.keys(),
        vec![
            "models/base-models/google/gemma-2b/dir0/dir2/file3",
            "models/base-models/google/gemma-2b/dir0/file1.gguf",
            "models/base-models/google/gemma-2b/dir1/file2",
            "models/base-models/google/gemma-2b/file0",
        ]
    );
    assert!(
        h.service
            .get_hf_model_repo(TENANT, "google/gemma-2b", "")
            .await
            .is_ok()
    );
    assert!(h.work_dir_is_empty());
}

#[tokio::test]
async fn test_hugging_face_config_repository() {
    let h = Harness::new().await;
    let hf = Arc::new(ScriptedDownloader::default().with(
        "meta-llama/Llama-3.2-1B",
        &["config.json", "model.safetensors", "tokenizer.json"],
    ));
    h.request("meta-llama/Llama-3.2-1B", SourceRepository::HuggingFace)
        .await;

    drain(&h.hf_loader(hf)).await;

    let path = h
        .service
        .get_base_model_path(TENANT, "meta-llama-Llama-3.2-1B", None)
        .await
        .unwrap();
    assert_eq!(path.path, "models/base-models/meta-llama/Llama-3.2-1B");
    assert_eq!(path.formats, vec![ModelFormat::HuggingFace]);
    assert_eq!(path.gguf_model_path, "");
}

#[tokio::test]
async fn test_object_store_triton_repository() {
    let h = Harness::new().await;
    let source = Arc::new(MemoryObjectStore::new());
    source.insert("imports/llama3/repo/llama3/tensorrt_llm/config.pbtxt", "cfg");
    source.insert("imports/llama3/repo/llama3/tensorrt_llm/1/rank0.engine", "engine");

    let mut downloaders = Downloaders::new();
    downloaders.insert(
        SourceRepository::ObjectStore,
        Arc::new(ObjectStoreDownloader::new(source, "imports")),
    );
    h.request("llama3", SourceRepository::ObjectStore).await;

    drain(&h.loader(downloaders, h.settings())).await;

    // Completed in place since the ID needs no normalization.
    let row = h
        .service
        .store()
        .get_base_model(&ModelKey::global("llama3", TENANT))
        .await
        .unwrap();
    assert_eq!(row.loading_status, LoadingStatus::Succeeded);
    assert_eq!(row.formats, vec![ModelFormat::NvidiaTriton]);
    assert_eq!(row.path, "models/base-models/llama3");
    assert!(
        h.bucket
            .get("models/base-models/llama3/repo/llama3/tensorrt_llm/config.pbtxt")
            .is_some()
    );
}

#[tokio::test]
async fn test_split_repository_fans_out_once() {
    let h = Harness::new().await;
    let hf = Arc::new(ScriptedDownloader::default().with(
        "lmstudio-community/phi-4-GGUF",
        &["README.md", "phi-4-Q3_K_L.gguf", "phi-4-Q3_K_M.gguf"],
    ));
    let loader = h.hf_loader(hf.clone());

    h.request("lmstudio-community/phi-4-GGUF", SourceRepository::HuggingFace)
        .await;
    drain(&loader).await;

    assert_eq!(
        h.base_model_ids().await,
        vec![
            "lmstudio-community-phi-4-GGUF-phi-4-Q3_K_L",
            "lmstudio-community-phi-4-GGUF-phi-4-Q3_K_M",
        ]
    );
    let path = h
        .service
        .get_base_model_path(TENANT, "lmstudio-community-phi-4-GGUF-phi-4-Q3_K_L", None)
        .await
        .unwrap();
    assert_eq!(
        path.path,
        "models/base-models/lmstudio-community/phi-4-GGUF/phi-4-Q3_K_L"
    );
    assert_eq!(
        path.gguf_model_path,
        "models/base-models/lmstudio-community/phi-4-GGUF/phi-4-Q3_K_L.gguf"
    );
    assert!(
        h.service
            .get_base_model_path(TENANT, "lmstudio-community-phi-4-GGUF", None)
            .await
            .is_err()
    );

    // The repo record short-circuits a second request for the same repo.
    h.request("lmstudio-community/phi-4-GGUF", SourceRepository::HuggingFace)
        .await;
    drain(&loader).await;

    assert_eq!(hf.calls().len(), 1);
    assert_eq!(h.base_model_ids().await.len(), 2);
}

#[tokio::test]
async fn test_split_repository_failure_keeps_created_rows() {
    let h = Harness::new().await;
    let hf = Arc::new(ScriptedDownloader::default().with(
        "lmstudio-community/phi-4-GGUF",
        &["README.md", "phi-4-Q3_K_L.gguf", "phi-4-Q3_K_M.gguf"],
    ));
    let mut downloaders = Downloaders::new();
    downloaders.insert(SourceRepository::HuggingFace, hf);
    let client = Arc::new(FailingCreate {
        inner: h.service.clone(),
        fail_on: 2,
        creates: AtomicUsize::new(0),
    });
    let loader = Loader::new(client, h.bucket.clone(), downloaders, h.settings());

    h.request("lmstudio-community/phi-4-GGUF", SourceRepository::HuggingFace)
        .await;
    drain(&loader).await;

    let store = h.service.store();
    let first = store
        .get_base_model(&ModelKey::global(
            "lmstudio-community-phi-4-GGUF-phi-4-Q3_K_L",
            TENANT,
        ))
        .await
        .unwrap();
    assert_eq!(first.loading_status, LoadingStatus::Succeeded);
    assert!(
        store
            .get_base_model(&ModelKey::global(
                "lmstudio-community-phi-4-GGUF-phi-4-Q3_K_M",
                TENANT,
            ))
            .await
            .is_err()
    );

    let requested = store
        .get_base_model(&ModelKey::global("lmstudio-community/phi-4-GGUF", TENANT))
        .await
        .unwrap();
    assert_eq!(requested.loading_status, LoadingStatus::Failed);
    assert!(
        requested
            .loading_failure_reason
            .contains("object store unavailable"),
        "{}",
        requested.loading_failure_reason
    );
    assert!(
        h.service
            .get_hf_model_repo(TENANT, "lmstudio-community/phi-4-GGUF", "")
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_global_request_ignores_project_copy() {
    let h = Harness::new().await;
    h.service
        .create_base_model(
            TENANT,
            CreateBaseModel {
                id: "google-gemma-2b".to_string(),
                path: "models/base-models/p0/google/gemma-2b".to_string(),
                formats: vec![ModelFormat::HuggingFace],
                gguf_model_path: String::new(),
                source_repository: SourceRepository::HuggingFace,
                project_id: "p0".to_string(),
            },
        )
        .await
        .unwrap();
    let hf = Arc::new(
        ScriptedDownloader::default().with("google/gemma-2b", &["config.json", "model.safetensors"]),
    );
    h.request("google/gemma-2b", SourceRepository::HuggingFace).await;

    drain(&h.hf_loader(hf.clone())).await;

    assert_eq!(hf.calls().len(), 1);
    let store = h.service.store();
    let global = store
        .get_base_model(&ModelKey::global("google-gemma-2b", TENANT))
        .await
        .unwrap();
    assert_eq!(global.loading_status, LoadingStatus::Succeeded);
    assert_eq!(global.path, "models/base-models/google/gemma-2b");
    assert!(
        store
            .get_base_model(&ModelKey::global("google/gemma-2b", TENANT))
            .await
            .is_err()
    );

    // Unscoped lookups now see the global copy; p0 keeps its own.
    let path = h
        .service
        .get_base_model_path(TENANT, "google-gemma-2b", None)
        .await
        .unwrap();
    assert_eq!(path.path, "models/base-models/google/gemma-2b");
    let path = h
        .service
        .get_base_model_path(TENANT, "google-gemma-2b", Some("p0"))
        .await
        .unwrap();
    assert_eq!(path.path, "models/base-models/p0/google/gemma-2b");
}

#[tokio::test]
async fn test_selected_file_loaded_once() {
    let h = Harness::new().await;
    let hf = Arc::new(ScriptedDownloader::default().with(
        "lmstudio-community/phi-4-GGUF",
        &["phi-4-Q3_K_L.gguf", "phi-4-Q3_K_M.gguf"],
    ));
    let loader = h.hf_loader(hf.clone());
    let requested = "lmstudio-community/phi-4-GGUF/phi-4-Q3_K_M.gguf";

    h.request(requested, SourceRepository::HuggingFace).await;
    drain(&loader).await;

    assert_eq!(
        hf.calls(),
        vec![(
            "lmstudio-community/phi-4-GGUF".to_string(),
            Some("phi-4-Q3_K_M.gguf".to_string())
        )]
    );
    let path = h
        .service
        .get_base_model_path(TENANT, "lmstudio-community-phi-4-GGUF-phi-4-Q3_K_M.gguf", None)
        .await
        .unwrap();
    assert_eq!(path.path, "models/base-models/lmstudio-community/phi-4-GGUF");
    assert_eq!(
        path.gguf_model_path,
        "models/base-models/lmstudio-community/phi-4-GGUF/phi-4-Q3_K_M.gguf"
    );
    // A single-file request does not mark the whole repo as downloaded.
    assert!(
        h.service
            .get_hf_model_repo(TENANT, "lmstudio-community/phi-4-GGUF", "")
            .await
            .is_err()
    );

    h.request(requested, SourceRepository::HuggingFace).await;
    drain(&loader).await;

    assert_eq!(hf.calls().len(), 1);
    assert_eq!(
        h.base_model_ids().await,
        vec!["lmstudio-community-phi-4-GGUF-phi-4-Q3_K_M.gguf"]
    );
}

#[tokio::test]
async fn test_unrecognized_tree_fails_the_load() {
    let h = Harness::new().await;
    let hf = Arc::new(ScriptedDownloader::default().with("org/notes", &["README.md", "LICENSE"]));
    h.request("org/notes", SourceRepository::HuggingFace).await;

    drain(&h.hf_loader(hf)).await;

    let row = h
        .service
        .store()
        .get_base_model(&ModelKey::global("org/notes", TENANT))
        .await
        .unwrap();
    assert_eq!(row.loading_status, LoadingStatus::Failed);
    assert!(
        row.loading_failure_reason.contains("no model format found"),
        "{}",
        row.loading_failure_reason
    );
    assert!(h.bucket.keys().is_empty());
}

#[tokio::test]
async fn test_missing_downloader_fails_the_load() {
    let h = Harness::new().await;
    h.request("llama3:8b", SourceRepository::Ollama).await;

    drain(&h.loader(Downloaders::new(), h.settings())).await;

    let row = h
        .service
        .store()
        .get_base_model(&ModelKey::global("llama3:8b", TENANT))
        .await
        .unwrap();
    assert_eq!(row.loading_status, LoadingStatus::Failed);
    assert!(row.loading_failure_reason.contains("no downloader configured"));
}

#[tokio::test]
async fn test_ollama_tree() {
    let h = Harness::new().await;
    let ollama = Arc::new(ScriptedDownloader::default().with(
        "llama3:8b",
        &[
            "blobs/sha256-0a1b",
            "manifests/registry.ollama.ai/library/llama3/8b",
        ],
    ));
    let mut downloaders = Downloaders::new();
    downloaders.insert(SourceRepository::Ollama, ollama);
    h.request("llama3:8b", SourceRepository::Ollama).await;

    drain(&h.loader(downloaders, h.settings())).await;

    let row = h
        .service
        .store()
        .get_base_model(&ModelKey::global("llama3:8b", TENANT))
        .await
        .unwrap();
    assert_eq!(row.loading_status, LoadingStatus::Succeeded);
    assert_eq!(row.formats, vec![ModelFormat::Ollama]);
    assert_eq!(row.path, "models/base-models/llama3-8b");
    assert!(
        h.bucket
            .get("models/base-models/llama3-8b/blobs/sha256-0a1b")
            .is_some()
    );
}

#[tokio::test]
async fn test_configured_fine_tuned_model() {
    let h = Harness::new().await;
    let hf = Arc::new(
        ScriptedDownloader::default()
            .with("google/gemma-2b", &["config.json", "model.safetensors"])
            .with(
                "abc/lora1",
                &["adapter_config.json", "adapter_model.safetensors"],
            ),
    );
    let mut downloaders = Downloaders::new();
    downloaders.insert(SourceRepository::HuggingFace, hf);
    let settings = LoaderSettings {
        models: vec![ModelConfig {
            model: "abc/lora1".to_string(),
            base_model: "google/gemma-2b".to_string(),
            adapter_type: "lora".to_string(),
            quantization_type: String::new(),
        }],
        ..h.settings()
    };

    h.loader(downloaders, settings)
        .run(CancellationToken::new())
        .await
        .unwrap();

    let config = h.service.get_storage_config(TENANT).await.unwrap();
    assert_eq!(config.path_prefix, "models");

    assert!(
        h.service
            .get_base_model_path(TENANT, "google-gemma-2b", None)
            .await
            .is_ok()
    );

    let model = h
        .service
        .store()
        .get_model("abc-lora1", TENANT)
        .await
        .unwrap();
    assert_eq!(model.loading_status, LoadingStatus::Succeeded);
    assert!(model.is_published);
    assert_eq!(model.base_model_id, "google-gemma-2b");

    let path = h.service.get_model_path(TENANT, "abc-lora1").await.unwrap();
    assert_eq!(path.path, "models/default-tenant-id/abc/lora1");
    assert!(
        h.bucket
            .get("models/default-tenant-id/abc/lora1/adapter_model.safetensors")
            .is_some()
    );
}

#[tokio::test]
async fn test_cancelled_load_stays_loading() {
    let h = Harness::new().await;
    let started = Arc::new(Notify::new());
    let mut downloaders = Downloaders::new();
    downloaders.insert(
        SourceRepository::HuggingFace,
        Arc::new(StuckDownloader {
            started: started.clone(),
        }) as Arc<dyn ModelDownloader>,
    );
    h.request("google/gemma-2b", SourceRepository::HuggingFace).await;

    let loader = Arc::new(h.loader(downloaders, h.settings()));
    let token = CancellationToken::new();
    let task = tokio::spawn({
        let loader = loader.clone();
        let token = token.clone();
        async move { loader.drain(&token).await }
    });

    started.notified().await;
    token.cancel();
    task.await.unwrap().unwrap();

    let row = h
        .service
        .store()
        .get_base_model(&ModelKey::global("google/gemma-2b", TENANT))
        .await
        .unwrap();
    assert_eq!(row.loading_status, LoadingStatus::Loading);
    assert_eq!(row.loading_failure_reason, "");
    assert!(h.work_dir_is_empty());
}

//! Source downloaders
//!
//! Each downloader fills a caller-supplied empty directory and returns once
//! the tree is complete. Subprocesses are spawned with `kill_on_drop`, so
//! dropping a download future stops them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use hf_hub::api::tokio::ApiBuilder;
use tokio::process::{Child, Command};

use crate::config::{DownloaderConfig, HuggingFaceConfig, OllamaConfig};
use crate::object_store::{LocalObjectStore, ObjectStore};
use crate::store::SourceRepository;

#[async_trait]
pub trait ModelDownloader: Send + Sync {
    /// Fetch `name` into `dest`. `file` narrows the download to one file of
    /// the repository where the source supports it.
    async fn download(&self, name: &str, file: Option<&str>, dest: &Path) -> Result<()>;
}

/// Downloaders keyed by the source they serve
pub type Downloaders = HashMap<SourceRepository, Arc<dyn ModelDownloader>>;

/// Build a downloader for every source with a config section
pub fn from_config(config: &DownloaderConfig) -> Downloaders {
    let mut downloaders: Downloaders = HashMap::new();
    if let Some(hf) = &config.hugging_face {
        downloaders.insert(
            SourceRepository::HuggingFace,
            Arc::new(HuggingFaceDownloader::new(hf.clone())),
        );
    }
    if let Some(source) = &config.object_store {
        downloaders.insert(
            SourceRepository::ObjectStore,
            Arc::new(ObjectStoreDownloader::new(
                Arc::new(LocalObjectStore::new(&source.root)),
                source.path_prefix.clone(),
            )),
        );
    }
    if let Some(ollama) = &config.ollama {
        downloaders.insert(
            SourceRepository::Ollama,
            Arc::new(OllamaDownloader::new(ollama.clone())),
        );
    }
    downloaders
}

async fn run_checked(mut cmd: Command, what: &str) -> Result<()> {
    let output = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("failed to run {what}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::debug!(command = %what, stderr = %stderr.trim(), "Command failed");
        bail!("{what} failed ({}): {}", output.status, stderr.trim());
    }
    Ok(())
}

// ============================================================================
// Object store
// ============================================================================

/// Copies every object under `{path_prefix}/{name}/`
pub struct ObjectStoreDownloader {
    store: Arc<dyn ObjectStore>,
    path_prefix: String,
}

impl ObjectStoreDownloader {
    pub fn new(store: Arc<dyn ObjectStore>, path_prefix: impl Into<String>) -> Self {
        Self {
            store,
            path_prefix: path_prefix.into(),
        }
    }

    fn prefix_for(&self, name: &str) -> String {
        let name = name.trim_matches('/');
        if self.path_prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.path_prefix.trim_end_matches('/'), name)
        }
    }
}

#[async_trait]
impl ModelDownloader for ObjectStoreDownloader {
    async fn download(&self, name: &str, _file: Option<&str>, dest: &Path) -> Result<()> {
        let prefix = format!("{}/", self.prefix_for(name));
        let keys = self.store.list(&prefix).await?;
        if keys.is_empty() {
            bail!("no objects found under {prefix}");
        }

        for key in &keys {
            let relative = key.strip_prefix(&prefix).unwrap_or(key);
            self.store.get_to_file(key, &dest.join(relative)).await?;
        }
        tracing::info!(prefix = %prefix, objects = keys.len(), "Downloaded objects");
        Ok(())
    }
}

// ============================================================================
// Hugging Face
// ============================================================================

pub struct HuggingFaceDownloader {
    config: HuggingFaceConfig,
}

impl HuggingFaceDownloader {
    pub fn new(config: HuggingFaceConfig) -> Self {
        Self { config }
    }

    /// Arguments passed to the CLI for one download
    pub fn cli_args(&self, repo: &str, file: Option<&str>, dest: &Path) -> Vec<String> {
        let mut args = vec!["download".to_string(), repo.to_string()];
        if let Some(file) = file {
            args.push(file.to_string());
        }
        args.extend([
            format!("--local-dir={}", dest.display()),
            format!("--cache-dir={}", self.config.cache_dir.display()),
            "--local-dir-use-symlinks=True".to_string(),
            "--quiet".to_string(),
        ]);
        args
    }

    async fn download_with_cli(&self, repo: &str, file: Option<&str>, dest: &Path) -> Result<()> {
        let args = self.cli_args(repo, file, dest);
        tracing::info!(cli = %self.config.cli_path, args = ?args, "Downloading from Hugging Face");

        // Gated repositories need HUGGING_FACE_HUB_TOKEN in the environment.
        let mut cmd = Command::new(&self.config.cli_path);
        cmd.args(&args);
        run_checked(cmd, "huggingface-cli download").await
    }

    async fn download_with_hub_api(&self, repo: &str, file: Option<&str>, dest: &Path) -> Result<()> {
        let api = ApiBuilder::new()
            .with_cache_dir(self.config.cache_dir.clone())
            .with_token(std::env::var("HF_TOKEN").ok())
            .with_progress(false)
            .build()
            .context("Failed to create HF API client")?;
        let api_repo = api.model(repo.to_string());

        let files: Vec<String> = match file {
            Some(file) => vec![file.to_string()],
            None => api_repo
                .info()
                .await
                .with_context(|| format!("failed to list files of {repo}"))?
                .siblings
                .into_iter()
                .map(|s| s.rfilename)
                .collect(),
        };

        for file in &files {
            tracing::debug!(repo = %repo, file = %file, "Downloading file");
            let cached = api_repo
                .get(file)
                .await
                .with_context(|| format!("failed to download {file} from {repo}"))?;
            let target = dest.join(file);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(&cached, &target)
                .await
                .with_context(|| format!("failed to copy {}", cached.display()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl ModelDownloader for HuggingFaceDownloader {
    async fn download(&self, name: &str, file: Option<&str>, dest: &Path) -> Result<()> {
        if self.config.use_hub_api {
            self.download_with_hub_api(name, file, dest).await
        } else {
            self.download_with_cli(name, file, dest).await
        }
    }
}

// ============================================================================
// Ollama
// ============================================================================

const OLLAMA_READY_POLL: Duration = Duration::from_secs(1);
const OLLAMA_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs a private `ollama serve` whose model store is the destination
/// directory, then pulls into it
pub struct OllamaDownloader {
    config: OllamaConfig,
}

impl OllamaDownloader {
    pub fn new(config: OllamaConfig) -> Self {
        Self { config }
    }

    fn command(&self, dest: &Path) -> Command {
        let mut cmd = Command::new(&self.config.binary_path);
        cmd.env("OLLAMA_HOST", format!("0.0.0.0:{}", self.config.port))
            .env("OLLAMA_MODELS", dest);
        cmd
    }

    async fn run(&self, dest: &Path, args: &[&str]) -> Result<()> {
        let mut cmd = self.command(dest);
        cmd.args(args);
        run_checked(cmd, &format!("ollama {}", args.join(" "))).await
    }

    async fn poll_until_ready(&self, dest: &Path, server: &mut Child) -> Result<()> {
        let mut ticker = tokio::time::interval(OLLAMA_READY_POLL);
        loop {
            ticker.tick().await;
            if let Some(status) = server.try_wait()? {
                bail!("ollama serve exited early ({status})");
            }
            if self.run(dest, &["list"]).await.is_ok() {
                return Ok(());
            }
        }
    }

    async fn wait_for_ready(&self, dest: &Path, server: &mut Child) -> Result<()> {
        let timeout = Duration::from_secs(self.config.ready_timeout_secs);
        tokio::time::timeout(timeout, self.poll_until_ready(dest, server))
            .await
            .map_err(|_| anyhow::anyhow!("timeout waiting for Ollama to be ready"))?
    }
}

async fn stop_server(mut server: Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        if let Some(pid) = server.id() {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            if tokio::time::timeout(OLLAMA_STOP_TIMEOUT, server.wait())
                .await
                .is_ok()
            {
                return;
            }
            tracing::warn!("Ollama server did not stop in time, killing it");
        }
    }

    let _ = server.kill().await;
}

#[async_trait]
impl ModelDownloader for OllamaDownloader {
    async fn download(&self, name: &str, _file: Option<&str>, dest: &Path) -> Result<()> {
        let mut server = self
            .command(dest)
            .arg("serve")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {} serve", self.config.binary_path))?;
        tracing::info!(port = self.config.port, pid = ?server.id(), "Started Ollama server");

        let result = async {
            self.wait_for_ready(dest, &mut server).await?;
            tracing::info!(model = %name, "Pulling Ollama model");
            self.run(dest, &["pull", name]).await
        }
        .await;

        stop_server(server).await;
        result
    }
}

// ============================================================================
// No-op
// ============================================================================

/// Downloads nothing; loads then fail with "no files downloaded"
#[derive(Debug, Default)]
pub struct NoopDownloader;

#[async_trait]
impl ModelDownloader for NoopDownloader {
    async fn download(&self, name: &str, _file: Option<&str>, _dest: &Path) -> Result<()> {
        tracing::debug!(model = %name, "Skipping download");
        Ok(())
    }
}

/// Canonical form of the work dir; temp dirs under it must not sit behind a
/// symlink or relative links written by the Hugging Face CLI break.
pub fn resolve_work_dir(work_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(work_dir)
        .with_context(|| format!("failed to create work dir {}", work_dir.display()))?;
    work_dir
        .canonicalize()
        .with_context(|| format!("failed to resolve work dir {}", work_dir.display()))
}

//! Top-level operations behind the menu: add, show, uninstall, enable BBR.

use std::sync::Arc;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bbr::{BbrTuner, TuningPaths, TuningReport};
use crate::config::Config;
use crate::error::AppError;
use crate::guard;
use crate::identity;
use crate::node::{self, Node};
use crate::openrc::OpenRc;
use crate::paths::Paths;
use crate::release;
use crate::system::{CommandRunner, fs as sysfs};

/// A share URI plus whether the host part is a real address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareLink {
    pub uri: String,
    /// `false` when the public IP lookup failed and the placeholder was used.
    pub host_resolved: bool,
}

pub struct App {
    pub paths: Paths,
    config: Config,
    runner: Arc<dyn CommandRunner>,
    http: Client,
    cancel: CancellationToken,
    tuning: TuningPaths,
    ip_endpoints: Vec<String>,
}

impl App {
    pub fn new(
        config: Config,
        paths: Paths,
        runner: Arc<dyn CommandRunner>,
        cancel: CancellationToken,
    ) -> Result<Self, AppError> {
        let http = release::build_client(&config.http)?;
        Ok(Self {
            paths,
            config,
            runner,
            http,
            cancel,
            tuning: TuningPaths::default(),
            ip_endpoints: release::PUBLIC_IP_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Redirect kernel reads and BBR persistence (tests, chroots).
    pub fn with_tuning_paths(mut self, tuning: TuningPaths) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn with_ip_endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.ip_endpoints = endpoints;
        self
    }

    pub fn has_config(&self) -> bool {
        self.paths.config_path.is_file()
    }

    /// Config and binary present, and the service script is ours.
    pub fn is_installed(&self) -> bool {
        self.has_config()
            && self.paths.binary_path.is_file()
            && guard::is_claimed(&self.paths.service_file)
    }

    fn openrc(&self) -> OpenRc<'_> {
        OpenRc::new(self.runner.as_ref(), &self.cancel)
    }

    /// Fresh install, or a full overwrite of an existing one.
    pub async fn add(&self) -> Result<ShareLink, AppError> {
        let arch = release::detect_arch(std::env::consts::ARCH)?;
        sysfs::create_private_dir(&self.paths.root_dir)?;

        let version = release::latest_version(
            &self.http,
            &self.cancel,
            &self.config.release,
            self.config.github_token.as_deref(),
        )
        .await?;
        release::install(
            &self.http,
            self.runner.as_ref(),
            &self.cancel,
            &self.config.release,
            &version,
            arch,
            &self.paths.binary_path,
        )
        .await?;

        let node = Node::generate(&self.config.node, &self.config.ports)?;
        self.deploy(&node).await?;

        info!(version, port = node.port, "node deployed");
        self.share(&node).await
    }

    /// Write config, validate it, and (re)install the service around it.
    async fn deploy(&self, node: &Node) -> Result<(), AppError> {
        node::write_config(&self.paths.config_path, &self.paths.log_path, node)?;
        release::check_config(
            self.runner.as_ref(),
            &self.cancel,
            &self.paths.binary_path,
            &self.paths.config_path,
        )
        .await?;

        let rc = self.openrc();
        rc.migrate_legacy(&self.paths.legacy_service_name, &self.paths.legacy_service_file)
            .await?;
        let svc = self.paths.service();
        rc.install(&svc)?;
        rc.enable_and_start(&svc.name).await?;
        Ok(())
    }

    /// Share URI for the deployed node.
    pub async fn show(&self) -> Result<ShareLink, AppError> {
        let node = node::read_config(&self.paths.config_path, &self.config.node)?;
        self.share(&node).await
    }

    async fn share(&self, node: &Node) -> Result<ShareLink, AppError> {
        let endpoints: Vec<&str> = self.ip_endpoints.iter().map(String::as_str).collect();
        let ip = match release::public_ip(&self.http, &self.cancel, &endpoints).await {
            Ok(ip) => ip,
            Err(AppError::Cancelled) => return Err(AppError::Cancelled),
            Err(e) => {
                warn!(error = %e, "public IP lookup failed; using placeholder host");
                String::new()
            }
        };

        let public_key = identity::derive_public_key(&node.private_key)?;
        let uri = node::share_uri(node, &ip, &public_key)?;
        Ok(ShareLink { uri, host_resolved: !ip.is_empty() })
    }

    /// Stop and remove the service, then delete the data root.
    pub async fn uninstall(&self) -> Result<(), AppError> {
        self.openrc()
            .stop_disable_and_remove(
                &self.paths.service(),
                &self.paths.legacy_service_name,
                &self.paths.legacy_service_file,
            )
            .await?;
        sysfs::remove_tree(&self.paths.root_dir)?;
        info!(root = %self.paths.root_dir.display(), "uninstalled");
        Ok(())
    }

    pub async fn enable_bbr(&self) -> Result<TuningReport, AppError> {
        BbrTuner::new(self.runner.as_ref(), &self.cancel, &self.tuning)
            .enable()
            .await
    }
}

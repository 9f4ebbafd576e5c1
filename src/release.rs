//! sing-box release retrieval, binary install and public IP lookup.
//!
//! Every request races the cancellation token. TLS failures caused by a
//! missing CA bundle (common on minimal Alpine images) carry a fix-up hint.

use std::{
    error::Error as StdError,
    fs,
    future::Future,
    io::{self, ErrorKind},
    net::IpAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use reqwest::{Client, StatusCode, header};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{HttpConfig, ReleaseConfig};
use crate::error::AppError;
use crate::system::CommandRunner;

pub const PUBLIC_IP_ENDPOINTS: [&str; 2] = ["https://api.ipify.org", "https://api64.ipify.org"];

const CA_HINT: &str =
    "HTTPS certificate verification failed; install CA certificates: apk add --no-cache ca-certificates && update-ca-certificates";
const ERROR_BODY_LIMIT: usize = 1024;
const IP_BODY_LIMIT: usize = 128;

pub fn build_client(cfg: &HttpConfig) -> Result<Client, AppError> {
    Client::builder()
        .timeout(Duration::from_secs(cfg.timeout_seconds))
        .user_agent(cfg.user_agent.as_str())
        .build()
        .map_err(|e| AppError::Network(format!("failed building HTTP client: {e}")))
}

/// Map a CPU architecture name to the release asset suffix.
pub fn detect_arch(machine: &str) -> Result<&'static str, AppError> {
    match machine {
        "x86_64" | "amd64" => Ok("amd64"),
        "aarch64" | "arm64" => Ok("arm64"),
        other => Err(AppError::EnvironmentUnsupported(format!("unsupported architecture: {other}"))),
    }
}

pub fn asset_url(release: &ReleaseConfig, version: &str, arch: &str) -> String {
    format!(
        "{}/v{version}/sing-box-{version}-linux-{arch}.tar.gz",
        release.download_base.trim_end_matches('/')
    )
}

#[derive(Deserialize)]
struct LatestRelease {
    #[serde(default)]
    tag_name: String,
}

/// Newest sing-box version, without the leading `v`.
pub async fn latest_version(
    client: &Client,
    cancel: &CancellationToken,
    release: &ReleaseConfig,
    github_token: Option<&str>,
) -> Result<String, AppError> {
    cancellable(cancel, async {
        let mut req = client
            .get(&release.api_url)
            .header(header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = github_token {
            req = req.bearer_auth(token);
        }
        let res = req.send().await.map_err(|e| http_error("GitHub API request failed", &e))?;

        let status = res.status();
        if !status.is_success() {
            let rate_limited = status == StatusCode::FORBIDDEN
                && res
                    .headers()
                    .get("x-ratelimit-remaining")
                    .is_some_and(|v| v.as_bytes() == b"0");
            if rate_limited {
                return Err(AppError::Network(
                    "GitHub API rate limit exceeded; set GITHUB_TOKEN or retry later".into(),
                ));
            }
            let body = res.text().await.unwrap_or_default();
            let body = truncate(body.trim(), ERROR_BODY_LIMIT);
            let body = if body.is_empty() { "<empty body>" } else { body };
            return Err(AppError::Network(format!("GitHub API returned {status}: {body}")));
        }

        let latest: LatestRelease = res
            .json()
            .await
            .map_err(|e| AppError::Network(format!("cannot parse GitHub release: {e}")))?;
        parse_tag(&latest.tag_name)
    })
    .await
}

fn parse_tag(tag: &str) -> Result<String, AppError> {
    let version = tag.trim();
    let version = version.strip_prefix('v').unwrap_or(version);
    if version.is_empty() {
        return Err(AppError::Network("GitHub release has an empty tag_name".into()));
    }
    Ok(version.to_string())
}

/// Download the release archive and install its `sing-box` binary at `dest`.
///
/// `dest` is replaced by rename, so a running service keeps its old inode.
pub async fn install(
    client: &Client,
    runner: &dyn CommandRunner,
    cancel: &CancellationToken,
    release: &ReleaseConfig,
    version: &str,
    arch: &str,
    dest: &Path,
) -> Result<(), AppError> {
    let work = tempfile::Builder::new().prefix("sing-box-").tempdir()?;
    let archive = work.path().join("release.tar.gz");
    let url = asset_url(release, version, arch);

    info!(%url, "downloading sing-box");
    download(client, cancel, &url, &archive).await?;
    unpack(runner, cancel, &archive, version, arch, dest).await?;
    info!(version, dest = %dest.display(), "sing-box installed");
    Ok(())
}

async fn download(
    client: &Client,
    cancel: &CancellationToken,
    url: &str,
    to: &Path,
) -> Result<(), AppError> {
    cancellable(cancel, async {
        let mut res = client
            .get(url)
            .send()
            .await
            .map_err(|e| http_error("download failed", &e))?;
        if !res.status().is_success() {
            return Err(AppError::Network(format!("download failed: {url} ({})", res.status())));
        }

        let mut file = tokio::fs::File::create(to).await?;
        let mut total = 0usize;
        while let Some(chunk) = res
            .chunk()
            .await
            .map_err(|e| http_error("download interrupted", &e))?
        {
            total += chunk.len();
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        debug!(bytes = total, path = %to.display(), "archive downloaded");
        Ok(())
    })
    .await
}

/// Extract `archive` next to itself with the host `tar`, then move the
/// binary into place.
pub async fn unpack(
    runner: &dyn CommandRunner,
    cancel: &CancellationToken,
    archive: &Path,
    version: &str,
    arch: &str,
    dest: &Path,
) -> Result<(), AppError> {
    let extract_dir = archive
        .parent()
        .map(|p| p.join("extract"))
        .unwrap_or_else(|| PathBuf::from("extract"));
    fs::create_dir_all(&extract_dir)?;

    let archive_arg = archive.to_string_lossy();
    let dir_arg = extract_dir.to_string_lossy();
    runner
        .run(cancel, "tar", &["-xzf", archive_arg.as_ref(), "-C", dir_arg.as_ref()])
        .await?;

    let binary = extract_dir
        .join(format!("sing-box-{version}-linux-{arch}"))
        .join("sing-box");
    if !binary.is_file() {
        return Err(io::Error::new(
            ErrorKind::NotFound,
            format!("sing-box binary not found in {}", archive.display()),
        )
        .into());
    }
    place_executable(&binary, dest)
}

fn place_executable(from: &Path, dest: &Path) -> Result<(), AppError> {
    if let Some(dir) = dest.parent() {
        fs::create_dir_all(dir)?;
    }
    let mut staged = dest.as_os_str().to_owned();
    staged.push(".tmp");
    let staged = PathBuf::from(staged);

    fs::copy(from, &staged)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&staged, fs::Permissions::from_mode(0o755))?;
    }
    fs::rename(&staged, dest)?;
    Ok(())
}

/// `sing-box check -c <config>`.
pub async fn check_config(
    runner: &dyn CommandRunner,
    cancel: &CancellationToken,
    binary: &Path,
    config: &Path,
) -> Result<(), AppError> {
    let binary = binary.to_string_lossy();
    let config = config.to_string_lossy();
    runner
        .run(cancel, binary.as_ref(), &["check", "-c", config.as_ref()])
        .await
}

/// This host's public address, trying each endpoint in turn.
pub async fn public_ip(
    client: &Client,
    cancel: &CancellationToken,
    endpoints: &[&str],
) -> Result<String, AppError> {
    let mut last = AppError::Network("no public IP endpoints configured".into());
    for url in endpoints {
        match fetch_ip(client, cancel, url).await {
            Ok(ip) => return Ok(ip),
            Err(AppError::Cancelled) => return Err(AppError::Cancelled),
            Err(e) => {
                debug!(url, error = %e, "public IP lookup failed");
                last = e;
            }
        }
    }
    Err(last)
}

async fn fetch_ip(client: &Client, cancel: &CancellationToken, url: &str) -> Result<String, AppError> {
    cancellable(cancel, async {
        let res = client
            .get(url)
            .send()
            .await
            .map_err(|e| http_error("public IP lookup failed", &e))?;
        if !res.status().is_success() {
            return Err(AppError::Network(format!("{url} returned {}", res.status())));
        }
        let body = res
            .bytes()
            .await
            .map_err(|e| http_error("public IP lookup failed", &e))?;
        let body = &body[..body.len().min(IP_BODY_LIMIT)];
        let text = String::from_utf8_lossy(body);
        let text = text.trim();
        text.parse::<IpAddr>()
            .map(|ip| ip.to_string())
            .map_err(|_| AppError::Network(format!("{url} returned a non-IP body")))
    })
    .await
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, AppError>>,
) -> Result<T, AppError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        res = fut => res,
    }
}

fn http_error(context: &str, err: &reqwest::Error) -> AppError {
    if is_certificate_error(err) {
        AppError::Network(format!("{context}: {CA_HINT}: {err}"))
    } else {
        AppError::Network(format!("{context}: {err}"))
    }
}

fn is_certificate_error(err: &(dyn StdError + 'static)) -> bool {
    let mut cur = Some(err);
    while let Some(e) = cur {
        let msg = e.to_string();
        if msg.contains("certificate") || msg.contains("UnknownIssuer") || msg.contains("x509") {
            return true;
        }
        cur = e.source();
    }
    false
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

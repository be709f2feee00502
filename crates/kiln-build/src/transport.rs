//! ファイル取得
//!
//! `files` の各要素を取得元のスキームに応じて取得します。
//!
//! | スキーム | 取得方法 |
//! |----------|----------|
//! | なし | ローカルのファイル・ディレクトリをコピー |
//! | http / https | GET（200 以外はエラー） |
//! | scp | `scp` コマンド |
//! | ftp / ftps | 匿名ログイン（URL にユーザー情報があればそれを使用） |

use crate::context::copy_path;
use crate::error::{BuildError, Result};
use kiln_core::{BuildConfig, FileEntry};
use reqwest::blocking::Client;
use reqwest::{NoProxy, Proxy, StatusCode, Url};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::Command;
use suppaftp::native_tls::TlsConnector;
use suppaftp::{FtpStream, NativeTlsConnector, NativeTlsFtpStream};
use tracing::{debug, info};

const FTP_DEFAULT_PORT: u16 = 21;

/// 取得元の種類
#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    Local(PathBuf),
    Http(Url),
    Scp(Url),
    Ftp { url: Url, secure: bool },
}

/// 解決済みのファイル定義
#[derive(Debug, Clone, PartialEq)]
pub struct FileSpec {
    /// 配置名（ワークスペース相対）
    pub name: String,
    /// 設定に書かれた取得元
    pub source: String,
    pub location: Location,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl FileSpec {
    /// `files` の要素から構築（ローカルパスは設定ファイル基準で解決）
    pub fn from_entry(entry: &FileEntry, config: &BuildConfig) -> Result<Self> {
        let (name, source) = entry.parts()?;
        Self::parse(name, source, |path| config.resolve_path(path))
    }

    pub fn parse(
        name: Option<&str>,
        source: &str,
        resolve_local: impl Fn(&str) -> PathBuf,
    ) -> Result<Self> {
        let (location, default_name, host, port) = match Url::parse(source) {
            Ok(url) => {
                let location = match url.scheme() {
                    "http" | "https" => Location::Http(url.clone()),
                    "scp" => Location::Scp(url.clone()),
                    "ftp" => Location::Ftp {
                        url: url.clone(),
                        secure: false,
                    },
                    "ftps" => Location::Ftp {
                        url: url.clone(),
                        secure: true,
                    },
                    other => {
                        return Err(BuildError::UnsupportedScheme {
                            scheme: other.to_string(),
                            source_url: source.to_string(),
                        });
                    }
                };
                let default_name = last_segment(url.path());
                (
                    location,
                    default_name,
                    url.host_str().map(str::to_string),
                    url.port(),
                )
            }
            // 相対・絶対パスはURLとして解釈できない
            Err(_) => (
                Location::Local(resolve_local(source)),
                last_segment(source),
                None,
                None,
            ),
        };

        let name = match name {
            Some(name) => name.to_string(),
            None => default_name,
        };
        if name.is_empty() || name == "." || name == ".." {
            return Err(BuildError::InvalidSource(format!(
                "Cannot determine destination name for '{}'",
                source
            )));
        }

        Ok(Self {
            name,
            source: source.to_string(),
            location,
            host,
            port,
        })
    }
}

/// 末尾のスラッシュを除いた最後のパス要素
fn last_segment(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// ネットワーク取得の設定（プロセス環境変数は変更しない）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkSettings {
    proxy: BTreeMap<String, String>,
}

impl NetworkSettings {
    pub fn from_config(config: &BuildConfig) -> Self {
        Self::with_proxy(config.proxy.iter().map(|(k, v)| (k.clone(), v.clone())))
    }

    pub fn with_proxy(proxy: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            proxy: proxy.into_iter().collect(),
        }
    }

    /// 子プロセスに渡すプロキシ環境変数
    pub fn proxy_env(&self) -> impl Iterator<Item = (&str, &str)> {
        self.proxy.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// 大文字・小文字どちらの表記でも検索
    pub fn lookup(&self, upper: &str) -> Option<&str> {
        self.proxy
            .get(upper)
            .or_else(|| self.proxy.get(&upper.to_ascii_lowercase()))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn socks_proxy(&self) -> Option<&str> {
        self.lookup("SOCKS_PROXY")
    }

    fn http_client(&self) -> Result<Client> {
        let no_proxy = self.lookup("NO_PROXY").and_then(NoProxy::from_string);
        let mut builder = Client::builder();
        if let Some(url) = self.lookup("HTTP_PROXY") {
            let proxy = Proxy::http(url).map_err(|e| proxy_error(url, e))?;
            builder = builder.proxy(proxy.no_proxy(no_proxy.clone()));
        }
        if let Some(url) = self.lookup("HTTPS_PROXY") {
            let proxy = Proxy::https(url).map_err(|e| proxy_error(url, e))?;
            builder = builder.proxy(proxy.no_proxy(no_proxy.clone()));
        }
        builder.build().map_err(|e| BuildError::Transport {
            source_url: String::new(),
            message: e.to_string(),
        })
    }
}

fn proxy_error(url: &str, e: reqwest::Error) -> BuildError {
    BuildError::InvalidConfig(format!("Invalid proxy '{}': {}", url, e))
}

/// 取得元から `destination` へ取得
///
/// `destination` の親ディレクトリは作成済みであること。
pub fn fetch(spec: &FileSpec, destination: &Path, settings: &NetworkSettings) -> Result<()> {
    info!(source = %spec.source, name = %spec.name, "Fetching file");
    match &spec.location {
        Location::Local(path) => copy_path(path, destination),
        Location::Http(url) => fetch_http(url, destination, settings),
        Location::Scp(url) => fetch_scp(url, destination),
        Location::Ftp { url, secure } => fetch_ftp(url, *secure, destination),
    }
}

fn fetch_http(url: &Url, destination: &Path, settings: &NetworkSettings) -> Result<()> {
    let transport_error = |e: reqwest::Error| BuildError::Transport {
        source_url: url.to_string(),
        message: e.to_string(),
    };
    let client = settings.http_client()?;
    let mut response = client.get(url.clone()).send().map_err(transport_error)?;
    if response.status() != StatusCode::OK {
        return Err(BuildError::HttpStatus {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }
    let mut file = File::create(destination)?;
    let written = response.copy_to(&mut file).map_err(transport_error)?;
    debug!(url = %url, bytes = written, "Downloaded");
    Ok(())
}

fn fetch_scp(url: &Url, destination: &Path) -> Result<()> {
    let host = url.host_str().ok_or_else(|| BuildError::InvalidSource(url.to_string()))?;
    let remote = if url.username().is_empty() {
        format!("{}:{}", host, url.path())
    } else {
        format!("{}@{}:{}", url.username(), host, url.path())
    };

    let mut command = Command::new("scp");
    command.arg("-B").arg("-r");
    if let Some(port) = url.port() {
        command.arg("-P").arg(port.to_string());
    }
    command.arg(&remote).arg(destination);

    debug!(remote = %remote, "Running scp");
    let output = command.output().map_err(|e| BuildError::Transport {
        source_url: url.to_string(),
        message: format!("failed to run scp: {}", e),
    })?;
    if !output.status.success() {
        return Err(BuildError::Transport {
            source_url: url.to_string(),
            message: format!(
                "scp exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(())
}

fn fetch_ftp(url: &Url, secure: bool, destination: &Path) -> Result<()> {
    let ftp_error = |e: suppaftp::FtpError| BuildError::Transport {
        source_url: url.to_string(),
        message: e.to_string(),
    };
    let host = url.host_str().ok_or_else(|| BuildError::InvalidSource(url.to_string()))?;
    let address = format!("{}:{}", host, url.port().unwrap_or(FTP_DEFAULT_PORT));
    let (user, password) = if url.username().is_empty() {
        ("anonymous".to_string(), "anonymous@".to_string())
    } else {
        (
            url.username().to_string(),
            url.password().unwrap_or_default().to_string(),
        )
    };

    let data = if secure {
        let connector = TlsConnector::new().map_err(|e| BuildError::Transport {
            source_url: url.to_string(),
            message: e.to_string(),
        })?;
        let stream = NativeTlsFtpStream::connect(&address).map_err(ftp_error)?;
        let mut stream = stream
            .into_secure(NativeTlsConnector::from(connector), host)
            .map_err(ftp_error)?;
        stream.login(&user, &password).map_err(ftp_error)?;
        let data = stream.retr_as_buffer(url.path()).map_err(ftp_error)?;
        stream.quit().ok();
        data
    } else {
        let mut stream = FtpStream::connect(&address).map_err(ftp_error)?;
        stream.login(&user, &password).map_err(ftp_error)?;
        let data = stream.retr_as_buffer(url.path()).map_err(ftp_error)?;
        stream.quit().ok();
        data
    };

    fs::write(destination, data.into_inner())?;
    Ok(())
}

//! ビルドコンテキストの構築
//!
//! 処理順序は固定です。
//!
//! 1. Dockerfile / entrypoint / pip.conf
//! 2. スナップショット
//! 3. リポジトリ（設定、スナップショットの順）
//! 4. ファイル
//! 5. requirements ファイルの検索
//! 6. パッケージ
//! 7. ジョブファイル・マニフェストの発見
//! 8. build.yaml / jobfiles.txt / manifest.json / repos.json の書き出し
//!
//! requirements レイヤーは「スナップショットのパッケージ < リポジトリの requirements.txt
//! < 検索で見つかった requirements < `packages`」の順に優先度が上がります。

use crate::context::BuildContext;
use crate::discovery::{self, ManifestDiscovery};
use crate::error::{BuildError, Result};
use crate::git::{self, CloneRequest};
use crate::requirements::RequirementsLayers;
use crate::transport::{self, FileSpec, NetworkSettings};
use kiln_core::layout;
use kiln_core::{
    BuildConfig, ENTRYPOINT_SCRIPT, ImageDescriptor, JobList, ManifestBundle, ManifestRecord,
    RepoRecord, RepoSpec, Snapshot, render_dockerfile, render_pip_config,
};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

const REPO_REQUIREMENTS: &str = "requirements.txt";

/// 構築結果
#[derive(Debug, Clone)]
pub struct Population {
    /// Dockerfile のコンテキスト相対パス
    pub dockerfile: PathBuf,
    /// requirements レイヤー（番号順）
    pub requirements: Vec<PathBuf>,
    pub repositories: Vec<RepoRecord>,
    pub jobs: Vec<String>,
    pub manifests: Vec<ManifestRecord>,
}

/// 設定に従ってコンテキストを構築する
pub struct ContextPopulator<'a> {
    config: &'a BuildConfig,
    context: &'a BuildContext,
    network: NetworkSettings,
    layers: RequirementsLayers,
    repositories: Vec<RepoRecord>,
    registered: HashSet<String>,
}

impl<'a> ContextPopulator<'a> {
    pub fn new(config: &'a BuildConfig, context: &'a BuildContext) -> Self {
        Self {
            config,
            context,
            network: NetworkSettings::from_config(config),
            layers: RequirementsLayers::new(),
            repositories: Vec::new(),
            registered: HashSet::new(),
        }
    }

    /// コンテキストを構築
    ///
    /// 失敗した時点で中断します。作成済みのファイルは残るため、
    /// 後始末はコンテキストの所有者が行います。
    #[instrument(skip_all, fields(context = %self.context.root().display()))]
    pub fn populate(mut self) -> Result<Population> {
        let dockerfile = self.write_install_files()?;

        let snapshot = self.load_snapshot()?;
        if let Some(snapshot) = &snapshot {
            self.layers.add_packages(self.context, &snapshot.packages)?;
        }

        let config = self.config;
        for (name, spec) in &config.repositories {
            self.add_repository(name, spec)?;
        }
        if let Some(snapshot) = &snapshot {
            for (name, spec) in &snapshot.repositories {
                self.add_repository(name, spec)?;
            }
        }

        self.add_files()?;
        self.add_requirement_matches()?;
        self.layers.add_packages(self.context, &config.packages)?;

        let jobs = discovery::discover_jobs(self.context, config.jobfiles.as_ref())?;
        let known: Vec<String> = self
            .repositories
            .iter()
            .map(|r| r.path().to_string())
            .collect();
        let ManifestDiscovery {
            manifests,
            repositories,
        } = discovery::discover_manifests(self.context, &known)?;
        self.repositories
            .extend(repositories.into_iter().map(RepoRecord::discovered));

        self.write_metadata(&jobs, &manifests)?;

        info!(
            repositories = self.repositories.len(),
            layers = self.layers.layers().len(),
            jobs = jobs.len(),
            manifests = manifests.len(),
            "Build context populated"
        );
        Ok(Population {
            dockerfile,
            requirements: self.layers.layers().to_vec(),
            repositories: self.repositories,
            jobs,
            manifests,
        })
    }

    fn write_install_files(&self) -> Result<PathBuf> {
        let install = layout::install_dir();
        let descriptor = ImageDescriptor::from_config(self.config)?;
        let dockerfile = self
            .context
            .write_file(layout::dockerfile_path(), render_dockerfile(&descriptor)?)?;
        info!(path = %dockerfile.display(), "Wrote Dockerfile");

        let entrypoint = self
            .context
            .write_file(install.join(layout::ENTRYPOINT), ENTRYPOINT_SCRIPT)?;
        git::set_mode(&entrypoint, 0o755)?;

        if let Some(pip_config) = &self.config.pip_config {
            self.context
                .write_file(install.join(layout::PIP_CONF), render_pip_config(pip_config)?)?;
            info!("Wrote pip configuration");
        }

        self.context.mkdir(install.join(layout::REQUIREMENTS_DIR))?;
        Ok(layout::dockerfile_path())
    }

    fn load_snapshot(&self) -> Result<Option<Snapshot>> {
        let Some(reference) = self.config.snapshot.as_deref() else {
            return Ok(None);
        };
        let snapshot = kiln_core::load_snapshot(&self.config.resolve_path(reference))?;
        self.context.write_file(
            layout::install_dir().join(layout::SNAPSHOT_YAML),
            snapshot.to_redacted_yaml()?,
        )?;
        info!(
            repositories = snapshot.repositories.len(),
            packages = snapshot.packages.len(),
            "Snapshot loaded"
        );
        Ok(Some(snapshot))
    }

    fn add_repository(&mut self, name: &str, spec: &RepoSpec) -> Result<()> {
        let relative = layout::workspace_dir().join(name);
        let destination = self.context.ensure_vacant(&relative)?;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        let image_path = self.image_path(&relative)?;

        let request = CloneRequest {
            spec,
            destination: destination.clone(),
            image_path: image_path.clone(),
            remove_vcs_metadata: true,
        };
        let info = git::clone(&request, &self.network)?;

        if spec.wants_requirements() && destination.join(REPO_REQUIREMENTS).is_file() {
            self.register_requirements(format!("{}/{}", image_path, REPO_REQUIREMENTS))?;
        }
        self.repositories
            .push(RepoRecord::configured(name, spec, info));
        Ok(())
    }

    fn add_files(&self) -> Result<()> {
        for entry in &self.config.files {
            let spec = FileSpec::from_entry(entry, self.config)?;
            let destination = self
                .context
                .ensure_vacant(layout::workspace_dir().join(&spec.name))?;
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            transport::fetch(&spec, &destination, &self.network)?;
        }
        Ok(())
    }

    fn add_requirement_matches(&mut self) -> Result<()> {
        let config = self.config;
        let Some(patterns) = config.requirements.as_ref() else {
            return Ok(());
        };
        if patterns.is_empty() {
            return Ok(());
        }
        for relative in discovery::find_matching_files(self.context, patterns)? {
            let image_path = self.image_path(&relative)?;
            self.register_requirements(image_path)?;
        }
        Ok(())
    }

    /// 同じファイルを二重に登録しない
    fn register_requirements(&mut self, image_path: String) -> Result<()> {
        if self.registered.contains(&image_path) {
            return Ok(());
        }
        self.layers.add_file(self.context, &image_path)?;
        self.registered.insert(image_path);
        Ok(())
    }

    fn write_metadata(&self, jobs: &[String], manifests: &[ManifestRecord]) -> Result<()> {
        let install = layout::install_dir();
        self.context.write_file(
            install.join(layout::BUILD_YAML),
            self.config.to_redacted_yaml()?,
        )?;

        let job_list = JobList {
            jobs: jobs.to_vec(),
        };
        self.context.write_file(
            install.join(layout::JOBFILES_TXT),
            serde_json::to_string_pretty(&job_list)?,
        )?;

        let bundle = ManifestBundle::new(manifests.to_vec());
        self.context.write_file(
            install.join(layout::MANIFEST_JSON),
            serde_json::to_string_pretty(&bundle)?,
        )?;

        let repos: BTreeMap<&str, &RepoRecord> =
            self.repositories.iter().map(|r| (r.path(), r)).collect();
        self.context.write_file(
            install.join(layout::REPOS_JSON),
            serde_json::to_string_pretty(&repos)?,
        )?;
        Ok(())
    }

    fn image_path(&self, relative: &Path) -> Result<String> {
        self.context
            .image_path(relative)
            .ok_or_else(|| BuildError::PathEscape(relative.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DEFAULT_PREFIX;
    use kiln_core::parse_config;
    use std::process::Command;
    use tempfile::tempdir;

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .env("GIT_AUTHOR_NAME", "kiln")
            .env("GIT_AUTHOR_EMAIL", "kiln@example.com")
            .env("GIT_COMMITTER_NAME", "kiln")
            .env("GIT_COMMITTER_EMAIL", "kiln@example.com")
            .status()
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    }

    fn make_repo(path: &Path, files: &[(&str, &str)]) {
        fs::create_dir_all(path).unwrap();
        git(path, &["init", "--quiet", "-b", "main"]);
        for (name, content) in files {
            let file = path.join(name);
            fs::create_dir_all(file.parent().unwrap()).unwrap();
            fs::write(file, content).unwrap();
        }
        git(path, &["add", "."]);
        git(path, &["commit", "--quiet", "-m", "init"]);
    }

    fn read(context: &BuildContext, relative: impl AsRef<Path>) -> String {
        fs::read_to_string(context.root().join(relative)).unwrap()
    }

    fn installation(name: &str) -> PathBuf {
        layout::install_dir().join(name)
    }

    #[test]
    fn test_populate_writes_artifacts() {
        let sources = tempdir().unwrap();
        fs::write(sources.path().join("foo_job.py"), "print('job')\n").unwrap();
        fs::write(sources.path().join("suite.tem"), "type: run\n").unwrap();

        let config = parse_config(
            r#"
tag: lab:1
files:
  - foo_job.py
  - suites/suite.tem: suite.tem
packages: [pyats]
pip-config:
  global:
    index-url: https://pypi.example.com/simple
"#,
            Some(sources.path()),
        )
        .unwrap();
        let context = BuildContext::create(DEFAULT_PREFIX).unwrap();
        let population = ContextPopulator::new(&config, &context).populate().unwrap();

        assert!(read(&context, &population.dockerfile).contains("FROM python:3.6.9"));
        assert!(read(&context, installation(layout::PIP_CONF)).contains("index-url"));
        assert_eq!(population.jobs, vec!["/workspace/foo_job.py"]);
        assert_eq!(population.manifests[0].file, "/workspace/suites/suite.tem");

        let jobs: serde_json::Value =
            serde_json::from_str(&read(&context, installation(layout::JOBFILES_TXT))).unwrap();
        assert_eq!(jobs["jobs"][0], "/workspace/foo_job.py");

        let manifests: serde_json::Value =
            serde_json::from_str(&read(&context, installation(layout::MANIFEST_JSON))).unwrap();
        assert_eq!(manifests["version"], 1);

        // 書き出した build.yaml はそのまま読み込める
        let dumped = read(&context, installation(layout::BUILD_YAML));
        let reparsed = parse_config(&dumped, Some(sources.path())).unwrap();
        assert_eq!(reparsed.packages, vec!["pyats"]);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(context.root().join(installation(layout::ENTRYPOINT)))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[test]
    fn test_requirements_layer_precedence() {
        let sources = tempdir().unwrap();
        let repo = sources.path().join("lib-origin");
        make_repo(&repo, &[("requirements.txt", "b\n"), ("reqs/extra.txt", "x\n")]);
        fs::write(sources.path().join("snap.yaml"), "packages: [a]\n").unwrap();

        let config = parse_config(
            &format!(
                r#"
snapshot: snap.yaml
repositories:
  lib:
    url: {}
    requirements_file: true
requirements:
  glob: ["lib/reqs/*.txt"]
packages: [c]
"#,
                repo.display()
            ),
            Some(sources.path()),
        )
        .unwrap();
        let context = BuildContext::create(DEFAULT_PREFIX).unwrap();
        let population = ContextPopulator::new(&config, &context).populate().unwrap();

        let contents: Vec<String> = population
            .requirements
            .iter()
            .map(|layer| read(&context, layer))
            .collect();
        assert_eq!(
            contents,
            vec![
                "a\n",
                "-r /workspace/lib/requirements.txt\n",
                "-r /workspace/lib/reqs/extra.txt\n",
                "c\n",
            ]
        );
        assert!(context.root().join(installation(layout::SNAPSHOT_YAML)).is_file());
        // メタデータ抽出後に .git は削除される
        assert!(!context.root().join("image/workspace/lib/.git").exists());
    }

    #[test]
    fn test_repo_requirements_skipped_without_flag() {
        let sources = tempdir().unwrap();
        let repo = sources.path().join("lib-origin");
        make_repo(&repo, &[("requirements.txt", "b\n")]);

        let config = parse_config(
            &format!(
                "repositories:\n  lib:\n    url: {}\npackages: [c]\n",
                repo.display()
            ),
            Some(sources.path()),
        )
        .unwrap();
        let context = BuildContext::create(DEFAULT_PREFIX).unwrap();
        let population = ContextPopulator::new(&config, &context).populate().unwrap();

        let contents: Vec<String> = population
            .requirements
            .iter()
            .map(|layer| read(&context, layer))
            .collect();
        assert_eq!(contents, vec!["c\n"]);
        assert!(context.root().join("image/workspace/lib/requirements.txt").is_file());
    }

    #[test]
    fn test_snapshot_repository_with_same_name_is_rejected() {
        let sources = tempdir().unwrap();
        let first = sources.path().join("first");
        let second = sources.path().join("second");
        make_repo(&first, &[("README", "first")]);
        make_repo(&second, &[("README", "second")]);
        fs::write(
            sources.path().join("snap.yaml"),
            format!("repositories:\n  lib:\n    url: {}\n", second.display()),
        )
        .unwrap();

        let config = parse_config(
            &format!(
                "snapshot: snap.yaml\nrepositories:\n  lib:\n    url: {}\n",
                first.display()
            ),
            Some(sources.path()),
        )
        .unwrap();
        let context = BuildContext::create(DEFAULT_PREFIX).unwrap();
        let err = ContextPopulator::new(&config, &context)
            .populate()
            .unwrap_err();
        assert!(matches!(err, BuildError::DestinationExists(_)));
        assert_eq!(read(&context, "image/workspace/lib/README"), "first");
    }

    #[test]
    fn test_repository_cannot_replace_installation_dir() {
        let sources = tempdir().unwrap();
        let repo = sources.path().join("origin");
        make_repo(&repo, &[("README", "x")]);

        let config = parse_config(
            &format!("repositories:\n  installation:\n    url: {}\n", repo.display()),
            Some(sources.path()),
        )
        .unwrap();
        let context = BuildContext::create(DEFAULT_PREFIX).unwrap();
        let err = ContextPopulator::new(&config, &context)
            .populate()
            .unwrap_err();
        assert!(matches!(err, BuildError::DestinationExists(_)));
        assert!(!context.root().join("image/workspace/installation/README").exists());
        assert!(context.root().join(layout::dockerfile_path()).is_file());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_destination_cannot_follow_copied_symlink() {
        let sources = tempdir().unwrap();
        let outside = tempdir().unwrap();
        fs::write(sources.path().join("a.txt"), "a").unwrap();
        fs::create_dir_all(sources.path().join("tree")).unwrap();
        std::os::unix::fs::symlink(outside.path(), sources.path().join("tree/out")).unwrap();

        let config = parse_config(
            "files:\n  - tree\n  - tree/out/pwned.txt: a.txt\n",
            Some(sources.path()),
        )
        .unwrap();
        let context = BuildContext::create(DEFAULT_PREFIX).unwrap();
        let err = ContextPopulator::new(&config, &context)
            .populate()
            .unwrap_err();
        assert!(matches!(err, BuildError::PathEscape(_)));
        assert!(!outside.path().join("pwned.txt").exists());
    }

    #[test]
    fn test_duplicate_destination_is_rejected() {
        let sources = tempdir().unwrap();
        fs::write(sources.path().join("a.txt"), "a").unwrap();
        fs::write(sources.path().join("b.txt"), "b").unwrap();

        let config = parse_config(
            "files:\n  - same.txt: a.txt\n  - same.txt: b.txt\n",
            Some(sources.path()),
        )
        .unwrap();
        let context = BuildContext::create(DEFAULT_PREFIX).unwrap();
        let err = ContextPopulator::new(&config, &context)
            .populate()
            .unwrap_err();
        assert!(matches!(err, BuildError::DestinationExists(_)));
        assert_eq!(read(&context, "image/workspace/same.txt"), "a");
    }

    #[test]
    fn test_file_destination_cannot_escape_context() {
        let sources = tempdir().unwrap();
        fs::write(sources.path().join("a.txt"), "a").unwrap();
        let config = parse_config(
            "files:\n  - ../../../escaped.txt: a.txt\n",
            Some(sources.path()),
        )
        .unwrap();
        let context = BuildContext::create(DEFAULT_PREFIX).unwrap();
        let err = ContextPopulator::new(&config, &context)
            .populate()
            .unwrap_err();
        assert!(matches!(err, BuildError::PathEscape(_)));
        assert!(!context.root().parent().unwrap().join("escaped.txt").exists());
    }

    #[test]
    fn test_credentials_are_not_persisted() {
        let sources = tempdir().unwrap();
        let repo = sources.path().join("origin");
        make_repo(&repo, &[("README", "x")]);

        let config = parse_config(
            &format!(
                r#"
repositories:
  secure:
    url: {}
    credentials:
      username: alice
      password: s3cr3t-value
"#,
                repo.display()
            ),
            Some(sources.path()),
        )
        .unwrap();
        let context = BuildContext::create(DEFAULT_PREFIX).unwrap();
        let population = ContextPopulator::new(&config, &context).populate().unwrap();
        assert_eq!(population.repositories.len(), 1);

        for name in [layout::BUILD_YAML, layout::REPOS_JSON] {
            let content = read(&context, installation(name));
            assert!(!content.contains("s3cr3t-value"), "{} leaks credentials", name);
        }
        let repos: serde_json::Value =
            serde_json::from_str(&read(&context, installation(layout::REPOS_JSON))).unwrap();
        assert!(repos.get("/workspace/secure").is_some());
    }
}

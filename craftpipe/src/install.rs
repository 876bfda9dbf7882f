//! The installation pipeline, wiring all stages together to produce an [`Instance`]
//! ready to be launched.
//!
//! Stages run in order: the manifest is resolved (fetched if missing), its natives are
//! remapped and its asset index fetched, then all artifacts are downloaded, natives are
//! extracted and finally the mod loader processors are run, if any.

use std::sync::{Arc, LazyLock, Mutex, MutexGuard};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::{env, fs, io};

use tracing::{debug, info};

use uuid::{uuid, Uuid};

use crate::artifact::{self, ArtifactGraph, ArtifactGraphBuilder, ArtifactKind, AssetIndex, Layout, RESOURCES_URL};
use crate::download::{self, DownloadItem, Downloader, ReplacePolicy};
use crate::manifest::{self, Manifest, ManifestResolver, Platform, VersionList, VERSION_LIST_URL};
use crate::natives::{self, NativeLibraryMapper};
use crate::processor::{self, ExternalProcessorRunner, InstallProfile, ProcessorEnv, StepOutcome, ValueDictionary};
use crate::progress::ProgressAggregator;
use crate::task::{self, CancelToken, Task, TaskContext, TaskScheduler};
use crate::path::PathBufExt;
use crate::maven::Gav;


/// The UUID namespace used to derive offline player UUIDs.
const UUID_NAMESPACE: Uuid = uuid!("5e3c1a0e-7f4b-5d8e-9c2a-0b6f1d3e8a47");

/// Default number of concurrent downloads of a batch.
pub const DEFAULT_CONCURRENCY: usize = 32;

/// Name of the file the version list is cached to, in the versions directory.
const VERSION_LIST_FILE: &str = "version_manifest_v2.json";

/// The identity of the player, given to the game through its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub username: String,
    pub uuid: Uuid,
    pub access_token: String,
    pub user_type: String,
}

impl Account {

    /// An offline account, its UUID is derived from the username.
    pub fn offline(username: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            uuid: Uuid::new_v5(&UUID_NAMESPACE, username.as_bytes()),
            username,
            access_token: String::new(),
            user_type: "legacy".to_string(),
        }
    }

}

/// The installer of a version, with its optional mod loader.
#[derive(Debug, Clone)]
pub struct Installer {
    version: String,
    main_dir: PathBuf,
    versions_dir: PathBuf,
    libraries_dir: PathBuf,
    assets_dir: PathBuf,
    platform: Option<Platform>,
    concurrency: usize,
    replace_policy: ReplacePolicy,
    launcher_name: Option<String>,
    launcher_version: Option<String>,
    jvm_file: PathBuf,
    modloader: Option<PathBuf>,
    account: Account,
    version_list_url: String,
    resources_url: String,
    cancel: CancelToken,
}

impl Installer {

    /// Create a new installer for the given version (or `release`, `snapshot`), all
    /// directories are derived from the default main directory.
    pub fn new(version: impl Into<String>) -> Self {

        let main_dir = default_main_dir().unwrap_or_else(|| Path::new(""));

        Self {
            version: version.into(),
            main_dir: main_dir.to_path_buf(),
            versions_dir: main_dir.join("versions"),
            libraries_dir: main_dir.join("libraries"),
            assets_dir: main_dir.join("assets"),
            platform: Platform::current(),
            concurrency: DEFAULT_CONCURRENCY,
            replace_policy: ReplacePolicy::Skip,
            launcher_name: None,
            launcher_version: None,
            jvm_file: PathBuf::from("java"),
            modloader: None,
            account: Account::offline("Player"),
            version_list_url: VERSION_LIST_URL.to_string(),
            resources_url: RESOURCES_URL.to_string(),
            cancel: CancelToken::new(),
        }

    }

    #[inline]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[inline]
    pub fn set_version(&mut self, version: impl Into<String>) -> &mut Self {
        self.version = version.into();
        self
    }

    /// The main directory, also used as the game directory.
    #[inline]
    pub fn main_dir(&self) -> &Path {
        &self.main_dir
    }

    /// Set the main directory, this also resets the versions, libraries and assets
    /// directories to their default under it.
    pub fn set_main_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.main_dir = dir.into();
        self.versions_dir = self.main_dir.join("versions");
        self.libraries_dir = self.main_dir.join("libraries");
        self.assets_dir = self.main_dir.join("assets");
        self
    }

    #[inline]
    pub fn versions_dir(&self) -> &Path {
        &self.versions_dir
    }

    #[inline]
    pub fn set_versions_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.versions_dir = dir.into();
        self
    }

    #[inline]
    pub fn libraries_dir(&self) -> &Path {
        &self.libraries_dir
    }

    #[inline]
    pub fn set_libraries_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.libraries_dir = dir.into();
        self
    }

    #[inline]
    pub fn assets_dir(&self) -> &Path {
        &self.assets_dir
    }

    #[inline]
    pub fn set_assets_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.assets_dir = dir.into();
        self
    }

    /// The platform to install for, none if the current one isn't supported and no
    /// platform has been set.
    #[inline]
    pub fn platform(&self) -> Option<Platform> {
        self.platform
    }

    #[inline]
    pub fn set_platform(&mut self, platform: Platform) -> &mut Self {
        self.platform = Some(platform);
        self
    }

    #[inline]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Set the maximum number of concurrent downloads of a batch, at least 1.
    #[inline]
    pub fn set_concurrency(&mut self, concurrency: usize) -> &mut Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[inline]
    pub fn replace_policy(&self) -> ReplacePolicy {
        self.replace_policy
    }

    #[inline]
    pub fn set_replace_policy(&mut self, policy: ReplacePolicy) -> &mut Self {
        self.replace_policy = policy;
        self
    }

    /// The launcher name given to the game, defaults to this crate's name.
    #[inline]
    pub fn launcher_name(&self) -> &str {
        self.launcher_name.as_deref().unwrap_or(env!("CARGO_PKG_NAME"))
    }

    #[inline]
    pub fn set_launcher_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.launcher_name = Some(name.into());
        self
    }

    /// The launcher version given to the game, defaults to this crate's version.
    #[inline]
    pub fn launcher_version(&self) -> &str {
        self.launcher_version.as_deref().unwrap_or(env!("CARGO_PKG_VERSION"))
    }

    #[inline]
    pub fn set_launcher_version(&mut self, version: impl Into<String>) -> &mut Self {
        self.launcher_version = Some(version.into());
        self
    }

    /// The Java executable, used for processors and given back in the instance.
    #[inline]
    pub fn jvm_file(&self) -> &Path {
        &self.jvm_file
    }

    #[inline]
    pub fn set_jvm_file(&mut self, file: impl Into<PathBuf>) -> &mut Self {
        self.jvm_file = file.into();
        self
    }

    /// The mod loader installer jar, its version replaces the configured one.
    #[inline]
    pub fn modloader(&self) -> Option<&Path> {
        self.modloader.as_deref()
    }

    #[inline]
    pub fn set_modloader(&mut self, installer_file: impl Into<PathBuf>) -> &mut Self {
        self.modloader = Some(installer_file.into());
        self
    }

    #[inline]
    pub fn account(&self) -> &Account {
        &self.account
    }

    #[inline]
    pub fn set_account(&mut self, account: Account) -> &mut Self {
        self.account = account;
        self
    }

    #[inline]
    pub fn set_version_list_url(&mut self, url: impl Into<String>) -> &mut Self {
        self.version_list_url = url.into();
        self
    }

    #[inline]
    pub fn set_resources_url(&mut self, url: impl Into<String>) -> &mut Self {
        self.resources_url = url.into();
        self
    }

    /// The token cancelling the installation, cancelling it stops all running stages.
    #[inline]
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    #[inline]
    pub fn set_cancel_token(&mut self, cancel: CancelToken) -> &mut Self {
        self.cancel = cancel;
        self
    }

    fn layout(&self) -> Layout {
        Layout {
            versions_dir: self.versions_dir.clone(),
            libraries_dir: self.libraries_dir.clone(),
            assets_dir: self.assets_dir.clone(),
        }
    }

    /// Ensure that the version is fully installed and return the instance to launch.
    pub async fn install(&self, handler: impl Handler + 'static) -> Result<Instance> {

        let platform = self.platform.ok_or(Error::UnsupportedPlatform)?;
        let handler: Arc<dyn Handler> = Arc::new(handler);

        let pipeline = Arc::new(Pipeline {
            resolver: ManifestResolver::new(&self.versions_dir, platform),
            layout: self.layout(),
            downloader: Downloader::http()?,
            handler: Arc::clone(&handler),
            installer_dir: self.main_dir.join(".installer"),
            config: self.clone(),
            platform,
            manifest: Mutex::new(None),
            asset_index: Mutex::new(None),
            profile: Mutex::new(None),
        });

        let mut scheduler = TaskScheduler::new();
        scheduler.set_cancel(self.cancel.clone());
        scheduler.set_progress_sink({
            let handler = Arc::clone(&handler);
            move |total: f64| handler.on_event(Event::Progress { total })
        });

        macro_rules! push_stage {
            ($ordinal:expr, $name:expr, $method:ident) => {{
                let pipeline = Arc::clone(&pipeline);
                scheduler.push(Task::new($ordinal, $name, move |ctx| pipeline.$method(ctx)));
            }};
        }

        push_stage!(0, "resolve", resolve);
        push_stage!(1, "natives", remap_natives);
        push_stage!(1, "asset index", load_asset_index);
        push_stage!(2, "libraries", download_libraries);
        push_stage!(2, "assets", download_assets);
        push_stage!(3, "extract natives", extract_natives);
        if self.modloader.is_some() {
            push_stage!(4, "processors", run_processors);
        }

        scheduler.run().await.map_err(Error::from_task)?;

        let manifest = pipeline.manifest()?;
        let instance = self.build_instance(&manifest)?;
        handler.on_event(Event::Installed { instance: &instance });
        info!(version = %instance.version, "installed");

        Ok(instance)

    }

    /// Blocking variant of [`Self::install`], running on its own runtime.
    pub fn install_blocking(&self, handler: impl Handler + 'static) -> Result<Instance> {
        crate::tokio::sync(self.install(handler))
            .map_err(|e| Error::new_io(e, "runtime"))?
    }

    fn build_instance(&self, manifest: &Manifest) -> Result<Instance> {

        let layout = self.layout();
        let natives_dir = canonicalize_or_keep(&natives_dir(&layout, &manifest.id));
        let game_dir = canonicalize_or_keep(&self.main_dir);
        let libraries_dir = canonicalize_or_keep(&self.libraries_dir);
        let assets_dir = canonicalize_or_keep(&self.assets_dir);

        let classpath_files = classpath_files(manifest, &layout)
            .into_iter()
            .map(|file| canonicalize_or_keep(&file))
            .collect::<Vec<_>>();
        let classpath = join_classpath(&classpath_files)?;

        let mut jvm_args = manifest.jvm_arguments();
        let mut game_args = manifest.game_arguments();

        if let Some(logging) = &manifest.logging {
            let file = canonicalize_or_keep(&layout.log_config_file(&logging.id));
            jvm_args.push(logging.argument.replace("${path}", &file.display().to_string()));
        }

        let repl_arg = |arg: &str| {
            Some(match arg {
                "auth_player_name" => self.account.username.clone(),
                "auth_uuid" => self.account.uuid.simple().to_string(),
                "auth_access_token" | "auth_session" => self.account.access_token.clone(),
                "user_type" => self.account.user_type.clone(),
                "user_properties" => "{}".to_string(),
                #[cfg(windows)]      "classpath_separator" => ";".to_string(),
                #[cfg(not(windows))] "classpath_separator" => ":".to_string(),
                "classpath" => classpath.clone(),
                "natives_directory" => natives_dir.display().to_string(),
                "game_directory" => game_dir.display().to_string(),
                "assets_root" => assets_dir.display().to_string(),
                "assets_index_name" => return manifest.asset_index.as_ref()
                    .map(|index| index.id.clone()),
                "library_directory" => libraries_dir.display().to_string(),
                "launcher_name" => self.launcher_name().to_string(),
                "launcher_version" => self.launcher_version().to_string(),
                "version_name" => manifest.id.clone(),
                "version_type" => return manifest.version_type
                    .map(|t| t.as_str().to_string()),
                _ => return None,
            })
        };

        replace_strings_args(&mut jvm_args, repl_arg);
        replace_strings_args(&mut game_args, repl_arg);

        Ok(Instance {
            version: manifest.id.clone(),
            main_class: manifest.main_class.clone(),
            classpath,
            jvm_args,
            game_args,
            natives_dir,
            game_dir,
            jvm_file: self.jvm_file.clone(),
        })

    }

}

/// Return the default main directory, none if no home directory can be found.
pub fn default_main_dir() -> Option<&'static Path> {

    static MAIN_DIR: LazyLock<Option<PathBuf>> = LazyLock::new(|| {
        if cfg!(target_os = "windows") {
            dirs::data_dir().map(|dir| dir.joined(".minecraft"))
        } else if cfg!(target_os = "macos") {
            dirs::data_dir().map(|dir| dir.joined("minecraft"))
        } else {
            dirs::home_dir().map(|dir| dir.joined(".minecraft"))
        }
    });

    MAIN_DIR.as_deref()

}

/// The launch class path of a manifest: its selected libraries, in order, and then the
/// client jar of the version.
pub fn classpath_files(manifest: &Manifest, layout: &Layout) -> Vec<PathBuf> {
    manifest.select_libraries()
        .into_iter()
        .map(|lib| layout.library_file(lib))
        .chain(std::iter::once(layout.client_file(&manifest.id)))
        .collect()
}

/// Join class path files with the platform separator.
pub fn join_classpath(files: &[PathBuf]) -> Result<String> {
    env::join_paths(files)
        .map(|joined| joined.to_string_lossy().into_owned())
        .map_err(|_| Error::Classpath)
}

fn natives_dir(layout: &Layout, id: &str) -> PathBuf {
    layout.version_dir(id).joined("natives")
}

fn canonicalize_or_keep(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// The state shared by all stages, each stage stores its output for later ones.
struct Pipeline {
    config: Installer,
    platform: Platform,
    resolver: ManifestResolver,
    layout: Layout,
    downloader: Downloader,
    handler: Arc<dyn Handler>,
    installer_dir: PathBuf,
    manifest: Mutex<Option<Manifest>>,
    asset_index: Mutex<Option<AssetIndex>>,
    profile: Mutex<Option<InstallProfile>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Pipeline {

    fn manifest(&self) -> Result<Manifest> {
        lock(&self.manifest).clone().ok_or(Error::MissingStage { stage: "resolve" })
    }

    fn profile(&self) -> Option<InstallProfile> {
        lock(&self.profile).clone()
    }

    fn builder(&self) -> ArtifactGraphBuilder<'_> {
        ArtifactGraphBuilder::new(&self.layout)
            .with_resources_url(&self.config.resources_url)
    }

    /// Download a single item with the skip policy, outside of any progress.
    async fn download_one(&self, item: &DownloadItem, policy: ReplacePolicy, ctx: &TaskContext) -> Result<()> {
        let progress = ProgressAggregator::detached().create_channel(1.0);
        self.downloader.download(item, policy, &progress, ctx.cancel()).await?;
        Ok(())
    }

    async fn fetch_version_list(&self, ctx: &TaskContext) -> Result<VersionList> {
        let file = self.config.versions_dir.join(VERSION_LIST_FILE);
        let item = DownloadItem::new(&self.config.version_list_url, &file);
        self.download_one(&item, ReplacePolicy::Replace, ctx).await?;
        let raw = fs::read(&file).map_err(|e| Error::new_io_file(e, &file))?;
        Ok(VersionList::parse(&raw, &file.display().to_string())?)
    }

    async fn resolve(self: Arc<Self>, ctx: TaskContext) -> Result<()> {

        let mut version = self.config.version.clone();

        if let Some(installer_file) = &self.config.modloader {

            let installer_file = installer_file.clone();
            let work_dir = self.installer_dir.clone();
            let libraries_dir = self.config.libraries_dir.clone();
            let versions_dir = self.config.versions_dir.clone();

            let profile = tokio::task::spawn_blocking(move || {
                processor::unpack_installer(&installer_file, &work_dir, &libraries_dir, &versions_dir)
            }).await.map_err(|e| Error::new_io(io::Error::other(e), "unpack installer"))??;

            version = profile.version.clone();
            self.handler.on_event(Event::InstallerUnpacked { version: &version, dir: &self.installer_dir });
            *lock(&self.profile) = Some(profile);

        }

        let mut version_list = None;

        if matches!(version.as_str(), "release" | "snapshot") {
            let list = self.fetch_version_list(&ctx).await?;
            version = list.find(&version)
                .map(|entry| entry.id.clone())
                .ok_or_else(|| Error::VersionNotFound { id: version.clone() })?;
            version_list = Some(list);
        }

        let mut fetched = HashSet::new();
        let manifest = loop {

            ctx.cancel().check().map_err(|_| Error::Cancelled)?;

            let id = match self.resolver.load(&version) {
                Ok(manifest) => break manifest,
                Err(manifest::Error::Missing { id, .. }) if fetched.insert(id.clone()) => id,
                Err(e) => return Err(e.into()),
            };

            self.handler.on_event(Event::ManifestFetching { id: &id });

            let list = match version_list.take() {
                Some(list) => list,
                None => self.fetch_version_list(&ctx).await?,
            };

            let item = list.find(&id)
                .map(|entry| DownloadItem::new(&entry.url, self.resolver.manifest_file(&entry.id))
                    .with_sha1(entry.sha1))
                .ok_or_else(|| Error::VersionNotFound { id: id.clone() })?;

            version_list = Some(list);
            self.download_one(&item, ReplacePolicy::Skip, &ctx).await?;
            debug!(id, "fetched missing manifest");

        };

        self.handler.on_event(Event::ManifestLoaded { manifest: &manifest });
        *lock(&self.manifest) = Some(manifest);
        Ok(())

    }

    async fn remap_natives(self: Arc<Self>, _ctx: TaskContext) -> Result<()> {

        let manifest = self.manifest()?;
        let mapper = NativeLibraryMapper::bundled()?;
        let remapped = mapper.remap(&manifest, self.platform.arch);

        let count = manifest.libraries.iter()
            .zip(&remapped.libraries)
            .filter(|(before, after)| before != after)
            .count();

        self.handler.on_event(Event::NativesRemapped { count });

        // Remapping keeps the asset index reference read by the sibling stage.
        *lock(&self.manifest) = Some(remapped);
        Ok(())

    }

    async fn load_asset_index(self: Arc<Self>, ctx: TaskContext) -> Result<()> {

        let manifest = self.manifest()?;
        let Some(item) = self.builder().asset_index_item(&manifest) else {
            return Ok(());
        };

        self.download_one(&item, ReplacePolicy::Skip, &ctx).await?;

        let file = item.file.clone();
        let index = tokio::task::spawn_blocking(move || AssetIndex::load(&file))
            .await
            .map_err(|e| Error::new_io(io::Error::other(e), "load asset index"))??;

        if let Some(index_ref) = &manifest.asset_index {
            self.handler.on_event(Event::AssetIndexLoaded { id: &index_ref.id, count: index.objects.len() });
        }

        *lock(&self.asset_index) = Some(index);
        Ok(())

    }

    async fn download_batch(&self, ctx: &TaskContext, items: Vec<DownloadItem>) -> Result<()> {

        let progress = ctx.progress().clone();
        let handler = Arc::clone(&self.handler);
        let name = ctx.name().to_string();

        self.downloader.download_all(items, self.config.concurrency, self.config.replace_policy, move |value: f64| {
            progress.set(value);
            handler.on_event(Event::DownloadProgress { task: &name, progress: value });
        }, ctx.cancel()).await?;

        Ok(())

    }

    async fn download_libraries(self: Arc<Self>, ctx: TaskContext) -> Result<()> {

        let manifest = self.manifest()?;
        let builder = self.builder();
        let mut graph = builder.build(&manifest, None);

        if let Some(profile) = self.profile() {
            let libraries = profile.libraries(&self.resolver)?;
            builder.push_libraries(&mut graph, ArtifactKind::Library, &libraries);
        }

        let libraries = graph.iter().filter(|(kind, _)| *kind == ArtifactKind::Library).count();
        let natives = graph.iter().filter(|(kind, _)| *kind == ArtifactKind::Native).count();
        self.handler.on_event(Event::LibrariesSelected { libraries, natives });

        self.download_batch(&ctx, graph.into_items()).await

    }

    async fn download_assets(self: Arc<Self>, ctx: TaskContext) -> Result<()> {

        let index = lock(&self.asset_index).clone();
        let Some(index) = index else {
            return Ok(());
        };

        let mut graph = ArtifactGraph::default();
        self.builder().push_assets(&mut graph, &index);
        self.download_batch(&ctx, graph.into_items()).await

    }

    async fn extract_natives(self: Arc<Self>, _ctx: TaskContext) -> Result<()> {

        let manifest = self.manifest()?;
        let archives = manifest.select_natives()
            .into_iter()
            .filter(|lib| lib.artifact.is_some())
            .map(|lib| self.layout.library_file(lib))
            .collect::<Vec<_>>();

        let dest_dir = natives_dir(&self.layout, &manifest.id);
        let extraction = {
            let dest_dir = dest_dir.clone();
            tokio::task::spawn_blocking(move || natives::extract_natives(&archives, &dest_dir))
                .await
                .map_err(|e| Error::new_io(io::Error::other(e), "extract natives"))??
        };

        for file in &extraction.missing {
            self.handler.on_event(Event::NativeMissing { file });
        }

        self.handler.on_event(Event::NativesExtracted { dir: &dest_dir, count: extraction.extracted.len() });
        Ok(())

    }

    async fn run_processors(self: Arc<Self>, ctx: TaskContext) -> Result<()> {

        let Some(profile) = self.profile() else {
            return Ok(());
        };
        let Some(installer_file) = self.config.modloader.clone() else {
            return Ok(());
        };

        let manifest = self.manifest()?;
        let env = ProcessorEnv {
            java_file: self.config.jvm_file.clone(),
            root_dir: self.config.main_dir.clone(),
            libraries_dir: self.config.libraries_dir.clone(),
            installer_file,
            installer_dir: self.installer_dir.clone(),
            minecraft_jar: self.layout.client_file(&manifest.id),
        };

        let values = ValueDictionary::from_profile(&profile, &env)?;
        let runner = ExternalProcessorRunner::new(env);

        let steps = profile.steps.iter()
            .enumerate()
            .filter(|(_, step)| step.is_client())
            .collect::<Vec<_>>();

        for (done, &(index, step)) in steps.iter().enumerate() {

            self.handler.on_event(Event::ProcessorStarted { index, jar: &step.jar });

            match runner.run_step(index, step, &values, ctx.cancel()).await? {
                StepOutcome::Skipped => self.handler.on_event(Event::ProcessorSkipped { index, jar: &step.jar }),
                StepOutcome::Ran => self.handler.on_event(Event::ProcessorFinished { index, jar: &step.jar }),
            }

            ctx.progress().set((done + 1) as f64 / steps.len() as f64);

        }

        Ok(())

    }

}

/// An installed version, ready to be launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub version: String,
    pub main_class: String,
    /// The joined class path.
    pub classpath: String,
    /// JVM arguments, before the main class.
    pub jvm_args: Vec<String>,
    /// Game arguments, after the main class.
    pub game_args: Vec<String>,
    pub natives_dir: PathBuf,
    /// Working directory of the game.
    pub game_dir: PathBuf,
    pub jvm_file: PathBuf,
}

impl Instance {

    /// Create a command to launch the game.
    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.jvm_file);
        command
            .current_dir(&self.game_dir)
            .args(&self.jvm_args)
            .arg(&self.main_class)
            .args(&self.game_args);
        command
    }

}

/// Apply arguments replacement for each string, explained in [`replace_string_args`].
fn replace_strings_args<F>(ss: &mut [String], mut func: F)
where
    F: FnMut(&str) -> Option<String>,
{
    for s in ss {
        replace_string_args(s, &mut func);
    }
}

/// Given a string buffer, search for each argument of the form `${arg}`, give its name
/// to the given closure and if some value is returned, replace it by this value.
fn replace_string_args<F>(s: &mut String, mut func: F)
where
    F: FnMut(&str) -> Option<String>,
{

    // Everything before the cursor has already been checked.
    let mut cursor = 0;

    while let Some(open_idx) = s[cursor..].find("${") {

        let open_idx = cursor + open_idx;
        let Some(close_idx) = s[open_idx + 2..].find('}') else { break };
        let close_idx = open_idx + 2 + close_idx + 1;
        cursor = close_idx;

        if let Some(value) = func(&s[open_idx + 2..close_idx - 1]) {
            s.replace_range(open_idx..close_idx, &value);
            cursor = open_idx + value.len();
        }

    }

}

/// A handler of installation events, called from any stage.
pub trait Handler: Send + Sync {
    /// Handle a single event.
    fn on_event(&self, event: Event<'_>);
}

impl Handler for () {
    fn on_event(&self, event: Event<'_>) {
        let _ = event;
    }
}

impl<H: Handler + ?Sized> Handler for &H {
    #[inline]
    fn on_event(&self, event: Event<'_>) {
        (**self).on_event(event)
    }
}

impl<H: Handler + ?Sized> Handler for Arc<H> {
    #[inline]
    fn on_event(&self, event: Event<'_>) {
        (**self).on_event(event)
    }
}

impl<H: Handler + ?Sized> Handler for Box<H> {
    #[inline]
    fn on_event(&self, event: Event<'_>) {
        (**self).on_event(event)
    }
}

/// An event of the installation.
#[derive(Debug)]
#[non_exhaustive]
pub enum Event<'a> {
    /// The mod loader installer has been unpacked, its version will be installed.
    InstallerUnpacked { version: &'a str, dir: &'a Path },
    /// The manifest of the given version is missing and is being fetched.
    ManifestFetching { id: &'a str },
    /// The manifest has been resolved with its whole hierarchy.
    ManifestLoaded { manifest: &'a Manifest },
    /// Libraries of the manifest have been remapped for the target architecture.
    NativesRemapped { count: usize },
    AssetIndexLoaded { id: &'a str, count: usize },
    /// Libraries and natives to download have been selected.
    LibrariesSelected { libraries: usize, natives: usize },
    /// Progress of a download batch, reported on a fixed interval.
    DownloadProgress { task: &'a str, progress: f64 },
    /// Total progress of the installation, reported on a fixed interval.
    Progress { total: f64 },
    /// A native archive was missing, it has been skipped.
    NativeMissing { file: &'a Path },
    NativesExtracted { dir: &'a Path, count: usize },
    ProcessorStarted { index: usize, jar: &'a Gav },
    /// The processor outputs were already valid.
    ProcessorSkipped { index: usize, jar: &'a Gav },
    ProcessorFinished { index: usize, jar: &'a Gav },
    /// The installation is complete.
    Installed { instance: &'a Instance },
}

/// The installation failed.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The current platform isn't supported and none has been set.
    #[error("unsupported platform")]
    UnsupportedPlatform,
    /// The version was not found locally nor in the version list.
    #[error("version not found: {id}")]
    VersionNotFound {
        id: String,
    },
    #[error("invalid class path")]
    Classpath,
    /// A stage is missing the output of the given earlier stage.
    #[error("missing output of stage: {stage}")]
    MissingStage {
        stage: &'static str,
    },
    #[error("cancelled")]
    Cancelled,
    #[error("http client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("manifest: {0}")]
    Manifest(#[from] manifest::Error),
    #[error("asset index: {0}")]
    Artifact(#[from] artifact::Error),
    #[error("download: {0}")]
    Download(#[from] download::Error),
    #[error("natives: {0}")]
    Natives(#[from] natives::Error),
    #[error("processor: {0}")]
    Processor(#[from] processor::Error),
    #[error("task: {0}")]
    Task(task::Error),
    #[error("io: {error} @ {origin}")]
    Io {
        #[source]
        error: io::Error,
        origin: Box<str>,
    },
}

/// Type alias for a result with the install error type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {

    #[inline]
    pub(crate) fn new_io(error: io::Error, origin: impl Into<Box<str>>) -> Self {
        Self::Io { error, origin: origin.into() }
    }

    #[inline]
    pub(crate) fn new_io_file(error: io::Error, file: impl AsRef<Path>) -> Self {
        Self::new_io(error, file.as_ref().display().to_string())
    }

    /// Unwrap the error of a failed stage, if it's an installation error.
    fn from_task(error: task::Error) -> Self {
        match error {
            task::Error::Failed { name, source } => match source.downcast::<Error>() {
                Ok(error) => *error,
                Err(source) => Self::Task(task::Error::Failed { name, source }),
            },
            task::Error::Cancelled => Self::Cancelled,
            error => Self::Task(error),
        }
    }

}


#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn replace_string_args() {

        use super::replace_string_args;

        let mut buf = "${begin}foo${middle}bar${end}".to_string();
        replace_string_args(&mut buf, |_arg| None);
        assert_eq!(buf, "${begin}foo${middle}bar${end}");
        replace_string_args(&mut buf, |arg| if arg == "middle" { Some(".:.".to_string()) } else { None });
        assert_eq!(buf, "${begin}foo.:.bar${end}");
        replace_string_args(&mut buf, |arg| Some(format!("[  {arg}  ]")));
        assert_eq!(buf, "[  begin  ]foo.:.bar[  end  ]");

        // Replaced values are never substituted again.
        let mut buf = "${a}${b}".to_string();
        replace_string_args(&mut buf, |arg| Some(format!("${{{arg}}}")));
        assert_eq!(buf, "${a}${b}");

    }

    #[test]
    fn offline_account() {
        let a = Account::offline("Notch");
        let b = Account::offline("Notch");
        assert_eq!(a.uuid, b.uuid);
        assert_ne!(a.uuid, Account::offline("jeb_").uuid);
        assert_eq!(a.user_type, "legacy");
    }

    #[test]
    fn installer_dirs() {
        let mut installer = Installer::new("1.21");
        installer.set_main_dir("/mc").set_concurrency(0);
        assert_eq!(installer.versions_dir(), Path::new("/mc/versions"));
        assert_eq!(installer.libraries_dir(), Path::new("/mc/libraries"));
        assert_eq!(installer.assets_dir(), Path::new("/mc/assets"));
        assert_eq!(installer.concurrency(), 1);
        assert_eq!(installer.launcher_name(), "craftpipe");
    }

}

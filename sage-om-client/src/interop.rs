//! Capability generator: acquires a typed binding for the installed
//! Objets Métiers component.
//!
//! The binding is produced by an external type-library importer and cached
//! for the process lifetime. Generated files are keyed by the component's
//! file version so an upgrade produces a new binding next to the old one.
//! Sessions themselves are typed from the type library embedded in the
//! component, see [`GenerationResult::type_library`].

use crate::errors::{SageError, SageResult};
use crate::version::{
    COMPONENT_BINARY, FileVersionProbe, VersionProbe, default_component_locations,
    sanitize_version,
};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

#[cfg(any(test, feature = "test-support"))]
use mockall::automock;

/// File name of the external binding generator.
pub const GENERATOR_BINARY: &str = "TlbImp.exe";

/// Bound on the generator subprocess.
pub const DEFAULT_GENERATOR_TIMEOUT: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Windows SDK locations of the importer, probed in order.
pub fn default_generator_locations() -> Vec<PathBuf> {
    [
        r"C:\Program Files (x86)\Microsoft SDKs\Windows\v10.0A\bin\NETFX 4.8 Tools",
        r"C:\Program Files (x86)\Microsoft SDKs\Windows\v10.0A\bin\NETFX 4.7.2 Tools",
        r"C:\Program Files (x86)\Microsoft SDKs\Windows\v10.0A\bin\NETFX 4.7.1 Tools",
        r"C:\Program Files (x86)\Microsoft SDKs\Windows\v10.0A\bin\NETFX 4.7 Tools",
        r"C:\Program Files (x86)\Microsoft SDKs\Windows\v10.0A\bin\NETFX 4.6.2 Tools",
        r"C:\Program Files (x86)\Microsoft SDKs\Windows\v10.0A\bin\NETFX 4.6.1 Tools",
        r"C:\Program Files (x86)\Microsoft SDKs\Windows\v8.1A\bin\NETFX 4.5.1 Tools",
        r"C:\Program Files (x86)\Microsoft SDKs\Windows\v8.0A\bin\NETFX 4.0 Tools",
    ]
    .into_iter()
    .map(|dir| Path::new(dir).join(GENERATOR_BINARY))
    .collect()
}

/// Where and how bindings are produced.
#[derive(Debug, Clone)]
pub struct InteropSettings {
    pub component_locations: Vec<PathBuf>,
    pub generator_locations: Vec<PathBuf>,
    /// Directory receiving generated bindings.
    pub output_dir: PathBuf,
    /// Generator arguments. `{component}` and `{output}` are substituted.
    pub generator_args: Vec<String>,
    pub timeout: Duration,
}

impl Default for InteropSettings {
    fn default() -> Self {
        let output_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            component_locations: default_component_locations(),
            generator_locations: default_generator_locations(),
            output_dir,
            generator_args: vec![
                "{component}".into(),
                "/out:{output}".into(),
                "/namespace:Sage100".into(),
                "/silent".into(),
            ],
            timeout: DEFAULT_GENERATOR_TIMEOUT,
        }
    }
}

impl InteropSettings {
    /// Deterministic binding path for a component version.
    pub fn binding_path(&self, version: Option<&str>) -> PathBuf {
        self.output_dir
            .join(format!("Objets100cLib_{}.dll", sanitize_version(version)))
    }

    fn render_args(&self, component: &Path, output: &Path) -> Vec<String> {
        let component = component.display().to_string();
        let output = output.display().to_string();
        self.generator_args
            .iter()
            .map(|arg| {
                arg.replace("{component}", &component)
                    .replace("{output}", &output)
            })
            .collect()
    }
}

/// Outcome of a binding acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub success: bool,
    pub message: String,
    pub interop_path: Option<PathBuf>,
    pub component_path: Option<PathBuf>,
    pub component_version: Option<String>,
}

impl GenerationResult {
    /// File a typed session is loaded from. The component embeds its own
    /// type library; the generated binding only marks that the version was
    /// acquired.
    pub fn type_library(&self) -> Option<&Path> {
        if !self.success || self.interop_path.is_none() {
            return None;
        }
        self.component_path.as_deref()
    }

    fn failure(err: &SageError) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            interop_path: None,
            component_path: None,
            component_version: None,
        }
    }
}

/// Snapshot of the generator's view of the machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InteropStatus {
    pub component_path: Option<PathBuf>,
    pub component_version: Option<String>,
    pub expected_path: Option<PathBuf>,
    pub binding_exists: bool,
    pub cached_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
struct CachedBinding {
    binding: PathBuf,
    component: PathBuf,
    version: Option<String>,
    component_modified: Option<SystemTime>,
}

impl CachedBinding {
    fn new(binding: PathBuf, component: PathBuf, version: Option<String>) -> Self {
        let component_modified = modified(&component);
        Self {
            binding,
            component,
            version,
            component_modified,
        }
    }

    /// Binding still on disk and the component it was built from unchanged.
    fn is_current(&self) -> bool {
        self.binding.is_file() && modified(&self.component) == self.component_modified
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Last successful binding, shared by every generator using it.
///
/// The lock also serializes acquisitions: at most one cache check or
/// generation runs at a time.
#[derive(Debug, Default)]
pub struct InteropCache {
    entry: Mutex<Option<CachedBinding>>,
}

static PROCESS_CACHE: LazyLock<Arc<InteropCache>> = LazyLock::new(|| Arc::new(InteropCache::default()));

impl InteropCache {
    /// A private cache, mainly for tests and tools.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The process-wide cache.
    pub fn process() -> Arc<Self> {
        Arc::clone(&PROCESS_CACHE)
    }

    fn lock(&self) -> MutexGuard<'_, Option<CachedBinding>> {
        self.entry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cached_path(&self) -> Option<PathBuf> {
        self.lock().as_ref().map(|c| c.binding.clone())
    }
}

/// Source of typed bindings for connections.
#[cfg_attr(any(test, feature = "test-support"), automock)]
pub trait InteropProvider: Send + Sync {
    fn generate_or_get(&self) -> GenerationResult;
}

impl<P: VersionProbe> InteropProvider for InteropGenerator<P> {
    fn generate_or_get(&self) -> GenerationResult {
        InteropGenerator::generate_or_get(self)
    }
}

/// Finds the installed component and produces or reuses its typed binding.
pub struct InteropGenerator<P: VersionProbe = FileVersionProbe> {
    settings: InteropSettings,
    probe: P,
    cache: Arc<InteropCache>,
}

impl Default for InteropGenerator<FileVersionProbe> {
    fn default() -> Self {
        Self::new(InteropSettings::default(), FileVersionProbe)
    }
}

impl<P: VersionProbe> InteropGenerator<P> {
    /// Generator backed by the process-wide cache.
    pub fn new(settings: InteropSettings, probe: P) -> Self {
        Self::with_cache(settings, probe, InteropCache::process())
    }

    pub fn with_cache(settings: InteropSettings, probe: P, cache: Arc<InteropCache>) -> Self {
        Self {
            settings,
            probe,
            cache,
        }
    }

    pub fn settings(&self) -> &InteropSettings {
        &self.settings
    }

    /// Returns a usable binding, generating it if needed.
    ///
    /// Never fails: every error is folded into `success == false`.
    pub fn generate_or_get(&self) -> GenerationResult {
        let _span = tracing::info_span!("interop.generate_or_get").entered();
        let mut cached = self.cache.lock();
        match self.acquire(&mut cached) {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "Interop acquisition failed");
                GenerationResult::failure(&e)
            }
        }
    }

    fn acquire(&self, cached: &mut Option<CachedBinding>) -> SageResult<GenerationResult> {
        if let Some(entry) = cached.as_ref() {
            if entry.is_current() {
                tracing::debug!(interop_path = %entry.binding.display(), "Interop served from cache");
                return Ok(GenerationResult {
                    success: true,
                    message: "Interop served from cache".into(),
                    interop_path: Some(entry.binding.clone()),
                    component_path: Some(entry.component.clone()),
                    component_version: entry.version.clone(),
                });
            }
            tracing::info!(interop_path = %entry.binding.display(), "Cached interop is stale; discarding");
            *cached = None;
        }

        let component = self.locate_component()?;
        let version = self.component_version(&component);
        tracing::info!(
            component_path = %component.display(),
            version = version.as_deref().unwrap_or("unknown"),
            "Sage COM component found"
        );

        let interop_path = self.settings.binding_path(version.as_deref());
        if interop_path.is_file() {
            tracing::debug!(interop_path = %interop_path.display(), "Existing interop for this version");
            *cached = Some(CachedBinding::new(interop_path.clone(), component.clone(), version.clone()));
            return Ok(GenerationResult {
                success: true,
                message: format!("Existing interop for version {}", display_version(version.as_deref())),
                interop_path: Some(interop_path),
                component_path: Some(component),
                component_version: version,
            });
        }

        self.generate(&component, &interop_path, version.as_deref())?;
        *cached = Some(CachedBinding::new(interop_path.clone(), component.clone(), version.clone()));
        Ok(GenerationResult {
            success: true,
            message: format!("Interop generated for version {}", display_version(version.as_deref())),
            interop_path: Some(interop_path),
            component_path: Some(component),
            component_version: version,
        })
    }

    fn generate(&self, component: &Path, interop_path: &Path, version: Option<&str>) -> SageResult<()> {
        tracing::info!(version = display_version(version), "Generating interop");

        let tool = first_existing(&self.settings.generator_locations).ok_or_else(|| {
            SageError::ToolNotFound {
                tool: GENERATOR_BINARY.into(),
                probed: self.settings.generator_locations.clone(),
            }
        })?;

        let out_dir = interop_path.parent().unwrap_or(&self.settings.output_dir);
        ensure_writable(out_dir)?;

        let args = self.settings.render_args(component, interop_path);
        tracing::debug!(tool = %tool.display(), ?args, "Running interop generator");
        let run = run_bounded(&tool, &args, out_dir, self.settings.timeout)?;

        if !run.status.success() {
            let code = run
                .status
                .code()
                .map_or_else(|| "signal".to_owned(), |c| c.to_string());
            tracing::error!(exit_code = %code, stderr = %run.stderr.trim(), "Interop generator failed");
            return Err(SageError::Generation(format!(
                "{GENERATOR_BINARY} exited with code {code}: {}",
                run.stderr.trim()
            )));
        }
        if !interop_path.is_file() {
            return Err(SageError::Generation(format!(
                "{} was not produced",
                interop_path.display()
            )));
        }

        tracing::info!(interop_path = %interop_path.display(), "Interop generated");
        Ok(())
    }

    fn locate_component(&self) -> SageResult<PathBuf> {
        first_existing(&self.settings.component_locations).ok_or_else(|| {
            SageError::ComponentNotFound {
                binary: COMPONENT_BINARY.into(),
                probed: self.settings.component_locations.clone(),
            }
        })
    }

    fn component_version(&self, component: &Path) -> Option<String> {
        self.probe.read(component).and_then(|info| info.file_version)
    }

    /// Current component, expected binding and cache state. Read-only.
    pub fn status(&self) -> InteropStatus {
        let component_path = first_existing(&self.settings.component_locations);
        let component_version = component_path
            .as_deref()
            .and_then(|p| self.component_version(p));
        let expected_path = component_path
            .as_ref()
            .map(|_| self.settings.binding_path(component_version.as_deref()));
        InteropStatus {
            binding_exists: expected_path.as_deref().is_some_and(Path::is_file),
            component_path,
            component_version,
            expected_path,
            cached_path: self.cache.cached_path(),
        }
    }

    /// Forgets the cached binding so the next call re-resolves it. Files on
    /// disk are kept.
    pub fn invalidate(&self) {
        let mut cached = self.cache.lock();
        if let Some(entry) = cached.take() {
            tracing::info!(interop_path = %entry.binding.display(), "Interop cache invalidated");
        }
    }
}

fn display_version(version: Option<&str>) -> &str {
    version.unwrap_or("unknown")
}

fn first_existing(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|p| p.is_file()).cloned()
}

/// Probe-writes then removes a throwaway file.
fn ensure_writable(dir: &Path) -> SageResult<()> {
    let probe = dir.join(format!("test_{}.tmp", uuid::Uuid::new_v4()));
    std::fs::write(&probe, b"test")
        .and_then(|()| std::fs::remove_file(&probe))
        .map_err(|e| {
            tracing::warn!(dir = %dir.display(), error = %e, "Output directory is not writable");
            SageError::PermissionDenied(dir.to_path_buf())
        })
}

struct ProcessRun {
    status: ExitStatus,
    stderr: String,
}

/// Runs `tool` and waits at most `timeout`, killing it past the deadline.
fn run_bounded(tool: &Path, args: &[String], cwd: &Path, timeout: Duration) -> SageResult<ProcessRun> {
    let mut child = Command::new(tool)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| SageError::Generation(format!("cannot start {}: {e}", tool.display())))?;

    // Drain both pipes off-thread so a chatty child cannot block on a full pipe.
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = wait_with_deadline(&mut child, timeout)?;
    let stdout = join_drain(stdout);
    let stderr = join_drain(stderr);

    let Some(status) = status else {
        return Err(SageError::Timeout(format!(
            "{} did not finish within {}s",
            tool.display(),
            timeout.as_secs_f32()
        )));
    };
    tracing::trace!(stdout = %stdout.trim(), "Interop generator output");
    Ok(ProcessRun { status, stderr })
}

fn wait_with_deadline(child: &mut Child, timeout: Duration) -> SageResult<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            tracing::warn!(pid = child.id(), "Interop generator timed out; killing it");
            if let Err(e) = child.kill() {
                tracing::debug!(error = %e, "kill after timeout failed");
            }
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            if let Err(e) = pipe.read_to_end(&mut buf) {
                tracing::debug!(error = %e, "pipe read failed");
            }
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join_drain(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

// remnant-core/src/collect/windows.rs
//
// Windows-family collector: installed identities from the uninstall
// registry; candidates from leftover uninstall keys, dangling SharedDLLs
// reference records, service definitions whose binary is gone, and
// execution-trace (prefetch-style) records.
use std::path::{Path, PathBuf};
use std::process::Command;

use lazy_static::lazy_static;
use regex::Regex;
use remnant_common::config::CollectorId;
use remnant_common::model::{
    ArtifactCandidate, ArtifactKind, EvidenceSource, InstalledIdentity, Location, PlatformFamily,
};
use tracing::debug;
use walkdir::WalkDir;

use super::{CandidateBatch, Collector, ScanSignal, StoreError, StoreResult};

const UNINSTALL_KEY: &str = r"HKLM\SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall";
const SHARED_DLLS_KEY: &str = r"HKLM\SOFTWARE\Microsoft\Windows\CurrentVersion\SharedDLLs";
const SERVICES_KEY: &str = r"HKLM\SYSTEM\CurrentControlSet\Services";
const PREFETCH_DIR: &str = r"C:\Windows\Prefetch";

lazy_static! {
    static ref PRODUCT_GUID_RE: Regex =
        Regex::new(r"^\{[0-9A-Fa-f]{8}(-[0-9A-Fa-f]{4}){3}-[0-9A-Fa-f]{12}\}$").unwrap();
}

#[derive(Debug, Clone)]
pub struct UninstallEntry {
    /// Registry key name: product GUID or vendor-chosen id.
    pub key: String,
    pub display_name: Option<String>,
    pub publisher: Option<String>,
    pub install_location: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SharedDllRef {
    pub path: PathBuf,
    pub ref_count: u32,
}

#[derive(Debug, Clone)]
pub struct ServiceDef {
    pub name: String,
    pub image_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct TraceRecord {
    /// Record name inside the trace store (e.g. prefetch file name).
    pub record: String,
    /// Executable the trace refers to.
    pub executable: String,
    /// Resolved target path when the store exposes one.
    pub target: Option<PathBuf>,
}

/// Read-only registry/trace query capability.
pub trait RegistryProvider: Send + Sync {
    fn uninstall_entries(&self) -> StoreResult<Vec<UninstallEntry>>;
    fn shared_dll_refs(&self) -> StoreResult<Vec<SharedDllRef>>;
    fn service_definitions(&self) -> StoreResult<Vec<ServiceDef>>;
    fn execution_traces(&self) -> StoreResult<Vec<TraceRecord>>;
}

/// System-backed provider shelling out to `reg query`; execution traces
/// come from the prefetch directory listing.
#[derive(Debug, Default)]
pub struct SystemRegistry;

impl SystemRegistry {
    fn reg_query(args: &[&str]) -> StoreResult<String> {
        let output = Command::new("reg")
            .arg("query")
            .args(args)
            .output()
            .map_err(|e| StoreError::Unavailable(format!("reg.exe not runnable: {e}")))?;
        if !output.status.success() {
            return Err(StoreError::Unavailable(format!(
                "reg query {} exited with {}",
                args.first().unwrap_or(&""),
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Find the traced executable on the live filesystem. Trace records
    /// carry only the image name, so probe the windows directories
    /// directly and the program-files trees a few levels deep.
    fn resolve_executable(executable: &str) -> Option<PathBuf> {
        let wanted = executable.to_lowercase();
        for dir in ["C:\\Windows\\System32", "C:\\Windows"] {
            let direct = Path::new(dir).join(executable);
            if direct.is_file() {
                return Some(direct);
            }
        }
        for root in ["C:\\Program Files", "C:\\Program Files (x86)"] {
            for entry in WalkDir::new(root)
                .min_depth(1)
                .max_depth(3)
                .into_iter()
                .flatten()
            {
                if entry.file_type().is_file()
                    && entry.file_name().to_string_lossy().to_lowercase() == wanted
                {
                    return Some(entry.into_path());
                }
            }
        }
        None
    }
}

impl RegistryProvider for SystemRegistry {
    fn uninstall_entries(&self) -> StoreResult<Vec<UninstallEntry>> {
        let raw = Self::reg_query(&[UNINSTALL_KEY, "/s"])?;
        Ok(parse_uninstall_entries(&raw))
    }

    fn shared_dll_refs(&self) -> StoreResult<Vec<SharedDllRef>> {
        let raw = Self::reg_query(&[SHARED_DLLS_KEY])?;
        Ok(parse_shared_dlls(&raw))
    }

    fn service_definitions(&self) -> StoreResult<Vec<ServiceDef>> {
        let raw = Self::reg_query(&[SERVICES_KEY, "/s", "/v", "ImagePath"])?;
        Ok(parse_service_definitions(&raw))
    }

    fn execution_traces(&self) -> StoreResult<Vec<TraceRecord>> {
        let dir = Path::new(PREFETCH_DIR);
        let entries = std::fs::read_dir(dir)
            .map_err(|e| StoreError::Unavailable(format!("{PREFETCH_DIR} not readable: {e}")))?;
        let mut records = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.to_lowercase().ends_with(".pf") {
                continue;
            }
            // Prefetch names look like APP.EXE-1A2B3C4D.pf.
            let executable = name
                .rsplit_once('-')
                .map(|(exe, _)| exe.to_string())
                .unwrap_or_else(|| name.clone());
            let target = Self::resolve_executable(&executable);
            records.push(TraceRecord {
                record: name,
                executable,
                target,
            });
        }
        Ok(records)
    }
}

/// Parse `reg query <Uninstall> /s` output: key header lines followed by
/// indented `name  REG_TYPE  value` triples.
fn parse_uninstall_entries(raw: &str) -> Vec<UninstallEntry> {
    let mut entries = Vec::new();
    let mut current: Option<UninstallEntry> = None;
    for line in raw.lines() {
        if line.starts_with("HK") {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            let key = line.rsplit('\\').next().unwrap_or(line).trim().to_string();
            // The root key itself produces a header too; skip it.
            if line.trim_end().ends_with("Uninstall") {
                current = None;
            } else {
                current = Some(UninstallEntry {
                    key,
                    display_name: None,
                    publisher: None,
                    install_location: None,
                });
            }
            continue;
        }
        let Some(entry) = current.as_mut() else {
            continue;
        };
        if let Some((name, value)) = parse_reg_value(line) {
            match name.as_str() {
                "DisplayName" => entry.display_name = Some(value),
                "Publisher" => entry.publisher = Some(value),
                "InstallLocation" if !value.is_empty() => {
                    entry.install_location = Some(PathBuf::from(value))
                }
                _ => {}
            }
        }
    }
    if let Some(entry) = current.take() {
        entries.push(entry);
    }
    entries
}

fn parse_shared_dlls(raw: &str) -> Vec<SharedDllRef> {
    let mut refs = Vec::new();
    for line in raw.lines() {
        let trimmed = line.trim();
        if let Some(idx) = trimmed.find("REG_DWORD") {
            let path = trimmed[..idx].trim();
            let count_str = trimmed[idx + "REG_DWORD".len()..].trim();
            let ref_count = count_str
                .strip_prefix("0x")
                .and_then(|h| u32::from_str_radix(h, 16).ok())
                .or_else(|| count_str.parse().ok())
                .unwrap_or(0);
            if !path.is_empty() {
                refs.push(SharedDllRef {
                    path: PathBuf::from(path),
                    ref_count,
                });
            }
        }
    }
    refs
}

fn parse_service_definitions(raw: &str) -> Vec<ServiceDef> {
    let mut services = Vec::new();
    let mut current_name: Option<String> = None;
    for line in raw.lines() {
        if line.starts_with("HK") {
            current_name = line.rsplit('\\').next().map(|s| s.trim().to_string());
            continue;
        }
        if let (Some(name), Some((value_name, value))) = (&current_name, parse_reg_value(line)) {
            if value_name == "ImagePath" {
                services.push(ServiceDef {
                    name: name.clone(),
                    image_path: normalize_image_path(&value),
                });
            }
        }
    }
    services
}

/// Indented `    Name    REG_TYPE    value` line.
fn parse_reg_value(line: &str) -> Option<(String, String)> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut parts = trimmed.splitn(3, |c: char| c.is_whitespace());
    let name = parts.next()?.to_string();
    let rest = trimmed[name.len()..].trim_start();
    let type_end = rest.find(char::is_whitespace)?;
    if !rest.starts_with("REG_") {
        return None;
    }
    Some((name, rest[type_end..].trim().to_string()))
}

/// Service image paths come quoted or with arguments appended; keep only
/// the executable path.
fn normalize_image_path(value: &str) -> PathBuf {
    let v = value.trim();
    if let Some(stripped) = v.strip_prefix('"') {
        if let Some(end) = stripped.find('"') {
            return PathBuf::from(&stripped[..end]);
        }
    }
    // Unquoted: arguments start after the first .exe.
    let lower = v.to_lowercase();
    if let Some(idx) = lower.find(".exe") {
        return PathBuf::from(&v[..idx + 4]);
    }
    PathBuf::from(v)
}

pub struct WindowsCollector<P = SystemRegistry> {
    provider: P,
}

impl WindowsCollector<SystemRegistry> {
    pub fn new() -> Self {
        Self::with_provider(SystemRegistry)
    }
}

impl Default for WindowsCollector<SystemRegistry> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: RegistryProvider> WindowsCollector<P> {
    pub fn with_provider(provider: P) -> Self {
        Self { provider }
    }

    fn entry_is_live(entry: &UninstallEntry) -> bool {
        entry
            .install_location
            .as_deref()
            .map(Path::exists)
            .unwrap_or(true)
    }

    /// MSI product GUID keys are opaque; the display name is the usable
    /// identity for matching, with the GUID kept as an alias.
    fn entry_canonical_name(entry: &UninstallEntry) -> String {
        if is_product_guid(&entry.key) {
            if let Some(name) = &entry.display_name {
                return name.clone();
            }
        }
        entry.key.clone()
    }
}

impl<P: RegistryProvider> Collector for WindowsCollector<P> {
    fn id(&self) -> CollectorId {
        CollectorId::Windows
    }

    fn platform(&self) -> PlatformFamily {
        PlatformFamily::Windows
    }

    fn source(&self) -> EvidenceSource {
        EvidenceSource::UninstallRegistry
    }

    fn enumerate_installed(&self, signal: &ScanSignal) -> StoreResult<Vec<InstalledIdentity>> {
        let mut identities = Vec::new();
        for entry in self.provider.uninstall_entries()? {
            if signal.interruption().is_some() {
                break;
            }
            if !Self::entry_is_live(&entry) {
                continue;
            }
            let canonical = Self::entry_canonical_name(&entry);
            let mut identity = InstalledIdentity::new(&canonical, PlatformFamily::Windows);
            if canonical != entry.key {
                identity = identity.with_alias(&entry.key);
            }
            if let Some(name) = entry.display_name {
                identity = identity.with_display_name(name);
            }
            if let Some(publisher) = entry.publisher {
                identity = identity.with_alias(publisher);
            }
            if let Some(location) = entry.install_location {
                identity = identity.with_install_path(location);
            }
            identities.push(identity);
        }
        debug!(
            "Windows collector found {} live uninstall entries",
            identities.len()
        );
        Ok(identities)
    }

    fn enumerate_historical(&self, _signal: &ScanSignal) -> StoreResult<Vec<String>> {
        // An uninstall entry whose install location vanished proves the
        // product existed; its key feeds confirmed-gone matching.
        Ok(self
            .provider
            .uninstall_entries()?
            .into_iter()
            .filter(|e| !Self::entry_is_live(e))
            .map(|e| Self::entry_canonical_name(&e))
            .collect())
    }

    fn enumerate_candidates(&self, signal: &ScanSignal) -> StoreResult<CandidateBatch> {
        let mut batch = CandidateBatch::default();

        match self.provider.uninstall_entries() {
            Ok(entries) => {
                for entry in entries {
                    if batch.interrupted(signal, EvidenceSource::UninstallRegistry, UNINSTALL_KEY) {
                        return Ok(batch);
                    }
                    if Self::entry_is_live(&entry) {
                        continue;
                    }
                    batch.push(ArtifactCandidate::new(
                        Location::RegistryKey {
                            key: format!("{UNINSTALL_KEY}\\{}", entry.key),
                        },
                        ArtifactKind::RegistryKey,
                        Self::entry_canonical_name(&entry),
                        EvidenceSource::UninstallRegistry,
                    ));
                }
            }
            Err(e) => {
                e.log(EvidenceSource::UninstallRegistry, UNINSTALL_KEY);
                batch
                    .skips
                    .push(e.into_skip(EvidenceSource::UninstallRegistry, UNINSTALL_KEY));
            }
        }

        match self.provider.shared_dll_refs() {
            Ok(refs) => {
                for dll in refs {
                    if batch.interrupted(signal, EvidenceSource::SharedDllRegistry, SHARED_DLLS_KEY)
                    {
                        return Ok(batch);
                    }
                    // A reference whose target is gone is emitted whether or
                    // not an identity can be attached.
                    if dll.path.exists() {
                        continue;
                    }
                    let observed = dll
                        .path
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_else(|| dll.path.to_string_lossy().into_owned());
                    batch.push(ArtifactCandidate::new(
                        Location::File {
                            path: dll.path.clone(),
                        },
                        ArtifactKind::SharedLibraryRef,
                        observed,
                        EvidenceSource::SharedDllRegistry,
                    ));
                }
            }
            Err(e) => {
                e.log(EvidenceSource::SharedDllRegistry, SHARED_DLLS_KEY);
                batch
                    .skips
                    .push(e.into_skip(EvidenceSource::SharedDllRegistry, SHARED_DLLS_KEY));
            }
        }

        match self.provider.service_definitions() {
            Ok(services) => {
                for service in services {
                    if batch.interrupted(signal, EvidenceSource::ServiceRegistry, SERVICES_KEY) {
                        return Ok(batch);
                    }
                    if service.image_path.exists() {
                        continue;
                    }
                    batch.push(ArtifactCandidate::new(
                        Location::RegistryKey {
                            key: format!("{SERVICES_KEY}\\{}", service.name),
                        },
                        ArtifactKind::ServiceDefinition,
                        &service.name,
                        EvidenceSource::ServiceRegistry,
                    ));
                }
            }
            Err(e) => {
                e.log(EvidenceSource::ServiceRegistry, SERVICES_KEY);
                batch
                    .skips
                    .push(e.into_skip(EvidenceSource::ServiceRegistry, SERVICES_KEY));
            }
        }

        match self.provider.execution_traces() {
            Ok(traces) => {
                for trace in traces {
                    if batch.interrupted(signal, EvidenceSource::ExecutionTrace, PREFETCH_DIR) {
                        return Ok(batch);
                    }
                    // Traces whose target still exists belong to something
                    // live; unresolved or gone targets are residue.
                    if trace.target.as_deref().map(Path::exists).unwrap_or(false) {
                        continue;
                    }
                    let observed = trace
                        .executable
                        .to_lowercase()
                        .trim_end_matches(".exe")
                        .to_string();
                    batch.push(ArtifactCandidate::new(
                        Location::TraceRecord {
                            record: trace.record.clone(),
                        },
                        ArtifactKind::ExecutionTrace,
                        observed,
                        EvidenceSource::ExecutionTrace,
                    ));
                }
            }
            Err(e) => {
                e.log(EvidenceSource::ExecutionTrace, PREFETCH_DIR);
                batch
                    .skips
                    .push(e.into_skip(EvidenceSource::ExecutionTrace, PREFETCH_DIR));
            }
        }

        debug!(
            "Windows collector produced {} candidates ({} skips)",
            batch.candidates.len(),
            batch.skips.len()
        );
        Ok(batch)
    }
}

/// True when a key name looks like an MSI product GUID.
pub fn is_product_guid(key: &str) -> bool {
    PRODUCT_GUID_RE.is_match(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNINSTALL_DUMP: &str = "\
HKEY_LOCAL_MACHINE\\SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\Uninstall
HKEY_LOCAL_MACHINE\\SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\Uninstall\\{11111111-2222-3333-4444-555555555555}
    DisplayName    REG_SZ    Example App
    Publisher    REG_SZ    Example Corp
    InstallLocation    REG_SZ    C:\\Program Files\\Example
HKEY_LOCAL_MACHINE\\SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\Uninstall\\VendorTool
    DisplayName    REG_SZ    Vendor Tool
";

    #[test]
    fn parses_uninstall_entries() {
        let entries = parse_uninstall_entries(UNINSTALL_DUMP);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].display_name.as_deref(), Some("Example App"));
        assert_eq!(
            entries[0].install_location.as_deref(),
            Some(Path::new("C:\\Program Files\\Example"))
        );
        assert_eq!(entries[1].key, "VendorTool");
        assert!(entries[1].install_location.is_none());
    }

    #[test]
    fn parses_shared_dlls() {
        let raw = "\
HKEY_LOCAL_MACHINE\\SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\SharedDLLs
    C:\\Windows\\System32\\helper.dll    REG_DWORD    0x2
";
        let refs = parse_shared_dlls(raw);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].ref_count, 2);
    }

    #[test]
    fn normalizes_quoted_and_arg_image_paths() {
        assert_eq!(
            normalize_image_path("\"C:\\Svc\\run.exe\" -k netsvcs"),
            PathBuf::from("C:\\Svc\\run.exe")
        );
        assert_eq!(
            normalize_image_path("C:\\Svc\\run.exe -k netsvcs"),
            PathBuf::from("C:\\Svc\\run.exe")
        );
    }

    #[test]
    fn product_guid_shape() {
        assert!(is_product_guid("{11111111-2222-3333-4444-555555555555}"));
        assert!(!is_product_guid("VendorTool"));
    }

    struct FixtureRegistry {
        entries: Vec<UninstallEntry>,
        dlls: Vec<SharedDllRef>,
    }

    impl RegistryProvider for FixtureRegistry {
        fn uninstall_entries(&self) -> StoreResult<Vec<UninstallEntry>> {
            Ok(self.entries.clone())
        }

        fn shared_dll_refs(&self) -> StoreResult<Vec<SharedDllRef>> {
            Ok(self.dlls.clone())
        }

        fn service_definitions(&self) -> StoreResult<Vec<ServiceDef>> {
            Err(StoreError::Unavailable("no services fixture".into()))
        }

        fn execution_traces(&self) -> StoreResult<Vec<TraceRecord>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn dead_entries_become_historical_and_candidates() {
        let collector = WindowsCollector::with_provider(FixtureRegistry {
            entries: vec![UninstallEntry {
                key: "GoneApp".into(),
                display_name: Some("Gone App".into()),
                publisher: None,
                install_location: Some(PathBuf::from("/nonexistent/gone-app")),
            }],
            dlls: vec![SharedDllRef {
                path: PathBuf::from("/nonexistent/helper.dll"),
                ref_count: 1,
            }],
        });
        let signal = ScanSignal::new();
        assert!(collector.enumerate_installed(&signal).unwrap().is_empty());
        assert_eq!(
            collector.enumerate_historical(&signal).unwrap(),
            vec!["GoneApp".to_string()]
        );
        let batch = collector.enumerate_candidates(&signal).unwrap();
        // Dead uninstall key + dangling dll ref; the unavailable services
        // store degrades to a recorded skip.
        assert_eq!(batch.candidates.len(), 2);
        assert_eq!(batch.skips.len(), 1);
    }

    #[test]
    fn product_guid_entries_answer_to_their_display_name() {
        let guid = "{11111111-2222-3333-4444-555555555555}";
        let collector = WindowsCollector::with_provider(FixtureRegistry {
            entries: vec![UninstallEntry {
                key: guid.into(),
                display_name: Some("Example App".into()),
                publisher: None,
                install_location: Some(PathBuf::from("/nonexistent/example")),
            }],
            dlls: vec![],
        });
        let signal = ScanSignal::new();
        assert_eq!(
            collector.enumerate_historical(&signal).unwrap(),
            vec!["Example App".to_string()]
        );
        let batch = collector.enumerate_candidates(&signal).unwrap();
        assert_eq!(batch.candidates[0].observed_name, "example app");
    }

    #[test]
    fn traces_of_live_targets_are_not_candidates() {
        struct TraceFixture {
            live: PathBuf,
        }
        impl RegistryProvider for TraceFixture {
            fn uninstall_entries(&self) -> StoreResult<Vec<UninstallEntry>> {
                Ok(Vec::new())
            }
            fn shared_dll_refs(&self) -> StoreResult<Vec<SharedDllRef>> {
                Ok(Vec::new())
            }
            fn service_definitions(&self) -> StoreResult<Vec<ServiceDef>> {
                Ok(Vec::new())
            }
            fn execution_traces(&self) -> StoreResult<Vec<TraceRecord>> {
                Ok(vec![
                    TraceRecord {
                        record: "KEPT.EXE-AA11BB22.pf".into(),
                        executable: "KEPT.EXE".into(),
                        target: Some(self.live.clone()),
                    },
                    TraceRecord {
                        record: "GONE.EXE-CC33DD44.pf".into(),
                        executable: "GONE.EXE".into(),
                        target: None,
                    },
                ])
            }
        }

        let tmp = tempfile::tempdir().unwrap();
        let live = tmp.path().join("kept.exe");
        std::fs::write(&live, b"bin").unwrap();
        let collector = WindowsCollector::with_provider(TraceFixture { live });
        let batch = collector.enumerate_candidates(&ScanSignal::new()).unwrap();
        assert_eq!(batch.candidates.len(), 1);
        assert_eq!(batch.candidates[0].observed_name, "gone");
    }
}

//! Analysis configuration, loadable from YAML. Every field has a default, so a
//! file only needs to name what it changes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AuspexError, Result};
use crate::hprof::tag::GcRootKind;
use crate::path::matcher::{ReferenceMatcher, default_reference_matchers};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalyzerConfig {
    pub graph: GraphConfig,
    pub scanner: ScannerConfig,
    pub path_finder: PathFinderConfig,
    pub report: ReportConfig,
}

impl AnalyzerConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|source| AuspexError::Resource { path: path.to_path_buf(), source })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.graph.object_cache_capacity == 0 {
            let message = "graph.object_cache_capacity must be at least 1";
            return Err(AuspexError::Config(message.into()));
        }
        if self.scanner.same_class_leak_cap == 0 {
            let message = "scanner.same_class_leak_cap must be at least 1";
            return Err(AuspexError::Config(message.into()));
        }
        if self.path_finder.same_class_enqueue_cap == Some(0) {
            let message = "path_finder.same_class_enqueue_cap must be at least 1";
            return Err(AuspexError::Config(message.into()));
        }
        if self.scanner.component.class_names.is_empty() {
            return Err(AuspexError::Config("scanner.component.class_names is empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GraphConfig {
    /// Capacity of the decoded object record cache
    pub object_cache_capacity: usize,
    /// Root kinds kept by the index, others are ignored
    pub indexed_gc_roots: Vec<GcRootKind>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            object_cache_capacity: 3000,
            indexed_gc_roots: vec![
                GcRootKind::JniGlobal,
                GcRootKind::JavaFrame,
                GcRootKind::JniLocal,
                GcRootKind::MonitorUsed,
                GcRootKind::NativeStack,
                GcRootKind::StickyClass,
                GcRootKind::ThreadBlock,
                GcRootKind::ThreadObject,
                GcRootKind::JniMonitor,
            ],
        }
    }
}

/// Destroyed UI container: flagged when any of the flag fields is true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContainerRule {
    pub class_name: String,
    pub flag_fields: Vec<String>,
    pub reason: String,
}

impl Default for ContainerRule {
    fn default() -> Self {
        Self {
            class_name: "android.app.Activity".into(),
            flag_fields: vec!["mDestroyed".into(), "mFinished".into()],
            reason: "Activity Leak".into(),
        }
    }
}

/// Detached sub-component: flagged when its manager field is null and its
/// started flag is true. The first class name present in the snapshot is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ComponentRule {
    pub class_names: Vec<String>,
    pub manager_field: String,
    pub started_field: String,
    pub reason: String,
}

impl Default for ComponentRule {
    fn default() -> Self {
        Self {
            class_names: vec![
                "androidx.fragment.app.Fragment".into(),
                "android.app.Fragment".into(),
                "android.support.v4.app.Fragment".into(),
            ],
            manager_field: "mFragmentManager".into(),
            started_field: "mCalled".into(),
            reason: "Fragment Leak".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BitmapRule {
    pub class_name: String,
    pub width_field: String,
    pub height_field: String,
}

impl Default for BitmapRule {
    fn default() -> Self {
        Self {
            class_name: "android.graphics.Bitmap".into(),
            width_field: "mWidth".into(),
            height_field: "mHeight".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScannerConfig {
    pub container: ContainerRule,
    pub component: ComponentRule,
    pub bitmap: BitmapRule,
    /// Classes whose instances are only counted
    pub counted_classes: Vec<String>,
    pub bitmap_pixel_threshold: u64,
    pub primitive_array_byte_threshold: u64,
    pub object_array_length_threshold: u64,
    /// Flagged instances per concrete class, for container, component and bitmap
    pub same_class_leak_cap: u32,
    /// Classes with at least this many instances are reported in the class list
    pub instance_count_threshold: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            container: ContainerRule::default(),
            component: ComponentRule::default(),
            bitmap: BitmapRule::default(),
            counted_classes: vec![
                "libcore.util.NativeAllocationRegistry".into(),
                "libcore.util.NativeAllocationRegistry$CleanerThunk".into(),
                "android.view.Window".into(),
            ],
            bitmap_pixel_threshold: 768 * 1366 + 1,
            primitive_array_byte_threshold: 256 * 1024,
            object_array_length_threshold: 256 * 1024,
            same_class_leak_cap: 45,
            instance_count_threshold: 20_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathFinderConfig {
    pub reference_matchers: Vec<ReferenceMatcher>,
    /// Track dominators and report retained sizes
    pub compute_retained_size: bool,
    /// Instances of one class enqueued at most, `None` for no limit
    pub same_class_enqueue_cap: Option<u32>,
    /// Class name prefixes the enqueue cap does not apply to
    pub enqueue_cap_exempt_prefixes: Vec<String>,
}

impl Default for PathFinderConfig {
    fn default() -> Self {
        Self {
            reference_matchers: default_reference_matchers(),
            compute_retained_size: false,
            same_class_enqueue_cap: Some(1024),
            enqueue_cap_exempt_prefixes: vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReportConfig {
    /// References hashed into a leak signature
    pub signature_depth: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self { signature_depth: 5 }
    }
}

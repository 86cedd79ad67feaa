use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::route::RouteSpec;

/// Prefix of every generated tool identifier.
pub const TOOL_ID_PREFIX: &str = "tool_";

/// Path prefix under which a tool's backend routes are mounted.
pub const MOUNT_ROOT: &str = "/tools";

const UNCATEGORIZED: &str = "uncategorized";

/// Which artifacts a tool carries and therefore how it executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Routes only, no UI.
    Backend,
    /// UI only, nothing to mount.
    Frontend,
    /// UI that talks to its own mounted routes.
    Dual,
}

impl ToolKind {
    pub fn requires_backend(self) -> bool {
        !matches!(self, ToolKind::Frontend)
    }

    pub fn requires_frontend(self) -> bool {
        !matches!(self, ToolKind::Backend)
    }

    pub fn requires(self, artifact: ArtifactKind) -> bool {
        match artifact {
            ArtifactKind::Backend => self.requires_backend(),
            ArtifactKind::Frontend => self.requires_frontend(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ToolKind::Backend => "backend",
            ToolKind::Frontend => "frontend",
            ToolKind::Dual => "dual",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "backend" => Ok(ToolKind::Backend),
            "frontend" => Ok(ToolKind::Frontend),
            "dual" => Ok(ToolKind::Dual),
            other => Err(format!(
                "unknown tool kind `{other}` (expected backend, frontend or dual)"
            )),
        }
    }
}

/// Lifecycle state of a tool.
///
/// `Disabled` is a user choice; `Failed` means validation or mounting went
/// wrong and `last_error` on the manifest says why.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Active,
    Disabled,
    Failed,
}

impl ToolStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolStatus::Active => "active",
            ToolStatus::Disabled => "disabled",
            ToolStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(ToolStatus::Active),
            "disabled" => Ok(ToolStatus::Disabled),
            "failed" => Ok(ToolStatus::Failed),
            other => Err(format!("unknown tool status `{other}`")),
        }
    }
}

/// One of the two artifact slots a tool can fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Backend,
    Frontend,
}

impl ArtifactKind {
    /// Directory bucket used by the artifact store.
    pub fn bucket(self) -> &'static str {
        match self {
            ArtifactKind::Backend => "backend",
            ArtifactKind::Frontend => "frontend",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.bucket())
    }
}

impl FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "backend" => Ok(ArtifactKind::Backend),
            "frontend" => Ok(ArtifactKind::Frontend),
            other => Err(format!(
                "unknown artifact kind `{other}` (expected backend or frontend)"
            )),
        }
    }
}

/// A stored artifact as recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRef {
    /// Deterministic location inside the artifact store.
    pub path: PathBuf,
    /// Filename as uploaded; only used for display and content-type detection.
    pub filename: String,
    /// SHA-256 hex of the stored bytes.
    pub sha256: String,
    pub size: u64,
}

impl ArtifactRef {
    /// Lowercased extension of the stored file, without the dot.
    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
    }
}

/// Editable, free-text description of a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub author: String,
}

fn default_category() -> String {
    UNCATEGORIZED.into()
}

fn default_version() -> String {
    "0.1.0".into()
}

impl ToolMetadata {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            category: default_category(),
            version: default_version(),
            author: String::new(),
        }
    }
}

/// Partial metadata edit. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub version: Option<String>,
    pub author: Option<String>,
}

impl MetadataPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.category.is_none()
            && self.version.is_none()
            && self.author.is_none()
    }
}

/// The durable record for one uploaded tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolManifest {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub version: String,
    pub author: String,
    pub kind: ToolKind,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_artifact: Option<ArtifactRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend_artifact: Option<ArtifactRef>,
    #[serde(default)]
    pub routes: Vec<RouteSpec>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ToolManifest {
    /// A fresh, not-yet-activated manifest with a newly allocated id.
    pub fn new(metadata: ToolMetadata, kind: ToolKind) -> Self {
        let now = Utc::now();
        Self {
            id: new_tool_id(),
            name: metadata.name,
            description: metadata.description,
            category: metadata.category,
            version: metadata.version,
            author: metadata.author,
            kind,
            status: ToolStatus::Disabled,
            last_error: None,
            backend_artifact: None,
            frontend_artifact: None,
            routes: Vec::new(),
            dependencies: Vec::new(),
            warnings: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn artifact(&self, kind: ArtifactKind) -> Option<&ArtifactRef> {
        match kind {
            ArtifactKind::Backend => self.backend_artifact.as_ref(),
            ArtifactKind::Frontend => self.frontend_artifact.as_ref(),
        }
    }

    pub fn set_artifact(&mut self, kind: ArtifactKind, artifact: ArtifactRef) {
        match kind {
            ArtifactKind::Backend => self.backend_artifact = Some(artifact),
            ArtifactKind::Frontend => self.frontend_artifact = Some(artifact),
        }
    }

    /// Artifacts the tool's kind requires but the manifest does not reference.
    pub fn missing_artifacts(&self) -> Vec<ArtifactKind> {
        [ArtifactKind::Backend, ArtifactKind::Frontend]
            .into_iter()
            .filter(|k| self.kind.requires(*k) && self.artifact(*k).is_none())
            .collect()
    }

    pub fn is_active(&self) -> bool {
        self.status == ToolStatus::Active
    }

    /// Whether activating this tool involves mounting a backend.
    pub fn needs_mount(&self) -> bool {
        self.kind.requires_backend()
    }

    /// `/tools/{id}`: the base URL of this tool's mounted routes.
    pub fn mount_prefix(&self) -> String {
        mount_prefix(&self.id)
    }

    pub fn apply(&mut self, patch: &MetadataPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(category) = &patch.category {
            self.category = category.clone();
        }
        if let Some(version) = &patch.version {
            self.version = version.clone();
        }
        if let Some(author) = &patch.author {
            self.author = author.clone();
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

pub fn mount_prefix(tool_id: &str) -> String {
    format!("{MOUNT_ROOT}/{tool_id}")
}

/// Allocate a new opaque tool identifier (`tool_<32 hex>`).
pub fn new_tool_id() -> String {
    format!("{TOOL_ID_PREFIX}{}", uuid::Uuid::new_v4().simple())
}

/// True for identifiers produced by [`new_tool_id`].
///
/// Ids arrive from URLs and end up in filesystem paths, so anything else is
/// refused before it reaches the store.
pub fn is_valid_tool_id(id: &str) -> bool {
    id.strip_prefix(TOOL_ID_PREFIX).is_some_and(|rest| {
        rest.len() == 32
            && rest
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    })
}

/// Filesystem-safe directory name for a free-text category.
pub fn category_slug(category: &str) -> String {
    let mut slug = String::with_capacity(category.len());
    let mut last_dash = false;
    for c in category.trim().chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash && !slug.is_empty() {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        UNCATEGORIZED.into()
    } else {
        slug
    }
}

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::manifest::ArtifactKind;
use crate::route::{RouteSpec, RouteTable};
use crate::scan;

/// Export names a script-module frontend may use for its UI component, in
/// priority order.
pub const DEFAULT_RECOGNIZED_EXPORTS: &[&str] =
    &["default", "App", "Tool", "ToolComponent", "Component", "Main"];

const BACKEND_EXTENSIONS: &[&str] = &["wasm"];
const FRONTEND_EXTENSIONS: &[&str] = &["html", "htm", "js", "mjs", "jsx"];

/// Markers that show a frontend talks to its own mounted backend.
const BACKEND_REFERENCES: &[&str] = &["baseUrl", "toolhub", "/tools/", "fetch("];

/// What a backend artifact declares about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendContract {
    /// Raw route declarations as reported by the artifact.
    pub routes: Vec<String>,
    /// Interfaces the artifact imports from its host.
    pub dependencies: Vec<String>,
}

/// Reads the contract out of a backend artifact.
///
/// Implemented by the runtime that will later execute the artifact, so
/// validation and mounting agree on what "has an application object" means.
pub trait BackendInspector: Send + Sync {
    fn inspect<'a>(
        &'a self,
        bytes: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<BackendContract, ValidationError>> + Send + 'a>>;
}

/// How a frontend artifact is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrontendType {
    /// A complete HTML document.
    Markup,
    /// An ES module exporting a UI component.
    Script,
    /// Like `Script`, but needs a JSX transform before evaluation.
    Jsx,
}

impl FrontendType {
    pub fn from_filename(filename: &str) -> Option<Self> {
        match extension(filename)?.as_str() {
            "html" | "htm" => Some(FrontendType::Markup),
            "js" | "mjs" => Some(FrontendType::Script),
            "jsx" => Some(FrontendType::Jsx),
            _ => None,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            FrontendType::Markup => "text/html; charset=utf-8",
            FrontendType::Script | FrontendType::Jsx => "text/javascript; charset=utf-8",
        }
    }
}

/// Result of a successful validation. Warnings never block activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub kind: ArtifactKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend_type: Option<FrontendType>,
    #[serde(default)]
    pub routes: Vec<RouteSpec>,
    #[serde(default)]
    pub exports: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ValidationReport {
    fn new(kind: ArtifactKind) -> Self {
        Self {
            kind,
            frontend_type: None,
            routes: Vec::new(),
            exports: Vec::new(),
            dependencies: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// Checks uploaded artifacts against the minimum tool contract before they
/// are allowed to become active.
pub struct Validator {
    inspector: Arc<dyn BackendInspector>,
    recognized_exports: Vec<String>,
}

impl Validator {
    pub fn new(inspector: Arc<dyn BackendInspector>) -> Self {
        Self {
            inspector,
            recognized_exports: DEFAULT_RECOGNIZED_EXPORTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn with_recognized_exports(mut self, exports: Vec<String>) -> Self {
        if !exports.is_empty() {
            self.recognized_exports = exports;
        }
        self
    }

    pub fn recognized_exports(&self) -> &[String] {
        &self.recognized_exports
    }

    pub async fn validate(
        &self,
        kind: ArtifactKind,
        content: &[u8],
        filename: &str,
    ) -> Result<ValidationReport, ValidationError> {
        if content.is_empty() {
            return Err(ValidationError::Empty(kind));
        }
        let report = match kind {
            ArtifactKind::Backend => self.validate_backend(content, filename).await,
            ArtifactKind::Frontend => self.validate_frontend(content, filename),
        };
        match &report {
            Ok(r) => tracing::debug!(
                %kind,
                filename,
                routes = r.routes.len(),
                warnings = r.warnings.len(),
                "Artifact validated"
            ),
            Err(e) => tracing::info!(%kind, filename, reason = %e, "Artifact rejected"),
        }
        report
    }

    async fn validate_backend(
        &self,
        content: &[u8],
        filename: &str,
    ) -> Result<ValidationReport, ValidationError> {
        require_extension(ArtifactKind::Backend, filename, BACKEND_EXTENSIONS)?;

        let contract = self.inspector.inspect(content).await?;
        if contract.routes.is_empty() {
            return Err(ValidationError::NoRoutes(
                "`routes` returned an empty list; declare at least one `METHOD /path`".into(),
            ));
        }
        let table = RouteTable::parse(&contract.routes)?;

        let mut report = ValidationReport::new(ArtifactKind::Backend);
        report.routes = table.routes().to_vec();
        report.dependencies = contract.dependencies;
        Ok(report)
    }

    fn validate_frontend(
        &self,
        content: &[u8],
        filename: &str,
    ) -> Result<ValidationReport, ValidationError> {
        require_extension(ArtifactKind::Frontend, filename, FRONTEND_EXTENSIONS)?;
        let frontend_type = FrontendType::from_filename(filename).ok_or_else(|| {
            ValidationError::InvalidFrontend(format!("cannot determine type of `{filename}`"))
        })?;

        let source = std::str::from_utf8(content).map_err(|e| {
            ValidationError::InvalidFrontend(format!("not valid UTF-8 text: {e}"))
        })?;
        if source.trim().is_empty() {
            return Err(ValidationError::Empty(ArtifactKind::Frontend));
        }

        let mut report = ValidationReport::new(ArtifactKind::Frontend);
        report.frontend_type = Some(frontend_type);

        match frontend_type {
            FrontendType::Markup => {
                if !scan::has_element_tag(source) {
                    return Err(ValidationError::InvalidFrontend(
                        "no HTML elements found in markup document".into(),
                    ));
                }
                let (opened, closed) = scan::script_tag_balance(source);
                if opened != closed {
                    return Err(ValidationError::InvalidFrontend(format!(
                        "unbalanced <script> tags: {opened} opened, {closed} closed"
                    )));
                }
                report.dependencies = scan::markup_dependencies(source);
            }
            FrontendType::Script | FrontendType::Jsx => {
                // JSX text content is free-form, so only plain scripts get the bracket check.
                if frontend_type == FrontendType::Script {
                    scan::check_brackets(source).map_err(ValidationError::InvalidFrontend)?;
                }
                report.exports = scan::exported_names(source);
                report.dependencies = scan::script_dependencies(source);
                if scan::choose_export(&report.exports, &self.recognized_exports).is_none() {
                    report
                        .warnings
                        .push(component_not_found(&self.recognized_exports));
                }
            }
        }

        if !BACKEND_REFERENCES.iter().any(|m| source.contains(m)) {
            report.warnings.push(
                "frontend never references its backend (toolhub.baseUrl); it can render but not call tool routes"
                    .into(),
            );
        }

        Ok(report)
    }
}

/// Message shown when a script module exports none of the recognized names.
pub fn component_not_found(recognized: &[String]) -> String {
    format!(
        "component not found, expected export names: {{{}}}",
        recognized.join(", ")
    )
}

fn extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

fn require_extension(
    kind: ArtifactKind,
    filename: &str,
    allowed: &[&str],
) -> Result<(), ValidationError> {
    match extension(filename) {
        Some(ext) if allowed.contains(&ext.as_str()) => Ok(()),
        _ => Err(ValidationError::UnsupportedExtension {
            kind,
            filename: filename.to_string(),
            expected: allowed
                .iter()
                .map(|e| format!(".{e}"))
                .collect::<Vec<_>>()
                .join(", "),
        }),
    }
}

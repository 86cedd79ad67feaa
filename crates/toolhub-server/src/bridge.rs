//! Frontend bridge: turns a stored frontend artifact into a document that
//! runs inside a sandboxed frame and knows how to reach its own backend.
//!
//! The tool's context ([`ToolContext`]) is fixed when the document is
//! rendered and exposed to the page as a frozen `window.toolhub` object.
//! Nothing is mounted for frontends; the bytes are served as uploaded.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use toolhub_core::validator::component_not_found;
use toolhub_core::{ArtifactKind, FrontendType, ToolManifest, scan};
use toolhub_store::{ArtifactStore, StoreError};

/// `sandbox` tokens for the frame that hosts a tool frontend.
pub const FRAME_SANDBOX: &str = "allow-scripts allow-same-origin allow-forms";

/// CSP sent with rendered documents, so they stay sandboxed even when
/// opened outside the host page.
pub const DOCUMENT_CSP: &str =
    "sandbox allow-scripts allow-same-origin allow-forms; object-src 'none'";

/// Paths a tool's pages may fetch or post to: its own namespace, plus the
/// rendered document the host page loads.
pub fn reachable_paths(tool_id: &str) -> Vec<String> {
    let prefix = toolhub_core::manifest::mount_prefix(tool_id);
    vec![
        format!("/api/tools/{tool_id}/frontend"),
        format!("{prefix}/"),
        prefix,
    ]
}

/// `connect-src` and `form-action` limited to `paths` on the origin named by
/// `host`.
///
/// A `srcdoc` frame inherits the policy of the page that embeds it, so when
/// this is sent with the host page it also covers requests the tool makes
/// through `parent`. Without a usable host the limit is `'self'`.
pub fn namespace_csp(host: Option<&str>, paths: &[String]) -> String {
    let sources = match host.filter(|h| is_plain_host(h)) {
        Some(host) => paths
            .iter()
            .map(|path| format!("http://{host}{path}"))
            .collect::<Vec<_>>()
            .join(" "),
        None => "'self'".to_string(),
    };
    format!("connect-src {sources}; form-action {sources}")
}

/// `host[:port]` with nothing that could end a CSP source expression.
fn is_plain_host(host: &str) -> bool {
    !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '[' | ']'))
}

static HEAD_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<head(\s[^>]*)?>").expect("static regex"));
static HTML_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<html(\s[^>]*)?>").expect("static regex"));

#[derive(Debug, Error)]
pub enum BridgeError {
    /// The tool has no frontend, or its file is gone.
    #[error("frontend unavailable: {0}")]
    Missing(String),

    #[error("frontend unreadable: {0}")]
    Unreadable(String),
}

/// Initialization parameters handed to a frontend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolContext {
    pub tool_id: String,
    /// Mount prefix of the tool's backend routes.
    pub base_url: String,
}

impl ToolContext {
    pub fn for_manifest(manifest: &ToolManifest) -> Self {
        Self {
            tool_id: manifest.id.clone(),
            base_url: manifest.mount_prefix(),
        }
    }
}

/// A frontend artifact exactly as uploaded.
#[derive(Debug, Clone)]
pub struct ResolvedFrontend {
    pub content: Vec<u8>,
    pub content_type: &'static str,
    pub filename: String,
    pub frontend_type: FrontendType,
}

/// Load a tool's frontend artifact byte for byte.
pub async fn resolve_frontend(
    artifacts: &ArtifactStore,
    manifest: &ToolManifest,
) -> Result<ResolvedFrontend, BridgeError> {
    let artifact = manifest
        .artifact(ArtifactKind::Frontend)
        .ok_or_else(|| BridgeError::Missing(format!("tool {} has no frontend", manifest.id)))?;
    let frontend_type = FrontendType::from_filename(&artifact.filename).ok_or_else(|| {
        BridgeError::Unreadable(format!("unknown frontend type `{}`", artifact.filename))
    })?;
    let content = artifacts
        .read_for(manifest, ArtifactKind::Frontend)
        .await
        .map_err(|e| match e {
            StoreError::MissingArtifact { .. } => BridgeError::Missing(e.to_string()),
            other => BridgeError::Unreadable(other.to_string()),
        })?;

    Ok(ResolvedFrontend {
        content,
        content_type: frontend_type.content_type(),
        filename: artifact.filename.clone(),
        frontend_type,
    })
}

/// Renders frontend documents and host pages.
#[derive(Debug, Clone)]
pub struct Bridge {
    runtime_scripts: Vec<String>,
    recognized_exports: Vec<String>,
}

impl Bridge {
    pub fn new(runtime_scripts: Vec<String>, recognized_exports: Vec<String>) -> Self {
        Self {
            runtime_scripts,
            recognized_exports,
        }
    }

    /// Build the document the sandboxed frame loads.
    pub fn render_document(
        &self,
        manifest: &ToolManifest,
        resolved: &ResolvedFrontend,
        ctx: &ToolContext,
    ) -> Result<String, BridgeError> {
        let source = std::str::from_utf8(&resolved.content)
            .map_err(|e| BridgeError::Unreadable(format!("frontend is not UTF-8: {e}")))?;
        let bootstrap = bootstrap_block(ctx);

        Ok(match resolved.frontend_type {
            FrontendType::Markup => inject_into_head(source, &bootstrap),
            FrontendType::Script | FrontendType::Jsx => {
                self.module_host(manifest, source, resolved.frontend_type, &bootstrap)
            }
        })
    }

    fn module_host(
        &self,
        manifest: &ToolManifest,
        source: &str,
        frontend_type: FrontendType,
        bootstrap: &str,
    ) -> String {
        let exports = scan::exported_names(source);
        let chosen = scan::choose_export(&exports, &self.recognized_exports);
        let not_found = component_not_found(&self.recognized_exports);

        let scripts: String = self
            .runtime_scripts
            .iter()
            .map(|src| format!("<script src=\"{}\"></script>\n", escape_html(src)))
            .collect();

        format!(
            r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
{bootstrap}
<title>{title}</title>
{scripts}</head>
<body>
<div id="toolhub-root"></div>
<script type="application/json" id="toolhub-module">{module}</script>
<script>
(function () {{
  var chosen = {chosen};
  var notFound = {not_found};
  var isJsx = {is_jsx};
  var root = document.getElementById("toolhub-root");
  function missing() {{
    root.textContent = notFound;
    window.toolhub.reportError(notFound);
  }}
  if (!chosen) {{ missing(); return; }}
  var source = JSON.parse(document.getElementById("toolhub-module").textContent);
  if (isJsx) {{
    source = Babel.transform(source, {{ presets: ["react"], sourceType: "module" }}).code;
  }}
  var url = URL.createObjectURL(new Blob([source], {{ type: "text/javascript" }}));
  import(url).then(function (mod) {{
    var Component = mod[chosen];
    if (!Component) {{ missing(); return; }}
    var props = {{ toolId: window.toolhub.toolId, baseUrl: window.toolhub.baseUrl, toolhub: window.toolhub }};
    ReactDOM.createRoot(root).render(React.createElement(Component, props));
  }}, function (err) {{
    window.toolhub.reportError(err && err.message ? err.message : String(err));
  }});
}})();
</script>
</body>
</html>
"#,
            title = escape_html(&manifest.name),
            module = json_for_script(&serde_json::Value::String(source.to_string())),
            chosen = json_for_script(&serde_json::json!(chosen)),
            not_found = json_for_script(&serde_json::Value::String(not_found.clone())),
            is_jsx = frontend_type == FrontendType::Jsx,
        )
    }

    /// The execution page: a sandboxed frame whose document is fetched from
    /// the rendered-document endpoint, with a retry state and an inline
    /// banner for errors the frame reports.
    pub fn host_page(&self, manifest: &ToolManifest) -> String {
        let document_url = format!("/api/tools/{}/frontend", manifest.id);
        format!(
            r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>
  body {{ margin: 0; font-family: system-ui, sans-serif; }}
  #toolhub-banner {{ display: none; padding: 8px 12px; background: #fdecea; color: #611a15; }}
  #toolhub-failed {{ display: none; padding: 24px; }}
  iframe {{ border: 0; width: 100%; height: 100vh; }}
</style>
</head>
<body>
<div id="toolhub-banner" role="alert"></div>
<div id="toolhub-failed">
  <p id="toolhub-failed-reason">The tool failed to load.</p>
  <button id="toolhub-retry" type="button">Retry</button>
</div>
<iframe id="toolhub-frame" sandbox="{sandbox}" title="{title}"></iframe>
<script>
(function () {{
  var toolId = {tool_id};
  var frame = document.getElementById("toolhub-frame");
  var failed = document.getElementById("toolhub-failed");
  var banner = document.getElementById("toolhub-banner");
  function load() {{
    failed.style.display = "none";
    fetch({document_url})
      .then(function (res) {{
        if (!res.ok) {{
          return res.json().then(function (body) {{ throw new Error(body.reason || res.statusText); }},
                                 function () {{ throw new Error(res.status + " " + res.statusText); }});
        }}
        return res.text();
      }})
      .then(function (html) {{
        frame.style.display = "block";
        frame.srcdoc = html;
      }})
      .catch(function (err) {{
        frame.style.display = "none";
        document.getElementById("toolhub-failed-reason").textContent =
          "The tool failed to load: " + err.message;
        failed.style.display = "block";
      }});
  }}
  window.addEventListener("message", function (event) {{
    var data = event.data;
    if (event.source !== frame.contentWindow || !data || data.type !== "toolhub:error") return;
    if (data.toolId !== toolId) return;
    banner.textContent = "Tool error: " + data.message;
    banner.style.display = "block";
  }});
  document.getElementById("toolhub-retry").addEventListener("click", load);
  load();
}})();
</script>
</body>
</html>
"#,
            title = escape_html(&manifest.name),
            sandbox = FRAME_SANDBOX,
            tool_id = json_for_script(&serde_json::Value::String(manifest.id.clone())),
            document_url = json_for_script(&serde_json::Value::String(document_url)),
        )
    }
}

/// Context data island plus the script that exposes it as `window.toolhub`
/// and reports uncaught errors to the parent frame.
fn bootstrap_block(ctx: &ToolContext) -> String {
    let context = json_for_script(&serde_json::to_value(ctx).unwrap_or_default());
    format!(
        r#"<script type="application/json" id="toolhub-context">{context}</script>
<script>
(function () {{
  var data = JSON.parse(document.getElementById("toolhub-context").textContent);
  function reportError(message) {{
    message = String(message);
    try {{
      window.parent.postMessage({{ type: "toolhub:error", toolId: data.toolId, message: message }}, "*");
    }} catch (_) {{}}
    var panel = document.getElementById("toolhub-error");
    if (!panel) {{
      panel = document.createElement("div");
      panel.id = "toolhub-error";
      panel.setAttribute("role", "alert");
      panel.style.cssText = "padding:8px 12px;background:#fdecea;color:#611a15;font-family:system-ui,sans-serif";
      (document.body || document.documentElement).appendChild(panel);
    }}
    panel.textContent = "Tool error: " + message;
  }}
  var toolhub = Object.freeze({{ toolId: data.toolId, baseUrl: data.baseUrl, reportError: reportError }});
  Object.defineProperty(window, "toolhub", {{ value: toolhub, writable: false, configurable: false, enumerable: true }});
  window.addEventListener("error", function (event) {{
    reportError(event.message || "script error");
  }});
  window.addEventListener("unhandledrejection", function (event) {{
    var reason = event.reason;
    reportError(reason && reason.message ? reason.message : String(reason));
  }});
}})();
</script>"#
    )
}

/// Insert `block` as the first child of `<head>`, creating the head when the
/// document has none.
fn inject_into_head(document: &str, block: &str) -> String {
    if let Some(head) = HEAD_OPEN.find(document) {
        let at = head.end();
        return format!("{}\n{block}\n{}", &document[..at], &document[at..]);
    }
    if let Some(html) = HTML_OPEN.find(document) {
        let at = html.end();
        return format!("{}\n<head>\n{block}\n</head>\n{}", &document[..at], &document[at..]);
    }
    format!("<head>\n{block}\n</head>\n{document}")
}

/// JSON that is safe inside a `<script>` element.
fn json_for_script(value: &serde_json::Value) -> String {
    value
        .to_string()
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026")
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

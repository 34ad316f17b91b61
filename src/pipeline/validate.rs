//! Post-build output validation for client bundles.
//!
//! Runs after a fresh compile only; cache hits were validated when they were
//! first produced. Findings split into fatal problems (the task fails, all of
//! them reported together) and warnings (recorded and logged, never fatal).
//!
//! Reference checks are opportunistic: only relative `src`/`href`/`url(...)`
//! references are resolved against the output file's directory. Absolute
//! paths, URLs with a scheme, fragments and `data:` payloads are never
//! touched.

use std::fs;
use std::path::{Path, PathBuf};

/// Outputs larger than this trigger a size warning.
pub const MAX_OUTPUT_SIZE: u64 = 5 * 1024 * 1024;

/// Collected validation findings for one task.
#[derive(Debug, Default)]
pub struct Findings {
    pub fatal: Vec<String>,
    pub warnings: Vec<String>,
}

impl Findings {
    pub fn is_fatal(&self) -> bool {
        !self.fatal.is_empty()
    }

    fn fatal(&mut self, msg: String) {
        self.fatal.push(msg);
    }

    fn warn(&mut self, msg: String) {
        self.warnings.push(msg);
    }
}

/// Validate the declared outputs of a fresh client build.
pub fn validate_outputs(declared: &[PathBuf]) -> Findings {
    let mut findings = Findings::default();

    for output in declared {
        let Ok(meta) = fs::metadata(output) else {
            findings.fatal(format!("declared output missing: {}", output.display()));
            continue;
        };

        if meta.len() > MAX_OUTPUT_SIZE {
            findings.warn(format!(
                "output {} is {:.1} MiB (> {} MiB)",
                output.display(),
                meta.len() as f64 / (1024.0 * 1024.0),
                MAX_OUTPUT_SIZE / (1024 * 1024),
            ));
        }

        match output.extension().and_then(|e| e.to_str()) {
            Some("html") | Some("htm") => validate_html(output, &mut findings),
            Some("css") => validate_css(output, &mut findings),
            _ => {}
        }
    }

    findings
}

// ============================================================================
// HTML checks
// ============================================================================

fn validate_html(path: &Path, findings: &mut Findings) {
    let Ok(content) = fs::read_to_string(path) else {
        findings.warn(format!("could not read {} for validation", path.display()));
        return;
    };

    let trimmed = content.trim_start();
    let has_doctype = trimmed.len() >= 9 && trimmed[..9].eq_ignore_ascii_case("<!doctype");
    if !has_doctype {
        findings.warn(format!("{}: missing doctype", path.display()));
    }

    let Ok(dom) = tl::parse(&content, tl::ParserOptions::default()) else {
        findings.warn(format!("{}: unparseable HTML", path.display()));
        return;
    };

    let mut has_html_root = false;

    for node in dom.nodes() {
        let Some(tag) = node.as_tag() else { continue };
        let name = tag.name().as_utf8_str().to_lowercase();
        let attrs = tag.attributes();

        match name.as_str() {
            "html" => has_html_root = true,
            "link" => {
                let rel = attrs
                    .get("rel")
                    .flatten()
                    .map(|v| v.as_utf8_str().to_lowercase());
                if rel.as_deref() == Some("stylesheet") {
                    match attrs.get("href").flatten() {
                        Some(href) => {
                            check_reference(path, &href.as_utf8_str(), findings);
                        }
                        None => findings.fatal(format!(
                            "{}: <link rel=\"stylesheet\"> without href",
                            path.display()
                        )),
                    }
                }
            }
            "script" => {
                let src = attrs.get("src").flatten();
                let has_type = attrs.get("type").is_some();
                match src {
                    Some(src) => check_reference(path, &src.as_utf8_str(), findings),
                    None if !has_type => findings.warn(format!(
                        "{}: <script> with neither src nor type",
                        path.display()
                    )),
                    None => {}
                }
            }
            "img" | "a" | "source" => {
                for attr in ["src", "href"] {
                    if let Some(value) = attrs.get(attr).flatten() {
                        check_reference(path, &value.as_utf8_str(), findings);
                    }
                }
            }
            _ => {}
        }
    }

    if !has_html_root {
        findings.warn(format!("{}: missing <html> root element", path.display()));
    }
}

// ============================================================================
// CSS checks
// ============================================================================

fn validate_css(path: &Path, findings: &mut Findings) {
    let Ok(content) = fs::read_to_string(path) else {
        findings.warn(format!("could not read {} for validation", path.display()));
        return;
    };

    for reference in extract_css_urls(&content) {
        check_reference(path, &reference, findings);
    }
}

/// Extract `url(...)` arguments from a stylesheet, quotes stripped.
fn extract_css_urls(content: &str) -> Vec<String> {
    let mut urls = Vec::new();
    let mut rest = content;
    while let Some(start) = rest.find("url(") {
        rest = &rest[start + 4..];
        let Some(end) = rest.find(')') else { break };
        let raw = rest[..end].trim().trim_matches(|c| c == '"' || c == '\'');
        if !raw.is_empty() {
            urls.push(raw.to_string());
        }
        rest = &rest[end + 1..];
    }
    urls
}

// ============================================================================
// reference resolution
// ============================================================================

/// Whether a reference is eligible for the existence check at all.
fn is_checkable(reference: &str) -> bool {
    if reference.is_empty()
        || reference.starts_with('/')
        || reference.starts_with('#')
        || reference.starts_with("data:")
        || reference.starts_with("mailto:")
    {
        return false;
    }
    // Any scheme (http:, https:, ws:, ...) disqualifies.
    !reference.contains("://") && !reference.starts_with("//")
}

/// Opportunistic existence check for a relative reference. Warning only.
fn check_reference(output: &Path, reference: &str, findings: &mut Findings) {
    if !is_checkable(reference) {
        return;
    }

    // Strip query string / fragment before resolving.
    let cleaned = reference
        .split(['?', '#'])
        .next()
        .unwrap_or(reference);
    if cleaned.is_empty() {
        return;
    }

    let base = output.parent().unwrap_or_else(|| Path::new("."));
    let target = base.join(cleaned);
    if !target.exists() {
        findings.warn(format!(
            "{}: reference '{}' does not exist",
            output.display(),
            reference
        ));
    }
}

//! Names the pipeline writes into the index repository.

use regex::Regex;
use std::sync::LazyLock;

use crate::ResourceId;

static FORBIDDEN_REF_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x00-\x20\x7f~^:?*\[\\/]+|@\{").expect("valid regex"));
static DOT_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.{2,}").expect("valid regex"));

/// Branch for a submission: `<pod>-<version>-job-<id>`, made safe for
/// `git check-ref-format`.
pub fn branch_name(pod_name: &str, version: &str, job_id: ResourceId) -> String {
    let raw = format!("{}-{}-job-{}", pod_name, version, job_id.simple());
    sanitize_ref_component(&raw)
}

/// Replace everything git refuses inside a single ref component.
pub fn sanitize_ref_component(raw: &str) -> String {
    let replaced = FORBIDDEN_REF_CHARS.replace_all(raw, "-");
    let collapsed = DOT_RUNS.replace_all(&replaced, ".");

    let mut name = collapsed.trim_start_matches(['.', '-']).to_string();
    loop {
        if let Some(stripped) = name.strip_suffix(".lock") {
            name = stripped.to_string();
        } else if let Some(stripped) = name.strip_suffix('.') {
            name = stripped.to_string();
        } else {
            break;
        }
    }
    name
}

/// Location of a version's document inside the index repository.
pub fn document_path(pod_name: &str, version: &str) -> String {
    format!("{}/{}/{}.podspec.json", pod_name, version, pod_name)
}

/// Commit message and pull request title for a submission.
pub fn submission_title(pod_name: &str, version: &str) -> String {
    format!("[Add] {} {}", pod_name, version)
}

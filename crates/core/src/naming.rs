//! Naming conventions for scene classes and per-job files.
//!
//! Scripts and outputs are named by job id so concurrent workers never
//! collide; the same conventions let the sweeper attribute a file back to
//! its job.

use crate::request::SceneType;
use crate::types::JobId;

/// File name prefix of generated scripts: `job_<uuid-simple>.py`.
const SCRIPT_PREFIX: &str = "job_";

/// Extension of generated scripts.
const SCRIPT_EXTENSION: &str = "py";

/// Derive the scene class name from the level tag and scene type.
///
/// Each component is split on non-alphanumeric separators and title-cased,
/// then the parts are concatenated and suffixed with `Scene`. A leading
/// digit is not a valid class-name start, so such names get a `Level`
/// prefix.
///
/// ```
/// use reelsmith_core::naming::scene_class_name;
/// use reelsmith_core::request::SceneType;
///
/// assert_eq!(scene_class_name("high_school", SceneType::Graph), "HighSchoolGraphScene");
/// assert_eq!(scene_class_name("9th-grade", SceneType::Proof), "Level9thGradeProofScene");
/// ```
pub fn scene_class_name(level: &str, scene_type: SceneType) -> String {
    let mut name = title_case_joined(level);
    name.push_str(&title_case_joined(scene_type.name()));
    name.push_str("Scene");
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert_str(0, "Level");
    }
    name
}

fn title_case_joined(raw: &str) -> String {
    raw.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => {
                    let mut word = first.to_ascii_uppercase().to_string();
                    word.push_str(&chars.as_str().to_ascii_lowercase());
                    word
                }
                None => String::new(),
            }
        })
        .collect()
}

/// Short job-scoped identifier bound into scripts: the first eight hex
/// characters of the job UUID.
pub fn short_job_id(job_id: &JobId) -> String {
    job_id.simple().to_string()[..8].to_string()
}

/// File name of the generated script for a job.
pub fn script_file_name(job_id: &JobId) -> String {
    format!("{SCRIPT_PREFIX}{}.{SCRIPT_EXTENSION}", job_id.simple())
}

/// Recover the job id from a script file name produced by [`script_file_name`].
pub fn job_id_from_script_name(file_name: &str) -> Option<JobId> {
    let stem = file_name
        .strip_prefix(SCRIPT_PREFIX)?
        .strip_suffix(SCRIPT_EXTENSION)?
        .strip_suffix('.')?;
    JobId::parse_str(stem).ok()
}

/// Name of the per-job output directory under the output root.
pub fn output_dir_name(job_id: &JobId) -> String {
    job_id.simple().to_string()
}

/// Recover the job id from an output directory name.
pub fn job_id_from_output_dir(dir_name: &str) -> Option<JobId> {
    JobId::parse_str(dir_name).ok()
}

//! Heuristic field enrichment and junk filtering.
//!
//! Keyword tables and junk patterns applied to text-derived records.
//! These gate HTML extractions (junk titles, too-short content) and
//! enrich all extractions with job type, remote mode, and skills.

use std::sync::LazyLock;

use regex::Regex;

static JUNK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        "(?i)(View Company Profile|Apply Now|Login|Sign In|Sign Up",
        "|Cookie Policy|Privacy Policy|Terms of Service",
        "|404|Page Not Found|Access Denied",
        "|Enable JavaScript|Browser Not Supported",
        "|Subscribe|Newsletter|Follow Us)",
    ))
    .unwrap()
});

static REMOTE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(remote|work from home|wfh|anywhere)\b").unwrap());

const JOB_TYPE_PATTERNS: &[(&str, &str)] = &[
    ("full-time", r"(?i)\b(full[- ]?time|permanent)\b"),
    ("part-time", r"(?i)\b(part[- ]?time)\b"),
    ("contract", r"(?i)\b(contract|contractor|freelance)\b"),
    ("internship", r"(?i)\b(intern|internship)\b"),
    ("temporary", r"(?i)\b(temporary|temp)\b"),
];

static JOB_TYPE_RES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    JOB_TYPE_PATTERNS
        .iter()
        .map(|(name, pat)| (*name, Regex::new(pat).unwrap()))
        .collect()
});

const SKILL_KEYWORDS: &[&str] = &[
    "python",
    "javascript",
    "typescript",
    "java",
    "c++",
    "c#",
    "go",
    "rust",
    "react",
    "vue",
    "angular",
    "node.js",
    "django",
    "flask",
    "sql",
    "postgresql",
    "mysql",
    "mongodb",
    "redis",
    "elasticsearch",
    "aws",
    "gcp",
    "azure",
    "docker",
    "kubernetes",
    "terraform",
    "machine learning",
    "nlp",
    "ci/cd",
    "git",
    "linux",
];

const JOB_KEYWORDS: &[&str] = &[
    "responsibilities",
    "requirements",
    "qualifications",
    "experience",
    "salary",
    "benefits",
    "apply",
    "position",
    "role",
    "team",
    "skills",
    "education",
    "location",
    "remote",
    "full-time",
    "part-time",
];

/// Titles matching junk navigation/chrome phrases are not job postings.
pub fn is_junk_title(title: &str) -> bool {
    JUNK_RE.is_match(title)
}

pub fn detect_remote(text: &str) -> bool {
    REMOTE_RE.is_match(text)
}

pub fn detect_job_type(text: &str) -> Option<String> {
    JOB_TYPE_RES
        .iter()
        .find(|(_, re)| re.is_match(text))
        .map(|(name, _)| name.to_string())
}

pub fn extract_skills(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    SKILL_KEYWORDS
        .iter()
        .filter(|skill| lower.contains(*skill))
        .map(|s| s.to_string())
        .collect()
}

/// Count job-vocabulary hits; HTML pages need a couple to be plausible.
pub fn job_keyword_count(text: &str) -> usize {
    let lower = text.to_lowercase();
    JOB_KEYWORDS.iter().filter(|kw| lower.contains(*kw)).count()
}

/// Quality gate for records recovered from arbitrary HTML.
pub fn is_plausible_posting(title: &str, description: &str) -> bool {
    if title.trim().len() < 5 || is_junk_title(title) {
        return false;
    }
    if description.len() < 100 {
        return false;
    }
    job_keyword_count(description) >= 2
}

use chrono::{DateTime, Utc};
use derive_builder::Builder;

#[derive(Debug, Clone, PartialEq, Eq, Builder)]
#[builder(setter(into))]
/// Closed pull request with the files it touched.
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub url: String,
    pub closed_at: DateTime<Utc>,
    #[builder(default)]
    pub files: Vec<String>,
}

impl PullRequest {
    /// Whether any changed file lives under `dir/`.
    pub fn touches_dir(&self, dir: &str) -> bool {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        self.files.iter().any(|f| f.starts_with(&prefix))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Request for closed pull requests against a base branch.
pub struct ListPrRequest {
    pub base_branch: String,
    /// Pull requests closed at or before this instant may be left out.
    pub closed_after: DateTime<Utc>,
    /// Pull requests closed after this instant may be left out.
    pub closed_until: DateTime<Utc>,
    /// Fetch changed file paths for each returned pull request.
    pub include_files: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn touches_dir_matches_path_prefix() {
        let pr = PullRequestBuilder::default()
            .number(7u64)
            .title("Fix mon relation")
            .url("https://github.com/o/r/pull/7")
            .closed_at(Utc.with_ymd_and_hms(2025, 8, 4, 0, 0, 0).unwrap())
            .files(vec!["ceph-mon/src/charm.py".to_string()])
            .build()
            .unwrap();

        assert!(pr.touches_dir("ceph-mon"));
        assert!(pr.touches_dir("ceph-mon/"));
        assert!(!pr.touches_dir("ceph"));
        assert!(!pr.touches_dir("ceph-osd"));
    }
}

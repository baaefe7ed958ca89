// Control-plane version reporting types.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fanout::CombinedError;

/// A component's self-reported version string split into its parts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedVersion {
    pub version: String,
    pub git_revision: String,
    pub build_status: String,
}

impl ParsedVersion {
    /// Parses `<version>-<gitRevision>-<buildStatus>`.
    ///
    /// The last two `-` separated segments are always the revision and build
    /// status; everything before them is the version, so versions that carry
    /// their own hyphens survive. Fewer than three segments yields the whole
    /// input as an opaque version. Never fails.
    pub fn parse(raw: &str) -> Self {
        let parts: Vec<&str> = raw.split('-').collect();
        let n = parts.len();
        if n < 3 {
            return Self {
                version: raw.to_string(),
                ..Self::default()
            };
        }
        Self {
            version: parts[..n - 2].join("-"),
            git_revision: parts[n - 2].to_string(),
            build_status: parts[n - 1].to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    pub version: String,
    pub git_revision: String,
    pub git_tag: String,
    pub build_status: String,
}

impl From<ParsedVersion> for BuildInfo {
    fn from(parsed: ParsedVersion) -> Self {
        Self {
            git_tag: parsed.version.clone(),
            version: parsed.version,
            git_revision: parsed.git_revision,
            build_status: parsed.build_status,
        }
    }
}

/// Version of one running control-plane pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub component: String,
    pub pod: String,
    pub info: BuildInfo,
}

/// Versions collected across the control plane plus any per-pod failures.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionReport {
    pub servers: Vec<ServerInfo>,
    #[serde(skip)]
    pub errors: Option<CombinedError>,
    pub collected_at: DateTime<Utc>,
}

impl VersionReport {
    pub fn is_partial(&self) -> bool {
        self.errors.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hyphenated_version_keeps_leading_segments() {
        let parsed = ParsedVersion::parse("1.7-alpha.9c900ba-9c900ba74d10a1-Clean");
        assert_eq!(parsed.version, "1.7-alpha.9c900ba");
        assert_eq!(parsed.git_revision, "9c900ba74d10a1");
        assert_eq!(parsed.build_status, "Clean");
    }

    #[test]
    fn three_segments() {
        let parsed = ParsedVersion::parse("1.8.0-abcdef-Modified");
        assert_eq!(
            parsed,
            ParsedVersion {
                version: "1.8.0".into(),
                git_revision: "abcdef".into(),
                build_status: "Modified".into(),
            }
        );
    }

    #[test]
    fn short_strings_are_opaque() {
        assert_eq!(ParsedVersion::parse("1.7").version, "1.7");
        assert_eq!(ParsedVersion::parse("1.7").git_revision, "");
        let two = ParsedVersion::parse("1.7-dev");
        assert_eq!(two.version, "1.7-dev");
        assert_eq!(two.build_status, "");
        assert_eq!(ParsedVersion::parse("").version, "");
    }

    #[test]
    fn git_tag_mirrors_version() {
        let info = BuildInfo::from(ParsedVersion::parse("1.9.1-deadbeef-Clean"));
        assert_eq!(info.git_tag, "1.9.1");
        assert_eq!(info.version, "1.9.1");
    }

    #[test]
    fn report_serializes_camel_case() {
        let report = VersionReport {
            servers: vec![ServerInfo {
                component: "pilot".into(),
                pod: "istiod-abc".into(),
                info: BuildInfo::from(ParsedVersion::parse("1.9.1-deadbeef-Clean")),
            }],
            errors: None,
            collected_at: Utc::now(),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["servers"][0]["info"]["gitRevision"], "deadbeef");
        assert!(json.get("collectedAt").is_some());
    }
}

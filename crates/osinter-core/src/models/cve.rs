//! CVE records mirrored from the NVD feed and linked to articles.
//!
//! CVSS blocks are stored in snake_case but accepted in the camelCase form
//! the NVD API uses.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{trimmed, trimmed_opt, Document, DocumentKind};
use crate::query::CveSearchQuery;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cve;

impl DocumentKind for Cve {
    type Base = BaseCve;
    type Full = FullCve;
    type Partial = PartialCve;
    type Query = CveSearchQuery;

    const NAME: &'static str = "cve";
    const UNIQUE_FIELD: &'static str = "cve";
    const BASE_FIELDS: &'static [&'static str] = &[
        "cve",
        "document_count",
        "title",
        "description",
        "keywords",
        "publish_date",
        "modified_date",
        "weaknesses",
        "status",
        "cvss3",
        "cvss2",
    ];
    const FULL_FIELDS: &'static [&'static str] = &["documents", "dating", "references"];
    const SEARCH_FIELDS: &'static [(&'static str, u32)] = &[("title", 1), ("description", 1)];

    fn mappings() -> Value {
        json!({
            "properties": {
                "cve": { "type": "keyword" },
                "document_count": { "type": "integer" },
                "title": { "type": "text" },
                "description": { "type": "text" },
                "publish_date": { "type": "date" },
                "modified_date": { "type": "date" },
                "weaknesses": { "type": "keyword" },
                "status": { "type": "keyword" },
                "cvss2": {
                    "type": "object",
                    "properties": {
                        "source": { "type": "keyword" },
                        "base_severity": { "type": "keyword" },
                        "exploitability_score": { "type": "half_float" },
                        "impact_score": { "type": "half_float" },
                        "ac_insuf_info": { "type": "boolean" },
                        "obtain_all_privilege": { "type": "boolean" },
                        "obtain_user_privilege": { "type": "boolean" },
                        "obtain_other_privilege": { "type": "boolean" },
                        "user_interaction_required": { "type": "boolean" },
                        "cvss_data": {
                            "type": "object",
                            "properties": {
                                "version": { "type": "keyword" },
                                "vector_string": { "type": "keyword" },
                                "access_vector": { "type": "keyword" },
                                "access_complexity": { "type": "keyword" },
                                "authentication": { "type": "keyword" },
                                "confidentiality_impact": { "type": "keyword" },
                                "integrity_impact": { "type": "keyword" },
                                "availability_impact": { "type": "keyword" },
                                "base_score": { "type": "half_float" }
                            }
                        }
                    }
                },
                "cvss3": {
                    "type": "object",
                    "properties": {
                        "source": { "type": "keyword" },
                        "exploitability_score": { "type": "half_float" },
                        "impact_score": { "type": "half_float" },
                        "cvss_data": {
                            "type": "object",
                            "properties": {
                                "version": { "type": "keyword" },
                                "vector_string": { "type": "keyword" },
                                "attack_vector": { "type": "keyword" },
                                "attack_complexity": { "type": "keyword" },
                                "privileges_required": { "type": "keyword" },
                                "user_interaction": { "type": "keyword" },
                                "scope": { "type": "keyword" },
                                "confidentiality_impact": { "type": "keyword" },
                                "integrity_impact": { "type": "keyword" },
                                "availability_impact": { "type": "keyword" },
                                "base_score": { "type": "half_float" },
                                "base_severity": { "type": "keyword" }
                            }
                        }
                    }
                },
                "references": {
                    "type": "object",
                    "properties": {
                        "url": { "type": "keyword" },
                        "source": { "type": "keyword" },
                        "tags": { "type": "keyword" }
                    }
                },
                "keywords": { "type": "keyword" },
                "documents": { "type": "keyword" },
                "dating": { "type": "date" }
            }
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CveHighlights {
    pub title: Option<Vec<String>>,
    pub description: Option<Vec<String>>,
}

/// NVD analysis status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CveStatus {
    #[serde(rename = "Awaiting Analysis")]
    AwaitingAnalysis,
    Received,
    Analyzed,
    Rejected,
    Modified,
    #[serde(rename = "Undergoing Analysis")]
    UndergoingAnalysis,
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CveReference {
    pub url: String,
    pub source: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cvss3Data {
    pub version: String,
    #[serde(alias = "vectorString")]
    pub vector_string: String,
    #[serde(alias = "attackVector")]
    pub attack_vector: String,
    #[serde(alias = "attackComplexity")]
    pub attack_complexity: String,
    #[serde(alias = "privilegesRequired")]
    pub privileges_required: String,
    #[serde(alias = "userInteraction")]
    pub user_interaction: String,
    pub scope: String,
    #[serde(alias = "confidentialityImpact")]
    pub confidentiality_impact: String,
    #[serde(alias = "integrityImpact")]
    pub integrity_impact: String,
    #[serde(alias = "availabilityImpact")]
    pub availability_impact: String,
    #[serde(alias = "baseScore")]
    pub base_score: f64,
    #[serde(alias = "baseSeverity")]
    pub base_severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cvss3 {
    pub source: String,
    #[serde(alias = "exploitabilityScore")]
    pub exploitability_score: f64,
    #[serde(alias = "impactScore")]
    pub impact_score: f64,
    #[serde(alias = "cvssData")]
    pub cvss_data: Cvss3Data,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cvss2Data {
    pub version: String,
    #[serde(alias = "vectorString")]
    pub vector_string: String,
    #[serde(alias = "accessVector")]
    pub access_vector: String,
    #[serde(alias = "accessComplexity")]
    pub access_complexity: String,
    pub authentication: String,
    #[serde(alias = "confidentialityImpact")]
    pub confidentiality_impact: String,
    #[serde(alias = "integrityImpact")]
    pub integrity_impact: String,
    #[serde(alias = "availabilityImpact")]
    pub availability_impact: String,
    #[serde(alias = "baseScore")]
    pub base_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cvss2 {
    pub source: String,
    #[serde(alias = "baseSeverity")]
    pub base_severity: Severity,
    #[serde(alias = "exploitabilityScore")]
    pub exploitability_score: f64,
    #[serde(alias = "impactScore")]
    pub impact_score: f64,
    #[serde(alias = "acInsufInfo")]
    pub ac_insuf_info: bool,
    #[serde(alias = "obtainAllPrivilege")]
    pub obtain_all_privilege: bool,
    #[serde(alias = "obtainUserPrivilege")]
    pub obtain_user_privilege: bool,
    #[serde(alias = "obtainOtherPrivilege")]
    pub obtain_other_privilege: bool,
    #[serde(default, alias = "userInteractionRequired")]
    pub user_interaction_required: Option<bool>,
    #[serde(alias = "cvssData")]
    pub cvss_data: Cvss2Data,
}

fn check_cvss(cvss3: Option<&Cvss3>, cvss2: Option<&Cvss2>) -> Result<(), String> {
    if let Some(v3) = cvss3 {
        let version = v3.cvss_data.version.as_str();
        if version != "3.0" && version != "3.1" {
            return Err(format!("unsupported CVSS v3 version '{}'", version));
        }
    }
    if let Some(v2) = cvss2 {
        if v2.cvss_data.version != "2.0" {
            return Err(format!(
                "unsupported CVSS v2 version '{}'",
                v2.cvss_data.version
            ));
        }
        if matches!(v2.base_severity, Severity::None | Severity::Critical) {
            return Err("CVSS v2 severity must be LOW, MEDIUM or HIGH".to_string());
        }
    }
    Ok(())
}

fn check_identifier(cve: &str) -> Result<(), String> {
    if !cve.starts_with("CVE-") {
        return Err(format!("'{}' is not a CVE identifier", cve));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseCve {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub cve: String,
    #[serde(default)]
    pub document_count: u64,
    #[serde(deserialize_with = "trimmed")]
    pub title: String,
    #[serde(deserialize_with = "trimmed")]
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub publish_date: DateTime<Utc>,
    pub modified_date: DateTime<Utc>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    pub status: CveStatus,
    #[serde(default)]
    pub cvss3: Option<Cvss3>,
    #[serde(default)]
    pub cvss2: Option<Cvss2>,
    #[serde(default, skip_serializing)]
    pub highlights: Option<CveHighlights>,
}

impl Document for BaseCve {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn check(&self) -> Result<(), String> {
        check_identifier(&self.cve)?;
        check_cvss(self.cvss3.as_ref(), self.cvss2.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullCve {
    #[serde(flatten)]
    pub base: BaseCve,
    pub documents: BTreeSet<String>,
    pub dating: BTreeSet<DateTime<Utc>>,
    pub references: Vec<CveReference>,
}

impl Document for FullCve {
    fn id(&self) -> Option<&str> {
        self.base.id()
    }

    fn check(&self) -> Result<(), String> {
        self.base.check()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartialCve {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub cve: Option<String>,
    pub document_count: Option<u64>,
    #[serde(deserialize_with = "trimmed_opt")]
    pub title: Option<String>,
    #[serde(deserialize_with = "trimmed_opt")]
    pub description: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub publish_date: Option<DateTime<Utc>>,
    pub modified_date: Option<DateTime<Utc>>,
    pub weaknesses: Option<Vec<String>>,
    pub status: Option<CveStatus>,
    pub cvss3: Option<Cvss3>,
    pub cvss2: Option<Cvss2>,
    pub documents: Option<BTreeSet<String>>,
    pub dating: Option<BTreeSet<DateTime<Utc>>>,
    pub references: Option<Vec<CveReference>>,
    #[serde(skip_serializing)]
    pub highlights: Option<CveHighlights>,
}

impl Document for PartialCve {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn check(&self) -> Result<(), String> {
        if let Some(cve) = &self.cve {
            check_identifier(cve)?;
        }
        check_cvss(self.cvss3.as_ref(), self.cvss2.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{validate_base, validate_full};

    fn payload() -> Value {
        json!({
            "id": "x1",
            "cve": "CVE-2024-3094",
            "title": "xz backdoor",
            "description": "Malicious code in upstream xz tarballs.",
            "keywords": ["xz", "backdoor"],
            "publish_date": "2024-03-29T17:15:21Z",
            "modified_date": "2024-04-01T00:00:00Z",
            "weaknesses": ["CWE-506"],
            "status": "Undergoing Analysis",
            "cvss3": {
                "source": "secalert@redhat.com",
                "exploitabilityScore": 3.9,
                "impactScore": 6.0,
                "cvssData": {
                    "version": "3.1",
                    "vectorString": "CVSS:3.1/AV:N/AC:L/PR:N/UI:N/S:C/C:H/I:H/A:H",
                    "attackVector": "NETWORK",
                    "attackComplexity": "LOW",
                    "privilegesRequired": "NONE",
                    "userInteraction": "NONE",
                    "scope": "CHANGED",
                    "confidentialityImpact": "HIGH",
                    "integrityImpact": "HIGH",
                    "availabilityImpact": "HIGH",
                    "baseScore": 10.0,
                    "baseSeverity": "CRITICAL"
                }
            },
            "documents": ["a1"],
            "dating": ["2024-03-30T00:00:00Z"],
            "references": [{ "url": "https://www.openwall.com/lists/oss-security/2024/03/29/4", "source": "nvd" }]
        })
    }

    #[test]
    fn camel_case_cvss_is_accepted_and_stored_snake_case() {
        let doc = validate_full::<Cve>(&payload()).unwrap();
        let cvss3 = doc.base.cvss3.as_ref().unwrap();
        assert_eq!(cvss3.cvss_data.base_severity, Severity::Critical);
        assert_eq!(doc.base.status, CveStatus::UndergoingAnalysis);
        assert_eq!(doc.base.document_count, 0);

        let out = serde_json::to_value(&doc).unwrap();
        assert_eq!(out["cvss3"]["cvss_data"]["base_score"], 10.0);
        assert_eq!(out["status"], "Undergoing Analysis");
        assert!(out["references"][0]["tags"].as_array().unwrap().is_empty());
    }

    #[test]
    fn unknown_cvss_version_is_rejected() {
        let mut raw = payload();
        raw["cvss3"]["cvssData"]["version"] = json!("4.0");
        assert!(validate_base::<Cve>(&raw).is_err());
    }

    #[test]
    fn identifier_must_look_like_a_cve() {
        let mut raw = payload();
        raw["cve"] = json!("GHSA-1234");
        let err = validate_base::<Cve>(&raw).unwrap_err();
        assert!(err.reason.contains("GHSA-1234"));
    }

    #[test]
    fn unknown_status_is_rejected() {
        let mut raw = payload();
        raw["status"] = json!("Unknown");
        assert!(validate_base::<Cve>(&raw).is_err());
    }
}

//! Evidence receipts, daily Merkle rollups and proof ledger records

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Content hashes of one successful submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceReceipt {
    pub job_id: i64,
    pub html_sha256: String,
    pub screenshot_sha256: String,
    pub created_at: i64,
}

/// One day's receipts folded into a single root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleRollup {
    pub day: NaiveDate,
    pub merkle_root: String,
    pub leaf_count: i32,
    pub created_at: i64,
}

/// Optional linkage of a ledger record to upstream entities (ids only)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerLinkage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pack_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_key: Option<String>,
}

/// Append-only signed root; never mutated after insert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofLedgerRecord {
    pub id: Uuid,
    pub root_hex: String,
    pub algorithm: String,
    pub key_id: String,
    pub signature_b64: String,
    #[serde(flatten)]
    pub linkage: LedgerLinkage,
    pub metadata: serde_json::Value,
    pub created_at: i64,
}

/// Insert shape for [`ProofLedgerRecord`]
#[derive(Debug, Clone)]
pub struct NewLedgerRecord {
    pub root_hex: String,
    pub algorithm: String,
    pub key_id: String,
    pub signature_b64: String,
    pub linkage: LedgerLinkage,
    pub metadata: serde_json::Value,
}

/// Rollup linkage stored in ledger metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupLink {
    pub day: NaiveDate,
    pub leaf_count: i32,
}

impl RollupLink {
    pub fn from_metadata(metadata: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(metadata.clone()).ok()
    }
}

/// Public verification result; carries hashes and key ids only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub ok: bool,
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<VerifyDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyDetails {
    pub record_id: Uuid,
    pub root_hex: String,
    pub algorithm: String,
    pub key_id: String,
    pub signature_valid: bool,
    /// Present when the record is linked to a daily rollup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_matches: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day: Option<NaiveDate>,
    pub created_at: i64,
}

impl VerifyResponse {
    pub fn lookup_failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            verified: false,
            details: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollup_link_from_metadata() {
        let meta = serde_json::json!({ "day": "2026-10-18", "leaf_count": 3 });
        let link = RollupLink::from_metadata(&meta).unwrap();
        assert_eq!(link.day, NaiveDate::from_ymd_opt(2026, 10, 18).unwrap());
        assert_eq!(link.leaf_count, 3);

        assert!(RollupLink::from_metadata(&serde_json::json!({})).is_none());
    }

    #[test]
    fn test_ledger_record_flattens_linkage() {
        let record = ProofLedgerRecord {
            id: Uuid::nil(),
            root_hex: "00".repeat(32),
            algorithm: "ed25519".into(),
            key_id: "k1".into(),
            signature_b64: "c2ln".into(),
            linkage: LedgerLinkage {
                controller_key: Some("naukri".into()),
                ..Default::default()
            },
            metadata: serde_json::json!({}),
            created_at: 5,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["controller_key"], "naukri");
        assert!(json.get("pack_id").is_none());
    }

    #[test]
    fn test_lookup_failed_shape() {
        let json = serde_json::to_value(VerifyResponse::lookup_failed("not found")).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["verified"], false);
        assert!(json.get("details").is_none());
    }
}

use serde::Serialize;

use crate::error::ErrorKind;
use crate::unit::{RegionId, UnitId, UnitKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    LowConfidence,
    /// Numbers, symbols and single characters are left as they are.
    NotTranslatable,
    RenderSkipped,
    FontUnavailable,
}

/// Outcome of one region. Anything but `Translated` and `Overflow` leaves
/// the original text or pixels in place, except a render failure after a
/// successful erase which leaves the region erased.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RegionStatus {
    Translated {
        text: String,
    },
    /// Rendered at the minimum size and cut with an ellipsis.
    Overflow {
        text: String,
    },
    Skipped {
        reason: SkipReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    Untranslated {
        error: ErrorKind,
    },
}

impl RegionStatus {
    pub fn skipped(reason: SkipReason) -> Self {
        RegionStatus::Skipped {
            reason,
            detail: None,
        }
    }

    pub fn is_replaced(&self) -> bool {
        matches!(self, RegionStatus::Translated { .. } | RegionStatus::Overflow { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionReport {
    pub id: RegionId,
    pub source: String,
    #[serde(flatten)]
    pub status: RegionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitReport {
    pub unit: UnitId,
    pub kind: UnitKind,
    /// Final state name: `done`, `failed` or `pending` when cancelled.
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    /// Detection failed; the unit went on with no regions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recognition_error: Option<ErrorKind>,
    /// Retries the translation backend spent on this unit's regions.
    pub retries: u32,
    pub regions: Vec<RegionReport>,
}

impl UnitReport {
    pub fn count(&self, predicate: impl Fn(&RegionStatus) -> bool) -> usize {
        self.regions
            .iter()
            .filter(|region| predicate(&region.status))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_report_shape() {
        let report = UnitReport {
            unit: UnitId {
                document: 0,
                index: 2,
            },
            kind: UnitKind::Image,
            state: "done",
            error: None,
            recognition_error: None,
            retries: 1,
            regions: vec![
                RegionReport {
                    id: RegionId(0),
                    source: "Hello".into(),
                    status: RegionStatus::Translated {
                        text: "你好".into(),
                    },
                },
                RegionReport {
                    id: RegionId(1),
                    source: "42".into(),
                    status: RegionStatus::skipped(SkipReason::NotTranslatable),
                },
                RegionReport {
                    id: RegionId(2),
                    source: "Goodbye".into(),
                    status: RegionStatus::Untranslated {
                        error: ErrorKind::Translation("basic: HTTP 503".into()),
                    },
                },
            ],
        };
        insta::assert_json_snapshot!(report, @r#"
        {
          "unit": {
            "document": 0,
            "index": 2
          },
          "kind": "image",
          "state": "done",
          "retries": 1,
          "regions": [
            {
              "id": 0,
              "source": "Hello",
              "status": "translated",
              "text": "你好"
            },
            {
              "id": 1,
              "source": "42",
              "status": "skipped",
              "reason": "not_translatable"
            },
            {
              "id": 2,
              "source": "Goodbye",
              "status": "untranslated",
              "error": {
                "kind": "translation",
                "message": "basic: HTTP 503"
              }
            }
          ]
        }
        "#);
        assert_eq!(report.count(RegionStatus::is_replaced), 1);
    }
}

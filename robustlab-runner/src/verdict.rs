//! PASS/FAIL verdicts with the reasons that produced them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerdictKind {
    Pass,
    Fail,
}

/// Outcome of one validation section, or of the whole report.
///
/// `verdict` is `Pass` exactly when `fail_reasons` is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub verdict: VerdictKind,
    pub fail_reasons: Vec<String>,
}

impl Verdict {
    pub fn from_reasons(fail_reasons: Vec<String>) -> Self {
        let verdict = if fail_reasons.is_empty() {
            VerdictKind::Pass
        } else {
            VerdictKind::Fail
        };
        Self {
            verdict,
            fail_reasons,
        }
    }

    pub fn passed(&self) -> bool {
        self.verdict == VerdictKind::Pass
    }

    /// AND of several section verdicts; reasons are prefixed with their section key.
    pub fn combine<'a>(sections: impl IntoIterator<Item = (&'a str, &'a Verdict)>) -> Self {
        let reasons = sections
            .into_iter()
            .flat_map(|(key, v)| v.fail_reasons.iter().map(move |r| format!("{key}:{r}")))
            .collect();
        Self::from_reasons(reasons)
    }
}

/// Collects the reasons of failed checks in evaluation order.
#[derive(Debug, Default)]
pub(crate) struct Checks(Vec<String>);

impl Checks {
    pub(crate) fn require(&mut self, ok: bool, reason: &str) -> &mut Self {
        if !ok {
            self.0.push(reason.to_string());
        }
        self
    }

    pub(crate) fn verdict(&mut self) -> Verdict {
        Verdict::from_reasons(std::mem::take(&mut self.0))
    }
}

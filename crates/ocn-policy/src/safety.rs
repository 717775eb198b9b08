//! Safety policy (spec §4.6): a pure function over an outbound message
//! that infers risk from keyword hints, downgrades low-confidence output
//! to a "stop and check" phrasing, and truncates to a character budget.
//! Ported from the original `SafetyPolicy`.

const CAUTION_KEYWORDS: &[&str] = &["车流", "车辆", "危险", "台阶", "障碍", "红绿灯", "traffic", "danger", "obstacle"];
const ALREADY_CAUTIOUS_PREFIXES: &[&str] = &["注意安全", "请先停", "warning", "caution"];
const ALREADY_UNCERTAIN_PREFIXES: &[&str] = &["我不太确定", "不太确定", "i may be wrong", "not fully sure"];

#[derive(Debug, Clone)]
pub struct SafetyPolicy {
    pub enabled: bool,
    pub low_confidence_threshold: f32,
    pub max_output_chars: usize,
    pub prepend_caution_for_risk: bool,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self { enabled: true, low_confidence_threshold: 0.45, max_output_chars: 300, prepend_caution_for_risk: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyDecision {
    pub text: String,
    pub downgraded: bool,
    pub risk_level: String,
    pub reason: String,
    pub flags: Vec<String>,
}

fn starts_with_any(text: &str, prefixes: &[&str]) -> bool {
    let lower = text.to_lowercase();
    prefixes.iter().any(|p| lower.starts_with(&p.to_lowercase()))
}

fn infer_risk(text: &str, given: Option<&str>) -> String {
    if let Some(r) = given {
        let up = r.to_uppercase();
        if matches!(up.as_str(), "P0" | "P1" | "P2" | "P3") {
            return up;
        }
    }
    if CAUTION_KEYWORDS.iter().any(|kw| text.contains(kw)) {
        "P0".to_string()
    } else {
        "P3".to_string()
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let char_count = text.chars().count();
    if char_count <= max_chars || max_chars < 4 {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars - 3).collect();
    format!("{}...", truncated.trim_end())
}

impl SafetyPolicy {
    /// Evaluate one outbound message, `risk_level` being the caller's
    /// hint (from vision context, e.g.) when known.
    pub fn evaluate(&self, text: &str, confidence: f32, risk_level: Option<&str>) -> SafetyDecision {
        let mut out = text.trim().to_string();
        let mut flags = Vec::new();

        if !self.enabled {
            return SafetyDecision {
                text: truncate(&out, self.max_output_chars),
                downgraded: false,
                risk_level: infer_risk(&out, risk_level),
                reason: "ok".into(),
                flags,
            };
        }

        let risk = infer_risk(&out, risk_level);
        let mut downgraded = false;
        let mut reason = "ok".to_string();

        if confidence.clamp(0.0, 1.0) < self.low_confidence_threshold && !starts_with_any(&out, ALREADY_UNCERTAIN_PREFIXES) {
            out = format!("请先停下，建议先确认周边环境。我不太确定：{out}");
            downgraded = true;
            reason = "low_confidence".into();
            flags.push("low_confidence_downgrade".into());
        } else if self.prepend_caution_for_risk && risk == "P0" && !starts_with_any(&out, ALREADY_CAUTIOUS_PREFIXES) {
            out = format!("注意安全。{out}");
            flags.push("caution_prefix_added".into());
        }

        SafetyDecision { text: truncate(&out, self.max_output_chars), downgraded, risk_level: risk, reason, flags }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_confidence_downgrades_with_stop_phrasing() {
        let policy = SafetyPolicy { low_confidence_threshold: 0.8, max_output_chars: 300, ..Default::default() };
        let decision = policy.evaluate("请向前走10米，然后左转。", 0.2, Some("P1"));
        assert!(decision.downgraded);
        assert_eq!(decision.reason, "low_confidence");
        assert_eq!(decision.risk_level, "P1");
        assert!(decision.text.contains("请先停"));
    }

    #[test]
    fn infers_risk_from_keywords_and_adds_caution_prefix() {
        let policy = SafetyPolicy { low_confidence_threshold: 0.4, max_output_chars: 300, prepend_caution_for_risk: true, ..Default::default() };
        let decision = policy.evaluate("前方有车流，请注意观察。", 0.95, None);
        assert!(!decision.downgraded);
        assert_eq!(decision.risk_level, "P0");
        assert!(decision.text.starts_with("注意安全。"));
        assert!(decision.flags.contains(&"caution_prefix_added".to_string()));
    }

    #[test]
    fn disabled_policy_passes_through_but_still_truncates() {
        let policy = SafetyPolicy { enabled: false, low_confidence_threshold: 0.99, max_output_chars: 20, ..Default::default() };
        let text = "0123456789".repeat(12);
        let decision = policy.evaluate(&text, 0.1, Some("P0"));
        assert!(!decision.downgraded);
        assert_eq!(decision.reason, "ok");
        assert!(decision.text.ends_with("..."));
        assert!(decision.text.chars().count() <= 20);
    }
}

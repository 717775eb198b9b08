//! Interaction policy (spec §4.6): decides emotion-tone prefixing,
//! proactive-hint appending, and silence suppression for one outbound
//! message. Ported from the original `InteractionPolicy`, with the wall
//! clock hook kept injectable for tests.

use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct InteractionPolicy {
    pub enabled: bool,
    pub emotion_enabled: bool,
    pub proactive_enabled: bool,
    pub silent_enabled: bool,
    pub low_confidence_threshold: f32,
    pub high_risk_levels: HashSet<String>,
    pub proactive_sources: HashSet<String>,
    pub silent_sources: HashSet<String>,
    pub quiet_hours_enabled: bool,
    pub quiet_hours_start_hour: u32,
    pub quiet_hours_end_hour: u32,
    pub suppress_low_priority_in_quiet_hours: bool,
}

impl Default for InteractionPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            emotion_enabled: true,
            proactive_enabled: true,
            silent_enabled: true,
            low_confidence_threshold: 0.45,
            high_risk_levels: ["P0", "P1"].iter().map(|s| s.to_string()).collect(),
            proactive_sources: ["vision_reply"].iter().map(|s| s.to_string()).collect(),
            silent_sources: ["task_update"].iter().map(|s| s.to_string()).collect(),
            quiet_hours_enabled: false,
            quiet_hours_start_hour: 23,
            quiet_hours_end_hour: 7,
            suppress_low_priority_in_quiet_hours: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InteractionContext {
    pub priority: Option<String>,
    pub proactive_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionDecision {
    pub text: String,
    pub should_speak: bool,
    pub reason: String,
    pub flags: Vec<String>,
}

fn starts_with_any(text: &str, prefixes: &[&str]) -> bool {
    let lower = text.to_lowercase();
    prefixes.iter().any(|p| lower.starts_with(&p.to_lowercase()))
}

fn shorten(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", truncated.trim_end())
}

impl InteractionPolicy {
    pub fn evaluate(
        &self,
        text: &str,
        source: &str,
        confidence: f32,
        risk_level: &str,
        context: &InteractionContext,
        speak: bool,
        current_hour: u32,
    ) -> InteractionDecision {
        let source_lower = source.to_lowercase();
        let mut out = text.trim().to_string();
        let mut should_speak = speak;
        let mut reason = "ok".to_string();
        let mut flags = Vec::new();

        if !self.enabled {
            return InteractionDecision { text: out, should_speak, reason: "disabled".into(), flags };
        }

        if self.silent_enabled && should_speak {
            let priority = context.priority.as_deref().unwrap_or("").to_lowercase();
            if self.silent_sources.contains(&source_lower) && priority == "low" {
                should_speak = false;
                reason = "silent_low_priority".into();
                flags.push("silent_low_priority".into());
            } else if self.quiet_hours_enabled
                && self.suppress_low_priority_in_quiet_hours
                && self.in_quiet_hours(current_hour)
                && self.silent_sources.contains(&source_lower)
                && matches!(priority.as_str(), "" | "low" | "normal")
                && !self.high_risk_levels.contains(risk_level)
            {
                should_speak = false;
                reason = "silent_quiet_hours".into();
                flags.push("silent_quiet_hours".into());
            }
        }

        if !out.is_empty() && self.emotion_enabled {
            if self.high_risk_levels.contains(risk_level) && !starts_with_any(&out, &["注意", "小心", "请先停", "warning", "caution"]) {
                out = format!("请先停下，注意安全。{out}");
                flags.push("emotion_high_risk_prefix".into());
            } else if confidence < self.low_confidence_threshold
                && !starts_with_any(&out, &["我不太确定", "不太确定", "i may be wrong", "not fully sure"])
            {
                out = format!("我不太确定，建议先确认周边环境。{out}");
                flags.push("emotion_low_confidence_prefix".into());
            }
        }

        if !out.is_empty() && self.proactive_enabled && self.proactive_sources.contains(&source_lower) {
            if let Some(hint) = context.proactive_hint.as_deref().filter(|h| !h.trim().is_empty()) {
                out = format!("{out} {}", shorten(hint, 72));
                flags.push("proactive_hint_appended".into());
            }
        }

        InteractionDecision { text: out, should_speak, reason, flags }
    }

    fn in_quiet_hours(&self, now_hour: u32) -> bool {
        let (start, end) = (self.quiet_hours_start_hour % 24, self.quiet_hours_end_hour % 24);
        if start == end {
            return true;
        }
        if start < end {
            start <= now_hour && now_hour < end
        } else {
            now_hour >= start || now_hour < end
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_priority_task_update_is_silenced() {
        let policy = InteractionPolicy::default();
        let ctx = InteractionContext { priority: Some("low".into()), ..Default::default() };
        let decision = policy.evaluate("task done", "task_update", 1.0, "P3", &ctx, true, 12);
        assert!(!decision.should_speak);
        assert_eq!(decision.reason, "silent_low_priority");
    }

    #[test]
    fn high_risk_gets_a_stop_and_caution_prefix() {
        let policy = InteractionPolicy::default();
        let decision = policy.evaluate("there's a step ahead", "vision_reply", 0.9, "P0", &InteractionContext::default(), true, 12);
        assert!(decision.text.starts_with("请先停下，注意安全。"));
    }

    #[test]
    fn proactive_hint_gets_appended_for_vision_reply() {
        let policy = InteractionPolicy::default();
        let ctx = InteractionContext { proactive_hint: Some("charger is nearby".into()), ..Default::default() };
        let decision = policy.evaluate("it's a desk", "vision_reply", 0.9, "P3", &ctx, true, 12);
        assert!(decision.flags.contains(&"proactive_hint_appended".to_string()));
        assert!(decision.text.contains("charger is nearby"));
    }

    #[test]
    fn quiet_hours_suppress_normal_priority_silent_sources() {
        let mut policy = InteractionPolicy::default();
        policy.quiet_hours_enabled = true;
        policy.quiet_hours_start_hour = 23;
        policy.quiet_hours_end_hour = 7;
        let decision = policy.evaluate("task done", "task_update", 1.0, "P3", &InteractionContext::default(), true, 2);
        assert!(!decision.should_speak);
        assert_eq!(decision.reason, "silent_quiet_hours");
    }

    #[test]
    fn high_risk_overrides_quiet_hours_suppression() {
        let mut policy = InteractionPolicy::default();
        policy.quiet_hours_enabled = true;
        let ctx = InteractionContext::default();
        let decision = policy.evaluate("danger ahead", "task_update", 1.0, "P0", &ctx, true, 2);
        assert!(decision.should_speak);
    }
}

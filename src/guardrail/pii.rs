//! PII detection guardrails
//!
//! Five registered types (`pii_ssn`, `pii_credit_card`, `pii_email`,
//! `pii_phone`, `pii_ip_address`) sharing one engine: a regex pass over the
//! extracted message content followed by a semantic validator on each match.
//! Validator rejections are discarded - that filter is what keeps the false
//! positive rate workable (an SSN-shaped number with area 666 is not an SSN,
//! a 16-digit number failing Luhn is not a card).
//!
//! `action = "block"` blocks on any surviving finding; `action = "redact"`
//! (the default) replaces each finding in a deep copy of the message and
//! lets it pass as a modification.

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::engine::DecisionRequest;
use crate::model::Severity;
use crate::protocol::McpMessage;
use crate::{Error, Result};

use super::{EffectiveConfig, Guardrail, GuardrailResult, ScanDirection, extract_content};

/// The PII categories the gateway detects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PiiType {
    /// US social security numbers
    Ssn,
    /// Payment card numbers (Luhn-checked)
    CreditCard,
    /// Email addresses
    Email,
    /// Phone numbers
    Phone,
    /// IPv4 addresses
    IpAddress,
}

impl PiiType {
    /// All detector types in registry order
    pub const ALL: [Self; 5] = [
        Self::Ssn,
        Self::CreditCard,
        Self::Email,
        Self::Phone,
        Self::IpAddress,
    ];

    /// Guardrail type tag (`pii_ssn`, ...)
    #[must_use]
    pub fn guardrail_type(self) -> &'static str {
        match self {
            Self::Ssn => "pii_ssn",
            Self::CreditCard => "pii_credit_card",
            Self::Email => "pii_email",
            Self::Phone => "pii_phone",
            Self::IpAddress => "pii_ip_address",
        }
    }

    /// Short tag used in details and redaction tokens
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::Ssn => "ssn",
            Self::CreditCard => "credit_card",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::IpAddress => "ip_address",
        }
    }

    /// Detection regex for this type
    fn pattern(self) -> &'static str {
        match self {
            Self::Ssn => r"\d{3}[-\s]?\d{2}[-\s]?\d{4}",
            Self::CreditCard => r"\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}",
            Self::Email => r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}",
            Self::Phone => r"\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}",
            Self::IpAddress => r"\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}",
        }
    }

    /// Semantic validator applied to each regex match
    fn validate(self, value: &str) -> bool {
        match self {
            Self::Ssn => validate_ssn(value),
            Self::CreditCard => validate_credit_card(value),
            Self::Email => validate_email(value),
            Self::Phone => validate_phone(value),
            Self::IpAddress => validate_ip_address(value),
        }
    }
}

fn digits_of(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}

/// SSN area number cannot be 000, 666, or 900-999
fn validate_ssn(value: &str) -> bool {
    let digits = digits_of(value);
    if digits.len() != 9 {
        return false;
    }
    let Ok(area) = digits[..3].parse::<u32>() else {
        return false;
    };
    area != 0 && area != 666 && !(900..=999).contains(&area)
}

/// Luhn checksum over 13-19 digits
fn validate_credit_card(value: &str) -> bool {
    let digits = digits_of(value);
    if !(13..=19).contains(&digits.len()) {
        return false;
    }
    let mut total = 0u32;
    for (i, c) in digits.chars().rev().enumerate() {
        let mut n = c.to_digit(10).unwrap_or(0);
        if i % 2 == 1 {
            n *= 2;
            if n > 9 {
                n -= 9;
            }
        }
        total += n;
    }
    total % 10 == 0
}

fn validate_email(value: &str) -> bool {
    match value.rsplit_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.'),
        None => false,
    }
}

fn validate_phone(value: &str) -> bool {
    digits_of(value).len() >= 10
}

fn validate_ip_address(value: &str) -> bool {
    let parts: Vec<&str> = value.split('.').collect();
    parts.len() == 4 && parts.iter().all(|p| p.parse::<u32>().is_ok_and(|n| n <= 255))
}

/// What to do with surviving findings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PiiAction {
    Block,
    Redact,
}

/// One PII detector bound to its config
pub struct PiiGuardrail {
    pii_type: PiiType,
    direction: ScanDirection,
    action: PiiAction,
    redaction_pattern: String,
    regex: Regex,
}

impl PiiGuardrail {
    /// Build a detector for `pii_type` from the effective config.
    ///
    /// # Errors
    ///
    /// [`Error::GuardrailConfig`] on an unknown `direction` or `action`.
    pub fn from_config(pii_type: PiiType, config: &EffectiveConfig) -> Result<Self> {
        let tag = pii_type.guardrail_type();

        let direction_raw = config.str_or("direction", "response");
        let direction = ScanDirection::parse(direction_raw).ok_or_else(|| Error::GuardrailConfig {
            guardrail_type: tag.to_string(),
            message: format!("unknown direction '{direction_raw}'"),
        })?;

        let action = match config.str_or("action", "redact") {
            "block" => PiiAction::Block,
            "redact" => PiiAction::Redact,
            other => {
                return Err(Error::GuardrailConfig {
                    guardrail_type: tag.to_string(),
                    message: format!("unknown action '{other}'"),
                });
            }
        };

        let redaction_pattern = config
            .str_or("redaction_pattern", "[REDACTED:{TYPE}]")
            .to_string();

        // The built-in patterns always compile; case-insensitive only
        // matters for email but is applied uniformly.
        let regex = RegexBuilder::new(pii_type.pattern())
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::GuardrailConfig {
                guardrail_type: tag.to_string(),
                message: format!("pattern failed to compile: {e}"),
            })?;

        Ok(Self {
            pii_type,
            direction,
            action,
            redaction_pattern,
            regex,
        })
    }

    /// Regex matches surviving the semantic validator
    fn scan(&self, content: &str) -> Vec<String> {
        self.regex
            .find_iter(content)
            .map(|m| m.as_str().to_string())
            .filter(|v| self.pii_type.validate(v))
            .collect()
    }

    /// Redaction token with the `{TYPE}` placeholder interpolated
    fn redaction_token(&self) -> String {
        self.redaction_pattern
            .replace("{TYPE}", &self.pii_type.tag().to_uppercase())
            .replace("{type}", &self.pii_type.tag().to_uppercase())
    }

    /// Replace findings in a deep copy of the message.
    ///
    /// The side that carries content is rewritten: `result` for responses,
    /// otherwise `params`. The original message is never touched.
    fn redact(&self, message: &McpMessage, findings: &[String]) -> McpMessage {
        let token = self.redaction_token();
        let mut modified = message.clone();
        if let Some(result) = modified.result.take() {
            modified.result = Some(apply_redactions(result, findings, &token));
        } else if let Some(params) = modified.params.take() {
            modified.params = Some(apply_redactions(params, findings, &token));
        }
        modified
    }
}

/// Recursively replace each finding inside strings; other leaf types pass
/// through untouched
fn apply_redactions(value: Value, findings: &[String], token: &str) -> Value {
    match value {
        Value::String(s) => {
            let mut out = s;
            for finding in findings {
                out = out.replace(finding.as_str(), token);
            }
            Value::String(out)
        }
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, apply_redactions(v, findings, token)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| apply_redactions(v, findings, token))
                .collect(),
        ),
        other => other,
    }
}

#[async_trait]
impl Guardrail for PiiGuardrail {
    fn guardrail_type(&self) -> &'static str {
        self.pii_type.guardrail_type()
    }

    async fn evaluate(
        &self,
        message: &McpMessage,
        request: &DecisionRequest,
    ) -> Result<GuardrailResult> {
        let tag = self.guardrail_type();

        if !self.direction.covers(request.direction) {
            debug!(
                pii_type = self.pii_type.tag(),
                direction = request.direction.as_str(),
                "PII: direction not configured, skipping"
            );
            return Ok(GuardrailResult::allow(tag, json!({})));
        }

        let content = extract_content(message);
        if content.is_empty() {
            return Ok(GuardrailResult::allow(tag, json!({})));
        }

        let findings = self.scan(&content);
        if findings.is_empty() {
            return Ok(GuardrailResult::allow(tag, json!({})));
        }

        info!(
            pii_type = self.pii_type.tag(),
            findings = findings.len(),
            direction = request.direction.as_str(),
            "PII detected"
        );

        match self.action {
            PiiAction::Block => Ok(GuardrailResult::block(
                tag,
                format!(
                    "Blocked due to {} detection",
                    self.pii_type.tag().to_uppercase()
                ),
                json!({
                    "pii_type": self.pii_type.tag(),
                    "total_findings": findings.len(),
                }),
                request.direction,
                Severity::Critical,
            )),
            PiiAction::Redact => {
                let modified = self.redact(message, &findings);
                Ok(GuardrailResult::modify(
                    tag,
                    modified,
                    format!(
                        "{} redacted: {} instances",
                        self.pii_type.tag().to_uppercase(),
                        findings.len()
                    ),
                    json!({
                        "pii_type": self.pii_type.tag(),
                        "redaction_count": findings.len(),
                    }),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::decision_request;
    use crate::guardrail::test_support::effective_config;
    use crate::model::{DecisionAction, Direction};

    fn detector(pii_type: PiiType, config: Value) -> PiiGuardrail {
        PiiGuardrail::from_config(
            pii_type,
            &effective_config(pii_type.guardrail_type(), config),
        )
        .unwrap()
    }

    fn response_with_text(text: &str) -> McpMessage {
        serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {"content": [{"type": "text", "text": text}]}
        }))
        .unwrap()
    }

    async fn scan_response(guardrail: &PiiGuardrail, text: &str) -> GuardrailResult {
        let message = response_with_text(text);
        let request = decision_request(Direction::Response, message.clone());
        guardrail.evaluate(&message, &request).await.unwrap()
    }

    // ── Validators ────────────────────────────────────────────────────

    #[test]
    fn ssn_validator_rejects_invalid_areas() {
        assert!(validate_ssn("123-45-6789"));
        assert!(!validate_ssn("000-45-6789"));
        assert!(!validate_ssn("666-12-3456"));
        assert!(!validate_ssn("900-12-3456"));
        assert!(!validate_ssn("999-12-3456"));
        assert!(!validate_ssn("123-45-678"));
    }

    #[test]
    fn luhn_validator_accepts_and_rejects() {
        assert!(validate_credit_card("4242 4242 4242 4242"));
        assert!(!validate_credit_card("4242 4242 4242 4241"));
        assert!(!validate_credit_card("1234"));
    }

    #[test]
    fn ip_validator_bounds_octets() {
        assert!(validate_ip_address("10.0.0.1"));
        assert!(validate_ip_address("255.255.255.255"));
        assert!(!validate_ip_address("256.1.1.1"));
        assert!(!validate_ip_address("10.0.0"));
    }

    #[test]
    fn email_and_phone_validators() {
        assert!(validate_email("alice@example.com"));
        assert!(!validate_email("not-an-email"));
        assert!(validate_phone("(555) 123-4567"));
        assert!(!validate_phone("555-1234"));
    }

    // ── Redaction ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn valid_ssn_is_redacted_in_response_text() {
        let guardrail = detector(PiiType::Ssn, json!({"direction": "response"}));
        let result = scan_response(&guardrail, "SSN is 123-45-6789").await;

        assert_eq!(result.action, DecisionAction::Modify);
        let modified = result.modified_message.unwrap();
        assert_eq!(
            modified.result.unwrap()["content"][0]["text"],
            "SSN is [REDACTED:SSN]"
        );
    }

    #[tokio::test]
    async fn invalid_ssn_area_is_not_reported() {
        let guardrail = detector(PiiType::Ssn, json!({"direction": "response"}));
        let result = scan_response(&guardrail, "SSN is 666-12-3456").await;
        assert_eq!(result.action, DecisionAction::Allow);
        assert!(result.modified_message.is_none());
    }

    #[tokio::test]
    async fn bad_luhn_card_is_not_reported() {
        let guardrail = detector(PiiType::CreditCard, json!({"direction": "response"}));
        let result = scan_response(&guardrail, "card 4242 4242 4242 4241").await;
        assert_eq!(result.action, DecisionAction::Allow);
    }

    #[tokio::test]
    async fn redaction_leaves_original_message_untouched() {
        let guardrail = detector(PiiType::Email, json!({"direction": "response"}));
        let message = response_with_text("mail alice@example.com now");
        let request = decision_request(Direction::Response, message.clone());

        let result = guardrail.evaluate(&message, &request).await.unwrap();
        assert_eq!(result.action, DecisionAction::Modify);
        // deep copy: the input still carries the address
        assert!(
            message.result.unwrap()["content"][0]["text"]
                .as_str()
                .unwrap()
                .contains("alice@example.com")
        );
    }

    #[tokio::test]
    async fn redaction_is_idempotent() {
        let guardrail = detector(PiiType::Ssn, json!({"direction": "response"}));
        let first = scan_response(&guardrail, "123-45-6789").await;
        let redacted = first.modified_message.unwrap();

        let request = decision_request(Direction::Response, redacted.clone());
        let second = guardrail.evaluate(&redacted, &request).await.unwrap();
        assert_eq!(second.action, DecisionAction::Allow);
    }

    #[tokio::test]
    async fn custom_redaction_pattern_is_interpolated() {
        let guardrail = detector(
            PiiType::Phone,
            json!({"direction": "response", "redaction_pattern": "<masked {TYPE}>"}),
        );
        let result = scan_response(&guardrail, "call (555) 123-4567").await;
        let modified = result.modified_message.unwrap();
        assert_eq!(
            modified.result.unwrap()["content"][0]["text"],
            "call <masked PHONE>"
        );
    }

    #[tokio::test]
    async fn request_params_redacted_when_direction_is_request() {
        let guardrail = detector(PiiType::Email, json!({"direction": "request"}));
        let message: McpMessage = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": {"name": "mail/send", "arguments": {"to": "bob@example.com"}}
        }))
        .unwrap();
        let request = decision_request(Direction::Request, message.clone());

        let result = guardrail.evaluate(&message, &request).await.unwrap();
        assert_eq!(result.action, DecisionAction::Modify);
        let modified = result.modified_message.unwrap();
        assert_eq!(
            modified.params.unwrap()["arguments"]["to"],
            "[REDACTED:EMAIL]"
        );
    }

    // ── Block action ──────────────────────────────────────────────────

    #[tokio::test]
    async fn block_action_blocks_with_critical_severity() {
        let guardrail = detector(
            PiiType::Ssn,
            json!({"direction": "response", "action": "block"}),
        );
        let result = scan_response(&guardrail, "123-45-6789").await;
        assert_eq!(result.action, DecisionAction::BlockResponse);
        assert_eq!(result.event.severity, Severity::Critical);
    }

    // ── Direction gating ──────────────────────────────────────────────

    #[tokio::test]
    async fn default_direction_skips_requests() {
        // default direction is "response"
        let guardrail = detector(PiiType::Ssn, json!({}));
        let message: McpMessage = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": {"name": "t", "arguments": {"ssn": "123-45-6789"}}
        }))
        .unwrap();
        let request = decision_request(Direction::Request, message.clone());
        let result = guardrail.evaluate(&message, &request).await.unwrap();
        assert_eq!(result.action, DecisionAction::Allow);
    }

    #[tokio::test]
    async fn both_direction_scans_requests_too() {
        let guardrail = detector(PiiType::Ssn, json!({"direction": "both"}));
        let message: McpMessage = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": {"name": "t", "arguments": {"ssn": "123-45-6789"}}
        }))
        .unwrap();
        let request = decision_request(Direction::Request, message.clone());
        let result = guardrail.evaluate(&message, &request).await.unwrap();
        assert_eq!(result.action, DecisionAction::Modify);
    }

    // ── Construction errors ───────────────────────────────────────────

    #[test]
    fn unknown_action_fails_construction() {
        let result = PiiGuardrail::from_config(
            PiiType::Ssn,
            &effective_config("pii_ssn", json!({"action": "quarantine"})),
        );
        assert!(matches!(result, Err(Error::GuardrailConfig { .. })));
    }

    #[test]
    fn unknown_direction_fails_construction() {
        let result = PiiGuardrail::from_config(
            PiiType::Ssn,
            &effective_config("pii_ssn", json!({"direction": "sideways"})),
        );
        assert!(matches!(result, Err(Error::GuardrailConfig { .. })));
    }
}

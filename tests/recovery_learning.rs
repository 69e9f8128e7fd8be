//! Learning-loop integration: AI solutions earn persistence, decayed
//! rules get dropped.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crawlify::recovery::{ErrorContext, RecoveryPipeline};
use crawlify::{ExecError, RecoveryThresholds, RuleOrigin, Store};

struct CannedResolver(&'static str);

#[async_trait]
impl crawlify::AiResolver for CannedResolver {
    async fn propose(&self, _prompt: &str) -> anyhow::Result<String> {
        Ok(self.0.to_string())
    }
}

fn ctx_500() -> ErrorContext {
    ErrorContext {
        url: "https://example.com/x".into(),
        domain: "example.com".into(),
        error_type: "network".into(),
        status_code: Some(500),
        response_body: None,
        attempted_rules: vec![],
    }
}

#[tokio::test]
async fn ai_solution_is_promoted_and_persisted_after_proving_itself() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = Store::open(&tmp.path().join("rules.sqlite"))
        .await
        .expect("store opens");

    let thresholds = RecoveryThresholds {
        ai_enabled: true,
        consecutive_threshold: 1,
        promotion_usage: 2,
        promotion_success_rate: 0.5,
        ..Default::default()
    };
    let pipeline = RecoveryPipeline::new(&thresholds, Some(store.clone())).with_ai(Arc::new(
        CannedResolver(r#"{"actions": [{"type": "add_delay", "parameters": {"delay_ms": 100}}], "confidence": 0.6}"#),
    ));
    // No predefined rule matches a plain 500, so the AI layer owns it
    pipeline.rules().load(vec![]).expect("empty rule set loads");

    let execution = Uuid::new_v4();
    let error = ExecError::Network("server error: HTTP 500".into());

    // First failure: AI synthesizes a rule
    let first = pipeline.handle(execution, &error, ctx_500()).await;
    let rule_id = first.rule_id.expect("ai rule created");
    assert!(rule_id.starts_with("ai_"));
    pipeline.record_success(execution, Some(&rule_id)).await;

    // Second failure on another URL: the registered AI rule matches
    let second = pipeline.handle(execution, &error, ctx_500()).await;
    assert_eq!(second.rule_id.as_deref(), Some(rule_id.as_str()));
    pipeline.record_success(execution, Some(&rule_id)).await;

    // Two successful uses at a perfect rate: promoted and persisted
    let live = pipeline.rules().rule(&rule_id).expect("rule still live");
    assert_eq!(live.created_by, RuleOrigin::Learned);

    let persisted = store.load_rules().await.expect("rules load");
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].id, rule_id);
    assert_eq!(persisted[0].created_by, RuleOrigin::Learned);
}

#[tokio::test]
async fn failing_ai_solution_is_demoted_and_dropped() {
    let thresholds = RecoveryThresholds {
        ai_enabled: true,
        consecutive_threshold: 1,
        promotion_usage: 2,
        promotion_success_rate: 0.9,
        demotion_floor: 0.5,
        ..Default::default()
    };
    let pipeline = RecoveryPipeline::new(&thresholds, None).with_ai(Arc::new(CannedResolver(
        r#"{"actions": [{"type": "rotate_proxy"}], "confidence": 0.4}"#,
    )));
    pipeline.rules().load(vec![]).expect("empty rule set loads");

    let execution = Uuid::new_v4();
    let error = ExecError::Network("server error: HTTP 500".into());

    // First failure synthesizes the rule; a second, unrelated failure
    // matches it again, bringing its usage to the demotion gate
    let first = pipeline.handle(execution, &error, ctx_500()).await;
    let rule_id = first.rule_id.expect("ai rule created");
    let second = pipeline.handle(execution, &error, ctx_500()).await;
    assert_eq!(second.rule_id.as_deref(), Some(rule_id.as_str()));

    // The retry after applying it fails: attempted_rules feeds the
    // failure back and the rule decays below the floor
    let mut ctx = ctx_500();
    ctx.attempted_rules = vec![rule_id.clone()];
    let _ = pipeline.handle(execution, &error, ctx).await;

    assert!(
        pipeline.rules().rule(&rule_id).is_none(),
        "decayed rule should be removed from the live set"
    );
}

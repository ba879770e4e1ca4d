//! Issue-Fixer 集成测试：上限、幂等、并发 pass、SQLite 存储

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use hive::agents::AgentType;
use hive::fixer::{
    ActionError, ActionLog, ActionOutcome, ActionProvider, ActionType, FixerConfig,
    InMemoryActionLog, IssueFixer, OutreachMessage, StaticUserDirectory,
};
use hive::memory::{
    InMemoryInsightStore, InsightCategory, InsightStore, NewInsight, Severity,
    SqliteInsightStore,
};

#[derive(Default)]
struct Recorder {
    outreach: Mutex<Vec<String>>,
    blocked: Mutex<Vec<IpAddr>>,
    notified: Mutex<usize>,
}

#[async_trait]
impl ActionProvider for Recorder {
    async fn send_outreach(&self, message: &OutreachMessage) -> Result<(), ActionError> {
        self.outreach.lock().unwrap().push(message.user_id.clone());
        Ok(())
    }

    async fn notify_owner(&self, _subject: &str, _body: &str) -> Result<(), ActionError> {
        *self.notified.lock().unwrap() += 1;
        Ok(())
    }

    async fn block_ip(&self, ip: IpAddr, ttl: Duration, _reason: &str) -> Result<(), ActionError> {
        assert_eq!(ttl, Duration::from_secs(3600));
        // 让并发 pass 有机会交错
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.blocked.lock().unwrap().push(ip);
        Ok(())
    }
}

fn fixer_over(
    store: Arc<dyn InsightStore>,
    actions: Arc<Recorder>,
    log: Arc<InMemoryActionLog>,
) -> IssueFixer {
    IssueFixer::new(
        store,
        actions,
        Arc::new(StaticUserDirectory::synthetic(40)),
        log,
        FixerConfig::default(),
    )
    .unwrap()
}

fn attack(i: usize) -> NewInsight {
    NewInsight::new(
        AgentType::SecuritySentinel,
        InsightCategory::Security,
        Severity::Critical,
        format!("Brute-force login attempts from 203.0.113.{i}"),
    )
    .with_metric("ip", serde_json::json!(format!("203.0.113.{i}")))
}

fn dormant(i: usize) -> NewInsight {
    NewInsight::new(
        AgentType::ChurnPredictor,
        InsightCategory::Growth,
        Severity::Warning,
        format!("Dormant cohort {i}"),
    )
    .with_recommendation("Re-engage users who lapsed last month")
}

async fn audit_titles(store: &InMemoryInsightStore) -> Vec<String> {
    store
        .all()
        .await
        .into_iter()
        .filter(|i| i.title.starts_with("Fixed: "))
        .map(|i| i.title)
        .collect()
}

#[tokio::test]
async fn pass_respects_insight_and_outreach_caps() {
    let store = Arc::new(InMemoryInsightStore::new());
    for i in 0..15 {
        store.create(dormant(i)).await.unwrap();
    }
    for i in 0..15 {
        store.create(attack(i)).await.unwrap();
    }
    let actions = Arc::new(Recorder::default());
    let log = Arc::new(InMemoryActionLog::new());
    let fixer = fixer_over(store.clone(), actions.clone(), log.clone());

    let report = fixer.run_pass().await.unwrap();
    assert_eq!(report.processed, 20);
    assert!(report.outreach_sent <= 5);
    assert!(actions.outreach.lock().unwrap().len() <= 5);
    // critical 在前：15 条攻击全部处理，剩余 5 条是不活跃洞察
    assert_eq!(actions.blocked.lock().unwrap().len(), 15);
    assert_eq!(report.outreach_sent, 5);
    assert_eq!(report.fixed, 20);
    assert_eq!(*actions.notified.lock().unwrap(), 20);

    let blocks = log
        .recent(100)
        .await
        .unwrap()
        .into_iter()
        .filter(|a| a.action_type == ActionType::BlockIp && a.outcome == ActionOutcome::Succeeded)
        .count();
    assert_eq!(blocks, 15);

    // 第二个 pass 处理剩余的 10 条
    let second = fixer.run_pass().await.unwrap();
    assert_eq!(second.processed, 10);
    assert!(second.outreach_sent <= 5);
}

#[tokio::test]
async fn concurrent_fixers_emit_one_audit_per_insight() {
    let store = Arc::new(InMemoryInsightStore::new());
    for i in 0..6 {
        store.create(attack(i)).await.unwrap();
    }
    let actions = Arc::new(Recorder::default());
    let a = Arc::new(fixer_over(
        store.clone(),
        actions.clone(),
        Arc::new(InMemoryActionLog::new()),
    ));
    let b = Arc::new(fixer_over(
        store.clone(),
        actions.clone(),
        Arc::new(InMemoryActionLog::new()),
    ));

    let (ra, rb) = tokio::join!(a.run_pass(), b.run_pass());
    let (ra, rb) = (ra.unwrap(), rb.unwrap());
    assert_eq!(ra.fixed + rb.fixed, 6);

    let titles = audit_titles(&store).await;
    assert_eq!(titles.len(), 6);
    let unique: HashSet<_> = titles.iter().collect();
    assert_eq!(unique.len(), 6);
    assert!(store.find_unresolved(50).await.unwrap().is_empty());
}

#[tokio::test]
async fn serialized_passes_on_one_fixer_do_not_double_remediate() {
    let store = Arc::new(InMemoryInsightStore::new());
    for i in 0..4 {
        store.create(attack(i)).await.unwrap();
    }
    let actions = Arc::new(Recorder::default());
    let fixer = Arc::new(fixer_over(
        store.clone(),
        actions.clone(),
        Arc::new(InMemoryActionLog::new()),
    ));

    let (first, second) = tokio::join!(fixer.run_pass(), fixer.run_pass());
    assert_eq!(first.unwrap().fixed + second.unwrap().fixed, 4);
    assert_eq!(actions.blocked.lock().unwrap().len(), 4);
    assert_eq!(audit_titles(&store).await.len(), 4);
}

#[tokio::test]
async fn resolve_is_idempotent_on_sqlite() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(SqliteInsightStore::open(dir.path().join("insights.db")).unwrap());
    let created = store.create(attack(42)).await.unwrap();
    let actions = Arc::new(Recorder::default());
    let fixer = fixer_over(store.clone(), actions, Arc::new(InMemoryActionLog::new()));

    let first = fixer.run_pass().await.unwrap();
    assert_eq!(first.fixed, 1);
    assert!(!store.resolve(&created.id, "manual").await.unwrap());

    let second = fixer.run_pass().await.unwrap();
    assert_eq!(second.processed, 0);

    let fixed = store
        .query_past(
            hive::memory::InsightFilter::Agent(AgentType::IssueFixer),
            Duration::from_secs(3600),
        )
        .await
        .unwrap();
    assert_eq!(fixed.len(), 1);
    assert!(fixed[0].is_resolved);
    assert_eq!(fixed[0].severity, Severity::Info);
}

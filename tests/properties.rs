//! Property-based tests for feed scoping and name validation.

use agent_sync::{
    AgentEditor, AgentId, FeedKind, FeedManager, Filter, MemoryService, OrganizationId,
    SyncConfig, Table,
};
use proptest::prelude::*;
use std::sync::Arc;
use tokio::sync::mpsc;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn scope_strategy() -> impl Strategy<Value = (u8, Option<u8>)> {
    (0u8..3, prop::option::of(0u8..3))
}

proptest! {
    /// Whatever sequence of scopes is armed, exactly the current scope's feeds
    /// are live, one per key.
    #[test]
    fn arm_keeps_one_feed_per_key(scopes in prop::collection::vec(scope_strategy(), 1..20)) {
        runtime().block_on(async {
            let service = Arc::new(MemoryService::new());
            let (tx, _rx) = mpsc::unbounded_channel();
            let mut manager = FeedManager::new(service.clone(), tx, 8);

            for (agent, org) in &scopes {
                let agent = AgentId::new(format!("agent-{agent}"));
                let org = org.map(|o| OrganizationId::new(format!("org-{o}")));
                manager.arm(&agent, org.as_ref()).await.unwrap();

                assert_eq!(service.feed_count(), 1 + usize::from(org.is_some()));
                assert_eq!(service.feed_count_for(Table::Agents, &Filter::id(agent.as_str())), 1);
                if let Some(org) = &org {
                    assert_eq!(
                        service.feed_count_for(Table::Organizations, &Filter::id(org.as_str())),
                        1
                    );
                }
            }

            manager.disarm().await;
            assert_eq!(service.feed_count(), 0);
        });
    }

    /// Re-arming an unchanged scope never replaces a live feed.
    #[test]
    fn rearming_same_scope_is_stable(scope in scope_strategy(), repeats in 1usize..5) {
        runtime().block_on(async {
            let service = Arc::new(MemoryService::new());
            let (tx, _rx) = mpsc::unbounded_channel();
            let mut manager = FeedManager::new(service.clone(), tx, 8);
            let agent = AgentId::new(format!("agent-{}", scope.0));
            let org = scope.1.map(|o| OrganizationId::new(format!("org-{o}")));

            manager.arm(&agent, org.as_ref()).await.unwrap();
            let ids = (manager.feed_id(FeedKind::Agent), manager.feed_id(FeedKind::Organization));
            for _ in 0..repeats {
                manager.arm(&agent, org.as_ref()).await.unwrap();
            }

            assert_eq!(
                (manager.feed_id(FeedKind::Agent), manager.feed_id(FeedKind::Organization)),
                ids
            );
        });
    }

    /// Accepted names come back trimmed.
    #[test]
    fn valid_names_are_trimmed(
        pad_left in "[ \t]{0,3}",
        name in "[a-zA-Z0-9][a-zA-Z0-9 ]{0,50}[a-zA-Z0-9]",
        pad_right in "[ \t]{0,3}",
    ) {
        let editor = AgentEditor::new(Arc::new(MemoryService::new()), &SyncConfig::default());
        let input = format!("{pad_left}{name}{pad_right}");
        prop_assert_eq!(editor.validate_name(&input).unwrap(), name);
    }

    /// Names over the limit are rejected regardless of content.
    #[test]
    fn overlong_names_are_rejected(name in "[a-z]{101,140}") {
        let editor = AgentEditor::new(Arc::new(MemoryService::new()), &SyncConfig::default());
        prop_assert!(editor.validate_name(&name).is_err());
    }
}

//! The tokio host, run on a paused clock.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fragment_board::{Board, BoardEvent, BoardRuntime, DialogueAdapter};
use fragment_core::FragmentConfig;
use fragment_core::config::ChatConfig;
use fragment_core::types::{Entity, EntityId, PairKey, Position};
use fragment_llm::types::{LineRequest, ReplyRequest, Speaker};
use fragment_llm::{DialogueGenerator, GenerationError};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::time::timeout;

const PATIENCE: Duration = Duration::from_secs(600);

struct Scripted {
    reply_delay: Duration,
}

#[async_trait]
impl DialogueGenerator for Scripted {
    async fn generate_topic(&self, a: &Speaker, b: &Speaker) -> Result<String, GenerationError> {
        Ok(format!("{} and {} on the road", a.name, b.name))
    }

    async fn generate_line(&self, request: &LineRequest) -> Result<String, GenerationError> {
        Ok(format!("{} speaks", request.sender.name))
    }

    async fn generate_reply(&self, request: &ReplyRequest) -> Result<String, GenerationError> {
        tokio::time::sleep(self.reply_delay).await;
        Ok(format!("{} nods", request.character.name))
    }
}

fn adapter(reply_delay: Duration) -> DialogueAdapter {
    DialogueAdapter::with_rng(Arc::new(Scripted { reply_delay }), &ChatConfig::default(), StdRng::seed_from_u64(3))
}

fn config() -> FragmentConfig {
    let mut config = FragmentConfig::default();
    config.persistence.backend = "none".into();
    config.autonomous.max_messages = 4;
    config.autonomous.interval_min_ms = 1000;
    config.autonomous.interval_max_ms = 2000;
    config
}

fn npc(name: &str, x: i32, y: i32) -> Entity {
    Entity::new(name, name, Position::new(x, y))
}

#[tokio::test(start_paused = true)]
async fn pair_talks_until_its_budget_is_spent() {
    let board = Board::new(
        config(),
        vec![Entity::user(Position::new(1000, 1000)), npc("frodo", 0, 0), npc("gandalf", 60, 0)],
    );
    let handle = BoardRuntime::spawn(board, adapter(Duration::ZERO));
    let mut views = handle.views();

    let capped = timeout(PATIENCE, views.wait_for(|v| v.iter().any(|n| n.can_restart)))
        .await
        .is_ok_and(|r| r.is_ok());
    assert!(capped, "pair never reached its cap");

    let board = handle.shutdown().await.expect("board returned");
    let key = PairKey::new(&EntityId::from("frodo"), &EntityId::from("gandalf"));
    let conversation = board.conversations().get(&key).expect("conversation");
    assert_eq!(conversation.messages.len(), 4);
    assert_eq!(conversation.topic.as_deref(), Some("frodo and gandalf on the road"));
    assert_eq!(conversation.messages[0].text, "frodo speaks");
    assert_eq!(conversation.messages[1].text, "gandalf speaks");
    assert!(board.autonomous().is_empty());
}

#[tokio::test(start_paused = true)]
async fn user_message_gets_a_reply() {
    let board = Board::new(config(), vec![Entity::user(Position::new(0, 0)), npc("frodo", 50, 0)]);
    let handle = BoardRuntime::spawn(board, adapter(Duration::from_millis(300)));
    let mut views = handle.views();

    assert!(handle.send(BoardEvent::ChatInput("good morning".into())).await);
    assert!(handle.send(BoardEvent::Send).await);

    let replied = timeout(
        PATIENCE,
        views.wait_for(|v| {
            v.iter()
                .any(|n| n.id.as_str() == "frodo" && n.messages.as_ref().is_some_and(|m| m.len() == 2))
        }),
    )
    .await
    .is_ok_and(|r| r.is_ok());
    assert!(replied, "reply never appeared");

    let board = handle.shutdown().await.expect("board returned");
    let messages = board.user_conversation(&EntityId::from("frodo"));
    assert_eq!(messages[0].text, "good morning");
    assert_eq!(messages[1].text, "frodo nods");
}

#[tokio::test(start_paused = true)]
async fn pane_click_publishes_a_placement() {
    let board = Board::new(config(), Vec::new());
    let handle = BoardRuntime::spawn(board, adapter(Duration::ZERO));
    let mut placements = handle.placements();

    assert!(handle.send(BoardEvent::PaneClick { position: Position::new(73, 26) }).await);
    let placed = timeout(PATIENCE, placements.wait_for(Option::is_some))
        .await
        .ok()
        .and_then(Result::ok)
        .and_then(|p| *p);
    assert_eq!(placed, Some(Position::new(50, 50)));
    assert!(handle.shutdown().await.is_some());
}

#[tokio::test(start_paused = true)]
async fn shutdown_abandons_in_flight_work() {
    let board = Board::new(config(), vec![Entity::user(Position::new(0, 0)), npc("frodo", 50, 0)]);
    let handle = BoardRuntime::spawn(board, adapter(Duration::from_secs(3600)));

    assert!(handle.send(BoardEvent::ChatInput("hello?".into())).await);
    assert!(handle.send(BoardEvent::Send).await);
    tokio::task::yield_now().await;

    let board = handle.shutdown().await.expect("board returned");
    assert_eq!(board.pending_requests(), 0);
    assert_eq!(board.session().pending_len(), 0);
    assert_eq!(board.next_deadline(), None);
    assert_eq!(board.user_conversation(&EntityId::from("frodo")).len(), 1);
}

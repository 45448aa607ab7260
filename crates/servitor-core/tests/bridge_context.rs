//! Prompt assembly, saving and memory wiring of the bridge.

use std::sync::Arc;

use chrono::Utc;
use servitor_core::fakes::{HashEmbedder, ScriptedInference, WordTokenizer};
use servitor_core::format::format_date;
use servitor_core::memory::window::WARMUP_ID;
use servitor_core::{
    ActorInfo, AgentDescriptor, Bridge, BridgeConfig, ChannelInfo, ChatLine, ContextFormatter,
    EphemeralVectorStore, InferenceArguments, KnowledgeMemory, MemoryProvider, StaticMemory,
    StopReason, VectorMemory, VectorMemoryConfig,
};

fn line(channel: &str, id: &str, author: &str, content: &str) -> ChatLine {
    ChatLine::new(
        ActorInfo::user(author),
        ChannelInfo::new(channel, "general", false),
        id,
        content,
    )
}

fn config() -> BridgeConfig {
    BridgeConfig {
        baseprompt: "  {char} is a robot. {xe} likes tea.{extra}  ".into(),
        args: InferenceArguments {
            max_new_tokens: Some(64),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn bridge(config: BridgeConfig, agent: AgentDescriptor) -> (Bridge, Arc<ScriptedInference>) {
    let driver = Arc::new(ScriptedInference::new([]));
    let bridge = Bridge::new(
        agent,
        config,
        driver.clone(),
        Arc::new(ContextFormatter::default()),
    );
    (bridge, driver)
}

fn servo() -> AgentDescriptor {
    AgentDescriptor::named("servo").without_warmup()
}

#[tokio::test]
async fn save_tokenizes_raw_and_formatted() {
    let (bridge, _) = bridge(config(), servo());
    bridge
        .save(line("c", "1", "alice", "hello there"), false)
        .await
        .unwrap();

    let window = bridge.get_window("c");
    assert_eq!(window.len(), 1);
    let msg = &window[0].message;
    assert_eq!(msg.tokens_raw, WordTokenizer::encode("hello there"));
    assert_eq!(msg.tokens, WordTokenizer::encode("ALICE: hello there\n\n"));
}

#[tokio::test]
async fn duplicate_ids_are_ignored() {
    let (bridge, _) = bridge(config(), servo());
    let first = line("c", "1", "alice", "hello");
    bridge.save(first.clone(), false).await.unwrap();
    bridge.save(first, false).await.unwrap();
    assert_eq!(bridge.get_count("c"), 1);
}

#[tokio::test]
async fn warmup_precedes_first_line() {
    let (bridge, _) = bridge(config(), AgentDescriptor::named("Servo Unit"));
    bridge
        .save(line("c", "1", "alice", "hi"), false)
        .await
        .unwrap();

    let window = bridge.get_window("c");
    assert_eq!(window.len(), 2);
    assert_eq!(window[0].message.id, WARMUP_ID);
    assert_eq!(
        bridge.formatter().normalize_name(&window[0].actor.friendlyname),
        "SERVOUNIT"
    );
    assert_eq!(window[0].message.content, "Hello! How may I assist you today?");
    assert_eq!(window[1].message.id, "1");
    assert_eq!(bridge.get_oldest("c").unwrap().message.id, WARMUP_ID);
    assert_eq!(bridge.get_roles("c"), vec!["SERVOUNIT", "ALICE"]);

    bridge.reset("c");
    assert_eq!(bridge.get_count("c"), 0);
}

#[tokio::test]
async fn open_channel_shows_only_warmup() {
    let (bridge, _) = bridge(config(), AgentDescriptor::named("Servo Unit"));
    bridge.open(&ChannelInfo::new("fresh", "fresh", true));

    let window = bridge.get_window("fresh");
    assert_eq!(window.len(), 1);
    assert!(window[0].actor.is_self);
    assert_eq!(bridge.get_roles("fresh"), vec!["SERVOUNIT"]);
    assert!(bridge.get_window("unseen").is_empty());
}

#[tokio::test]
async fn prompt_layout() {
    let (bridge, _) = bridge(config(), servo());
    let incoming = line("c", "1", "alice", "hi there");
    bridge.save(incoming.clone(), false).await.unwrap();

    let ctx = bridge.assemble_context(&incoming, None, None).await.unwrap();
    let date = format_date(&Utc::now());
    let expected_top = format!(
        "servo is a robot. it likes tea.\n\n\nthe following is a real conversation between servo \
         and users in #general on {date}. the conversation transcript continues for the \
         remainder of this document without any other text.\n\n"
    );
    assert_eq!(ctx.top, expected_top);
    assert_eq!(ctx.window, "ALICE: hi there\n\n");
    assert_eq!(ctx.input, "SERVO:");
    assert_eq!(ctx.prompt(), format!("{expected_top}ALICE: hi there\n\nSERVO:"));

    let continued = bridge
        .assemble_context(&incoming, None, Some("well, I"))
        .await
        .unwrap();
    assert_eq!(continued.input, "SERVO: well, I");
}

#[tokio::test]
async fn window_is_trimmed_to_hard_limit() {
    let (sizing, _) = bridge(config(), servo());
    let incoming = line("c", "x", "bob", "what happened");
    let top = sizing.assemble_context(&incoming, None, None).await.unwrap();
    let fixed = WordTokenizer::encode(&format!("{}{}", top.top, top.input)).len();

    // room for exactly two of the 3-token lines (5 with overhead each)
    let limited = BridgeConfig {
        hard_limit: fixed + 64 + 11,
        ..config()
    };
    let (bridge, _) = bridge(limited, servo());
    for i in 0..4 {
        bridge
            .save(line("c", &i.to_string(), "alice", &format!("message {i}")), false)
            .await
            .unwrap();
    }

    let ctx = bridge.assemble_context(&incoming, None, None).await.unwrap();
    assert_eq!(ctx.window, "ALICE: message 2\n\nALICE: message 3\n\n");
    assert_eq!(bridge.get_count("c"), 4);
}

#[tokio::test]
async fn exhausted_budget_yields_empty_window() {
    let (bridge, _) = bridge(
        BridgeConfig {
            hard_limit: 10,
            ..config()
        },
        servo(),
    );
    let incoming = line("c", "1", "alice", "hi");
    bridge.save(incoming.clone(), false).await.unwrap();
    let ctx = bridge.assemble_context(&incoming, None, None).await.unwrap();
    assert_eq!(ctx.window, "");
}

#[tokio::test]
async fn longterm_providers_are_injected_in_order() {
    let driver = Arc::new(ScriptedInference::new([]));
    let bridge = Bridge::new(
        servo(),
        config(),
        driver,
        Arc::new(ContextFormatter::default()),
    )
    .with_longterm(Arc::new(StaticMemory::new("fact one.")))
    .with_longterm(Arc::new(StaticMemory::new("\n\nfact two.")));

    let ctx = bridge
        .assemble_context(&line("c", "1", "alice", "hi"), None, None)
        .await
        .unwrap();
    assert!(ctx
        .top
        .starts_with("servo is a robot. it likes tea.\n\nfact one.\n\nfact two.\n\n\nthe following"));
}

#[tokio::test]
async fn knowledge_recall_is_separated_from_prompt() {
    let knowledge = KnowledgeMemory::new(Arc::new(HashEmbedder::new(32)));
    knowledge.add(["servo was built in 2019"]).await.unwrap();

    let bridge = Bridge::new(
        servo(),
        config(),
        Arc::new(ScriptedInference::new([])),
        Arc::new(ContextFormatter::default()),
    )
    .with_longterm(Arc::new(knowledge))
    .with_longterm(Arc::new(StaticMemory::new("")))
    .with_longterm(Arc::new(StaticMemory::new("it runs on batteries.")));

    let ctx = bridge
        .assemble_context(&line("c", "1", "alice", "when were you built?"), None, None)
        .await
        .unwrap();
    assert!(ctx.top.starts_with(
        "servo is a robot. it likes tea.\n\nservo was built in 2019\n\nit runs on batteries.\n\n\nthe following"
    ));
}

#[tokio::test]
async fn persist_longterm_gates_vector_memory() {
    let store = Arc::new(EphemeralVectorStore::new());
    let formatter = Arc::new(ContextFormatter::default());
    let vector = Arc::new(VectorMemory::new(
        Arc::new(HashEmbedder::new(32)),
        store.clone(),
        formatter.clone(),
        VectorMemoryConfig::default(),
    ));
    let bridge = Bridge::new(
        servo(),
        config(),
        Arc::new(ScriptedInference::new([])),
        formatter,
    )
    .with_longterm(vector);

    for i in 0..3 {
        bridge
            .save(line("c", &i.to_string(), "alice", "short lived"), false)
            .await
            .unwrap();
    }
    assert!(store.is_empty());

    for i in 3..6 {
        bridge
            .save(line("c", &i.to_string(), "alice", "kept forever"), true)
            .await
            .unwrap();
    }
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn same_channel_window_is_not_recalled() {
    let store = Arc::new(EphemeralVectorStore::new());
    let formatter = Arc::new(ContextFormatter::default());
    let vector = Arc::new(VectorMemory::new(
        Arc::new(HashEmbedder::new(32)),
        store.clone(),
        formatter.clone(),
        VectorMemoryConfig::default(),
    ));
    let bridge = Bridge::new(
        servo(),
        config(),
        Arc::new(ScriptedInference::new([])),
        formatter,
    )
    .with_longterm(vector.clone());

    for (i, text) in ["pizza is great", "pizza again", "more pizza"].iter().enumerate() {
        bridge
            .save(line("c", &i.to_string(), "alice", text), true)
            .await
            .unwrap();
    }
    assert_eq!(store.len(), 1);

    // the stored view is still inside the short-term window
    let incoming = line("c", "9", "alice", "pizza again");
    let ctx = bridge.assemble_context(&incoming, None, None).await.unwrap();
    assert!(!ctx.top.contains("recalled excerpt"));

    // another channel sees it
    let elsewhere = line("d", "9", "bob", "pizza again");
    let ctx = bridge.assemble_context(&elsewhere, None, None).await.unwrap();
    assert!(ctx.top.contains("recalled excerpt from previous conversation on"));
    assert!(ctx.top.contains("ALICE: more pizza"));
}

#[tokio::test]
async fn channels_are_independent_and_concurrent() {
    let driver = Arc::new(ScriptedInference::new([
        ScriptedInference::result("one", StopReason::EndOfSequence),
        ScriptedInference::result("two", StopReason::EndOfSequence),
    ]));
    let bridge = Arc::new(Bridge::new(
        servo(),
        config(),
        driver,
        Arc::new(ContextFormatter::default()),
    ));

    let mut handles = Vec::new();
    for channel in ["a", "b"] {
        let bridge = bridge.clone();
        handles.push(tokio::spawn(async move {
            let incoming = line(channel, "1", "alice", "hi");
            bridge.save(incoming.clone(), false).await?;
            let reply = bridge.infer(&incoming).await?;
            bridge.save(reply, false).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(bridge.get_count("a"), 2);
    assert_eq!(bridge.get_count("b"), 2);
    bridge.reset("a");
    assert_eq!(bridge.get_count("a"), 0);
    assert_eq!(bridge.get_count("b"), 2);
}

#[tokio::test]
async fn window_memory_works_as_provider() {
    let formatter = Arc::new(ContextFormatter::default());
    let window = servitor_core::WindowMemory::new(formatter, None);
    let l = line("c", "1", "alice", "remember me");
    MemoryProvider::save(&window, &l).await.unwrap();
    let text = MemoryProvider::recall(&window, &servitor_core::RecallRequest::new(&l, 100))
        .await
        .unwrap();
    assert_eq!(text, "ALICE: remember me\n\n");
}

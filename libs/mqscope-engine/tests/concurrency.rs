use std::sync::Arc;

use mqscope_api::IncomingMessage;
use mqscope_engine::{MessageStore, StoreEvent};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ingest_keeps_counts_and_order() {
    let store = Arc::new(MessageStore::default());
    let topics = ["plant/line1/temp", "plant/line1/rpm", "plant/line2/temp", "office/door"];

    let mut handles = Vec::new();
    for worker in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..250 {
                let topic = topics[(worker + i) % topics.len()];
                store.ingest(IncomingMessage::new(topic, format!("{worker}:{i}")));
                if i % 50 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stats = store.stats();
    assert_eq!(stats.topics, 4);
    assert_eq!(stats.messages, 8 * 250);
    assert_eq!(store.tree().total_count(), 8 * 250);
    assert_eq!(store.find_node("plant").unwrap().total_count(), 3 * 500);

    for topic in topics {
        let ids: Vec<u64> = store.messages(topic).iter().map(|r| r.id.0).collect();
        assert_eq!(ids.len(), 500, "{topic}");
        assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids out of order on {topic}");
        assert_eq!(store.find_node(topic).unwrap().message_count(), 500);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_messages_create_one_topic() {
    let store = Arc::new(MessageStore::default());
    let mut events = store.subscribe();

    let handles: Vec<_> = (0..64)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store.ingest(IncomingMessage::new("brand/new/topic", vec![i as u8]));
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(store.list_topics(), vec!["brand/new/topic"]);
    assert_eq!(store.messages("brand/new/topic").len(), 64);

    let mut added = 0;
    let mut appended = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            StoreEvent::TopicAdded { .. } => added += 1,
            StoreEvent::MessageAppended { .. } => appended += 1,
            _ => {}
        }
    }
    assert_eq!(added, 1);
    assert_eq!(appended, 64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_run_alongside_ingest() {
    let store = Arc::new(MessageStore::default());

    let writer = {
        let store = store.clone();
        tokio::spawn(async move {
            for i in 0..2000 {
                store.ingest(IncomingMessage::new(format!("dev/{}/state", i % 40), "on"));
                if i % 100 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        })
    };
    let reader = {
        let store = store.clone();
        tokio::spawn(async move {
            for i in 0..200 {
                store.apply_filter(if i % 2 == 0 { Some("state") } else { None });
                let snapshot = store.tree_snapshot(false);
                for root in &snapshot {
                    assert!(root.total_count >= root.message_count);
                }
                let _ = store.list_concrete_topics_under("dev");
                tokio::task::yield_now().await;
            }
        })
    };
    writer.await.unwrap();
    reader.await.unwrap();

    store.apply_filter(None);
    assert_eq!(store.list_concrete_topics_under("dev").len(), 40);
    assert_eq!(store.find_node("dev").unwrap().children().len(), 40);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_clear_racing_ingest_keeps_tree_and_buffer_in_step() {
    let store = Arc::new(MessageStore::default());
    let topics = ["cell/a", "cell/b"];

    let writers: Vec<_> = (0..4)
        .map(|worker| {
            let store = store.clone();
            tokio::spawn(async move {
                for i in 0..1000 {
                    store.ingest(IncomingMessage::new(topics[(worker + i) % 2], "1"));
                    if i % 64 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        })
        .collect();
    let clearer = {
        let store = store.clone();
        tokio::spawn(async move {
            for i in 0..300 {
                store.clear_topic(topics[i % 2]);
                tokio::task::yield_now().await;
            }
        })
    };
    for writer in writers {
        writer.await.unwrap();
    }
    clearer.await.unwrap();

    let mut stored = 0;
    for topic in topics {
        let in_buffer = store.messages(topic).len() as u64;
        let counted = store.find_node(topic).unwrap().message_count();
        assert_eq!(counted, in_buffer, "{topic}");
        stored += in_buffer;
    }
    assert_eq!(store.tree().total_count(), stored);
}
